/// Notification services
///
/// `NotificationService` persists notifications, hands them to live advisor
/// streams, and turns diary activity into advisor notifications.
pub mod notification_service;

pub use notification_service::{
    Delivered, FanOutFailure, FanOutReport, LiveDelivery, NotificationService,
};
