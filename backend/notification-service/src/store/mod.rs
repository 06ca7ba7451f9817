/// Persistence collaborators of the notification core
///
/// The core only needs two seams:
/// 1. NotificationStore: create, read, flip the read flag, count, delete
/// 2. AdvisorDirectory: advisor role checks and student → advisor links
///
/// `postgres` backs both with sqlx; `memory` keeps everything in-process.
pub mod memory;
pub mod postgres;

use crate::error::Result;
use crate::models::{NewNotification, Notification, NotificationCounts, Page, ReadTransition};
use async_trait::async_trait;

pub use memory::{MemoryAdvisorDirectory, MemoryNotificationStore};
pub use postgres::{PgAdvisorDirectory, PgNotificationStore};

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Persist a new notification and return it with its assigned id.
    async fn insert(&self, new: NewNotification) -> Result<Notification>;

    async fn find(&self, id: i64) -> Result<Option<Notification>>;

    /// All unread notifications for a user, newest first.
    async fn list_unread(&self, user_id: i64) -> Result<Vec<Notification>>;

    /// One page of a user's history, newest first, plus the total row count.
    async fn list_page(&self, user_id: i64, page: Page) -> Result<(Vec<Notification>, i64)>;

    async fn counts(&self, user_id: i64) -> Result<NotificationCounts>;

    /// Flip the read flag. `None` when the notification does not exist.
    async fn mark_read(&self, id: i64) -> Result<Option<ReadTransition>>;

    /// Mark every unread notification of a user read, returning rows changed.
    async fn mark_all_read(&self, user_id: i64) -> Result<u64>;

    /// Delete a notification. `false` when it did not exist.
    async fn delete(&self, id: i64) -> Result<bool>;
}

#[async_trait]
pub trait AdvisorDirectory: Send + Sync {
    async fn is_advisor(&self, user_id: i64) -> Result<bool>;

    /// Advisors subscribed to a student.
    async fn advisors_of(&self, student_id: i64) -> Result<Vec<i64>>;

    async fn display_name(&self, user_id: i64) -> Result<Option<String>>;
}
