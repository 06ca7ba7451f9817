/// Notification Service Core Engine
///
/// This module provides the high-level notification service that:
/// 1. Stores notifications in the database (the source of truth)
/// 2. Pushes each stored notification to the recipient's live stream, if any
/// 3. Fans diary and comment activity out to a student's advisors
/// 4. Serves history, counts and read-state changes
///
/// Live delivery is at-most-once and never blocks: a missing, closed or full
/// stream only changes the reported `LiveDelivery`, never the result of the
/// triggering operation.
use crate::config::StreamConfig;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::{
    CommentCreated, DiaryCreated, NewNotification, Notification, NotificationCounts,
    NotificationPage, NotificationType, Page, ReadTransition,
};
use crate::store::{AdvisorDirectory, NotificationStore};
use crate::stream::{ConnectionStatus, Enqueue, Registration, SessionRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const UNKNOWN_STUDENT: &str = "Unknown student";

/// What happened to the live push of a stored notification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LiveDelivery {
    /// Handed to the recipient's stream queue
    Queued,
    /// Stream queue full, live push discarded
    Dropped,
    /// Stream closing, live push discarded
    Closed,
    /// Recipient has no live stream
    Offline,
}

impl LiveDelivery {
    pub fn as_str(&self) -> &'static str {
        match self {
            LiveDelivery::Queued => "queued",
            LiveDelivery::Dropped => "dropped",
            LiveDelivery::Closed => "closed",
            LiveDelivery::Offline => "offline",
        }
    }
}

impl From<Enqueue> for LiveDelivery {
    fn from(outcome: Enqueue) -> Self {
        match outcome {
            Enqueue::Queued => LiveDelivery::Queued,
            Enqueue::Dropped => LiveDelivery::Dropped,
            Enqueue::Closed => LiveDelivery::Closed,
        }
    }
}

/// A persisted notification and the outcome of its live push
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Delivered {
    pub notification: Notification,
    pub live: LiveDelivery,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FanOutFailure {
    pub user_id: i64,
    pub error: String,
}

/// Per-recipient results of a fan-out
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FanOutReport {
    pub delivered: Vec<Delivered>,
    pub failed: Vec<FanOutFailure>,
}

impl FanOutReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Main Notification Service
pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    directory: Arc<dyn AdvisorDirectory>,
    registry: SessionRegistry,
    stream: StreamConfig,
}

impl NotificationService {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        directory: Arc<dyn AdvisorDirectory>,
        registry: SessionRegistry,
        stream: StreamConfig,
    ) -> Self {
        Self {
            store,
            directory,
            registry,
            stream,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn stream_config(&self) -> StreamConfig {
        self.stream
    }

    /// Persist a notification, then push it to the recipient's live stream.
    ///
    /// Persistence failure is returned and nothing is pushed. Live delivery
    /// never fails the call.
    pub async fn notify(&self, new: NewNotification) -> Result<Delivered> {
        let notification = self.store.insert(new).await?;
        let live = self.push_live(&notification).await;

        debug!(
            notification_id = notification.id,
            user_id = notification.user_id,
            kind = %notification.kind,
            live = live.as_str(),
            "Notification stored"
        );

        Ok(Delivered { notification, live })
    }

    /// Send one notification per recipient, built from `template`.
    ///
    /// A failure for one recipient is recorded and never stops the others.
    pub async fn notify_many(&self, recipients: &[i64], template: NewNotification) -> FanOutReport {
        let mut report = FanOutReport::default();

        for &user_id in recipients {
            let new = NewNotification {
                user_id,
                ..template.clone()
            };
            match self.notify(new).await {
                Ok(delivered) => report.delivered.push(delivered),
                Err(e) => {
                    warn!(user_id, kind = %template.kind, "Failed to create notification: {}", e);
                    report.failed.push(FanOutFailure {
                        user_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        report
    }

    /// Notify a student's advisors about a new diary entry.
    pub async fn diary_created(&self, event: DiaryCreated) -> Result<FanOutReport> {
        let name = self.student_name(event.student_id).await;
        let template = NewNotification {
            user_id: 0,
            diary_id: Some(event.diary_id),
            kind: NotificationType::NewDiary,
            title: "New diary entry".to_string(),
            message: format!("{} added a new diary entry", name),
            data: Some(serde_json::json!({
                "diary_date": event.diary_date.format("%Y-%m-%d").to_string(),
                "student_id": event.student_id,
            })),
        };

        self.fan_out_to_advisors(event.student_id, template).await
    }

    /// Notify a student's advisors about a new comment on one of their entries.
    pub async fn comment_created(&self, event: CommentCreated) -> Result<FanOutReport> {
        let name = self.student_name(event.student_id).await;
        let template = NewNotification {
            user_id: 0,
            diary_id: Some(event.diary_id),
            kind: NotificationType::Comment,
            title: "New comment".to_string(),
            message: format!("{} added a new comment", name),
            data: Some(serde_json::json!({
                "diary_date": event.diary_date.format("%Y-%m-%d").to_string(),
                "student_id": event.student_id,
            })),
        };

        self.fan_out_to_advisors(event.student_id, template).await
    }

    /// Register a live stream for an advisor.
    ///
    /// Replaces any stream the advisor already has open.
    pub async fn open_stream(&self, advisor_id: i64) -> Result<Registration> {
        if !self.directory.is_advisor(advisor_id).await? {
            return Err(AppError::not_found("advisor"));
        }

        let registration = self
            .registry
            .register(advisor_id, self.stream.queue_capacity)
            .await;
        info!(advisor_id, session_id = %registration.session.id(), "Advisor stream opened");
        Ok(registration)
    }

    /// Mark one notification read.
    ///
    /// Only the call that flips the flag pushes a `notification_read` event
    /// to the owner's live stream.
    pub async fn mark_read(&self, id: i64) -> Result<ReadTransition> {
        let transition = self
            .store
            .mark_read(id)
            .await?
            .ok_or_else(|| AppError::not_found("notification"))?;

        if let ReadTransition::Marked(notification) = &transition {
            let live = self.push_live(&notification.read_event()).await;
            debug!(
                notification_id = id,
                user_id = notification.user_id,
                live = live.as_str(),
                "Notification marked read"
            );
        }

        Ok(transition)
    }

    pub async fn mark_all_read(&self, user_id: i64) -> Result<u64> {
        let changed = self.store.mark_all_read(user_id).await?;
        debug!(user_id, changed, "Marked all notifications read");
        Ok(changed)
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        if self.store.delete(id).await? {
            Ok(())
        } else {
            Err(AppError::not_found("notification"))
        }
    }

    pub async fn get(&self, id: i64) -> Result<Notification> {
        self.store
            .find(id)
            .await?
            .ok_or_else(|| AppError::not_found("notification"))
    }

    pub async fn unread(&self, user_id: i64) -> Result<Vec<Notification>> {
        self.store.list_unread(user_id).await
    }

    pub async fn history(&self, user_id: i64, page: Page) -> Result<NotificationPage> {
        let (notifications, total) = self.store.list_page(user_id, page).await?;
        Ok(NotificationPage {
            count: notifications.len(),
            notifications,
            total,
            page: page.page,
            limit: page.limit,
        })
    }

    pub async fn counts(&self, user_id: i64) -> Result<NotificationCounts> {
        self.store.counts(user_id).await
    }

    pub async fn connections(&self) -> BTreeMap<i64, ConnectionStatus> {
        self.registry.snapshot().await
    }

    async fn fan_out_to_advisors(
        &self,
        student_id: i64,
        template: NewNotification,
    ) -> Result<FanOutReport> {
        let advisors = self.directory.advisors_of(student_id).await?;
        if advisors.is_empty() {
            debug!(student_id, kind = %template.kind, "Student has no advisors to notify");
            return Ok(FanOutReport::default());
        }

        let report = self.notify_many(&advisors, template).await;
        info!(
            student_id,
            notified = report.delivered.len(),
            failed = report.failed.len(),
            "Advisor fan-out finished"
        );
        Ok(report)
    }

    async fn student_name(&self, student_id: i64) -> String {
        match self.directory.display_name(student_id).await {
            Ok(Some(name)) if !name.trim().is_empty() => name,
            Ok(_) => UNKNOWN_STUDENT.to_string(),
            Err(e) => {
                warn!(student_id, "Failed to look up student name: {}", e);
                UNKNOWN_STUDENT.to_string()
            }
        }
    }

    async fn push_live(&self, notification: &Notification) -> LiveDelivery {
        let live = match self.registry.lookup(notification.user_id).await {
            Some(session) => LiveDelivery::from(session.enqueue(notification.clone())),
            None => LiveDelivery::Offline,
        };

        match live {
            LiveDelivery::Dropped => warn!(
                user_id = notification.user_id,
                notification_id = notification.id,
                "Stream queue full, live push dropped"
            ),
            LiveDelivery::Closed => debug!(
                user_id = notification.user_id,
                notification_id = notification.id,
                "Stream closing, live push skipped"
            ),
            _ => {}
        }
        metrics::live_delivery(live.as_str());
        live
    }
}
