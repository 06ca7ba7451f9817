use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Notification type enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// A student wrote a new diary entry
    NewDiary,
    /// Someone commented on a student's diary
    Comment,
    /// Live-only event telling a dashboard that a notification was read
    NotificationRead,
    /// Explicit push from an operator or another service
    System,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::NewDiary => "new_diary",
            NotificationType::Comment => "comment",
            NotificationType::NotificationRead => "notification_read",
            NotificationType::System => "system",
        }
    }

    /// Parse a stored or client-supplied tag. Unknown tags map to `System`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "new_diary" => NotificationType::NewDiary,
            "comment" => NotificationType::Comment,
            "notification_read" => NotificationType::NotificationRead,
            _ => NotificationType::System,
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted notification row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: i64,

    /// Recipient (advisor) user ID
    pub user_id: i64,

    /// Diary entry the notification is about
    pub diary_id: Option<i64>,

    #[serde(rename = "type")]
    pub kind: NotificationType,

    pub title: String,

    pub message: String,

    /// Opaque structured payload
    pub data: Option<serde_json::Value>,

    pub is_read: bool,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// Lightweight event pushed to a live dashboard once this row is read.
    pub fn read_event(&self) -> Notification {
        Notification {
            id: self.id,
            user_id: self.user_id,
            diary_id: self.diary_id,
            kind: NotificationType::NotificationRead,
            title: String::new(),
            message: String::new(),
            data: None,
            is_read: true,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Request to create a notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewNotification {
    pub user_id: i64,
    pub diary_id: Option<i64>,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

/// Outcome of marking a single notification read
#[derive(Debug, Clone, PartialEq)]
pub enum ReadTransition {
    /// The flag flipped from unread to read by this call
    Marked(Notification),
    /// The notification was already read, nothing changed
    AlreadyRead(Notification),
}

impl ReadTransition {
    pub fn notification(&self) -> &Notification {
        match self {
            ReadTransition::Marked(n) | ReadTransition::AlreadyRead(n) => n,
        }
    }

    pub fn into_notification(self) -> Notification {
        match self {
            ReadTransition::Marked(n) | ReadTransition::AlreadyRead(n) => n,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NotificationCounts {
    pub unread_count: i64,
    pub total_count: i64,
}

/// Page request for the history endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: i64,
    pub limit: i64,
}

impl Page {
    pub const DEFAULT_LIMIT: i64 = 20;
    pub const MAX_LIMIT: i64 = 100;

    /// Clamp client input: page starts at 1, limit stays within 1..=100.
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        let page = page.unwrap_or(1).max(1);
        let limit = match limit {
            Some(l) if l >= 1 => l.min(Self::MAX_LIMIT),
            _ => Self::DEFAULT_LIMIT,
        };
        Self { page, limit }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// A page of notification history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    pub count: usize,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

/// Domain event: a student created a diary entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiaryCreated {
    pub diary_id: i64,
    pub student_id: i64,
    pub diary_date: NaiveDate,
}

/// Domain event: a comment was added to a student's diary entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommentCreated {
    pub comment_id: i64,
    pub diary_id: i64,
    pub student_id: i64,
    pub diary_date: NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_notification_type() {
        assert_eq!(NotificationType::parse("new_diary"), NotificationType::NewDiary);
        assert_eq!(NotificationType::parse("COMMENT"), NotificationType::Comment);
        assert_eq!(
            NotificationType::parse("notification_read"),
            NotificationType::NotificationRead
        );
        assert_eq!(NotificationType::parse("whatever"), NotificationType::System);
    }

    #[test]
    fn test_notification_serializes_type_field() {
        let now = Utc::now();
        let notification = Notification {
            id: 7,
            user_id: 3,
            diary_id: Some(11),
            kind: NotificationType::NewDiary,
            title: "New diary entry".into(),
            message: "Somchai added a new diary entry".into(),
            data: Some(serde_json::json!({"student_id": 5})),
            is_read: false,
            created_at: now,
            updated_at: now,
        };

        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["type"], "new_diary");
        assert_eq!(value["is_read"], false);
        assert_eq!(value["diary_id"], 11);
        assert!(value.get("kind").is_none());
    }

    #[test]
    fn test_read_event_keeps_identity() {
        let now = Utc::now();
        let notification = Notification {
            id: 42,
            user_id: 3,
            diary_id: None,
            kind: NotificationType::Comment,
            title: "New comment".into(),
            message: "x".into(),
            data: None,
            is_read: true,
            created_at: now,
            updated_at: now,
        };

        let event = notification.read_event();
        assert_eq!(event.id, 42);
        assert_eq!(event.user_id, 3);
        assert_eq!(event.kind, NotificationType::NotificationRead);
        assert!(event.is_read);
    }

    #[test]
    fn test_page_clamping() {
        assert_eq!(Page::new(None, None), Page { page: 1, limit: 20 });
        assert_eq!(Page::new(Some(0), Some(500)), Page { page: 1, limit: 100 });
        assert_eq!(Page::new(Some(-3), Some(0)), Page { page: 1, limit: 20 });
        assert_eq!(Page::new(Some(3), Some(10)).offset(), 20);
    }
}
