use super::{AdvisorDirectory, NotificationStore};
use crate::error::Result;
use crate::models::{
    NewNotification, Notification, NotificationCounts, NotificationType, Page, ReadTransition,
};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, info};

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, diary_id, type, title, message, data, is_read, created_at, updated_at";

fn notification_from_row(row: &PgRow) -> Notification {
    let kind: String = row.get("type");
    Notification {
        id: row.get("id"),
        user_id: row.get("user_id"),
        diary_id: row.get("diary_id"),
        kind: NotificationType::parse(&kind),
        title: row.get("title"),
        message: row.get("message"),
        data: row.get("data"),
        is_read: row.get("is_read"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// PostgreSQL-backed notification rows
#[derive(Clone)]
pub struct PgNotificationStore {
    db: PgPool,
}

impl PgNotificationStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn insert(&self, new: NewNotification) -> Result<Notification> {
        let query = format!(
            r#"
            INSERT INTO notifications (user_id, diary_id, type, title, message, data, is_read)
            VALUES ($1, $2, $3, $4, $5, $6, false)
            RETURNING {}
            "#,
            NOTIFICATION_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(new.user_id)
            .bind(new.diary_id)
            .bind(new.kind.as_str())
            .bind(&new.title)
            .bind(&new.message)
            .bind(&new.data)
            .fetch_one(&self.db)
            .await
            .map_err(|e| {
                error!(user_id = new.user_id, "Failed to create notification: {}", e);
                e
            })?;

        let notification = notification_from_row(&row);
        info!(
            notification_id = notification.id,
            user_id = notification.user_id,
            kind = %notification.kind,
            "Created notification"
        );
        Ok(notification)
    }

    async fn find(&self, id: i64) -> Result<Option<Notification>> {
        let query = format!(
            "SELECT {} FROM notifications WHERE id = $1",
            NOTIFICATION_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.as_ref().map(notification_from_row))
    }

    async fn list_unread(&self, user_id: i64) -> Result<Vec<Notification>> {
        let query = format!(
            r#"
            SELECT {} FROM notifications
            WHERE user_id = $1 AND is_read = false
            ORDER BY created_at DESC, id DESC
            "#,
            NOTIFICATION_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&self.db)
            .await?;
        Ok(rows.iter().map(notification_from_row).collect())
    }

    async fn list_page(&self, user_id: i64, page: Page) -> Result<(Vec<Notification>, i64)> {
        let query = format!(
            r#"
            SELECT {} FROM notifications
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            OFFSET $2 LIMIT $3
            "#,
            NOTIFICATION_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .bind(page.offset())
            .bind(page.limit)
            .fetch_all(&self.db)
            .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.db)
            .await?;

        Ok((rows.iter().map(notification_from_row).collect(), total))
    }

    async fn counts(&self, user_id: i64) -> Result<NotificationCounts> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) FILTER (WHERE is_read = false) AS unread_count,
                   COUNT(*) AS total_count
            FROM notifications
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;

        Ok(NotificationCounts {
            unread_count: row.get("unread_count"),
            total_count: row.get("total_count"),
        })
    }

    async fn mark_read(&self, id: i64) -> Result<Option<ReadTransition>> {
        // The is_read guard makes the flip happen at most once under concurrency
        let query = format!(
            r#"
            UPDATE notifications
            SET is_read = true, updated_at = NOW()
            WHERE id = $1 AND is_read = false
            RETURNING {}
            "#,
            NOTIFICATION_COLUMNS
        );
        if let Some(row) = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.db)
            .await?
        {
            return Ok(Some(ReadTransition::Marked(notification_from_row(&row))));
        }

        debug!(notification_id = id, "Notification already read or missing");
        Ok(self.find(id).await?.map(ReadTransition::AlreadyRead))
    }

    async fn mark_all_read(&self, user_id: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET is_read = true, updated_at = NOW()
            WHERE user_id = $1 AND is_read = false
            "#,
        )
        .bind(user_id)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Advisor lookups against the shared `users` and `student_advisors` tables
#[derive(Clone)]
pub struct PgAdvisorDirectory {
    db: PgPool,
}

impl PgAdvisorDirectory {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AdvisorDirectory for PgAdvisorDirectory {
    async fn is_advisor(&self, user_id: i64) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = $1 AND role = 'advisor')",
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;
        Ok(exists)
    }

    async fn advisors_of(&self, student_id: i64) -> Result<Vec<i64>> {
        let advisors: Vec<i64> = sqlx::query_scalar(
            "SELECT DISTINCT advisor_id FROM student_advisors WHERE student_id = $1 ORDER BY advisor_id",
        )
        .bind(student_id)
        .fetch_all(&self.db)
        .await?;
        Ok(advisors)
    }

    async fn display_name(&self, user_id: i64) -> Result<Option<String>> {
        let name: Option<Option<String>> =
            sqlx::query_scalar("SELECT name FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.db)
                .await?;
        Ok(name.flatten())
    }
}
