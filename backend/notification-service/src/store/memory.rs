use super::{AdvisorDirectory, NotificationStore};
use crate::error::{AppError, Result};
use crate::models::{NewNotification, Notification, NotificationCounts, Page, ReadTransition};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};

/// In-process notification store.
///
/// Used by tests and for running the service without PostgreSQL. Ids are
/// assigned sequentially starting at 1.
#[derive(Default)]
pub struct MemoryNotificationStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    next_id: i64,
    rows: BTreeMap<i64, Notification>,
    rejected_users: HashSet<i64>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every insert for `user_id` fail, simulating a persistence outage.
    pub fn reject_inserts_for(&self, user_id: i64) {
        self.inner.lock().rejected_users.insert(user_id);
    }

    /// Number of persisted rows across all users.
    pub fn len(&self) -> usize {
        self.inner.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Ids are assigned in creation order
    fn newest_first(mut rows: Vec<Notification>) -> Vec<Notification> {
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        rows
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn insert(&self, new: NewNotification) -> Result<Notification> {
        let mut inner = self.inner.lock();
        if inner.rejected_users.contains(&new.user_id) {
            return Err(AppError::Internal(format!(
                "insert rejected for user {}",
                new.user_id
            )));
        }

        inner.next_id += 1;
        let now = Utc::now();
        let notification = Notification {
            id: inner.next_id,
            user_id: new.user_id,
            diary_id: new.diary_id,
            kind: new.kind,
            title: new.title,
            message: new.message,
            data: new.data,
            is_read: false,
            created_at: now,
            updated_at: now,
        };
        inner.rows.insert(notification.id, notification.clone());
        Ok(notification)
    }

    async fn find(&self, id: i64) -> Result<Option<Notification>> {
        Ok(self.inner.lock().rows.get(&id).cloned())
    }

    async fn list_unread(&self, user_id: i64) -> Result<Vec<Notification>> {
        let rows = self
            .inner
            .lock()
            .rows
            .values()
            .filter(|n| n.user_id == user_id && !n.is_read)
            .cloned()
            .collect();
        Ok(Self::newest_first(rows))
    }

    async fn list_page(&self, user_id: i64, page: Page) -> Result<(Vec<Notification>, i64)> {
        let rows: Vec<Notification> = self
            .inner
            .lock()
            .rows
            .values()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        let total = rows.len() as i64;
        let page_rows = Self::newest_first(rows)
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit as usize)
            .collect();
        Ok((page_rows, total))
    }

    async fn counts(&self, user_id: i64) -> Result<NotificationCounts> {
        let inner = self.inner.lock();
        let mut counts = NotificationCounts::default();
        for n in inner.rows.values().filter(|n| n.user_id == user_id) {
            counts.total_count += 1;
            if !n.is_read {
                counts.unread_count += 1;
            }
        }
        Ok(counts)
    }

    async fn mark_read(&self, id: i64) -> Result<Option<ReadTransition>> {
        let mut inner = self.inner.lock();
        let Some(row) = inner.rows.get_mut(&id) else {
            return Ok(None);
        };
        if row.is_read {
            return Ok(Some(ReadTransition::AlreadyRead(row.clone())));
        }
        row.is_read = true;
        row.updated_at = Utc::now();
        Ok(Some(ReadTransition::Marked(row.clone())))
    }

    async fn mark_all_read(&self, user_id: i64) -> Result<u64> {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        let mut changed = 0;
        for row in inner
            .rows
            .values_mut()
            .filter(|n| n.user_id == user_id && !n.is_read)
        {
            row.is_read = true;
            row.updated_at = now;
            changed += 1;
        }
        Ok(changed)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        Ok(self.inner.lock().rows.remove(&id).is_some())
    }
}

/// In-process user directory
#[derive(Default)]
pub struct MemoryAdvisorDirectory {
    inner: Mutex<DirectoryInner>,
}

#[derive(Default)]
struct DirectoryInner {
    advisors: HashSet<i64>,
    names: HashMap<i64, String>,
    links: BTreeMap<i64, Vec<i64>>,
}

impl MemoryAdvisorDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_advisor(&self, advisor_id: i64, name: Option<&str>) {
        let mut inner = self.inner.lock();
        inner.advisors.insert(advisor_id);
        if let Some(name) = name {
            inner.names.insert(advisor_id, name.to_string());
        }
    }

    pub fn add_student(&self, student_id: i64, name: Option<&str>) {
        if let Some(name) = name {
            self.inner.lock().names.insert(student_id, name.to_string());
        }
    }

    /// Subscribe an advisor to a student's activity.
    pub fn link(&self, advisor_id: i64, student_id: i64) {
        let mut inner = self.inner.lock();
        let advisors = inner.links.entry(student_id).or_default();
        if !advisors.contains(&advisor_id) {
            advisors.push(advisor_id);
        }
    }
}

#[async_trait]
impl AdvisorDirectory for MemoryAdvisorDirectory {
    async fn is_advisor(&self, user_id: i64) -> Result<bool> {
        Ok(self.inner.lock().advisors.contains(&user_id))
    }

    async fn advisors_of(&self, student_id: i64) -> Result<Vec<i64>> {
        Ok(self
            .inner
            .lock()
            .links
            .get(&student_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn display_name(&self, user_id: i64) -> Result<Option<String>> {
        Ok(self.inner.lock().names.get(&user_id).cloned())
    }
}
