/// Notification history and read-state handlers
use super::{AdvisorQuery, ApiResponse};
use crate::error::{AppError, Result};
use crate::models::{NewNotification, NotificationType, Page};
use crate::services::NotificationService;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Paging parameters for the history endpoint
///
/// Unparseable values fall back to the defaults.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub advisor_id: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl HistoryQuery {
    fn page(&self) -> Page {
        let parse = |v: &Option<String>| v.as_deref().and_then(|s| s.trim().parse::<i64>().ok());
        Page::new(parse(&self.page), parse(&self.limit))
    }
}

/// Explicit push request
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PushNotificationPayload {
    pub user_id: i64,
    #[serde(rename = "type")]
    pub notification_type: Option<String>,
    pub title: String,
    pub message: String,
    pub diary_id: Option<i64>,
    pub data: Option<serde_json::Value>,
}

/// Unread notifications, newest first
///
/// GET /api/notification/unread?advisor_id=
pub async fn unread_notifications(
    service: web::Data<Arc<NotificationService>>,
    query: web::Query<AdvisorQuery>,
) -> Result<HttpResponse> {
    let advisor_id = query.advisor_id()?;
    let notifications = service.unread(advisor_id).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({
        "count": notifications.len(),
        "notifications": notifications,
    }))))
}

/// Paginated notification history
///
/// GET /api/notification/all?advisor_id=&page=&limit=
pub async fn all_notifications(
    service: web::Data<Arc<NotificationService>>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse> {
    let advisor_id = AdvisorQuery {
        advisor_id: query.advisor_id.clone(),
    }
    .advisor_id()?;
    let page = service.history(advisor_id, query.page()).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::ok(page)))
}

/// GET /api/notification/count?advisor_id=
pub async fn notification_count(
    service: web::Data<Arc<NotificationService>>,
    query: web::Query<AdvisorQuery>,
) -> Result<HttpResponse> {
    let advisor_id = query.advisor_id()?;
    let counts = service.counts(advisor_id).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::ok(counts)))
}

/// GET /api/notification/{id}
pub async fn get_notification(
    service: web::Data<Arc<NotificationService>>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let notification = service.get(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(notification)))
}

/// Mark notification as read
///
/// PATCH /api/notification/{id}/read
pub async fn mark_as_read(
    service: web::Data<Arc<NotificationService>>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let transition = service.mark_read(path.into_inner()).await?;
    let changed = matches!(transition, crate::models::ReadTransition::Marked(_));

    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({
        "changed": changed,
        "notification": transition.into_notification(),
    }))))
}

/// PATCH /api/notification/read-all?advisor_id=
pub async fn mark_all_as_read(
    service: web::Data<Arc<NotificationService>>,
    query: web::Query<AdvisorQuery>,
) -> Result<HttpResponse> {
    let advisor_id = query.advisor_id()?;
    let updated = service.mark_all_read(advisor_id).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({ "updated": updated }))))
}

/// DELETE /api/notification/{id}
pub async fn delete_notification(
    service: web::Data<Arc<NotificationService>>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let id = path.into_inner();
    service.delete(id).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({ "deleted": id }))))
}

/// Diagnostic view of live advisor streams
///
/// GET /api/notification/connections
pub async fn active_connections(
    service: web::Data<Arc<NotificationService>>,
) -> Result<HttpResponse> {
    let connections = service.connections().await;

    Ok(HttpResponse::Ok().json(ApiResponse::ok(json!({
        "count": connections.len(),
        "connections": connections,
    }))))
}

/// Store a notification and push it to the recipient if connected
///
/// POST /api/notification/push
pub async fn push_notification(
    service: web::Data<Arc<NotificationService>>,
    req: web::Json<PushNotificationPayload>,
) -> Result<HttpResponse> {
    let req = req.into_inner();
    if req.user_id <= 0 {
        return Err(AppError::bad_request("invalid user_id"));
    }
    if req.title.trim().is_empty() {
        return Err(AppError::bad_request("title is required"));
    }

    let new = NewNotification {
        user_id: req.user_id,
        diary_id: req.diary_id,
        kind: req
            .notification_type
            .as_deref()
            .map(NotificationType::parse)
            .unwrap_or(NotificationType::System),
        title: req.title,
        message: req.message,
        data: req.data,
    };
    let delivered = service.notify(new).await?;

    Ok(HttpResponse::Created().json(ApiResponse::ok(delivered)))
}
