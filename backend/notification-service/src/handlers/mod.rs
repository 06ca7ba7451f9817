/// HTTP handlers for the diary notification API
pub mod notifications;
pub mod stream;

use crate::error::{AppError, Result};
use actix_web::web;
use serde::{Deserialize, Serialize};

pub use notifications::*;
pub use stream::stream_notifications;

/// API Response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// `?advisor_id=` query shared by the per-advisor endpoints
///
/// Kept as a raw string so a malformed id is reported as a 400 with a
/// readable message instead of the extractor's default.
#[derive(Debug, Deserialize)]
pub struct AdvisorQuery {
    pub advisor_id: Option<String>,
}

impl AdvisorQuery {
    pub fn advisor_id(&self) -> Result<i64> {
        let raw = self
            .advisor_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::bad_request("advisor_id is required"))?;

        match raw.parse::<i64>() {
            Ok(id) if id > 0 => Ok(id),
            _ => Err(AppError::bad_request("invalid advisor_id")),
        }
    }
}

/// Register routes
///
/// Extractor failures answer with the same JSON error body as handler errors.
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/notification")
            .app_data(web::PathConfig::default().error_handler(|err, _req| {
                AppError::bad_request(format!("invalid notification id: {}", err)).into()
            }))
            .app_data(web::JsonConfig::default().error_handler(|err, _req| {
                AppError::bad_request(format!("invalid request body: {}", err)).into()
            }))
            .route("/stream", web::get().to(stream_notifications))
            .route("/unread", web::get().to(unread_notifications))
            .route("/all", web::get().to(all_notifications))
            .route("/count", web::get().to(notification_count))
            .route("/connections", web::get().to(active_connections))
            .route("/push", web::post().to(push_notification))
            .route("/read-all", web::patch().to(mark_all_as_read))
            .route("/{id}/read", web::patch().to(mark_as_read))
            .route("/{id}", web::get().to(get_notification))
            .route("/{id}", web::delete().to(delete_notification)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(raw: Option<&str>) -> AdvisorQuery {
        AdvisorQuery {
            advisor_id: raw.map(str::to_string),
        }
    }

    #[test]
    fn test_advisor_id_parsing() {
        assert_eq!(query(Some("12")).advisor_id().unwrap(), 12);
        assert_eq!(query(Some(" 7 ")).advisor_id().unwrap(), 7);
    }

    #[test]
    fn test_advisor_id_rejections() {
        for raw in [None, Some(""), Some("abc"), Some("-4"), Some("0"), Some("1.5")] {
            let err = query(raw).advisor_id().unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)), "{:?}", raw);
        }
    }

    #[test]
    fn test_api_response_shape() {
        let value = serde_json::to_value(ApiResponse::ok(3)).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["data"], 3);
        assert!(value["error"].is_null());
    }
}
