/// Live advisor stream endpoint
///
/// GET /api/notification/stream?advisor_id=
///
/// Registers a session for the advisor (replacing any existing one) and
/// answers with a `text/event-stream` body fed by a spawned `StreamWriter`.
use super::AdvisorQuery;
use crate::error::Result;
use crate::services::NotificationService;
use crate::stream::{ChannelSink, StreamWriter};
use actix_web::http::header;
use actix_web::{web, HttpResponse};
use std::sync::Arc;

/// Frames buffered between the writer and the socket
const BODY_BUFFER: usize = 16;

pub async fn stream_notifications(
    service: web::Data<Arc<NotificationService>>,
    query: web::Query<AdvisorQuery>,
) -> Result<HttpResponse> {
    let advisor_id = query.advisor_id()?;
    let registration = service.open_stream(advisor_id).await?;

    let config = service.stream_config();
    let (sink, body) = ChannelSink::new(BODY_BUFFER);
    StreamWriter::new(
        service.registry().clone(),
        registration,
        sink,
        config.heartbeat_interval,
    )
    .with_keepalive(config.keepalive_interval)
    .spawn();

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(body))
}
