use std::time::Duration;

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder,
};

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "diary_notification_http_requests_total",
            "Total HTTP requests handled by diary-notification-service",
        ),
        &["method", "path", "status"],
    )
    .expect("failed to create diary_notification_http_requests_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register diary_notification_http_requests_total");
    counter
});

static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "diary_notification_http_request_duration_seconds",
            "HTTP request latency for diary-notification-service",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        &["method", "path", "status"],
    )
    .expect("failed to create diary_notification_http_request_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register diary_notification_http_request_duration_seconds");
    histogram
});

static ACTIVE_STREAMS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "diary_notification_active_streams",
        "Advisor streams currently being written",
    )
    .expect("failed to create diary_notification_active_streams");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register diary_notification_active_streams");
    gauge
});

static STREAM_EXITS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "diary_notification_stream_exits_total",
            "Advisor streams ended, by reason",
        ),
        &["reason"],
    )
    .expect("failed to create diary_notification_stream_exits_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register diary_notification_stream_exits_total");
    counter
});

static FRAMES_SENT_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "diary_notification_frames_sent_total",
            "Event-stream frames written to advisors, by kind",
        ),
        &["kind"],
    )
    .expect("failed to create diary_notification_frames_sent_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register diary_notification_frames_sent_total");
    counter
});

static LIVE_DELIVERIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "diary_notification_live_deliveries_total",
            "Live delivery attempts after persistence, by outcome",
        ),
        &["outcome"],
    )
    .expect("failed to create diary_notification_live_deliveries_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register diary_notification_live_deliveries_total");
    counter
});

static SESSIONS_SWEPT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "diary_notification_sessions_swept_total",
        "Idle advisor sessions evicted by the sweeper",
    )
    .expect("failed to create diary_notification_sessions_swept_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register diary_notification_sessions_swept_total");
    counter
});

pub fn observe_http_request(method: &str, path: &str, status: u16, elapsed: Duration) {
    let status_label = status.to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status_label])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path, &status_label])
        .observe(elapsed.as_secs_f64());
}

pub fn stream_opened() {
    ACTIVE_STREAMS.inc();
}

pub fn stream_closed(reason: &str) {
    ACTIVE_STREAMS.dec();
    STREAM_EXITS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn frame_sent(kind: &str) {
    FRAMES_SENT_TOTAL.with_label_values(&[kind]).inc();
}

pub fn live_delivery(outcome: &str) {
    LIVE_DELIVERIES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn sessions_swept(count: usize) {
    SESSIONS_SWEPT_TOTAL.inc_by(count as u64);
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use std::rc::Rc;
use std::time::Instant;

/// Records request count and latency per route pattern
pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        // route pattern keeps ids out of the label set
        let path = req
            .match_pattern()
            .unwrap_or_else(|| "unmatched".to_string());
        let method = req.method().to_string();
        let start = Instant::now();

        Box::pin(async move {
            let result = service.call(req).await;
            let elapsed = start.elapsed();
            match &result {
                Ok(response) => {
                    observe_http_request(&method, &path, response.status().as_u16(), elapsed);
                }
                Err(_) => {
                    observe_http_request(&method, &path, 500, elapsed);
                }
            }
            result
        })
    }
}
