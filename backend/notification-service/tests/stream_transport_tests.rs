/// Advisor streams over a real HTTP server and TCP client
///
/// Covers the transport path the in-memory tests cannot: a client that
/// closes its socket without any request-level signal.
use actix_web::{web, App, HttpServer};
use diary_notification_service::config::StreamConfig;
use diary_notification_service::handlers::register_routes;
use diary_notification_service::store::{MemoryAdvisorDirectory, MemoryNotificationStore};
use diary_notification_service::{NotificationService, SessionRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const ADVISOR: i64 = 10;

fn notification_service(keepalive: Duration) -> Arc<NotificationService> {
    let directory = Arc::new(MemoryAdvisorDirectory::new());
    directory.add_advisor(ADVISOR, Some("Dr. Nok"));

    Arc::new(NotificationService::new(
        Arc::new(MemoryNotificationStore::new()),
        directory,
        SessionRegistry::default(),
        StreamConfig {
            keepalive_interval: keepalive,
            ..StreamConfig::default()
        },
    ))
}

fn start_server(service: Arc<NotificationService>) -> (SocketAddr, actix_web::dev::ServerHandle) {
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(service.clone()))
            .configure(register_routes)
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();

    let addr = server.addrs()[0];
    let server = server.run();
    let handle = server.handle();
    actix_rt::spawn(server);
    (addr, handle)
}

async fn open_stream(addr: SocketAddr) -> TcpStream {
    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(
            b"GET /api/notification/stream?advisor_id=10 HTTP/1.1\r\n\
              Host: localhost\r\n\
              Accept: text/event-stream\r\n\r\n",
        )
        .await
        .unwrap();

    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    tokio::time::timeout(Duration::from_secs(5), async {
        while !String::from_utf8_lossy(&received).contains("\"type\":\"connected\"") {
            let n = client.read(&mut buf).await.unwrap();
            assert!(n > 0, "server closed the stream early");
            received.extend_from_slice(&buf[..n]);
        }
    })
    .await
    .expect("no connected frame");

    let head = String::from_utf8_lossy(&received).to_string();
    assert!(head.starts_with("HTTP/1.1 200"));
    assert!(head.contains("text/event-stream"));
    client
}

async fn wait_for_unregister(service: &NotificationService, within: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if service.registry().lookup(ADVISOR).await.is_none() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[actix_web::test]
async fn test_closed_socket_unregisters_session_without_sweeper() {
    let service = notification_service(Duration::from_millis(100));
    let (addr, server) = start_server(service.clone());

    let client = open_stream(addr).await;
    assert!(service.registry().lookup(ADVISOR).await.is_some());

    drop(client);

    // well before the 30s heartbeat and the 2 min sweep
    assert!(wait_for_unregister(&service, Duration::from_secs(5)).await);
    assert!(service.connections().await.is_empty());

    // the advisor can connect again
    let _client = open_stream(addr).await;
    assert!(service.registry().lookup(ADVISOR).await.is_some());

    server.stop(false).await;
}

#[actix_web::test]
async fn test_open_socket_receives_keepalive_comments() {
    let service = notification_service(Duration::from_millis(100));
    let (addr, server) = start_server(service.clone());

    let mut client = open_stream(addr).await;
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    tokio::time::timeout(Duration::from_secs(5), async {
        while !String::from_utf8_lossy(&received).contains(": ping") {
            let n = client.read(&mut buf).await.unwrap();
            assert!(n > 0);
            received.extend_from_slice(&buf[..n]);
        }
    })
    .await
    .expect("no keepalive comment");

    // keepalives keep the session registered and active
    let connections = service.connections().await;
    assert!(connections[&ADVISOR].active);

    server.stop(false).await;
}
