//! Integration tests for the Connector
//!
//! Runs connectors on real loopback sockets with ephemeral ports.

use async_trait::async_trait;
use edge_connector::domain::metric_names;
use edge_connector::{
    AcceptedConnection, ConnectionHandler, Connector, ConnectorConfig, ConnectorError,
    ConnectorState, DashMapMetricsBackend, DimensionKeys, DimensionValue, MetricsBackend,
    ThrottlingConfig,
};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

fn config(port: u16) -> ConnectorConfig {
    ConnectorConfig {
        name: "default".to_string(),
        listen_port: port,
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        tcp_keep_alive_enabled: true,
        tcp_no_delay: true,
        drain_timeout_ms: 500,
        ..Default::default()
    }
}

fn build(config: ConnectorConfig) -> (Arc<Connector>, Arc<DashMapMetricsBackend>) {
    let keys = Arc::new(DimensionKeys::default());
    let backend = Arc::new(DashMapMetricsBackend::new(keys.clone()));
    let connector = Connector::new(config, backend.clone(), keys).unwrap();
    (Arc::new(connector), backend)
}

/// Handler that resolves a request context and holds the connection until EOF.
struct RecordingHandler {
    metrics: Arc<dyn MetricsBackend>,
    handled: AtomicUsize,
}

#[async_trait]
impl ConnectionHandler<AcceptedConnection> for RecordingHandler {
    async fn handle(&self, connection: AcceptedConnection) {
        let ctx = connection.connector().request_metric_context("GET", "http");
        self.metrics.add(metric_names::REQUESTS, 1, &ctx);
        self.handled.fetch_add(1, Ordering::SeqCst);
        let (mut stream, _connector, _guard) = connection.into_parts();
        let _ = tokio::io::copy(&mut stream, &mut tokio::io::sink()).await;
    }
}

#[tokio::test]
async fn test_adopted_channel_scenario() {
    let activator = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let bound = activator.local_addr().unwrap().port();

    let (connector, backend) = build(config(0));
    connector.open(Some(activator)).unwrap();
    assert_eq!(connector.listen_port(), bound);

    let a = connector.request_metric_context("GET", "http").unwrap();
    let b = connector.request_metric_context("GET", "http").unwrap();
    let c = connector.request_metric_context("POST", "https").unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(c.dimensions().get("method"), Some(&DimensionValue::from("POST")));
    assert_eq!(c.dimensions().get("scheme"), Some(&DimensionValue::from("https")));
    assert_eq!(c.dimensions().get("port"), Some(&DimensionValue::from(bound)));
    // connector context + two request contexts
    assert_eq!(backend.contexts_created(), 3);
}

#[tokio::test]
async fn test_adopting_unbound_channel_fails() {
    let socket = socket2::Socket::new(socket2::Domain::IPV4, socket2::Type::STREAM, None).unwrap();
    let unbound: std::net::TcpListener = socket.into();

    let (connector, _) = build(config(0));
    let err = connector.open(Some(unbound)).unwrap_err();

    assert!(matches!(err, ConnectorError::ChannelNotBound(_)));
    assert_eq!(connector.state(), ConnectorState::Closed);
    assert!(matches!(connector.accept().await, Err(ConnectorError::NotOpen(_))));
}

#[tokio::test]
async fn test_concurrent_request_context_lookups_converge() {
    let (connector, backend) = build(config(0));
    connector.open(None).unwrap();
    let before = backend.contexts_created();

    let lookups = (0..64).map(|_| {
        let c = connector.clone();
        tokio::spawn(async move { c.request_metric_context("GET", "http").unwrap() })
    });
    let contexts: Vec<_> = futures::future::join_all(lookups)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    for ctx in &contexts {
        assert!(Arc::ptr_eq(&contexts[0], ctx));
    }
    assert_eq!(backend.contexts_created(), before + 1);
}

#[tokio::test]
async fn test_disabled_throttling_never_delays() {
    let (connector, _) = build(ConnectorConfig {
        throttling: ThrottlingConfig {
            enabled: false,
            max_connections: Some(1),
            ..Default::default()
        },
        ..config(0)
    });
    connector.open(None).unwrap();
    let port = connector.listen_port();

    let mut clients = Vec::new();
    let mut held = Vec::new();
    for _ in 0..20 {
        clients.push(TcpStream::connect(("127.0.0.1", port)).await.unwrap());
        let conn = tokio::time::timeout(Duration::from_millis(500), connector.accept())
            .await
            .expect("accept was not delayed")
            .unwrap()
            .unwrap();
        held.push(conn);
    }

    let stats = connector.statistics();
    assert_eq!(stats.active, 20);
    assert_eq!(stats.throttled, 0);
    assert!(connector.throttle_state().is_none());
}

#[tokio::test]
async fn test_serve_and_close() {
    let (connector, backend) = build(ConnectorConfig {
        acceptors: 2,
        ..config(0)
    });
    connector.open(None).unwrap();
    let port = connector.listen_port();

    let handler = Arc::new(RecordingHandler {
        metrics: backend.clone(),
        handled: AtomicUsize::new(0),
    });
    let server = {
        let c = connector.clone();
        let h = handler.clone();
        tokio::spawn(async move { c.serve(h).await })
    };

    for _ in 0..5 {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(b"ping").await.unwrap();
        stream.shutdown().await.unwrap();
    }

    // Wait for all five to be handled and closed
    for _ in 0..100 {
        let stats = connector.statistics();
        if stats.closed == 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(handler.handled.load(Ordering::SeqCst), 5);
    assert!(connector.close().await);
    tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .expect("accept loops stopped")
        .unwrap()
        .unwrap();

    let stats = connector.statistics();
    assert_eq!(stats.accepted, 5);
    assert_eq!(stats.active, 0);
    assert_eq!(connector.state(), ConnectorState::Closed);

    let exposition = backend.export_prometheus();
    assert!(exposition.contains("connections_accepted{name=\"default\""));
    assert!(exposition.contains("method=\"GET\",scheme=\"http\"} 5"));
}

#[tokio::test]
async fn test_throttled_serve_still_accepts() {
    let (connector, _) = build(ConnectorConfig {
        throttling: ThrottlingConfig {
            enabled: true,
            max_connections: Some(2),
            low_water_connections: Some(1),
            max_accept_rate: None,
            max_delay_ms: 50,
        },
        ..config(0)
    });
    connector.open(None).unwrap();
    let port = connector.listen_port();

    let mut clients = Vec::new();
    let mut held = Vec::new();
    for _ in 0..4 {
        clients.push(TcpStream::connect(("127.0.0.1", port)).await.unwrap());
        held.push(connector.accept().await.unwrap().unwrap());
    }

    let stats = connector.statistics();
    assert_eq!(stats.accepted, 4);
    // Accepts with 2 and 3 live connections were held back
    assert_eq!(stats.throttled, 2);
    assert!(stats.throttle_delay_ms >= 100);

    drop(held);
    let _ = connector.close().await;
}

#[tokio::test]
async fn test_statistics_snapshot_json() {
    let (connector, _) = build(config(0));
    connector.open(None).unwrap();

    let json = serde_json::to_value(connector.statistics()).unwrap();
    assert_eq!(json["accepted"], 0);
    assert_eq!(json["active"], 0);
    assert!(json.get("mean_duration_ms").is_some());
}
