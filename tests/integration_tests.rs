use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use trip_feed::backoff::RetryPolicy;
use trip_feed::fetch::BasicClient;
use trip_feed::fetch::auth::UrlParam;
use trip_feed::flatten::{TripView, flatten_snapshot};
use trip_feed::realtime::{FirebaseStore, RealtimeStore, fetch_snapshot};
use trip_feed::stats::FeedStats;
use trip_feed::subscription::{
    ConnectionStatus, SubscriptionOptions, TripFeed, fetch_cooperative_snapshot,
};

fn fixture() -> Value {
    serde_json::from_str(include_str!("fixtures/cooperative_snapshot.json"))
        .expect("Failed to parse fixture")
}

#[test]
fn test_fixture_pipeline() {
    let snapshot = fixture();
    let trips = flatten_snapshot(&snapshot);

    // motoristaC has no trip data.
    assert_eq!(trips.len(), 3);
    assert!(trips.iter().all(|t| t.motorista_id != "motoristaC"));

    let first = serde_json::to_value(&trips[0]).unwrap();
    assert_eq!(
        first,
        json!({
            "id": "t1",
            "motoristaId": "motoristaA",
            "passageiros": [{ "nome": "Ana" }],
            "statusViagem": "",
            "enderecoEmpresa": "",
            "latitudeOrigem": 0.0,
            "longitudeOrigem": 0.0,
            "latitudeDestino": 0.0,
            "longitudeDestino": 0.0
        })
    );

    let view = TripView::from(trips);
    let bruno = view.for_driver("motoristaB").unwrap();
    assert_eq!(bruno.passageiros.len(), 2);
    assert_eq!(bruno.driver_position(), Some((-23.552, -46.635)));

    let d = view.for_driver("motoristaD").unwrap();
    assert_eq!(d.latitude_origem, -23.60);
    assert!(d.awaiting_location());

    let stats = FeedStats::from_trips(Some(&snapshot), &view);
    assert_eq!(stats.driver_entries, 4);
    assert_eq!(stats.active_trips, 3);
    assert_eq!(stats.with_driver_fix, 1);
    assert_eq!(stats.passengers, 3);
}

/// Serves each accepted connection with the next canned response, then
/// closes it. Returns the base URL and a channel of received request lines.
async fn serve(responses: Vec<String>) -> (String, tokio::sync::mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

    tokio::spawn(async move {
        for response in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let text = String::from_utf8_lossy(&request).into_owned();
            let _ = tx.send(text);
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        }
    });

    (format!("http://{addr}"), rx)
}

fn event_stream(events: &[(&str, Value)]) -> String {
    let mut body = String::from(
        "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n",
    );
    for (event, data) in events {
        body.push_str(&format!("event: {event}\ndata: {data}\n\n"));
    }
    body
}

#[tokio::test]
async fn test_one_shot_read() {
    let body = fixture().to_string();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let (base, mut requests) = serve(vec![response]).await;

    let client = UrlParam::auth(BasicClient::new(), "secret".to_string());
    let snapshot = fetch_snapshot(&client, &base, "viagensEmAndamento/coop1")
        .await
        .unwrap();

    assert_eq!(flatten_snapshot(&snapshot).len(), 3);
    let request = requests.recv().await.unwrap();
    assert!(request.starts_with("GET /viagensEmAndamento/coop1.json?auth=secret "));
}

#[tokio::test]
async fn test_live_subscription_over_event_stream() {
    let stream = event_stream(&[
        ("put", json!({ "path": "/", "data": fixture() })),
        ("keep-alive", Value::Null),
        ("patch", json!({
            "path": "/motoristaD/dadosDaViagem",
            "data": { "latitudeMotorista": -23.61, "longitudeMotorista": -46.71 }
        })),
        ("put", json!({ "path": "/motoristaA", "data": null })),
        ("cancel", json!("Permission denied")),
    ]);
    let (base, mut requests) = serve(vec![stream]).await;

    let store = FirebaseStore::new(BasicClient::new(), base, Duration::from_secs(5));
    let options = SubscriptionOptions {
        root: "viagensEmAndamento".to_string(),
        retry: RetryPolicy {
            max_attempts: 1,
            base_backoff_ms: 1,
            max_backoff_ms: 1,
        },
    };
    let mut feed = TripFeed::subscribe(Arc::new(store), "coop1", options).unwrap();

    while feed.changed().await.is_some() {}
    let state = feed.current();

    assert_eq!(
        state.status,
        ConnectionStatus::Failed {
            reason: "Permission denied".to_string()
        }
    );
    assert_eq!(state.revision, 3);
    assert_eq!(state.trips.len(), 2);
    assert!(state.trips.for_driver("motoristaA").is_none());
    assert_eq!(
        state.trips.for_driver("motoristaD").unwrap().driver_position(),
        Some((-23.61, -46.71))
    );

    let request = requests.recv().await.unwrap();
    assert!(request.starts_with("GET /viagensEmAndamento/coop1.json "));
    assert!(request.to_lowercase().contains("accept: text/event-stream"));
}

fn error_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

#[tokio::test]
async fn test_one_shot_read_rejects_error_status() {
    let (base, _requests) = serve(vec![error_response(
        "401 Unauthorized",
        r#"{"error":"Permission denied"}"#,
    )])
    .await;

    let result = fetch_snapshot(&BasicClient::new(), &base, "viagensEmAndamento/coop1").await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_subscribe_reports_error_status() {
    let (base, _requests) = serve(vec![error_response(
        "401 Unauthorized",
        r#"{"error":"Permission denied"}"#,
    )])
    .await;

    let store = FirebaseStore::new(BasicClient::new(), base, Duration::from_secs(5));
    let err = match store.subscribe("viagensEmAndamento/coop1").await {
        Ok(_) => panic!("subscription to a 401 location succeeded"),
        Err(e) => e.to_string(),
    };

    assert!(err.contains("401"), "{err}");
    assert!(err.contains("Permission denied"), "{err}");
}

#[tokio::test]
async fn test_cooperative_read_validates_id() {
    // Nothing listens here, so any request would fail.
    let unreachable = "http://127.0.0.1:1";
    let client = BasicClient::new();

    let blank = fetch_cooperative_snapshot(&client, unreachable, "viagensEmAndamento", "  ")
        .await
        .unwrap();
    assert_eq!(blank, Value::Null);
    assert!(flatten_snapshot(&blank).is_empty());

    let nested = fetch_cooperative_snapshot(&client, unreachable, "viagensEmAndamento", "a/b").await;
    assert!(nested.unwrap_err().to_string().contains("not a valid store key"));
}

#[tokio::test]
async fn test_cooperative_read_uses_scoped_path() {
    let body = fixture().to_string();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let (base, mut requests) = serve(vec![response]).await;

    let snapshot = fetch_cooperative_snapshot(&BasicClient::new(), &base, "viagensEmAndamento", " coop1 ")
        .await
        .unwrap();

    assert_eq!(flatten_snapshot(&snapshot).len(), 3);
    let request = requests.recv().await.unwrap();
    assert!(request.starts_with("GET /viagensEmAndamento/coop1.json "));
}

/// Accepts every connection, answers with event-stream headers and then
/// sends nothing while holding the socket open.
async fn serve_silent() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\n\r\n")
                    .await;
                tokio::time::sleep(Duration::from_secs(30)).await;
                drop(socket);
            });
        }
    });

    format!("http://{addr}")
}

#[tokio::test]
async fn test_idle_stream_triggers_reconnect() {
    let base = serve_silent().await;

    let store = FirebaseStore::new(BasicClient::new(), base, Duration::from_millis(50));
    let options = SubscriptionOptions {
        root: "viagensEmAndamento".to_string(),
        retry: RetryPolicy {
            max_attempts: 0,
            base_backoff_ms: 1_000,
            max_backoff_ms: 1_000,
        },
    };
    let mut feed = TripFeed::subscribe(Arc::new(store), "coop1", options).unwrap();

    let status = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let state = feed.changed().await.expect("subscription ended early");
            if let ConnectionStatus::Reconnecting { .. } = state.status {
                return state.status;
            }
        }
    })
    .await
    .expect("no reconnect after idle timeout");

    match status {
        ConnectionStatus::Reconnecting {
            attempt,
            last_error,
        } => {
            assert_eq!(attempt, 1);
            assert!(last_error.contains("No data received"), "{last_error}");
        }
        other => panic!("unexpected status {other:?}"),
    }
}
