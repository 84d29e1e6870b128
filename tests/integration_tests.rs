use futures_util::StreamExt;
use serde_json::{json, Value};
use servicehub_client::config::ClientOptions;
use servicehub_client::endpoints;
use servicehub_client::error::Error;
use servicehub_client::prelude::*;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_logger() {
    let _ = pretty_env_logger::try_init();
}

fn options_for(server: &MockServer) -> ClientOptions {
    ClientOptions::default().with_api_url(&format!("{}/api/v1", server.uri()))
}

async fn mount_login(server: &MockServer, access: &str, refresh: &str) {
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access": access,
            "refresh": refresh,
            "user": {"id": 7, "email": "ana@example.com"}
        })))
        .mount(server)
        .await;
}

/// ログインから見積一覧取得まで
#[tokio::test]
async fn test_login_then_list_quotes() {
    init_logger();
    let mock_server = MockServer::start().await;
    mount_login(&mock_server, "a1", "r1").await;
    Mock::given(method("GET"))
        .and(path("/api/v1/quotes/7/history/"))
        .and(header("Authorization", "Bearer a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"status": "sent"}])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let hub = ServiceHub::new(options_for(&mock_server)).await.unwrap();
    assert!(!hub.auth().is_authenticated());

    hub.auth().login("ana@example.com", "secret").await.unwrap();
    let history: Value = hub
        .auth()
        .get_json(&endpoints::quote_history(7))
        .await
        .unwrap();
    assert_eq!(history[0]["status"], "sent");
}

#[tokio::test]
async fn test_expired_session_surfaces_through_unified_error() {
    init_logger();
    let mock_server = MockServer::start().await;
    mount_login(&mock_server, "a1", "r1").await;
    Mock::given(method("GET"))
        .and(path("/api/v1/clients/"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "expired"})))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh/"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "blacklisted"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let hub = ServiceHub::new(options_for(&mock_server)).await.unwrap();
    hub.auth().login("ana@example.com", "secret").await.unwrap();

    let error: Error = hub
        .auth()
        .get_json::<Value>(endpoints::CLIENTS)
        .await
        .unwrap_err()
        .into();
    assert!(error.is_session_expired());
    assert!(!hub.auth().is_authenticated());
}

#[tokio::test]
async fn test_session_file_survives_restart() {
    init_logger();
    let mock_server = MockServer::start().await;
    mount_login(&mock_server, "a1", "r1").await;
    let dir = tempfile::tempdir().unwrap();
    let session_file = dir.path().join("servicehub").join("session.json");

    {
        let hub = ServiceHub::new(options_for(&mock_server).with_session_file(&session_file))
            .await
            .unwrap();
        hub.auth().login("ana@example.com", "secret").await.unwrap();
    }
    assert!(session_file.exists());

    let hub = ServiceHub::new(options_for(&mock_server).with_session_file(&session_file))
        .await
        .unwrap();
    assert!(hub.auth().is_authenticated());
    assert_eq!(hub.auth().access_token().as_deref(), Some("a1"));
    assert_eq!(hub.session_file(), Some(session_file.as_path()));

    hub.auth().clear_session().await;
    assert!(!session_file.exists());
}

#[tokio::test]
async fn test_channel_url_follows_api_url() {
    let hub = ServiceHub::new(ClientOptions::default().with_api_url("https://hub.example.com/api/v1"))
        .await
        .unwrap();
    assert_eq!(
        hub.channel_url("ws/notifications/").unwrap().as_str(),
        "wss://hub.example.com/ws/notifications/"
    );

    let hub = ServiceHub::new(
        ClientOptions::default()
            .with_api_url("https://hub.example.com/api/v1")
            .with_realtime_origin("http://127.0.0.1:9001"),
    )
    .await
    .unwrap();
    assert_eq!(
        hub.channel_url("ws/quotes/").unwrap().as_str(),
        "ws://127.0.0.1:9001/ws/quotes/"
    );

    let hub = ServiceHub::new(ClientOptions::default().with_realtime_origin("ftp://example.com"))
        .await
        .unwrap();
    assert!(matches!(hub.channel_url("ws/activity/"), Err(Error::Channel(_))));
}

#[tokio::test]
async fn test_invalid_api_url_is_rejected() {
    let result = ServiceHub::new(ClientOptions::default().with_api_url("not a url")).await;
    assert!(matches!(result, Err(Error::Url(_))));
}

/// 通知チャンネルにアクセストークンが渡ること
#[tokio::test]
async fn test_channel_carries_access_token() {
    init_logger();
    let mock_server = MockServer::start().await;
    mount_login(&mock_server, "a1", "r1").await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_origin = format!("http://{}", listener.local_addr().unwrap());
    let (query_tx, mut query_rx) = mpsc::unbounded_channel::<Option<String>>();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let _ = query_tx.send(request.uri().query().map(str::to_string));
            Ok(response)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let options = options_for(&mock_server)
        .with_realtime_origin(&ws_origin)
        .with_channel_options(ChannelOptions::default().with_heartbeat_interval(None));
    let hub = ServiceHub::new(options).await.unwrap();
    hub.auth().login("ana@example.com", "secret").await.unwrap();

    let mut channel = hub.notifications().unwrap();
    let query = tokio::time::timeout(Duration::from_secs(5), query_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(query.as_deref(), Some("token=a1"));

    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), channel.next_event())
            .await
            .unwrap()
            .unwrap();
        if event == ChannelEvent::StateChanged(ConnectionState::Open) {
            break;
        }
    }
    assert!(channel.send(&json!({"type": "ping"})));
    channel.close_and_wait().await;
}
