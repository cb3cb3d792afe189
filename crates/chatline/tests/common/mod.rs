//! Test utilities and common setup.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, body::Body, http::Response};
use chatline::api::{self, AppState};
use chatline::auth::{AuthConfig, AuthState};
use chatline::db::Database;
use chatline::identity::Identity;
use chatline::messages::{MessageRepository, MessageStore};
use chatline::users::{UserRepository, UserStore};
use chatline::ws::{WsConfig, WsEvent, WsHub};
use futures::StreamExt;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite};

pub type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Create a test AuthConfig with a JWT secret for testing.
fn test_auth_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: Some("test-secret-for-integration-tests-minimum-32-chars".to_string()),
        ..AuthConfig::default()
    }
}

fn test_ws_config() -> WsConfig {
    WsConfig {
        // Keep pings out of the frames tests read.
        ping_interval_secs: 0,
        ..WsConfig::default()
    }
}

pub struct TestApp {
    pub router: Router,
    pub hub: WsHub,
    pub auth: AuthState,
    pub users: Arc<dyn UserStore>,
}

impl TestApp {
    pub fn token(&self, identity: &str) -> String {
        self.auth
            .generate_token(&Identity::from(identity), None)
            .unwrap()
    }

    pub fn bearer(&self, identity: &str) -> String {
        format!("Bearer {}", self.token(identity))
    }
}

/// Create a test application backed by an in-memory database.
pub async fn test_app() -> TestApp {
    let db = Database::in_memory().await.unwrap();
    test_app_with_store(Arc::new(MessageRepository::new(db.pool().clone()))).await
}

/// Create a test application around `store`; users live in their own in-memory database.
pub async fn test_app_with_store(store: Arc<dyn MessageStore>) -> TestApp {
    let db = Database::in_memory().await.unwrap();
    let users: Arc<dyn UserStore> = Arc::new(UserRepository::new(db.pool().clone()));
    let auth = AuthState::new(test_auth_config());
    let hub = WsHub::start();
    let state = AppState::new(
        hub.clone(),
        store,
        users.clone(),
        auth.clone(),
        test_ws_config(),
    );

    TestApp {
        router: api::create_router(state),
        hub,
        auth,
        users,
    }
}

/// Serve `router` on an ephemeral local port.
pub async fn spawn_server(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Open a WebSocket as `token`'s owner, passing the token in the query string.
pub async fn connect(addr: SocketAddr, token: &str) -> ClientSocket {
    let url = format!("ws://{addr}/api/ws?token={token}");
    let (socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    socket
}

/// Next event pushed to `socket`, skipping control frames.
pub async fn next_event(socket: &mut ClientSocket) -> WsEvent {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for event")
            .expect("socket closed")
            .expect("socket error");

        match frame {
            tungstenite::Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            tungstenite::Message::Close(frame) => panic!("socket closed by server: {frame:?}"),
            _ => continue,
        }
    }
}

/// Assert nothing but control frames arrives within `wait`.
pub async fn assert_no_event(socket: &mut ClientSocket, wait: Duration) {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, socket.next()).await {
            Err(_) => return,
            Ok(Some(Ok(tungstenite::Message::Text(text)))) => {
                panic!("unexpected event: {}", text.as_str())
            }
            Ok(Some(Ok(_))) => continue,
            Ok(other) => panic!("socket ended unexpectedly: {other:?}"),
        }
    }
}

pub fn presence(ids: &[&str]) -> WsEvent {
    WsEvent::PresenceList(ids.iter().map(|id| Identity::from(*id)).collect())
}

pub async fn body_json(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
