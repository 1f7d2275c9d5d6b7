//! Fake medicine tracker backend
//!
//! Serves the notification REST endpoints under `/api` and a minimal STOMP
//! broker under `/ws`. Each test gets its own backend on a random port.

use super::constants::*;
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use medtracker_alerts::stream::frame::{decode_all, Command, Frame};
use medtracker_alerts::NotificationRecord;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

enum Outgoing {
    Text(String),
    Ping,
    Close,
}

struct BrokerConnection {
    tx: mpsc::UnboundedSender<Outgoing>,
    /// (subscription id, destination)
    subscriptions: Vec<(String, String)>,
}

struct TestUser {
    id: &'static str,
    email: &'static str,
    name: &'static str,
    token: &'static str,
}

const USERS: [TestUser; 2] = [
    TestUser {
        id: USER_1_ID,
        email: USER_1_EMAIL,
        name: "Alice",
        token: USER_1_TOKEN,
    },
    TestUser {
        id: USER_2_ID,
        email: USER_2_EMAIL,
        name: "Bob",
        token: USER_2_TOKEN,
    },
];

/// Shared state behind the fake backend routes.
#[derive(Default)]
pub struct BackendState {
    /// token -> user id
    tokens: Mutex<HashMap<String, String>>,
    /// user id -> notifications, newest first
    notifications: Mutex<HashMap<String, Vec<NotificationRecord>>>,

    failing: AtomicBool,
    reject_connect: AtomicBool,

    pub list_calls: AtomicUsize,
    pub count_calls: AtomicUsize,
    pub mark_read_calls: AtomicUsize,
    pub mark_all_calls: AtomicUsize,

    connections: Mutex<HashMap<u64, BrokerConnection>>,
    next_connection_id: AtomicU64,
    pub total_connections: AtomicUsize,
    pub pongs: AtomicUsize,
    connect_frames: Mutex<Vec<Frame>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Fake backend instance.
///
/// When dropped, the server shuts down and broker connections are closed.
pub struct TestBackend {
    /// Base URL of the REST API (e.g., "http://127.0.0.1:12345/api")
    pub api_url: String,

    /// URL of the STOMP endpoint (e.g., "ws://127.0.0.1:12345/ws")
    pub ws_url: String,

    pub state: Arc<BackendState>,

    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestBackend {
    /// Spawns a new backend on a random port and waits until it answers.
    pub async fn spawn() -> Self {
        let state = Arc::new(BackendState::default());
        {
            let mut tokens = lock(&state.tokens);
            for user in USERS.iter() {
                tokens.insert(user.token.to_string(), user.id.to_string());
            }
        }

        let app = Router::new()
            .route("/api/health", get(|| async { "ok" }))
            .route("/api/auth/login", post(login))
            .route("/api/notifications", get(list_notifications))
            .route("/api/notifications/unread-count", get(unread_count))
            .route("/api/notifications/read-all", put(mark_all_read))
            .route("/api/notifications/{id}/read", put(mark_read))
            .route("/ws", get(ws_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let backend = Self {
            api_url: format!("http://127.0.0.1:{}/api", port),
            ws_url: format!("ws://127.0.0.1:{}/ws", port),
            state,
            _shutdown_tx: Some(shutdown_tx),
        };
        backend.wait_for_ready().await;
        backend
    }

    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Backend did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }
            match client.get(format!("{}/health", self.api_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await
                }
            }
        }
    }

    /// Adds a record on top of `user_id`'s history.
    pub fn add_notification(&self, user_id: &str, record: NotificationRecord) {
        lock(&self.state.notifications)
            .entry(user_id.to_string())
            .or_default()
            .insert(0, record);
    }

    pub fn notifications(&self, user_id: &str) -> Vec<NotificationRecord> {
        lock(&self.state.notifications)
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Makes every authorized REST call answer 500.
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    /// Makes the broker answer CONNECT with an ERROR frame.
    pub fn set_reject_connect(&self, reject: bool) {
        self.state.reject_connect.store(reject, Ordering::SeqCst);
    }

    /// Invalidates a token so that requests carrying it get 401.
    pub fn revoke_token(&self, token: &str) {
        lock(&self.state.tokens).remove(token);
    }

    /// Sends a MESSAGE frame to every subscriber of `topic`.
    /// Returns the number of subscriptions it was delivered to.
    pub fn publish(&self, topic: &str, body: &str) -> usize {
        let connections = lock(&self.state.connections);
        let mut delivered = 0;
        for connection in connections.values() {
            for (subscription_id, destination) in &connection.subscriptions {
                if destination != topic {
                    continue;
                }
                let frame = Frame::new(Command::Message)
                    .header("destination", destination.as_str())
                    .header("subscription", subscription_id.as_str())
                    .header("message-id", uuid::Uuid::new_v4().to_string())
                    .header("content-type", "application/json")
                    .body(body);
                if connection.tx.send(Outgoing::Text(frame.encode())).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Publishes `record` as JSON on `user_id`'s notification topic.
    pub fn push(&self, user_id: &str, record: &NotificationRecord) -> usize {
        let body = serde_json::to_string(record).expect("Failed to serialize record");
        self.publish(&format!("/topic/notifications/{}", user_id), &body)
    }

    /// Sends a WebSocket ping on every broker connection.
    /// Returns the number of connections it was sent to.
    pub fn ping(&self) -> usize {
        lock(&self.state.connections)
            .values()
            .filter(|c| c.tx.send(Outgoing::Ping).is_ok())
            .count()
    }

    pub fn pongs(&self) -> usize {
        self.state.pongs.load(Ordering::SeqCst)
    }

    /// Closes every broker connection from the server side.
    pub fn drop_connections(&self) {
        for connection in lock(&self.state.connections).values() {
            let _ = connection.tx.send(Outgoing::Close);
        }
    }

    pub fn active_connections(&self) -> usize {
        lock(&self.state.connections).len()
    }

    /// Destinations of every live subscription, across connections.
    pub fn subscribed_topics(&self) -> Vec<String> {
        lock(&self.state.connections)
            .values()
            .flat_map(|c| c.subscriptions.iter().map(|(_, d)| d.clone()))
            .collect()
    }

    /// Every CONNECT frame received so far.
    pub fn connect_frames(&self) -> Vec<Frame> {
        lock(&self.state.connect_frames).clone()
    }

    pub fn total_connections(&self) -> usize {
        self.state.total_connections.load(Ordering::SeqCst)
    }
}

impl Drop for TestBackend {
    fn drop(&mut self) {
        self.drop_connections();
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

// ============================================================================
// REST routes
// ============================================================================

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

async fn login(State(state): State<Arc<BackendState>>, Json(body): Json<LoginBody>) -> Response {
    let user = USERS.iter().find(|u| u.email == body.email);
    match user {
        Some(user) if body.password == TEST_PASS => {
            lock(&state.tokens).insert(user.token.to_string(), user.id.to_string());
            Json(json!({
                "token": user.token,
                "userId": user.id,
                "name": user.name,
                "email": user.email,
            }))
            .into_response()
        }
        _ => StatusCode::UNAUTHORIZED.into_response(),
    }
}

fn authorize(state: &BackendState, headers: &HeaderMap) -> Result<String, StatusCode> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;
    let user_id = lock(&state.tokens)
        .get(token)
        .cloned()
        .ok_or(StatusCode::UNAUTHORIZED)?;
    if state.failing.load(Ordering::SeqCst) {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    Ok(user_id)
}

async fn list_notifications(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<NotificationRecord>>, StatusCode> {
    state.list_calls.fetch_add(1, Ordering::SeqCst);
    let user_id = authorize(&state, &headers)?;
    let records = lock(&state.notifications)
        .get(&user_id)
        .cloned()
        .unwrap_or_default();
    Ok(Json(records))
}

async fn unread_count(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, StatusCode> {
    state.count_calls.fetch_add(1, Ordering::SeqCst);
    let user_id = authorize(&state, &headers)?;
    let count = lock(&state.notifications)
        .get(&user_id)
        .map(|records| records.iter().filter(|r| !r.read).count())
        .unwrap_or(0);
    Ok(Json(json!({ "unreadCount": count })))
}

async fn mark_read(
    State(state): State<Arc<BackendState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> StatusCode {
    state.mark_read_calls.fetch_add(1, Ordering::SeqCst);
    let user_id = match authorize(&state, &headers) {
        Ok(user_id) => user_id,
        Err(status) => return status,
    };
    let mut notifications = lock(&state.notifications);
    let record = notifications
        .get_mut(&user_id)
        .and_then(|records| records.iter_mut().find(|r| r.id == id));
    match record {
        Some(record) => {
            record.read = true;
            StatusCode::OK
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn mark_all_read(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> StatusCode {
    state.mark_all_calls.fetch_add(1, Ordering::SeqCst);
    let user_id = match authorize(&state, &headers) {
        Ok(user_id) => user_id,
        Err(status) => return status,
    };
    if let Some(records) = lock(&state.notifications).get_mut(&user_id) {
        for record in records.iter_mut() {
            record.read = true;
        }
    }
    StatusCode::OK
}

// ============================================================================
// STOMP broker
// ============================================================================

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<BackendState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<BackendState>) {
    let id = state.next_connection_id.fetch_add(1, Ordering::SeqCst);
    let (tx, mut rx) = mpsc::unbounded_channel();
    lock(&state.connections).insert(
        id,
        BrokerConnection {
            tx: tx.clone(),
            subscriptions: Vec::new(),
        },
    );
    state.total_connections.fetch_add(1, Ordering::SeqCst);

    let (mut ws_sink, mut ws_stream) = socket.split();

    let forward = tokio::spawn(async move {
        while let Some(outgoing) = rx.recv().await {
            match outgoing {
                Outgoing::Text(text) => {
                    if ws_sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outgoing::Ping => {
                    let ping = Message::Ping(Bytes::from_static(b"are-you-there"));
                    if ws_sink.send(ping).await.is_err() {
                        break;
                    }
                }
                Outgoing::Close => {
                    let _ = ws_sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    'read: while let Some(Ok(message)) = ws_stream.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Pong(_) => {
                state.pongs.fetch_add(1, Ordering::SeqCst);
                continue;
            }
            Message::Close(_) => break,
            _ => continue,
        };
        let frames = match decode_all(text.as_str()) {
            Ok(frames) => frames,
            Err(_) => break,
        };
        for frame in frames {
            if !handle_frame(&state, id, frame, &tx) {
                break 'read;
            }
        }
    }

    lock(&state.connections).remove(&id);
    drop(tx);
    let _ = forward.await;
}

/// Returns false when the connection should be closed.
fn handle_frame(
    state: &BackendState,
    id: u64,
    frame: Frame,
    tx: &mpsc::UnboundedSender<Outgoing>,
) -> bool {
    match frame.command {
        Command::Connect | Command::Stomp => {
            lock(&state.connect_frames).push(frame);
            if state.reject_connect.load(Ordering::SeqCst) {
                let error = Frame::new(Command::Error)
                    .header("message", "Access denied")
                    .body("Broker refused the connection");
                let _ = tx.send(Outgoing::Text(error.encode()));
                let _ = tx.send(Outgoing::Close);
                return false;
            }
            let connected = Frame::new(Command::Connected)
                .header("version", "1.2")
                .header("heart-beat", "0,0");
            let _ = tx.send(Outgoing::Text(connected.encode()));
        }
        Command::Subscribe => {
            let subscription_id = frame.get_header("id").unwrap_or_default().to_string();
            let destination = frame
                .get_header("destination")
                .unwrap_or_default()
                .to_string();
            if let Some(connection) = lock(&state.connections).get_mut(&id) {
                connection.subscriptions.push((subscription_id, destination));
            }
        }
        Command::Unsubscribe => {
            let subscription_id = frame.get_header("id").unwrap_or_default();
            if let Some(connection) = lock(&state.connections).get_mut(&id) {
                connection
                    .subscriptions
                    .retain(|(sid, _)| sid != subscription_id);
            }
        }
        Command::Disconnect => {
            if let Some(receipt) = frame.get_header("receipt") {
                let receipt = Frame::new(Command::Receipt).header("receipt-id", receipt);
                let _ = tx.send(Outgoing::Text(receipt.encode()));
            }
            return false;
        }
        _ => {}
    }
    true
}
