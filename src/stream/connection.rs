//! Live notification stream for one user.
//!
//! Speaks STOMP over WebSocket to the backend broker, subscribes to the
//! user's topic and hands every decoded record to a [`NotificationSink`].
//! Failures never escape: they are logged and the connection is retried
//! after the configured delay until [`NotificationStream::deactivate`] runs.

use anyhow::{anyhow, Result};
use futures::stream::SplitStream;
use futures::{Sink, SinkExt, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::frame::{decode_all, Command, Frame, HEARTBEAT};
use crate::notifications::{NotificationRecord, NotificationSink};
use crate::session::UserId;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsRead = SplitStream<WsStream>;

const SUBSCRIPTION_ID: &str = "sub-0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Broker endpoint, e.g. "ws://localhost:8080/ws".
    pub ws_url: String,
    /// Pause between a lost connection and the next attempt.
    pub reconnect_delay: Duration,
    /// Heart-beat interval offered to the broker in both directions.
    /// Zero disables heart-beats.
    pub heartbeat: Duration,
    /// Bound on the WebSocket handshake and on waiting for CONNECTED.
    pub connect_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8080/ws".to_string(),
            reconnect_delay: Duration::from_millis(5000),
            heartbeat: Duration::from_millis(10000),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Broker destination carrying `user_id`'s notifications.
pub fn topic_for(user_id: &UserId) -> String {
    format!("/topic/notifications/{}", user_id)
}

enum SessionEnd {
    Deactivated,
    ClosedByBroker,
}

/// Handle to the background task running one user's stream.
pub struct NotificationStream {
    user_id: UserId,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl NotificationStream {
    /// Start connecting in the background. Must be called within a tokio runtime.
    pub fn activate(
        settings: StreamSettings,
        user_id: UserId,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            settings,
            user_id.clone(),
            sink,
            cancel.clone(),
            state_tx,
        ));

        Self {
            user_id,
            cancel,
            task: Some(task),
            state_rx,
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Stop the stream and wait until the background task is gone.
    ///
    /// Safe to call any number of times.
    pub async fn deactivate(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!(
                        "Notification stream task for {} panicked: {}",
                        self.user_id, e
                    );
                }
            }
        }
    }
}

impl Drop for NotificationStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    settings: StreamSettings,
    user_id: UserId,
    sink: Arc<dyn NotificationSink>,
    cancel: CancellationToken,
    state_tx: watch::Sender<ConnectionState>,
) {
    let topic = topic_for(&user_id);

    loop {
        state_tx.send_replace(ConnectionState::Connecting);
        let outcome = run_session(
            &settings,
            &user_id,
            &topic,
            sink.as_ref(),
            &cancel,
            &state_tx,
        )
        .await;
        state_tx.send_replace(ConnectionState::Disconnected);

        match outcome {
            Ok(SessionEnd::Deactivated) => break,
            Ok(SessionEnd::ClosedByBroker) => info!("Broker closed the notification stream"),
            Err(e) => warn!("Notification stream for user {} failed: {:#}", user_id, e),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(settings.reconnect_delay) => {}
        }
        debug!("Reconnecting notification stream for user {}", user_id);
    }

    info!("Notification stream for user {} deactivated", user_id);
}

async fn run_session(
    settings: &StreamSettings,
    user_id: &UserId,
    topic: &str,
    sink: &dyn NotificationSink,
    cancel: &CancellationToken,
    state_tx: &watch::Sender<ConnectionState>,
) -> Result<SessionEnd> {
    info!("Connecting to notification broker: {}", settings.ws_url);

    let connect = tokio::select! {
        _ = cancel.cancelled() => return Ok(SessionEnd::Deactivated),
        r = timeout(settings.connect_timeout, connect_async(settings.ws_url.as_str())) => r,
    };
    let (ws_stream, _) = connect
        .map_err(|_| anyhow!("Timed out connecting to {}", settings.ws_url))?
        .map_err(|e| anyhow!("WebSocket connection failed: {}", e))?;
    let (mut write, mut read) = ws_stream.split();

    let heartbeat_ms = settings.heartbeat.as_millis();
    send_frame(
        &mut write,
        Frame::new(Command::Connect)
            .header("accept-version", "1.2,1.1,1.0")
            .header("heart-beat", format!("{},{}", heartbeat_ms, heartbeat_ms)),
    )
    .await?;

    let connected = tokio::select! {
        _ = cancel.cancelled() => {
            disconnect(&mut write, settings.connect_timeout).await;
            return Ok(SessionEnd::Deactivated);
        }
        r = timeout(settings.connect_timeout, await_connected(&mut read)) => {
            r.map_err(|_| anyhow!("Timed out waiting for CONNECTED"))??
        }
    };
    debug!("<<< {:?}", connected);

    let (send_every, expect_every) =
        negotiate_heartbeat(settings.heartbeat, connected.get_header("heart-beat"));

    send_frame(
        &mut write,
        Frame::new(Command::Subscribe)
            .header("id", SUBSCRIPTION_ID)
            .header("destination", topic)
            .header("ack", "auto"),
    )
    .await?;
    state_tx.send_replace(ConnectionState::Subscribed);
    info!("Subscribed to {}", topic);

    let mut heartbeat = send_every.map(ticker);
    let mut liveness = expect_every.map(ticker);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                disconnect(&mut write, settings.connect_timeout).await;
                return Ok(SessionEnd::Deactivated);
            }
            msg = read.next() => {
                let Some(msg) = msg else {
                    return Ok(SessionEnd::ClosedByBroker);
                };
                last_seen = Instant::now();
                match msg {
                    Ok(Message::Text(text)) => handle_text(text.as_str(), user_id, topic, sink),
                    Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                        Ok(text) => handle_text(text, user_id, topic, sink),
                        Err(e) => warn!("Dropping non UTF-8 broker message: {}", e),
                    },
                    Ok(Message::Close(_)) => return Ok(SessionEnd::ClosedByBroker),
                    Ok(_) => {}
                    Err(e) => return Err(anyhow!("WebSocket error: {}", e)),
                }
            }
            _ = tick(&mut heartbeat) => {
                write
                    .send(Message::Text(HEARTBEAT.to_string().into()))
                    .await
                    .map_err(|e| anyhow!("Failed to send heart-beat: {}", e))?;
            }
            _ = tick(&mut liveness) => {
                if let Some(expected) = expect_every {
                    if last_seen.elapsed() > expected * 2 {
                        return Err(anyhow!("No data from broker for {:?}", last_seen.elapsed()));
                    }
                }
            }
        }
    }
}

/// Wait for the broker to accept the CONNECT frame.
///
/// Pings are answered by tungstenite itself while the stream is read.
async fn await_connected(read: &mut WsRead) -> Result<Frame> {
    while let Some(msg) = read.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.as_str().to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => return Err(anyhow!("WebSocket error: {}", e)),
        };
        for frame in decode_all(&text)? {
            match frame.command {
                Command::Connected => return Ok(frame),
                Command::Error => {
                    log_broker_error(&frame);
                    return Err(anyhow!(
                        "Broker refused connection: {}",
                        frame.get_header("message").unwrap_or("no details")
                    ));
                }
                other => debug!("Ignoring {} before CONNECTED", other),
            }
        }
    }
    Err(anyhow!("Connection closed before CONNECTED"))
}

fn handle_text(text: &str, user_id: &UserId, topic: &str, sink: &dyn NotificationSink) {
    let frames = match decode_all(text) {
        Ok(frames) => frames,
        Err(e) => {
            warn!("Dropping undecodable broker message: {}", e);
            return;
        }
    };

    for frame in frames {
        debug!("<<< {}", frame.command);
        match frame.command {
            Command::Message => {
                if frame.get_header("destination") != Some(topic) {
                    warn!(
                        "Dropping message for unexpected destination {:?}",
                        frame.get_header("destination")
                    );
                    continue;
                }
                match NotificationRecord::from_payload(&frame.body) {
                    Ok(record) => {
                        debug!("Received notification {}", record.id);
                        sink.deliver(user_id, record);
                    }
                    Err(e) => warn!("{} - {}", e, frame.body),
                }
            }
            Command::Error => log_broker_error(&frame),
            Command::Receipt => {}
            other => debug!("Ignoring unexpected {} frame", other),
        }
    }
}

fn log_broker_error(frame: &Frame) {
    error!(
        "Broker reported error: {}",
        frame.get_header("message").unwrap_or("")
    );
    error!("Additional details: {}", frame.body);
}

async fn send_frame<S>(write: &mut S, frame: Frame) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    debug!(">>> {}", frame.command);
    write
        .send(Message::Text(frame.encode().into()))
        .await
        .map_err(|e| anyhow!("Failed to send {}: {}", frame.command, e))
}

/// Best effort goodbye, bounded by `limit`. Errors only get logged.
async fn disconnect<S>(write: &mut S, limit: Duration)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let goodbye = async {
        let receipt = format!("disconnect-{}", uuid::Uuid::new_v4());
        let frame = Frame::new(Command::Disconnect).header("receipt", receipt);
        if let Err(e) = send_frame(write, frame).await {
            debug!("{}", e);
        }
        if let Err(e) = write.close().await {
            debug!("Failed to close WebSocket: {}", e);
        }
    };
    if timeout(limit, goodbye).await.is_err() {
        debug!("Broker did not take the DISCONNECT within {:?}", limit);
    }
}

/// STOMP heart-beat negotiation.
///
/// Returns how often we must send and how often the broker promised to send.
fn negotiate_heartbeat(
    client: Duration,
    server_header: Option<&str>,
) -> (Option<Duration>, Option<Duration>) {
    let (server_out, server_in) = server_header
        .and_then(|h| h.split_once(','))
        .and_then(|(sx, sy)| {
            Some((
                sx.trim().parse::<u64>().ok()?,
                sy.trim().parse::<u64>().ok()?,
            ))
        })
        .unwrap_or((0, 0));
    let client_ms = client.as_millis() as u64;

    let outgoing = (client_ms > 0 && server_in > 0).then(|| client_ms.max(server_in));
    let incoming = (client_ms > 0 && server_out > 0).then(|| client_ms.max(server_out));
    (
        outgoing.map(Duration::from_millis),
        incoming.map(Duration::from_millis),
    )
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.reset();
    ticker
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
