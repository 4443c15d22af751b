//! WebSocket connection handler
//!
//! Handles individual client connections: WebSocket handshake, registration
//! with the coordinator, and the two per-connection tasks.
//!
//! The read task is the only reader of the socket and the write task is the
//! only writer. They never talk to each other directly: inbound frames go to
//! the coordinator, outbound payloads come back through the mailbox.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitStream;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::AbortHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::connection::Connection;
use crate::coordinator::Command;
use crate::error::{AppError, InboundError};
use crate::message::{normalize, DeliveryRequest, Envelope, InboundMessage};
use crate::types::{guest_name, ClientId, Payload, SessionId};

type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Handle a new TCP connection
///
/// Performs the WebSocket handshake, registers the connection and spawns its
/// read and write tasks. Returns as soon as both are running.
pub async fn handle_connection(
    stream: TcpStream,
    cmd_tx: mpsc::Sender<Command>,
    config: Arc<Config>,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake, picking the nickname off the request URI
    let mut nick = None;
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        nick = nickname_from_query(req.uri().query());
        Ok(resp)
    };
    let ws_stream = tokio_tungstenite::accept_hdr_async_with_config(
        stream,
        callback,
        Some(websocket_config(&config)),
    )
    .await?;

    let client_id = ClientId::new();
    let display_name = nick.unwrap_or_else(guest_name);
    info!(
        "Client {} ({}) connected from {}",
        client_id, display_name, peer_addr
    );

    // Mailbox: the coordinator keeps the only sender
    let (mailbox_tx, mailbox_rx) = mpsc::channel::<Payload>(config.mailbox_capacity);

    // Register; the coordinator answers with the initial roster
    let connection = Connection::new(client_id.clone(), display_name, mailbox_tx);
    let session = connection.session;
    if cmd_tx.send(Command::Register { connection }).await.is_err() {
        warn!("Failed to register client {} - coordinator closed", client_id);
        return Err(AppError::ChannelSend);
    }

    let (ws_sender, ws_receiver) = ws_stream.split();

    // Guard is built here so an aborted, never-polled read task still unregisters
    let guard = UnregisterGuard::new(client_id.clone(), session, cmd_tx.clone());
    let read_task = tokio::spawn(read_loop(
        ws_receiver,
        client_id.clone(),
        cmd_tx,
        config.pong_wait,
        guard,
    ));

    tokio::spawn(write_loop(
        ws_sender,
        mailbox_rx,
        client_id,
        config.write_wait,
        config.ping_period(),
        AbortOnDrop(read_task.abort_handle()),
    ));

    Ok(())
}

fn websocket_config(config: &Config) -> WebSocketConfig {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_message_size);
    ws_config.max_frame_size = Some(config.max_message_size);
    ws_config
}

/// Extract a non-empty `nick` parameter from a request query string
fn nickname_from_query(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == "nick")
        .map(|(_, value)| value.trim().to_string())
        .filter(|nick| !nick.is_empty())
}

/// Read task: socket → coordinator
///
/// Every frame refreshes the idle deadline, including Pong replies to the
/// write task's keep-alives.
async fn read_loop(
    mut ws_receiver: WsSource,
    client_id: ClientId,
    cmd_tx: mpsc::Sender<Command>,
    pong_wait: Duration,
    _guard: UnregisterGuard,
) {
    loop {
        let msg = match time::timeout(pong_wait, ws_receiver.next()).await {
            Err(_) => {
                info!("Client {} idle for {:?}, closing", client_id, pong_wait);
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                if is_expected_close(&e) {
                    debug!("Client {} went away: {}", client_id, e);
                } else {
                    warn!("WebSocket error for {}: {}", client_id, e);
                }
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => match delivery_request(&client_id, &text) {
                Ok(request) => {
                    if cmd_tx.send(Command::Deliver(request)).await.is_err() {
                        debug!("Coordinator closed, ending read task for {}", client_id);
                        break;
                    }
                }
                Err(e) => {
                    warn!("Dropping message from {}: {}", client_id, e);
                }
            },
            Message::Close(_) => {
                debug!("Client {} sent close frame", client_id);
                break;
            }
            Message::Ping(_) => {
                // Pong is handled automatically by tungstenite
                debug!("Ping from {}", client_id);
            }
            Message::Pong(_) => {
                debug!("Pong from {}", client_id);
            }
            Message::Binary(_) | Message::Frame(_) => {
                debug!("Ignoring non-text frame from {}", client_id);
            }
        }
    }
    debug!("Read task ended for {}", client_id);
}

/// Turn one inbound text frame into a delivery request
fn delivery_request(client_id: &ClientId, text: &str) -> Result<DeliveryRequest, InboundError> {
    let inbound = InboundMessage::parse(&normalize(text))?;
    let route = inbound.route();
    let payload = Envelope::chat(client_id, inbound).encode()?;
    Ok(DeliveryRequest { payload, route })
}

fn is_expected_close(e: &WsError) -> bool {
    matches!(
        e,
        WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    )
}

/// Write task: mailbox → socket, plus keep-alives
///
/// Ends when the mailbox is released, a write fails or a write misses its
/// deadline. On the way out it closes the sink and aborts the read task.
///
/// A mailbox released with payloads still queued is drained first, but the
/// read task is stopped as soon as the release is seen so an evicted
/// connection cannot keep submitting messages meanwhile.
async fn write_loop<S>(
    mut ws_sender: S,
    mut mailbox: mpsc::Receiver<Payload>,
    client_id: ClientId,
    write_wait: Duration,
    ping_period: Duration,
    reader: AbortOnDrop,
) where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let mut keepalive = time::interval_at(Instant::now() + ping_period, ping_period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            payload = mailbox.recv() => {
                let Some(payload) = payload else {
                    debug!("Mailbox for {} released", client_id);
                    break;
                };
                if mailbox.is_closed() {
                    reader.abort();
                }
                let frame = Message::Text(coalesce(payload, &mut mailbox));
                if let Err(e) = send_with_deadline(&mut ws_sender, frame, write_wait).await {
                    debug!("Write to {} failed: {}", client_id, e);
                    break;
                }
            }
            _ = keepalive.tick() => {
                let ping = Message::Ping(Vec::new());
                if let Err(e) = send_with_deadline(&mut ws_sender, ping, write_wait).await {
                    debug!("Ping to {} failed: {}", client_id, e);
                    break;
                }
            }
        }
    }

    // Sends the close frame if the socket is still writable
    let _ = time::timeout(write_wait, ws_sender.close()).await;
    debug!("Write task ended for {}", client_id);
}

/// Join the given payload with everything already queued behind it
///
/// Only what is in the mailbox at this instant is taken, so a busy producer
/// cannot keep the frame growing.
fn coalesce(first: Payload, mailbox: &mut mpsc::Receiver<Payload>) -> String {
    let queued = mailbox.len();
    let mut frame = String::from(&*first);
    for _ in 0..queued {
        match mailbox.try_recv() {
            Ok(next) => {
                frame.push('\n');
                frame.push_str(&next);
            }
            Err(_) => break,
        }
    }
    frame
}

async fn send_with_deadline<S>(
    ws_sender: &mut S,
    msg: Message,
    write_wait: Duration,
) -> Result<(), AppError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    match time::timeout(write_wait, ws_sender.send(msg)).await {
        Ok(result) => result.map_err(AppError::from),
        Err(_) => Err(AppError::WriteTimeout),
    }
}

/// Sends `Unregister` when the read task ends, however it ends
struct UnregisterGuard {
    client_id: ClientId,
    session: SessionId,
    cmd_tx: mpsc::Sender<Command>,
}

impl UnregisterGuard {
    fn new(client_id: ClientId, session: SessionId, cmd_tx: mpsc::Sender<Command>) -> Self {
        Self {
            client_id,
            session,
            cmd_tx,
        }
    }
}

impl Drop for UnregisterGuard {
    fn drop(&mut self) {
        let cmd = Command::Unregister {
            client_id: self.client_id.clone(),
            session: self.session,
        };
        match self.cmd_tx.try_send(cmd) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(cmd)) => {
                // Can't await in Drop, finish the send on a detached task
                let cmd_tx = self.cmd_tx.clone();
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        let _ = cmd_tx.send(cmd).await;
                    });
                }
            }
        }
    }
}

/// Aborts the read task when the write task ends
struct AbortOnDrop(AbortHandle);

impl AbortOnDrop {
    fn abort(&self) {
        self.0.abort();
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.abort();
    }
}
