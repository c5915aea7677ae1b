//! Session transport over the websocket
//!
//! Owns the duplex connection, the acknowledgement-wait protocol, a
//! periodic keepalive and the dispatch of every decoded inbound frame.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::frame::{decode, Inbound};
use crate::protocol::{keepalive, Acknowledgement, GameState, Handshake, Participant, Presence};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Writer = SplitSink<Socket, Message>;
type Reader = SplitStream<Socket>;

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Websocket endpoint of the realtime database
    pub url: String,
    /// Bound on the initial dial
    pub connect_timeout: Duration,
    /// Bound on a single outbound write
    pub send_timeout: Duration,
    /// Bound on an acknowledgement wait
    pub ack_timeout: Duration,
    /// Keepalive period
    pub heartbeat_interval: Duration,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(45),
        }
    }
}

/// Event published to the session consumer
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Server identity, announced once after connecting
    Handshake(Handshake),
    /// A participant record was created or replaced
    Participant(Participant),
    /// A participant went online or offline
    Presence(Presence),
    /// Full replacement snapshot of the shared document
    Game(GameState),
    /// The session ended; no further events follow
    Disconnected,
}

/// Handle to one connected session
pub struct Transport {
    shared: Arc<Shared>,
    event_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

struct Shared {
    config: TransportConfig,
    cancel: CancellationToken,
    writer: Mutex<Option<Writer>>,
    pending: Mutex<HashMap<u16, oneshot::Sender<String>>>,
}

impl Transport {
    /// Open the websocket and start the read and heartbeat loops.
    ///
    /// Returns as soon as the socket is open; the server handshake
    /// arrives later through the event stream.
    pub async fn connect(config: TransportConfig) -> Result<Self> {
        info!(url = %config.url, "opening websocket");
        let (socket, _) = timeout(config.connect_timeout, connect_async(&config.url))
            .await
            .map_err(|_| Error::Timeout(config.connect_timeout))??;
        let (writer, reader) = socket.split();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            config,
            cancel: CancellationToken::new(),
            writer: Mutex::new(Some(writer)),
            pending: Mutex::new(HashMap::new()),
        });

        debug!("establishing heartbeat");
        tokio::spawn(heartbeat_loop(shared.clone()));
        debug!("listening for messages");
        tokio::spawn(read_loop(reader, shared.clone(), event_tx));

        Ok(Self { shared, event_rx })
    }

    /// Write one frame.
    ///
    /// A zero reference is fire-and-forget. A positive reference blocks
    /// until the matching acknowledgement arrives, the wait times out,
    /// or the session is torn down. Acknowledgements for other
    /// references never satisfy or fail this call.
    pub async fn send(&self, reference: u16, payload: String) -> Result<()> {
        let waiter = if reference > 0 {
            Some(self.shared.register(reference).await)
        } else {
            None
        };

        debug!(reference, payload = %payload, "sending frame");
        if let Err(err) = self.shared.write(payload).await {
            if waiter.is_some() {
                self.shared.forget(reference).await;
            }
            return Err(err);
        }

        let Some(waiter) = waiter else {
            return Ok(());
        };

        debug!(reference, "awaiting acknowledgement");
        let status = match timeout(self.shared.config.ack_timeout, waiter).await {
            Err(_) => {
                self.shared.forget(reference).await;
                return Err(Error::Timeout(self.shared.config.ack_timeout));
            }
            Ok(Err(_)) => return Err(Error::Cancelled),
            Ok(Ok(status)) => status,
        };

        if status == Acknowledgement::OK {
            debug!(reference, "message acknowledged");
            Ok(())
        } else {
            Err(Error::Ack(status))
        }
    }

    /// Next decoded event, in wire arrival order. `None` once the
    /// session has ended and the final `Disconnected` was consumed.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.event_rx.recv().await
    }

    pub fn is_connected(&self) -> bool {
        !self.shared.cancel.is_cancelled()
    }

    /// Tear the session down: stop the heartbeat and read loops,
    /// release pending acknowledgement waits, close the socket.
    pub async fn disconnect(&self) -> Result<()> {
        info!("disconnecting");
        self.shared.cancel.cancel();
        self.shared.fail_pending().await;

        let mut writer = self.shared.writer.lock().await;
        if let Some(mut sink) = writer.take() {
            debug!("closing websocket");
            sink.close().await?;
        }
        Ok(())
    }
}

impl Shared {
    async fn register(&self, reference: u16) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        if self.pending.lock().await.insert(reference, tx).is_some() {
            warn!(reference, "replacing an outstanding acknowledgement wait");
        }
        rx
    }

    async fn forget(&self, reference: u16) {
        self.pending.lock().await.remove(&reference);
    }

    async fn resolve(&self, ack: Acknowledgement) {
        match self.pending.lock().await.remove(&ack.reference) {
            Some(waiter) => {
                if waiter.send(ack.status).is_err() {
                    debug!(reference = ack.reference, "acknowledgement waiter already gone");
                }
            }
            None => {
                warn!(
                    reference = ack.reference,
                    status = %ack.status,
                    "unexpected acknowledgement, discarding"
                );
            }
        }
    }

    /// Dropping the senders releases every waiter with a cancellation.
    async fn fail_pending(&self) {
        self.pending.lock().await.clear();
    }

    /// Single writer discipline: every outbound frame, including
    /// keepalives, goes through this lock.
    async fn write(&self, payload: String) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err(Error::NotConnected);
        };

        match timeout(self.config.send_timeout, sink.send(Message::Text(payload))).await {
            Err(_) => Err(Error::Timeout(self.config.send_timeout)),
            Ok(result) => Ok(result?),
        }
    }
}

async fn heartbeat_loop(shared: Arc<Shared>) {
    let mut ticker = tokio::time::interval(shared.config.heartbeat_interval);
    // the first tick completes immediately; a fresh connection does not
    // need an instant keepalive
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = ticker.tick() => {
                debug!("sending keepalive");
                if let Err(err) = shared.write(keepalive()).await {
                    warn!(error = %err, "unable to send keepalive");
                }
            }
        }
    }
}

async fn read_loop(
    mut reader: Reader,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    loop {
        let message = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            message = reader.next() => message,
        };

        let Some(message) = message else {
            info!("server closed the connection");
            break;
        };

        let bytes = match message {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(bytes)) => bytes,
            Ok(Message::Close(_)) => {
                info!("server sent close");
                break;
            }
            // ping/pong are answered by the library
            Ok(_) => continue,
            Err(err) => {
                if !shared.cancel.is_cancelled() {
                    error!(error = %err, "unable to read from websocket");
                }
                break;
            }
        };

        // One malformed frame never kills the session
        match decode(&bytes) {
            Ok(inbound) => dispatch(inbound, &shared, &events).await,
            Err(err) => {
                error!(error = %err, raw = %String::from_utf8_lossy(&bytes), "error parsing message");
            }
        }
    }

    // Ending the read loop ends the session: stop the heartbeat and
    // release anyone still waiting on an acknowledgement.
    shared.cancel.cancel();
    shared.fail_pending().await;
    let _ = events.send(SessionEvent::Disconnected);
    info!("session ended");
}

async fn dispatch(
    inbound: Inbound,
    shared: &Shared,
    events: &mpsc::UnboundedSender<SessionEvent>,
) {
    match inbound {
        Inbound::Acknowledgement(ack) => {
            debug!(reference = ack.reference, status = %ack.status, "received acknowledgement");
            shared.resolve(ack).await;
        }
        Inbound::Handshake(handshake) => {
            debug!(host = %handshake.host, version = %handshake.version, "received handshake");
            let _ = events.send(SessionEvent::Handshake(handshake));
        }
        Inbound::Participant(participant) => {
            debug!(id = %participant.id, name = %participant.full_name, "participant updated");
            let _ = events.send(SessionEvent::Participant(participant));
        }
        Inbound::Presence(presence) => {
            debug!(id = %presence.id, online = presence.online, "presence changed");
            let _ = events.send(SessionEvent::Presence(presence));
        }
        Inbound::Game(state) => {
            debug!(
                name = %state.name,
                participants = state.participants.len(),
                "received game snapshot"
            );
            let _ = events.send(SessionEvent::Game(state));
        }
    }
}
