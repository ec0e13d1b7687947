use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::{BoxFuture, Shared};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};

use agora_store::ChatStoreHandle;
use agora_types::api::AckResponse;
use agora_types::events::{JoinRoomsPayload, names};

use crate::ack::{AckRegistry, Emitter};
use crate::auth::user_id_from_token;
use crate::bindings::EventBindings;
use crate::codec::{EnginePacket, SocketPacket, connect_error_message};
use crate::commands::ChatCommands;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::notice::Notice;
use crate::outbound::Outbound;
use crate::session::SessionStore;
use crate::typing::TypingIndicator;

/// How long `disconnect` waits for the connection task to say goodbye.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;
type ConnectAttempt = Shared<BoxFuture<'static, Result<(), GatewayError>>>;

/// A socket that completed the Engine.IO and Socket.IO handshakes.
struct LiveSocket {
    sink: WsSink,
    stream: WsSource,
    /// Longest gap allowed between two server pings.
    heartbeat: Duration,
}

enum SessionEnd {
    /// `disconnect()` was called.
    Shutdown,
    /// The server sent a Socket.IO disconnect; not retried.
    ServerDisconnect,
    Dropped(String),
}

enum Reconnect {
    Connected(LiveSocket),
    Cancelled,
    Exhausted,
}

#[derive(Default)]
struct Lifecycle {
    pending: Option<ConnectAttempt>,
    supervisor: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
    sweeper: Option<JoinHandle<()>>,
}

/// The one live chat connection of a client session.
///
/// Cloning shares the connection. The store, session persistence and
/// configuration are injected; nothing here is process-global.
#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: GatewayConfig,
    store: ChatStoreHandle,
    session: Arc<dyn SessionStore>,
    outbound: Outbound,
    acks: AckRegistry,
    emitter: Emitter,
    bindings: EventBindings,
    notices: broadcast::Sender<Notice>,
    joined_rooms: Mutex<Vec<String>>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig, store: ChatStoreHandle, session: Arc<dyn SessionStore>) -> Self {
        let outbound = Outbound::new();
        let acks = AckRegistry::new();
        let emitter = Emitter::new(outbound.clone(), acks.clone(), config.ack_timeout);
        let (notices, _) = broadcast::channel(256);

        Self {
            inner: Arc::new(ClientInner {
                bindings: EventBindings::new(store.clone()),
                config,
                store,
                session,
                outbound,
                acks,
                emitter,
                notices,
                joined_rooms: Mutex::new(Vec::new()),
                lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
            }),
        }
    }

    pub fn store(&self) -> &ChatStoreHandle {
        &self.inner.store
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn is_connected(&self) -> bool {
        self.inner.outbound.is_connected()
    }

    /// Subscribe to user-facing notices.
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notices.subscribe()
    }

    /// Outbound chat commands bound to this connection.
    pub fn commands(&self) -> ChatCommands {
        ChatCommands::new(
            self.inner.emitter.clone(),
            self.inner.store.clone(),
            self.inner.notices.clone(),
        )
    }

    /// Typing debouncer for the conversation open in the store, or `None`
    /// when no community is selected.
    pub fn typing_indicator(&self) -> Option<TypingIndicator> {
        let (community_id, peer) = self.inner.store.read(|s| {
            let community_id = s.active_community_id()?.to_string();
            Some((community_id, s.active_direct_chat_user_id().map(str::to_string)))
        })?;
        Some(TypingIndicator::new(self.commands(), community_id, peer))
    }

    /// Open the connection, or join the attempt already in flight.
    ///
    /// Resolves immediately when already connected. Every caller of a
    /// shared attempt receives the same outcome.
    pub async fn connect(&self, token: &str) -> Result<(), GatewayError> {
        let user_id = user_id_from_token(token)?;

        let attempt = {
            let mut lifecycle = self.inner.lifecycle.lock().await;
            if self.is_connected() {
                self.remember_user(&user_id);
                return Ok(());
            }
            match &lifecycle.pending {
                Some(attempt) => {
                    debug!("Joining connection attempt in flight");
                    attempt.clone()
                }
                None => {
                    let attempt = self
                        .clone()
                        .establish(token.to_string(), user_id)
                        .boxed()
                        .shared();
                    lifecycle.pending = Some(attempt.clone());
                    attempt
                }
            }
        };

        let result = attempt.clone().await;

        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle
            .pending
            .as_ref()
            .is_some_and(|pending| pending.ptr_eq(&attempt))
        {
            lifecycle.pending = None;
        }
        result
    }

    async fn establish(self, token: String, user_id: String) -> Result<(), GatewayError> {
        // A previous session may still be retrying; this attempt replaces it.
        if let Some(old) = self.inner.lifecycle.lock().await.supervisor.take() {
            old.abort();
        }

        let url = self.inner.config.socket_url();
        let limit = self.inner.config.connect_timeout;
        info!("Connecting to {}", url);

        let socket = match tokio::time::timeout(limit, handshake(&url, &token)).await {
            Ok(Ok(socket)) => socket,
            Ok(Err(e)) => {
                warn!("Connection failed: {}", e);
                self.notify(Notice::error(format!("Connection failed: {e}")));
                return Err(e);
            }
            Err(_) => {
                let e = GatewayError::ConnectTimeout(limit);
                warn!("{}", e);
                self.notify(Notice::error(e.to_string()));
                return Err(e);
            }
        };

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        self.inner.outbound.attach(frames_tx);
        self.remember_user(&user_id);
        self.inner.store.dispatch(|s| s.set_connected(true));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let supervisor = tokio::spawn(self.clone().supervise(socket, frames_rx, token, shutdown_rx));

        let mut lifecycle = self.inner.lifecycle.lock().await;
        lifecycle.supervisor = Some(supervisor);
        lifecycle.shutdown = Some(shutdown_tx);
        if lifecycle.sweeper.is_none() {
            lifecycle.sweeper = Some(
                self.inner
                    .store
                    .spawn_typing_sweeper(self.inner.config.typing_sweep_interval),
            );
        }

        info!("Connected as {}", user_id);
        Ok(())
    }

    /// Close the connection. Pending requests fail, presence is cleared and
    /// the persisted user id is forgotten. A connection attempt in flight is
    /// awaited first and then closed. Does nothing when not connected.
    pub async fn disconnect(&self) {
        let in_flight = self.inner.lifecycle.lock().await.pending.clone();
        if let Some(attempt) = in_flight {
            debug!("Disconnect waiting for connection attempt in flight");
            let _ = attempt.await;
        }

        let (supervisor, shutdown, sweeper) = {
            let mut lifecycle = self.inner.lifecycle.lock().await;
            (
                lifecycle.supervisor.take(),
                lifecycle.shutdown.take(),
                lifecycle.sweeper.take(),
            )
        };

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        let Some(mut supervisor) = supervisor else {
            debug!("Disconnect requested while not connected");
            return;
        };

        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(());
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut supervisor).await.is_err() {
            warn!("Connection task did not stop in time, aborting");
            supervisor.abort();
        }

        self.inner.outbound.detach();
        self.inner.acks.fail_all();
        self.inner.store.dispatch(|s| s.set_connected(false));
        self.rooms().clear();
        if let Err(e) = self.inner.session.clear() {
            warn!("Failed to clear session: {}", e);
        }
        info!("Disconnected");
    }

    /// Subscribe this socket to the rooms of the given communities.
    pub async fn join_community_rooms(
        &self,
        community_ids: &[String],
    ) -> Result<AckResponse, GatewayError> {
        let payload = JoinRoomsPayload {
            community_ids: community_ids.to_vec(),
        };
        let result = self
            .inner
            .emitter
            .request_with_timeout(
                names::JOIN_COMMUNITY_ROOMS,
                &payload,
                Some(self.inner.config.join_timeout),
            )
            .await;

        match result {
            Ok(response) => {
                let mut rooms = self.rooms();
                for id in community_ids {
                    if !rooms.contains(id) {
                        rooms.push(id.clone());
                    }
                }
                info!("Joined {} community room(s)", community_ids.len());
                Ok(response)
            }
            Err(e) => {
                warn!("Failed to join community rooms: {}", e);
                self.notify(Notice::error(format!("Failed to join community rooms: {e}")));
                Err(e)
            }
        }
    }

    fn remember_user(&self, user_id: &str) {
        let user_id = user_id.to_string();
        if let Err(e) = self.inner.session.save_user_id(&user_id) {
            warn!("Failed to persist session: {}", e);
        }
        self.inner.store.dispatch(|s| s.set_current_user(Some(user_id)));
    }

    fn notify(&self, notice: Notice) {
        let _ = self.inner.notices.send(notice);
    }

    fn rooms(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.inner
            .joined_rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Owns the socket for the life of the session, reconnecting after
    /// unexpected drops.
    async fn supervise(
        self,
        mut socket: LiveSocket,
        mut frames: mpsc::UnboundedReceiver<String>,
        token: String,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        loop {
            let end = self.run_session(socket, &mut frames, &mut shutdown).await;

            self.inner.outbound.detach();
            self.inner.acks.fail_all();
            self.inner.store.dispatch(|s| s.set_connected(false));

            match end {
                SessionEnd::Shutdown => return,
                SessionEnd::ServerDisconnect => {
                    info!("Server closed the chat session");
                    self.notify(Notice::warning("Disconnected by the chat server"));
                    return;
                }
                SessionEnd::Dropped(reason) => {
                    warn!("Connection lost: {}", reason);
                    self.notify(Notice::warning("Connection lost, reconnecting"));
                }
            }

            match self.reconnect(&token, &mut shutdown).await {
                Reconnect::Connected(next) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    self.inner.outbound.attach(tx);
                    frames = rx;
                    socket = next;
                    self.inner.store.dispatch(|s| s.set_connected(true));
                    info!("Reconnected");
                    self.notify(Notice::info("Reconnected"));
                    self.rejoin_rooms();
                }
                Reconnect::Cancelled => return,
                Reconnect::Exhausted => {
                    error!("Giving up on reconnecting");
                    self.notify(Notice::error("Could not reconnect to the chat server"));
                    return;
                }
            }
        }
    }

    async fn run_session(
        &self,
        socket: LiveSocket,
        frames: &mut mpsc::UnboundedReceiver<String>,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> SessionEnd {
        let LiveSocket {
            mut sink,
            mut stream,
            heartbeat,
        } = socket;

        let deadline = tokio::time::sleep(heartbeat);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut *shutdown => {
                    let _ = sink.send(WsMessage::text(SocketPacket::Disconnect.to_frame())).await;
                    let _ = sink.close().await;
                    return SessionEnd::Shutdown;
                }
                frame = frames.recv() => {
                    let Some(frame) = frame else {
                        return SessionEnd::Dropped("outbound queue closed".into());
                    };
                    if let Err(e) = sink.send(WsMessage::text(frame)).await {
                        return SessionEnd::Dropped(e.to_string());
                    }
                }
                _ = &mut deadline => {
                    warn!("No ping from server within {:?}, dropping connection", heartbeat);
                    return SessionEnd::Dropped("heartbeat timeout".into());
                }
                msg = stream.next() => {
                    let text = match msg {
                        None => return SessionEnd::Dropped("connection closed".into()),
                        Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
                        Some(Ok(WsMessage::Close(_))) => {
                            return SessionEnd::Dropped("closed by server".into());
                        }
                        Some(Ok(WsMessage::Text(text))) => text,
                        Some(Ok(_)) => continue,
                    };

                    let packet = match EnginePacket::decode(text.as_str()) {
                        Ok(packet) => packet,
                        Err(e) => {
                            warn!("Dropping malformed frame: {}", e);
                            continue;
                        }
                    };

                    match packet {
                        EnginePacket::Ping(data) => {
                            deadline.as_mut().reset(tokio::time::Instant::now() + heartbeat);
                            if let Err(e) = sink.send(WsMessage::text(EnginePacket::Pong(data).encode())).await {
                                return SessionEnd::Dropped(e.to_string());
                            }
                        }
                        EnginePacket::Message(body) => match SocketPacket::decode(&body) {
                            Ok(SocketPacket::Event { id, name, args }) => {
                                self.inner.bindings.handle(&name, &args);
                                if let Some(id) = id {
                                    let ack = SocketPacket::Ack { id, args: Vec::new() };
                                    if let Err(e) = sink.send(WsMessage::text(ack.to_frame())).await {
                                        return SessionEnd::Dropped(e.to_string());
                                    }
                                }
                            }
                            Ok(SocketPacket::Ack { id, args }) => {
                                self.inner.acks.resolve(id, args);
                            }
                            Ok(SocketPacket::Disconnect) => return SessionEnd::ServerDisconnect,
                            Ok(other) => trace!("Ignoring {:?}", other),
                            Err(e) => warn!("Dropping malformed packet: {}", e),
                        },
                        EnginePacket::Close => {
                            return SessionEnd::Dropped("transport closed by server".into());
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    async fn reconnect(&self, token: &str, shutdown: &mut oneshot::Receiver<()>) -> Reconnect {
        let policy = &self.inner.config.reconnect;
        let url = self.inner.config.socket_url();
        let limit = self.inner.config.connect_timeout;

        let mut attempt = 0;
        while policy.allows(attempt) {
            let delay = policy.delay(attempt);
            attempt += 1;
            info!("Reconnecting in {:?} (attempt {})", delay, attempt);

            tokio::select! {
                _ = &mut *shutdown => return Reconnect::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }

            let result = tokio::select! {
                _ = &mut *shutdown => return Reconnect::Cancelled,
                result = tokio::time::timeout(limit, handshake(&url, token)) => result,
            };
            match result {
                Ok(Ok(socket)) => return Reconnect::Connected(socket),
                Ok(Err(e)) => warn!("Reconnect attempt {} failed: {}", attempt, e),
                Err(_) => warn!("Reconnect attempt {} timed out", attempt),
            }
        }
        Reconnect::Exhausted
    }

    /// Socket.IO rooms do not survive a new socket; ask for them again.
    /// Missed messages are not backfilled.
    fn rejoin_rooms(&self) {
        let rooms = self.rooms().clone();
        if rooms.is_empty() {
            return;
        }
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client.join_community_rooms(&rooms).await {
                warn!("Failed to rejoin rooms after reconnect: {}", e);
            }
        });
    }
}

async fn handshake(url: &str, token: &str) -> Result<LiveSocket, GatewayError> {
    let (ws, _) = connect_async(url).await?;
    let (mut sink, mut stream) = ws.split();

    let open = loop {
        match next_packet(&mut stream).await? {
            EnginePacket::Open(open) => break open,
            other => trace!("Ignoring {:?} before open", other),
        }
    };
    debug!(
        "Transport open (sid {}, ping every {}ms, timeout {}ms)",
        open.sid, open.ping_interval, open.ping_timeout
    );

    let auth = SocketPacket::Connect(Some(json!({ "token": token })));
    sink.send(WsMessage::text(auth.to_frame())).await?;

    loop {
        match next_packet(&mut stream).await? {
            EnginePacket::Ping(data) => {
                sink.send(WsMessage::text(EnginePacket::Pong(data).encode()))
                    .await?;
            }
            EnginePacket::Message(body) => match SocketPacket::decode(&body)? {
                SocketPacket::Connect(_) => break,
                SocketPacket::ConnectError(data) => {
                    return Err(GatewayError::ConnectRejected(connect_error_message(&data)));
                }
                other => trace!("Ignoring {:?} before connect", other),
            },
            EnginePacket::Close => {
                return Err(GatewayError::Transport("closed during handshake".into()));
            }
            _ => {}
        }
    }

    Ok(LiveSocket {
        sink,
        stream,
        heartbeat: Duration::from_millis(open.ping_interval + open.ping_timeout),
    })
}

async fn next_packet(stream: &mut WsSource) -> Result<EnginePacket, GatewayError> {
    loop {
        match stream.next().await {
            None => return Err(GatewayError::Transport("connection closed".into())),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(WsMessage::Text(text))) => return Ok(EnginePacket::decode(text.as_str())?),
            Some(Ok(WsMessage::Close(_))) => {
                return Err(GatewayError::Transport("connection closed by server".into()));
            }
            Some(Ok(_)) => {}
        }
    }
}
