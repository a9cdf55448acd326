//! One player's WebSocket connection: a reader task and a writer task
//! shuttling [`Message`]s between the client and the lobby.

use crate::lobby::LobbyEvent;
use bananas::messages::{GameId, Message, MessageType, PlayerName};
use derive_more::Display;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, timeout_at, Instant, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument};
use warp::ws::{Message as WsMessage, WebSocket};

/// How long a single outbound write may take before the socket is declared
/// dead.
const WRITE_WAIT: Duration = Duration::from_secs(5);

/// Capacity of the outbound mailbox. Non-critical traffic is dropped when a
/// slow client lets it fill; terminal messages wait for space instead.
const OUTBOX_CAPACITY: usize = 64;

/// Timing policy for one socket.
#[derive(Debug, Clone, Copy)]
pub struct SocketConfig {
    /// Longest gap tolerated between inbound frames. Pings are paced so a
    /// live client always beats this.
    pub pong_period: Duration,
    /// How often the writer sends a ping frame. Must be shorter than
    /// `pong_period`.
    pub ping_period: Duration,
    /// A full period without one decoded message ends the connection.
    pub idle_period: Duration,
    /// How often the client is told to make a plain HTTP request, keeping
    /// host-platform idle reapers at bay.
    pub http_ping_period: Duration,
    /// Log the text of every frame.
    pub debug: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            pong_period: Duration::from_secs(20),
            ping_period: Duration::from_secs(15),
            idle_period: Duration::from_secs(15 * 60),
            http_ping_period: Duration::from_secs(10 * 60),
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SocketConfigError {
    #[error("every socket period must be positive")]
    NonPositivePeriod,
    #[error("the ping period must be shorter than the pong period")]
    PingNotBeforePong,
}

impl SocketConfig {
    pub fn validate(&self) -> Result<(), SocketConfigError> {
        let periods = [
            self.pong_period,
            self.ping_period,
            self.idle_period,
            self.http_ping_period,
        ];
        if periods.iter().any(Duration::is_zero) {
            return Err(SocketConfigError::NonPositivePeriod);
        }
        if self.ping_period >= self.pong_period {
            return Err(SocketConfigError::PingNotBeforePong);
        }
        Ok(())
    }
}

/// Distinguishes successive connections by the same player, so the lobby can
/// tell a dead displaced socket from the one that replaced it.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(u64);

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(0);

impl SocketId {
    fn next() -> Self {
        Self(NEXT_SOCKET_ID.fetch_add(1, Ordering::SeqCst))
    }
}

/// Cheap address of a connected socket; the writer task holds the other end.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    id: SocketId,
    name: PlayerName,
    tx: mpsc::Sender<Message>,
}

impl SocketHandle {
    pub(crate) fn new(name: PlayerName, tx: mpsc::Sender<Message>) -> Self {
        Self {
            id: SocketId::next(),
            name,
            tx,
        }
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    pub fn name(&self) -> &PlayerName {
        &self.name
    }

    /// Best-effort delivery; a full mailbox drops the message.
    pub fn send(&self, message: Message) {
        if let Err(err) = self.tx.try_send(message) {
            warn!(player = %self.name, "dropping outbound message: {err}");
        }
    }

    /// Delivery for terminal messages, which must never be dropped; waits for
    /// mailbox space if it has to.
    pub async fn send_critical(&self, message: Message) {
        if self.tx.send(message).await.is_err() {
            debug!(player = %self.name, "socket gone before a terminal message");
        }
    }
}

/// State the reader and writer share between awaits.
#[derive(Debug, Default)]
struct Shared {
    /// Set by the reader on every decoded message, cleared at each idle tick.
    active: AtomicBool,
    /// The game this socket is in, 0 when none (game ids start at 1). The
    /// writer records it from outbound Join/Leave/Delete traffic; the reader
    /// stamps it onto inbound messages.
    game_id: AtomicU32,
}

impl Shared {
    fn game_id(&self) -> Option<GameId> {
        match self.game_id.load(Ordering::Relaxed) {
            0 => None,
            id => Some(GameId::new(id)),
        }
    }

    fn set_game_id(&self, id: Option<GameId>) {
        self.game_id.store(id.map_or(0, GameId::raw), Ordering::Relaxed);
    }
}

/// One player's connection, validated and ready to pump.
#[derive(Debug)]
pub struct Socket {
    name: PlayerName,
    config: SocketConfig,
}

impl Socket {
    pub fn new(name: PlayerName, config: SocketConfig) -> Result<Self, SocketConfigError> {
        config.validate()?;
        Ok(Self { name, config })
    }

    /// Splits the connection and spawns the message pump. The returned handle
    /// is what the lobby and games address the player by.
    pub fn start(
        self,
        websocket: WebSocket,
        lobby: mpsc::Sender<LobbyEvent>,
        cancel: CancellationToken,
    ) -> SocketHandle {
        let (sink, stream) = websocket.split();
        let (tx, outbox) = mpsc::channel(OUTBOX_CAPACITY);
        let handle = SocketHandle::new(self.name.clone(), tx);

        let span = info_span!("socket", player = %self.name, socket = %handle.id());
        tokio::spawn(
            run_connection(
                self.name,
                handle.id(),
                self.config,
                sink,
                stream,
                outbox,
                lobby,
                cancel,
            )
            .instrument(span),
        );
        handle
    }
}

/// Runs both halves of one connection to completion, then tells the lobby to
/// reclaim the player. Whichever half stops first cancels the other, and the
/// connection is closed exactly once, by the writer.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn run_connection<K, S, E>(
    name: PlayerName,
    id: SocketId,
    config: SocketConfig,
    sink: K,
    stream: S,
    outbox: mpsc::Receiver<Message>,
    lobby: mpsc::Sender<LobbyEvent>,
    cancel: CancellationToken,
) where
    K: Sink<WsMessage> + Unpin + Send + 'static,
    K::Error: fmt::Display + Send,
    S: Stream<Item = Result<WsMessage, E>> + Unpin + Send,
    E: fmt::Display + Send,
{
    let shared = Arc::new(Shared::default());
    let local = cancel.child_token();

    let writer = tokio::spawn(
        write_loop(sink, outbox, config, Arc::clone(&shared), local.clone())
            .instrument(tracing::Span::current()),
    );
    read_loop(stream, config, &name, &shared, &lobby, &local).await;

    local.cancel();
    let _ = writer.await;

    let _ = lobby
        .send(LobbyEvent::SocketClosed { id, player: name })
        .await;
}

async fn read_loop<S, E>(
    mut stream: S,
    config: SocketConfig,
    name: &PlayerName,
    shared: &Shared,
    lobby: &mpsc::Sender<LobbyEvent>,
    cancel: &CancellationToken,
) where
    S: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: fmt::Display,
{
    // The transport liveness check: only a pong pushes the read deadline
    // back. Game traffic keeps the idle ticker happy but says nothing about
    // whether the peer still answers pings.
    let mut deadline = Instant::now() + config.pong_period;
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            received = timeout_at(deadline, stream.next()) => match received {
                Err(_) => {
                    debug!("read deadline passed with no pong");
                    break;
                }
                Ok(None) => {
                    debug!("socket stream ended");
                    break;
                }
                Ok(Some(Err(err))) => {
                    debug!(%err, "socket read failed");
                    break;
                }
                Ok(Some(Ok(frame))) => frame,
            },
        };

        if frame.is_close() {
            debug!("client closed the socket");
            break;
        }
        if frame.is_pong() {
            deadline = Instant::now() + config.pong_period;
            continue;
        }
        if frame.is_ping() {
            continue;
        }

        let report = match frame.to_str() {
            Err(()) => Message::socket_error("binary frames are not part of the protocol"),
            Ok(text) => {
                if config.debug {
                    trace!(%text, "received message");
                }
                match serde_json::from_str::<Message>(text) {
                    Ok(mut message) => {
                        shared.active.store(true, Ordering::Relaxed);
                        // A Join may name its own game; everything else is
                        // routed by the game this socket is already in.
                        if message.message_type != MessageType::Join
                            || message.game_id.is_none()
                        {
                            message.game_id = shared.game_id();
                        }
                        message
                    }
                    Err(err) => {
                        debug!(%err, "dropping unreadable frame");
                        Message::socket_error(format!("unreadable message: {err}"))
                    }
                }
            }
        };

        let event = LobbyEvent::Recv {
            player: name.clone(),
            message: report,
        };
        if lobby.send(event).await.is_err() {
            debug!("lobby is gone");
            break;
        }
    }
}

async fn write_loop<K>(
    mut sink: K,
    mut outbox: mpsc::Receiver<Message>,
    config: SocketConfig,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) where
    K: Sink<WsMessage> + Unpin,
    K::Error: fmt::Display,
{
    let mut ping = ticker(config.ping_period);
    let mut http_ping = ticker(config.http_ping_period);
    let mut idle = ticker(config.idle_period);

    loop {
        tokio::select! {
            // Mailbox first: terminal messages already enqueued (PlayerDelete
            // on shutdown, say) must reach the wire before a broader
            // cancellation is honored.
            biased;
            received = outbox.recv() => {
                let Some(message) = received else {
                    debug!("outbox closed");
                    break;
                };
                match message.message_type {
                    MessageType::Join => shared.set_game_id(message.game_id),
                    MessageType::Leave | MessageType::Delete => shared.set_game_id(None),
                    _ => {}
                }
                let terminal = message.message_type == MessageType::PlayerDelete;
                if send_message(&mut sink, &message, config.debug).await.is_err() {
                    break;
                }
                if terminal {
                    debug!("player deleted, socket closing");
                    break;
                }
            }
            _ = cancel.cancelled() => break,
            _ = ping.tick() => {
                if send_frame(&mut sink, WsMessage::ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            _ = http_ping.tick() => {
                if send_message(&mut sink, &Message::socket_http_ping(), config.debug)
                    .await
                    .is_err()
                {
                    break;
                }
            }
            _ = idle.tick() => {
                if !shared.active.swap(false, Ordering::Relaxed) {
                    info!("closing the connection due to inactivity");
                    let warning = Message::socket_warning("closing due to inactivity");
                    let _ = send_message(&mut sink, &warning, config.debug).await;
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
    cancel.cancel();
}

/// An interval whose first tick lands one period out, not immediately.
fn ticker(period: Duration) -> Interval {
    interval_at(Instant::now() + period, period)
}

async fn send_message<K>(sink: &mut K, message: &Message, log: bool) -> anyhow::Result<()>
where
    K: Sink<WsMessage> + Unpin,
    K::Error: fmt::Display,
{
    let text = serde_json::to_string(message).expect("wire messages always serialize");
    if log {
        trace!(%text, "sending message");
    }
    send_frame(sink, WsMessage::text(text)).await
}

async fn send_frame<K>(sink: &mut K, frame: WsMessage) -> anyhow::Result<()>
where
    K: Sink<WsMessage> + Unpin,
    K::Error: fmt::Display,
{
    match timeout(WRITE_WAIT, sink.send(frame)).await {
        Err(_) => {
            debug!("write deadline passed");
            anyhow::bail!("write deadline passed");
        }
        Ok(Err(err)) => {
            debug!(%err, "socket write failed");
            anyhow::bail!("socket write failed");
        }
        Ok(Ok(())) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::convert::Infallible;

    fn config() -> SocketConfig {
        SocketConfig {
            pong_period: Duration::from_secs(60),
            ping_period: Duration::from_secs(45),
            idle_period: Duration::from_secs(600),
            http_ping_period: Duration::from_secs(600),
            debug: false,
        }
    }

    /// Wires a pump to in-memory ends: (to client stream, from client sink,
    /// outbound mailbox, lobby inbox).
    struct Pump {
        client_in: futures::channel::mpsc::UnboundedSender<Result<WsMessage, Infallible>>,
        client_out: futures::channel::mpsc::Receiver<WsMessage>,
        outbox: mpsc::Sender<Message>,
        lobby: mpsc::Receiver<LobbyEvent>,
        cancel: CancellationToken,
    }

    fn start_pump(config: SocketConfig) -> Pump {
        let (client_in, stream) = futures::channel::mpsc::unbounded();
        let (sink, client_out) = futures::channel::mpsc::channel(16);
        let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
        let (lobby_tx, lobby_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        tokio::spawn(run_connection(
            PlayerName::from("alice"),
            SocketId::next(),
            config,
            sink,
            stream,
            outbox_rx,
            lobby_tx,
            cancel.clone(),
        ));

        Pump {
            client_in,
            client_out,
            outbox: outbox_tx,
            lobby: lobby_rx,
            cancel,
        }
    }

    fn text_of(frame: &WsMessage) -> Message {
        serde_json::from_str(frame.to_str().expect("expected a text frame")).unwrap()
    }

    async fn next_recv(lobby: &mut mpsc::Receiver<LobbyEvent>) -> (PlayerName, Message) {
        loop {
            match lobby.recv().await.expect("lobby channel closed") {
                LobbyEvent::Recv { player, message } => return (player, message),
                _ => continue,
            }
        }
    }

    #[test]
    fn config_must_be_sane() {
        assert!(SocketConfig::default().validate().is_ok());

        let zero = SocketConfig {
            idle_period: Duration::ZERO,
            ..SocketConfig::default()
        };
        assert_eq!(Err(SocketConfigError::NonPositivePeriod), zero.validate());

        let backwards = SocketConfig {
            ping_period: Duration::from_secs(30),
            pong_period: Duration::from_secs(20),
            ..SocketConfig::default()
        };
        assert_eq!(
            Err(SocketConfigError::PingNotBeforePong),
            backwards.validate(),
        );
        assert!(
            Socket::new(PlayerName::from("alice"), backwards).is_err(),
            "construction runs validation",
        );
    }

    #[tokio::test]
    async fn inbound_messages_are_stamped_with_the_socket_game() {
        let mut pump = start_pump(config());

        // The writer learns the game id from an outbound Join...
        let join = Message {
            game_id: Some(GameId::new(2)),
            ..Message::new(MessageType::Join)
        };
        pump.outbox.send(join).await.unwrap();
        let written = pump.client_out.next().await.unwrap();
        assert_eq!(Some(GameId::new(2)), text_of(&written).game_id);

        // ...and the reader stamps it onto inbound traffic.
        pump.client_in
            .unbounded_send(Ok(WsMessage::text(r#"{"type":7}"#)))
            .unwrap();
        let (player, message) = next_recv(&mut pump.lobby).await;
        assert_eq!(PlayerName::from("alice"), player);
        assert_eq!(MessageType::Snag, message.message_type);
        assert_eq!(Some(GameId::new(2)), message.game_id);

        // A Join naming its own game keeps it.
        pump.client_in
            .unbounded_send(Ok(WsMessage::text(r#"{"type":2,"gameID":5}"#)))
            .unwrap();
        let (_, message) = next_recv(&mut pump.lobby).await;
        assert_eq!(Some(GameId::new(5)), message.game_id);

        pump.cancel.cancel();
    }

    #[tokio::test]
    async fn unreadable_frames_become_socket_errors() {
        let mut pump = start_pump(config());

        pump.client_in
            .unbounded_send(Ok(WsMessage::text("this is not json")))
            .unwrap();

        let (_, message) = next_recv(&mut pump.lobby).await;
        assert_eq!(MessageType::SocketError, message.message_type);
        assert!(message.info.unwrap().starts_with("unreadable message"));

        pump.cancel.cancel();
    }

    #[tokio::test]
    async fn a_closed_stream_reclaims_the_player() {
        let mut pump = start_pump(config());

        drop(pump.client_in);

        loop {
            match pump.lobby.recv().await.expect("lobby channel closed") {
                LobbyEvent::SocketClosed { player, .. } => {
                    assert_eq!(PlayerName::from("alice"), player);
                    break;
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn player_delete_is_written_then_terminal() {
        let mut pump = start_pump(config());

        pump.outbox.send(Message::player_delete()).await.unwrap();

        let written = pump.client_out.next().await.unwrap();
        assert_eq!(
            MessageType::PlayerDelete,
            text_of(&written).message_type,
        );
        loop {
            match pump.lobby.recv().await.expect("lobby channel closed") {
                LobbyEvent::SocketClosed { .. } => break,
                _ => continue,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pings_go_out_on_schedule() {
        let mut pump = start_pump(SocketConfig {
            ping_period: Duration::from_millis(50),
            pong_period: Duration::from_secs(3600),
            idle_period: Duration::from_secs(3600),
            http_ping_period: Duration::from_secs(3600),
            debug: false,
        });

        let frame = pump.client_out.next().await.unwrap();
        assert!(frame.is_ping());

        pump.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn an_idle_connection_is_warned_then_dropped() {
        let mut pump = start_pump(SocketConfig {
            ping_period: Duration::from_secs(1800),
            pong_period: Duration::from_secs(3600),
            idle_period: Duration::from_millis(50),
            http_ping_period: Duration::from_secs(3600),
            debug: false,
        });

        let frame = pump.client_out.next().await.unwrap();
        let message = text_of(&frame);
        assert_eq!(MessageType::SocketWarning, message.message_type);

        loop {
            match pump.lobby.recv().await.expect("lobby channel closed") {
                LobbyEvent::SocketClosed { .. } => break,
                _ => continue,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn only_pongs_push_the_read_deadline_back() {
        let mut pump = start_pump(SocketConfig {
            ping_period: Duration::from_millis(80),
            pong_period: Duration::from_millis(100),
            idle_period: Duration::from_secs(3600),
            http_ping_period: Duration::from_secs(3600),
            debug: false,
        });
        let start = tokio::time::Instant::now();

        // A pong just before the deadline buys another full period.
        tokio::time::sleep(Duration::from_millis(60)).await;
        pump.client_in
            .unbounded_send(Ok(WsMessage::pong(Vec::new())))
            .unwrap();

        // Ordinary game traffic does not.
        tokio::time::sleep(Duration::from_millis(60)).await;
        pump.client_in
            .unbounded_send(Ok(WsMessage::text(r#"{"type":20}"#)))
            .unwrap();
        let _ = next_recv(&mut pump.lobby).await;

        // The pong moved the deadline to t=160ms; the message at t=120ms
        // changed nothing, so the reader gives up at t=160ms, not t=220ms.
        loop {
            match pump.lobby.recv().await.expect("lobby channel closed") {
                LobbyEvent::SocketClosed { .. } => break,
                _ => continue,
            }
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(160), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(220), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn activity_resets_the_idle_clock() {
        let mut pump = start_pump(SocketConfig {
            ping_period: Duration::from_secs(1800),
            pong_period: Duration::from_secs(3600),
            idle_period: Duration::from_millis(100),
            http_ping_period: Duration::from_secs(3600),
            debug: false,
        });

        // Traffic lands inside the first idle window, so the first tick only
        // clears the flag; the second tick, with no new traffic, warns.
        let start = tokio::time::Instant::now();
        tokio::time::sleep(Duration::from_millis(40)).await;
        pump.client_in
            .unbounded_send(Ok(WsMessage::text(r#"{"type":20}"#)))
            .unwrap();
        let _ = next_recv(&mut pump.lobby).await;

        let frame = pump.client_out.next().await.unwrap();
        let message = text_of(&frame);
        assert_eq!(MessageType::SocketWarning, message.message_type);
        assert!(start.elapsed() >= Duration::from_millis(200));

        pump.cancel.cancel();
    }
}
