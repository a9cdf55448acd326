//! The single actor owning the fleet of games and the set of connected
//! sockets. Inbound traffic from every socket lands here and is either
//! handled locally (create, join, listings) or forwarded to the right game.

use crate::clock::Clock;
use crate::game::{GameActor, GameCommand, GameDeps, GameHandle};
use crate::socket::{SocketHandle, SocketId};
use bananas::game::{GameState, GameStatus};
use bananas::messages::{GameId, Message, MessageType, PlayerName};
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Capacity of the lobby's inbound mailbox.
const MAILBOX_CAPACITY: usize = 64;

/// Longest the lobby will wait on games answering a listing request.
const INFOS_GATHER_WAIT: Duration = Duration::from_secs(1);

/// Fleet limits.
#[derive(Debug, Clone, Copy)]
pub struct LobbyConfig {
    pub max_games: usize,
    pub max_sockets: usize,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            max_games: 4,
            max_sockets: 32,
        }
    }
}

/// Mail handled by the lobby task.
#[derive(Debug)]
pub enum LobbyEvent {
    /// A freshly upgraded connection; displaces any socket the player already
    /// had.
    SocketAdd { handle: SocketHandle },
    /// One decoded (or synthesized) message from a socket's reader.
    Recv {
        player: PlayerName,
        message: Message,
    },
    /// A socket's pump finished; reclaim the player unless a newer socket
    /// already took the seat.
    SocketClosed { id: SocketId, player: PlayerName },
    /// A game's actor is done.
    GameClosed { id: GameId },
    /// Stop everything: every socket is deleted, every game torn down.
    /// `done` fires once the terminal fan-out has been enqueued everywhere,
    /// so the caller knows it is safe to cancel the rest of the system.
    Shutdown { done: oneshot::Sender<()> },
}

pub struct Lobby {
    config: LobbyConfig,
    deps: GameDeps,
    clock: Arc<dyn Clock>,
    games: HashMap<GameId, GameHandle>,
    sockets: HashMap<PlayerName, SocketHandle>,
    rx: mpsc::Receiver<LobbyEvent>,
    /// Handed to games and sockets so their events find their way back.
    tx: mpsc::Sender<LobbyEvent>,
    cancel: CancellationToken,
}

impl Lobby {
    /// Spawns the lobby task and returns its address.
    pub fn spawn(
        config: LobbyConfig,
        deps: GameDeps,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> mpsc::Sender<LobbyEvent> {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let lobby = Lobby {
            config,
            deps,
            clock,
            games: HashMap::new(),
            sockets: HashMap::new(),
            rx,
            tx: tx.clone(),
            cancel,
        };
        tokio::spawn(lobby.run().instrument(info_span!("lobby")));
        tx
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.shutdown().await;
                    break;
                }
                event = self.rx.recv() => {
                    let Some(event) = event else { break };
                    if self.handle(event).await {
                        break;
                    }
                }
            }
        }
    }

    /// Handles one event; true means the lobby should stop.
    async fn handle(&mut self, event: LobbyEvent) -> bool {
        match event {
            LobbyEvent::SocketAdd { handle } => {
                self.add_socket(handle).await;
                false
            }
            LobbyEvent::Recv { player, message } => {
                self.route(player, message).await;
                false
            }
            LobbyEvent::SocketClosed { id, player } => {
                self.socket_closed(id, player).await;
                false
            }
            LobbyEvent::GameClosed { id } => {
                self.games.remove(&id);
                debug!(game = %id, "game closed");
                false
            }
            LobbyEvent::Shutdown { done } => {
                self.shutdown().await;
                let _ = done.send(());
                true
            }
        }
    }

    async fn add_socket(&mut self, handle: SocketHandle) {
        let replacing = self.sockets.contains_key(handle.name());
        if !replacing && self.sockets.len() >= self.config.max_sockets {
            warn!(player = %handle.name(), "socket limit reached");
            handle.send(Message::socket_error(
                "the server is full, try again later",
            ));
            handle.send_critical(Message::player_delete()).await;
            return;
        }

        info!(player = %handle.name(), socket = %handle.id(), "socket connected");
        if let Some(old) = self.sockets.insert(handle.name().clone(), handle) {
            debug!(player = %old.name(), socket = %old.id(), "displacing old socket");
            old.send_critical(Message::player_delete()).await;
        }
    }

    async fn route(&mut self, player: PlayerName, message: Message) {
        match message.message_type {
            MessageType::Create => self.create_game(player).await,
            MessageType::Join => {
                let Some(id) = message.game_id else {
                    self.send_to(&player, Message::socket_error("join names no game"));
                    return;
                };
                self.join_game(player, id).await;
            }
            MessageType::GetInfos => self.game_infos(player).await,
            MessageType::Delete => self.delete_game(player, message.game_id).await,
            MessageType::PlayerDelete => self.player_delete(player).await,
            // Reader-synthesized decode complaints route back to the sender.
            MessageType::SocketError => self.send_to(&player, message),
            MessageType::StatusChange
            | MessageType::Snag
            | MessageType::Swap
            | MessageType::TilesMoved
            | MessageType::BoardRefresh
            | MessageType::Chat
            | MessageType::Leave => self.forward(player, message).await,
            other => {
                debug!(%player, ?other, "message type the lobby does not accept");
                self.send_to(
                    &player,
                    Message::socket_error(format!("unexpected message type {:?}", other)),
                );
            }
        }
    }

    async fn create_game(&mut self, player: PlayerName) {
        if self.games.len() >= self.config.max_games {
            self.send_to(
                &player,
                Message::socket_error("the game limit has been reached, try again later"),
            );
            return;
        }

        let id = self.next_game_id();
        let mut rng = Pcg64Mcg::from_entropy();
        let state = GameState::new(id, self.clock.now_seconds(), self.deps.config, &mut rng);
        let handle = GameActor::spawn(
            state,
            rng,
            &self.deps,
            self.tx.clone(),
            self.cancel.child_token(),
        );
        self.games.insert(id, handle);
        info!(game = %id, %player, "created game");

        // Seat the creator straight away.
        self.join_game(player, id).await;
    }

    /// The smallest positive id no live game holds.
    fn next_game_id(&self) -> GameId {
        let mut id = 1;
        while self.games.contains_key(&GameId::new(id)) {
            id += 1;
        }
        GameId::new(id)
    }

    async fn join_game(&mut self, player: PlayerName, id: GameId) {
        let Some(socket) = self.sockets.get(&player) else {
            debug!(%player, "join from a player with no socket");
            return;
        };
        let command = GameCommand::Join {
            player: player.clone(),
            socket: socket.clone(),
        };
        self.forward_command(player, id, command).await;
    }

    async fn forward(&mut self, player: PlayerName, message: Message) {
        let Some(id) = message.game_id else {
            self.send_to(
                &player,
                Message::socket_error("not in a game, join one first"),
            );
            return;
        };
        let Some(command) = command_for(player.clone(), &message) else {
            self.send_to(&player, Message::socket_error("malformed message"));
            return;
        };
        self.forward_command(player, id, command).await;
    }

    async fn forward_command(&mut self, player: PlayerName, id: GameId, command: GameCommand) {
        let missing = match self.games.get(&id) {
            None => true,
            Some(game) => {
                if game.send(command).await {
                    return;
                }
                // The game died without telling us; forget it.
                self.games.remove(&id);
                true
            }
        };
        if missing {
            self.send_to(
                &player,
                Message::socket_error(format!("no game with id {id}, please refresh games")),
            );
        }
    }

    async fn game_infos(&mut self, player: PlayerName) {
        let (reply, mut gathered) = mpsc::channel(self.games.len().max(1));
        let mut dead = Vec::new();
        for (id, game) in &self.games {
            let request = GameCommand::Info {
                player: player.clone(),
                reply: reply.clone(),
            };
            if !game.send(request).await {
                dead.push(*id);
            }
        }
        drop(reply);
        for id in dead {
            self.games.remove(&id);
        }

        // Collect until every live game has answered and dropped its sender.
        // The deadline covers a game wedged on a full mailbox elsewhere.
        let mut infos = Vec::new();
        let _ = timeout(INFOS_GATHER_WAIT, async {
            while let Some(info) = gathered.recv().await {
                infos.push(info);
            }
        })
        .await;

        infos.sort_by_key(|info| (info.created_at, info.id));
        self.send_to(
            &player,
            Message {
                game_infos: Some(infos),
                ..Message::new(MessageType::Infos)
            },
        );
    }

    async fn delete_game(&mut self, player: PlayerName, id: Option<GameId>) {
        let Some(id) = id else {
            self.send_to(&player, Message::socket_error("delete names no game"));
            return;
        };
        let Some(game) = self.games.remove(&id) else {
            self.send_to(
                &player,
                Message::socket_error(format!("no game with id {id}, please refresh games")),
            );
            return;
        };
        info!(game = %id, %player, "deleting game");
        game.send(GameCommand::Delete {
            reason: format!("{player} deleted the game"),
        })
        .await;
    }

    /// The player asked to be deleted: every game forgets them, and their
    /// socket is told to close.
    async fn player_delete(&mut self, player: PlayerName) {
        for game in self.games.values() {
            game.send(GameCommand::RemovePlayer {
                player: player.clone(),
            })
            .await;
        }
        if let Some(socket) = self.sockets.remove(&player) {
            socket.send_critical(Message::player_delete()).await;
        }
    }

    async fn socket_closed(&mut self, id: SocketId, player: PlayerName) {
        let current = self.sockets.get(&player).map(SocketHandle::id);
        if current != Some(id) {
            // A displaced socket winding down; the player lives on through
            // the one that replaced it.
            debug!(%player, socket = %id, "stale socket closed");
            return;
        }

        info!(%player, socket = %id, "socket closed");
        self.sockets.remove(&player);
        for game in self.games.values() {
            game.send(GameCommand::RemovePlayer {
                player: player.clone(),
            })
            .await;
        }
    }

    async fn shutdown(&mut self) {
        info!("lobby shutting down");
        for (_, socket) in self.sockets.drain() {
            socket.send_critical(Message::player_delete()).await;
        }
        for (_, game) in self.games.drain() {
            game.send(GameCommand::Delete {
                reason: "the server is shutting down".to_owned(),
            })
            .await;
        }
    }

    fn send_to(&self, player: &PlayerName, message: Message) {
        if let Some(socket) = self.sockets.get(player) {
            socket.send(message);
        }
    }
}

/// Translates a game-bound wire message into the game's command, or nothing
/// when a required payload is missing.
fn command_for(player: PlayerName, message: &Message) -> Option<GameCommand> {
    match message.message_type {
        MessageType::StatusChange => match message.game_status? {
            GameStatus::InProgress => Some(GameCommand::Start { player }),
            GameStatus::Finished => Some(GameCommand::Finish { player }),
            GameStatus::NotStarted => None,
        },
        MessageType::Snag => Some(GameCommand::Snag { player }),
        MessageType::Swap => {
            let tile = *message.tiles.as_ref()?.first()?;
            Some(GameCommand::Swap { player, tile })
        }
        MessageType::TilesMoved => {
            let positions = message.tile_positions.clone()?;
            Some(GameCommand::Move { player, positions })
        }
        MessageType::BoardRefresh => Some(GameCommand::Refresh { player }),
        MessageType::Chat => Some(GameCommand::Chat {
            player,
            text: message.info.clone().unwrap_or_default(),
        }),
        MessageType::Leave => Some(GameCommand::Leave { player }),
        _ => None,
    }
}
