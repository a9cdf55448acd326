//! The actor that owns one game: the rules state, the seated players'
//! sockets, and the dice.

use crate::lobby::LobbyEvent;
use crate::socket::SocketHandle;
use crate::users::UserStore;
use bananas::game::{GameConfig, GameError, GameInfo, GameState, JoinOutcome};
use bananas::messages::{GameId, Message, MessageType, PlayerName};
use bananas::tile::{Tile, TilePosition};
use bananas::words::WordSet;
use rand_pcg::Pcg64Mcg;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

/// Capacity of a game's inbound mailbox.
const MAILBOX_CAPACITY: usize = 64;

/// Mail handled by a game task. Most kinds carry the requesting player, whose
/// name the socket layer stamped on the way in.
#[derive(Debug)]
pub enum GameCommand {
    Join {
        player: PlayerName,
        socket: SocketHandle,
    },
    Start {
        player: PlayerName,
    },
    Finish {
        player: PlayerName,
    },
    Snag {
        player: PlayerName,
    },
    Swap {
        player: PlayerName,
        tile: Tile,
    },
    Move {
        player: PlayerName,
        positions: Vec<TilePosition>,
    },
    Refresh {
        player: PlayerName,
    },
    Chat {
        player: PlayerName,
        text: String,
    },
    /// A lobby-listing request; the summary goes back on `reply`, which the
    /// lobby sized to hold every game's answer.
    Info {
        player: PlayerName,
        reply: mpsc::Sender<GameInfo>,
    },
    /// The player walked away from this game; their socket stays up.
    Leave {
        player: PlayerName,
    },
    /// The player's socket is gone or they quit the server.
    RemovePlayer {
        player: PlayerName,
    },
    /// Tear the game down, telling everyone why.
    Delete {
        reason: String,
    },
}

/// Cheap address of a running game.
#[derive(Debug, Clone)]
pub struct GameHandle {
    id: GameId,
    tx: mpsc::Sender<GameCommand>,
}

impl GameHandle {
    pub fn id(&self) -> GameId {
        self.id
    }

    /// Delivers a command, waiting for mailbox space. False means the game is
    /// gone and the caller should drop this handle.
    pub async fn send(&self, command: GameCommand) -> bool {
        self.tx.send(command).await.is_ok()
    }
}

/// Everything a new game needs besides its identity.
#[derive(Clone)]
pub struct GameDeps {
    pub config: GameConfig,
    /// A full period with no player traffic deletes the game.
    pub idle_period: Duration,
    pub word_set: Arc<WordSet>,
    pub users: Arc<dyn UserStore>,
}

pub struct GameActor {
    state: GameState,
    rng: Pcg64Mcg,
    sockets: HashMap<PlayerName, SocketHandle>,
    word_set: Arc<WordSet>,
    users: Arc<dyn UserStore>,
    lobby: mpsc::Sender<LobbyEvent>,
    rx: mpsc::Receiver<GameCommand>,
    idle_period: Duration,
    cancel: CancellationToken,
    /// True when some player-driven command arrived since the last idle tick.
    active: bool,
}

impl GameActor {
    /// Spawns the actor task for `state` and returns its address.
    pub fn spawn(
        state: GameState,
        rng: Pcg64Mcg,
        deps: &GameDeps,
        lobby: mpsc::Sender<LobbyEvent>,
        cancel: CancellationToken,
    ) -> GameHandle {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let id = state.id();
        let actor = GameActor {
            state,
            rng,
            sockets: HashMap::new(),
            word_set: Arc::clone(&deps.word_set),
            users: Arc::clone(&deps.users),
            lobby,
            rx,
            idle_period: deps.idle_period,
            cancel,
            active: false,
        };
        tokio::spawn(actor.run().instrument(info_span!("game", %id)));
        GameHandle { id, tx }
    }

    async fn run(mut self) {
        let mut idle = interval_at(
            Instant::now() + self.idle_period,
            self.idle_period,
        );
        loop {
            tokio::select! {
                // Mailbox first: a Delete already queued by the lobby's
                // shutdown fan-out still reaches the players even when the
                // top-level token is cancelled right after.
                biased;
                command = self.rx.recv() => {
                    let Some(command) = command else { break };
                    if self.handle(command).await {
                        break;
                    }
                }
                _ = self.cancel.cancelled() => break,
                _ = idle.tick() => {
                    if !self.active {
                        info!("game idled out");
                        self.delete("the game was idle too long".to_owned()).await;
                        break;
                    }
                    self.active = false;
                }
            }
        }
    }

    /// Handles one command; true means the actor should stop.
    async fn handle(&mut self, command: GameCommand) -> bool {
        // Listing requests are not player traffic and do not keep an
        // abandoned game alive.
        if !matches!(command, GameCommand::Info { .. }) {
            self.active = true;
        }

        match command {
            GameCommand::Info { player, reply } => {
                let _ = reply.try_send(self.state.info(&player));
                false
            }
            GameCommand::Delete { reason } => {
                self.delete(reason).await;
                true
            }
            GameCommand::Join { player, socket } => self.join(player, socket).await,
            GameCommand::Start { player } => {
                self.start(player);
                false
            }
            GameCommand::Finish { player } => self.finish(player).await,
            GameCommand::Snag { player } => {
                self.snag(player);
                false
            }
            GameCommand::Swap { player, tile } => {
                self.swap(player, tile);
                false
            }
            GameCommand::Move { player, positions } => {
                self.move_tiles(player, &positions);
                false
            }
            GameCommand::Refresh { player } => {
                self.refresh(player);
                false
            }
            GameCommand::Chat { player, text } => {
                self.broadcast(Message {
                    info: Some(format!("{player}: {text}")),
                    ..Message::new(MessageType::Chat)
                });
                false
            }
            GameCommand::Leave { player } => self.unseat(player, true).await,
            GameCommand::RemovePlayer { player } => self.unseat(player, false).await,
        }
    }

    async fn join(&mut self, player: PlayerName, socket: SocketHandle) -> bool {
        let id = self.state.id();
        match self.state.join(&player) {
            Ok(JoinOutcome::Joined(tiles)) => {
                self.sockets.insert(player.clone(), socket);
                self.send_to(
                    &player,
                    Message {
                        info: Some(format!("joined game {id}")),
                        tiles: Some(tiles),
                        tiles_left: Some(self.state.tiles_left()),
                        game_id: Some(id),
                        game_status: Some(self.state.status()),
                        game_players: Some(self.state.player_names()),
                        ..Message::new(MessageType::Join)
                    },
                );
                self.broadcast_except(
                    &player,
                    Message {
                        info: Some(format!("{player} joined the game")),
                        game_players: Some(self.state.player_names()),
                        ..Message::new(MessageType::SocketInfo)
                    },
                );
                false
            }
            Ok(JoinOutcome::Rejoined) => {
                // A fresh socket may be carrying the seat now; keep the
                // newest one.
                self.sockets.insert(player.clone(), socket);
                let board = self
                    .state
                    .board(&player)
                    .expect("a rejoining player has a board");
                let snapshot = Message {
                    info: Some(format!("rejoining game {id}")),
                    tiles: Some(board.unused()),
                    tile_positions: Some(board.used()),
                    tiles_left: Some(self.state.tiles_left()),
                    game_id: Some(id),
                    game_status: Some(self.state.status()),
                    game_players: Some(self.state.player_names()),
                    ..Message::new(MessageType::Join)
                };
                self.send_to(&player, snapshot);
                false
            }
            Err(GameError::OutOfTiles) => {
                // The bag can no longer hand out a full starting rack; the
                // game is unsalvageable.
                self.delete("the bag ran out of tiles for new players".to_owned())
                    .await;
                true
            }
            Err(err) => {
                socket.send(Message::socket_error(err.to_string()));
                false
            }
        }
    }

    fn start(&mut self, player: PlayerName) {
        match self.state.start(&player) {
            Ok(()) => self.broadcast(Message {
                info: Some(format!("{player} started the game")),
                game_status: Some(self.state.status()),
                game_players: Some(self.state.player_names()),
                tiles_left: Some(self.state.tiles_left()),
                ..Message::new(MessageType::StatusChange)
            }),
            Err(err) => self.send_to(&player, Message::socket_error(err.to_string())),
        }
    }

    async fn finish(&mut self, player: PlayerName) -> bool {
        match self.state.finish(&player, &self.word_set) {
            Ok(points) => {
                let win_points = points.get(&player).copied().unwrap_or_default();
                if let Err(err) = self.users.increment_points(&points) {
                    error!(%err, "failed to record points");
                    self.broadcast(Message::socket_error(format!(
                        "recording points failed: {err}"
                    )));
                }
                self.broadcast(Message {
                    info: Some(format!(
                        "{player} won the game, scoring {win_points} points"
                    )),
                    game_status: Some(self.state.status()),
                    game_players: Some(self.state.player_names()),
                    ..Message::new(MessageType::StatusChange)
                });
                self.close().await;
                true
            }
            Err(err) => {
                self.send_to(&player, Message::socket_error(err.to_string()));
                false
            }
        }
    }

    fn snag(&mut self, player: PlayerName) {
        match self.state.snag(&player, &mut self.rng) {
            Ok(allocations) => {
                let tiles_left = self.state.tiles_left();
                for (name, tile) in allocations {
                    let info = if name == player {
                        "you snagged a tile".to_owned()
                    } else {
                        format!("{player} snagged, a tile goes to everyone")
                    };
                    self.send_to(
                        &name,
                        Message {
                            info: Some(info),
                            tiles: Some(vec![tile]),
                            tiles_left: Some(tiles_left),
                            ..Message::new(MessageType::Snag)
                        },
                    );
                }
            }
            Err(GameError::EmptyBag) => {
                self.send_to(
                    &player,
                    Message::socket_info("the bag is empty, no tiles to snag"),
                );
            }
            Err(err) => self.send_to(&player, Message::socket_error(err.to_string())),
        }
    }

    fn swap(&mut self, player: PlayerName, tile: Tile) {
        match self.state.swap(&player, tile.id, &mut self.rng) {
            Ok(replacements) => {
                let tiles_left = self.state.tiles_left();
                self.send_to(
                    &player,
                    Message {
                        info: Some(format!("swapped a {}", tile.letter)),
                        tiles: Some(replacements),
                        tiles_left: Some(tiles_left),
                        ..Message::new(MessageType::Swap)
                    },
                );
                self.broadcast_except(
                    &player,
                    Message {
                        info: Some(format!("{player} swapped a tile")),
                        tiles_left: Some(tiles_left),
                        ..Message::new(MessageType::SocketInfo)
                    },
                );
            }
            Err(err) => self.send_to(&player, Message::socket_error(err.to_string())),
        }
    }

    fn move_tiles(&mut self, player: PlayerName, positions: &[TilePosition]) {
        // The client already shows the move; only failures need a reply.
        if let Err(err) = self.state.move_tiles(&player, positions) {
            self.send_to(&player, Message::socket_error(err.to_string()));
        }
    }

    fn refresh(&mut self, player: PlayerName) {
        let Some(board) = self.state.board(&player) else {
            self.send_to(
                &player,
                Message::socket_error(GameError::UnknownPlayer(player.clone()).to_string()),
            );
            return;
        };
        let snapshot = Message {
            tiles: Some(board.unused()),
            tile_positions: Some(board.used()),
            tiles_left: Some(self.state.tiles_left()),
            game_status: Some(self.state.status()),
            ..Message::new(MessageType::BoardRefresh)
        };
        self.send_to(&player, snapshot);
    }

    /// Removes a seat. When the player walked away on purpose (`leaving`)
    /// their socket is told so its writer forgets this game.
    async fn unseat(&mut self, player: PlayerName, leaving: bool) -> bool {
        let socket = self.sockets.remove(&player);
        if !self.state.contains_player(&player) {
            return false;
        }

        if leaving {
            if let Some(socket) = &socket {
                socket.send(Message {
                    info: Some(format!("left game {}", self.state.id())),
                    ..Message::new(MessageType::Leave)
                });
            }
        }
        let empty = self.state.remove_player(&player);
        self.broadcast(Message {
            info: Some(format!("{player} left the game")),
            game_players: Some(self.state.player_names()),
            ..Message::new(MessageType::SocketInfo)
        });

        if empty {
            debug!("last player left");
            self.close().await;
            return true;
        }
        false
    }

    /// Tears the game down, telling every seated player why. Delete is a
    /// terminal message and always enqueues.
    async fn delete(&mut self, reason: String) {
        let message = Message {
            info: Some(reason),
            ..Message::new(MessageType::Delete)
        };
        for socket in self.sockets.values() {
            socket.send_critical(message.clone()).await;
        }
        self.close().await;
    }

    async fn close(&mut self) {
        let _ = self
            .lobby
            .send(LobbyEvent::GameClosed {
                id: self.state.id(),
            })
            .await;
    }

    fn send_to(&self, player: &PlayerName, message: Message) {
        if let Some(socket) = self.sockets.get(player) {
            socket.send(message);
        }
    }

    fn broadcast(&self, message: Message) {
        for socket in self.sockets.values() {
            socket.send(message.clone());
        }
    }

    fn broadcast_except(&self, skip: &PlayerName, message: Message) {
        for (name, socket) in &self.sockets {
            if name != skip {
                socket.send(message.clone());
            }
        }
    }
}
