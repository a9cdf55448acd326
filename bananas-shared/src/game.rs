//! The rules engine for one game, free of any I/O.
//!
//! The owning server task feeds [`GameState`] one player request at a time
//! and forwards the outcomes; all randomness comes through an injected
//! [`Rng`], so a seeded generator reproduces a whole game from the same
//! request trace.

use crate::board::{Board, BoardError};
use crate::messages::{GameId, PlayerName};
use crate::tile::{Tile, TileBag, TileId, TilePosition};
use crate::words::WordSet;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::debug;

/// How many replacement tiles a swap pays out, bag permitting.
const SWAP_REPLACEMENTS: usize = 3;

/// Where a game is in its life. The integer values are fixed for client
/// compatibility. Status only ever advances NotStarted -> InProgress ->
/// Finished; Finished is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum GameStatus {
    InProgress = 1,
    Finished = 2,
    NotStarted = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown game status {0}")]
pub struct UnknownGameStatus(pub u8);

impl From<GameStatus> for u8 {
    fn from(status: GameStatus) -> u8 {
        status as u8
    }
}

impl TryFrom<u8> for GameStatus {
    type Error = UnknownGameStatus;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => GameStatus::InProgress,
            2 => GameStatus::Finished,
            3 => GameStatus::NotStarted,
            other => return Err(UnknownGameStatus(other)),
        })
    }
}

/// A lobby-listing summary of one game, shaped for the asking player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameInfo {
    pub id: GameId,
    pub status: GameStatus,
    pub players: Vec<PlayerName>,
    #[serde(rename = "canJoin")]
    pub can_join: bool,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct GameConfig {
    /// Most players that can sit in one game.
    pub max_players: usize,
    /// Tiles dealt to a player when they first join.
    pub num_new_tiles: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            max_players: 8,
            num_new_tiles: 21,
        }
    }
}

/// Why a game rejected a player's request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("game {0} has already started")]
    AlreadyStarted(GameId),
    #[error("game {0} is full")]
    GameFull(GameId),
    #[error("the bag does not hold enough tiles for a new player")]
    OutOfTiles,
    #[error("at least two players are needed to start the game")]
    NotEnoughPlayers,
    #[error("the game is not in progress")]
    NotInProgress,
    #[error("the bag is empty")]
    EmptyBag,
    #[error("you are not in this game")]
    UnknownPlayer(PlayerName),
    #[error("a tile move carries one or two positions")]
    MalformedMove,
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error(transparent)]
    Finish(#[from] FinishError),
}

/// A rejected claim that the game is won. Each failed claim costs the
/// claimant a win point.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FinishError {
    #[error("snag first, the bag still has tiles")]
    BagNotEmpty,
    #[error("keep playing, all your tiles must be on the board")]
    UnusedTiles,
    #[error("keep playing, your tiles must form a single group")]
    NotOneGroup,
    #[error("invalid words: [{}]", .0.join(", "))]
    InvalidWords(Vec<String>),
}

/// What a join produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A fresh seat; the tiles are the player's starting hand.
    Joined(Vec<Tile>),
    /// The player was already seated; nothing was drawn.
    Rejoined,
}

#[derive(Debug, Clone)]
pub struct GameState {
    id: GameId,
    created_at: i64,
    status: GameStatus,
    bag: TileBag,
    /// Seated players. A BTreeMap so every scan over players is ordered and
    /// a seeded game replays identically.
    boards: BTreeMap<PlayerName, Board>,
    config: GameConfig,
}

impl GameState {
    /// A new game over a freshly shuffled full bag.
    pub fn new(id: GameId, created_at: i64, config: GameConfig, rng: &mut impl Rng) -> Self {
        Self::with_bag(id, created_at, config, TileBag::new(rng))
    }

    /// A new game over a caller-supplied bag, for scripted play.
    pub fn with_bag(id: GameId, created_at: i64, config: GameConfig, bag: TileBag) -> Self {
        Self {
            id,
            created_at,
            status: GameStatus::NotStarted,
            bag,
            boards: BTreeMap::new(),
            config,
        }
    }

    pub fn id(&self) -> GameId {
        self.id
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn status(&self) -> GameStatus {
        self.status
    }

    pub fn tiles_left(&self) -> usize {
        self.bag.len()
    }

    pub fn player_names(&self) -> Vec<PlayerName> {
        self.boards.keys().cloned().collect()
    }

    pub fn player_count(&self) -> usize {
        self.boards.len()
    }

    pub fn contains_player(&self, player: &PlayerName) -> bool {
        self.boards.contains_key(player)
    }

    pub fn board(&self, player: &PlayerName) -> Option<&Board> {
        self.boards.get(player)
    }

    /// Seats a player, dealing their starting hand. A player who is already
    /// seated rejoins without drawing, whatever the status.
    pub fn join(&mut self, player: &PlayerName) -> Result<JoinOutcome, GameError> {
        if self.boards.contains_key(player) {
            return Ok(JoinOutcome::Rejoined);
        }
        if self.status != GameStatus::NotStarted {
            return Err(GameError::AlreadyStarted(self.id));
        }
        if self.boards.len() >= self.config.max_players {
            return Err(GameError::GameFull(self.id));
        }
        if self.bag.len() < self.config.num_new_tiles {
            return Err(GameError::OutOfTiles);
        }

        let tiles = self.bag.draw(self.config.num_new_tiles);
        let mut board = Board::new();
        board
            .add_unused(tiles.iter().copied())
            .expect("a fresh board cannot hold duplicates");
        self.boards.insert(player.clone(), board);
        debug!(game = %self.id, %player, hand = tiles.len(), "player joined");
        Ok(JoinOutcome::Joined(tiles))
    }

    /// Moves the game to InProgress.
    pub fn start(&mut self, player: &PlayerName) -> Result<(), GameError> {
        if !self.boards.contains_key(player) {
            return Err(GameError::UnknownPlayer(player.clone()));
        }
        if self.status != GameStatus::NotStarted {
            return Err(GameError::AlreadyStarted(self.id));
        }
        if self.boards.len() < 2 {
            return Err(GameError::NotEnoughPlayers);
        }

        self.status = GameStatus::InProgress;
        debug!(game = %self.id, "game started");
        Ok(())
    }

    /// One tile to the snagger, then one to every other seated player in a
    /// shuffled order while the bag holds out. Returns who got what.
    pub fn snag(
        &mut self,
        player: &PlayerName,
        rng: &mut impl Rng,
    ) -> Result<Vec<(PlayerName, Tile)>, GameError> {
        if self.status != GameStatus::InProgress {
            return Err(GameError::NotInProgress);
        }
        if !self.boards.contains_key(player) {
            return Err(GameError::UnknownPlayer(player.clone()));
        }
        if self.bag.is_empty() {
            return Err(GameError::EmptyBag);
        }

        let mut allocations = Vec::with_capacity(self.boards.len());
        let tile = self.bag.draw_one().expect("the bag was checked non-empty");
        self.give(player, tile);
        allocations.push((player.clone(), tile));

        let mut others: Vec<PlayerName> = self
            .boards
            .keys()
            .filter(|name| *name != player)
            .cloned()
            .collect();
        others.shuffle(rng);
        for name in others {
            let Some(tile) = self.bag.draw_one() else {
                break;
            };
            self.give(&name, tile);
            allocations.push((name, tile));
        }
        Ok(allocations)
    }

    /// Returns one owned tile to the bag in exchange for up to three
    /// replacements. The bag is reshuffled with the returned tile in it.
    pub fn swap(
        &mut self,
        player: &PlayerName,
        id: TileId,
        rng: &mut impl Rng,
    ) -> Result<Vec<Tile>, GameError> {
        if self.status != GameStatus::InProgress {
            return Err(GameError::NotInProgress);
        }
        if !self.boards.contains_key(player) {
            return Err(GameError::UnknownPlayer(player.clone()));
        }
        if self.bag.is_empty() {
            return Err(GameError::EmptyBag);
        }

        let tile = self
            .boards
            .get_mut(player)
            .expect("seat checked above")
            .remove(id)?;
        self.bag.return_and_reshuffle(tile, rng);

        let replacements = self.bag.draw(SWAP_REPLACEMENTS);
        self.boards
            .get_mut(player)
            .expect("seat checked above")
            .add_unused(replacements.iter().copied())
            .expect("drawn tiles cannot already be on a board");
        debug!(game = %self.id, %player, returned = %tile.id, drawn = replacements.len(), "tile swapped");
        Ok(replacements)
    }

    /// A single position places a hand tile at that cell; a pair moves a
    /// placed tile, the first naming the tile and the second the destination.
    pub fn move_tiles(
        &mut self,
        player: &PlayerName,
        positions: &[TilePosition],
    ) -> Result<(), GameError> {
        if self.status != GameStatus::InProgress {
            return Err(GameError::NotInProgress);
        }
        let board = self
            .boards
            .get_mut(player)
            .ok_or_else(|| GameError::UnknownPlayer(player.clone()))?;

        match positions {
            [pos] => board.move_from_pile_to_grid(pos.tile.id, pos.x, pos.y)?,
            [from, to] => board.move_within_grid(from.tile.id, to.x, to.y)?,
            _ => return Err(GameError::MalformedMove),
        }
        Ok(())
    }

    /// Validates a claim that `player` has won. On success the game is
    /// Finished and the returned map holds each player's point award; on a
    /// failed check the claimant loses a win point and the check is reported.
    pub fn finish(
        &mut self,
        player: &PlayerName,
        words: &WordSet,
    ) -> Result<HashMap<PlayerName, u64>, GameError> {
        if self.status != GameStatus::InProgress {
            return Err(GameError::NotInProgress);
        }
        if !self.boards.contains_key(player) {
            return Err(GameError::UnknownPlayer(player.clone()));
        }

        if let Err(err) = self.check_finished(player, words) {
            self.boards
                .get_mut(player)
                .expect("seat checked above")
                .lower_win_points();
            debug!(game = %self.id, %player, %err, "finish claim rejected");
            return Err(err.into());
        }

        self.status = GameStatus::Finished;
        let win_points = u64::from(self.boards[player].win_points());
        debug!(game = %self.id, winner = %player, win_points, "game finished");
        Ok(self
            .boards
            .keys()
            .map(|name| {
                let points = if name == player { win_points } else { 1 };
                (name.clone(), points)
            })
            .collect())
    }

    fn check_finished(&self, player: &PlayerName, words: &WordSet) -> Result<(), FinishError> {
        let board = &self.boards[player];
        if !self.bag.is_empty() {
            return Err(FinishError::BagNotEmpty);
        }
        if board.unused_len() > 0 {
            return Err(FinishError::UnusedTiles);
        }
        if !board.is_single_group() {
            return Err(FinishError::NotOneGroup);
        }
        let invalid: Vec<String> = board
            .used_words()
            .into_iter()
            .filter(|word| !words.contains(word))
            .collect();
        if !invalid.is_empty() {
            return Err(FinishError::InvalidWords(invalid));
        }
        Ok(())
    }

    /// Unseats a player, returning their tiles (hand first, then the grid in
    /// scan order) to the back of the bag so the tile census stays whole.
    /// The returned flag is true when the game is now empty.
    pub fn remove_player(&mut self, player: &PlayerName) -> bool {
        if let Some(board) = self.boards.remove(player) {
            let mut tiles = board.unused();
            tiles.extend(board.used().iter().map(|pos| pos.tile));
            self.bag.append(tiles);
            debug!(game = %self.id, %player, "player removed");
        }
        self.boards.is_empty()
    }

    /// A lobby-listing summary shaped for `asker`: a game is joinable before
    /// it starts, or at any time by someone already seated.
    pub fn info(&self, asker: &PlayerName) -> GameInfo {
        GameInfo {
            id: self.id,
            status: self.status,
            players: self.player_names(),
            can_join: self.status == GameStatus::NotStarted || self.boards.contains_key(asker),
            created_at: self.created_at,
        }
    }

    fn give(&mut self, player: &PlayerName, tile: Tile) {
        self.boards
            .get_mut(player)
            .expect("allocations only target seated players")
            .add_unused([tile])
            .expect("a drawn tile cannot already be on a board");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::{Letter, TILE_COUNT};
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;
    use std::collections::HashSet;

    const CREATED_AT: i64 = 1700000000;

    fn alice() -> PlayerName {
        PlayerName::from("alice")
    }

    fn bob() -> PlayerName {
        PlayerName::from("bob")
    }

    fn full_game(seed: u64) -> (GameState, Pcg64Mcg) {
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        let state = GameState::new(GameId::new(1), CREATED_AT, GameConfig::default(), &mut rng);
        (state, rng)
    }

    fn tile(id: u32, ch: char) -> Tile {
        Tile::new(TileId::new(id), Letter::new(ch).unwrap())
    }

    /// Every tile in the bag or on some board, exactly once.
    fn census(state: &GameState) -> Vec<TileId> {
        let mut ids: Vec<TileId> = state.bag.tiles().iter().map(|t| t.id).collect();
        for name in state.player_names() {
            let board = state.board(&name).unwrap();
            ids.extend(board.unused().iter().map(|t| t.id));
            ids.extend(board.used().iter().map(|p| p.tile.id));
        }
        ids.sort();
        ids
    }

    fn assert_conserved(state: &GameState, expected: usize) {
        let ids = census(state);
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(expected, ids.len(), "tiles vanished or duplicated");
        assert_eq!(expected, unique.len(), "tile ids collided");
    }

    #[test]
    fn joining_deals_a_fresh_hand() {
        let (mut state, _) = full_game(1);

        let outcome = state.join(&alice()).unwrap();
        let JoinOutcome::Joined(tiles) = outcome else {
            panic!("expected a fresh seat");
        };

        assert_eq!(21, tiles.len());
        assert_eq!(TILE_COUNT - 21, state.tiles_left());
        let ids: HashSet<_> = tiles.iter().map(|t| t.id).collect();
        assert_eq!(21, ids.len(), "dealt tiles must be distinct");
        assert_conserved(&state, TILE_COUNT);
    }

    #[test]
    fn rejoining_draws_nothing() {
        let (mut state, _) = full_game(1);
        state.join(&alice()).unwrap();

        assert_eq!(Ok(JoinOutcome::Rejoined), state.join(&alice()));
        assert_eq!(TILE_COUNT - 21, state.tiles_left());
        assert_conserved(&state, TILE_COUNT);
    }

    #[test]
    fn join_is_fenced_by_status_and_capacity() {
        let (mut state, _) = full_game(1);
        state.join(&alice()).unwrap();
        state.join(&bob()).unwrap();
        state.start(&alice()).unwrap();

        assert_eq!(
            Err(GameError::AlreadyStarted(GameId::new(1))),
            state.join(&PlayerName::from("carol")),
        );

        let (mut small, _) = full_game(1);
        let config = GameConfig {
            max_players: 1,
            ..GameConfig::default()
        };
        small.config = config;
        small.join(&alice()).unwrap();
        assert_eq!(Err(GameError::GameFull(GameId::new(1))), small.join(&bob()));
    }

    #[test]
    fn join_fails_when_the_bag_runs_dry() {
        let mut state = GameState::with_bag(
            GameId::new(1),
            CREATED_AT,
            GameConfig {
                max_players: 8,
                num_new_tiles: 3,
            },
            TileBag::from_tiles(vec![tile(1, 'A'), tile(2, 'B')]),
        );

        assert_eq!(Err(GameError::OutOfTiles), state.join(&alice()));
    }

    #[test]
    fn starting_needs_two_players() {
        let (mut state, _) = full_game(1);
        state.join(&alice()).unwrap();

        assert_eq!(Err(GameError::NotEnoughPlayers), state.start(&alice()));

        state.join(&bob()).unwrap();
        state.start(&alice()).unwrap();
        assert_eq!(GameStatus::InProgress, state.status());

        assert_eq!(
            Err(GameError::AlreadyStarted(GameId::new(1))),
            state.start(&alice()),
        );
    }

    #[test]
    fn snagging_feeds_every_player() {
        let (mut state, mut rng) = full_game(3);
        state.join(&alice()).unwrap();
        state.join(&bob()).unwrap();
        state.start(&alice()).unwrap();
        let before = state.tiles_left();

        let allocations = state.snag(&alice(), &mut rng).unwrap();

        assert_eq!(2, allocations.len());
        assert_eq!(alice(), allocations[0].0, "the snagger draws first");
        assert_eq!(bob(), allocations[1].0);
        assert_eq!(before - 2, state.tiles_left());
        assert_conserved(&state, TILE_COUNT);
    }

    #[test]
    fn snagging_an_empty_bag_changes_nothing() {
        let mut state = GameState::with_bag(
            GameId::new(1),
            CREATED_AT,
            GameConfig {
                max_players: 8,
                num_new_tiles: 2,
            },
            TileBag::from_tiles(vec![
                tile(1, 'A'),
                tile(2, 'B'),
                tile(3, 'C'),
                tile(4, 'D'),
            ]),
        );
        let mut rng = Pcg64Mcg::seed_from_u64(0);
        state.join(&alice()).unwrap();
        state.join(&bob()).unwrap();
        state.start(&alice()).unwrap();

        assert_eq!(Err(GameError::EmptyBag), state.snag(&alice(), &mut rng));
        assert_conserved(&state, 4);
    }

    #[test]
    fn swapping_returns_the_tile_and_pays_up_to_three() {
        let (mut state, mut rng) = full_game(4);
        state.join(&alice()).unwrap();
        state.join(&bob()).unwrap();
        state.start(&alice()).unwrap();

        let swapped = state.board(&alice()).unwrap().unused()[0];
        let before = state.tiles_left();

        let replacements = state.swap(&alice(), swapped.id, &mut rng).unwrap();

        assert_eq!(3, replacements.len());
        assert!(
            !state.board(&alice()).unwrap().has_tile(swapped.id),
            "the swapped tile left the hand",
        );
        // One tile in, three out.
        assert_eq!(before - 2, state.tiles_left());
        assert_eq!(21 + 2, state.board(&alice()).unwrap().unused_len());
        assert_conserved(&state, TILE_COUNT);
    }

    #[test]
    fn swapping_a_tile_you_do_not_hold_fails() {
        let (mut state, mut rng) = full_game(4);
        state.join(&alice()).unwrap();
        state.join(&bob()).unwrap();
        state.start(&alice()).unwrap();

        // Bob holds his own tiles; alice does not.
        let bobs = state.board(&bob()).unwrap().unused()[0];
        assert_eq!(
            Err(GameError::Board(BoardError::UnknownTile(bobs.id))),
            state.swap(&alice(), bobs.id, &mut rng),
        );
    }

    #[test]
    fn moves_are_rejected_before_the_game_starts() {
        let (mut state, _) = full_game(5);
        state.join(&alice()).unwrap();
        let held = state.board(&alice()).unwrap().unused()[0];

        assert_eq!(
            Err(GameError::NotInProgress),
            state.move_tiles(&alice(), &[TilePosition::new(held, 0, 0)]),
        );
    }

    #[test]
    fn move_payload_must_be_one_or_two_positions() {
        let (mut state, _) = full_game(5);
        state.join(&alice()).unwrap();
        state.join(&bob()).unwrap();
        state.start(&alice()).unwrap();
        let held = state.board(&alice()).unwrap().unused()[0];

        assert_eq!(
            Err(GameError::MalformedMove),
            state.move_tiles(&alice(), &[]),
        );
        let pos = TilePosition::new(held, 0, 0);
        assert_eq!(
            Err(GameError::MalformedMove),
            state.move_tiles(&alice(), &[pos, pos, pos]),
        );

        state.move_tiles(&alice(), &[pos]).unwrap();
        state
            .move_tiles(&alice(), &[pos, TilePosition::new(held, 4, 0)])
            .unwrap();
        assert_eq!(Some(held), state.board(&alice()).unwrap().tile_at(4, 0));
    }

    /// A scripted two-player game where alice can legally finish: her five
    /// tiles spell CAR across and CAT down from the shared C.
    fn finishable_game() -> (GameState, Pcg64Mcg) {
        let bag = TileBag::from_tiles(vec![
            tile(1, 'C'),
            tile(2, 'A'),
            tile(3, 'R'),
            tile(4, 'A'),
            tile(5, 'T'),
            tile(6, 'X'),
            tile(7, 'Z'),
            tile(8, 'E'),
            tile(9, 'E'),
            tile(10, 'E'),
        ]);
        let mut state = GameState::with_bag(
            GameId::new(1),
            CREATED_AT,
            GameConfig {
                max_players: 8,
                num_new_tiles: 5,
            },
            bag,
        );
        state.join(&alice()).unwrap();
        state.join(&bob()).unwrap();
        state.start(&alice()).unwrap();
        (state, Pcg64Mcg::seed_from_u64(0))
    }

    fn place(state: &mut GameState, player: &PlayerName, id: u32, ch: char, x: i16, y: i16) {
        state
            .move_tiles(player, &[TilePosition::new(tile(id, ch), x, y)])
            .unwrap();
    }

    #[test]
    fn finishing_with_a_bad_word_costs_a_win_point() {
        let (mut state, _) = finishable_game();
        let words = WordSet::from_reader("cat car at".as_bytes()).unwrap();

        // Alice plays all five tiles but spells RA, a non-word, on the end.
        place(&mut state, &alice(), 1, 'C', 0, 0);
        place(&mut state, &alice(), 2, 'A', 1, 0);
        place(&mut state, &alice(), 3, 'R', 2, 0);
        place(&mut state, &alice(), 4, 'A', 3, 0);
        place(&mut state, &alice(), 5, 'T', 4, 0);

        let err = state.finish(&alice(), &words).unwrap_err();
        assert_eq!(
            GameError::Finish(FinishError::InvalidWords(vec!["CARAT".to_owned()])),
            err,
        );
        assert_eq!("invalid words: [CARAT]", err.to_string());
        assert_eq!(GameStatus::InProgress, state.status());
        assert_eq!(9, state.board(&alice()).unwrap().win_points());
    }

    #[test]
    fn finish_checks_run_bag_pile_group_words() {
        let (mut state, _) = finishable_game();
        let words = WordSet::from_reader("cat car at".as_bytes()).unwrap();

        // A separate game whose bag is not yet empty: that check reports
        // before anything else.
        let mut with_bag = GameState::with_bag(
            GameId::new(1),
            CREATED_AT,
            GameConfig {
                max_players: 8,
                num_new_tiles: 2,
            },
            TileBag::from_tiles(vec![
                tile(1, 'C'),
                tile(2, 'A'),
                tile(3, 'R'),
                tile(4, 'A'),
                tile(5, 'T'),
            ]),
        );
        with_bag.join(&alice()).unwrap();
        with_bag.join(&bob()).unwrap();
        with_bag.start(&alice()).unwrap();
        assert_eq!(
            Err(GameError::Finish(FinishError::BagNotEmpty)),
            with_bag.finish(&alice(), &words),
        );

        // Empty bag, tiles still in hand.
        assert_eq!(
            Err(GameError::Finish(FinishError::UnusedTiles)),
            state.finish(&alice(), &words),
        );

        // All placed, but in two islands.
        place(&mut state, &alice(), 1, 'C', 0, 0);
        place(&mut state, &alice(), 2, 'A', 1, 0);
        place(&mut state, &alice(), 3, 'R', 2, 0);
        place(&mut state, &alice(), 4, 'A', 0, 10);
        place(&mut state, &alice(), 5, 'T', 1, 10);
        assert_eq!(
            Err(GameError::Finish(FinishError::NotOneGroup)),
            state.finish(&alice(), &words),
        );

        assert_eq!(
            8,
            state.board(&alice()).unwrap().win_points(),
            "both failed claims were docked",
        );
    }

    #[test]
    fn a_valid_finish_awards_points_and_ends_the_game() {
        let (mut state, _) = finishable_game();
        let words = WordSet::from_reader("cat car at".as_bytes()).unwrap();

        place(&mut state, &alice(), 1, 'C', 0, 0);
        place(&mut state, &alice(), 2, 'A', 1, 0);
        place(&mut state, &alice(), 3, 'R', 2, 0);
        place(&mut state, &alice(), 4, 'A', 0, 1);
        place(&mut state, &alice(), 5, 'T', 0, 2);

        let points = state.finish(&alice(), &words).unwrap();

        assert_eq!(GameStatus::Finished, state.status());
        assert_eq!(Some(&10), points.get(&alice()));
        assert_eq!(Some(&1), points.get(&bob()));
        assert_eq!(
            Err(GameError::NotInProgress),
            state.finish(&alice(), &words),
            "finished is terminal",
        );
    }

    #[test]
    fn removing_a_player_returns_their_tiles() {
        let (mut state, mut rng) = full_game(6);
        state.join(&alice()).unwrap();
        state.join(&bob()).unwrap();
        state.start(&alice()).unwrap();
        state.snag(&alice(), &mut rng).unwrap();
        let before = state.tiles_left();

        assert!(!state.remove_player(&alice()));
        assert_eq!(before + 22, state.tiles_left());
        assert_conserved(&state, TILE_COUNT);

        assert!(state.remove_player(&bob()), "last player out empties the game");
        assert_eq!(TILE_COUNT, state.tiles_left());
    }

    #[test]
    fn info_is_shaped_for_the_asker() {
        let (mut state, _) = full_game(7);
        state.join(&alice()).unwrap();
        state.join(&bob()).unwrap();

        let info = state.info(&PlayerName::from("carol"));
        assert!(info.can_join, "anyone can join before the start");
        assert_eq!(vec![alice(), bob()], info.players);
        assert_eq!(CREATED_AT, info.created_at);

        state.start(&alice()).unwrap();
        assert!(!state.info(&PlayerName::from("carol")).can_join);
        assert!(state.info(&alice()).can_join, "a seated player can rejoin");
    }

    #[test]
    fn seeded_games_replay_identically() {
        let mut first = Pcg64Mcg::seed_from_u64(99);
        let mut second = Pcg64Mcg::seed_from_u64(99);
        let mut left = GameState::new(GameId::new(1), CREATED_AT, GameConfig::default(), &mut first);
        let mut right =
            GameState::new(GameId::new(1), CREATED_AT, GameConfig::default(), &mut second);

        for state in [&mut left, &mut right] {
            state.join(&alice()).unwrap();
            state.join(&bob()).unwrap();
            state.start(&alice()).unwrap();
        }
        let left_snag = left.snag(&alice(), &mut first).unwrap();
        let right_snag = right.snag(&alice(), &mut second).unwrap();

        assert_eq!(left_snag, right_snag);
        assert_eq!(left.bag.tiles(), right.bag.tiles());
        assert_eq!(
            left.board(&alice()).unwrap().unused(),
            right.board(&alice()).unwrap().unused(),
        );
    }
}
