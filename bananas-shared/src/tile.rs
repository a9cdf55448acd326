//! Tiles and the shared draw bag.

use derive_more::Display;
use lazy_static::lazy_static;
use rand::{seq::SliceRandom, Rng};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Unique identifier for a tile within a game.
///
/// The distribution holds many copies of each letter, so tiles are referred
/// to by id rather than by face. Ids are assigned `1..=144` before the
/// initial shuffle and stay stable for the life of the game.
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TileId(u32);

impl TileId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

/// A tile face, one of `'A'..='Z'`.
///
/// Serialized on the wire as a single-character string under the `ch` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Letter(char);

impl Letter {
    /// Returns `None` unless `ch` is an uppercase ASCII letter.
    pub fn new(ch: char) -> Option<Self> {
        ch.is_ascii_uppercase().then_some(Self(ch))
    }

    pub fn as_char(self) -> char {
        self.0
    }
}

impl fmt::Display for Letter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Letter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Letter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(ch), None) => Letter::new(ch)
                .ok_or_else(|| de::Error::custom(format!("tile letter out of range: {text:?}"))),
            _ => Err(de::Error::custom(format!(
                "tile letter must be a single character: {text:?}"
            ))),
        }
    }
}

/// One lettered tile. Two tiles with the same id are the same tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tile {
    pub id: TileId,
    #[serde(rename = "ch")]
    pub letter: Letter,
}

impl Tile {
    pub fn new(id: TileId, letter: Letter) -> Self {
        Self { id, letter }
    }
}

/// A tile placed at a grid cell. Coordinates are signed; the board is
/// logically unbounded and clients pan a viewport over it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TilePosition {
    pub tile: Tile,
    pub x: i16,
    pub y: i16,
}

impl TilePosition {
    pub fn new(tile: Tile, x: i16, y: i16) -> Self {
        Self { tile, x, y }
    }
}

/// Number of tiles in a full bag.
pub const TILE_COUNT: usize = 144;

/// How many copies of each letter go into a full bag.
const LETTER_COUNTS: [(char, usize); 26] = [
    ('A', 13),
    ('B', 3),
    ('C', 3),
    ('D', 6),
    ('E', 18),
    ('F', 3),
    ('G', 4),
    ('H', 3),
    ('I', 12),
    ('J', 2),
    ('K', 2),
    ('L', 5),
    ('M', 3),
    ('N', 8),
    ('O', 11),
    ('P', 3),
    ('Q', 2),
    ('R', 9),
    ('S', 6),
    ('T', 9),
    ('U', 6),
    ('V', 3),
    ('W', 3),
    ('X', 2),
    ('Y', 3),
    ('Z', 2),
];

lazy_static! {
    /// The full tile set in id order, before any shuffling.
    pub static ref TILE_SET: Vec<Tile> = {
        let mut tiles = Vec::with_capacity(TILE_COUNT);
        let mut next_id = 1;
        for (ch, count) in LETTER_COUNTS {
            for _ in 0..count {
                tiles.push(Tile::new(TileId(next_id), Letter(ch)));
                next_id += 1;
            }
        }
        tiles
    };
}

/// The shared draw pile for one game.
///
/// Tiles are drawn from the front and returned to the back. The bag is owned
/// by a single game task and is not synchronized.
#[derive(Debug, Clone)]
pub struct TileBag {
    tiles: Vec<Tile>,
}

impl TileBag {
    /// A full 144-tile bag, shuffled in place with `rng`.
    pub fn new(rng: &mut impl Rng) -> Self {
        let mut tiles = TILE_SET.clone();
        tiles.shuffle(rng);
        Self { tiles }
    }

    /// A bag holding exactly `tiles`, front first. Useful for scripted games.
    pub fn from_tiles(tiles: Vec<Tile>) -> Self {
        Self { tiles }
    }

    /// Removes and returns the first `min(n, len)` tiles.
    pub fn draw(&mut self, n: usize) -> Vec<Tile> {
        let n = n.min(self.tiles.len());
        self.tiles.drain(..n).collect()
    }

    /// Removes and returns the front tile, if any.
    pub fn draw_one(&mut self) -> Option<Tile> {
        self.draw(1).pop()
    }

    /// Puts a tile back and reshuffles the whole pile.
    pub fn return_and_reshuffle(&mut self, tile: Tile, rng: &mut impl Rng) {
        self.tiles.push(tile);
        self.tiles.shuffle(rng);
    }

    /// Appends tiles to the back of the bag without reshuffling.
    pub fn append(&mut self, tiles: impl IntoIterator<Item = Tile>) {
        self.tiles.extend(tiles);
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}
