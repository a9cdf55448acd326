//! One player's tiles in one game: the hand, the grid of placed tiles, and a
//! spatial index over the grid.

use crate::tile::{Tile, TileId, TilePosition};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

/// Win points a fresh board starts with.
pub const INITIAL_WIN_POINTS: u32 = 10;

/// Win points never drop below this, no matter how many finish claims fail.
const MIN_WIN_POINTS: u32 = 2;

/// Why a board operation was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BoardError {
    #[error("tile {0} is already on this board")]
    DuplicateTile(TileId),
    #[error("tile {0} is not in your hand")]
    TileNotInPile(TileId),
    #[error("tile {0} is not on the board")]
    TileNotOnGrid(TileId),
    #[error("the cell at ({x}, {y}) already holds a tile")]
    CellOccupied { x: i16, y: i16 },
    #[error("tile {0} is not yours")]
    UnknownTile(TileId),
}

#[derive(Debug, Clone, Default)]
pub struct Board {
    /// The hand, keyed by tile id.
    unused_tiles: HashMap<TileId, Tile>,
    /// Display order of the hand; tiles are appended as they are drawn.
    unused_order: Vec<TileId>,
    /// Placed tiles, keyed by tile id.
    used_tiles: HashMap<TileId, TilePosition>,
    /// Spatial index over the placed tiles, x then y.
    used_index: BTreeMap<i16, BTreeMap<i16, Tile>>,
    win_points: u32,
}

impl Board {
    pub fn new() -> Self {
        Self {
            win_points: INITIAL_WIN_POINTS,
            ..Default::default()
        }
    }

    /// Adds tiles to the hand, preserving their order.
    pub fn add_unused(&mut self, tiles: impl IntoIterator<Item = Tile>) -> Result<(), BoardError> {
        for tile in tiles {
            if self.unused_tiles.contains_key(&tile.id) || self.used_tiles.contains_key(&tile.id) {
                return Err(BoardError::DuplicateTile(tile.id));
            }
            self.unused_tiles.insert(tile.id, tile);
            self.unused_order.push(tile.id);
        }
        Ok(())
    }

    /// Places a hand tile at an empty grid cell.
    pub fn move_from_pile_to_grid(&mut self, id: TileId, x: i16, y: i16) -> Result<(), BoardError> {
        let tile = *self
            .unused_tiles
            .get(&id)
            .ok_or(BoardError::TileNotInPile(id))?;
        if self.tile_at(x, y).is_some() {
            return Err(BoardError::CellOccupied { x, y });
        }

        self.unused_tiles.remove(&id);
        self.unused_order.retain(|&other| other != id);
        self.insert_used(TilePosition::new(tile, x, y));
        Ok(())
    }

    /// Moves a placed tile to another cell. The destination must be empty
    /// unless it is the tile's own cell.
    pub fn move_within_grid(&mut self, id: TileId, x: i16, y: i16) -> Result<(), BoardError> {
        let pos = *self
            .used_tiles
            .get(&id)
            .ok_or(BoardError::TileNotOnGrid(id))?;
        if let Some(occupant) = self.tile_at(x, y) {
            if occupant.id != id {
                return Err(BoardError::CellOccupied { x, y });
            }
        }

        self.remove_from_index(pos.x, pos.y);
        self.insert_used(TilePosition::new(pos.tile, x, y));
        Ok(())
    }

    /// Takes a tile off the board entirely, wherever it lives.
    pub fn remove(&mut self, id: TileId) -> Result<Tile, BoardError> {
        if let Some(tile) = self.unused_tiles.remove(&id) {
            self.unused_order.retain(|&other| other != id);
            return Ok(tile);
        }
        if let Some(pos) = self.used_tiles.remove(&id) {
            self.remove_from_index(pos.x, pos.y);
            return Ok(pos.tile);
        }
        Err(BoardError::UnknownTile(id))
    }

    pub fn tile_at(&self, x: i16, y: i16) -> Option<Tile> {
        self.used_index.get(&x).and_then(|column| column.get(&y)).copied()
    }

    pub fn has_tile(&self, id: TileId) -> bool {
        self.unused_tiles.contains_key(&id) || self.used_tiles.contains_key(&id)
    }

    /// The hand in display order.
    pub fn unused(&self) -> Vec<Tile> {
        self.unused_order
            .iter()
            .map(|id| self.unused_tiles[id])
            .collect()
    }

    /// Placed tiles sorted top to bottom, then left to right.
    pub fn used(&self) -> Vec<TilePosition> {
        let mut positions: Vec<_> = self.used_tiles.values().copied().collect();
        positions.sort_by_key(|pos| (pos.y, pos.x));
        positions
    }

    pub fn unused_len(&self) -> usize {
        self.unused_tiles.len()
    }

    pub fn used_len(&self) -> usize {
        self.used_tiles.len()
    }

    pub fn win_points(&self) -> u32 {
        self.win_points
    }

    /// Docks a point for a failed finish claim.
    pub fn lower_win_points(&mut self) {
        self.win_points = self.win_points.saturating_sub(1).max(MIN_WIN_POINTS);
    }

    /// Words formed on the grid: maximal horizontal runs in reading order
    /// (top to bottom, left to right), then maximal vertical runs (left to
    /// right, top to bottom). A lone tile is not a word, and a gap of even a
    /// single empty cell breaks a run.
    pub fn used_words(&self) -> Vec<String> {
        let mut rows: BTreeMap<i16, BTreeMap<i16, Tile>> = BTreeMap::new();
        for pos in self.used_tiles.values() {
            rows.entry(pos.y).or_default().insert(pos.x, pos.tile);
        }

        let mut words = Vec::new();
        for row in rows.values() {
            collect_runs(row, &mut words);
        }
        for column in self.used_index.values() {
            collect_runs(column, &mut words);
        }
        words
    }

    /// True when the placed tiles form one 4-connected component. An empty
    /// grid counts as grouped.
    pub fn is_single_group(&self) -> bool {
        let Some(start) = self.used_tiles.values().next() else {
            return true;
        };

        let mut seen = HashSet::new();
        let mut stack = vec![(start.x, start.y)];
        seen.insert((start.x, start.y));
        while let Some((x, y)) = stack.pop() {
            let neighbors = [
                x.checked_sub(1).map(|nx| (nx, y)),
                x.checked_add(1).map(|nx| (nx, y)),
                y.checked_sub(1).map(|ny| (x, ny)),
                y.checked_add(1).map(|ny| (x, ny)),
            ];
            for (nx, ny) in neighbors.into_iter().flatten() {
                if self.tile_at(nx, ny).is_some() && seen.insert((nx, ny)) {
                    stack.push((nx, ny));
                }
            }
        }
        seen.len() == self.used_tiles.len()
    }

    fn insert_used(&mut self, pos: TilePosition) {
        self.used_tiles.insert(pos.tile.id, pos);
        self.used_index
            .entry(pos.x)
            .or_default()
            .insert(pos.y, pos.tile);
    }

    fn remove_from_index(&mut self, x: i16, y: i16) {
        if let Some(column) = self.used_index.get_mut(&x) {
            column.remove(&y);
            if column.is_empty() {
                self.used_index.remove(&x);
            }
        }
    }
}

/// Appends every maximal run of length >= 2 along one grid line.
fn collect_runs(line: &BTreeMap<i16, Tile>, words: &mut Vec<String>) {
    let mut run = String::new();
    let mut prev = None;
    for (&coord, tile) in line {
        if prev.is_some() && prev != coord.checked_sub(1) {
            if run.len() >= 2 {
                words.push(std::mem::take(&mut run));
            } else {
                run.clear();
            }
        }
        run.push(tile.letter.as_char());
        prev = Some(coord);
    }
    if run.len() >= 2 {
        words.push(run);
    }
}
