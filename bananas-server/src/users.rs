//! Per-player point balances.

use anyhow::Result;
use bananas::messages::PlayerName;
use std::collections::HashMap;
use std::sync::Mutex;

/// Store of point balances, keyed by player name.
///
/// Games report win points here once a finish claim sticks. A store failure
/// is surfaced to the players but never blocks the game from finishing.
pub trait UserStore: Send + Sync {
    fn increment_points(&self, deltas: &HashMap<PlayerName, u64>) -> Result<()>;
}

/// In-memory ledger standing in for a user database.
#[derive(Debug, Default)]
pub struct UserRegistry {
    points: Mutex<HashMap<PlayerName, u64>>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn points(&self, player: &PlayerName) -> u64 {
        self.lock().get(player).copied().unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PlayerName, u64>> {
        self.points.lock().expect("user registry poisoned")
    }
}

impl UserStore for UserRegistry {
    fn increment_points(&self, deltas: &HashMap<PlayerName, u64>) -> Result<()> {
        let mut points = self.lock();
        for (player, delta) in deltas {
            *points.entry(player.clone()).or_default() += delta;
        }
        Ok(())
    }
}
