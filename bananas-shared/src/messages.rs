//! The message definitions for communication between the client and server.
//!
//! The wire schema is a single tagged JSON object: `type` carries a numeric
//! tag and every other field is optional, with presence depending on the tag.
//! Key names and tag values are fixed by the deployed client, so changes here
//! are breaking.

use crate::game::{GameInfo, GameStatus};
use crate::tile::{Tile, TilePosition};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The stable string identity of an authenticated player.
///
/// Also the key into the user store; one lobby socket may exist per name at a
/// time.
#[derive(
    Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PlayerName(String);

impl PlayerName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PlayerName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Identifier for an active game.
///
/// The lobby assigns the smallest positive id not in use, so ids start at 1
/// and 0 never names a game.
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GameId(u32);

impl GameId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Wire tag for a [`Message`]. The integer values are fixed for client
/// compatibility; the gaps are tags the client has since retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MessageType {
    Create = 1,
    Join = 2,
    Leave = 3,
    Delete = 4,
    StatusChange = 5,
    Snag = 7,
    Swap = 8,
    TilesMoved = 9,
    BoardRefresh = 10,
    Infos = 11,
    PlayerDelete = 13,
    SocketInfo = 14,
    SocketError = 15,
    SocketHttpPing = 17,
    Chat = 18,
    GetInfos = 20,
    SocketWarning = 21,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown message type {0}")]
pub struct UnknownMessageType(pub u8);

impl From<MessageType> for u8 {
    fn from(message_type: MessageType) -> u8 {
        message_type as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = UnknownMessageType;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use MessageType::*;
        Ok(match value {
            1 => Create,
            2 => Join,
            3 => Leave,
            4 => Delete,
            5 => StatusChange,
            7 => Snag,
            8 => Swap,
            9 => TilesMoved,
            10 => BoardRefresh,
            11 => Infos,
            13 => PlayerDelete,
            14 => SocketInfo,
            15 => SocketError,
            17 => SocketHttpPing,
            18 => Chat,
            20 => GetInfos,
            21 => SocketWarning,
            other => return Err(UnknownMessageType(other)),
        })
    }
}

/// One frame on the client/server channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub message_type: MessageType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiles: Option<Vec<Tile>>,

    #[serde(
        default,
        rename = "tilePositions",
        skip_serializing_if = "Option::is_none"
    )]
    pub tile_positions: Option<Vec<TilePosition>>,

    #[serde(default, rename = "tilesLeft", skip_serializing_if = "Option::is_none")]
    pub tiles_left: Option<usize>,

    #[serde(default, rename = "gameInfos", skip_serializing_if = "Option::is_none")]
    pub game_infos: Option<Vec<GameInfo>>,

    #[serde(default, rename = "gameID", skip_serializing_if = "Option::is_none")]
    pub game_id: Option<GameId>,

    #[serde(default, rename = "gameStatus", skip_serializing_if = "Option::is_none")]
    pub game_status: Option<GameStatus>,

    #[serde(
        default,
        rename = "gamePlayers",
        skip_serializing_if = "Option::is_none"
    )]
    pub game_players: Option<Vec<PlayerName>>,
}

impl Message {
    /// A bare message of the given type; callers fill in payload fields with
    /// struct update syntax.
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            info: None,
            tiles: None,
            tile_positions: None,
            tiles_left: None,
            game_infos: None,
            game_id: None,
            game_status: None,
            game_players: None,
        }
    }

    pub fn socket_error(info: impl Into<String>) -> Self {
        Self {
            info: Some(info.into()),
            ..Self::new(MessageType::SocketError)
        }
    }

    pub fn socket_info(info: impl Into<String>) -> Self {
        Self {
            info: Some(info.into()),
            ..Self::new(MessageType::SocketInfo)
        }
    }

    pub fn socket_warning(info: impl Into<String>) -> Self {
        Self {
            info: Some(info.into()),
            ..Self::new(MessageType::SocketWarning)
        }
    }

    pub fn socket_http_ping() -> Self {
        Self::new(MessageType::SocketHttpPing)
    }

    pub fn player_delete() -> Self {
        Self::new(MessageType::PlayerDelete)
    }
}
