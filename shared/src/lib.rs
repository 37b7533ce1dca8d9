//! Types shared between the session simulation and the wire protocol.
//!
//! Everything here is serde-driven: `Direction`, `Position` and the various
//! view/message structs are what actually crosses the TCP connection as
//! newline-delimited JSON, so their `Serialize`/`Deserialize` shapes are part
//! of the protocol, not an implementation detail.

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Grid width, in cells. Not configurable — baked into the protocol's
/// implicit coordinate space.
pub const GRID_WIDTH: i32 = 40;
/// Grid height, in cells.
pub const GRID_HEIGHT: i32 = 30;

/// Alphabet used for invite codes: alphanumeric with the visually ambiguous
/// characters (`0 1 I L O` and their lookalikes) removed.
pub const INVITE_CODE_ALPHABET: &[u8] =
    b"ABCDEFGHJKMNPQRSTUVWXYZabcdefghjkmnpqrstuvwxyz23456789";
pub const INVITE_CODE_LEN: usize = 4;

/// A direction of travel, encoded on the wire as the integers 1-4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Direction {
    Up = 1,
    Down = 2,
    Right = 3,
    Left = 4,
}

impl Direction {
    /// The `(dx, dy)` a head moves by when traveling in this direction.
    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Right => (1, 0),
            Direction::Left => (-1, 0),
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Right => Direction::Left,
            Direction::Left => Direction::Right,
        }
    }
}

/// A single grid cell. Serializes as a two-element `[x, y]` array, matching
/// the wire format rather than an `{x, y}` object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Position { x, y }
    }

    pub fn moved(self, dir: Direction) -> Position {
        let (dx, dy) = dir.offset();
        Position::new(self.x + dx, self.y + dy)
    }

    pub fn in_bounds(self) -> bool {
        self.x >= 0 && self.x < GRID_WIDTH && self.y >= 0 && self.y < GRID_HEIGHT
    }
}

impl Serialize for Position {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        (self.x, self.y).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Position {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (x, y) = <(i32, i32)>::deserialize(deserializer)?;
        Ok(Position::new(x, y))
    }
}

/// The connection identity string used as a player's stable `key`: `host:port`.
pub fn connection_key(host: &str, port: u16) -> String {
    format!("{}:{}", host, port)
}

/// Wire view of a single player, sent inside `session_join`, state updates,
/// and the leaderboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerView {
    pub key: String,
    pub name: String,
    pub chunks: Vec<Position>,
    pub direction: Direction,
}

/// Wire view of the simulation at a single tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateView {
    pub tick: u64,
    pub apples: Vec<Position>,
    pub alive_players: Vec<PlayerView>,
}

/// `data` payload of an inbound `create_session` message.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionData {
    pub player_name: String,
}

/// `data` payload of an inbound `join` message.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinData {
    pub code: String,
    pub player_name: String,
}

/// `data` payload of an inbound `input` message.
#[derive(Debug, Clone, Deserialize)]
pub struct InputData {
    pub new_direction: Direction,
}
