//! The player: position history, direction, and the deferred-growth slot.

use shared::{Direction, Position, PlayerView};

/// A living or just-died snake. Owned exclusively by its [`crate::session::Session`].
#[derive(Debug, Clone)]
pub struct Player {
    pub key: String,
    pub name: String,
    /// `chunks[0]` is the head; the rest is the tail, head-to-tail order.
    pub chunks: Vec<Position>,
    pub direction: Direction,
    /// Set when a move consumes an apple; the popped tail cell is held here
    /// until the end of the tick so self-cut detection doesn't see it.
    pub last_tail_piece: Option<Position>,
}

impl Player {
    pub fn new(key: String, name: String, chunks: Vec<Position>, direction: Direction) -> Self {
        Player {
            key,
            name,
            chunks,
            direction,
            last_tail_piece: None,
        }
    }

    pub fn head(&self) -> Position {
        self.chunks[0]
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Accept a direction change, rejecting a no-op or a reversal (both of
    /// which a moving snake can never legally perform).
    pub fn set_direction(&mut self, new_direction: Direction) -> bool {
        if new_direction == self.direction || new_direction == self.direction.opposite() {
            return false;
        }
        self.direction = new_direction;
        true
    }

    pub fn to_view(&self) -> PlayerView {
        PlayerView {
            key: self.key.clone(),
            name: self.name.clone(),
            chunks: self.chunks.clone(),
            direction: self.direction,
        }
    }
}
