//! Rooms subscribed to automated quiz delivery

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ids::RoomId;

/// The set of rooms that receive scheduled quizzes
///
/// Persisted as a plain list of room ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActiveRooms(BTreeSet<RoomId>);

impl ActiveRooms {
    /// Subscribes `room`, returning whether it was new
    pub fn insert(&mut self, room: RoomId) -> bool {
        self.0.insert(room)
    }

    /// Unsubscribes `room`, returning whether it was subscribed
    pub fn remove(&mut self, room: RoomId) -> bool {
        self.0.remove(&room)
    }

    /// Whether `room` is subscribed
    pub fn contains(&self, room: RoomId) -> bool {
        self.0.contains(&room)
    }

    /// Subscribed rooms in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = RoomId> + '_ {
        self.0.iter().copied()
    }

    /// Number of subscribed rooms
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no room is subscribed
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
