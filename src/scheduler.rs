//! Per-room question scheduling
//!
//! Each room draws from its own shuffled pool of question positions, so
//! every question is shown once per pass before any repeats. A pool
//! remembers the store version it was built from and is rebuilt as soon as
//! the store changes, which keeps deleted positions from ever being served.

use std::collections::HashMap;

use crate::{
    ids::RoomId,
    question::{Question, QuestionStore},
};

/// Remaining positions for one room
#[derive(Debug, Clone, Default)]
struct Pool {
    remaining: Vec<usize>,
    store_version: u64,
}

impl Pool {
    fn shuffled(store: &QuestionStore) -> Self {
        let mut remaining: Vec<usize> = (0..store.len()).collect();
        fastrand::shuffle(&mut remaining);
        Self {
            remaining,
            store_version: store.version(),
        }
    }

    fn is_stale(&self, store: &QuestionStore) -> bool {
        self.remaining.is_empty() || self.store_version != store.version()
    }
}

/// Hands out the next question for each room
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    pools: HashMap<RoomId, Pool>,
}

impl Scheduler {
    /// Picks the next question for `room`
    ///
    /// Without a room, falls back to a uniformly random question. Returns
    /// the question together with its current position, or `None` when the
    /// store is empty.
    pub fn next_question<'a>(
        &mut self,
        store: &'a QuestionStore,
        room: Option<RoomId>,
    ) -> Option<(usize, &'a Question)> {
        if store.is_empty() {
            return None;
        }

        let Some(room) = room else {
            let question = store.random()?;
            return Some((store.index_of(question.id())?, question));
        };

        let pool = self.pools.entry(room).or_default();
        if pool.is_stale(store) {
            if pool.store_version != store.version() && !pool.remaining.is_empty() {
                log::debug!("question store changed, reshuffling pool for room {room}");
            }
            *pool = Pool::shuffled(store);
        }

        let index = pool.remaining.pop()?;
        store.get(index).map(|question| (index, question))
    }

    /// Number of questions left in the current pass for `room`
    pub fn remaining(&self, room: RoomId) -> usize {
        self.pools.get(&room).map_or(0, |pool| pool.remaining.len())
    }

    /// Drops the pool of a room, e.g. when the bot leaves it
    pub fn forget(&mut self, room: RoomId) {
        self.pools.remove(&room);
    }

    /// Drops every pool
    pub fn reset(&mut self) {
        self.pools.clear();
    }
}
