//! Leaderboards and their cache
//!
//! This module ranks users globally and within a room, and keeps the
//! computed boards for a short window so that frequent leaderboard
//! requests do not re-sort every user each time.

use std::{cmp::Ordering, collections::HashMap, time::Duration};

use chrono::NaiveDate;
use itertools::Itertools;
use serde::Serialize;
use web_time::Instant;

use crate::{
    TruncatedVec,
    ids::{RoomId, UserId},
    ledger::{ActiveCounts, Ledger},
    stats::{self, Activity},
};

/// One ranked row of a leaderboard
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    /// 1-based position
    pub rank: usize,
    /// The ranked user
    pub user: UserId,
    /// Correct answers (the legacy score for the global board)
    pub score: u64,
    /// Answers given
    pub total_attempts: u64,
    /// Answers given minus correct answers
    pub wrong_answers: u64,
    /// Percentage of correct answers
    pub accuracy: f64,
    /// Current daily streak
    pub current_streak: u32,
}

/// Ordering of two rows: score, then accuracy, then streak, all
/// descending, then user id ascending
fn compare(a: &LeaderboardEntry, b: &LeaderboardEntry) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| b.accuracy.total_cmp(&a.accuracy))
        .then_with(|| b.current_streak.cmp(&a.current_streak))
        .then_with(|| a.user.cmp(&b.user))
}

fn rank<'a, I>(rows: I) -> Vec<LeaderboardEntry>
where
    I: Iterator<Item = (UserId, u64, &'a Activity)>,
{
    rows.filter(|(_, score, activity)| *score > 0 || activity.total_attempts > 0)
        .map(|(user, score, activity)| LeaderboardEntry {
            rank: 0,
            user,
            score,
            total_attempts: activity.total_attempts,
            wrong_answers: activity.wrong_answers(),
            accuracy: activity.accuracy(),
            current_streak: activity.current_streak,
        })
        .sorted_by(compare)
        .enumerate()
        .map(|(position, entry)| LeaderboardEntry {
            rank: position + 1,
            ..entry
        })
        .collect_vec()
}

/// Every user ranked on the global board
///
/// The ledger is expected to be reconciled already.
pub fn standings(ledger: &Ledger) -> Vec<LeaderboardEntry> {
    rank(
        ledger
            .stats()
            .iter()
            .map(|(user, stats)| (*user, ledger.score(*user), &stats.activity)),
    )
}

/// Every member of `room` ranked by their room-scoped counters
pub fn room_standings(ledger: &Ledger, room: RoomId) -> Vec<LeaderboardEntry> {
    rank(ledger.stats().iter().filter_map(|(user, stats)| {
        let activity = stats.rooms.get(&room)?;
        Some((*user, activity.correct_count, activity))
    }))
}

/// A room's leaderboard with room-wide aggregates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomLeaderboard {
    /// The room
    pub room: RoomId,
    /// Top members
    pub standings: TruncatedVec<LeaderboardEntry>,
    /// Answers given in the room
    pub total_attempts: u64,
    /// Correct answers given in the room
    pub total_correct: u64,
    /// Percentage of correct answers in the room
    pub accuracy: f64,
    /// Members by activity window
    pub active_users: ActiveCounts,
}

impl RoomLeaderboard {
    fn compute(ledger: &Ledger, room: RoomId, size: usize, today: NaiveDate) -> Self {
        let members = ledger
            .stats()
            .values()
            .filter_map(|stats| stats.rooms.get(&room))
            .collect_vec();
        let total_attempts = members.iter().map(|m| m.total_attempts).sum();
        let total_correct = members.iter().map(|m| m.correct_count).sum();
        let ranked = room_standings(ledger, room);

        Self {
            room,
            standings: TruncatedVec::new(ranked.iter().cloned(), size, ranked.len()),
            total_attempts,
            total_correct,
            accuracy: stats::success_rate(total_correct, total_attempts),
            active_users: ActiveCounts::tally(members, today),
        }
    }
}

/// A computed value and when it was computed
#[derive(Debug, Clone)]
struct Cached<T> {
    computed_at: Instant,
    value: T,
}

impl<T> Cached<T> {
    fn is_fresh(&self, window: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.computed_at) < window
    }
}

/// Cache of computed leaderboards
///
/// Entries are served until they are older than the cache window; there is
/// no invalidation on individual answers, so a board may lag behind the
/// ledger by up to one window.
#[derive(Debug, Clone)]
pub struct Leaderboards {
    window: Duration,
    global: HashMap<usize, Cached<TruncatedVec<LeaderboardEntry>>>,
    rooms: HashMap<(RoomId, usize), Cached<RoomLeaderboard>>,
}

impl Default for Leaderboards {
    fn default() -> Self {
        Self::new(crate::constants::leaderboard::CACHE_WINDOW)
    }
}

impl Leaderboards {
    /// Creates an empty cache with the given window
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            global: HashMap::new(),
            rooms: HashMap::new(),
        }
    }

    /// The top `size` users across all rooms
    ///
    /// Users are ranked by score, then accuracy, then current streak. A
    /// board of the same size computed within the cache window is returned
    /// as is; otherwise the ledger is reconciled and the board recomputed.
    ///
    /// # Arguments
    ///
    /// * `ledger` - The ledger to rank, reconciled before ranking
    /// * `size` - How many leading entries to keep
    /// * `now` - The current monotonic time, used for cache freshness
    ///
    /// # Returns
    ///
    /// The leading entries, together with the number of ranked users
    pub fn global(
        &mut self,
        ledger: &mut Ledger,
        size: usize,
        now: Instant,
    ) -> TruncatedVec<LeaderboardEntry> {
        let window = self.window;
        if let Some(cached) = self.global.get(&size).filter(|c| c.is_fresh(window, now)) {
            return cached.value.clone();
        }

        ledger.reconcile();
        let ranked = standings(ledger);
        let value = TruncatedVec::new(ranked.iter().cloned(), size, ranked.len());

        self.global.retain(|_, cached| cached.is_fresh(window, now));
        self.global.insert(
            size,
            Cached {
                computed_at: now,
                value: value.clone(),
            },
        );
        log::debug!("recomputed global leaderboard over {} users", ranked.len());
        value
    }

    /// The top `size` members of `room` and the room's aggregates
    pub fn room(
        &mut self,
        ledger: &mut Ledger,
        room: RoomId,
        size: usize,
        today: NaiveDate,
        now: Instant,
    ) -> RoomLeaderboard {
        let window = self.window;
        if let Some(cached) = self
            .rooms
            .get(&(room, size))
            .filter(|c| c.is_fresh(window, now))
        {
            return cached.value.clone();
        }

        ledger.reconcile();
        let value = RoomLeaderboard::compute(ledger, room, size, today);

        self.rooms.retain(|_, cached| cached.is_fresh(window, now));
        self.rooms.insert(
            (room, size),
            Cached {
                computed_at: now,
                value: value.clone(),
            },
        );
        log::debug!("recomputed leaderboard of room {room}");
        value
    }

    /// Drops every cached board
    pub fn invalidate(&mut self) {
        self.global.clear();
        self.rooms.clear();
    }
}
