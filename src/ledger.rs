//! The statistics ledger
//!
//! The ledger owns every user's [`UserStats`] together with the legacy score
//! map, applies resolved answers to both, and derives the per-user and
//! global statistics views. The score map is authoritative: every read path
//! first reconciles the stats against it.

use std::collections::HashMap;

use chrono::NaiveDate;
use itertools::Itertools;
use serde::Serialize;
use serde_with::skip_serializing_none;

use crate::{
    ids::{RoomId, UserId},
    leaderboard,
    rooms::ActiveRooms,
    stats::{self, Activity, Period, Rollups, UserStats},
};

/// How many members of a group were active in each window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActiveCounts {
    /// Active today
    pub today: usize,
    /// Active since Monday
    pub week: usize,
    /// Active since the first of the month
    pub month: usize,
    /// Active at least once
    pub ever: usize,
}

impl ActiveCounts {
    /// Counts activity records by their last activity date
    pub fn tally<'a, I: IntoIterator<Item = &'a Activity>>(records: I, today: NaiveDate) -> Self {
        records
            .into_iter()
            .fold(Self::default(), |mut counts, activity| {
                if activity.last_activity_date.is_some() {
                    counts.ever += 1;
                }
                counts.today += usize::from(activity.active_in(Period::Today, today));
                counts.week += usize::from(activity.active_in(Period::Week, today));
                counts.month += usize::from(activity.active_in(Period::Month, today));
                counts
            })
    }
}

/// Everything known about one user, as shown by a stats command
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserReport {
    /// The user
    pub user: UserId,
    /// Legacy score (total correct answers)
    pub score: u64,
    /// Answers given
    pub total_attempts: u64,
    /// Correct answers
    pub correct: u64,
    /// Wrong answers
    pub wrong: u64,
    /// Percentage of correct answers
    pub success_rate: f64,
    /// Current daily streak
    pub current_streak: u32,
    /// Best daily streak
    pub longest_streak: u32,
    /// Today, week and month counters
    pub rollups: Rollups,
    /// Mastered category, if any
    pub mastery: Option<String>,
    /// 1-based position on the global leaderboard
    pub rank: Option<usize>,
    /// Day of the first answer
    pub join_date: Option<NaiveDate>,
    /// Day of the last answer
    pub last_activity_date: Option<NaiveDate>,
    /// Number of rooms the user answered in
    pub rooms: usize,
}

/// Bot-wide statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalStats {
    /// Users with a stats record
    pub total_users: usize,
    /// Rooms subscribed to quizzes
    pub total_rooms: usize,
    /// Users by activity window
    pub active_users: ActiveCounts,
    /// Users whose first answer was today
    pub new_users_today: usize,
    /// Subscribed rooms with any activity today
    pub active_rooms_today: usize,
    /// Subscribed rooms with any activity since Monday
    pub active_rooms_week: usize,
    /// Users that also subscribed their private chat
    pub private_chat_users: usize,
    /// Users with a subscribed private chat who answered today
    pub private_chat_active_today: usize,
    /// Answers given today
    pub attempts_today: u64,
    /// Answers given since Monday
    pub attempts_week: u64,
    /// Answers given ever
    pub total_attempts: u64,
    /// Correct answers ever
    pub total_correct: u64,
    /// Overall percentage of correct answers
    pub success_rate: f64,
    /// Questions in the store
    pub questions_available: usize,
}

/// Per-user statistics and the legacy score map
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ledger {
    stats: HashMap<UserId, UserStats>,
    scores: HashMap<UserId, u64>,
}

impl Ledger {
    /// Rebuilds a ledger from its two persisted collections
    pub fn from_parts(stats: HashMap<UserId, UserStats>, scores: HashMap<UserId, u64>) -> Self {
        Self { stats, scores }
    }

    /// All user statistics
    pub fn stats(&self) -> &HashMap<UserId, UserStats> {
        &self.stats
    }

    /// The legacy score map
    pub fn scores(&self) -> &HashMap<UserId, u64> {
        &self.scores
    }

    /// Statistics of one user, without reconciling
    pub fn user(&self, user: UserId) -> Option<&UserStats> {
        self.stats.get(&user)
    }

    /// Legacy score of `user`, `0` if unknown
    pub fn score(&self, user: UserId) -> u64 {
        self.scores.get(&user).copied().unwrap_or_default()
    }

    /// Applies one resolved answer
    ///
    /// Updates the global and room-scoped counters, the streaks, the score
    /// and, for correct answers with a category, the category tally.
    pub fn record_attempt(
        &mut self,
        user: UserId,
        room: RoomId,
        correct: bool,
        category: Option<&str>,
        today: NaiveDate,
    ) -> &UserStats {
        self.reconcile_user(user);

        let stats = self.stats.entry(user).or_default();
        stats.join_date.get_or_insert(today);
        stats.activity.record(today, correct);
        let room_stats = stats.rooms.entry(room).or_default();
        room_stats.record(today, correct);

        let score = self.scores.entry(user).or_default();
        if correct {
            *score += 1;
            if let Some(category) = category {
                *stats
                    .category_scores
                    .entry(category.to_owned())
                    .or_default() += 1;
            }
        }
        debug_assert_eq!(*score, stats.activity.correct_count);

        log::debug!("recorded answer of {user} in {room}: correct={correct}");
        stats
    }

    /// Repairs one user's stats against the score map
    ///
    /// Returns whether anything had to change.
    pub fn reconcile_user(&mut self, user: UserId) -> bool {
        let Some(&score) = self.scores.get(&user) else {
            // a lost score entry is rebuilt from the stats instead
            let Some(record) = self.stats.get(&user) else {
                return false;
            };
            let correct = record.activity.correct_count;
            if correct == 0 {
                return false;
            }
            log::warn!("user {user} has no score entry, restoring {correct} correct answers");
            self.scores.insert(user, correct);
            return true;
        };
        let Some(record) = self.stats.get_mut(&user) else {
            if score == 0 {
                return false;
            }
            log::warn!("user {user} has a score of {score} but no stats, rebuilding");
            let rebuilt = stats::repair(UserStats::default(), score);
            self.stats.insert(user, rebuilt);
            return true;
        };
        if record.activity.correct_count == score {
            return false;
        }
        log::warn!(
            "user {user}: correct count {} diverged from score {score}, repairing",
            record.activity.correct_count
        );
        *record = stats::repair(std::mem::take(record), score);
        true
    }

    /// Repairs every user, returning how many needed it
    pub fn reconcile(&mut self) -> usize {
        let users = self
            .stats
            .keys()
            .chain(self.scores.keys())
            .copied()
            .sorted_unstable()
            .dedup()
            .collect_vec();
        users
            .into_iter()
            .filter(|user| self.reconcile_user(*user))
            .count()
    }

    /// The statistics view of one user
    ///
    /// Returns `None` for users that never answered.
    pub fn user_report(&mut self, user: UserId, today: NaiveDate) -> Option<UserReport> {
        self.reconcile();
        let stats = self.stats.get(&user)?;
        let rank = leaderboard::standings(self)
            .iter()
            .position(|entry| entry.user == user)
            .map(|position| position + 1);

        Some(UserReport {
            user,
            score: self.score(user),
            total_attempts: stats.activity.total_attempts,
            correct: stats.activity.correct_count,
            wrong: stats.activity.wrong_answers(),
            success_rate: stats.activity.accuracy(),
            current_streak: stats.activity.current_streak,
            longest_streak: stats.activity.longest_streak,
            rollups: Rollups::of(&stats.activity, today),
            mastery: stats.mastery().map(str::to_owned),
            rank,
            join_date: stats.join_date,
            last_activity_date: stats.activity.last_activity_date,
            rooms: stats.rooms.len(),
        })
    }

    /// Most recent day any user answered in `room`
    pub fn room_last_activity(&self, room: RoomId) -> Option<NaiveDate> {
        self.stats
            .values()
            .filter_map(|stats| stats.rooms.get(&room)?.last_activity_date)
            .max()
    }

    /// Bot-wide statistics
    pub fn global_stats(
        &mut self,
        rooms: &ActiveRooms,
        questions_available: usize,
        today: NaiveDate,
    ) -> GlobalStats {
        self.reconcile();

        let room_active = |period: Period| {
            rooms
                .iter()
                .filter(|room| {
                    self.room_last_activity(*room)
                        .is_some_and(|date| period.contains(date, today))
                })
                .count()
        };
        let activities = || self.stats.values().map(|stats| &stats.activity);
        let attempts_in = |period: Period| -> u64 {
            activities().map(|a| a.rollup(period, today).attempts).sum()
        };
        let private_chats = || {
            self.stats
                .iter()
                .filter(|(user, _)| rooms.contains(RoomId(user.0)))
        };

        let total_attempts: u64 = activities().map(|a| a.total_attempts).sum();
        let total_correct: u64 = activities().map(|a| a.correct_count).sum();

        GlobalStats {
            total_users: self.stats.len(),
            total_rooms: rooms.len(),
            active_users: ActiveCounts::tally(activities(), today),
            new_users_today: self
                .stats
                .values()
                .filter(|stats| stats.join_date == Some(today))
                .count(),
            active_rooms_today: room_active(Period::Today),
            active_rooms_week: room_active(Period::Week),
            private_chat_users: private_chats().count(),
            private_chat_active_today: private_chats()
                .filter(|(_, stats)| stats.activity.active_in(Period::Today, today))
                .count(),
            attempts_today: attempts_in(Period::Today),
            attempts_week: attempts_in(Period::Week),
            total_attempts,
            total_correct,
            success_rate: stats::success_rate(total_correct, total_attempts),
            questions_available,
        }
    }
}
