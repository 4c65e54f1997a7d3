//! Per-user and per-room activity records
//!
//! An [`Activity`] is the counter set shared by both scopes: attempts,
//! correct answers, the daily streak and a calendar of daily counters.
//! [`UserStats`] adds the global-only fields on top of it.

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, Days, NaiveDate};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{constants, ids::RoomId};

/// Attempts and correct answers on one calendar day
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyActivity {
    /// Answers given
    pub attempts: u64,
    /// Correct answers given
    pub correct: u64,
}

impl std::ops::AddAssign for DailyActivity {
    fn add_assign(&mut self, rhs: Self) {
        self.attempts += rhs.attempts;
        self.correct += rhs.correct;
    }
}

/// A calendar window ending today
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    /// Today only
    Today,
    /// Since Monday of the current week
    Week,
    /// Since the first of the current month
    Month,
}

impl Period {
    /// First day of the window that contains `today`
    pub fn start(self, today: NaiveDate) -> NaiveDate {
        match self {
            Self::Today => today,
            Self::Week => today
                .checked_sub_days(Days::new(u64::from(
                    today.weekday().num_days_from_monday(),
                )))
                .unwrap_or(today),
            Self::Month => today.with_day(1).unwrap_or(today),
        }
    }

    /// Whether `date` falls within the window ending `today`
    pub fn contains(self, date: NaiveDate, today: NaiveDate) -> bool {
        (self.start(today)..=today).contains(&date)
    }
}

/// Percentage of correct answers, `0.0` when nothing was attempted
pub fn success_rate(correct: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        correct as f64 / total as f64 * 100.0
    }
}

/// Counters for one scope (a user overall, or a user within one room)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Activity {
    /// Answers given
    pub total_attempts: u64,
    /// Correct answers given
    pub correct_count: u64,
    /// Consecutive days, ending on the last correct day, with a correct answer
    pub current_streak: u32,
    /// Best streak ever reached
    pub longest_streak: u32,
    /// Day of the last correct answer
    pub last_correct_date: Option<NaiveDate>,
    /// Day of the last answer, correct or not
    pub last_activity_date: Option<NaiveDate>,
    /// Counters per calendar day
    pub daily_activity: BTreeMap<NaiveDate, DailyActivity>,
}

/// Statistics of a user within one room
pub type RoomStats = Activity;

impl Activity {
    /// Applies one resolved answer given on `today`
    pub fn record(&mut self, today: NaiveDate, correct: bool) {
        self.total_attempts += 1;
        self.last_activity_date = Some(today);

        let day = self.daily_activity.entry(today).or_default();
        day.attempts += 1;

        if !correct {
            self.current_streak = 0;
            return;
        }

        self.correct_count += 1;
        day.correct += 1;
        self.current_streak = match self.last_correct_date {
            Some(last) if last == today && self.current_streak > 0 => self.current_streak,
            Some(last) if today.pred_opt() == Some(last) => self.current_streak + 1,
            _ => 1,
        };
        self.longest_streak = self.longest_streak.max(self.current_streak);
        self.last_correct_date = Some(today);
    }

    /// Answers given minus correct answers
    pub fn wrong_answers(&self) -> u64 {
        self.total_attempts.saturating_sub(self.correct_count)
    }

    /// Percentage of correct answers
    pub fn accuracy(&self) -> f64 {
        success_rate(self.correct_count, self.total_attempts)
    }

    /// Summed daily counters within `period`
    pub fn rollup(&self, period: Period, today: NaiveDate) -> DailyActivity {
        self.daily_activity
            .range(period.start(today)..=today)
            .fold(DailyActivity::default(), |mut sum, (_, day)| {
                sum += *day;
                sum
            })
    }

    /// Whether the last answer falls within `period`
    pub fn active_in(&self, period: Period, today: NaiveDate) -> bool {
        self.last_activity_date
            .is_some_and(|date| period.contains(date, today))
    }
}

/// Statistics of one user across all rooms
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserStats {
    /// Counters across all rooms
    #[serde(flatten)]
    pub activity: Activity,
    /// Day of the first recorded answer
    pub join_date: Option<NaiveDate>,
    /// Correct answers per question category
    pub category_scores: HashMap<String, u64>,
    /// Counters per room
    pub rooms: HashMap<RoomId, RoomStats>,
}

impl UserStats {
    /// The category with the most correct answers, if it reached the
    /// mastery threshold
    pub fn mastery(&self) -> Option<&str> {
        self.category_scores
            .iter()
            .filter(|(_, count)| **count >= constants::stats::MASTERY_THRESHOLD)
            .sorted_by(|(a_name, a), (b_name, b)| b.cmp(a).then_with(|| a_name.cmp(b_name)))
            .map(|(name, _)| name.as_str())
            .next()
    }
}

/// Brings `stats` back in line with the legacy `score`
///
/// The score map is authoritative: the correct count is rewritten to match
/// it, and the attempt count is raised if it would otherwise fall below
/// the correct count.
pub fn repair(mut stats: UserStats, score: u64) -> UserStats {
    if stats.activity.correct_count != score {
        stats.activity.correct_count = score;
        stats.activity.total_attempts = stats.activity.total_attempts.max(score);
    }
    stats
}

/// Today, week and month counters of one scope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Rollups {
    /// Today's counters
    pub today: DailyActivity,
    /// Counters since Monday
    pub week: DailyActivity,
    /// Counters since the first of the month
    pub month: DailyActivity,
}

impl Rollups {
    /// Computes all three windows for `activity`
    pub fn of(activity: &Activity, today: NaiveDate) -> Self {
        Self {
            today: activity.rollup(Period::Today, today),
            week: activity.rollup(Period::Week, today),
            month: activity.rollup(Period::Month, today),
        }
    }
}
