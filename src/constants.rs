//! Configuration constants for the quiz engine
//!
//! This module contains the fixed limits, intervals and thresholds used
//! throughout the engine so that every component agrees on the same
//! boundaries.

use std::time::Duration;

/// Question store constants
pub mod question {
    /// Maximum number of questions accepted in a single import batch
    pub const MAX_BATCH_SIZE: usize = 500;
    /// Every question has exactly this many answer options
    pub const OPTION_COUNT: usize = 4;
    /// Highest valid zero-based index of the correct option
    pub const MAX_CORRECT_INDEX: usize = OPTION_COUNT - 1;
    /// Minimum length of a question text in characters
    pub const MIN_TEXT_LENGTH: usize = 5;
    /// Command token that sometimes leaks into imported question text
    pub const COMMAND_TOKEN: &str = "/addquiz";
}

/// Open poll constants
pub mod poll {
    use super::Duration;

    /// How long an open poll accepts answers
    pub const TTL: Duration = Duration::from_secs(60 * 60);
    /// How often the embedding runtime should sweep expired polls
    pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
}

/// Leaderboard constants
pub mod leaderboard {
    use super::Duration;

    /// Number of entries returned when no size is requested
    pub const DEFAULT_SIZE: usize = 10;
    /// How long a computed leaderboard may be served from cache
    pub const CACHE_WINDOW: Duration = Duration::from_secs(5 * 60);
}

/// Statistics constants
pub mod stats {
    /// Correct answers needed in a category before it counts as mastered
    pub const MASTERY_THRESHOLD: u64 = 10;
}

/// Persistence constants
pub mod persistence {
    use super::Duration;

    /// Minimum time between two unforced writes
    pub const SAVE_INTERVAL: Duration = Duration::from_secs(5 * 60);
    /// Default directory for the persisted collections
    pub const DATA_DIR: &str = "data";
}
