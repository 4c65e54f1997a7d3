//! Durable storage of the four persisted collections
//!
//! Questions, scores, active rooms and stats are stored independently as
//! JSON documents. Loading never fails: a missing or unreadable collection
//! starts empty while the others load normally. Saving is throttled to a
//! minimum interval unless forced, and write failures are returned.

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use enum_map::{Enum, EnumMap};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use web_time::Instant;

use crate::{
    ids::UserId,
    ledger::Ledger,
    question::{Question, QuestionStore},
    rooms::ActiveRooms,
    stats::UserStats,
};

/// One independently stored collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum, derive_more::Display)]
pub enum Collection {
    /// The question list
    #[display("questions")]
    Questions,
    /// The legacy score map
    #[display("scores")]
    Scores,
    /// Rooms subscribed to quizzes
    #[display("active rooms")]
    ActiveRooms,
    /// Per-user statistics
    #[display("stats")]
    Stats,
}

impl Collection {
    /// File name used by [`FileStorage`]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Questions => "questions.json",
            Self::Scores => "scores.json",
            Self::ActiveRooms => "active_chats.json",
            Self::Stats => "stats.json",
        }
    }
}

/// Errors while writing state
#[derive(Error, Debug)]
pub enum Error {
    /// The storage backend failed
    #[error("failed to write {collection}: {source}")]
    Io {
        /// Collection being written
        collection: Collection,
        /// Underlying failure
        #[source]
        source: io::Error,
    },
    /// A collection could not be encoded
    #[error("failed to serialize {collection}: {source}")]
    Serialize {
        /// Collection being written
        collection: Collection,
        /// Underlying failure
        #[source]
        source: serde_json::Error,
    },
}

/// A place the collections are read from and written to
pub trait Storage {
    /// Reads a collection, `None` if it was never written
    ///
    /// # Errors
    ///
    /// Returns the backend's failure to read.
    fn read(&self, collection: Collection) -> io::Result<Option<String>>;

    /// Replaces a collection with `contents`
    ///
    /// # Errors
    ///
    /// Returns the backend's failure to write.
    fn write(&self, collection: Collection, contents: &str) -> io::Result<()>;
}

/// Stores each collection as a JSON file in one directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl Default for FileStorage {
    fn default() -> Self {
        Self::new(crate::constants::persistence::DATA_DIR)
    }
}

impl FileStorage {
    /// Uses `dir`, creating it on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory holding the files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, collection: Collection) -> PathBuf {
        self.dir.join(collection.file_name())
    }
}

impl Storage for FileStorage {
    fn read(&self, collection: Collection) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path(collection)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, collection: Collection, contents: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path(collection);
        let temp = path.with_extension("json.tmp");
        fs::write(&temp, contents)?;
        fs::rename(&temp, &path)
    }
}

/// Keeps the collections in memory
///
/// Writes can be made to fail on demand to exercise error paths.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    collections: Mutex<EnumMap<Collection, Option<String>>>,
    failing: Mutex<bool>,
}

impl MemoryStorage {
    /// Creates an empty storage
    pub fn new() -> Self {
        Self::default()
    }

    fn collections(&self) -> MutexGuard<'_, EnumMap<Collection, Option<String>>> {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every following write fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap_or_else(PoisonError::into_inner) = failing;
    }

    /// Overwrites a collection directly, bypassing the engine
    pub fn put(&self, collection: Collection, contents: impl Into<String>) {
        self.collections()[collection] = Some(contents.into());
    }
}

impl Storage for MemoryStorage {
    fn read(&self, collection: Collection) -> io::Result<Option<String>> {
        Ok(self.collections()[collection].clone())
    }

    fn write(&self, collection: Collection, contents: &str) -> io::Result<()> {
        if *self.failing.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(io::Error::other("storage unavailable"));
        }
        self.put(collection, contents);
        Ok(())
    }
}

impl<S: Storage + ?Sized> Storage for std::sync::Arc<S> {
    fn read(&self, collection: Collection) -> io::Result<Option<String>> {
        (**self).read(collection)
    }

    fn write(&self, collection: Collection, contents: &str) -> io::Result<()> {
        (**self).write(collection, contents)
    }
}

/// How a collection fared during [`Persistence::load`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadStatus {
    /// Parsed successfully
    Loaded,
    /// Never written; started empty
    #[default]
    Missing,
    /// Unreadable or unparsable; started empty
    Corrupt,
}

/// Borrowed view of everything that gets persisted
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    /// The question list
    pub questions: &'a [Question],
    /// The legacy score map
    pub scores: &'a HashMap<UserId, u64>,
    /// Rooms subscribed to quizzes
    pub active_rooms: &'a ActiveRooms,
    /// Per-user statistics
    pub stats: &'a HashMap<UserId, UserStats>,
}

/// State rebuilt by [`Persistence::load`]
#[derive(Debug)]
pub struct Loaded {
    /// The question store, invalid records purged
    pub questions: QuestionStore,
    /// Stats and scores, reconciled
    pub ledger: Ledger,
    /// Rooms subscribed to quizzes
    pub active_rooms: ActiveRooms,
    /// Outcome per collection
    pub status: EnumMap<Collection, LoadStatus>,
}

/// Loads and saves state through a [`Storage`], throttling writes
#[derive(Debug)]
pub struct Persistence<S> {
    storage: S,
    min_interval: Duration,
    last_write: Option<Instant>,
    dirty: bool,
}

impl<S: Storage> Persistence<S> {
    /// Wraps `storage`, writing at most once per `min_interval` unless forced
    pub fn new(storage: S, min_interval: Duration) -> Self {
        Self {
            storage,
            min_interval,
            last_write: None,
            dirty: false,
        }
    }

    /// The underlying storage
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Whether changes are waiting for a write
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Reads all four collections
    ///
    /// A collection that is missing or fails to parse starts empty; the
    /// others are unaffected.
    pub fn load(&self) -> Loaded {
        let mut status = EnumMap::default();

        let records: Vec<serde_json::Value> =
            self.read_collection(Collection::Questions, &mut status);
        let (questions, _) = QuestionStore::from_records(records);
        let scores: HashMap<UserId, u64> = self.read_collection(Collection::Scores, &mut status);
        let active_rooms: ActiveRooms = self.read_collection(Collection::ActiveRooms, &mut status);
        let stats: HashMap<UserId, UserStats> =
            self.read_collection(Collection::Stats, &mut status);

        let mut ledger = Ledger::from_parts(stats, scores);
        let repaired = ledger.reconcile();
        if repaired > 0 {
            log::warn!("repaired {repaired} users whose stats diverged from their score");
        }

        log::info!(
            "loaded {} questions, {} users and {} active rooms",
            questions.len(),
            ledger.stats().len(),
            active_rooms.len()
        );
        Loaded {
            questions,
            ledger,
            active_rooms,
            status,
        }
    }

    fn read_collection<T: DeserializeOwned + Default>(
        &self,
        collection: Collection,
        status: &mut EnumMap<Collection, LoadStatus>,
    ) -> T {
        let contents = match self.storage.read(collection) {
            Ok(Some(contents)) => contents,
            Ok(None) => {
                log::info!("no stored {collection}, starting empty");
                status[collection] = LoadStatus::Missing;
                return T::default();
            }
            Err(e) => {
                log::warn!("could not read {collection}, starting empty: {e}");
                status[collection] = LoadStatus::Corrupt;
                return T::default();
            }
        };
        match serde_json::from_str(&contents) {
            Ok(value) => {
                status[collection] = LoadStatus::Loaded;
                value
            }
            Err(e) => {
                log::warn!("stored {collection} is corrupt, starting empty: {e}");
                status[collection] = LoadStatus::Corrupt;
                T::default()
            }
        }
    }

    /// Writes all four collections
    ///
    /// Unless `force` is set, the write is skipped when the previous one
    /// happened less than the minimum interval before `now`; the state then
    /// stays dirty. Returns whether anything was written.
    ///
    /// # Errors
    ///
    /// Returns the first collection that failed to serialize or write. The
    /// state stays dirty and no retry is attempted.
    pub fn save(
        &mut self,
        snapshot: Snapshot<'_>,
        force: bool,
        now: Instant,
    ) -> Result<bool, Error> {
        self.dirty = true;
        let throttled = self
            .last_write
            .is_some_and(|last| now.saturating_duration_since(last) < self.min_interval);
        if !force && throttled {
            return Ok(false);
        }

        self.write(Collection::Questions, snapshot.questions)?;
        self.write(Collection::Scores, snapshot.scores)?;
        self.write(Collection::ActiveRooms, snapshot.active_rooms)?;
        self.write(Collection::Stats, snapshot.stats)?;

        self.last_write = Some(now);
        self.dirty = false;
        if force {
            log::info!("state saved");
        }
        Ok(true)
    }

    fn write<T: Serialize + ?Sized>(
        &self,
        collection: Collection,
        value: &T,
    ) -> Result<(), Error> {
        let contents = serde_json::to_string_pretty(value).map_err(|source| {
            log::error!("failed to serialize {collection}: {source}");
            Error::Serialize { collection, source }
        })?;
        self.storage.write(collection, &contents).map_err(|source| {
            log::error!("failed to write {collection}: {source}");
            Error::Io { collection, source }
        })
    }
}
