//! The quiz engine
//!
//! [`QuizEngine`] wires the question store, the per-room scheduler, the
//! statistics ledger, the open poll registry, the leaderboard cache and the
//! persistence layer to the inbound events of the bot: quiz ticks, answers,
//! room membership changes and admin operations.

use std::{
    fmt::Debug,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{Local, NaiveDate};
use derive_where::derive_where;
use enum_map::EnumMap;
use itertools::Itertools;
use web_time::{Instant, SystemTime};

use crate::{
    TruncatedVec,
    config::Settings,
    constants,
    error::Result,
    ids::{PollId, QuestionId, RoomId, UserId},
    leaderboard::{LeaderboardEntry, Leaderboards, RoomLeaderboard},
    ledger::{GlobalStats, Ledger, UserReport},
    persistence::{Collection, LoadStatus, Persistence, Snapshot, Storage},
    poll::{OpenPolls, Resolution},
    question::{AddReport, Draft, IndexBase, Question, QuestionStore},
    rooms::ActiveRooms,
    scheduler::Scheduler,
    session::{DispatchQuestion, Messenger, Notice, OpenPollRegistered},
};

/// Source of the current date and time
pub trait Clock {
    /// The current local calendar date
    fn today(&self) -> NaiveDate;
    /// The current wall-clock time
    fn now(&self) -> SystemTime;
    /// A monotonic timestamp
    fn instant(&self) -> Instant;
}

/// The machine's clock, dated in local time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }

    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug)]
struct FixedState {
    today: NaiveDate,
    now: SystemTime,
    instant: Instant,
}

/// A clock that only moves when told to
///
/// Clones share the same time, so a test can keep one handle and give
/// another to the engine.
#[derive(Debug, Clone)]
pub struct FixedClock {
    state: Arc<Mutex<FixedState>>,
}

impl FixedClock {
    /// Starts at `today`, with the time taken from the machine once
    pub fn new(today: NaiveDate) -> Self {
        Self {
            state: Arc::new(Mutex::new(FixedState {
                today,
                now: SystemTime::now(),
                instant: Instant::now(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, FixedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves the time forward; the date is left alone
    pub fn advance(&self, by: Duration) {
        let mut state = self.state();
        state.now += by;
        state.instant += by;
    }

    /// Changes the date
    pub fn set_today(&self, today: NaiveDate) {
        self.state().today = today;
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.state().today
    }

    fn now(&self) -> SystemTime {
        self.state().now
    }

    fn instant(&self) -> Instant {
        self.state().instant
    }
}

/// What a quiz tick did for a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A poll was sent and is awaiting answers
    Dispatched(OpenPollRegistered),
    /// The store is empty; the room was told so
    NoQuestions,
    /// The messenger could not deliver the poll
    DeliveryFailed,
}

/// What an answer event did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// The answer was judged and recorded
    Recorded {
        /// Whether the chosen option was correct
        correct: bool,
        /// Zero-based index of the correct option
        correct_index: usize,
        /// The user's score after this answer
        score: u64,
        /// The user's streak after this answer
        current_streak: u32,
    },
    /// The user already answered this poll
    AlreadyAnswered,
    /// Unknown or expired poll; nothing changed
    Ignored,
}

/// Hands a picked question to the messenger
///
/// Does not touch the engine, so callers may run it unlocked.
fn send<M: Messenger>(
    room: RoomId,
    question: Option<Question>,
    messenger: &M,
) -> Result<(PollId, Question), TickOutcome> {
    let Some(question) = question else {
        log::debug!("no question available for {room}");
        messenger.send_notice(room, Notice::NoQuestionsAvailable);
        return Err(TickOutcome::NoQuestions);
    };

    let Some(poll) = messenger.send_question(&DispatchQuestion::new(room, &question)) else {
        log::warn!("could not deliver question {} to {room}", question.id());
        return Err(TickOutcome::DeliveryFailed);
    };

    log::debug!("sent question {} to {room} as {poll}", question.id());
    Ok((poll, question))
}

/// The quiz state and scoring engine
pub struct QuizEngine<S> {
    questions: QuestionStore,
    scheduler: Scheduler,
    ledger: Ledger,
    active_rooms: ActiveRooms,
    polls: OpenPolls,
    leaderboards: Leaderboards,
    persistence: Persistence<S>,
    clock: Box<dyn Clock + Send>,
    last_sweep: Option<Instant>,
}

impl<S> Debug for QuizEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuizEngine")
            .field("questions", &self.questions.len())
            .field("users", &self.ledger.stats().len())
            .field("active_rooms", &self.active_rooms.len())
            .field("open_polls", &self.polls.len())
            .finish_non_exhaustive()
    }
}

impl<S: Storage> QuizEngine<S> {
    /// Creates an empty engine on the system clock
    ///
    /// Call [`QuizEngine::load`] to restore persisted state.
    pub fn new(storage: S, settings: Settings) -> Self {
        Self::with_clock(storage, settings, SystemClock)
    }

    /// Creates an empty engine on a custom clock
    pub fn with_clock(storage: S, settings: Settings, clock: impl Clock + Send + 'static) -> Self {
        Self {
            questions: QuestionStore::default(),
            scheduler: Scheduler::default(),
            ledger: Ledger::default(),
            active_rooms: ActiveRooms::default(),
            polls: OpenPolls::new(settings.poll_ttl),
            leaderboards: Leaderboards::new(settings.leaderboard_cache),
            persistence: Persistence::new(storage, settings.save_interval),
            clock: Box::new(clock),
            last_sweep: None,
        }
    }

    /// Replaces the in-memory state with the persisted one
    ///
    /// Never fails: unusable collections start empty and are reported as
    /// such. Scheduler pools and cached leaderboards are dropped.
    pub fn load(&mut self) -> EnumMap<Collection, LoadStatus> {
        let loaded = self.persistence.load();
        self.questions = loaded.questions;
        self.ledger = loaded.ledger;
        self.active_rooms = loaded.active_rooms;
        self.scheduler.reset();
        self.leaderboards.invalidate();
        loaded.status
    }

    fn save(&mut self, force: bool) -> Result<bool> {
        let snapshot = Snapshot {
            questions: self.questions.all(),
            scores: self.ledger.scores(),
            active_rooms: &self.active_rooms,
            stats: self.ledger.stats(),
        };
        let now = self.clock.instant();
        Ok(self.persistence.save(snapshot, force, now)?)
    }

    /// Writes the state regardless of the save interval
    ///
    /// # Errors
    ///
    /// Returns the persistence failure.
    pub fn flush(&mut self) -> Result<bool> {
        self.save(true)
    }

    /// Sends the next question of `room` through `messenger`
    ///
    /// An empty store produces a notice instead of a poll. Expired polls
    /// are swept at most once per sweep interval. The messenger is called
    /// while the engine is borrowed; [`SharedEngine::on_quiz_tick`] calls
    /// it without holding the lock.
    pub fn on_quiz_tick<M: Messenger>(&mut self, room: RoomId, messenger: &M) -> TickOutcome {
        let question = self.pick_question(room);
        match send(room, question, messenger) {
            Ok((poll, question)) => {
                TickOutcome::Dispatched(self.register_poll(poll, room, &question))
            }
            Err(outcome) => outcome,
        }
    }

    /// Runs a quiz tick for every active room
    pub fn on_scheduled_tick<M: Messenger>(
        &mut self,
        messenger: &M,
    ) -> Vec<(RoomId, TickOutcome)> {
        let rooms = self.active_rooms.iter().collect_vec();
        rooms
            .into_iter()
            .map(|room| (room, self.on_quiz_tick(room, messenger)))
            .collect()
    }

    /// Takes the next question of `room` off its pool, sweeping expired
    /// polls when due
    ///
    /// The first half of a quiz tick; pass the question to
    /// [`QuizEngine::register_poll`] once the platform accepted it.
    pub fn pick_question(&mut self, room: RoomId) -> Option<Question> {
        self.sweep_if_due();
        self.next_question(Some(room))
    }

    /// Opens a poll for `question`, sent to `room` under `poll`
    pub fn register_poll(
        &mut self,
        poll: PollId,
        room: RoomId,
        question: &Question,
    ) -> OpenPollRegistered {
        self.polls.open(poll, room, question, self.clock.now())
    }

    /// The next question for `room`, or a random one without a room
    pub fn next_question(&mut self, room: Option<RoomId>) -> Option<Question> {
        self.scheduler
            .next_question(&self.questions, room)
            .map(|(_, question)| question.clone())
    }

    /// Judges and records an answer to an open poll
    ///
    /// The answer is matched against the poll registered under `poll`. The
    /// first answer of each user is recorded in the ledger, both globally
    /// and for the poll's room, and the state is saved subject to the save
    /// interval.
    ///
    /// # Arguments
    ///
    /// * `poll` - The platform's identifier of the answered poll
    /// * `user` - The answering user
    /// * `option` - Zero-based index of the chosen option
    ///
    /// # Returns
    ///
    /// [`AnswerOutcome::Recorded`] with the user's new score and streak,
    /// [`AnswerOutcome::AlreadyAnswered`] for a repeated answer, or
    /// [`AnswerOutcome::Ignored`] for an unknown or expired poll. The last
    /// two leave the state untouched.
    ///
    /// # Errors
    ///
    /// Returns the persistence failure. The answer is recorded in memory
    /// either way.
    pub fn on_answer(
        &mut self,
        poll: &PollId,
        user: UserId,
        option: usize,
    ) -> Result<AnswerOutcome> {
        let answer = match self.polls.resolve(poll, user, option, self.clock.now()) {
            Resolution::Accepted(answer) => answer,
            Resolution::AlreadyAnswered => return Ok(AnswerOutcome::AlreadyAnswered),
            Resolution::Ignored => return Ok(AnswerOutcome::Ignored),
        };

        let today = self.clock.today();
        let category = answer.category.as_deref();
        let current_streak = self
            .ledger
            .record_attempt(user, answer.room, answer.correct, category, today)
            .activity
            .current_streak;
        let outcome = AnswerOutcome::Recorded {
            correct: answer.correct,
            correct_index: answer.correct_index,
            score: self.ledger.score(user),
            current_streak,
        };

        self.save(false)?;
        Ok(outcome)
    }

    /// Subscribes `room` to scheduled quizzes, returning whether it was new
    ///
    /// # Errors
    ///
    /// Returns the persistence failure.
    pub fn on_room_joined(&mut self, room: RoomId) -> Result<bool> {
        if !self.active_rooms.insert(room) {
            return Ok(false);
        }
        log::info!("room {room} activated");
        self.save(false)?;
        Ok(true)
    }

    /// Unsubscribes `room`, returning whether it was subscribed
    ///
    /// # Errors
    ///
    /// Returns the persistence failure.
    pub fn on_room_left(&mut self, room: RoomId) -> Result<bool> {
        self.scheduler.forget(room);
        if !self.active_rooms.remove(room) {
            return Ok(false);
        }
        log::info!("room {room} deactivated");
        self.save(false)?;
        Ok(true)
    }

    /// Imports a batch of questions and saves immediately
    ///
    /// # Errors
    ///
    /// Returns an error if the batch is too large, in which case nothing is
    /// imported, or if the save fails.
    pub fn add_questions(&mut self, batch: Vec<Draft>, base: IndexBase) -> Result<AddReport> {
        let report = self.questions.add_questions(batch, base)?;
        log::info!(
            "imported {} questions, rejected {}",
            report.added,
            report.rejected_total()
        );
        if report.added > 0 {
            self.leaderboards.invalidate();
            self.save(true)?;
        }
        Ok(report)
    }

    /// Deletes the question at `index` and saves immediately
    ///
    /// An index out of range changes nothing and returns `None`.
    ///
    /// # Errors
    ///
    /// Returns the persistence failure.
    pub fn delete_question(&mut self, index: usize) -> Result<Option<Question>> {
        let deleted = self.questions.delete_question(index);
        self.after_delete(deleted)
    }

    /// Deletes the question with the stable `id` and saves immediately
    ///
    /// # Errors
    ///
    /// Returns the persistence failure.
    pub fn delete_question_by_id(&mut self, id: QuestionId) -> Result<Option<Question>> {
        let deleted = self.questions.delete_by_id(id);
        self.after_delete(deleted)
    }

    fn after_delete(&mut self, deleted: Option<Question>) -> Result<Option<Question>> {
        if let Some(question) = &deleted {
            log::info!("deleted question {}", question.id());
            self.leaderboards.invalidate();
            self.save(true)?;
        }
        Ok(deleted)
    }

    /// Deletes every question and saves immediately
    ///
    /// # Errors
    ///
    /// Returns the persistence failure.
    pub fn clear_all_questions(&mut self) -> Result<usize> {
        let cleared = self.questions.clear();
        log::info!("cleared {cleared} questions");
        self.leaderboards.invalidate();
        self.save(true)?;
        Ok(cleared)
    }

    /// All questions in display order
    pub fn questions(&self) -> &[Question] {
        self.questions.all()
    }

    /// The question at `index`
    pub fn question(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    /// Distinct categories of the stored questions
    pub fn categories(&self) -> Vec<&str> {
        self.questions.categories()
    }

    /// The statistics view of `user`
    pub fn user_stats(&mut self, user: UserId) -> Option<UserReport> {
        let today = self.clock.today();
        self.ledger.user_report(user, today)
    }

    /// The legacy score of `user`, 0 if unknown
    pub fn score(&self, user: UserId) -> u64 {
        self.ledger.score(user)
    }

    /// The top `size` users across all rooms
    pub fn global_leaderboard(&mut self, size: usize) -> TruncatedVec<LeaderboardEntry> {
        let now = self.clock.instant();
        self.leaderboards.global(&mut self.ledger, size, now)
    }

    /// The top `size` members of `room` with the room's aggregates
    pub fn room_leaderboard(&mut self, room: RoomId, size: usize) -> RoomLeaderboard {
        let today = self.clock.today();
        let now = self.clock.instant();
        self.leaderboards.room(&mut self.ledger, room, size, today, now)
    }

    /// Bot-wide statistics
    pub fn global_stats(&mut self) -> GlobalStats {
        let today = self.clock.today();
        let available = self.questions.len();
        self.ledger.global_stats(&self.active_rooms, available, today)
    }

    /// Most recent day anyone answered in `room`
    pub fn room_last_activity(&self, room: RoomId) -> Option<NaiveDate> {
        self.ledger.room_last_activity(room)
    }

    /// Rooms subscribed to scheduled quizzes
    pub fn active_rooms(&self) -> &ActiveRooms {
        &self.active_rooms
    }

    /// The open poll registry
    pub fn open_polls(&self) -> &OpenPolls {
        &self.polls
    }

    /// The statistics ledger
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// The persistence layer
    pub fn persistence(&self) -> &Persistence<S> {
        &self.persistence
    }

    /// Drops expired polls, returning how many were dropped
    pub fn sweep_polls(&mut self) -> usize {
        self.last_sweep = Some(self.clock.instant());
        self.polls.sweep(self.clock.now())
    }

    fn sweep_if_due(&mut self) {
        let now = self.clock.instant();
        let due = |last: Instant| {
            now.saturating_duration_since(last) >= constants::poll::SWEEP_INTERVAL
        };
        if self.last_sweep.is_none_or(due) {
            self.sweep_polls();
        }
    }
}

/// A [`QuizEngine`] shared between threads
///
/// Every mutation of the ledger, the scheduler and the store happens under
/// one lock. Quiz ticks release it while the messenger delivers the poll.
#[derive_where(Debug, Clone)]
pub struct SharedEngine<S> {
    inner: Arc<Mutex<QuizEngine<S>>>,
}

impl<S: Storage> SharedEngine<S> {
    /// Wraps `engine`
    pub fn new(engine: QuizEngine<S>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QuizEngine<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with exclusive access to the engine
    pub fn with<R>(&self, f: impl FnOnce(&mut QuizEngine<S>) -> R) -> R {
        f(&mut self.lock())
    }

    /// Sends the next question of `room` through `messenger`
    ///
    /// The question is picked and the poll registered under the lock; the
    /// messenger runs in between with the lock released, so a slow platform
    /// does not stall answers from other rooms.
    pub fn on_quiz_tick<M: Messenger>(&self, room: RoomId, messenger: &M) -> TickOutcome {
        let question = self.lock().pick_question(room);
        match send(room, question, messenger) {
            Ok((poll, question)) => {
                let registered = self.lock().register_poll(poll, room, &question);
                TickOutcome::Dispatched(registered)
            }
            Err(outcome) => outcome,
        }
    }

    /// Runs a quiz tick for every active room
    pub fn on_scheduled_tick<M: Messenger>(&self, messenger: &M) -> Vec<(RoomId, TickOutcome)> {
        let rooms = self.lock().active_rooms().iter().collect_vec();
        rooms
            .into_iter()
            .map(|room| (room, self.on_quiz_tick(room, messenger)))
            .collect()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::{cell::RefCell, collections::HashSet};

    use super::*;
    use crate::persistence::MemoryStorage;

    const ROOM: RoomId = RoomId(-1001);
    const ALICE: UserId = UserId(11);
    const BOB: UserId = UserId(12);

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        sent: RefCell<Vec<DispatchQuestion>>,
        notices: RefCell<Vec<(RoomId, Notice)>>,
        offline: bool,
    }

    impl Messenger for Recorder {
        fn send_question(&self, question: &DispatchQuestion) -> Option<PollId> {
            if self.offline {
                return None;
            }
            let mut sent = self.sent.borrow_mut();
            sent.push(question.clone());
            Some(PollId::from(format!("poll-{}", sent.len())))
        }

        fn send_notice(&self, room: RoomId, notice: Notice) {
            self.notices.borrow_mut().push((room, notice));
        }
    }

    fn engine() -> (QuizEngine<Arc<MemoryStorage>>, Arc<MemoryStorage>, FixedClock) {
        let _ = env_logger::builder().is_test(true).try_init();
        let storage = Arc::new(MemoryStorage::new());
        let clock = FixedClock::new(day(14));
        let settings = Settings::default();
        let engine = QuizEngine::with_clock(Arc::clone(&storage), settings, clock.clone());
        (engine, storage, clock)
    }

    fn france() -> Draft {
        Draft::new(
            "Capital of France?",
            &["London", "Paris", "Berlin", "Madrid"],
            1,
        )
    }

    fn single() -> Vec<Draft> {
        vec![france()]
    }

    fn batch() -> Vec<Draft> {
        vec![
            france(),
            Draft::new("Largest planet?", &["Mars", "Venus", "Jupiter", "Earth"], 2),
            Draft::new("Fastest animal?", &["Cheetah", "Horse", "Lion", "Hare"], 0),
        ]
    }

    #[test]
    fn test_end_to_end() {
        let (mut engine, _, _) = engine();
        let messenger = Recorder::default();

        let report = engine.add_questions(single(), IndexBase::Zero).unwrap();
        assert_eq!(report.added, 1);

        let TickOutcome::Dispatched(registered) = engine.on_quiz_tick(ROOM, &messenger) else {
            panic!("question should be dispatched");
        };
        assert_eq!(registered.correct_index, 1);
        assert_eq!(registered.room_id, ROOM);
        assert_eq!(messenger.sent.borrow()[0].text, "Capital of France?");

        let outcome = engine.on_answer(&registered.poll_id, ALICE, 1).unwrap();
        assert_eq!(
            outcome,
            AnswerOutcome::Recorded {
                correct: true,
                correct_index: 1,
                score: 1,
                current_streak: 1,
            }
        );

        let stats = engine.ledger().user(ALICE).unwrap();
        assert_eq!(stats.activity.correct_count, 1);
        assert_eq!(stats.rooms[&ROOM].correct_count, 1);
        assert_eq!(engine.score(ALICE), 1);

        let board = engine.global_leaderboard(constants::leaderboard::DEFAULT_SIZE);
        let leader = &board.items()[0];
        assert_eq!(leader.rank, 1);
        assert_eq!(leader.user, ALICE);
        assert!((leader.accuracy - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_answers_recorded_once() {
        let (mut engine, _, _) = engine();
        let messenger = Recorder::default();
        engine.add_questions(single(), IndexBase::Zero).unwrap();
        let TickOutcome::Dispatched(registered) = engine.on_quiz_tick(ROOM, &messenger) else {
            panic!("question should be dispatched");
        };

        engine.on_answer(&registered.poll_id, ALICE, 0).unwrap();
        assert_eq!(
            engine.on_answer(&registered.poll_id, ALICE, 1).unwrap(),
            AnswerOutcome::AlreadyAnswered
        );
        assert_eq!(
            engine.on_answer(&"unknown".into(), BOB, 1).unwrap(),
            AnswerOutcome::Ignored
        );

        let stats = engine.ledger().user(ALICE).unwrap();
        assert_eq!(stats.activity.total_attempts, 1);
        assert_eq!(stats.activity.correct_count, 0);
        assert!(engine.ledger().user(BOB).is_none());
    }

    #[test]
    fn test_expired_poll_ignored() {
        let (mut engine, _, clock) = engine();
        let messenger = Recorder::default();
        engine.add_questions(single(), IndexBase::Zero).unwrap();
        let TickOutcome::Dispatched(registered) = engine.on_quiz_tick(ROOM, &messenger) else {
            panic!("question should be dispatched");
        };

        clock.advance(constants::poll::TTL);
        assert_eq!(
            engine.on_answer(&registered.poll_id, ALICE, 1).unwrap(),
            AnswerOutcome::Ignored
        );
        assert_eq!(engine.score(ALICE), 0);
    }

    #[test]
    fn test_empty_store_sends_notice() {
        let (mut engine, _, _) = engine();
        let messenger = Recorder::default();

        assert_eq!(
            engine.on_quiz_tick(ROOM, &messenger),
            TickOutcome::NoQuestions
        );
        assert_eq!(
            messenger.notices.borrow().as_slice(),
            &[(ROOM, Notice::NoQuestionsAvailable)]
        );
        assert!(engine.next_question(None).is_none());
    }

    #[test]
    fn test_failed_delivery_opens_no_poll() {
        let (mut engine, _, _) = engine();
        let messenger = Recorder {
            offline: true,
            ..Recorder::default()
        };
        engine.add_questions(batch(), IndexBase::Zero).unwrap();

        assert_eq!(
            engine.on_quiz_tick(ROOM, &messenger),
            TickOutcome::DeliveryFailed
        );
        assert!(engine.open_polls().is_empty());
    }

    #[test]
    fn test_scheduled_tick_covers_active_rooms() {
        let (mut engine, _, _) = engine();
        let messenger = Recorder::default();
        engine.add_questions(batch(), IndexBase::Zero).unwrap();
        assert!(engine.on_room_joined(RoomId(-1)).unwrap());
        assert!(engine.on_room_joined(RoomId(-2)).unwrap());
        assert!(!engine.on_room_joined(RoomId(-2)).unwrap());

        let outcomes = engine.on_scheduled_tick(&messenger);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(engine.open_polls().len(), 2);

        assert!(engine.on_room_left(RoomId(-1)).unwrap());
        assert!(!engine.on_room_left(RoomId(-1)).unwrap());
        assert_eq!(engine.on_scheduled_tick(&messenger).len(), 1);
    }

    #[test]
    fn test_room_sees_every_question_before_repeat() {
        let (mut engine, _, _) = engine();
        let messenger = Recorder::default();
        engine.add_questions(batch(), IndexBase::Zero).unwrap();

        for _ in 0..3 {
            engine.on_quiz_tick(ROOM, &messenger);
        }
        let texts: HashSet<String> = messenger
            .sent
            .borrow()
            .iter()
            .map(|sent| sent.text.clone())
            .collect();
        assert_eq!(texts.len(), 3);
    }

    #[test]
    fn test_admin_operations_save_immediately() {
        let (mut engine, storage, _) = engine();
        engine.add_questions(batch(), IndexBase::Zero).unwrap();
        assert!(!engine.persistence().is_dirty());

        let first = engine.questions()[0].id();
        let deleted = engine.delete_question_by_id(first).unwrap();
        assert_eq!(deleted.map(|question| question.id()), Some(first));
        assert!(engine.delete_question(10).unwrap().is_none());
        assert_eq!(engine.questions().len(), 2);

        let mut reloaded = QuizEngine::with_clock(
            Arc::clone(&storage),
            Settings::default(),
            FixedClock::new(day(14)),
        );
        reloaded.load();
        assert_eq!(reloaded.questions(), engine.questions());

        assert_eq!(engine.clear_all_questions().unwrap(), 2);
        reloaded.load();
        assert!(reloaded.questions().is_empty());
    }

    #[test]
    fn test_answers_are_throttled_until_flush() {
        let (mut engine, storage, clock) = engine();
        let messenger = Recorder::default();
        engine.add_questions(single(), IndexBase::Zero).unwrap();

        let TickOutcome::Dispatched(registered) = engine.on_quiz_tick(ROOM, &messenger) else {
            panic!("question should be dispatched");
        };
        clock.advance(Duration::from_secs(60));
        engine.on_answer(&registered.poll_id, ALICE, 1).unwrap();
        assert!(engine.persistence().is_dirty());
        let scores = storage.read(Collection::Scores).unwrap();
        assert_eq!(scores.as_deref(), Some("{}"));

        assert!(engine.flush().unwrap());
        let mut reloaded =
            QuizEngine::with_clock(Arc::clone(&storage), Settings::default(), clock.clone());
        reloaded.load();
        assert_eq!(reloaded.score(ALICE), 1);
        assert_eq!(reloaded.ledger(), engine.ledger());
    }

    #[test]
    fn test_persistence_failure_is_returned() {
        let (mut engine, storage, _) = engine();
        storage.set_failing(true);

        let error = engine.add_questions(single(), IndexBase::Zero).unwrap_err();
        assert!(matches!(error, crate::Error::Persistence(_)));
        // the import itself stays applied
        assert_eq!(engine.questions().len(), 1);

        storage.set_failing(false);
        assert!(engine.flush().unwrap());
    }

    #[test]
    fn test_oversized_batch_rejected() {
        let (mut engine, _, _) = engine();
        let drafts = (0..=constants::question::MAX_BATCH_SIZE)
            .map(|i| Draft::new(format!("Question number {i}?"), &["a", "b", "c", "d"], 0))
            .collect();
        let error = engine.add_questions(drafts, IndexBase::Zero).unwrap_err();
        assert!(matches!(error, crate::Error::Batch(_)));
        assert!(engine.questions().is_empty());
    }

    #[test]
    fn test_views_across_days() {
        let (mut engine, _, clock) = engine();
        let messenger = Recorder::default();
        engine.add_questions(batch(), IndexBase::Zero).unwrap();
        engine.on_room_joined(ROOM).unwrap();

        for (date, user) in [(14, ALICE), (15, ALICE), (15, BOB)] {
            clock.set_today(day(date));
            let TickOutcome::Dispatched(registered) = engine.on_quiz_tick(ROOM, &messenger) else {
                panic!("question should be dispatched");
            };
            engine
                .on_answer(&registered.poll_id, user, registered.correct_index)
                .unwrap();
        }

        let alice = engine.user_stats(ALICE).unwrap();
        assert_eq!(alice.current_streak, 2);
        assert_eq!(alice.rank, Some(1));
        assert_eq!(alice.join_date, Some(day(14)));
        assert!(engine.user_stats(UserId(99)).is_none());

        let board = engine.room_leaderboard(ROOM, 10);
        assert_eq!(board.total_correct, 3);
        assert_eq!(board.standings.exact_count(), 2);

        let global = engine.global_stats();
        assert_eq!(global.total_users, 2);
        assert_eq!(global.new_users_today, 1);
        assert_eq!(global.questions_available, 3);
        assert_eq!(engine.room_last_activity(ROOM), Some(day(15)));
    }

    #[test]
    fn test_sweep_drops_expired_polls() {
        let (mut engine, _, clock) = engine();
        let messenger = Recorder::default();
        engine.add_questions(batch(), IndexBase::Zero).unwrap();
        engine.on_quiz_tick(ROOM, &messenger);
        assert_eq!(engine.open_polls().len(), 1);

        clock.advance(constants::poll::SWEEP_INTERVAL);
        // the tick sweeps the old poll before opening a new one
        engine.on_quiz_tick(ROOM, &messenger);
        assert_eq!(engine.open_polls().len(), 1);

        clock.advance(constants::poll::TTL);
        assert_eq!(engine.sweep_polls(), 1);
    }

    #[test]
    fn test_shared_engine() {
        let (engine, _, _) = engine();
        let shared = SharedEngine::new(engine);
        let handle = shared.clone();

        std::thread::spawn(move || {
            handle.with(|engine| engine.on_room_joined(ROOM).unwrap());
        })
        .join()
        .unwrap();

        assert!(shared.with(|engine| engine.active_rooms().contains(ROOM)));
    }

    struct Unlocked<'a> {
        shared: &'a SharedEngine<Arc<MemoryStorage>>,
        unlocked: RefCell<Vec<bool>>,
    }

    impl Messenger for Unlocked<'_> {
        fn send_question(&self, _: &DispatchQuestion) -> Option<PollId> {
            let free = self.shared.inner.try_lock().is_ok();
            self.unlocked.borrow_mut().push(free);
            Some(PollId::from("poll-shared"))
        }

        fn send_notice(&self, _: RoomId, _: Notice) {
            let free = self.shared.inner.try_lock().is_ok();
            self.unlocked.borrow_mut().push(free);
        }
    }

    #[test]
    fn test_shared_engine_sends_outside_the_lock() {
        let (engine, _, _) = engine();
        let shared = SharedEngine::new(engine);
        let messenger = Unlocked {
            shared: &shared,
            unlocked: RefCell::default(),
        };

        assert_eq!(
            shared.on_quiz_tick(ROOM, &messenger),
            TickOutcome::NoQuestions
        );

        shared.with(|engine| {
            engine.add_questions(batch(), IndexBase::Zero).unwrap();
            engine.on_room_joined(ROOM).unwrap();
        });
        let outcomes = shared.on_scheduled_tick(&messenger);
        let [(room, TickOutcome::Dispatched(registered))] = outcomes.as_slice() else {
            panic!("question should be dispatched");
        };
        assert_eq!(*room, ROOM);
        assert_eq!(registered.poll_id, PollId::from("poll-shared"));
        assert_eq!(messenger.unlocked.borrow().as_slice(), &[true, true]);

        let poll = registered.poll_id.clone();
        let outcome = shared.with(|engine| engine.on_answer(&poll, ALICE, 0));
        assert!(matches!(outcome.unwrap(), AnswerOutcome::Recorded { .. }));
    }
}
