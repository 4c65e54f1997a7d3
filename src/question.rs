//! Question storage and validation
//!
//! This module holds the quiz questions, validates candidates on import,
//! rejects case-insensitive duplicates and keeps a version counter that the
//! scheduler compares against to notice when the store changed under it.

use std::collections::HashSet;

use enum_map::{Enum, EnumMap};
use garde::Validate;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{constants::question as limits, ids::QuestionId};

/// A multiple choice question with exactly four options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Question {
    /// Stable identifier, assigned on creation
    #[garde(skip)]
    #[serde(default)]
    id: QuestionId,
    /// The question text shown to the room
    #[garde(length(chars, min = limits::MIN_TEXT_LENGTH))]
    #[serde(rename = "question")]
    text: String,
    /// The answer options in display order
    #[garde(
        length(min = limits::OPTION_COUNT, max = limits::OPTION_COUNT),
        inner(length(min = 1))
    )]
    options: Vec<String>,
    /// Zero-based index of the correct option
    #[garde(range(max = limits::MAX_CORRECT_INDEX))]
    #[serde(rename = "correct_answer")]
    correct_index: usize,
    /// Optional topic used for category mastery
    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    category: Option<String>,
}

impl Question {
    /// Creates a question with a fresh id, without validating it
    pub fn new(
        text: impl Into<String>,
        options: Vec<String>,
        correct_index: usize,
        category: Option<String>,
    ) -> Self {
        Self {
            id: QuestionId::new(),
            text: text.into(),
            options,
            correct_index,
            category,
        }
    }

    /// The stable id of this question
    pub fn id(&self) -> QuestionId {
        self.id
    }

    /// The question text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The answer options
    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// Zero-based index of the correct option
    pub fn correct_index(&self) -> usize {
        self.correct_index
    }

    /// The category, if any
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// Whether this question satisfies every structural invariant
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    fn duplicate_key(&self) -> String {
        duplicate_key(&self.text)
    }
}

fn duplicate_key(text: &str) -> String {
    text.to_lowercase()
}

/// Removes a leaked `/addquiz` (optionally `/addquiz@botname`) prefix
fn strip_command_token(text: &str) -> &str {
    let trimmed = text.trim_start();
    let Some(head) = trimmed.split_whitespace().next() else {
        return trimmed;
    };
    let command = head.split('@').next().unwrap_or(head);
    if command.eq_ignore_ascii_case(limits::COMMAND_TOKEN) {
        trimmed[head.len()..].trim_start()
    } else {
        trimmed
    }
}

/// How the correct-answer index of an import batch is numbered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexBase {
    /// `0` is the first option
    #[default]
    Zero,
    /// `1` is the first option, as typed by humans
    One,
}

/// A question candidate as submitted by an admin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    /// The question text
    pub question: String,
    /// The answer options
    pub options: Vec<String>,
    /// Index of the correct option, numbered per the batch's [`IndexBase`]
    pub correct_answer: i64,
    /// Optional category
    #[serde(default)]
    pub category: Option<String>,
}

impl Draft {
    /// Creates a draft without a category
    pub fn new(question: impl Into<String>, options: &[&str], correct_answer: i64) -> Self {
        Self {
            question: question.into(),
            options: options.iter().map(|o| (*o).to_string()).collect(),
            correct_answer,
            category: None,
        }
    }

    fn into_question(self, base: IndexBase) -> Question {
        let offset = match base {
            IndexBase::Zero => 0,
            IndexBase::One => 1,
        };
        let correct_index = self
            .correct_answer
            .checked_sub(offset)
            .and_then(|index| usize::try_from(index).ok())
            .unwrap_or(usize::MAX);

        Question::new(
            rustrict::trim_whitespace(strip_command_token(&self.question)),
            self.options
                .iter()
                .map(|option| rustrict::trim_whitespace(option).to_owned())
                .collect(),
            correct_index,
            self.category
                .map(|category| rustrict::trim_whitespace(&category).to_owned())
                .filter(|category| !category.is_empty()),
        )
    }
}

/// Why a single candidate was rejected
#[derive(Error, Enum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    /// Same text (ignoring case) as an existing or earlier question
    #[error("duplicate question")]
    Duplicates,
    /// The question text is empty or too short
    #[error("question text is missing or too short")]
    InvalidFormat,
    /// Wrong option count, an empty option, or the correct index is out of range
    #[error("options or correct answer are invalid")]
    InvalidOptions,
}

impl Rejection {
    fn classify(report: &garde::Report) -> Self {
        let text_problem = report
            .iter()
            .any(|(path, _)| path.to_string().starts_with("text"));
        if text_problem {
            Self::InvalidFormat
        } else {
            Self::InvalidOptions
        }
    }
}

/// A rejected candidate and its position in the batch
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[error("question {position}: {reason}")]
pub struct Issue {
    /// Zero-based position of the candidate in the submitted batch
    pub position: usize,
    /// Why it was rejected
    pub reason: Rejection,
}

/// Outcome of an import batch
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct AddReport {
    /// Number of questions added to the store
    pub added: usize,
    /// Rejections counted by reason
    pub rejected: EnumMap<Rejection, usize>,
    /// One entry per rejected candidate
    pub errors: Vec<Issue>,
}

impl AddReport {
    /// Total number of rejected candidates
    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }

    fn reject(&mut self, position: usize, reason: Rejection) {
        self.rejected[reason] += 1;
        self.errors.push(Issue { position, reason });
    }
}

/// Errors that reject a whole batch
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchError {
    /// The batch holds more candidates than allowed
    #[error("batch of {0} questions exceeds the limit of {max}", max = limits::MAX_BATCH_SIZE)]
    TooLarge(usize),
}

/// The ordered collection of quiz questions
#[derive(Debug, Default, Clone)]
pub struct QuestionStore {
    questions: Vec<Question>,
    /// Lowercased texts for duplicate detection
    existing: HashSet<String>,
    /// Bumped on every mutation
    version: u64,
}

impl QuestionStore {
    /// Builds a store from previously persisted records
    ///
    /// Records that fail to parse, fail validation or duplicate an earlier
    /// record are dropped. Returns the store and the number of dropped
    /// records.
    pub fn from_records(records: Vec<serde_json::Value>) -> (Self, usize) {
        let total = records.len();
        let mut store = Self::default();
        for record in records {
            let Ok(question) = serde_json::from_value::<Question>(record) else {
                continue;
            };
            if question.is_valid() && store.existing.insert(question.duplicate_key()) {
                store.questions.push(question);
            }
        }
        let purged = total - store.questions.len();
        if purged > 0 {
            log::warn!("purged {purged} invalid or duplicate persisted questions");
        }
        (store, purged)
    }

    /// Validates and appends a batch of candidates
    ///
    /// Every candidate is judged on its own: the valid ones are added even
    /// if others are rejected.
    ///
    /// # Arguments
    ///
    /// * `batch` - The candidates, in the order they were submitted
    /// * `base` - Whether the candidates' correct indices count from 0 or 1
    ///
    /// # Returns
    ///
    /// How many questions were added and how many were rejected for each
    /// [`Rejection`] reason
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::TooLarge`] without touching the store if the
    /// batch exceeds [`limits::MAX_BATCH_SIZE`].
    pub fn add_questions(
        &mut self,
        batch: Vec<Draft>,
        base: IndexBase,
    ) -> Result<AddReport, BatchError> {
        if batch.len() > limits::MAX_BATCH_SIZE {
            return Err(BatchError::TooLarge(batch.len()));
        }

        let mut report = AddReport::default();
        for (position, draft) in batch.into_iter().enumerate() {
            let question = draft.into_question(base);
            if let Err(validation) = question.validate() {
                report.reject(position, Rejection::classify(&validation));
                continue;
            }
            if !self.existing.insert(question.duplicate_key()) {
                report.reject(position, Rejection::Duplicates);
                continue;
            }
            self.questions.push(question);
            report.added += 1;
        }

        if report.added > 0 {
            self.version += 1;
        }
        log::debug!(
            "imported {} questions, rejected {}",
            report.added,
            report.rejected_total()
        );
        Ok(report)
    }

    /// Removes the question at `index`
    ///
    /// Returns `None` and leaves the store untouched if the index is out of
    /// range. Later questions shift down by one.
    pub fn delete_question(&mut self, index: usize) -> Option<Question> {
        if index >= self.questions.len() {
            return None;
        }
        let removed = self.questions.remove(index);
        self.existing.remove(&removed.duplicate_key());
        self.version += 1;
        Some(removed)
    }

    /// Removes the question with the given stable id
    pub fn delete_by_id(&mut self, id: QuestionId) -> Option<Question> {
        let index = self.questions.iter().position(|q| q.id == id)?;
        self.delete_question(index)
    }

    /// Removes every question, returning how many were removed
    pub fn clear(&mut self) -> usize {
        let removed = self.questions.len();
        self.questions.clear();
        self.existing.clear();
        self.version += 1;
        removed
    }

    /// All questions in store order
    pub fn all(&self) -> &[Question] {
        &self.questions
    }

    /// The question at `index`
    pub fn get(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    /// The question with the given stable id
    pub fn get_by_id(&self, id: QuestionId) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    /// Current position of the question with the given id
    pub fn index_of(&self, id: QuestionId) -> Option<usize> {
        self.questions.iter().position(|q| q.id == id)
    }

    /// A uniformly random question, for callers without a room
    pub fn random(&self) -> Option<&Question> {
        if self.questions.is_empty() {
            return None;
        }
        self.questions.get(fastrand::usize(..self.questions.len()))
    }

    /// Number of questions
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// Whether the store holds no questions
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Mutation counter
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Distinct categories in use, sorted
    pub fn categories(&self) -> Vec<&str> {
        self.questions
            .iter()
            .filter_map(Question::category)
            .unique()
            .sorted()
            .collect()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

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

    #[test]
    fn test_add_valid_question() {
        let mut store = QuestionStore::default();
        let report = store.add_questions(single(), IndexBase::Zero).unwrap();

        assert_eq!(report.added, 1);
        assert_eq!(report.rejected_total(), 0);
        assert_eq!(store.len(), 1);

        let question = store.get(0).unwrap();
        assert_eq!(question.text(), "Capital of France?");
        assert_eq!(question.correct_index(), 1);
        assert_eq!(question.options()[1], "Paris");
        assert_eq!(store.get_by_id(question.id()), Some(question));
    }

    #[test]
    fn test_duplicate_against_store() {
        let mut store = QuestionStore::default();
        store.add_questions(single(), IndexBase::Zero).unwrap();

        let mut shouting = france();
        shouting.question = "CAPITAL OF FRANCE?".to_string();
        let report = store
            .add_questions(vec![shouting], IndexBase::Zero)
            .unwrap();

        assert_eq!(report.added, 0);
        assert_eq!(report.rejected[Rejection::Duplicates], 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_duplicate_within_batch() {
        let mut store = QuestionStore::default();
        let report = store
            .add_questions(vec![france(), france()], IndexBase::Zero)
            .unwrap();

        assert_eq!(report.added, 1);
        assert_eq!(report.rejected[Rejection::Duplicates], 1);
        assert_eq!(
            report.errors,
            vec![Issue {
                position: 1,
                reason: Rejection::Duplicates
            }]
        );
    }

    #[test]
    fn test_invalid_entries_do_not_abort_batch() {
        let mut store = QuestionStore::default();
        let batch = vec![
            Draft::new("Hi?", &["a", "b", "c", "d"], 0),
            Draft::new("Which is a prime?", &["4", "6", "7"], 2),
            Draft::new("Which is even?", &["1", "", "3", "4"], 3),
            Draft::new("Largest planet?", &["Mars", "Venus", "Jupiter", "Earth"], 4),
            Draft::new(
                "Smallest planet?",
                &["Mercury", "Venus", "Mars", "Earth"],
                0,
            ),
        ];
        let report = store.add_questions(batch, IndexBase::Zero).unwrap();

        assert_eq!(report.added, 1);
        assert_eq!(report.rejected[Rejection::InvalidFormat], 1);
        assert_eq!(report.rejected[Rejection::InvalidOptions], 3);
        assert_eq!(store.get(0).unwrap().text(), "Smallest planet?");
    }

    #[test]
    fn test_one_based_indices() {
        let mut store = QuestionStore::default();
        let batch = vec![
            Draft::new("Capital of Spain?", &["Madrid", "Rome", "Oslo", "Bern"], 1),
            Draft::new("Capital of Italy?", &["Madrid", "Rome", "Oslo", "Bern"], 0),
        ];
        let report = store.add_questions(batch, IndexBase::One).unwrap();

        assert_eq!(report.added, 1);
        assert_eq!(report.rejected[Rejection::InvalidOptions], 1);
        assert_eq!(store.get(0).unwrap().correct_index(), 0);
    }

    #[test]
    fn test_batch_too_large() {
        let mut store = QuestionStore::default();
        let batch = (0..=limits::MAX_BATCH_SIZE)
            .map(|i| Draft::new(format!("Question number {i}"), &["a", "b", "c", "d"], 0))
            .collect_vec();

        assert_eq!(
            store.add_questions(batch, IndexBase::Zero),
            Err(BatchError::TooLarge(limits::MAX_BATCH_SIZE + 1))
        );
        assert!(store.is_empty());
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn test_strip_command_token() {
        assert_eq!(strip_command_token("/addquiz What is 2+2?"), "What is 2+2?");
        assert_eq!(strip_command_token("/AddQuiz@quiz_bot  Who?"), "Who?");
        assert_eq!(
            strip_command_token("  What is /addquiz?"),
            "What is /addquiz?"
        );
        assert_eq!(
            strip_command_token("/addquizzes are fun"),
            "/addquizzes are fun"
        );
        assert_eq!(strip_command_token(""), "");

        let mut store = QuestionStore::default();
        let mut draft = france();
        draft.question = "/addquiz   Capital of France?".to_string();
        store.add_questions(vec![draft], IndexBase::Zero).unwrap();
        assert_eq!(store.get(0).unwrap().text(), "Capital of France?");
    }

    #[test]
    fn test_delete_question() {
        let mut store = QuestionStore::default();
        let batch = vec![
            france(),
            Draft::new("Capital of Spain?", &["Madrid", "Rome", "Oslo", "Bern"], 0),
        ];
        store.add_questions(batch, IndexBase::Zero).unwrap();
        let version = store.version();

        assert!(store.delete_question(5).is_none());
        assert_eq!(store.version(), version);

        let removed = store.delete_question(0).unwrap();
        assert_eq!(removed.text(), "Capital of France?");
        assert_eq!(store.get(0).unwrap().text(), "Capital of Spain?");
        assert!(store.version() > version);

        // the text is free to be added again
        let report = store.add_questions(single(), IndexBase::Zero).unwrap();
        assert_eq!(report.added, 1);
    }

    #[test]
    fn test_delete_by_id_and_clear() {
        let mut store = QuestionStore::default();
        store.add_questions(single(), IndexBase::Zero).unwrap();
        let id = store.get(0).unwrap().id();

        assert_eq!(store.index_of(id), Some(0));
        assert!(store.delete_by_id(id).is_some());
        assert!(store.delete_by_id(id).is_none());

        store.add_questions(single(), IndexBase::Zero).unwrap();
        assert_eq!(store.clear(), 1);
        assert!(store.is_empty());
        assert!(store.random().is_none());
    }

    #[test]
    fn test_from_records_purges_corrupt_entries() {
        let valid = serde_json::to_value(Question::new(
            "Capital of France?",
            vec![
                "London".into(),
                "Paris".into(),
                "Berlin".into(),
                "Madrid".into(),
            ],
            1,
            None,
        ))
        .unwrap();
        let legacy = serde_json::json!({
            "question": "Capital of Spain?",
            "options": ["Madrid", "Rome", "Oslo", "Bern"],
            "correct_answer": 0
        });
        let records = vec![
            valid.clone(),
            valid,
            legacy,
            serde_json::json!({"question": "Broken", "options": ["a"], "correct_answer": 0}),
            serde_json::json!({
                "question": "Negative?",
                "options": ["a", "b", "c", "d"],
                "correct_answer": -1
            }),
            serde_json::json!("garbage"),
        ];

        let (store, purged) = QuestionStore::from_records(records);
        assert_eq!(store.len(), 2);
        assert_eq!(purged, 4);
        assert_eq!(store.get(1).unwrap().text(), "Capital of Spain?");
    }

    #[test]
    fn test_categories() {
        let mut store = QuestionStore::default();
        let mut science = Draft::new("Water boils at?", &["90", "100", "110", "120"], 1);
        science.category = Some(" science ".to_string());
        let mut history = Draft::new(
            "First emperor of Rome?",
            &["Augustus", "Nero", "Otho", "Titus"],
            0,
        );
        history.category = Some("history".to_string());
        let mut blank = Draft::new("Fastest animal?", &["Cheetah", "Lion", "Horse", "Hare"], 0);
        blank.category = Some("  ".to_string());

        store
            .add_questions(vec![science, history, blank], IndexBase::Zero)
            .unwrap();
        assert_eq!(store.categories(), vec!["history", "science"]);
        assert_eq!(store.get(2).unwrap().category(), None);
    }
}
