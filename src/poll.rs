//! Open polls awaiting answers
//!
//! A poll is opened when a question is dispatched to a room and remembers
//! the correct option so answers can be judged later. Each user is judged
//! at most once per poll. Polls live in memory only and expire after a TTL.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use serde::Serialize;
use web_time::SystemTime;

use crate::{
    ids::{PollId, QuestionId, RoomId, UserId},
    question::Question,
    session::OpenPollRegistered,
};

/// A dispatched question awaiting answers
#[derive(Debug, Clone)]
pub struct OpenPoll {
    room: RoomId,
    question: QuestionId,
    question_text: String,
    correct_index: usize,
    category: Option<String>,
    opened_at: SystemTime,
    answered_by: HashSet<UserId>,
}

impl OpenPoll {
    /// The room the poll was sent to
    pub fn room(&self) -> RoomId {
        self.room
    }

    /// The text of the asked question
    pub fn question_text(&self) -> &str {
        &self.question_text
    }

    /// Zero-based index of the correct option
    pub fn correct_index(&self) -> usize {
        self.correct_index
    }

    /// Number of users that answered so far
    pub fn answer_count(&self) -> usize {
        self.answered_by.len()
    }

    fn is_expired(&self, ttl: Duration, now: SystemTime) -> bool {
        now.duration_since(self.opened_at)
            .is_ok_and(|age| age >= ttl)
    }
}

/// A judged answer, ready to be recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Answer {
    /// Room the poll was sent to
    pub room: RoomId,
    /// Question that was asked
    pub question: QuestionId,
    /// Whether the chosen option was the correct one
    pub correct: bool,
    /// Zero-based index of the correct option
    pub correct_index: usize,
    /// Category of the asked question
    pub category: Option<String>,
}

/// Outcome of judging an answer event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// First answer of this user to this poll
    Accepted(Answer),
    /// The user already answered this poll
    AlreadyAnswered,
    /// Unknown or expired poll, or an option outside the poll
    Ignored,
}

/// Registry of open polls
#[derive(Debug, Clone)]
pub struct OpenPolls {
    ttl: Duration,
    polls: HashMap<PollId, OpenPoll>,
}

impl Default for OpenPolls {
    fn default() -> Self {
        Self::new(crate::constants::poll::TTL)
    }
}

impl OpenPolls {
    /// Creates an empty registry whose polls live for `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            polls: HashMap::new(),
        }
    }

    /// Registers a poll for `question`, sent to `room` under `poll`
    pub fn open(
        &mut self,
        poll: PollId,
        room: RoomId,
        question: &Question,
        now: SystemTime,
    ) -> OpenPollRegistered {
        let registered = OpenPollRegistered {
            poll_id: poll.clone(),
            room_id: room,
            question_id: question.id(),
            correct_index: question.correct_index(),
        };
        self.polls.insert(
            poll,
            OpenPoll {
                room,
                question: question.id(),
                question_text: question.text().to_owned(),
                correct_index: question.correct_index(),
                category: question.category().map(str::to_owned),
                opened_at: now,
                answered_by: HashSet::new(),
            },
        );
        registered
    }

    /// Judges `user` choosing `option` on `poll`
    pub fn resolve(
        &mut self,
        poll: &PollId,
        user: UserId,
        option: usize,
        now: SystemTime,
    ) -> Resolution {
        let ttl = self.ttl;
        let Some(open) = self.polls.get_mut(poll) else {
            log::debug!("answer to unknown poll {poll} ignored");
            return Resolution::Ignored;
        };
        if open.is_expired(ttl, now) {
            log::debug!("answer to expired poll {poll} ignored");
            self.polls.remove(poll);
            return Resolution::Ignored;
        }
        if option >= crate::constants::question::OPTION_COUNT {
            log::debug!("option {option} outside poll {poll} ignored");
            return Resolution::Ignored;
        }
        if !open.answered_by.insert(user) {
            return Resolution::AlreadyAnswered;
        }

        Resolution::Accepted(Answer {
            room: open.room,
            question: open.question,
            correct: option == open.correct_index,
            correct_index: open.correct_index,
            category: open.category.clone(),
        })
    }

    /// Drops expired polls, returning how many were dropped
    pub fn sweep(&mut self, now: SystemTime) -> usize {
        let ttl = self.ttl;
        let before = self.polls.len();
        self.polls.retain(|_, open| !open.is_expired(ttl, now));
        let swept = before - self.polls.len();
        if swept > 0 {
            log::debug!("swept {swept} expired polls");
        }
        swept
    }

    /// The open poll registered under `poll`
    pub fn get(&self, poll: &PollId) -> Option<&OpenPoll> {
        self.polls.get(poll)
    }

    /// Number of open polls, expired ones included until swept
    pub fn len(&self) -> usize {
        self.polls.len()
    }

    /// Whether no poll is open
    pub fn is_empty(&self) -> bool {
        self.polls.is_empty()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn question() -> Question {
        Question::new(
            "Capital of France?",
            vec![
                "London".into(),
                "Paris".into(),
                "Berlin".into(),
                "Madrid".into(),
            ],
            1,
            Some("geography".into()),
        )
    }

    #[test]
    fn test_open_and_resolve() {
        let mut polls = OpenPolls::default();
        let now = SystemTime::now();
        let question = question();
        let registered = polls.open("p1".into(), RoomId(-1), &question, now);

        assert_eq!(registered.correct_index, 1);
        assert_eq!(registered.room_id, RoomId(-1));
        assert_eq!(registered.question_id, question.id());
        let poll = polls.get(&"p1".into()).unwrap();
        assert_eq!(poll.question_text(), "Capital of France?");

        let resolution = polls.resolve(&"p1".into(), UserId(7), 1, now);
        assert_eq!(
            resolution,
            Resolution::Accepted(Answer {
                room: RoomId(-1),
                question: question.id(),
                correct: true,
                correct_index: 1,
                category: Some("geography".into()),
            })
        );

        let Resolution::Accepted(answer) = polls.resolve(&"p1".into(), UserId(8), 3, now) else {
            panic!("second user should be judged");
        };
        assert!(!answer.correct);
        assert_eq!(polls.get(&"p1".into()).unwrap().answer_count(), 2);
    }

    #[test]
    fn test_one_answer_per_user() {
        let mut polls = OpenPolls::default();
        let now = SystemTime::now();
        polls.open("p1".into(), RoomId(-1), &question(), now);

        assert!(matches!(
            polls.resolve(&"p1".into(), UserId(7), 0, now),
            Resolution::Accepted(_)
        ));
        assert_eq!(
            polls.resolve(&"p1".into(), UserId(7), 1, now),
            Resolution::AlreadyAnswered
        );
    }

    #[test]
    fn test_unknown_and_invalid() {
        let mut polls = OpenPolls::default();
        let now = SystemTime::now();
        assert_eq!(
            polls.resolve(&"nope".into(), UserId(1), 0, now),
            Resolution::Ignored
        );

        polls.open("p1".into(), RoomId(-1), &question(), now);
        assert_eq!(
            polls.resolve(&"p1".into(), UserId(1), 4, now),
            Resolution::Ignored
        );
        // an invalid option does not use up the user's answer
        assert!(matches!(
            polls.resolve(&"p1".into(), UserId(1), 1, now),
            Resolution::Accepted(_)
        ));
    }

    #[test]
    fn test_expiry() {
        let mut polls = OpenPolls::new(Duration::from_secs(3600));
        let opened = SystemTime::now();
        polls.open("old".into(), RoomId(-1), &question(), opened);
        polls.open(
            "new".into(),
            RoomId(-1),
            &question(),
            opened + Duration::from_secs(1800),
        );

        let later = opened + Duration::from_secs(3600);
        assert_eq!(
            polls.resolve(&"old".into(), UserId(1), 1, later),
            Resolution::Ignored
        );
        assert!(polls.get(&"old".into()).is_none());

        assert_eq!(polls.sweep(later), 0);
        assert_eq!(polls.len(), 1);
        assert_eq!(polls.sweep(later + Duration::from_secs(1800)), 1);
        assert!(polls.is_empty());
    }
}
