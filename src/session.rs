//! Outbound messaging contract
//!
//! The engine never talks to the chat platform directly. It hands payloads
//! to a [`Messenger`] implemented by the embedding bot, which owns the
//! transport, formatting and retries.

use serde::Serialize;

use crate::{
    ids::{PollId, QuestionId, RoomId},
    question::Question,
};

/// A question ready to be sent to a room as a poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchQuestion {
    /// Room the poll goes to
    pub room_id: RoomId,
    /// Question text
    pub text: String,
    /// The four answer options, in display order
    pub options: Vec<String>,
    /// Zero-based index of the correct option
    pub correct_index: usize,
}

impl DispatchQuestion {
    /// Builds the payload for sending `question` to `room`
    pub fn new(room: RoomId, question: &Question) -> Self {
        Self {
            room_id: room,
            text: question.text().to_owned(),
            options: question.options().to_vec(),
            correct_index: question.correct_index(),
        }
    }
}

/// Confirmation that a sent poll is awaiting answers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenPollRegistered {
    /// Identifier the platform assigned to the poll
    pub poll_id: PollId,
    /// Room the poll was sent to
    pub room_id: RoomId,
    /// Stable id of the asked question
    pub question_id: QuestionId,
    /// Zero-based index of the correct option
    pub correct_index: usize,
}

/// Plain notices the engine asks the messenger to deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Notice {
    /// The question store is empty
    NoQuestionsAvailable,
}

/// Delivers engine output to rooms
///
/// Implementations might talk to a bot API, a test harness or a queue.
/// [`crate::QuizEngine::on_quiz_tick`] calls the messenger while the engine
/// is mutably borrowed; [`crate::SharedEngine::on_quiz_tick`] calls it with
/// the engine's lock released, so a blocking messenger only delays its own
/// tick.
pub trait Messenger {
    /// Sends `question` as a poll, returning the platform's poll id
    ///
    /// `None` means the poll could not be delivered. No open poll is
    /// registered in that case.
    fn send_question(&self, question: &DispatchQuestion) -> Option<PollId>;

    /// Sends a notice to a room
    fn send_notice(&self, room: RoomId, notice: Notice);
}
