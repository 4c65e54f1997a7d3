//! Identifiers for users, rooms, polls and questions
//!
//! Users and rooms are identified by the numeric ids of the chat platform,
//! polls by whatever opaque string the messaging collaborator hands back,
//! and questions by a stable UUID assigned when they enter the store.

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use uuid::Uuid;

/// A chat user as identified by the messaging platform
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::From,
    derive_more::Display,
)]
#[serde(transparent)]
pub struct UserId(pub i64);

/// A chat room (group or private chat) quizzes are delivered to
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::From,
    derive_more::Display,
)]
#[serde(transparent)]
pub struct RoomId(pub i64);

/// Opaque poll identifier supplied by the messaging collaborator
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    derive_more::From,
    derive_more::Display,
)]
#[serde(transparent)]
pub struct PollId(String);

impl From<&str> for PollId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl PollId {
    /// The raw identifier string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Stable identifier of a question
///
/// Positions in the question store shift when questions are deleted; this
/// id does not, so open polls and admin deletions refer to it instead.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    DeserializeFromStr,
    SerializeDisplay,
)]
pub struct QuestionId(Uuid);

impl QuestionId {
    /// Creates a new random question id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QuestionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for QuestionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for QuestionId {
    type Err = uuid::Error;

    /// Parses a question id from a UUID string
    ///
    /// # Errors
    ///
    /// Returns a `uuid::Error` if the string is not a valid UUID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}
