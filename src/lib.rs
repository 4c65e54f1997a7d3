//! # Quizbot Engine Library
//!
//! This library provides the quiz state and scoring engine of a group chat
//! quiz bot. It stores and validates questions, schedules them per room
//! without repeats, judges poll answers exactly once per user, keeps
//! per-user and per-room statistics with streaks and activity rollups,
//! ranks users on cached leaderboards and persists everything as four
//! independent JSON collections.
//!
//! The chat transport is not part of this crate: the embedding bot drives
//! a [`engine::QuizEngine`] with inbound events and receives outbound
//! payloads through a [`session::Messenger`].

#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::struct_field_names)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::module_name_repetitions)]
use derive_where::derive_where;
use itertools::Itertools;
use serde::Serialize;

pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod ids;
pub mod leaderboard;
pub mod ledger;
pub mod persistence;
pub mod poll;
pub mod question;
pub mod rooms;
pub mod scheduler;
pub mod session;
pub mod stats;

pub use engine::{QuizEngine, SharedEngine};
pub use error::{Error, Result};

/// The first items of a longer list, together with the list's full length
///
/// Used for leaderboards, which show the top few users while still telling
/// how many were ranked.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[derive_where(Default)]
pub struct TruncatedVec<T> {
    /// The full length of the list
    exact_count: usize,
    /// At most `limit` leading items
    items: Vec<T>,
}

impl<T: Clone> TruncatedVec<T> {
    /// Takes up to `limit` items from `list`, recording `exact_count` as
    /// the full length
    pub fn new<I: Iterator<Item = T>>(list: I, limit: usize, exact_count: usize) -> Self {
        let items = list.take(limit).collect_vec();
        Self { exact_count, items }
    }

    /// The full length of the list
    pub fn exact_count(&self) -> usize {
        self.exact_count
    }

    /// The kept items
    pub fn items(&self) -> &[T] {
        &self.items
    }
}
