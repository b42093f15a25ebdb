//! StudioLink: links inbound studio signals (emails, meeting notes) to the
//! projects, proposals, contacts and categories they concern.
//!
//! A cascade of strategies proposes candidate links, a learned pattern store
//! adjusts their confidence, and a human confirms or corrects each one. Every
//! decision feeds back into the patterns; patterns that prove themselves are
//! allowed to auto-apply. Applied links are compare-and-swap mutations with a
//! snapshot, so any approval can be rolled back.
//!
//! Entry point is [`engine::SuggestionEngine`]; [`batch::run_batch`] drives
//! resumable backfills and [`maintenance`] runs expiry and auto-apply.

pub mod action;
pub mod apply;
pub mod batch;
pub mod candidates;
pub mod db;
pub mod dedup;
pub mod engine;
pub mod entity;
pub mod error;
pub mod learning;
pub mod lifecycle;
pub mod maintenance;
mod migrations;
pub mod review;
pub mod scoring;
pub mod signal;
pub mod state;
pub mod targets;
pub mod types;

pub use engine::SuggestionEngine;
pub use error::{ReviewError, SuggestError};
pub use lifecycle::{Decision, DecisionRequest};
pub use types::EngineConfig;
