//! Client for a spreadsheet-backed score leaderboard.
//!
//! The endpoint is reachable through a callback (JSONP-style) request or a
//! plain GET, answers in one of two JSON shapes, and is flaky. This crate
//! hides all of that behind [`LeaderboardClient`].

pub mod config;
pub mod core;
pub mod error;
pub mod game;
pub mod ui;

pub use config::LeaderboardConfig;
pub use error::{ConfigError, FormatError, LeaderboardError, TransportError, ValidationError};
pub use game::leaderboard::{LeaderboardClient, LeaderboardStatus, PendingRequest, RequestStatus};
pub use game::qualify::{QualificationDecision, get_user_rank, should_post_to_ranking, validate_player_name};
pub use game::ranking::{RankingEntry, RankingSnapshot};
pub use game::submission::SubmissionOutcome;
