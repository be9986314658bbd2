use std::time::Duration;
use thiserror::Error;

/// A failure of a single network attempt. Always retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No completion arrived before the attempt timer fired.
    #[error("request timed out after {0} ms")]
    Timeout(u64),
    /// The injected callback request could not be loaded or answered wrongly.
    #[error("callback script failed: {0}")]
    ScriptError(String),
    /// Non-success status, or the connection itself failed.
    #[error("HTTP error: {0}")]
    HttpError(String),
    /// The body was not valid JSON.
    #[error("failed to parse response: {0}")]
    ParseError(String),
}

impl TransportError {
    /// `Timeout` in whole milliseconds, pinned at `u64::MAX` for absurd durations.
    pub fn timed_out(after: Duration) -> Self {
        TransportError::Timeout(u64::try_from(after.as_millis()).unwrap_or(u64::MAX))
    }
}

/// The payload arrived but does not match either known ranking shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload has neither a `top5` nor a `ranking` array")]
    UnknownShape,
    #[error("`{list}` entry {index} is malformed: {reason}")]
    BadEntry {
        list: &'static str,
        index: usize,
        reason: String,
    },
}

/// Local input problems. These never reach the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please enter a name.")]
    EmptyName,
    #[error("Name must be {max} characters or fewer.")]
    NameTooLong { max: usize },
    #[error("Name may only contain letters and digits.")]
    NameNotAlphanumeric,
    #[error("Score must be a positive integer (got {0}).")]
    NonPositiveScore(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LeaderboardError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("invalid ranking data: {0}")]
    Format(#[from] FormatError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("submission response had neither `success` nor `error`")]
    AmbiguousResponse,
    /// The retry budget ran out; carries the last transport failure.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: TransportError },
    /// A duplicate caller stopped waiting for the in-flight operation.
    #[error("timed out waiting for the in-flight {0} request")]
    WaitTimedOut(&'static str),
    /// The caller that owned the in-flight operation went away without a result.
    #[error("the in-flight {0} request was abandoned")]
    Abandoned(&'static str),
}

impl LeaderboardError {
    /// Only transport failures are worth another attempt; everything else
    /// would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LeaderboardError::Transport(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no leaderboard endpoint configured")]
    MissingEndpoint,
    #[error("invalid endpoint url '{url}': {source}")]
    BadEndpoint {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_errors_are_retryable() {
        assert!(LeaderboardError::from(TransportError::Timeout(10_000)).is_retryable());
        assert!(LeaderboardError::from(TransportError::HttpError("503".into())).is_retryable());
        assert!(!LeaderboardError::from(FormatError::UnknownShape).is_retryable());
        assert!(!LeaderboardError::from(ValidationError::EmptyName).is_retryable());
        assert!(!LeaderboardError::AmbiguousResponse.is_retryable());
        assert!(
            !LeaderboardError::Exhausted { attempts: 4, last: TransportError::Timeout(1) }.is_retryable()
        );
    }

    #[test]
    fn timeout_millis_saturate() {
        assert_eq!(TransportError::timed_out(Duration::from_millis(2500)), TransportError::Timeout(2500));
        assert_eq!(TransportError::timed_out(Duration::MAX), TransportError::Timeout(u64::MAX));
    }
}
