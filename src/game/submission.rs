use crate::error::LeaderboardError;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionOutcome {
    pub success: bool,
    pub rank: Option<u32>,
    pub message: String,
}

impl SubmissionOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            rank: None,
            message: message.into(),
        }
    }
}

/// Reads `{success, rank?, message?, error?}`.
///
/// A reply carrying neither `success` nor `error` says nothing about what the
/// server did, so it is refused instead of guessed at.
pub fn interpret_response(value: &Value) -> Result<SubmissionOutcome, LeaderboardError> {
    let obj = value.as_object().ok_or(LeaderboardError::AmbiguousResponse)?;

    let success = obj.get("success").and_then(Value::as_bool);
    let error = obj.get("error").and_then(Value::as_str);
    let message = obj.get("message").and_then(Value::as_str).filter(|s| !s.is_empty());
    let rank = obj
        .get("rank")
        .and_then(Value::as_u64)
        .and_then(|r| u32::try_from(r).ok())
        .filter(|&r| r >= 1);

    match (success, error) {
        (Some(true), _) => Ok(SubmissionOutcome {
            success: true,
            rank,
            message: message.unwrap_or("Score submitted.").to_string(),
        }),
        (Some(false), _) | (None, Some(_)) => Ok(SubmissionOutcome::failed(
            error
                .filter(|e| !e.is_empty())
                .or(message)
                .unwrap_or("Submission rejected."),
        )),
        (None, None) => Err(LeaderboardError::AmbiguousResponse),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_with_rank() {
        let outcome = interpret_response(&json!({"success": true, "rank": 3, "message": "ok"})).unwrap();
        assert_eq!(
            outcome,
            SubmissionOutcome {
                success: true,
                rank: Some(3),
                message: "ok".into()
            }
        );
    }

    #[test]
    fn rejection_prefers_error_text() {
        let outcome =
            interpret_response(&json!({"success": false, "error": "name taken", "message": "x"})).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.message, "name taken");

        let outcome = interpret_response(&json!({"error": "quota"})).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.message, "quota");
    }

    #[test]
    fn empty_error_is_still_a_rejection() {
        let outcome = interpret_response(&json!({"error": ""})).unwrap();
        assert_eq!(outcome, SubmissionOutcome::failed("Submission rejected."));

        let outcome = interpret_response(&json!({"error": "", "message": "closed"})).unwrap();
        assert_eq!(outcome.message, "closed");
    }

    #[test]
    fn neither_success_nor_error_is_ambiguous() {
        assert_eq!(
            interpret_response(&json!({"message": "hello"})),
            Err(LeaderboardError::AmbiguousResponse)
        );
        assert_eq!(interpret_response(&json!({})), Err(LeaderboardError::AmbiguousResponse));
        assert_eq!(interpret_response(&json!("ok")), Err(LeaderboardError::AmbiguousResponse));
    }
}
