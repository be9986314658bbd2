use crate::config::{MAX_NAME_LEN, QUALIFYING_PLACES};
use crate::error::ValidationError;
use crate::game::ranking::RankingSnapshot;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9]+$").expect("static pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualificationDecision {
    pub should_post: bool,
    pub reason: String,
}

impl QualificationDecision {
    fn post(reason: impl Into<String>) -> Self {
        Self { should_post: true, reason: reason.into() }
    }

    fn skip(reason: impl Into<String>) -> Self {
        Self { should_post: false, reason: reason.into() }
    }
}

/// 1–10 ASCII letters or digits. Case is kept as typed.
pub fn validate_player_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::NameTooLong { max: MAX_NAME_LEN });
    }
    if !NAME_PATTERN.is_match(name) {
        return Err(ValidationError::NameNotAlphanumeric);
    }
    Ok(())
}

pub fn validate_score(score: i64) -> Result<(), ValidationError> {
    if score <= 0 {
        return Err(ValidationError::NonPositiveScore(score));
    }
    Ok(())
}

/// Where `score` would land: the first place whose score it ties or beats,
/// otherwise one past the end.
pub fn get_user_rank(score: i64, snapshot: Option<&RankingSnapshot>) -> Option<u32> {
    let entries = &snapshot?.entries;
    let position = entries
        .iter()
        .position(|entry| entry.score <= score)
        .unwrap_or(entries.len());
    u32::try_from(position + 1).ok()
}

pub fn should_post_to_ranking(score: i64, snapshot: Option<&RankingSnapshot>) -> QualificationDecision {
    should_post_with_places(score, snapshot, QUALIFYING_PLACES)
}

/// Without a board to compare against, the server gets to decide.
pub fn should_post_with_places(
    score: i64,
    snapshot: Option<&RankingSnapshot>,
    places: usize,
) -> QualificationDecision {
    let Some(snapshot) = snapshot else {
        return QualificationDecision::post("Ranking unavailable; letting the server decide.");
    };

    if snapshot.len() < places {
        return QualificationDecision::post(format!(
            "Only {} of {} places are taken.",
            snapshot.len(),
            places
        ));
    }

    match snapshot.at_place(places) {
        Some(cutoff) if score > cutoff.score => QualificationDecision::post(format!(
            "Score {} beats place {} ({}).",
            score, places, cutoff.score
        )),
        Some(cutoff) => QualificationDecision::skip(format!(
            "Score {} does not beat place {} ({}).",
            score, places, cutoff.score
        )),
        None => QualificationDecision::post("Ranking has no cutoff entry."),
    }
}
