use crate::config::DATE_DISPLAY_FORMAT;
use crate::error::FormatError;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

// --- Canonical ranking data ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankingEntry {
    pub rank: u32,
    pub score: i64,
    pub name: String,
    pub date: String,
}

/// One fetch worth of ranking. Replaced wholesale on every successful fetch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingSnapshot {
    pub entries: Vec<RankingEntry>,
    pub fetched_at: DateTime<Utc>,
}

impl RankingSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry holding the 1-based `place` on the board.
    pub fn at_place(&self, place: usize) -> Option<&RankingEntry> {
        place.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    /// Rank of a submitted (name, score) pair, if the board lists it.
    pub fn rank_of(&self, name: &str, score: i64) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.score == score && e.name.eq_ignore_ascii_case(name))
            .map(|e| e.rank)
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.fetched_at).to_std().unwrap_or_default()
    }
}

// --- Wire payloads ---

struct TopEntry {
    score: i64,
    name: String,
    date: String,
}

struct RankedEntry {
    rank: u32,
    score: i64,
    name: String,
    date: Option<String>,
}

/// The endpoint answers with one of two unrelated shapes.
enum RawPayload {
    /// `{"top5": [{score, name, date}, ...]}`, ranked by position.
    TopN(Vec<TopEntry>),
    /// `{"ranking": [{rank, score, name, date?}, ...]}`.
    Ranked(Vec<RankedEntry>),
    Invalid(FormatError),
}

impl RawPayload {
    fn classify(value: &Value) -> RawPayload {
        let Some(obj) = value.as_object() else {
            return RawPayload::Invalid(FormatError::NotAnObject);
        };

        if let Some(Value::Array(items)) = obj.get("top5") {
            return match parse_top_n(items) {
                Ok(entries) => RawPayload::TopN(entries),
                Err(e) => RawPayload::Invalid(e),
            };
        }
        if let Some(Value::Array(items)) = obj.get("ranking") {
            return match parse_ranked(items) {
                Ok(entries) => RawPayload::Ranked(entries),
                Err(e) => RawPayload::Invalid(e),
            };
        }
        RawPayload::Invalid(FormatError::UnknownShape)
    }
}

/// A first row whose `score` and `name` are both strings is the sheet header.
fn is_header_row(item: &Value) -> bool {
    item.get("score").is_some_and(Value::is_string) && item.get("name").is_some_and(Value::is_string)
}

fn as_object<'a>(list: &'static str, index: usize, item: &'a Value) -> Result<&'a Map<String, Value>, FormatError> {
    item.as_object().ok_or_else(|| FormatError::BadEntry {
        list,
        index,
        reason: "not an object".into(),
    })
}

/// JSON numbers that hold a whole value. Sheets often send `500.0`.
fn whole_number(value: Option<&Value>) -> Option<i64> {
    let value = value?;
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

fn bad(list: &'static str, index: usize, reason: &str) -> FormatError {
    FormatError::BadEntry {
        list,
        index,
        reason: reason.to_string(),
    }
}

fn parse_top_n(items: &[Value]) -> Result<Vec<TopEntry>, FormatError> {
    let skip = usize::from(items.first().is_some_and(is_header_row));

    items
        .iter()
        .enumerate()
        .skip(skip)
        .map(|(index, item)| {
            let obj = as_object("top5", index, item)?;
            let score = whole_number(obj.get("score")).ok_or_else(|| bad("top5", index, "score is not an integer"))?;
            let name = obj
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| bad("top5", index, "name is not a string"))?;
            let date = obj
                .get("date")
                .and_then(Value::as_str)
                .ok_or_else(|| bad("top5", index, "date is not a string"))?;
            Ok(TopEntry {
                score,
                name: name.to_string(),
                date: date.to_string(),
            })
        })
        .collect()
}

fn parse_ranked(items: &[Value]) -> Result<Vec<RankedEntry>, FormatError> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let obj = as_object("ranking", index, item)?;
            let rank = whole_number(obj.get("rank"))
                .and_then(|r| u32::try_from(r).ok())
                .filter(|&r| r >= 1)
                .ok_or_else(|| bad("ranking", index, "rank is not a positive integer"))?;
            let score =
                whole_number(obj.get("score")).ok_or_else(|| bad("ranking", index, "score is not an integer"))?;
            let name = obj
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| bad("ranking", index, "name is not a string"))?;
            Ok(RankedEntry {
                rank,
                score,
                name: name.to_string(),
                date: obj.get("date").and_then(Value::as_str).map(str::to_string),
            })
        })
        .collect()
}

// --- Public validation / normalization ---

/// Checks a raw payload against both known shapes without building a snapshot.
pub fn validate(value: &Value) -> Result<(), FormatError> {
    match RawPayload::classify(value) {
        RawPayload::Invalid(e) => Err(e),
        _ => Ok(()),
    }
}

pub fn normalize(value: &Value) -> Result<RankingSnapshot, FormatError> {
    normalize_at(value, Utc::now())
}

pub fn normalize_at(value: &Value, fetched_at: DateTime<Utc>) -> Result<RankingSnapshot, FormatError> {
    let entries = match RawPayload::classify(value) {
        RawPayload::TopN(items) => items
            .into_iter()
            .zip(1u32..)
            .map(|(item, rank)| RankingEntry {
                rank,
                score: item.score,
                name: item.name,
                date: format_display_date(&item.date),
            })
            .collect(),
        RawPayload::Ranked(items) => items
            .into_iter()
            .map(|item| RankingEntry {
                rank: item.rank,
                score: item.score,
                name: item.name,
                date: item.date.as_deref().map(format_display_date).unwrap_or_default(),
            })
            .collect(),
        RawPayload::Invalid(e) => return Err(e),
    };

    Ok(RankingSnapshot { entries, fetched_at })
}

/// Renders a sheet timestamp as `YYYY/M/D` in local time.
///
/// Full timestamps are converted to the local zone; bare dates are taken as
/// calendar dates. Anything unparseable is shown as sent.
pub fn format_display_date(raw: &str) -> String {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Local).format(DATE_DISPLAY_FORMAT).to_string();
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, pattern) {
            return naive.format(DATE_DISPLAY_FORMAT).to_string();
        }
    }
    for pattern in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, pattern) {
            return date.format(DATE_DISPLAY_FORMAT).to_string();
        }
    }
    raw.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn top_n_ranks_follow_position() {
        let payload = json!({"top5": [
            {"score": 900, "name": "ann", "date": "2024-01-03"},
            {"score": 700, "name": "bob", "date": "2024-01-02"},
            {"score": 700, "name": "cy", "date": "2024-01-01"},
        ]});
        let snapshot = normalize(&payload).unwrap();

        let ranks: Vec<u32> = snapshot.entries.iter().map(|e| e.rank).collect();
        let names: Vec<&str> = snapshot.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(ranks, [1, 2, 3]);
        assert_eq!(names, ["ann", "bob", "cy"]);
        assert_eq!(snapshot.entries[0].date, "2024/1/3");
    }

    #[test]
    fn header_row_is_skipped() {
        let payload = json!({"top5": [
            {"score": "Score", "name": "Name", "date": "Date"},
            {"score": 500, "name": "ann", "date": "2024-01-01"},
        ]});
        let snapshot = normalize(&payload).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            snapshot.entries[0],
            RankingEntry {
                rank: 1,
                score: 500,
                name: "ann".into(),
                date: "2024/1/1".into()
            }
        );
    }

    #[test]
    fn header_only_counts_in_first_position() {
        let payload = json!({"top5": [
            {"score": 500, "name": "ann", "date": "2024-01-01"},
            {"score": "Score", "name": "Name", "date": "Date"},
        ]});
        assert!(matches!(
            normalize(&payload),
            Err(FormatError::BadEntry { list: "top5", index: 1, .. })
        ));
    }

    #[test]
    fn ranked_shape_keeps_given_ranks() {
        let payload = json!({"ranking": [
            {"rank": 1, "score": 800, "name": "zed", "date": "2024-02-10"},
            {"rank": 2, "score": 800.0, "name": "amy"},
            {"rank": 4, "score": 300, "name": "kim"},
        ]});
        let snapshot = normalize(&payload).unwrap();

        let ranks: Vec<u32> = snapshot.entries.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, [1, 2, 4]);
        assert_eq!(snapshot.entries[0].date, "2024/2/10");
        assert_eq!(snapshot.entries[1].score, 800);
        assert_eq!(snapshot.entries[1].date, "");
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert_eq!(validate(&json!(null)), Err(FormatError::NotAnObject));
        assert_eq!(validate(&json!([1, 2])), Err(FormatError::NotAnObject));
        assert_eq!(validate(&json!({"rows": []})), Err(FormatError::UnknownShape));
        assert!(validate(&json!({"top5": [{"score": 1, "name": "a"}]})).is_err());
        assert!(validate(&json!({"top5": [{"score": 1.5, "name": "a", "date": "x"}]})).is_err());
        assert!(validate(&json!({"ranking": [{"score": 1, "name": "a"}]})).is_err());
        assert!(validate(&json!({"ranking": [{"rank": 0, "score": 1, "name": "a"}]})).is_err());
        assert!(validate(&json!({"ranking": [{"rank": 1, "score": "1", "name": "a"}]})).is_err());
    }

    #[test]
    fn top5_wins_over_ranking_and_non_array_falls_through() {
        let both = json!({
            "top5": [{"score": 10, "name": "a", "date": "2024-01-01"}],
            "ranking": [{"rank": 9, "score": 10, "name": "a"}],
        });
        assert_eq!(normalize(&both).unwrap().entries[0].rank, 1);

        let fallthrough = json!({"top5": "n/a", "ranking": [{"rank": 3, "score": 10, "name": "a"}]});
        assert_eq!(normalize(&fallthrough).unwrap().entries[0].rank, 3);
    }

    #[test]
    fn empty_lists_are_valid() {
        assert!(normalize(&json!({"top5": []})).unwrap().is_empty());
        assert!(normalize(&json!({"ranking": []})).unwrap().is_empty());
    }

    #[test]
    fn display_dates() {
        let instant = "2024-03-05T12:00:00Z";
        let expected = DateTime::parse_from_rfc3339(instant)
            .unwrap()
            .with_timezone(&Local)
            .format("%Y/%-m/%-d")
            .to_string();
        assert_eq!(format_display_date(instant), expected);
        assert_eq!(format_display_date("2024-12-25 08:30:00"), "2024/12/25");
        assert_eq!(format_display_date("2024/07/04"), "2024/7/4");
        assert_eq!(format_display_date("someday"), "someday");
    }

    #[test]
    fn snapshot_helpers() {
        let snapshot = normalize(&json!({"top5": [
            {"score": 900, "name": "Ann", "date": "2024-01-03"},
            {"score": 700, "name": "bob", "date": "2024-01-02"},
        ]}))
        .unwrap();

        assert_eq!(snapshot.at_place(2).map(|e| e.score), Some(700));
        assert_eq!(snapshot.at_place(0), None);
        assert_eq!(snapshot.rank_of("ann", 900), Some(1));
        assert_eq!(snapshot.rank_of("ann", 700), None);
    }
}
