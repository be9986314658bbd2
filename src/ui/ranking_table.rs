use crate::game::ranking::RankingSnapshot;

const EMPTY_MESSAGE: &str = "No ranking data yet.";

pub fn rank_label(rank: u32) -> String {
    match rank {
        1 => "🥇".to_string(),
        2 => "🥈".to_string(),
        3 => "🥉".to_string(),
        n => format!("#{}", n),
    }
}

/// `1234567` -> `1,234,567`
pub fn format_score(score: i64) -> String {
    let digits = score.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if score < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Plain-text board. Rows whose name matches `highlight` (ignoring case) get
/// a `>` marker.
pub fn render(snapshot: &RankingSnapshot, highlight: Option<&str>) -> String {
    if snapshot.is_empty() {
        return EMPTY_MESSAGE.to_string();
    }

    let name_width = snapshot
        .entries
        .iter()
        .map(|e| e.name.chars().count().max(3))
        .max()
        .unwrap_or(3);

    snapshot
        .entries
        .iter()
        .map(|entry| {
            let marker = match highlight {
                Some(h) if entry.name.eq_ignore_ascii_case(h) => '>',
                _ => ' ',
            };
            let name = if entry.name.is_empty() { "---" } else { entry.name.as_str() };
            format!(
                "{} {:<4} {:<width$} {:>11}  {}",
                marker,
                rank_label(entry.rank),
                name,
                format_score(entry.score),
                entry.date,
                width = name_width
            )
            .trim_end()
            .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::ranking::RankingEntry;
    use chrono::Utc;

    #[test]
    fn thousands_separators() {
        assert_eq!(format_score(0), "0");
        assert_eq!(format_score(999), "999");
        assert_eq!(format_score(1000), "1,000");
        assert_eq!(format_score(1234567), "1,234,567");
        assert_eq!(format_score(-45000), "-45,000");
    }

    #[test]
    fn medals_then_numbers() {
        assert_eq!(rank_label(1), "🥇");
        assert_eq!(rank_label(3), "🥉");
        assert_eq!(rank_label(4), "#4");
    }

    #[test]
    fn render_marks_highlighted_player() {
        let snapshot = RankingSnapshot {
            entries: vec![
                RankingEntry { rank: 1, score: 12000, name: "Ann".into(), date: "2024/1/1".into() },
                RankingEntry { rank: 2, score: 900, name: "bob".into(), date: String::new() },
            ],
            fetched_at: Utc::now(),
        };
        let text = render(&snapshot, Some("ann"));
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('>'));
        assert!(lines[0].contains("12,000"));
        assert!(lines[1].starts_with(' '));
        assert!(lines[1].ends_with("900"));
    }

    #[test]
    fn empty_board_message() {
        let snapshot = RankingSnapshot { entries: vec![], fetched_at: Utc::now() };
        assert_eq!(render(&snapshot, None), EMPTY_MESSAGE);
    }
}
