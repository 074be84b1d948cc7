//! Parsing of free-form feedback replies into per-category ratings.
//!
//! Reviewers answer the feedback prompt with lines like `Clarity: 8`,
//! possibly followed by free text. Each configured category is scanned
//! independently against the note body, first matching line wins, and
//! everything that is not a rating line becomes the residual comment.

use std::collections::BTreeMap;

/// Outcome of parsing one note body against a category list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseResult {
    /// Rating per category. `None` means the category was never
    /// mentioned, or was mentioned with an out-of-range value; the two
    /// cases are deliberately not distinguished because the persisted
    /// output has always conflated them.
    pub ratings: BTreeMap<String, Option<u8>>,
    /// Free text left over after removing rating lines and the
    /// `Optional comment:` label line.
    pub comment_text: String,
    /// True iff at least one rating is valid or the comment text is
    /// non-empty. Callers must not persist anything when this is false.
    pub has_any: bool,
}

/// Parse a note body against an ordered list of category names.
///
/// For each category, in order, the first line matching
/// `<category><ws>[:-]<ws><1-2 digits>` (case-insensitive, word-boundary
/// anchored on both sides) is taken as that category's rating line.
/// Rating lines are consumed even when the value is out of range, so a
/// rejected rating never leaks into the comment text.
pub fn parse_feedback(body: &str, categories: &[String]) -> ParseResult {
    let lines: Vec<&str> = body.lines().collect();
    let mut ratings = BTreeMap::new();
    let mut rating_line_indexes = vec![false; lines.len()];

    for category in categories {
        let mut value = None;
        for (idx, line) in lines.iter().enumerate() {
            if let Some(raw) = find_rating(line, category) {
                value = clamp_to_range_or_none(raw);
                rating_line_indexes[idx] = true;
                break; // first occurrence only
            }
        }
        ratings.insert(category.clone(), value);
    }

    let mut remaining: Vec<&str> = lines
        .iter()
        .enumerate()
        .filter(|(idx, _)| !rating_line_indexes[*idx])
        .map(|(_, line)| line.trim())
        .filter(|line| !line.eq_ignore_ascii_case("optional comment:"))
        .collect();

    while remaining.first() == Some(&"") {
        remaining.remove(0);
    }
    while remaining.last() == Some(&"") {
        remaining.pop();
    }

    let comment_text = remaining.join("\n");

    let has_any_rating = ratings.values().any(|v| v.is_some());
    let has_text = !comment_text.trim().is_empty();

    ParseResult {
        ratings,
        comment_text,
        has_any: has_any_rating || has_text,
    }
}

/// Reject non-[1,10] values. The rating line is still consumed by the
/// caller, so "present but invalid" serializes the same as "absent".
fn clamp_to_range_or_none(value: u8) -> Option<u8> {
    if (1..=10).contains(&value) {
        Some(value)
    } else {
        None
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Scan a single line for `<category><ws>[:-]<ws><1-2 digits>`.
///
/// Returns the raw (unclamped) number when the line is a rating line
/// for this category. Matching is ASCII-case-insensitive and anchored
/// at word boundaries: `XClarity: 8` does not match `Clarity`, and a
/// three-digit run after the delimiter is not a rating at all.
fn find_rating(line: &str, category: &str) -> Option<u8> {
    let line = line.as_bytes();
    let category = category.as_bytes();
    if category.is_empty() || line.len() < category.len() {
        return None;
    }

    for start in 0..=(line.len() - category.len()) {
        if !line[start..start + category.len()].eq_ignore_ascii_case(category) {
            continue;
        }
        if start > 0 && is_word_byte(line[start - 1]) {
            continue;
        }

        let mut pos = start + category.len();
        while pos < line.len() && line[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos >= line.len() || (line[pos] != b':' && line[pos] != b'-') {
            continue;
        }
        pos += 1;
        while pos < line.len() && line[pos].is_ascii_whitespace() {
            pos += 1;
        }

        let digits_start = pos;
        while pos < line.len() && line[pos].is_ascii_digit() {
            pos += 1;
        }
        let digit_count = pos - digits_start;
        if digit_count == 0 || digit_count > 2 {
            continue;
        }
        if pos < line.len() && is_word_byte(line[pos]) {
            continue;
        }

        let mut value: u8 = 0;
        for &b in &line[digits_start..pos] {
            value = value * 10 + (b - b'0');
        }
        return Some(value);
    }

    None
}
