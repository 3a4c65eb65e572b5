//! Text normalization for scraped strings.
//!
//! Every function here is total: absent input is represented by `""` and
//! always yields `""`.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

static DMY_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{2})-(\d{2})-(\d{4})$").expect("static date regex"));

fn replace_nbsp(input: &str) -> String {
    input.replace(['\u{a0}', '\u{202f}'], " ")
}

/// Collapse every whitespace run (non-breaking spaces included) into one space and trim.
pub fn normalize_text(input: &str) -> String {
    replace_nbsp(input)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Like [`normalize_text`] but line by line: blank lines are dropped and the rest
/// rejoined with `\n`.
pub fn normalize_multiline_text(input: &str) -> String {
    replace_nbsp(input)
        .lines()
        .map(normalize_text)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Matching key for labels and section names. Never used for display.
///
/// Decomposes, strips combining marks, lowercases and folds every
/// non-alphanumeric run into a single space.
pub fn normalize_key(input: &str) -> String {
    let folded = input
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();

    let mut out = String::with_capacity(folded.len());
    let mut pending_space = false;
    for ch in folded.chars() {
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(ch);
        } else {
            pending_space = true;
        }
    }
    out
}

/// Parse a strict `DD-MM-YYYY` date into UTC midnight.
///
/// Day must be 1..=31, month 1..=12, year at least 1900, and the calendar
/// day must exist.
pub fn parse_dmy_date(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = normalize_text(raw);
    let caps = DMY_DATE.captures(&trimmed)?;
    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let year: i32 = caps[3].parse().ok()?;
    if !(1..=31).contains(&day) || !(1..=12).contains(&month) || year < 1900 {
        return None;
    }
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

pub fn format_dmy_date(date: &DateTime<Utc>) -> String {
    date.format("%d-%m-%Y").to_string()
}
