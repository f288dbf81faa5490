// src/intake/dates.rs
//! Posted-date normalization for fetcher output
//!
//! Job boards report dates either as ISO timestamps or as loose relative text
//! ("3 days ago", "Yesterday", "Posted: 17 October"). Anything that cannot be
//! resolved to a concrete date comes back as `None` and is treated as unknown.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime};

const PREFIXES: [&str; 3] = ["published:", "posted:", "active:"];

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

pub fn resolve_posted_date(
    explicit: Option<&str>,
    text: Option<&str>,
    now: NaiveDateTime,
) -> Option<NaiveDate> {
    if let Some(value) = explicit.map(str::trim).filter(|v| !v.is_empty()) {
        if let Some(date) = parse_absolute_date(value) {
            return Some(date);
        }
        // Some fetchers put the relative phrase into the date column
        if let Some(date) = parse_relative_date(value, now) {
            return Some(date);
        }
    }

    text.and_then(|t| parse_relative_date(t, now))
}

pub fn parse_absolute_date(value: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.date_naive());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|dt| dt.date())
}

pub fn parse_relative_date(text: &str, now: NaiveDateTime) -> Option<NaiveDate> {
    let mut cleaned = text.trim().to_lowercase();
    if cleaned.is_empty() || cleaned == "n/a" {
        return None;
    }

    for prefix in PREFIXES {
        if let Some(rest) = cleaned.strip_prefix(prefix) {
            cleaned = rest.trim().to_string();
            break;
        }
    }

    let today = now.date();

    if cleaned.contains("just posted") || cleaned.contains("today") || cleaned == "0 days ago" {
        return Some(today);
    }
    if cleaned.contains("yesterday") {
        return today.pred_opt();
    }

    let tokens: Vec<&str> = cleaned.split_whitespace().collect();

    for window in tokens.windows(3) {
        let Some(amount) = parse_amount(window[0]) else {
            continue;
        };
        if window[2] != "ago" {
            continue;
        }
        let offset = match window[1].trim_end_matches('s') {
            "minute" => Duration::try_minutes(amount),
            "hour" => Duration::try_hours(amount),
            "day" => Duration::try_days(amount),
            "week" => Duration::try_weeks(amount),
            "month" => amount.checked_mul(30).and_then(Duration::try_days),
            _ => continue,
        };
        // out-of-range amounts mean an unknown date
        return offset
            .and_then(|offset| now.checked_sub_signed(offset))
            .map(|dt| dt.date());
    }

    for window in tokens.windows(2) {
        let Some(day) = parse_amount(window[0]) else {
            continue;
        };
        let Some(month) = MONTHS.iter().position(|m| *m == window[1]) else {
            continue;
        };
        let month = month as u32 + 1;
        let day = u32::try_from(day).ok()?;
        let this_year = NaiveDate::from_ymd_opt(today.year(), month, day)?;
        if this_year > today {
            return NaiveDate::from_ymd_opt(today.year() - 1, month, day);
        }
        return Some(this_year);
    }

    None
}

fn parse_amount(token: &str) -> Option<i64> {
    token.trim_end_matches('+').parse::<i64>().ok()
}
