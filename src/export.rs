// src/export.rs
//! CSV export of stored job records

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::cmp::Reverse;
use std::io::Write;

use crate::types::JobRecord;

pub const RECENT_DAYS: i64 = 7;

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    #[serde(rename = "Title")]
    title: &'a str,
    #[serde(rename = "Company")]
    company: &'a str,
    #[serde(rename = "Location")]
    location: &'a str,
    #[serde(rename = "Posted Date")]
    posted_date: String,
    #[serde(rename = "Salary")]
    salary: &'a str,
    #[serde(rename = "Job Type")]
    job_type: &'a str,
    #[serde(rename = "Source")]
    source: &'a str,
    #[serde(rename = "Match Score")]
    match_score: i64,
    #[serde(rename = "Reasoning")]
    match_reasoning: &'a str,
    #[serde(rename = "Applied")]
    is_applied: bool,
    #[serde(rename = "Link")]
    link: &'a str,
}

impl<'a> From<&'a JobRecord> for ExportRow<'a> {
    fn from(job: &'a JobRecord) -> Self {
        Self {
            title: &job.title,
            company: &job.company,
            location: &job.location,
            posted_date: job
                .posted_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            salary: &job.salary,
            job_type: &job.job_type,
            source: &job.source,
            match_score: job.match_score,
            match_reasoning: &job.match_reasoning,
            is_applied: job.is_applied,
            link: &job.link,
        }
    }
}

/// Write `jobs` as CSV, newest posting first with undated rows last.
///
/// Unless `include_all` is set, only postings from the last
/// [`RECENT_DAYS`] days (and undated ones) are written. Returns the row count.
pub fn export_csv<W: Write>(
    jobs: &[JobRecord],
    writer: W,
    today: NaiveDate,
    include_all: bool,
) -> Result<usize> {
    let cutoff = today - Duration::days(RECENT_DAYS);

    let mut selected: Vec<&JobRecord> = jobs
        .iter()
        .filter(|job| include_all || job.posted_date.map_or(true, |d| d >= cutoff))
        .collect();
    // None sorts below Some, so Reverse puts undated rows last
    selected.sort_by_key(|job| Reverse(job.posted_date));

    let mut csv_writer = csv::Writer::from_writer(writer);
    for job in &selected {
        csv_writer
            .serialize(ExportRow::from(*job))
            .with_context(|| format!("Failed to write CSV row for {}", job.link))?;
    }
    csv_writer.flush().context("Failed to flush CSV output")?;

    Ok(selected.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::job;

    fn dated(title: &str, date: Option<NaiveDate>) -> JobRecord {
        let mut record = job(title, &format!("https://r/{}", title));
        record.posted_date = date;
        record
    }

    #[test]
    fn test_recent_filter_and_ordering() {
        let today = NaiveDate::from_ymd_opt(2025, 11, 20).unwrap();
        let jobs = vec![
            dated("undated", None),
            dated("old", NaiveDate::from_ymd_opt(2025, 11, 1)),
            dated("mid", NaiveDate::from_ymd_opt(2025, 11, 15)),
            dated("new", NaiveDate::from_ymd_opt(2025, 11, 19)),
        ];

        let mut out = Vec::new();
        let rows = export_csv(&jobs, &mut out, today, false).unwrap();
        assert_eq!(rows, 3);

        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("Title,Company,Location,Posted Date"));
        let titles: Vec<&str> = lines.map(|l| l.split(',').next().unwrap()).collect();
        assert_eq!(titles, vec!["new", "mid", "undated"]);
    }

    #[test]
    fn test_include_all_keeps_old_rows() {
        let today = NaiveDate::from_ymd_opt(2025, 11, 20).unwrap();
        let jobs = vec![dated("old", NaiveDate::from_ymd_opt(2024, 1, 1))];

        let mut out = Vec::new();
        assert_eq!(export_csv(&jobs, &mut out, today, true).unwrap(), 1);
    }
}
