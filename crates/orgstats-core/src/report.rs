//! Rendering of [`ContributionTotals`] as text, CSV, or JSON.
//!
//! All three formats share the same row selection: contributors ordered by
//! last-year activity, and, unless totals are requested, only those with
//! last-year activity at all.

use std::io::{self, Write};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aggregate::{ContributionCounts, ContributionTotals, RepositoryTotals};

/// Minimum width of the author column in text output.
const AUTHOR_WIDTH: usize = 26;

/// Gap between text columns.
const GAP: usize = 2;

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportFormat {
    /// Aligned columns, one block per repository.
    #[default]
    Text,
    /// RFC 4180 CSV with a header row.
    Csv,
    /// A single JSON document.
    Json,
}

/// What to render and how.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportOptions {
    /// Include all-time columns and contributors with no recent activity.
    pub show_totals: bool,
    /// Output format.
    pub format: ReportFormat,
}

/// Write the report for `org` to `out`.
///
/// # Errors
///
/// Any I/O error from `out`.
pub fn render<W: Write>(
    out: &mut W,
    org: &str,
    totals: &ContributionTotals,
    generated_at: DateTime<Utc>,
    options: ReportOptions,
) -> io::Result<()> {
    match options.format {
        ReportFormat::Text => render_text(out, totals, generated_at, options.show_totals),
        ReportFormat::Csv => render_csv(out, totals, options.show_totals),
        ReportFormat::Json => render_json(out, org, totals, generated_at, options.show_totals),
    }
}

/// Contributors of one repository in report order.
fn rows(users: &RepositoryTotals, show_totals: bool) -> Vec<(&str, &ContributionCounts)> {
    let mut rows: Vec<(&str, &ContributionCounts)> = users
        .iter()
        .filter(|(_, counts)| show_totals || counts.last_year_total() > 0)
        .map(|(user, counts)| (user.as_str(), counts))
        .collect();
    rows.sort_by(|(a_user, a), (b_user, b)| {
        b.last_year_total()
            .cmp(&a.last_year_total())
            .then_with(|| a_user.cmp(b_user))
    });
    rows
}

/// A numeric column of the text report.
#[derive(Debug, Clone, Copy)]
enum Column {
    CommitsLastYear,
    CommitsAllTime,
    ReviewsLastYear,
    ReviewsAllTime,
}

impl Column {
    const fn title(self) -> &'static str {
        match self {
            Self::CommitsLastYear => "Commits in last year",
            Self::CommitsAllTime => "Total commits",
            Self::ReviewsLastYear => "Reviews in last year",
            Self::ReviewsAllTime => "Total reviews",
        }
    }

    const fn value(self, counts: &ContributionCounts) -> u64 {
        match self {
            Self::CommitsLastYear => counts.commits_last_year,
            Self::CommitsAllTime => counts.commits_all_time,
            Self::ReviewsLastYear => counts.reviews_last_year,
            Self::ReviewsAllTime => counts.reviews_all_time,
        }
    }

    fn selected(show_totals: bool) -> &'static [Self] {
        if show_totals {
            &[
                Self::CommitsLastYear,
                Self::CommitsAllTime,
                Self::ReviewsLastYear,
                Self::ReviewsAllTime,
            ]
        } else {
            &[Self::CommitsLastYear, Self::ReviewsLastYear]
        }
    }
}

fn render_text<W: Write>(
    out: &mut W,
    totals: &ContributionTotals,
    generated_at: DateTime<Utc>,
    show_totals: bool,
) -> io::Result<()> {
    writeln!(out, "Data as of {}", generated_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
    let columns = Column::selected(show_totals);

    for (repository, users) in totals.repositories() {
        let rows = rows(users, show_totals);
        let author_width = rows
            .iter()
            .map(|(user, _)| user.chars().count() + GAP)
            .fold(AUTHOR_WIDTH, usize::max);

        writeln!(out)?;
        writeln!(out, "{repository}")?;

        let mut header = format!("{:<author_width$}", "Author");
        for (i, column) in columns.iter().enumerate() {
            let width = if i + 1 == columns.len() { 0 } else { column.title().len() + GAP };
            header.push_str(&format!("{:<width$}", column.title()));
        }
        writeln!(out, "{header}")?;
        writeln!(out, "{}", "-".repeat(header.chars().count()))?;

        for (user, counts) in rows {
            let mut line = format!("{user:<author_width$}");
            for (i, column) in columns.iter().enumerate() {
                let width = if i + 1 == columns.len() { 0 } else { column.title().len() + GAP };
                line.push_str(&format!("{:<width$}", column.value(counts)));
            }
            writeln!(out, "{}", line.trim_end())?;
        }
    }
    Ok(())
}

/// Quote a CSV field when it contains a delimiter, quote, or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn render_csv<W: Write>(out: &mut W, totals: &ContributionTotals, show_totals: bool) -> io::Result<()> {
    let mut header = String::from("repository,user,commits_last_year,reviews_last_year");
    if show_totals {
        header.push_str(",commits_all_time,reviews_all_time");
    }
    writeln!(out, "{header}")?;

    for (repository, users) in totals.repositories() {
        let repository = csv_field(repository);
        for (user, counts) in rows(users, show_totals) {
            write!(
                out,
                "{repository},{},{},{}",
                csv_field(user),
                counts.commits_last_year,
                counts.reviews_last_year
            )?;
            if show_totals {
                write!(out, ",{},{}", counts.commits_all_time, counts.reviews_all_time)?;
            }
            writeln!(out)?;
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct JsonReport<'a> {
    generated_at: DateTime<Utc>,
    organization: &'a str,
    repositories: Vec<JsonRepository<'a>>,
}

#[derive(Serialize)]
struct JsonRepository<'a> {
    name: &'a str,
    contributors: Vec<JsonContributor<'a>>,
}

#[derive(Serialize)]
struct JsonContributor<'a> {
    user: &'a str,
    commits_last_year: u64,
    reviews_last_year: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    commits_all_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reviews_all_time: Option<u64>,
}

fn render_json<W: Write>(
    out: &mut W,
    org: &str,
    totals: &ContributionTotals,
    generated_at: DateTime<Utc>,
    show_totals: bool,
) -> io::Result<()> {
    let repositories = totals
        .repositories()
        .map(|(name, users)| JsonRepository {
            name,
            contributors: rows(users, show_totals)
                .into_iter()
                .map(|(user, counts)| JsonContributor {
                    user,
                    commits_last_year: counts.commits_last_year,
                    reviews_last_year: counts.reviews_last_year,
                    commits_all_time: show_totals.then_some(counts.commits_all_time),
                    reviews_all_time: show_totals.then_some(counts.reviews_all_time),
                })
                .collect(),
        })
        .collect();

    let report = JsonReport {
        generated_at,
        organization: org,
        repositories,
    };
    serde_json::to_writer_pretty(&mut *out, &report)?;
    writeln!(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregator;
    use crate::model::{Author, ContributionEvent, ContributionKind};
    use chrono::{TimeDelta, TimeZone};
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn event(user: &str, repo: &str, kind: ContributionKind, days_ago: i64) -> ContributionEvent {
        ContributionEvent {
            author: Author::Known(user.to_string()),
            repository: Arc::from(repo),
            kind,
            timestamp: now() - TimeDelta::days(days_ago),
        }
    }

    /// Repo A: commits by alice and bob plus a review by alice, all recent.
    /// Repo B: one commit by carol, 400 days old.
    fn scenario() -> ContributionTotals {
        let mut aggregator = Aggregator::default();
        for e in [
            event("alice", "A", ContributionKind::Commit, 10),
            event("bob", "A", ContributionKind::Commit, 20),
            event("alice", "A", ContributionKind::Review, 5),
            event("carol", "B", ContributionKind::Commit, 400),
        ] {
            aggregator.observe(&e, now());
        }
        aggregator.finish()
    }

    fn rendered(totals: &ContributionTotals, show_totals: bool, format: ReportFormat) -> String {
        let mut out = Vec::new();
        render(
            &mut out,
            "acme",
            totals,
            now(),
            ReportOptions { show_totals, format },
        )
        .unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn text_without_totals_hides_inactive_contributors() {
        let text = rendered(&scenario(), false, ReportFormat::Text);
        let expected = "\
Data as of 2025-06-01 12:00:00 UTC

A
Author                    Commits in last year  Reviews in last year
--------------------------------------------------------------------
alice                     1                     1
bob                       1                     0

B
Author                    Commits in last year  Reviews in last year
--------------------------------------------------------------------
";
        assert_eq!(text, expected);
    }

    #[test]
    fn text_with_totals_shows_all_time_columns() {
        let text = rendered(&scenario(), true, ReportFormat::Text);
        let expected = "\
Data as of 2025-06-01 12:00:00 UTC

A
Author                    Commits in last year  Total commits  Reviews in last year  Total reviews
--------------------------------------------------------------------------------------------------
alice                     1                     1              1                     1
bob                       1                     1              0                     0

B
Author                    Commits in last year  Total commits  Reviews in last year  Total reviews
--------------------------------------------------------------------------------------------------
carol                     0                     1              0                     0
";
        assert_eq!(text, expected);
    }

    #[test]
    fn long_names_widen_the_author_column() {
        let mut aggregator = Aggregator::default();
        let name = "a-very-long-contributor-login";
        aggregator.observe(&event(name, "A", ContributionKind::Commit, 1), now());
        let text = rendered(&aggregator.finish(), false, ReportFormat::Text);

        let row = text.lines().find(|l| l.starts_with(name)).unwrap();
        assert_eq!(row, format!("{name}  1                     0"));
    }

    #[test]
    fn rows_sort_by_activity_then_name() {
        let mut aggregator = Aggregator::default();
        for e in [
            event("zed", "A", ContributionKind::Commit, 1),
            event("zed", "A", ContributionKind::Review, 1),
            event("amy", "A", ContributionKind::Commit, 1),
            event("bea", "A", ContributionKind::Review, 1),
        ] {
            aggregator.observe(&e, now());
        }
        let csv = rendered(&aggregator.finish(), false, ReportFormat::Csv);
        let users: Vec<&str> = csv
            .lines()
            .skip(1)
            .map(|l| l.split(',').nth(1).unwrap())
            .collect();
        assert_eq!(users, ["zed", "amy", "bea"]);
    }

    #[test]
    fn csv_has_one_row_per_repository_and_user() {
        let csv = rendered(&scenario(), true, ReportFormat::Csv);
        let expected = "\
repository,user,commits_last_year,reviews_last_year,commits_all_time,reviews_all_time
A,alice,1,1,1,1
A,bob,1,0,1,0
B,carol,0,0,1,0
";
        assert_eq!(csv, expected);
    }

    #[test]
    fn csv_without_totals_omits_inactive_rows() {
        let csv = rendered(&scenario(), false, ReportFormat::Csv);
        assert_eq!(
            csv,
            "repository,user,commits_last_year,reviews_last_year\nA,alice,1,1\nA,bob,1,0\n"
        );
    }

    #[test]
    fn csv_quotes_awkward_names() {
        let mut aggregator = Aggregator::default();
        aggregator.observe(&event("Doe, Jane", "A", ContributionKind::Commit, 1), now());
        aggregator.observe(&event("say \"hi\"", "A", ContributionKind::Commit, 2), now());
        let csv = rendered(&aggregator.finish(), false, ReportFormat::Csv);

        assert!(csv.contains("A,\"Doe, Jane\",1,0\n"), "{csv}");
        assert!(csv.contains("A,\"say \"\"hi\"\"\",1,0\n"), "{csv}");
    }

    #[test]
    fn json_omits_all_time_without_totals() {
        let json = rendered(&scenario(), false, ReportFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["organization"], "acme");
        assert_eq!(value["repositories"][0]["name"], "A");
        let alice = &value["repositories"][0]["contributors"][0];
        assert_eq!(alice["user"], "alice");
        assert_eq!(alice["reviews_last_year"], 1);
        assert!(alice.get("commits_all_time").is_none());
        assert_eq!(value["repositories"][1]["contributors"], serde_json::json!([]));
    }

    #[test]
    fn json_with_totals_includes_inactive_contributors() {
        let json = rendered(&scenario(), true, ReportFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        let carol = &value["repositories"][1]["contributors"][0];
        assert_eq!(carol["user"], "carol");
        assert_eq!(carol["commits_last_year"], 0);
        assert_eq!(carol["commits_all_time"], 1);
    }

    #[test]
    fn empty_totals_render_only_preamble() {
        let empty = ContributionTotals::default();
        assert_eq!(
            rendered(&empty, false, ReportFormat::Text),
            "Data as of 2025-06-01 12:00:00 UTC\n"
        );
        assert_eq!(
            rendered(&empty, false, ReportFormat::Csv),
            "repository,user,commits_last_year,reviews_last_year\n"
        );
    }
}
