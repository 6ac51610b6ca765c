//! The report run: credential, walk, aggregate, render.

use std::io::{BufWriter, IsTerminal, Write};
use std::time::Duration;

use anyhow::{Context, bail};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::{OwoColorize, Stream};
use tracing::{debug, info, instrument};

use orgstats_core::config::Config;
use orgstats_core::credentials::{EnvStore, KeyringStore, SecretStore, load_credential};
use orgstats_core::{Aggregator, GithubExecutor, ReportOptions, Walker, collect, render};

/// Events between spinner message updates.
const PROGRESS_EVERY: u64 = 50;

fn spinner(quiet: bool) -> ProgressBar {
    if quiet || !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        spinner.set_style(style);
    }
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

/// Collect contributions for `org` and write the report to stdout.
///
/// Nothing is written to stdout unless the whole walk succeeds.
#[instrument(name = "cmd_report", skip(config, options))]
pub async fn cmd_report(
    org: &str,
    options: ReportOptions,
    config: &Config,
    quiet: bool,
) -> anyhow::Result<()> {
    let org = org.trim();
    if org.is_empty() {
        bail!("organization name must not be empty");
    }

    let stores: [&dyn SecretStore; 2] = [&EnvStore::default(), &KeyringStore];
    let credential = load_credential(&stores).context("failed to obtain a GitHub credential")?;
    let executor = GithubExecutor::new(credential, &config.github)
        .context("failed to set up the GitHub client")?;
    let walk_options = config.github.walk_options();
    debug!(?walk_options, endpoint = %config.github.api_url, "walker configured");
    let walker = Walker::new(executor, walk_options);

    let progress = spinner(quiet);
    progress.set_message(format!("Fetching {org}..."));
    let mut seen: u64 = 0;
    let now = Utc::now();
    let collected = collect(
        &walker,
        org,
        Aggregator::new(config.report.lookback()),
        now,
        |event| {
            seen += 1;
            if seen % PROGRESS_EVERY == 0 {
                progress.set_message(format!("Fetching {org}... {seen} contributions ({})", event.repository));
            }
        },
    )
    .await;
    progress.finish_and_clear();
    let collected = collected.with_context(|| format!("failed to collect statistics for `{org}`"))?;

    info!(
        repositories = collected.summary.repositories,
        skipped = collected.summary.skipped,
        events = collected.events,
        requests = walker.requests(),
        "collection finished"
    );

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    render(&mut out, org, &collected.totals, now, options).context("failed to write report")?;
    out.flush().context("failed to write report")?;

    if !quiet {
        eprintln!(
            "{} {} repositories, {} commits, {} reviews ({} skipped)",
            "✓".if_supports_color(Stream::Stderr, |t| t.green()),
            collected.summary.repositories,
            collected.summary.commits,
            collected.summary.reviews,
            collected.summary.skipped,
        );
    }
    Ok(())
}
