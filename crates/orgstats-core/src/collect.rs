//! One full collection run: walk the organization and aggregate as pages land.
//!
//! The walker produces events on a bounded channel and a single consumer
//! folds them into an [`Aggregator`], so memory stays proportional to the
//! number of distinct `(repository, user)` pairs rather than to history size.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, instrument};

use crate::aggregate::{Aggregator, ContributionTotals};
use crate::executor::QueryExecutor;
use crate::model::ContributionEvent;
use crate::walker::{WalkError, WalkSummary, Walker};

/// Events allowed in flight between the walker and the aggregator.
const CHANNEL_CAPACITY: usize = 1024;

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collected {
    /// Final counters.
    pub totals: ContributionTotals,
    /// What the walk covered.
    pub summary: WalkSummary,
    /// Events folded into `totals`.
    pub events: u64,
}

/// Walk `org` and aggregate every contribution against `now`.
///
/// `on_event` sees each event after it is counted, e.g. to drive a progress
/// indicator. On error, nothing collected so far is returned.
///
/// # Errors
///
/// The first fatal [`WalkError`].
#[instrument(skip(walker, aggregator, on_event))]
pub async fn collect<E, F>(
    walker: &Walker<E>,
    org: &str,
    mut aggregator: Aggregator,
    now: DateTime<Utc>,
    mut on_event: F,
) -> Result<Collected, WalkError>
where
    E: QueryExecutor,
    F: FnMut(&ContributionEvent),
{
    let (tx, mut rx) = mpsc::channel::<ContributionEvent>(CHANNEL_CAPACITY);

    let produce = async move {
        let sink = tx;
        walker.walk(org, &sink).await
    };
    let consume = async move {
        while let Some(event) = rx.recv().await {
            aggregator.observe(&event, now);
            on_event(&event);
        }
        aggregator
    };

    let (walked, aggregator) = tokio::join!(produce, consume);
    let summary = walked?;
    let events = aggregator.observed();
    debug!(events, "aggregation complete");

    Ok(Collected {
        totals: aggregator.finish(),
        summary,
        events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::LookbackWindow;
    use crate::executor::ExecutorError;
    use crate::query::COMMIT_HISTORY;
    use crate::testing::{FakeGithub, FakeOrganization, FakePullRequest, FakeRepository};
    use crate::walker::{RetryPolicy, WalkOptions};
    use chrono::{TimeDelta, TimeZone};
    use std::time::Duration;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn ago(days: i64) -> DateTime<Utc> {
        now() - TimeDelta::days(days)
    }

    fn options() -> WalkOptions {
        WalkOptions {
            page_size: 2,
            concurrency: 3,
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::ZERO,
                attempt_timeout: Duration::from_secs(5),
            },
        }
    }

    #[tokio::test]
    async fn aggregates_across_repositories() {
        let org = FakeOrganization::new("acme")
            .repository(
                FakeRepository::new("A")
                    .commit("alice", ago(10))
                    .commit("alice", ago(20))
                    .commit("bob", ago(30))
                    .pull_request(FakePullRequest::by("bob").review("alice", ago(5))),
            )
            .repository(FakeRepository::new("B").commit("carol", ago(400)));
        let walker = Walker::new(FakeGithub::new(org), options());

        let mut seen = 0;
        let collected = collect(&walker, "acme", Aggregator::default(), now(), |_| seen += 1)
            .await
            .unwrap();

        assert_eq!(seen, 5);
        assert_eq!(collected.events, 5);
        assert_eq!(collected.summary.repositories, 2);

        let alice = collected.totals.get("A", "alice").unwrap();
        assert_eq!((alice.commits_last_year, alice.reviews_last_year), (2, 1));
        let bob = collected.totals.get("A", "bob").unwrap();
        assert_eq!((bob.commits_last_year, bob.reviews_last_year), (1, 0));
        let carol = collected.totals.get("B", "carol").unwrap();
        assert_eq!((carol.commits_last_year, carol.commits_all_time), (0, 1));
    }

    #[tokio::test]
    async fn window_comes_from_the_aggregator() {
        let org = FakeOrganization::new("acme")
            .repository(FakeRepository::new("A").commit("alice", ago(40)));
        let walker = Walker::new(FakeGithub::new(org), options());

        let collected = collect(
            &walker,
            "acme",
            Aggregator::new(LookbackWindow::days(30)),
            now(),
            |_| {},
        )
        .await
        .unwrap();

        let alice = collected.totals.get("A", "alice").unwrap();
        assert_eq!(alice.commits_last_year, 0);
        assert_eq!(alice.commits_all_time, 1);
    }

    #[tokio::test]
    async fn unknown_organization_yields_no_totals() {
        let mut repo = FakeRepository::new("A");
        for i in 0..10 {
            repo = repo.commit("alice", ago(i));
        }
        let github = FakeGithub::new(FakeOrganization::new("acme").repository(repo));
        let walker = Walker::new(github, options());

        let result = collect(&walker, "other", Aggregator::default(), now(), |_| {}).await;
        assert!(matches!(result, Err(WalkError::UnknownOrganization(_))));
    }

    #[tokio::test]
    async fn failure_after_events_were_counted_returns_no_totals() {
        let org = FakeOrganization::new("acme")
            .repository(
                FakeRepository::new("A")
                    .commit("alice", ago(1))
                    .commit("alice", ago(2))
                    .commit("bob", ago(3)),
            )
            .repository(FakeRepository::new("B").commit("carol", ago(1)));
        let github = FakeGithub::new(org).fail_on(|query, variables| {
            (query == COMMIT_HISTORY && variables["name"] == "B")
                .then_some(ExecutorError::Server { status: 502 })
        });
        let walker = Walker::new(
            github,
            WalkOptions {
                concurrency: 1,
                ..options()
            },
        );

        let mut seen = Vec::new();
        let result = collect(&walker, "acme", Aggregator::default(), now(), |event| {
            seen.push(event.repository.to_string());
        })
        .await;

        assert!(
            matches!(result, Err(WalkError::Transport { ref what, attempts: 2, .. }) if what == "commit history of B"),
            "{result:?}"
        );
        assert_eq!(seen, ["A", "A", "A"]);
    }

    #[tokio::test]
    async fn transport_failure_before_any_data_is_fatal() {
        let github = FakeGithub::new(FakeOrganization::new("acme")).fail_next([
            ExecutorError::Server { status: 503 },
            ExecutorError::Server { status: 503 },
        ]);
        let walker = Walker::new(github, options());

        let result = collect(&walker, "acme", Aggregator::default(), now(), |_| {}).await;
        assert!(matches!(result, Err(WalkError::Transport { attempts: 2, .. })));
    }

    #[tokio::test]
    async fn empty_organization_collects_nothing() {
        let walker = Walker::new(FakeGithub::new(FakeOrganization::new("acme")), options());

        let collected = collect(&walker, "acme", Aggregator::default(), now(), |_| {})
            .await
            .unwrap();

        assert!(collected.totals.is_empty());
        assert_eq!(collected.summary, WalkSummary::default());
    }
}
