//! Contribution aggregation.
//!
//! Folds [`ContributionEvent`]s into per-repository, per-user counters split
//! into a last-year bucket and an all-time bucket. Counters only grow; the
//! last-year bucket is always a subset of the all-time bucket.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};

use crate::model::{ContributionEvent, ContributionKind};

/// How far back the "last year" bucket reaches from the run time.
///
/// The boundary is inclusive: an event exactly `days` old is recent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookbackWindow {
    days: u32,
}

impl LookbackWindow {
    /// Default window length in days.
    pub const DEFAULT_DAYS: u32 = 365;

    /// A window reaching `days` back from the run time.
    pub const fn days(days: u32) -> Self {
        Self { days }
    }

    /// Whether an event at `timestamp` falls inside the window ending at `now`.
    ///
    /// Timestamps after `now` (clock skew) count as recent.
    pub fn contains(&self, now: DateTime<Utc>, timestamp: DateTime<Utc>) -> bool {
        now.signed_duration_since(timestamp) <= TimeDelta::days(i64::from(self.days))
    }
}

impl Default for LookbackWindow {
    fn default() -> Self {
        Self::days(Self::DEFAULT_DAYS)
    }
}

/// Counters for one user, either within one repository or organization-wide.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContributionCounts {
    /// Commits inside the lookback window.
    pub commits_last_year: u64,
    /// Reviews inside the lookback window.
    pub reviews_last_year: u64,
    /// All commits seen.
    pub commits_all_time: u64,
    /// All reviews seen.
    pub reviews_all_time: u64,
}

impl ContributionCounts {
    fn record(&mut self, kind: ContributionKind, recent: bool) {
        let (last_year, all_time) = match kind {
            ContributionKind::Commit => (&mut self.commits_last_year, &mut self.commits_all_time),
            ContributionKind::Review => (&mut self.reviews_last_year, &mut self.reviews_all_time),
        };
        *all_time += 1;
        if recent {
            *last_year += 1;
        }
    }

    fn merge(&mut self, other: &Self) {
        self.commits_last_year += other.commits_last_year;
        self.reviews_last_year += other.reviews_last_year;
        self.commits_all_time += other.commits_all_time;
        self.reviews_all_time += other.reviews_all_time;
    }

    /// Commits plus reviews inside the lookback window.
    pub const fn last_year_total(&self) -> u64 {
        self.commits_last_year + self.reviews_last_year
    }

    /// Commits plus reviews of any age.
    pub const fn all_time_total(&self) -> u64 {
        self.commits_all_time + self.reviews_all_time
    }
}

/// Per-user counters keyed by user, for one repository.
pub type RepositoryTotals = BTreeMap<String, ContributionCounts>;

/// Every counter accumulated during a run, broken down by repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContributionTotals {
    repositories: BTreeMap<String, RepositoryTotals>,
}

impl ContributionTotals {
    /// Counters for one user in one repository.
    pub fn get(&self, repository: &str, user: &str) -> Option<&ContributionCounts> {
        self.repositories.get(repository)?.get(user)
    }

    /// Per-user counters for one repository.
    pub fn repository(&self, name: &str) -> Option<&RepositoryTotals> {
        self.repositories.get(name)
    }

    /// Repositories in name order.
    pub fn repositories(&self) -> impl Iterator<Item = (&str, &RepositoryTotals)> {
        self.repositories
            .iter()
            .map(|(name, users)| (name.as_str(), users))
    }

    /// Organization-wide counters per user, summed across repositories.
    pub fn global(&self) -> BTreeMap<String, ContributionCounts> {
        let mut global: BTreeMap<String, ContributionCounts> = BTreeMap::new();
        for users in self.repositories.values() {
            for (user, counts) in users {
                global.entry(user.clone()).or_default().merge(counts);
            }
        }
        global
    }

    /// True when no event has been observed.
    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }
}

/// Single-writer accumulator for [`ContributionTotals`].
#[derive(Debug, Default)]
pub struct Aggregator {
    window: LookbackWindow,
    totals: ContributionTotals,
    observed: u64,
}

impl Aggregator {
    /// An empty aggregator using the given lookback window.
    pub fn new(window: LookbackWindow) -> Self {
        Self {
            window,
            totals: ContributionTotals::default(),
            observed: 0,
        }
    }

    /// Count one event relative to the run time `now`.
    pub fn observe(&mut self, event: &ContributionEvent, now: DateTime<Utc>) {
        let recent = self.window.contains(now, event.timestamp);
        self.totals
            .repositories
            .entry(event.repository.to_string())
            .or_default()
            .entry(event.author.key().to_string())
            .or_default()
            .record(event.kind, recent);
        self.observed += 1;
    }

    /// Number of events observed so far.
    pub const fn observed(&self) -> u64 {
        self.observed
    }

    /// Current totals, for inspection mid-run.
    pub const fn totals(&self) -> &ContributionTotals {
        &self.totals
    }

    /// Consume the aggregator and hand over the final totals.
    pub fn finish(self) -> ContributionTotals {
        self.totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Author;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn event(user: Option<&str>, repo: &str, kind: ContributionKind, days_ago: i64) -> ContributionEvent {
        ContributionEvent {
            author: Author::resolve([user]),
            repository: Arc::from(repo),
            kind,
            timestamp: now() - TimeDelta::days(days_ago),
        }
    }

    fn assert_subset(totals: &ContributionTotals) {
        for (repo, users) in totals.repositories() {
            for (user, c) in users {
                assert!(
                    c.commits_all_time >= c.commits_last_year,
                    "{repo}/{user}: commits all-time < last-year"
                );
                assert!(
                    c.reviews_all_time >= c.reviews_last_year,
                    "{repo}/{user}: reviews all-time < last-year"
                );
            }
        }
    }

    fn sample_events() -> Vec<ContributionEvent> {
        vec![
            event(Some("alice"), "api", ContributionKind::Commit, 3),
            event(Some("alice"), "api", ContributionKind::Review, 10),
            event(Some("bob"), "api", ContributionKind::Commit, 500),
            event(None, "api", ContributionKind::Review, 40),
            event(Some("carol"), "web", ContributionKind::Commit, 400),
            event(Some("alice"), "web", ContributionKind::Commit, 364),
            event(None, "web", ContributionKind::Commit, 900),
            event(Some("bob"), "web", ContributionKind::Review, 1),
        ]
    }

    #[test]
    fn all_time_never_below_last_year_after_each_observe() {
        let mut agg = Aggregator::default();
        for e in sample_events() {
            agg.observe(&e, now());
            assert_subset(agg.totals());
        }
    }

    #[test]
    fn aggregation_is_order_independent() {
        let events = sample_events();

        let mut forward = Aggregator::default();
        events.iter().for_each(|e| forward.observe(e, now()));

        let mut reversed = Aggregator::default();
        events.iter().rev().for_each(|e| reversed.observe(e, now()));

        // Interleave odd and even positions for a third ordering
        let mut shuffled = Aggregator::default();
        events
            .iter()
            .skip(1)
            .step_by(2)
            .chain(events.iter().step_by(2))
            .for_each(|e| shuffled.observe(e, now()));

        let expected = forward.finish();
        assert_eq!(reversed.finish(), expected);
        assert_eq!(shuffled.finish(), expected);
    }

    #[test]
    fn boundary_is_inclusive() {
        let window = LookbackWindow::default();
        let exactly = now() - TimeDelta::days(365);
        assert!(window.contains(now(), exactly));
        assert!(!window.contains(now(), exactly - TimeDelta::seconds(1)));
    }

    #[test]
    fn day_inside_and_day_outside_behave_oppositely() {
        let mut agg = Aggregator::new(LookbackWindow::default());
        agg.observe(&event(Some("inside"), "r", ContributionKind::Commit, 364), now());
        agg.observe(&event(Some("outside"), "r", ContributionKind::Commit, 366), now());
        let totals = agg.finish();

        let inside = totals.get("r", "inside").unwrap();
        assert_eq!((inside.commits_last_year, inside.commits_all_time), (1, 1));

        let outside = totals.get("r", "outside").unwrap();
        assert_eq!((outside.commits_last_year, outside.commits_all_time), (0, 1));
    }

    #[test]
    fn future_timestamps_count_as_recent() {
        let window = LookbackWindow::default();
        assert!(window.contains(now(), now() + TimeDelta::hours(2)));
    }

    #[test]
    fn custom_window_is_honored() {
        let window = LookbackWindow::days(30);
        assert!(window.contains(now(), now() - TimeDelta::days(30)));
        assert!(!window.contains(now(), now() - TimeDelta::days(31)));
    }

    #[test]
    fn unknown_authors_are_never_dropped() {
        let events = sample_events();
        let mut agg = Aggregator::default();
        events.iter().for_each(|e| agg.observe(e, now()));
        assert_eq!(agg.observed(), events.len() as u64);
        let totals = agg.finish();

        let commits = events.iter().filter(|e| e.kind == ContributionKind::Commit).count() as u64;
        let reviews = events.len() as u64 - commits;
        let global = totals.global();
        assert_eq!(global.values().map(|c| c.commits_all_time).sum::<u64>(), commits);
        assert_eq!(global.values().map(|c| c.reviews_all_time).sum::<u64>(), reviews);

        let unknown = global.get(crate::model::UNKNOWN_AUTHOR).unwrap();
        assert_eq!(unknown.commits_all_time, 1);
        assert_eq!(unknown.reviews_all_time, 1);
        assert_eq!(unknown.reviews_last_year, 1);
    }

    #[test]
    fn global_sums_across_repositories() {
        let mut agg = Aggregator::default();
        sample_events().iter().for_each(|e| agg.observe(e, now()));
        let global = agg.finish().global();

        let alice = global.get("alice").unwrap();
        assert_eq!(alice.commits_last_year, 2);
        assert_eq!(alice.commits_all_time, 2);
        assert_eq!(alice.reviews_last_year, 1);
        assert_eq!(alice.last_year_total(), 3);

        let bob = global.get("bob").unwrap();
        assert_eq!(bob.commits_last_year, 0);
        assert_eq!(bob.all_time_total(), 2);
    }

    #[test]
    fn totals_keep_repository_breakdown() {
        let mut agg = Aggregator::default();
        sample_events().iter().for_each(|e| agg.observe(e, now()));
        let totals = agg.finish();

        let names: Vec<&str> = totals.repositories().map(|(name, _)| name).collect();
        assert_eq!(names, ["api", "web"]);
        assert!(totals.get("api", "carol").is_none());
        assert_eq!(totals.get("web", "carol").unwrap().commits_all_time, 1);
        assert_eq!(totals.repository("api").unwrap().len(), 3);
    }

    #[test]
    fn new_aggregator_is_empty() {
        let agg = Aggregator::default();
        assert!(agg.totals().is_empty());
        assert_eq!(agg.observed(), 0);
    }
}
