//! Nested pagination over an organization's history.
//!
//! The walker follows three levels of connections: the organization's
//! repositories, each repository's default-branch history, and each
//! repository's pull requests with their reviews. Every commit or review
//! becomes a [`ContributionEvent`] sent to an [`EventSink`] as soon as its
//! page arrives; nothing is buffered beyond one page.
//!
//! Repositories on the same page are walked concurrently up to
//! [`WalkOptions::concurrency`]. Any fatal error stops the whole walk.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::executor::{ExecutorError, GraphQlError, GraphQlResponse, QueryExecutor};
use crate::model::{Author, ContributionEvent, ContributionKind, RepositoryRef};
use crate::query::{
    COMMIT_HISTORY, CommitHistoryData, Connection, PULL_REQUESTS, PageInfo, PullRequestsData,
    REPOSITORIES, REVIEW_PAGE, RepositoriesData, ReviewNode, ReviewPageData,
};

/// Longest server-requested wait honored before a retry.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Where the walker delivers events.
pub type EventSink = mpsc::Sender<ContributionEvent>;

/// Fatal walk failures. None of these leave a usable partial result.
#[derive(Error, Debug)]
pub enum WalkError {
    /// The token was rejected.
    #[error("GitHub rejected the credential (HTTP {status}); check the stored token and its read:org scope")]
    Auth {
        /// HTTP status code.
        status: u16,
    },

    /// Network failure that persisted through every retry, or a
    /// non-retryable HTTP status.
    #[error("{what}: request failed after {attempts} attempt(s): {source}")]
    Transport {
        /// Connection being fetched.
        what: String,
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        source: ExecutorError,
    },

    /// The response carried GraphQL `errors`.
    #[error("{what}: query rejected: {}", .messages.join("; "))]
    Query {
        /// Connection being fetched.
        what: String,
        /// Messages from the `errors` array.
        messages: Vec<String>,
    },

    /// The response did not match the expected schema.
    #[error("{what}: unexpected response shape: {detail}")]
    DataShape {
        /// Connection being fetched.
        what: String,
        /// What was wrong.
        detail: String,
    },

    /// The organization does not exist or is not visible to the token.
    #[error("organization `{0}` not found or not visible to this token")]
    UnknownOrganization(String),

    /// The event receiver was dropped mid-walk.
    #[error("event consumer stopped before the walk finished")]
    Aborted,
}

fn shape(what: &str, detail: impl Into<String>) -> WalkError {
    WalkError::DataShape {
        what: what.to_string(),
        detail: detail.into(),
    }
}

/// Retry behavior for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per query, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_delay: Duration,
    /// Upper bound on one attempt.
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

/// Walker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkOptions {
    /// `first:` argument on every connection.
    pub page_size: u32,
    /// Repositories walked at the same time.
    pub concurrency: usize,
    /// Retry behavior.
    pub retry: RetryPolicy,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            page_size: 100,
            concurrency: 4,
            retry: RetryPolicy::default(),
        }
    }
}

/// What a finished walk covered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkSummary {
    /// Repositories whose history was walked.
    pub repositories: u64,
    /// Archived or empty repositories passed over.
    pub skipped: u64,
    /// Commit events emitted.
    pub commits: u64,
    /// Review events emitted.
    pub reviews: u64,
}

/// Cursors already followed on one connection.
#[derive(Debug, Default)]
struct CursorTrail {
    followed: HashSet<String>,
}

impl CursorTrail {
    /// The cursor for the next page, or `None` when the connection is done.
    fn advance(&mut self, page: &PageInfo, what: &str) -> Result<Option<String>, WalkError> {
        if !page.has_next_page {
            return Ok(None);
        }
        let cursor = page
            .end_cursor
            .clone()
            .ok_or_else(|| shape(what, "hasNextPage is set but endCursor is missing"))?;
        if !self.followed.insert(cursor.clone()) {
            return Err(shape(what, format!("cursor {cursor:?} was already followed")));
        }
        Ok(Some(cursor))
    }
}

async fn emit(sink: &EventSink, event: ContributionEvent) -> Result<(), WalkError> {
    sink.send(event).await.map_err(|_| WalkError::Aborted)
}

/// Drives a [`QueryExecutor`] through every connection of an organization.
#[derive(Debug)]
pub struct Walker<E> {
    executor: E,
    options: WalkOptions,
    requests: AtomicU64,
}

impl<E: QueryExecutor> Walker<E> {
    /// A walker issuing queries through `executor`.
    pub const fn new(executor: E, options: WalkOptions) -> Self {
        Self {
            executor,
            options,
            requests: AtomicU64::new(0),
        }
    }

    /// The underlying executor.
    pub const fn executor(&self) -> &E {
        &self.executor
    }

    /// Query attempts made so far, retries included.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Walk every repository of `org`, sending each contribution to `sink`.
    ///
    /// # Errors
    ///
    /// Any [`WalkError`]; events already sent must then be discarded.
    #[instrument(skip(self, sink))]
    pub async fn walk(&self, org: &str, sink: &EventSink) -> Result<WalkSummary, WalkError> {
        let what = format!("repositories of {org}");
        let mut trail = CursorTrail::default();
        let mut after: Option<String> = None;
        let mut summary = WalkSummary::default();

        loop {
            let response = self
                .execute_with_retry(
                    REPOSITORIES,
                    json!({ "org": org, "first": self.options.page_size, "after": after }),
                    &what,
                )
                .await?;
            if response.errors.iter().any(GraphQlError::is_not_found) {
                return Err(WalkError::UnknownOrganization(org.to_string()));
            }
            let data: RepositoriesData = decode(response, &what)?;
            let Connection { page_info, nodes } = data
                .organization
                .ok_or_else(|| WalkError::UnknownOrganization(org.to_string()))?
                .repositories;

            let mut eligible = Vec::new();
            for node in nodes.into_iter().flatten() {
                match node.default_branch_ref {
                    _ if node.is_archived => {
                        debug!(repository = %node.name, "skipping archived repository");
                        summary.skipped += 1;
                    }
                    None => {
                        debug!(repository = %node.name, "skipping empty repository");
                        summary.skipped += 1;
                    }
                    Some(branch) => eligible.push(RepositoryRef {
                        name: Arc::from(node.name.as_str()),
                        default_branch: branch.name,
                    }),
                }
            }

            let walked: Vec<(u64, u64)> = stream::iter(
                eligible
                    .iter()
                    .map(|repo| self.walk_repository(org, repo, sink)),
            )
            .buffer_unordered(self.options.concurrency.max(1))
            .try_collect()
            .await?;

            for (commits, reviews) in walked {
                summary.repositories += 1;
                summary.commits += commits;
                summary.reviews += reviews;
            }

            match trail.advance(&page_info, &what)? {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        info!(
            repositories = summary.repositories,
            skipped = summary.skipped,
            commits = summary.commits,
            reviews = summary.reviews,
            requests = self.requests(),
            "walk complete"
        );
        Ok(summary)
    }

    /// Walk one repository's commit and review connections together.
    async fn walk_repository(
        &self,
        org: &str,
        repo: &RepositoryRef,
        sink: &EventSink,
    ) -> Result<(u64, u64), WalkError> {
        debug!(repository = %repo.name, branch = %repo.default_branch, "walking repository");
        tokio::try_join!(
            self.walk_commits(org, repo, sink),
            self.walk_reviews(org, repo, sink)
        )
    }

    async fn walk_commits(
        &self,
        org: &str,
        repo: &RepositoryRef,
        sink: &EventSink,
    ) -> Result<u64, WalkError> {
        let what = format!("commit history of {}", repo.name);
        let qualified = format!("refs/heads/{}", repo.default_branch);
        let mut trail = CursorTrail::default();
        let mut after: Option<String> = None;
        let mut emitted = 0;

        loop {
            let data: CommitHistoryData = self
                .fetch(
                    COMMIT_HISTORY,
                    json!({
                        "owner": org,
                        "name": &*repo.name,
                        "branch": qualified,
                        "first": self.options.page_size,
                        "after": after,
                    }),
                    &what,
                )
                .await?;
            let Connection { page_info, nodes } = data
                .repository
                .and_then(|r| r.git_ref)
                .and_then(|r| r.target)
                .and_then(|t| t.history)
                .ok_or_else(|| shape(&what, "repository, branch, or commit history is missing"))?;

            for commit in nodes.into_iter().flatten() {
                let author = commit.author.map_or(Author::Unknown, |actor| {
                    Author::resolve([
                        actor.user.as_ref().map(|user| user.login.as_str()),
                        actor.name.as_deref(),
                    ])
                });
                emit(
                    sink,
                    ContributionEvent {
                        author,
                        repository: Arc::clone(&repo.name),
                        kind: ContributionKind::Commit,
                        timestamp: commit.authored_date,
                    },
                )
                .await?;
                emitted += 1;
            }

            match trail.advance(&page_info, &what)? {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        debug!(repository = %repo.name, commits = emitted, "commit history exhausted");
        Ok(emitted)
    }

    async fn walk_reviews(
        &self,
        org: &str,
        repo: &RepositoryRef,
        sink: &EventSink,
    ) -> Result<u64, WalkError> {
        let what = format!("pull requests of {}", repo.name);
        let mut trail = CursorTrail::default();
        let mut after: Option<String> = None;
        let mut emitted = 0;

        loop {
            let data: PullRequestsData = self
                .fetch(
                    PULL_REQUESTS,
                    json!({
                        "owner": org,
                        "name": &*repo.name,
                        "first": self.options.page_size,
                        "after": after,
                    }),
                    &what,
                )
                .await?;
            let Connection { page_info, nodes } = data
                .repository
                .ok_or_else(|| shape(&what, "repository is missing"))?
                .pull_requests;

            for pr in nodes.into_iter().flatten() {
                let pr_author = pr.author.map(|actor| actor.login);
                let Connection {
                    page_info: review_info,
                    nodes: reviews,
                } = pr
                    .reviews
                    .ok_or_else(|| shape(&what, format!("reviews missing on {}", pr.id)))?;

                emitted += emit_reviews(repo, pr_author.as_deref(), reviews, sink).await?;
                if review_info.has_next_page {
                    emitted += self
                        .walk_review_pages(repo, &pr.id, pr_author.as_deref(), &review_info, sink)
                        .await?;
                }
            }

            match trail.advance(&page_info, &what)? {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        debug!(repository = %repo.name, reviews = emitted, "review history exhausted");
        Ok(emitted)
    }

    /// Follow one pull request's review connection past its first page.
    async fn walk_review_pages(
        &self,
        repo: &RepositoryRef,
        pr_id: &str,
        pr_author: Option<&str>,
        first_page: &PageInfo,
        sink: &EventSink,
    ) -> Result<u64, WalkError> {
        let what = format!("reviews of {} pull request {pr_id}", repo.name);
        let mut trail = CursorTrail::default();
        let mut after = trail.advance(first_page, &what)?;
        let mut emitted = 0;

        while let Some(cursor) = after {
            let data: ReviewPageData = self
                .fetch(
                    REVIEW_PAGE,
                    json!({ "id": pr_id, "first": self.options.page_size, "after": cursor }),
                    &what,
                )
                .await?;
            let Connection { page_info, nodes } = data
                .node
                .and_then(|node| node.reviews)
                .ok_or_else(|| shape(&what, "pull request or its reviews are missing"))?;

            emitted += emit_reviews(repo, pr_author, nodes, sink).await?;
            after = trail.advance(&page_info, &what)?;
        }

        Ok(emitted)
    }

    /// Run one query and decode its `data` into `T`.
    async fn fetch<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
        what: &str,
    ) -> Result<T, WalkError> {
        let response = self.execute_with_retry(query, variables, what).await?;
        decode(response, what)
    }

    async fn execute_with_retry(
        &self,
        query: &str,
        variables: Value,
        what: &str,
    ) -> Result<GraphQlResponse, WalkError> {
        let policy = self.options.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.requests.fetch_add(1, Ordering::Relaxed);

            let outcome = tokio::time::timeout(
                policy.attempt_timeout,
                self.executor.execute(query, variables.clone()),
            )
            .await
            .unwrap_or(Err(ExecutorError::Timeout(policy.attempt_timeout)));

            let err = match outcome {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            if let ExecutorError::Unauthorized { status } = err {
                return Err(WalkError::Auth { status });
            }
            if !err.is_transient() || attempt >= max_attempts {
                return Err(WalkError::Transport {
                    what: what.to_string(),
                    attempts: attempt,
                    source: err,
                });
            }

            let delay = err
                .retry_after()
                .map_or_else(|| policy.backoff(attempt), |d| d.min(MAX_RETRY_AFTER));
            warn!(
                what,
                attempt,
                error = %err,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Decode a response's `data` into `T`; any `errors` entry fails the query.
fn decode<T: DeserializeOwned>(response: GraphQlResponse, what: &str) -> Result<T, WalkError> {
    if !response.errors.is_empty() {
        return Err(WalkError::Query {
            what: what.to_string(),
            messages: response.errors.into_iter().map(|e| e.message).collect(),
        });
    }
    let data = response
        .data
        .ok_or_else(|| shape(what, "response has neither data nor errors"))?;
    serde_json::from_value(data).map_err(|e| shape(what, e.to_string()))
}

/// Emit submitted reviews, skipping pending ones and the author's own.
async fn emit_reviews(
    repo: &RepositoryRef,
    pr_author: Option<&str>,
    reviews: Vec<Option<ReviewNode>>,
    sink: &EventSink,
) -> Result<u64, WalkError> {
    let mut emitted = 0;
    for review in reviews.into_iter().flatten() {
        let Some(submitted_at) = review.submitted_at else {
            continue;
        };
        let login = review.author.map(|actor| actor.login);
        if login.is_some() && login.as_deref() == pr_author {
            continue;
        }
        emit(
            sink,
            ContributionEvent {
                author: Author::resolve([login.as_deref()]),
                repository: Arc::clone(&repo.name),
                kind: ContributionKind::Review,
                timestamp: submitted_at,
            },
        )
        .await?;
        emitted += 1;
    }
    Ok(emitted)
}
