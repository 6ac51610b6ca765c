//! In-memory [`QueryExecutor`]s for tests.
//!
//! [`FakeGithub`] serves a whole organization from memory and paginates it
//! the way the GraphQL API does, so walker behavior can be checked without
//! a network. [`ScriptedExecutor`] hands every call to a closure for cases
//! that need malformed or hand-built responses.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value, json};

use crate::executor::{ExecutorError, GraphQlError, GraphQlResponse, QueryExecutor};
use crate::query::{COMMIT_HISTORY, PULL_REQUESTS, REPOSITORIES, REVIEW_PAGE};

/// A query as received by a test executor.
#[derive(Debug, Clone)]
pub struct RecordedQuery {
    /// The GraphQL document.
    pub query: String,
    /// The variables sent with it.
    pub variables: Value,
}

impl RecordedQuery {
    /// Whether this call ran `document`.
    pub fn is(&self, document: &str) -> bool {
        self.query == document
    }

    /// The `after` cursor of this call, if any.
    pub fn after(&self) -> Option<&str> {
        self.variables.get("after")?.as_str()
    }
}

#[derive(Debug, Default)]
struct CallLog(Mutex<Vec<RecordedQuery>>);

impl CallLog {
    fn record(&self, query: &str, variables: &Value) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedQuery {
                query: query.to_string(),
                variables: variables.clone(),
            });
    }

    fn snapshot(&self) -> Vec<RecordedQuery> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

type Handler = dyn Fn(&str, &Value) -> Result<GraphQlResponse, ExecutorError> + Send + Sync;

type FailureRule = dyn Fn(&str, &Value) -> Option<ExecutorError> + Send + Sync;

/// Executor that answers every call with a closure.
pub struct ScriptedExecutor {
    handler: Box<Handler>,
    calls: CallLog,
}

impl ScriptedExecutor {
    /// Answer calls with `handler(query, variables)`.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &Value) -> Result<GraphQlResponse, ExecutorError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: CallLog::default(),
        }
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<RecordedQuery> {
        self.calls.snapshot()
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute(&self, query: &str, variables: Value) -> Result<GraphQlResponse, ExecutorError> {
        self.calls.record(query, &variables);
        (self.handler)(query, &variables)
    }
}

/// A commit in a [`FakeRepository`].
#[derive(Debug, Clone)]
pub struct FakeCommit {
    /// Linked account login.
    pub login: Option<String>,
    /// Git author name.
    pub name: Option<String>,
    /// Author timestamp.
    pub authored_at: DateTime<Utc>,
}

/// A review in a [`FakePullRequest`].
#[derive(Debug, Clone)]
pub struct FakeReview {
    /// Reviewer login; `None` for a deleted account.
    pub author: Option<String>,
    /// `None` for a pending review.
    pub submitted_at: Option<DateTime<Utc>>,
}

/// A pull request in a [`FakeRepository`].
#[derive(Debug, Clone, Default)]
pub struct FakePullRequest {
    /// Pull request author login.
    pub author: Option<String>,
    /// Reviews in submission order.
    pub reviews: Vec<FakeReview>,
}

impl FakePullRequest {
    /// A pull request opened by `author`.
    pub fn by(author: &str) -> Self {
        Self {
            author: Some(author.to_string()),
            reviews: Vec::new(),
        }
    }

    /// Add a submitted review.
    pub fn review(mut self, author: &str, at: DateTime<Utc>) -> Self {
        self.reviews.push(FakeReview {
            author: Some(author.to_string()),
            submitted_at: Some(at),
        });
        self
    }

    /// Add an arbitrary review.
    pub fn raw_review(mut self, review: FakeReview) -> Self {
        self.reviews.push(review);
        self
    }
}

/// A repository in a [`FakeOrganization`].
#[derive(Debug, Clone)]
pub struct FakeRepository {
    /// Repository name.
    pub name: String,
    /// `None` models an empty repository.
    pub default_branch: Option<String>,
    /// Archived flag.
    pub archived: bool,
    /// Default-branch history, newest first.
    pub commits: Vec<FakeCommit>,
    /// Pull requests.
    pub pull_requests: Vec<FakePullRequest>,
}

impl FakeRepository {
    /// A repository with a `main` branch and no history.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            default_branch: Some("main".to_string()),
            archived: false,
            commits: Vec::new(),
            pull_requests: Vec::new(),
        }
    }

    /// Add a commit by a linked account.
    pub fn commit(mut self, login: &str, at: DateTime<Utc>) -> Self {
        self.commits.push(FakeCommit {
            login: Some(login.to_string()),
            name: Some(login.to_string()),
            authored_at: at,
        });
        self
    }

    /// Add an arbitrary commit.
    pub fn raw_commit(mut self, commit: FakeCommit) -> Self {
        self.commits.push(commit);
        self
    }

    /// Add a pull request.
    pub fn pull_request(mut self, pr: FakePullRequest) -> Self {
        self.pull_requests.push(pr);
        self
    }

    /// Mark the repository archived.
    pub fn archived(mut self) -> Self {
        self.archived = true;
        self
    }

    /// Remove the default branch, as for a freshly created repository.
    pub fn empty(mut self) -> Self {
        self.default_branch = None;
        self
    }
}

/// An organization served by [`FakeGithub`].
#[derive(Debug, Clone, Default)]
pub struct FakeOrganization {
    /// Organization login.
    pub login: String,
    /// Repositories in listing order.
    pub repositories: Vec<FakeRepository>,
}

impl FakeOrganization {
    /// An organization with no repositories.
    pub fn new(login: &str) -> Self {
        Self {
            login: login.to_string(),
            repositories: Vec::new(),
        }
    }

    /// Add a repository.
    pub fn repository(mut self, repo: FakeRepository) -> Self {
        self.repositories.push(repo);
        self
    }
}

/// Executor serving a [`FakeOrganization`] with real pagination semantics.
///
/// Cursors have the form `<connection>:<offset>`, so a cursor from one
/// connection is meaningless on another. Unknown organizations get the
/// `NOT_FOUND` error GitHub sends.
pub struct FakeGithub {
    org: FakeOrganization,
    calls: CallLog,
    failures: Mutex<VecDeque<ExecutorError>>,
    fail_rule: Option<Box<FailureRule>>,
    graphql_error: Option<String>,
}

impl fmt::Debug for FakeGithub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeGithub")
            .field("org", &self.org)
            .field("graphql_error", &self.graphql_error)
            .finish_non_exhaustive()
    }
}

impl FakeGithub {
    /// Serve `org`.
    pub fn new(org: FakeOrganization) -> Self {
        Self {
            org,
            calls: CallLog::default(),
            failures: Mutex::new(VecDeque::new()),
            fail_rule: None,
            graphql_error: None,
        }
    }

    /// Fail every call for which `rule(query, variables)` returns an error.
    ///
    /// Unlike [`fail_next`](Self::fail_next), the rule applies to retries
    /// too, so a matching call never succeeds.
    pub fn fail_on<F>(mut self, rule: F) -> Self
    where
        F: Fn(&str, &Value) -> Option<ExecutorError> + Send + Sync + 'static,
    {
        self.fail_rule = Some(Box::new(rule));
        self
    }

    /// Fail the next calls with `errors`, one per call, before serving data.
    pub fn fail_next(self, errors: impl IntoIterator<Item = ExecutorError>) -> Self {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(errors);
        self
    }

    /// Answer every call with a GraphQL `errors` entry alongside null data.
    pub fn with_graphql_error(mut self, message: &str) -> Self {
        self.graphql_error = Some(message.to_string());
        self
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<RecordedQuery> {
        self.calls.snapshot()
    }

    fn repository(&self, variables: &Value) -> Option<&FakeRepository> {
        if variables["owner"].as_str() != Some(self.org.login.as_str()) {
            return None;
        }
        let name = variables["name"].as_str()?;
        self.org.repositories.iter().find(|r| r.name == name)
    }

    fn repositories(&self, variables: &Value) -> Value {
        let page = paginate(&self.org.repositories, variables, "repositories", |repo| {
            json!({
                "name": repo.name,
                "isArchived": repo.archived,
                "defaultBranchRef": repo.default_branch.as_ref().map(|name| json!({ "name": name })),
            })
        });
        json!({ "organization": { "repositories": page } })
    }

    fn commit_history(&self, variables: &Value) -> Value {
        let Some(repo) = self.repository(variables) else {
            return json!({ "repository": null });
        };
        let expected = repo
            .default_branch
            .as_ref()
            .map(|branch| format!("refs/heads/{branch}"));
        if variables["branch"].as_str() != expected.as_deref() {
            return json!({ "repository": { "ref": null } });
        }
        let scope = format!("{}/commits", repo.name);
        let page = paginate(&repo.commits, variables, &scope, |commit| {
            json!({
                "authoredDate": timestamp(commit.authored_at),
                "author": {
                    "name": commit.name,
                    "user": commit.login.as_ref().map(|login| json!({ "login": login })),
                },
            })
        });
        json!({ "repository": { "ref": { "target": { "history": page } } } })
    }

    fn pull_requests(&self, variables: &Value) -> Value {
        let Some(repo) = self.repository(variables) else {
            return json!({ "repository": null });
        };
        let first = variables["first"].clone();
        let indexed: Vec<(usize, &FakePullRequest)> = repo.pull_requests.iter().enumerate().collect();
        let scope = format!("{}/pulls", repo.name);
        let page = paginate(&indexed, variables, &scope, |(index, pr)| {
            let id = pull_request_id(&repo.name, *index);
            let reviews = paginate(
                &pr.reviews,
                &json!({ "first": first }),
                &format!("{id}/reviews"),
                review_json,
            );
            json!({
                "id": id,
                "author": pr.author.as_ref().map(|login| json!({ "login": login })),
                "reviews": reviews,
            })
        });
        json!({ "repository": { "pullRequests": page } })
    }

    fn review_page(&self, variables: &Value) -> Value {
        let wanted = variables["id"].as_str().unwrap_or_default();
        let found = self.org.repositories.iter().find_map(|repo| {
            repo.pull_requests
                .iter()
                .enumerate()
                .find(|(index, _)| pull_request_id(&repo.name, *index) == wanted)
        });
        match found {
            Some((_, pr)) => {
                let page = paginate(&pr.reviews, variables, &format!("{wanted}/reviews"), review_json);
                json!({ "node": { "reviews": page } })
            }
            None => json!({ "node": null }),
        }
    }
}

#[async_trait]
impl QueryExecutor for FakeGithub {
    async fn execute(&self, query: &str, variables: Value) -> Result<GraphQlResponse, ExecutorError> {
        self.calls.record(query, &variables);

        let failure = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(err) = failure {
            return Err(err);
        }
        if let Some(err) = self.fail_rule.as_ref().and_then(|rule| rule(query, &variables)) {
            return Err(err);
        }

        if let Some(ref message) = self.graphql_error {
            return Ok(GraphQlResponse {
                data: Some(Value::Null),
                errors: vec![GraphQlError::new(message.as_str())],
            });
        }

        if query == REPOSITORIES && variables["org"].as_str() != Some(self.org.login.as_str()) {
            let login = variables["org"].as_str().unwrap_or_default();
            return Ok(GraphQlResponse {
                data: Some(json!({ "organization": null })),
                errors: vec![GraphQlError {
                    message: format!("Could not resolve to an Organization with the login of '{login}'."),
                    kind: Some("NOT_FOUND".to_string()),
                }],
            });
        }

        let data = if query == REPOSITORIES {
            self.repositories(&variables)
        } else if query == COMMIT_HISTORY {
            self.commit_history(&variables)
        } else if query == PULL_REQUESTS {
            self.pull_requests(&variables)
        } else if query == REVIEW_PAGE {
            self.review_page(&variables)
        } else {
            return Ok(GraphQlResponse {
                data: None,
                errors: vec![GraphQlError::new("unknown query document")],
            });
        };
        Ok(GraphQlResponse::data(data))
    }
}

fn pull_request_id(repo: &str, index: usize) -> String {
    format!("PR_{repo}_{index}")
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn review_json(review: &FakeReview) -> Value {
    json!({
        "author": review.author.as_ref().map(|login| json!({ "login": login })),
        "submittedAt": review.submitted_at.map(timestamp),
    })
}

/// Slice `items` according to the `first`/`after` variables.
fn paginate<T>(items: &[T], variables: &Value, scope: &str, render: impl Fn(&T) -> Value) -> Value {
    let first = variables["first"]
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(100);
    let start = variables["after"]
        .as_str()
        .and_then(|cursor| cursor.strip_prefix(scope)?.strip_prefix(':')?.parse::<usize>().ok())
        .unwrap_or(0)
        .min(items.len());
    let end = start.saturating_add(first).min(items.len());
    let nodes: Vec<Value> = items[start..end].iter().map(render).collect();
    json!({
        "pageInfo": {
            "hasNextPage": end < items.len(),
            "endCursor": (end > start).then(|| format!("{scope}:{end}")),
        },
        "nodes": nodes,
    })
}
