//! GraphQL documents and the typed shapes of their responses.
//!
//! Every nullable field GitHub may return is an explicit `Option`. Anything
//! that fails to deserialize into these types is treated as contract drift
//! by the walker.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Organization → repositories.
pub const REPOSITORIES: &str = r"
query OrgRepositories($org: String!, $first: Int!, $after: String) {
  organization(login: $org) {
    repositories(first: $first, after: $after) {
      pageInfo { hasNextPage endCursor }
      nodes {
        name
        isArchived
        defaultBranchRef { name }
      }
    }
  }
}";

/// Repository → default branch → commit history.
pub const COMMIT_HISTORY: &str = r"
query CommitHistory($owner: String!, $name: String!, $branch: String!, $first: Int!, $after: String) {
  repository(owner: $owner, name: $name) {
    ref(qualifiedName: $branch) {
      target {
        ... on Commit {
          history(first: $first, after: $after) {
            pageInfo { hasNextPage endCursor }
            nodes {
              authoredDate
              author { name user { login } }
            }
          }
        }
      }
    }
  }
}";

/// Repository → pull requests, each with its first page of reviews.
pub const PULL_REQUESTS: &str = r"
query PullRequestReviews($owner: String!, $name: String!, $first: Int!, $after: String) {
  repository(owner: $owner, name: $name) {
    pullRequests(first: $first, after: $after) {
      pageInfo { hasNextPage endCursor }
      nodes {
        id
        author { login }
        reviews(first: $first) {
          pageInfo { hasNextPage endCursor }
          nodes {
            author { login }
            submittedAt
          }
        }
      }
    }
  }
}";

/// One pull request's reviews past the first page.
pub const REVIEW_PAGE: &str = r"
query MoreReviews($id: ID!, $first: Int!, $after: String) {
  node(id: $id) {
    ... on PullRequest {
      reviews(first: $first, after: $after) {
        pageInfo { hasNextPage endCursor }
        nodes {
          author { login }
          submittedAt
        }
      }
    }
  }
}";

/// Pagination state of a connection page.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// More items exist after this page.
    pub has_next_page: bool,
    /// Cursor of the last item on this page.
    pub end_cursor: Option<String>,
}

/// One page of a connection. The walker skips null entries in `nodes`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection<T> {
    /// Pagination state.
    pub page_info: PageInfo,
    /// Items on this page; the field itself is required.
    pub nodes: Vec<Option<T>>,
}

/// `{ login }` of an actor.
#[derive(Debug, Clone, Deserialize)]
pub struct Actor {
    /// Account login.
    pub login: String,
}

/// `data` of [`REPOSITORIES`].
#[derive(Debug, Deserialize)]
pub struct RepositoriesData {
    /// `None` when the organization does not exist or is not visible.
    pub organization: Option<OrganizationNode>,
}

/// An organization.
#[derive(Debug, Deserialize)]
pub struct OrganizationNode {
    /// The organization's repositories.
    pub repositories: Connection<RepositoryNode>,
}

/// A repository listing entry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryNode {
    /// Repository name.
    pub name: String,
    /// Archived flag.
    pub is_archived: bool,
    /// `None` for empty repositories.
    pub default_branch_ref: Option<BranchRef>,
}

/// A branch reference.
#[derive(Debug, Deserialize)]
pub struct BranchRef {
    /// Short branch name, e.g. `main`.
    pub name: String,
}

/// `data` of [`COMMIT_HISTORY`].
#[derive(Debug, Deserialize)]
pub struct CommitHistoryData {
    /// `None` if the repository disappeared mid-run.
    pub repository: Option<CommitRepository>,
}

/// Repository wrapper in [`CommitHistoryData`].
#[derive(Debug, Deserialize)]
pub struct CommitRepository {
    /// `None` if the branch disappeared mid-run.
    #[serde(rename = "ref")]
    pub git_ref: Option<CommitRef>,
}

/// Branch wrapper in [`CommitHistoryData`].
#[derive(Debug, Deserialize)]
pub struct CommitRef {
    /// Tip of the branch.
    pub target: Option<CommitTarget>,
}

/// Tip commit; `history` is absent if the ref does not point at a commit.
#[derive(Debug, Deserialize)]
pub struct CommitTarget {
    /// Ancestry of the tip commit.
    pub history: Option<Connection<CommitNode>>,
}

/// A commit in the history.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitNode {
    /// Author timestamp.
    pub authored_date: DateTime<Utc>,
    /// Git author metadata.
    pub author: Option<GitActor>,
}

/// Git author metadata with the linked account, if GitHub matched one.
#[derive(Debug, Deserialize)]
pub struct GitActor {
    /// Name recorded in the commit.
    pub name: Option<String>,
    /// Account matched by email.
    pub user: Option<Actor>,
}

/// `data` of [`PULL_REQUESTS`].
#[derive(Debug, Deserialize)]
pub struct PullRequestsData {
    /// `None` if the repository disappeared mid-run.
    pub repository: Option<PullRequestRepository>,
}

/// Repository wrapper in [`PullRequestsData`].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestRepository {
    /// Pull request page.
    pub pull_requests: Connection<PullRequestNode>,
}

/// A pull request with its first page of reviews.
#[derive(Debug, Deserialize)]
pub struct PullRequestNode {
    /// Global node ID, used to page through further reviews.
    pub id: String,
    /// `None` for deleted accounts.
    pub author: Option<Actor>,
    /// First page of reviews.
    pub reviews: Option<Connection<ReviewNode>>,
}

/// A pull request review.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewNode {
    /// `None` for deleted accounts.
    pub author: Option<Actor>,
    /// `None` while the review is pending.
    pub submitted_at: Option<DateTime<Utc>>,
}

/// `data` of [`REVIEW_PAGE`].
#[derive(Debug, Deserialize)]
pub struct ReviewPageData {
    /// `None` if the pull request disappeared mid-run.
    pub node: Option<ReviewPageNode>,
}

/// Pull request wrapper in [`ReviewPageData`].
#[derive(Debug, Deserialize)]
pub struct ReviewPageNode {
    /// Requested page of reviews.
    pub reviews: Option<Connection<ReviewNode>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commit_history_decodes_with_missing_user() {
        let data: CommitHistoryData = serde_json::from_value(json!({
            "repository": {"ref": {"target": {"history": {
                "pageInfo": {"hasNextPage": false, "endCursor": null},
                "nodes": [
                    {"authoredDate": "2024-03-01T10:00:00Z",
                     "author": {"name": "Jane", "user": null}},
                    null
                ]
            }}}}
        }))
        .unwrap();

        let history = data.repository.unwrap().git_ref.unwrap().target.unwrap().history.unwrap();
        assert!(!history.page_info.has_next_page);
        let commits: Vec<CommitNode> = history.nodes.into_iter().flatten().collect();
        assert_eq!(commits.len(), 1);
        assert!(commits[0].author.as_ref().unwrap().user.is_none());
    }

    #[test]
    fn repositories_decode_null_organization() {
        let data: RepositoriesData = serde_json::from_value(json!({"organization": null})).unwrap();
        assert!(data.organization.is_none());
    }

    #[test]
    fn pending_review_has_no_submission_time() {
        let review: ReviewNode =
            serde_json::from_value(json!({"author": {"login": "bob"}, "submittedAt": null})).unwrap();
        assert!(review.submitted_at.is_none());
    }

    #[test]
    fn missing_page_info_is_rejected() {
        let result: Result<Connection<ReviewNode>, _> = serde_json::from_value(json!({"nodes": []}));
        assert!(result.is_err());
    }

    #[test]
    fn missing_nodes_are_rejected() {
        let result: Result<Connection<ReviewNode>, _> = serde_json::from_value(json!({
            "pageInfo": {"hasNextPage": false, "endCursor": null}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn missing_archived_flag_is_rejected() {
        let result: Result<RepositoryNode, _> = serde_json::from_value(json!({
            "name": "api",
            "defaultBranchRef": {"name": "main"}
        }));
        assert!(result.is_err());
    }
}
