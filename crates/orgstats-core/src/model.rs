//! Domain types shared by the walker, aggregator, and report.

use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Reserved key under which contributions with no attributable author are
/// counted.
pub const UNKNOWN_AUTHOR: &str = "unknown";

/// The user a contribution is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Author {
    /// A GitHub login, or the git author name when no account matched.
    Known(String),
    /// No login and no usable name (deleted account, empty metadata).
    Unknown,
}

impl Author {
    /// Resolve an author from the first non-blank candidate.
    ///
    /// Commits pass `[login, git_name]`; reviews pass `[login]`.
    pub fn resolve<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> Self {
        candidates
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map_or(Self::Unknown, |s| Self::Known(s.to_string()))
    }

    /// The key this author is aggregated under.
    pub fn key(&self) -> &str {
        match self {
            Self::Known(name) => name,
            Self::Unknown => UNKNOWN_AUTHOR,
        }
    }
}

/// What kind of contribution an event represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContributionKind {
    /// A commit on the repository's default branch.
    Commit,
    /// A submitted pull request review.
    Review,
}

/// A single attributable action against a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContributionEvent {
    /// Who made the contribution.
    pub author: Author,
    /// Name of the repository the event belongs to.
    pub repository: Arc<str>,
    /// Commit or review.
    pub kind: ContributionKind,
    /// When the commit was authored or the review submitted.
    pub timestamp: DateTime<Utc>,
}

/// A live, non-empty repository whose history gets walked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRef {
    /// Repository name within the organization.
    pub name: Arc<str>,
    /// Branch whose history is counted.
    pub default_branch: String,
}
