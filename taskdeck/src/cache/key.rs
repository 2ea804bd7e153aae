//! Hierarchical cache keys.

use std::fmt;

use taskdeck_proto::project::ProjectId;
use taskdeck_proto::task::TaskId;

/// Path-like identifier of a cached resource, e.g. `tasks/project/p1`.
///
/// A key is a prefix of another when its segments are a leading subsequence
/// of the other's, which lets a mutation invalidate a whole family at once.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(Vec<String>);

impl CacheKey {
    /// Builds a key from raw segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parses `a/b/c`. Empty segments are dropped.
    #[must_use]
    pub fn parse(path: &str) -> Self {
        Self::from_segments(path.split('/').filter(|s| !s.is_empty()))
    }

    /// The empty key; every key lies beneath it.
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Every task, unscoped.
    #[must_use]
    pub fn tasks() -> Self {
        Self::from_segments(["tasks"])
    }

    /// The task list of one project.
    #[must_use]
    pub fn project_tasks(project: &ProjectId) -> Self {
        Self::from_segments(["tasks", "project", project.as_str()])
    }

    /// A single task. Lives under its own `id` segment so that no task id
    /// can collide with the `project` family.
    #[must_use]
    pub fn task(id: &TaskId) -> Self {
        Self::from_segments(["tasks", "id", id.as_str()])
    }

    /// Every project.
    #[must_use]
    pub fn projects() -> Self {
        Self::from_segments(["projects"])
    }

    /// A single project.
    #[must_use]
    pub fn project(id: &ProjectId) -> Self {
        Self::from_segments(["projects", id.as_str()])
    }

    /// The user directory.
    #[must_use]
    pub fn users() -> Self {
        Self::from_segments(["users"])
    }

    /// The signed-in user's profile.
    #[must_use]
    pub fn profile() -> Self {
        Self::from_segments(["profile"])
    }

    /// Key segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Whether `self` equals `prefix` or lies beneath it.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}
