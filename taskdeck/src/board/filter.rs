//! Task table filtering, per-column counts and the dashboard summary.

use taskdeck_proto::project::{Project, ProjectId};
use taskdeck_proto::task::{Task, TaskPriority, TaskStatus};

/// Filter for the flat task table. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    /// Case-insensitive substring of the title.
    pub search: Option<String>,
    /// Exact status.
    pub status: Option<TaskStatus>,
    /// Exact priority.
    pub priority: Option<TaskPriority>,
    /// Exact project.
    pub project: Option<ProjectId>,
}

impl TaskFilter {
    /// Whether `task` passes every set criterion.
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        let search_ok = self.search.as_deref().map(str::trim).is_none_or(|needle| {
            needle.is_empty() || task.title.to_lowercase().contains(&needle.to_lowercase())
        });
        search_ok
            && self.status.is_none_or(|s| task.status == s)
            && self.priority.is_none_or(|p| task.priority == p)
            && self.project.as_ref().is_none_or(|p| &task.project_id == p)
    }

    /// Tasks passing the filter, in input order.
    #[must_use]
    pub fn apply<'a>(&self, tasks: &'a [Task]) -> Vec<&'a Task> {
        tasks.iter().filter(|t| self.matches(t)).collect()
    }
}

/// Number of tasks per column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    /// `TODO`.
    pub todo: usize,
    /// `IN_PROGRESS`.
    pub in_progress: usize,
    /// `IN_REVIEW`.
    pub in_review: usize,
    /// `DONE`.
    pub done: usize,
}

impl StatusCounts {
    /// Counts `tasks` per status.
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut counts = Self::default();
        for task in tasks {
            *counts.slot(task.status) += 1;
        }
        counts
    }

    const fn slot(&mut self, status: TaskStatus) -> &mut usize {
        match status {
            TaskStatus::Todo => &mut self.todo,
            TaskStatus::InProgress => &mut self.in_progress,
            TaskStatus::InReview => &mut self.in_review,
            TaskStatus::Done => &mut self.done,
        }
    }

    /// Count for one status.
    #[must_use]
    pub const fn get(&self, status: TaskStatus) -> usize {
        match status {
            TaskStatus::Todo => self.todo,
            TaskStatus::InProgress => self.in_progress,
            TaskStatus::InReview => self.in_review,
            TaskStatus::Done => self.done,
        }
    }

    /// Sum over all statuses.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.todo + self.in_progress + self.in_review + self.done
    }
}

/// Number of projects and tasks listed under "recent" on the dashboard.
pub const RECENT_LIMIT: usize = 5;

/// Headline numbers and the most recent entries across every project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overview {
    /// Number of projects.
    pub project_count: usize,
    /// Tasks per status across all projects.
    pub counts: StatusCounts,
    /// First [`RECENT_LIMIT`] projects, in server order.
    pub recent_projects: Vec<Project>,
    /// First [`RECENT_LIMIT`] tasks, in server order.
    pub recent_tasks: Vec<Task>,
}

impl Overview {
    /// Summarizes the project list and the unscoped task list.
    #[must_use]
    pub fn build(projects: &[Project], tasks: &[Task]) -> Self {
        Self {
            project_count: projects.len(),
            counts: StatusCounts::from_tasks(tasks),
            recent_projects: projects.iter().take(RECENT_LIMIT).cloned().collect(),
            recent_tasks: tasks.iter().take(RECENT_LIMIT).cloned().collect(),
        }
    }
}
