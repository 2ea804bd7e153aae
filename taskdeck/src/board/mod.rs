//! Kanban board view and drag-and-drop ordering.
//!
//! A [`Board`] partitions one project's tasks into the four status columns
//! and sorts each column with [`board_order`]. [`ordering::plan_move`] turns
//! a drop gesture into the `{status, order}` the server should store, and
//! [`filter`] backs the flat task table.

pub mod filter;
pub mod ordering;

pub use filter::{Overview, StatusCounts, TaskFilter};
pub use ordering::{DropTarget, MoveDecision, PlannedMove, plan_move};

use std::cmp::Ordering;
use std::collections::BTreeMap;

use taskdeck_proto::task::{Task, TaskId, TaskPosition, TaskStatus};

/// Sort key for tasks inside one column.
///
/// `order` ascending, then most recently updated first, then id. A task
/// dropped onto a sibling takes the sibling's `order` and a newer
/// `updated_at`, so it sorts directly before that sibling.
#[must_use]
pub fn board_order(a: &Task, b: &Task) -> Ordering {
    a.order
        .cmp(&b.order)
        .then_with(|| b.updated_at.cmp(&a.updated_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Tasks partitioned by status, each column sorted by [`board_order`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Board {
    columns: BTreeMap<TaskStatus, Vec<Task>>,
}

impl Board {
    /// Builds a board from an unsorted task list. Every status gets a
    /// column, even when empty.
    #[must_use]
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let mut columns: BTreeMap<TaskStatus, Vec<Task>> =
            TaskStatus::ALL.into_iter().map(|s| (s, Vec::new())).collect();
        for task in tasks {
            columns.entry(task.status).or_default().push(task.clone());
        }
        for column in columns.values_mut() {
            column.sort_by(board_order);
        }
        Self { columns }
    }

    /// Tasks in `status`, in display order.
    #[must_use]
    pub fn column(&self, status: TaskStatus) -> &[Task] {
        self.columns.get(&status).map_or(&[], Vec::as_slice)
    }

    /// All columns in board order.
    pub fn columns(&self) -> impl Iterator<Item = (TaskStatus, &[Task])> {
        self.columns.iter().map(|(s, tasks)| (*s, tasks.as_slice()))
    }

    /// Looks a task up by id.
    #[must_use]
    pub fn find(&self, id: &TaskId) -> Option<&Task> {
        self.columns.values().flatten().find(|t| &t.id == id)
    }

    /// Total number of tasks on the board.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.values().map(Vec::len).sum()
    }

    /// Whether the board has no tasks at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.values().all(Vec::is_empty)
    }

    /// Positions that renumber every column to `0..n` in current display
    /// order, skipping tasks whose order is already correct.
    ///
    /// Used to compact columns after repeated sibling drops left duplicate
    /// order values behind.
    #[must_use]
    pub fn compacted_positions(&self) -> Vec<TaskPosition> {
        let mut positions = Vec::new();
        for (status, tasks) in self.columns() {
            for (index, task) in tasks.iter().enumerate() {
                let order = i64::try_from(index).unwrap_or(i64::MAX);
                if task.order != order {
                    positions.push(TaskPosition {
                        id: task.id.clone(),
                        status,
                        order,
                    });
                }
            }
        }
        positions
    }
}
