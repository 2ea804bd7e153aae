//! Drop-gesture planning for the board.
//!
//! [`plan_move`] is pure: it reads a snapshot of the board's tasks and
//! returns what the server should be told, or [`MoveDecision::NoOp`] when
//! the gesture would not change the task's `{status, order}`.

use std::str::FromStr;

use taskdeck_proto::task::{MoveTask, Task, TaskId, TaskStatus};

/// Where a dragged task was released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropTarget {
    /// Empty area of a column: append to the end.
    Column(TaskStatus),
    /// On top of another task: take its position.
    Task(TaskId),
}

impl DropTarget {
    /// Interprets user input as a column name when it parses as one,
    /// otherwise as a task id.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        TaskStatus::from_str(raw).map_or_else(|_| Self::Task(TaskId::new(raw.trim())), Self::Column)
    }
}

/// A move the server has to be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMove {
    /// Task being moved.
    pub task_id: TaskId,
    /// Destination column.
    pub status: TaskStatus,
    /// Destination order.
    pub order: i64,
}

impl PlannedMove {
    /// Request body for `PATCH tasks/{id}/move`.
    #[must_use]
    pub const fn payload(&self) -> MoveTask {
        MoveTask {
            status: self.status,
            order: self.order,
        }
    }
}

/// Outcome of [`plan_move`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveDecision {
    /// Nothing changes; no request is sent.
    NoOp,
    /// The task moves.
    Move(PlannedMove),
}

/// Plans the move of `source` to `target` given the board's current tasks.
///
/// - dropping on a column appends: order `0` when the column has no other
///   tasks, otherwise one past the largest order among the other tasks;
/// - dropping on a sibling takes the sibling's status and order;
/// - an unknown source or target, or dropping a task on itself, is a no-op;
/// - the result is a no-op whenever `{status, order}` would not change.
#[must_use]
pub fn plan_move(tasks: &[Task], source: &TaskId, target: &DropTarget) -> MoveDecision {
    let Some(moving) = tasks.iter().find(|t| &t.id == source) else {
        tracing::debug!(task_id = %source, "drag source not on board");
        return MoveDecision::NoOp;
    };

    let (status, order) = match target {
        DropTarget::Task(target_id) if target_id == source => return MoveDecision::NoOp,
        DropTarget::Task(target_id) => {
            let Some(sibling) = tasks.iter().find(|t| &t.id == target_id) else {
                tracing::debug!(target = %target_id, "drop target not on board");
                return MoveDecision::NoOp;
            };
            (sibling.status, sibling.order)
        }
        DropTarget::Column(status) => {
            let order = tasks
                .iter()
                .filter(|t| t.status == *status && t.id != moving.id)
                .map(|t| t.order)
                .max()
                .map_or(0, |max| max.saturating_add(1));
            (*status, order)
        }
    };

    if status == moving.status && order == moving.order {
        return MoveDecision::NoOp;
    }

    MoveDecision::Move(PlannedMove {
        task_id: moving.id.clone(),
        status,
        order,
    })
}
