//! Property tests for board drag-and-drop planning.
//!
//! 1. A drop is a no-op exactly when `{status, order}` would not change.
//! 2. Dropping on a column appends after every other task in it (or takes
//!    order 0 in an otherwise empty column).
//! 3. Dropping on a sibling takes the sibling's status and order, and the
//!    moved task then sorts directly ahead of the sibling.
//! 4. Compaction renumbers every column to `0..n` without reordering it.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use taskdeck::board::{Board, DropTarget, MoveDecision, plan_move};
use taskdeck_proto::project::ProjectId;
use taskdeck_proto::task::{Task, TaskId, TaskStatus};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn task(id: usize, status: TaskStatus, order: i64, updated: i64) -> Task {
    Task {
        id: TaskId::new(format!("t{id:02}")),
        title: format!("task {id}"),
        description: None,
        status,
        priority: Default::default(),
        order,
        due_date: None,
        assigned_to_id: None,
        created_by_id: None,
        project_id: ProjectId::new("p1"),
        tags: Vec::new(),
        is_completed: false,
        created_at: at(0),
        updated_at: at(updated),
    }
}

fn arb_status() -> impl Strategy<Value = TaskStatus> {
    prop::sample::select(TaskStatus::ALL.to_vec())
}

fn arb_board() -> impl Strategy<Value = Vec<Task>> {
    prop::collection::vec((arb_status(), 0i64..12, 0i64..50), 1..16).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (status, order, updated))| task(i, status, order, updated))
            .collect()
    })
}

/// A board, an index of the dragged task, and a target.
fn arb_drop() -> impl Strategy<Value = (Vec<Task>, usize, DropTarget)> {
    arb_board().prop_flat_map(|tasks| {
        let n = tasks.len();
        let target = prop_oneof![
            arb_status().prop_map(DropTarget::Column),
            (0..n).prop_map(|i| DropTarget::Task(TaskId::new(format!("t{i:02}")))),
        ];
        (Just(tasks), 0..n, target)
    })
}

fn apply(tasks: &[Task], id: &TaskId, status: TaskStatus, order: i64) -> Vec<Task> {
    tasks
        .iter()
        .cloned()
        .map(|mut t| {
            if &t.id == id {
                t.status = status;
                t.order = order;
                t.updated_at = at(1_000);
            }
            t
        })
        .collect()
}

proptest! {
    #[test]
    fn no_op_iff_position_unchanged((tasks, source, target) in arb_drop()) {
        let moving = &tasks[source];
        let decision = plan_move(&tasks, &moving.id, &target);

        let expected = match &target {
            DropTarget::Task(id) if id == &moving.id => None,
            DropTarget::Task(id) => {
                let sibling = tasks.iter().find(|t| &t.id == id).unwrap();
                Some((sibling.status, sibling.order))
            }
            DropTarget::Column(status) => {
                let order = tasks
                    .iter()
                    .filter(|t| t.status == *status && t.id != moving.id)
                    .map(|t| t.order)
                    .max()
                    .map_or(0, |m| m + 1);
                Some((*status, order))
            }
        };

        match (decision, expected) {
            (MoveDecision::NoOp, None) => {}
            (MoveDecision::NoOp, Some(pos)) => {
                prop_assert_eq!(pos, (moving.status, moving.order));
            }
            (MoveDecision::Move(planned), Some(pos)) => {
                prop_assert_ne!(pos, (moving.status, moving.order));
                prop_assert_eq!((planned.status, planned.order), pos);
                prop_assert_eq!(&planned.task_id, &moving.id);
            }
            (MoveDecision::Move(planned), None) => {
                prop_assert!(false, "dropping on itself planned {:?}", planned);
            }
        }
    }

    #[test]
    fn column_drop_appends((tasks, source) in arb_board().prop_flat_map(|t| {
        let n = t.len();
        (Just(t), 0..n)
    }), status in arb_status()) {
        let moving = &tasks[source];
        let others: Vec<i64> = tasks
            .iter()
            .filter(|t| t.status == status && t.id != moving.id)
            .map(|t| t.order)
            .collect();

        if let MoveDecision::Move(planned) =
            plan_move(&tasks, &moving.id, &DropTarget::Column(status))
        {
            prop_assert_eq!(planned.status, status);
            if others.is_empty() {
                prop_assert_eq!(planned.order, 0);
            } else {
                prop_assert!(others.iter().all(|o| *o < planned.order));
            }
        }
    }

    #[test]
    fn sibling_drop_sorts_ahead_of_sibling((tasks, source, target) in arb_drop()) {
        let DropTarget::Task(sibling_id) = &target else {
            return Ok(());
        };
        let MoveDecision::Move(planned) = plan_move(&tasks, &tasks[source].id, &target) else {
            return Ok(());
        };

        let after = apply(&tasks, &planned.task_id, planned.status, planned.order);
        let board = Board::from_tasks(&after);
        let column = board.column(planned.status);
        let moved_at = column.iter().position(|t| t.id == planned.task_id).unwrap();
        let sibling_at = column.iter().position(|t| &t.id == sibling_id).unwrap();
        prop_assert!(moved_at < sibling_at);
    }

    #[test]
    fn compaction_renumbers_without_reordering(tasks in arb_board()) {
        let board = Board::from_tasks(&tasks);
        let before: Vec<Vec<TaskId>> = board
            .columns()
            .map(|(_, col)| col.iter().map(|t| t.id.clone()).collect())
            .collect();

        let mut compacted = tasks.clone();
        for position in board.compacted_positions() {
            let t = compacted.iter_mut().find(|t| t.id == position.id).unwrap();
            prop_assert_eq!(t.status, position.status);
            t.order = position.order;
        }

        let renumbered = Board::from_tasks(&compacted);
        let after: Vec<Vec<TaskId>> = renumbered
            .columns()
            .map(|(_, col)| col.iter().map(|t| t.id.clone()).collect())
            .collect();
        prop_assert_eq!(before, after);
        for (_, column) in renumbered.columns() {
            let orders: Vec<i64> = column.iter().map(|t| t.order).collect();
            let expected: Vec<i64> = (0..).take(column.len()).collect();
            prop_assert_eq!(orders, expected);
        }
    }
}

#[test]
fn move_to_empty_column_gets_order_zero() {
    let tasks = [
        task(1, TaskStatus::Todo, 0, 0),
        task(2, TaskStatus::Todo, 1, 0),
    ];
    let MoveDecision::Move(planned) = plan_move(
        &tasks,
        &TaskId::new("t02"),
        &DropTarget::Column(TaskStatus::InProgress),
    ) else {
        panic!("expected a move");
    };
    assert_eq!(planned.payload().status, TaskStatus::InProgress);
    assert_eq!(planned.payload().order, 0);
}
