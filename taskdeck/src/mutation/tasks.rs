//! Task mutations.

use chrono::Utc;

use taskdeck_proto::project::ProjectId;
use taskdeck_proto::task::{CreateTask, ReorderTasks, Task, TaskId, TaskStatus, UpdateTask};

use super::{MutationCoordinator, MutationError, Plan, optimistic_id};
use crate::api::Backend;
use crate::board::{DropTarget, MoveDecision, PlannedMove, plan_move};
use crate::cache::{CacheKey, CachedValue, QueryCache};

/// Runs `f` on every cached copy of task `id`. Returns whether any matched.
fn patch_task(value: &mut CachedValue, id: &TaskId, mut f: impl FnMut(&mut Task)) -> bool {
    match value {
        CachedValue::Tasks(tasks) => {
            let mut hit = false;
            for task in tasks.iter_mut().filter(|t| &t.id == id) {
                f(task);
                hit = true;
            }
            hit
        }
        CachedValue::Task(task) if &task.id == id => {
            f(task);
            true
        }
        _ => false,
    }
}

/// Replaces every cached copy of `id` with `server`.
fn reconcile_task(cache: &QueryCache, id: &TaskId, server: &Task) {
    cache.update_where(&CacheKey::tasks(), |_, value| {
        patch_task(value, id, |task| *task = server.clone())
    });
    cache.set(&CacheKey::task(&server.id), CachedValue::Task(server.clone()));
}

/// Adjusts the cached task count of `project` by `delta`.
fn bump_task_count(cache: &QueryCache, project: &ProjectId, delta: i64) {
    let adjust = |count: &mut u64| {
        *count = count.saturating_add_signed(delta);
    };
    cache.update_where(&CacheKey::projects(), |_, value| match value {
        CachedValue::Projects(projects) => {
            let mut hit = false;
            for p in projects.iter_mut().filter(|p| &p.id == project) {
                adjust(&mut p.counts.tasks);
                hit = true;
            }
            hit
        }
        CachedValue::Project(p) if &p.id == project => {
            adjust(&mut p.counts.tasks);
            true
        }
        _ => false,
    });
}

impl<B: Backend> MutationCoordinator<B> {
    /// Looks a task up in any cached collection.
    fn cached_task(&self, id: &TaskId) -> Option<Task> {
        if let Some(CachedValue::Task(task)) = self.cache.get(&CacheKey::task(id)) {
            return Some(task);
        }
        self.cache
            .keys_under(&CacheKey::tasks())
            .iter()
            .find_map(|key| match self.cache.get(key) {
                Some(CachedValue::Tasks(tasks)) => tasks.into_iter().find(|t| &t.id == id),
                _ => None,
            })
    }

    /// One past the largest cached order in `(project, status)`, or `0`.
    fn next_order(&self, project: &ProjectId, status: TaskStatus) -> i64 {
        self.cache
            .keys_under(&CacheKey::tasks())
            .iter()
            .filter_map(|key| match self.cache.get(key) {
                Some(CachedValue::Tasks(tasks)) => Some(tasks),
                _ => None,
            })
            .flatten()
            .filter(|t| &t.project_id == project && t.status == status)
            .map(|t| t.order)
            .max()
            .map_or(0, |max| max.saturating_add(1))
    }

    /// Creates a task. A placeholder appears at the end of its column in
    /// the unscoped and project task lists until the server answers.
    ///
    /// # Errors
    ///
    /// [`MutationError::Validation`] before any request, otherwise
    /// [`MutationError::Failed`] / [`MutationError::SessionExpired`] after
    /// rollback.
    pub async fn create_task(&self, request: CreateTask) -> Result<Task, MutationError> {
        request.validate()?;
        let project = request.project_id.clone();
        let status = request.status.unwrap_or(TaskStatus::Todo);
        let now = Utc::now();
        let placeholder = Task {
            id: TaskId::new(optimistic_id()),
            title: request.title.clone(),
            description: request.description.clone(),
            status,
            priority: request.priority.unwrap_or_default(),
            order: self.next_order(&project, status),
            due_date: request.due_date,
            assigned_to_id: request.assigned_to_id.clone(),
            created_by_id: None,
            project_id: project.clone(),
            tags: request.tags.clone(),
            is_completed: false,
            created_at: now,
            updated_at: now,
        };
        let placeholder_id = placeholder.id.clone();
        let all = CacheKey::tasks();
        let scoped = CacheKey::project_tasks(&project);

        let plan = Plan {
            action: "create_task",
            touched: vec![CacheKey::tasks(), CacheKey::projects()],
            revalidate: vec![CacheKey::tasks(), CacheKey::projects()],
            success: Some("Task created successfully"),
            fallback: "Failed to create task",
        };
        self.run(
            plan,
            |cache| {
                cache.update_where(&CacheKey::tasks(), |key, value| match value {
                    CachedValue::Tasks(tasks) if key == &all || key == &scoped => {
                        tasks.push(placeholder.clone());
                        true
                    }
                    _ => false,
                });
                bump_task_count(cache, &project, 1);
            },
            self.backend.create_task(&request),
            |cache, created| reconcile_task(cache, &placeholder_id, created),
        )
        .await
    }

    /// Edits a task in place.
    ///
    /// # Errors
    ///
    /// As [`Self::create_task`].
    pub async fn update_task(&self, id: &TaskId, update: UpdateTask) -> Result<Task, MutationError> {
        update.validate()?;
        let mut revalidate = vec![CacheKey::tasks()];
        if let Some(task) = self.cached_task(id) {
            revalidate.push(CacheKey::project(&task.project_id));
        }
        let plan = Plan {
            action: "update_task",
            touched: vec![CacheKey::tasks()],
            revalidate,
            success: Some("Task updated successfully"),
            fallback: "Failed to update task",
        };
        let now = Utc::now();
        self.run(
            plan,
            |cache| {
                cache.update_where(&CacheKey::tasks(), |_, value| {
                    patch_task(value, id, |task| {
                        task.apply(&update);
                        task.updated_at = now;
                    })
                });
            },
            self.backend.update_task(id, &update),
            |cache, updated| reconcile_task(cache, id, updated),
        )
        .await
    }

    /// Deletes a task. It disappears from every cached collection at once.
    ///
    /// # Errors
    ///
    /// [`MutationError::Failed`] / [`MutationError::SessionExpired`] after
    /// rollback.
    pub async fn delete_task(&self, id: &TaskId) -> Result<(), MutationError> {
        let project = self.cached_task(id).map(|t| t.project_id);
        let plan = Plan {
            action: "delete_task",
            touched: vec![CacheKey::tasks(), CacheKey::projects()],
            revalidate: vec![CacheKey::tasks(), CacheKey::projects()],
            success: Some("Task deleted successfully"),
            fallback: "Failed to delete task",
        };
        self.run(
            plan,
            |cache| {
                cache.remove(&CacheKey::task(id));
                cache.update_where(&CacheKey::tasks(), |_, value| match value {
                    CachedValue::Tasks(tasks) => {
                        let before = tasks.len();
                        tasks.retain(|t| &t.id != id);
                        tasks.len() != before
                    }
                    _ => false,
                });
                if let Some(project) = &project {
                    bump_task_count(cache, project, -1);
                }
            },
            self.backend.delete_task(id),
            |_, _| {},
        )
        .await
    }

    /// Moves a task to the planned column and order.
    ///
    /// The optimistic copy is stamped with the current time so that it
    /// sorts ahead of a sibling holding the same order. No success toast is
    /// emitted; the board already shows the result.
    ///
    /// # Errors
    ///
    /// [`MutationError::Failed`] / [`MutationError::SessionExpired`] after
    /// rollback.
    pub async fn move_task(&self, planned: &PlannedMove) -> Result<Task, MutationError> {
        let payload = planned.payload();
        let plan = Plan {
            action: "move_task",
            touched: vec![CacheKey::tasks()],
            revalidate: vec![CacheKey::tasks()],
            success: None,
            fallback: "Failed to move task",
        };
        let now = Utc::now();
        let id = &planned.task_id;
        self.run(
            plan,
            |cache| {
                cache.update_where(&CacheKey::tasks(), |_, value| {
                    patch_task(value, id, |task| {
                        task.status = planned.status;
                        task.order = planned.order;
                        task.updated_at = now;
                    })
                });
            },
            self.backend.move_task(id, &payload),
            |cache, moved| reconcile_task(cache, id, moved),
        )
        .await
    }

    /// Plans a drop gesture against `tasks` and moves the task if the plan
    /// changes anything. Returns `Ok(None)` without any request for a no-op.
    ///
    /// # Errors
    ///
    /// As [`Self::move_task`].
    pub async fn drop_task(
        &self,
        tasks: &[Task],
        source: &TaskId,
        target: &DropTarget,
    ) -> Result<Option<Task>, MutationError> {
        match plan_move(tasks, source, target) {
            MoveDecision::NoOp => {
                tracing::debug!(task_id = %source, "drop changes nothing");
                Ok(None)
            }
            MoveDecision::Move(planned) => self.move_task(&planned).await.map(Some),
        }
    }

    /// Applies a batch of positions. Emits no success toast.
    ///
    /// # Errors
    ///
    /// [`MutationError::Failed`] / [`MutationError::SessionExpired`] after
    /// rollback.
    pub async fn reorder_tasks(&self, reorder: ReorderTasks) -> Result<(), MutationError> {
        let plan = Plan {
            action: "reorder_tasks",
            touched: vec![CacheKey::tasks()],
            revalidate: vec![CacheKey::tasks()],
            success: None,
            fallback: "Failed to reorder tasks",
        };
        self.run(
            plan,
            |cache| {
                for position in &reorder.tasks {
                    cache.update_where(&CacheKey::tasks(), |_, value| {
                        patch_task(value, &position.id, |task| {
                            task.status = position.status;
                            task.order = position.order;
                        })
                    });
                }
            },
            self.backend.reorder_tasks(&reorder),
            |_, _| {},
        )
        .await
    }
}
