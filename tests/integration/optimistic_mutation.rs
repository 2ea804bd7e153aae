//! Integration tests for optimistic mutations.
//!
//! Validates the mutation lifecycle against an in-memory backend:
//! - the optimistic value is visible while the request is in flight
//! - success replaces it with the server's record
//! - failure restores the snapshot and emits exactly one error toast
//! - validation failures and no-op drops never reach the backend

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use taskdeck::api::{ApiError, Backend};
use taskdeck::board::{DropTarget, MoveDecision, plan_move};
use taskdeck::cache::{CacheKey, CachedValue, QueryCache, QueryClient};
use taskdeck::mutation::{
    MutationCoordinator, MutationError, OPTIMISTIC_ID_PREFIX, Toast, ToastLevel,
};
use taskdeck_proto::project::{CreateProject, Project, ProjectCounts, ProjectId, UpdateProject};
use taskdeck_proto::task::{
    CreateTask, MoveTask, ReorderTasks, Task, TaskId, TaskPosition, TaskStatus, UpdateTask,
};
use taskdeck_proto::user::{UpdateProfile, User, UserId, UserRole};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn task(id: &str, status: TaskStatus, order: i64) -> Task {
    Task {
        id: TaskId::new(id),
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
        updated_at: at(0),
    }
}

fn project(id: &str, tasks: u64) -> Project {
    Project {
        id: ProjectId::new(id),
        name: format!("project {id}"),
        description: None,
        color: None,
        owner_id: UserId::new("u1"),
        is_active: true,
        counts: ProjectCounts { tasks },
        created_at: at(0),
        updated_at: at(0),
    }
}

fn user() -> User {
    User {
        id: UserId::new("u1"),
        email: "ada@example.com".to_string(),
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        role: UserRole::User,
        avatar: None,
        is_active: true,
        created_at: at(0),
        updated_at: at(0),
    }
}

/// In-memory backend. Mutations can be made to fail or to wait on a gate.
#[derive(Default)]
struct FakeBackend {
    calls: AtomicUsize,
    failure: Mutex<Option<ApiError>>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    /// Order the server assigns on move, overriding the requested one.
    server_order: Mutex<Option<i64>>,
}

impl FakeBackend {
    fn failing(error: ApiError) -> Self {
        let backend = Self::default();
        *backend.failure.lock() = Some(error);
        backend
    }

    /// Makes the next mutation wait until the returned sender fires.
    fn hold(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock() = Some(rx);
        tx
    }

    async fn settle(&self) -> Result<(), ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().take();
        if let Some(rx) = gate {
            let _ = rx.await;
        }
        let failure = self.failure.lock().clone();
        failure.map_or(Ok(()), Err)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Backend for FakeBackend {
    async fn profile(&self) -> Result<User, ApiError> {
        Ok(user())
    }

    async fn update_profile(&self, update: &UpdateProfile) -> Result<User, ApiError> {
        self.settle().await?;
        let mut user = user();
        update.apply_to(&mut user);
        Ok(user)
    }

    async fn users(&self) -> Result<Vec<User>, ApiError> {
        Ok(vec![user()])
    }

    async fn projects(&self) -> Result<Vec<Project>, ApiError> {
        Ok(vec![project("p1", 2)])
    }

    async fn project(&self, id: &ProjectId) -> Result<Project, ApiError> {
        Ok(project(id.as_str(), 2))
    }

    async fn create_project(&self, request: &CreateProject) -> Result<Project, ApiError> {
        self.settle().await?;
        let mut created = project("p9", 0);
        created.name.clone_from(&request.name);
        Ok(created)
    }

    async fn update_project(
        &self,
        id: &ProjectId,
        update: &UpdateProject,
    ) -> Result<Project, ApiError> {
        self.settle().await?;
        let mut updated = project(id.as_str(), 2);
        updated.apply(update);
        Ok(updated)
    }

    async fn delete_project(&self, _id: &ProjectId) -> Result<(), ApiError> {
        self.settle().await
    }

    async fn tasks(&self, _project: Option<&ProjectId>) -> Result<Vec<Task>, ApiError> {
        Ok(Vec::new())
    }

    async fn task(&self, id: &TaskId) -> Result<Task, ApiError> {
        Ok(task(id.as_str(), TaskStatus::Todo, 0))
    }

    async fn create_task(&self, request: &CreateTask) -> Result<Task, ApiError> {
        self.settle().await?;
        let mut created = task("t-server", request.status.unwrap_or(TaskStatus::Todo), 7);
        created.title.clone_from(&request.title);
        created.project_id = request.project_id.clone();
        Ok(created)
    }

    async fn update_task(&self, id: &TaskId, update: &UpdateTask) -> Result<Task, ApiError> {
        self.settle().await?;
        let mut updated = task(id.as_str(), TaskStatus::Todo, 0);
        updated.apply(update);
        updated.updated_at = at(500);
        Ok(updated)
    }

    async fn delete_task(&self, _id: &TaskId) -> Result<(), ApiError> {
        self.settle().await
    }

    async fn move_task(&self, id: &TaskId, to: &MoveTask) -> Result<Task, ApiError> {
        self.settle().await?;
        let order = (*self.server_order.lock()).unwrap_or(to.order);
        let mut moved = task(id.as_str(), to.status, order);
        moved.updated_at = at(900);
        Ok(moved)
    }

    async fn reorder_tasks(&self, _reorder: &ReorderTasks) -> Result<(), ApiError> {
        self.settle().await
    }
}

struct Harness {
    backend: Arc<FakeBackend>,
    cache: QueryCache,
    coordinator: MutationCoordinator<FakeBackend>,
    toasts: mpsc::UnboundedReceiver<Toast>,
}

impl Harness {
    fn new(backend: FakeBackend) -> Self {
        let backend = Arc::new(backend);
        let cache = QueryCache::new();
        let (tx, toasts) = mpsc::unbounded_channel();
        let coordinator = MutationCoordinator::new(Arc::clone(&backend), cache.clone(), tx);
        Self {
            backend,
            cache,
            coordinator,
            toasts,
        }
    }

    /// Seeds `tasks` and `tasks/project/p1` with two TODO tasks.
    fn seed_board(&self) -> Vec<Task> {
        let tasks = vec![task("1", TaskStatus::Todo, 0), task("2", TaskStatus::Todo, 1)];
        self.cache
            .set(&CacheKey::tasks(), CachedValue::Tasks(tasks.clone()));
        self.cache.set(
            &CacheKey::project_tasks(&ProjectId::new("p1")),
            CachedValue::Tasks(tasks.clone()),
        );
        tasks
    }

    fn drain_toasts(&mut self) -> Vec<Toast> {
        let mut out = Vec::new();
        while let Ok(toast) = self.toasts.try_recv() {
            out.push(toast);
        }
        out
    }

    fn cached_tasks(&self, key: &CacheKey) -> Vec<Task> {
        match self.cache.get(key) {
            Some(CachedValue::Tasks(tasks)) => tasks,
            other => panic!("expected task list at {key}, got {other:?}"),
        }
    }
}

fn find<'a>(tasks: &'a [Task], id: &str) -> &'a Task {
    tasks.iter().find(|t| t.id.as_str() == id).expect("task present")
}

// =============================================================================
// Move
// =============================================================================

#[tokio::test]
async fn move_shows_optimistic_state_then_server_record() {
    let harness = Harness::new(FakeBackend::default());
    *harness.backend.server_order.lock() = Some(4);
    let tasks = harness.seed_board();

    let MoveDecision::Move(planned) = plan_move(
        &tasks,
        &TaskId::new("2"),
        &DropTarget::Column(TaskStatus::InProgress),
    ) else {
        panic!("expected a move");
    };
    assert_eq!(planned.payload().status, TaskStatus::InProgress);
    assert_eq!(planned.payload().order, 0);

    let release = harness.backend.hold();
    let coordinator = harness.coordinator.clone();
    let pending = tokio::spawn(async move { coordinator.move_task(&planned).await });

    // Wait until the request is in flight.
    while harness.backend.calls() == 0 {
        tokio::task::yield_now().await;
    }
    let scoped = CacheKey::project_tasks(&ProjectId::new("p1"));
    let optimistic = harness.cached_tasks(&scoped);
    assert_eq!(find(&optimistic, "2").status, TaskStatus::InProgress);
    assert_eq!(find(&optimistic, "2").order, 0);

    release.send(()).unwrap();
    let moved = pending.await.unwrap().unwrap();
    assert_eq!(moved.order, 4);

    for key in [CacheKey::tasks(), scoped] {
        let settled = harness.cached_tasks(&key);
        assert_eq!(find(&settled, "2").order, 4, "{key} not reconciled");
        assert_eq!(find(&settled, "2").updated_at, at(900));
    }
    assert_eq!(
        harness.cache.get(&CacheKey::task(&TaskId::new("2"))),
        Some(CachedValue::Task(moved))
    );
}

#[tokio::test]
async fn read_through_during_move_keeps_optimistic_state() {
    let harness = Harness::new(FakeBackend::default());
    let tasks = harness.seed_board();
    // An earlier mutation or push event left the lists stale.
    harness.cache.invalidate_prefix(&CacheKey::tasks());
    let queries = QueryClient::new(Arc::clone(&harness.backend), harness.cache.clone());

    let MoveDecision::Move(planned) = plan_move(
        &tasks,
        &TaskId::new("2"),
        &DropTarget::Column(TaskStatus::InProgress),
    ) else {
        panic!("expected a move");
    };
    let release = harness.backend.hold();
    let coordinator = harness.coordinator.clone();
    let pending = tokio::spawn(async move { coordinator.move_task(&planned).await });
    while harness.backend.calls() == 0 {
        tokio::task::yield_now().await;
    }

    // The backend answers list reads with an empty list, i.e. not the
    // optimistic board.
    let read = queries.tasks(Some(&ProjectId::new("p1"))).await.unwrap();
    assert_eq!(read.len(), 2);
    assert_eq!(find(&read, "2").status, TaskStatus::InProgress);
    let scoped = CacheKey::project_tasks(&ProjectId::new("p1"));
    assert_eq!(
        find(&harness.cached_tasks(&scoped), "2").status,
        TaskStatus::InProgress
    );

    release.send(()).unwrap();
    pending.await.unwrap().unwrap();
    let settled = harness.cached_tasks(&scoped);
    assert_eq!(find(&settled, "2").status, TaskStatus::InProgress);
    assert_eq!(find(&settled, "2").updated_at, at(900));
}

#[tokio::test]
async fn failed_move_restores_snapshot_with_one_toast() {
    let mut harness = Harness::new(FakeBackend::failing(ApiError::Rejected {
        status: 500,
        message: Some("Database unavailable".to_string()),
    }));
    let before = harness.seed_board();

    let result = harness
        .coordinator
        .drop_task(&before, &TaskId::new("2"), &DropTarget::Column(TaskStatus::Done))
        .await;

    assert!(
        matches!(result, Err(MutationError::Failed { ref message, .. }) if message == "Database unavailable")
    );
    assert_eq!(harness.cached_tasks(&CacheKey::tasks()), before);
    assert_eq!(
        harness.cached_tasks(&CacheKey::project_tasks(&ProjectId::new("p1"))),
        before
    );
    assert_eq!(
        harness.drain_toasts(),
        vec![Toast::error("Database unavailable")]
    );
    assert_eq!(harness.backend.calls(), 1);
}

#[tokio::test]
async fn failure_without_server_message_uses_fallback() {
    let mut harness = Harness::new(FakeBackend::failing(ApiError::Network(
        "connection reset".to_string(),
    )));
    let tasks = harness.seed_board();

    let result = harness
        .coordinator
        .drop_task(&tasks, &TaskId::new("1"), &DropTarget::Task(TaskId::new("2")))
        .await;

    assert!(result.is_err());
    let toasts = harness.drain_toasts();
    assert_eq!(toasts.len(), 1);
    assert_eq!(toasts[0].level, ToastLevel::Error);
    assert_eq!(toasts[0].message, "Failed to move task");
}

#[tokio::test]
async fn no_op_drop_sends_nothing() {
    let mut harness = Harness::new(FakeBackend::default());
    let tasks = harness.seed_board();

    let result = harness
        .coordinator
        .drop_task(&tasks, &TaskId::new("1"), &DropTarget::Task(TaskId::new("1")))
        .await
        .unwrap();

    assert!(result.is_none());
    assert_eq!(harness.backend.calls(), 0);
    assert!(harness.drain_toasts().is_empty());
}

#[tokio::test]
async fn expired_session_rolls_back() {
    let mut harness = Harness::new(FakeBackend::failing(ApiError::SessionExpired));
    let before = harness.seed_board();

    let result = harness
        .coordinator
        .drop_task(&before, &TaskId::new("1"), &DropTarget::Column(TaskStatus::InReview))
        .await;

    assert!(matches!(result, Err(MutationError::SessionExpired)));
    assert_eq!(harness.cached_tasks(&CacheKey::tasks()), before);
    assert_eq!(harness.drain_toasts().len(), 1);
}

// =============================================================================
// Create / update / delete
// =============================================================================

#[tokio::test]
async fn create_task_shows_placeholder_until_server_answers() {
    let mut harness = Harness::new(FakeBackend::default());
    harness.seed_board();
    harness
        .cache
        .set(&CacheKey::projects(), CachedValue::Projects(vec![project("p1", 2)]));

    let release = harness.backend.hold();
    let coordinator = harness.coordinator.clone();
    let pending = tokio::spawn(async move {
        coordinator
            .create_task(CreateTask::new("Write docs", ProjectId::new("p1")))
            .await
    });
    while harness.backend.calls() == 0 {
        tokio::task::yield_now().await;
    }

    let scoped = CacheKey::project_tasks(&ProjectId::new("p1"));
    let optimistic = harness.cached_tasks(&scoped);
    let placeholder = optimistic.last().unwrap();
    assert!(placeholder.id.as_str().starts_with(OPTIMISTIC_ID_PREFIX));
    assert_eq!(placeholder.order, 2);
    assert_eq!(
        harness.cache.get(&CacheKey::projects()),
        Some(CachedValue::Projects(vec![project("p1", 3)]))
    );

    release.send(()).unwrap();
    let created = pending.await.unwrap().unwrap();

    let settled = harness.cached_tasks(&scoped);
    assert_eq!(settled.len(), 3);
    assert!(settled.iter().any(|t| t.id == created.id));
    assert!(
        !settled
            .iter()
            .any(|t| t.id.as_str().starts_with(OPTIMISTIC_ID_PREFIX))
    );
    assert_eq!(
        harness.drain_toasts(),
        vec![Toast::success("Task created successfully")]
    );
}

#[tokio::test]
async fn invalid_task_is_rejected_before_any_request() {
    let mut harness = Harness::new(FakeBackend::default());
    let before = harness.seed_board();

    let result = harness
        .coordinator
        .create_task(CreateTask::new("", ProjectId::new("p1")))
        .await;

    assert!(matches!(result, Err(MutationError::Validation(_))));
    assert_eq!(harness.backend.calls(), 0);
    assert!(harness.drain_toasts().is_empty());
    assert_eq!(harness.cached_tasks(&CacheKey::tasks()), before);
}

#[tokio::test]
async fn update_task_reconciles_every_copy() {
    let mut harness = Harness::new(FakeBackend::default());
    harness.seed_board();

    let update = UpdateTask {
        title: Some("Renamed".to_string()),
        ..UpdateTask::default()
    };
    let updated = harness
        .coordinator
        .update_task(&TaskId::new("1"), update)
        .await
        .unwrap();

    assert_eq!(updated.title, "Renamed");
    assert_eq!(find(&harness.cached_tasks(&CacheKey::tasks()), "1").title, "Renamed");
    assert_eq!(
        find(
            &harness.cached_tasks(&CacheKey::project_tasks(&ProjectId::new("p1"))),
            "1"
        )
        .updated_at,
        at(500)
    );
    assert_eq!(
        harness.drain_toasts(),
        vec![Toast::success("Task updated successfully")]
    );
}

#[tokio::test]
async fn failed_delete_brings_task_back() {
    let mut harness = Harness::new(FakeBackend::failing(ApiError::Rejected {
        status: 403,
        message: Some("You do not have access to this task".to_string()),
    }));
    let before = harness.seed_board();
    let release = harness.backend.hold();

    let coordinator = harness.coordinator.clone();
    let pending =
        tokio::spawn(async move { coordinator.delete_task(&TaskId::new("1")).await });
    while harness.backend.calls() == 0 {
        tokio::task::yield_now().await;
    }
    let optimistic = harness.cached_tasks(&CacheKey::tasks());
    assert!(optimistic.iter().all(|t| t.id.as_str() != "1"));

    release.send(()).unwrap();
    assert!(pending.await.unwrap().is_err());
    assert_eq!(harness.cached_tasks(&CacheKey::tasks()), before);
    assert_eq!(
        harness.drain_toasts(),
        vec![Toast::error("You do not have access to this task")]
    );
}

#[tokio::test]
async fn reorder_applies_positions_without_success_toast() {
    let mut harness = Harness::new(FakeBackend::default());
    harness.seed_board();

    harness
        .coordinator
        .reorder_tasks(ReorderTasks {
            tasks: vec![
                TaskPosition {
                    id: TaskId::new("1"),
                    status: TaskStatus::Todo,
                    order: 1,
                },
                TaskPosition {
                    id: TaskId::new("2"),
                    status: TaskStatus::Todo,
                    order: 0,
                },
            ],
        })
        .await
        .unwrap();

    let tasks = harness.cached_tasks(&CacheKey::tasks());
    assert_eq!(find(&tasks, "1").order, 1);
    assert_eq!(find(&tasks, "2").order, 0);
    assert!(harness.drain_toasts().is_empty());
}

// =============================================================================
// Projects / profile
// =============================================================================

#[tokio::test]
async fn delete_project_drops_its_task_lists() {
    let mut harness = Harness::new(FakeBackend::default());
    harness.seed_board();
    harness
        .cache
        .set(&CacheKey::projects(), CachedValue::Projects(vec![project("p1", 2)]));

    harness
        .coordinator
        .delete_project(&ProjectId::new("p1"))
        .await
        .unwrap();

    assert_eq!(
        harness.cache.get(&CacheKey::projects()),
        Some(CachedValue::Projects(Vec::new()))
    );
    assert!(
        harness
            .cache
            .get(&CacheKey::project_tasks(&ProjectId::new("p1")))
            .is_none()
    );
    assert_eq!(
        harness.drain_toasts(),
        vec![Toast::success("Project deleted successfully")]
    );
}

#[tokio::test]
async fn failed_profile_update_restores_profile() {
    let mut harness = Harness::new(FakeBackend::failing(ApiError::Rejected {
        status: 409,
        message: Some("Email already in use".to_string()),
    }));
    harness
        .cache
        .set(&CacheKey::profile(), CachedValue::Profile(user()));

    let result = harness
        .coordinator
        .update_profile(UpdateProfile {
            email: Some("grace@example.com".to_string()),
            ..UpdateProfile::default()
        })
        .await;

    assert!(result.is_err());
    assert_eq!(
        harness.cache.get(&CacheKey::profile()),
        Some(CachedValue::Profile(user()))
    );
    assert_eq!(
        harness.drain_toasts(),
        vec![Toast::error("Email already in use")]
    );
}
