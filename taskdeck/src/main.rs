//! Terminal client for `TaskDeck` boards.
//!
//! Configuration via CLI flags, environment variables, or config file
//! (`~/.config/taskdeck/config.toml`).
//!
//! ```bash
//! TASKDECK_PASSWORD=secret taskdeck login --email me@example.com
//! taskdeck board 3f2c...
//! taskdeck move <task-id> in-progress
//! taskdeck watch --project 3f2c...
//! ```

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{CommandFactory, Parser};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing_appender::non_blocking::WorkerGuard;

use taskdeck::api::{ApiClient, ApiError};
use taskdeck::auth::{AuthSession, SessionEvent, SessionStore, SessionStoreError};
use taskdeck::board::{Board, DropTarget, Overview, StatusCounts, TaskFilter};
use taskdeck::cache::{CacheKey, CachedValue, QueryCache, QueryClient, Revalidator};
use taskdeck::config::{CliArgs, ClientConfig, Command, ConfigError, ProjectCommand, TaskCommand};
use taskdeck::mutation::{MutationCoordinator, MutationError, Toast};
use taskdeck::notifications::{NotificationStore, NotificationStoreError};
use taskdeck::push::{PushChannel, PushError, PushInvalidator};
use taskdeck_proto::project::{CreateProject, ProjectId, UpdateProject};
use taskdeck_proto::task::{CreateTask, ReorderTasks, Task, TaskId, UpdateTask};
use taskdeck_proto::user::{LoginRequest, RegisterRequest, UpdateProfile, UserId};
use taskdeck_proto::validate::ValidationError;

/// Everything a command can fail with.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionStoreError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Mutation(#[from] MutationError),
    #[error(transparent)]
    Push(#[from] PushError),
    #[error(transparent)]
    Notifications(#[from] NotificationStoreError),
    #[error("failed to read password: {0}")]
    Password(#[source] io::Error),
    #[error("not signed in; run `taskdeck login` first")]
    NotSignedIn,
    #[error("no user with id or email {0:?}; see `taskdeck users`")]
    UnknownUser(String),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    // Logs go to a file so stdout stays clean for command output.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let Some(command) = cli.command.clone() else {
        let _ = CliArgs::command().print_help();
        return ExitCode::SUCCESS;
    };

    tracing::info!("taskdeck starting");
    let result = match ClientConfig::load(&cli) {
        Ok(config) => run(config, command).await,
        Err(e) => Err(e.into()),
    };
    tracing::info!("taskdeck exiting");

    match result {
        Ok(()) => ExitCode::SUCCESS,
        // Already reported through a toast.
        Err(CliError::Mutation(MutationError::Failed { .. } | MutationError::SessionExpired)) => {
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("taskdeck.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_env("TASKDECK_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Shared handles for one command invocation.
struct App {
    config: ClientConfig,
    api: Arc<ApiClient>,
    queries: QueryClient<ApiClient>,
    mutations: MutationCoordinator<ApiClient>,
    toasts: mpsc::UnboundedReceiver<Toast>,
}

impl App {
    fn new(config: ClientConfig) -> Result<Self, CliError> {
        let session = AuthSession::load(SessionStore::new(config.session_path()))?;
        let api = Arc::new(ApiClient::new(
            &config.api_url,
            config.request_timeout,
            session.clone(),
        )?);
        let cache = QueryCache::new();
        clear_cache_on_sign_out(session.subscribe(), cache.clone());

        let (toast_tx, toasts) = mpsc::unbounded_channel();
        Ok(Self {
            queries: QueryClient::new(Arc::clone(&api), cache.clone()),
            mutations: MutationCoordinator::new(Arc::clone(&api), cache, toast_tx),
            api,
            config,
            toasts,
        })
    }

    fn session(&self) -> &AuthSession {
        self.api.session()
    }

    fn require_session(&self) -> Result<(), CliError> {
        if self.session().is_authenticated() {
            Ok(())
        } else {
            Err(CliError::NotSignedIn)
        }
    }

    fn flush_toasts(&mut self) {
        while let Ok(toast) = self.toasts.try_recv() {
            println!("{toast}");
        }
    }
}

fn clear_cache_on_sign_out(mut events: broadcast::Receiver<SessionEvent>, cache: QueryCache) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::SignedOut) => {
                    tracing::info!("signed out, clearing cache");
                    cache.clear();
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn run(config: ClientConfig, command: Command) -> Result<(), CliError> {
    let mut app = App::new(config)?;
    let result = dispatch(&mut app, command).await;
    app.flush_toasts();
    match result {
        Err(CliError::Api(ApiError::NotFound)) => {
            println!("Nothing found.");
            Ok(())
        }
        Err(CliError::Api(ApiError::SessionExpired)) => Err(CliError::NotSignedIn),
        other => other,
    }
}

#[allow(clippy::too_many_lines)]
async fn dispatch(app: &mut App, command: Command) -> Result<(), CliError> {
    match command {
        Command::Login { email } => {
            let request = LoginRequest {
                email,
                password: read_password()?,
            };
            request.validate()?;
            let auth = app.api.login(&request).await?;
            println!("Signed in as {} <{}>", auth.user.full_name(), auth.user.email);
        }
        Command::Register {
            email,
            first_name,
            last_name,
        } => {
            let request = RegisterRequest {
                email,
                first_name,
                last_name,
                password: read_password()?,
            };
            request.validate()?;
            let auth = app.api.register(&request).await?;
            println!("Welcome, {}", auth.user.full_name());
        }
        Command::Logout => {
            // The local session is cleared even when the server call fails.
            match app.api.logout().await {
                Ok(()) => println!("Signed out"),
                Err(e) => {
                    tracing::warn!(error = %e, "logout not confirmed by server");
                    println!("Signed out locally ({})", e.user_message());
                }
            }
        }
        Command::Profile {
            first_name,
            last_name,
            email,
        } => {
            app.require_session()?;
            let update = UpdateProfile {
                first_name,
                last_name,
                email,
                avatar: None,
            };
            let user = if update == UpdateProfile::default() {
                app.queries.profile().await?
            } else {
                app.mutations.update_profile(update).await?
            };
            println!("{} <{}>", user.full_name(), user.email);
            println!("role: {:?}  active: {}", user.role, user.is_active);
        }
        Command::Dashboard => {
            app.require_session()?;
            let projects = app.queries.projects().await?;
            let tasks = app.queries.tasks(None).await?;
            print_overview(&Overview::build(&projects, &tasks));
        }
        Command::Users => {
            app.require_session()?;
            for user in app.queries.users().await? {
                println!("{}  {} <{}>", user.id, user.full_name(), user.email);
            }
        }
        Command::Projects { action } => {
            app.require_session()?;
            projects(app, action).await?;
        }
        Command::Board { project, compact } => {
            app.require_session()?;
            let project = ProjectId::new(project);
            let mut board = Board::from_tasks(&app.queries.tasks(Some(&project)).await?);
            if compact {
                let positions = board.compacted_positions();
                if !positions.is_empty() {
                    let count = positions.len();
                    app.mutations
                        .reorder_tasks(ReorderTasks { tasks: positions })
                        .await?;
                    println!("Renumbered {count} task(s)");
                    let cached = app.queries.cache().get(&CacheKey::project_tasks(&project));
                    if let Some(CachedValue::Tasks(tasks)) = cached {
                        board = Board::from_tasks(&tasks);
                    }
                }
            }
            print_board(&board);
        }
        Command::Move { task, target } => {
            app.require_session()?;
            let source = TaskId::new(task);
            let moving = app.queries.task(&source).await?;
            let siblings = app.queries.tasks(Some(&moving.project_id)).await?;
            let target = DropTarget::parse(&target);
            match app.mutations.drop_task(&siblings, &source, &target).await? {
                Some(moved) => println!(
                    "Moved \"{}\" to {} at position {}",
                    moved.title,
                    moved.status.title(),
                    moved.order
                ),
                None => println!("Nothing to move"),
            }
        }
        Command::Tasks {
            search,
            status,
            priority,
            project,
        } => {
            app.require_session()?;
            let filter = TaskFilter {
                search,
                status,
                priority,
                project: project.map(ProjectId::new),
            };
            let tasks = app.queries.tasks(filter.project.as_ref()).await?;
            let shown = filter.apply(&tasks);
            if shown.is_empty() {
                println!("No tasks match.");
            }
            for task in &shown {
                print_task_row(task);
            }
            let counts = StatusCounts::from_tasks(shown.iter().copied());
            println!(
                "{} tasks: {} to do, {} in progress, {} in review, {} done",
                counts.total(),
                counts.todo,
                counts.in_progress,
                counts.in_review,
                counts.done
            );
        }
        Command::Task { action } => {
            app.require_session()?;
            task(app, action).await?;
        }
        Command::Watch { project } => {
            app.require_session()?;
            watch(app, project.map(ProjectId::new)).await?;
        }
        Command::Notifications { read_all, clear } => {
            let path = app.config.notifications_path();
            let mut store = NotificationStore::load(&path, app.config.notification_capacity)?;
            if read_all {
                store.mark_all_read();
                store.save(&path)?;
            } else if clear {
                store.clear();
                store.save(&path)?;
            }
            if store.is_empty() {
                println!("No notifications.");
            }
            for n in store.iter() {
                let marker = if n.read { ' ' } else { '*' };
                let when = n
                    .created_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!("{marker} {when}  {}: {}", n.title, n.message);
            }
            println!("{} unread", store.unread_count());
        }
    }
    Ok(())
}

async fn projects(app: &App, action: Option<ProjectCommand>) -> Result<(), CliError> {
    match action {
        None => {
            let projects = app.queries.projects().await?;
            if projects.is_empty() {
                println!("No projects yet.");
            }
            for p in &projects {
                println!("{}  {}  ({} tasks)", p.id, p.name, p.task_count());
            }
        }
        Some(ProjectCommand::Create {
            name,
            description,
            color,
        }) => {
            let created = app
                .mutations
                .create_project(CreateProject {
                    name,
                    description,
                    color,
                })
                .await?;
            println!("{}  {}", created.id, created.name);
        }
        Some(ProjectCommand::Update {
            id,
            name,
            description,
            color,
        }) => {
            let update = UpdateProject {
                name,
                description,
                color,
            };
            let project = app
                .mutations
                .update_project(&ProjectId::new(id), update)
                .await?;
            println!("{}  {}", project.id, project.name);
        }
        Some(ProjectCommand::Delete { id }) => {
            app.mutations.delete_project(&ProjectId::new(id)).await?;
        }
    }
    Ok(())
}

async fn task(app: &App, action: TaskCommand) -> Result<(), CliError> {
    match action {
        TaskCommand::Show { id } => {
            let task = app.queries.task(&TaskId::new(id)).await?;
            print_task_row(&task);
            if let Some(description) = &task.description {
                println!("  {description}");
            }
            if !task.tags.is_empty() {
                println!("  tags: {}", task.tags.join(", "));
            }
            if let Some(due) = task.due_date {
                println!("  due: {}", due.format("%Y-%m-%d"));
            }
            if let Some(assignee) = &task.assigned_to_id {
                println!("  assignee: {assignee}");
            }
        }
        TaskCommand::Create {
            project,
            title,
            description,
            status,
            priority,
            assignee,
            due,
            tags,
        } => {
            let mut request = CreateTask::new(title, ProjectId::new(project));
            request.description = description;
            request.status = status;
            request.priority = priority;
            request.assigned_to_id = assignee_id(app, assignee).await?;
            request.due_date = due.map(due_at);
            request.tags = tags;
            let created = app.mutations.create_task(request).await?;
            print_task_row(&created);
        }
        TaskCommand::Update {
            id,
            title,
            description,
            status,
            priority,
            assignee,
            due,
            completed,
        } => {
            let update = UpdateTask {
                title,
                description,
                status,
                priority,
                assigned_to_id: assignee_id(app, assignee).await?,
                due_date: due.map(due_at),
                is_completed: completed,
                ..UpdateTask::default()
            };
            let updated = app.mutations.update_task(&TaskId::new(id), update).await?;
            print_task_row(&updated);
        }
        TaskCommand::Delete { id } => {
            app.mutations.delete_task(&TaskId::new(id)).await?;
        }
    }
    Ok(())
}

/// Resolves `--assignee` against the user directory.
async fn assignee_id(app: &App, handle: Option<String>) -> Result<Option<UserId>, CliError> {
    let Some(handle) = handle else {
        return Ok(None);
    };
    let users = app.queries.users().await?;
    users
        .iter()
        .find(|u| u.answers_to(&handle))
        .map(|u| Some(u.id.clone()))
        .ok_or(CliError::UnknownUser(handle))
}

/// Due dates are stored as midnight UTC.
fn due_at(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Streams push events until Ctrl-C or until the server closes.
async fn watch(app: &App, project: Option<ProjectId>) -> Result<(), CliError> {
    let push_config = app.config.to_push_config(app.session().access_token());
    let channel = PushChannel::connect(&push_config).await?;
    if let Some(project) = &project {
        channel.join(project).await?;
        // Prime the cache so invalidations trigger a visible refetch.
        app.queries.tasks(Some(project)).await?;
    }

    let path = app.config.notifications_path();
    let notifications = Arc::new(Mutex::new(NotificationStore::load(
        &path,
        app.config.notification_capacity,
    )?));
    let invalidator = PushInvalidator::new(app.queries.cache().clone(), Arc::clone(&notifications));
    let revalidator = Revalidator::spawn(app.queries.clone());

    println!("Watching {} (Ctrl-C to stop)", push_config.url);
    let closed = tokio::select! {
        e = invalidator.run(&channel, |event, applied| {
            if applied.is_empty() {
                println!("{}", event.name());
            } else {
                println!("{}: {} key(s) invalidated", event.name(), applied.len());
            }
        }) => Some(e),
        _ = tokio::signal::ctrl_c() => None,
    };

    revalidator.shutdown();
    channel.close().await;
    notifications.lock().save(&path)?;

    match closed {
        Some(PushError::ConnectionClosed) => {
            println!("Push channel closed by server");
            Ok(())
        }
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn read_password() -> Result<String, CliError> {
    if let Ok(password) = std::env::var("TASKDECK_PASSWORD") {
        return Ok(password);
    }
    eprint!("Password: ");
    io::stderr().flush().map_err(CliError::Password)?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(CliError::Password)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn print_board(board: &Board) {
    if board.is_empty() {
        println!("This board has no tasks yet.");
        return;
    }
    for (status, tasks) in board.columns() {
        println!("== {} ({}) ==", status.title(), tasks.len());
        for task in tasks {
            println!("  [{}] {}  ({})", task.order, task.title, task.id);
        }
    }
}

fn print_overview(overview: &Overview) {
    println!(
        "{} projects, {} tasks ({} in progress, {} done)",
        overview.project_count,
        overview.counts.total(),
        overview.counts.in_progress,
        overview.counts.done
    );
    println!("Recent projects:");
    for p in &overview.recent_projects {
        println!("  {}  {}  ({} tasks)", p.id, p.name, p.task_count());
    }
    println!("Recent tasks:");
    for task in &overview.recent_tasks {
        print!("  ");
        print_task_row(task);
    }
}

fn print_task_row(task: &Task) {
    let done = if task.is_completed { 'x' } else { ' ' };
    println!(
        "[{done}] {}  {:<11} {:<6} {}",
        task.id,
        task.status.title(),
        task.priority,
        task.title
    );
}
