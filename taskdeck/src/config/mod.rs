//! Configuration for the `taskdeck` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskdeck/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use taskdeck_proto::task::{TaskPriority, TaskStatus};

use crate::notifications::DEFAULT_NOTIFICATION_CAPACITY;
use crate::push::PushConfig;

/// Default REST base URL.
pub const DEFAULT_API_URL: &str = "http://localhost:3000/api/v1";
/// Default push endpoint.
pub const DEFAULT_WS_URL: &str = "ws://localhost:3000/ws";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A capacity setting was zero.
    #[error("{0} must be at least 1")]
    ZeroCapacity(&'static str),

    /// No data directory was configured and none could be determined.
    #[error("could not determine data directory (set --data-dir or XDG_DATA_HOME)")]
    NoDataDir,
}

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    api: ApiFileConfig,
    push: PushFileConfig,
    notifications: NotificationsFileConfig,
    storage: StorageFileConfig,
}

/// `[api]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ApiFileConfig {
    url: Option<String>,
    timeout_secs: Option<u64>,
}

/// `[push]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct PushFileConfig {
    url: Option<String>,
    connect_timeout_secs: Option<u64>,
    channel_capacity: Option<usize>,
}

/// `[notifications]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NotificationsFileConfig {
    capacity: Option<usize>,
}

/// `[storage]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    data_dir: Option<PathBuf>,
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base URL.
    pub api_url: String,
    /// Push endpoint URL.
    pub ws_url: String,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
    /// Push handshake timeout.
    pub connect_timeout: Duration,
    /// Inbound push event buffer.
    pub channel_capacity: usize,
    /// Retained notifications.
    pub notification_capacity: usize,
    /// Where the session and notification files live.
    pub data_dir: PathBuf,
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or if no data directory can be determined.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file, dirs::data_dir())
    }

    /// Resolve from CLI args, a parsed file and the platform data directory.
    ///
    /// Priority: CLI > file > default.
    fn resolve(
        cli: &CliArgs,
        file: &ConfigFile,
        platform_data_dir: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let data_dir = cli
            .data_dir
            .clone()
            .or_else(|| file.storage.data_dir.clone())
            .or_else(|| platform_data_dir.map(|dir| dir.join("taskdeck")))
            .ok_or(ConfigError::NoDataDir)?;
        let channel_capacity = nonzero(
            "push.channel_capacity",
            file.push.channel_capacity.unwrap_or(256),
        )?;
        let notification_capacity = nonzero(
            "notifications.capacity",
            file.notifications
                .capacity
                .unwrap_or(DEFAULT_NOTIFICATION_CAPACITY),
        )?;

        Ok(Self {
            api_url: cli
                .api_url
                .clone()
                .or_else(|| file.api.url.clone())
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            ws_url: cli
                .ws_url
                .clone()
                .or_else(|| file.push.url.clone())
                .unwrap_or_else(|| DEFAULT_WS_URL.to_string()),
            request_timeout: Duration::from_secs(file.api.timeout_secs.unwrap_or(30)),
            connect_timeout: Duration::from_secs(file.push.connect_timeout_secs.unwrap_or(10)),
            channel_capacity,
            notification_capacity,
            data_dir,
        })
    }

    /// Persisted session file.
    #[must_use]
    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }

    /// Persisted notification inbox.
    #[must_use]
    pub fn notifications_path(&self) -> PathBuf {
        self.data_dir.join("notifications.json")
    }

    /// Push settings for the given credential.
    #[must_use]
    pub fn to_push_config(&self, token: Option<String>) -> PushConfig {
        PushConfig {
            url: self.ws_url.clone(),
            token,
            connect_timeout: self.connect_timeout,
            channel_capacity: self.channel_capacity,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Terminal client for TaskDeck boards")]
pub struct CliArgs {
    /// REST API base URL.
    #[arg(long, env = "TASKDECK_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Push channel WebSocket URL.
    #[arg(long, env = "TASKDECK_WS_URL", global = true)]
    pub ws_url: Option<String>,

    /// Directory for session and notification files.
    #[arg(long, env = "TASKDECK_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Path to config file (default: `~/.config/taskdeck/config.toml`).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKDECK_LOG", global = true)]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/taskdeck.log`).
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// What to do.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Top-level commands.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Sign in. The password is read from `TASKDECK_PASSWORD` or stdin.
    Login {
        /// Account email.
        #[arg(long)]
        email: String,
    },
    /// Create an account and sign in.
    Register {
        /// Account email.
        #[arg(long)]
        email: String,
        /// Given name.
        #[arg(long)]
        first_name: String,
        /// Family name.
        #[arg(long)]
        last_name: String,
    },
    /// Sign out and forget the local session.
    Logout,
    /// Show the profile, or update it when any field is given.
    Profile {
        /// New given name.
        #[arg(long)]
        first_name: Option<String>,
        /// New family name.
        #[arg(long)]
        last_name: Option<String>,
        /// New email.
        #[arg(long)]
        email: Option<String>,
    },
    /// Project and task totals with the most recent entries.
    Dashboard,
    /// List the user directory (candidates for `--assignee`).
    Users,
    /// List projects, or change one.
    Projects {
        /// Mutation to run instead of listing.
        #[command(subcommand)]
        action: Option<ProjectCommand>,
    },
    /// Print a project's board.
    Board {
        /// Project id.
        project: String,
        /// Renumber every column to 0..n before printing.
        #[arg(long)]
        compact: bool,
    },
    /// Move a task onto a column or onto another task.
    Move {
        /// Task being moved.
        task: String,
        /// Column name (`todo`, `in-progress`, ...) or a task id.
        target: String,
    },
    /// Filtered task table.
    Tasks {
        /// Case-insensitive title search.
        #[arg(long)]
        search: Option<String>,
        /// Only this status.
        #[arg(long)]
        status: Option<TaskStatus>,
        /// Only this priority.
        #[arg(long)]
        priority: Option<TaskPriority>,
        /// Only this project.
        #[arg(long)]
        project: Option<String>,
    },
    /// Show or change a single task.
    Task {
        /// Operation.
        #[command(subcommand)]
        action: TaskCommand,
    },
    /// Stream push events until Ctrl-C.
    Watch {
        /// Project room to join.
        #[arg(long)]
        project: Option<String>,
    },
    /// Show the notification inbox.
    Notifications {
        /// Mark every entry read.
        #[arg(long, conflicts_with = "clear")]
        read_all: bool,
        /// Remove every entry.
        #[arg(long)]
        clear: bool,
    },
}

/// `projects` mutations.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ProjectCommand {
    /// Create a project.
    Create {
        /// Project name.
        name: String,
        /// Optional description.
        #[arg(long)]
        description: Option<String>,
        /// `#RRGGBB` color.
        #[arg(long)]
        color: Option<String>,
    },
    /// Edit a project.
    Update {
        /// Project id.
        id: String,
        /// New name.
        #[arg(long)]
        name: Option<String>,
        /// New description.
        #[arg(long)]
        description: Option<String>,
        /// New color.
        #[arg(long)]
        color: Option<String>,
    },
    /// Delete a project.
    Delete {
        /// Project id.
        id: String,
    },
}

/// `task` operations.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum TaskCommand {
    /// Print one task.
    Show {
        /// Task id.
        id: String,
    },
    /// Create a task.
    Create {
        /// Owning project id.
        project: String,
        /// Task title.
        title: String,
        /// Optional description.
        #[arg(long)]
        description: Option<String>,
        /// Initial column.
        #[arg(long)]
        status: Option<TaskStatus>,
        /// Priority.
        #[arg(long)]
        priority: Option<TaskPriority>,
        /// Assignee, by user id or email.
        #[arg(long)]
        assignee: Option<String>,
        /// Due date (`YYYY-MM-DD`).
        #[arg(long)]
        due: Option<NaiveDate>,
        /// Tag (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Edit a task.
    Update {
        /// Task id.
        id: String,
        /// New title.
        #[arg(long)]
        title: Option<String>,
        /// New description.
        #[arg(long)]
        description: Option<String>,
        /// New status.
        #[arg(long)]
        status: Option<TaskStatus>,
        /// New priority.
        #[arg(long)]
        priority: Option<TaskPriority>,
        /// New assignee, by user id or email.
        #[arg(long)]
        assignee: Option<String>,
        /// New due date (`YYYY-MM-DD`).
        #[arg(long)]
        due: Option<NaiveDate>,
        /// Mark completed (`true`) or reopen (`false`).
        #[arg(long)]
        completed: Option<bool>,
    },
    /// Delete a task.
    Delete {
        /// Task id.
        id: String,
    },
}

const fn nonzero(field: &'static str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        Err(ConfigError::ZeroCapacity(field))
    } else {
        Ok(value)
    }
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("taskdeck").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
