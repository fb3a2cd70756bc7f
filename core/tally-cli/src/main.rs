//! tally: command-line client for the Tally time tracking daemon.
//!
//! Every command is a single request to `tally-daemon` over its Unix socket.
//! The daemon owns the timer, the tray and the database; this binary only
//! renders what it gets back.
//!
//! ## Subcommands
//!
//! - `timer`: configure, start, pause, complete, cancel or inspect the countdown
//! - `tray`: inspect the tray projection and edit pinned projects
//! - `project`: register projects and read stats
//! - `sessions`: list running sessions
//! - `event`: inject system events (lock, unlock, tray toggle, quit)
//! - `health`: daemon liveness

mod daemon_client;
mod logging;
mod output;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use serde_json::{json, Value};
use tally_core::{EventOutcome, Project, ProjectStats, TimeSession, TimerState, TraySnapshot};
use tally_daemon_protocol::Method;

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Personal time tracker")]
#[command(version)]
struct Cli {
    /// Print raw JSON payloads instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Countdown timer bound to one project
    Timer {
        #[command(subcommand)]
        command: TimerCommand,
    },

    /// Tray projection and pinned projects
    Tray {
        #[command(subcommand)]
        command: TrayCommand,
    },

    /// Projects and their stats
    Project {
        #[command(subcommand)]
        command: ProjectCommand,
    },

    /// Time sessions
    Sessions {
        #[command(subcommand)]
        command: SessionsCommand,
    },

    /// Send a system event to the daemon
    Event {
        #[command(subcommand)]
        command: EventCommand,
    },

    /// Check that the daemon is alive
    Health,
}

#[derive(Subcommand)]
enum TimerCommand {
    /// Bind the timer to a project and set its length
    Configure {
        #[arg(value_name = "PROJECT")]
        project_id: String,

        #[arg(value_name = "MINUTES")]
        minutes: u32,
    },
    /// Start or resume the countdown
    Start,
    /// Pause the countdown, keeping the session open
    Pause,
    /// Finish early and save the session
    Complete,
    /// Discard the session
    Cancel,
    /// Show the current timer state
    Status,
}

#[derive(Subcommand)]
enum TrayCommand {
    /// Show the tray menu and pinned projects
    Show,
    /// Pin a project (unsaved until `tray save`)
    Pin {
        #[arg(value_name = "PROJECT")]
        project_id: String,
    },
    /// Unpin a project (unsaved until `tray save`)
    Unpin {
        #[arg(value_name = "PROJECT")]
        project_id: String,
    },
    /// Move a pinned project from one position to another
    Move { from: usize, to: usize },
    /// Persist pin edits
    Save,
    /// Discard pin edits
    Revert,
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Active,
    Paused,
    Completed,
    Archived,
}

impl StatusArg {
    fn as_str(self) -> &'static str {
        match self {
            StatusArg::Active => "active",
            StatusArg::Paused => "paused",
            StatusArg::Completed => "completed",
            StatusArg::Archived => "archived",
        }
    }
}

#[derive(Subcommand)]
enum ProjectCommand {
    /// Create or update a project
    Add {
        #[arg(value_name = "ID")]
        id: String,

        #[arg(value_name = "NAME")]
        name: String,

        #[arg(long, value_enum, default_value = "active")]
        status: StatusArg,

        #[arg(long)]
        color: Option<String>,
    },
    /// List projects
    List,
    /// Hours tracked per project
    Stats {
        #[arg(value_name = "PROJECT")]
        project_id: Option<String>,
    },
}

#[derive(Subcommand)]
enum SessionsCommand {
    /// List sessions that are still running
    Running,
}

#[derive(Subcommand)]
enum EventCommand {
    /// Screen locked: stop every running session
    Lock,
    /// Screen unlocked
    Unlock,
    /// Tray click on a project: stop it if running, start it otherwise
    Toggle {
        #[arg(value_name = "PROJECT")]
        project_id: String,
    },
    /// App quitting: stop every running session
    Quit,
}

#[derive(Deserialize)]
struct TrayView {
    snapshot: TraySnapshot,
    pinned_ids: Vec<String>,
    dirty: bool,
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(text) => println!("{}", text),
        Err(err) => {
            tracing::error!(error = %err, "tally command failed");
            eprintln!("error: {}", err);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<String, String> {
    let (method, params, render): (Method, Option<Value>, Render) = match cli.command {
        Commands::Timer { command } => match command {
            TimerCommand::Configure {
                project_id,
                minutes,
            } => (
                Method::TimerConfigure,
                Some(json!({ "project_id": project_id, "minutes": minutes })),
                Render::Timer,
            ),
            TimerCommand::Start => (Method::TimerStart, None, Render::Timer),
            TimerCommand::Pause => (Method::TimerPause, None, Render::Timer),
            TimerCommand::Complete => (Method::TimerComplete, None, Render::Timer),
            TimerCommand::Cancel => (Method::TimerCancel, None, Render::Timer),
            TimerCommand::Status => (Method::GetTimerState, None, Render::Timer),
        },
        Commands::Tray { command } => match command {
            TrayCommand::Show => (Method::GetTray, None, Render::Tray),
            TrayCommand::Pin { project_id } => (
                Method::TrayPin,
                Some(json!({ "project_id": project_id })),
                Render::Tray,
            ),
            TrayCommand::Unpin { project_id } => (
                Method::TrayUnpin,
                Some(json!({ "project_id": project_id })),
                Render::Tray,
            ),
            TrayCommand::Move { from, to } => (
                Method::TrayReorder,
                Some(json!({ "from": from, "to": to })),
                Render::Tray,
            ),
            TrayCommand::Save => (Method::TraySave, None, Render::Tray),
            TrayCommand::Revert => (Method::TrayRevert, None, Render::Tray),
        },
        Commands::Project { command } => match command {
            ProjectCommand::Add {
                id,
                name,
                status,
                color,
            } => (
                Method::UpsertProject,
                Some(json!({
                    "id": id,
                    "name": name,
                    "status": status.as_str(),
                    "color": color,
                })),
                Render::Project,
            ),
            ProjectCommand::List => (Method::ListProjects, None, Render::Projects),
            ProjectCommand::Stats { project_id } => {
                let render = if project_id.is_some() {
                    Render::Stat
                } else {
                    Render::Stats
                };
                (
                    Method::GetProjectStats,
                    Some(json!({ "project_id": project_id })),
                    render,
                )
            }
        },
        Commands::Sessions { command } => match command {
            SessionsCommand::Running => (Method::ListRunningSessions, None, Render::Running),
        },
        Commands::Event { command } => {
            let mut params = match command {
                EventCommand::Lock => json!({ "event": "screen_locked" }),
                EventCommand::Unlock => json!({ "event": "screen_unlocked" }),
                EventCommand::Toggle { project_id } => {
                    json!({ "event": "tray_project_toggled", "project_id": project_id })
                }
                EventCommand::Quit => json!({ "event": "quit" }),
            };
            params["recorded_at"] = json!(Utc::now().to_rfc3339());
            (Method::SystemEvent, Some(params), Render::Event)
        }
        Commands::Health => (Method::GetHealth, None, Render::Json),
    };

    let data = daemon_client::call(method, params)?;
    if cli.json {
        return pretty(&data);
    }
    render.apply(data)
}

enum Render {
    Timer,
    Tray,
    Project,
    Projects,
    Stat,
    Stats,
    Running,
    Event,
    Json,
}

impl Render {
    fn apply(self, data: Value) -> Result<String, String> {
        match self {
            Render::Timer => {
                let state: TimerState = output::decode(data, "timer")?;
                Ok(output::timer(&state))
            }
            Render::Tray => {
                let view: TrayView = output::decode(data, "tray")?;
                Ok(output::tray(&view.snapshot, &view.pinned_ids, view.dirty))
            }
            Render::Project => {
                let project: Project = output::decode(data, "project")?;
                Ok(output::projects(&[project]))
            }
            Render::Projects => {
                let projects: Vec<Project> = output::decode(data, "projects")?;
                Ok(output::projects(&projects))
            }
            Render::Stat => {
                let stats: ProjectStats = output::decode(data, "stats")?;
                Ok(output::stats(&[stats]))
            }
            Render::Stats => {
                let stats: Vec<ProjectStats> = output::decode(data, "stats")?;
                Ok(output::stats(&stats))
            }
            Render::Running => {
                let sessions: Vec<TimeSession> = output::decode(data, "sessions")?;
                Ok(output::running(&sessions, Utc::now()))
            }
            Render::Event => {
                let outcome: EventOutcome = output::decode(data, "event outcome")?;
                Ok(output::event(&outcome))
            }
            Render::Json => pretty(&data),
        }
    }
}

fn pretty(data: &Value) -> Result<String, String> {
    serde_json::to_string_pretty(data).map_err(|err| format!("Failed to format response: {}", err))
}
