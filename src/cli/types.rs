//! CLI type definitions.
//!
//! Clap command structures for the `tc` binary.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use uuid::Uuid;

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "tc")]
#[command(about = "TrafficControl - autonomous orchestrator for AI coding agents", long_about = None)]
#[command(version, disable_version_flag = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Print version
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    pub version: Option<bool>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Path to a configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the orchestrator daemon
    Start,

    /// Stop a running orchestrator gracefully
    Stop,

    /// Show orchestrator status
    Status,

    /// Task backlog commands
    #[command(subcommand)]
    Task(TaskCommands),

    /// Project commands
    #[command(subcommand)]
    Project(ProjectCommands),

    /// Spend and productivity report
    Report {
        /// Days of usage history to include
        #[arg(long, default_value = "7")]
        days: i64,
    },

    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Agent session commands
    #[command(subcommand)]
    Agent(AgentCommands),

    /// Backlog aggregate commands
    #[command(subcommand)]
    Backlog(BacklogCommands),

    /// Approval proposal commands
    #[command(subcommand)]
    Proposal(ProposalCommands),
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Add a task to the backlog
    Add {
        /// Task title
        title: String,

        /// Longer description
        #[arg(short, long, default_value = "")]
        description: String,

        /// Model tier to run the task on
        #[arg(short, long, default_value = "sonnet")]
        model: String,

        /// Priority (0-10, higher = more urgent)
        #[arg(short, long, default_value = "5")]
        priority: u8,

        /// Mark the priority as human-confirmed
        #[arg(long)]
        confirmed: bool,

        /// Project the task belongs to
        #[arg(long)]
        project: Option<Uuid>,

        /// Token estimate for cost projection
        #[arg(long)]
        estimate: Option<u64>,
    },

    /// List backlog tasks
    List {
        /// Filter by status
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum number of tasks to display
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Cancel a task
    Cancel {
        /// Task ID
        task_id: Uuid,
    },

    /// Update a task
    Update {
        /// Task ID
        task_id: Uuid,

        /// New priority (0-10)
        #[arg(long)]
        priority: Option<u8>,

        /// New status
        #[arg(long)]
        status: Option<String>,

        /// New model tier
        #[arg(long)]
        model: Option<String>,

        /// Confirm the task's priority
        #[arg(long)]
        confirm: bool,
    },
}

#[derive(Subcommand)]
pub enum ProjectCommands {
    /// List projects
    List,

    /// Pause dispatch for a project
    Pause {
        /// Project ID
        project_id: Uuid,
    },

    /// Resume dispatch for a project
    Resume {
        /// Project ID
        project_id: Uuid,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Validate the configuration and exit
    Validate,
}

#[derive(Subcommand)]
pub enum AgentCommands {
    /// List active agent sessions
    List,

    /// Show per-model capacity
    Capacity,
}

#[derive(Subcommand)]
pub enum BacklogCommands {
    /// Aggregate backlog counts
    Summary,
}

#[derive(Subcommand)]
pub enum ProposalCommands {
    /// List approval proposals
    List,

    /// Approve a pending proposal by index, or all of them
    Approve {
        /// Proposal index (1-based) or "all"
        selector: String,
    },

    /// Reject a pending proposal: <idx>:<reason>
    Reject {
        /// Proposal index and reason, e.g. "2:not this sprint"
        selector: String,
    },
}
