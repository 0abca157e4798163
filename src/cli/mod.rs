//! CLI interface for the `tc` binary.

pub mod commands;
pub mod output;
pub mod types;

pub use types::{
    AgentCommands, BacklogCommands, Cli, Commands, ConfigCommands, OutputFormat, ProjectCommands,
    ProposalCommands, TaskCommands,
};
