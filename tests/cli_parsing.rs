//! CLI surface parsing tests.

use clap::Parser;
use trafficcontrol::cli::{
    AgentCommands, Cli, Commands, ConfigCommands, OutputFormat, ProposalCommands, TaskCommands,
};

#[test]
fn test_start_with_config_flag() {
    let cli = Cli::parse_from(["tc", "start", "--config", "/tmp/tc.yaml"]);
    assert!(matches!(cli.command, Commands::Start));
    assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/tmp/tc.yaml")));
}

#[test]
fn test_global_format_flag() {
    let cli = Cli::parse_from(["tc", "status", "--format", "json"]);
    assert!(matches!(cli.command, Commands::Status));
    assert_eq!(cli.format, OutputFormat::Json);

    let cli = Cli::parse_from(["tc", "status"]);
    assert_eq!(cli.format, OutputFormat::Text);
}

#[test]
fn test_task_add_arguments() {
    let cli = Cli::parse_from([
        "tc", "task", "add", "fix the flaky test", "--model", "opus", "--priority", "8",
        "--confirmed", "--estimate", "30000",
    ]);
    match cli.command {
        Commands::Task(TaskCommands::Add { title, model, priority, confirmed, estimate, .. }) => {
            assert_eq!(title, "fix the flaky test");
            assert_eq!(model, "opus");
            assert_eq!(priority, 8);
            assert!(confirmed);
            assert_eq!(estimate, Some(30_000));
        }
        _ => panic!("expected task add"),
    }
}

#[test]
fn test_task_list_defaults() {
    let cli = Cli::parse_from(["tc", "task", "list"]);
    match cli.command {
        Commands::Task(TaskCommands::List { status, limit }) => {
            assert!(status.is_none());
            assert_eq!(limit, 50);
        }
        _ => panic!("expected task list"),
    }
}

#[test]
fn test_report_days() {
    let cli = Cli::parse_from(["tc", "report", "--days", "30"]);
    match cli.command {
        Commands::Report { days } => assert_eq!(days, 30),
        _ => panic!("expected report"),
    }
}

#[test]
fn test_proposal_selectors() {
    let cli = Cli::parse_from(["tc", "proposal", "approve", "all"]);
    match cli.command {
        Commands::Proposal(ProposalCommands::Approve { selector }) => assert_eq!(selector, "all"),
        _ => panic!("expected proposal approve"),
    }

    let cli = Cli::parse_from(["tc", "proposal", "reject", "2:not this sprint"]);
    match cli.command {
        Commands::Proposal(ProposalCommands::Reject { selector }) => {
            assert_eq!(selector, "2:not this sprint");
        }
        _ => panic!("expected proposal reject"),
    }
}

#[test]
fn test_agent_and_config_subcommands() {
    assert!(matches!(
        Cli::parse_from(["tc", "agent", "capacity"]).command,
        Commands::Agent(AgentCommands::Capacity)
    ));
    assert!(matches!(
        Cli::parse_from(["tc", "config", "validate"]).command,
        Commands::Config(ConfigCommands::Validate)
    ));
}

#[test]
fn test_invalid_subcommand_rejected() {
    assert!(Cli::try_parse_from(["tc", "launch"]).is_err());
    assert!(Cli::try_parse_from(["tc"]).is_err());
}
