//! TrafficControl CLI entry point.

use std::sync::Arc;

use clap::Parser;
use trafficcontrol::cli::commands::{
    agent, backlog, config_cmd, project, proposal, report, start, status, stop, task,
};
use trafficcontrol::cli::{
    AgentCommands, BacklogCommands, Cli, Commands, ConfigCommands, ProjectCommands,
    ProposalCommands, TaskCommands,
};
use trafficcontrol::domain::models::Config;
use trafficcontrol::domain::ports::UsageLogStore;
use trafficcontrol::infrastructure::backlog::JsonlUsageLogStore;
use trafficcontrol::infrastructure::config::ConfigLoader;
use trafficcontrol::infrastructure::logging;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config: Config = match cli.config {
        Some(ref path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };

    // The daemon owns the tracing subscriber; one-shot commands print
    // their results directly.
    if matches!(cli.command, Commands::Start) {
        let _guard = logging::init(&config.log)?;
        return start::handle_start(config).await;
    }

    let format = cli.format;
    match cli.command {
        Commands::Start => unreachable!("handled above"),
        Commands::Stop => stop::handle_stop(&config)?,
        Commands::Status => status::handle_status(&config, format)?,
        Commands::Task(command) => {
            let repo = trafficcontrol::cli::commands::build_repository(&config);
            match command {
                TaskCommands::Add {
                    title,
                    description,
                    model,
                    priority,
                    confirmed,
                    project,
                    estimate,
                } => {
                    task::handle_add(
                        &repo,
                        format,
                        title,
                        description,
                        model,
                        priority,
                        confirmed,
                        project,
                        estimate,
                    )
                    .await?;
                }
                TaskCommands::List { status, limit } => {
                    task::handle_list(&repo, format, status, limit).await?;
                }
                TaskCommands::Cancel { task_id } => {
                    task::handle_cancel(&repo, format, task_id).await?;
                }
                TaskCommands::Update { task_id, priority, status, model, confirm } => {
                    task::handle_update(&repo, format, task_id, priority, status, model, confirm)
                        .await?;
                }
            }
        }
        Commands::Project(command) => {
            let repo = trafficcontrol::cli::commands::build_repository(&config);
            match command {
                ProjectCommands::List => project::handle_list(&repo, format).await?,
                ProjectCommands::Pause { project_id } => {
                    project::handle_set_paused(&repo, format, project_id, true).await?;
                }
                ProjectCommands::Resume { project_id } => {
                    project::handle_set_paused(&repo, format, project_id, false).await?;
                }
            }
        }
        Commands::Report { days } => {
            let usage_log: Arc<dyn UsageLogStore> = Arc::new(JsonlUsageLogStore::new(
                config.orchestrator.runtime_dir.join("usage.jsonl"),
            ));
            report::handle_report(&usage_log, format, days).await?;
        }
        Commands::Config(command) => match command {
            ConfigCommands::Show => config_cmd::handle_show(&config, format)?,
            ConfigCommands::Validate => config_cmd::handle_validate(&config)?,
        },
        Commands::Agent(command) => match command {
            AgentCommands::List => agent::handle_list(&config, format)?,
            AgentCommands::Capacity => agent::handle_capacity(&config, format)?,
        },
        Commands::Backlog(command) => match command {
            BacklogCommands::Summary => {
                let repo = trafficcontrol::cli::commands::build_repository(&config);
                backlog::handle_summary(&repo, format).await?;
            }
        },
        Commands::Proposal(command) => {
            let repo = trafficcontrol::cli::commands::build_repository(&config);
            match command {
                ProposalCommands::List => proposal::handle_list(&repo, format).await?,
                ProposalCommands::Approve { selector } => {
                    proposal::handle_approve(&repo, format, &selector).await?;
                }
                ProposalCommands::Reject { selector } => {
                    proposal::handle_reject(&repo, format, &selector).await?;
                }
            }
        }
    }
    Ok(())
}
