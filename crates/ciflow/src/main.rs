mod commands;
mod github;
mod monitor;
mod platforms;

use ciflow_cloud::{DEFAULT_MANAGER_USER, PlatformKind};
use clap::{Parser, Subcommand};
use github::GitHubClient;
use platforms::Platforms;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ciflow")]
#[command(about = "Manage the cloud instances of CI workflow runs", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// GitHub token used to deregister runners and query workflow runs
    #[arg(long, env = "GITHUB_TOKEN", global = true, hide_env_values = true, default_value = "")]
    token: String,

    /// Repository (owner/name) the runners are registered to
    #[arg(long, env = "GITHUB_REPOSITORY", global = true)]
    repo: Option<String>,

    /// GitHub REST API base URL
    #[arg(long, env = "GITHUB_API_URL", global = true, default_value = github::DEFAULT_API_URL)]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the tag filter selecting a workflow's instances
    Filter {
        /// Platform (all, aws, azure)
        platform: PlatformKind,
        /// Workflow tag
        tag: String,
    },
    /// Print the tags to apply to a workflow manager
    #[command(name = "manager-tags")]
    ManagerTags {
        /// Platform (all, aws, azure)
        platform: PlatformKind,
        /// Workflow tag
        tag: String,
        /// Commit the workflow runs for
        #[arg(long, env = "GITHUB_SHA")]
        sha: String,
    },
    /// Print whether the workflow manager exists
    #[command(name = "manager-exists")]
    ManagerExists {
        /// Platform (all, aws, azure)
        platform: PlatformKind,
        /// Workflow tag
        tag: String,
    },
    /// List every instance of a workflow as JSON
    Instances {
        /// Platform (all, aws, azure)
        platform: PlatformKind,
        /// Workflow tag
        tag: String,
    },
    /// List every CI instance across all workflows as JSON
    #[command(name = "ci-instances")]
    CiInstances {
        /// Platform (all, aws, azure)
        platform: PlatformKind,
    },
    /// Print the public IP of the workflow manager
    #[command(name = "manager-ip")]
    ManagerIp {
        /// Platform (all, aws, azure)
        platform: PlatformKind,
        /// Workflow tag
        tag: String,
    },
    /// Print the SSH destination of the workflow manager
    #[command(name = "manager-hostname")]
    ManagerHostname {
        /// Platform (all, aws, azure)
        platform: PlatformKind,
        /// Workflow tag
        tag: String,
        /// SSH user
        #[arg(long, default_value = DEFAULT_MANAGER_USER)]
        user: String,
    },
    /// Print the id the workflow's runners are registered under
    #[command(name = "workflow-id")]
    WorkflowId {
        /// Platform (all, aws, azure)
        platform: PlatformKind,
        /// Workflow tag
        tag: String,
    },
    /// Describe the workflow manager
    #[command(name = "manager-metadata")]
    ManagerMetadata {
        /// Platform (all, aws, azure)
        platform: PlatformKind,
        /// Workflow tag
        tag: String,
    },
    /// Stop, start or terminate every instance of a workflow
    #[command(name = "change-state")]
    ChangeState {
        /// Platform (all, aws, azure)
        platform: PlatformKind,
        /// Workflow tag
        tag: String,
        /// stop, start or terminate
        transition: String,
        /// Log what would happen without changing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Stop every instance of a workflow
    Stop {
        /// Platform (all, aws, azure)
        platform: PlatformKind,
        /// Workflow tag
        tag: String,
    },
    /// Terminate every instance of a workflow
    Terminate {
        /// Platform (all, aws, azure)
        platform: PlatformKind,
        /// Workflow tag
        tag: String,
    },
    /// Watch a workflow run and tear its instances down when it finishes
    Monitor {
        /// Platform (all, aws, azure)
        platform: PlatformKind,
        /// Workflow tag
        tag: String,
        /// Workflow run id (defaults to the tag)
        #[arg(long)]
        run_id: Option<String>,
        /// Seconds between polls
        #[arg(long, default_value_t = monitor::POLLING_INTERVAL_SECS)]
        interval: u64,
    },
    /// Print version information
    Version,
}

impl Commands {
    fn platform(&self) -> Option<PlatformKind> {
        match self {
            Commands::Filter { platform, .. }
            | Commands::ManagerTags { platform, .. }
            | Commands::ManagerExists { platform, .. }
            | Commands::Instances { platform, .. }
            | Commands::CiInstances { platform }
            | Commands::ManagerIp { platform, .. }
            | Commands::ManagerHostname { platform, .. }
            | Commands::WorkflowId { platform, .. }
            | Commands::ManagerMetadata { platform, .. }
            | Commands::ChangeState { platform, .. }
            | Commands::Stop { platform, .. }
            | Commands::Terminate { platform, .. }
            | Commands::Monitor { platform, .. } => Some(*platform),
            Commands::Version => None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays parseable by CI scripts
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let Some(kind) = cli.command.platform() else {
        println!("ciflow {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    };

    let github = Arc::new(GitHubClient::new(&cli.api_url, cli.repo.clone())?);
    let platforms = Platforms::build(kind, github.clone())?;
    let token = cli.token.as_str();

    match cli.command {
        Commands::Filter { tag, .. } => commands::query::filter(&platforms, &tag),
        Commands::ManagerTags { tag, sha, .. } => {
            commands::query::manager_tags(&platforms, &sha, &tag)?;
        }
        Commands::ManagerExists { tag, .. } => {
            commands::query::manager_exists(&platforms, &tag).await?;
        }
        Commands::Instances { tag, .. } => {
            commands::query::instances(&platforms, Some(&tag)).await?;
        }
        Commands::CiInstances { .. } => {
            commands::query::instances(&platforms, None).await?;
        }
        Commands::ManagerIp { tag, .. } => {
            println!("{}", platforms.manager_ip(&tag).await?);
        }
        Commands::ManagerHostname { tag, user, .. } => {
            println!("{}", platforms.manager_hostname(&tag, &user).await?);
        }
        Commands::WorkflowId { tag, .. } => commands::query::workflow_id(&platforms, &tag),
        Commands::ManagerMetadata { tag, .. } => {
            println!("{}", platforms.manager_metadata(&tag).await?);
        }
        Commands::ChangeState {
            tag,
            transition,
            dry_run,
            ..
        } => {
            commands::state::handle(&platforms, token, &tag, &transition, dry_run).await?;
        }
        Commands::Stop { tag, .. } => {
            commands::state::handle(&platforms, token, &tag, "stop", false).await?;
        }
        Commands::Terminate { tag, .. } => {
            commands::state::handle(&platforms, token, &tag, "terminate", false).await?;
        }
        Commands::Monitor {
            tag,
            run_id,
            interval,
            ..
        } => {
            let run_id = run_id.unwrap_or_else(|| tag.clone());
            commands::monitor::handle(&platforms, github.as_ref(), token, &tag, &run_id, interval)
                .await?;
        }
        Commands::Version => unreachable!("Version is handled before platform setup"),
    }

    Ok(())
}
