pub mod auth;
pub mod cache;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod protocol;
pub mod types;
pub mod workflow;

#[cfg(test)]
mod testutil;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::cli::Client;
use crate::config::Config;
use crate::protocol::CommitParams;
use crate::types::RepoId;
use crate::workflow::{CommitResult, Target, Workflow};

#[derive(Parser)]
#[command(
    name = "gitpilot",
    about = "Commit automation for local and remote Git repositories"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon on the Unix socket
    Daemon,

    /// Serve JSON-RPC on stdin/stdout
    Stdio,

    /// Serve HTTP (JSON-RPC, commit endpoint, SSE, metrics) on HTTP_HOST:HTTP_PORT
    Http,

    /// Commit every change in a repository
    Commit {
        /// Local repository path (defaults to DEFAULT_REPO_PATH)
        #[arg(long, conflicts_with = "url")]
        path: Option<PathBuf>,

        /// Remote repository URL, cloned into the workspace
        #[arg(long)]
        url: Option<String>,

        /// Push the new commit to the first remote
        #[arg(long)]
        push: bool,

        /// Run in this process instead of asking the daemon
        #[arg(long)]
        direct: bool,
    },

    /// Show handle cache statistics
    Stats,

    /// Drop every cached repository handle
    ClearCache,

    /// Remove one cloned workspace
    Cleanup {
        /// Repository id (16 hex characters)
        repo_id: String,
    },

    /// Remove every cloned workspace
    CleanupAll,

    /// Show daemon status
    Status,

    /// Stop the running daemon
    Stop,

    /// Check dependencies
    Doctor,
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    env_logger::Builder::new()
        .filter_level(config.log_level)
        .parse_default_env()
        .init();

    let result = match cli.command {
        Commands::Daemon => cmd_daemon(config),
        Commands::Stdio => cmd_stdio(config),
        Commands::Http => cmd_http(config),
        Commands::Commit {
            path,
            url,
            push,
            direct,
        } => cmd_commit(config, path, url, push, direct),
        Commands::Stats => cmd_stats(&config),
        Commands::ClearCache => cmd_clear_cache(&config),
        Commands::Cleanup { repo_id } => cmd_cleanup(&config, &repo_id),
        Commands::CleanupAll => cmd_cleanup_all(&config),
        Commands::Status => cmd_status(&config),
        Commands::Stop => cmd_stop(&config),
        Commands::Doctor => cmd_doctor(&config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        if e.to_string().contains("not running") {
            eprintln!();
            eprintln!("Hint: Start the daemon with: gitpilot daemon");
        }
        std::process::exit(1);
    }
}

/// Connect to the daemon, sending the first configured token if any.
fn connect(config: &Config) -> Result<Client, Box<dyn std::error::Error>> {
    Ok(Client::connect()?.with_auth(config.auth.tokens.first().cloned()))
}

fn cmd_daemon(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    daemon::start(config)?;
    Ok(())
}

fn cmd_stdio(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    daemon::run_stdio(config)?;
    Ok(())
}

fn cmd_http(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    daemon::run_http(config)?;
    Ok(())
}

fn cmd_commit(
    config: Config,
    path: Option<PathBuf>,
    url: Option<String>,
    push: bool,
    direct: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = if direct {
        let target = match url {
            Some(url) => Target::Remote(url),
            None => Target::Local(path.unwrap_or_else(|| config.default_repo_path.clone())),
        };
        let manager = cache::RepositoryManager::new(
            config.workspace_paths(),
            config.cache_ttl,
            config.max_cache_entries,
        );
        let credentials = config.default_credentials();
        Workflow::new(&config).commit_and_push(&manager, &target, credentials.as_ref(), push)
    } else {
        let mut client = connect(&config)?;
        client.commit(CommitParams {
            repository_path: path.map(|p| p.display().to_string()),
            repo_url: url,
            credentials: None,
            confirm_push: push,
        })?
    };

    print_commit(&result);
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

fn print_commit(result: &CommitResult) {
    println!("{}", result.message);
    if let Some(hash) = &result.commit_hash {
        println!("  Commit:    {}", &hash[..hash.len().min(12)]);
        println!("  Files:     {}", result.files_changed);
        println!("  Pushed:    {}", if result.pushed { "yes" } else { "no" });
        println!(
            "  Changelog: {}",
            if result.changelog_updated {
                "updated"
            } else {
                "not updated"
            }
        );
    }
    if let Some(message) = &result.commit_message {
        println!();
        for line in message.lines() {
            println!("    {}", line);
        }
    }
}

fn cmd_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = connect(config)?;
    let stats = client.cache_stats()?;

    println!("Repository cache");
    println!("  Entries:  {}/{}", stats.size, stats.max_size);
    println!("  TTL:      {}", format_duration(stats.ttl_secs));
    println!("  Accesses: {}", stats.total_access_count);
    Ok(())
}

fn cmd_clear_cache(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = connect(config)?;
    let result = client.clear_cache()?;
    println!("Cleared {} cached handle(s)", result.cleared);
    Ok(())
}

fn cmd_cleanup(config: &Config, repo_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    // Validate id format first
    let _: RepoId = repo_id
        .parse()
        .map_err(|e| format!("Invalid repository id: {}", e))?;

    let mut client = connect(config)?;
    let result = client.cleanup_workspace(repo_id)?;
    if result.removed {
        println!("Removed workspace {}", result.repo_id);
    } else {
        println!("No workspace for {}", result.repo_id);
    }
    Ok(())
}

fn cmd_cleanup_all(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = connect(config)?;
    let result = client.cleanup_all()?;
    println!("Removed {} workspace(s)", result.removed);
    Ok(())
}

fn cmd_status(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = connect(config)?;
    let status = client.status()?;

    println!("gitpilot daemon status");
    println!(
        "  Running:   {}",
        if status.running { "yes" } else { "no" }
    );
    println!("  Version:   {} (pid {})", status.version, status.pid);
    println!("  Workspace: {}", status.workspace);
    println!("  Uptime:    {}", format_duration(status.uptime_secs));
    println!(
        "  Cache:     {}/{} handles",
        status.cache.size, status.cache.max_size
    );
    println!(
        "  Requests:  {} ({} failed)",
        status.metrics.requests, status.metrics.errors
    );
    println!(
        "  Commits:   {} ({} pushed)",
        status.metrics.commits, status.metrics.pushes
    );

    Ok(())
}

fn cmd_stop(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = connect(config)?;
    client.stop()?;
    println!("Daemon stopped");
    Ok(())
}

fn cmd_doctor(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("gitpilot System Check\n");

    let git_ok = cache::git_available();
    println!(
        "[{}] git: {}",
        if git_ok { "OK" } else { "FAIL" },
        if git_ok { "available" } else { "not found" }
    );

    let workspace = config.workspace_paths();
    let workspace_ok = workspace.root().exists();
    println!(
        "[{}] Workspace: {}",
        if workspace_ok { "OK" } else { "INFO" },
        workspace.root().display()
    );

    match &config.ssh_key_path {
        Some(key) => println!("[OK] SSH key: {}", key.display()),
        None => println!("[INFO] SSH key: not configured"),
    }

    let ai_ok = !config.ai.enabled || config.ai.api_key.is_some();
    println!(
        "[{}] AI messages: {}",
        if ai_ok { "OK" } else { "FAIL" },
        match (config.ai.enabled, config.ai.api_key.is_some()) {
            (false, _) => "disabled",
            (true, true) => "enabled",
            (true, false) => "enabled but OPENAI_API_KEY is not set",
        }
    );

    let daemon_running = daemon::is_daemon_running();
    println!(
        "[{}] Daemon: {}",
        if daemon_running { "OK" } else { "INFO" },
        if daemon_running {
            "running"
        } else {
            "not running"
        }
    );

    if !git_ok || !ai_ok {
        std::process::exit(1);
    }

    Ok(())
}

fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}
