use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pr_monitor::clock::SystemClock;
use pr_monitor::git::GitCli;
use pr_monitor::github::GhCli;
use pr_monitor::monitor::{Monitor, MonitorConfig, MonitorOptions};
use pr_monitor::persistence::{state_path, try_load_record};
use pr_monitor::types::PrNumber;

/// Wait for a pull request to pass CI and AI review, rebasing and
/// re-requesting reviews as needed.
#[derive(Debug, Parser)]
#[command(name = "pr-monitor", version)]
struct Cli {
    /// Pull request number (`123` or `#123`).
    #[arg(value_parser = parse_pr)]
    pr: PrNumber,

    /// Overall timeout in minutes.
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Return as soon as review comments appear.
    #[arg(long)]
    early_exit: bool,

    /// Print the last recorded state for the PR instead of monitoring.
    #[arg(long)]
    result: bool,

    /// Directory for state files. Defaults to $PR_MONITOR_STATE_DIR or a temp dir.
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Repository (`owner/name`) passed to `gh`. Defaults to the current checkout.
    #[arg(long)]
    repo: Option<String>,
}

fn parse_pr(s: &str) -> Result<PrNumber, String> {
    PrNumber::parse(s).ok_or_else(|| format!("not a PR number: {}", s))
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pr_monitor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(Cli::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "pr-monitor failed");
            ExitCode::from(2)
        }
    }
}

/// Returns whether the PR (or the recorded run) succeeded.
fn run(cli: Cli) -> anyhow::Result<bool> {
    let mut config = MonitorConfig::from_env();
    if let Some(dir) = cli.state_dir {
        config = config.with_state_dir(dir);
    }

    if cli.result {
        let path = state_path(&config.state_dir, cli.pr);
        let record = try_load_record(&path)
            .with_context(|| format!("reading {}", path.display()))?
            .with_context(|| format!("no monitor state recorded for PR {}", cli.pr))?;
        println!("{}", serde_json::to_string_pretty(&record)?);
        if !record.status.is_terminal() {
            tracing::info!(pr = %cli.pr, iteration = record.poll_iteration, "monitor has not finished");
        }
        return Ok(record.result.is_none_or(|r| r.success));
    }

    let workdir = std::env::current_dir().context("reading current directory")?;
    let mut host = GhCli::new().with_workdir(&workdir);
    if let Some(repo) = cli.repo {
        host = host.with_repo(repo);
    }
    let repo = GitCli::new(&workdir);
    let options = MonitorOptions::new(cli.pr, cli.timeout, cli.early_exit);

    let result = Monitor::new(&host, &repo, &SystemClock, config, options).run();
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.success)
}
