//! Command-line arguments and the validated run configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};
use gitsonar_core::{CommitCounting, GitSonarError, Result};

use crate::analysis::PollPolicy;
use crate::http::normalize_base_url;

const DEFAULT_OUTPUT: &str = "analise_sonar_e_github";
const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
const DEFAULT_CLONE_BASE_URL: &str = "https://github.com";
const DEFAULT_SONAR_URL: &str = "http://localhost:9000";
const DEFAULT_SCANNER_HOST_URL: &str = "http://sonarqube:9000";
const DEFAULT_WORKSPACE: &str = "github_repository";
const DEFAULT_SCANNER_SOURCES: &str = "./github_repository";
const DEFAULT_PROPERTIES_PATH: &str = "sonar-project.properties";
const DEFAULT_COMPOSE_COMMAND: &str = "docker-compose up --build";

/// Arguments for an evaluation run.
#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// GitHub organization or user whose repositories are evaluated.
    #[arg(long, env = "GITSONAR_ORG")]
    pub org: String,
    /// Evaluate only this repository.
    #[arg(long)]
    pub repo: Option<String>,
    /// Report file name; `.csv` is appended when missing.
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,
    /// Count project board cards per column.
    #[arg(long)]
    pub projects: bool,
    /// GitHub token.
    #[arg(long, env = "GIT_TOKEN", hide_env_values = true)]
    pub git_token: String,
    /// SonarQube token.
    #[arg(long, env = "SONAR_TOKEN", hide_env_values = true)]
    pub sonar_token: String,
    /// GitHub REST and GraphQL base URL.
    #[arg(long, env = "GITSONAR_GITHUB_API_URL", default_value = DEFAULT_GITHUB_API_URL)]
    pub github_api_url: String,
    /// Base URL repositories are cloned from.
    #[arg(long, default_value = DEFAULT_CLONE_BASE_URL)]
    pub clone_base_url: String,
    /// SonarQube URL used by this tool.
    #[arg(long, env = "GITSONAR_SONAR_URL", default_value = DEFAULT_SONAR_URL)]
    pub sonar_url: String,
    /// SonarQube URL as seen by the scanner container.
    #[arg(long, default_value = DEFAULT_SCANNER_HOST_URL)]
    pub sonar_scanner_host_url: String,
    /// Local directory repositories are cloned into.
    #[arg(long, default_value = DEFAULT_WORKSPACE)]
    pub workspace: PathBuf,
    /// Sources directory as seen by the scanner container.
    #[arg(long, default_value = DEFAULT_SCANNER_SOURCES)]
    pub scanner_sources: String,
    /// Where the scanner properties file is written.
    #[arg(long, default_value = DEFAULT_PROPERTIES_PATH)]
    pub properties_path: PathBuf,
    /// Command that runs the scanner and exits when it is done.
    #[arg(long, default_value = DEFAULT_COMPOSE_COMMAND)]
    pub compose_command: String,
    /// Seconds to wait for analysis results before giving up.
    #[arg(long, default_value_t = 600)]
    pub analysis_timeout_secs: u64,
    /// How commits are counted toward the pattern percentage.
    #[arg(long, value_enum, default_value_t = CountingArg::Legacy)]
    pub commit_counting: CountingArg,
    /// Log at debug level.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Command-line spelling of [`CommitCounting`].
#[derive(ValueEnum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum CountingArg {
    /// Seed the matching count with one and skip the oldest commit.
    Legacy,
    /// Count every commit once.
    Exact,
}

impl From<CountingArg> for CommitCounting {
    fn from(arg: CountingArg) -> Self {
        match arg {
            CountingArg::Legacy => CommitCounting::Legacy,
            CountingArg::Exact => CommitCounting::Exact,
        }
    }
}

/// Validated configuration, built once at start.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Organization or user.
    pub org: String,
    /// Single repository to evaluate instead of the whole organization.
    pub repository: Option<String>,
    /// Report path, always ending in `.csv`.
    pub output: PathBuf,
    /// Whether card counts are collected.
    pub include_projects: bool,
    /// GitHub token.
    pub git_token: String,
    /// SonarQube token.
    pub sonar_token: String,
    /// GitHub API base URL without a trailing slash.
    pub github_api_url: String,
    /// Clone base URL without a trailing slash.
    pub clone_base_url: String,
    /// SonarQube base URL without a trailing slash.
    pub sonar_url: String,
    /// SonarQube URL written for the scanner.
    pub scanner_host_url: String,
    /// Local clone directory.
    pub workspace: PathBuf,
    /// Sources directory written for the scanner.
    pub scanner_sources: String,
    /// Scanner properties file.
    pub properties_path: PathBuf,
    /// Scanner launch command line.
    pub compose_command: String,
    /// Wait policy for analysis results.
    pub poll: PollPolicy,
    /// Commit counting policy.
    pub counting: CommitCounting,
}

impl Config {
    /// Validate arguments into a configuration.
    pub fn from_args(args: RunArgs) -> Result<Self> {
        let org = required("org", &args.org)?;
        let git_token = required("GIT_TOKEN", &args.git_token)?;
        let sonar_token = required("SONAR_TOKEN", &args.sonar_token)?;
        let compose_command = required("compose command", &args.compose_command)?;
        if args.analysis_timeout_secs == 0 {
            return Err(GitSonarError::Config(
                "analysis timeout must be at least one second".to_string(),
            ));
        }
        let repository = match args.repo {
            Some(repo) => Some(required("repo", &repo)?),
            None => None,
        };
        Ok(Self {
            org,
            repository,
            output: csv_path(args.output),
            include_projects: args.projects,
            git_token,
            sonar_token,
            github_api_url: normalize_base_url(&args.github_api_url)?,
            clone_base_url: normalize_base_url(&args.clone_base_url)?,
            sonar_url: normalize_base_url(&args.sonar_url)?,
            scanner_host_url: normalize_base_url(&args.sonar_scanner_host_url)?,
            workspace: args.workspace,
            scanner_sources: args.scanner_sources,
            properties_path: args.properties_path,
            compose_command,
            poll: PollPolicy {
                timeout: Duration::from_secs(args.analysis_timeout_secs),
                ..PollPolicy::default()
            },
            counting: args.commit_counting.into(),
        })
    }
}

fn required(name: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(GitSonarError::Config(format!("{name} is required")));
    }
    Ok(trimmed.to_string())
}

fn csv_path(output: PathBuf) -> PathBuf {
    let is_csv = output
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        output
    } else {
        let mut name = output.into_os_string();
        name.push(".csv");
        PathBuf::from(name)
    }
}
