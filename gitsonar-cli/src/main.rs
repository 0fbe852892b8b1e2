#![deny(missing_docs)]
//! gitsonar command-line interface.
//!
//! Evaluates every repository of a GitHub organization (commit hygiene,
//! branching, pull requests, project boards and SonarQube findings) and
//! writes one CSV row per repository.

mod analysis;
mod config;
mod evaluator;
mod github;
mod http;
mod sonar;
mod source;

use clap::Parser;
#[cfg(not(test))]
use config::Config;
use config::RunArgs;
#[cfg(not(test))]
use evaluator::Evaluator;

pub(crate) type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[cfg_attr(test, allow(dead_code))]
const USER_AGENT: &str = concat!("gitsonar/", env!("CARGO_PKG_VERSION"));

#[derive(Parser)]
#[command(
    name = "gitsonar",
    version,
    about = "Collect GitHub and SonarQube quality metrics into a CSV report"
)]
struct Cli {
    #[command(flatten)]
    run: RunArgs,
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> CliResult<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let default_level = if cli.run.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
    let config = Config::from_args(cli.run)?;

    tokio::select! {
        result = run(config) => result,
        _ = tokio::signal::ctrl_c() => {
            log::warn!("interrupted; rows written so far are kept");
            Err("interrupted".into())
        }
    }
}

#[cfg(test)]
fn main() {}

#[cfg(not(test))]
async fn run(config: Config) -> CliResult<()> {
    use analysis::{AnalysisCollaborators, DriverSettings, StaticAnalysisDriver, TokioSleeper};
    use evaluator::EvaluatorSettings;
    use github::GitHubClient;
    use gitsonar_core::{CsvReport, ReportLayout, StdFileSystem};
    use sonar::SonarClient;
    use source::{ComposeRunner, GitSourceFetcher};

    let report = CsvReport::create(
        StdFileSystem::new(),
        &config.output,
        ReportLayout {
            include_cards: config.include_projects,
        },
    )?;
    let github = GitHubClient::new(&config.github_api_url, &config.git_token, USER_AGENT)?;
    let collaborators = AnalysisCollaborators {
        sonar: Box::new(SonarClient::new(&config.sonar_url, &config.sonar_token)?),
        fetcher: Box::new(GitSourceFetcher::new(
            StdFileSystem::new(),
            &config.workspace,
            Some(config.git_token.clone()),
        )),
        runner: Box::new(ComposeRunner::from_command_line(&config.compose_command, ".")?),
        sleeper: Box::new(TokioSleeper),
        fs: Box::new(StdFileSystem::new()),
    };
    let driver = StaticAnalysisDriver::new(
        collaborators,
        DriverSettings {
            properties_path: config.properties_path.clone(),
            scanner_sources: config.scanner_sources.clone(),
            scanner_host_url: config.scanner_host_url.clone(),
            token: config.sonar_token.clone(),
            poll: config.poll,
        },
    );
    let mut evaluator = Evaluator::new(
        github,
        driver,
        EvaluatorSettings {
            org: config.org.clone(),
            counting: config.counting,
            include_boards: config.include_projects,
            clone_base_url: config.clone_base_url.clone(),
        },
    );

    evaluator.load_boards().await?;
    let repositories = match &config.repository {
        Some(repo) => vec![repo.clone()],
        None => evaluator.list_repositories().await?,
    };
    if repositories.is_empty() {
        log::warn!("no repositories found for {}", config.org);
        return Ok(());
    }

    let summary = evaluator.evaluate_all(&repositories, &report).await?;
    log::info!(
        "wrote {} row(s) to {} ({} incomplete)",
        summary.written,
        report.path().display(),
        summary.incomplete
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Cli;
    use clap::{CommandFactory, Parser};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cli_parses_flattened_run_args() {
        let cli = Cli::try_parse_from([
            "gitsonar",
            "--org",
            "acme",
            "--git-token",
            "gh",
            "--sonar-token",
            "squ",
            "--projects",
            "-v",
        ])
        .expect("parse");
        assert_eq!(cli.run.org, "acme");
        assert!(cli.run.projects);
        assert!(cli.run.verbose);
    }
}
