//! Per-repository evaluation and the batch loop.

use gitsonar_core::{
    CommitCounting, CsvReport, EvaluationRecord, FileSystem, ProjectBoard, Result,
    cards_or_default, classify_commits, follows_git_flow, reportable_languages,
};

use crate::analysis::{AnalysisTarget, StaticAnalysis};
use crate::github::GitHubApi;
use crate::source::SourceRequest;

/// Settings that shape an evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluatorSettings {
    /// Organization (or user) that owns the repositories.
    pub org: String,
    /// Commit counting policy.
    pub counting: CommitCounting,
    /// Whether project board card counts are collected.
    pub include_boards: bool,
    /// Base URL clone URLs are built from.
    pub clone_base_url: String,
}

/// Outcome of a batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Rows written.
    pub written: usize,
    /// Rows with at least one unavailable field.
    pub incomplete: usize,
}

/// Builds evaluation records from GitHub data and static analysis.
pub struct Evaluator<G, A> {
    github: G,
    analysis: A,
    settings: EvaluatorSettings,
    boards: Option<Vec<ProjectBoard>>,
}

impl<G: GitHubApi, A: StaticAnalysis> Evaluator<G, A> {
    /// Create an evaluator; boards are not loaded until [`Evaluator::load_boards`].
    pub fn new(github: G, analysis: A, settings: EvaluatorSettings) -> Self {
        Self {
            github,
            analysis,
            settings,
            boards: None,
        }
    }

    /// Fetch the organization's project boards once for the whole batch.
    ///
    /// A non-fatal failure leaves the boards unloaded; card counts are then
    /// written as unavailable.
    pub async fn load_boards(&mut self) -> Result<()> {
        if !self.settings.include_boards {
            return Ok(());
        }
        match self.github.project_boards(&self.settings.org).await {
            Ok(boards) => {
                log::info!("loaded {} project board(s) for {}", boards.len(), self.settings.org);
                self.boards = Some(boards);
                Ok(())
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                log::warn!("project boards unavailable: {err}");
                Ok(())
            }
        }
    }

    /// Names of the organization's repositories.
    pub async fn list_repositories(&self) -> Result<Vec<String>> {
        let repositories = self.github.list_repositories(&self.settings.org).await?;
        log::info!(
            "found {} repositories for {}",
            repositories.len(),
            self.settings.org
        );
        Ok(repositories)
    }

    /// Evaluate one repository.
    ///
    /// Only fatal errors are returned; anything else leaves the affected fields
    /// empty and is listed in [`EvaluationRecord::errors`].
    pub async fn evaluate(&self, repo: &str) -> Result<EvaluationRecord> {
        let org = self.settings.org.as_str();
        let mut record = EvaluationRecord::new(repo);

        let languages = settle(
            &mut record.errors,
            "languages",
            self.github.languages(org, repo).await,
        )?;
        record.languages = languages.map(reportable_languages);

        record.pull_requests = settle(
            &mut record.errors,
            "pull requests",
            self.github.pull_request_count(org, repo).await,
        )?;

        let branches = settle(
            &mut record.errors,
            "branches",
            self.github.branch_names(org, repo).await,
        )?;
        record.git_flow = branches.map(|names| follows_git_flow(&names));

        let messages = settle(
            &mut record.errors,
            "commits",
            self.github.commit_messages(org, repo).await,
        )?;
        if let Some(messages) = messages {
            let stats = classify_commits(&messages, self.settings.counting);
            record.commits = Some(messages.len() as u64);
            record.commit_pattern_percentage = Some(stats.pattern_percentage);
            record.commit_type_percentages = Some(stats.per_type_percentage);
        }

        if self.settings.include_boards {
            match &self.boards {
                Some(boards) => record.cards = Some(cards_or_default(repo, boards)),
                None => record.errors.push("cards: project boards unavailable".to_string()),
            }
        }

        let branch = settle(
            &mut record.errors,
            "default branch",
            self.github.default_branch(org, repo).await,
        )?
        .flatten();
        let target = AnalysisTarget {
            project_key: repo.to_string(),
            source: SourceRequest {
                repository: repo.to_string(),
                clone_url: format!("{}/{org}/{repo}", self.settings.clone_base_url),
                branch,
            },
        };
        record.analysis = settle(
            &mut record.errors,
            "static analysis",
            self.analysis.analyze(&target).await,
        )?;

        Ok(record)
    }

    /// Evaluate `repositories` in order, appending one row per repository.
    pub async fn evaluate_all<F: FileSystem>(
        &self,
        repositories: &[String],
        report: &CsvReport<F>,
    ) -> Result<BatchSummary> {
        let mut summary = BatchSummary::default();
        for (index, repo) in repositories.iter().enumerate() {
            log::info!("evaluating {repo} ({}/{})", index + 1, repositories.len());
            let record = self.evaluate(repo).await?;
            if !record.errors.is_empty() {
                summary.incomplete += 1;
                log::warn!("{repo}: {} field group(s) unavailable", record.errors.len());
            }
            report.append(&record)?;
            summary.written += 1;
        }
        Ok(summary)
    }
}

/// Keep a successful value, record a non-fatal error, propagate a fatal one.
fn settle<T>(errors: &mut Vec<String>, field: &str, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            log::warn!("{field}: {err}");
            errors.push(format!("{field}: {err}"));
            Ok(None)
        }
    }
}
