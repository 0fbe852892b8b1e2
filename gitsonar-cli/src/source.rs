//! Source checkout and scanner launch, backed by local processes.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use gitsonar_core::{FileSystem, GitSonarError, Result};
use tokio::process::Command;

use crate::http::BoxFuture;

/// A repository to check out for analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRequest {
    /// Repository name; also the checkout directory name.
    pub repository: String,
    /// Clone URL without credentials.
    pub clone_url: String,
    /// Branch to clone; the remote default when `None`.
    pub branch: Option<String>,
}

/// Obtains a local copy of a repository.
pub trait SourceFetcher {
    /// Replace any previous checkout with `request` and return its path.
    fn fetch<'a>(&'a self, request: &'a SourceRequest) -> BoxFuture<'a, Result<PathBuf>>;
}

/// Runs the external analysis for a project and waits for it to exit.
pub trait AnalysisRunner {
    /// Launch the scanner for `project_key`.
    fn run<'a>(&'a self, project_key: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Clones with the `git` binary into a workspace that is reset before each clone.
pub struct GitSourceFetcher<F: FileSystem> {
    fs: F,
    workspace: PathBuf,
    token: Option<String>,
}

impl<F: FileSystem + Send + Sync> GitSourceFetcher<F> {
    /// Clone into `workspace`, authenticating over https with `token` when set.
    pub fn new(fs: F, workspace: impl Into<PathBuf>, token: Option<String>) -> Self {
        Self {
            fs,
            workspace: workspace.into(),
            token,
        }
    }

    async fn clone_fresh(&self, request: &SourceRequest) -> Result<PathBuf> {
        self.fs.reset_dir(&self.workspace)?;
        let url = maybe_inject_token(&request.clone_url, self.token.as_deref(), "x-access-token");
        let mut args = vec!["clone".to_string(), "--single-branch".to_string()];
        if let Some(branch) = &request.branch {
            args.push("--branch".to_string());
            args.push(branch.clone());
        }
        args.push(url);
        args.push(request.repository.clone());

        let label = format!("git clone {}", request.clone_url);
        run_captured("git", &args, &self.workspace, &label).await?;
        let checkout = self.workspace.join(&request.repository);
        log::info!("cloned {} into {}", request.repository, checkout.display());
        Ok(checkout)
    }
}

impl<F: FileSystem + Send + Sync> SourceFetcher for GitSourceFetcher<F> {
    fn fetch<'a>(&'a self, request: &'a SourceRequest) -> BoxFuture<'a, Result<PathBuf>> {
        Box::pin(self.clone_fresh(request))
    }
}

/// Runs a container orchestration command such as `docker-compose up --build`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeRunner {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
}

impl ComposeRunner {
    /// Split a whitespace-separated command line.
    pub fn from_command_line(command: &str, working_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| GitSonarError::Config("compose command is empty".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
            working_dir: working_dir.into(),
        })
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    async fn launch(&self, project_key: &str) -> Result<()> {
        let label = self.command_line();
        log::info!("running `{label}` for {project_key}");
        let status = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|err| GitSonarError::Process(format!("{label} failed to start: {err}")))?;
        if !status.success() {
            return Err(GitSonarError::Process(format!("{label} exited with {status}")));
        }
        Ok(())
    }
}

impl AnalysisRunner for ComposeRunner {
    fn run<'a>(&'a self, project_key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.launch(project_key))
    }
}

async fn run_captured(program: &str, args: &[String], dir: &Path, label: &str) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|err| GitSonarError::Process(format!("{label} failed to start: {err}")))?;
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        return Err(GitSonarError::Process(format!("{label} failed: {detail}")));
    }
    Ok(stdout)
}

fn maybe_inject_token(url: &str, token: Option<&str>, username: &str) -> String {
    let Some(token) = token.filter(|token| !token.is_empty()) else {
        return url.to_string();
    };
    let Some(rest) = url.strip_prefix("https://") else {
        return url.to_string();
    };
    if rest.contains('@') {
        return url.to_string();
    }
    format!("https://{username}:{token}@{rest}")
}
