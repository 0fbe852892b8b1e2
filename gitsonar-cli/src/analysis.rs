//! Static analysis orchestration against SonarQube.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use gitsonar_core::{
    AnalysisSummary, FileSystem, GitSonarError, Result, ScannerProperties, SeverityCounts,
    combine_severities, parse_count_measure, parse_decimal_measure, parse_severity_measure,
    percentage_of_values,
};

use crate::http::BoxFuture;
use crate::sonar::{Metric, SonarApi};
use crate::source::{AnalysisRunner, SourceFetcher, SourceRequest};

/// Async sleep abstraction so polling can be tested without waiting.
pub trait Sleeper {
    /// Sleep for `duration`.
    fn sleep<'a>(&'a self, duration: Duration) -> BoxFuture<'a, ()>;
}

/// Tokio-backed sleeper used in production.
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep<'a>(&'a self, duration: Duration) -> BoxFuture<'a, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Backoff settings for waiting on analysis results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// First wait between polls.
    pub initial_interval: Duration,
    /// Upper bound for a single wait.
    pub max_interval: Duration,
    /// Give up once this much time has passed.
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Project to analyse and where its sources come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisTarget {
    /// Key of the SonarQube project.
    pub project_key: String,
    /// Checkout to analyse.
    pub source: SourceRequest,
}

/// Produces static analysis metrics for a repository.
pub trait StaticAnalysis {
    /// Analyse `target` and read back its measures.
    fn analyze<'a>(&'a self, target: &'a AnalysisTarget)
    -> BoxFuture<'a, Result<AnalysisSummary>>;
}

/// Settings shared by every analysis run.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Where the scanner properties file is written.
    pub properties_path: PathBuf,
    /// Sources directory as seen by the scanner.
    pub scanner_sources: String,
    /// Server URL as seen by the scanner.
    pub scanner_host_url: String,
    /// Token handed to the scanner.
    pub token: String,
    /// Wait policy for results.
    pub poll: PollPolicy,
}

/// Collaborators of [`StaticAnalysisDriver`].
pub struct AnalysisCollaborators {
    /// SonarQube API.
    pub sonar: Box<dyn SonarApi + Send + Sync>,
    /// Source checkout.
    pub fetcher: Box<dyn SourceFetcher + Send + Sync>,
    /// Scanner launcher.
    pub runner: Box<dyn AnalysisRunner + Send + Sync>,
    /// Poll sleeper.
    pub sleeper: Box<dyn Sleeper + Send + Sync>,
    /// Filesystem for the properties file.
    pub fs: Box<dyn FileSystem + Send + Sync>,
}

/// Runs create, configure, clone, scan, wait and measure for one project.
pub struct StaticAnalysisDriver {
    deps: AnalysisCollaborators,
    settings: DriverSettings,
}

impl StaticAnalysisDriver {
    /// Build a driver.
    pub fn new(deps: AnalysisCollaborators, settings: DriverSettings) -> Self {
        Self { deps, settings }
    }

    async fn run(&self, target: &AnalysisTarget) -> Result<AnalysisSummary> {
        let key = target.project_key.as_str();
        self.deps.sonar.create_project(key).await?;
        ScannerProperties {
            sources: self.settings.scanner_sources.clone(),
            token: self.settings.token.clone(),
            host_url: self.settings.scanner_host_url.clone(),
            project_key: key.to_string(),
        }
        .write_to(self.deps.fs.as_ref(), &self.settings.properties_path)?;
        self.deps.fetcher.fetch(&target.source).await?;
        let baseline = self.analysis_baseline(key).await?;
        self.deps.runner.run(key).await?;
        let analyses = wait_for_analysis(
            self.deps.sonar.as_ref(),
            self.deps.sleeper.as_ref(),
            key,
            baseline,
            self.settings.poll,
        )
        .await?;
        log::info!("{key} has {analyses} analysis result(s)");
        self.collect_measures(key).await
    }

    /// Analyses already stored for a reused project.
    async fn analysis_baseline(&self, key: &str) -> Result<usize> {
        match self.deps.sonar.analysis_count(key).await {
            Ok(count) => {
                log::debug!("{key} starts with {count} analysis result(s)");
                Ok(count)
            }
            Err(err) if err.is_transient() => {
                log::warn!("{key}: cannot read existing analyses, assuming none: {err}");
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }

    async fn collect_measures(&self, key: &str) -> Result<AnalysisSummary> {
        let duplication = self
            .measure_with(key, Metric::DuplicatedLinesDensity, parse_decimal_measure)
            .await?;
        let mut severities = Vec::with_capacity(3);
        for metric in [
            Metric::MaintainabilityIssues,
            Metric::ReliabilityIssues,
            Metric::SecurityIssues,
        ] {
            severities.push(self.measure_with(key, metric, parse_severity_measure).await?);
        }
        let hotspots = self
            .measure_with(key, Metric::SecurityHotspots, parse_count_measure)
            .await?;
        let bugs = self.measure_with(key, Metric::Bugs, parse_count_measure).await?;
        let vulnerabilities = self
            .measure_with(key, Metric::Vulnerabilities, parse_count_measure)
            .await?;
        let code_smells = self
            .measure_with(key, Metric::CodeSmells, parse_count_measure)
            .await?;

        let issues_per_severity = severities
            .into_iter()
            .collect::<Option<Vec<SeverityCounts>>>()
            .map(|counts| combine_severities(&counts));
        Ok(AnalysisSummary {
            issues_per_severity,
            issues_per_severity_percentage: issues_per_severity
                .map(|counts| percentage_of_values(&counts.to_tally())),
            code_smells,
            bugs,
            vulnerabilities,
            duplication_percentage: duplication,
            security_hotspots: hotspots,
        })
    }

    /// Fetch and parse one measure; only fatal errors propagate.
    async fn measure_with<T>(
        &self,
        key: &str,
        metric: Metric,
        parse: fn(Option<&str>) -> Result<T>,
    ) -> Result<Option<T>> {
        let raw = match self.deps.sonar.measure(key, metric).await {
            Ok(raw) => raw,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                log::warn!("{key}: {} unavailable: {err}", metric.key());
                return Ok(None);
            }
        };
        match parse(raw.as_deref()) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                log::warn!("{key}: {} unreadable: {err}", metric.key());
                Ok(None)
            }
        }
    }
}

impl StaticAnalysis for StaticAnalysisDriver {
    fn analyze<'a>(
        &'a self,
        target: &'a AnalysisTarget,
    ) -> BoxFuture<'a, Result<AnalysisSummary>> {
        Box::pin(self.run(target))
    }
}

/// Poll until the project has more analyses than `baseline` or the deadline passes.
async fn wait_for_analysis(
    sonar: &(dyn SonarApi + Send + Sync),
    sleeper: &(dyn Sleeper + Send + Sync),
    key: &str,
    baseline: usize,
    policy: PollPolicy,
) -> Result<usize> {
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut interval = policy.initial_interval;
    loop {
        if Instant::now() >= deadline {
            return Err(GitSonarError::AnalysisTimeout {
                project: key.to_string(),
                waited: started.elapsed(),
            });
        }
        match sonar.analysis_count(key).await {
            Ok(count) if count > baseline => return Ok(count),
            Ok(_) => log::debug!("no new analysis for {key} yet"),
            Err(err) if err.is_transient() => log::warn!("polling {key}: {err}"),
            Err(err) => return Err(err),
        }
        sleeper
            .sleep(interval.min(deadline.saturating_duration_since(Instant::now())))
            .await;
        interval = (interval * 2).min(policy.max_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeSonar {
        counts: Mutex<VecDeque<Result<usize>>>,
        measures: HashMap<&'static str, Result<Option<String>>>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl FakeSonar {
        fn with_counts(counts: Vec<Result<usize>>) -> Self {
            Self {
                counts: Mutex::new(counts.into()),
                ..Self::default()
            }
        }

        fn with_measure(mut self, metric: Metric, value: Result<Option<String>>) -> Self {
            self.measures.insert(metric.key(), value);
            self
        }
    }

    fn clone_result(result: &Result<Option<String>>) -> Result<Option<String>> {
        match result {
            Ok(value) => Ok(value.clone()),
            Err(GitSonarError::Auth(message)) => Err(GitSonarError::Auth(message.clone())),
            Err(err) => Err(GitSonarError::Network(err.to_string())),
        }
    }

    impl SonarApi for FakeSonar {
        fn create_project<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
            self.calls.lock().expect("calls").push(format!("create {key}"));
            Box::pin(async { Ok(()) })
        }

        fn analysis_count<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<usize>> {
            let next = self
                .counts
                .lock()
                .expect("counts")
                .pop_front()
                .unwrap_or(Ok(0));
            Box::pin(async move { next })
        }

        fn measure<'a>(
            &'a self,
            _key: &'a str,
            metric: Metric,
        ) -> BoxFuture<'a, Result<Option<String>>> {
            let value = self
                .measures
                .get(metric.key())
                .map(clone_result)
                .unwrap_or(Ok(None));
            Box::pin(async move { value })
        }
    }

    struct RecordingSleeper {
        durations: Arc<Mutex<Vec<Duration>>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep<'a>(&'a self, duration: Duration) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                self.durations.lock().expect("durations").push(duration);
            })
        }
    }

    struct RecordingFetcher {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl SourceFetcher for RecordingFetcher {
        fn fetch<'a>(&'a self, request: &'a SourceRequest) -> BoxFuture<'a, Result<PathBuf>> {
            Box::pin(async move {
                self.calls
                    .lock()
                    .expect("calls")
                    .push(format!("clone {}", request.repository));
                Ok(PathBuf::from("github_repository").join(&request.repository))
            })
        }
    }

    struct RecordingRunner {
        calls: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl AnalysisRunner for RecordingRunner {
        fn run<'a>(&'a self, project_key: &'a str) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.calls
                    .lock()
                    .expect("calls")
                    .push(format!("scan {project_key}"));
                if self.fail {
                    Err(GitSonarError::Process("compose exited with 1".to_string()))
                } else {
                    Ok(())
                }
            })
        }
    }

    struct MemoryFs {
        files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
    }

    impl FileSystem for MemoryFs {
        fn write(&self, path: &std::path::Path, contents: &[u8]) -> Result<()> {
            self.files
                .lock()
                .expect("files")
                .insert(path.to_path_buf(), contents.to_vec());
            Ok(())
        }

        fn append(&self, path: &std::path::Path, contents: &[u8]) -> Result<()> {
            self.files
                .lock()
                .expect("files")
                .entry(path.to_path_buf())
                .or_default()
                .extend_from_slice(contents);
            Ok(())
        }

        fn reset_dir(&self, _path: &std::path::Path) -> Result<()> {
            Ok(())
        }
    }

    struct Harness {
        calls: Arc<Mutex<Vec<String>>>,
        durations: Arc<Mutex<Vec<Duration>>>,
        files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
    }

    fn driver(
        sonar: FakeSonar,
        fail_scan: bool,
        poll: PollPolicy,
    ) -> (StaticAnalysisDriver, Harness) {
        let calls = sonar.calls.clone();
        let durations = Arc::new(Mutex::new(Vec::new()));
        let files = Arc::new(Mutex::new(HashMap::new()));
        let deps = AnalysisCollaborators {
            sonar: Box::new(sonar),
            fetcher: Box::new(RecordingFetcher {
                calls: calls.clone(),
            }),
            runner: Box::new(RecordingRunner {
                calls: calls.clone(),
                fail: fail_scan,
            }),
            sleeper: Box::new(RecordingSleeper {
                durations: durations.clone(),
            }),
            fs: Box::new(MemoryFs {
                files: files.clone(),
            }),
        };
        let settings = DriverSettings {
            properties_path: PathBuf::from("sonar-project.properties"),
            scanner_sources: "./github_repository".to_string(),
            scanner_host_url: "http://sonarqube:9000".to_string(),
            token: "squ_token".to_string(),
            poll,
        };
        (
            StaticAnalysisDriver::new(deps, settings),
            Harness {
                calls,
                durations,
                files,
            },
        )
    }

    fn target() -> AnalysisTarget {
        AnalysisTarget {
            project_key: "todo-api".to_string(),
            source: SourceRequest {
                repository: "todo-api".to_string(),
                clone_url: "https://github.com/acme/todo-api".to_string(),
                branch: Some("main".to_string()),
            },
        }
    }

    fn severity(low: u64, medium: u64, high: u64) -> Result<Option<String>> {
        Ok(Some(format!(
            r#"{{"LOW":{low},"MEDIUM":{medium},"HIGH":{high},"INFO":0,"BLOCKER":0,"total":{}}}"#,
            low + medium + high
        )))
    }

    #[tokio::test]
    async fn analyze_runs_steps_in_order_and_combines_measures() {
        let sonar = FakeSonar::with_counts(vec![Ok(0), Ok(0), Ok(0), Ok(0), Ok(1)])
            .with_measure(Metric::DuplicatedLinesDensity, Ok(Some("3.5".to_string())))
            .with_measure(Metric::MaintainabilityIssues, severity(2, 1, 0))
            .with_measure(Metric::ReliabilityIssues, severity(0, 0, 1))
            .with_measure(Metric::SecurityIssues, severity(0, 0, 0))
            .with_measure(Metric::Bugs, Ok(Some("1".to_string())))
            .with_measure(Metric::CodeSmells, Ok(Some("3".to_string())));
        let (driver, harness) = driver(sonar, false, PollPolicy::default());

        let summary = driver.analyze(&target()).await.expect("analysis");

        assert_eq!(
            *harness.calls.lock().expect("calls"),
            vec!["create todo-api", "clone todo-api", "scan todo-api"]
        );
        assert_eq!(
            *harness.durations.lock().expect("durations"),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
        let properties = harness
            .files
            .lock()
            .expect("files")
            .get(&PathBuf::from("sonar-project.properties"))
            .cloned()
            .expect("properties written");
        let properties = String::from_utf8(properties).expect("utf8");
        assert!(properties.contains("sonar.projectKey=todo-api\n"));
        assert!(properties.contains("sonar.host.url=http://sonarqube:9000\n"));

        assert_eq!(
            summary.issues_per_severity,
            Some(SeverityCounts {
                low: 2,
                medium: 1,
                high: 1,
                total: 4,
            })
        );
        let percentages = summary
            .issues_per_severity_percentage
            .expect("percentages");
        assert_eq!(percentages.get("total_low"), Some(&50.0));
        assert_eq!(percentages.get("total_high"), Some(&25.0));
        assert_eq!(summary.duplication_percentage, Some(3.5));
        assert_eq!(summary.bugs, Some(1));
        assert_eq!(summary.code_smells, Some(3));
        assert_eq!(summary.vulnerabilities, Some(0));
        assert_eq!(summary.security_hotspots, Some(0));
    }

    #[tokio::test]
    async fn poll_interval_is_capped() {
        let sonar = FakeSonar::with_counts(vec![Ok(0), Ok(0), Ok(0), Ok(0), Ok(2)]);
        let (driver, harness) = driver(
            sonar,
            false,
            PollPolicy {
                initial_interval: Duration::from_secs(2),
                max_interval: Duration::from_secs(3),
                timeout: Duration::from_secs(600),
            },
        );

        driver.analyze(&target()).await.expect("analysis");
        assert_eq!(
            *harness.durations.lock().expect("durations"),
            vec![
                Duration::from_secs(2),
                Duration::from_secs(3),
                Duration::from_secs(3)
            ]
        );
    }

    #[tokio::test]
    async fn poll_gives_up_after_deadline() {
        let sonar = FakeSonar::with_counts(vec![Ok(0)]);
        let (driver, _harness) = driver(
            sonar,
            false,
            PollPolicy {
                timeout: Duration::ZERO,
                ..PollPolicy::default()
            },
        );

        let err = driver.analyze(&target()).await.unwrap_err();
        assert!(matches!(
            err,
            GitSonarError::AnalysisTimeout { ref project, .. } if project == "todo-api"
        ));
    }

    #[tokio::test]
    async fn transient_poll_failures_keep_waiting() {
        let sonar = FakeSonar::with_counts(vec![
            Ok(0),
            Err(GitSonarError::Network("connection reset".to_string())),
            Ok(1),
        ]);
        let (driver, harness) = driver(sonar, false, PollPolicy::default());

        driver.analyze(&target()).await.expect("analysis");
        assert_eq!(
            *harness.durations.lock().expect("durations"),
            vec![Duration::from_secs(1)]
        );
    }

    #[tokio::test]
    async fn reused_project_waits_for_a_new_analysis() {
        let sonar = FakeSonar::with_counts(vec![Ok(1), Ok(1), Ok(1), Ok(2)]);
        let (driver, harness) = driver(sonar, false, PollPolicy::default());

        driver.analyze(&target()).await.expect("analysis");
        assert_eq!(
            *harness.durations.lock().expect("durations"),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn unreadable_baseline_counts_as_no_analyses() {
        let sonar = FakeSonar::with_counts(vec![
            Err(GitSonarError::Network("connection reset".to_string())),
            Ok(1),
        ]);
        let (driver, harness) = driver(sonar, false, PollPolicy::default());

        driver.analyze(&target()).await.expect("analysis");
        assert!(harness.durations.lock().expect("durations").is_empty());
    }

    #[tokio::test]
    async fn poll_never_sleeps_past_the_deadline() {
        let sonar = FakeSonar::with_counts(vec![Ok(0), Ok(0), Ok(1)]);
        let (driver, harness) = driver(
            sonar,
            false,
            PollPolicy {
                initial_interval: Duration::from_secs(30),
                max_interval: Duration::from_secs(30),
                timeout: Duration::from_secs(5),
            },
        );

        driver.analyze(&target()).await.expect("analysis");
        let durations = harness.durations.lock().expect("durations");
        assert_eq!(durations.len(), 1);
        assert!(durations[0] <= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn scanner_failure_stops_before_polling() {
        let sonar = FakeSonar::with_counts(vec![Ok(1)]);
        let (driver, harness) = driver(sonar, true, PollPolicy::default());

        let err = driver.analyze(&target()).await.unwrap_err();
        assert!(matches!(err, GitSonarError::Process(_)));
        assert!(harness.durations.lock().expect("durations").is_empty());
    }

    #[tokio::test]
    async fn broken_measure_is_unavailable_not_zero() {
        let sonar = FakeSonar::with_counts(vec![Ok(0), Ok(1)])
            .with_measure(Metric::Bugs, Ok(Some("many".to_string())))
            .with_measure(
                Metric::SecurityIssues,
                Err(GitSonarError::Network("timeout".to_string())),
            );
        let (driver, _harness) = driver(sonar, false, PollPolicy::default());

        let summary = driver.analyze(&target()).await.expect("analysis");
        assert_eq!(summary.bugs, None);
        assert_eq!(summary.issues_per_severity, None);
        assert_eq!(summary.issues_per_severity_percentage, None);
        assert_eq!(summary.code_smells, Some(0));
    }

    #[tokio::test]
    async fn auth_failure_on_measure_is_fatal() {
        let sonar = FakeSonar::with_counts(vec![Ok(0), Ok(1)]).with_measure(
            Metric::DuplicatedLinesDensity,
            Err(GitSonarError::Auth("token revoked".to_string())),
        );
        let (driver, _harness) = driver(sonar, false, PollPolicy::default());

        let err = driver.analyze(&target()).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
