//! SonarQube web API access.

use gitsonar_core::{GitSonarError, Result};
use reqwest::Client;
use serde_json::Value;

use crate::http::{self, BoxFuture, RetryPolicy};

const SERVICE: &str = "sonarqube";

/// Measures read back after an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Duplicated lines density.
    DuplicatedLinesDensity,
    /// Maintainability issues per severity.
    MaintainabilityIssues,
    /// Reliability issues per severity.
    ReliabilityIssues,
    /// Security issues per severity.
    SecurityIssues,
    /// Security hotspot count.
    SecurityHotspots,
    /// Bug count.
    Bugs,
    /// Code smell count.
    CodeSmells,
    /// Vulnerability count.
    Vulnerabilities,
}

impl Metric {
    /// Metric key understood by the measures endpoint.
    pub fn key(self) -> &'static str {
        match self {
            Metric::DuplicatedLinesDensity => "duplicated_lines_density",
            Metric::MaintainabilityIssues => "maintainability_issues",
            Metric::ReliabilityIssues => "reliability_issues",
            Metric::SecurityIssues => "security_issues",
            Metric::SecurityHotspots => "security_hotspots",
            Metric::Bugs => "bugs",
            Metric::CodeSmells => "code_smells",
            Metric::Vulnerabilities => "vulnerabilities",
        }
    }
}

/// Operations on the analysis server.
pub trait SonarApi {
    /// Create the project, or accept it if it already exists.
    fn create_project<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Number of analyses recorded for the project.
    fn analysis_count<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<usize>>;

    /// Raw value of one measure, `None` when the server has no value for it.
    fn measure<'a>(&'a self, key: &'a str, metric: Metric)
    -> BoxFuture<'a, Result<Option<String>>>;
}

/// Reqwest-backed SonarQube client.
pub struct SonarClient {
    client: Client,
    base_url: String,
    token: String,
    retry: RetryPolicy,
}

impl SonarClient {
    /// Build a client for the server at `base_url`.
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|err| GitSonarError::Config(format!("cannot build sonarqube client: {err}")))?;
        Ok(Self {
            client,
            base_url: http::normalize_base_url(base_url)?,
            token: token.to_string(),
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy.
    #[cfg(test)]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}/api/{path}", self.base_url);
        let response = http::send(SERVICE, self.retry, || {
            self.client.get(&url).bearer_auth(&self.token).query(query)
        })
        .await?;
        http::read_json(SERVICE, response).await
    }

    async fn post_create(&self, key: &str) -> Result<()> {
        let url = format!("{}/api/projects/create", self.base_url);
        let outcome = http::send(SERVICE, self.retry, || {
            self.client
                .post(&url)
                .bearer_auth(&self.token)
                .query(&[("project", key), ("name", key)])
        })
        .await;
        match outcome {
            Ok(_) => {
                log::info!("created sonarqube project {key}");
                Ok(())
            }
            Err(GitSonarError::Http { status: 400, body, .. }) if is_duplicate_key(&body) => {
                log::debug!("sonarqube project {key} already exists");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn fetch_analysis_count(&self, key: &str) -> Result<usize> {
        let body = self
            .get_json("project_analyses/search", &[("project", key)])
            .await?;
        body.get("analyses")
            .and_then(Value::as_array)
            .map(Vec::len)
            .ok_or_else(|| {
                GitSonarError::MalformedResponse(format!("no analyses list for {key}"))
            })
    }

    async fn fetch_measure(&self, key: &str, metric: Metric) -> Result<Option<String>> {
        let body = self
            .get_json(
                "measures/component",
                &[("component", key), ("metricKeys", metric.key())],
            )
            .await?;
        let measures = body
            .pointer("/component/measures")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                GitSonarError::MalformedResponse(format!(
                    "no measures for {key} ({})",
                    metric.key()
                ))
            })?;
        Ok(measures
            .iter()
            .find(|measure| measure.get("metric").and_then(Value::as_str) == Some(metric.key()))
            .or_else(|| measures.first())
            .and_then(|measure| measure.get("value"))
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}

fn is_duplicate_key(body: &str) -> bool {
    body.contains("already exist")
}

impl SonarApi for SonarClient {
    fn create_project<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.post_create(key))
    }

    fn analysis_count<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<usize>> {
        Box::pin(self.fetch_analysis_count(key))
    }

    fn measure<'a>(
        &'a self,
        key: &'a str,
        metric: Metric,
    ) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(self.fetch_measure(key, metric))
    }
}
