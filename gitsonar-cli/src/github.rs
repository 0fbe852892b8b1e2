//! GitHub REST and GraphQL access.

use gitsonar_core::{GitSonarError, ProjectBoard, ProjectItem, Result};
use reqwest::header::{ACCEPT, LINK};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::http::{self, BoxFuture, RetryPolicy};

const SERVICE: &str = "github";
const GITHUB_JSON: &str = "application/vnd.github+json";
const PER_PAGE: u32 = 100;

const BOARDS_QUERY: &str = r#"query($org: String!) {
  organization(login: $org) {
    projectsV2(first: 100) {
      nodes {
        title
        items(first: 100) {
          nodes {
            status: fieldValueByName(name: "Status") {
              ... on ProjectV2ItemFieldSingleSelectValue {
                column: name
              }
            }
          }
        }
      }
    }
  }
}"#;

/// Read-only view of the GitHub data needed to evaluate a repository.
pub trait GitHubApi {
    /// Names of every repository owned by `org`.
    fn list_repositories<'a>(&'a self, org: &'a str) -> BoxFuture<'a, Result<Vec<String>>>;

    /// Default branch of a repository, when GitHub reports one.
    fn default_branch<'a>(
        &'a self,
        org: &'a str,
        repo: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>>>;

    /// Language names in the order GitHub returns them.
    fn languages<'a>(&'a self, org: &'a str, repo: &'a str)
    -> BoxFuture<'a, Result<Vec<String>>>;

    /// Commit messages, newest first.
    fn commit_messages<'a>(
        &'a self,
        org: &'a str,
        repo: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>>>;

    /// Branch names.
    fn branch_names<'a>(
        &'a self,
        org: &'a str,
        repo: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>>>;

    /// Number of open pull requests.
    fn pull_request_count<'a>(&'a self, org: &'a str, repo: &'a str)
    -> BoxFuture<'a, Result<u64>>;

    /// Every project board of `org` with the status of each card.
    fn project_boards<'a>(&'a self, org: &'a str) -> BoxFuture<'a, Result<Vec<ProjectBoard>>>;
}

/// Reqwest-backed GitHub client.
pub struct GitHubClient {
    client: Client,
    api_url: String,
    token: String,
    retry: RetryPolicy,
}

impl GitHubClient {
    /// Build a client for `api_url` authenticated with `token`.
    pub fn new(api_url: &str, token: &str, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|err| GitSonarError::Config(format!("cannot build github client: {err}")))?;
        Ok(Self {
            client,
            api_url: http::normalize_base_url(api_url)?,
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

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.api_url)
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = self.url(path);
        let response = http::send(SERVICE, self.retry, || {
            self.client
                .get(&url)
                .bearer_auth(&self.token)
                .header(ACCEPT, GITHUB_JSON)
        })
        .await?;
        http::read_json(SERVICE, response).await
    }

    /// Follow `page=` pagination until the `Link` header stops advertising a next page.
    async fn get_paginated(&self, path: &str) -> Result<Vec<Value>> {
        let url = self.url(path);
        let mut items = Vec::new();
        let mut page = 1u32;
        loop {
            let response = http::send(SERVICE, self.retry, || {
                self.client
                    .get(&url)
                    .bearer_auth(&self.token)
                    .header(ACCEPT, GITHUB_JSON)
                    .query(&[("per_page", PER_PAGE), ("page", page)])
            })
            .await?;
            let next = http::has_next_page(
                response
                    .headers()
                    .get(LINK)
                    .and_then(|value| value.to_str().ok()),
            );
            match http::read_json(SERVICE, response).await? {
                Value::Array(values) => items.extend(values),
                other => {
                    return Err(GitSonarError::MalformedResponse(format!(
                        "expected a list from {path}, got {}",
                        describe(&other)
                    )));
                }
            }
            if !next {
                break;
            }
            page += 1;
        }
        log::debug!("fetched {} items from {path} over {page} page(s)", items.len());
        Ok(items)
    }

    async fn fetch_repositories(&self, org: &str) -> Result<Vec<String>> {
        let repos = self.get_paginated(&format!("orgs/{org}/repos")).await?;
        repos.iter().map(|repo| string_field(repo, "name")).collect()
    }

    async fn fetch_default_branch(&self, org: &str, repo: &str) -> Result<Option<String>> {
        let details = self.get_json(&format!("repos/{org}/{repo}")).await?;
        Ok(details
            .get("default_branch")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn fetch_languages(&self, org: &str, repo: &str) -> Result<Vec<String>> {
        match self.get_json(&format!("repos/{org}/{repo}/languages")).await? {
            Value::Object(languages) => Ok(languages.keys().cloned().collect()),
            other => Err(GitSonarError::MalformedResponse(format!(
                "expected a language map for {repo}, got {}",
                describe(&other)
            ))),
        }
    }

    async fn fetch_commit_messages(&self, org: &str, repo: &str) -> Result<Vec<String>> {
        let commits = self
            .get_paginated(&format!("repos/{org}/{repo}/commits"))
            .await?;
        commits
            .iter()
            .map(|commit| {
                commit
                    .pointer("/commit/message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        GitSonarError::MalformedResponse(format!(
                            "commit in {repo} has no message"
                        ))
                    })
            })
            .collect()
    }

    async fn fetch_branch_names(&self, org: &str, repo: &str) -> Result<Vec<String>> {
        let branches = self
            .get_paginated(&format!("repos/{org}/{repo}/branches"))
            .await?;
        branches
            .iter()
            .map(|branch| string_field(branch, "name"))
            .collect()
    }

    async fn fetch_pull_request_count(&self, org: &str, repo: &str) -> Result<u64> {
        let pulls = self
            .get_paginated(&format!("repos/{org}/{repo}/pulls"))
            .await?;
        Ok(pulls.len() as u64)
    }

    async fn fetch_project_boards(&self, org: &str) -> Result<Vec<ProjectBoard>> {
        let payload = json!({ "query": BOARDS_QUERY, "variables": { "org": org } });
        let url = self.url("graphql");
        let response = http::send(SERVICE, self.retry, || {
            self.client
                .post(&url)
                .bearer_auth(&self.token)
                .json(&payload)
        })
        .await?;
        let body = http::read_json(SERVICE, response).await?;
        parse_boards(body)
    }
}

impl GitHubApi for GitHubClient {
    fn list_repositories<'a>(&'a self, org: &'a str) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(self.fetch_repositories(org))
    }

    fn default_branch<'a>(
        &'a self,
        org: &'a str,
        repo: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(self.fetch_default_branch(org, repo))
    }

    fn languages<'a>(
        &'a self,
        org: &'a str,
        repo: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(self.fetch_languages(org, repo))
    }

    fn commit_messages<'a>(
        &'a self,
        org: &'a str,
        repo: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(self.fetch_commit_messages(org, repo))
    }

    fn branch_names<'a>(
        &'a self,
        org: &'a str,
        repo: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(self.fetch_branch_names(org, repo))
    }

    fn pull_request_count<'a>(
        &'a self,
        org: &'a str,
        repo: &'a str,
    ) -> BoxFuture<'a, Result<u64>> {
        Box::pin(self.fetch_pull_request_count(org, repo))
    }

    fn project_boards<'a>(&'a self, org: &'a str) -> BoxFuture<'a, Result<Vec<ProjectBoard>>> {
        Box::pin(self.fetch_project_boards(org))
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<BoardsData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct BoardsData {
    organization: Option<Organization>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Organization {
    projects_v2: Connection<BoardNode>,
}

#[derive(Debug, Deserialize)]
struct Connection<T> {
    #[serde(default = "Vec::new")]
    nodes: Vec<Option<T>>,
}

#[derive(Debug, Deserialize)]
struct BoardNode {
    title: String,
    items: Connection<ItemNode>,
}

#[derive(Debug, Deserialize)]
struct ItemNode {
    status: Option<StatusValue>,
}

#[derive(Debug, Deserialize)]
struct StatusValue {
    column: Option<String>,
}

fn parse_boards(body: Value) -> Result<Vec<ProjectBoard>> {
    let response: GraphQlResponse = serde_json::from_value(body).map_err(|err| {
        GitSonarError::MalformedResponse(format!("unexpected project board payload: {err}"))
    })?;
    let organization = response.data.and_then(|data| data.organization);
    let Some(organization) = organization else {
        let messages: Vec<String> = response.errors.into_iter().map(|err| err.message).collect();
        return Err(GitSonarError::MalformedResponse(format!(
            "project boards unavailable: {}",
            if messages.is_empty() {
                "no organization in response".to_string()
            } else {
                messages.join("; ")
            }
        )));
    };
    Ok(organization
        .projects_v2
        .nodes
        .into_iter()
        .flatten()
        .map(|board| ProjectBoard {
            title: board.title,
            items: board
                .items
                .nodes
                .into_iter()
                .flatten()
                .map(|item| ProjectItem {
                    status: item.status.and_then(|status| status.column),
                })
                .collect(),
        })
        .collect())
}

fn string_field(value: &Value, field: &str) -> Result<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| GitSonarError::MalformedResponse(format!("missing string field `{field}`")))
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
