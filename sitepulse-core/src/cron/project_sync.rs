//! Project repository sync
//!
//! Pulls repository metadata (stars, forks, license, language breakdown) and
//! optionally README content from the code-hosting API for every project
//! with sync enabled. Projects fail individually; one bad repository never
//! aborts the batch.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Deserialize;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::Project;

const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Fetched repository metadata.
#[derive(Debug, Clone, Default)]
pub struct RepoMetadata {
    pub stars: i64,
    pub forks: i64,
    pub license: Option<String>,
    /// Language name -> bytes of code
    pub languages: HashMap<String, i64>,
}

#[derive(Deserialize)]
struct RepoResponse {
    stargazers_count: i64,
    forks_count: i64,
    license: Option<LicenseTag>,
}

#[derive(Deserialize)]
struct LicenseTag {
    spdx_id: Option<String>,
    name: Option<String>,
}

/// Thin client for the code-hosting API.
pub struct GithubClient {
    http: reqwest::Client,
    base_url: String,
}

impl GithubClient {
    pub fn new(token: Option<&str>, timeout: Duration) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );
        if let Some(token) = token {
            let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| Error::Config(format!("invalid github token: {}", e)))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .user_agent("sitepulse")
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: DEFAULT_API_BASE.to_string(),
        })
    }

    /// Point the client at a different API root (test servers, mirrors).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "unknown".into());
            return Err(Error::Upstream(format!("API error ({}): {}", status, body)));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| Error::Upstream(format!("failed to parse response: {}", e)))
    }

    /// Fetch star/fork counts, license and language breakdown.
    pub async fn fetch_metadata(&self, owner: &str, name: &str) -> Result<RepoMetadata> {
        let repo_url = format!(
            "{}/repos/{}/{}",
            self.base_url,
            urlencoding::encode(owner),
            urlencoding::encode(name)
        );
        let repo: RepoResponse = self.get_json(&repo_url).await?;

        let languages_url = format!("{}/languages", repo_url);
        let languages: HashMap<String, i64> = self.get_json(&languages_url).await?;

        Ok(RepoMetadata {
            stars: repo.stargazers_count,
            forks: repo.forks_count,
            license: repo
                .license
                .and_then(|l| l.spdx_id.filter(|id| id != "NOASSERTION").or(l.name)),
            languages,
        })
    }

    /// Fetch raw README content; None when the repository has no README.
    pub async fn fetch_readme(&self, owner: &str, name: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/repos/{}/{}/readme",
            self.base_url,
            urlencoding::encode(owner),
            urlencoding::encode(name)
        );
        let response = self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github.raw")
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Error::Upstream(format!("API error ({})", status)));
        }
        let content = response
            .text()
            .await
            .map_err(|e| Error::Upstream(format!("failed to read README: {}", e)))?;
        Ok(Some(content))
    }
}

/// Extract `(owner, name)` from a repository reference: bare `owner/name`
/// or a github.com URL, with an optional trailing `.git`.
pub fn parse_repo_path(raw: &str) -> Option<(String, String)> {
    let mut trimmed = raw.trim();
    for prefix in ["https://github.com/", "http://github.com/", "github.com/"] {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            trimmed = rest;
            break;
        }
    }
    let trimmed = trimmed.trim_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);

    let mut parts = trimmed.split('/');
    let owner = parts.next()?;
    let name = parts.next()?;
    if parts.next().is_some() || owner.is_empty() || name.is_empty() {
        return None;
    }
    let valid = |s: &str| {
        s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    if !valid(owner) || !valid(name) {
        return None;
    }
    Some((owner.to_string(), name.to_string()))
}

/// Per-project outcome, correlated by project id.
#[derive(Debug, Clone)]
pub struct ProjectSyncResult {
    pub project_id: String,
    pub success: bool,
    pub error: Option<String>,
}

/// Batch outcome.
#[derive(Debug, Clone, Default)]
pub struct ProjectSyncReport {
    pub synced: usize,
    pub failed: usize,
    pub results: Vec<ProjectSyncResult>,
}

/// Sync every project with `sync_enabled`, concurrently, with per-project
/// failure isolation.
pub async fn sync_projects(db: &Database, client: &GithubClient) -> Result<ProjectSyncReport> {
    let projects = db.projects_with_sync_enabled()?;
    if projects.is_empty() {
        tracing::info!("No projects with sync enabled");
        return Ok(ProjectSyncReport::default());
    }

    let results = join_all(
        projects
            .iter()
            .map(|project| sync_one(db, client, project)),
    )
    .await;

    let mut report = ProjectSyncReport::default();
    for result in results {
        if result.success {
            report.synced += 1;
        } else {
            report.failed += 1;
            tracing::warn!(
                project_id = %result.project_id,
                error = result.error.as_deref().unwrap_or("unknown"),
                "Project sync failed"
            );
        }
        report.results.push(result);
    }

    tracing::info!(
        synced = report.synced,
        failed = report.failed,
        "Project sync complete"
    );
    Ok(report)
}

async fn sync_one(db: &Database, client: &GithubClient, project: &Project) -> ProjectSyncResult {
    let fail = |error: String| ProjectSyncResult {
        project_id: project.id.clone(),
        success: false,
        error: Some(error),
    };

    let Some(repo) = project.repo.as_deref() else {
        return fail("no repository configured".into());
    };
    let Some((owner, name)) = parse_repo_path(repo) else {
        return fail(format!("invalid repository path: {}", repo));
    };

    let metadata = match client.fetch_metadata(&owner, &name).await {
        Ok(metadata) => metadata,
        Err(e) => return fail(e.to_string()),
    };

    let readme = if project.content_sync_enabled {
        match client.fetch_readme(&owner, &name).await {
            Ok(content) => content,
            Err(e) => return fail(format!("README fetch failed: {}", e)),
        }
    } else {
        None
    };

    if let Err(e) = db.apply_project_sync(
        &project.id,
        metadata.stars,
        metadata.forks,
        metadata.license.as_deref(),
        &metadata.languages,
        readme.as_deref(),
    ) {
        return fail(format!("failed to store metadata: {}", e));
    }

    ProjectSyncResult {
        project_id: project.id.clone(),
        success: true,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repo_path_forms() {
        assert_eq!(
            parse_repo_path("octo/demo"),
            Some(("octo".into(), "demo".into()))
        );
        assert_eq!(
            parse_repo_path("https://github.com/octo/demo"),
            Some(("octo".into(), "demo".into()))
        );
        assert_eq!(
            parse_repo_path("github.com/octo/demo.git"),
            Some(("octo".into(), "demo".into()))
        );
        assert_eq!(
            parse_repo_path("  octo/demo.rs "),
            Some(("octo".into(), "demo.rs".into()))
        );

        assert_eq!(parse_repo_path(""), None);
        assert_eq!(parse_repo_path("just-a-name"), None);
        assert_eq!(parse_repo_path("a/b/c"), None);
        assert_eq!(parse_repo_path("octo/"), None);
        assert_eq!(parse_repo_path("oc to/demo"), None);
    }

    #[test]
    fn test_repo_response_decodes() {
        let json = r#"{
            "stargazers_count": 42,
            "forks_count": 7,
            "license": {"spdx_id": "MIT", "name": "MIT License"},
            "open_issues": 3
        }"#;
        let repo: RepoResponse = serde_json::from_str(json).unwrap();
        assert_eq!(repo.stargazers_count, 42);
        assert_eq!(repo.forks_count, 7);
        assert_eq!(repo.license.unwrap().spdx_id.as_deref(), Some("MIT"));

        let no_license: RepoResponse =
            serde_json::from_str(r#"{"stargazers_count": 0, "forks_count": 0, "license": null}"#)
                .unwrap();
        assert!(no_license.license.is_none());
    }

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn project(id: &str, repo: Option<&str>) -> Project {
        Project {
            id: id.into(),
            name: id.into(),
            repo: repo.map(String::from),
            sync_enabled: true,
            content_sync_enabled: false,
            stars: 0,
            forks: 0,
            license: None,
            languages: HashMap::new(),
            readme: None,
            synced_at: None,
        }
    }

    #[tokio::test]
    async fn test_sync_empty_batch() {
        let db = test_db();
        let client = GithubClient::new(None, Duration::from_secs(5)).unwrap();
        let report = sync_projects(&db, &client).await.unwrap();
        assert_eq!(report.synced, 0);
        assert_eq!(report.failed, 0);
        assert!(report.results.is_empty());
    }

    #[tokio::test]
    async fn test_validation_failures_are_per_item() {
        let db = test_db();
        db.upsert_project(&project("p1", None)).unwrap();
        db.upsert_project(&project("p2", Some("not a repo path")))
            .unwrap();
        let client = GithubClient::new(None, Duration::from_secs(5)).unwrap();

        let report = sync_projects(&db, &client).await.unwrap();

        // Both fail validation before any network call; each has its own entry
        assert_eq!(report.failed, 2);
        assert_eq!(report.synced, 0);
        let p1 = report.results.iter().find(|r| r.project_id == "p1").unwrap();
        assert!(p1.error.as_ref().unwrap().contains("no repository"));
        let p2 = report.results.iter().find(|r| r.project_id == "p2").unwrap();
        assert!(p2.error.as_ref().unwrap().contains("invalid repository path"));
    }
}
