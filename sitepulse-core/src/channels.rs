//! Delivery channels for report dispatch
//!
//! Two independent collaborator interfaces: the in-app notice feed (a table
//! the admin surface reads) and the host application's mail service. The
//! email channel reports failure as data rather than an error, because the
//! dispatcher aggregates past individual failures by construction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::db::Database;
use crate::error::{Error, Result};

/// In-app notice delivery.
#[async_trait]
pub trait NoticeChannel: Send + Sync {
    /// Deliver one notice. `skip_email` tells notice systems that mirror
    /// notices to email not to, since the dispatcher runs its own email
    /// channel.
    async fn send_notice(
        &self,
        uid: i64,
        title: &str,
        body: &str,
        link: Option<&str>,
        skip_email: bool,
    ) -> Result<()>;
}

/// One outbound email.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Non-throwing email delivery result.
#[derive(Debug, Clone)]
pub struct EmailOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl EmailOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Email delivery.
#[async_trait]
pub trait EmailChannel: Send + Sync {
    async fn send_email(&self, message: &EmailMessage) -> EmailOutcome;
}

/// Notice channel backed by the local `notices` table.
pub struct DbNoticeChannel {
    db: Arc<Database>,
}

impl DbNoticeChannel {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl NoticeChannel for DbNoticeChannel {
    async fn send_notice(
        &self,
        uid: i64,
        title: &str,
        body: &str,
        link: Option<&str>,
        _skip_email: bool,
    ) -> Result<()> {
        self.db
            .insert_notice(uid, title, body, link)
            .map_err(|e| Error::Channel(format!("notice insert failed: {}", e)))?;
        Ok(())
    }
}

/// Email channel that posts to the host application's mail endpoint.
pub struct HttpEmailChannel {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpEmailChannel {
    pub fn new(endpoint: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        if let Some(key) = api_key {
            let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| Error::Config(format!("invalid mail api_key: {}", e)))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
        })
    }
}

#[derive(serde::Serialize)]
struct SendEmailRequest<'a> {
    to: &'a str,
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

#[async_trait]
impl EmailChannel for HttpEmailChannel {
    async fn send_email(&self, message: &EmailMessage) -> EmailOutcome {
        let request = SendEmailRequest {
            to: &message.to,
            subject: &message.subject,
            html: &message.html,
            text: &message.text,
        };

        match self.http.post(&self.endpoint).json(&request).send().await {
            Ok(response) if response.status().is_success() => EmailOutcome::ok(),
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_else(|_| "unknown".into());
                EmailOutcome::failed(format!("mail service error ({}): {}", status, body))
            }
            Err(e) => EmailOutcome::failed(format!("mail request failed: {}", e)),
        }
    }
}

/// Placeholder for deployments without a configured mail service: every
/// send fails with a clear reason, which the dispatcher surfaces as an
/// error string instead of dropping silently.
pub struct DisabledEmailChannel;

#[async_trait]
impl EmailChannel for DisabledEmailChannel {
    async fn send_email(&self, _message: &EmailMessage) -> EmailOutcome {
        EmailOutcome::failed("mail service not configured")
    }
}
