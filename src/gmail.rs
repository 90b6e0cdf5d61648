//! Gmail REST API client
//!
//! Thin typed wrappers over `users.*` endpoints. Every call is bounded by the
//! configured request timeout, authenticates with the account's bearer token,
//! and deserializes the response into a resource type so unexpected payloads
//! surface as schema errors.

use std::future::Future;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::{AccountConfig, ServerConfig};
use crate::errors::{AppError, AppResult};
use crate::models::MessageFormat;
use crate::resources::{
    AttachmentData, Draft, DraftList, Filter, FilterAction, FilterCriteria, FilterList, Label,
    LabelList, Message, MessageList, MessageRef, Profile, Thread, ThreadList, VacationSettings,
};

/// Mail operations the forward flow depends on
///
/// Implemented by [`GmailClient`]; tests substitute an in-memory mailbox.
pub trait MailTransport: Send + Sync {
    /// Fetch a message in `full` format
    fn fetch_message(&self, message_id: &str) -> impl Future<Output = AppResult<Message>> + Send;

    /// Fetch attachment bytes by attachment id
    fn fetch_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> impl Future<Output = AppResult<AttachmentData>> + Send;

    /// Send a base64url-encoded RFC 2822 message
    fn send_raw(
        &self,
        raw: String,
        thread_id: Option<&str>,
    ) -> impl Future<Output = AppResult<MessageRef>> + Send;
}

/// Shared HTTP connection pool for all accounts
///
/// # Errors
///
/// Returns `Internal` if the TLS backend cannot be initialized.
pub fn build_http_client(config: &ServerConfig) -> AppResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
        .user_agent(concat!("gmail-mcp-rs/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| AppError::Internal(format!("failed to build http client: {e}")))
}

/// Query parameters shared by the message, thread and draft list endpoints
#[derive(Debug, Default)]
pub struct ListQuery<'a> {
    pub q: Option<&'a str>,
    pub max_results: Option<u32>,
    pub page_token: Option<&'a str>,
    pub label_ids: &'a [String],
    pub include_spam_trash: bool,
}

impl ListQuery<'_> {
    fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(q) = self.q {
            params.push(("q", q.to_owned()));
        }
        if let Some(max) = self.max_results {
            params.push(("maxResults", max.to_string()));
        }
        if let Some(token) = self.page_token {
            params.push(("pageToken", token.to_owned()));
        }
        for label in self.label_ids {
            params.push(("labelIds", label.clone()));
        }
        if self.include_spam_trash {
            params.push(("includeSpamTrash", "true".to_owned()));
        }
        params
    }
}

/// Gmail API client bound to one account
#[derive(Clone)]
pub struct GmailClient {
    http: reqwest::Client,
    base_url: String,
    user_id: String,
    token: SecretString,
    request_timeout: Duration,
}

impl GmailClient {
    pub fn new(http: reqwest::Client, config: &ServerConfig, account: &AccountConfig) -> Self {
        Self {
            http,
            base_url: config.api_base_url.clone(),
            user_id: account.user_id.clone(),
            token: account.access_token.clone(),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        }
    }

    pub async fn profile(&self) -> AppResult<Profile> {
        self.get("profile", &[]).await
    }

    pub async fn list_messages(&self, query: &ListQuery<'_>) -> AppResult<MessageList> {
        self.get("messages", &query.to_params()).await
    }

    pub async fn get_message(
        &self,
        message_id: &str,
        format: MessageFormat,
        metadata_headers: &[String],
    ) -> AppResult<Message> {
        let path = format!("messages/{}", segment(message_id));
        self.get(&path, &format_params(format, metadata_headers))
            .await
    }

    pub async fn send_message(&self, raw: String, thread_id: Option<&str>) -> AppResult<MessageRef> {
        self.post(
            "messages/send",
            Some(json!({ "raw": raw, "threadId": thread_id })),
        )
        .await
    }

    pub async fn modify_message(
        &self,
        message_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> AppResult<MessageRef> {
        let path = format!("messages/{}/modify", segment(message_id));
        self.post(&path, Some(label_changes(add_label_ids, remove_label_ids)))
            .await
    }

    pub async fn trash_message(&self, message_id: &str) -> AppResult<MessageRef> {
        self.post(&format!("messages/{}/trash", segment(message_id)), None)
            .await
    }

    pub async fn untrash_message(&self, message_id: &str) -> AppResult<MessageRef> {
        self.post(&format!("messages/{}/untrash", segment(message_id)), None)
            .await
    }

    /// Permanently delete a message, bypassing trash
    pub async fn delete_message(&self, message_id: &str) -> AppResult<()> {
        self.execute_empty(
            Method::DELETE,
            &format!("messages/{}", segment(message_id)),
            None,
        )
        .await
    }

    pub async fn batch_modify_messages(
        &self,
        ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> AppResult<()> {
        let mut body = label_changes(add_label_ids, remove_label_ids);
        body["ids"] = json!(ids);
        self.execute_empty(Method::POST, "messages/batchModify", Some(body))
            .await
    }

    pub async fn batch_delete_messages(&self, ids: &[String]) -> AppResult<()> {
        self.execute_empty(
            Method::POST,
            "messages/batchDelete",
            Some(json!({ "ids": ids })),
        )
        .await
    }

    pub async fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> AppResult<AttachmentData> {
        let path = format!(
            "messages/{}/attachments/{}",
            segment(message_id),
            segment(attachment_id)
        );
        self.get(&path, &[]).await
    }

    pub async fn list_threads(&self, query: &ListQuery<'_>) -> AppResult<ThreadList> {
        self.get("threads", &query.to_params()).await
    }

    pub async fn get_thread(
        &self,
        thread_id: &str,
        format: MessageFormat,
        metadata_headers: &[String],
    ) -> AppResult<Thread> {
        let path = format!("threads/{}", segment(thread_id));
        self.get(&path, &format_params(format, metadata_headers))
            .await
    }

    pub async fn modify_thread(
        &self,
        thread_id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> AppResult<Thread> {
        let path = format!("threads/{}/modify", segment(thread_id));
        self.post(&path, Some(label_changes(add_label_ids, remove_label_ids)))
            .await
    }

    pub async fn trash_thread(&self, thread_id: &str) -> AppResult<Thread> {
        self.post(&format!("threads/{}/trash", segment(thread_id)), None)
            .await
    }

    pub async fn untrash_thread(&self, thread_id: &str) -> AppResult<Thread> {
        self.post(&format!("threads/{}/untrash", segment(thread_id)), None)
            .await
    }

    pub async fn delete_thread(&self, thread_id: &str) -> AppResult<()> {
        self.execute_empty(
            Method::DELETE,
            &format!("threads/{}", segment(thread_id)),
            None,
        )
        .await
    }

    pub async fn list_drafts(&self, query: &ListQuery<'_>) -> AppResult<DraftList> {
        self.get("drafts", &query.to_params()).await
    }

    pub async fn get_draft(&self, draft_id: &str, format: MessageFormat) -> AppResult<Draft> {
        let path = format!("drafts/{}", segment(draft_id));
        self.get(&path, &format_params(format, &[])).await
    }

    pub async fn create_draft(&self, raw: String, thread_id: Option<&str>) -> AppResult<Draft> {
        self.post(
            "drafts",
            Some(json!({ "message": { "raw": raw, "threadId": thread_id } })),
        )
        .await
    }

    /// Replace a draft's message wholesale
    pub async fn update_draft(
        &self,
        draft_id: &str,
        raw: String,
        thread_id: Option<&str>,
    ) -> AppResult<Draft> {
        let path = format!("drafts/{}", segment(draft_id));
        let body = json!({ "id": draft_id, "message": { "raw": raw, "threadId": thread_id } });
        self.execute_json(Method::PUT, &path, &[], Some(body)).await
    }

    pub async fn send_draft(&self, draft_id: &str) -> AppResult<MessageRef> {
        self.post("drafts/send", Some(json!({ "id": draft_id })))
            .await
    }

    pub async fn delete_draft(&self, draft_id: &str) -> AppResult<()> {
        self.execute_empty(
            Method::DELETE,
            &format!("drafts/{}", segment(draft_id)),
            None,
        )
        .await
    }

    pub async fn list_labels(&self) -> AppResult<LabelList> {
        self.get("labels", &[]).await
    }

    pub async fn get_label(&self, label_id: &str) -> AppResult<Label> {
        self.get(&format!("labels/{}", segment(label_id)), &[]).await
    }

    pub async fn create_label(&self, label: Value) -> AppResult<Label> {
        self.post("labels", Some(label)).await
    }

    pub async fn update_label(&self, label_id: &str, label: Value) -> AppResult<Label> {
        let path = format!("labels/{}", segment(label_id));
        self.execute_json(Method::PATCH, &path, &[], Some(label))
            .await
    }

    pub async fn delete_label(&self, label_id: &str) -> AppResult<()> {
        self.execute_empty(
            Method::DELETE,
            &format!("labels/{}", segment(label_id)),
            None,
        )
        .await
    }

    pub async fn list_filters(&self) -> AppResult<FilterList> {
        self.get("settings/filters", &[]).await
    }

    pub async fn get_filter(&self, filter_id: &str) -> AppResult<Filter> {
        self.get(&format!("settings/filters/{}", segment(filter_id)), &[])
            .await
    }

    pub async fn create_filter(
        &self,
        criteria: &FilterCriteria,
        action: &FilterAction,
    ) -> AppResult<Filter> {
        self.post(
            "settings/filters",
            Some(json!({ "criteria": criteria, "action": action })),
        )
        .await
    }

    pub async fn delete_filter(&self, filter_id: &str) -> AppResult<()> {
        self.execute_empty(
            Method::DELETE,
            &format!("settings/filters/{}", segment(filter_id)),
            None,
        )
        .await
    }

    pub async fn get_vacation(&self) -> AppResult<VacationSettings> {
        self.get("settings/vacation", &[]).await
    }

    pub async fn set_vacation(&self, settings: &VacationSettings) -> AppResult<VacationSettings> {
        let body = serde_json::to_value(settings)
            .map_err(|e| AppError::Internal(format!("serialization failure: {e}")))?;
        self.execute_json(Method::PUT, "settings/vacation", &[], Some(body))
            .await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> AppResult<T> {
        self.execute_json(Method::GET, path, query, None).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: Option<Value>) -> AppResult<T> {
        self.execute_json(Method::POST, path, &[], body).await
    }

    async fn execute_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> AppResult<T> {
        let text = self.execute(method.clone(), path, query, body).await?;
        serde_json::from_str(&text).map_err(|e| {
            warn!(%method, path, error = %e, "unexpected gmail response shape");
            AppError::Schema(format!("{method} {path}: {e}"))
        })
    }

    /// Execute a call whose success response carries no resource
    async fn execute_empty(&self, method: Method, path: &str, body: Option<Value>) -> AppResult<()> {
        self.execute(method, path, &[], body).await.map(|_| ())
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> AppResult<String> {
        let url = format!(
            "{}/users/{}/{}",
            self.base_url,
            segment(&self.user_id),
            path
        );
        debug!(%method, path, "gmail request");

        let mut request = self
            .http
            .request(method.clone(), url)
            .bearer_auth(self.token.expose_secret())
            .query(query);
        if let Some(mut body) = body {
            prune_nulls(&mut body);
            request = request.json(&body);
        }

        let (status, text) = timeout(self.request_timeout, async {
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        })
        .await
        .map_err(|_| {
            AppError::Timeout(format!(
                "{method} {path} exceeded {} ms",
                self.request_timeout.as_millis()
            ))
        })?
        .map_err(|e| AppError::Upstream(format!("{method} {path} failed: {e}")))?;

        if status.is_success() {
            return Ok(text);
        }

        let detail = api_error_message(&text).unwrap_or_else(|| status.to_string());
        warn!(%method, path, status = status.as_u16(), "gmail request failed");
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AppError::AuthFailed(detail),
            StatusCode::NOT_FOUND => AppError::NotFound(format!("{path}: {detail}")),
            _ => AppError::Upstream(format!("{} {detail}", status.as_u16())),
        })
    }
}

impl MailTransport for GmailClient {
    async fn fetch_message(&self, message_id: &str) -> AppResult<Message> {
        self.get_message(message_id, MessageFormat::Full, &[]).await
    }

    async fn fetch_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> AppResult<AttachmentData> {
        self.get_attachment(message_id, attachment_id).await
    }

    async fn send_raw(&self, raw: String, thread_id: Option<&str>) -> AppResult<MessageRef> {
        self.send_message(raw, thread_id).await
    }
}

/// Percent-encode an identifier for use as a single path segment
fn segment(id: &str) -> String {
    urlencoding::encode(id).into_owned()
}

fn format_params(format: MessageFormat, metadata_headers: &[String]) -> Vec<(&'static str, String)> {
    let mut params = vec![("format", format.as_str().to_owned())];
    if format == MessageFormat::Metadata {
        for header in metadata_headers {
            params.push(("metadataHeaders", header.clone()));
        }
    }
    params
}

fn label_changes(add_label_ids: &[String], remove_label_ids: &[String]) -> Value {
    let non_empty = |ids: &[String]| (!ids.is_empty()).then(|| ids.to_vec());
    json!({
        "addLabelIds": non_empty(add_label_ids),
        "removeLabelIds": non_empty(remove_label_ids),
    })
}

/// Remove `null` members from JSON objects, recursively
pub fn prune_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(prune_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(prune_nulls),
        _ => {}
    }
}

/// Extract `error.message` from a Gmail error body
fn api_error_message(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    parsed
        .pointer("/error/message")
        .and_then(Value::as_str)
        .map(str::to_owned)
}
