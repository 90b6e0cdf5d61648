//! Input/output DTOs and schema-bearing types
//!
//! Defines all data structures used in MCP tool contracts. Each type is
//! annotated with `JsonSchema` for automatic schema generation. Gmail
//! resources returned by tools live in [`crate::resources`].

use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Metadata included in all tool responses
///
/// Provides timing information and current UTC timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Meta {
    /// Current UTC timestamp in RFC 3339 format with milliseconds
    pub now_utc: String,
    /// Tool execution duration in milliseconds
    pub duration_ms: u64,
}

impl Meta {
    /// Create metadata populated with current time and elapsed duration
    pub fn now(duration_ms: u64) -> Self {
        Self {
            now_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms,
        }
    }
}

/// Standard response envelope for all tools
///
/// Wraps tool-specific data with human-readable summary and execution metadata.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolEnvelope<T>
where
    T: JsonSchema,
{
    /// Human-readable summary of the operation outcome
    pub summary: String,
    /// Tool-specific data payload
    pub data: T,
    /// Execution metadata (timestamp, duration)
    pub meta: Meta,
}

/// Account metadata (no credentials)
///
/// Returned by `gmail_list_accounts`. The access token is intentionally excluded.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AccountInfo {
    /// Account identifier
    pub account_id: String,
    /// Gmail user id used in API paths (`me` for the token owner)
    pub user_id: String,
}

/// Message representation requested from the API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    /// Ids and labels only
    Minimal,
    /// Parsed payload tree with bodies
    #[default]
    Full,
    /// Entire message as base64url in `raw`
    Raw,
    /// Ids, labels and headers
    Metadata,
}

impl MessageFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Full => "full",
            Self::Raw => "raw",
            Self::Metadata => "metadata",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum LabelListVisibility {
    LabelShow,
    LabelShowIfUnread,
    LabelHide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageListVisibility {
    Show,
    Hide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SizeComparison {
    Larger,
    Smaller,
}

impl SizeComparison {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Larger => "larger",
            Self::Smaller => "smaller",
        }
    }
}

/// Input: account_id only
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AccountOnlyInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
}

/// Input: list messages or threads
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Gmail search query (e.g. `from:alice is:unread`)
    pub q: Option<String>,
    /// Maximum results per page (1..500, default 10)
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    /// Page token from a previous response
    pub page_token: Option<String>,
    /// Only return results carrying all of these label ids
    pub label_ids: Option<Vec<String>>,
    /// Include SPAM and TRASH
    #[serde(default)]
    pub include_spam_trash: bool,
}

/// Input: list drafts
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DraftsListInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Search query applied to drafts
    pub q: Option<String>,
    /// Maximum results per page (1..500, default 10)
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    /// Page token from a previous response
    pub page_token: Option<String>,
    /// Include SPAM and TRASH
    #[serde(default)]
    pub include_spam_trash: bool,
}

/// Input: get one message
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MessageGetInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Gmail message id
    pub message_id: String,
    /// Response format (default `full`)
    #[serde(default)]
    pub format: MessageFormat,
    /// Headers to include when `format=metadata`
    pub metadata_headers: Option<Vec<String>>,
}

/// Input: get one thread (`raw` format is not supported for threads)
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ThreadGetInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Gmail thread id
    pub thread_id: String,
    /// Response format for contained messages (default `full`)
    #[serde(default)]
    pub format: MessageFormat,
    /// Headers to include when `format=metadata`
    pub metadata_headers: Option<Vec<String>>,
}

/// File attachment supplied by the caller
///
/// Exactly one of `content` or `path` must be set.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AttachmentInput {
    /// File name shown to recipients (required with `content`, defaults to the path's name)
    pub filename: Option<String>,
    /// MIME type (defaults to a lookup by file extension)
    pub mime_type: Option<String>,
    /// File bytes as base64 (whitespace and missing padding tolerated)
    pub content: Option<String>,
    /// File path beneath `GMAIL_MCP_ATTACHMENT_ROOT`
    pub path: Option<String>,
}

/// Inline image referenced from an HTML body via `cid:`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct InlineImageInput {
    /// Content-ID, with or without angle brackets (`logo` or `<logo>`)
    pub content_id: String,
    /// Image MIME type (must start with `image/`)
    pub mime_type: String,
    /// Image bytes as base64
    pub content: String,
}

/// Message content shared by send, draft create and draft update
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MessageContent {
    /// Recipients, comma-separated
    pub to: String,
    /// Subject line
    pub subject: String,
    /// Body text (plain text unless `is_html=true`)
    pub body: String,
    /// Treat `body` as HTML
    #[serde(default)]
    pub is_html: bool,
    /// Cc recipients, comma-separated
    pub cc: Option<String>,
    /// Bcc recipients, comma-separated
    pub bcc: Option<String>,
    /// Sender address (for send-as aliases)
    pub from: Option<String>,
    /// Thread to attach the message to
    pub thread_id: Option<String>,
    /// Message-ID header of the message being replied to
    pub in_reply_to: Option<String>,
    /// File attachments
    #[serde(default)]
    pub attachments: Vec<AttachmentInput>,
    /// Inline images (HTML bodies only)
    #[serde(default)]
    pub inline_images: Vec<InlineImageInput>,
}

/// Input: send a new message
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MessageSendInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    #[serde(flatten)]
    pub message: MessageContent,
}

/// Input: forward an existing message with its attachments
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MessageForwardInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Id of the message to forward
    pub message_id: String,
    /// Recipients, comma-separated
    pub to: String,
    /// Note placed above the forwarded content
    pub note: Option<String>,
    /// Sender address (for send-as aliases)
    pub from: Option<String>,
    /// Cc recipients, comma-separated
    pub cc: Option<String>,
    /// Bcc recipients, comma-separated
    pub bcc: Option<String>,
}

/// Input: message id only
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MessageIdInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Gmail message id
    pub message_id: String,
}

/// Input: permanently delete a message
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MessageDeleteInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Gmail message id
    pub message_id: String,
    /// Explicit confirmation required (must be `true`); deletion skips trash
    pub confirm: bool,
}

/// Input: add or remove labels on a message
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MessageModifyInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Gmail message id
    pub message_id: String,
    /// Label ids to add
    pub add_label_ids: Option<Vec<String>>,
    /// Label ids to remove
    pub remove_label_ids: Option<Vec<String>>,
}

/// Input: add or remove labels on many messages
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct BatchModifyInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Message ids (1..1000)
    pub ids: Vec<String>,
    /// Label ids to add
    pub add_label_ids: Option<Vec<String>>,
    /// Label ids to remove
    pub remove_label_ids: Option<Vec<String>>,
}

/// Input: permanently delete many messages
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct BatchDeleteInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Message ids (1..1000)
    pub ids: Vec<String>,
    /// Explicit confirmation required (must be `true`); deletion skips trash
    pub confirm: bool,
}

/// Input: fetch attachment bytes
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AttachmentGetInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Message containing the attachment
    pub message_id: String,
    /// Attachment id from the message payload
    pub attachment_id: String,
}

/// Input: thread id only
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ThreadIdInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Gmail thread id
    pub thread_id: String,
}

/// Input: permanently delete a thread
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ThreadDeleteInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Gmail thread id
    pub thread_id: String,
    /// Explicit confirmation required (must be `true`); deletion skips trash
    pub confirm: bool,
}

/// Input: add or remove labels on every message in a thread
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ThreadModifyInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Gmail thread id
    pub thread_id: String,
    /// Label ids to add
    pub add_label_ids: Option<Vec<String>>,
    /// Label ids to remove
    pub remove_label_ids: Option<Vec<String>>,
}

/// Input: draft id only
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DraftIdInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Gmail draft id
    pub draft_id: String,
}

/// Input: get one draft
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DraftGetInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Gmail draft id
    pub draft_id: String,
    /// Format of the draft's message (default `full`)
    #[serde(default)]
    pub format: MessageFormat,
}

/// Input: replace a draft's message
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DraftUpdateInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Gmail draft id
    pub draft_id: String,
    #[serde(flatten)]
    pub message: MessageContent,
}

/// Input: label id only
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct LabelIdInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Gmail label id (e.g. `Label_12`)
    pub label_id: String,
}

/// Input: create a label
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct LabelCreateInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Display name (nested labels use `/`, e.g. `Work/Clients`)
    pub name: String,
    pub label_list_visibility: Option<LabelListVisibility>,
    pub message_list_visibility: Option<MessageListVisibility>,
    /// Background color hex code (e.g. `#16a765`)
    pub background_color: Option<String>,
    /// Text color hex code (e.g. `#ffffff`)
    pub text_color: Option<String>,
}

/// Input: update a label
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct LabelUpdateInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Gmail label id
    pub label_id: String,
    /// New display name
    pub name: Option<String>,
    pub label_list_visibility: Option<LabelListVisibility>,
    pub message_list_visibility: Option<MessageListVisibility>,
    /// Background color hex code
    pub background_color: Option<String>,
    /// Text color hex code
    pub text_color: Option<String>,
}

/// Input: filter id only
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct FilterIdInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Gmail filter id
    pub filter_id: String,
}

/// Input: create a filter
///
/// At least one criterion and one action are required.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct FilterCreateInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Match sender
    pub from: Option<String>,
    /// Match recipient
    pub to: Option<String>,
    /// Match subject
    pub subject: Option<String>,
    /// Match a Gmail search query
    pub query: Option<String>,
    /// Exclude messages matching this query
    pub negated_query: Option<String>,
    pub has_attachment: Option<bool>,
    pub exclude_chats: Option<bool>,
    /// Size threshold in bytes (requires `size_comparison`)
    pub size: Option<u64>,
    pub size_comparison: Option<SizeComparison>,
    /// Label ids to add to matching mail
    pub add_label_ids: Option<Vec<String>>,
    /// Label ids to remove from matching mail
    pub remove_label_ids: Option<Vec<String>>,
    /// Verified forwarding address
    pub forward: Option<String>,
}

/// Input: configure the vacation responder
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct VacationSetInput {
    /// Account identifier (defaults to `"default"`)
    #[serde(default = "default_account_id")]
    pub account_id: String,
    /// Enable or disable the auto-reply
    pub enable_auto_reply: bool,
    pub response_subject: Option<String>,
    pub response_body_plain_text: Option<String>,
    pub response_body_html: Option<String>,
    /// Only reply to known contacts
    pub restrict_to_contacts: Option<bool>,
    /// Only reply within the account's domain
    pub restrict_to_domain: Option<bool>,
    /// Start time in epoch milliseconds
    pub start_time: Option<String>,
    /// End time in epoch milliseconds
    pub end_time: Option<String>,
}

/// Default value for `account_id` field
pub fn default_account_id() -> String {
    "default".to_owned()
}

/// Default page size for list tools
fn default_max_results() -> u32 {
    10
}
