//! MCP server implementation with tool handlers
//!
//! Implements the `ServerHandler` trait and registers one MCP tool per Gmail
//! mailbox operation. Handles input validation, the write gate, message
//! composition, and response formatting.

use std::sync::Arc;
use std::time::Instant;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{ErrorData, ServerCapabilities, ServerInfo};
use rmcp::{Json, ServerHandler, tool, tool_handler, tool_router};
use serde_json::{Value, json};

use crate::attachments::{AttachmentPolicy, resolve_parts};
use crate::compose::{OutgoingMessage, encode_raw_message, validate_header_value};
use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};
use crate::forward::{ForwardRequest, forward_message};
use crate::gmail::{GmailClient, ListQuery, build_http_client};
use crate::models::{
    AccountInfo, AccountOnlyInput, AttachmentGetInput, BatchDeleteInput, BatchModifyInput,
    DraftGetInput, DraftIdInput, DraftUpdateInput, DraftsListInput, FilterCreateInput,
    FilterIdInput, LabelCreateInput, LabelIdInput, LabelUpdateInput, ListInput, MessageContent,
    MessageDeleteInput, MessageForwardInput, MessageFormat, MessageGetInput, MessageIdInput,
    MessageModifyInput, MessageSendInput, Meta, ThreadDeleteInput, ThreadGetInput, ThreadIdInput,
    ThreadModifyInput, ToolEnvelope, VacationSetInput,
};
use crate::resources::{
    AttachmentData, Draft, DraftList, Filter, FilterAction, FilterCriteria, FilterList, Label,
    LabelList, Message, MessageList, MessageRef, Profile, Thread, ThreadList, VacationSettings,
};

/// Maximum results per list page accepted by the Gmail API
const MAX_PAGE_SIZE: usize = 500;
/// Maximum ids per batch call accepted by the Gmail API
const MAX_BATCH_IDS: usize = 1_000;
/// Maximum identifier length
const MAX_ID_CHARS: usize = 256;
/// Maximum label name length enforced by Gmail
const MAX_LABEL_NAME_CHARS: usize = 225;

/// Gmail MCP server
///
/// Holds shared configuration and the HTTP connection pool. Implements MCP
/// tool handlers via `#[tool]` attribute macro and `ServerHandler` trait.
#[derive(Clone)]
pub struct GmailMcpServer {
    /// Server config (accounts, timeouts, write flag)
    config: Arc<ServerConfig>,
    /// Connection pool shared by every account
    http: reqwest::Client,
    /// Tool router for dispatching MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl GmailMcpServer {
    /// Create a new MCP server instance
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the HTTP client cannot be built.
    pub fn new(config: ServerConfig) -> AppResult<Self> {
        let http = build_http_client(&config)?;
        Ok(Self {
            config: Arc::new(config),
            http,
            tool_router: Self::tool_router(),
        })
    }

    /// Tool: List configured Gmail accounts
    ///
    /// Returns account ids and user ids without exposing tokens.
    #[tool(
        name = "gmail_list_accounts",
        description = "List configured Gmail accounts",
        annotations(read_only_hint = true)
    )]
    async fn list_accounts(&self) -> Result<Json<ToolEnvelope<Vec<AccountInfo>>>, ErrorData> {
        let started = Instant::now();
        let data = self
            .config
            .accounts
            .values()
            .map(|a| AccountInfo {
                account_id: a.account_id.clone(),
                user_id: a.user_id.clone(),
            })
            .collect::<Vec<_>>();
        finalize_tool(
            started,
            Ok((format!("{} account(s) configured", data.len()), data)),
        )
    }

    #[tool(
        name = "gmail_profile_get",
        description = "Get the mailbox owner's email address and message/thread totals",
        annotations(read_only_hint = true)
    )]
    async fn profile_get(
        &self,
        Parameters(input): Parameters<AccountOnlyInput>,
    ) -> Result<Json<ToolEnvelope<Profile>>, ErrorData> {
        let started = Instant::now();
        let result = match self.client(&input.account_id) {
            Ok(client) => client.profile().await,
            Err(e) => Err(e),
        };
        finalize_tool(
            started,
            result.map(|p| (format!("Profile for {}", p.email_address), p)),
        )
    }

    /// Tool: List message ids matching a Gmail search query
    #[tool(
        name = "gmail_messages_list",
        description = "List messages matching a Gmail search query (returns ids; use gmail_message_get for content)",
        annotations(read_only_hint = true)
    )]
    async fn messages_list(
        &self,
        Parameters(input): Parameters<ListInput>,
    ) -> Result<Json<ToolEnvelope<MessageList>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.messages_list_impl(input)
                .await
                .map(|list| (format!("{} message(s) returned", list.messages.len()), list)),
        )
    }

    #[tool(
        name = "gmail_message_get",
        description = "Get a message by id in minimal, full, raw or metadata format",
        annotations(read_only_hint = true)
    )]
    async fn message_get(
        &self,
        Parameters(input): Parameters<MessageGetInput>,
    ) -> Result<Json<ToolEnvelope<Message>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.message_get_impl(input)
                .await
                .map(|m| ("Message retrieved".to_owned(), m)),
        )
    }

    /// Tool: Compose and send a message
    ///
    /// Supports HTML bodies, inline images and attachments. Requires
    /// `GMAIL_MCP_WRITE_ENABLED=true`.
    #[tool(
        name = "gmail_message_send",
        description = "Send an email (plain text or HTML, with optional attachments and inline images). Set thread_id and in_reply_to to reply."
    )]
    async fn message_send(
        &self,
        Parameters(input): Parameters<MessageSendInput>,
    ) -> Result<Json<ToolEnvelope<MessageRef>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.message_send_impl(input)
                .await
                .map(|sent| (format!("Message {} sent", sent.id), sent)),
        )
    }

    /// Tool: Forward a message with its attachments and inline images
    ///
    /// The forward is sent in the original thread. Requires
    /// `GMAIL_MCP_WRITE_ENABLED=true`.
    #[tool(
        name = "gmail_message_forward",
        description = "Forward a message to new recipients, preserving attachments and inline images, with an optional note"
    )]
    async fn message_forward(
        &self,
        Parameters(input): Parameters<MessageForwardInput>,
    ) -> Result<Json<ToolEnvelope<MessageRef>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.message_forward_impl(input)
                .await
                .map(|sent| (format!("Message forwarded as {}", sent.id), sent)),
        )
    }

    #[tool(
        name = "gmail_message_modify",
        description = "Add or remove labels on a message (e.g. remove UNREAD to mark read)"
    )]
    async fn message_modify(
        &self,
        Parameters(input): Parameters<MessageModifyInput>,
    ) -> Result<Json<ToolEnvelope<MessageRef>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.message_modify_impl(input)
                .await
                .map(|m| ("Message labels updated".to_owned(), m)),
        )
    }

    #[tool(
        name = "gmail_message_archive",
        description = "Archive a message (remove it from the inbox)"
    )]
    async fn message_archive(
        &self,
        Parameters(input): Parameters<MessageIdInput>,
    ) -> Result<Json<ToolEnvelope<MessageRef>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.message_archive_impl(input)
                .await
                .map(|m| ("Message archived".to_owned(), m)),
        )
    }

    #[tool(name = "gmail_message_trash", description = "Move a message to trash")]
    async fn message_trash(
        &self,
        Parameters(input): Parameters<MessageIdInput>,
    ) -> Result<Json<ToolEnvelope<MessageRef>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.message_trash_impl(input, true)
                .await
                .map(|m| ("Message moved to trash".to_owned(), m)),
        )
    }

    #[tool(name = "gmail_message_untrash", description = "Restore a message from trash")]
    async fn message_untrash(
        &self,
        Parameters(input): Parameters<MessageIdInput>,
    ) -> Result<Json<ToolEnvelope<MessageRef>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.message_trash_impl(input, false)
                .await
                .map(|m| ("Message restored from trash".to_owned(), m)),
        )
    }

    /// Tool: Permanently delete a message
    ///
    /// Bypasses trash. Requires explicit `confirm=true` and
    /// `GMAIL_MCP_WRITE_ENABLED=true`.
    #[tool(
        name = "gmail_message_delete",
        description = "Permanently delete a message (skips trash; requires confirm=true)",
        annotations(destructive_hint = true)
    )]
    async fn message_delete(
        &self,
        Parameters(input): Parameters<MessageDeleteInput>,
    ) -> Result<Json<ToolEnvelope<Value>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.message_delete_impl(input)
                .await
                .map(|data| ("Message permanently deleted".to_owned(), data)),
        )
    }

    #[tool(
        name = "gmail_messages_batch_modify",
        description = "Add or remove labels on up to 1000 messages"
    )]
    async fn messages_batch_modify(
        &self,
        Parameters(input): Parameters<BatchModifyInput>,
    ) -> Result<Json<ToolEnvelope<Value>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.batch_modify_impl(input).await.map(|data| {
                (
                    format!("Labels updated on {} message(s)", data["count"]),
                    data,
                )
            }),
        )
    }

    #[tool(
        name = "gmail_messages_batch_delete",
        description = "Permanently delete up to 1000 messages (skips trash; requires confirm=true)",
        annotations(destructive_hint = true)
    )]
    async fn messages_batch_delete(
        &self,
        Parameters(input): Parameters<BatchDeleteInput>,
    ) -> Result<Json<ToolEnvelope<Value>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.batch_delete_impl(input).await.map(|data| {
                (
                    format!("{} message(s) permanently deleted", data["count"]),
                    data,
                )
            }),
        )
    }

    #[tool(
        name = "gmail_attachment_get",
        description = "Download attachment bytes (base64url) by message id and attachment id",
        annotations(read_only_hint = true)
    )]
    async fn attachment_get(
        &self,
        Parameters(input): Parameters<AttachmentGetInput>,
    ) -> Result<Json<ToolEnvelope<AttachmentData>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.attachment_get_impl(input)
                .await
                .map(|a| (format!("Attachment retrieved ({} bytes)", a.size), a)),
        )
    }

    #[tool(
        name = "gmail_threads_list",
        description = "List conversation threads matching a Gmail search query",
        annotations(read_only_hint = true)
    )]
    async fn threads_list(
        &self,
        Parameters(input): Parameters<ListInput>,
    ) -> Result<Json<ToolEnvelope<ThreadList>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.threads_list_impl(input)
                .await
                .map(|list| (format!("{} thread(s) returned", list.threads.len()), list)),
        )
    }

    #[tool(
        name = "gmail_thread_get",
        description = "Get a thread with all of its messages",
        annotations(read_only_hint = true)
    )]
    async fn thread_get(
        &self,
        Parameters(input): Parameters<ThreadGetInput>,
    ) -> Result<Json<ToolEnvelope<Thread>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.thread_get_impl(input)
                .await
                .map(|t| (format!("Thread with {} message(s)", t.messages.len()), t)),
        )
    }

    #[tool(
        name = "gmail_thread_modify",
        description = "Add or remove labels on every message in a thread"
    )]
    async fn thread_modify(
        &self,
        Parameters(input): Parameters<ThreadModifyInput>,
    ) -> Result<Json<ToolEnvelope<Thread>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.thread_modify_impl(input)
                .await
                .map(|t| ("Thread labels updated".to_owned(), t)),
        )
    }

    #[tool(name = "gmail_thread_trash", description = "Move a thread to trash")]
    async fn thread_trash(
        &self,
        Parameters(input): Parameters<ThreadIdInput>,
    ) -> Result<Json<ToolEnvelope<Thread>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.thread_trash_impl(input, true)
                .await
                .map(|t| ("Thread moved to trash".to_owned(), t)),
        )
    }

    #[tool(name = "gmail_thread_untrash", description = "Restore a thread from trash")]
    async fn thread_untrash(
        &self,
        Parameters(input): Parameters<ThreadIdInput>,
    ) -> Result<Json<ToolEnvelope<Thread>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.thread_trash_impl(input, false)
                .await
                .map(|t| ("Thread restored from trash".to_owned(), t)),
        )
    }

    #[tool(
        name = "gmail_thread_delete",
        description = "Permanently delete a thread (skips trash; requires confirm=true)",
        annotations(destructive_hint = true)
    )]
    async fn thread_delete(
        &self,
        Parameters(input): Parameters<ThreadDeleteInput>,
    ) -> Result<Json<ToolEnvelope<Value>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.thread_delete_impl(input)
                .await
                .map(|data| ("Thread permanently deleted".to_owned(), data)),
        )
    }

    #[tool(
        name = "gmail_drafts_list",
        description = "List drafts",
        annotations(read_only_hint = true)
    )]
    async fn drafts_list(
        &self,
        Parameters(input): Parameters<DraftsListInput>,
    ) -> Result<Json<ToolEnvelope<DraftList>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.drafts_list_impl(input)
                .await
                .map(|list| (format!("{} draft(s) returned", list.drafts.len()), list)),
        )
    }

    #[tool(
        name = "gmail_draft_get",
        description = "Get a draft by id",
        annotations(read_only_hint = true)
    )]
    async fn draft_get(
        &self,
        Parameters(input): Parameters<DraftGetInput>,
    ) -> Result<Json<ToolEnvelope<Draft>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.draft_get_impl(input)
                .await
                .map(|d| ("Draft retrieved".to_owned(), d)),
        )
    }

    #[tool(
        name = "gmail_draft_create",
        description = "Create a draft (plain text or HTML, with optional attachments and inline images)"
    )]
    async fn draft_create(
        &self,
        Parameters(input): Parameters<MessageSendInput>,
    ) -> Result<Json<ToolEnvelope<Draft>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.draft_create_impl(input)
                .await
                .map(|d| (format!("Draft {} created", d.id), d)),
        )
    }

    /// Tool: Replace a draft's message
    ///
    /// The whole message is recomposed; omitted fields are not carried over
    /// from the previous version.
    #[tool(
        name = "gmail_draft_update",
        description = "Replace the content of an existing draft (the whole message is replaced)"
    )]
    async fn draft_update(
        &self,
        Parameters(input): Parameters<DraftUpdateInput>,
    ) -> Result<Json<ToolEnvelope<Draft>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.draft_update_impl(input)
                .await
                .map(|d| (format!("Draft {} updated", d.id), d)),
        )
    }

    #[tool(name = "gmail_draft_send", description = "Send an existing draft")]
    async fn draft_send(
        &self,
        Parameters(input): Parameters<DraftIdInput>,
    ) -> Result<Json<ToolEnvelope<MessageRef>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.draft_send_impl(input)
                .await
                .map(|m| (format!("Draft sent as message {}", m.id), m)),
        )
    }

    #[tool(
        name = "gmail_draft_delete",
        description = "Permanently delete a draft",
        annotations(destructive_hint = true)
    )]
    async fn draft_delete(
        &self,
        Parameters(input): Parameters<DraftIdInput>,
    ) -> Result<Json<ToolEnvelope<Value>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.draft_delete_impl(input)
                .await
                .map(|data| ("Draft deleted".to_owned(), data)),
        )
    }

    #[tool(
        name = "gmail_labels_list",
        description = "List system and user labels",
        annotations(read_only_hint = true)
    )]
    async fn labels_list(
        &self,
        Parameters(input): Parameters<AccountOnlyInput>,
    ) -> Result<Json<ToolEnvelope<LabelList>>, ErrorData> {
        let started = Instant::now();
        let result = match self.client(&input.account_id) {
            Ok(client) => client.list_labels().await,
            Err(e) => Err(e),
        };
        finalize_tool(
            started,
            result.map(|list| (format!("{} label(s)", list.labels.len()), list)),
        )
    }

    #[tool(
        name = "gmail_label_get",
        description = "Get a label with message and thread counts",
        annotations(read_only_hint = true)
    )]
    async fn label_get(
        &self,
        Parameters(input): Parameters<LabelIdInput>,
    ) -> Result<Json<ToolEnvelope<Label>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.label_get_impl(input)
                .await
                .map(|l| (format!("Label '{}'", l.name), l)),
        )
    }

    #[tool(name = "gmail_label_create", description = "Create a user label")]
    async fn label_create(
        &self,
        Parameters(input): Parameters<LabelCreateInput>,
    ) -> Result<Json<ToolEnvelope<Label>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.label_create_impl(input)
                .await
                .map(|l| (format!("Label '{}' created", l.name), l)),
        )
    }

    #[tool(
        name = "gmail_label_update",
        description = "Rename a label or change its visibility or color"
    )]
    async fn label_update(
        &self,
        Parameters(input): Parameters<LabelUpdateInput>,
    ) -> Result<Json<ToolEnvelope<Label>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.label_update_impl(input)
                .await
                .map(|l| (format!("Label '{}' updated", l.name), l)),
        )
    }

    #[tool(
        name = "gmail_label_delete",
        description = "Delete a user label (messages keep their other labels)",
        annotations(destructive_hint = true)
    )]
    async fn label_delete(
        &self,
        Parameters(input): Parameters<LabelIdInput>,
    ) -> Result<Json<ToolEnvelope<Value>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.label_delete_impl(input)
                .await
                .map(|data| ("Label deleted".to_owned(), data)),
        )
    }

    #[tool(
        name = "gmail_filters_list",
        description = "List mail filters",
        annotations(read_only_hint = true)
    )]
    async fn filters_list(
        &self,
        Parameters(input): Parameters<AccountOnlyInput>,
    ) -> Result<Json<ToolEnvelope<FilterList>>, ErrorData> {
        let started = Instant::now();
        let result = match self.client(&input.account_id) {
            Ok(client) => client.list_filters().await,
            Err(e) => Err(e),
        };
        finalize_tool(
            started,
            result.map(|list| (format!("{} filter(s)", list.filter.len()), list)),
        )
    }

    #[tool(
        name = "gmail_filter_get",
        description = "Get a mail filter by id",
        annotations(read_only_hint = true)
    )]
    async fn filter_get(
        &self,
        Parameters(input): Parameters<FilterIdInput>,
    ) -> Result<Json<ToolEnvelope<Filter>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.filter_get_impl(input)
                .await
                .map(|f| ("Filter retrieved".to_owned(), f)),
        )
    }

    #[tool(
        name = "gmail_filter_create",
        description = "Create a mail filter from match criteria and actions"
    )]
    async fn filter_create(
        &self,
        Parameters(input): Parameters<FilterCreateInput>,
    ) -> Result<Json<ToolEnvelope<Filter>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.filter_create_impl(input)
                .await
                .map(|f| (format!("Filter {} created", f.id), f)),
        )
    }

    #[tool(
        name = "gmail_filter_delete",
        description = "Delete a mail filter",
        annotations(destructive_hint = true)
    )]
    async fn filter_delete(
        &self,
        Parameters(input): Parameters<FilterIdInput>,
    ) -> Result<Json<ToolEnvelope<Value>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.filter_delete_impl(input)
                .await
                .map(|data| ("Filter deleted".to_owned(), data)),
        )
    }

    #[tool(
        name = "gmail_vacation_get",
        description = "Get vacation auto-reply settings",
        annotations(read_only_hint = true)
    )]
    async fn vacation_get(
        &self,
        Parameters(input): Parameters<AccountOnlyInput>,
    ) -> Result<Json<ToolEnvelope<VacationSettings>>, ErrorData> {
        let started = Instant::now();
        let result = match self.client(&input.account_id) {
            Ok(client) => client.get_vacation().await,
            Err(e) => Err(e),
        };
        finalize_tool(started, result.map(|v| (vacation_summary(&v), v)))
    }

    #[tool(
        name = "gmail_vacation_set",
        description = "Set vacation auto-reply settings (enable_auto_reply=false disables it)"
    )]
    async fn vacation_set(
        &self,
        Parameters(input): Parameters<VacationSetInput>,
    ) -> Result<Json<ToolEnvelope<VacationSettings>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            self.vacation_set_impl(input)
                .await
                .map(|v| (vacation_summary(&v), v)),
        )
    }
}

/// MCP server handler implementation
///
/// Provides server info and capabilities to MCP client.
#[tool_handler(router = self.tool_router)]
impl ServerHandler for GmailMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build()).with_instructions(
            "Gmail MCP server. Read operations are enabled by default; send, modify, trash, delete and settings tools require GMAIL_MCP_WRITE_ENABLED=true.",
        )
    }
}

/// Tool implementation methods
///
/// Private methods handle the actual business logic for each tool, separated
/// from the public `#[tool]` methods that handle response formatting.
impl GmailMcpServer {
    /// Resolve an account into a client, validating the id first
    fn client(&self, account_id: &str) -> AppResult<GmailClient> {
        validate_account_id(account_id)?;
        let account = self.config.get_account(account_id)?;
        Ok(GmailClient::new(self.http.clone(), &self.config, account))
    }

    async fn messages_list_impl(&self, input: ListInput) -> AppResult<MessageList> {
        validate_list_input(&input)?;
        let client = self.client(&input.account_id)?;
        client.list_messages(&list_query(&input)).await
    }

    async fn message_get_impl(&self, input: MessageGetInput) -> AppResult<Message> {
        validate_id(&input.message_id, "message_id")?;
        let headers = input.metadata_headers.unwrap_or_default();
        validate_metadata_headers(&headers)?;
        let client = self.client(&input.account_id)?;
        client
            .get_message(&input.message_id, input.format, &headers)
            .await
    }

    async fn message_send_impl(&self, input: MessageSendInput) -> AppResult<MessageRef> {
        require_write_enabled(&self.config)?;
        let client = self.client(&input.account_id)?;
        let raw = self.compose_raw(&input.message).await?;
        client
            .send_message(raw, input.message.thread_id.as_deref())
            .await
    }

    async fn message_forward_impl(&self, input: MessageForwardInput) -> AppResult<MessageRef> {
        require_write_enabled(&self.config)?;
        validate_id(&input.message_id, "message_id")?;
        validate_recipients(&input.to)?;
        for (field, value) in [
            ("cc", &input.cc),
            ("bcc", &input.bcc),
            ("from", &input.from),
        ] {
            if let Some(value) = value {
                validate_header_value(field, value)?;
            }
        }
        let client = self.client(&input.account_id)?;
        let request = ForwardRequest {
            message_id: input.message_id,
            to: input.to,
            note: input.note,
            from: input.from,
            cc: input.cc,
            bcc: input.bcc,
            max_attachment_bytes: Some(self.config.max_attachment_bytes),
        };
        forward_message(&client, &request).await
    }

    async fn message_modify_impl(&self, input: MessageModifyInput) -> AppResult<MessageRef> {
        require_write_enabled(&self.config)?;
        validate_id(&input.message_id, "message_id")?;
        let (add, remove) = label_changes(input.add_label_ids, input.remove_label_ids)?;
        let client = self.client(&input.account_id)?;
        client.modify_message(&input.message_id, &add, &remove).await
    }

    async fn message_archive_impl(&self, input: MessageIdInput) -> AppResult<MessageRef> {
        require_write_enabled(&self.config)?;
        validate_id(&input.message_id, "message_id")?;
        let client = self.client(&input.account_id)?;
        client
            .modify_message(&input.message_id, &[], &["INBOX".to_owned()])
            .await
    }

    async fn message_trash_impl(&self, input: MessageIdInput, trash: bool) -> AppResult<MessageRef> {
        require_write_enabled(&self.config)?;
        validate_id(&input.message_id, "message_id")?;
        let client = self.client(&input.account_id)?;
        if trash {
            client.trash_message(&input.message_id).await
        } else {
            client.untrash_message(&input.message_id).await
        }
    }

    async fn message_delete_impl(&self, input: MessageDeleteInput) -> AppResult<Value> {
        require_write_enabled(&self.config)?;
        require_confirm(input.confirm)?;
        validate_id(&input.message_id, "message_id")?;
        let client = self.client(&input.account_id)?;
        client.delete_message(&input.message_id).await?;
        Ok(json!({
            "account_id": input.account_id,
            "message_id": input.message_id,
            "deleted": true,
        }))
    }

    async fn batch_modify_impl(&self, input: BatchModifyInput) -> AppResult<Value> {
        require_write_enabled(&self.config)?;
        validate_batch_ids(&input.ids)?;
        let (add, remove) = label_changes(input.add_label_ids, input.remove_label_ids)?;
        let client = self.client(&input.account_id)?;
        client.batch_modify_messages(&input.ids, &add, &remove).await?;
        Ok(json!({
            "account_id": input.account_id,
            "count": input.ids.len(),
            "add_label_ids": add,
            "remove_label_ids": remove,
        }))
    }

    async fn batch_delete_impl(&self, input: BatchDeleteInput) -> AppResult<Value> {
        require_write_enabled(&self.config)?;
        require_confirm(input.confirm)?;
        validate_batch_ids(&input.ids)?;
        let client = self.client(&input.account_id)?;
        client.batch_delete_messages(&input.ids).await?;
        Ok(json!({
            "account_id": input.account_id,
            "count": input.ids.len(),
            "deleted": true,
        }))
    }

    async fn attachment_get_impl(&self, input: AttachmentGetInput) -> AppResult<AttachmentData> {
        validate_id(&input.message_id, "message_id")?;
        validate_id(&input.attachment_id, "attachment_id")?;
        let client = self.client(&input.account_id)?;
        client
            .get_attachment(&input.message_id, &input.attachment_id)
            .await
    }

    async fn threads_list_impl(&self, input: ListInput) -> AppResult<ThreadList> {
        validate_list_input(&input)?;
        let client = self.client(&input.account_id)?;
        client.list_threads(&list_query(&input)).await
    }

    async fn thread_get_impl(&self, input: ThreadGetInput) -> AppResult<Thread> {
        validate_id(&input.thread_id, "thread_id")?;
        if input.format == MessageFormat::Raw {
            return Err(AppError::invalid("threads do not support format=raw"));
        }
        let headers = input.metadata_headers.unwrap_or_default();
        validate_metadata_headers(&headers)?;
        let client = self.client(&input.account_id)?;
        client
            .get_thread(&input.thread_id, input.format, &headers)
            .await
    }

    async fn thread_modify_impl(&self, input: ThreadModifyInput) -> AppResult<Thread> {
        require_write_enabled(&self.config)?;
        validate_id(&input.thread_id, "thread_id")?;
        let (add, remove) = label_changes(input.add_label_ids, input.remove_label_ids)?;
        let client = self.client(&input.account_id)?;
        client.modify_thread(&input.thread_id, &add, &remove).await
    }

    async fn thread_trash_impl(&self, input: ThreadIdInput, trash: bool) -> AppResult<Thread> {
        require_write_enabled(&self.config)?;
        validate_id(&input.thread_id, "thread_id")?;
        let client = self.client(&input.account_id)?;
        if trash {
            client.trash_thread(&input.thread_id).await
        } else {
            client.untrash_thread(&input.thread_id).await
        }
    }

    async fn thread_delete_impl(&self, input: ThreadDeleteInput) -> AppResult<Value> {
        require_write_enabled(&self.config)?;
        require_confirm(input.confirm)?;
        validate_id(&input.thread_id, "thread_id")?;
        let client = self.client(&input.account_id)?;
        client.delete_thread(&input.thread_id).await?;
        Ok(json!({
            "account_id": input.account_id,
            "thread_id": input.thread_id,
            "deleted": true,
        }))
    }

    async fn drafts_list_impl(&self, input: DraftsListInput) -> AppResult<DraftList> {
        validate_range(input.max_results as usize, 1, MAX_PAGE_SIZE, "max_results")?;
        if let Some(q) = &input.q {
            validate_text(q, "q", 1_024)?;
        }
        if let Some(token) = &input.page_token {
            validate_id(token, "page_token")?;
        }
        let client = self.client(&input.account_id)?;
        client
            .list_drafts(&ListQuery {
                q: input.q.as_deref(),
                max_results: Some(input.max_results),
                page_token: input.page_token.as_deref(),
                label_ids: &[],
                include_spam_trash: input.include_spam_trash,
            })
            .await
    }

    async fn draft_get_impl(&self, input: DraftGetInput) -> AppResult<Draft> {
        validate_id(&input.draft_id, "draft_id")?;
        let client = self.client(&input.account_id)?;
        client.get_draft(&input.draft_id, input.format).await
    }

    async fn draft_create_impl(&self, input: MessageSendInput) -> AppResult<Draft> {
        require_write_enabled(&self.config)?;
        let client = self.client(&input.account_id)?;
        let raw = self.compose_raw(&input.message).await?;
        client
            .create_draft(raw, input.message.thread_id.as_deref())
            .await
    }

    async fn draft_update_impl(&self, input: DraftUpdateInput) -> AppResult<Draft> {
        require_write_enabled(&self.config)?;
        validate_id(&input.draft_id, "draft_id")?;
        let client = self.client(&input.account_id)?;
        let raw = self.compose_raw(&input.message).await?;
        client
            .update_draft(&input.draft_id, raw, input.message.thread_id.as_deref())
            .await
    }

    async fn draft_send_impl(&self, input: DraftIdInput) -> AppResult<MessageRef> {
        require_write_enabled(&self.config)?;
        validate_id(&input.draft_id, "draft_id")?;
        let client = self.client(&input.account_id)?;
        client.send_draft(&input.draft_id).await
    }

    async fn draft_delete_impl(&self, input: DraftIdInput) -> AppResult<Value> {
        require_write_enabled(&self.config)?;
        validate_id(&input.draft_id, "draft_id")?;
        let client = self.client(&input.account_id)?;
        client.delete_draft(&input.draft_id).await?;
        Ok(json!({
            "account_id": input.account_id,
            "draft_id": input.draft_id,
            "deleted": true,
        }))
    }

    async fn label_get_impl(&self, input: LabelIdInput) -> AppResult<Label> {
        validate_id(&input.label_id, "label_id")?;
        let client = self.client(&input.account_id)?;
        client.get_label(&input.label_id).await
    }

    async fn label_create_impl(&self, input: LabelCreateInput) -> AppResult<Label> {
        require_write_enabled(&self.config)?;
        validate_label_name(&input.name)?;
        let color = label_color(input.background_color, input.text_color)?;
        let client = self.client(&input.account_id)?;
        client
            .create_label(json!({
                "name": input.name,
                "labelListVisibility": input.label_list_visibility,
                "messageListVisibility": input.message_list_visibility,
                "color": color,
            }))
            .await
    }

    async fn label_update_impl(&self, input: LabelUpdateInput) -> AppResult<Label> {
        require_write_enabled(&self.config)?;
        validate_id(&input.label_id, "label_id")?;
        if let Some(name) = &input.name {
            validate_label_name(name)?;
        }
        let color = label_color(input.background_color, input.text_color)?;
        if input.name.is_none()
            && input.label_list_visibility.is_none()
            && input.message_list_visibility.is_none()
            && color.is_none()
        {
            return Err(AppError::invalid(
                "at least one of name, visibility or color is required",
            ));
        }
        let client = self.client(&input.account_id)?;
        client
            .update_label(
                &input.label_id,
                json!({
                    "name": input.name,
                    "labelListVisibility": input.label_list_visibility,
                    "messageListVisibility": input.message_list_visibility,
                    "color": color,
                }),
            )
            .await
    }

    async fn label_delete_impl(&self, input: LabelIdInput) -> AppResult<Value> {
        require_write_enabled(&self.config)?;
        validate_id(&input.label_id, "label_id")?;
        let client = self.client(&input.account_id)?;
        client.delete_label(&input.label_id).await?;
        Ok(json!({
            "account_id": input.account_id,
            "label_id": input.label_id,
            "deleted": true,
        }))
    }

    async fn filter_get_impl(&self, input: FilterIdInput) -> AppResult<Filter> {
        validate_id(&input.filter_id, "filter_id")?;
        let client = self.client(&input.account_id)?;
        client.get_filter(&input.filter_id).await
    }

    async fn filter_create_impl(&self, input: FilterCreateInput) -> AppResult<Filter> {
        require_write_enabled(&self.config)?;
        let (criteria, action) = filter_parts(input.clone())?;
        let client = self.client(&input.account_id)?;
        client.create_filter(&criteria, &action).await
    }

    async fn filter_delete_impl(&self, input: FilterIdInput) -> AppResult<Value> {
        require_write_enabled(&self.config)?;
        validate_id(&input.filter_id, "filter_id")?;
        let client = self.client(&input.account_id)?;
        client.delete_filter(&input.filter_id).await?;
        Ok(json!({
            "account_id": input.account_id,
            "filter_id": input.filter_id,
            "deleted": true,
        }))
    }

    async fn vacation_set_impl(&self, input: VacationSetInput) -> AppResult<VacationSettings> {
        require_write_enabled(&self.config)?;
        let start = parse_epoch_ms(input.start_time.as_deref(), "start_time")?;
        let end = parse_epoch_ms(input.end_time.as_deref(), "end_time")?;
        if let (Some(start), Some(end)) = (start, end)
            && start > end
        {
            return Err(AppError::invalid("start_time must be <= end_time"));
        }
        let client = self.client(&input.account_id)?;
        client
            .set_vacation(&VacationSettings {
                enable_auto_reply: input.enable_auto_reply,
                response_subject: input.response_subject,
                response_body_plain_text: input.response_body_plain_text,
                response_body_html: input.response_body_html,
                restrict_to_contacts: input.restrict_to_contacts,
                restrict_to_domain: input.restrict_to_domain,
                start_time: input.start_time,
                end_time: input.end_time,
            })
            .await
    }

    /// Validate message content, resolve attachments, and encode the raw message
    async fn compose_raw(&self, content: &MessageContent) -> AppResult<String> {
        validate_recipients(&content.to)?;
        if let Some(thread_id) = &content.thread_id {
            validate_id(thread_id, "thread_id")?;
        }
        if !content.is_html && !content.inline_images.is_empty() {
            return Err(AppError::invalid("inline_images require is_html=true"));
        }

        let policy = AttachmentPolicy {
            root: self.config.attachment_root.as_deref(),
            max_total_bytes: self.config.max_attachment_bytes,
        };
        let (attachments, inline_images) =
            resolve_parts(&content.attachments, &content.inline_images, policy).await?;

        encode_raw_message(&OutgoingMessage {
            from: content.from.clone(),
            to: content.to.clone(),
            cc: content.cc.clone(),
            bcc: content.bcc.clone(),
            subject: content.subject.clone(),
            body: content.body.clone(),
            is_html: content.is_html,
            in_reply_to: content.in_reply_to.clone(),
            attachments,
            inline_images,
        })
    }
}

/// Calculate elapsed milliseconds
fn duration_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

/// Build a standardized MCP tool response envelope from business logic output
fn finalize_tool<T>(
    started: Instant,
    result: AppResult<(String, T)>,
) -> Result<Json<ToolEnvelope<T>>, ErrorData>
where
    T: schemars::JsonSchema,
{
    match result {
        Ok((summary, data)) => Ok(Json(ToolEnvelope {
            summary,
            data,
            meta: Meta::now(duration_ms(started)),
        })),
        Err(e) => Err(e.to_error_data()),
    }
}

fn list_query(input: &ListInput) -> ListQuery<'_> {
    ListQuery {
        q: input.q.as_deref(),
        max_results: Some(input.max_results),
        page_token: input.page_token.as_deref(),
        label_ids: input.label_ids.as_deref().unwrap_or_default(),
        include_spam_trash: input.include_spam_trash,
    }
}

fn vacation_summary(settings: &VacationSettings) -> String {
    if settings.enable_auto_reply {
        "Vacation auto-reply is enabled".to_owned()
    } else {
        "Vacation auto-reply is disabled".to_owned()
    }
}

/// Validate account_id format
fn validate_account_id(account_id: &str) -> AppResult<()> {
    if account_id.is_empty() || account_id.len() > 64 {
        return Err(AppError::InvalidInput(
            "account_id must be 1..64 characters".to_owned(),
        ));
    }
    if !account_id
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
    {
        return Err(AppError::InvalidInput(
            "account_id must match [A-Za-z0-9_-]+".to_owned(),
        ));
    }
    Ok(())
}

/// Validate an API identifier destined for a URL path segment
fn validate_id(value: &str, field: &str) -> AppResult<()> {
    let len = value.chars().count();
    if len == 0 || len > MAX_ID_CHARS {
        return Err(AppError::InvalidInput(format!(
            "{field} must be 1..{MAX_ID_CHARS} characters"
        )));
    }
    validate_no_controls(value, field)?;
    if value.contains('/') {
        return Err(AppError::InvalidInput(format!(
            "{field} must not contain '/'"
        )));
    }
    Ok(())
}

fn validate_batch_ids(ids: &[String]) -> AppResult<()> {
    validate_range(ids.len(), 1, MAX_BATCH_IDS, "ids length")?;
    for id in ids {
        validate_id(id, "ids")?;
    }
    Ok(())
}

/// Validate label id lists and require at least one change
fn label_changes(
    add: Option<Vec<String>>,
    remove: Option<Vec<String>>,
) -> AppResult<(Vec<String>, Vec<String>)> {
    let add = add.unwrap_or_default();
    let remove = remove.unwrap_or_default();
    if add.is_empty() && remove.is_empty() {
        return Err(AppError::InvalidInput(
            "at least one of add_label_ids/remove_label_ids is required".to_owned(),
        ));
    }
    for id in &add {
        validate_id(id, "add_label_ids")?;
    }
    for id in &remove {
        validate_id(id, "remove_label_ids")?;
    }
    Ok((add, remove))
}

/// Reject control characters in user-provided values
fn validate_no_controls(value: &str, field: &str) -> AppResult<()> {
    if value.chars().any(char::is_control) {
        return Err(AppError::InvalidInput(format!(
            "{field} must not contain control characters"
        )));
    }
    Ok(())
}

/// Validate free text: bounded length, no control characters
fn validate_text(value: &str, field: &str, max_chars: usize) -> AppResult<()> {
    let len = value.chars().count();
    if len == 0 || len > max_chars {
        return Err(AppError::InvalidInput(format!(
            "{field} must be 1..{max_chars} characters"
        )));
    }
    validate_no_controls(value, field)
}

/// Validate numeric value in range
fn validate_range(value: usize, min: usize, max: usize, field: &str) -> AppResult<()> {
    if value < min || value > max {
        return Err(AppError::InvalidInput(format!(
            "{field} must be in range {min}..{max}"
        )));
    }
    Ok(())
}

fn validate_list_input(input: &ListInput) -> AppResult<()> {
    validate_range(input.max_results as usize, 1, MAX_PAGE_SIZE, "max_results")?;
    if let Some(q) = &input.q {
        validate_text(q, "q", 1_024)?;
    }
    if let Some(token) = &input.page_token {
        validate_id(token, "page_token")?;
    }
    for id in input.label_ids.iter().flatten() {
        validate_id(id, "label_ids")?;
    }
    Ok(())
}

fn validate_metadata_headers(headers: &[String]) -> AppResult<()> {
    for header in headers {
        validate_text(header, "metadata_headers", 256)?;
    }
    Ok(())
}

fn validate_recipients(to: &str) -> AppResult<()> {
    if to.trim().is_empty() {
        return Err(AppError::invalid("to must not be empty"));
    }
    validate_header_value("to", to)
}

fn validate_label_name(name: &str) -> AppResult<()> {
    validate_text(name, "name", MAX_LABEL_NAME_CHARS)
}

/// Build a label color object when either color is given
fn label_color(background: Option<String>, text: Option<String>) -> AppResult<Option<Value>> {
    for (field, value) in [("background_color", &background), ("text_color", &text)] {
        if let Some(value) = value
            && !is_hex_color(value)
        {
            return Err(AppError::InvalidInput(format!(
                "{field} must be a hex color like #16a765"
            )));
        }
    }
    if background.is_none() && text.is_none() {
        return Ok(None);
    }
    Ok(Some(json!({
        "backgroundColor": background,
        "textColor": text,
    })))
}

fn is_hex_color(value: &str) -> bool {
    value
        .strip_prefix('#')
        .is_some_and(|hex| hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Split filter input into criteria and action, requiring one of each
fn filter_parts(input: FilterCreateInput) -> AppResult<(FilterCriteria, FilterAction)> {
    if input.size.is_some() != input.size_comparison.is_some() {
        return Err(AppError::invalid(
            "size and size_comparison must be provided together",
        ));
    }
    for (field, value) in [
        ("from", &input.from),
        ("to", &input.to),
        ("subject", &input.subject),
        ("query", &input.query),
        ("negated_query", &input.negated_query),
        ("forward", &input.forward),
    ] {
        if let Some(value) = value {
            validate_text(value, field, 1_024)?;
        }
    }
    for id in input
        .add_label_ids
        .iter()
        .chain(input.remove_label_ids.iter())
        .flatten()
    {
        validate_id(id, "label ids")?;
    }

    let criteria = FilterCriteria {
        from: input.from,
        to: input.to,
        subject: input.subject,
        query: input.query,
        negated_query: input.negated_query,
        has_attachment: input.has_attachment,
        exclude_chats: input.exclude_chats,
        size: input.size,
        size_comparison: input.size_comparison.map(|c| c.as_str().to_owned()),
    };
    let action = FilterAction {
        add_label_ids: input.add_label_ids.filter(|ids| !ids.is_empty()),
        remove_label_ids: input.remove_label_ids.filter(|ids| !ids.is_empty()),
        forward: input.forward,
    };

    let has_criteria = criteria.from.is_some()
        || criteria.to.is_some()
        || criteria.subject.is_some()
        || criteria.query.is_some()
        || criteria.negated_query.is_some()
        || criteria.has_attachment.is_some()
        || criteria.exclude_chats.is_some()
        || criteria.size.is_some();
    if !has_criteria {
        return Err(AppError::invalid("filter requires at least one criterion"));
    }
    if action.add_label_ids.is_none() && action.remove_label_ids.is_none() && action.forward.is_none() {
        return Err(AppError::invalid("filter requires at least one action"));
    }
    Ok((criteria, action))
}

/// Parse an optional epoch-milliseconds string
fn parse_epoch_ms(value: Option<&str>, field: &str) -> AppResult<Option<i64>> {
    value
        .map(|v| {
            v.parse::<i64>().map_err(|_| {
                AppError::InvalidInput(format!("{field} must be epoch milliseconds, got '{v}'"))
            })
        })
        .transpose()
}

/// Check if write operations are enabled
fn require_write_enabled(config: &ServerConfig) -> AppResult<()> {
    if !config.write_enabled {
        return Err(AppError::InvalidInput(
            "write tools are disabled; set GMAIL_MCP_WRITE_ENABLED=true".to_owned(),
        ));
    }
    Ok(())
}

fn require_confirm(confirm: bool) -> AppResult<()> {
    if !confirm {
        return Err(AppError::InvalidInput(
            "permanent deletion requires confirm=true".to_owned(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{
        GmailMcpServer, filter_parts, label_changes, label_color, validate_batch_ids, validate_id,
    };
    use crate::codec::decode_base64_url;
    use crate::config::{AccountConfig, ServerConfig};
    use crate::errors::AppError;
    use crate::models::{
        FilterCreateInput, MessageContent, MessageDeleteInput, MessageIdInput, MessageSendInput,
    };

    fn config(base_url: &str, write_enabled: bool) -> ServerConfig {
        let account = AccountConfig {
            account_id: "default".to_owned(),
            user_id: "me".to_owned(),
            access_token: SecretString::new("tok".into()),
        };
        ServerConfig {
            accounts: BTreeMap::from([("default".to_owned(), account)]),
            api_base_url: base_url.to_owned(),
            write_enabled,
            connect_timeout_ms: 1_000,
            request_timeout_ms: 5_000,
            max_attachment_bytes: 1024,
            attachment_root: None,
        }
    }

    fn content(to: &str) -> MessageContent {
        MessageContent {
            to: to.to_owned(),
            subject: "S".to_owned(),
            body: "hi".to_owned(),
            is_html: false,
            cc: None,
            bcc: None,
            from: None,
            thread_id: None,
            in_reply_to: None,
            attachments: Vec::new(),
            inline_images: Vec::new(),
        }
    }

    fn empty_filter() -> FilterCreateInput {
        FilterCreateInput {
            account_id: "default".to_owned(),
            from: None,
            to: None,
            subject: None,
            query: None,
            negated_query: None,
            has_attachment: None,
            exclude_chats: None,
            size: None,
            size_comparison: None,
            add_label_ids: None,
            remove_label_ids: None,
            forward: None,
        }
    }

    #[test]
    fn tools_are_prefixed_and_read_only_tools_are_annotated() {
        let tools = GmailMcpServer::tool_router().list_all();
        assert!(tools.len() >= 35);
        for tool in &tools {
            assert!(tool.name.starts_with("gmail_"), "unprefixed tool {}", tool.name);
            let read_only = tool
                .annotations
                .as_ref()
                .and_then(|a| a.read_only_hint)
                .unwrap_or(false);
            let is_read = ["_get", "_list", "list_accounts"]
                .iter()
                .any(|suffix| tool.name.ends_with(suffix));
            assert_eq!(read_only, is_read, "annotation mismatch on {}", tool.name);
        }
        for name in ["gmail_message_forward", "gmail_draft_update", "gmail_vacation_set"] {
            assert!(tools.iter().any(|t| t.name == name), "missing {name}");
        }
    }

    #[test]
    fn ids_reject_separators_controls_and_bad_lengths() {
        validate_id("18c2f0a9b1d3e4f5", "message_id").expect("gmail id");
        assert!(validate_id("", "message_id").is_err());
        assert!(validate_id("a/b", "message_id").is_err());
        assert!(validate_id("a\nb", "message_id").is_err());
        assert!(validate_id(&"x".repeat(257), "message_id").is_err());

        assert!(validate_batch_ids(&[]).is_err());
        assert!(validate_batch_ids(&vec!["m".to_owned(); 1_001]).is_err());
        validate_batch_ids(&vec!["m".to_owned(); 1_000]).expect("max batch");
    }

    #[test]
    fn label_changes_require_at_least_one_id() {
        assert!(label_changes(None, Some(Vec::new())).is_err());
        let (add, remove) =
            label_changes(Some(vec!["STARRED".to_owned()]), None).expect("valid change");
        assert_eq!(add, ["STARRED"]);
        assert!(remove.is_empty());
    }

    #[test]
    fn label_colors_must_be_hex() {
        assert!(label_color(Some("red".to_owned()), None).is_err());
        assert_eq!(label_color(None, None).expect("none"), None);
        let color = label_color(Some("#16a765".to_owned()), None)
            .expect("valid")
            .expect("color");
        assert_eq!(color["backgroundColor"], "#16a765");
    }

    #[test]
    fn filters_need_criteria_and_action() {
        assert!(filter_parts(empty_filter()).is_err());

        let only_criteria = FilterCreateInput {
            from: Some("news@example.com".to_owned()),
            ..empty_filter()
        };
        let err = filter_parts(only_criteria.clone()).expect_err("no action");
        assert!(err.to_string().contains("action"));

        let (criteria, action) = filter_parts(FilterCreateInput {
            remove_label_ids: Some(vec!["INBOX".to_owned()]),
            ..only_criteria
        })
        .expect("valid filter");
        assert_eq!(criteria.from.as_deref(), Some("news@example.com"));
        assert_eq!(action.remove_label_ids, Some(vec!["INBOX".to_owned()]));
    }

    #[tokio::test]
    async fn write_tools_are_gated() {
        let server = GmailMcpServer::new(config("http://127.0.0.1:9", false)).expect("server");
        let err = server
            .message_trash_impl(
                MessageIdInput {
                    account_id: "default".to_owned(),
                    message_id: "m1".to_owned(),
                },
                true,
            )
            .await
            .expect_err("gated");
        assert!(err.to_string().contains("GMAIL_MCP_WRITE_ENABLED"));
    }

    #[tokio::test]
    async fn permanent_delete_requires_confirm() {
        let server = GmailMcpServer::new(config("http://127.0.0.1:9", true)).expect("server");
        let err = server
            .message_delete_impl(MessageDeleteInput {
                account_id: "default".to_owned(),
                message_id: "m1".to_owned(),
                confirm: false,
            })
            .await
            .expect_err("unconfirmed");
        assert!(err.to_string().contains("confirm=true"));
    }

    #[tokio::test]
    async fn unknown_account_is_not_found() {
        let server = GmailMcpServer::new(config("http://127.0.0.1:9", true)).expect("server");
        let err = server
            .message_archive_impl(MessageIdInput {
                account_id: "work".to_owned(),
                message_id: "m1".to_owned(),
            })
            .await
            .expect_err("unknown account");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn header_injection_is_rejected_before_any_request() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock)
            .await;

        let server = GmailMcpServer::new(config(&mock.uri(), true)).expect("server");
        let err = server
            .message_send_impl(MessageSendInput {
                account_id: "default".to_owned(),
                message: content("x@y.com\r\nBcc: evil@z.com"),
            })
            .await
            .expect_err("injection");
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn send_posts_composed_raw_message() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users/me/messages/send"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "id": "m9", "threadId": "t9", "labelIds": ["SENT"] })),
            )
            .expect(1)
            .mount(&mock)
            .await;

        let server = GmailMcpServer::new(config(&mock.uri(), true)).expect("server");
        let sent = server
            .message_send_impl(MessageSendInput {
                account_id: "default".to_owned(),
                message: content("a@b.com"),
            })
            .await
            .expect("sent");
        assert_eq!(sent.id, "m9");

        let requests = mock.received_requests().await.expect("recorded");
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).expect("json");
        assert!(body.get("threadId").is_none());
        let raw = body["raw"].as_str().expect("raw");
        let text = String::from_utf8(decode_base64_url(raw).expect("base64url")).expect("utf-8");
        assert_eq!(
            text,
            "To: a@b.com\r\nSubject: S\r\nContent-Type: text/plain; charset=utf-8\r\n\r\nhi"
        );
    }

    #[tokio::test]
    async fn archive_removes_inbox_label() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users/me/messages/m1/modify"))
            .and(body_json(json!({ "removeLabelIds": ["INBOX"] })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "id": "m1", "threadId": "t1" })),
            )
            .expect(1)
            .mount(&mock)
            .await;

        let server = GmailMcpServer::new(config(&mock.uri(), true)).expect("server");
        server
            .message_archive_impl(MessageIdInput {
                account_id: "default".to_owned(),
                message_id: "m1".to_owned(),
            })
            .await
            .expect("archived");
    }
}
