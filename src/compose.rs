//! RFC 2822 message composition
//!
//! Builds the header block and MIME body for an outgoing message: a single
//! text part when there is nothing to attach, otherwise `multipart/mixed`
//! with an optional nested `multipart/related` binding an HTML body to its
//! inline images. Lines are joined with CRLF; the caller base64url-encodes the
//! result for the Gmail `raw` field.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::codec::{encode_base64_url, encode_base64_wrapped};
use crate::errors::{AppError, AppResult};

/// Longest UTF-8 slice placed in one RFC 2047 encoded-word (keeps words under 75 chars)
const ENCODED_WORD_MAX_BYTES: usize = 45;
/// Preferred header line length before folding
const HEADER_FOLD_AT: usize = 78;
/// RFC 2822 limit on any line, excluding CRLF
const HEADER_LINE_MAX: usize = 998;
const SUBJECT_PREFIX: &str = "Subject: ";

/// File attachment with decoded content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

/// Image referenced from an HTML body through a `cid:` URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    /// Bracket-delimited Content-ID, e.g. `<img1>`
    pub content_id: String,
    pub content: Vec<u8>,
}

/// Composition request for a single outgoing message
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub from: Option<String>,
    pub to: String,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    pub subject: String,
    pub body: String,
    pub is_html: bool,
    pub in_reply_to: Option<String>,
    pub attachments: Vec<Attachment>,
    pub inline_images: Vec<InlineImage>,
}

impl OutgoingMessage {
    fn is_multipart(&self) -> bool {
        !self.attachments.is_empty() || !self.inline_images.is_empty()
    }
}

/// Compose and base64url-encode a message for the Gmail `raw` field
///
/// # Errors
///
/// Returns `InvalidInput` if any header-bound value contains CR or LF.
pub fn encode_raw_message(message: &OutgoingMessage) -> AppResult<String> {
    let text = compose(message)?;
    Ok(encode_base64_url(text.as_bytes()))
}

/// Compose the RFC 2822 text of a message with freshly generated boundaries
///
/// # Errors
///
/// Returns `InvalidInput` if any header-bound value contains CR or LF.
pub fn compose(message: &OutgoingMessage) -> AppResult<String> {
    compose_with_boundaries(message, &mut new_boundary)
}

/// Compose using a caller-supplied boundary source
///
/// Candidates that occur in the text body are discarded and a new one is
/// drawn.
pub fn compose_with_boundaries(
    message: &OutgoingMessage,
    next_boundary: &mut dyn FnMut() -> String,
) -> AppResult<String> {
    validate_message(message)?;

    let mut lines: Vec<String> = Vec::new();
    if let Some(from) = non_empty(message.from.as_deref()) {
        lines.push(format!("From: {from}"));
    }
    if !message.to.is_empty() {
        lines.push(format!("To: {}", message.to));
    }
    if let Some(cc) = non_empty(message.cc.as_deref()) {
        lines.push(format!("Cc: {cc}"));
    }
    if let Some(bcc) = non_empty(message.bcc.as_deref()) {
        lines.push(format!("Bcc: {bcc}"));
    }
    if !message.subject.is_empty() {
        lines.push(format!(
            "{SUBJECT_PREFIX}{}",
            encode_header_text(&message.subject)
        ));
    }
    if let Some(in_reply_to) = non_empty(message.in_reply_to.as_deref()) {
        lines.push(format!("In-Reply-To: {in_reply_to}"));
        lines.push(format!("References: {in_reply_to}"));
    }

    if !message.is_multipart() {
        lines.push(format!("Content-Type: {}", text_content_type(message.is_html)));
        lines.push(String::new());
        lines.push(message.body.clone());
        return Ok(lines.join("\r\n"));
    }

    let mixed = pick_boundary(&message.body, next_boundary, None);
    lines.push("MIME-Version: 1.0".to_owned());
    lines.push(format!("Content-Type: multipart/mixed; boundary=\"{mixed}\""));
    lines.push(String::new());
    lines.push(format!("--{mixed}"));

    if message.is_html && !message.inline_images.is_empty() {
        let related = pick_boundary(&message.body, next_boundary, Some(&mixed));
        lines.push(format!("Content-Type: multipart/related; boundary=\"{related}\""));
        lines.push(String::new());
        lines.push(format!("--{related}"));
        lines.push(format!("Content-Type: {}", text_content_type(true)));
        lines.push("Content-Transfer-Encoding: 7bit".to_owned());
        lines.push(String::new());
        lines.push(message.body.clone());

        for image in &message.inline_images {
            lines.push(String::new());
            lines.push(format!("--{related}"));
            lines.push(format!("Content-Type: {}", image.mime_type));
            lines.push("Content-Transfer-Encoding: base64".to_owned());
            lines.push(format!("Content-ID: {}", image.content_id));
            lines.push("Content-Disposition: inline".to_owned());
            lines.push(String::new());
            lines.push(encode_base64_wrapped(&image.content));
        }

        lines.push(String::new());
        lines.push(format!("--{related}--"));
    } else {
        if !message.inline_images.is_empty() {
            debug!(
                count = message.inline_images.len(),
                "inline images dropped from non-HTML body"
            );
        }
        lines.push(format!("Content-Type: {}", text_content_type(message.is_html)));
        lines.push("Content-Transfer-Encoding: 7bit".to_owned());
        lines.push(String::new());
        lines.push(message.body.clone());
    }

    for attachment in &message.attachments {
        let filename = sanitize_filename(&attachment.filename);
        lines.push(String::new());
        lines.push(format!("--{mixed}"));
        lines.push(format!(
            "Content-Type: {}; name=\"{filename}\"",
            attachment.mime_type
        ));
        lines.push("Content-Transfer-Encoding: base64".to_owned());
        lines.push(format!(
            "Content-Disposition: attachment; filename=\"{filename}\""
        ));
        lines.push(String::new());
        lines.push(encode_base64_wrapped(&attachment.content));
    }

    lines.push(String::new());
    lines.push(format!("--{mixed}--"));
    Ok(lines.join("\r\n"))
}

/// Reject CR/LF in every value that lands in a header line
fn validate_message(message: &OutgoingMessage) -> AppResult<()> {
    validate_header_value("to", &message.to)?;
    validate_header_value("subject", &message.subject)?;
    for (field, value) in [
        ("cc", &message.cc),
        ("bcc", &message.bcc),
        ("from", &message.from),
        ("in_reply_to", &message.in_reply_to),
    ] {
        if let Some(value) = value {
            validate_header_value(field, value)?;
        }
    }
    for attachment in &message.attachments {
        validate_header_value("attachment filename", &attachment.filename)?;
        validate_header_value("attachment mime_type", &attachment.mime_type)?;
    }
    for image in &message.inline_images {
        validate_header_value("inline image content_id", &image.content_id)?;
        validate_header_value("inline image mime_type", &image.mime_type)?;
    }
    Ok(())
}

/// Reject header values that could inject additional header lines
pub fn validate_header_value(field: &str, value: &str) -> AppResult<()> {
    if value.contains(['\r', '\n']) {
        return Err(AppError::InvalidInput(format!(
            "{field} must not contain line breaks"
        )));
    }
    Ok(())
}

/// Strip double quotes so the name fits inside a quoted MIME parameter
pub fn sanitize_filename(filename: &str) -> String {
    filename.replace('"', "")
}

fn text_content_type(is_html: bool) -> &'static str {
    if is_html {
        "text/html; charset=utf-8"
    } else {
        "text/plain; charset=utf-8"
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Encode non-ASCII header text as folded RFC 2047 `B` encoded-words
fn encode_header_text(text: &str) -> String {
    let foldable = text
        .split(' ')
        .all(|word| SUBJECT_PREFIX.len() + word.len() <= HEADER_LINE_MAX);
    if text.is_ascii() && foldable {
        return fold_ascii(text, SUBJECT_PREFIX.len());
    }

    let mut words = Vec::new();
    let mut chunk_start = 0;
    let mut chunk_end = 0;
    for (idx, ch) in text.char_indices() {
        let next_end = idx + ch.len_utf8();
        if next_end - chunk_start > ENCODED_WORD_MAX_BYTES {
            words.push(encoded_word(&text[chunk_start..chunk_end]));
            chunk_start = chunk_end;
        }
        chunk_end = next_end;
    }
    words.push(encoded_word(&text[chunk_start..chunk_end]));
    words.join("\r\n ")
}

/// Fold ASCII text at spaces so lines stay near 78 characters
///
/// Each folding point replaces a space with `CRLF SP`, so unfolding restores
/// the original text exactly.
fn fold_ascii(text: &str, prefix_len: usize) -> String {
    let mut out = String::with_capacity(text.len());
    let mut line_len = prefix_len;
    for (idx, word) in text.split(' ').enumerate() {
        if idx > 0 {
            if line_len + 1 + word.len() > HEADER_FOLD_AT {
                out.push_str("\r\n ");
                line_len = 1;
            } else {
                out.push(' ');
                line_len += 1;
            }
        }
        out.push_str(word);
        line_len += word.len();
    }
    out
}

fn encoded_word(chunk: &str) -> String {
    format!("=?UTF-8?B?{}?=", STANDARD.encode(chunk.as_bytes()))
}

/// Generate a boundary token from the clock and a v4 UUID
///
/// Uniqueness is best effort: the UUID comes from the OS random source, and
/// `pick_boundary` rejects candidates that occur in the body text.
pub fn new_boundary() -> String {
    format!(
        "----=_Part_{}_{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

fn pick_boundary(
    body: &str,
    next_boundary: &mut dyn FnMut() -> String,
    outer: Option<&str>,
) -> String {
    loop {
        let candidate = next_boundary();
        let clashes_with_outer = outer.is_some_and(|o| o.contains(&candidate) || candidate.contains(o));
        if !clashes_with_outer && !body.contains(&format!("--{candidate}")) {
            return candidate;
        }
        debug!("discarding boundary that collides with message content");
    }
}
