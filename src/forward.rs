//! Forwarding of an existing message with its attachments
//!
//! Fetches the original in `full` format, extracts its body plus attachment
//! and inline-image descriptors, downloads every referenced part
//! concurrently, then composes and sends a new message in the original
//! thread. A single failed download aborts the forward before anything is
//! sent.

use ammonia::clean_text;
use futures::future::{try_join, try_join_all};
use tracing::{debug, info, warn};

use crate::codec::decode_base64_url;
use crate::compose::{Attachment, InlineImage, OutgoingMessage, encode_raw_message};
use crate::errors::{AppError, AppResult};
use crate::gmail::MailTransport;
use crate::mime::{extract_body, find_attachments, find_inline_images, header_value};
use crate::resources::MessageRef;

const FORWARD_MARKER: &str = "---------- Forwarded message ---------";

/// Caller-supplied parameters for a forward
#[derive(Debug, Clone, Default)]
pub struct ForwardRequest {
    pub message_id: String,
    pub to: String,
    pub note: Option<String>,
    pub from: Option<String>,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    /// Cap on decoded attachment and inline-image bytes; `None` means unlimited
    pub max_attachment_bytes: Option<usize>,
}

/// Header values of the original message quoted in the preamble
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct OriginalHeaders {
    from: String,
    to: String,
    date: String,
    subject: String,
    cc: Option<String>,
}

/// Forward a message, preserving its attachments and inline images
///
/// # Errors
///
/// - `Schema` if the original has no payload or payload headers
/// - `Fetch` if any attachment download fails
/// - `Decode` if downloaded bytes or the body are not valid base64url
/// - `InvalidInput` if a composed header would contain a line break, or the
///   downloaded parts exceed `max_attachment_bytes`
/// - any transport error from fetching the original or sending
pub async fn forward_message<T>(transport: &T, request: &ForwardRequest) -> AppResult<MessageRef>
where
    T: MailTransport,
{
    let original = transport.fetch_message(&request.message_id).await?;
    let payload = original
        .payload
        .as_ref()
        .ok_or_else(|| AppError::Schema(format!("message {} has no payload", original.id)))?;
    let headers = payload.headers.as_deref().ok_or_else(|| {
        AppError::Schema(format!("message {} payload has no headers", original.id))
    })?;

    let quoted = OriginalHeaders {
        from: header_value(headers, "From").unwrap_or_default().to_owned(),
        to: header_value(headers, "To").unwrap_or_default().to_owned(),
        date: header_value(headers, "Date").unwrap_or_default().to_owned(),
        subject: header_value(headers, "Subject").unwrap_or_default().to_owned(),
        cc: header_value(headers, "Cc").map(str::to_owned),
    };
    let body = extract_body(payload)?;
    let attachment_refs = find_attachments(payload);
    let image_refs = find_inline_images(payload);
    debug!(
        message_id = %request.message_id,
        attachments = attachment_refs.len(),
        inline_images = image_refs.len(),
        is_html = body.is_html,
        "forwarding message"
    );

    let message_id = request.message_id.as_str();
    let attachments = try_join_all(attachment_refs.into_iter().map(|part| async move {
        let content = fetch_part(transport, message_id, &part.attachment_id).await?;
        Ok::<_, AppError>(Attachment {
            filename: part.filename,
            mime_type: part.mime_type,
            content,
        })
    }));
    let inline_images = try_join_all(image_refs.into_iter().map(|part| async move {
        let content = fetch_part(transport, message_id, &part.attachment_id).await?;
        Ok::<_, AppError>(InlineImage {
            mime_type: part.mime_type,
            content_id: part.content_id,
            content,
        })
    }));
    let (attachments, inline_images) = try_join(attachments, inline_images).await?;

    if let Some(limit) = request.max_attachment_bytes {
        let total = attachments
            .iter()
            .map(|a| a.content.len())
            .chain(inline_images.iter().map(|i| i.content.len()))
            .fold(0usize, usize::saturating_add);
        if total > limit {
            return Err(AppError::invalid(format!(
                "forwarded attachments total {total} bytes, over the {limit} byte limit"
            )));
        }
    }

    let note = request.note.as_deref().filter(|n| !n.is_empty());
    let full_body = if body.is_html {
        html_preamble(note, &quoted) + &body.content
    } else {
        plain_preamble(note, &quoted) + &body.content
    };

    let outgoing = OutgoingMessage {
        from: request.from.clone(),
        to: request.to.clone(),
        cc: request.cc.clone(),
        bcc: request.bcc.clone(),
        subject: forward_subject(&quoted.subject),
        body: full_body,
        is_html: body.is_html,
        in_reply_to: None,
        attachments,
        inline_images,
    };
    let raw = encode_raw_message(&outgoing)?;
    let sent = transport
        .send_raw(raw, original.thread_id.as_deref())
        .await?;
    info!(
        original_id = %original.id,
        sent_id = %sent.id,
        attachments = outgoing.attachments.len(),
        "message forwarded"
    );
    Ok(sent)
}

/// Download one part and decode it to bytes
async fn fetch_part<T>(transport: &T, message_id: &str, attachment_id: &str) -> AppResult<Vec<u8>>
where
    T: MailTransport,
{
    let data = transport
        .fetch_attachment(message_id, attachment_id)
        .await
        .map_err(|e| {
            warn!(message_id, attachment_id, error = %e, "attachment download failed");
            AppError::Fetch(format!("attachment {attachment_id}: {e}"))
        })?;
    decode_base64_url(&data.data)
}

/// Prefix `Fwd: ` unless the subject already carries a forward marker
pub fn forward_subject(subject: &str) -> String {
    let already_forwarded = subject
        .get(..4)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("fwd:"));
    if already_forwarded {
        subject.to_owned()
    } else {
        format!("Fwd: {subject}")
    }
}

fn plain_preamble(note: Option<&str>, quoted: &OriginalHeaders) -> String {
    let mut lines: Vec<String> = Vec::new();
    if let Some(note) = note {
        lines.push(note.to_owned());
        lines.push(String::new());
    }
    lines.push(FORWARD_MARKER.to_owned());
    lines.push(format!("From: {}", quoted.from));
    lines.push(format!("Date: {}", quoted.date));
    lines.push(format!("Subject: {}", quoted.subject));
    lines.push(format!("To: {}", quoted.to));
    if let Some(cc) = &quoted.cc {
        lines.push(format!("Cc: {cc}"));
    }
    lines.push(String::new());
    lines.push(String::new());
    lines.join("\r\n")
}

fn html_preamble(note: Option<&str>, quoted: &OriginalHeaders) -> String {
    let note_html = note
        .map(|n| {
            let escaped: Vec<String> = n.lines().map(clean_text).collect();
            format!("<p>{}</p><br>\r\n", escaped.join("<br>"))
        })
        .unwrap_or_default();
    let cc_html = quoted
        .cc
        .as_deref()
        .map(|cc| format!("<br>Cc: {}", clean_text(cc)))
        .unwrap_or_default();
    format!(
        "<div style=\"margin-bottom: 20px;\">\r\n\
         {note_html}\
         <div style=\"color: #666; border-left: 1px solid #ccc; padding-left: 10px;\">\r\n\
         <p>{FORWARD_MARKER}<br>\r\n\
         From: {from}<br>\r\n\
         Date: {date}<br>\r\n\
         Subject: {subject}<br>\r\n\
         To: {to}{cc_html}</p>\r\n\
         </div>\r\n\
         </div>\r\n",
        from = clean_text(&quoted.from),
        date = clean_text(&quoted.date),
        subject = clean_text(&quoted.subject),
        to = clean_text(&quoted.to),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::{ForwardRequest, forward_message, forward_subject};
    use crate::codec::{decode_base64_url, encode_base64_url};
    use crate::errors::{AppError, AppResult};
    use crate::gmail::MailTransport;
    use crate::resources::{AttachmentData, Header, Message, MessagePart, MessagePartBody, MessageRef};

    /// In-memory mailbox recording sends
    #[derive(Default)]
    struct FakeMailbox {
        messages: HashMap<String, Message>,
        attachments: HashMap<String, Vec<u8>>,
        /// Attachment ids that answer slowly, to scramble completion order
        slow: Vec<String>,
        sent: Mutex<Vec<(String, Option<String>)>>,
    }

    impl MailTransport for FakeMailbox {
        async fn fetch_message(&self, message_id: &str) -> AppResult<Message> {
            self.messages
                .get(message_id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(message_id.to_owned()))
        }

        async fn fetch_attachment(
            &self,
            _message_id: &str,
            attachment_id: &str,
        ) -> AppResult<AttachmentData> {
            if self.slow.iter().any(|id| id == attachment_id) {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            let bytes = self
                .attachments
                .get(attachment_id)
                .ok_or_else(|| AppError::Upstream(format!("500 {attachment_id}")))?;
            Ok(AttachmentData {
                size: bytes.len() as u64,
                data: encode_base64_url(bytes),
            })
        }

        async fn send_raw(&self, raw: String, thread_id: Option<&str>) -> AppResult<MessageRef> {
            self.sent
                .lock()
                .expect("lock")
                .push((raw, thread_id.map(str::to_owned)));
            Ok(MessageRef {
                id: "sent-1".to_owned(),
                thread_id: thread_id.unwrap_or("new-thread").to_owned(),
                label_ids: Some(vec!["SENT".to_owned()]),
            })
        }
    }

    impl FakeMailbox {
        fn sent_text(&self) -> String {
            let sent = self.sent.lock().expect("lock");
            let (raw, _) = sent.first().expect("one message sent");
            String::from_utf8(decode_base64_url(raw).expect("base64url")).expect("utf-8")
        }
    }

    fn header(name: &str, value: &str) -> Header {
        Header {
            name: name.to_owned(),
            value: value.to_owned(),
        }
    }

    fn text_part(mime: &str, text: &str) -> MessagePart {
        MessagePart {
            mime_type: Some(mime.to_owned()),
            body: Some(MessagePartBody {
                data: Some(encode_base64_url(text.as_bytes())),
                ..MessagePartBody::default()
            }),
            ..MessagePart::default()
        }
    }

    fn file_part(mime: &str, filename: &str, attachment_id: &str, cid: Option<&str>) -> MessagePart {
        MessagePart {
            mime_type: Some(mime.to_owned()),
            filename: Some(filename.to_owned()),
            headers: cid.map(|cid| vec![header("Content-ID", cid)]),
            body: Some(MessagePartBody {
                attachment_id: Some(attachment_id.to_owned()),
                ..MessagePartBody::default()
            }),
            ..MessagePart::default()
        }
    }

    fn original(headers: Vec<Header>, parts: Vec<MessagePart>) -> Message {
        Message {
            id: "orig-1".to_owned(),
            thread_id: Some("thread-9".to_owned()),
            label_ids: None,
            snippet: None,
            history_id: None,
            internal_date: None,
            payload: Some(MessagePart {
                mime_type: Some("multipart/mixed".to_owned()),
                headers: Some(headers),
                parts,
                ..MessagePart::default()
            }),
            size_estimate: None,
            raw: None,
        }
    }

    fn request(note: Option<&str>) -> ForwardRequest {
        ForwardRequest {
            message_id: "orig-1".to_owned(),
            to: "carol@example.com".to_owned(),
            note: note.map(str::to_owned),
            ..ForwardRequest::default()
        }
    }

    #[test]
    fn forward_subject_never_doubles_prefix() {
        assert_eq!(forward_subject("Hello"), "Fwd: Hello");
        assert_eq!(forward_subject("Fwd: Hello"), "Fwd: Hello");
        assert_eq!(forward_subject("FWD: Hello"), "FWD: Hello");
        assert_eq!(forward_subject(""), "Fwd: ");
        assert_eq!(forward_subject("Füße"), "Fwd: Füße");
    }

    #[tokio::test]
    async fn plain_forward_keeps_attachments_in_order_and_thread() {
        let mut mailbox = FakeMailbox::default();
        mailbox.messages.insert(
            "orig-1".to_owned(),
            original(
                vec![
                    header("From", "Alice <alice@example.com>"),
                    header("To", "bob@example.com"),
                    header("Date", "Mon, 1 Jan 2024 10:00:00 +0000"),
                    header("Subject", "Quarterly report"),
                ],
                vec![
                    text_part("text/plain", "See attached."),
                    file_part("application/pdf", "q1.pdf", "att-1", None),
                    file_part("text/csv", "q1.csv", "att-2", None),
                ],
            ),
        );
        mailbox.attachments.insert("att-1".to_owned(), b"%PDF-1.7".to_vec());
        mailbox.attachments.insert("att-2".to_owned(), b"a,b\n1,2\n".to_vec());
        mailbox.slow.push("att-1".to_owned());

        let sent = forward_message(&mailbox, &request(Some("FYI")))
            .await
            .expect("forwarded");
        assert_eq!(sent.thread_id, "thread-9");
        assert_eq!(
            mailbox.sent.lock().expect("lock")[0].1.as_deref(),
            Some("thread-9")
        );

        let text = mailbox.sent_text();
        let parsed = mailparse::parse_mail(text.as_bytes()).expect("valid MIME");
        let subject = parsed
            .headers
            .iter()
            .find(|h| h.get_key() == "Subject")
            .map(mailparse::MailHeader::get_value);
        assert_eq!(subject.as_deref(), Some("Fwd: Quarterly report"));
        assert!(!text.contains("In-Reply-To"));

        assert_eq!(parsed.subparts.len(), 3);
        let body = parsed.subparts[0].get_body().expect("body");
        assert!(body.starts_with("FYI\r\n\r\n---------- Forwarded message ---------\r\n"));
        assert!(body.contains("From: Alice <alice@example.com>\r\n"));
        assert!(!body.contains("Cc:"));
        assert!(body.trim_end().ends_with("To: bob@example.com\r\n\r\nSee attached."));

        assert_eq!(parsed.subparts[1].get_body_raw().expect("pdf"), b"%PDF-1.7");
        assert_eq!(
            parsed.subparts[2].get_body_raw().expect("csv"),
            b"a,b\n1,2\n"
        );
        assert_eq!(
            parsed.subparts[2]
                .get_content_disposition()
                .params
                .get("filename")
                .map(String::as_str),
            Some("q1.csv")
        );
    }

    #[tokio::test]
    async fn html_forward_rebinds_inline_images_and_escapes_headers() {
        let mut mailbox = FakeMailbox::default();
        mailbox.messages.insert(
            "orig-1".to_owned(),
            original(
                vec![
                    header("from", "Alice <alice@example.com>"),
                    header("SUBJECT", "Fwd: Logo"),
                    header("Cc", "dave@example.com"),
                ],
                vec![MessagePart {
                    mime_type: Some("multipart/related".to_owned()),
                    parts: vec![
                        text_part("text/html", "<p><img src=\"cid:logo\"></p>"),
                        file_part("image/png", "logo.png", "img-1", Some("<logo>")),
                    ],
                    ..MessagePart::default()
                }],
            ),
        );
        mailbox.attachments.insert("img-1".to_owned(), vec![0x89, b'P', b'N', b'G']);

        forward_message(&mailbox, &request(Some("line one\nline <two>")))
            .await
            .expect("forwarded");

        let text = mailbox.sent_text();
        let parsed = mailparse::parse_mail(text.as_bytes()).expect("valid MIME");
        let subject = parsed
            .headers
            .iter()
            .find(|h| h.get_key() == "Subject")
            .map(mailparse::MailHeader::get_value);
        assert_eq!(subject.as_deref(), Some("Fwd: Logo"));

        let related = &parsed.subparts[0];
        assert_eq!(related.ctype.mimetype, "multipart/related");
        let html = related.subparts[0].get_body().expect("html");
        assert!(html.contains("From: Alice&#32;&lt;alice@example.com&gt;<br>"));
        assert!(html.contains("<br>Cc: dave@example.com</p>"));
        assert!(html.contains("line&#32;one<br>line&#32;&lt;two&gt;"));
        assert!(html.trim_end().ends_with("<p><img src=\"cid:logo\"></p>"));

        let image = &related.subparts[1];
        assert_eq!(image.ctype.mimetype, "image/png");
        assert_eq!(image.get_body_raw().expect("png"), vec![0x89, b'P', b'N', b'G']);
        let content_id = image
            .headers
            .iter()
            .find(|h| h.get_key() == "Content-ID")
            .map(mailparse::MailHeader::get_value);
        assert_eq!(content_id.as_deref(), Some("<logo>"));
    }

    #[tokio::test]
    async fn failed_download_aborts_without_sending() {
        let mut mailbox = FakeMailbox::default();
        mailbox.messages.insert(
            "orig-1".to_owned(),
            original(
                vec![header("Subject", "Two files")],
                vec![
                    text_part("text/plain", "body"),
                    file_part("application/pdf", "ok.pdf", "att-ok", None),
                    file_part("application/pdf", "gone.pdf", "att-gone", None),
                ],
            ),
        );
        mailbox.attachments.insert("att-ok".to_owned(), b"ok".to_vec());

        let err = forward_message(&mailbox, &request(None))
            .await
            .expect_err("missing attachment");
        assert!(matches!(err, AppError::Fetch(ref m) if m.contains("att-gone")));
        assert!(mailbox.sent.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn oversized_parts_abort_without_sending() {
        let mut mailbox = FakeMailbox::default();
        mailbox.messages.insert(
            "orig-1".to_owned(),
            original(
                vec![header("Subject", "Big files")],
                vec![
                    text_part("text/html", "<p>see</p>"),
                    file_part("image/png", "logo.png", "img-1", Some("<logo>")),
                    file_part("application/pdf", "big.pdf", "att-1", None),
                ],
            ),
        );
        mailbox.attachments.insert("img-1".to_owned(), vec![0u8; 6]);
        mailbox.attachments.insert("att-1".to_owned(), vec![1u8; 6]);

        let capped = ForwardRequest {
            max_attachment_bytes: Some(11),
            ..request(None)
        };
        let err = forward_message(&mailbox, &capped)
            .await
            .expect_err("over cap");
        assert!(matches!(err, AppError::InvalidInput(ref m) if m.contains("11 byte limit")));
        assert!(mailbox.sent.lock().expect("lock").is_empty());

        let exact = ForwardRequest {
            max_attachment_bytes: Some(12),
            ..request(None)
        };
        forward_message(&mailbox, &exact).await.expect("at cap");
    }

    #[tokio::test]
    async fn missing_payload_headers_is_a_schema_error() {
        let mut mailbox = FakeMailbox::default();
        let mut message = original(Vec::new(), Vec::new());
        if let Some(payload) = message.payload.as_mut() {
            payload.headers = None;
        }
        mailbox.messages.insert("orig-1".to_owned(), message);

        let err = forward_message(&mailbox, &request(None))
            .await
            .expect_err("no headers");
        assert!(matches!(err, AppError::Schema(_)));
    }

    #[tokio::test]
    async fn message_without_text_forwards_empty_body() {
        let mut mailbox = FakeMailbox::default();
        mailbox.messages.insert(
            "orig-1".to_owned(),
            original(
                vec![header("Subject", "scan")],
                vec![file_part("application/pdf", "scan.pdf", "att-1", None)],
            ),
        );
        mailbox.attachments.insert("att-1".to_owned(), b"%PDF".to_vec());

        forward_message(&mailbox, &request(None))
            .await
            .expect("forwarded");
        let text = mailbox.sent_text();
        let parsed = mailparse::parse_mail(text.as_bytes()).expect("valid MIME");
        let body = parsed.subparts[0].get_body().expect("body");
        assert!(body.starts_with("---------- Forwarded message ---------\r\nFrom: \r\n"));
        assert!(body.contains("To: \r\n\r\n"));
    }
}
