//! Read-only traversal of a fetched MIME part tree
//!
//! Extracts the body text, attachment descriptors, and inline-image
//! descriptors from a Gmail `full` payload. Traversal is depth-first in
//! document order and uses an explicit stack, so arbitrarily deep trees from
//! the API cannot exhaust the call stack.

use crate::codec::decode_base64_url;
use crate::errors::AppResult;
use crate::resources::{Header, MessagePart};

/// Fallback MIME type for attachment parts that omit one
const DEFAULT_ATTACHMENT_MIME: &str = "application/octet-stream";

/// Body text extracted from a part tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedBody {
    /// Decoded body text
    pub content: String,
    /// Whether `content` is HTML
    pub is_html: bool,
}

/// Regular attachment found in a part tree (metadata only)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub filename: String,
    pub mime_type: String,
    pub attachment_id: String,
}

/// Inline image found in a part tree (metadata only)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImageRef {
    pub mime_type: String,
    /// Literal Content-ID header value, e.g. `<img1>`
    pub content_id: String,
    pub attachment_id: String,
}

/// Find a header value by case-insensitive name
///
/// Only the given header list is searched; the first match wins.
pub fn header_value<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Header lookup on a part's own headers (descendants are not searched)
pub fn part_header<'a>(part: &'a MessagePart, name: &str) -> Option<&'a str> {
    part.headers
        .as_deref()
        .and_then(|headers| header_value(headers, name))
}

/// Iterate a subtree depth-first in document order, starting at `root`
fn walk(root: &MessagePart) -> impl Iterator<Item = &MessagePart> {
    let mut stack = vec![root];
    std::iter::from_fn(move || {
        let part = stack.pop()?;
        stack.extend(part.parts.iter().rev());
        Some(part)
    })
}

/// Extract the message body, preferring plain text over HTML
///
/// A root part carrying inline data is returned as plain text. Otherwise the
/// descendants are searched for the first `text/plain` part with data, then
/// for the first `text/html` part. When neither exists the body is empty.
///
/// # Errors
///
/// Returns `Decode` if the selected part's data is not valid base64url.
pub fn extract_body(root: &MessagePart) -> AppResult<ExtractedBody> {
    if let Some(data) = inline_data(root) {
        return Ok(ExtractedBody {
            content: decode_text(data)?,
            is_html: false,
        });
    }

    for (mime_type, is_html) in [("text/plain", false), ("text/html", true)] {
        let found = walk(root)
            .skip(1)
            .find(|part| part.mime_type.as_deref() == Some(mime_type) && inline_data(part).is_some());
        if let Some(data) = found.and_then(inline_data) {
            return Ok(ExtractedBody {
                content: decode_text(data)?,
                is_html,
            });
        }
    }

    Ok(ExtractedBody {
        content: String::new(),
        is_html: false,
    })
}

/// Collect regular attachments in traversal order
///
/// A part qualifies when it has an attachment id and a non-empty filename
/// and carries no Content-ID header.
pub fn find_attachments(root: &MessagePart) -> Vec<AttachmentRef> {
    walk(root)
        .filter(|part| part_header(part, "Content-ID").is_none())
        .filter_map(|part| {
            let attachment_id = attachment_id(part)?;
            let filename = part.filename.as_deref().filter(|f| !f.is_empty())?;
            Some(AttachmentRef {
                filename: filename.to_owned(),
                mime_type: part
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ATTACHMENT_MIME.to_owned()),
                attachment_id: attachment_id.to_owned(),
            })
        })
        .collect()
}

/// Collect inline images in traversal order
///
/// A part qualifies when it has a Content-ID header, an attachment id, and an
/// `image/*` MIME type.
pub fn find_inline_images(root: &MessagePart) -> Vec<InlineImageRef> {
    walk(root)
        .filter_map(|part| {
            let content_id = part_header(part, "Content-ID")?;
            let attachment_id = attachment_id(part)?;
            let mime_type = part.mime_type.as_deref().filter(|m| m.starts_with("image/"))?;
            Some(InlineImageRef {
                mime_type: mime_type.to_owned(),
                content_id: content_id.to_owned(),
                attachment_id: attachment_id.to_owned(),
            })
        })
        .collect()
}

fn inline_data(part: &MessagePart) -> Option<&str> {
    part.body
        .as_ref()
        .and_then(|b| b.data.as_deref())
        .filter(|d| !d.is_empty())
}

fn attachment_id(part: &MessagePart) -> Option<&str> {
    part.body
        .as_ref()
        .and_then(|b| b.attachment_id.as_deref())
        .filter(|id| !id.is_empty())
}

fn decode_text(data: &str) -> AppResult<String> {
    let bytes = decode_base64_url(data)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::{extract_body, find_attachments, find_inline_images, header_value, part_header};
    use crate::codec::encode_base64_url;
    use crate::resources::{Header, MessagePart, MessagePartBody};

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
            headers: cid.map(|cid| {
                vec![Header {
                    name: "Content-Id".to_owned(),
                    value: cid.to_owned(),
                }]
            }),
            body: Some(MessagePartBody {
                attachment_id: Some(attachment_id.to_owned()),
                size: Some(10),
                data: None,
            }),
            ..MessagePart::default()
        }
    }

    fn container(mime: &str, parts: Vec<MessagePart>) -> MessagePart {
        MessagePart {
            mime_type: Some(mime.to_owned()),
            headers: Some(Vec::new()),
            parts,
            ..MessagePart::default()
        }
    }

    #[test]
    fn header_lookup_is_case_insensitive_and_first_match_wins() {
        let headers = vec![
            Header { name: "subject".to_owned(), value: "first".to_owned() },
            Header { name: "SUBJECT".to_owned(), value: "second".to_owned() },
        ];
        assert_eq!(header_value(&headers, "Subject"), Some("first"));
        assert_eq!(header_value(&headers, "From"), None);
    }

    #[test]
    fn header_lookup_does_not_search_descendants() {
        let root = container(
            "multipart/mixed",
            vec![file_part("image/png", "a.png", "a1", Some("<img1>"))],
        );
        assert_eq!(part_header(&root, "Content-ID"), None);
    }

    #[test]
    fn root_data_is_returned_as_plain_text() {
        let root = text_part("text/html", "<p>hi</p>");
        let body = extract_body(&root).expect("decode");
        assert_eq!(body.content, "<p>hi</p>");
        assert!(!body.is_html);
    }

    #[test]
    fn plain_text_wins_over_html() {
        let root = container(
            "multipart/mixed",
            vec![container(
                "multipart/alternative",
                vec![text_part("text/html", "<b>rich</b>"), text_part("text/plain", "plain")],
            )],
        );
        let body = extract_body(&root).expect("decode");
        assert_eq!(body.content, "plain");
        assert!(!body.is_html);
    }

    #[test]
    fn html_only_tree_is_flagged_html() {
        let root = container(
            "multipart/related",
            vec![
                text_part("text/html", "<p>only html</p>"),
                file_part("image/png", "logo.png", "a1", Some("<logo>")),
            ],
        );
        let body = extract_body(&root).expect("decode");
        assert_eq!(body.content, "<p>only html</p>");
        assert!(body.is_html);
    }

    #[test]
    fn tree_without_text_yields_empty_body() {
        let root = container(
            "multipart/mixed",
            vec![file_part("application/pdf", "a.pdf", "a1", None)],
        );
        let body = extract_body(&root).expect("no text");
        assert_eq!(body.content, "");
        assert!(!body.is_html);
    }

    #[test]
    fn invalid_body_data_is_a_decode_error() {
        let mut part = text_part("text/plain", "x");
        part.body = Some(MessagePartBody {
            data: Some("not base64!".to_owned()),
            ..MessagePartBody::default()
        });
        let root = container("multipart/mixed", vec![part]);
        let err = extract_body(&root).expect_err("invalid data");
        assert!(err.to_string().contains("decode failed"));
    }

    #[test]
    fn attachments_exclude_content_id_parts_and_keep_document_order() {
        let root = container(
            "multipart/mixed",
            vec![
                container(
                    "multipart/related",
                    vec![
                        text_part("text/html", "<img src=\"cid:img1\">"),
                        file_part("image/png", "inline.png", "a-inline", Some("<img1>")),
                    ],
                ),
                file_part("application/pdf", "report.pdf", "a-1", None),
                file_part("application/pdf", "report.pdf", "a-2", None),
                file_part("text/csv", "", "a-unnamed", None),
            ],
        );

        let attachments = find_attachments(&root);
        let ids: Vec<&str> = attachments.iter().map(|a| a.attachment_id.as_str()).collect();
        assert_eq!(ids, ["a-1", "a-2"]);
        assert_eq!(attachments[0].filename, "report.pdf");
        assert_eq!(attachments[0].mime_type, "application/pdf");
    }

    #[test]
    fn inline_images_require_image_mime_type() {
        let root = container(
            "multipart/related",
            vec![
                file_part("image/jpeg", "photo.jpg", "a-photo", Some("<photo>")),
                file_part("application/pdf", "doc.pdf", "a-doc", Some("<doc>")),
            ],
        );

        let images = find_inline_images(&root);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].content_id, "<photo>");
        assert_eq!(images[0].attachment_id, "a-photo");
        assert!(find_attachments(&root).is_empty());
    }

    #[test]
    fn deep_trees_are_walked_without_recursion() {
        let mut root = file_part("application/zip", "deep.zip", "a-deep", None);
        for _ in 0..50_000 {
            root = container("multipart/mixed", vec![root]);
        }
        let attachments = find_attachments(&root);
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].attachment_id, "a-deep");
        // Dropping a tree this deep recurses in the compiler-generated drop glue.
        std::mem::forget(root);
    }
}
