//! Resolution of tool-supplied attachments into composer parts
//!
//! An attachment arrives either as inline base64 `content` or as a local file
//! `path`. Paths are only honored beneath a configured root directory. The
//! combined decoded size of all attachments and inline images is capped.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::codec::decode_base64_lenient;
use crate::compose::{Attachment, InlineImage};
use crate::errors::{AppError, AppResult};
use crate::models::{AttachmentInput, InlineImageInput};

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Extension to MIME type mapping for file-path attachments
static MIME_TYPES: &[(&str, &str)] = &[
    ("7z", "application/x-7z-compressed"),
    ("avi", "video/x-msvideo"),
    ("bmp", "image/bmp"),
    ("css", "text/css"),
    ("csv", "text/csv"),
    ("doc", "application/msword"),
    ("docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
    ("eml", "message/rfc822"),
    ("gif", "image/gif"),
    ("gz", "application/gzip"),
    ("htm", "text/html"),
    ("html", "text/html"),
    ("ico", "image/vnd.microsoft.icon"),
    ("ics", "text/calendar"),
    ("jpeg", "image/jpeg"),
    ("jpg", "image/jpeg"),
    ("js", "text/javascript"),
    ("json", "application/json"),
    ("md", "text/markdown"),
    ("mov", "video/quicktime"),
    ("mp3", "audio/mpeg"),
    ("mp4", "video/mp4"),
    ("odp", "application/vnd.oasis.opendocument.presentation"),
    ("ods", "application/vnd.oasis.opendocument.spreadsheet"),
    ("odt", "application/vnd.oasis.opendocument.text"),
    ("ogg", "audio/ogg"),
    ("pdf", "application/pdf"),
    ("png", "image/png"),
    ("ppt", "application/vnd.ms-powerpoint"),
    ("pptx", "application/vnd.openxmlformats-officedocument.presentationml.presentation"),
    ("rar", "application/vnd.rar"),
    ("rtf", "application/rtf"),
    ("svg", "image/svg+xml"),
    ("tar", "application/x-tar"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("txt", "text/plain"),
    ("wav", "audio/wav"),
    ("webm", "video/webm"),
    ("webp", "image/webp"),
    ("xls", "application/vnd.ms-excel"),
    ("xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
    ("xml", "application/xml"),
    ("yaml", "application/yaml"),
    ("yml", "application/yaml"),
    ("zip", "application/zip"),
];

/// Limits applied while resolving attachment inputs
#[derive(Debug, Clone, Copy)]
pub struct AttachmentPolicy<'a> {
    /// Directory that file-path attachments must live beneath; `None` disables paths
    pub root: Option<&'a Path>,
    /// Cap on combined decoded bytes of attachments and inline images
    pub max_total_bytes: usize,
}

/// Look up a MIME type by file extension (case-insensitive)
pub fn mime_type_for_path(path: &Path) -> &'static str {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| {
            MIME_TYPES
                .iter()
                .find(|(known, _)| known.eq_ignore_ascii_case(ext))
                .map(|(_, mime)| *mime)
        })
        .unwrap_or(DEFAULT_MIME_TYPE)
}

/// Resolve attachment and inline-image inputs into decoded parts
///
/// Output order matches input order.
///
/// # Errors
///
/// - `InvalidInput` when a source is missing or ambiguous, a path escapes the
///   configured root, an inline image is not `image/*`, or the size cap is hit
/// - `Decode` when inline content is not valid base64
pub async fn resolve_parts(
    attachments: &[AttachmentInput],
    inline_images: &[InlineImageInput],
    policy: AttachmentPolicy<'_>,
) -> AppResult<(Vec<Attachment>, Vec<InlineImage>)> {
    let mut budget = ByteBudget::new(policy.max_total_bytes);

    let mut resolved = Vec::with_capacity(attachments.len());
    for input in attachments {
        resolved.push(resolve_attachment(input, policy, &mut budget).await?);
    }

    let mut images = Vec::with_capacity(inline_images.len());
    for input in inline_images {
        let image = resolve_inline_image(input)?;
        budget.charge(image.content.len())?;
        images.push(image);
    }

    Ok((resolved, images))
}

async fn resolve_attachment(
    input: &AttachmentInput,
    policy: AttachmentPolicy<'_>,
    budget: &mut ByteBudget,
) -> AppResult<Attachment> {
    match (&input.content, &input.path) {
        (Some(content), None) => {
            let filename = input
                .filename
                .as_deref()
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .ok_or_else(|| AppError::invalid("attachment filename is required with content"))?;
            let content = decode_base64_lenient(content)?;
            budget.charge(content.len())?;
            let mime_type = input
                .mime_type
                .clone()
                .unwrap_or_else(|| mime_type_for_path(Path::new(filename)).to_owned());
            Ok(Attachment {
                filename: filename.to_owned(),
                mime_type,
                content,
            })
        }
        (None, Some(path)) => {
            let path = confine_path(path, policy.root).await?;
            let metadata = fs::metadata(&path)
                .await
                .map_err(|e| AppError::invalid(format!("cannot read attachment file: {e}")))?;
            if !metadata.is_file() {
                return Err(AppError::invalid("attachment path is not a regular file"));
            }
            budget.ensure_room(usize::try_from(metadata.len()).unwrap_or(usize::MAX))?;
            let content = fs::read(&path)
                .await
                .map_err(|e| AppError::invalid(format!("cannot read attachment file: {e}")))?;
            budget.charge(content.len())?;

            let filename = match input.filename.as_deref().filter(|f| !f.trim().is_empty()) {
                Some(name) => name.to_owned(),
                None => path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_owned)
                    .ok_or_else(|| AppError::invalid("attachment path has no file name"))?,
            };
            let mime_type = input
                .mime_type
                .clone()
                .unwrap_or_else(|| mime_type_for_path(&path).to_owned());
            Ok(Attachment {
                filename,
                mime_type,
                content,
            })
        }
        (None, None) => Err(AppError::invalid(
            "attachment requires one of content or path",
        )),
        (Some(_), Some(_)) => Err(AppError::invalid(
            "attachment accepts only one of content or path",
        )),
    }
}

fn resolve_inline_image(input: &InlineImageInput) -> AppResult<InlineImage> {
    if !input.mime_type.starts_with("image/") {
        return Err(AppError::invalid(format!(
            "inline image mime_type must start with image/, got '{}'",
            input.mime_type
        )));
    }
    Ok(InlineImage {
        mime_type: input.mime_type.clone(),
        content_id: normalize_content_id(&input.content_id)?,
        content: decode_base64_lenient(&input.content)?,
    })
}

/// Wrap a bare content id in angle brackets
pub fn normalize_content_id(content_id: &str) -> AppResult<String> {
    let trimmed = content_id.trim();
    let bare = trimmed
        .strip_prefix('<')
        .and_then(|rest| rest.strip_suffix('>'))
        .unwrap_or(trimmed);
    if bare.is_empty() {
        return Err(AppError::invalid("inline image content_id must not be empty"));
    }
    if bare.contains(['<', '>']) {
        return Err(AppError::invalid(
            "inline image content_id must not contain angle brackets",
        ));
    }
    Ok(format!("<{bare}>"))
}

/// Canonicalize `path` and require it to sit beneath the attachment root
async fn confine_path(path: &str, root: Option<&Path>) -> AppResult<PathBuf> {
    let Some(root) = root else {
        return Err(AppError::invalid(
            "file-path attachments are disabled; set GMAIL_MCP_ATTACHMENT_ROOT",
        ));
    };
    let root = fs::canonicalize(root)
        .await
        .map_err(|e| AppError::Internal(format!("attachment root is not accessible: {e}")))?;
    let candidate = fs::canonicalize(root.join(path))
        .await
        .map_err(|e| AppError::invalid(format!("attachment path '{path}' not found: {e}")))?;
    if !candidate.starts_with(&root) {
        return Err(AppError::invalid(format!(
            "attachment path '{path}' is outside the attachment root"
        )));
    }
    Ok(candidate)
}

struct ByteBudget {
    used: usize,
    max: usize,
}

impl ByteBudget {
    fn new(max: usize) -> Self {
        Self { used: 0, max }
    }

    /// Fail early when `bytes` more would not fit, without recording them
    fn ensure_room(&self, bytes: usize) -> AppResult<()> {
        if self.used.saturating_add(bytes) > self.max {
            return Err(AppError::invalid(format!(
                "attachments exceed the {} byte limit",
                self.max
            )));
        }
        Ok(())
    }

    fn charge(&mut self, bytes: usize) -> AppResult<()> {
        self.ensure_room(bytes)?;
        self.used += bytes;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{AttachmentPolicy, mime_type_for_path, normalize_content_id, resolve_parts};
    use crate::models::{AttachmentInput, InlineImageInput};

    const NO_PATHS: AttachmentPolicy<'static> = AttachmentPolicy {
        root: None,
        max_total_bytes: 1024,
    };

    fn content_input(filename: &str, content: &str) -> AttachmentInput {
        AttachmentInput {
            filename: Some(filename.to_owned()),
            mime_type: None,
            content: Some(content.to_owned()),
            path: None,
        }
    }

    fn path_input(path: &str) -> AttachmentInput {
        AttachmentInput {
            filename: None,
            mime_type: None,
            content: None,
            path: Some(path.to_owned()),
        }
    }

    #[test]
    fn mime_lookup_uses_extension_case_insensitively() {
        assert_eq!(mime_type_for_path(Path::new("report.PDF")), "application/pdf");
        assert_eq!(mime_type_for_path(Path::new("a/b/photo.jpeg")), "image/jpeg");
        assert_eq!(mime_type_for_path(Path::new("blob.xyz")), "application/octet-stream");
        assert_eq!(mime_type_for_path(Path::new("README")), "application/octet-stream");
    }

    #[test]
    fn content_ids_are_bracketed_once() {
        assert_eq!(normalize_content_id("img1").expect("bare"), "<img1>");
        assert_eq!(normalize_content_id(" <img1> ").expect("bracketed"), "<img1>");
        assert!(normalize_content_id("<>").is_err());
        assert!(normalize_content_id("a<b").is_err());
    }

    #[tokio::test]
    async fn inline_content_is_decoded_with_defaults() {
        let (attachments, images) = resolve_parts(
            &[content_input("notes.txt", "aGVs\r\nbG8=")],
            &[InlineImageInput {
                content_id: "logo".to_owned(),
                mime_type: "image/png".to_owned(),
                content: "iVBORw".to_owned(),
            }],
            NO_PATHS,
        )
        .await
        .expect("resolve");

        assert_eq!(attachments[0].content, b"hello");
        assert_eq!(attachments[0].mime_type, "text/plain");
        assert_eq!(images[0].content_id, "<logo>");
        assert_eq!(images[0].content, [0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn missing_or_ambiguous_source_is_rejected() {
        let neither = AttachmentInput {
            filename: Some("a.txt".to_owned()),
            mime_type: None,
            content: None,
            path: None,
        };
        let err = resolve_parts(&[neither], &[], NO_PATHS)
            .await
            .expect_err("no source");
        assert!(err.to_string().contains("one of content or path"));

        let both = AttachmentInput {
            path: Some("a.txt".to_owned()),
            ..content_input("a.txt", "aGk=")
        };
        assert!(resolve_parts(&[both], &[], NO_PATHS).await.is_err());

        let unnamed = AttachmentInput {
            filename: None,
            ..content_input("", "aGk=")
        };
        let err = resolve_parts(&[unnamed], &[], NO_PATHS)
            .await
            .expect_err("filename required");
        assert!(err.to_string().contains("filename is required"));
    }

    #[tokio::test]
    async fn non_image_inline_part_is_rejected() {
        let err = resolve_parts(
            &[],
            &[InlineImageInput {
                content_id: "doc".to_owned(),
                mime_type: "application/pdf".to_owned(),
                content: "aGk=".to_owned(),
            }],
            NO_PATHS,
        )
        .await
        .expect_err("must be image");
        assert!(err.to_string().contains("image/"));
    }

    #[tokio::test]
    async fn total_size_limit_is_enforced() {
        let policy = AttachmentPolicy {
            root: None,
            max_total_bytes: 4,
        };
        // "hello" decodes to five bytes
        let err = resolve_parts(&[content_input("a.txt", "aGVsbG8=")], &[], policy)
            .await
            .expect_err("over limit");
        assert!(err.to_string().contains("byte limit"));
    }

    #[tokio::test]
    async fn file_paths_require_a_configured_root() {
        let err = resolve_parts(&[path_input("/etc/hostname")], &[], NO_PATHS)
            .await
            .expect_err("paths disabled");
        assert!(err.to_string().contains("GMAIL_MCP_ATTACHMENT_ROOT"));
    }

    #[tokio::test]
    async fn file_paths_resolve_beneath_root() {
        let root = tempfile::tempdir().expect("tempdir");
        std::fs::write(root.path().join("invoice.pdf"), b"%PDF").expect("write");
        let policy = AttachmentPolicy {
            root: Some(root.path()),
            max_total_bytes: 1024,
        };

        let (attachments, _) = resolve_parts(&[path_input("invoice.pdf")], &[], policy)
            .await
            .expect("resolve");
        assert_eq!(attachments[0].filename, "invoice.pdf");
        assert_eq!(attachments[0].mime_type, "application/pdf");
        assert_eq!(attachments[0].content, b"%PDF");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn file_size_is_charged_from_bytes_read() {
        // procfs reports a length of zero for files that have content
        let policy = AttachmentPolicy {
            root: Some(Path::new("/proc/self")),
            max_total_bytes: 16,
        };
        let err = resolve_parts(&[path_input("status")], &[], policy)
            .await
            .expect_err("read bytes exceed cap");
        assert!(err.to_string().contains("16 byte limit"));
    }

    #[tokio::test]
    async fn file_paths_outside_root_are_rejected() {
        let root = tempfile::tempdir().expect("tempdir");
        let outside = tempfile::tempdir().expect("tempdir");
        let secret = outside.path().join("secret.txt");
        std::fs::write(&secret, b"secret").expect("write");
        let policy = AttachmentPolicy {
            root: Some(root.path()),
            max_total_bytes: 1024,
        };

        let secret = secret.to_string_lossy().into_owned();
        let err = resolve_parts(&[path_input(&secret)], &[], policy)
            .await
            .expect_err("outside root");
        assert!(err.to_string().contains("outside the attachment root"));

        let err = resolve_parts(&[path_input("../secret.txt")], &[], policy)
            .await
            .expect_err("traversal");
        assert!(err.to_string().contains("attachment path"));
    }
}
