//! Outbound user-message assembly.
//!
//! Combines prompt text with downloaded file attachments into the child's
//! content blocks: images and PDFs as base64 media blocks, small text
//! files inlined verbatim, `.gz` files expanded first. Unsupported types
//! are elided and reported back to the thread once per message.

use std::io::Read;

use base64::Engine;
use tracing::warn;

use crate::child::UserContent;
use crate::platform::{FileInfo, PlatformAdapter};
use crate::Result;

/// Inline cap for text attachments, after any expansion.
const MAX_INLINE_TEXT_BYTES: usize = 64 * 1024;

const IMAGE_MIMES: [&str; 4] = ["image/png", "image/jpeg", "image/gif", "image/webp"];
const TEXT_EXTENSIONS: [&str; 18] = [
    "txt", "md", "rs", "py", "js", "ts", "json", "toml", "yaml", "yml", "sh", "c", "h", "cpp",
    "go", "java", "sql", "csv",
];

/// Assembled message plus the names of elided attachments.
#[derive(Debug)]
pub struct BuiltMessage {
    /// Content for [`crate::child::ChildProcess::send_message`].
    pub content: UserContent,
    /// Attachments that could not be represented; report these once.
    pub elided: Vec<String>,
}

/// Build child message content from text and attachments.
///
/// Download failures elide the affected file rather than failing the
/// whole message.
///
/// # Errors
///
/// Currently infallible beyond the `Result` plumbing; kept fallible for
/// adapter parity.
pub async fn build_message_content(
    adapter: &dyn PlatformAdapter,
    text: &str,
    files: &[FileInfo],
) -> Result<BuiltMessage> {
    if files.is_empty() {
        return Ok(BuiltMessage {
            content: UserContent::Text(text.to_owned()),
            elided: Vec::new(),
        });
    }

    let mut blocks = vec![serde_json::json!({"type": "text", "text": text})];
    let mut elided = Vec::new();

    for file in files {
        let bytes = match adapter.download_file(&file.id).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%err, file = file.name, "attachment download failed, eliding");
                elided.push(file.name.clone());
                continue;
            }
        };

        match classify(file) {
            AttachmentKind::Image => blocks.push(media_block("image", &file.mime_type, &bytes)),
            AttachmentKind::Pdf => {
                blocks.push(media_block("document", "application/pdf", &bytes));
            }
            AttachmentKind::Text => match inline_text(&file.name, &bytes) {
                Some(block) => blocks.push(block),
                None => elided.push(file.name.clone()),
            },
            AttachmentKind::Gzip => match gunzip(&bytes) {
                Ok(expanded) => match inline_text(file.name.trim_end_matches(".gz"), &expanded) {
                    Some(block) => blocks.push(block),
                    None => elided.push(file.name.clone()),
                },
                Err(err) => {
                    warn!(%err, file = file.name, "gzip expansion failed, eliding");
                    elided.push(file.name.clone());
                }
            },
            AttachmentKind::Unsupported => elided.push(file.name.clone()),
        }
    }

    Ok(BuiltMessage {
        content: UserContent::Blocks(blocks),
        elided,
    })
}

/// One-line notice listing elided attachments, or `None` when none were.
#[must_use]
pub fn elision_notice(elided: &[String]) -> Option<String> {
    if elided.is_empty() {
        return None;
    }
    Some(format!(
        "\u{1f4ce} Skipped unsupported attachment(s): {}",
        elided.join(", ")
    ))
}

enum AttachmentKind {
    Image,
    Pdf,
    Text,
    Gzip,
    Unsupported,
}

fn classify(file: &FileInfo) -> AttachmentKind {
    if IMAGE_MIMES.contains(&file.mime_type.as_str()) {
        return AttachmentKind::Image;
    }
    if file.mime_type == "application/pdf" || file.extension == "pdf" {
        return AttachmentKind::Pdf;
    }
    if file.extension == "gz" {
        return AttachmentKind::Gzip;
    }
    if file.mime_type.starts_with("text/") || TEXT_EXTENSIONS.contains(&file.extension.as_str()) {
        return AttachmentKind::Text;
    }
    AttachmentKind::Unsupported
}

fn media_block(block_type: &str, media_type: &str, bytes: &[u8]) -> serde_json::Value {
    let data = base64::engine::general_purpose::STANDARD.encode(bytes);
    serde_json::json!({
        "type": block_type,
        "source": {"type": "base64", "media_type": media_type, "data": data},
    })
}

fn inline_text(name: &str, bytes: &[u8]) -> Option<serde_json::Value> {
    if bytes.len() > MAX_INLINE_TEXT_BYTES {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    Some(serde_json::json!({
        "type": "text",
        "text": format!("Attached file `{name}`:\n```\n{text}\n```"),
    }))
}

fn gunzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = flate2::read::GzDecoder::new(bytes);
    let mut out = Vec::new();
    // Cap the expansion the same way the inline limit does, plus one byte
    // so oversized files are detected and elided.
    let mut limited = decoder.by_ref().take(u64::try_from(MAX_INLINE_TEXT_BYTES).unwrap_or(u64::MAX) + 1);
    limited.read_to_end(&mut out)?;
    Ok(out)
}
