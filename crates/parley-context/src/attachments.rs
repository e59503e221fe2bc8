//! Merging uploaded-file extracts with the user's typed text.

use serde::{Deserialize, Serialize};

/// Opens the block of attached file extracts.
pub const ATTACHMENTS_OPEN: &str = "[ATTACHED FILES]";

/// Closes the block of attached file extracts.
pub const ATTACHMENTS_CLOSE: &str = "[END OF ATTACHED FILES]";

/// Precedes the user's own text when files are attached.
pub const USER_TEXT_LABEL: &str = "User message:";

/// Shown in place of an extract that came back empty.
const NO_TEXT_PLACEHOLDER: &str = "(no text could be extracted from this file)";

/// An uploaded file reduced to its extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub original_filename: String,
    pub size_bytes: u64,
    pub extracted_text: String,
}

impl Attachment {
    pub fn new(
        original_filename: impl Into<String>,
        size_bytes: u64,
        extracted_text: impl Into<String>,
    ) -> Self {
        Self {
            original_filename: original_filename.into(),
            size_bytes,
            extracted_text: extracted_text.into(),
        }
    }

    /// Treat raw bytes as plain text, replacing invalid UTF-8.
    pub fn from_plain_text(original_filename: impl Into<String>, data: &[u8]) -> Self {
        Self::new(
            original_filename,
            data.len() as u64,
            String::from_utf8_lossy(data).into_owned(),
        )
    }

    /// Size in whole kilobytes, rounded up.
    pub fn size_kb(&self) -> u64 {
        self.size_bytes.div_ceil(1024)
    }
}

/// Combine `user_text` and `attachments` into the content of one turn.
///
/// Returns an empty string when there is neither text nor an attachment;
/// callers must not append that.
pub fn merge(user_text: &str, attachments: &[Attachment]) -> String {
    let text = user_text.trim();
    if attachments.is_empty() {
        return text.to_string();
    }

    let mut out = String::new();
    out.push_str(ATTACHMENTS_OPEN);
    out.push('\n');
    for attachment in attachments {
        out.push_str(&format!(
            "--- File: {} ({} KB) ---\n",
            attachment.original_filename,
            attachment.size_kb()
        ));
        let extract = attachment.extracted_text.trim_end();
        if extract.is_empty() {
            out.push_str(NO_TEXT_PLACEHOLDER);
        } else {
            out.push_str(extract);
        }
        out.push('\n');
    }
    out.push_str(ATTACHMENTS_CLOSE);

    if !text.is_empty() {
        out.push_str("\n\n");
        out.push_str(USER_TEXT_LABEL);
        out.push('\n');
        out.push_str(text);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_file_and_question() {
        let merged = merge(
            "What does this say?",
            &[Attachment::new("a.txt", 1024, "hello")],
        );
        assert!(merged.starts_with(ATTACHMENTS_OPEN));
        assert!(merged.contains("a.txt"));
        assert!(merged.contains("1 KB"));
        assert!(merged.contains("hello"));
        assert!(merged.contains(ATTACHMENTS_CLOSE));
        assert!(merged.contains("User message:\nWhat does this say?"));
        // extract precedes the question
        assert!(merged.find("hello").unwrap() < merged.find("What does").unwrap());
    }

    #[test]
    fn empty_text_and_no_attachments_is_empty() {
        assert_eq!(merge("", &[]), "");
        assert_eq!(merge("   \n", &[]), "");
    }

    #[test]
    fn text_only_passes_through() {
        assert_eq!(merge("  just a question ", &[]), "just a question");
    }

    #[test]
    fn attachments_without_text_have_no_label() {
        let merged = merge("  ", &[Attachment::new("notes.md", 10, "# Notes")]);
        assert!(merged.contains("# Notes"));
        assert!(!merged.contains(USER_TEXT_LABEL));
        assert!(merged.ends_with(ATTACHMENTS_CLOSE));
    }

    #[test]
    fn multiple_attachments_keep_order() {
        let merged = merge(
            "compare",
            &[
                Attachment::new("first.txt", 2048, "one"),
                Attachment::new("second.txt", 3000, "two"),
            ],
        );
        assert!(merged.contains("first.txt (2 KB)"));
        assert!(merged.contains("second.txt (3 KB)"));
        assert!(merged.find("first.txt").unwrap() < merged.find("second.txt").unwrap());
    }

    #[test]
    fn empty_extract_gets_placeholder() {
        let merged = merge("", &[Attachment::new("scan.pdf", 500, "")]);
        assert!(merged.contains(NO_TEXT_PLACEHOLDER));
    }

    #[test]
    fn from_plain_text_replaces_invalid_utf8() {
        let attachment = Attachment::from_plain_text("bin.txt", &[b'o', b'k', 0xFF]);
        assert_eq!(attachment.size_bytes, 3);
        assert!(attachment.extracted_text.starts_with("ok"));
    }
}
