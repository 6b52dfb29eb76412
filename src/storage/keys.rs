//! Object key layout.
//!
//! These keys are shared with other systems reading the same bucket, so the
//! formats must not change.

use chrono::NaiveDate;

pub const STAGING_PREFIX: &str = "staging/";
pub const CONVERSATIONS_PREFIX: &str = "conversations/";
pub const SPAM_PREFIX: &str = "spam/";
pub const ATTACHMENTS_PREFIX: &str = "attachments/";
pub const EXTRACTED_TEXT_PREFIX: &str = "extracted-text/";

/// Raw message waiting to be processed.
pub fn staging(message_id: &str) -> String {
    format!("{STAGING_PREFIX}{message_id}")
}

/// Archived raw message (inbound or reply) within a conversation.
pub fn conversation_message(conversation_id: &str, message_id: &str) -> String {
    format!("{CONVERSATIONS_PREFIX}{conversation_id}/{message_id}")
}

/// Quarantined spam, bucketed by UTC day.
pub fn spam(day: NaiveDate, message_id: &str) -> String {
    format!("{SPAM_PREFIX}{}/{message_id}.eml", day.format("%Y-%m-%d"))
}

/// Saved attachment.
pub fn attachment(conversation_id: &str, message_id: &str, filename: &str) -> String {
    format!("{ATTACHMENTS_PREFIX}{conversation_id}/{message_id}/{filename}")
}

/// Where extracted text for an attachment key goes, if the key is an
/// attachment key at all.
pub fn extracted_text(attachment_key: &str) -> Option<String> {
    attachment_key
        .strip_prefix(ATTACHMENTS_PREFIX)
        .map(|rest| format!("{EXTRACTED_TEXT_PREFIX}{rest}.txt"))
}

/// Attachment types that are saved for text extraction.
pub fn is_extractable_attachment(filename: &str) -> bool {
    let lower = filename.to_lowercase();
    lower.ends_with(".pdf") || lower.ends_with(".docx")
}
