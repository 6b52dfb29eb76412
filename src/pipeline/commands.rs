//! Reply metadata commands and body cleanup.
//!
//! The operator can annotate a reply with `[Key: Value]` tokens anywhere in
//! the plain-text body. Recognized keys are stored on the conversation; the
//! tokens themselves are sent through unchanged.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

/// Marker line that starts the forwarded metadata footer.
pub const METADATA_MARKER: &str = "--- METADATA ---";

static COMMAND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\w+):\s*([^\]]+)\]").expect("static regex"));

/// Map a command key (any case) to its conversation metadata field.
fn metadata_field(key: &str) -> Option<&'static str> {
    match key.to_lowercase().as_str() {
        "company" => Some("companyName"),
        "title" => Some("title"),
        "type" => Some("type"),
        "location" => Some("location"),
        "salary_range" => Some("salaryRange"),
        "job_id" => Some("jobId"),
        "notes" => Some("notes"),
        _ => None,
    }
}

/// Collect recognized `[Key: Value]` commands. Later occurrences of the same
/// key overwrite earlier ones; unknown keys are ignored.
pub fn extract_commands(body: &str) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    for caps in COMMAND_RE.captures_iter(body) {
        if let Some(field) = metadata_field(&caps[1]) {
            metadata.insert(field.to_string(), caps[2].trim().to_string());
        }
    }
    metadata
}

/// Drop the metadata footer and everything after it, then quoted (`>`)
/// lines, then surrounding whitespace.
pub fn clean_body(body: &str) -> String {
    let before_footer = match body.find(METADATA_MARKER) {
        Some(idx) => &body[..idx],
        None => body,
    };

    before_footer
        .lines()
        .filter(|line| !line.starts_with('>'))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Footer appended to forwarded mail so a reply can be routed back.
pub fn metadata_footer(reply_to: &str, sender: &str, conversation_id: &str) -> String {
    format!(
        "\n\n{METADATA_MARKER}\nReply-To: {reply_to}\nOriginal Sender: {sender}\nConversation ID: {conversation_id}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_known_commands() {
        let meta = extract_commands("[Company: Acme] [Title: Engineer]");
        assert_eq!(
            meta,
            BTreeMap::from([
                ("companyName".to_string(), "Acme".to_string()),
                ("title".to_string(), "Engineer".to_string()),
            ])
        );
    }

    #[test]
    fn key_mapping_and_case() {
        let body = "Thanks!\n[SALARY_RANGE: 150-180k]\n[job_id:  R-42 ]\n[Type: Contract]\n\
                    [location: Remote]\n[NOTES: call Tuesday]";
        let meta = extract_commands(body);
        assert_eq!(meta["salaryRange"], "150-180k");
        assert_eq!(meta["jobId"], "R-42");
        assert_eq!(meta["type"], "Contract");
        assert_eq!(meta["location"], "Remote");
        assert_eq!(meta["notes"], "call Tuesday");
    }

    #[test]
    fn last_occurrence_wins_and_unknown_ignored() {
        let meta = extract_commands("[Company: Old] [Priority: high] [company: New]");
        assert_eq!(meta.len(), 1);
        assert_eq!(meta["companyName"], "New");
    }

    #[test]
    fn no_commands() {
        assert!(extract_commands("plain reply, [not a command]").is_empty());
        assert!(extract_commands("").is_empty());
    }

    #[test]
    fn clean_body_strips_footer_and_quotes() {
        assert_eq!(
            clean_body("Hello\n> quoted\n--- METADATA ---\nReply-To: x"),
            "Hello"
        );
    }

    #[test]
    fn clean_body_keeps_indented_gt_and_inner_lines() {
        let body = "\n\nLine one\n  > not at line start\n>> nested quote\nLine two\n\n";
        assert_eq!(clean_body(body), "Line one\n  > not at line start\nLine two");
    }

    #[test]
    fn clean_body_marker_mid_line() {
        assert_eq!(clean_body("Reply text --- METADATA --- rest"), "Reply text");
        assert_eq!(clean_body("--- METADATA ---\nonly footer"), "");
    }

    #[test]
    fn footer_round_trips_through_clean_body() {
        let footer = metadata_footer(
            "alice-at-example.com@thread.example.com",
            "alice@example.com",
            "alice-at-example.com",
        );
        assert!(footer.starts_with("\n\n--- METADATA ---\nReply-To: "));
        assert!(footer.ends_with("Conversation ID: alice-at-example.com"));
        assert_eq!(clean_body(&format!("Original body{footer}")), "Original body");
    }
}
