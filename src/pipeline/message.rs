//! Raw message parsing with mail-parser.

use mail_parser::{MessageParser, MimeHeaders};

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub data: Vec<u8>,
}

/// The parts of a raw message the pipeline uses.
#[derive(Debug, Clone, Default)]
pub struct ParsedMessage {
    /// `Subject:` header, if present and non-empty.
    pub subject: Option<String>,
    /// First `text/plain` body part, or empty.
    pub body: String,
    /// Display name from the `From:` header.
    pub display_name: Option<String>,
    /// Named attachments with non-empty content.
    pub attachments: Vec<Attachment>,
}

impl ParsedMessage {
    pub fn subject_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.subject.as_deref().unwrap_or(default)
    }
}

/// Parse an RFC 5322 message. Returns `None` if the bytes are not a message.
pub fn parse(raw: &[u8]) -> Option<ParsedMessage> {
    let parsed = MessageParser::default().parse(raw)?;

    let subject = parsed
        .subject()
        .map(str::to_string)
        .filter(|s| !s.is_empty());

    let body = parsed
        .text_bodies()
        .find(|part| part.is_text() && !part.is_text_html())
        .and_then(|part| part.text_contents())
        .unwrap_or_default()
        .to_string();

    let display_name = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.name())
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    let attachments = parsed
        .attachments()
        .filter_map(|part| {
            let filename = MimeHeaders::attachment_name(part)?;
            let data = part.contents();
            if filename.is_empty() || data.is_empty() {
                return None;
            }
            Some(Attachment {
                filename: filename.to_string(),
                data: data.to_vec(),
            })
        })
        .collect();

    Some(ParsedMessage {
        subject,
        body,
        display_name,
        attachments,
    })
}
