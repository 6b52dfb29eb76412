//! Conversation identity: maps a sender to a stable conversation id.
//!
//! Pure string functions. The same sender (and, for relayed social-network
//! mail, the same display name) always yields the same id.

use std::sync::LazyLock;

use regex::Regex;

/// Bounce-relay domain used by LinkedIn for member messages.
///
/// Every member shares this sender domain, so the display name is the only
/// thing that tells conversations apart.
pub const LINKEDIN_BOUNCE_DOMAIN: &str = "bounce.linkedin.com";

static DISALLOWED_SLUG_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9\s-]").expect("static regex"));

static SEPARATOR_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s-]+").expect("static regex"));

/// Domain part of an email address, or `""` when there is no `@`.
///
/// Only the segment between the first and second `@` is returned, so
/// `a@b@c` yields `b`.
pub fn email_domain(address: &str) -> &str {
    address.split('@').nth(1).unwrap_or("")
}

/// Lowercase, drop anything outside `[a-z0-9\s-]`, collapse whitespace and
/// hyphen runs into single hyphens, trim hyphens from both ends.
pub fn slugify(text: &str) -> String {
    let lowered = text.trim().to_lowercase();
    let stripped = DISALLOWED_SLUG_CHARS.replace_all(&lowered, "");
    let joined = SEPARATOR_RUNS.replace_all(&stripped, "-");
    joined.trim_matches('-').to_string()
}

/// Resolve the conversation id for a sender.
///
/// LinkedIn relay mail with a display name becomes `<slug>-linkedin`;
/// everything else is the address with `@` replaced by `-at-`. An address
/// without `@` is returned unchanged.
pub fn resolve(sender_email: &str, display_name: Option<&str>) -> String {
    if email_domain(sender_email) == LINKEDIN_BOUNCE_DOMAIN
        && let Some(name) = display_name.filter(|n| !n.is_empty())
    {
        return format!("{}-linkedin", slugify(name));
    }

    sender_email.replace('@', "-at-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_address_substitutes_at() {
        assert_eq!(resolve("alice@example.com", None), "alice-at-example.com");
    }

    #[test]
    fn display_name_ignored_for_ordinary_domains() {
        assert_eq!(
            resolve("alice@example.com", Some("Alice Smith")),
            "alice-at-example.com"
        );
    }

    #[test]
    fn linkedin_relay_uses_display_name() {
        assert_eq!(
            resolve("m-abc123@bounce.linkedin.com", Some("Jane O'Brien  (Recruiter)")),
            "jane-obrien-recruiter-linkedin"
        );
    }

    #[test]
    fn linkedin_relay_without_name_falls_back_to_address() {
        assert_eq!(
            resolve("m-abc123@bounce.linkedin.com", None),
            "m-abc123-at-bounce.linkedin.com"
        );
        assert_eq!(
            resolve("m-abc123@bounce.linkedin.com", Some("")),
            "m-abc123-at-bounce.linkedin.com"
        );
    }

    #[test]
    fn address_without_at_is_unchanged() {
        assert_eq!(email_domain("postmaster"), "");
        assert_eq!(resolve("postmaster", Some("Someone")), "postmaster");
    }

    #[test]
    fn domain_takes_segment_after_first_at() {
        assert_eq!(email_domain("a@b@c"), "b");
        assert_eq!(email_domain("bob@mail.example.org"), "mail.example.org");
    }

    #[test]
    fn resolve_is_stable() {
        let first = resolve("Bob@Example.com", None);
        for _ in 0..3 {
            assert_eq!(resolve("Bob@Example.com", None), first);
        }
    }

    #[test]
    fn slugify_collapses_and_trims() {
        assert_eq!(slugify("  --Hello,   World--  "), "hello-world");
        assert_eq!(slugify("a - - b"), "a-b");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn slugify_output_alphabet() {
        for name in ["Ünïcödé Näme", "Tab\tSeparated\nName", "x__y", "-lead", "trail-"] {
            let slug = slugify(name);
            assert!(
                slug.chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'),
                "unexpected char in {slug:?}"
            );
            assert!(!slug.starts_with('-') && !slug.ends_with('-'));
            assert!(!slug.contains("--"));
        }
    }
}
