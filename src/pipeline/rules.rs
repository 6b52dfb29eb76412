//! Spam rules engine.
//!
//! Every check is a `SpamCheck` in one ordered list: the provider verdicts,
//! the recipient match, then the pattern lists from the externally managed
//! ruleset. Evaluation stops at the first check that reports a reason:
//! 1. provider spam/virus verdict `FAIL` → `ses_verdict`
//! 2. first envelope recipient is not the public address → `recipient_mismatch`
//! 3. blocked sender domain pattern → `blocked_domain:<pattern>`
//! 4. subject pattern → `subject_keyword:<pattern>`
//! 5. body pattern (first 10,000 chars) → `body_keyword:<pattern>`

use std::fmt;
use std::sync::Arc;

use fancy_regex::{Regex, RegexBuilder};
use tracing::{debug, error, warn};

use crate::pipeline::ruleset_cache::RulesetCache;
use crate::pipeline::types::{ScanVerdict, truncate_chars};

/// How much of the body is scanned by body patterns.
pub const BODY_SCAN_CHARS: usize = 10_000;

const BLOCKED_SENDER_DOMAINS_MARKER: &str = "--- BLOCKED_SENDER_DOMAINS ---";
const SUBJECT_PATTERNS_MARKER: &str = "--- SUBJECT_PATTERNS ---";
const BODY_PATTERNS_MARKER: &str = "--- BODY_PATTERNS ---";

// ── Ruleset source ──────────────────────────────────────────────────

/// Raw pattern lists as loaded from the ruleset file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpamRuleSet {
    pub blocked_sender_domains: Vec<String>,
    pub subject_patterns: Vec<String>,
    pub body_patterns: Vec<String>,
}

impl SpamRuleSet {
    /// Parse the sectioned plain-text ruleset format.
    ///
    /// Lines are trimmed; blank lines and `#` comments are skipped; lines
    /// before the first section marker are ignored.
    pub fn parse(content: &str) -> Self {
        let mut rules = Self::default();
        let mut section: Option<RuleField> = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match line {
                BLOCKED_SENDER_DOMAINS_MARKER => section = Some(RuleField::SenderDomain),
                SUBJECT_PATTERNS_MARKER => section = Some(RuleField::Subject),
                BODY_PATTERNS_MARKER => section = Some(RuleField::Body),
                pattern => match section {
                    Some(RuleField::SenderDomain) => {
                        rules.blocked_sender_domains.push(pattern.to_string())
                    }
                    Some(RuleField::Subject) => rules.subject_patterns.push(pattern.to_string()),
                    Some(RuleField::Body) => rules.body_patterns.push(pattern.to_string()),
                    None => {}
                },
            }
        }

        rules
    }

    pub fn is_empty(&self) -> bool {
        self.blocked_sender_domains.is_empty()
            && self.subject_patterns.is_empty()
            && self.body_patterns.is_empty()
    }

    /// Compile every pattern case-insensitively, in priority order.
    ///
    /// Patterns that fail to compile are logged and left out; the rest of
    /// the ruleset still applies.
    pub fn compile(&self) -> CompiledRules {
        let sections = [
            (RuleField::SenderDomain, &self.blocked_sender_domains),
            (RuleField::Subject, &self.subject_patterns),
            (RuleField::Body, &self.body_patterns),
        ];

        let mut rules = Vec::new();
        let mut skipped = 0;
        for (field, patterns) in sections {
            for pattern in patterns {
                match PatternRule::new(field, pattern) {
                    Ok(rule) => rules.push(rule),
                    Err(e) => {
                        skipped += 1;
                        error!(
                            field = field.label(),
                            pattern = %pattern,
                            error = %e,
                            "Spam pattern failed to compile, skipping"
                        );
                    }
                }
            }
        }

        CompiledRules { rules, skipped }
    }
}

// ── Checks ──────────────────────────────────────────────────────────

/// Everything a spam check may look at.
#[derive(Debug, Clone, Copy)]
pub struct SpamContext<'a> {
    pub spam_verdict: ScanVerdict,
    pub virus_verdict: ScanVerdict,
    /// Envelope recipients as declared by the provider.
    pub destination: &'a [String],
    /// The relay's public address.
    pub expected_recipient: &'a str,
    pub sender_domain: &'a str,
    pub subject: &'a str,
    /// Already limited to `BODY_SCAN_CHARS`.
    pub body_prefix: &'a str,
}

/// Why a message was classified as spam.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpamReason {
    ProviderVerdict,
    RecipientMismatch,
    BlockedDomain(String),
    SubjectKeyword(String),
    BodyKeyword(String),
}

impl fmt::Display for SpamReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProviderVerdict => f.write_str("ses_verdict"),
            Self::RecipientMismatch => f.write_str("recipient_mismatch"),
            Self::BlockedDomain(p) => write!(f, "blocked_domain:{p}"),
            Self::SubjectKeyword(p) => write!(f, "subject_keyword:{p}"),
            Self::BodyKeyword(p) => write!(f, "body_keyword:{p}"),
        }
    }
}

/// A single spam check.
pub trait SpamCheck: Send + Sync {
    /// Returns the reason if this check flags the message.
    fn check(&self, ctx: &SpamContext<'_>) -> Option<SpamReason>;
}

/// Hard fail from the provider's spam or virus scanner.
pub struct ProviderVerdictCheck;

impl SpamCheck for ProviderVerdictCheck {
    fn check(&self, ctx: &SpamContext<'_>) -> Option<SpamReason> {
        (ctx.spam_verdict.is_fail() || ctx.virus_verdict.is_fail())
            .then_some(SpamReason::ProviderVerdict)
    }
}

/// The first declared recipient must be the public address.
pub struct RecipientCheck;

impl SpamCheck for RecipientCheck {
    fn check(&self, ctx: &SpamContext<'_>) -> Option<SpamReason> {
        match ctx.destination.first() {
            Some(first) if first == ctx.expected_recipient => None,
            _ => Some(SpamReason::RecipientMismatch),
        }
    }
}

/// Which message field a pattern rule matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleField {
    SenderDomain,
    Subject,
    Body,
}

impl RuleField {
    pub fn label(self) -> &'static str {
        match self {
            Self::SenderDomain => "sender_domain",
            Self::Subject => "subject",
            Self::Body => "body",
        }
    }
}

/// A compiled, case-insensitive, unanchored pattern from the ruleset.
///
/// Patterns use the backtracking dialect, so lookaround and backreferences
/// are accepted.
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub field: RuleField,
    /// The pattern as written in the ruleset (used in the reason).
    pub pattern: String,
    regex: Regex,
}

impl PatternRule {
    pub fn new(field: RuleField, pattern: &str) -> Result<Self, fancy_regex::Error> {
        let regex = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self {
            field,
            pattern: pattern.to_string(),
            regex,
        })
    }
}

impl SpamCheck for PatternRule {
    fn check(&self, ctx: &SpamContext<'_>) -> Option<SpamReason> {
        let value = match self.field {
            RuleField::SenderDomain => ctx.sender_domain,
            RuleField::Subject => ctx.subject,
            RuleField::Body => ctx.body_prefix,
        };
        match self.regex.is_match(value) {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                // Backtrack limit hit; treat as no match.
                warn!(
                    field = self.field.label(),
                    pattern = %self.pattern,
                    error = %e,
                    "Spam pattern evaluation failed"
                );
                return None;
            }
        }
        let pattern = self.pattern.clone();
        Some(match self.field {
            RuleField::SenderDomain => SpamReason::BlockedDomain(pattern),
            RuleField::Subject => SpamReason::SubjectKeyword(pattern),
            RuleField::Body => SpamReason::BodyKeyword(pattern),
        })
    }
}

/// The compiled ruleset, in priority order.
#[derive(Debug, Clone, Default)]
pub struct CompiledRules {
    rules: Vec<PatternRule>,
    skipped: usize,
}

impl CompiledRules {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Number of patterns dropped because they failed to compile.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// The pattern rules as checks, in priority order.
    pub fn checks(&self) -> impl Iterator<Item = &dyn SpamCheck> {
        self.rules.iter().map(|r| r as &dyn SpamCheck)
    }
}

/// Checks that only need the envelope, evaluated before any pattern.
pub fn envelope_checks() -> [&'static dyn SpamCheck; 2] {
    [&ProviderVerdictCheck, &RecipientCheck]
}

/// Run checks in order and return the first reason found.
pub fn first_match<'a, I>(checks: I, ctx: &SpamContext<'_>) -> Option<SpamReason>
where
    I: IntoIterator<Item = &'a dyn SpamCheck>,
{
    checks.into_iter().find_map(|c| c.check(ctx))
}

// ── Classifier ──────────────────────────────────────────────────────

/// Fields of an inbound message that classification looks at.
#[derive(Debug, Clone, Copy)]
pub struct Envelope<'a> {
    pub spam_verdict: ScanVerdict,
    pub virus_verdict: ScanVerdict,
    pub destination: &'a [String],
    pub sender_domain: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
}

/// Spam classifier backed by the cached ruleset.
pub struct SpamClassifier {
    expected_recipient: String,
    rules: Arc<RulesetCache>,
}

impl SpamClassifier {
    pub fn new(expected_recipient: impl Into<String>, rules: Arc<RulesetCache>) -> Self {
        Self {
            expected_recipient: expected_recipient.into(),
            rules,
        }
    }

    /// Classify a message. `None` means not spam.
    ///
    /// The ruleset is only fetched when the envelope checks pass.
    pub async fn classify(&self, envelope: &Envelope<'_>) -> Option<SpamReason> {
        let ctx = SpamContext {
            spam_verdict: envelope.spam_verdict,
            virus_verdict: envelope.virus_verdict,
            destination: envelope.destination,
            expected_recipient: &self.expected_recipient,
            sender_domain: envelope.sender_domain,
            subject: envelope.subject,
            body_prefix: truncate_chars(envelope.body, BODY_SCAN_CHARS),
        };

        if let Some(reason) = first_match(envelope_checks(), &ctx) {
            debug!(reason = %reason, "Envelope check flagged message");
            return Some(reason);
        }

        let rules = self.rules.get().await;
        let reason = first_match(rules.checks(), &ctx);
        if let Some(ref reason) = reason {
            debug!(reason = %reason, "Spam pattern matched");
        }
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULESET: &str = "\
# spam ruleset
ignored-before-any-section

--- BLOCKED_SENDER_DOMAINS ---
spammy\\.biz
  mailer\\.ru$

--- SUBJECT_PATTERNS ---
# comment inside a section
crypto\\s+giveaway
urgent

--- BODY_PATTERNS ---
wire transfer
";

    fn dest(addr: &str) -> Vec<String> {
        vec![addr.to_string()]
    }

    fn ctx<'a>(
        destination: &'a [String],
        sender_domain: &'a str,
        subject: &'a str,
        body: &'a str,
    ) -> SpamContext<'a> {
        SpamContext {
            spam_verdict: ScanVerdict::Pass,
            virus_verdict: ScanVerdict::Pass,
            destination,
            expected_recipient: "contact@relay.dev",
            sender_domain,
            subject,
            body_prefix: body,
        }
    }

    fn evaluate(rules: &CompiledRules, ctx: &SpamContext<'_>) -> Option<SpamReason> {
        first_match(envelope_checks(), ctx).or_else(|| first_match(rules.checks(), ctx))
    }

    #[test]
    fn parses_sections() {
        let rules = SpamRuleSet::parse(RULESET);
        assert_eq!(rules.blocked_sender_domains, vec!["spammy\\.biz", "mailer\\.ru$"]);
        assert_eq!(rules.subject_patterns, vec!["crypto\\s+giveaway", "urgent"]);
        assert_eq!(rules.body_patterns, vec!["wire transfer"]);
    }

    #[test]
    fn parse_empty_content() {
        assert!(SpamRuleSet::parse("").is_empty());
        assert!(SpamRuleSet::parse("# only comments\n\n").is_empty());
    }

    #[test]
    fn provider_verdict_wins_over_everything() {
        let rules = SpamRuleSet::parse(RULESET).compile();
        let d = dest("someone-else@relay.dev");
        let mut c = ctx(&d, "spammy.biz", "URGENT", "wire transfer");
        c.virus_verdict = ScanVerdict::Fail;
        assert_eq!(evaluate(&rules, &c), Some(SpamReason::ProviderVerdict));
    }

    #[test]
    fn provider_verdict_flags_even_without_rules() {
        let d = dest("contact@relay.dev");
        let mut c = ctx(&d, "example.com", "Hello", "Hi there");
        c.spam_verdict = ScanVerdict::Fail;
        assert_eq!(
            evaluate(&CompiledRules::empty(), &c),
            Some(SpamReason::ProviderVerdict)
        );
    }

    #[test]
    fn recipient_mismatch_before_patterns() {
        let rules = SpamRuleSet::parse(RULESET).compile();
        let d = dest("other@relay.dev");
        let c = ctx(&d, "spammy.biz", "Hello", "Hi");
        assert_eq!(evaluate(&rules, &c), Some(SpamReason::RecipientMismatch));
    }

    #[test]
    fn empty_destination_is_mismatch() {
        let c = ctx(&[], "example.com", "Hello", "Hi");
        assert_eq!(
            evaluate(&CompiledRules::empty(), &c),
            Some(SpamReason::RecipientMismatch)
        );
    }

    #[test]
    fn only_first_recipient_counts() {
        let d = vec!["other@relay.dev".to_string(), "contact@relay.dev".to_string()];
        let c = ctx(&d, "example.com", "Hello", "Hi");
        assert_eq!(
            evaluate(&CompiledRules::empty(), &c),
            Some(SpamReason::RecipientMismatch)
        );
    }

    #[test]
    fn blocked_domain_is_case_insensitive_substring() {
        let rules = SpamRuleSet::parse(RULESET).compile();
        let d = dest("contact@relay.dev");
        let c = ctx(&d, "mx.SPAMMY.biz.example", "Hello", "Hi");
        assert_eq!(
            evaluate(&rules, &c),
            Some(SpamReason::BlockedDomain("spammy\\.biz".into()))
        );
    }

    #[test]
    fn domain_checked_before_subject() {
        let rules = SpamRuleSet::parse(RULESET).compile();
        let d = dest("contact@relay.dev");
        let c = ctx(&d, "list.mailer.ru", "urgent reply", "wire transfer");
        assert_eq!(
            evaluate(&rules, &c).map(|r| r.to_string()),
            Some("blocked_domain:mailer\\.ru$".to_string())
        );
    }

    #[test]
    fn subject_checked_before_body() {
        let rules = SpamRuleSet::parse(RULESET).compile();
        let d = dest("contact@relay.dev");
        let c = ctx(&d, "example.com", "Crypto   Giveaway inside", "please wire transfer");
        assert_eq!(
            evaluate(&rules, &c).map(|r| r.to_string()),
            Some("subject_keyword:crypto\\s+giveaway".to_string())
        );
    }

    #[test]
    fn body_pattern_matches() {
        let rules = SpamRuleSet::parse(RULESET).compile();
        let d = dest("contact@relay.dev");
        let c = ctx(&d, "example.com", "Hello", "Please WIRE TRANSFER today");
        assert_eq!(
            evaluate(&rules, &c).map(|r| r.to_string()),
            Some("body_keyword:wire transfer".to_string())
        );
    }

    #[test]
    fn clean_message_passes() {
        let rules = SpamRuleSet::parse(RULESET).compile();
        let d = dest("contact@relay.dev");
        let c = ctx(&d, "example.com", "Engineering role", "Would you like to chat?");
        assert_eq!(evaluate(&rules, &c), None);
    }

    #[test]
    fn invalid_pattern_is_skipped() {
        let rules = SpamRuleSet {
            blocked_sender_domains: vec![],
            subject_patterns: vec!["(unclosed".into(), "[z-a]".into(), "promo".into()],
            body_patterns: vec![],
        }
        .compile();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules.skipped(), 2);

        let d = dest("contact@relay.dev");
        let c = ctx(&d, "example.com", "Big PROMO", "Hi");
        assert_eq!(
            evaluate(&rules, &c),
            Some(SpamReason::SubjectKeyword("promo".into()))
        );
    }

    #[test]
    fn lookbehind_pattern_compiles_and_matches() {
        let rules = SpamRuleSet::parse(
            "--- SUBJECT_PATTERNS ---\n(?<!no )free money\n",
        )
        .compile();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules.skipped(), 0);

        let d = dest("contact@relay.dev");
        let c = ctx(&d, "example.com", "Get FREE MONEY now", "Hi");
        assert_eq!(
            evaluate(&rules, &c).map(|r| r.to_string()),
            Some("subject_keyword:(?<!no )free money".to_string())
        );

        let c = ctx(&d, "example.com", "There is no free money here", "Hi");
        assert_eq!(evaluate(&rules, &c), None);
    }

    #[test]
    fn backreference_pattern_compiles_and_matches() {
        let rules = SpamRuleSet::parse("--- BODY_PATTERNS ---\n(\\w)\\1{4}\n").compile();
        assert_eq!(rules.len(), 1);

        let d = dest("contact@relay.dev");
        let c = ctx(&d, "example.com", "Hello", "Heyyyyyy there");
        assert_eq!(
            evaluate(&rules, &c),
            Some(SpamReason::BodyKeyword("(\\w)\\1{4}".into()))
        );

        let c = ctx(&d, "example.com", "Hello", "Hey there");
        assert_eq!(evaluate(&rules, &c), None);
    }

    #[test]
    fn reason_strings() {
        assert_eq!(SpamReason::ProviderVerdict.to_string(), "ses_verdict");
        assert_eq!(SpamReason::RecipientMismatch.to_string(), "recipient_mismatch");
        assert_eq!(
            SpamReason::BodyKeyword("x".into()).to_string(),
            "body_keyword:x"
        );
    }
}
