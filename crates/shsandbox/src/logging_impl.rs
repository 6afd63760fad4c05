//! Logging configuration for sandboxed runs
//!
//! Log records are emitted through `tracing` when the `logging` feature is
//! enabled. [`LogConfig`] decides what script data may appear in them:
//! secret-looking variable names and values are redacted, long values are
//! truncated, and script text is summarized unless explicitly allowed.
//!
//! # Log Levels
//!
//! - **WARN**: policy denials, cancellation, resource limits
//! - **INFO**: run lifecycle
//! - **DEBUG**: command dispatch, assignments, redirections
//! - **TRACE**: arithmetic results

use std::borrow::Cow;
use std::collections::HashSet;

/// Name fragments that mark a variable as sensitive.
const SENSITIVE_NAME_PATTERNS: &[&str] = &[
    "PASSWORD",
    "PASSWD",
    "SECRET",
    "TOKEN",
    "KEY",
    "CREDENTIAL",
    "AUTH",
    "PRIVATE",
    "BEARER",
    "JWT",
    "SESSION",
    "COOKIE",
    "SIGNING",
    "DATABASE_URL",
    "DB_URL",
    "CONNECTION_STRING",
    "AWS_SECRET",
    "AWS_ACCESS",
];

/// Prefixes of well-known API key formats.
const KEY_PREFIXES: &[&str] = &[
    "sk-", "pk-", "sk_live_", "sk_test_", "pk_live_", "pk_test_", "ghp_", "gho_", "ghu_", "ghs_",
    "ghr_", "xoxb-", "xoxp-", "xoxa-", "AKIA", "eyJ",
];

/// Substrings that mark a value itself as a credential.
const VALUE_MARKERS: &[&str] = &["password", "secret", "token", "bearer ", "basic "];

const REDACTED: &str = "[REDACTED]";

/// What run data may appear in log records.
///
/// Scripts routinely carry credentials in variables and arguments, so the
/// default hides script text and redacts anything secret-looking.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Redact secret-looking names and values (default: true)
    pub redact_sensitive: bool,

    /// Variable name fragments to redact (matched case-insensitively)
    pub redact_var_patterns: HashSet<String>,

    /// Whether to include script text in logs (default: false)
    pub log_script_content: bool,

    /// Values longer than this are truncated (default: 200 bytes)
    pub max_value_length: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            redact_sensitive: true,
            redact_var_patterns: SENSITIVE_NAME_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            log_script_content: false,
            max_value_length: 200,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log values as they are. Only for debugging trusted scripts.
    pub fn unsafe_disable_redaction(mut self) -> Self {
        self.redact_sensitive = false;
        self
    }

    /// Add a variable name fragment to redact
    pub fn redact_var(mut self, pattern: &str) -> Self {
        self.redact_var_patterns.insert(pattern.to_uppercase());
        self
    }

    /// Include script text in logs (UNSAFE: scripts may embed credentials)
    pub fn unsafe_log_scripts(mut self) -> Self {
        self.log_script_content = true;
        self
    }

    pub fn max_value_length(mut self, len: usize) -> Self {
        self.max_value_length = len;
        self
    }

    /// Check if a variable name marks its value as sensitive
    pub fn should_redact_var(&self, name: &str) -> bool {
        if !self.redact_sensitive {
            return false;
        }
        let upper = name.to_uppercase();
        self.redact_var_patterns
            .iter()
            .any(|pattern| upper.contains(pattern.as_str()))
    }

    /// The value of `name` as it may appear in a log record.
    pub fn redact_assignment<'a>(&self, name: &str, value: &'a str) -> Cow<'a, str> {
        if self.should_redact_var(name) {
            return Cow::Borrowed(REDACTED);
        }
        self.redact_value(value)
    }

    /// `value` as it may appear in a log record.
    pub fn redact_value<'a>(&self, value: &'a str) -> Cow<'a, str> {
        if !self.redact_sensitive {
            return self.truncate(value);
        }

        let lower = value.to_lowercase();
        if VALUE_MARKERS.iter().any(|m| lower.contains(m)) || is_likely_secret(value) {
            return Cow::Borrowed(REDACTED);
        }
        match redact_userinfo(value) {
            Cow::Borrowed(v) => self.truncate(v),
            Cow::Owned(v) => Cow::Owned(self.truncate(&v).into_owned()),
        }
    }

    /// A command line (name plus arguments) safe to log.
    pub fn format_command(&self, name: &str, args: &[String]) -> String {
        let mut out = sanitize_for_log(name);
        for arg in args {
            out.push(' ');
            out.push_str(&sanitize_for_log(&self.redact_value(arg)));
        }
        out
    }

    /// Cut `value` to the configured length, on a char boundary.
    fn truncate<'a>(&self, value: &'a str) -> Cow<'a, str> {
        if value.len() <= self.max_value_length {
            return Cow::Borrowed(value);
        }
        let end = (0..=self.max_value_length)
            .rev()
            .find(|&i| value.is_char_boundary(i))
            .unwrap_or(0);
        let dropped = value.len() - end;
        Cow::Owned(format!("{}...[truncated {} bytes]", &value[..end], dropped))
    }
}

/// Strip `user:pass@` from URL-looking values.
fn redact_userinfo(value: &str) -> Cow<'_, str> {
    let Some((scheme, rest)) = value.split_once("://") else {
        return Cow::Borrowed(value);
    };
    match rest.split_once('@') {
        Some((userinfo, host)) if userinfo.contains(':') => {
            Cow::Owned(format!("{scheme}://{REDACTED}@{host}"))
        }
        _ => Cow::Borrowed(value),
    }
}

/// JWTs, known key prefixes, or long random-looking tokens.
fn is_likely_secret(value: &str) -> bool {
    let token = value.trim();

    let segments: Vec<&str> = token.split('.').collect();
    let jwt_like = segments.len() == 3
        && segments
            .iter()
            .all(|seg| seg.len() > 10 && seg.chars().all(is_base64_char));

    jwt_like
        || KEY_PREFIXES
            .iter()
            .any(|prefix| token.len() > prefix.len() + 10 && token.starts_with(prefix))
        || (token.len() >= 32 && looks_random(token))
}

fn is_base64_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=' | '_' | '-')
}

/// Many distinct characters in a single identifier-like token
fn looks_random(token: &str) -> bool {
    if token
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-')))
    {
        return false;
    }
    let distinct = token.chars().collect::<HashSet<_>>().len();
    distinct > 15 && distinct * 2 > token.len()
}

/// Escape characters that could forge extra log lines.
pub fn sanitize_for_log(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

/// Script text as it should appear in a log record: a size summary unless
/// script logging was opted into.
pub fn format_script_for_log(script: &str, config: &LogConfig) -> String {
    if config.log_script_content {
        config.truncate(&sanitize_for_log(script)).into_owned()
    } else {
        format!(
            "[script: {} lines, {} bytes]",
            script.lines().count(),
            script.len()
        )
    }
}
