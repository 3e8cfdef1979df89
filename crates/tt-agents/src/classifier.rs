//! Runtime error triage.
//!
//! Classification is a pure function of an error's message and stack text:
//! an ordered list of rules, first match wins, with `unknown` as the
//! fallback.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The text of a runtime error, as far as classification is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorReport {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Top-level message plus the `source()` chain as the stack.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        Self {
            message: error.to_string(),
            stack: (!chain.is_empty()).then(|| chain.join("\n")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Network,
    Timeout,
    BadRequest,
    Crash,
    Unknown,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Network => "network",
            ErrorType::Timeout => "timeout",
            ErrorType::BadRequest => "bad_request",
            ErrorType::Crash => "crash",
            ErrorType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorClassification {
    pub error_type: ErrorType,
    pub recoverable: bool,
    pub can_resume: bool,
    pub can_retry: bool,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Lower-cased view of a report handed to each rule.
struct Haystack {
    message: String,
    stack: String,
}

impl Haystack {
    fn new(report: &ErrorReport) -> Self {
        Self {
            message: report.message.to_lowercase(),
            stack: report.stack.as_deref().unwrap_or_default().to_lowercase(),
        }
    }

    fn any(&self, needles: &[&str]) -> bool {
        needles
            .iter()
            .any(|n| self.message.contains(n) || self.stack.contains(n))
    }

    /// Matches `codes` only as standalone tokens, so `401` hits
    /// "401 Unauthorized" but not "port 4010".
    fn status_code(&self, codes: &[&str]) -> bool {
        [&self.message, &self.stack].iter().any(|text| {
            text.split(|c: char| !c.is_ascii_alphanumeric())
                .any(|token| codes.contains(&token))
        })
    }
}

type Predicate = fn(&Haystack) -> bool;

const NETWORK_MARKERS: &[&str] = &[
    "fetch failed",
    "econnrefused",
    "econnreset",
    "etimedout",
    "enotfound",
    "ehostunreach",
    "eai_again",
    "getaddrinfo",
    "dns",
    "network",
    "connection",
];

fn is_network(h: &Haystack) -> bool {
    h.any(NETWORK_MARKERS)
}

fn is_timeout(h: &Haystack) -> bool {
    h.any(&["timeout", "timed out"]) || h.status_code(&["408", "504"])
}

fn is_bad_request(h: &Haystack) -> bool {
    h.status_code(&["400", "401", "403"]) || h.any(&["unauthorized", "forbidden", "bad request"])
}

fn is_crash(h: &Haystack) -> bool {
    ["crash", "uncaught", "process"]
        .iter()
        .any(|n| h.message.contains(n))
        || h.stack.contains("uncaught")
}

/// Evaluated top to bottom.
const RULES: &[(ErrorType, Predicate)] = &[
    (ErrorType::Network, is_network),
    (ErrorType::Timeout, is_timeout),
    (ErrorType::BadRequest, is_bad_request),
    (ErrorType::Crash, is_crash),
];

// ---------------------------------------------------------------------------
// ErrorClassifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier {
    checkpointing: bool,
}

impl ErrorClassifier {
    /// `checkpointing` decides whether `unknown` errors are resumable.
    pub fn new(checkpointing: bool) -> Self {
        Self { checkpointing }
    }

    pub fn checkpointing(&self) -> bool {
        self.checkpointing
    }

    /// The first rule that matches, or `Unknown`.
    pub fn error_type(&self, report: &ErrorReport) -> ErrorType {
        let haystack = Haystack::new(report);
        RULES
            .iter()
            .find(|(_, matches)| matches(&haystack))
            .map(|(error_type, _)| *error_type)
            .unwrap_or(ErrorType::Unknown)
    }

    pub fn classify(&self, report: &ErrorReport) -> ErrorClassification {
        self.classification_for(self.error_type(report), &report.message)
    }

    /// The fixed flags attached to each error type.
    pub fn classification_for(&self, error_type: ErrorType, message: &str) -> ErrorClassification {
        let (recoverable, can_resume) = match error_type {
            ErrorType::Network | ErrorType::Timeout | ErrorType::Crash => (true, true),
            ErrorType::BadRequest => (false, false),
            ErrorType::Unknown => (self.checkpointing, self.checkpointing),
        };
        ErrorClassification {
            error_type,
            recoverable,
            can_resume,
            can_retry: true,
            message: message.to_string(),
        }
    }
}
