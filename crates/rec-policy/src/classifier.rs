//! Error classifier
//!
//! Maps an arbitrary error to an [`ErrorKind`], a retryability flag and the
//! kind's default [`RetryPolicy`]:
//! 1. Typed mapping: a `std::io::Error` anywhere in the `source()` chain is
//!    mapped by its `io::ErrorKind` when that kind is unambiguous.
//! 2. Text matching: the lowercased message chain and type name are tested
//!    against each kind's patterns in [`ErrorKind::PRIORITY`] order.
//! 3. Fallback: [`ErrorKind::Unknown`].
//!
//! Classification never fails. A panic raised while rendering the error is
//! caught and the error is reported as `Unknown`.

use crate::error::PolicyError;
use crate::kind::ErrorKind;
use crate::policy::{RetryPolicy, RetrySettings};
use std::collections::HashMap;
use std::error::Error;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

/// Outcome of classifying one failure
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Matched kind
    pub kind: ErrorKind,
    /// Whether the failure may be retried
    pub retryable: bool,
    /// Default policy for the kind
    pub policy: RetryPolicy,
    /// Rendered message chain (`outer: inner: ...`)
    pub message: String,
}

/// Default attempt budget and first delay per kind
///
/// Non-retryable kinds get a single attempt.
const fn table_entry(kind: ErrorKind) -> (u32, Option<Duration>) {
    match kind {
        ErrorKind::Timeout => (2, Some(Duration::from_secs(5))),
        ErrorKind::Network => (5, Some(Duration::from_secs(2))),
        ErrorKind::RateLimit => (3, Some(Duration::from_secs(30))),
        ErrorKind::TemporaryUnavailable => (3, Some(Duration::from_secs(10))),
        ErrorKind::Unknown => (1, Some(Duration::from_secs(1))),
        ErrorKind::Permission
        | ErrorKind::ResourceExhausted
        | ErrorKind::SyntaxOrProgramming
        | ErrorKind::DependencyMissing => (1, None),
    }
}

/// Retry policy per error kind
#[derive(Debug, Clone, PartialEq)]
pub struct KindPolicies {
    policies: HashMap<ErrorKind, RetryPolicy>,
}

impl KindPolicies {
    /// Build the default table
    ///
    /// Attempt budgets and first delays come from the kind table; the delay
    /// cap, growth factor and jitter come from `template`. The cap is raised
    /// to the first delay where the template's cap is smaller.
    #[must_use]
    pub fn from_template(template: &RetryPolicy) -> Self {
        let policies = ErrorKind::PRIORITY
            .into_iter()
            .map(|kind| {
                let (attempts, initial) = table_entry(kind);
                let initial = initial.unwrap_or_else(|| template.initial_delay());
                let policy = RetryPolicy::new(
                    attempts,
                    initial,
                    template.max_delay().max(initial),
                    template.exponential_base(),
                    template.jitter(),
                )
                .unwrap_or_else(|_| RetryPolicy::single_attempt(initial));
                (kind, policy)
            })
            .collect();
        Self { policies }
    }

    /// Replace the policy for one kind
    #[must_use]
    pub fn with_policy(mut self, kind: ErrorKind, policy: RetryPolicy) -> Self {
        self.policies.insert(kind, policy);
        self
    }

    /// Layer partial settings over one kind's policy
    ///
    /// # Errors
    /// Returns [`PolicyError`] if the merged policy is invalid.
    pub fn apply(&mut self, kind: ErrorKind, settings: &RetrySettings) -> Result<(), PolicyError> {
        let merged = settings.apply(self.get(kind))?;
        self.policies.insert(kind, merged);
        Ok(())
    }

    /// Policy for `kind`
    #[must_use]
    pub fn get(&self, kind: ErrorKind) -> &RetryPolicy {
        // every kind is populated at construction
        &self.policies[&kind]
    }
}

impl Default for KindPolicies {
    fn default() -> Self {
        Self::from_template(&RetryPolicy::default())
    }
}

/// Pattern-table classifier
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    policies: KindPolicies,
}

impl Classifier {
    /// Create with a custom policy table
    #[inline]
    #[must_use]
    pub fn new(policies: KindPolicies) -> Self {
        Self { policies }
    }

    /// Policy table in use
    #[inline]
    #[must_use]
    pub fn policies(&self) -> &KindPolicies {
        &self.policies
    }

    /// Classify a concrete error, using its type name as extra evidence
    pub fn classify<E: Error + 'static>(&self, error: &E) -> Classification {
        self.classify_dyn(error, std::any::type_name::<E>())
    }

    /// Classify a type-erased error
    pub fn classify_dyn(&self, error: &(dyn Error + 'static), type_name: &str) -> Classification {
        let rendered = catch_unwind(AssertUnwindSafe(|| {
            let message = render_chain(error);
            let kind = io_kind(error).unwrap_or_else(|| text_kind(&message, type_name));
            (kind, message)
        }));
        match rendered {
            Ok((kind, message)) => self.classification(kind, message),
            Err(_) => {
                tracing::warn!(type_name, "error rendering panicked; classifying as unknown");
                self.classification(ErrorKind::Unknown, String::from("<unprintable error>"))
            }
        }
    }

    /// Classify from raw text (for errors that only exist as strings)
    #[must_use]
    pub fn classify_message(&self, type_name: &str, message: &str) -> Classification {
        self.classification(text_kind(message, type_name), message.to_string())
    }

    fn classification(&self, kind: ErrorKind, message: String) -> Classification {
        Classification {
            kind,
            retryable: kind.is_retryable(),
            policy: *self.policies.get(kind),
            message,
        }
    }
}

/// Render `error` and its sources as `outer: inner: ...`
#[must_use]
pub fn render_chain(error: &(dyn Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        let text = inner.to_string();
        // wrappers often repeat their source verbatim
        if !message.ends_with(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = inner.source();
    }
    message
}

fn io_kind(error: &(dyn Error + 'static)) -> Option<ErrorKind> {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if let Some(kind) = map_io_kind(io_err.kind()) {
                return Some(kind);
            }
        }
        current = err.source();
    }
    None
}

fn map_io_kind(kind: io::ErrorKind) -> Option<ErrorKind> {
    use io::ErrorKind as Io;
    match kind {
        Io::TimedOut => Some(ErrorKind::Timeout),
        Io::PermissionDenied => Some(ErrorKind::Permission),
        Io::ConnectionRefused
        | Io::ConnectionReset
        | Io::ConnectionAborted
        | Io::NotConnected
        | Io::AddrNotAvailable
        | Io::BrokenPipe => Some(ErrorKind::Network),
        Io::WouldBlock | Io::Interrupted => Some(ErrorKind::TemporaryUnavailable),
        Io::OutOfMemory => Some(ErrorKind::ResourceExhausted),
        Io::NotFound => Some(ErrorKind::DependencyMissing),
        Io::InvalidData | Io::InvalidInput => Some(ErrorKind::SyntaxOrProgramming),
        _ => None,
    }
}

fn text_kind(message: &str, type_name: &str) -> ErrorKind {
    let message = message.to_lowercase();
    let type_name = type_name.to_lowercase();
    let haystacks = [message.as_str(), type_name.as_str()];
    ErrorKind::PRIORITY
        .into_iter()
        .find(|kind| kind.matches_any(&haystacks))
        .unwrap_or(ErrorKind::Unknown)
}
