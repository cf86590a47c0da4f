//! Failure taxonomy
//!
//! Each [`ErrorKind`] owns a table of lowercase substrings. The classifier
//! walks [`ErrorKind::PRIORITY`] in order and the first kind with a matching
//! pattern wins, so more specific kinds come first.

use crate::error::PolicyError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named class of failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Operation exceeded its deadline
    Timeout,
    /// Caller lacks the rights to perform the operation
    Permission,
    /// Transport-level failure
    Network,
    /// Downstream asked us to slow down
    RateLimit,
    /// Memory, disk or descriptor exhaustion
    ResourceExhausted,
    /// Bug in the calling code; retrying cannot help
    SyntaxOrProgramming,
    /// A required module, binary or library is absent
    DependencyMissing,
    /// Downstream is briefly unable to serve
    TemporaryUnavailable,
    /// Nothing matched
    Unknown,
}

const TIMEOUT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "deadline exceeded",
    "deadline has elapsed",
    "time limit exceeded",
];

const PERMISSION_PATTERNS: &[&str] = &[
    "permission",
    "forbidden",
    "unauthorized",
    "not authorized",
    "access denied",
    "authentication failed",
    "401",
    "403",
];

const NETWORK_PATTERNS: &[&str] = &[
    "connection",
    "network",
    "unreachable",
    "dns",
    "socket",
    "broken pipe",
    "reset by peer",
    "name resolution",
];

const RATE_LIMIT_PATTERNS: &[&str] = &[
    "rate limit",
    "ratelimit",
    "rate_limit",
    "too many requests",
    "429",
    "quota exceeded",
    "throttl",
];

const RESOURCE_EXHAUSTED_PATTERNS: &[&str] = &[
    "out of memory",
    "memoryerror",
    "cannot allocate memory",
    "no space left",
    "disk full",
    "resource exhausted",
    "resource_exhausted",
    "too many open files",
];

const SYNTAX_PATTERNS: &[&str] = &[
    "syntax",
    "parse error",
    "unexpected token",
    "type error",
    "typeerror",
    "attributeerror",
    "nameerror",
    "assertion failed",
    "index out of bounds",
];

const DEPENDENCY_PATTERNS: &[&str] = &[
    "no module named",
    "module not found",
    "modulenotfound",
    "importerror",
    "import error",
    "unresolved import",
    "command not found",
    "no such file or directory",
    "library not loaded",
    "missing dependency",
    "dependency missing",
];

const TEMPORARY_PATTERNS: &[&str] = &[
    "unavailable",
    "503",
    "temporarily",
    "try again",
    "retry later",
    "server busy",
    "service busy",
    "overloaded",
    "maintenance",
];

impl ErrorKind {
    /// Kinds in classification priority order (`Unknown` last)
    pub const PRIORITY: [ErrorKind; 9] = [
        ErrorKind::Timeout,
        ErrorKind::Permission,
        ErrorKind::Network,
        ErrorKind::RateLimit,
        ErrorKind::ResourceExhausted,
        ErrorKind::SyntaxOrProgramming,
        ErrorKind::DependencyMissing,
        ErrorKind::TemporaryUnavailable,
        ErrorKind::Unknown,
    ];

    /// Stable snake_case name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Permission => "permission",
            ErrorKind::Network => "network",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::SyntaxOrProgramming => "syntax_or_programming",
            ErrorKind::DependencyMissing => "dependency_missing",
            ErrorKind::TemporaryUnavailable => "temporary_unavailable",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Lowercase substrings that identify this kind
    #[must_use]
    pub fn patterns(self) -> &'static [&'static str] {
        match self {
            ErrorKind::Timeout => TIMEOUT_PATTERNS,
            ErrorKind::Permission => PERMISSION_PATTERNS,
            ErrorKind::Network => NETWORK_PATTERNS,
            ErrorKind::RateLimit => RATE_LIMIT_PATTERNS,
            ErrorKind::ResourceExhausted => RESOURCE_EXHAUSTED_PATTERNS,
            ErrorKind::SyntaxOrProgramming => SYNTAX_PATTERNS,
            ErrorKind::DependencyMissing => DEPENDENCY_PATTERNS,
            ErrorKind::TemporaryUnavailable => TEMPORARY_PATTERNS,
            ErrorKind::Unknown => &[],
        }
    }

    /// Whether failures of this kind are worth retrying at all
    #[inline]
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::Network
                | ErrorKind::RateLimit
                | ErrorKind::TemporaryUnavailable
                | ErrorKind::Unknown
        )
    }

    /// Check whether any pattern occurs in one of the (already lowercased) haystacks
    #[must_use]
    pub fn matches_any(self, haystacks: &[&str]) -> bool {
        self.patterns()
            .iter()
            .any(|pattern| haystacks.iter().any(|text| text.contains(pattern)))
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        ErrorKind::PRIORITY
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| PolicyError::UnknownKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ends_with_unknown() {
        assert_eq!(ErrorKind::PRIORITY.last(), Some(&ErrorKind::Unknown));
        assert!(ErrorKind::Unknown.patterns().is_empty());
    }

    #[test]
    fn patterns_are_lowercase() {
        for kind in ErrorKind::PRIORITY {
            for pattern in kind.patterns() {
                assert_eq!(*pattern, pattern.to_lowercase(), "{kind}: {pattern}");
            }
        }
    }

    #[test]
    fn parse_round_trips_names() {
        for kind in ErrorKind::PRIORITY {
            assert_eq!(kind.as_str().parse::<ErrorKind>().unwrap(), kind);
        }
        assert_eq!(
            "Rate-Limit".parse::<ErrorKind>().unwrap(),
            ErrorKind::RateLimit
        );
        assert!("gremlins".parse::<ErrorKind>().is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&ErrorKind::SyntaxOrProgramming).unwrap();
        assert_eq!(json, "\"syntax_or_programming\"");
    }

    #[test]
    fn retryability_table() {
        assert!(ErrorKind::Network.is_retryable());
        assert!(ErrorKind::Unknown.is_retryable());
        assert!(!ErrorKind::Permission.is_retryable());
        assert!(!ErrorKind::DependencyMissing.is_retryable());
    }
}
