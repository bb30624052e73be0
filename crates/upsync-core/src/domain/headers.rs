//! Path-pattern header rules
//!
//! Rules are regular expressions matched against the relative path in
//! declaration order; the first matching rule supplies the header set.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::errors::DomainError;
use crate::config::HeaderRuleConfig;

/// Content encoding that turns on compression in transit
pub const GZIP_ENCODING: &str = "gzip";

/// Server-side encryption applied when encryption is requested globally
pub const DEFAULT_ENCRYPTION: &str = "AES256";

/// Transfer directives for a single object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_side_encryption: Option<String>,
}

impl HeaderSet {
    /// Header set with no directives
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_content_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.content_encoding = Some(encoding.into());
        self
    }

    #[must_use]
    pub fn with_cache_control(mut self, cache_control: impl Into<String>) -> Self {
        self.cache_control = Some(cache_control.into());
        self
    }

    #[must_use]
    pub fn with_server_side_encryption(mut self, algorithm: impl Into<String>) -> Self {
        self.server_side_encryption = Some(algorithm.into());
        self
    }

    /// Whether the body must be gzip-compressed on the way out
    #[must_use]
    pub fn should_compress(&self) -> bool {
        self.content_encoding
            .as_deref()
            .is_some_and(|enc| enc.eq_ignore_ascii_case(GZIP_ENCODING))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content_encoding.is_none()
            && self.cache_control.is_none()
            && self.server_side_encryption.is_none()
    }
}

/// A compiled (pattern, header set) pair
#[derive(Debug, Clone)]
pub struct HeaderRule {
    pattern: Regex,
    headers: HeaderSet,
}

impl HeaderRule {
    /// Compile a rule
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidPattern`] if the regex does not compile,
    /// and [`DomainError::ValidationFailed`] for a content encoding other
    /// than gzip, since no other encoding is applied to the body
    pub fn new(pattern: &str, headers: HeaderSet) -> Result<Self, DomainError> {
        if let Some(encoding) = headers.content_encoding.as_deref() {
            if !encoding.eq_ignore_ascii_case(GZIP_ENCODING) {
                return Err(DomainError::ValidationFailed(format!(
                    "unsupported content encoding '{encoding}' for pattern '{pattern}'"
                )));
            }
        }
        let pattern = Regex::new(pattern).map_err(|e| DomainError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { pattern, headers })
    }

    /// Unanchored search against the path
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.pattern.is_match(path)
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderSet {
        &self.headers
    }
}

/// First-match-wins resolver over an ordered rule list
#[derive(Debug, Clone, Default)]
pub struct HeaderResolver {
    rules: Vec<HeaderRule>,
    default_encryption: Option<String>,
}

impl HeaderResolver {
    #[must_use]
    pub fn new(rules: Vec<HeaderRule>) -> Self {
        Self {
            rules,
            default_encryption: None,
        }
    }

    /// Compile configured rules, preserving their order
    ///
    /// When `encrypt` is set, every resolved header set that carries no
    /// explicit encryption directive gets [`DEFAULT_ENCRYPTION`].
    ///
    /// # Errors
    /// Fails on the first pattern that does not compile
    pub fn from_config(rules: &[HeaderRuleConfig], encrypt: bool) -> Result<Self, DomainError> {
        let compiled = rules
            .iter()
            .map(|rule| HeaderRule::new(&rule.pattern, rule.headers.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut resolver = Self::new(compiled);
        if encrypt {
            resolver.default_encryption = Some(DEFAULT_ENCRYPTION.to_string());
        }
        Ok(resolver)
    }

    /// Headers for `path`: the first matching rule's set, or an empty set
    #[must_use]
    pub fn resolve(&self, path: &str) -> HeaderSet {
        let mut headers = match self.rules.iter().find(|rule| rule.matches(path)) {
            Some(rule) => {
                trace!(path, pattern = rule.pattern(), "Header rule matched");
                rule.headers.clone()
            }
            None => {
                trace!(path, "No header rule matched");
                HeaderSet::empty()
            }
        };

        if headers.server_side_encryption.is_none() {
            headers.server_side_encryption = self.default_encryption.clone();
        }
        headers
    }

    #[must_use]
    pub fn rules_count(&self) -> usize {
        self.rules.len()
    }
}
