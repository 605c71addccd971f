//! Literal byte replacement applied to process output.
//!
//! Rules run in configured order over each chunk read from the process; the
//! output of rule *i* is the input of rule *i + 1*. Matching is literal and
//! non-overlapping, scanning left to right. A pattern split across two chunks
//! is not matched.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single `pattern -> replacement` mapping.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RuleRepr", into = "RuleRepr")]
pub struct ReplacementRule {
    pattern: Vec<u8>,
    replacement: Vec<u8>,
}

impl ReplacementRule {
    /// Create a rule. The pattern must not be empty.
    pub fn new(pattern: impl Into<Vec<u8>>, replacement: impl Into<Vec<u8>>) -> Result<Self> {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return Err(Error::Replacement("pattern must not be empty".to_string()));
        }
        Ok(Self {
            pattern,
            replacement: replacement.into(),
        })
    }

    pub fn pattern(&self) -> &[u8] {
        &self.pattern
    }

    pub fn replacement(&self) -> &[u8] {
        &self.replacement
    }

    /// Replace every non-overlapping occurrence of the pattern.
    ///
    /// Borrows the input unchanged when the pattern does not occur.
    pub fn apply<'a>(&self, input: Cow<'a, [u8]>) -> Cow<'a, [u8]> {
        let Some(first) = find(&input, &self.pattern) else {
            return input;
        };

        let mut out = Vec::with_capacity(input.len());
        let mut rest = &input[..];
        let mut next = Some(first);
        while let Some(at) = next {
            out.extend_from_slice(&rest[..at]);
            out.extend_from_slice(&self.replacement);
            rest = &rest[at + self.pattern.len()..];
            next = find(rest, &self.pattern);
        }
        out.extend_from_slice(rest);
        Cow::Owned(out)
    }
}

impl fmt::Debug for ReplacementRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplacementRule")
            .field("pattern", &String::from_utf8_lossy(&self.pattern))
            .field("replacement", &String::from_utf8_lossy(&self.replacement))
            .finish()
    }
}

/// Parses the CLI form `PATTERN=REPLACEMENT`, split at the first `=`.
impl FromStr for ReplacementRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (pattern, replacement) = s.split_once('=').ok_or_else(|| {
            Error::Replacement(format!("expected PATTERN=REPLACEMENT, got {s:?}"))
        })?;
        Self::new(pattern, replacement)
    }
}

/// Serialized form: both sides as UTF-8 strings.
#[derive(Serialize, Deserialize)]
struct RuleRepr {
    pattern: String,
    #[serde(default)]
    replacement: String,
}

impl TryFrom<RuleRepr> for ReplacementRule {
    type Error = Error;

    fn try_from(repr: RuleRepr) -> Result<Self> {
        Self::new(repr.pattern, repr.replacement)
    }
}

impl From<ReplacementRule> for RuleRepr {
    fn from(rule: ReplacementRule) -> Self {
        Self {
            pattern: String::from_utf8_lossy(&rule.pattern).into_owned(),
            replacement: String::from_utf8_lossy(&rule.replacement).into_owned(),
        }
    }
}

/// Ordered, immutable list of replacement rules.
///
/// Cloning is cheap; every session gets its own handle to the same rules.
#[derive(Debug, Clone, Default)]
pub struct ReplacementTable {
    rules: Arc<[ReplacementRule]>,
}

impl ReplacementTable {
    pub fn new(rules: Vec<ReplacementRule>) -> Self {
        Self {
            rules: rules.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn rules(&self) -> &[ReplacementRule] {
        &self.rules
    }

    /// Run every rule over `chunk`, in order.
    pub fn apply<'a>(&self, chunk: &'a [u8]) -> Cow<'a, [u8]> {
        self.rules
            .iter()
            .fold(Cow::Borrowed(chunk), |acc, rule| rule.apply(acc))
    }
}

impl From<Vec<ReplacementRule>> for ReplacementTable {
    fn from(rules: Vec<ReplacementRule>) -> Self {
        Self::new(rules)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
