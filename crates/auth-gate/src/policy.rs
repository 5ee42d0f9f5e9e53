//! Path-based access policy.
//!
//! A [`Policy`] is an ordered list of path patterns, each mapped to a
//! [`Requirement`], plus the requirement for paths no pattern matches.
//!
//! # Patterns
//!
//! - Literal segments match themselves: `/example`
//! - `*` matches exactly one segment: `/api/*/status`
//! - `**` as the last segment matches zero or more segments: `/api/**`
//!
//! The most specific matching pattern wins: more literal segments first,
//! then more `*` segments, then patterns without a trailing `**`. Equal
//! patterns keep their declaration order.

use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// What a request to a path needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Requirement {
    /// No credentials needed.
    Public,

    /// A valid bearer token is required.
    Authenticated,

    /// Always refused, whatever the credentials.
    Deny,
}

impl Requirement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Requirement::Public => "public",
            Requirement::Authenticated => "authenticated",
            Requirement::Deny => "deny",
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Requirement {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" | "permit" | "permit_all" => Ok(Requirement::Public),
            "authenticated" | "auth" => Ok(Requirement::Authenticated),
            "deny" | "deny_all" => Ok(Requirement::Deny),
            _ => Err(PolicyError::InvalidRequirement(s.to_string())),
        }
    }
}

/// Policy construction errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("invalid path pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid requirement '{0}' (expected public, authenticated or deny)")]
    InvalidRequirement(String),

    #[error("malformed policy rule '{0}' (expected pattern=requirement)")]
    MalformedRule(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternSegment {
    Literal(String),
    AnySegment,
}

/// A parsed path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<PatternSegment>,
    any_suffix: bool,
}

impl PathPattern {
    /// Parse an Ant-style pattern.
    ///
    /// # Errors
    ///
    /// Rejects patterns that do not start with `/`, use `**` anywhere but the
    /// last segment, or mix `*` with other characters in a segment.
    pub fn parse(pattern: &str) -> Result<Self, PolicyError> {
        let invalid = |reason: &str| PolicyError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        if !pattern.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }

        let parts: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
        let mut segments = Vec::with_capacity(parts.len());
        let mut any_suffix = false;

        for (index, part) in parts.iter().enumerate() {
            match *part {
                "**" if index + 1 == parts.len() => any_suffix = true,
                "**" => return Err(invalid("'**' is only allowed as the last segment")),
                "*" => segments.push(PatternSegment::AnySegment),
                literal if literal.contains('*') => {
                    return Err(invalid("wildcards must span a whole segment"))
                }
                "." | ".." => return Err(invalid("relative segments are not allowed")),
                literal => segments.push(PatternSegment::Literal(literal.to_string())),
            }
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
            any_suffix,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the pattern matches a normalized path.
    pub fn matches(&self, path: &[&str]) -> bool {
        if path.len() < self.segments.len() {
            return false;
        }
        if !self.any_suffix && path.len() != self.segments.len() {
            return false;
        }

        self.segments
            .iter()
            .zip(path.iter())
            .all(|(segment, part)| match segment {
                PatternSegment::Literal(literal) => literal == part,
                PatternSegment::AnySegment => true,
            })
    }

    /// Sort key, larger is more specific.
    fn specificity(&self) -> (usize, usize, bool) {
        let literals = self
            .segments
            .iter()
            .filter(|s| matches!(s, PatternSegment::Literal(_)))
            .count();
        let wildcards = self.segments.len() - literals;
        (literals, wildcards, !self.any_suffix)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// One policy rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub pattern: PathPattern,
    pub requirement: Requirement,
}

impl Rule {
    /// # Errors
    ///
    /// Returns an error if the pattern does not parse.
    pub fn new(pattern: &str, requirement: Requirement) -> Result<Self, PolicyError> {
        Ok(Self {
            pattern: PathPattern::parse(pattern)?,
            requirement,
        })
    }
}

/// Immutable access policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    rules: Vec<Rule>,
    default: Requirement,
}

impl Policy {
    /// Build a policy. Rules are ordered most specific first.
    pub fn new(mut rules: Vec<Rule>, default: Requirement) -> Self {
        // sort_by_key is stable: equal patterns keep declaration order
        rules.sort_by_key(|rule| Reverse(rule.pattern.specificity()));
        Self { rules, default }
    }

    /// Every path is public.
    pub fn permit_all() -> Self {
        Self::new(Vec::new(), Requirement::Public)
    }

    /// Parse `pattern=requirement` rules separated by `;` or `,`.
    ///
    /// ```text
    /// /api/**=authenticated; /api/public/**=public; /admin/**=deny
    /// ```
    ///
    /// # Errors
    ///
    /// Returns the first malformed rule, pattern or requirement.
    pub fn parse(rules: &str, default: Requirement) -> Result<Self, PolicyError> {
        let rules = rules
            .split([';', ','])
            .map(str::trim)
            .filter(|rule| !rule.is_empty())
            .map(|rule| {
                let (pattern, requirement) = rule
                    .split_once('=')
                    .ok_or_else(|| PolicyError::MalformedRule(rule.to_string()))?;
                Rule::new(pattern.trim(), requirement.parse()?)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(rules, default))
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn default_requirement(&self) -> Requirement {
        self.default
    }
}

/// Maps request paths to requirements.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    policy: Policy,
}

impl PolicyEngine {
    pub fn new(policy: Policy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Requirement for a request path.
    pub fn requirement_for(&self, path: &str) -> Requirement {
        let segments = normalize_path(path);

        match self
            .policy
            .rules
            .iter()
            .find(|rule| rule.pattern.matches(&segments))
        {
            Some(rule) => {
                tracing::trace!(
                    target: "gate.policy",
                    pattern = %rule.pattern,
                    requirement = %rule.requirement,
                    "Policy rule matched"
                );
                rule.requirement
            }
            None => self.policy.default,
        }
    }
}

/// Split a path into segments, dropping empty and `.` segments and
/// resolving `..` lexically. `..` above the root is ignored.
fn normalize_path(path: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }
    segments
}
