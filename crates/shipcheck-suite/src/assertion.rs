//! Assertions over captured text and exit codes.
//!
//! Text matching always runs over the full captured text, never line by
//! line. Occurrence counts use non-overlapping matches and must equal the
//! expected count exactly.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Maximum length of text excerpts recorded as actual values.
const EXCERPT_LEN: usize = 400;

/// Kind of check an assertion performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssertionKind {
    /// The text must contain a match (or exactly N matches).
    MustContain,
    /// The text must not contain a match.
    MustNotContain,
    /// The HTTP status code must equal the expected code.
    StatusCodeEquals,
    /// The process exit code must equal the expected code.
    ExitCodeEquals,
}

impl fmt::Display for AssertionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MustContain => write!(f, "must contain"),
            Self::MustNotContain => write!(f, "must not contain"),
            Self::StatusCodeEquals => write!(f, "status code equals"),
            Self::ExitCodeEquals => write!(f, "exit code equals"),
        }
    }
}

/// How a piece of text is searched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Matcher {
    /// Plain substring.
    Literal(String),
    /// Regular expression.
    Pattern(String),
}

impl Matcher {
    /// Counts non-overlapping matches in `text`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern does not compile.
    pub fn count(&self, text: &str) -> Result<usize, regex::Error> {
        match self {
            Self::Literal(needle) if needle.is_empty() => Ok(1),
            Self::Literal(needle) => Ok(text.matches(needle.as_str()).count()),
            Self::Pattern(pattern) => Ok(Regex::new(pattern)?.find_iter(text).count()),
        }
    }

    /// Returns whether there is nothing to look for.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Literal(s) | Self::Pattern(s) => s.is_empty(),
        }
    }

    /// Returns the first line of `text` containing a match.
    fn first_matching_line<'t>(&self, text: &'t str) -> Option<&'t str> {
        match self {
            Self::Literal(needle) => text.lines().find(|l| l.contains(needle.as_str())),
            Self::Pattern(pattern) => {
                let re = Regex::new(pattern).ok()?;
                let m = re.find(text)?;
                let start = text[..m.start()].rfind('\n').map_or(0, |i| i + 1);
                let end = text[m.start()..].find('\n').map_or(text.len(), |i| m.start() + i);
                Some(&text[start..end])
            }
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => write!(f, "{s:?}"),
            Self::Pattern(p) => write!(f, "/{p}/"),
        }
    }
}

/// Expected value of an assertion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expected {
    /// At least one match (or none, for `MustNotContain`).
    Match(Matcher),
    /// Exactly `count` non-overlapping matches.
    Occurrences {
        /// What to count.
        matcher: Matcher,
        /// Required number of matches.
        count: usize,
    },
    /// A status or exit code.
    Code(i64),
}

impl Expected {
    /// Text or pattern being looked for, if any.
    #[must_use]
    pub const fn matcher(&self) -> Option<&Matcher> {
        match self {
            Self::Match(m) | Self::Occurrences { matcher: m, .. } => Some(m),
            Self::Code(_) => None,
        }
    }
}

impl fmt::Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Match(m) => write!(f, "{m}"),
            Self::Occurrences { matcher, count } => write!(f, "{matcher} x{count}"),
            Self::Code(code) => write!(f, "{code}"),
        }
    }
}

/// Where an assertion's actual value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subject {
    /// Log of the most recent build.
    BuildLog,
    /// Exit status of the most recent build.
    BuildExit,
    /// Combined log of the launched container.
    ContainerLog,
    /// HTTP status code returned by the probe.
    ProbeStatus,
    /// HTTP body returned by the probe.
    ProbeBody,
    /// Output of a command executed inside the running container.
    Exec(Vec<String>),
    /// Output of a command run in a throwaway container from the built image.
    ImageCommand(Vec<String>),
    /// Artifact snapshot taken after an incremental rebuild.
    IncrementalSnapshot,
}

impl Subject {
    /// Returns whether collecting this subject needs a live container.
    #[must_use]
    pub const fn needs_container(&self) -> bool {
        matches!(
            self,
            Self::ContainerLog | Self::ProbeStatus | Self::ProbeBody | Self::Exec(_)
        )
    }

    /// Returns whether collecting this subject needs a probe response.
    #[must_use]
    pub const fn needs_probe(&self) -> bool {
        matches!(self, Self::ProbeStatus | Self::ProbeBody)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuildLog => write!(f, "build log"),
            Self::BuildExit => write!(f, "build exit"),
            Self::ContainerLog => write!(f, "container log"),
            Self::ProbeStatus => write!(f, "probe status"),
            Self::ProbeBody => write!(f, "probe body"),
            Self::Exec(cmd) => write!(f, "exec `{}`", cmd.join(" ")),
            Self::ImageCommand(cmd) => write!(f, "run `{}`", cmd.join(" ")),
            Self::IncrementalSnapshot => write!(f, "incremental snapshot"),
        }
    }
}

/// Result of evaluating one assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// The observed value matched.
    Pass,
    /// The observed value did not match.
    Fail,
    /// Never evaluated because a precondition failed.
    NotEvaluated,
}

/// A value collected for a subject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observed {
    /// Captured text.
    pub text: String,
    /// Status or exit code, when the subject has one.
    pub code: Option<i64>,
}

impl Observed {
    /// Text-only observation.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            code: None,
        }
    }

    /// Code-only observation.
    #[must_use]
    pub fn code(code: i64) -> Self {
        Self {
            text: code.to_string(),
            code: Some(code),
        }
    }
}

/// One check, before or after evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    /// Source of the actual value.
    pub subject: Subject,
    /// Kind of check.
    pub kind: AssertionKind,
    /// Expected value.
    pub expected: Expected,
    /// Observed value, once evaluated.
    pub actual: Option<String>,
    /// Evaluation outcome.
    pub outcome: Outcome,
}

impl Assertion {
    /// Creates an unevaluated assertion.
    #[must_use]
    pub const fn new(subject: Subject, kind: AssertionKind, expected: Expected) -> Self {
        Self {
            subject,
            kind,
            expected,
            actual: None,
            outcome: Outcome::NotEvaluated,
        }
    }

    /// `subject` must contain the literal `text`.
    #[must_use]
    pub fn contains(subject: Subject, text: impl Into<String>) -> Self {
        Self::new(
            subject,
            AssertionKind::MustContain,
            Expected::Match(Matcher::Literal(text.into())),
        )
    }

    /// `subject` must not contain the literal `text`.
    #[must_use]
    pub fn lacks(subject: Subject, text: impl Into<String>) -> Self {
        Self::new(
            subject,
            AssertionKind::MustNotContain,
            Expected::Match(Matcher::Literal(text.into())),
        )
    }

    /// `subject` must match the regular expression `pattern`.
    #[must_use]
    pub fn matches(subject: Subject, pattern: impl Into<String>) -> Self {
        Self::new(
            subject,
            AssertionKind::MustContain,
            Expected::Match(Matcher::Pattern(pattern.into())),
        )
    }

    /// `subject` must not match the regular expression `pattern`.
    #[must_use]
    pub fn never_matches(subject: Subject, pattern: impl Into<String>) -> Self {
        Self::new(
            subject,
            AssertionKind::MustNotContain,
            Expected::Match(Matcher::Pattern(pattern.into())),
        )
    }

    /// `subject` must contain `text` exactly `count` times.
    #[must_use]
    pub fn contains_exactly(subject: Subject, text: impl Into<String>, count: usize) -> Self {
        Self::new(
            subject,
            AssertionKind::MustContain,
            Expected::Occurrences {
                matcher: Matcher::Literal(text.into()),
                count,
            },
        )
    }

    /// The probe must answer with `status`.
    #[must_use]
    pub fn status_code(status: u16) -> Self {
        Self::new(
            Subject::ProbeStatus,
            AssertionKind::StatusCodeEquals,
            Expected::Code(i64::from(status)),
        )
    }

    /// `subject` must exit with `code`.
    #[must_use]
    pub fn exit_code(subject: Subject, code: i32) -> Self {
        Self::new(subject, AssertionKind::ExitCodeEquals, Expected::Code(i64::from(code)))
    }

    /// Returns whether the assertion was evaluated and failed.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.outcome == Outcome::Fail
    }

    /// Evaluates this assertion against an observed value.
    #[must_use]
    pub fn evaluate(&self, observed: &Observed) -> Self {
        let (outcome, actual) = check(self.kind, &self.expected, observed);
        tracing::debug!(subject = %self.subject, kind = %self.kind, expected = %self.expected, ?outcome, "assertion evaluated");
        Self {
            actual: Some(actual),
            outcome,
            ..self.clone()
        }
    }

    /// Returns an unevaluated copy with a note explaining why.
    #[must_use]
    pub fn skipped(&self, why: &str) -> Self {
        Self {
            actual: Some(format!("not evaluated: {why}")),
            outcome: Outcome::NotEvaluated,
            ..self.clone()
        }
    }
}

/// Evaluates `kind` with `expected` against `text`.
#[must_use]
pub fn assert_text(text: &str, kind: AssertionKind, expected: Expected) -> Outcome {
    check(kind, &expected, &Observed::text(text)).0
}

fn check(kind: AssertionKind, expected: &Expected, observed: &Observed) -> (Outcome, String) {
    match (kind, expected) {
        (AssertionKind::StatusCodeEquals | AssertionKind::ExitCodeEquals, Expected::Code(want)) => {
            match observed.code {
                Some(got) => (verdict(got == *want), got.to_string()),
                None => (Outcome::Fail, "no code observed".into()),
            }
        }
        (AssertionKind::MustContain, Expected::Match(matcher)) => match matcher.count(&observed.text) {
            Ok(0) => (Outcome::Fail, format!("no match in: {}", excerpt(&observed.text))),
            Ok(n) => (Outcome::Pass, format!("{n} match(es)")),
            Err(e) => (Outcome::Fail, format!("invalid pattern: {e}")),
        },
        (AssertionKind::MustNotContain, Expected::Match(matcher)) => match matcher.count(&observed.text) {
            Ok(0) => (Outcome::Pass, "no match".into()),
            Ok(n) => {
                let line = matcher.first_matching_line(&observed.text).unwrap_or_default();
                (Outcome::Fail, format!("{n} match(es), first: {}", excerpt(line)))
            }
            Err(e) => (Outcome::Fail, format!("invalid pattern: {e}")),
        },
        (AssertionKind::MustContain, Expected::Occurrences { matcher, count }) => {
            match matcher.count(&observed.text) {
                Ok(n) => (verdict(n == *count), format!("{n} occurrence(s)")),
                Err(e) => (Outcome::Fail, format!("invalid pattern: {e}")),
            }
        }
        (AssertionKind::MustNotContain, Expected::Occurrences { matcher, count }) => {
            match matcher.count(&observed.text) {
                Ok(n) => (verdict(n != *count), format!("{n} occurrence(s)")),
                Err(e) => (Outcome::Fail, format!("invalid pattern: {e}")),
            }
        }
        (kind, expected) => (
            Outcome::Fail,
            format!("`{kind}` cannot be checked against {expected}"),
        ),
    }
}

const fn verdict(ok: bool) -> Outcome {
    if ok { Outcome::Pass } else { Outcome::Fail }
}

/// Shortens text for diagnostics, keeping the tail where errors usually are.
fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= EXCERPT_LEN {
        return format!("{trimmed:?}");
    }
    let mut start = trimmed.len() - EXCERPT_LEN;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{:?}", &trimmed[start..])
}
