//! Rule specifiers and the deterministic rule registry.
//!
//! A rule specifier is a string of the form `family:args`, parsed once at
//! load time into a [`RuleKind`]. Built-in families are evaluated by the
//! functions in [`builtin`]; any other family is routed to a [`RulePlugin`]
//! registered under that family name.

pub mod builtin;
pub mod patterns;

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from parsing or evaluating a rule.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    #[error("Empty rule specifier")]
    Empty,

    #[error("Invalid arguments for rule '{family}': {reason}")]
    InvalidArguments { family: String, reason: String },

    #[error("Invalid pattern in rule '{family}': {reason}")]
    InvalidPattern { family: String, reason: String },

    #[error("Unknown schema target '{0}' (expected json_schema or list)")]
    UnknownSchemaTarget(String),

    #[error("No rule registered for family '{0}'")]
    Unregistered(String),

    #[error("Rule evaluation failed: {0}")]
    Evaluation(String),
}

/// Inclusive numeric range used by count and length rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min: usize,
    pub max: usize,
}

impl Bounds {
    pub fn contains(&self, value: usize) -> bool {
        self.min <= value && value <= self.max
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.min, self.max)
    }
}

/// A compiled pattern from a `regex:|...|` or `non_regex:|...|` rule.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    full: Regex,
    prefix: Regex,
}

impl Pattern {
    pub fn new(family: &str, source: &str) -> Result<Self, RuleError> {
        let invalid = |e: regex::Error| RuleError::InvalidPattern {
            family: family.to_string(),
            reason: e.to_string(),
        };
        Ok(Self {
            source: source.to_string(),
            full: Regex::new(&format!("^(?:{source})$")).map_err(invalid)?,
            prefix: Regex::new(&format!("^(?:{source})")).map_err(invalid)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the whole text matches.
    pub fn matches_fully(&self, text: &str) -> bool {
        self.full.is_match(text)
    }

    /// Whether the pattern matches at the start of the text.
    pub fn matches_prefix(&self, text: &str) -> bool {
        self.prefix.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// What a `SCHEMA:` rule validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaTarget {
    /// The item's schema document; expanded into one constraint per field
    Document,
    /// The response must parse as a list
    List,
}

/// A parsed rule specifier.
#[derive(Debug, Clone, PartialEq)]
#[derive(Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RuleKind {
    /// Every keyword appears (case-insensitive)
    Keywords(Vec<String>),
    /// At least `min` of the keywords appear
    AnyKeywords { min: usize, keywords: Vec<String> },
    /// None of the keywords appear
    NonKeywords(Vec<String>),
    /// A forbidden notation does not appear
    NonNotation(String),
    /// Number of fragment elements
    ItemCount(Bounds),
    /// Word count of every element
    EachLength(Bounds),
    /// Word count of all elements together
    TotalLength(Bounds),
    /// Some element fully matches the pattern
    Regex(Pattern),
    /// No element matches the pattern at its start
    NonRegex(Pattern),
    /// Every element starts with the prefix (case-insensitive)
    StartsWithEach(String),
    /// Every element ends with the suffix (case-insensitive)
    EndsWithEach(String),
    /// No element ends with punctuation
    NoEndPunctuation,
    /// No element is repeated
    RepeatEach,
    /// Structural validation
    Schema(SchemaTarget),
    /// A plug-in family with raw arguments
    Custom { family: String, args: String },
}

impl RuleKind {
    /// Family name for logging and plug-in lookup.
    pub fn family(&self) -> &str {
        match self {
            Self::Keywords(_) => "keyword",
            Self::AnyKeywords { .. } => "any_keywords",
            Self::NonKeywords(_) => "non_keyword",
            Self::NonNotation(_) => "non_special_notation",
            Self::ItemCount(_) => "item_count",
            Self::EachLength(_) => "each_length",
            Self::TotalLength(_) => "total_length",
            Self::Regex(_) => "regex",
            Self::NonRegex(_) => "non_regex",
            Self::StartsWithEach(_) => "startswith_each",
            Self::EndsWithEach(_) => "endswith_each",
            Self::NoEndPunctuation => "no_end_with_punctuation",
            Self::RepeatEach => "repeat_each",
            Self::Schema(_) => "SCHEMA",
            Self::Custom { family, .. } => family,
        }
    }
}

impl FromStr for RuleKind {
    type Err = RuleError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(RuleError::Empty);
        }

        let (family, args) = match spec.split_once(':') {
            Some((family, args)) => (family.trim(), args),
            None => (spec, ""),
        };

        let kind = match family {
            "keyword" => Self::Keywords(string_list(family, args)?),
            "non_keyword" => Self::NonKeywords(string_list(family, args)?),
            "non_special_notation" => {
                if args.is_empty() {
                    return Err(invalid(family, "notation must not be empty"));
                }
                Self::NonNotation(args.to_string())
            }
            "item_count" => Self::ItemCount(bounds(family, args)?),
            "each_length" => Self::EachLength(bounds(family, args)?),
            "total_length" => Self::TotalLength(bounds(family, args)?),
            "regex" => Self::Regex(Pattern::new(family, delimited(family, args)?)?),
            "non_regex" => Self::NonRegex(Pattern::new(family, delimited(family, args)?)?),
            "startswith_each" => Self::StartsWithEach(single_string(family, args)?),
            "endswith_each" => Self::EndsWithEach(single_string(family, args)?),
            "no_end_with_punctuation" => Self::NoEndPunctuation,
            "repeat_each" => Self::RepeatEach,
            "SCHEMA" => match args.trim() {
                "json_schema" => Self::Schema(SchemaTarget::Document),
                "list" => Self::Schema(SchemaTarget::List),
                other => return Err(RuleError::UnknownSchemaTarget(other.to_string())),
            },
            _ if family.starts_with("any_keywords") => {
                let suffix = &family["any_keywords".len()..];
                let min = if suffix.is_empty() {
                    1
                } else {
                    suffix
                        .parse()
                        .map_err(|_| invalid(family, "threshold suffix must be a number"))?
                };
                Self::AnyKeywords { min, keywords: string_list(family, args)? }
            }
            _ => Self::Custom { family: family.to_string(), args: args.to_string() },
        };

        Ok(kind)
    }
}

impl TryFrom<String> for RuleKind {
    type Error = RuleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RuleKind> for String {
    fn from(kind: RuleKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |v: &Vec<String>| serde_json::to_string(v).unwrap_or_else(|_| "[]".into());
        match self {
            Self::Keywords(v) => write!(f, "keyword:{}", list(v)),
            Self::AnyKeywords { min, keywords } => write!(f, "any_keywords{}:{}", min, list(keywords)),
            Self::NonKeywords(v) => write!(f, "non_keyword:{}", list(v)),
            Self::NonNotation(s) => write!(f, "non_special_notation:{s}"),
            Self::ItemCount(b) => write!(f, "item_count:{b}"),
            Self::EachLength(b) => write!(f, "each_length:{b}"),
            Self::TotalLength(b) => write!(f, "total_length:{b}"),
            Self::Regex(p) => write!(f, "regex:|{}|", p.as_str()),
            Self::NonRegex(p) => write!(f, "non_regex:|{}|", p.as_str()),
            Self::StartsWithEach(s) => write!(f, "startswith_each:{}", list(&vec![s.clone()])),
            Self::EndsWithEach(s) => write!(f, "endswith_each:{}", list(&vec![s.clone()])),
            Self::NoEndPunctuation => f.write_str("no_end_with_punctuation"),
            Self::RepeatEach => f.write_str("repeat_each"),
            Self::Schema(SchemaTarget::Document) => f.write_str("SCHEMA:json_schema"),
            Self::Schema(SchemaTarget::List) => f.write_str("SCHEMA:list"),
            Self::Custom { family, args } if args.is_empty() => f.write_str(family),
            Self::Custom { family, args } => write!(f, "{family}:{args}"),
        }
    }
}

fn invalid(family: &str, reason: impl Into<String>) -> RuleError {
    RuleError::InvalidArguments { family: family.to_string(), reason: reason.into() }
}

fn string_list(family: &str, args: &str) -> Result<Vec<String>, RuleError> {
    let list: Vec<String> = serde_json::from_str(args.trim())
        .map_err(|e| invalid(family, format!("expected a JSON list of strings: {e}")))?;
    if list.is_empty() {
        return Err(invalid(family, "list must not be empty"));
    }
    Ok(list)
}

fn single_string(family: &str, args: &str) -> Result<String, RuleError> {
    let trimmed = args.trim();
    if trimmed.starts_with('[') {
        let mut list = string_list(family, trimmed)?;
        return Ok(list.swap_remove(0));
    }
    if trimmed.is_empty() {
        return Err(invalid(family, "expected a non-empty string"));
    }
    Ok(trimmed.to_string())
}

fn bounds(family: &str, args: &str) -> Result<Bounds, RuleError> {
    let pair: Vec<f64> = serde_json::from_str(args.trim())
        .map_err(|e| invalid(family, format!("expected [min, max]: {e}")))?;
    match pair.as_slice() {
        [min, max] if *min >= 0.0 && min <= max => Ok(Bounds { min: *min as usize, max: *max as usize }),
        _ => Err(invalid(family, "expected [min, max] with 0 <= min <= max")),
    }
}

fn delimited<'a>(family: &str, args: &'a str) -> Result<&'a str, RuleError> {
    let start = args.find('|').ok_or_else(|| invalid(family, "pattern must be wrapped in |...|"))?;
    let end = args.rfind('|').filter(|end| *end > start)
        .ok_or_else(|| invalid(family, "pattern must be wrapped in |...|"))?;
    Ok(&args[start + 1..end])
}

/// Outcome of one rule evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOutcome {
    pub passed: bool,
    pub explanation: String,
}

impl RuleOutcome {
    pub fn pass(explanation: impl Into<String>) -> Self {
        Self { passed: true, explanation: explanation.into() }
    }

    pub fn fail(explanation: impl Into<String>) -> Self {
        Self { passed: false, explanation: explanation.into() }
    }
}

/// Inputs a rule sees besides its own arguments.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    /// The item prompt
    pub instruction: &'a str,
    /// The full response, for rules that read beyond the fragment
    pub response: &'a str,
}

/// A deterministic rule family supplied by the embedding application.
pub trait RulePlugin: Send + Sync {
    /// Evaluate raw arguments against the fragment.
    fn evaluate(
        &self,
        args: &str,
        fragment: &[String],
        ctx: RuleContext<'_>,
    ) -> Result<RuleOutcome, RuleError>;
}

impl<F> RulePlugin for F
where
    F: Fn(&str, &[String], RuleContext<'_>) -> Result<RuleOutcome, RuleError> + Send + Sync,
{
    fn evaluate(
        &self,
        args: &str,
        fragment: &[String],
        ctx: RuleContext<'_>,
    ) -> Result<RuleOutcome, RuleError> {
        self(args, fragment, ctx)
    }
}

/// Dispatches rule kinds to built-in functions or registered plug-ins.
#[derive(Clone, Default)]
pub struct RuleRegistry {
    plugins: BTreeMap<String, Arc<dyn RulePlugin>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plug-in for a family name. Replaces any previous one.
    pub fn register(&mut self, family: impl Into<String>, plugin: Arc<dyn RulePlugin>) {
        self.plugins.insert(family.into(), plugin);
    }

    pub fn with_plugin(mut self, family: impl Into<String>, plugin: Arc<dyn RulePlugin>) -> Self {
        self.register(family, plugin);
        self
    }

    pub fn has_plugin(&self, family: &str) -> bool {
        self.plugins.contains_key(family)
    }

    /// Registered plug-in families.
    pub fn families(&self) -> Vec<&str> {
        self.plugins.keys().map(String::as_str).collect()
    }

    /// Evaluate a rule. Errors and panics become a failing outcome.
    pub fn evaluate(&self, kind: &RuleKind, fragment: &[String], ctx: RuleContext<'_>) -> RuleOutcome {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.try_evaluate(kind, fragment, ctx)));

        match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::warn!(family = kind.family(), error = %e, "Rule evaluation error");
                RuleOutcome::fail(e.to_string())
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::warn!(family = kind.family(), panic = %message, "Rule function panicked");
                RuleOutcome::fail(format!("Rule evaluation panicked: {message}"))
            }
        }
    }

    fn try_evaluate(
        &self,
        kind: &RuleKind,
        fragment: &[String],
        ctx: RuleContext<'_>,
    ) -> Result<RuleOutcome, RuleError> {
        match kind {
            RuleKind::Keywords(keywords) => Ok(builtin::keywords(fragment, keywords)),
            RuleKind::AnyKeywords { min, keywords } => Ok(builtin::any_keywords(fragment, keywords, *min)),
            RuleKind::NonKeywords(keywords) => Ok(builtin::non_keywords(fragment, keywords)),
            RuleKind::NonNotation(notation) => Ok(builtin::non_notation(fragment, notation)),
            RuleKind::ItemCount(b) => Ok(builtin::item_count(fragment, *b)),
            RuleKind::EachLength(b) => Ok(builtin::each_length(fragment, *b)),
            RuleKind::TotalLength(b) => Ok(builtin::total_length(fragment, *b)),
            RuleKind::Regex(p) => Ok(builtin::regex_any(fragment, p)),
            RuleKind::NonRegex(p) => Ok(builtin::non_regex(fragment, p)),
            RuleKind::StartsWithEach(prefix) => Ok(builtin::starts_with_each(fragment, prefix)),
            RuleKind::EndsWithEach(suffix) => Ok(builtin::ends_with_each(fragment, suffix)),
            RuleKind::NoEndPunctuation => Ok(builtin::no_end_punctuation(fragment)),
            RuleKind::RepeatEach => Ok(builtin::repeat_each(fragment)),
            RuleKind::Schema(SchemaTarget::List) => Ok(builtin::list_schema(ctx.response)),
            RuleKind::Schema(SchemaTarget::Document) => Err(RuleError::Evaluation(
                "schema documents must be expanded before evaluation".into(),
            )),
            RuleKind::Custom { family, args } => {
                let plugin = self
                    .plugins
                    .get(family)
                    .ok_or_else(|| RuleError::Unregistered(family.clone()))?;
                plugin.evaluate(args, fragment, ctx)
            }
        }
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleRegistry").field("plugins", &self.families()).finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
