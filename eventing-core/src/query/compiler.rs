//! Template compilation.
//!
//! Substituted values are emitted verbatim. String values containing a hyphen
//! are taken to be identifiers (bucket names such as `beer-sample`) and are
//! wrapped in backticks. Nothing else is escaped: a value carrying quote
//! characters can change the meaning of the query under the default policy.
//! [`QuotingPolicy::Strict`] rejects such values instead.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TemplateError;

use super::template::{QueryTemplate, Segment};

/// Delimiter wrapped around values treated as identifiers.
pub const IDENTIFIER_QUOTE: char = '`';

/// Value bound to a template slot.
#[derive(Clone, Debug, PartialEq)]
pub enum SubstitutionValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl SubstitutionValue {
    fn looks_like_identifier(&self) -> bool {
        matches!(self, SubstitutionValue::Text(text) if text.contains('-'))
    }
}

impl fmt::Display for SubstitutionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubstitutionValue::Text(text) => f.write_str(text),
            SubstitutionValue::Integer(value) => write!(f, "{value}"),
            SubstitutionValue::Float(value) => write!(f, "{value}"),
            SubstitutionValue::Bool(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for SubstitutionValue {
    fn from(value: &str) -> Self {
        SubstitutionValue::Text(value.to_string())
    }
}

impl From<String> for SubstitutionValue {
    fn from(value: String) -> Self {
        SubstitutionValue::Text(value)
    }
}

impl From<&String> for SubstitutionValue {
    fn from(value: &String) -> Self {
        SubstitutionValue::Text(value.clone())
    }
}

impl From<i64> for SubstitutionValue {
    fn from(value: i64) -> Self {
        SubstitutionValue::Integer(value)
    }
}

impl From<i32> for SubstitutionValue {
    fn from(value: i32) -> Self {
        SubstitutionValue::Integer(value.into())
    }
}

impl From<u32> for SubstitutionValue {
    fn from(value: u32) -> Self {
        SubstitutionValue::Integer(value.into())
    }
}

impl From<f64> for SubstitutionValue {
    fn from(value: f64) -> Self {
        SubstitutionValue::Float(value)
    }
}

impl From<bool> for SubstitutionValue {
    fn from(value: bool) -> Self {
        SubstitutionValue::Bool(value)
    }
}

/// Named values for a single compilation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Substitutions {
    values: BTreeMap<String, SubstitutionValue>,
}

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        name: impl Into<String>,
        value: impl Into<SubstitutionValue>,
    ) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<SubstitutionValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&SubstitutionValue> {
        self.values.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Query text ready for the engine.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompiledQuery {
    text: String,
}

impl CompiledQuery {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

impl fmt::Display for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// How substituted values are checked before emission.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuotingPolicy {
    /// Backtick-quote hyphenated strings, emit everything else as-is.
    #[default]
    HyphenHeuristic,
    /// Same quoting, but refuse any value carrying a quote character.
    Strict,
}

/// Turns templates plus substitutions into [`CompiledQuery`] text.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueryCompiler {
    policy: QuotingPolicy,
}

impl QueryCompiler {
    pub fn new(policy: QuotingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> QuotingPolicy {
        self.policy
    }

    pub fn compile(
        &self,
        template: &QueryTemplate,
        substitutions: &Substitutions,
    ) -> Result<CompiledQuery, TemplateError> {
        let slots = template.slot_names();
        for segment in template.segments() {
            if let Segment::Slot(name) = segment
                && substitutions.get(name).is_none()
            {
                return Err(TemplateError::MissingSubstitution(name.clone()));
            }
        }
        if let Some(unused) = substitutions.names().find(|name| !slots.contains(name)) {
            return Err(TemplateError::UnusedSubstitution(unused.to_string()));
        }

        let mut text = String::new();
        for segment in template.segments() {
            match segment {
                Segment::Literal(literal) => text.push_str(literal),
                Segment::Slot(name) => {
                    let Some(value) = substitutions.get(name) else {
                        return Err(TemplateError::MissingSubstitution(name.clone()));
                    };
                    self.emit(&mut text, name, value)?;
                }
            }
        }

        Ok(CompiledQuery { text })
    }

    fn emit(
        &self,
        out: &mut String,
        slot: &str,
        value: &SubstitutionValue,
    ) -> Result<(), TemplateError> {
        if let SubstitutionValue::Text(text) = value {
            if self.policy == QuotingPolicy::Strict
                && text.contains(['"', '\'', IDENTIFIER_QUOTE])
            {
                return Err(TemplateError::UnsafeValue {
                    slot: slot.to_string(),
                });
            }

            if value.looks_like_identifier() {
                if text.contains(IDENTIFIER_QUOTE) {
                    return Err(TemplateError::ReservedDelimiter(text.clone()));
                }
                out.push(IDENTIFIER_QUOTE);
                out.push_str(text);
                out.push(IDENTIFIER_QUOTE);
                return Ok(());
            }
        }

        out.push_str(&value.to_string());
        Ok(())
    }
}

/// Compiles with the default hyphen heuristic.
pub fn compile(
    template: &QueryTemplate,
    substitutions: &Substitutions,
) -> Result<CompiledQuery, TemplateError> {
    QueryCompiler::default().compile(template, substitutions)
}
