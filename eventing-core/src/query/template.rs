use std::collections::BTreeSet;
use std::fmt;

use crate::error::TemplateError;

/// One piece of a parsed query template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Slot(String),
}

/// Literal text interleaved with named `${slot}` placeholders.
///
/// Templates are immutable once parsed; the same template can be compiled any
/// number of times with different substitutions.
#[derive(Clone, PartialEq, Eq)]
pub struct QueryTemplate {
    segments: Vec<Segment>,
}

impl QueryTemplate {
    /// Parses `${name}` placeholders out of `source`. A `$` that is not
    /// followed by `{` is treated as literal text.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;
        let mut offset = 0usize;

        while let Some(start) = rest.find("${") {
            literal.push_str(&rest[..start]);
            let after_open = &rest[start + 2..];
            let Some(end) = after_open.find('}') else {
                return Err(TemplateError::UnterminatedSlot(offset + start));
            };
            let name = after_open[..end].trim();
            if name.is_empty() {
                return Err(TemplateError::EmptySlot(offset + start));
            }
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Slot(name.to_string()));

            let consumed = start + 2 + end + 1;
            offset += consumed;
            rest = &rest[consumed..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    /// Builds a template from pre-split segments.
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Distinct slot names referenced by the template.
    pub fn slot_names(&self) -> BTreeSet<&str> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Slot(name) => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Literal text with every slot removed.
    pub fn literal_text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Literal(text) => Some(text.as_str()),
                Segment::Slot(_) => None,
            })
            .collect()
    }
}

impl fmt::Debug for QueryTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryTemplate")
            .field("segments", &self.segments.len())
            .field("slots", &self.slot_names())
            .finish()
    }
}

impl std::str::FromStr for QueryTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
