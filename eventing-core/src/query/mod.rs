//! Templated analytic queries: parsing, compilation and execution.

pub mod compiler;
pub mod engine;
pub mod memory;
pub mod template;

pub use compiler::{
    CompiledQuery, IDENTIFIER_QUOTE, QueryCompiler, QuotingPolicy, SubstitutionValue,
    Substitutions, compile,
};
pub use engine::{QueryEngine, QueryRows, QueryService};
pub use memory::MemoryQueryEngine;
pub use template::{QueryTemplate, Segment};
