use std::{fmt, sync::Arc};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use serde_json::Value;
use tracing::debug;

use crate::error::QueryError;

use super::compiler::{CompiledQuery, QueryCompiler, Substitutions};
use super::template::QueryTemplate;

/// Finite, single-pass sequence of result rows. Running the query again
/// requires a fresh compile + execute; no cursor survives the stream.
pub type QueryRows = BoxStream<'static, Result<Value, QueryError>>;

/// External analytics/query service.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn execute(&self, query: &CompiledQuery) -> Result<QueryRows, QueryError>;
}

/// Compiler + engine pair shared by handlers and the HTTP bridge.
#[derive(Clone)]
pub struct QueryService {
    compiler: QueryCompiler,
    engine: Arc<dyn QueryEngine>,
}

impl fmt::Debug for QueryService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryService")
            .field("compiler", &self.compiler)
            .field("engine", &"QueryEngine")
            .finish()
    }
}

impl QueryService {
    pub fn new(compiler: QueryCompiler, engine: Arc<dyn QueryEngine>) -> Self {
        Self { compiler, engine }
    }

    pub fn compiler(&self) -> &QueryCompiler {
        &self.compiler
    }

    /// Compiles and executes, returning the lazy row stream.
    pub async fn run(
        &self,
        template: &QueryTemplate,
        substitutions: &Substitutions,
    ) -> Result<QueryRows, QueryError> {
        let compiled = self.compiler.compile(template, substitutions)?;
        debug!(target: "eventing::query", query = %compiled, "executing query");
        self.engine.execute(&compiled).await
    }

    /// Compiles, executes and drains every row.
    pub async fn collect(
        &self,
        template: &QueryTemplate,
        substitutions: &Substitutions,
    ) -> Result<Vec<Value>, QueryError> {
        self.run(template, substitutions).await?.try_collect().await
    }

    /// First row of the result, if any.
    pub async fn first(
        &self,
        template: &QueryTemplate,
        substitutions: &Substitutions,
    ) -> Result<Option<Value>, QueryError> {
        let mut rows = self.run(template, substitutions).await?;
        rows.next().await.transpose()
    }
}
