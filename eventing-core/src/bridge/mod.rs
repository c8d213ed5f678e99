//! Synchronous request/response bridge over the KV facade and query service.
//!
//! Routing is exact on method and path. Anything unmatched gets a 404 with an
//! empty body, and a failed route never leaks a partial body.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::error::BridgeError;
use crate::kv::{Bucket, KvFacade};
use crate::query::QueryService;

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_INTERNAL_ERROR: u16 = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub method: Method,
    pub path: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl BridgeRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// A present but blank parameter counts as missing.
    pub fn require(&self, name: &str) -> Result<&str, BridgeError> {
        match self.param(name) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(BridgeError::MissingParam(name.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BridgeResponse {
    pub status: u16,
    pub body: Map<String, Value>,
}

impl BridgeResponse {
    pub fn ok(body: Map<String, Value>) -> Self {
        Self {
            status: STATUS_OK,
            body,
        }
    }

    pub fn empty(status: u16) -> Self {
        Self {
            status,
            body: Map::new(),
        }
    }

    pub fn not_found() -> Self {
        Self::empty(STATUS_NOT_FOUND)
    }
}

/// Collaborators shared with routes.
#[derive(Clone, Debug)]
pub struct BridgeContext {
    kv: KvFacade,
    query: QueryService,
}

impl BridgeContext {
    pub fn new(kv: KvFacade, query: QueryService) -> Self {
        Self { kv, query }
    }

    pub fn bucket(&self, name: &str) -> Bucket {
        self.kv.bucket(name)
    }

    pub fn query(&self) -> &QueryService {
        &self.query
    }
}

#[async_trait]
pub trait BridgeRoute: Send + Sync {
    async fn handle(
        &self,
        ctx: &BridgeContext,
        request: &BridgeRequest,
    ) -> Result<Map<String, Value>, BridgeError>;
}

/// Exact-match route table.
///
/// Routes are keyed on method and path together, so a GET route and a POST
/// route may share a path with separate handlers. A request whose path is
/// registered only under the other method is unmatched and gets the same
/// empty 404 as an unknown path. Methods other than GET and POST never match.
pub struct HttpBridge {
    context: BridgeContext,
    routes: HashMap<(Method, String), Arc<dyn BridgeRoute>>,
}

impl fmt::Debug for HttpBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut routes: Vec<String> = self
            .routes
            .keys()
            .map(|(method, path)| format!("{method} {path}"))
            .collect();
        routes.sort();
        f.debug_struct("HttpBridge")
            .field("context", &self.context)
            .field("routes", &routes)
            .finish()
    }
}

impl HttpBridge {
    pub fn new(context: BridgeContext) -> Self {
        Self {
            context,
            routes: HashMap::new(),
        }
    }

    /// Registering the same method and path twice keeps the later route.
    pub fn route(
        mut self,
        method: Method,
        path: impl Into<String>,
        route: Arc<dyn BridgeRoute>,
    ) -> Self {
        self.routes.insert((method, path.into()), route);
        self
    }

    pub fn routes(&self) -> impl Iterator<Item = (Method, &str)> {
        self.routes
            .keys()
            .map(|(method, path)| (*method, path.as_str()))
    }

    pub fn context(&self) -> &BridgeContext {
        &self.context
    }

    pub async fn handle(&self, request: &BridgeRequest) -> BridgeResponse {
        let Some(route) = self
            .routes
            .get(&(request.method, request.path.clone()))
        else {
            debug!(target: "eventing::bridge", method = %request.method, path = %request.path, "no route");
            return BridgeResponse::not_found();
        };

        match route.handle(&self.context, request).await {
            Ok(body) => BridgeResponse::ok(body),
            Err(err) if err.is_client_error() => {
                debug!(target: "eventing::bridge", path = %request.path, error = %err, "bad request");
                BridgeResponse::empty(STATUS_BAD_REQUEST)
            }
            Err(err) => {
                error!(target: "eventing::bridge", path = %request.path, error = %err, "route failed");
                BridgeResponse::empty(STATUS_INTERNAL_ERROR)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvBackend;
    use crate::query::{MemoryQueryEngine, QueryCompiler};
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl BridgeRoute for Echo {
        async fn handle(
            &self,
            ctx: &BridgeContext,
            request: &BridgeRequest,
        ) -> Result<Map<String, Value>, BridgeError> {
            let name = request.require("name")?;
            ctx.bucket("people").set(name, &json!({"seen": true})).await?;
            let mut body = Map::new();
            body.insert("name".into(), json!(name));
            Ok(body)
        }
    }

    fn bridge() -> (Arc<MemoryKvBackend>, HttpBridge) {
        let store = Arc::new(MemoryKvBackend::with_buckets(["people"]));
        let query = QueryService::new(
            QueryCompiler::default(),
            Arc::new(MemoryQueryEngine::new(store.clone())),
        );
        let bridge = HttpBridge::new(BridgeContext::new(KvFacade::new(store.clone()), query))
            .route(Method::Post, "/echo", Arc::new(Echo));
        (store, bridge)
    }

    #[tokio::test]
    async fn unmatched_path_or_method_is_404_with_empty_body() {
        let (_, bridge) = bridge();
        for request in [
            BridgeRequest::post("/nope"),
            BridgeRequest::get("/echo"),
            BridgeRequest::post("/echo/"),
        ] {
            let response = bridge.handle(&request).await;
            assert_eq!(response, BridgeResponse::not_found());
        }
    }

    struct Fixed(&'static str);

    #[async_trait]
    impl BridgeRoute for Fixed {
        async fn handle(
            &self,
            _ctx: &BridgeContext,
            _request: &BridgeRequest,
        ) -> Result<Map<String, Value>, BridgeError> {
            let mut body = Map::new();
            body.insert("via".into(), json!(self.0));
            Ok(body)
        }
    }

    #[tokio::test]
    async fn one_path_can_carry_separate_get_and_post_routes() {
        let (_, bridge) = bridge();
        let bridge = bridge
            .route(Method::Get, "/both", Arc::new(Fixed("get")))
            .route(Method::Post, "/both", Arc::new(Fixed("post")));

        let get = bridge.handle(&BridgeRequest::get("/both")).await;
        let post = bridge.handle(&BridgeRequest::post("/both")).await;
        assert_eq!(get.body["via"], "get");
        assert_eq!(post.body["via"], "post");
    }

    #[tokio::test]
    async fn matched_route_writes_through_facade() {
        let (_, bridge) = bridge();
        let response = bridge
            .handle(&BridgeRequest::post("/echo").with_param("name", "ada"))
            .await;
        assert_eq!(response.status, STATUS_OK);
        assert_eq!(response.body["name"], "ada");
        assert_eq!(
            bridge
                .context()
                .bucket("people")
                .get::<Value>("ada")
                .await
                .unwrap(),
            Some(json!({"seen": true}))
        );
    }

    #[tokio::test]
    async fn missing_param_is_400_and_outage_is_500() {
        let (store, bridge) = bridge();
        let response = bridge.handle(&BridgeRequest::post("/echo")).await;
        assert_eq!(response, BridgeResponse::empty(STATUS_BAD_REQUEST));

        store.set_online("people", false);
        let response = bridge
            .handle(&BridgeRequest::post("/echo").with_param("name", "ada"))
            .await;
        assert_eq!(response.status, STATUS_INTERNAL_ERROR);
        assert!(response.body.is_empty());
    }
}
