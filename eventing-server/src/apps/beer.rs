//! Read-only routes over the brewery sample bucket.
//!
//! Every route is a single templated query against the configured bucket.
//! Counting routes return the aggregate straight from the engine; listing
//! routes return the names and derive the count from them.
//!
//! Parameters go through the default hyphen quoting even inside a quoted
//! literal, so a hyphenated city or state becomes ``'`Winston-Salem`'`` and
//! matches nothing.

use std::sync::Arc;

use async_trait::async_trait;
use eventing_core::bridge::{BridgeContext, BridgeRequest, BridgeRoute, HttpBridge, Method};
use eventing_core::error::{BridgeError, TemplateError};
use eventing_core::query::{QueryTemplate, Substitutions};
use serde_json::{Map, Value, json};

const BEER_COUNT: &str = "SELECT COUNT(*) AS beer_count FROM ${bucket} WHERE type = 'beer'";
const BREWERY_COUNT_IN_CITY: &str =
    "SELECT COUNT(*) AS brewery_count FROM ${bucket} WHERE type = 'brewery' AND city = '${city}'";
const BREWERY_IN_STATE: &str =
    "SELECT name FROM ${bucket} WHERE type = 'brewery' AND state = '${state}' LIMIT 1";
const BREWERIES_BY_CITY: &str =
    "SELECT name FROM ${bucket} WHERE type = 'brewery' AND city = '${city}'";
const BREWERIES_BY_STATE: &str =
    "SELECT name FROM ${bucket} WHERE type = 'brewery' AND state = '${state}'";

const SAN_FRANCISCO: &str = "San Francisco";
const CALIFORNIA: &str = "California";

/// Registers the brewery routes. Fails only if a built-in template is
/// malformed.
pub fn register(bridge: HttpBridge, bucket: &str) -> Result<HttpBridge, TemplateError> {
    let bucket = bucket.to_string();
    Ok(bridge
        .route(
            Method::Get,
            "/get_beer_count",
            Arc::new(BeerCount {
                bucket: bucket.clone(),
                template: QueryTemplate::parse(BEER_COUNT)?,
            }),
        )
        .route(
            Method::Get,
            "/get_breweries_in_sf",
            Arc::new(BreweryCountInCity {
                bucket: bucket.clone(),
                city: SAN_FRANCISCO,
                template: QueryTemplate::parse(BREWERY_COUNT_IN_CITY)?,
            }),
        )
        .route(
            Method::Get,
            "/get_brewery_in_cali",
            Arc::new(BreweryInState {
                bucket: bucket.clone(),
                state: CALIFORNIA,
                template: QueryTemplate::parse(BREWERY_IN_STATE)?,
            }),
        )
        .route(
            Method::Post,
            "/get_breweries_by_city",
            Arc::new(BreweriesBy {
                bucket: bucket.clone(),
                param: "city",
                template: QueryTemplate::parse(BREWERIES_BY_CITY)?,
            }),
        )
        .route(
            Method::Post,
            "/get_breweries_by_state",
            Arc::new(BreweriesBy {
                bucket,
                param: "state",
                template: QueryTemplate::parse(BREWERIES_BY_STATE)?,
            }),
        ))
}

struct BeerCount {
    bucket: String,
    template: QueryTemplate,
}

#[async_trait]
impl BridgeRoute for BeerCount {
    async fn handle(
        &self,
        ctx: &BridgeContext,
        _request: &BridgeRequest,
    ) -> Result<Map<String, Value>, BridgeError> {
        let subs = Substitutions::new().with("bucket", self.bucket.as_str());
        let row = ctx.query().first(&self.template, &subs).await?;

        let mut body = Map::new();
        body.insert("beer_count".into(), count_field(row, "beer_count"));
        Ok(body)
    }
}

struct BreweryCountInCity {
    bucket: String,
    city: &'static str,
    template: QueryTemplate,
}

#[async_trait]
impl BridgeRoute for BreweryCountInCity {
    async fn handle(
        &self,
        ctx: &BridgeContext,
        _request: &BridgeRequest,
    ) -> Result<Map<String, Value>, BridgeError> {
        let subs = Substitutions::new()
            .with("bucket", self.bucket.as_str())
            .with("city", self.city);
        let row = ctx.query().first(&self.template, &subs).await?;

        let mut body = Map::new();
        body.insert("brewery_count".into(), count_field(row, "brewery_count"));
        body.insert("city".into(), json!(self.city));
        Ok(body)
    }
}

struct BreweryInState {
    bucket: String,
    state: &'static str,
    template: QueryTemplate,
}

#[async_trait]
impl BridgeRoute for BreweryInState {
    async fn handle(
        &self,
        ctx: &BridgeContext,
        _request: &BridgeRequest,
    ) -> Result<Map<String, Value>, BridgeError> {
        let subs = Substitutions::new()
            .with("bucket", self.bucket.as_str())
            .with("state", self.state);
        let brewery = ctx
            .query()
            .first(&self.template, &subs)
            .await?
            .and_then(|row| row.get("name").cloned())
            .unwrap_or(Value::Null);

        let mut body = Map::new();
        body.insert("brewery".into(), brewery);
        body.insert("state".into(), json!(self.state));
        Ok(body)
    }
}

/// Lists brewery names matching one request parameter.
struct BreweriesBy {
    bucket: String,
    param: &'static str,
    template: QueryTemplate,
}

#[async_trait]
impl BridgeRoute for BreweriesBy {
    async fn handle(
        &self,
        ctx: &BridgeContext,
        request: &BridgeRequest,
    ) -> Result<Map<String, Value>, BridgeError> {
        let value = request.require(self.param)?;
        let subs = Substitutions::new()
            .with("bucket", self.bucket.as_str())
            .with(self.param, value);
        let breweries: Vec<Value> = ctx
            .query()
            .collect(&self.template, &subs)
            .await?
            .into_iter()
            .filter_map(|row| row.get("name").cloned())
            .collect();

        let mut body = Map::new();
        body.insert(self.param.into(), json!(value));
        body.insert("brewery_count".into(), json!(breweries.len()));
        body.insert("breweries".into(), Value::Array(breweries));
        Ok(body)
    }
}

fn count_field(row: Option<Value>, field: &str) -> Value {
    row.and_then(|row| row.get(field).cloned())
        .unwrap_or_else(|| json!(0))
}
