//! Sample applications deployed on the runtime.
//!
//! Two kinds of surface live here: change handlers bound to the source
//! bucket ([`breweries`], [`credit`]) and bridge routes ([`beer`],
//! [`travel`]). The helpers below assemble them from a [`Config`].

pub mod beer;
pub mod breweries;
pub mod credit;
pub mod travel;

use std::sync::Arc;

use eventing_core::bridge::{BridgeContext, HttpBridge};
use eventing_core::dispatch::{CallbackRegistry, HandlerChain};
use eventing_core::error::TemplateError;

use crate::infra::config::Config;

/// Handlers run, in order, for every source event.
pub fn handler_chain(config: &Config) -> HandlerChain {
    HandlerChain::new()
        .with(Arc::new(breweries::BreweryIndexer::new(&config.buckets.beer)))
        .with(Arc::new(credit::CreditScorer::new(
            &config.buckets.credit,
            &config.queues.alerts,
            config.timers.audit_delay(),
        )))
}

pub fn timer_callbacks(config: &Config) -> CallbackRegistry {
    CallbackRegistry::new().with(
        credit::AUDIT_CALLBACK,
        Arc::new(credit::AuditTrail::new(
            &config.buckets.credit,
            &config.buckets.audit,
        )),
    )
}

pub fn bridge(context: BridgeContext, config: &Config) -> Result<HttpBridge, TemplateError> {
    let bridge = beer::register(HttpBridge::new(context), &config.buckets.beer)?;
    Ok(travel::register(bridge, &config.buckets.travel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventing_core::bridge::Method;
    use eventing_core::kv::{KvFacade, MemoryKvBackend};
    use eventing_core::query::{MemoryQueryEngine, QueryCompiler, QueryService};
    use eventing_core::timers::CallbackId;

    #[test]
    fn every_route_is_registered() {
        let store = Arc::new(MemoryKvBackend::new());
        let query = QueryService::new(
            QueryCompiler::default(),
            Arc::new(MemoryQueryEngine::new(store.clone())),
        );
        let bridge = bridge(
            BridgeContext::new(KvFacade::new(store), query),
            &Config::in_memory(),
        )
        .unwrap();

        let mut routes: Vec<_> = bridge.routes().map(|(m, p)| (m, p.to_string())).collect();
        routes.sort_by(|a, b| a.1.cmp(&b.1));
        assert_eq!(
            routes,
            vec![
                (Method::Post, "/book_tickets".to_string()),
                (Method::Get, "/get_beer_count".to_string()),
                (Method::Post, "/get_breweries_by_city".to_string()),
                (Method::Post, "/get_breweries_by_state".to_string()),
                (Method::Get, "/get_breweries_in_sf".to_string()),
                (Method::Get, "/get_brewery_in_cali".to_string()),
            ]
        );
    }

    #[test]
    fn chain_and_callbacks_match_config() {
        let config = Config::in_memory();
        assert_eq!(handler_chain(&config).len(), 2);
        let callbacks = timer_callbacks(&config);
        assert!(callbacks.get(&CallbackId::new(credit::AUDIT_CALLBACK)).is_some());
    }
}
