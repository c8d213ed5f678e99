//! Ticket booking over the travel bucket.
//!
//! A booking writes its own document and then appends its id to the
//! traveller's record. The append is a plain read-modify-write: two
//! concurrent bookings for the same user can both read the old list, and the
//! later write drops the earlier booking id.
//!
//! Booking ids are random and checked against the bucket before use, since
//! bookings and travellers share one keyspace. The check and the write are
//! not atomic, so two concurrent bookings drawing the same id can still race.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eventing_core::bridge::{BridgeContext, BridgeRequest, BridgeRoute, HttpBridge, Method};
use eventing_core::error::BridgeError;
use eventing_core::kv::Bucket;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

pub const BOOKING_PREFIX: &str = "book_";

/// Fresh ids drawn per booking before one is found unused.
const BOOKING_ID_ATTEMPTS: usize = 8;

type BookingIds = Arc<dyn Fn() -> String + Send + Sync>;

pub fn register(bridge: HttpBridge, bucket: &str) -> HttpBridge {
    register_with_ids(bridge, bucket, Arc::new(new_booking_id))
}

fn register_with_ids(bridge: HttpBridge, bucket: &str, ids: BookingIds) -> HttpBridge {
    bridge.route(
        Method::Post,
        "/book_tickets",
        Arc::new(BookTickets {
            bucket: bucket.to_string(),
            ids,
        }),
    )
}

/// Traveller record keyed by user id. Unknown fields are carried through
/// untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Traveller {
    pub user_id: String,
    #[serde(default)]
    pub booking_ids: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Traveller {
    fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            booking_ids: Vec::new(),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub booking_id: String,
    pub user_id: String,
    pub src: String,
    pub dst: String,
    pub booked_at: DateTime<Utc>,
}

struct BookTickets {
    bucket: String,
    ids: BookingIds,
}

impl BookTickets {
    async fn unused_booking_id(&self, bucket: &Bucket) -> Result<String, BridgeError> {
        for _ in 0..BOOKING_ID_ATTEMPTS {
            let candidate = (self.ids)();
            if bucket.get_raw(&candidate).await?.is_none() {
                return Ok(candidate);
            }
            debug!(target: "eventing::travel", booking_id = %candidate, "booking id taken, redrawing");
        }
        Err(BridgeError::Internal(format!(
            "no unused booking id after {BOOKING_ID_ATTEMPTS} attempts"
        )))
    }
}

#[async_trait]
impl BridgeRoute for BookTickets {
    async fn handle(
        &self,
        ctx: &BridgeContext,
        request: &BridgeRequest,
    ) -> Result<Map<String, Value>, BridgeError> {
        let user_id = request.require("user_id")?;
        let src = request.require("src")?;
        let dst = request.require("dst")?;
        if user_id.starts_with(BOOKING_PREFIX) {
            return Err(BridgeError::InvalidParam {
                name: "user_id".into(),
                reason: format!("`{BOOKING_PREFIX}` is reserved for booking ids"),
            });
        }

        let bucket = ctx.bucket(&self.bucket);
        let booking = Booking {
            booking_id: self.unused_booking_id(&bucket).await?,
            user_id: user_id.to_string(),
            src: src.to_string(),
            dst: dst.to_string(),
            booked_at: Utc::now(),
        };
        bucket.set(&booking.booking_id, &booking).await?;

        let mut traveller = bucket
            .get::<Traveller>(user_id)
            .await?
            .unwrap_or_else(|| Traveller::new(user_id));
        traveller.booking_ids.push(booking.booking_id.clone());
        bucket.set(user_id, &traveller).await?;

        debug!(
            target: "eventing::travel",
            user_id,
            booking_id = %booking.booking_id,
            bookings = traveller.booking_ids.len(),
            "tickets booked"
        );

        let mut body = Map::new();
        body.insert("booking_id".into(), json!(booking.booking_id));
        body.insert("user_id".into(), json!(user_id));
        Ok(body)
    }
}

fn new_booking_id() -> String {
    let suffix: u64 = rand::rng().random_range(1_000_000..10_000_000);
    format!("{BOOKING_PREFIX}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventing_core::bridge::{STATUS_BAD_REQUEST, STATUS_INTERNAL_ERROR, STATUS_OK};
    use eventing_core::kv::{KvBackend, KvFacade, MemoryKvBackend};
    use eventing_core::query::{MemoryQueryEngine, QueryCompiler, QueryService};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context() -> (Arc<MemoryKvBackend>, BridgeContext) {
        let store = Arc::new(MemoryKvBackend::with_buckets(["travel-sample"]));
        let query = QueryService::new(
            QueryCompiler::default(),
            Arc::new(MemoryQueryEngine::new(store.clone())),
        );
        (store.clone(), BridgeContext::new(KvFacade::new(store), query))
    }

    fn bridge() -> (Arc<MemoryKvBackend>, HttpBridge) {
        let (store, context) = context();
        (store, register(HttpBridge::new(context), "travel-sample"))
    }

    fn scripted_ids(ids: &'static [&'static str]) -> BookingIds {
        let next = AtomicUsize::new(0);
        Arc::new(move || {
            let index = next.fetch_add(1, Ordering::Relaxed).min(ids.len() - 1);
            ids[index].to_string()
        })
    }

    fn booking(user_id: &str) -> BridgeRequest {
        BridgeRequest::post("/book_tickets")
            .with_param("user_id", user_id)
            .with_param("src", "SFO")
            .with_param("dst", "JFK")
    }

    #[tokio::test]
    async fn booking_appends_to_existing_traveller() {
        let (_, bridge) = bridge();
        let bucket = bridge.context().bucket("travel-sample");
        bucket
            .set(
                "u7",
                &json!({"user_id": "u7", "booking_ids": ["bid_42"], "tier": "gold"}),
            )
            .await
            .unwrap();

        let response = bridge.handle(&booking("u7")).await;
        assert_eq!(response.status, STATUS_OK);
        let booking_id = response.body["booking_id"].as_str().unwrap().to_string();
        assert!(booking_id.starts_with(BOOKING_PREFIX));

        let traveller: Traveller = bucket.get("u7").await.unwrap().unwrap();
        assert_eq!(traveller.booking_ids, vec!["bid_42".to_string(), booking_id.clone()]);
        assert_eq!(traveller.extra["tier"], "gold");

        let stored: Booking = bucket.get(&booking_id).await.unwrap().unwrap();
        assert_eq!((stored.src.as_str(), stored.dst.as_str()), ("SFO", "JFK"));
    }

    #[tokio::test]
    async fn missing_destination_writes_nothing() {
        let (store, bridge) = bridge();
        let request = BridgeRequest::post("/book_tickets")
            .with_param("user_id", "u1")
            .with_param("src", "SFO");

        let response = bridge.handle(&request).await;
        assert_eq!(response.status, STATUS_BAD_REQUEST);
        assert!(store.scan("travel-sample").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bucket_outage_is_internal_error_without_body() {
        let (store, bridge) = bridge();
        store.set_online("travel-sample", false);

        let response = bridge.handle(&booking("u1")).await;
        assert_eq!(response.status, STATUS_INTERNAL_ERROR);
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn taken_booking_id_is_redrawn() {
        let (_, context) = context();
        let bridge = register_with_ids(
            HttpBridge::new(context),
            "travel-sample",
            scripted_ids(&["book_1000001", "book_1000001", "book_1000002"]),
        );
        let bucket = bridge.context().bucket("travel-sample");

        let first = bridge.handle(&booking("u1")).await;
        let second = bridge.handle(&booking("u2")).await;
        assert_eq!(first.body["booking_id"], "book_1000001");
        assert_eq!(second.body["booking_id"], "book_1000002");

        let kept: Booking = bucket.get("book_1000001").await.unwrap().unwrap();
        assert_eq!(kept.user_id, "u1");
    }

    #[tokio::test]
    async fn exhausted_booking_ids_fail_without_writing() {
        let (store, context) = context();
        let bridge = register_with_ids(
            HttpBridge::new(context),
            "travel-sample",
            scripted_ids(&["book_1000001"]),
        );

        assert_eq!(bridge.handle(&booking("u1")).await.status, STATUS_OK);
        let response = bridge.handle(&booking("u2")).await;
        assert_eq!(response.status, STATUS_INTERNAL_ERROR);
        assert!(response.body.is_empty());
        assert_eq!(store.scan("travel-sample").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn user_id_in_the_booking_namespace_is_rejected() {
        let (store, bridge) = bridge();

        let response = bridge.handle(&booking("book_1234567")).await;
        assert_eq!(response.status, STATUS_BAD_REQUEST);
        assert!(store.scan("travel-sample").await.unwrap().is_empty());
    }
}
