//! Derived credit profiles.
//!
//! Source documents typed `credit_score` are scored into the credit bucket.
//! High-risk profiles are pushed onto the alerts queue, and every scored
//! profile gets an audit timer that records a snapshot once it fires.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use eventing_core::dispatch::{EventHandler, HandlerContext, TimerCallback};
use eventing_core::error::HandlerError;
use eventing_core::timers::CallbackId;
use eventing_core::types::{DeletionEvent, MutationEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

pub const CREDIT_SCORE_TYPE: &str = "credit_score";
pub const AUDIT_CALLBACK: &str = "audit";

/// Raw profile as written to the source bucket.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreditProfile {
    pub ssn: String,
    pub credit_score: u32,
    #[serde(default)]
    pub credit_card_count: u32,
    pub total_credit_limit: f64,
    pub credit_limit_used: f64,
    #[serde(default)]
    pub missed_emi_payments: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Low,
    Medium,
    High,
}

impl CreditProfile {
    /// Share of the limit in use, `0.0` when there is no limit.
    pub fn utilization(&self) -> f64 {
        if self.total_credit_limit <= 0.0 {
            0.0
        } else {
            self.credit_limit_used / self.total_credit_limit
        }
    }

    pub fn risk(&self) -> Risk {
        let utilization = self.utilization();
        if self.credit_score < 580 || self.missed_emi_payments >= 3 || utilization > 0.9 {
            Risk::High
        } else if self.credit_score < 670 || self.missed_emi_payments > 0 || utilization > 0.5 {
            Risk::Medium
        } else {
            Risk::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredProfile {
    pub ssn: String,
    pub credit_score: u32,
    pub credit_card_count: u32,
    pub utilization: f64,
    pub risk: Risk,
    pub scored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAlert {
    pub key: String,
    pub ssn: String,
    pub credit_score: u32,
    pub utilization: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub key: String,
    pub audited_at: DateTime<Utc>,
    /// `None` when the scored profile was gone by the time the timer fired.
    pub risk: Option<Risk>,
}

#[derive(Debug, Clone)]
pub struct CreditScorer {
    bucket: String,
    alerts: String,
    audit_delay: Duration,
    audit: CallbackId,
}

impl CreditScorer {
    pub fn new(bucket: impl Into<String>, alerts: impl Into<String>, audit_delay: Duration) -> Self {
        Self {
            bucket: bucket.into(),
            alerts: alerts.into(),
            audit_delay,
            audit: CallbackId::new(AUDIT_CALLBACK),
        }
    }
}

#[async_trait]
impl EventHandler for CreditScorer {
    fn name(&self) -> &str {
        "credit-scorer"
    }

    async fn on_mutation(
        &self,
        ctx: &HandlerContext,
        event: &MutationEvent,
    ) -> Result<(), HandlerError> {
        let Some(doc) = event.json_body()? else {
            return Ok(());
        };
        if doc.get("type").and_then(Value::as_str) != Some(CREDIT_SCORE_TYPE) {
            return Ok(());
        }

        let profile: CreditProfile = serde_json::from_value(doc)?;
        let scored = ScoredProfile {
            ssn: profile.ssn.clone(),
            credit_score: profile.credit_score,
            credit_card_count: profile.credit_card_count,
            utilization: profile.utilization(),
            risk: profile.risk(),
            scored_at: ctx.now(),
        };
        ctx.bucket(&self.bucket).set(&event.key, &scored).await?;

        if scored.risk == Risk::High {
            let alert = RiskAlert {
                key: event.key.clone(),
                ssn: scored.ssn.clone(),
                credit_score: scored.credit_score,
                utilization: scored.utilization,
            };
            ctx.enqueue_json(&self.alerts, &alert).await?;
            info!(target: "eventing::apps", key = %event.key, queue = %self.alerts, "high-risk profile queued");
        }

        let audit_at = ctx
            .now()
            .checked_add_signed(self.audit_delay)
            .ok_or_else(|| HandlerError::logic("audit delay overflows the clock"))?;
        ctx.schedule(&event.key, &self.audit, audit_at)?;
        debug!(target: "eventing::apps", key = %event.key, risk = ?scored.risk, "profile scored");
        Ok(())
    }

    async fn on_deletion(
        &self,
        ctx: &HandlerContext,
        event: &DeletionEvent,
    ) -> Result<(), HandlerError> {
        ctx.cancel_timer(&event.key, &self.audit);
        ctx.bucket(&self.bucket).delete(&event.key).await?;
        Ok(())
    }
}

/// Records what the scored profile looked like when its audit timer fired.
#[derive(Debug, Clone)]
pub struct AuditTrail {
    credit_bucket: String,
    audit_bucket: String,
}

impl AuditTrail {
    pub fn new(credit_bucket: impl Into<String>, audit_bucket: impl Into<String>) -> Self {
        Self {
            credit_bucket: credit_bucket.into(),
            audit_bucket: audit_bucket.into(),
        }
    }
}

#[async_trait]
impl TimerCallback for AuditTrail {
    async fn fire(&self, ctx: &HandlerContext, key: &str) -> Result<(), HandlerError> {
        let scored = ctx
            .bucket(&self.credit_bucket)
            .get::<ScoredProfile>(key)
            .await?;
        let record = AuditRecord {
            key: key.to_string(),
            audited_at: ctx.now(),
            risk: scored.map(|profile| profile.risk),
        };
        ctx.bucket(&self.audit_bucket).set(key, &record).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use eventing_core::dispatch::{CallbackRegistry, Dispatcher, RecentFailures};
    use eventing_core::kv::{KvFacade, MemoryKvBackend};
    use eventing_core::query::{MemoryQueryEngine, QueryCompiler, QueryService};
    use eventing_core::queue::{MemoryQueueGateway, QueueGateway};
    use eventing_core::timers::{ManualClock, TimerDriver, TimerRegistry};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn profile(score: u32, used: f64, missed: u32) -> CreditProfile {
        CreditProfile {
            ssn: "123-45-6789".into(),
            credit_score: score,
            credit_card_count: 2,
            total_credit_limit: 10_000.0,
            credit_limit_used: used,
            missed_emi_payments: missed,
        }
    }

    #[test]
    fn risk_bands() {
        assert_eq!(profile(780, 1_000.0, 0).risk(), Risk::Low);
        assert_eq!(profile(650, 1_000.0, 0).risk(), Risk::Medium);
        assert_eq!(profile(780, 6_000.0, 0).risk(), Risk::Medium);
        assert_eq!(profile(780, 1_000.0, 3).risk(), Risk::High);
        assert_eq!(profile(560, 1_000.0, 0).risk(), Risk::High);
        assert_eq!(profile(780, 9_500.0, 0).risk(), Risk::High);
    }

    #[test]
    fn zero_limit_has_zero_utilization() {
        let mut p = profile(700, 50.0, 0);
        p.total_credit_limit = 0.0;
        assert_eq!(p.utilization(), 0.0);
    }

    struct Harness {
        clock: Arc<ManualClock>,
        queues: Arc<MemoryQueueGateway>,
        failures: Arc<RecentFailures>,
        dispatcher: Dispatcher,
        shutdown: CancellationToken,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryKvBackend::with_buckets(["src", "credit", "audit"]));
        let queues = Arc::new(MemoryQueueGateway::new());
        let callbacks = CallbackRegistry::new()
            .with(AUDIT_CALLBACK, Arc::new(AuditTrail::new("credit", "audit")));
        let timers = Arc::new(TimerRegistry::new(clock.clone(), callbacks.ids()));
        let query = QueryService::new(
            QueryCompiler::default(),
            Arc::new(MemoryQueryEngine::new(store.clone())),
        );
        let ctx = HandlerContext::new(KvFacade::new(store), query, timers.clone(), queues.clone());
        let failures = Arc::new(RecentFailures::new(8));
        let scorer = CreditScorer::new("credit", "alerts", Duration::seconds(30));
        let dispatcher = Dispatcher::builder(ctx, Arc::new(scorer))
            .callbacks(callbacks)
            .sink(failures.clone())
            .build();

        let shutdown = CancellationToken::new();
        TimerDriver::new(timers, Arc::new(dispatcher.clone()))
            .with_tick(std::time::Duration::from_millis(100))
            .spawn(shutdown.clone());

        Harness {
            clock,
            queues,
            failures,
            dispatcher,
            shutdown,
        }
    }

    fn credit_doc(score: u32, used: f64) -> Value {
        json!({
            "ssn": "987-65-4321",
            "credit_score": score,
            "credit_card_count": 3,
            "total_credit_limit": 20_000.0,
            "credit_limit_used": used,
            "missed_emi_payments": 0,
            "type": CREDIT_SCORE_TYPE,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn high_risk_profile_is_scored_queued_and_audited() {
        let h = harness();
        h.dispatcher
            .submit(MutationEvent::json("cust_1", &credit_doc(540, 2_000.0), 1))
            .unwrap();
        h.dispatcher.wait_idle().await;

        let ctx = h.dispatcher.context();
        let scored: ScoredProfile = ctx.bucket("credit").get("cust_1").await.unwrap().unwrap();
        assert_eq!(scored.risk, Risk::High);
        assert_eq!(h.queues.len("alerts"), 1);
        let alert: RiskAlert = serde_json::from_slice(
            &h.queues.dequeue("alerts").await.unwrap().unwrap().payload,
        )
        .unwrap();
        assert_eq!(alert.key, "cust_1");

        assert_eq!(ctx.bucket("audit").get::<AuditRecord>("cust_1").await.unwrap(), None);
        h.clock.advance(Duration::seconds(31));
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        h.dispatcher.wait_idle().await;

        let audit: AuditRecord = ctx.bucket("audit").get("cust_1").await.unwrap().unwrap();
        assert_eq!(audit.risk, Some(Risk::High));
        h.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn deletion_cancels_audit_and_drops_score() {
        let h = harness();
        h.dispatcher
            .submit(MutationEvent::json("cust_2", &credit_doc(800, 100.0), 1))
            .unwrap();
        h.dispatcher.submit(DeletionEvent::new("cust_2", 2)).unwrap();
        h.dispatcher.wait_idle().await;

        h.clock.advance(Duration::seconds(60));
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        h.dispatcher.wait_idle().await;

        let ctx = h.dispatcher.context();
        assert_eq!(ctx.bucket("credit").get::<Value>("cust_2").await.unwrap(), None);
        assert_eq!(ctx.bucket("audit").get::<Value>("cust_2").await.unwrap(), None);
        assert!(h.queues.is_empty("alerts"));
        assert_eq!(h.dispatcher.stats().timers_fired, 0);
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn malformed_profile_is_an_isolated_failure() {
        let h = harness();
        let ticket = h
            .dispatcher
            .submit(MutationEvent::json(
                "cust_3",
                &json!({"type": CREDIT_SCORE_TYPE, "ssn": "x"}),
                1,
            ))
            .unwrap();
        let outcome = ticket.outcome().await.unwrap();
        assert!(outcome.failed());

        let failures = h.failures.snapshot();
        assert_eq!(failures.len(), 1);
        assert!(!failures[0].transient);
        h.shutdown.cancel();
    }
}
