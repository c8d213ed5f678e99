use async_trait::async_trait;
use eventing_core::dispatch::{EventHandler, HandlerContext};
use eventing_core::error::HandlerError;
use eventing_core::types::{DeletionEvent, MutationEvent};
use serde_json::Value;
use tracing::debug;

/// Keeps the brewery bucket in step with the source bucket.
///
/// JSON documents that carry a `city`, or are typed `brewery` or `beer`, are
/// copied under the same key. A missing `type` defaults to `brewery` and a
/// missing `name` to the document key. Deleting the source document removes
/// the copy.
#[derive(Debug, Clone)]
pub struct BreweryIndexer {
    bucket: String,
}

impl BreweryIndexer {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl EventHandler for BreweryIndexer {
    fn name(&self) -> &str {
        "brewery-indexer"
    }

    async fn on_mutation(
        &self,
        ctx: &HandlerContext,
        event: &MutationEvent,
    ) -> Result<(), HandlerError> {
        let Some(Value::Object(mut doc)) = event.json_body()? else {
            return Ok(());
        };

        let kind = doc.get("type").and_then(Value::as_str);
        let indexable = doc.contains_key("city") || matches!(kind, Some("brewery" | "beer"));
        if !indexable {
            return Ok(());
        }

        doc.entry("type")
            .or_insert_with(|| Value::from("brewery"));
        doc.entry("name")
            .or_insert_with(|| Value::from(event.key.as_str()));

        ctx.bucket(&self.bucket)
            .set(&event.key, &Value::Object(doc))
            .await?;
        debug!(target: "eventing::apps", key = %event.key, bucket = %self.bucket, "indexed");
        Ok(())
    }

    async fn on_deletion(
        &self,
        ctx: &HandlerContext,
        event: &DeletionEvent,
    ) -> Result<(), HandlerError> {
        ctx.bucket(&self.bucket).delete(&event.key).await?;
        Ok(())
    }
}
