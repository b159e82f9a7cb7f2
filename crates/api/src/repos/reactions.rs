//! Per-URL reaction counters.

use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::firestore::{self, Value, Write};

const URL_FIELD: &str = "url";
const COUNT_FIELD: &str = "claps";

/// Repository for reaction counters keyed by page URL.
///
/// Increments are atomic on the store side: the final count for a URL equals
/// the number of successful `increment_or_create` calls for it, including
/// concurrent ones.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReactionRepo: Send + Sync {
    /// Stored count for an exact URL match, or `None` if the URL was never counted.
    async fn get(&self, url: &str) -> Result<Option<i64>>;

    /// Increments the counter for `url`, creating it at 1 if absent.
    /// Returns the count after this increment.
    async fn increment_or_create(&self, url: &str) -> Result<i64>;
}

/// Firestore implementation of ReactionRepo.
pub struct FirestoreReactionRepo {
    client: firestore::Client,
    collection: String,
}

impl FirestoreReactionRepo {
    pub fn new(client: firestore::Client, collection: impl Into<String>) -> Self {
        Self {
            client,
            collection: collection.into(),
        }
    }

    /// Document id for URLs first counted by this service. Deterministic so
    /// concurrent first increments land on the same document.
    fn document_id(url: &str) -> String {
        hex::encode(Sha256::digest(url.as_bytes()))
    }

    async fn find(&self, url: &str) -> Result<Option<firestore::Document>> {
        self.client
            .find_by_field(&self.collection, URL_FIELD, url)
            .await
            .context("counter lookup failed")
    }
}

#[async_trait]
impl ReactionRepo for FirestoreReactionRepo {
    async fn get(&self, url: &str) -> Result<Option<i64>> {
        let Some(document) = self.find(url).await? else {
            return Ok(None);
        };

        let count = match document.fields.get(COUNT_FIELD).map(Value::as_i64) {
            Some(Some(count)) => count,
            Some(None) => bail!("{} has a non-integer count", document.name),
            None => {
                tracing::warn!(document = %document.name, "counter document has no count");
                0
            }
        };
        if count < 0 {
            bail!("{} has a negative count {}", document.name, count);
        }

        Ok(Some(count))
    }

    async fn increment_or_create(&self, url: &str) -> Result<i64> {
        let name = match self.find(url).await? {
            Some(existing) => existing.name,
            None => self
                .client
                .document_name(&self.collection, &Self::document_id(url)),
        };

        let fields = HashMap::from([(URL_FIELD.to_string(), Value::string(url))]);
        let response = self
            .client
            .commit(vec![Write::upsert_increment(&name, fields, COUNT_FIELD, 1)])
            .await
            .context("counter increment failed")?;

        response
            .write_results
            .first()
            .and_then(|result| result.transform_results.first())
            .and_then(Value::as_i64)
            .with_context(|| format!("commit on {name} returned no count"))
    }
}
