//! Minimal Firestore REST client: equality queries and atomic commits.
//!
//! Uses the v1 API: https://cloud.google.com/firestore/docs/reference/rest
//!
//! In production the access token comes from the GCE/Cloud Run metadata
//! server. Against the emulator the fixed `owner` token bypasses rules.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;

use crate::upstream::send_idempotent;

const PRODUCTION_URL: &str = "https://firestore.googleapis.com/v1";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("unexpected response: {0}")]
    Parse(String),
}

pub struct Client {
    http: reqwest::Client,
    base_url: String,
    database: String,
    auth: Auth,
}

enum Auth {
    Emulator,
    MetadataServer(MetadataToken),
}

impl Client {
    pub fn new(http: reqwest::Client, project_id: &str) -> Self {
        Self {
            auth: Auth::MetadataServer(MetadataToken::new(http.clone(), METADATA_TOKEN_URL)),
            http,
            base_url: PRODUCTION_URL.to_string(),
            database: database_path(project_id),
        }
    }

    /// `emulator_host` is `host:port` as in `FIRESTORE_EMULATOR_HOST`.
    pub fn emulator(http: reqwest::Client, project_id: &str, emulator_host: &str) -> Self {
        Self {
            http,
            base_url: format!("http://{emulator_host}/v1"),
            database: database_path(project_id),
            auth: Auth::Emulator,
        }
    }

    /// Emulator-style client against an arbitrary base URL (a mock server).
    #[cfg(test)]
    pub(crate) fn with_base_url(http: reqwest::Client, project_id: &str, base_url: String) -> Self {
        Self {
            http,
            base_url,
            database: database_path(project_id),
            auth: Auth::Emulator,
        }
    }

    /// Full resource name of a document.
    pub fn document_name(&self, collection: &str, id: &str) -> String {
        format!("{}/documents/{}/{}", self.database, collection, id)
    }

    async fn bearer(&self) -> Result<String, Error> {
        match &self.auth {
            Auth::Emulator => Ok("owner".to_string()),
            Auth::MetadataServer(token) => token.get().await,
        }
    }

    /// First document in `collection` whose `field` equals `value`.
    pub async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<Document>, Error> {
        let body = json!({
            "structuredQuery": {
                "from": [{ "collectionId": collection }],
                "where": {
                    "fieldFilter": {
                        "field": { "fieldPath": field },
                        "op": "EQUAL",
                        "value": Value::string(value),
                    }
                },
                "limit": 1,
            }
        });

        let response = send_idempotent(
            self.http
                .post(format!("{}/{}/documents:runQuery", self.base_url, self.database))
                .bearer_auth(self.bearer().await?)
                .json(&body),
        )
        .await?;

        let items: Vec<RunQueryItem> = check(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        Ok(items.into_iter().find_map(|item| item.document))
    }

    /// Applies `writes` atomically. Not retried: a timed-out commit may have
    /// been applied.
    pub async fn commit(&self, writes: Vec<Write>) -> Result<CommitResponse, Error> {
        let response = self
            .http
            .post(format!("{}/{}/documents:commit", self.base_url, self.database))
            .bearer_auth(self.bearer().await?)
            .json(&CommitRequest { writes })
            .send()
            .await?;

        check(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))
    }
}

fn database_path(project_id: &str) -> String {
    format!("projects/{project_id}/databases/(default)")
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, Error> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let message = response.text().await.unwrap_or_default();
    Err(Error::Api {
        status: status.as_u16(),
        message,
    })
}

/// Access token from the metadata server, refreshed a minute before expiry.
struct MetadataToken {
    http: reqwest::Client,
    url: String,
    cached: Mutex<Option<(String, Instant)>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

impl MetadataToken {
    fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            cached: Mutex::new(None),
        }
    }

    async fn get(&self) -> Result<String, Error> {
        let mut cached = self.cached.lock().await;
        if let Some((token, expires_at)) = cached.as_ref()
            && Instant::now() < *expires_at
        {
            return Ok(token.clone());
        }

        let response = send_idempotent(
            self.http
                .get(&self.url)
                .header("Metadata-Flavor", "Google"),
        )
        .await?;
        let token: TokenResponse = check(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        let lifetime = Duration::from_secs(token.expires_in.saturating_sub(60));
        *cached = Some((token.access_token.clone(), Instant::now() + lifetime));
        Ok(token.access_token)
    }
}

/// A Firestore typed value. Only the variants this service stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Value {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    /// Firestore encodes 64-bit integers as decimal strings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integer_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub double_value: Option<f64>,
}

impl Value {
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            string_value: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn integer(value: i64) -> Self {
        Self {
            integer_value: Some(value.to_string()),
            ..Default::default()
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        if let Some(int) = &self.integer_value {
            return int.parse().ok();
        }
        self.double_value
            .filter(|d| d.fract() == 0.0)
            .map(|d| d as i64)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub name: String,
    #[serde(default)]
    pub fields: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct RunQueryItem {
    #[serde(default)]
    document: Option<Document>,
}

#[derive(Serialize)]
struct CommitRequest {
    writes: Vec<Write>,
}

/// Upsert of `fields` (limited to their keys by the update mask) plus atomic
/// integer increments applied server side.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Write {
    update: UpdateDocument,
    update_mask: DocumentMask,
    update_transforms: Vec<FieldTransform>,
}

#[derive(Debug, Clone, Serialize)]
struct UpdateDocument {
    name: String,
    fields: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentMask {
    field_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct FieldTransform {
    field_path: String,
    increment: Value,
}

impl Write {
    pub fn upsert_increment(
        name: impl Into<String>,
        fields: HashMap<String, Value>,
        counter_field: &str,
        by: i64,
    ) -> Self {
        let mut field_paths: Vec<String> = fields.keys().cloned().collect();
        field_paths.sort();
        Self {
            update: UpdateDocument {
                name: name.into(),
                fields,
            },
            update_mask: DocumentMask { field_paths },
            update_transforms: vec![FieldTransform {
                field_path: counter_field.to_string(),
                increment: Value::integer(by),
            }],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    #[serde(default)]
    pub write_results: Vec<WriteResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResult {
    /// Post-transform values, in transform order.
    #[serde(default)]
    pub transform_results: Vec<Value>,
}
