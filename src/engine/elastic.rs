//! Search engine backend speaking the document-index REST API over HTTP.
//!
//! Responses are decoded into typed envelopes once, here; the rest of the
//! crate only sees [`SearchHits`] and [`EngineError`].

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{
    EngineResult,
    Hit,
    Query,
    Refresh,
    SearchEngine,
    SearchHits,
    SearchRequest,
    fields,
    validate_index_name,
};
use crate::{
    config::{DEFAULT_REQUEST_TIMEOUT_MS, EngineConfig},
    error::EngineError,
};

/// Characters left unescaped in a path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Cause(ErrorCause),
    Message(String),
}

#[derive(Debug, Deserialize)]
struct ErrorCause {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    index: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    found: bool,
    #[serde(rename = "_source", default)]
    source: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    result: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    hits: Vec<RawHit>,
}

#[derive(Debug, Deserialize)]
struct RawHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score", default)]
    score: Option<f64>,
    #[serde(rename = "_source", default)]
    source: Value,
}

/// Map an error status and body onto the engine error taxonomy.
fn classify(status: StatusCode, body: &str) -> EngineError {
    let cause = match serde_json::from_str::<ErrorResponse>(body) {
        Ok(ErrorResponse {
            error: ErrorBody::Cause(cause),
        }) => cause,
        Ok(ErrorResponse {
            error: ErrorBody::Message(reason),
        }) => {
            return EngineError::Status {
                status: status.as_u16(),
                reason,
            };
        }
        Err(_) => {
            let reason = if body.is_empty() {
                status.canonical_reason().unwrap_or("unknown").to_string()
            } else {
                body.to_string()
            };
            return EngineError::Status {
                status: status.as_u16(),
                reason,
            };
        }
    };

    let reason = cause.reason.unwrap_or_default();
    let index = cause.index.unwrap_or_else(|| reason.clone());
    match cause.kind.as_str() {
        "index_not_found_exception" => EngineError::IndexMissing(index),
        "index_closed_exception" => EngineError::IndexClosed(index),
        "resource_already_exists_exception" => {
            EngineError::IndexAlreadyExists(index)
        }
        kind => EngineError::Status {
            status: status.as_u16(),
            reason: format!("{kind}: {reason}"),
        },
    }
}

async fn error_from(response: Response) -> EngineError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    classify(status, &body)
}

/// JSON form of a [`Query`].
pub fn query_body(query: &Query) -> Value {
    match query {
        Query::MatchAll => json!({ "match_all": {} }),
        Query::MultiMatch {
            query,
            fields,
            kind,
        } => {
            let fields: Vec<String> =
                fields.iter().map(ToString::to_string).collect();
            json!({
                "multi_match": {
                    "query": query,
                    "fields": fields,
                    "type": kind.as_str(),
                }
            })
        }
        Query::Ids(ids) => json!({ "ids": { "values": ids } }),
        Query::Bool {
            must,
            should,
            must_not,
        } => {
            let mut clauses = Map::new();
            for (occur, queries) in
                [("must", must), ("should", should), ("must_not", must_not)]
            {
                if !queries.is_empty() {
                    clauses.insert(
                        occur.to_string(),
                        queries.iter().map(query_body).collect(),
                    );
                }
            }
            json!({ "bool": clauses })
        }
    }
}

/// Settings for a new index: both ranked fields are analyzed text, as in
/// the embedded schema, instead of whatever dynamic mapping would guess.
pub fn index_body() -> Value {
    json!({
        "mappings": {
            "properties": {
                (fields::TITLE): { "type": "text" },
                (fields::CONTENT): { "type": "text" },
            }
        }
    })
}

pub fn search_body(request: &SearchRequest) -> Value {
    json!({
        "query": query_body(&request.query),
        "size": request.size,
    })
}

/// Cheap to clone; clones share the HTTP connection pool.
#[derive(Clone)]
pub struct ElasticEngine {
    client: Client,
    addresses: Arc<Vec<String>>,
    next: Arc<AtomicUsize>,
    username: Option<String>,
    password: Option<String>,
}

impl ElasticEngine {
    pub fn from_config(config: &EngineConfig) -> EngineResult<Self> {
        let request_timeout = config.request_timeout().unwrap_or(
            Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        );
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(request_timeout)
            .build()
            .map_err(|e| {
                EngineError::Transport(format!("failed to build client: {e}"))
            })?;

        let addresses = config
            .addresses()
            .into_iter()
            .map(|a| a.trim_end_matches('/').to_string())
            .collect();

        Ok(Self {
            client,
            addresses: Arc::new(addresses),
            next: Arc::new(AtomicUsize::new(0)),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Rotate through the configured endpoints, one per request.
    fn base(&self) -> &str {
        let i = self.next.fetch_add(1, Ordering::Relaxed);
        &self.addresses[i % self.addresses.len()]
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{path}", self.base());
        tracing::debug!(%method, %url, "engine request");
        let builder = self.client.request(method, url);
        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_deref()),
            None => builder,
        }
    }

    fn index_path(index: &str) -> EngineResult<String> {
        validate_index_name(index)?;
        Ok(utf8_percent_encode(index, SEGMENT).to_string())
    }

    fn doc_path(index: &str, id: &str) -> EngineResult<String> {
        Ok(format!(
            "{}/_doc/{}",
            Self::index_path(index)?,
            utf8_percent_encode(id, SEGMENT)
        ))
    }

    async fn send_ok(&self, builder: RequestBuilder) -> EngineResult<()> {
        let response = builder.send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from(response).await)
        }
    }
}

impl fmt::Debug for ElasticEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElasticEngine")
            .field("addresses", &self.addresses)
            .field("has_credentials", &self.username.is_some())
            .finish_non_exhaustive()
    }
}

impl SearchEngine for ElasticEngine {
    async fn index_exists(&self, index: &str) -> EngineResult<bool> {
        let path = Self::index_path(index)?;
        let response = self.request(Method::HEAD, &path).send().await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(error_from(response).await),
        }
    }

    async fn create_index(&self, index: &str) -> EngineResult<()> {
        let path = Self::index_path(index)?;
        let builder = self.request(Method::PUT, &path).json(&index_body());
        self.send_ok(builder).await?;
        tracing::info!(index, "created index");
        Ok(())
    }

    async fn open_index(&self, index: &str) -> EngineResult<()> {
        let path = format!("{}/_open", Self::index_path(index)?);
        self.send_ok(self.request(Method::POST, &path)).await
    }

    async fn close_index(&self, index: &str) -> EngineResult<()> {
        let path = format!("{}/_close", Self::index_path(index)?);
        self.send_ok(self.request(Method::POST, &path)).await?;
        tracing::info!(index, "closed index");
        Ok(())
    }

    async fn put_document(
        &self,
        index: &str,
        id: &str,
        source: &Value,
        refresh: Refresh,
    ) -> EngineResult<()> {
        let path = Self::doc_path(index, id)?;
        let builder = self
            .request(Method::PUT, &path)
            .query(&[("refresh", refresh.as_param())])
            .json(source);
        self.send_ok(builder).await
    }

    async fn get_document(
        &self,
        index: &str,
        id: &str,
    ) -> EngineResult<Option<Value>> {
        let path = Self::doc_path(index, id)?;
        let response = self.request(Method::GET, &path).send().await?;
        let status = response.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(error_from(response).await);
        }

        let body = response.text().await?;
        // A missing document is a 404 with `found: false`; a missing index
        // is a 404 with an error envelope instead.
        match serde_json::from_str::<GetResponse>(&body) {
            Ok(GetResponse {
                found: true,
                source,
            }) => Ok(Some(source.unwrap_or(Value::Null))),
            Ok(GetResponse { found: false, .. }) => Ok(None),
            Err(_) if status == StatusCode::NOT_FOUND => {
                Err(classify(status, &body))
            }
            Err(e) => Err(EngineError::Decode(e.to_string())),
        }
    }

    async fn delete_document(
        &self,
        index: &str,
        id: &str,
        refresh: Refresh,
    ) -> EngineResult<bool> {
        let path = Self::doc_path(index, id)?;
        let response = self
            .request(Method::DELETE, &path)
            .query(&[("refresh", refresh.as_param())])
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        if status != StatusCode::NOT_FOUND {
            return Err(error_from(response).await);
        }

        let body = response.text().await?;
        match serde_json::from_str::<DeleteResponse>(&body) {
            Ok(DeleteResponse { result }) if result == "not_found" => Ok(false),
            _ => Err(classify(status, &body)),
        }
    }

    async fn search(
        &self,
        index: &str,
        request: &SearchRequest,
    ) -> EngineResult<SearchHits> {
        let path = format!("{}/_search", Self::index_path(index)?);
        let mut builder = self.request(Method::POST, &path);
        if request.track_scores {
            builder = builder.query(&[("track_scores", "true")]);
        }
        let response = builder.json(&search_body(request)).send().await?;
        if !response.status().is_success() {
            return Err(error_from(response).await);
        }

        let decoded: SearchResponse = response.json().await?;
        let hits = decoded
            .hits
            .hits
            .into_iter()
            .map(|raw| Hit {
                id: raw.id,
                score: raw.score,
                source: raw.source,
            })
            .collect();
        Ok(SearchHits { hits })
    }
}
