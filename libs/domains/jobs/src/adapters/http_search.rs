use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::http;
use crate::collaborators::SearchIndex;
use crate::error::{DomainError, DomainResult};

const PROVIDER: &str = "search";

/// Document API in the `PUT /<index>/_doc/<id>` shape.
pub struct HttpSearchIndex {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpSearchIndex {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> DomainResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            DomainError::Provider(format!("invalid search URL '{}': {}", base_url, e))
        })?;
        Ok(Self {
            client: http::client(timeout)?,
            base_url,
            api_key,
        })
    }

    /// Ids are percent-encoded as a single path segment.
    fn document_url(&self, index: &str, id: &str) -> DomainResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DomainError::Provider(format!("not a base URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend([index, "_doc", id]);
        Ok(url)
    }
}

#[async_trait]
impl SearchIndex for HttpSearchIndex {
    async fn upsert(&self, index: &str, id: &str, document: &Value) -> DomainResult<()> {
        let request = self.client.put(self.document_url(index, id)?).json(document);
        let response = http::with_bearer(request, self.api_key.as_deref())
            .send()
            .await
            .map_err(|e| http::transport_error(PROVIDER, e))?;
        http::check(PROVIDER, response).await?;
        debug!(index = %index, id = %id, "Upserted search document");
        Ok(())
    }

    /// Deleting a document that is already gone succeeds.
    async fn delete(&self, index: &str, id: &str) -> DomainResult<()> {
        let request = self.client.delete(self.document_url(index, id)?);
        let response = http::with_bearer(request, self.api_key.as_deref())
            .send()
            .await
            .map_err(|e| http::transport_error(PROVIDER, e))?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(index = %index, id = %id, "Search document already absent");
            return Ok(());
        }
        http::check(PROVIDER, response).await?;
        debug!(index = %index, id = %id, "Deleted search document");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::http::test_server;
    use axum::extract::{Path, State};
    use axum::http::StatusCode as Status;
    use axum::routing::put;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    type Docs = Arc<Mutex<HashMap<(String, String), Value>>>;

    async fn upsert(
        State(docs): State<Docs>,
        Path((index, id)): Path<(String, String)>,
        Json(doc): Json<Value>,
    ) -> Status {
        docs.lock().unwrap().insert((index, id), doc);
        Status::OK
    }

    async fn remove(State(docs): State<Docs>, Path((index, id)): Path<(String, String)>) -> Status {
        match docs.lock().unwrap().remove(&(index, id)) {
            Some(_) => Status::OK,
            None => Status::NOT_FOUND,
        }
    }

    async fn index() -> (HttpSearchIndex, Docs) {
        let docs = Docs::default();
        let app = Router::new()
            .route("/{index}/_doc/{id}", put(upsert).delete(remove))
            .with_state(docs.clone());
        let base = test_server::serve(app).await;
        (HttpSearchIndex::new(&base, None, Duration::from_secs(5)).unwrap(), docs)
    }

    #[tokio::test]
    async fn test_upsert_then_delete() {
        let (search, docs) = index().await;
        let doc = json!({ "name": "Lamp" });

        search.upsert("products", "sku/1", &doc).await.unwrap();
        let key = ("products".to_string(), "sku/1".to_string());
        assert_eq!(docs.lock().unwrap().get(&key), Some(&doc));

        search.delete("products", "sku/1").await.unwrap();
        assert!(docs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_document_is_ok() {
        let (search, _) = index().await;
        search.delete("products", "never-indexed").await.unwrap();
    }

    #[test]
    fn test_document_url_encodes_id() {
        let search =
            HttpSearchIndex::new("http://search:9200/", None, Duration::from_secs(1)).unwrap();
        let url = search.document_url("products", "a b/c").unwrap();
        assert_eq!(url.as_str(), "http://search:9200/products/_doc/a%20b%2Fc");
    }
}
