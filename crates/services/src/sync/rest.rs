//! PostgREST-style HTTP adapter for [`RemoteStore`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde_json::Value;
use tracing::instrument;

use super::remote::{EqFilter, RemoteStore};
use crate::config::RemoteEndpoint;
use crate::error::RemoteError;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const REST_PREFIX: &str = "rest/v1";

/// Talks to `{base_url}/rest/v1/{table}` with `apikey` and bearer headers.
#[derive(Clone)]
pub struct RestRemoteStore {
    base_url: Url,
    api_key: String,
    client: Client,
}

impl RestRemoteStore {
    /// # Errors
    ///
    /// Returns `RemoteError::Network` if the HTTP client cannot be built.
    pub fn new(endpoint: &RemoteEndpoint) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            base_url: endpoint.base_url.clone(),
            api_key: endpoint.api_key.clone(),
            client,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!(
            "{}/{REST_PREFIX}/{table}",
            self.base_url.as_str().trim_end_matches('/')
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }
}

async fn check(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(RemoteError::Unauthorized(status));
    }
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::Status { status, body })
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn upsert(
        &self,
        table: &str,
        conflict_key: &str,
        rows: &[Value],
    ) -> Result<(), RemoteError> {
        let request = self
            .client
            .post(self.table_url(table))
            .query(&[("on_conflict", conflict_key)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(rows);
        check(self.authorize(request).send().await?).await?;
        Ok(())
    }

    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn insert(&self, table: &str, rows: &[Value]) -> Result<(), RemoteError> {
        let request = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=minimal")
            .json(rows);
        check(self.authorize(request).send().await?).await?;
        Ok(())
    }

    #[instrument(skip(self, filters))]
    async fn query(
        &self,
        table: &str,
        filters: &[EqFilter<'_>],
    ) -> Result<Vec<Value>, RemoteError> {
        let params: Vec<(&str, String)> = std::iter::once(("select", "*".to_owned()))
            .chain(filters.iter().map(|(column, value)| (*column, format!("eq.{value}"))))
            .collect();
        let request = self.client.get(self.table_url(table)).query(&params);
        let response = check(self.authorize(request).send().await?).await?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> RestRemoteStore {
        RestRemoteStore::new(&RemoteEndpoint {
            base_url: Url::parse(&server.uri()).unwrap(),
            api_key: "test-key".into(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn upsert_sends_conflict_key_and_merge_preference() {
        let server = MockServer::start().await;
        let rows = vec![json!({"user_id": "u", "fact_id": "f", "correct_count": 2})];

        Mock::given(method("POST"))
            .and(path("/rest/v1/user_facts"))
            .and(query_param("on_conflict", "user_id,fact_id"))
            .and(header("apikey", "test-key"))
            .and(header("authorization", "Bearer test-key"))
            .and(header("prefer", "resolution=merge-duplicates,return=minimal"))
            .and(body_json(&rows))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        store(&server)
            .upsert("user_facts", "user_id,fact_id", &rows)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn insert_posts_rows() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/sessions"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        store(&server)
            .insert("sessions", &[json!({"id": "s"})])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn query_uses_eq_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/user_facts"))
            .and(query_param("user_id", "eq.abc"))
            .and(query_param("select", "*"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"fact_id": "f"}])))
            .mount(&server)
            .await;

        let rows = store(&server)
            .query("user_facts", &[("user_id", "abc".into())])
            .await
            .unwrap();
        assert_eq!(rows, vec![json!({"fact_id": "f"})]);
    }

    #[tokio::test]
    async fn maps_auth_and_server_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/facts"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/sessions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let store = store(&server);
        let err = store.upsert("facts", "id", &[]).await.unwrap_err();
        assert!(matches!(err, RemoteError::Unauthorized(StatusCode::UNAUTHORIZED)));

        let err = store.insert("sessions", &[]).await.unwrap_err();
        match err {
            RemoteError::Status { status, body } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body, "maintenance");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
