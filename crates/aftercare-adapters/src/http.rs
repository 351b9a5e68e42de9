//! reqwest clients for the four external services.
//!
//! Wire contract:
//! - order: `GET {base}/orders/{id}` → `OrderStatus`
//! - image: `POST {base}/analyze` with `{"image_base64"}` → `DefectReport`
//! - index: `POST {base}/query` with `IndexQuery` → `{"results": [IndexHit]}`
//! - payments: `POST {base}/refunds` / `POST {base}/exchanges` → `Transaction`

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::ServiceError;
use crate::service::{ImageAnalysisService, OrderService, PaymentService, SemanticIndex};
use crate::types::{
    DefectReport, ExchangeRequest, IndexHit, IndexQuery, OrderStatus, RefundRequest, Transaction,
};

const IDEMPOTENCY_KEY: &str = "Idempotency-Key";

/// Shared plumbing: base URL plus a pooled client.
#[derive(Clone)]
struct Endpoint {
    client: reqwest::Client,
    base_url: String,
}

impl Endpoint {
    fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ServiceError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status(status.as_u16(), body));
        }
        Ok(response.json::<T>().await?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ServiceError> {
        let url = self.url(path);
        debug!(url = %url, "GET");
        let response = self.client.get(&url).send().await?;
        Self::decode(response).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ServiceError> {
        self.post_keyed(path, body, None).await
    }

    /// POST with an optional `Idempotency-Key` header.
    async fn post_keyed<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
        idempotency_key: Option<&str>,
    ) -> Result<T, ServiceError> {
        let url = self.url(path);
        debug!(url = %url, "POST");
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = idempotency_key.filter(|k| !k.is_empty()) {
            request = request.header(IDEMPOTENCY_KEY, key);
        }
        let response = request.send().await?;
        Self::decode(response).await
    }
}

pub struct HttpOrderService {
    endpoint: Endpoint,
}

impl HttpOrderService {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            endpoint: Endpoint::new(client, base_url),
        }
    }
}

#[async_trait]
impl OrderService for HttpOrderService {
    async fn get_order_status(&self, order_id: &str) -> Result<OrderStatus, ServiceError> {
        if order_id.is_empty() || !order_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ServiceError::NotFound(format!("Invalid order id: {}", order_id)));
        }
        self.endpoint.get(&format!("orders/{}", order_id)).await
    }
}

pub struct HttpImageAnalysisService {
    endpoint: Endpoint,
}

impl HttpImageAnalysisService {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            endpoint: Endpoint::new(client, base_url),
        }
    }
}

#[async_trait]
impl ImageAnalysisService for HttpImageAnalysisService {
    async fn analyze_image(&self, bytes: &[u8]) -> Result<DefectReport, ServiceError> {
        let body = json!({ "image_base64": STANDARD.encode(bytes) });
        self.endpoint.post("analyze", &body).await
    }
}

pub struct HttpSemanticIndex {
    endpoint: Endpoint,
}

impl HttpSemanticIndex {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            endpoint: Endpoint::new(client, base_url),
        }
    }
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<IndexHit>,
}

#[async_trait]
impl SemanticIndex for HttpSemanticIndex {
    async fn query(&self, query: &IndexQuery) -> Result<Vec<IndexHit>, ServiceError> {
        let body = serde_json::to_value(query)
            .map_err(|e| ServiceError::Permanent(format!("Cannot encode query: {}", e)))?;
        let response: QueryResponse = self.endpoint.post("query", &body).await?;
        let mut hits = response.results;
        hits.truncate(query.k);
        Ok(hits)
    }
}

pub struct HttpPaymentService {
    endpoint: Endpoint,
}

impl HttpPaymentService {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            endpoint: Endpoint::new(client, base_url),
        }
    }
}

#[async_trait]
impl PaymentService for HttpPaymentService {
    async fn submit_refund(&self, request: &RefundRequest) -> Result<Transaction, ServiceError> {
        let body = json!({
            "order_id": request.order_id,
            "amount": request.amount,
            "reason": request.reason,
        });
        self.endpoint
            .post_keyed("refunds", &body, Some(&request.idempotency_key))
            .await
    }

    async fn submit_exchange(
        &self,
        request: &ExchangeRequest,
    ) -> Result<Transaction, ServiceError> {
        let body = json!({
            "order_id": request.order_id,
            "new_item_id": request.new_item_id,
        });
        self.endpoint
            .post_keyed("exchanges", &body, Some(&request.idempotency_key))
            .await
    }
}
