//! In-process services with scripted answers, for tests and `--demo` runs.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::adapters::ServiceAdapters;
use crate::error::ServiceError;
use crate::retry::CallPolicy;
use crate::service::{ImageAnalysisService, OrderService, PaymentService, SemanticIndex};
use crate::types::{
    DefectReport, ExchangeRequest, IndexCollection, IndexHit, IndexQuery, OrderStatus,
    RefundRequest, Transaction,
};

type Scripted<T> = Mutex<VecDeque<Result<T, ServiceError>>>;

/// Implements every service contract from in-memory fixtures.
///
/// Queued results are consumed first; once a queue is empty the service
/// falls back to its fixture (or a default approval for payments).
#[derive(Default)]
pub struct ScriptedServices {
    orders: Mutex<HashMap<String, OrderStatus>>,
    order_script: Scripted<OrderStatus>,
    defect: Mutex<Option<DefectReport>>,
    defect_script: Scripted<DefectReport>,
    documents: Mutex<Vec<(IndexCollection, IndexHit)>>,
    refund_script: Scripted<Transaction>,
    exchange_script: Scripted<Transaction>,
    delays: Mutex<HashMap<&'static str, Duration>>,
    refunds: AtomicU32,
    refund_keys: Mutex<Vec<String>>,
    exchanges: AtomicU32,
    order_lookups: AtomicU32,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_order(self, order: OrderStatus) -> Self {
        lock(&self.orders).insert(order.order_id.clone(), order);
        self
    }

    pub fn with_defect(self, defect_type: &str, confidence: f32) -> Self {
        *lock(&self.defect) = Some(DefectReport {
            defect_type: defect_type.to_string(),
            confidence,
        });
        self
    }

    pub fn with_document(self, collection: IndexCollection, hit: IndexHit) -> Self {
        lock(&self.documents).push((collection, hit));
        self
    }

    /// Delay every call to `adapter` (`order`, `image`, `index`, `payments`).
    pub fn with_delay(self, adapter: &'static str, delay: Duration) -> Self {
        lock(&self.delays).insert(adapter, delay);
        self
    }

    pub fn push_order(&self, result: Result<OrderStatus, ServiceError>) {
        lock(&self.order_script).push_back(result);
    }

    pub fn push_defect(&self, result: Result<DefectReport, ServiceError>) {
        lock(&self.defect_script).push_back(result);
    }

    pub fn push_refund(&self, result: Result<Transaction, ServiceError>) {
        lock(&self.refund_script).push_back(result);
    }

    pub fn push_exchange(&self, result: Result<Transaction, ServiceError>) {
        lock(&self.exchange_script).push_back(result);
    }

    /// Refund submissions received, including failed ones.
    pub fn refund_count(&self) -> u32 {
        self.refunds.load(Ordering::SeqCst)
    }

    /// Idempotency keys of refund submissions, in arrival order.
    pub fn refund_keys(&self) -> Vec<String> {
        lock(&self.refund_keys).clone()
    }

    pub fn exchange_count(&self) -> u32 {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub fn order_lookup_count(&self) -> u32 {
        self.order_lookups.load(Ordering::SeqCst)
    }

    /// Wire these services into a `ServiceAdapters`.
    pub fn adapters(self: &Arc<Self>, policy: CallPolicy) -> ServiceAdapters {
        ServiceAdapters::new(
            self.clone(),
            self.clone(),
            self.clone(),
            self.clone(),
            policy,
        )
    }

    /// A small catalogue and policy set for demo runs.
    pub fn demo() -> Self {
        use serde_json::json;

        let hit = |id: &str, score: f32, payload: serde_json::Value| IndexHit {
            doc_id: id.to_string(),
            score,
            payload,
        };

        Self::new()
            .with_order(OrderStatus {
                order_id: "123".into(),
                status: "in_transit".into(),
                carrier: Some("UPS".into()),
                eta: Some("2 days".into()),
                total: Some(39.99),
                item: Some("Classic Cotton Shirt".into()),
            })
            .with_order(OrderStatus {
                order_id: "456".into(),
                status: "delayed".into(),
                carrier: Some("FedEx".into()),
                eta: Some("5 days".into()),
                total: Some(129.0),
                item: Some("Running Shoes".into()),
            })
            .with_defect("tear", 0.92)
            .with_document(
                IndexCollection::Products,
                hit("sku-shirt-blue", 0.91, json!({"name": "Classic Cotton Shirt (Blue)"})),
            )
            .with_document(
                IndexCollection::Products,
                hit("sku-shirt-white", 0.86, json!({"name": "Classic Cotton Shirt (White)"})),
            )
            .with_document(
                IndexCollection::Products,
                hit("sku-polo", 0.72, json!({"name": "Pique Polo"})),
            )
            .with_document(
                IndexCollection::Policies,
                hit(
                    "policy-returns",
                    0.88,
                    json!({"title": "Returns", "text": "Items can be returned within 30 days of delivery for a full refund."}),
                ),
            )
            .with_document(
                IndexCollection::Policies,
                hit(
                    "policy-shipping",
                    0.81,
                    json!({"title": "Shipping", "text": "Standard shipping takes 3 to 5 business days."}),
                ),
            )
    }

    async fn pause(&self, adapter: &'static str) {
        let delay = lock(&self.delays).get(adapter).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl OrderService for ScriptedServices {
    async fn get_order_status(&self, order_id: &str) -> Result<OrderStatus, ServiceError> {
        self.order_lookups.fetch_add(1, Ordering::SeqCst);
        self.pause("order").await;
        if let Some(result) = lock(&self.order_script).pop_front() {
            return result;
        }
        lock(&self.orders)
            .get(order_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("order {}", order_id)))
    }
}

#[async_trait]
impl ImageAnalysisService for ScriptedServices {
    async fn analyze_image(&self, bytes: &[u8]) -> Result<DefectReport, ServiceError> {
        self.pause("image").await;
        if let Some(result) = lock(&self.defect_script).pop_front() {
            return result;
        }
        if bytes.is_empty() {
            return Err(ServiceError::Unprocessable("empty image".into()));
        }
        lock(&self.defect)
            .clone()
            .ok_or_else(|| ServiceError::Unprocessable("no defect model loaded".into()))
    }
}

#[async_trait]
impl SemanticIndex for ScriptedServices {
    async fn query(&self, query: &IndexQuery) -> Result<Vec<IndexHit>, ServiceError> {
        self.pause("index").await;
        let mut hits: Vec<IndexHit> = lock(&self.documents)
            .iter()
            .filter(|(collection, _)| *collection == query.collection)
            .map(|(_, hit)| hit.clone())
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(query.k);
        Ok(hits)
    }
}

#[async_trait]
impl PaymentService for ScriptedServices {
    async fn submit_refund(&self, request: &RefundRequest) -> Result<Transaction, ServiceError> {
        let n = self.refunds.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.refund_keys).push(request.idempotency_key.clone());
        self.pause("payments").await;
        if let Some(result) = lock(&self.refund_script).pop_front() {
            return result;
        }
        Ok(Transaction {
            transaction_id: format!("RF-{}-{}", request.order_id, n),
            status: "approved".into(),
            order_status: Some("refund_pending".into()),
        })
    }

    async fn submit_exchange(
        &self,
        request: &ExchangeRequest,
    ) -> Result<Transaction, ServiceError> {
        let n = self.exchanges.fetch_add(1, Ordering::SeqCst) + 1;
        self.pause("payments").await;
        if let Some(result) = lock(&self.exchange_script).pop_front() {
            return result;
        }
        Ok(Transaction {
            transaction_id: format!("EX-{}-{}", request.order_id, n),
            status: "approved".into(),
            order_status: Some("exchange_pending".into()),
        })
    }
}
