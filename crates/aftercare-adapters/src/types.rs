//! Request and response shapes of the external services.

use std::fmt;

use serde::{Deserialize, Serialize};

use aftercare_core::types::ImageRef;

use crate::error::ServiceError;

/// Order lookup result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderStatus {
    #[serde(alias = "orderId")]
    pub order_id: String,
    /// Shipping status, e.g. `in_transit`, `delivered`, `delayed`, `exception`.
    pub status: String,
    #[serde(default)]
    pub carrier: Option<String>,
    /// Human-readable ETA ("2 days") or an ISO date.
    #[serde(default)]
    pub eta: Option<String>,
    /// Order total, when the service reports it.
    #[serde(default)]
    pub total: Option<f64>,
    /// Main item of the order.
    #[serde(default)]
    pub item: Option<String>,
}

/// Image analysis result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DefectReport {
    /// Defect classification, `none` when the item looks fine.
    #[serde(alias = "defectType")]
    pub defect_type: String,
    pub confidence: f32,
}

impl DefectReport {
    pub fn is_defect(&self) -> bool {
        !matches!(self.defect_type.as_str(), "none" | "no_defect" | "")
    }
}

/// Which corpus a semantic query searches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexCollection {
    /// Catalogue items eligible as substitutes.
    Products,
    /// Return, refund and shipping policy snippets.
    Policies,
}

impl fmt::Display for IndexCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexCollection::Products => write!(f, "products"),
            IndexCollection::Policies => write!(f, "policies"),
        }
    }
}

/// Semantic index query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexQuery {
    pub text: String,
    pub k: usize,
    pub collection: IndexCollection,
}

/// One ranked index hit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexHit {
    #[serde(alias = "docId")]
    pub doc_id: String,
    pub score: f32,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl IndexHit {
    /// Display name from the payload (`name` or `title`), falling back to the doc id.
    pub fn title(&self) -> &str {
        self.payload
            .get("name")
            .or_else(|| self.payload.get("title"))
            .and_then(|v| v.as_str())
            .unwrap_or(&self.doc_id)
    }

    /// Body text from the payload, if any.
    pub fn text(&self) -> Option<&str> {
        self.payload.get("text").and_then(|v| v.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub order_id: String,
    /// `None` refunds the full order value as held by the payment service.
    pub amount: Option<f64>,
    pub reason: String,
    /// Same key for every attempt of one submission; lets the payment
    /// service drop duplicates.
    #[serde(default)]
    pub idempotency_key: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRequest {
    pub order_id: String,
    pub new_item_id: String,
    #[serde(default)]
    pub idempotency_key: String,
}

/// Refund or exchange submission result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(alias = "transactionId")]
    pub transaction_id: String,
    /// `approved`, `pending`, `processed`, `declined`, `rejected`.
    pub status: String,
    /// Order status after the transaction, when reported.
    #[serde(default, alias = "orderStatus")]
    pub order_status: Option<String>,
}

impl Transaction {
    pub fn is_rejected(&self) -> bool {
        matches!(self.status.as_str(), "declined" | "rejected" | "failed")
    }
}

/// One external call a handler needs.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceRequest {
    OrderStatus { order_id: String },
    AnalyzeImage { image: ImageRef },
    Query(IndexQuery),
    Refund(RefundRequest),
    Exchange(ExchangeRequest),
}

impl ServiceRequest {
    /// Name of the adapter serving this request.
    pub fn adapter(&self) -> &'static str {
        match self {
            ServiceRequest::OrderStatus { .. } => "order",
            ServiceRequest::AnalyzeImage { .. } => "image",
            ServiceRequest::Query(_) => "index",
            ServiceRequest::Refund(_) => "payments.refund",
            ServiceRequest::Exchange(_) => "payments.exchange",
        }
    }

    /// Whether an attempt that ran out of time may be sent again.
    ///
    /// A timed-out payment submission may still have been processed, so it
    /// is never repeated.
    pub fn retries_timeouts(&self) -> bool {
        !matches!(self, ServiceRequest::Refund(_) | ServiceRequest::Exchange(_))
    }
}

/// Successful payload of a call.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceResponse {
    Order(OrderStatus),
    Defect(DefectReport),
    Hits { hits: Vec<IndexHit> },
    Transaction(Transaction),
}

/// Where one call stands.
#[derive(Clone, Debug, PartialEq)]
pub enum CallStatus {
    Pending,
    Succeeded(ServiceResponse),
    Failed(ServiceError),
    TimedOut,
}

impl CallStatus {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, CallStatus::Pending)
    }

    pub fn label(&self) -> &'static str {
        match self {
            CallStatus::Pending => "pending",
            CallStatus::Succeeded(_) => "succeeded",
            CallStatus::Failed(_) => "failed",
            CallStatus::TimedOut => "timed_out",
        }
    }
}

/// Bookkeeping for one external call within a turn. Never persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct ExternalCallRecord {
    pub adapter: &'static str,
    pub request: ServiceRequest,
    pub status: CallStatus,
    pub attempts: u32,
    pub latency_ms: u64,
}

impl ExternalCallRecord {
    pub fn pending(request: ServiceRequest) -> Self {
        Self {
            adapter: request.adapter(),
            request,
            status: CallStatus::Pending,
            attempts: 0,
            latency_ms: 0,
        }
    }

    /// The successful response, if any.
    pub fn response(&self) -> Option<&ServiceResponse> {
        match &self.status {
            CallStatus::Succeeded(response) => Some(response),
            _ => None,
        }
    }

    /// True when the call ran out of time, per attempt or per turn.
    pub fn timed_out(&self) -> bool {
        matches!(
            self.status,
            CallStatus::TimedOut | CallStatus::Failed(ServiceError::Timeout(_))
        )
    }

    pub fn error(&self) -> Option<&ServiceError> {
        match &self.status {
            CallStatus::Failed(err) => Some(err),
            _ => None,
        }
    }
}
