//! Contracts of the outsourced services.
//!
//! Implementations only shape requests; timeout and retry live in
//! [`crate::retry::CallPolicy`] and are applied by [`crate::ServiceAdapters`].

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::types::{
    DefectReport, ExchangeRequest, IndexHit, IndexQuery, OrderStatus, RefundRequest, Transaction,
};

#[async_trait]
pub trait OrderService: Send + Sync {
    /// Look up an order. Unknown ids yield `ServiceError::NotFound`.
    async fn get_order_status(&self, order_id: &str) -> Result<OrderStatus, ServiceError>;
}

#[async_trait]
pub trait ImageAnalysisService: Send + Sync {
    /// Classify a defect in raw image bytes. Unreadable images yield `Unprocessable`.
    async fn analyze_image(&self, bytes: &[u8]) -> Result<DefectReport, ServiceError>;
}

#[async_trait]
pub trait SemanticIndex: Send + Sync {
    /// Ranked hits, best first, at most `query.k`.
    async fn query(&self, query: &IndexQuery) -> Result<Vec<IndexHit>, ServiceError>;
}

#[async_trait]
pub trait PaymentService: Send + Sync {
    async fn submit_refund(&self, request: &RefundRequest) -> Result<Transaction, ServiceError>;

    async fn submit_exchange(&self, request: &ExchangeRequest)
        -> Result<Transaction, ServiceError>;
}
