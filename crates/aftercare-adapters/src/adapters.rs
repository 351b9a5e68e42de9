//! The single entry point handlers' calls go through.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use aftercare_core::config::ServicesConfig;
use aftercare_core::error::AftercareError;
use aftercare_core::types::ImageRef;

use crate::error::ServiceError;
use crate::http::{HttpImageAnalysisService, HttpOrderService, HttpPaymentService, HttpSemanticIndex};
use crate::image::ImageLoader;
use crate::retry::CallPolicy;
use crate::service::{ImageAnalysisService, OrderService, PaymentService, SemanticIndex};
use crate::types::{CallStatus, ExternalCallRecord, ServiceRequest, ServiceResponse};

/// The four service clients plus the policy every call runs under.
#[derive(Clone)]
pub struct ServiceAdapters {
    pub orders: Arc<dyn OrderService>,
    pub images: Arc<dyn ImageAnalysisService>,
    pub index: Arc<dyn SemanticIndex>,
    pub payments: Arc<dyn PaymentService>,
    loader: ImageLoader,
    policy: CallPolicy,
}

impl ServiceAdapters {
    pub fn new(
        orders: Arc<dyn OrderService>,
        images: Arc<dyn ImageAnalysisService>,
        index: Arc<dyn SemanticIndex>,
        payments: Arc<dyn PaymentService>,
        policy: CallPolicy,
    ) -> Self {
        Self {
            orders,
            images,
            index,
            payments,
            loader: ImageLoader::default(),
            policy,
        }
    }

    /// Build HTTP-backed adapters from configured endpoints.
    pub fn from_config(services: &ServicesConfig, policy: CallPolicy) -> Result<Self, AftercareError> {
        let missing = |name: &str| AftercareError::Config(format!("services.{} is not set", name));
        let order_url = services.order_url.as_deref().ok_or_else(|| missing("order_url"))?;
        let image_url = services.image_url.as_deref().ok_or_else(|| missing("image_url"))?;
        let index_url = services.index_url.as_deref().ok_or_else(|| missing("index_url"))?;
        let payments_url = services
            .payments_url
            .as_deref()
            .ok_or_else(|| missing("payments_url"))?;

        let build_error =
            |e: reqwest::Error| AftercareError::Config(format!("Failed to build HTTP client: {}", e));
        let client = reqwest::Client::builder()
            .timeout(policy.call_timeout)
            .build()
            .map_err(build_error)?;
        // Redirects could leave the allowed upload hosts.
        let image_client = reqwest::Client::builder()
            .timeout(policy.call_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(build_error)?;

        let mut adapters = Self::new(
            Arc::new(HttpOrderService::new(client.clone(), order_url)),
            Arc::new(HttpImageAnalysisService::new(client.clone(), image_url)),
            Arc::new(HttpSemanticIndex::new(client.clone(), index_url)),
            Arc::new(HttpPaymentService::new(client.clone(), payments_url)),
            policy,
        );
        adapters.loader = ImageLoader::new(
            image_client,
            services.image_hosts.clone(),
            services.max_image_bytes,
        );
        Ok(adapters)
    }

    /// Validate an image reference before any turn work starts.
    pub fn check_image(&self, image: &ImageRef) -> Result<(), ServiceError> {
        self.loader.check(image)
    }

    pub fn policy(&self) -> &CallPolicy {
        &self.policy
    }

    /// Run one request under the call policy and record how it went.
    pub async fn execute(&self, request: ServiceRequest) -> ExternalCallRecord {
        let adapter = request.adapter();
        let started = Instant::now();

        let (result, attempts) = self
            .policy
            .run_with(adapter, request.retries_timeouts(), || self.call_once(&request))
            .await;

        let latency_ms = started.elapsed().as_millis() as u64;
        let status = match result {
            Ok(response) => CallStatus::Succeeded(response),
            Err(ServiceError::Timeout(_)) => CallStatus::TimedOut,
            Err(err) => CallStatus::Failed(err),
        };

        match &status {
            CallStatus::Succeeded(_) => {
                debug!(adapter, attempts, latency_ms, "External call succeeded")
            }
            other => warn!(
                adapter,
                attempts,
                latency_ms,
                status = other.label(),
                "External call did not succeed"
            ),
        }

        ExternalCallRecord {
            adapter,
            request,
            status,
            attempts,
            latency_ms,
        }
    }

    async fn call_once(&self, request: &ServiceRequest) -> Result<ServiceResponse, ServiceError> {
        match request {
            ServiceRequest::OrderStatus { order_id } => self
                .orders
                .get_order_status(order_id)
                .await
                .map(ServiceResponse::Order),
            ServiceRequest::AnalyzeImage { image } => {
                let bytes = self.loader.load(image).await?;
                self.images
                    .analyze_image(&bytes)
                    .await
                    .map(ServiceResponse::Defect)
            }
            ServiceRequest::Query(query) => self
                .index
                .query(query)
                .await
                .map(|hits| ServiceResponse::Hits { hits }),
            ServiceRequest::Refund(refund) => self
                .payments
                .submit_refund(refund)
                .await
                .map(ServiceResponse::Transaction),
            ServiceRequest::Exchange(exchange) => self
                .payments
                .submit_exchange(exchange)
                .await
                .map(ServiceResponse::Transaction),
        }
    }
}
