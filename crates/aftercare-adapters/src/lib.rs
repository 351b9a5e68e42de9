pub mod adapters;
pub mod error;
pub mod http;
pub mod image;
pub mod retry;
pub mod scripted;
pub mod service;
pub mod types;

pub use adapters::ServiceAdapters;
pub use error::ServiceError;
pub use retry::CallPolicy;
pub use scripted::ScriptedServices;
pub use service::{ImageAnalysisService, OrderService, PaymentService, SemanticIndex};
pub use types::*;
