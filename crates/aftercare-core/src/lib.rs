pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::AftercareConfig;
pub use error::{AftercareError, Result};
pub use store::SessionStore;
pub use types::*;
