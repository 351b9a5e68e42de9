pub mod db;
pub mod migrations;
pub mod repository;
pub mod store;

pub use db::Database;
pub use repository::SessionRepository;
pub use store::{MemorySessionStore, SqliteSessionStore};
