pub mod database;
pub mod error;
pub mod hub;
pub mod memory;
pub mod row_helpers;
pub mod schema;
pub mod sqlite;

pub use database::Database;
pub use hub::ChangeHub;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
