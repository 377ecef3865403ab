// Database module
// Lakehouse branches and the published vector store live in LanceDB; the
// SQLite catalog records which physical table each collection alias points at

pub mod lakehouse;
pub mod lancedb;
pub mod sqlite;

pub use sqlite::Catalog;
