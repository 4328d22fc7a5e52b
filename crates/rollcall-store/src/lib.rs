//! rollcall-store: SQLite persistence for enrolled identities and the
//! attendance log.

pub mod sqlite;

pub use sqlite::SqliteStore;
