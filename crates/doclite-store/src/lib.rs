//! doclite-store - SQLite-backed document collections
//!
//! Collections of opaque JSON documents over a relational engine:
//! trigger-maintained array indexes, Mongo-style queries and updates
//! compiled to parameterized SQL, and savepoint-scoped transactions.

mod array_index;
mod catalog;
mod sqlite;

pub mod collection;
pub mod cursor;
pub mod store;

pub use collection::Collection;
pub use cursor::Cursor;
pub use store::Store;
