mod filters;
mod migrations;
mod redb_store;
mod sql_store;
mod traits;

pub use filters::{NodeFilter, StorageStats};
pub use redb_store::RedbStore;
pub use sql_store::SqlStore;
pub use traits::{CreateNode, Store, UpdateNode};
