/// Row types exchanged with the record store.
pub mod models;
/// Record store abstraction and its backends.
pub mod record_store;
/// Backend-agnostic storage errors.
pub mod storage;
