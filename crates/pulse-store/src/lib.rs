pub mod database;
pub mod error;
pub mod kv;
pub mod queue;
pub mod schema;
pub mod streams;

pub use database::Database;
pub use error::StoreError;
pub use kv::KvStore;
pub use queue::EventQueue;
pub use streams::StreamRegistry;
