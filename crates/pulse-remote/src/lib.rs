pub mod http;
pub mod mock;

pub use http::{HttpConnector, HttpRemote};
pub use mock::{InsertOutcome, MockConnector, MockRemote};
