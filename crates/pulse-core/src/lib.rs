pub mod errors;
pub mod keys;
pub mod remote;
pub mod security;
pub mod types;
