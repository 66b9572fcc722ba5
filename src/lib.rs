pub mod common;
pub mod config;
pub mod errors;
pub mod model;
pub mod object_store;
pub mod store;
