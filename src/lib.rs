pub mod aggregate;
pub mod config;
pub mod error;
pub mod geo;
pub mod loader;
pub mod mapping;
pub mod model;
pub mod pipeline;
pub mod search;
pub mod store;
pub mod weights;
