pub mod analysis;
pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod fetch;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod schema;
pub mod sources;
pub mod truncate;
pub mod writer;
