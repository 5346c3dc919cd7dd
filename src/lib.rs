pub mod analysis;
pub mod builder;
pub mod classify;
pub mod config;
pub mod db;
pub mod ingest;
pub mod live;
pub mod logging;
pub mod model;
pub mod publish;
pub mod stations;
pub mod store;
