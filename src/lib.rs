// Library for tests to access modules

pub mod aggregation_worker;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod models;
pub mod registry;
pub mod routes;
pub mod store;
pub mod time_grid;
pub mod version;
