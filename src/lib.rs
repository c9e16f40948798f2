pub mod api;
pub mod client;
pub mod config;
pub mod control;
pub mod dashboard;
pub mod db;
pub mod energy;
pub mod ingest;
pub mod mqtt;
pub mod seed;
pub mod store;
