pub mod api;
pub mod config;
pub mod control;
pub mod db;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod query;
pub mod sensors;
pub mod store;
pub mod timefmt;
