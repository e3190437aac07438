pub mod config;
pub mod engine;
pub mod models;
pub mod options;
pub mod query;
pub mod report;
pub mod store;

pub mod api;
pub mod assist;
pub mod auth;
