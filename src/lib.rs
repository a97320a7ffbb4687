//! SensorVault library exports

pub mod backup;
pub mod cleaner;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod retention;
pub mod routes;
pub mod scheduler;
pub mod service;
pub mod state;
pub mod tasks;
