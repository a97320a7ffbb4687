//! HTTP route handlers

pub mod cleanup;
pub mod health;
