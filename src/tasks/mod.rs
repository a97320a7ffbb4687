//! Background tasks

pub mod cleanup;
