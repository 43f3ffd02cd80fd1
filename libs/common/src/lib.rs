//! Common library for the identity-resolution services
//!
//! This crate provides the functionality shared between the daemon and the
//! command-line front-end: the user record model, the embedded record store,
//! error types, and environment-based configuration.

pub mod config;
pub mod error;
pub mod models;
pub mod store;
