//! Core types for the vncgate gateway.
//!
//! This crate defines the data shared by the registry, the discovery engine,
//! the tunnel relay and the HTTP surface. It contains no business logic.

pub mod config;
pub mod error;
pub mod event;
pub mod target;
