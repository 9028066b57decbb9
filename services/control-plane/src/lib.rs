//! zonefleet control plane library.
//!
//! This crate primarily ships a `control-plane` binary, but we expose a small
//! library surface to enable integration testing and reuse.

pub mod config;
pub mod db;
pub mod lifecycle;
pub mod models;
pub mod node;
pub mod placement;
pub mod reconciler;
pub mod repository;
pub mod scheduler;
pub mod state;
