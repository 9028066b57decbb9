//! # zonefleet-id
//!
//! Typed identifiers for the resources zonefleet schedules.
//!
//! Every identifier renders as `{prefix}_{ulid}`:
//!
//! - `node_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `zone_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//! - `svc_01HV4Z4NYPLTRS0JTUA8XDME5F`
//!
//! A zone's identifier doubles as its zone name on the node and as the last
//! component of its storage path, so the rendered form only ever contains
//! ASCII alphanumerics and a single underscore.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
