//! CNI meta-plugin shim for default gateway management
//!
//! This crate implements the core of a meta-plugin that:
//! - Enters container network namespaces to add or remove default routes
//! - Keeps the per-attachment cached CNI result in sync with those routes
//! - Understands every historical result schema (cniVersion 0.1.0 - 1.0.0)
//! - Exposes the standard ADD/DEL/CHECK/GC/STATUS/VERSION command surface

pub mod cache;
pub mod commands;
pub mod config;
pub mod netns;
pub mod types;

// Re-export commonly used items
pub use cache::{add_default_gw_cache, delete_default_gw_cache, CacheError};
pub use commands::{cmd_add, cmd_check, cmd_del, run_cni};
pub use config::NetConf;
pub use netns::{delete_default_gw, set_default_gw};
