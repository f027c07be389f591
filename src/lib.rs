//! # OpenSync engine
//!
//! An n-way synchronization engine for groups of members (devices, address
//! books, calendars, ...) connected through plugins. A group's objects are
//! organized by objtype; each objtype's members are kept converged across
//! rounds by mapping matching entries together, converting between member
//! formats as needed, and resolving what can't be merged automatically
//! through a conflict callback.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use opensync_engine::{EngineConfig, EngineCore, FormatEnv, MemberId, ObjType};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> opensync_engine::Result<()> {
//!     let config = EngineConfig::default();
//!     let env = FormatEnv::new();
//!     let mut engine = EngineCore::new(config, env);
//!     engine.register_member(MemberId(0), vec![ObjType("contact".into())], my_plugin_a);
//!     engine.register_member(MemberId(1), vec![ObjType("contact".into())], my_plugin_b);
//!     engine.initialize().await?;
//!     engine.synchronize_and_block().await?;
//!     engine.finalize().await
//! }
//! ```

#![deny(unsafe_code)]
#![warn(dead_code)]

pub mod archive;
pub mod callbacks;
pub mod change_mapper;
pub mod config;
pub mod engine_core;
pub mod error;
pub mod format_env;
pub mod hashtable;
pub mod logging;
pub mod obj_engine;
pub mod plugin;
pub mod types;

// Re-export commonly used types and functions
pub use archive::{Archive, MappingTable};
pub use callbacks::{EngineCallbacks, NoCallbacks, StatusEvent};
pub use config::{EngineConfig, MemberConfig};
pub use engine_core::EngineCore;
pub use error::{ErrorKind, OpenSyncError, Result};
pub use format_env::FormatEnv;
pub use hashtable::Hashtable;
pub use obj_engine::{ConflictResolution, ObjEngine, ObjEngineOutcome};
pub use plugin::{ClientProxy, Plugin, Timeouts};
pub use types::{Change, ChangeType, Mapping, MappingEntry, MemberId, ObjType};

// vim: ts=4
