#![allow(dead_code)]

//! Engine configuration: timeouts, archive/lock paths, duplicate cap.
//!
//! One `#[serde(default)]` struct loadable from TOML or JSON5, falling back
//! to built-in defaults. This only covers what the engine itself needs to
//! run once members are already wired up; which member plugins exist and
//! how to reach them is the caller's concern, not this crate's.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::plugin::Timeouts;

/// Group-wide engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
	/// Directory holding the lock file and the Archive's redb file.
	pub state_dir: PathBuf,

	/// Per-operation RPC timeouts, in seconds; `0` uses the built-in default.
	pub connect_timeout_secs: u64,
	pub get_changes_timeout_secs: u64,
	pub commit_timeout_secs: u64,
	pub sync_done_timeout_secs: u64,
	pub disconnect_timeout_secs: u64,

	/// Cap on `-dupe` suffix attempts when duplicating a divergent entry
	/// (Open Question #3 in the design notes).
	pub duplicate_suffix_cap: usize,

	pub members: Vec<MemberConfig>,
}

impl Default for EngineConfig {
	fn default() -> Self {
		EngineConfig {
			state_dir: std::env::var("HOME")
				.ok()
				.map(|h| PathBuf::from(h).join(".opensync"))
				.unwrap_or_else(|| PathBuf::from(".opensync")),
			connect_timeout_secs: 60,
			get_changes_timeout_secs: 60,
			commit_timeout_secs: 60,
			sync_done_timeout_secs: 60,
			disconnect_timeout_secs: 60,
			duplicate_suffix_cap: 32,
			members: Vec::new(),
		}
	}
}

impl EngineConfig {
	pub fn timeouts(&self) -> Timeouts {
		let or_default = |secs: u64, default: Duration| {
			if secs == 0 {
				default
			} else {
				Duration::from_secs(secs)
			}
		};
		let defaults = Timeouts::default();
		Timeouts {
			connect: or_default(self.connect_timeout_secs, defaults.connect),
			get_changes: or_default(self.get_changes_timeout_secs, defaults.get_changes),
			commit: or_default(self.commit_timeout_secs, defaults.commit),
			sync_done: or_default(self.sync_done_timeout_secs, defaults.sync_done),
			disconnect: or_default(self.disconnect_timeout_secs, defaults.disconnect),
		}
	}

	pub fn from_toml_str(s: &str) -> crate::error::Result<Self> {
		toml::from_str(s)
			.map_err(|e| crate::error::OpenSyncError::new(crate::error::ErrorKind::Misconfiguration, e.to_string()))
	}

	pub fn from_json5_str(s: &str) -> crate::error::Result<Self> {
		json5::from_str(s)
			.map_err(|e| crate::error::OpenSyncError::new(crate::error::ErrorKind::Misconfiguration, e.to_string()))
	}
}

/// One member's static configuration: how to reach its plugin and which
/// objtypes it participates in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MemberConfig {
	pub id: u32,
	pub name: String,
	/// Path to the plugin binary, for child-process plugins. Empty for
	/// in-process plugins registered programmatically.
	pub plugin_path: Option<PathBuf>,
	pub plugin_args: Vec<String>,
	pub objtypes: Vec<String>,
}

impl Default for MemberConfig {
	fn default() -> Self {
		MemberConfig { id: 0, name: String::new(), plugin_path: None, plugin_args: Vec::new(), objtypes: Vec::new() }
	}
}


// vim: ts=4
