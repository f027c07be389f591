//! ClientProxy (C4): a facade over one plugin instance, whichever transport
//! backs it.
//!
//! `Plugin` is the ABI lifecycle surface every plugin (in-process or
//! child-process) implements; `ClientProxy` wraps one `Arc<dyn Plugin>` with
//! per-operation timeouts and tainting: every call goes through
//! `tokio::time::timeout`, and a failed or timed-out call taints the
//! (member, objtype) pair so later stages in the same round are skipped.

pub mod child_process;
pub mod negotiation;

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{ErrorKind, OpenSyncError, Result};
use crate::types::{Change, ObjType};

/// Outcome of a connect call: whether the member's prior anchor still
/// matches, forcing slow-sync if not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
	Ok,
	SlowSync,
}

/// The plugin ABI lifecycle surface. One implementation per plugin;
/// `InProcessPlugin`-style callers hold an `Arc<dyn Plugin>` directly,
/// `child_process::ChildProcessPlugin` proxies the same calls over stdio.
#[async_trait]
pub trait Plugin: Send + Sync {
	/// ABI version this plugin was built against; the loader matches it
	/// against its own before `initialize` is ever called.
	fn get_version(&self) -> u32 {
		1
	}

	/// Whether this plugin declares a main sink receiving connect/disconnect
	/// for the whole member instead of per-objtype.
	fn has_main_sink(&self) -> bool {
		false
	}

	async fn initialize(&self) -> Result<()> {
		Ok(())
	}

	async fn main_connect(&self) -> Result<ConnectOutcome> {
		Err(OpenSyncError::new(ErrorKind::NotSupported, "plugin has no main sink"))
	}

	async fn main_disconnect(&self) -> Result<()> {
		Ok(())
	}

	async fn connect(&self, objtype: &ObjType) -> Result<ConnectOutcome>;

	async fn connect_done(&self, objtype: &ObjType, slow_sync: bool) -> Result<()>;

	async fn get_changes(&self, objtype: &ObjType, slow_sync: bool) -> Result<Vec<Change>>;

	async fn commit(&self, objtype: &ObjType, change: &Change) -> Result<()>;

	async fn committed_all(&self, objtype: &ObjType) -> Result<()> {
		let _ = objtype;
		Ok(())
	}

	async fn sync_done(&self, objtype: &ObjType) -> Result<()> {
		let _ = objtype;
		Ok(())
	}

	async fn disconnect(&self, objtype: &ObjType) -> Result<()>;

	async fn finalize(&self) -> Result<()> {
		Ok(())
	}
}

/// Per-operation RPC timeouts. Defaults are a generous 60s; tests use
/// [`Timeouts::fast`] (2-4s) so a genuinely hung call fails quickly.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
	pub connect: Duration,
	pub get_changes: Duration,
	pub commit: Duration,
	pub sync_done: Duration,
	pub disconnect: Duration,
}

impl Default for Timeouts {
	fn default() -> Self {
		Timeouts {
			connect: Duration::from_secs(60),
			get_changes: Duration::from_secs(60),
			commit: Duration::from_secs(60),
			sync_done: Duration::from_secs(60),
			disconnect: Duration::from_secs(60),
		}
	}
}

impl Timeouts {
	pub fn fast() -> Self {
		Timeouts {
			connect: Duration::from_secs(2),
			get_changes: Duration::from_secs(2),
			commit: Duration::from_secs(3),
			sync_done: Duration::from_secs(2),
			disconnect: Duration::from_secs(4),
		}
	}
}

/// Facade over one plugin instance. Owns the tainting state: once an
/// operation fails for an objtype, later stages for that (member, objtype)
/// are skipped, except `disconnect`, which always runs.
pub struct ClientProxy {
	pub plugin: std::sync::Arc<dyn Plugin>,
	pub timeouts: Timeouts,
	tainted: Mutex<HashSet<String>>,
}

impl ClientProxy {
	pub fn new(plugin: std::sync::Arc<dyn Plugin>, timeouts: Timeouts) -> Self {
		ClientProxy { plugin, timeouts, tainted: Mutex::new(HashSet::new()) }
	}

	pub fn is_tainted(&self, objtype: &ObjType) -> bool {
		self.tainted.lock().unwrap().contains(&objtype.0)
	}

	fn taint(&self, objtype: &ObjType) {
		self.tainted.lock().unwrap().insert(objtype.0.clone());
	}

	/// Mark `objtype` tainted before any round runs, e.g. after a failed ABI
	/// version negotiation during `EngineCore::initialize`.
	pub fn taint_for_init(&self, objtype: &ObjType) {
		self.taint(objtype);
	}

	async fn with_timeout<T, F>(&self, objtype: &ObjType, timeout: Duration, fut: F) -> Result<T>
	where
		F: std::future::Future<Output = Result<T>>,
	{
		if self.is_tainted(objtype) {
			return Err(OpenSyncError::new(
				ErrorKind::Disconnected,
				format!("member tainted for objtype {objtype}"),
			));
		}
		match tokio::time::timeout(timeout, fut).await {
			Ok(result) => {
				if result.is_err() {
					self.taint(objtype);
				}
				result
			}
			Err(_) => {
				let err = OpenSyncError::timeout(format!("operation on objtype {objtype} timed out"));
				self.taint(objtype);
				Err(err)
			}
		}
	}

	pub async fn connect(&self, objtype: &ObjType) -> Result<ConnectOutcome> {
		if self.plugin.has_main_sink() {
			return self.with_timeout(objtype, self.timeouts.connect, self.plugin.main_connect()).await;
		}
		self.with_timeout(objtype, self.timeouts.connect, self.plugin.connect(objtype)).await
	}

	pub async fn connect_done(&self, objtype: &ObjType, slow_sync: bool) -> Result<()> {
		self.with_timeout(objtype, self.timeouts.connect, self.plugin.connect_done(objtype, slow_sync)).await
	}

	pub async fn get_changes(&self, objtype: &ObjType, slow_sync: bool) -> Result<Vec<Change>> {
		self.with_timeout(objtype, self.timeouts.get_changes, self.plugin.get_changes(objtype, slow_sync)).await
	}

	pub async fn commit(&self, objtype: &ObjType, change: &Change) -> Result<()> {
		self.with_timeout(objtype, self.timeouts.commit, self.plugin.commit(objtype, change)).await
	}

	pub async fn committed_all(&self, objtype: &ObjType) -> Result<()> {
		self.with_timeout(objtype, self.timeouts.commit, self.plugin.committed_all(objtype)).await
	}

	pub async fn sync_done(&self, objtype: &ObjType) -> Result<()> {
		self.with_timeout(objtype, self.timeouts.sync_done, self.plugin.sync_done(objtype)).await
	}

	/// Always invoked, tainted or not, so the plugin can clean up.
	pub async fn disconnect(&self, objtype: &ObjType) -> Result<()> {
		let fut = if self.plugin.has_main_sink() {
			futures::future::Either::Left(self.plugin.main_disconnect())
		} else {
			futures::future::Either::Right(self.plugin.disconnect(objtype))
		};
		match tokio::time::timeout(self.timeouts.disconnect, fut).await {
			Ok(result) => result,
			Err(_) => Err(OpenSyncError::timeout(format!("disconnect on objtype {objtype} timed out"))),
		}
	}
}


// vim: ts=4
