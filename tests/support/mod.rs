//! Shared test fixtures: an in-process plugin standing in for a real member,
//! and the "plain" object format it reports changes in.
//!
//! Grounded in the original project's `tests/mock-plugin/mock_sync.c`: a
//! plugin backed by an in-memory store instead of a directory, with the
//! same error-injection-by-flag approach (there: environment variables
//! keyed by member id; here: fields set before the round runs) so a test
//! can force a CONNECT_ERROR/CONNECT_TIMEOUT/commit failure on demand.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use opensync_engine::{Change, ChangeType, ClientProxy, ObjType, Plugin, Result};
use opensync_engine::format_env::{FormatEnv, ObjectFormatOps};
use opensync_engine::plugin::ConnectOutcome;
use opensync_engine::types::{CompareResult, FormatName, Uid};

pub const OBJTYPE: &str = "file";
pub const FORMAT: &str = "plain";

/// Byte-equality comparison, content hashed with blake3 via the default
/// `create_hash` implementation.
pub struct PlainFormat;

impl ObjectFormatOps for PlainFormat {
	fn compare(&self, a: &Change, b: &Change) -> CompareResult {
		if a.data == b.data {
			CompareResult::Same
		} else {
			CompareResult::Different
		}
	}

	fn duplicate(&self, uid: &Uid) -> Uid {
		Uid(format!("{}-dupe", uid.0))
	}
}

/// A [`FormatEnv`] with `PlainFormat` registered under [`OBJTYPE`]/[`FORMAT`],
/// the shape every test in this crate needs.
pub fn plain_env() -> FormatEnv {
	let mut env = FormatEnv::new();
	env.register_format(FormatName(FORMAT.into()), ObjType(OBJTYPE.into()), std::sync::Arc::new(PlainFormat));
	env
}

pub fn objtype() -> ObjType {
	ObjType(OBJTYPE.into())
}

fn hash(data: &[u8]) -> String {
	blake3::hash(data).to_hex().to_string()
}

/// An in-process plugin backed by a `uid -> bytes` map. `get_changes`
/// reports every entry currently in the store; the engine's own hashtable
/// does the ADDED/MODIFIED/UNMODIFIED/DELETED classification.
pub struct MockPlugin {
	store: Mutex<HashMap<Uid, Vec<u8>>>,
	pub fail_connect: bool,
	pub fail_commit: bool,
	pub force_slow_sync: bool,
	/// CONNECT_TIMEOUT equivalent: never resolves connect within this delay,
	/// so the caller's `ClientProxy` timeout trips instead.
	pub connect_delay: Option<std::time::Duration>,
	/// ABI version this plugin claims to speak; defaults to 1 (supported).
	pub version: u32,
}

impl MockPlugin {
	pub fn new() -> Self {
		MockPlugin {
			store: Mutex::new(HashMap::new()),
			fail_connect: false,
			fail_commit: false,
			force_slow_sync: false,
			version: 1,
			connect_delay: None,
		}
	}

	pub fn with_entry(uid: &str, data: &[u8]) -> Self {
		let plugin = MockPlugin::new();
		plugin.store.lock().unwrap().insert(Uid(uid.into()), data.to_vec());
		plugin
	}

	pub fn put(&self, uid: &str, data: &[u8]) {
		self.store.lock().unwrap().insert(Uid(uid.into()), data.to_vec());
	}

	pub fn remove(&self, uid: &str) {
		self.store.lock().unwrap().remove(&Uid(uid.into()));
	}

	pub fn contains(&self, uid: &str) -> bool {
		self.store.lock().unwrap().contains_key(&Uid(uid.into()))
	}

	pub fn get(&self, uid: &str) -> Option<Vec<u8>> {
		self.store.lock().unwrap().get(&Uid(uid.into())).cloned()
	}

	pub fn snapshot(&self) -> HashMap<Uid, Vec<u8>> {
		self.store.lock().unwrap().clone()
	}
}

#[async_trait]
impl Plugin for MockPlugin {
	fn get_version(&self) -> u32 {
		self.version
	}

	async fn connect(&self, _objtype: &ObjType) -> Result<ConnectOutcome> {
		if let Some(delay) = self.connect_delay {
			tokio::time::sleep(delay).await;
		}
		if self.fail_connect {
			return Err(opensync_engine::OpenSyncError::new(
				opensync_engine::ErrorKind::NoConnection,
				"CONNECT_ERROR",
			));
		}
		if self.force_slow_sync {
			return Ok(ConnectOutcome::SlowSync);
		}
		Ok(ConnectOutcome::Ok)
	}

	async fn connect_done(&self, _objtype: &ObjType, _slow_sync: bool) -> Result<()> {
		Ok(())
	}

	async fn get_changes(&self, objtype: &ObjType, _slow_sync: bool) -> Result<Vec<Change>> {
		let store = self.store.lock().unwrap();
		Ok(store
			.iter()
			.map(|(uid, data)| {
				Change::new(
					uid.clone(),
					hash(data),
					ChangeType::Unknown,
					objtype.clone(),
					FormatName(FORMAT.into()),
					data.clone(),
				)
			})
			.collect())
	}

	async fn commit(&self, _objtype: &ObjType, change: &Change) -> Result<()> {
		if self.fail_commit {
			return Err(opensync_engine::OpenSyncError::new(opensync_engine::ErrorKind::Generic, "commit refused"));
		}
		let mut store = self.store.lock().unwrap();
		match change.change_type {
			ChangeType::Deleted => {
				store.remove(&change.uid);
			}
			_ => {
				store.insert(change.uid.clone(), change.data.to_vec());
			}
		}
		Ok(())
	}

	async fn disconnect(&self, _objtype: &ObjType) -> Result<()> {
		Ok(())
	}
}

/// Wraps a [`MockPlugin`] in a [`ClientProxy`] with fast test timeouts.
pub fn proxy(plugin: std::sync::Arc<MockPlugin>) -> ClientProxy {
	ClientProxy::new(plugin, opensync_engine::Timeouts::fast())
}

// vim: ts=4
