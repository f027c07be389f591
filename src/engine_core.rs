//! EngineCore (C7): group lifecycle, lock, repair pass, event emission.
//!
//! Follows an always-cleanup pattern: connect everything, always disconnect
//! on the way out regardless of how the middle went, backed by an RAII
//! lock file. The per-objtype state machine itself lives in
//! [`crate::obj_engine`]; this module fans one round out across every
//! configured objtype and owns the group-wide concerns: the lock, the
//! Archive handle, and callback dispatch.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::archive::Archive;
use crate::callbacks::{ConflictBridge, EngineCallbacks, NoCallbacks, StatusEvent};
use crate::config::EngineConfig;
use crate::error::{ErrorKind, OpenSyncError, Result};
use crate::format_env::FormatEnv;
use crate::obj_engine::{MemberContext, ObjEngine, ObjEngineOutcome};
use crate::plugin::{ClientProxy, Plugin};
use crate::types::{MemberId, ObjType};

/// Exclusive, single-file lock in the group's state directory.
pub struct EngineLock {
	path: PathBuf,
}

impl EngineLock {
	/// Acquire the lock. Returns `true` alongside it if a lock file from an
	/// earlier run was still present, a PREV_UNCLEAN condition that forces
	/// slow-sync rather than a hard error.
	pub fn acquire(state_dir: &Path) -> Result<(Self, bool)> {
		std::fs::create_dir_all(state_dir)?;
		let path = state_dir.join(".opensync-lock");
		let prev_unclean = path.exists();
		if prev_unclean {
			let _ = std::fs::remove_file(&path);
		}
		std::fs::write(&path, std::process::id().to_string())?;
		Ok((EngineLock { path }, prev_unclean))
	}
}

impl Drop for EngineLock {
	fn drop(&mut self) {
		let _ = std::fs::remove_file(&self.path);
	}
}

struct RegisteredMember {
	id: MemberId,
	objtypes: Vec<ObjType>,
	proxy: Arc<ClientProxy>,
}

pub struct EngineCore {
	config: EngineConfig,
	env: FormatEnv,
	archive: Option<Archive>,
	callbacks: Box<dyn EngineCallbacks>,
	members: Vec<RegisteredMember>,
	lock: Option<EngineLock>,
	force_slow_sync: bool,
	aborted: Arc<AtomicBool>,
}

impl EngineCore {
	pub fn new(config: EngineConfig, env: FormatEnv) -> Self {
		EngineCore {
			config,
			env,
			archive: None,
			callbacks: Box::new(NoCallbacks),
			members: Vec::new(),
			lock: None,
			force_slow_sync: false,
			aborted: Arc::new(AtomicBool::new(false)),
		}
	}

	pub fn set_callbacks(&mut self, callbacks: Box<dyn EngineCallbacks>) {
		self.callbacks = callbacks;
	}

	pub fn register_member(&mut self, id: MemberId, objtypes: Vec<ObjType>, plugin: Arc<dyn Plugin>) {
		let proxy = Arc::new(ClientProxy::new(plugin, self.config.timeouts()));
		self.members.push(RegisteredMember { id, objtypes, proxy });
	}

	/// Acquire the lock, open the Archive, run each member's `initialize`.
	pub async fn initialize(&mut self) -> Result<()> {
		let (lock, prev_unclean) = EngineLock::acquire(&self.config.state_dir)?;
		self.lock = Some(lock);
		if prev_unclean {
			warn!("previous run did not shut down cleanly; forcing slow-sync on every objtype");
			self.callbacks.on_status(&StatusEvent::PrevUnclean);
			self.force_slow_sync = true;
		}

		let archive_path = self.config.state_dir.join("archive.redb");
		self.archive = Some(Archive::open(&archive_path)?);

		for member in &self.members {
			let their_version = member.proxy.plugin.get_version();
			if let Err(e) = crate::plugin::negotiation::negotiate(
				crate::plugin::negotiation::SUPPORTED_VERSIONS,
				&[their_version],
			) {
				warn!(member = member.id.0, version = their_version, error = %e, "plugin ABI version unsupported; member disabled");
				for objtype in &member.objtypes {
					member.proxy.taint_for_init(objtype);
				}
				continue;
			}
			if let Err(e) = member.proxy.plugin.initialize().await {
				warn!(member = member.id.0, error = %e, "member initialize failed");
			}
		}
		Ok(())
	}

	fn archive(&self) -> Result<&Archive> {
		self.archive.as_ref().ok_or_else(|| OpenSyncError::new(ErrorKind::Initialization, "engine not initialized"))
	}

	fn objtypes(&self) -> Vec<ObjType> {
		let mut seen = Vec::new();
		for member in &self.members {
			for objtype in &member.objtypes {
				if !seen.contains(objtype) {
					seen.push(objtype.clone());
				}
			}
		}
		seen
	}

	/// Run one round across every configured objtype. Each objtype's
	/// mapping table and member hashtables are loaded from and saved back
	/// to the Archive around the round.
	pub async fn synchronize_and_block(&mut self) -> Result<()> {
		let force_slow_sync = self.force_slow_sync;
		self.force_slow_sync = false;

		for objtype in self.objtypes() {
			if self.aborted.load(Ordering::SeqCst) {
				break;
			}
			if let Err(e) = self.run_objtype_round(&objtype, force_slow_sync).await {
				warn!(objtype = %objtype, error = %e, "objtype round failed");
				self.callbacks.on_status(&StatusEvent::Error(objtype, e));
			}
		}
		Ok(())
	}

	async fn run_objtype_round(&mut self, objtype: &ObjType, force_slow_sync: bool) -> Result<()> {
		let archive = self.archive()?;
		let table = archive.load_mappings(objtype)?;

		let mut member_ctxs = Vec::new();
		for member in &self.members {
			if !member.objtypes.contains(objtype) {
				continue;
			}
			let hashtable = archive.load_hashtable(member.id, objtype)?;
			member_ctxs.push(MemberContext { member_id: member.id, proxy: member.proxy.clone(), hashtable });
		}
		if member_ctxs.is_empty() {
			return Ok(());
		}

		self.callbacks.on_status(&StatusEvent::Connected(objtype.clone()));

		let mut engine = ObjEngine::new(objtype.clone(), member_ctxs, &self.env, table);
		let conflicts = ConflictBridge(self.callbacks.as_ref());
		let archive = self.archive()?;
		let outcome = engine.run_round(&conflicts, force_slow_sync, || archive.next_mapping_id()).await?;

		self.callbacks.on_status(&StatusEvent::ConnectDone(objtype.clone()));
		self.callbacks.on_status(&StatusEvent::Read(objtype.clone()));
		self.callbacks.on_status(&StatusEvent::Mapped(objtype.clone()));

		match outcome {
			ObjEngineOutcome::Aborted => {
				self.aborted.store(true, Ordering::SeqCst);
				self.callbacks.on_status(&StatusEvent::Error(
					objtype.clone(),
					OpenSyncError::new(ErrorKind::Generic, "sync aborted by conflict callback"),
				));
				return Ok(());
			}
			ObjEngineOutcome::Success { ignored } => {
				self.callbacks.on_status(&StatusEvent::EndConflicts(objtype.clone()));
				for mapping in engine.table.mappings() {
					self.callbacks.on_mapping(mapping);
				}
				for id in ignored {
					info!(objtype = %objtype, mapping = id.0, "conflict left unresolved; persisted as ignored");
				}
				self.callbacks.on_status(&StatusEvent::Multiplied(objtype.clone()));
				self.callbacks.on_status(&StatusEvent::Written(objtype.clone()));
				self.callbacks.on_status(&StatusEvent::SyncDone(objtype.clone()));
				self.callbacks.on_status(&StatusEvent::Disconnected(objtype.clone()));
			}
		}

		let archive = self.archive()?;
		archive.save_mappings(objtype, &engine.table)?;
		for member in &engine.members {
			archive.save_hashtable(member.member_id, objtype, &member.hashtable)?;
		}

		self.callbacks.on_status(&StatusEvent::Successful(objtype.clone()));
		Ok(())
	}

	/// Idempotent: subsequent calls are no-ops once the flag is set.
	pub fn abort(&self) {
		self.aborted.store(true, Ordering::SeqCst);
	}

	pub async fn finalize(&mut self) -> Result<()> {
		for member in &self.members {
			if let Err(e) = member.proxy.plugin.finalize().await {
				warn!(member = member.id.0, error = %e, "member finalize failed");
			}
		}
		self.lock = None;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::format_env::ObjectFormatOps;
	use crate::plugin::ConnectOutcome;
	use crate::types::{Change, ChangeType, CompareResult, FormatName, Uid};
	use async_trait::async_trait;
	use std::sync::Mutex;
	use tempfile::TempDir;

	struct PlainFormat;
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

	struct FixturePlugin {
		changes: Mutex<Vec<Change>>,
		committed: Mutex<Vec<Change>>,
	}

	#[async_trait]
	impl Plugin for FixturePlugin {
		async fn connect(&self, _objtype: &ObjType) -> Result<ConnectOutcome> {
			Ok(ConnectOutcome::Ok)
		}
		async fn connect_done(&self, _objtype: &ObjType, _slow_sync: bool) -> Result<()> {
			Ok(())
		}
		async fn get_changes(&self, _objtype: &ObjType, _slow_sync: bool) -> Result<Vec<Change>> {
			Ok(self.changes.lock().unwrap().drain(..).collect())
		}
		async fn commit(&self, _objtype: &ObjType, change: &Change) -> Result<()> {
			self.committed.lock().unwrap().push(change.clone());
			Ok(())
		}
		async fn disconnect(&self, _objtype: &ObjType) -> Result<()> {
			Ok(())
		}
	}

	fn env() -> FormatEnv {
		let mut env = FormatEnv::new();
		env.register_format(FormatName("plain".into()), ObjType("contact".into()), Arc::new(PlainFormat));
		env
	}

	#[tokio::test]
	async fn round_propagates_a_single_add_and_persists_hashtable() {
		let tmp = TempDir::new().unwrap();
		let mut config = EngineConfig::default();
		config.state_dir = tmp.path().to_path_buf();

		let mut engine = EngineCore::new(config, env());

		let data = Change::new(
			Uid("a".into()),
			"h1",
			ChangeType::Added,
			ObjType("contact".into()),
			FormatName("plain".into()),
			b"hi".to_vec(),
		);
		let plugin_a = Arc::new(FixturePlugin { changes: Mutex::new(vec![data]), committed: Mutex::new(Vec::new()) });
		let plugin_b = Arc::new(FixturePlugin { changes: Mutex::new(Vec::new()), committed: Mutex::new(Vec::new()) });

		engine.register_member(MemberId(0), vec![ObjType("contact".into())], plugin_a.clone());
		engine.register_member(MemberId(1), vec![ObjType("contact".into())], plugin_b.clone());

		engine.initialize().await.unwrap();
		engine.synchronize_and_block().await.unwrap();
		engine.finalize().await.unwrap();

		assert_eq!(plugin_b.committed.lock().unwrap().len(), 1);

		let archive = Archive::open(&tmp.path().join("archive.redb")).unwrap();
		let ht = archive.load_hashtable(MemberId(0), &ObjType("contact".into())).unwrap();
		assert!(ht.entries().contains_key(&Uid("a".into())));
	}

	#[tokio::test]
	async fn prev_unclean_lock_forces_slow_sync_on_next_initialize() {
		let tmp = TempDir::new().unwrap();
		std::fs::write(tmp.path().join(".opensync-lock"), "99999").unwrap();

		let mut config = EngineConfig::default();
		config.state_dir = tmp.path().to_path_buf();
		let mut engine = EngineCore::new(config, env());
		engine.initialize().await.unwrap();
		assert!(engine.force_slow_sync);
	}
}

// vim: ts=4
