//! ObjEngine (C6): the per-objtype state machine.
//!
//! Drives one round through explicit states (collect, map, resolve
//! conflicts, multiply, write, disconnect) across an arbitrary number of
//! members instead of a fixed pair. Each phase fans a
//! `futures::future::join_all` out over every participating member and only
//! advances once all of them settle: the async equivalent of "every
//! participating member has returned OK or ERROR for that state's
//! operation".

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::archive::MappingTable;
use crate::change_mapper::{self, MapResult};
use crate::error::{ErrorKind, OpenSyncError, Result};
use crate::format_env::FormatEnv;
use crate::hashtable::Hashtable;
use crate::plugin::{ClientProxy, ConnectOutcome};
use crate::types::{Change, ChangeType, Mapping, MappingEntry, MappingId, MemberId, ObjType};

/// States the engine walks through, in order, for one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjEngineState {
	Idle,
	Connecting,
	Connected,
	Reading,
	Read,
	Mapping,
	Conflicts,
	Multiplying,
	PreparedWrite,
	Writing,
	Written,
	SyncDone,
	Disconnecting,
	Disconnected,
	Success,
	Error,
}

/// One member's participation in this objtype for the round.
pub struct MemberContext {
	pub member_id: MemberId,
	pub proxy: Arc<ClientProxy>,
	pub hashtable: Hashtable,
}

/// The conflict resolution menu offered to a conflict callback.
#[derive(Debug, Clone)]
pub enum ConflictResolution {
	Pick(MemberId),
	PickLatest,
	Duplicate,
	Delete,
	Ignore,
	Abort,
}

/// Invoked once per conflicting mapping, in insertion order.
pub trait ConflictCallback: Send + Sync {
	fn resolve(&self, mapping: &Mapping) -> ConflictResolution;
}

/// Always resolves by keeping the first entry with a reported change; used
/// where the host application has not installed a real policy yet.
pub struct PickFirstCallback;

impl ConflictCallback for PickFirstCallback {
	fn resolve(&self, mapping: &Mapping) -> ConflictResolution {
		match mapping.entries().iter().find(|e| e.change.is_some()) {
			Some(e) => ConflictResolution::Pick(e.member_id),
			None => ConflictResolution::Ignore,
		}
	}
}

/// A completed round's verdict.
#[derive(Debug)]
pub enum ObjEngineOutcome {
	Success { ignored: Vec<MappingId> },
	Aborted,
}

/// Maximum number of `-dupe` suffixes tried before giving up on a unique
/// duplicate uid, rather than looping forever.
const DUPLICATE_SUFFIX_CAP: usize = 32;

pub struct ObjEngine<'a> {
	pub objtype: ObjType,
	pub members: Vec<MemberContext>,
	pub env: &'a FormatEnv,
	pub table: MappingTable,
	pub state: ObjEngineState,
}

impl<'a> ObjEngine<'a> {
	pub fn new(objtype: ObjType, members: Vec<MemberContext>, env: &'a FormatEnv, table: MappingTable) -> Self {
		ObjEngine { objtype, members, env, table, state: ObjEngineState::Idle }
	}

	fn known_members(&self) -> Vec<MemberId> {
		self.members.iter().map(|m| m.member_id).collect()
	}

	/// Drive one full round: connect -> read -> map -> resolve conflicts ->
	/// multiply -> write -> sync_done -> disconnect.
	pub async fn run_round(
		&mut self,
		conflicts: &dyn ConflictCallback,
		force_slow_sync: bool,
		mut alloc_id: impl FnMut() -> Result<MappingId>,
	) -> Result<ObjEngineOutcome> {
		let known = self.known_members();
		let dropped = self.table.drop_orphans(&known);
		if dropped > 0 {
			info!(objtype = %self.objtype, dropped, "dropped orphan mapping rows referencing unknown members");
		}

		self.state = ObjEngineState::Connecting;
		let connect_results: Vec<(MemberId, Result<ConnectOutcome>)> = futures::future::join_all(
			self.members.iter().map(|m| {
				let proxy = m.proxy.clone();
				let objtype = self.objtype.clone();
				let member_id = m.member_id;
				async move { (member_id, proxy.connect(&objtype).await) }
			}),
		)
		.await;

		let mut slow_sync = force_slow_sync;
		for (member_id, result) in &connect_results {
			match result {
				Ok(ConnectOutcome::SlowSync) => slow_sync = true,
				Ok(ConnectOutcome::Ok) => {}
				Err(e) => warn!(objtype = %self.objtype, member = member_id.0, error = %e, "connect failed"),
			}
		}

		if slow_sync {
			info!(objtype = %self.objtype, "entering slow-sync: clearing hashtables and mapping table");
			for m in &mut self.members {
				m.hashtable.slowsync();
			}
			self.table = MappingTable::default();
		} else {
			for m in &mut self.members {
				m.hashtable.begin_round();
			}
		}

		self.state = ObjEngineState::Connected;
		futures::future::join_all(
			self.members.iter().map(|m| m.proxy.connect_done(&self.objtype, slow_sync)),
		)
		.await;

		self.state = ObjEngineState::Reading;
		let reads: Vec<(MemberId, Result<Vec<Change>>)> = futures::future::join_all(self.members.iter().map(|m| {
			let proxy = m.proxy.clone();
			let objtype = self.objtype.clone();
			let member_id = m.member_id;
			async move { (member_id, proxy.get_changes(&objtype, slow_sync).await) }
		}))
		.await;

		let mut member_changes: Vec<(MemberId, Vec<Change>)> = Vec::new();
		for (member_id, result) in reads {
			let member_ctx = self.members.iter_mut().find(|m| m.member_id == member_id).unwrap();
			let mut changes = match result {
				Ok(reported) => reported
					.into_iter()
					.map(|mut c| {
						let classified = member_ctx.hashtable.get_changetype(&c.uid, &c.hash);
						c.change_type = classified;
						member_ctx.hashtable.update_change(&c);
						c
					})
					.collect::<Vec<_>>(),
				Err(e) => {
					warn!(objtype = %self.objtype, member = member_id.0, error = %e, "get_changes failed; member contributes no changes this round");
					Vec::new()
				}
			};
			for uid in member_ctx.hashtable.get_deleted() {
				changes.push(Change::deleted(uid, self.objtype.clone()));
			}
			member_changes.push((member_id, changes));
		}

		self.state = ObjEngineState::Read;
		self.state = ObjEngineState::Mapping;
		let map_result: MapResult =
			change_mapper::map_changes(&mut self.table, &self.objtype, &member_changes, self.env, &mut alloc_id)?;

		self.state = ObjEngineState::Conflicts;
		let mut winners: HashMap<MappingId, Change> = HashMap::new();
		let mut ignored: Vec<MappingId> = Vec::new();
		let mut aborted = false;

		for id in &map_result.conflicting {
			let Some(mapping) = self.table.get(*id) else { continue };
			let resolution = conflicts.resolve(mapping);
			match resolution {
				ConflictResolution::Abort => {
					aborted = true;
					break;
				}
				ConflictResolution::Ignore => {
					ignored.push(*id);
				}
				ConflictResolution::Pick(member) => {
					if let Some(change) = mapping.entry_for(member).and_then(|e| e.change.clone()) {
						winners.insert(*id, change);
					}
				}
				ConflictResolution::PickLatest => {
					// No per-format revision is modeled yet; the
					// most-recently-set entry (last in insertion order)
					// stands in for "latest".
					if let Some(change) = mapping.entries().iter().rev().find_map(|e| e.change.clone()) {
						winners.insert(*id, change);
					}
				}
				ConflictResolution::Delete => {
					if let Some(uid) = mapping.entries().first().map(|e| e.uid.clone()) {
						winners.insert(*id, Change::deleted(uid, self.objtype.clone()));
					}
				}
				ConflictResolution::Duplicate => {
					self.duplicate_divergent_entries(*id)?;
					if let Some(mapping) = self.table.get(*id) {
						if let Some(change) = mapping.entries().iter().find_map(|e| e.change.clone()) {
							winners.insert(*id, change);
						}
					}
				}
			}
		}

		if aborted {
			self.state = ObjEngineState::Error;
			return Ok(ObjEngineOutcome::Aborted);
		}

		self.state = ObjEngineState::Multiplying;
		let mut write_queue: Vec<(MappingId, MemberId, Change)> = Vec::new();
		let mut resolved: Vec<MappingId> = map_result.solved.clone();
		resolved.extend(winners.keys().copied());

		for id in resolved {
			let Some(mapping) = self.table.get(id) else { continue };
			let winner = winners.get(&id).cloned().or_else(|| mapping.entries().iter().find_map(|e| e.change.clone()));
			let Some(winner) = winner else { continue };
			for member in self.known_members() {
				match mapping.entry_for(member) {
					None => write_queue.push((id, member, winner.clone())),
					Some(entry) => {
						// Equality is judged against the winner's intent, not the
						// entry's own reported changetype: a member reporting
						// UNMODIFIED (still holding the object) must still
						// receive a winning DELETE.
						let is_equal = entry
							.change
							.as_ref()
							.map(|c| {
								if winner.change_type == ChangeType::Deleted {
									c.change_type == ChangeType::Deleted
								} else {
									c.hash == winner.hash
								}
							})
							.unwrap_or(false);
						if !is_equal {
							write_queue.push((id, member, winner.clone()));
						}
					}
				}
			}
		}

		self.state = ObjEngineState::PreparedWrite;
		self.state = ObjEngineState::Writing;

		let mut per_member: HashMap<MemberId, Vec<(MappingId, Change)>> = HashMap::new();
		for (id, member, change) in write_queue {
			per_member.entry(member).or_default().push((id, change));
		}

		let member_lookup: HashMap<MemberId, Arc<ClientProxy>> =
			self.members.iter().map(|m| (m.member_id, m.proxy.clone())).collect();

		// Collects, per member, the (mapping, change) pairs that actually
		// committed, so the mapping table and that member's hashtable can be
		// updated to reflect the write once every member has settled.
		let write_results: Vec<(MemberId, Vec<(MappingId, Change)>)> =
			futures::future::join_all(per_member.into_iter().map(|(member_id, changes)| {
				let proxy = member_lookup.get(&member_id).cloned();
				let objtype = self.objtype.clone();
				async move {
					let mut written = Vec::new();
					let Some(proxy) = proxy else { return (member_id, written) };
					for (id, change) in changes {
						match proxy.commit(&objtype, &change).await {
							Ok(()) => written.push((id, change)),
							Err(e) => warn!(objtype = %objtype, member = member_id.0, error = %e, "commit failed"),
						}
					}
					if let Err(e) = proxy.committed_all(&objtype).await {
						warn!(objtype = %objtype, member = member_id.0, error = %e, "committed_all failed");
					}
					(member_id, written)
				}
			}))
			.await;

		for (member_id, written) in write_results {
			for (id, change) in written {
				if let Some(mapping) = self.table.get_mut(id) {
					mapping.set_entry(MappingEntry { member_id, uid: change.uid.clone(), change: None });
				}
				if let Some(member) = self.members.iter_mut().find(|m| m.member_id == member_id) {
					member.hashtable.update_change(&change);
				}
			}
		}

		self.state = ObjEngineState::Written;
		self.state = ObjEngineState::SyncDone;
		futures::future::join_all(self.members.iter().map(|m| m.proxy.sync_done(&self.objtype))).await;

		self.state = ObjEngineState::Disconnecting;
		futures::future::join_all(self.members.iter().map(|m| m.proxy.disconnect(&self.objtype))).await;
		self.state = ObjEngineState::Disconnected;

		self.state = ObjEngineState::Success;
		Ok(ObjEngineOutcome::Success { ignored })
	}

	/// Give every divergent entry in `mapping_id` (all but the first) a
	/// freshly duplicated uid, capped at [`DUPLICATE_SUFFIX_CAP`] attempts.
	fn duplicate_divergent_entries(&mut self, mapping_id: MappingId) -> Result<()> {
		let Some(mapping) = self.table.get(mapping_id) else { return Ok(()) };
		let entries: Vec<_> = mapping.entries().to_vec_entries();
		if entries.len() < 2 {
			return Ok(());
		}
		for entry in entries.into_iter().skip(1) {
			let Some(change) = &entry.change else { continue };
			let Some(format_ops) = self.env.find_format(&change.format) else { continue };
			let mut candidate = change.uid.clone();
			let mut attempts = 0;
			loop {
				candidate = format_ops.duplicate(&candidate);
				attempts += 1;
				let collides = self.table.mappings().any(|m| m.entries().iter().any(|e| e.uid == candidate));
				if !collides {
					break;
				}
				if attempts >= DUPLICATE_SUFFIX_CAP {
					return Err(OpenSyncError::new(
						ErrorKind::Generic,
						format!("could not allocate a unique duplicate uid after {DUPLICATE_SUFFIX_CAP} attempts"),
					));
				}
			}
			if let Some(mapping) = self.table.get_mut(mapping_id) {
				if let Some(e) = mapping.entry_for_mut(entry.member_id) {
					e.uid = candidate;
				}
			}
		}
		Ok(())
	}
}

/// Small helper so `duplicate_divergent_entries` can iterate owned entries
/// without fighting the borrow checker over `&mut self.table`.
trait ToVecEntries {
	fn to_vec_entries(&self) -> Vec<crate::types::MappingEntry>;
}

impl ToVecEntries for [crate::types::MappingEntry] {
	fn to_vec_entries(&self) -> Vec<crate::types::MappingEntry> {
		self.to_vec()
	}
}


// vim: ts=4
