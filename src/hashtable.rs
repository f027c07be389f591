//! Hashtable (C3): per-(member, objtype) uid -> hash, drives change
//! classification.
//!
//! One `Hashtable` belongs to one (member, objtype) pair and is owned by
//! that pair's `ObjEngine`/`ClientProxy` relationship for the round, then
//! saved back to the Archive the way `tbl_sync_anchors` rows are.

use std::collections::HashMap;

use crate::types::{Change, ChangeType, Uid};

/// "What I reported last time, successfully."
#[derive(Debug, Clone, Default)]
pub struct Hashtable {
	entries: HashMap<Uid, String>,
	/// uids touched during the current round; anything in `entries` but not
	/// here when `get_deleted()` is called is gone.
	touched: std::collections::HashSet<Uid>,
}

impl Hashtable {
	pub fn new() -> Self {
		Hashtable::default()
	}

	pub fn from_entries(entries: HashMap<Uid, String>) -> Self {
		Hashtable { entries, touched: Default::default() }
	}

	pub fn entries(&self) -> &HashMap<Uid, String> {
		&self.entries
	}

	/// Classify `change` against the stored hash.
	/// Does not mutate the stored hash; call `update_change` once the
	/// classified change has actually been processed.
	pub fn get_changetype(&self, uid: &Uid, reported_hash: &str) -> ChangeType {
		match self.entries.get(uid) {
			None => ChangeType::Added,
			Some(stored) if stored == reported_hash => ChangeType::Unmodified,
			Some(_) => ChangeType::Modified,
		}
	}

	/// Record a change as having been seen this round. `Deleted` removes the
	/// stored hash; anything else (re)inserts uid -> new hash.
	pub fn update_change(&mut self, change: &Change) {
		self.touched.insert(change.uid.clone());
		match change.change_type {
			ChangeType::Deleted => {
				self.entries.remove(&change.uid);
			}
			_ => {
				self.entries.insert(change.uid.clone(), change.hash.clone());
			}
		}
	}

	/// uids present in the stored table but not touched this round: these
	/// are synthesized as DELETED changes once `get_changes` completes.
	pub fn get_deleted(&self) -> Vec<Uid> {
		self.entries.keys().filter(|uid| !self.touched.contains(*uid)).cloned().collect()
	}

	/// Empty the table in memory, forcing every reported change to be
	/// classified ADDED for the rest of this round (slow-sync).
	pub fn slowsync(&mut self) {
		self.entries.clear();
		self.touched.clear();
	}

	/// Start a fresh round's touched-set without discarding stored hashes
	/// (normal, non-slow-sync rounds).
	pub fn begin_round(&mut self) {
		self.touched.clear();
	}
}


// vim: ts=4
