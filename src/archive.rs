//! Archive (C2): durable store of mapping rows and sync anchors.
//!
//! Backed by `redb`: one `Database` per group, tables keyed by plain
//! strings, values serialized and handed to `redb` as bytes. Mapping tables
//! are rewritten whole per objtype inside one write transaction, so
//! `redb`'s atomic commits give open-tmp/fsync/rename durability without
//! reimplementing it.
//!
//! Rows are serialized with `serde_json`, already a first-class dependency
//! elsewhere in this crate.

use redb::{ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;
use crate::hashtable::Hashtable;
use crate::types::{Mapping, MappingEntry, MappingId, MemberId, ObjType, Uid};

const TBL_MAPPINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("tbl_changes");
const TBL_CHANGELOG: TableDefinition<&str, &[u8]> = TableDefinition::new("tbl_changelog");
const TBL_ANCHORS: TableDefinition<&str, &[u8]> = TableDefinition::new("tbl_sync_anchors");
const TBL_META: TableDefinition<&str, &[u8]> = TableDefinition::new("tbl_meta");
const TBL_HASHTABLES: TableDefinition<&str, &[u8]> = TableDefinition::new("tbl_hashtables");

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MappingRow {
	id: u64,
	entries: Vec<(u32, String)>,
}

impl From<&Mapping> for MappingRow {
	fn from(m: &Mapping) -> Self {
		MappingRow {
			id: m.id.0,
			entries: m.entries().iter().map(|e| (e.member_id.0, e.uid.0.clone())).collect(),
		}
	}
}

impl MappingRow {
	fn into_mapping(self) -> Mapping {
		let mut m = Mapping::new(MappingId(self.id));
		for (member, uid) in self.entries {
			m.set_entry(MappingEntry { member_id: MemberId(member), uid: Uid(uid), change: None });
		}
		m
	}
}

/// An ignored/pending mapping id, persisted so a re-run can skip re-raising
/// the same conflict until the user resolves it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnoredEntry {
	pub mapping_id: u64,
}

/// In-memory view of one objtype's mappings, loaded from and saved back to
/// the Archive as a unit.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
	rows: HashMap<MappingId, Mapping>,
}

impl MappingTable {
	pub fn mappings(&self) -> impl Iterator<Item = &Mapping> {
		self.rows.values()
	}

	pub fn get(&self, id: MappingId) -> Option<&Mapping> {
		self.rows.get(&id)
	}

	pub fn get_mut(&mut self, id: MappingId) -> Option<&mut Mapping> {
		self.rows.get_mut(&id)
	}

	/// Find the mapping, if any, that already has an entry for
	/// `(member, uid)` — step 1 of ChangeMapper's matching rules.
	pub fn find_by_member_uid(&self, member: MemberId, uid: &Uid) -> Option<MappingId> {
		self.rows
			.values()
			.find(|m| m.entry_for(member).map(|e| &e.uid) == Some(uid))
			.map(|m| m.id)
	}

	pub fn insert(&mut self, mapping: Mapping) {
		self.rows.insert(mapping.id, mapping);
	}

	pub fn remove(&mut self, id: MappingId) {
		self.rows.remove(&id);
	}

	pub fn len(&self) -> usize {
		self.rows.len()
	}

	pub fn is_empty(&self) -> bool {
		self.rows.is_empty()
	}

	/// Drop mapping rows whose member ids no longer appear in
	/// `known_members`. Used by EngineCore's pre-round repair pass.
	pub fn drop_orphans(&mut self, known_members: &[MemberId]) -> usize {
		let before = self.rows.len();
		self.rows.retain(|_, m| m.member_ids().all(|mid| known_members.contains(&mid)));
		before - self.rows.len()
	}
}

pub struct Archive {
	db: redb::Database,
}

impl Archive {
	pub fn open(path: &Path) -> Result<Self> {
		let db = redb::Database::create(path)?;
		{
			let txn = db.begin_write()?;
			txn.open_table(TBL_MAPPINGS)?;
			txn.open_table(TBL_CHANGELOG)?;
			txn.open_table(TBL_ANCHORS)?;
			txn.open_table(TBL_META)?;
			txn.open_table(TBL_HASHTABLES)?;
			txn.commit()?;
		}
		Ok(Archive { db })
	}

	fn mapping_key(objtype: &ObjType) -> String {
		format!("objtype:{}", objtype.0)
	}

	pub fn load_mappings(&self, objtype: &ObjType) -> Result<MappingTable> {
		let txn = self.db.begin_read()?;
		let table = txn.open_table(TBL_MAPPINGS)?;
		let mut out = MappingTable::default();
		if let Some(v) = table.get(Self::mapping_key(objtype).as_str())? {
			let rows: Vec<MappingRow> = serde_json::from_slice(v.value())?;
			for row in rows {
				out.insert(row.into_mapping());
			}
		}
		Ok(out)
	}

	pub fn save_mappings(&self, objtype: &ObjType, table: &MappingTable) -> Result<()> {
		let rows: Vec<MappingRow> = table.mappings().map(MappingRow::from).collect();
		let bytes = serde_json::to_vec(&rows)?;
		let txn = self.db.begin_write()?;
		{
			let mut t = txn.open_table(TBL_MAPPINGS)?;
			t.insert(Self::mapping_key(objtype).as_str(), bytes.as_slice())?;
		}
		txn.commit()?;
		Ok(())
	}

	pub fn save_mapping(&self, objtype: &ObjType, mapping: &Mapping) -> Result<()> {
		let mut table = self.load_mappings(objtype)?;
		table.insert(mapping.clone());
		self.save_mappings(objtype, &table)
	}

	pub fn delete_mapping(&self, objtype: &ObjType, id: MappingId) -> Result<()> {
		let mut table = self.load_mappings(objtype)?;
		table.remove(id);
		self.save_mappings(objtype, &table)
	}

	pub fn load_ignored(&self, objtype: &ObjType) -> Result<Vec<IgnoredEntry>> {
		let txn = self.db.begin_read()?;
		let table = txn.open_table(TBL_CHANGELOG)?;
		match table.get(Self::mapping_key(objtype).as_str())? {
			Some(v) => Ok(serde_json::from_slice(v.value())?),
			None => Ok(Vec::new()),
		}
	}

	pub fn save_ignored(&self, objtype: &ObjType, list: &[IgnoredEntry]) -> Result<()> {
		let bytes = serde_json::to_vec(list)?;
		let txn = self.db.begin_write()?;
		{
			let mut t = txn.open_table(TBL_CHANGELOG)?;
			t.insert(Self::mapping_key(objtype).as_str(), bytes.as_slice())?;
		}
		txn.commit()?;
		Ok(())
	}

	fn anchor_key(member: MemberId, objtype: &ObjType, key: &str) -> String {
		format!("{}\u{0}{}\u{0}{}", member.0, objtype.0, key)
	}

	pub fn save_anchor(&self, member: MemberId, objtype: &ObjType, key: &str, value: &str) -> Result<()> {
		let txn = self.db.begin_write()?;
		{
			let mut t = txn.open_table(TBL_ANCHORS)?;
			t.insert(Self::anchor_key(member, objtype, key).as_str(), value.as_bytes())?;
		}
		txn.commit()?;
		Ok(())
	}

	pub fn get_anchor(&self, member: MemberId, objtype: &ObjType, key: &str) -> Result<Option<String>> {
		let txn = self.db.begin_read()?;
		let table = txn.open_table(TBL_ANCHORS)?;
		match table.get(Self::anchor_key(member, objtype, key).as_str())? {
			Some(v) => Ok(Some(String::from_utf8_lossy(v.value()).into_owned())),
			None => Ok(None),
		}
	}

	fn hashtable_key(member: MemberId, objtype: &ObjType) -> String {
		format!("{}\u{0}{}", member.0, objtype.0)
	}

	/// Persist a member's Hashtable for one objtype, after SYNC_DONE.
	pub fn save_hashtable(&self, member: MemberId, objtype: &ObjType, hashtable: &Hashtable) -> Result<()> {
		let bytes = serde_json::to_vec(hashtable.entries())?;
		let txn = self.db.begin_write()?;
		{
			let mut t = txn.open_table(TBL_HASHTABLES)?;
			t.insert(Self::hashtable_key(member, objtype).as_str(), bytes.as_slice())?;
		}
		txn.commit()?;
		Ok(())
	}

	pub fn load_hashtable(&self, member: MemberId, objtype: &ObjType) -> Result<Hashtable> {
		let txn = self.db.begin_read()?;
		let table = txn.open_table(TBL_HASHTABLES)?;
		match table.get(Self::hashtable_key(member, objtype).as_str())? {
			Some(v) => {
				let entries = serde_json::from_slice(v.value())?;
				Ok(Hashtable::from_entries(entries))
			}
			None => Ok(Hashtable::new()),
		}
	}

	/// Allocate the next mapping id, counted per-group (not per-objtype) so
	/// ids never collide across objtypes.
	pub fn next_mapping_id(&self) -> Result<MappingId> {
		let txn = self.db.begin_write()?;
		let next = {
			let mut t = txn.open_table(TBL_META)?;
			let current = match t.get("next_mapping_id")? {
				Some(v) => u64::from_le_bytes(v.value().try_into().unwrap_or([0; 8])),
				None => 0,
			};
			let next = current + 1;
			t.insert("next_mapping_id", next.to_le_bytes().as_slice())?;
			next
		};
		txn.commit()?;
		Ok(MappingId(next))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn objtype() -> ObjType {
		ObjType("file".into())
	}

	#[test]
	fn save_and_load_mappings_round_trips() {
		let tmp = TempDir::new().unwrap();
		let archive = Archive::open(&tmp.path().join("archive.redb")).unwrap();

		let id = archive.next_mapping_id().unwrap();
		let mut mapping = Mapping::new(id);
		mapping.set_entry(MappingEntry { member_id: MemberId(0), uid: Uid("a".into()), change: None });
		mapping.set_entry(MappingEntry { member_id: MemberId(1), uid: Uid("b".into()), change: None });
		archive.save_mapping(&objtype(), &mapping).unwrap();

		let loaded = archive.load_mappings(&objtype()).unwrap();
		assert_eq!(loaded.len(), 1);
		let reloaded = loaded.get(id).unwrap();
		assert_eq!(reloaded.entry_for(MemberId(0)).unwrap().uid, Uid("a".into()));
		assert_eq!(reloaded.entry_for(MemberId(1)).unwrap().uid, Uid("b".into()));
	}

	#[test]
	fn delete_mapping_removes_row() {
		let tmp = TempDir::new().unwrap();
		let archive = Archive::open(&tmp.path().join("archive.redb")).unwrap();
		let id = archive.next_mapping_id().unwrap();
		archive.save_mapping(&objtype(), &Mapping::new(id)).unwrap();
		archive.delete_mapping(&objtype(), id).unwrap();
		assert!(archive.load_mappings(&objtype()).unwrap().is_empty());
	}

	#[test]
	fn anchors_round_trip_per_member_and_objtype() {
		let tmp = TempDir::new().unwrap();
		let archive = Archive::open(&tmp.path().join("archive.redb")).unwrap();
		archive.save_anchor(MemberId(0), &objtype(), "path", "/home/a").unwrap();
		assert_eq!(
			archive.get_anchor(MemberId(0), &objtype(), "path").unwrap(),
			Some("/home/a".to_string())
		);
		assert_eq!(archive.get_anchor(MemberId(1), &objtype(), "path").unwrap(), None);
	}

	#[test]
	fn mapping_ids_are_monotonic_and_unique() {
		let tmp = TempDir::new().unwrap();
		let archive = Archive::open(&tmp.path().join("archive.redb")).unwrap();
		let a = archive.next_mapping_id().unwrap();
		let b = archive.next_mapping_id().unwrap();
		assert!(b.0 > a.0);
	}

	#[test]
	fn hashtable_round_trips_per_member_and_objtype() {
		let tmp = TempDir::new().unwrap();
		let archive = Archive::open(&tmp.path().join("archive.redb")).unwrap();
		let mut ht = Hashtable::new();
		ht.update_change(&crate::types::Change::new(
			Uid("a".into()),
			"h1",
			crate::types::ChangeType::Added,
			objtype(),
			crate::types::FormatName("plain".into()),
			b"x".to_vec(),
		));
		archive.save_hashtable(MemberId(0), &objtype(), &ht).unwrap();
		let loaded = archive.load_hashtable(MemberId(0), &objtype()).unwrap();
		assert_eq!(loaded.entries().get(&Uid("a".into())), Some(&"h1".to_string()));
		assert!(archive.load_hashtable(MemberId(1), &objtype()).unwrap().entries().is_empty());
	}

	#[test]
	fn drop_orphans_removes_rows_for_unknown_members() {
		let mut table = MappingTable::default();
		let mut mapping = Mapping::new(MappingId(1));
		mapping.set_entry(MappingEntry { member_id: MemberId(5), uid: Uid("x".into()), change: None });
		table.insert(mapping);
		let dropped = table.drop_orphans(&[MemberId(0), MemberId(1)]);
		assert_eq!(dropped, 1);
		assert!(table.is_empty());
	}
}

// vim: ts=4
