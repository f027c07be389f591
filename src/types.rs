//! Core data model: object formats, changes, mappings.
//!
//! These types are deliberately format-agnostic: the engine never looks
//! inside a `Change`'s blob. Only a registered [`ObjectFormatOps`]
//! implementation (owned by a plugin, registered through
//! [`crate::format_env::FormatEnv`]) knows how to compare, hash or duplicate
//! one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A class of synchronizable entities: contact, event, note, file, ...
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjType(pub String);

impl fmt::Display for ObjType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for ObjType {
	fn from(s: &str) -> Self {
		ObjType(s.to_string())
	}
}

/// A concrete encoding of an objtype: vcard21, vcard30, plain file, ...
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormatName(pub String);

impl fmt::Display for FormatName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for FormatName {
	fn from(s: &str) -> Self {
		FormatName(s.to_string())
	}
}

/// Identifies one member (endpoint) within a group. Stable for the lifetime
/// of the group's configuration, not just one sync round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId(pub u32);

/// A member-opaque identifier for one logical entity on that member. The
/// core never interprets the contents; only the owning plugin does.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uid(pub String);

impl fmt::Display for Uid {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Identifies one row of the MappingTable, stable across sync rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MappingId(pub u64);

/// The kind of delta a member reports for one uid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
	Added,
	Modified,
	Deleted,
	Unmodified,
	Unknown,
}

impl fmt::Display for ChangeType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ChangeType::Added => "ADDED",
			ChangeType::Modified => "MODIFIED",
			ChangeType::Deleted => "DELETED",
			ChangeType::Unmodified => "UNMODIFIED",
			ChangeType::Unknown => "UNKNOWN",
		};
		f.write_str(s)
	}
}

/// Result of an `ObjectFormat::compare(a, b)` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareResult {
	Same,
	Similar,
	Different,
}

/// A reported delta from a member: uid, hash, changetype and the blob
/// itself tagged with its objtype/format.
#[derive(Debug, Clone)]
pub struct Change {
	pub uid: Uid,
	pub hash: String,
	pub change_type: ChangeType,
	pub objtype: ObjType,
	pub format: FormatName,
	pub data: Arc<[u8]>,
}

impl Change {
	pub fn new(
		uid: Uid,
		hash: impl Into<String>,
		change_type: ChangeType,
		objtype: ObjType,
		format: FormatName,
		data: impl Into<Arc<[u8]>>,
	) -> Self {
		Change { uid, hash: hash.into(), change_type, objtype, format, data: data.into() }
	}

	/// A synthetic DELETED change carrying no data, as produced by
	/// `Hashtable::get_deleted()`.
	pub fn deleted(uid: Uid, objtype: ObjType) -> Self {
		Change {
			uid,
			hash: String::new(),
			change_type: ChangeType::Deleted,
			objtype,
			format: FormatName("".to_string()),
			data: Arc::from(Vec::new().into_boxed_slice()),
		}
	}
}

/// One member's participation in a [`Mapping`]: its uid and, for this round,
/// the change it reported (if any).
#[derive(Debug, Clone)]
pub struct MappingEntry {
	pub member_id: MemberId,
	pub uid: Uid,
	pub change: Option<Change>,
}

/// Cross-member identity record linking one logical entity's uids.
///
/// Invariants: at most one entry per member_id, at least one entry total.
#[derive(Debug, Clone)]
pub struct Mapping {
	pub id: MappingId,
	entries: Vec<MappingEntry>,
}

impl Mapping {
	pub fn new(id: MappingId) -> Self {
		Mapping { id, entries: Vec::new() }
	}

	pub fn with_entry(id: MappingId, entry: MappingEntry) -> Self {
		let mut m = Mapping::new(id);
		m.entries.push(entry);
		m
	}

	pub fn entries(&self) -> &[MappingEntry] {
		&self.entries
	}

	pub fn entry_for(&self, member: MemberId) -> Option<&MappingEntry> {
		self.entries.iter().find(|e| e.member_id == member)
	}

	pub fn entry_for_mut(&mut self, member: MemberId) -> Option<&mut MappingEntry> {
		self.entries.iter_mut().find(|e| e.member_id == member)
	}

	/// Insert or replace the entry for `member`. Enforces the
	/// at-most-one-entry-per-member invariant.
	pub fn set_entry(&mut self, entry: MappingEntry) {
		if let Some(existing) = self.entry_for_mut(entry.member_id) {
			*existing = entry;
		} else {
			self.entries.push(entry);
		}
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// A mapping is solved when every entry has either no pending change or
	/// a non-conflicting one (conflicts are resolved by `ChangeMapper`
	/// before this is checked).
	pub fn member_ids(&self) -> impl Iterator<Item = MemberId> + '_ {
		self.entries.iter().map(|e| e.member_id)
	}
}


// vim: ts=4
