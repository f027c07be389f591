//! ChangeMapper (C5): turns one round's per-member reported changes into a
//! classified MappingTable delta (no-op / solved / conflicting).
//!
//! Generalizes a two-way "which side wins" comparison into n-way
//! cross-member grouping over FormatEnv's `compare`, matching changes that
//! describe the same object across every member that reported one this
//! round.

use std::collections::HashMap;

use tracing::warn;

use crate::archive::MappingTable;
use crate::error::Result;
use crate::format_env::FormatEnv;
use crate::types::{Change, ChangeType, CompareResult, Mapping, MappingEntry, MappingId, MemberId, ObjType};

/// Outcome of one run of [`map_changes`], partitioning the mappings touched
/// this round.
#[derive(Debug, Default)]
pub struct MapResult {
	pub no_op: Vec<MappingId>,
	pub solved: Vec<MappingId>,
	pub conflicting: Vec<MappingId>,
}

/// Minimal union-find for grouping unmatched ADDED changes by compare
/// verdict; `n` is small (members per objtype), so no rank heuristic.
struct UnionFind {
	parent: Vec<usize>,
}

impl UnionFind {
	fn new(n: usize) -> Self {
		UnionFind { parent: (0..n).collect() }
	}

	fn find(&mut self, x: usize) -> usize {
		if self.parent[x] != x {
			self.parent[x] = self.find(self.parent[x]);
		}
		self.parent[x]
	}

	fn union(&mut self, a: usize, b: usize) {
		let ra = self.find(a);
		let rb = self.find(b);
		if ra != rb {
			self.parent[ra] = rb;
		}
	}
}

fn changetypes_compatible(a: ChangeType, b: ChangeType) -> bool {
	use ChangeType::*;
	match (a, b) {
		(Unmodified, _) | (_, Unmodified) => true,
		(Deleted, Deleted) => true,
		(Added, Added) => true,
		(Modified, Modified) => true,
		_ => false,
	}
}

/// A mapping is a conflict iff its entries carry non-compatible changetypes,
/// or, for ADDED/MODIFIED entries, a pairwise format-compare returns
/// SIMILAR/DIFFERENT. Pure "one member modified, others unchanged" is not a
/// conflict.
fn is_conflicting(mapping: &Mapping, env: &FormatEnv) -> bool {
	let changed: Vec<&Change> = mapping.entries().iter().filter_map(|e| e.change.as_ref()).collect();
	for i in 0..changed.len() {
		for j in (i + 1)..changed.len() {
			let a = changed[i];
			let b = changed[j];
			if !changetypes_compatible(a.change_type, b.change_type) {
				return true;
			}
			let both_content = matches!(a.change_type, ChangeType::Added | ChangeType::Modified)
				&& matches!(b.change_type, ChangeType::Added | ChangeType::Modified);
			if both_content {
				match env.compare(a, b) {
					Ok(CompareResult::Same) => {}
					Ok(_) => return true,
					Err(_) => return true,
				}
			}
		}
	}
	false
}

/// Apply one round's reported changes to `table`, following the matching
/// rules in order. `next_id` allocates a fresh [`MappingId`] for changes with
/// no archive match (usually `Archive::next_mapping_id`).
pub fn map_changes(
	table: &mut MappingTable,
	objtype: &ObjType,
	member_changes: &[(MemberId, Vec<Change>)],
	env: &FormatEnv,
	mut next_id: impl FnMut() -> Result<MappingId>,
) -> Result<MapResult> {
	let mut touched: Vec<MappingId> = Vec::new();
	let mut unmatched_added: Vec<(MemberId, Change)> = Vec::new();

	// Rules 1-2: archive match, or a fresh single-member mapping for
	// unmatched DELETED/MODIFIED.
	for (member, changes) in member_changes {
		for change in changes {
			if change.change_type == ChangeType::Unknown {
				continue;
			}
			if let Some(id) = table.find_by_member_uid(*member, &change.uid) {
				if let Some(mapping) = table.get_mut(id) {
					mapping.set_entry(MappingEntry {
						member_id: *member,
						uid: change.uid.clone(),
						change: Some(change.clone()),
					});
				}
				touched.push(id);
				continue;
			}

			match change.change_type {
				ChangeType::Added => unmatched_added.push((*member, change.clone())),
				ChangeType::Deleted | ChangeType::Modified => {
					warn!(
						objtype = %objtype,
						member = member.0,
						uid = %change.uid,
						changetype = %change.change_type,
						"unmatched {} with no archive entry; creating a new single-member mapping",
						change.change_type
					);
					let id = next_id()?;
					let mapping = Mapping::with_entry(
						id,
						MappingEntry { member_id: *member, uid: change.uid.clone(), change: Some(change.clone()) },
					);
					table.insert(mapping);
					touched.push(id);
				}
				ChangeType::Unmodified | ChangeType::Unknown => {}
			}
		}
	}

	// Rules 3-4: cross-member grouping of unmatched ADDED changes. Every
	// cross-member pair is compared up front so a SIMILAR match never
	// pre-empts a SAME match that only shows up later in arrival order
	// (the "same+similar" regression the callback menu exists to avoid):
	// SAME edges union first; SIMILAR edges union only a pair where
	// *neither side* has a SAME edge to anyone at all.
	let n = unmatched_added.len();
	let mut pairwise: HashMap<(usize, usize), CompareResult> = HashMap::new();
	for i in 0..n {
		for j in (i + 1)..n {
			if unmatched_added[i].0 == unmatched_added[j].0 {
				continue; // never union two ADDED changes from the same member
			}
			if let Ok(r) = env.compare(&unmatched_added[i].1, &unmatched_added[j].1) {
				pairwise.insert((i, j), r);
			}
		}
	}

	let mut has_same = vec![false; n];
	for (&(i, j), r) in &pairwise {
		if *r == CompareResult::Same {
			has_same[i] = true;
			has_same[j] = true;
		}
	}

	let mut uf = UnionFind::new(n);
	for (&(i, j), r) in &pairwise {
		if *r == CompareResult::Same {
			uf.union(i, j);
		}
	}
	for (&(i, j), r) in &pairwise {
		if *r == CompareResult::Similar && !has_same[i] && !has_same[j] {
			uf.union(i, j);
		}
	}

	let mut by_root: HashMap<usize, Vec<usize>> = HashMap::new();
	for i in 0..n {
		by_root.entry(uf.find(i)).or_default().push(i);
	}

	let mut final_groups: Vec<Vec<usize>> = Vec::new();
	for (_, members_in_root) in by_root {
		let mut seen_members: std::collections::HashSet<MemberId> = Default::default();
		let mut group = Vec::new();
		for idx in members_in_root {
			if seen_members.insert(unmatched_added[idx].0) {
				group.push(idx);
			} else {
				// Transitive unioning merged two changes from the same
				// member into one root; keep the mapping invariant by
				// splitting the later one back out on its own.
				final_groups.push(vec![idx]);
			}
		}
		final_groups.push(group);
	}

	for group in final_groups {
		let id = next_id()?;
		let mut mapping = Mapping::new(id);
		for idx in group {
			let (member, change) = &unmatched_added[idx];
			mapping.set_entry(MappingEntry { member_id: *member, uid: change.uid.clone(), change: Some(change.clone()) });
		}
		table.insert(mapping);
		touched.push(id);
	}

	// Rule 5: classify each touched mapping.
	touched.sort_unstable_by_key(|id| id.0);
	touched.dedup();
	let mut result = MapResult::default();
	for id in touched {
		let Some(mapping) = table.get(id) else { continue };
		let any_change = mapping.entries().iter().any(|e| e.change.is_some());
		if !any_change {
			result.no_op.push(id);
		} else if is_conflicting(mapping, env) {
			result.conflicting.push(id);
		} else {
			result.solved.push(id);
		}
	}
	Ok(result)
}


// vim: ts=4
