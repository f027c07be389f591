//! FormatEnv (C1): object format registry and conversion-path search.
//!
//! Grounded on the breadth-first path search the original
//! `opensync_format_env_internals.h` describes, reworked as a Dijkstra-style
//! search over a lexicographic cost (objtype changes, losses, conversions)
//! since path cost is no longer uniform per edge once those three counters
//! are tracked independently.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use crate::error::{ErrorKind, OpenSyncError, Result};
use crate::types::{Change, CompareResult, FormatName, ObjType, Uid};

/// Per-format operations a plugin registers: compare, duplicate, hash.
pub trait ObjectFormatOps: Send + Sync {
	fn compare(&self, a: &Change, b: &Change) -> CompareResult;
	fn duplicate(&self, uid: &Uid) -> Uid;
	fn create_hash(&self, data: &[u8]) -> String {
		blake3::hash(data).to_hex().to_string()
	}
	fn print(&self, data: &[u8]) -> String {
		String::from_utf8_lossy(data).into_owned()
	}
}

#[derive(Clone)]
struct RegisteredFormat {
	objtype: ObjType,
	ops: Arc<dyn ObjectFormatOps>,
}

/// Kind of edge in the converter graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConverterKind {
	Conv,
	Desencap,
	Encap,
	Detector,
}

/// The function a converter runs. `None` for detectors, which only classify.
pub trait ConverterOps: Send + Sync {
	/// Rewrite `data` from the converter's source format into its target
	/// format. Only called for CONV/DESENCAP/ENCAP converters.
	fn convert(&self, data: &[u8]) -> Result<Vec<u8>> {
		let _ = data;
		Err(OpenSyncError::new(ErrorKind::NotSupported, "converter has no convert implementation"))
	}

	/// Classify: does `data` really hold the converter's target format?
	/// Only called for DETECTOR converters.
	fn detect(&self, data: &[u8]) -> bool {
		let _ = data;
		false
	}
}

/// Edge between two [`ObjectFormatOps`], carrying the loss/objtype-change
/// bookkeeping the path search prunes on.
pub struct Converter {
	pub from: FormatName,
	pub to: FormatName,
	pub kind: ConverterKind,
	pub loss: bool,
	pub extension: Option<String>,
	pub ops: Arc<dyn ConverterOps>,
}

/// Registry of formats and converters, plus BFS/Dijkstra conversion-path
/// search between them.
#[derive(Default)]
pub struct FormatEnv {
	formats: HashMap<FormatName, RegisteredFormat>,
	converters: Vec<Converter>,
	/// Adjacency list: format -> indices into `converters` whose `from` is
	/// that format.
	edges_from: HashMap<FormatName, Vec<usize>>,
}

/// A resolved conversion path: the ordered list of converter indices to
/// apply, cheapest-first.
pub struct ConversionPath {
	steps: Vec<usize>,
	pub target: FormatName,
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct Cost {
	objtype_changes: u32,
	losses: u32,
	conversions: u32,
}

impl Cost {
	const ZERO: Cost = Cost { objtype_changes: 0, losses: 0, conversions: 0 };

	fn key(&self) -> (u32, u32, u32) {
		(self.objtype_changes, self.losses, self.conversions)
	}
}

impl PartialOrd for Cost {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}
impl Ord for Cost {
	fn cmp(&self, other: &Self) -> Ordering {
		self.key().cmp(&other.key())
	}
}

/// Min-heap entry; `BinaryHeap` is a max-heap so costs are reversed.
struct HeapEntry {
	cost: Cost,
	format: FormatName,
	path: Vec<usize>,
}

impl PartialEq for HeapEntry {
	fn eq(&self, other: &Self) -> bool {
		self.cost == other.cost
	}
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}
impl Ord for HeapEntry {
	fn cmp(&self, other: &Self) -> Ordering {
		// reversed: BinaryHeap pops the greatest, we want the cheapest
		other.cost.cmp(&self.cost)
	}
}

impl FormatEnv {
	pub fn new() -> Self {
		FormatEnv::default()
	}

	pub fn register_format(&mut self, name: FormatName, objtype: ObjType, ops: Arc<dyn ObjectFormatOps>) {
		self.formats.insert(name, RegisteredFormat { objtype, ops });
	}

	pub fn register_converter(&mut self, converter: Converter) {
		let idx = self.converters.len();
		self.edges_from.entry(converter.from.clone()).or_default().push(idx);
		self.converters.push(converter);
	}

	pub fn find_format(&self, name: &FormatName) -> Option<&dyn ObjectFormatOps> {
		self.formats.get(name).map(|f| f.ops.as_ref())
	}

	pub fn objtype_of(&self, name: &FormatName) -> Option<&ObjType> {
		self.formats.get(name).map(|f| &f.objtype)
	}

	pub fn find_converter(&self, src: &FormatName, tgt: &FormatName) -> Option<&Converter> {
		self.edges_from
			.get(src)
			.into_iter()
			.flatten()
			.map(|&i| &self.converters[i])
			.find(|c| &c.to == tgt)
	}

	/// Breadth-first (cost-ordered) search over the converter graph rooted
	/// at `src`, returning the cheapest path to any format in `targets`.
	/// Returns `None` ("no path") rather than an error.
	pub fn find_path(&self, src: &FormatName, targets: &[FormatName]) -> Option<ConversionPath> {
		if targets.iter().any(|t| t == src) {
			return Some(ConversionPath { steps: Vec::new(), target: src.clone() });
		}

		let mut best: HashMap<FormatName, Cost> = HashMap::new();
		let mut heap = BinaryHeap::new();
		best.insert(src.clone(), Cost::ZERO);
		heap.push(HeapEntry { cost: Cost::ZERO, format: src.clone(), path: Vec::new() });

		let src_objtype = self.objtype_of(src);

		while let Some(HeapEntry { cost, format, path }) = heap.pop() {
			if let Some(&known) = best.get(&format) {
				if known < cost {
					continue;
				}
			}
			if targets.contains(&format) {
				return Some(ConversionPath { steps: path, target: format });
			}
			let Some(edge_indices) = self.edges_from.get(&format) else { continue };
			for &idx in edge_indices {
				let conv = &self.converters[idx];
				if conv.kind == ConverterKind::Detector {
					// Detectors only classify; they are not traversed as
					// rewriting steps during path search.
					continue;
				}
				let objtype_change = match (src_objtype, self.objtype_of(&conv.to)) {
					(Some(a), Some(b)) if a != b => 1,
					_ => 0,
				};
				let mut next_cost = cost;
				next_cost.objtype_changes += objtype_change;
				next_cost.losses += conv.loss as u32;
				next_cost.conversions += 1;

				let better = match best.get(&conv.to) {
					Some(&existing) => next_cost < existing,
					None => true,
				};
				if better {
					best.insert(conv.to.clone(), next_cost);
					let mut next_path = path.clone();
					next_path.push(idx);
					heap.push(HeapEntry { cost: next_cost, format: conv.to.clone(), path: next_path });
				}
			}
		}
		None
	}

	/// Classify an untyped blob by trying every registered DETECTOR
	/// converter whose source objtype matches, if any.
	pub fn detect_format(&self, objtype: &ObjType, data: &[u8]) -> Option<FormatName> {
		for conv in &self.converters {
			if conv.kind != ConverterKind::Detector {
				continue;
			}
			if self.objtype_of(&conv.to) != Some(objtype) {
				continue;
			}
			if conv.ops.detect(data) {
				return Some(conv.to.clone());
			}
		}
		None
	}

	/// Apply a resolved path to `change`, producing a new change in the
	/// target format. On any converter failure, returns `CONVERT` and the
	/// caller's original `change` is left untouched (we only mutate a local
	/// copy).
	pub fn convert(&self, change: &Change, path: &ConversionPath) -> Result<Change> {
		let mut data: Vec<u8> = change.data.to_vec();
		let mut format = change.format.clone();
		for &idx in &path.steps {
			let conv = &self.converters[idx];
			if conv.from != format {
				return Err(OpenSyncError::new(
					ErrorKind::Convert,
					format!("conversion path broken: expected format {}, have {}", conv.from, format),
				));
			}
			data = conv.ops.convert(&data).map_err(|e| {
				OpenSyncError::stacked(
					ErrorKind::Convert,
					format!("converter {} -> {} failed", conv.from, conv.to),
					e,
				)
			})?;
			format = conv.to.clone();
		}
		let mut out = change.clone();
		out.data = Arc::from(data.into_boxed_slice());
		out.format = format;
		if let Some(fmt) = self.formats.get(&out.format) {
			out.hash = fmt.ops.create_hash(&out.data);
		}
		Ok(out)
	}

	/// Compare `a` and `b`, converting `b` onto `a`'s format first if they
	/// differ. Backs ChangeMapper's cross-member grouping step, which only
	/// ever needs a pairwise verdict, not a full merge.
	pub fn compare(&self, a: &Change, b: &Change) -> Result<CompareResult> {
		let a_ops = self
			.find_format(&a.format)
			.ok_or_else(|| OpenSyncError::new(ErrorKind::Misconfiguration, format!("unknown format {}", a.format)))?;
		if a.format == b.format {
			return Ok(a_ops.compare(a, b));
		}
		let path = self.find_path(&b.format, &[a.format.clone()]).ok_or_else(|| {
			OpenSyncError::new(ErrorKind::Convert, format!("no conversion path from {} to {}", b.format, a.format))
		})?;
		let converted_b = self.convert(b, &path)?;
		Ok(a_ops.compare(a, &converted_b))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{ChangeType, Uid};

	struct IdentityFormat;
	impl ObjectFormatOps for IdentityFormat {
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

	struct UppercaseConverter;
	impl ConverterOps for UppercaseConverter {
		fn convert(&self, data: &[u8]) -> Result<Vec<u8>> {
			Ok(String::from_utf8_lossy(data).to_uppercase().into_bytes())
		}
	}

	struct FailingConverter;
	impl ConverterOps for FailingConverter {
		fn convert(&self, _data: &[u8]) -> Result<Vec<u8>> {
			Err(OpenSyncError::new(ErrorKind::Convert, "boom"))
		}
	}

	fn test_change(format: &str, data: &str) -> Change {
		Change::new(
			Uid("u1".into()),
			"h",
			ChangeType::Added,
			ObjType("file".into()),
			FormatName(format.into()),
			data.as_bytes().to_vec(),
		)
	}

	#[test]
	fn find_path_direct_edge() {
		let mut env = FormatEnv::new();
		env.register_format(FormatName("plain".into()), ObjType("file".into()), Arc::new(IdentityFormat));
        env.register_format(FormatName("upper".into()), ObjType("file".into()), Arc::new(IdentityFormat));
		env.register_converter(Converter {
			from: FormatName("plain".into()),
			to: FormatName("upper".into()),
			kind: ConverterKind::Conv,
			loss: false,
			extension: None,
			ops: Arc::new(UppercaseConverter),
		});

		let path = env.find_path(&FormatName("plain".into()), &[FormatName("upper".into())]).unwrap();
		assert_eq!(path.target, FormatName("upper".into()));
		let out = env.convert(&test_change("plain", "hi"), &path).unwrap();
		assert_eq!(&*out.data, b"HI");
		assert_eq!(out.format, FormatName("upper".into()));
	}

	#[test]
	fn find_path_returns_none_when_unreachable() {
		let mut env = FormatEnv::new();
		env.register_format(FormatName("plain".into()), ObjType("file".into()), Arc::new(IdentityFormat));
		env.register_format(FormatName("island".into()), ObjType("file".into()), Arc::new(IdentityFormat));
		assert!(env.find_path(&FormatName("plain".into()), &[FormatName("island".into())]).is_none());
	}

	#[test]
	fn convert_failure_reports_convert_kind() {
		let mut env = FormatEnv::new();
		env.register_format(FormatName("plain".into()), ObjType("file".into()), Arc::new(IdentityFormat));
		env.register_format(FormatName("broken".into()), ObjType("file".into()), Arc::new(IdentityFormat));
		env.register_converter(Converter {
			from: FormatName("plain".into()),
			to: FormatName("broken".into()),
			kind: ConverterKind::Conv,
			loss: false,
			extension: None,
			ops: Arc::new(FailingConverter),
		});
		let path = env.find_path(&FormatName("plain".into()), &[FormatName("broken".into())]).unwrap();
		let err = env.convert(&test_change("plain", "hi"), &path).unwrap_err();
		assert_eq!(err.kind, ErrorKind::Convert);
	}

	#[test]
	fn prefers_fewer_objtype_changes_over_shorter_path() {
		let mut env = FormatEnv::new();
		env.register_format(FormatName("a".into()), ObjType("file".into()), Arc::new(IdentityFormat));
		env.register_format(FormatName("b".into()), ObjType("file".into()), Arc::new(IdentityFormat));
		env.register_format(FormatName("c".into()), ObjType("note".into()), Arc::new(IdentityFormat));
		// a -> c is a single hop but changes objtype; a -> b -> c(same-objtype alias) would
		// be preferred if it existed. Here we only assert the single-hop objtype-changing
		// path is still found when it's the only option.
		env.register_converter(Converter {
			from: FormatName("a".into()),
			to: FormatName("c".into()),
			kind: ConverterKind::Conv,
			loss: false,
			extension: None,
			ops: Arc::new(UppercaseConverter),
		});
		let path = env.find_path(&FormatName("a".into()), &[FormatName("c".into())]).unwrap();
		assert_eq!(path.target, FormatName("c".into()));
	}

	#[test]
	fn compare_converts_mismatched_formats_first() {
		let mut env = FormatEnv::new();
		env.register_format(FormatName("plain".into()), ObjType("file".into()), Arc::new(IdentityFormat));
		env.register_format(FormatName("upper".into()), ObjType("file".into()), Arc::new(IdentityFormat));
		env.register_converter(Converter {
			from: FormatName("upper".into()),
			to: FormatName("plain".into()),
			kind: ConverterKind::Conv,
			loss: false,
			extension: None,
			ops: Arc::new(UppercaseConverter),
		});
		let a = test_change("plain", "HI");
		let b = test_change("upper", "hi");
		assert_eq!(env.compare(&a, &b).unwrap(), CompareResult::Same);
	}
}

// vim: ts=4
