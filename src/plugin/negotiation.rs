//! ABI version negotiation between the engine and a plugin.
//!
//! Each side advertises the versions it supports; the engine picks the
//! highest version common to both, an intersect-then-max over two sets.

use crate::error::{ErrorKind, OpenSyncError, Result};

/// Versions this build of the engine's plugin ABI understands, newest last.
pub const SUPPORTED_VERSIONS: &[u32] = &[1];

/// Pick the highest version present in both `ours` and `theirs`.
pub fn negotiate(ours: &[u32], theirs: &[u32]) -> Result<u32> {
	ours.iter()
		.filter(|v| theirs.contains(v))
		.max()
		.copied()
		.ok_or_else(|| {
			OpenSyncError::new(
				ErrorKind::Misconfiguration,
				format!("no common plugin ABI version: engine supports {ours:?}, plugin supports {theirs:?}"),
			)
		})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn picks_highest_common_version() {
		assert_eq!(negotiate(&[1, 2, 3], &[2, 3, 4]).unwrap(), 3);
	}

	#[test]
	fn no_overlap_is_misconfiguration() {
		let err = negotiate(&[1, 2], &[3, 4]).unwrap_err();
		assert_eq!(err.kind, ErrorKind::Misconfiguration);
	}

	#[test]
	fn single_supported_version_matches_itself() {
		assert_eq!(negotiate(SUPPORTED_VERSIONS, &[1]).unwrap(), 1);
	}
}

// vim: ts=4
