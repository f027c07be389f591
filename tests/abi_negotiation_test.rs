//! A plugin whose ABI version has no overlap with the engine's supported
//! set is disabled rather than aborting the whole group.

mod support;

use std::sync::Arc;

use opensync_engine::{EngineConfig, EngineCore, MemberId};
use support::{objtype, plain_env, MockPlugin};
use tempfile::TempDir;

#[tokio::test]
async fn unsupported_abi_version_disables_member_but_sync_still_completes() {
	let tmp = TempDir::new().unwrap();
	let mut config = EngineConfig::default();
	config.state_dir = tmp.path().to_path_buf();

	let a = Arc::new(MockPlugin::with_entry("doc1", b"hello"));
	let mut stale_plugin = MockPlugin::new();
	stale_plugin.version = 99;
	let stale = Arc::new(stale_plugin);

	let mut engine = EngineCore::new(config, plain_env());
	engine.register_member(MemberId(0), vec![objtype()], a.clone());
	engine.register_member(MemberId(1), vec![objtype()], stale.clone());

	engine.initialize().await.unwrap();
	engine.synchronize_and_block().await.unwrap();
	engine.finalize().await.unwrap();

	assert!(!stale.contains("doc1"));
}

// vim: ts=4
