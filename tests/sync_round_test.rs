//! End-to-end coverage of the three baseline scenarios: a single add
//! propagating, a delete propagating, and a genuine conflict resolved
//! through a custom callback.

mod support;

use std::sync::Arc;

use opensync_engine::callbacks::CallbackBuilder;
use opensync_engine::{ConflictResolution, EngineConfig, EngineCore, MemberId};
use support::{objtype, plain_env, MockPlugin};
use tempfile::TempDir;

fn config(tmp: &TempDir) -> EngineConfig {
	let mut config = EngineConfig::default();
	config.state_dir = tmp.path().to_path_buf();
	config
}

#[tokio::test]
async fn single_add_propagates_to_the_other_member() {
	let tmp = TempDir::new().unwrap();
	let mut engine = EngineCore::new(config(&tmp), plain_env());

	let a = Arc::new(MockPlugin::with_entry("doc1", b"hello"));
	let b = Arc::new(MockPlugin::new());
	engine.register_member(MemberId(0), vec![objtype()], a.clone());
	engine.register_member(MemberId(1), vec![objtype()], b.clone());

	engine.initialize().await.unwrap();
	engine.synchronize_and_block().await.unwrap();
	engine.finalize().await.unwrap();

	assert_eq!(b.get("doc1"), Some(b"hello".to_vec()));
}

#[tokio::test]
async fn delete_propagates_after_a_prior_sync() {
	let tmp = TempDir::new().unwrap();
	let a = Arc::new(MockPlugin::with_entry("doc1", b"hello"));
	let b = Arc::new(MockPlugin::new());

	{
		let mut engine = EngineCore::new(config(&tmp), plain_env());
		engine.register_member(MemberId(0), vec![objtype()], a.clone());
		engine.register_member(MemberId(1), vec![objtype()], b.clone());
		engine.initialize().await.unwrap();
		engine.synchronize_and_block().await.unwrap();
		engine.finalize().await.unwrap();
	}
	assert!(b.contains("doc1"));

	// Second round: member A's store no longer has doc1, so its hashtable
	// reports it deleted. A fresh `EngineCore` stands in for a new process
	// picking up the same on-disk state.
	{
		a.remove("doc1");
		let mut engine = EngineCore::new(config(&tmp), plain_env());
		engine.register_member(MemberId(0), vec![objtype()], a.clone());
		engine.register_member(MemberId(1), vec![objtype()], b.clone());
		engine.initialize().await.unwrap();
		engine.synchronize_and_block().await.unwrap();
		engine.finalize().await.unwrap();
	}

	assert!(!b.contains("doc1"));
}

#[tokio::test]
async fn divergent_modification_is_resolved_by_the_installed_callback() {
	let tmp = TempDir::new().unwrap();
	let a = Arc::new(MockPlugin::with_entry("doc1", b"hello"));
	let b = Arc::new(MockPlugin::new());

	// First round maps doc1 across both members with identical content.
	{
		let mut engine = EngineCore::new(config(&tmp), plain_env());
		engine.register_member(MemberId(0), vec![objtype()], a.clone());
		engine.register_member(MemberId(1), vec![objtype()], b.clone());
		engine.initialize().await.unwrap();
		engine.synchronize_and_block().await.unwrap();
		engine.finalize().await.unwrap();
	}
	assert_eq!(b.get("doc1"), Some(b"hello".to_vec()));

	// Second round: both members independently change doc1 to different
	// content. Member 0 is picked as the winner.
	a.put("doc1", b"from-a");
	b.put("doc1", b"from-b");

	let mut engine = EngineCore::new(config(&tmp), plain_env());
	engine.register_member(MemberId(0), vec![objtype()], a.clone());
	engine.register_member(MemberId(1), vec![objtype()], b.clone());
	engine.set_callbacks(
		CallbackBuilder::new().on_conflict(|_mapping| ConflictResolution::Pick(MemberId(0))).build(),
	);
	engine.initialize().await.unwrap();
	engine.synchronize_and_block().await.unwrap();
	engine.finalize().await.unwrap();

	assert_eq!(a.get("doc1"), Some(b"from-a".to_vec()));
	assert_eq!(b.get("doc1"), Some(b"from-a".to_vec()));
}

// vim: ts=4
