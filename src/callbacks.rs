//! EngineCore's event/conflict callback surface.
//!
//! One trait per concern, plus a closure-based builder producing a boxed
//! composite. The conflict callback returns the six-item resolution menu
//! from [`crate::obj_engine::ConflictResolution`].

use crate::error::OpenSyncError;
use crate::obj_engine::ConflictResolution;
use crate::types::{Change, Mapping, MemberId, ObjType};

/// A status event EngineCore emits over the lifetime of one round.
#[derive(Debug, Clone)]
pub enum StatusEvent {
	Connected(ObjType),
	ConnectDone(ObjType),
	Read(ObjType),
	Mapped(ObjType),
	EndConflicts(ObjType),
	Multiplied(ObjType),
	Written(ObjType),
	SyncDone(ObjType),
	Disconnected(ObjType),
	Successful(ObjType),
	Error(ObjType, OpenSyncError),
	PrevUnclean,
}

type StatusFn = dyn Fn(&StatusEvent) + Send + Sync;
type ConflictFn = dyn Fn(&Mapping) -> ConflictResolution + Send + Sync;
type ChangeFn = dyn Fn(MemberId, &Change) + Send + Sync;
type MemberFn = dyn Fn(MemberId, &StatusEvent) + Send + Sync;
type MappingFn = dyn Fn(&Mapping) + Send + Sync;

/// Status (engine-wide lifecycle) events.
pub trait StatusCallback: Send + Sync {
	fn on_status(&self, event: &StatusEvent);
}

pub struct NoStatusCallback;
impl StatusCallback for NoStatusCallback {
	fn on_status(&self, _event: &StatusEvent) {}
}

/// Conflict resolution requests; see [`crate::obj_engine::ConflictCallback`],
/// which this crate's [`crate::obj_engine::ObjEngine`] actually calls.
/// `EngineCallbacks` bridges a `Fn` closure onto that trait.
pub trait ConflictCallback: Send + Sync {
	fn on_conflict(&self, mapping: &Mapping) -> ConflictResolution;
}

/// Default: always aborts, forcing the caller to opt into a real policy.
pub struct AbortOnConflictCallback;
impl ConflictCallback for AbortOnConflictCallback {
	fn on_conflict(&self, _mapping: &Mapping) -> ConflictResolution {
		ConflictResolution::Abort
	}
}

/// One member reported a change (before mapping/multiplying).
pub trait ChangeCallback: Send + Sync {
	fn on_change(&self, member: MemberId, change: &Change);
}

pub struct NoChangeCallback;
impl ChangeCallback for NoChangeCallback {
	fn on_change(&self, _member: MemberId, _change: &Change) {}
}

/// A per-member status update, e.g. a member-scoped error.
pub trait MemberCallback: Send + Sync {
	fn on_member_event(&self, member: MemberId, event: &StatusEvent);
}

pub struct NoMemberCallback;
impl MemberCallback for NoMemberCallback {
	fn on_member_event(&self, _member: MemberId, _event: &StatusEvent) {}
}

/// A mapping reached a terminal state this round (solved, conflicting,
/// ignored).
pub trait MappingCallback: Send + Sync {
	fn on_mapping(&self, mapping: &Mapping);
}

pub struct NoMappingCallback;
impl MappingCallback for NoMappingCallback {
	fn on_mapping(&self, _mapping: &Mapping) {}
}

/// The combined set EngineCore's `set_callbacks` installs.
pub trait EngineCallbacks: Send + Sync {
	fn on_status(&self, _event: &StatusEvent) {}
	fn on_conflict(&self, _mapping: &Mapping) -> ConflictResolution {
		ConflictResolution::Abort
	}
	fn on_change(&self, _member: MemberId, _change: &Change) {}
	fn on_member_event(&self, _member: MemberId, _event: &StatusEvent) {}
	fn on_mapping(&self, _mapping: &Mapping) {}
}

pub struct NoCallbacks;
impl EngineCallbacks for NoCallbacks {}

/// Adapts an [`EngineCallbacks`] reference to the narrower
/// [`crate::obj_engine::ConflictCallback`] trait `ObjEngine::run_round`
/// expects, since trait objects can't be upcast directly.
pub struct ConflictBridge<'a>(pub &'a dyn EngineCallbacks);

impl<'a> crate::obj_engine::ConflictCallback for ConflictBridge<'a> {
	fn resolve(&self, mapping: &Mapping) -> ConflictResolution {
		self.0.on_conflict(mapping)
	}
}

/// Closure-based builder producing a boxed composite callback set.
#[derive(Default)]
pub struct CallbackBuilder {
	status: Option<Box<StatusFn>>,
	conflict: Option<Box<ConflictFn>>,
	change: Option<Box<ChangeFn>>,
	member: Option<Box<MemberFn>>,
	mapping: Option<Box<MappingFn>>,
}

impl CallbackBuilder {
	pub fn new() -> Self {
		CallbackBuilder::default()
	}

	pub fn on_status<F>(mut self, f: F) -> Self
	where
		F: Fn(&StatusEvent) + Send + Sync + 'static,
	{
		self.status = Some(Box::new(f));
		self
	}

	pub fn on_conflict<F>(mut self, f: F) -> Self
	where
		F: Fn(&Mapping) -> ConflictResolution + Send + Sync + 'static,
	{
		self.conflict = Some(Box::new(f));
		self
	}

	pub fn on_change<F>(mut self, f: F) -> Self
	where
		F: Fn(MemberId, &Change) + Send + Sync + 'static,
	{
		self.change = Some(Box::new(f));
		self
	}

	pub fn on_member_event<F>(mut self, f: F) -> Self
	where
		F: Fn(MemberId, &StatusEvent) + Send + Sync + 'static,
	{
		self.member = Some(Box::new(f));
		self
	}

	pub fn on_mapping<F>(mut self, f: F) -> Self
	where
		F: Fn(&Mapping) + Send + Sync + 'static,
	{
		self.mapping = Some(Box::new(f));
		self
	}

	pub fn build(self) -> Box<dyn EngineCallbacks> {
		Box::new(CompositeCallbacks {
			status: self.status,
			conflict: self.conflict,
			change: self.change,
			member: self.member,
			mapping: self.mapping,
		})
	}
}

struct CompositeCallbacks {
	status: Option<Box<StatusFn>>,
	conflict: Option<Box<ConflictFn>>,
	change: Option<Box<ChangeFn>>,
	member: Option<Box<MemberFn>>,
	mapping: Option<Box<MappingFn>>,
}

impl EngineCallbacks for CompositeCallbacks {
	fn on_status(&self, event: &StatusEvent) {
		if let Some(f) = &self.status {
			f(event);
		}
	}

	fn on_conflict(&self, mapping: &Mapping) -> ConflictResolution {
		match &self.conflict {
			Some(f) => f(mapping),
			None => ConflictResolution::Abort,
		}
	}

	fn on_change(&self, member: MemberId, change: &Change) {
		if let Some(f) = &self.change {
			f(member, change);
		}
	}

	fn on_member_event(&self, member: MemberId, event: &StatusEvent) {
		if let Some(f) = &self.member {
			f(member, event);
		}
	}

	fn on_mapping(&self, mapping: &Mapping) {
		if let Some(f) = &self.mapping {
			f(mapping);
		}
	}
}


// vim: ts=4
