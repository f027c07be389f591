//! Error types for the synchronization engine.

use std::fmt;
use std::sync::Arc;

/// Classifies an [`OpenSyncError`] the way every engine callback and log line
/// reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	Generic,
	IoError,
	NotSupported,
	Timeout,
	Disconnected,
	FileNotFound,
	Exists,
	Convert,
	Misconfiguration,
	Initialization,
	Parameter,
	/// Test-only: injected by test harnesses to exercise error paths.
	Expected,
	NoConnection,
	Temporary,
	Locked,
	PluginNotFound,
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ErrorKind::Generic => "GENERIC",
			ErrorKind::IoError => "IO_ERROR",
			ErrorKind::NotSupported => "NOT_SUPPORTED",
			ErrorKind::Timeout => "TIMEOUT",
			ErrorKind::Disconnected => "DISCONNECTED",
			ErrorKind::FileNotFound => "FILE_NOT_FOUND",
			ErrorKind::Exists => "EXISTS",
			ErrorKind::Convert => "CONVERT",
			ErrorKind::Misconfiguration => "MISCONFIGURATION",
			ErrorKind::Initialization => "INITIALIZATION",
			ErrorKind::Parameter => "PARAMETER",
			ErrorKind::Expected => "EXPECTED",
			ErrorKind::NoConnection => "NO_CONNECTION",
			ErrorKind::Temporary => "TEMPORARY",
			ErrorKind::Locked => "LOCKED",
			ErrorKind::PluginNotFound => "PLUGIN_NOT_FOUND",
		};
		f.write_str(s)
	}
}

/// The engine's single error type.
///
/// Errors chain via `cause`, oldest first, the way the original C
/// implementation stacks `OSyncError`s on top of each other. `Arc` lets the
/// same cause be attached to more than one callback delivery (member, change
/// and mapping updates can all carry the same underlying error).
#[derive(Debug, Clone)]
pub struct OpenSyncError {
	pub kind: ErrorKind,
	pub message: String,
	pub cause: Option<Arc<OpenSyncError>>,
}

impl OpenSyncError {
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		OpenSyncError { kind, message: message.into(), cause: None }
	}

	/// Stack `self` on top of `cause`, matching `osync_error_stack(parent, child)`.
	pub fn stacked(kind: ErrorKind, message: impl Into<String>, cause: OpenSyncError) -> Self {
		OpenSyncError { kind, message: message.into(), cause: Some(Arc::new(cause)) }
	}

	pub fn with_cause(mut self, cause: OpenSyncError) -> Self {
		self.cause = Some(Arc::new(cause));
		self
	}

	/// Root-cause trace, oldest error last, matching `osync_error_print_stack`.
	pub fn root_cause_trace(&self) -> String {
		let mut lines = Vec::new();
		let mut cur: Option<&OpenSyncError> = Some(self);
		while let Some(e) = cur {
			lines.push(format!("{}: {}", e.kind, e.message));
			cur = e.cause.as_deref();
		}
		lines.join("\ncaused by: ")
	}

	pub fn locked(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::Locked, message)
	}

	pub fn timeout(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::Timeout, message)
	}
}

impl fmt::Display for OpenSyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.kind, self.message)
	}
}

impl std::error::Error for OpenSyncError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		self.cause.as_ref().map(|c| c.as_ref() as &(dyn std::error::Error + 'static))
	}
}

impl From<std::io::Error> for OpenSyncError {
	fn from(e: std::io::Error) -> Self {
		let kind = match e.kind() {
			std::io::ErrorKind::NotFound => ErrorKind::FileNotFound,
			std::io::ErrorKind::AlreadyExists => ErrorKind::Exists,
			_ => ErrorKind::IoError,
		};
		OpenSyncError::new(kind, e.to_string())
	}
}

impl From<redb::Error> for OpenSyncError {
	fn from(e: redb::Error) -> Self {
		OpenSyncError::new(ErrorKind::Generic, format!("archive storage error: {e}"))
	}
}

impl From<redb::DatabaseError> for OpenSyncError {
	fn from(e: redb::DatabaseError) -> Self {
		OpenSyncError::new(ErrorKind::Generic, format!("archive database error: {e}"))
	}
}

impl From<redb::TransactionError> for OpenSyncError {
	fn from(e: redb::TransactionError) -> Self {
		OpenSyncError::new(ErrorKind::Generic, format!("archive transaction error: {e}"))
	}
}

impl From<redb::TableError> for OpenSyncError {
	fn from(e: redb::TableError) -> Self {
		OpenSyncError::new(ErrorKind::Generic, format!("archive table error: {e}"))
	}
}

impl From<redb::StorageError> for OpenSyncError {
	fn from(e: redb::StorageError) -> Self {
		OpenSyncError::new(ErrorKind::IoError, format!("archive storage I/O error: {e}"))
	}
}

impl From<redb::CommitError> for OpenSyncError {
	fn from(e: redb::CommitError) -> Self {
		OpenSyncError::new(ErrorKind::IoError, format!("archive commit error: {e}"))
	}
}

impl From<serde_json::Error> for OpenSyncError {
	fn from(e: serde_json::Error) -> Self {
		OpenSyncError::new(ErrorKind::Generic, format!("serialization error: {e}"))
	}
}

impl From<tokio::time::error::Elapsed> for OpenSyncError {
	fn from(_: tokio::time::error::Elapsed) -> Self {
		OpenSyncError::new(ErrorKind::Timeout, "operation timed out")
	}
}

pub type Result<T> = std::result::Result<T, OpenSyncError>;


// vim: ts=4
