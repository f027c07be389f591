//! Child-process transport for [`super::Plugin`].
//!
//! Spawns the plugin binary once per member and speaks a line-delimited JSON
//! RPC over its stdio: one request object written per call, one response
//! object read back, so a plugin can live in any language that can read and
//! write lines on stdin/stdout.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;

use super::{ConnectOutcome, Plugin};
use crate::error::{ErrorKind, OpenSyncError, Result};
use crate::types::{Change, ChangeType, FormatName, ObjType, Uid};

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
	GetVersion,
	HasMainSink,
	Initialize,
	MainConnect,
	MainDisconnect,
	Connect { objtype: &'a str },
	ConnectDone { objtype: &'a str, slow_sync: bool },
	GetChanges { objtype: &'a str, slow_sync: bool },
	Commit { objtype: &'a str, change: WireChange },
	CommittedAll { objtype: &'a str },
	SyncDone { objtype: &'a str },
	Disconnect { objtype: &'a str },
	Finalize,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireChange {
	uid: String,
	hash: String,
	change_type: String,
	objtype: String,
	format: String,
	data_base64: String,
}

impl From<&Change> for WireChange {
	fn from(c: &Change) -> Self {
		WireChange {
			uid: c.uid.0.clone(),
			hash: c.hash.clone(),
			change_type: c.change_type.to_string(),
			objtype: c.objtype.0.clone(),
			format: c.format.0.clone(),
			data_base64: base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &c.data[..]),
		}
	}
}

impl WireChange {
	fn into_change(self) -> Result<Change> {
		let change_type = match self.change_type.as_str() {
			"ADDED" => ChangeType::Added,
			"MODIFIED" => ChangeType::Modified,
			"DELETED" => ChangeType::Deleted,
			"UNMODIFIED" => ChangeType::Unmodified,
			_ => ChangeType::Unknown,
		};
		let data = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &self.data_base64)
			.map_err(|e| OpenSyncError::new(ErrorKind::Convert, format!("bad base64 from plugin: {e}")))?;
		Ok(Change::new(
			Uid(self.uid),
			self.hash,
			change_type,
			ObjType(self.objtype),
			FormatName(self.format),
			data,
		))
	}
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Response {
	Ok { ok: bool, result: serde_json::Value },
	Err { ok: bool, kind: String, message: String },
}

fn parse_error_kind(kind: &str) -> ErrorKind {
	match kind {
		"IO_ERROR" => ErrorKind::IoError,
		"NOT_SUPPORTED" => ErrorKind::NotSupported,
		"TIMEOUT" => ErrorKind::Timeout,
		"DISCONNECTED" => ErrorKind::Disconnected,
		"FILE_NOT_FOUND" => ErrorKind::FileNotFound,
		"EXISTS" => ErrorKind::Exists,
		"CONVERT" => ErrorKind::Convert,
		"MISCONFIGURATION" => ErrorKind::Misconfiguration,
		"INITIALIZATION" => ErrorKind::Initialization,
		"PARAMETER" => ErrorKind::Parameter,
		"EXPECTED" => ErrorKind::Expected,
		"NO_CONNECTION" => ErrorKind::NoConnection,
		"TEMPORARY" => ErrorKind::Temporary,
		"LOCKED" => ErrorKind::Locked,
		"PLUGIN_NOT_FOUND" => ErrorKind::PluginNotFound,
		_ => ErrorKind::Generic,
	}
}

/// A plugin run as a separate child process, spoken to over stdin/stdout.
pub struct ChildProcessPlugin {
	stdin: Mutex<ChildStdin>,
	stdout: Mutex<BufReader<ChildStdout>>,
	_child: Child,
}

impl ChildProcessPlugin {
	pub async fn spawn(binary: &Path, args: &[&str]) -> Result<Self> {
		let mut child = tokio::process::Command::new(binary)
			.args(args)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.spawn()
			.map_err(|e| OpenSyncError::new(ErrorKind::Initialization, format!("failed to spawn plugin: {e}")))?;

		let stdin = child
			.stdin
			.take()
			.ok_or_else(|| OpenSyncError::new(ErrorKind::Initialization, "plugin stdin unavailable"))?;
		let stdout = child
			.stdout
			.take()
			.ok_or_else(|| OpenSyncError::new(ErrorKind::Initialization, "plugin stdout unavailable"))?;

		Ok(ChildProcessPlugin { stdin: Mutex::new(stdin), stdout: Mutex::new(BufReader::new(stdout)), _child: child })
	}

	async fn call(&self, req: Request<'_>) -> Result<serde_json::Value> {
		let mut line = serde_json::to_string(&req)?;
		line.push('\n');

		{
			let mut stdin = self.stdin.lock().await;
			stdin
				.write_all(line.as_bytes())
				.await
				.map_err(|e| OpenSyncError::new(ErrorKind::IoError, format!("writing to plugin: {e}")))?;
		}

		let mut buf = String::new();
		{
			let mut stdout = self.stdout.lock().await;
			let n = stdout
				.read_line(&mut buf)
				.await
				.map_err(|e| OpenSyncError::new(ErrorKind::IoError, format!("reading from plugin: {e}")))?;
			if n == 0 {
				return Err(OpenSyncError::new(ErrorKind::Disconnected, "plugin closed its stdout"));
			}
		}

		let response: Response = serde_json::from_str(buf.trim_end())?;
		match response {
			Response::Ok { ok: true, result } => Ok(result),
			Response::Err { kind, message, .. } => Err(OpenSyncError::new(parse_error_kind(&kind), message)),
			Response::Ok { ok: false, .. } => {
				Err(OpenSyncError::new(ErrorKind::Generic, "plugin returned ok=false with no error kind"))
			}
		}
	}
}

#[async_trait::async_trait]
impl Plugin for ChildProcessPlugin {
	fn get_version(&self) -> u32 {
		1
	}

	async fn initialize(&self) -> Result<()> {
		self.call(Request::Initialize).await.map(|_| ())
	}

	fn has_main_sink(&self) -> bool {
		false
	}

	async fn main_connect(&self) -> Result<ConnectOutcome> {
		let result = self.call(Request::MainConnect).await?;
		Ok(if result.as_bool().unwrap_or(false) { ConnectOutcome::SlowSync } else { ConnectOutcome::Ok })
	}

	async fn main_disconnect(&self) -> Result<()> {
		self.call(Request::MainDisconnect).await.map(|_| ())
	}

	async fn connect(&self, objtype: &ObjType) -> Result<ConnectOutcome> {
		let result = self.call(Request::Connect { objtype: &objtype.0 }).await?;
		Ok(if result.as_bool().unwrap_or(false) { ConnectOutcome::SlowSync } else { ConnectOutcome::Ok })
	}

	async fn connect_done(&self, objtype: &ObjType, slow_sync: bool) -> Result<()> {
		self.call(Request::ConnectDone { objtype: &objtype.0, slow_sync }).await.map(|_| ())
	}

	async fn get_changes(&self, objtype: &ObjType, slow_sync: bool) -> Result<Vec<Change>> {
		let result = self.call(Request::GetChanges { objtype: &objtype.0, slow_sync }).await?;
		let wire: Vec<WireChange> = serde_json::from_value(result)?;
		wire.into_iter().map(WireChange::into_change).collect()
	}

	async fn commit(&self, objtype: &ObjType, change: &Change) -> Result<()> {
		self.call(Request::Commit { objtype: &objtype.0, change: WireChange::from(change) }).await.map(|_| ())
	}

	async fn committed_all(&self, objtype: &ObjType) -> Result<()> {
		self.call(Request::CommittedAll { objtype: &objtype.0 }).await.map(|_| ())
	}

	async fn sync_done(&self, objtype: &ObjType) -> Result<()> {
		self.call(Request::SyncDone { objtype: &objtype.0 }).await.map(|_| ())
	}

	async fn disconnect(&self, objtype: &ObjType) -> Result<()> {
		self.call(Request::Disconnect { objtype: &objtype.0 }).await.map(|_| ())
	}

	async fn finalize(&self) -> Result<()> {
		self.call(Request::Finalize).await.map(|_| ())
	}
}


// vim: ts=4
