// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use rill_query::{Direction, Expression};
use rill_type::{PropPath, Value};

use crate::SyncHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncWriteType {
	Insert,
	Update,
	Delete,
}

/// One write pushed by a sync source. The collection derives the key from
/// the value unless the source supplies one explicitly (derived pipelines
/// key their output rows themselves).
#[derive(Clone, Debug)]
pub struct SyncWrite {
	pub write_type: SyncWriteType,
	pub value: Value,
	pub metadata: Option<Value>,
	pub key: Option<rill_type::Key>,
}

impl SyncWrite {
	pub fn insert(value: Value) -> Self {
		Self {
			write_type: SyncWriteType::Insert,
			value,
			metadata: None,
			key: None,
		}
	}

	pub fn update(value: Value) -> Self {
		Self {
			write_type: SyncWriteType::Update,
			value,
			metadata: None,
			key: None,
		}
	}

	pub fn delete(value: Value) -> Self {
		Self {
			write_type: SyncWriteType::Delete,
			value,
			metadata: None,
			key: None,
		}
	}

	pub fn with_metadata(mut self, metadata: Value) -> Self {
		self.metadata = Some(metadata);
		self
	}

	pub fn with_key(mut self, key: rill_type::Key) -> Self {
		self.key = Some(key);
		self
	}
}

/// What a subscription asks an on-demand source to load.
#[derive(Clone, Debug, Default)]
pub struct SubsetOptions {
	pub filter: Option<Expression>,
	pub order_by: Option<(PropPath, Direction)>,
	pub limit: Option<usize>,
	pub offset: Option<usize>,
}

/// The interface the collection consumes from a sync transport.
///
/// `sync` is invoked on every (re)start with a fresh generation-scoped
/// handle; the returned closure runs on cleanup. Writes against a handle
/// from a cancelled generation are ignored, which is what makes a restart
/// race-free.
pub trait SyncSource: Send + Sync {
	fn sync(&self, handle: SyncHandle) -> Option<Box<dyn FnOnce() + Send>>;

	/// Load additional rows matching `options`. `false` means the source
	/// cannot serve the request (not configured, or exhausted).
	fn load_subset(&self, _options: &SubsetOptions, _handle: &SyncHandle) -> bool {
		false
	}

	/// Load the next chunk of an incremental sync. `false` when
	/// exhausted.
	fn load_more(&self, _handle: &SyncHandle) -> bool {
		false
	}

	/// Opaque per-source metadata recorded on mutations for the benefit
	/// of persistence handlers.
	fn sync_metadata(&self) -> Option<Value> {
		None
	}
}

/// Buffered writes between a `begin`/`commit` pair, applied atomically at
/// commit time (or later, once no foreign transaction is persisting).
#[derive(Default)]
pub(crate) struct PendingSyncedTransaction {
	pub writes: Vec<SyncWrite>,
	pub truncate: bool,
	pub committed: bool,
}
