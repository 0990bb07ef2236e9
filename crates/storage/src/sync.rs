// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Storage-backed sync.
//!
//! The whole collection persists under one storage key as
//! `{ entry_key: { version_key, data } }`. Every local write mints a fresh
//! version key; other instances listening on the same storage compare
//! version keys against their last snapshot to synthesize
//! insert/update/delete events; data equality never needs deep
//! comparison.

use std::{
	collections::BTreeMap,
	sync::{Arc, Weak},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use rill_collection::{Collection, CollectionConfig, SyncHandle, SyncSource, SyncWrite};
use rill_transaction::{MutationType, Transaction};
use rill_type::{Key, Value, diagnostic::storage as diag, error};

use crate::{Result, StorageApi};

#[derive(Clone, Serialize, Deserialize)]
struct PersistedEntry {
	version_key: String,
	data: Value,
}

fn encode_key(key: &Key) -> String {
	match key {
		Key::Int8(value) => format!("i:{}", value),
		Key::Utf8(value) => format!("s:{}", value),
	}
}

pub struct StorageSync {
	storage: Arc<dyn StorageApi>,
	storage_key: String,
	handle: Mutex<Option<SyncHandle>>,
	/// entry key -> (version key, last known data), the comparison base
	/// for cross-instance diffs.
	snapshot: Mutex<BTreeMap<String, (String, Value)>>,
	self_weak: Weak<StorageSync>,
}

impl StorageSync {
	pub fn new(storage: Arc<dyn StorageApi>, storage_key: impl Into<String>) -> Arc<Self> {
		let storage_key = storage_key.into();
		Arc::new_cyclic(|self_weak| Self {
			storage,
			storage_key,
			handle: Mutex::new(None),
			snapshot: Mutex::new(BTreeMap::new()),
			self_weak: self_weak.clone(),
		})
	}

	fn load(&self) -> Result<BTreeMap<String, PersistedEntry>> {
		match self.storage.get_item(&self.storage_key) {
			None => Ok(BTreeMap::new()),
			Some(raw) => serde_json::from_str(&raw).map_err(|_| error!(diag::invalid_format(&self.storage_key))),
		}
	}

	fn save(&self, entries: &BTreeMap<String, PersistedEntry>) -> Result<()> {
		let raw = serde_json::to_string(entries).map_err(|cause| error!(diag::serialization(cause.to_string())))?;
		self.storage.set_item(&self.storage_key, &raw)
	}

	/// Persist a transaction's mutations for `collection`, then echo
	/// them back through the sync path so the baseline reflects them.
	pub fn persist_transaction(&self, transaction: &Transaction, collection: &Collection) -> Result<()> {
		let mut entries = self.load()?;
		let mutations = transaction.mutations_for(collection.id());

		{
			let mut snapshot = self.snapshot.lock();
			for mutation in &mutations {
				let entry_key = encode_key(&mutation.key);
				match mutation.mutation_type {
					MutationType::Insert | MutationType::Update => {
						let entry = PersistedEntry {
							version_key: Uuid::new_v4().to_string(),
							data: mutation.modified.clone(),
						};
						snapshot.insert(entry_key.clone(), (entry.version_key.clone(), entry.data.clone()));
						entries.insert(entry_key, entry);
					}
					MutationType::Delete => {
						snapshot.remove(&entry_key);
						entries.remove(&entry_key);
					}
				}
			}
		}

		self.save(&entries)?;

		let Some(handle) = self.handle.lock().clone() else {
			return Ok(());
		};
		handle.begin();
		for mutation in mutations {
			let write = match mutation.mutation_type {
				MutationType::Insert => SyncWrite::insert(mutation.modified),
				MutationType::Update => SyncWrite::update(mutation.modified),
				MutationType::Delete => SyncWrite::delete(mutation.modified),
			};
			handle.write(write)?;
		}
		handle.commit()
	}

	/// Compare storage against the last snapshot and push synthetic
	/// events for every version-key difference.
	fn diff_against_storage(&self) {
		let Some(handle) = self.handle.lock().clone() else {
			return;
		};
		let entries = match self.load() {
			Ok(entries) => entries,
			Err(load_error) => {
				warn!(error = %load_error, "storage reload failed");
				return;
			}
		};

		let mut snapshot = self.snapshot.lock();
		let mut writes = Vec::new();
		for (entry_key, entry) in &entries {
			match snapshot.get(entry_key) {
				None => writes.push(SyncWrite::insert(entry.data.clone())),
				Some((version, _)) if *version != entry.version_key => {
					writes.push(SyncWrite::update(entry.data.clone()));
				}
				_ => {}
			}
		}
		for (entry_key, (_, data)) in snapshot.iter() {
			if !entries.contains_key(entry_key) {
				writes.push(SyncWrite::delete(data.clone()));
			}
		}

		if writes.is_empty() {
			return;
		}
		debug!(count = writes.len(), "applying cross-instance storage changes");
		*snapshot = entries
			.into_iter()
			.map(|(entry_key, entry)| (entry_key, (entry.version_key, entry.data)))
			.collect();
		drop(snapshot);

		handle.begin();
		for write in writes {
			if let Err(write_error) = handle.write(write) {
				warn!(error = %write_error, "cross-instance write rejected");
			}
		}
		if let Err(commit_error) = handle.commit() {
			warn!(error = %commit_error, "cross-instance commit failed");
		}
	}
}

impl SyncSource for StorageSync {
	fn sync(&self, handle: SyncHandle) -> Option<Box<dyn FnOnce() + Send>> {
		*self.handle.lock() = Some(handle.clone());

		let entries = match self.load() {
			Ok(entries) => entries,
			Err(load_error) => {
				warn!(error = %load_error, "initial storage load failed");
				handle.mark_error();
				return None;
			}
		};

		handle.begin();
		for entry in entries.values() {
			if let Err(write_error) = handle.write(SyncWrite::insert(entry.data.clone())) {
				warn!(error = %write_error, "persisted row rejected");
			}
		}
		if let Err(commit_error) = handle.commit() {
			warn!(error = %commit_error, "initial storage commit failed");
		}
		handle.mark_ready();

		*self.snapshot.lock() = entries
			.into_iter()
			.map(|(entry_key, entry)| (entry_key, (entry.version_key, entry.data)))
			.collect();

		// storage events from other instances drive the live diff; the
		// listener holds a weak reference so cleanup can win
		let storage_key = self.storage_key.clone();
		let listener_self = self.self_weak.clone();
		let listener = self.storage.add_listener(Arc::new(move |changed_key: &str| {
			if changed_key != storage_key {
				return;
			}
			if let Some(sync) = listener_self.upgrade() {
				sync.diff_against_storage();
			}
		}));

		let storage = self.storage.clone();
		Some(Box::new(move || {
			storage.remove_listener(listener);
		}))
	}
}

/// A collection persisted in `storage` under `storage_key`, with
/// handlers wired to write through the adapter.
pub fn storage_collection(storage: Arc<dyn StorageApi>, storage_key: impl Into<String>) -> CollectionConfig {
	let sync = StorageSync::new(storage, storage_key);
	let for_insert = sync.clone();
	let for_update = sync.clone();
	let for_delete = sync.clone();
	CollectionConfig::new(sync)
		.on_insert(move |transaction, collection| for_insert.persist_transaction(transaction, collection))
		.on_update(move |transaction, collection| for_update.persist_transaction(transaction, collection))
		.on_delete(move |transaction, collection| for_delete.persist_transaction(transaction, collection))
}
