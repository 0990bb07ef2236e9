// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;

use rill_collection::{Collection, CollectionConfig, SyncHandle, SyncSource, SyncWrite};
use rill_transaction::{MutationType, Transaction};
use rill_type::Value;

/// A sync source driven by the test: it hands its generation-scoped handle
/// back out so tests can push server-side changes at will.
pub struct ManualSync {
	initial: Mutex<Vec<Value>>,
	handle: Mutex<Option<SyncHandle>>,
	pub sync_calls: AtomicUsize,
	pub cleanup_calls: Arc<AtomicUsize>,
}

impl ManualSync {
	pub fn new() -> Arc<Self> {
		Self::with_rows(Vec::new())
	}

	pub fn with_rows(rows: Vec<Value>) -> Arc<Self> {
		Arc::new(Self {
			initial: Mutex::new(rows),
			handle: Mutex::new(None),
			sync_calls: AtomicUsize::new(0),
			cleanup_calls: Arc::new(AtomicUsize::new(0)),
		})
	}

	pub fn handle(&self) -> SyncHandle {
		self.handle.lock().clone().expect("sync was started")
	}

	/// Push one committed server-side insert.
	pub fn server_insert(&self, row: Value) {
		let handle = self.handle();
		handle.begin();
		handle.write(SyncWrite::insert(row)).unwrap();
		handle.commit().unwrap();
	}

	pub fn server_update(&self, row: Value) {
		let handle = self.handle();
		handle.begin();
		handle.write(SyncWrite::update(row)).unwrap();
		handle.commit().unwrap();
	}

	pub fn server_delete(&self, row: Value) {
		let handle = self.handle();
		handle.begin();
		handle.write(SyncWrite::delete(row)).unwrap();
		handle.commit().unwrap();
	}
}

impl SyncSource for ManualSync {
	fn sync(&self, handle: SyncHandle) -> Option<Box<dyn FnOnce() + Send>> {
		self.sync_calls.fetch_add(1, Ordering::SeqCst);
		*self.handle.lock() = Some(handle.clone());

		let rows: Vec<Value> = self.initial.lock().clone();
		handle.begin();
		for row in rows {
			handle.write(SyncWrite::insert(row)).unwrap();
		}
		handle.commit().unwrap();
		handle.mark_ready();

		let cleanups = Arc::clone(&self.cleanup_calls);
		Some(Box::new(move || {
			cleanups.fetch_add(1, Ordering::SeqCst);
		}))
	}
}

/// A persistence handler that echoes every mutation back through the sync
/// path, the way a server acknowledgement would.
pub fn ack_handler(sync: Arc<ManualSync>) -> impl Fn(&Transaction, &Collection) -> rill_collection::Result<()> {
	move |transaction, _collection| {
		let handle = sync.handle();
		handle.begin();
		for mutation in transaction.mutations() {
			let write = match mutation.mutation_type {
				MutationType::Insert => SyncWrite::insert(mutation.modified.clone()),
				MutationType::Update => SyncWrite::update(mutation.modified.clone()),
				MutationType::Delete => SyncWrite::delete(mutation.modified.clone()),
			};
			handle.write(write)?;
		}
		handle.commit()
	}
}

/// A collection whose handlers ack through the manual sync source.
pub fn acked_collection(sync: Arc<ManualSync>) -> Collection {
	let config = CollectionConfig::new(sync.clone())
		.on_insert(ack_handler(sync.clone()))
		.on_update(ack_handler(sync.clone()))
		.on_delete(ack_handler(sync));
	Collection::create(config)
}
