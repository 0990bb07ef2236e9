// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;

use rill::{SyncHandle, SyncSource, SyncWrite, Value};

/// A sync source the test drives by hand through its stored handle.
pub struct ManualSync {
	initial: Mutex<Vec<Value>>,
	handle: Mutex<Option<SyncHandle>>,
	pub load_subset_calls: AtomicUsize,
}

impl ManualSync {
	pub fn new() -> Arc<Self> {
		Self::with_rows(Vec::new())
	}

	pub fn with_rows(rows: Vec<Value>) -> Arc<Self> {
		Arc::new(Self {
			initial: Mutex::new(rows),
			handle: Mutex::new(None),
			load_subset_calls: AtomicUsize::new(0),
		})
	}

	pub fn handle(&self) -> SyncHandle {
		self.handle.lock().clone().expect("sync started")
	}

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
}

impl SyncSource for ManualSync {
	fn sync(&self, handle: SyncHandle) -> Option<Box<dyn FnOnce() + Send>> {
		*self.handle.lock() = Some(handle.clone());

		let rows: Vec<Value> = self.initial.lock().clone();
		handle.begin();
		for row in rows {
			handle.write(SyncWrite::insert(row)).unwrap();
		}
		handle.commit().unwrap();
		handle.mark_ready();
		None
	}

	fn load_subset(&self, _options: &rill::SubsetOptions, _handle: &SyncHandle) -> bool {
		self.load_subset_calls.fetch_add(1, Ordering::SeqCst);
		false
	}
}
