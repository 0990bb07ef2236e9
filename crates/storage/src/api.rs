// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::{
	collections::HashMap,
	sync::{
		Arc,
		atomic::{AtomicU64, Ordering},
	},
};

use parking_lot::Mutex;

use crate::Result;

pub type StorageListener = Arc<dyn Fn(&str) + Send + Sync>;

/// The contract a storage adapter consumes: string-keyed item access plus
/// change notification carrying the storage key that changed.
pub trait StorageApi: Send + Sync {
	fn get_item(&self, key: &str) -> Option<String>;
	fn set_item(&self, key: &str, value: &str) -> Result<()>;
	fn remove_item(&self, key: &str);
	fn add_listener(&self, listener: StorageListener) -> u64;
	fn remove_listener(&self, id: u64);
}

struct MemoryStorageInner {
	items: Mutex<HashMap<String, String>>,
	listeners: Mutex<HashMap<u64, StorageListener>>,
	next_listener: AtomicU64,
}

/// An in-process storage. Clones share the same store and listener set,
/// which makes a clone behave like a second browsing context for
/// cross-instance tests.
#[derive(Clone)]
pub struct MemoryStorage {
	inner: Arc<MemoryStorageInner>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self {
			inner: Arc::new(MemoryStorageInner {
				items: Mutex::new(HashMap::new()),
				listeners: Mutex::new(HashMap::new()),
				next_listener: AtomicU64::new(1),
			}),
		}
	}

	fn notify(&self, key: &str) {
		let listeners: Vec<StorageListener> = self.inner.listeners.lock().values().cloned().collect();
		for listener in listeners {
			listener(key);
		}
	}
}

impl Default for MemoryStorage {
	fn default() -> Self {
		Self::new()
	}
}

impl StorageApi for MemoryStorage {
	fn get_item(&self, key: &str) -> Option<String> {
		self.inner.items.lock().get(key).cloned()
	}

	fn set_item(&self, key: &str, value: &str) -> Result<()> {
		self.inner.items.lock().insert(key.to_string(), value.to_string());
		self.notify(key);
		Ok(())
	}

	fn remove_item(&self, key: &str) {
		self.inner.items.lock().remove(key);
		self.notify(key);
	}

	fn add_listener(&self, listener: StorageListener) -> u64 {
		let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
		self.inner.listeners.lock().insert(id, listener);
		id
	}

	fn remove_listener(&self, id: u64) {
		self.inner.listeners.lock().remove(&id);
	}
}
