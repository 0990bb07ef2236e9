// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! The collection core: a synced baseline plus an optimistic overlay.
//!
//! Everything readers observe is the derived view
//! `view(k) = deleted(k) ? none : upsert(k) else synced(k)`. The baseline
//! is owned by the sync source and only changes through the
//! begin/write/commit protocol; the overlay is rebuilt from the active
//! transaction set whenever it changes.

use std::{
	collections::{BTreeMap, BTreeSet, HashSet},
	sync::{
		Arc, Weak,
		atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
	},
};

use crossbeam_skiplist::SkipMap;
use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, instrument, trace, warn};

use rill_core::{ChangeEvent, ChangeOp, CollectionId, OverlaySink};
use rill_index::{CollectionIndex, IndexKind};
use rill_runtime::{TimerHandle, TimerService};
use rill_transaction::{MutationType, PendingMutation, Transaction, TransactionOptions};
use rill_type::{
	Key, PropPath, Value,
	diagnostic::{collection as diag, schema as schema_diag},
	error, internal,
};

use crate::{
	CollectionConfig, Draft, MutationHandler, Result, SubscribeChangesOptions, SyncMode, Validated,
	subscription::{CollectionSubscription, SubscriptionShared},
	sync::{PendingSyncedTransaction, SyncWrite, SyncWriteType},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectionStatus {
	Idle,
	Loading,
	InitialCommit,
	Ready,
	LoadingMore,
	Error,
	CleanedUp,
}

impl CollectionStatus {
	pub fn name(&self) -> &'static str {
		match self {
			CollectionStatus::Idle => "idle",
			CollectionStatus::Loading => "loading",
			CollectionStatus::InitialCommit => "initial_commit",
			CollectionStatus::Ready => "ready",
			CollectionStatus::LoadingMore => "loading_more",
			CollectionStatus::Error => "error",
			CollectionStatus::CleanedUp => "cleaned_up",
		}
	}
}

#[derive(Clone, Default)]
struct Overlay {
	upserts: BTreeMap<Key, Value>,
	deletes: BTreeSet<Key>,
}

type ItemListener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

#[derive(Default)]
struct Listeners {
	next_id: u64,
	item: IndexMap<u64, ItemListener>,
	keyed: IndexMap<u64, (Key, ItemListener)>,
	batch: IndexMap<u64, Arc<SubscriptionShared>>,
}

pub(crate) struct CollectionInner {
	id: CollectionId,
	name: String,
	pub(crate) config: CollectionConfig,
	synced: SkipMap<Key, Value>,
	synced_metadata: SkipMap<Key, Value>,
	overlay: RwLock<Overlay>,
	pending_sync: Mutex<Vec<PendingSyncedTransaction>>,
	status: Mutex<CollectionStatus>,
	status_changed: Condvar,
	listeners: RwLock<Listeners>,
	indexes: RwLock<Vec<Arc<CollectionIndex>>>,
	subscriber_count: AtomicUsize,
	generation: AtomicU64,
	gc_timer: Mutex<Option<TimerHandle>>,
	has_received_first_commit: AtomicBool,
	first_commit_callbacks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
	sync_cleanup: Mutex<Option<(u64, Box<dyn FnOnce() + Send>)>>,
	size: AtomicUsize,
	weak_self: Weak<CollectionInner>,
}

/// A reactive keyed collection. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Collection {
	inner: Arc<CollectionInner>,
}

impl PartialEq for Collection {
	fn eq(&self, other: &Self) -> bool {
		self.inner.id == other.inner.id
	}
}

impl Collection {
	pub fn create(config: CollectionConfig) -> Self {
		let id = CollectionId::next();
		let name = config.id.clone().unwrap_or_else(|| id.to_string());
		let start = config.start_sync && config.sync_mode == SyncMode::Eager;

		let collection = Self {
			inner: Arc::new_cyclic(|weak_self| CollectionInner {
				id,
				name,
				config,
				synced: SkipMap::new(),
				synced_metadata: SkipMap::new(),
				overlay: RwLock::new(Overlay::default()),
				pending_sync: Mutex::new(Vec::new()),
				status: Mutex::new(CollectionStatus::Idle),
				status_changed: Condvar::new(),
				listeners: RwLock::new(Listeners::default()),
				indexes: RwLock::new(Vec::new()),
				subscriber_count: AtomicUsize::new(0),
				generation: AtomicU64::new(0),
				gc_timer: Mutex::new(None),
				has_received_first_commit: AtomicBool::new(false),
				first_commit_callbacks: Mutex::new(Vec::new()),
				sync_cleanup: Mutex::new(None),
				size: AtomicUsize::new(0),
				weak_self: weak_self.clone(),
			}),
		};

		if start {
			collection.start_sync();
		}
		collection
	}

	pub(crate) fn from_inner(inner: Arc<CollectionInner>) -> Self {
		Self {
			inner,
		}
	}

	pub fn id(&self) -> CollectionId {
		self.inner.id
	}

	pub(crate) fn inner_config(&self) -> &CollectionConfig {
		&self.inner.config
	}

	pub fn name(&self) -> &str {
		&self.inner.name
	}

	pub fn status(&self) -> CollectionStatus {
		*self.inner.status.lock()
	}

	pub fn has_received_first_commit(&self) -> bool {
		self.inner.has_received_first_commit.load(Ordering::SeqCst)
	}

	pub fn active_subscribers(&self) -> usize {
		self.inner.subscriber_count.load(Ordering::SeqCst)
	}

	// ---------------------------------------------------------------
	// Derived view
	// ---------------------------------------------------------------

	pub fn get(&self, key: &Key) -> Option<Value> {
		self.restart_if_cleaned_up();
		let overlay = self.inner.overlay.read();
		if overlay.deletes.contains(key) {
			return None;
		}
		if let Some(value) = overlay.upserts.get(key) {
			return Some(value.clone());
		}
		drop(overlay);
		self.inner.synced.get(key).map(|entry| entry.value().clone())
	}

	pub fn has(&self, key: &Key) -> bool {
		self.get(key).is_some()
	}

	pub fn size(&self) -> usize {
		self.inner.size.load(Ordering::SeqCst)
	}

	/// The derived view as an ordered map.
	pub fn state(&self) -> BTreeMap<Key, Value> {
		self.restart_if_cleaned_up();
		let overlay = self.inner.overlay.read();
		let mut state: BTreeMap<Key, Value> = BTreeMap::new();
		for entry in self.inner.synced.iter() {
			state.insert(entry.key().clone(), entry.value().clone());
		}
		for (key, value) in &overlay.upserts {
			state.insert(key.clone(), value.clone());
		}
		for key in &overlay.deletes {
			state.remove(key);
		}
		state
	}

	pub fn keys(&self) -> Vec<Key> {
		self.state().into_keys().collect()
	}

	pub fn values(&self) -> Vec<Value> {
		self.state().into_values().collect()
	}

	pub fn entries(&self) -> Vec<(Key, Value)> {
		self.state().into_iter().collect()
	}

	/// Items in key order, or in the configured comparator's order with
	/// the key as tiebreaker.
	pub fn to_array(&self) -> Vec<Value> {
		let entries = self.entries();
		match &self.inner.config.compare {
			None => entries.into_iter().map(|(_, value)| value).collect(),
			Some(compare) => {
				let mut entries = entries;
				// wrap the user comparator so no pair is ever
				// unordered: distinct rows tie-break by key
				entries.sort_by(|(left_key, left), (right_key, right)| {
					compare(left, right).then_with(|| left_key.cmp(right_key))
				});
				entries.into_iter().map(|(_, value)| value).collect()
			}
		}
	}

	/// Baseline value, ignoring the optimistic overlay.
	pub fn get_synced_value(&self, key: &Key) -> Option<Value> {
		self.inner.synced.get(key).map(|entry| entry.value().clone())
	}

	pub fn get_synced_metadata(&self, key: &Key) -> Option<Value> {
		self.inner.synced_metadata.get(key).map(|entry| entry.value().clone())
	}

	// ---------------------------------------------------------------
	// Readiness
	// ---------------------------------------------------------------

	/// Run `callback` once after the first sync commit; immediately when
	/// it already happened.
	pub fn on_first_commit(&self, callback: impl FnOnce() + Send + 'static) {
		if self.has_received_first_commit() {
			callback();
			return;
		}
		self.inner.first_commit_callbacks.lock().push(Box::new(callback));
	}

	/// Block until the collection is ready (or failed).
	pub fn preload(&self) -> Result<()> {
		self.ensure_started();
		let mut status = self.inner.status.lock();
		loop {
			match *status {
				CollectionStatus::Ready | CollectionStatus::LoadingMore => return Ok(()),
				CollectionStatus::Error => return Err(error!(internal!("sync failed for '{}'", self.name()))),
				CollectionStatus::CleanedUp => return Err(error!(diag::cleaned_up(self.name()))),
				_ => self.inner.status_changed.wait(&mut status),
			}
		}
	}

	pub fn state_when_ready(&self) -> Result<BTreeMap<Key, Value>> {
		self.preload()?;
		Ok(self.state())
	}

	pub fn to_array_when_ready(&self) -> Result<Vec<Value>> {
		self.preload()?;
		Ok(self.to_array())
	}

	// ---------------------------------------------------------------
	// Optimistic mutations
	// ---------------------------------------------------------------

	pub fn insert(&self, item: Value) -> Result<Transaction> {
		self.insert_many(vec![item], None)
	}

	#[instrument(name = "collection::insert", level = "debug", skip_all, fields(collection = %self.name()))]
	pub fn insert_many(&self, items: Vec<Value>, metadata: Option<Value>) -> Result<Transaction> {
		self.restart_if_cleaned_up();
		let ambient = rill_transaction::ambient_transaction();
		let handler = self.require_handler(&ambient, self.inner.config.on_insert.clone(), "insert", "on_insert")?;

		let sync_metadata = self.inner.config.sync.sync_metadata();
		let mut mutations = Vec::with_capacity(items.len());
		let mut batch_keys: HashSet<Key> = HashSet::new();
		for item in items {
			let validated = self.validate_insert(&item)?;
			let key = self.key_of(&validated)?;
			if self.has(&key) || !batch_keys.insert(key.clone()) {
				return Err(error!(diag::duplicate_key(&key)));
			}
			let mut mutation = PendingMutation::insert(self.id(), key, validated, metadata.clone());
			mutation.sync_metadata = sync_metadata.clone();
			mutations.push(mutation);
		}

		self.run_mutations(ambient, handler, mutations)
	}

	pub fn update(&self, key: impl Into<Key>, callback: impl FnOnce(&mut Draft)) -> Result<Transaction> {
		let key = key.into();
		let mut callback = Some(callback);
		self.update_many_with_metadata(vec![key], None, move |draft| {
			if let Some(callback) = callback.take() {
				callback(draft);
			}
		})
	}

	pub fn update_many(&self, keys: Vec<Key>, callback: impl FnMut(&mut Draft)) -> Result<Transaction> {
		self.update_many_with_metadata(keys, None, callback)
	}

	#[instrument(name = "collection::update", level = "debug", skip_all, fields(collection = %self.name()))]
	pub fn update_many_with_metadata(
		&self,
		keys: Vec<Key>,
		metadata: Option<Value>,
		mut callback: impl FnMut(&mut Draft),
	) -> Result<Transaction> {
		self.restart_if_cleaned_up();
		if keys.is_empty() {
			return Err(error!(diag::empty_key_list("update")));
		}
		let ambient = rill_transaction::ambient_transaction();
		let handler = self.require_handler(&ambient, self.inner.config.on_update.clone(), "update", "on_update")?;

		let sync_metadata = self.inner.config.sync.sync_metadata();
		let mut mutations = Vec::with_capacity(keys.len());
		for key in keys {
			let current = self.get(&key).ok_or_else(|| error!(diag::unknown_key(&key)))?;

			let mut draft = Draft::new(current.clone());
			callback(&mut draft);
			if !draft.is_dirty() {
				continue;
			}

			let changes = self.validate_update(&current, &draft.changes())?;
			let mut modified = current.clone();
			modified.merge(&changes);

			let modified_key = self.key_of(&modified)?;
			if modified_key != key {
				return Err(error!(diag::key_mutation(&key, &modified_key)));
			}

			let mut mutation = PendingMutation::update(self.id(), key, current, modified, changes, metadata.clone());
			mutation.sync_metadata = sync_metadata.clone();
			mutations.push(mutation);
		}

		self.run_mutations(ambient, handler, mutations)
	}

	pub fn delete(&self, key: impl Into<Key>) -> Result<Transaction> {
		self.delete_many(vec![key.into()], None)
	}

	#[instrument(name = "collection::delete", level = "debug", skip_all, fields(collection = %self.name()))]
	pub fn delete_many(&self, keys: Vec<Key>, metadata: Option<Value>) -> Result<Transaction> {
		self.restart_if_cleaned_up();
		if keys.is_empty() {
			return Err(error!(diag::empty_key_list("delete")));
		}
		let ambient = rill_transaction::ambient_transaction();
		let handler = self.require_handler(&ambient, self.inner.config.on_delete.clone(), "delete", "on_delete")?;

		let sync_metadata = self.inner.config.sync.sync_metadata();
		let mut mutations = Vec::with_capacity(keys.len());
		for key in keys {
			let current = self.get(&key).ok_or_else(|| error!(diag::unknown_key(&key)))?;
			let mut mutation = PendingMutation::delete(self.id(), key, current, metadata.clone());
			mutation.sync_metadata = sync_metadata.clone();
			mutations.push(mutation);
		}

		self.run_mutations(ambient, handler, mutations)
	}

	/// Roll back every pending transaction touching one of `keys` (all
	/// pending transactions of this collection when `keys` is `None`).
	pub fn rollback_optimistic_updates(&self, keys: Option<&[Key]>) {
		for transaction in rill_transaction::pending_transactions_touching(self.id(), keys) {
			if let Err(rollback_error) = transaction.rollback() {
				trace!(id = %transaction.id(), error = %rollback_error, "rollback raced a terminal state");
			}
		}
	}

	fn require_handler(
		&self,
		ambient: &Option<Transaction>,
		handler: Option<MutationHandler>,
		operation: &str,
		name: &str,
	) -> Result<Option<MutationHandler>> {
		if ambient.is_some() {
			return Ok(None);
		}
		match handler {
			Some(handler) => Ok(Some(handler)),
			None => Err(error!(diag::missing_handler(operation, name))),
		}
	}

	fn run_mutations(
		&self,
		ambient: Option<Transaction>,
		handler: Option<MutationHandler>,
		mutations: Vec<PendingMutation>,
	) -> Result<Transaction> {
		let sink: Arc<dyn OverlaySink> = self.inner.clone();
		match ambient {
			Some(transaction) => {
				transaction.apply_mutations(sink, mutations)?;
				Ok(transaction)
			}
			None => {
				let handler = handler.expect("direct mutation requires a handler");
				let weak = Arc::downgrade(&self.inner);
				let transaction = Transaction::new(TransactionOptions {
					auto_commit: false,
					mutation_fn: Some(Arc::new(move |transaction: &Transaction| {
						let inner =
							weak.upgrade().ok_or_else(|| error!(internal!("collection dropped mid-persist")))?;
						handler(transaction, &Collection::from_inner(inner))
					})),
					..Default::default()
				});
				transaction.apply_mutations(sink, mutations)?;
				// persistence failures live on the transaction; callers
				// observe them through is_persisted
				if let Err(commit_error) = transaction.commit() {
					debug!(collection = %self.name(), error = %commit_error, "direct mutation failed to persist");
				}
				Ok(transaction)
			}
		}
	}

	fn key_of(&self, value: &Value) -> Result<Key> {
		(self.inner.config.key_of)(value)
			.ok_or_else(|| error!(diag::invalid_key(format!("no scalar key in {}", value))))
	}

	fn validate_insert(&self, item: &Value) -> Result<Value> {
		match &self.inner.config.schema {
			None => Ok(item.clone()),
			Some(schema) => match schema.validate(item) {
				Validated::Valid(value) => Ok(value),
				Validated::Invalid(issues) => Err(error!(schema_diag::validation_failed("insert", &issues))),
			},
		}
	}

	/// Merge the changes onto the current value, validate the whole row,
	/// then keep only the originally supplied fields of the validated
	/// output (so coercions stick but untouched fields stay untouched).
	fn validate_update(&self, current: &Value, changes: &Value) -> Result<Value> {
		match &self.inner.config.schema {
			None => Ok(changes.clone()),
			Some(schema) => {
				let mut merged = current.clone();
				merged.merge(changes);
				match schema.validate(&merged) {
					Validated::Invalid(issues) => Err(error!(schema_diag::validation_failed("update", &issues))),
					Validated::Valid(validated) => {
						let changed_fields = changes.as_object().cloned().unwrap_or_default();
						Ok(Value::object(
							changed_fields.keys().map(|name| (name.clone(), validated.field(name).clone())),
						))
					}
				}
			}
		}
	}

	// ---------------------------------------------------------------
	// Overlay recompute
	// ---------------------------------------------------------------

	#[instrument(name = "collection::recompute", level = "trace", skip(self), fields(collection = %self.name()))]
	pub(crate) fn recompute_overlay(&self) {
		let mutations = rill_transaction::overlay_mutations(self.id());
		let mut events = Vec::new();

		{
			let mut overlay = self.inner.overlay.write();
			let old = overlay.clone();

			overlay.upserts.clear();
			overlay.deletes.clear();
			for mutation in mutations {
				match mutation.mutation_type {
					MutationType::Insert | MutationType::Update => {
						overlay.deletes.remove(&mutation.key);
						overlay.upserts.insert(mutation.key, mutation.modified);
					}
					MutationType::Delete => {
						overlay.upserts.remove(&mutation.key);
						overlay.deletes.insert(mutation.key);
					}
				}
			}

			let mut affected: BTreeSet<&Key> = BTreeSet::new();
			affected.extend(old.upserts.keys());
			affected.extend(old.deletes.iter());
			affected.extend(overlay.upserts.keys());
			affected.extend(overlay.deletes.iter());

			for key in affected {
				let before = self.view_with(&old, key);
				let after = self.view_with(&overlay, key);
				match (before, after) {
					(None, Some(value)) => events.push(ChangeEvent::insert(key.clone(), value)),
					(Some(previous), Some(value)) => {
						if previous != value {
							events.push(ChangeEvent::update(key.clone(), value, previous));
						}
					}
					(Some(previous), None) => events.push(ChangeEvent::delete(key.clone(), previous)),
					(None, None) => {}
				}
			}
		}

		self.update_size();
		self.emit(events);

		// a transaction leaving the persisting state may have reopened
		// the sync gate
		self.commit_pending_synced();
	}

	fn view_with(&self, overlay: &Overlay, key: &Key) -> Option<Value> {
		if overlay.deletes.contains(key) {
			return None;
		}
		if let Some(value) = overlay.upserts.get(key) {
			return Some(value.clone());
		}
		self.inner.synced.get(key).map(|entry| entry.value().clone())
	}

	fn update_size(&self) {
		let overlay = self.inner.overlay.read();
		let mut size = self.inner.synced.len();
		for key in overlay.upserts.keys() {
			if !self.inner.synced.contains_key(key) {
				size += 1;
			}
		}
		for key in &overlay.deletes {
			if self.inner.synced.contains_key(key) {
				size -= 1;
			}
		}
		self.inner.size.store(size, Ordering::SeqCst);
	}

	// ---------------------------------------------------------------
	// Event emission
	// ---------------------------------------------------------------

	pub(crate) fn emit(&self, events: Vec<ChangeEvent>) {
		if events.is_empty() {
			return;
		}

		for event in &events {
			self.apply_to_indexes(event);
		}

		// listeners may re-enter the collection; never hold the registry
		// lock while calling them
		let (item, keyed, batch) = {
			let listeners = self.inner.listeners.read();
			(
				listeners.item.values().cloned().collect::<Vec<_>>(),
				listeners.keyed.values().cloned().collect::<Vec<_>>(),
				listeners.batch.values().cloned().collect::<Vec<_>>(),
			)
		};

		for subscription in batch {
			subscription.emit_events(&events);
		}
		for event in &events {
			for listener in &item {
				listener(event);
			}
			for (key, listener) in &keyed {
				if key == &event.key {
					listener(event);
				}
			}
		}
	}

	fn apply_to_indexes(&self, event: &ChangeEvent) {
		let indexes = self.inner.indexes.read();
		for index in indexes.iter() {
			match event.op {
				ChangeOp::Insert => index.insert(&event.key, &event.value),
				ChangeOp::Update => {
					let previous = event.previous.as_ref().unwrap_or(&event.value);
					index.update(&event.key, previous, &event.value);
				}
				ChangeOp::Delete => index.remove(&event.key, &event.value),
			}
		}
	}

	// ---------------------------------------------------------------
	// Indexes
	// ---------------------------------------------------------------

	/// Create (or reuse) an index over `path`, backfilled from the
	/// current derived view.
	pub fn create_index(&self, path: impl Into<PropPath>, kind: IndexKind) -> Arc<CollectionIndex> {
		let path = path.into();
		{
			let indexes = self.inner.indexes.read();
			if let Some(existing) = indexes.iter().find(|index| {
				index.path() == &path && (index.kind() == kind || index.kind() == IndexKind::BTree)
			}) {
				return existing.clone();
			}
		}

		let index = Arc::new(match kind {
			IndexKind::Equality => CollectionIndex::equality(path),
			IndexKind::BTree => CollectionIndex::btree(path),
		});
		for (key, value) in self.entries() {
			index.insert(&key, &value);
		}
		debug!(collection = %self.name(), index = %index.id(), "created index");
		self.inner.indexes.write().push(index.clone());
		index
	}

	pub fn index_on(&self, path: &PropPath) -> Option<Arc<CollectionIndex>> {
		self.inner.indexes.read().iter().find(|index| index.path() == path).cloned()
	}

	pub fn range_index_on(&self, path: &PropPath) -> Option<Arc<CollectionIndex>> {
		self.inner
			.indexes
			.read()
			.iter()
			.find(|index| index.path() == path && index.kind() == IndexKind::BTree)
			.cloned()
	}

	// ---------------------------------------------------------------
	// Listeners and subscriptions
	// ---------------------------------------------------------------

	/// Deliver every change event individually. Listener panics are
	/// programmer errors and propagate to the emitter.
	pub fn subscribe(&self, listener: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> ListenerGuard {
		self.ensure_started();
		let id = {
			let mut listeners = self.inner.listeners.write();
			let id = listeners.next_id;
			listeners.next_id += 1;
			listeners.item.insert(id, Arc::new(listener));
			id
		};
		self.subscriber_added();
		ListenerGuard::new(self.clone(), id)
	}

	/// Deliver only events for `key`.
	pub fn subscribe_key(&self, key: impl Into<Key>, listener: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> ListenerGuard {
		self.ensure_started();
		let id = {
			let mut listeners = self.inner.listeners.write();
			let id = listeners.next_id;
			listeners.next_id += 1;
			listeners.keyed.insert(id, (key.into(), Arc::new(listener)));
			id
		};
		self.subscriber_added();
		ListenerGuard::new(self.clone(), id)
	}

	/// Batched change stream with the per-subscriber snapshot protocol.
	pub fn subscribe_changes(
		&self,
		listener: impl Fn(&[ChangeEvent]) + Send + Sync + 'static,
		options: SubscribeChangesOptions,
	) -> CollectionSubscription {
		self.ensure_started();
		CollectionSubscription::create(self.clone(), Arc::new(listener), options)
	}

	pub(crate) fn register_batch_listener(&self, shared: Arc<SubscriptionShared>) -> u64 {
		let id = {
			let mut listeners = self.inner.listeners.write();
			let id = listeners.next_id;
			listeners.next_id += 1;
			listeners.batch.insert(id, shared);
			id
		};
		self.subscriber_added();
		id
	}

	/// A write handle bound to the current sync generation, for sources
	/// that need to push data outside their original `sync` call.
	pub(crate) fn current_sync_handle(&self) -> Option<SyncHandle> {
		Some(SyncHandle {
			inner: Arc::downgrade(&self.inner),
			generation: self.inner.generation.load(Ordering::SeqCst),
		})
	}

	pub(crate) fn remove_listener(&self, id: u64) {
		let removed = {
			let mut listeners = self.inner.listeners.write();
			listeners.item.shift_remove(&id).is_some()
				|| listeners.keyed.shift_remove(&id).is_some()
				|| listeners.batch.shift_remove(&id).is_some()
		};
		if removed {
			self.subscriber_removed();
		}
	}

	pub(crate) fn subscriber_added(&self) {
		self.inner.subscriber_count.fetch_add(1, Ordering::SeqCst);
		if let Some(timer) = self.inner.gc_timer.lock().take() {
			timer.cancel();
		}
	}

	fn subscriber_removed(&self) {
		let remaining = self.inner.subscriber_count.fetch_sub(1, Ordering::SeqCst) - 1;
		if remaining == 0 {
			self.arm_gc_timer();
		}
	}

	fn arm_gc_timer(&self) {
		let generation = self.inner.generation.load(Ordering::SeqCst);
		let weak = Arc::downgrade(&self.inner);
		let handle = TimerService::global().schedule(self.inner.config.gc_time, move || {
			let Some(inner) = weak.upgrade() else {
				return;
			};
			let collection = Collection::from_inner(inner);
			let stale = collection.inner.generation.load(Ordering::SeqCst) != generation;
			if stale || collection.active_subscribers() > 0 {
				return;
			}
			debug!(collection = %collection.name(), "gc timer elapsed, cleaning up");
			collection.cleanup();
		});
		*self.inner.gc_timer.lock() = Some(handle);
	}

	// ---------------------------------------------------------------
	// Lifecycle
	// ---------------------------------------------------------------

	/// Start syncing when idle; restart after cleanup.
	pub(crate) fn ensure_started(&self) {
		let should_start = {
			let status = self.inner.status.lock();
			matches!(*status, CollectionStatus::Idle | CollectionStatus::CleanedUp)
		};
		if should_start {
			self.start_sync();
		}
	}

	fn restart_if_cleaned_up(&self) {
		let cleaned = { *self.inner.status.lock() == CollectionStatus::CleanedUp };
		if cleaned {
			self.start_sync();
		}
	}

	#[instrument(name = "collection::start_sync", level = "debug", skip(self), fields(collection = %self.name()))]
	fn start_sync(&self) {
		let generation = {
			let mut status = self.inner.status.lock();
			if !matches!(*status, CollectionStatus::Idle | CollectionStatus::CleanedUp) {
				return;
			}
			*status = CollectionStatus::Loading;
			self.inner.status_changed.notify_all();
			// a fresh generation invalidates every handle of the
			// previous sync run
			self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
		};

		let handle = SyncHandle {
			inner: Arc::downgrade(&self.inner),
			generation,
		};
		if let Some(cleanup) = self.inner.config.sync.clone().sync(handle) {
			let mut slot = self.inner.sync_cleanup.lock();
			*slot = Some((generation, cleanup));
		}
	}

	/// Cancel sync, drop all data and enter the `cleaned_up` state. Any
	/// later access restarts the sync process from scratch.
	pub fn cleanup(&self) {
		if let Some(timer) = self.inner.gc_timer.lock().take() {
			timer.cancel();
		}

		// invalidate outstanding sync handles before dropping state so a
		// slow source cannot write into the next generation
		self.inner.generation.fetch_add(1, Ordering::SeqCst);

		let cleanup = self.inner.sync_cleanup.lock().take();
		if let Some((_, cleanup)) = cleanup {
			cleanup();
		}

		{
			let mut status = self.inner.status.lock();
			*status = CollectionStatus::CleanedUp;
			self.inner.status_changed.notify_all();
		}

		self.inner.pending_sync.lock().clear();
		rill_core::sorted::clear(&self.inner.synced);
		rill_core::sorted::clear(&self.inner.synced_metadata);
		{
			let mut overlay = self.inner.overlay.write();
			overlay.upserts.clear();
			overlay.deletes.clear();
		}
		self.inner.size.store(0, Ordering::SeqCst);
		self.inner.has_received_first_commit.store(false, Ordering::SeqCst);
		debug!(collection = %self.name(), "cleaned up");
	}

	pub(crate) fn set_status(&self, next: CollectionStatus) {
		let mut status = self.inner.status.lock();
		*status = next;
		self.inner.status_changed.notify_all();
	}

	pub(crate) fn mark_loading_more(&self, loading: bool) {
		let mut status = self.inner.status.lock();
		match (*status, loading) {
			(CollectionStatus::Ready, true) => *status = CollectionStatus::LoadingMore,
			(CollectionStatus::LoadingMore, false) => *status = CollectionStatus::Ready,
			_ => {}
		}
		self.inner.status_changed.notify_all();
	}

	// ---------------------------------------------------------------
	// Sync commit path
	// ---------------------------------------------------------------

	/// Apply every committed pending sync transaction, unless a foreign
	/// transaction is persisting: server state must not interleave with
	/// an in-flight optimistic write it does not know about.
	pub(crate) fn commit_pending_synced(&self) {
		if rill_transaction::persisting_elsewhere() {
			trace!(collection = %self.name(), "sync commit gated behind persisting transaction");
			return;
		}

		loop {
			let batch = {
				let mut pending = self.inner.pending_sync.lock();
				if pending.first().map(|tx| tx.committed).unwrap_or(false) {
					Some(pending.remove(0))
				} else {
					None
				}
			};
			let Some(batch) = batch else {
				break;
			};
			self.apply_synced_batch(batch);
		}
	}

	fn apply_synced_batch(&self, batch: PendingSyncedTransaction) {
		let mut events = Vec::new();

		{
			let overlay = self.inner.overlay.read();
			let masked =
				|key: &Key| overlay.deletes.contains(key) || overlay.upserts.contains_key(key);

			if batch.truncate {
				// consumers keep the old snapshot until this same batch
				// delivers the replacement rows
				for entry in self.inner.synced.iter() {
					if !masked(entry.key()) {
						events.push(ChangeEvent::delete(entry.key().clone(), entry.value().clone()));
					}
				}
				rill_core::sorted::clear(&self.inner.synced);
				rill_core::sorted::clear(&self.inner.synced_metadata);
			}

			for write in batch.writes {
				let derived = write.key.clone().or_else(|| (self.inner.config.key_of)(&write.value));
				let Some(key) = derived else {
					warn!(collection = %self.name(), "sync write without derivable key dropped");
					continue;
				};
				let previous = self.inner.synced.get(&key).map(|entry| entry.value().clone());

				match write.write_type {
					SyncWriteType::Insert | SyncWriteType::Update => {
						self.inner.synced.insert(key.clone(), write.value.clone());
						if let Some(metadata) = write.metadata {
							match self.inner.synced_metadata.get(&key) {
								Some(existing) if write.write_type == SyncWriteType::Update => {
									let mut merged = existing.value().clone();
									merged.merge(&metadata);
									self.inner.synced_metadata.insert(key.clone(), merged);
								}
								_ => {
									self.inner.synced_metadata.insert(key.clone(), metadata);
								}
							}
						}
						if !masked(&key) {
							match previous {
								None => events.push(ChangeEvent::insert(key, write.value)),
								Some(previous) => {
									if previous != write.value {
										events.push(ChangeEvent::update(key, write.value, previous));
									}
								}
							}
						}
					}
					SyncWriteType::Delete => {
						self.inner.synced.remove(&key);
						self.inner.synced_metadata.remove(&key);
						if !masked(&key) {
							if let Some(previous) = previous {
								events.push(ChangeEvent::delete(key, previous));
							}
						}
					}
				}
			}
		}

		self.update_size();
		self.first_commit_received();
		self.emit(events);
	}

	fn first_commit_received(&self) {
		if self.inner.has_received_first_commit.swap(true, Ordering::SeqCst) {
			return;
		}

		{
			let mut status = self.inner.status.lock();
			if matches!(*status, CollectionStatus::Loading | CollectionStatus::Idle) {
				*status = CollectionStatus::InitialCommit;
				self.inner.status_changed.notify_all();
			}
		}

		// first-commit callbacks observe the initial_commit phase
		let callbacks: Vec<Box<dyn FnOnce() + Send>> =
			std::mem::take(&mut *self.inner.first_commit_callbacks.lock());
		for callback in callbacks {
			callback();
		}

		{
			let mut status = self.inner.status.lock();
			if *status == CollectionStatus::InitialCommit {
				*status = CollectionStatus::Ready;
				self.inner.status_changed.notify_all();
			}
		}
	}
}

impl OverlaySink for CollectionInner {
	fn collection_id(&self) -> CollectionId {
		self.id
	}

	fn overlay_changed(&self) {
		// a collection mid-drop has nobody left to notify
		if let Some(inner) = self.weak_self.upgrade() {
			Collection::from_inner(inner).recompute_overlay();
		}
	}
}

/// Removes its listener on drop (or explicitly via `unsubscribe`).
pub struct ListenerGuard {
	collection: Collection,
	id: u64,
	active: bool,
}

impl ListenerGuard {
	fn new(collection: Collection, id: u64) -> Self {
		Self {
			collection,
			id,
			active: true,
		}
	}

	pub fn unsubscribe(mut self) {
		self.release();
	}

	fn release(&mut self) {
		if self.active {
			self.active = false;
			self.collection.remove_listener(self.id);
		}
	}
}

impl Drop for ListenerGuard {
	fn drop(&mut self) {
		self.release();
	}
}

/// Generation-scoped handle a sync source writes through.
///
/// All operations on a handle from a cancelled generation are ignored, so a
/// slow or cancelled source can never corrupt a restarted collection.
#[derive(Clone)]
pub struct SyncHandle {
	inner: Weak<CollectionInner>,
	generation: u64,
}

impl SyncHandle {
	fn live(&self) -> Option<Collection> {
		let inner = self.inner.upgrade()?;
		if inner.generation.load(Ordering::SeqCst) != self.generation {
			trace!("sync handle from stale generation ignored");
			return None;
		}
		Some(Collection::from_inner(inner))
	}

	/// Open a new buffered sync transaction.
	pub fn begin(&self) {
		if let Some(collection) = self.live() {
			collection.inner.pending_sync.lock().push(PendingSyncedTransaction::default());
		}
	}

	/// Buffer one write into the open sync transaction.
	pub fn write(&self, write: SyncWrite) -> Result<()> {
		let Some(collection) = self.live() else {
			return Ok(());
		};

		let key = write
			.key
			.clone()
			.or_else(|| (collection.inner.config.key_of)(&write.value))
			.ok_or_else(|| error!(diag::invalid_key(format!("no scalar key in {}", write.value))))?;

		let mut pending = collection.inner.pending_sync.lock();
		let Some(transaction) = pending.iter_mut().rev().find(|tx| !tx.committed) else {
			return Err(error!(diag::sync_protocol("write outside of a begin/commit cycle")));
		};

		// an insert may not clobber an already-synced key unless this
		// same transaction tombstones or truncates it first
		if write.write_type == SyncWriteType::Insert {
			let deleted_in_tx = transaction.truncate
				|| transaction.writes.iter().any(|buffered| {
					let buffered_key = buffered
						.key
						.clone()
						.or_else(|| (collection.inner.config.key_of)(&buffered.value));
					buffered.write_type == SyncWriteType::Delete && buffered_key.as_ref() == Some(&key)
				});
			if collection.inner.synced.contains_key(&key) && !deleted_in_tx {
				return Err(error!(diag::duplicate_synced_key(&key)));
			}
		}

		transaction.writes.push(write);
		Ok(())
	}

	/// Mark the open sync transaction committed and apply every committed
	/// one (subject to the persisting gate).
	pub fn commit(&self) -> Result<()> {
		let Some(collection) = self.live() else {
			return Ok(());
		};
		{
			let mut pending = collection.inner.pending_sync.lock();
			let Some(transaction) = pending.iter_mut().rev().find(|tx| !tx.committed) else {
				return Err(error!(diag::sync_protocol("commit without a matching begin")));
			};
			transaction.committed = true;
		}
		collection.commit_pending_synced();
		Ok(())
	}

	/// Empty the baseline atomically within the current begin/commit
	/// cycle.
	pub fn truncate(&self) -> Result<()> {
		let Some(collection) = self.live() else {
			return Ok(());
		};
		let mut pending = collection.inner.pending_sync.lock();
		let Some(transaction) = pending.iter_mut().rev().find(|tx| !tx.committed) else {
			return Err(error!(diag::sync_protocol("truncate outside of a begin/commit cycle")));
		};
		transaction.truncate = true;
		transaction.writes.clear();
		Ok(())
	}

	/// The initial load is complete; resolve `preload` waiters even when
	/// the source delivered no data.
	pub fn mark_ready(&self) {
		if let Some(collection) = self.live() {
			let mut status = collection.inner.status.lock();
			if matches!(
				*status,
				CollectionStatus::Idle | CollectionStatus::Loading | CollectionStatus::InitialCommit
			) {
				*status = CollectionStatus::Ready;
				collection.inner.status_changed.notify_all();
			}
		}
	}

	/// Flag the collection as failed; waiters observe the error state.
	pub fn mark_error(&self) {
		if let Some(collection) = self.live() {
			collection.set_status(CollectionStatus::Error);
		}
	}

	pub fn collection(&self) -> Option<Collection> {
		self.live()
	}
}
