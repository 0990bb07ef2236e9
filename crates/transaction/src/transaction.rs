// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::{
	collections::HashSet,
	fmt::{Display, Formatter},
	sync::Arc,
	time::SystemTime,
};

use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use rill_core::{CollectionId, OverlaySink};
use rill_type::{Error, Key, Value, diagnostic::transaction as diag, error};

use crate::{MutationType, PendingMutation, Result, registry};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
	pub fn next() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Display for TransactionId {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		Display::fmt(&self.0, f)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
	Pending,
	Persisting,
	Completed,
	Failed,
}

impl TransactionState {
	pub fn is_terminal(&self) -> bool {
		matches!(self, TransactionState::Completed | TransactionState::Failed)
	}

	/// Active transactions contribute to collection overlays.
	pub fn is_active(&self) -> bool {
		matches!(self, TransactionState::Pending | TransactionState::Persisting)
	}

	pub fn name(&self) -> &'static str {
		match self {
			TransactionState::Pending => "pending",
			TransactionState::Persisting => "persisting",
			TransactionState::Completed => "completed",
			TransactionState::Failed => "failed",
		}
	}
}

/// The persistence handler: invoked once on commit with the transaction it
/// is persisting. Resolution completes the transaction, an error fails it.
pub type MutationFn = Arc<dyn Fn(&Transaction) -> Result<()> + Send + Sync>;

pub struct TransactionOptions {
	pub mutation_fn: Option<MutationFn>,
	pub auto_commit: bool,
	pub metadata: Option<Value>,
	pub depends_on: Vec<Transaction>,
}

impl Default for TransactionOptions {
	fn default() -> Self {
		Self {
			mutation_fn: None,
			auto_commit: true,
			metadata: None,
			depends_on: Vec::new(),
		}
	}
}

struct Inner {
	id: TransactionId,
	created_at: SystemTime,
	auto_commit: bool,
	metadata: Option<Value>,
	mutation_fn: Option<MutationFn>,
	depends_on: Mutex<Vec<Transaction>>,
	state: Mutex<TransactionState>,
	state_changed: Condvar,
	mutations: Mutex<IndexMap<(CollectionId, Key), PendingMutation>>,
	sinks: Mutex<IndexMap<CollectionId, Arc<dyn OverlaySink>>>,
	error: Mutex<Option<Error>>,
}

/// An optimistic transaction over any number of collections.
///
/// Cheap to clone; all clones share state. Created transactions register
/// themselves and stay registered until they reach a terminal state.
#[derive(Clone)]
pub struct Transaction {
	inner: Arc<Inner>,
}

impl std::fmt::Debug for Transaction {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Transaction")
			.field("id", &self.inner.id)
			.field("state", &*self.inner.state.lock())
			.finish()
	}
}

impl Transaction {
	pub fn new(options: TransactionOptions) -> Self {
		let transaction = Self {
			inner: Arc::new(Inner {
				id: TransactionId::next(),
				created_at: SystemTime::now(),
				auto_commit: options.auto_commit,
				metadata: options.metadata,
				mutation_fn: options.mutation_fn,
				depends_on: Mutex::new(options.depends_on),
				state: Mutex::new(TransactionState::Pending),
				state_changed: Condvar::new(),
				mutations: Mutex::new(IndexMap::new()),
				sinks: Mutex::new(IndexMap::new()),
				error: Mutex::new(None),
			}),
		};
		registry::register(&transaction);
		trace!(id = %transaction.id(), "transaction created");
		transaction
	}

	pub fn id(&self) -> TransactionId {
		self.inner.id
	}

	pub fn state(&self) -> TransactionState {
		*self.inner.state.lock()
	}

	pub fn created_at(&self) -> SystemTime {
		self.inner.created_at
	}

	pub fn metadata(&self) -> Option<&Value> {
		self.inner.metadata.as_ref()
	}

	pub fn error(&self) -> Option<Error> {
		self.inner.error.lock().clone()
	}

	pub fn mutations(&self) -> Vec<PendingMutation> {
		self.inner.mutations.lock().values().cloned().collect()
	}

	pub fn mutations_for(&self, collection: CollectionId) -> Vec<PendingMutation> {
		self.inner.mutations.lock().values().filter(|m| m.collection == collection).cloned().collect()
	}

	pub fn touched(&self) -> Vec<(CollectionId, Key)> {
		self.inner.mutations.lock().keys().cloned().collect()
	}

	pub fn touches(&self, collection: CollectionId, key: &Key) -> bool {
		self.inner.mutations.lock().contains_key(&(collection, key.clone()))
	}

	/// Declare a further dependency; only meaningful before `commit`
	/// starts waiting.
	pub fn add_dependency(&self, dependency: Transaction) {
		self.inner.depends_on.lock().push(dependency);
	}

	/// Run `f` with this transaction as the ambient transaction of the
	/// current thread; collection operations inside attach their
	/// mutations here. Commits afterwards when `auto_commit` is set.
	pub fn mutate<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
		{
			let state = self.inner.state.lock();
			if *state != TransactionState::Pending {
				return Err(error!(diag::not_pending("mutate", state.name())));
			}
		}

		registry::push_ambient(self);
		let result = f();
		registry::pop_ambient();

		let value = result?;
		if self.inner.auto_commit {
			self.commit()?;
		}
		Ok(value)
	}

	/// Record new mutations against `sink`'s collection, merging each into
	/// any existing mutation for the same key.
	pub fn apply_mutations(&self, sink: Arc<dyn OverlaySink>, new_mutations: Vec<PendingMutation>) -> Result<()> {
		{
			let state = self.inner.state.lock();
			if *state != TransactionState::Pending {
				return Err(error!(diag::not_pending("mutate", state.name())));
			}
		}

		{
			// merge onto a staged copy so a rejected batch leaves no
			// partial state behind
			let mut mutations = self.inner.mutations.lock();
			let mut staged = mutations.clone();

			for mutation in new_mutations {
				let slot = (mutation.collection, mutation.key.clone());
				match staged.shift_remove(&slot) {
					None => {
						staged.insert(slot, mutation);
					}
					Some(existing) => match (existing.mutation_type, mutation.mutation_type) {
						(MutationType::Insert, MutationType::Insert) => {
							return Err(error!(diag::duplicate_insert(&mutation.key)));
						}
						(MutationType::Delete, _) => {
							return Err(error!(diag::delete_of_deleted(&mutation.key)));
						}
						_ => {
							if let Some(merged) = merge(existing, mutation) {
								staged.insert(slot, merged);
							}
							// insert followed by delete nets out
						}
					},
				}
			}

			*mutations = staged;
		}

		self.inner.sinks.lock().insert(sink.collection_id(), sink.clone());
		sink.overlay_changed();
		Ok(())
	}

	/// Drive the transaction to a terminal state: wait for declared
	/// dependencies, run the persistence handler, then release the
	/// overlay.
	#[instrument(name = "transaction::commit", level = "debug", skip(self), fields(id = %self.id()))]
	pub fn commit(&self) -> Result<()> {
		{
			let state = self.inner.state.lock();
			if *state != TransactionState::Pending {
				return Err(error!(diag::not_pending("commit", state.name())));
			}
		}

		// declared dependencies delay the handler; a failed dependency
		// does not fail this transaction
		let dependencies: Vec<Transaction> = self.inner.depends_on.lock().clone();
		for dependency in dependencies {
			dependency.wait_terminal();
		}

		{
			let mut state = self.inner.state.lock();
			match *state {
				TransactionState::Pending => {}
				// rolled back while waiting on a dependency
				other => return Err(error!(diag::not_pending("commit", other.name()))),
			}
			if self.inner.mutations.lock().is_empty() {
				*state = TransactionState::Completed;
				self.inner.state_changed.notify_all();
				drop(state);
				registry::unregister(self.id());
				return Ok(());
			}
			*state = TransactionState::Persisting;
			self.inner.state_changed.notify_all();
		}

		debug!(id = %self.id(), "persisting");
		registry::push_persisting_here(self.id());
		let outcome = match &self.inner.mutation_fn {
			Some(mutation_fn) => mutation_fn(self),
			None => Ok(()),
		};
		registry::pop_persisting_here();

		match outcome {
			Ok(()) => {
				let sinks = self.finalize(TransactionState::Completed, None);
				for sink in sinks {
					sink.overlay_changed();
				}
				Ok(())
			}
			Err(cause) => {
				let normalized = error!(diag::persist_failed(cause.to_string()));
				self.rollback_cascading(Some(normalized.clone()));
				Err(normalized)
			}
		}
	}

	/// Abort this transaction and every pending transaction that overlaps
	/// it, transitively, through shared `(collection, key)` pairs.
	#[instrument(name = "transaction::rollback", level = "debug", skip(self), fields(id = %self.id()))]
	pub fn rollback(&self) -> Result<()> {
		{
			let state = self.inner.state.lock();
			if state.is_terminal() {
				return Err(error!(diag::already_terminal("rollback", state.name())));
			}
		}
		self.rollback_cascading(None);
		Ok(())
	}

	fn rollback_cascading(&self, error: Option<Error>) {
		let cascade = self.overlapping_closure();

		let mut sinks: Vec<Arc<dyn OverlaySink>> = Vec::new();
		let mut seen: HashSet<CollectionId> = HashSet::new();

		sinks.extend(self.finalize(TransactionState::Failed, error));
		for transaction in cascade {
			debug!(id = %transaction.id(), "cascading rollback");
			sinks.extend(transaction.finalize(TransactionState::Failed, None));
		}

		for sink in sinks {
			if seen.insert(sink.collection_id()) {
				sink.overlay_changed();
			}
		}
	}

	/// Pending transactions reachable from this one through shared keys.
	/// Persisting and terminal transactions never cascade.
	fn overlapping_closure(&self) -> Vec<Transaction> {
		let mut frontier: Vec<(CollectionId, Key)> = self.touched();
		let mut closure: Vec<Transaction> = Vec::new();
		let mut visited: HashSet<TransactionId> = HashSet::new();
		visited.insert(self.id());

		loop {
			let mut grew = false;
			for candidate in registry::active_transactions() {
				if visited.contains(&candidate.id()) || candidate.state() != TransactionState::Pending {
					continue;
				}
				let overlaps = frontier.iter().any(|(collection, key)| candidate.touches(*collection, key));
				if overlaps {
					visited.insert(candidate.id());
					frontier.extend(candidate.touched());
					closure.push(candidate);
					grew = true;
				}
			}
			if !grew {
				return closure;
			}
		}
	}

	/// Move to a terminal state and unregister, returning the sinks to
	/// notify once all bookkeeping is done. No-op when already terminal.
	fn finalize(&self, terminal: TransactionState, error: Option<Error>) -> Vec<Arc<dyn OverlaySink>> {
		debug_assert!(terminal.is_terminal());
		{
			let mut state = self.inner.state.lock();
			if state.is_terminal() {
				return Vec::new();
			}
			*state = terminal;
			self.inner.state_changed.notify_all();
		}
		if let Some(error) = error {
			*self.inner.error.lock() = Some(error);
		}
		registry::unregister(self.id());
		self.inner.sinks.lock().values().cloned().collect()
	}

	/// Block until the transaction reaches a terminal state.
	pub fn wait_terminal(&self) -> TransactionState {
		let mut state = self.inner.state.lock();
		while !state.is_terminal() {
			self.inner.state_changed.wait(&mut state);
		}
		*state
	}

	/// Resolve once persisted: `Ok` after completion, the recorded error
	/// after failure.
	pub fn is_persisted(&self) -> Result<()> {
		match self.wait_terminal() {
			TransactionState::Completed => Ok(()),
			_ => Err(self.error().unwrap_or_else(|| error!(diag::persist_failed("transaction was rolled back")))),
		}
	}
}

/// Merge a new mutation into an existing one for the same key, per the
/// overlay merge table. `None` means the pair annihilated (insert then
/// delete). Conflicting pairs were rejected by the caller.
fn merge(existing: PendingMutation, new: PendingMutation) -> Option<PendingMutation> {
	match (existing.mutation_type, new.mutation_type) {
		// an update folds into the insert it follows; the record keeps
		// type insert so the overlay still reads as a fresh key
		(MutationType::Insert, MutationType::Update) | (MutationType::Update, MutationType::Update) => {
			let mut merged = existing;
			merged.modified = new.modified;
			merged.changes.merge(&new.changes);
			merged.updated_at = new.updated_at;
			Some(merged)
		}
		(MutationType::Insert, MutationType::Delete) => None,
		(MutationType::Update, MutationType::Delete) => {
			let mut merged = new;
			merged.original = existing.original;
			Some(merged)
		}
		// the caller rejected conflicting pairs already
		_ => unreachable!("conflicting mutation pair survived validation"),
	}
}
