// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Process-wide transaction registry and the ambient-transaction stack.
//!
//! The registry holds every non-terminal transaction in creation order;
//! collections read it to rebuild their optimistic overlay, and rollback
//! walks it to find overlapping transactions.

use std::cell::RefCell;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use rill_core::CollectionId;
use rill_type::Key;

use crate::{PendingMutation, Transaction, TransactionId, TransactionState};

static REGISTRY: Lazy<RwLock<IndexMap<TransactionId, Transaction>>> = Lazy::new(|| RwLock::new(IndexMap::new()));

thread_local! {
	static AMBIENT: RefCell<Vec<Transaction>> = const { RefCell::new(Vec::new()) };
	static PERSISTING_HERE: RefCell<Vec<TransactionId>> = const { RefCell::new(Vec::new()) };
}

pub(crate) fn register(transaction: &Transaction) {
	REGISTRY.write().insert(transaction.id(), transaction.clone());
}

pub(crate) fn unregister(id: TransactionId) {
	REGISTRY.write().shift_remove(&id);
}

/// Transactions currently contributing to overlays (pending or persisting),
/// in creation order.
pub fn active_transactions() -> Vec<Transaction> {
	REGISTRY.read().values().filter(|tx| tx.state().is_active()).cloned().collect()
}

/// All overlay-contributing mutations for one collection, in transaction
/// creation order then per-transaction insertion order. A later transaction
/// touching the same key wins during recompute.
pub fn overlay_mutations(collection: CollectionId) -> Vec<PendingMutation> {
	let mut mutations = Vec::new();
	for transaction in REGISTRY.read().values() {
		if !transaction.state().is_active() {
			continue;
		}
		mutations.extend(transaction.mutations_for(collection));
	}
	mutations
}

/// Pending transactions touching any of `keys` in `collection` (or any key
/// at all when `keys` is `None`). Persisting and terminal transactions are
/// never returned.
pub fn pending_transactions_touching(collection: CollectionId, keys: Option<&[Key]>) -> Vec<Transaction> {
	REGISTRY.read()
		.values()
		.filter(|tx| tx.state() == TransactionState::Pending)
		.filter(|tx| match keys {
			Some(keys) => keys.iter().any(|key| tx.touches(collection, key)),
			None => !tx.mutations_for(collection).is_empty(),
		})
		.cloned()
		.collect()
}

/// The innermost transaction opened by [`Transaction::mutate`] on this
/// thread, if any. Collection operations attach their mutations to it
/// instead of creating a one-shot transaction.
pub fn ambient_transaction() -> Option<Transaction> {
	AMBIENT.with(|stack| stack.borrow().last().cloned())
}

pub(crate) fn push_ambient(transaction: &Transaction) {
	AMBIENT.with(|stack| stack.borrow_mut().push(transaction.clone()));
}

pub(crate) fn pop_ambient() {
	AMBIENT.with(|stack| {
		stack.borrow_mut().pop();
	});
}

pub(crate) fn push_persisting_here(id: TransactionId) {
	PERSISTING_HERE.with(|stack| stack.borrow_mut().push(id));
}

pub(crate) fn pop_persisting_here() {
	PERSISTING_HERE.with(|stack| {
		stack.borrow_mut().pop();
	});
}

/// True when some transaction is persisting whose handler is NOT running on
/// the current thread. Sync commits hold off while this is the case so
/// server state cannot interleave with a foreign in-flight optimistic
/// write; a handler writing through the sync path itself is exempt.
pub fn persisting_elsewhere() -> bool {
	let here: Vec<TransactionId> = PERSISTING_HERE.with(|stack| stack.borrow().clone());
	REGISTRY.read()
		.values()
		.any(|tx| tx.state() == TransactionState::Persisting && !here.contains(&tx.id()))
}
