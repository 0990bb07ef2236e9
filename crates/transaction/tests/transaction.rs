// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};

use rill_core::{CollectionId, OverlaySink};
use rill_transaction::{
	MutationType, PendingMutation, Transaction, TransactionOptions, TransactionState, overlay_mutations,
	pending_transactions_touching,
};
use rill_type::{Key, Value, object};

struct TestSink {
	id: CollectionId,
	notified: AtomicUsize,
}

impl TestSink {
	fn new() -> Arc<Self> {
		Arc::new(Self {
			id: CollectionId::next(),
			notified: AtomicUsize::new(0),
		})
	}

	fn notifications(&self) -> usize {
		self.notified.load(Ordering::SeqCst)
	}
}

impl OverlaySink for TestSink {
	fn collection_id(&self) -> CollectionId {
		self.id
	}

	fn overlay_changed(&self) {
		self.notified.fetch_add(1, Ordering::SeqCst);
	}
}

fn pending_tx() -> Transaction {
	Transaction::new(TransactionOptions {
		auto_commit: false,
		..Default::default()
	})
}

fn insert(sink: &Arc<TestSink>, key: i64, value: Value) -> PendingMutation {
	PendingMutation::insert(sink.id, Key::Int8(key), value, None)
}

fn update(sink: &Arc<TestSink>, key: i64, original: Value, modified: Value, changes: Value) -> PendingMutation {
	PendingMutation::update(sink.id, Key::Int8(key), original, modified, changes, None)
}

#[test]
fn test_insert_then_updates_merge_into_single_insert() {
	let sink = TestSink::new();
	let tx = pending_tx();

	tx.apply_mutations(sink.clone(), vec![insert(&sink, 1, object! { id: 1, a: 1 })]).unwrap();
	tx.apply_mutations(
		sink.clone(),
		vec![update(&sink, 1, object! { id: 1, a: 1 }, object! { id: 1, a: 2, b: 9 }, object! { a: 2, b: 9 })],
	)
	.unwrap();
	tx.apply_mutations(
		sink.clone(),
		vec![update(&sink, 1, object! { id: 1, a: 2, b: 9 }, object! { id: 1, a: 3, b: 9 }, object! { a: 3 })],
	)
	.unwrap();

	let mutations = tx.mutations();
	assert_eq!(mutations.len(), 1);
	let mutation = &mutations[0];
	assert_eq!(mutation.mutation_type, MutationType::Insert);
	assert_eq!(mutation.modified, object! { id: 1, a: 3, b: 9 });
	// changes is the union of every assignment
	assert_eq!(mutation.changes.field("a"), &Value::Int8(3));
	assert_eq!(mutation.changes.field("b"), &Value::Int8(9));
	assert!(mutation.original.is_none());
}

#[test]
fn test_insert_then_delete_nets_to_nothing() {
	let sink = TestSink::new();
	let tx = pending_tx();

	tx.apply_mutations(sink.clone(), vec![insert(&sink, 1, object! { id: 1 })]).unwrap();
	tx.apply_mutations(sink.clone(), vec![PendingMutation::delete(sink.id, Key::Int8(1), object! { id: 1 }, None)])
		.unwrap();

	assert!(tx.mutations().is_empty());
	// commit of the emptied transaction completes without persisting
	tx.commit().unwrap();
	assert_eq!(tx.state(), TransactionState::Completed);
}

#[test]
fn test_update_then_delete_becomes_delete_with_first_original() {
	let sink = TestSink::new();
	let tx = pending_tx();

	let original = object! { id: 1, a: 1 };
	tx.apply_mutations(
		sink.clone(),
		vec![update(&sink, 1, original.clone(), object! { id: 1, a: 2 }, object! { a: 2 })],
	)
	.unwrap();
	tx.apply_mutations(sink.clone(), vec![PendingMutation::delete(sink.id, Key::Int8(1), object! { id: 1, a: 2 }, None)])
		.unwrap();

	let mutations = tx.mutations();
	assert_eq!(mutations.len(), 1);
	assert_eq!(mutations[0].mutation_type, MutationType::Delete);
	assert_eq!(mutations[0].original, Some(original));
}

#[test]
fn test_duplicate_insert_is_rejected_and_batch_discarded() {
	let sink = TestSink::new();
	let tx = pending_tx();

	tx.apply_mutations(sink.clone(), vec![insert(&sink, 1, object! { id: 1 })]).unwrap();
	let result = tx.apply_mutations(
		sink.clone(),
		vec![insert(&sink, 2, object! { id: 2 }), insert(&sink, 1, object! { id: 1 })],
	);
	assert_eq!(result.unwrap_err().code(), "TX_004");
	// the valid first half of the batch was discarded with the rest
	assert_eq!(tx.mutations().len(), 1);
}

#[test]
fn test_delete_of_deleted_is_rejected() {
	let sink = TestSink::new();
	let tx = pending_tx();

	tx.apply_mutations(sink.clone(), vec![PendingMutation::delete(sink.id, Key::Int8(1), object! { id: 1 }, None)])
		.unwrap();
	let result =
		tx.apply_mutations(sink.clone(), vec![PendingMutation::delete(sink.id, Key::Int8(1), object! { id: 1 }, None)]);
	assert_eq!(result.unwrap_err().code(), "TX_003");
}

#[test]
fn test_commit_runs_handler_in_persisting_state() {
	let sink = TestSink::new();
	let observed = Arc::new(AtomicUsize::new(0));
	let observed_clone = Arc::clone(&observed);

	let tx = Transaction::new(TransactionOptions {
		auto_commit: false,
		mutation_fn: Some(Arc::new(move |tx: &Transaction| {
			assert_eq!(tx.state(), TransactionState::Persisting);
			observed_clone.fetch_add(1, Ordering::SeqCst);
			Ok(())
		})),
		..Default::default()
	});

	tx.apply_mutations(sink.clone(), vec![insert(&sink, 1, object! { id: 1 })]).unwrap();
	let before = sink.notifications();
	tx.commit().unwrap();

	assert_eq!(observed.load(Ordering::SeqCst), 1);
	assert_eq!(tx.state(), TransactionState::Completed);
	assert!(tx.is_persisted().is_ok());
	// completion drops the overlay contribution and re-notifies the sink
	assert!(sink.notifications() > before);
	assert!(overlay_mutations(sink.id).is_empty());
}

#[test]
fn test_handler_error_fails_transaction_with_cause() {
	let sink = TestSink::new();
	let tx = Transaction::new(TransactionOptions {
		auto_commit: false,
		mutation_fn: Some(Arc::new(|_tx: &Transaction| {
			Err(rill_type::error!(rill_type::internal!("server said no")))
		})),
		..Default::default()
	});

	tx.apply_mutations(sink.clone(), vec![insert(&sink, 1, object! { id: 1 })]).unwrap();
	let error = tx.commit().unwrap_err();
	assert_eq!(error.code(), "TX_005");
	assert_eq!(tx.state(), TransactionState::Failed);
	assert!(tx.is_persisted().is_err());
	assert!(overlay_mutations(sink.id).is_empty());
}

#[test]
fn test_mutate_rejects_non_pending_and_commit_twice() {
	let tx = pending_tx();
	tx.commit().unwrap();
	assert_eq!(tx.commit().unwrap_err().code(), "TX_001");
	assert_eq!(tx.mutate(|| Ok(())).unwrap_err().code(), "TX_001");
	assert_eq!(tx.rollback().unwrap_err().code(), "TX_002");
}

#[test]
fn test_rollback_cascades_transitively_over_shared_keys() {
	let sink_a = TestSink::new();
	let sink_b = TestSink::new();

	// tx_a touches a:1; tx_b touches a:1 and b:2; tx_c touches only b:2
	let tx_a = pending_tx();
	tx_a.apply_mutations(sink_a.clone(), vec![insert(&sink_a, 1, object! { id: 1 })]).unwrap();

	let tx_b = pending_tx();
	tx_b.apply_mutations(
		sink_a.clone(),
		vec![update(&sink_a, 1, object! { id: 1 }, object! { id: 1, x: 1 }, object! { x: 1 })],
	)
	.unwrap();
	tx_b.apply_mutations(sink_b.clone(), vec![insert(&sink_b, 2, object! { id: 2 })]).unwrap();

	let tx_c = pending_tx();
	tx_c.apply_mutations(
		sink_b.clone(),
		vec![update(&sink_b, 2, object! { id: 2 }, object! { id: 2, y: 1 }, object! { y: 1 })],
	)
	.unwrap();

	// an unrelated pending transaction must survive
	let sink_d = TestSink::new();
	let tx_d = pending_tx();
	tx_d.apply_mutations(sink_d.clone(), vec![insert(&sink_d, 9, object! { id: 9 })]).unwrap();

	tx_a.rollback().unwrap();

	assert_eq!(tx_a.state(), TransactionState::Failed);
	assert_eq!(tx_b.state(), TransactionState::Failed, "tx_b shares key 1 with tx_a");
	assert_eq!(tx_c.state(), TransactionState::Failed, "tx_c shares key 2 with tx_b");
	assert_eq!(tx_d.state(), TransactionState::Pending, "disjoint transaction untouched");

	tx_d.rollback().unwrap();
}

#[test]
fn test_persisting_transaction_is_not_cascaded_into() {
	let sink = TestSink::new();
	let sink_for_handler = sink.clone();

	let tx = Transaction::new(TransactionOptions {
		auto_commit: false,
		mutation_fn: Some(Arc::new(move |tx: &Transaction| {
			// while persisting, this transaction is invisible to
			// overlap search
			let overlapping = pending_transactions_touching(sink_for_handler.id, None);
			assert!(overlapping.iter().all(|other| other.id() != tx.id()));
			Ok(())
		})),
		..Default::default()
	});
	tx.apply_mutations(sink.clone(), vec![insert(&sink, 1, object! { id: 1 })]).unwrap();
	tx.commit().unwrap();
}

#[test]
fn test_dependency_failure_does_not_block_dependent() {
	let sink = TestSink::new();

	let dependency = pending_tx();
	dependency.apply_mutations(sink.clone(), vec![insert(&sink, 1, object! { id: 1 })]).unwrap();
	dependency.rollback().unwrap();

	let dependent = Transaction::new(TransactionOptions {
		auto_commit: false,
		depends_on: vec![dependency.clone()],
		..Default::default()
	});
	dependent.apply_mutations(sink.clone(), vec![insert(&sink, 2, object! { id: 2 })]).unwrap();

	dependent.commit().unwrap();
	assert_eq!(dependent.state(), TransactionState::Completed);
}

#[test]
fn test_overlay_mutations_orders_by_transaction_creation() {
	let sink = TestSink::new();

	let first = pending_tx();
	first.apply_mutations(sink.clone(), vec![insert(&sink, 1, object! { id: 1, v: "first" })]).unwrap();

	let second = pending_tx();
	second
		.apply_mutations(
			sink.clone(),
			vec![update(&sink, 1, object! { id: 1, v: "first" }, object! { id: 1, v: "second" }, object! { v: "second" })],
		)
		.unwrap();

	let mutations = overlay_mutations(sink.id);
	assert_eq!(mutations.len(), 2);
	assert_eq!(mutations[0].modified.field("v"), &Value::utf8("first"));
	assert_eq!(mutations[1].modified.field("v"), &Value::utf8("second"));

	first.rollback().unwrap();
	assert!(overlay_mutations(sink.id).is_empty(), "second overlaps key 1 and cascades");
}
