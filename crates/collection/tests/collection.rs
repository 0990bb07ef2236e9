// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

mod support;

use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;

use rill_collection::{Collection, CollectionConfig, CollectionStatus, FieldCheck, FieldSchema};
use rill_core::ChangeOp;
use rill_transaction::{Transaction, TransactionOptions, TransactionState};
use rill_type::{Key, Value, object};
use support::{ManualSync, acked_collection};

#[test]
fn test_initial_sync_populates_state() {
	let sync = ManualSync::with_rows(vec![object! { id: 1, title: "a" }, object! { id: 2, title: "b" }]);
	let collection = acked_collection(sync);

	assert_eq!(collection.status(), CollectionStatus::Ready);
	assert!(collection.has_received_first_commit());
	assert_eq!(collection.size(), 2);
	assert_eq!(collection.get(&Key::Int8(1)).unwrap().field("title"), &Value::utf8("a"));
	assert_eq!(collection.keys(), vec![Key::Int8(1), Key::Int8(2)]);
}

#[test]
fn test_on_first_commit_fires_exactly_once() {
	let fired = Arc::new(AtomicUsize::new(0));
	let sync = ManualSync::new();
	let collection = {
		let fired = Arc::clone(&fired);
		let config = CollectionConfig::new(sync.clone()).with_start_sync(false);
		let collection = Collection::create(config);
		collection.on_first_commit(move || {
			fired.fetch_add(1, Ordering::SeqCst);
		});
		collection
	};

	assert_eq!(fired.load(Ordering::SeqCst), 0);
	collection.preload().unwrap();
	assert_eq!(fired.load(Ordering::SeqCst), 1);

	// registering after the fact fires immediately, still once each
	let fired_late = Arc::new(AtomicUsize::new(0));
	let fired_late_clone = Arc::clone(&fired_late);
	collection.on_first_commit(move || {
		fired_late_clone.fetch_add(1, Ordering::SeqCst);
	});
	assert_eq!(fired_late.load(Ordering::SeqCst), 1);

	sync.server_insert(object! { id: 1 });
	assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_optimistic_insert_is_visible_then_replaced_by_synced_state() {
	let sync = ManualSync::new();
	let collection = acked_collection(sync.clone());

	let transaction = collection.insert(object! { id: 7, title: "draft" }).unwrap();
	transaction.is_persisted().unwrap();

	// the ack wrote through the sync path; the overlay is gone and the
	// baseline holds the value
	assert_eq!(collection.get_synced_value(&Key::Int8(7)).unwrap().field("title"), &Value::utf8("draft"));
	assert_eq!(collection.get(&Key::Int8(7)).unwrap().field("title"), &Value::utf8("draft"));
	assert_eq!(collection.size(), 1);
}

#[test]
fn test_insert_duplicate_key_is_rejected() {
	let sync = ManualSync::with_rows(vec![object! { id: 1, title: "a" }]);
	let collection = acked_collection(sync);

	let error = collection.insert(object! { id: 1, title: "again" }).unwrap_err();
	assert_eq!(error.code(), "COLLECTION_001");
}

#[test]
fn test_direct_insert_without_handler_is_rejected() {
	let sync = ManualSync::new();
	let collection = Collection::create(CollectionConfig::new(sync));

	let error = collection.insert(object! { id: 1 }).unwrap_err();
	assert_eq!(error.code(), "COLLECTION_005");
}

#[test]
fn test_ambient_transaction_needs_no_handler_and_rolls_back() {
	let sync = ManualSync::new();
	let collection = Collection::create(CollectionConfig::new(sync));

	let transaction = Transaction::new(TransactionOptions {
		auto_commit: false,
		..Default::default()
	});
	transaction
		.mutate(|| {
			collection.insert(object! { id: 1, title: "inside tx" })?;
			Ok(())
		})
		.unwrap();

	assert!(collection.has(&Key::Int8(1)), "optimistic overlay visible while pending");
	assert_eq!(collection.size(), 1);

	transaction.rollback().unwrap();
	assert!(!collection.has(&Key::Int8(1)), "rollback removed the overlay");
	assert_eq!(collection.size(), 0);
	assert_eq!(transaction.state(), TransactionState::Failed);
}

#[test]
fn test_update_records_only_assigned_fields() {
	let sync = ManualSync::with_rows(vec![object! { id: 1, title: "a", done: false }]);
	let collection = acked_collection(sync);

	let transaction = collection
		.update(Key::Int8(1), |draft| {
			draft.set("done", true);
		})
		.unwrap();

	let mutations = transaction.mutations();
	assert_eq!(mutations.len(), 1);
	assert_eq!(mutations[0].changes, object! { done: true });
	assert_eq!(collection.get(&Key::Int8(1)).unwrap(), object! { id: 1, title: "a", done: true });
}

#[test]
fn test_update_unknown_key_and_empty_keys_are_rejected() {
	let sync = ManualSync::new();
	let collection = acked_collection(sync);

	let error = collection.update(Key::Int8(404), |draft| draft.set("x", 1)).unwrap_err();
	assert_eq!(error.code(), "COLLECTION_003");

	let error = collection.update_many(vec![], |_draft| {}).unwrap_err();
	assert_eq!(error.code(), "COLLECTION_006");
}

#[test]
fn test_update_must_not_change_the_key() {
	let sync = ManualSync::with_rows(vec![object! { id: 1 }]);
	let collection = acked_collection(sync);

	let error = collection.update(Key::Int8(1), |draft| draft.set("id", 2)).unwrap_err();
	assert_eq!(error.code(), "COLLECTION_004");
}

#[test]
fn test_delete_removes_and_unknown_delete_is_rejected() {
	let sync = ManualSync::with_rows(vec![object! { id: 1 }]);
	let collection = acked_collection(sync);

	collection.delete(Key::Int8(1)).unwrap().is_persisted().unwrap();
	assert!(!collection.has(&Key::Int8(1)));
	assert_eq!(collection.size(), 0);

	let error = collection.delete(Key::Int8(1)).unwrap_err();
	assert_eq!(error.code(), "COLLECTION_003");
}

#[test]
fn test_schema_validation_on_insert_and_update() {
	let sync = ManualSync::new();
	let schema = FieldSchema::new()
		.required("id", FieldCheck::Int)
		.required("title", FieldCheck::Text)
		.field("score", FieldCheck::Float);
	let config = CollectionConfig::new(sync.clone())
		.with_schema(Arc::new(schema))
		.on_insert(support::ack_handler(sync.clone()))
		.on_update(support::ack_handler(sync.clone()))
		.on_delete(support::ack_handler(sync));
	let collection = Collection::create(config);

	let error = collection.insert(object! { id: 1 }).unwrap_err();
	assert_eq!(error.code(), "SCHEMA_001");

	collection.insert(object! { id: 1, title: "t", score: 3 }).unwrap().is_persisted().unwrap();
	// int coerced into the float field by validation
	assert_eq!(collection.get(&Key::Int8(1)).unwrap().field("score"), &Value::float8(3.0));

	let transaction = collection
		.update(Key::Int8(1), |draft| {
			draft.set("score", 5);
		})
		.unwrap();
	let mutations = transaction.mutations();
	// validated changes keep only the supplied field, coerced
	assert_eq!(mutations[0].changes, object! { score: 5.0 });
}

#[test]
fn test_events_carry_previous_values() {
	let sync = ManualSync::with_rows(vec![object! { id: 1, title: "a" }]);
	let collection = acked_collection(sync.clone());

	let events = Arc::new(Mutex::new(Vec::new()));
	let events_clone = Arc::clone(&events);
	let guard = collection.subscribe(move |event| {
		events_clone.lock().push(event.clone());
	});

	sync.server_update(object! { id: 1, title: "b" });
	sync.server_delete(object! { id: 1, title: "b" });

	let events = events.lock();
	assert_eq!(events.len(), 2);
	assert_eq!(events[0].op, ChangeOp::Update);
	assert_eq!(events[0].previous.as_ref().unwrap().field("title"), &Value::utf8("a"));
	assert_eq!(events[1].op, ChangeOp::Delete);
	assert_eq!(events[1].value.field("title"), &Value::utf8("b"));
	drop(events);
	guard.unsubscribe();
}

#[test]
fn test_subscribe_key_only_sees_its_key() {
	let sync = ManualSync::with_rows(vec![object! { id: 1 }, object! { id: 2 }]);
	let collection = acked_collection(sync.clone());

	let seen = Arc::new(AtomicUsize::new(0));
	let seen_clone = Arc::clone(&seen);
	let _guard = collection.subscribe_key(Key::Int8(2), move |_event| {
		seen_clone.fetch_add(1, Ordering::SeqCst);
	});

	sync.server_update(object! { id: 1, touched: true });
	assert_eq!(seen.load(Ordering::SeqCst), 0);
	sync.server_update(object! { id: 2, touched: true });
	assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn test_masked_sync_writes_emit_no_events() {
	let sync = ManualSync::with_rows(vec![object! { id: 1, title: "a" }]);
	let collection = acked_collection(sync.clone());

	// hold an optimistic update open so the overlay masks key 1
	let transaction = Transaction::new(TransactionOptions {
		auto_commit: false,
		..Default::default()
	});
	transaction
		.mutate(|| {
			collection.update(Key::Int8(1), |draft| draft.set("title", "optimistic"))?;
			Ok(())
		})
		.unwrap();

	let events = Arc::new(AtomicUsize::new(0));
	let events_clone = Arc::clone(&events);
	let _guard = collection.subscribe(move |_event| {
		events_clone.fetch_add(1, Ordering::SeqCst);
	});

	// the server value lands in the baseline but the overlay still wins
	sync.server_update(object! { id: 1, title: "server" });
	assert_eq!(events.load(Ordering::SeqCst), 0, "masked write must not emit");
	assert_eq!(collection.get(&Key::Int8(1)).unwrap().field("title"), &Value::utf8("optimistic"));
	assert_eq!(collection.get_synced_value(&Key::Int8(1)).unwrap().field("title"), &Value::utf8("server"));

	transaction.rollback().unwrap();
	// with the overlay gone the server value shows through
	assert_eq!(collection.get(&Key::Int8(1)).unwrap().field("title"), &Value::utf8("server"));
}

#[test]
fn test_rollback_optimistic_updates_by_key() {
	let sync = ManualSync::with_rows(vec![object! { id: 1 }, object! { id: 2 }]);
	let collection = acked_collection(sync);

	let tx_one = Transaction::new(TransactionOptions {
		auto_commit: false,
		..Default::default()
	});
	tx_one.mutate(|| collection.update(Key::Int8(1), |draft| draft.set("x", 1)).map(|_| ())).unwrap();

	let tx_two = Transaction::new(TransactionOptions {
		auto_commit: false,
		..Default::default()
	});
	tx_two.mutate(|| collection.update(Key::Int8(2), |draft| draft.set("x", 2)).map(|_| ())).unwrap();

	collection.rollback_optimistic_updates(Some(&[Key::Int8(1)]));
	assert_eq!(tx_one.state(), TransactionState::Failed);
	assert_eq!(tx_two.state(), TransactionState::Pending);

	collection.rollback_optimistic_updates(None);
	assert_eq!(tx_two.state(), TransactionState::Failed);
}

#[test]
fn test_failed_persist_rolls_back_overlay() {
	let sync = ManualSync::new();
	let config = CollectionConfig::new(sync).on_insert(|_tx, _collection| {
		Err(rill_type::error!(rill_type::internal!("server rejected")))
	});
	let collection = Collection::create(config);

	let transaction = collection.insert(object! { id: 1 }).unwrap();
	assert_eq!(transaction.state(), TransactionState::Failed);
	assert!(transaction.is_persisted().is_err());
	assert!(!collection.has(&Key::Int8(1)), "failed insert must not linger in the view");
}
