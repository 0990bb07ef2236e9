// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::sync::Arc;

use rill_collection::{Collection, CollectionStatus};
use rill_storage::{MemoryStorage, StorageApi, storage_collection};
use rill_type::{Key, Value, object};

#[test]
fn test_local_mutations_persist_and_survive_restart() {
	let storage = MemoryStorage::new();

	{
		let todos = Collection::create(storage_collection(Arc::new(storage.clone()), "todos"));
		todos.insert(object! { id: 1, title: "write it down" }).unwrap().is_persisted().unwrap();
		todos.update(Key::Int8(1), |draft| draft.set("title", "write it all down"))
			.unwrap()
			.is_persisted()
			.unwrap();
	}

	// a fresh collection over the same storage loads the persisted rows
	let restored = Collection::create(storage_collection(Arc::new(storage), "todos"));
	restored.preload().unwrap();
	assert_eq!(restored.size(), 1);
	assert_eq!(restored.get(&Key::Int8(1)).unwrap().field("title"), &Value::utf8("write it all down"));
}

#[test]
fn test_changes_propagate_across_instances() {
	let storage = MemoryStorage::new();

	let first = Collection::create(storage_collection(Arc::new(storage.clone()), "notes"));
	let second = Collection::create(storage_collection(Arc::new(storage.clone()), "notes"));

	first.insert(object! { id: 1, body: "hello" }).unwrap().is_persisted().unwrap();
	assert_eq!(second.get(&Key::Int8(1)).unwrap().field("body"), &Value::utf8("hello"));

	// updates and deletes travel the same way, keyed by version change
	first.update(Key::Int8(1), |draft| draft.set("body", "hello again")).unwrap().is_persisted().unwrap();
	assert_eq!(second.get(&Key::Int8(1)).unwrap().field("body"), &Value::utf8("hello again"));

	second.delete(Key::Int8(1)).unwrap().is_persisted().unwrap();
	assert!(!first.has(&Key::Int8(1)), "delete did not reach the first instance");
}

#[test]
fn test_unparseable_payload_marks_collection_errored() {
	let storage = MemoryStorage::new();
	storage.set_item("broken", "not json at all").unwrap();

	let collection = Collection::create(storage_collection(Arc::new(storage), "broken"));
	assert_eq!(collection.status(), CollectionStatus::Error);
}

#[test]
fn test_distinct_storage_keys_stay_isolated() {
	let storage = MemoryStorage::new();

	let apples = Collection::create(storage_collection(Arc::new(storage.clone()), "apples"));
	let pears = Collection::create(storage_collection(Arc::new(storage), "pears"));

	apples.insert(object! { id: 1, kind: "boskoop" }).unwrap().is_persisted().unwrap();
	assert_eq!(apples.size(), 1);
	assert_eq!(pears.size(), 0, "the other storage key must not see the write");
}
