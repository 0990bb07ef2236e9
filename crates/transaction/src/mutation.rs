// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::{
	fmt::{Display, Formatter},
	time::SystemTime,
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rill_core::CollectionId;
use rill_type::{Key, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MutationId(pub Uuid);

impl MutationId {
	pub fn next() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Display for MutationId {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		Display::fmt(&self.0, f)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationType {
	Insert,
	Update,
	Delete,
}

/// One optimistic write, immutable once recorded except through the merge
/// rules of [`crate::Transaction::apply_mutations`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingMutation {
	pub id: MutationId,
	pub mutation_type: MutationType,
	pub key: Key,
	/// The derived-view value before this transaction touched the key;
	/// `None` for inserts.
	pub original: Option<Value>,
	/// The value the overlay exposes; for deletes, the value being
	/// removed.
	pub modified: Value,
	/// Only the fields this mutation assigned.
	pub changes: Value,
	pub metadata: Option<Value>,
	pub sync_metadata: Option<Value>,
	pub created_at: SystemTime,
	pub updated_at: SystemTime,
	pub collection: CollectionId,
}

impl PendingMutation {
	pub fn insert(collection: CollectionId, key: Key, value: Value, metadata: Option<Value>) -> Self {
		let now = SystemTime::now();
		Self {
			id: MutationId::next(),
			mutation_type: MutationType::Insert,
			key,
			original: None,
			changes: value.clone(),
			modified: value,
			metadata,
			sync_metadata: None,
			created_at: now,
			updated_at: now,
			collection,
		}
	}

	pub fn update(
		collection: CollectionId,
		key: Key,
		original: Value,
		modified: Value,
		changes: Value,
		metadata: Option<Value>,
	) -> Self {
		let now = SystemTime::now();
		Self {
			id: MutationId::next(),
			mutation_type: MutationType::Update,
			key,
			original: Some(original),
			modified,
			changes,
			metadata,
			sync_metadata: None,
			created_at: now,
			updated_at: now,
			collection,
		}
	}

	pub fn delete(collection: CollectionId, key: Key, original: Value, metadata: Option<Value>) -> Self {
		let now = SystemTime::now();
		Self {
			id: MutationId::next(),
			mutation_type: MutationType::Delete,
			key,
			original: Some(original.clone()),
			modified: original,
			changes: Value::object(std::iter::empty::<(String, Value)>()),
			metadata,
			sync_metadata: None,
			created_at: now,
			updated_at: now,
			collection,
		}
	}
}
