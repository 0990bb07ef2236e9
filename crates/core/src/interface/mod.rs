// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Traits that let the lower crates talk about collections without
//! depending on the collection crate.

use std::{
	fmt::{Display, Formatter},
	sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};

/// Process-unique identity of a collection instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionId(pub u64);

static NEXT_COLLECTION_ID: AtomicU64 = AtomicU64::new(1);

impl CollectionId {
	pub fn next() -> Self {
		Self(NEXT_COLLECTION_ID.fetch_add(1, Ordering::Relaxed))
	}
}

impl Display for CollectionId {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "collection-{}", self.0)
	}
}

/// The face a collection shows to the transaction layer.
///
/// Transactions never hold a concrete collection; they hold this sink and
/// poke it whenever the set of active transactions (or their mutations)
/// changes, at which point the collection recomputes its optimistic overlay
/// and emits the resulting diff.
pub trait OverlaySink: Send + Sync {
	fn collection_id(&self) -> CollectionId;

	/// The active transaction set or its mutations changed; recompute the
	/// optimistic overlay and emit events for the difference.
	fn overlay_changed(&self);
}
