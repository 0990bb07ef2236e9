// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Per-subscriber change delivery.
//!
//! Each subscription tracks which keys it has already delivered. Live
//! events are rewritten against that set: an update for an unseen key
//! becomes an insert, a delete for an unseen key is dropped, so a
//! consumer can never observe an update for a row it was never given.

use std::{collections::HashSet, sync::Arc};

use parking_lot::Mutex;
use tracing::{debug, trace};

use rill_core::{ChangeEvent, ChangeOp};
use rill_index::TakeQuery;
use rill_query::{Direction, Expression, equality_prop, eval_predicate, expr};
use rill_type::{Key, PropPath, Value};

use crate::{AutoIndex, Collection, SnapshotOptions, SubsetOptions, SyncMode, snapshot::filter_batch};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionStatus {
	Ready,
	LoadingMore,
}

#[derive(Clone)]
pub struct SubscribeChangesOptions {
	/// Deliver the current state as inserts on subscription. On by
	/// default.
	pub include_initial_state: bool,
	/// Predicate every delivered event must satisfy; boundary-crossing
	/// updates become synthetic inserts/deletes.
	pub filter: Option<Expression>,
	/// Field the subscriber consumes in order; enables limited
	/// snapshots through a range index.
	pub order_by: Option<(PropPath, Direction)>,
}

impl Default for SubscribeChangesOptions {
	fn default() -> Self {
		Self {
			include_initial_state: true,
			filter: None,
			order_by: None,
		}
	}
}

impl SubscribeChangesOptions {
	/// A cold subscription: only live events, no initial snapshot.
	pub fn changes_only() -> Self {
		Self {
			include_initial_state: false,
			..Default::default()
		}
	}
}

pub(crate) struct SubState {
	loaded_initial: bool,
	snapshot_sent: bool,
	sent_keys: HashSet<Key>,
	local_index_exhausted: bool,
	outstanding_loads: usize,
}

pub(crate) struct SubscriptionShared {
	listener: Arc<dyn Fn(&[ChangeEvent]) + Send + Sync>,
	filter: Option<Expression>,
	order_by: Option<(PropPath, Direction)>,
	state: Mutex<SubState>,
}

impl SubscriptionShared {
	/// Forward a live change batch through the predicate and the
	/// sent-keys rewrite.
	pub(crate) fn emit_events(&self, events: &[ChangeEvent]) {
		let filtered = match &self.filter {
			Some(filter) => filter_batch(filter, events),
			None => events.to_vec(),
		};
		if filtered.is_empty() {
			return;
		}

		let mut out = Vec::with_capacity(filtered.len());
		{
			let mut state = self.state.lock();
			for event in filtered {
				if event.op == ChangeOp::Insert {
					// new rows may unblock a starved top-k; updates and
					// deletes never do
					state.local_index_exhausted = false;
				}
				let seen = state.sent_keys.contains(&event.key);
				match event.op {
					ChangeOp::Insert => {
						state.sent_keys.insert(event.key.clone());
						out.push(event);
					}
					ChangeOp::Update => {
						if seen {
							out.push(event);
						} else {
							state.sent_keys.insert(event.key.clone());
							out.push(ChangeEvent::insert(event.key, event.value));
						}
					}
					ChangeOp::Delete => {
						if seen {
							state.sent_keys.remove(&event.key);
							out.push(event);
						}
					}
				}
			}
		}

		if !out.is_empty() {
			(self.listener)(&out);
		}
	}
}

/// A batched change-stream subscription with snapshot control.
pub struct CollectionSubscription {
	collection: Collection,
	shared: Arc<SubscriptionShared>,
	listener_id: u64,
	active: bool,
}

impl CollectionSubscription {
	pub(crate) fn create(
		collection: Collection,
		listener: Arc<dyn Fn(&[ChangeEvent]) + Send + Sync>,
		options: SubscribeChangesOptions,
	) -> Self {
		// an equality filter triggers auto-indexing so later snapshots
		// and other subscribers get the fast path
		if let Some(filter) = &options.filter {
			if collection.config_auto_index() == AutoIndex::Eager {
				if let Some((path, _)) = equality_prop(filter) {
					collection.create_index(path, rill_index::IndexKind::Equality);
				}
			}
		}

		let shared = Arc::new(SubscriptionShared {
			listener,
			filter: options.filter.clone(),
			order_by: options.order_by.clone(),
			state: Mutex::new(SubState {
				loaded_initial: false,
				snapshot_sent: false,
				sent_keys: HashSet::new(),
				local_index_exhausted: false,
				outstanding_loads: 0,
			}),
		});

		let listener_id = collection.register_batch_listener(shared.clone());
		let subscription = Self {
			collection,
			shared,
			listener_id,
			active: true,
		};

		if options.include_initial_state {
			subscription.request_snapshot(None, false);
		}
		subscription
	}

	pub fn collection(&self) -> &Collection {
		&self.collection
	}

	pub fn status(&self) -> SubscriptionStatus {
		if self.shared.state.lock().outstanding_loads > 0 {
			SubscriptionStatus::LoadingMore
		} else {
			SubscriptionStatus::Ready
		}
	}

	pub fn snapshot_sent(&self) -> bool {
		self.shared.state.lock().snapshot_sent
	}

	pub fn loaded_initial_state(&self) -> bool {
		self.shared.state.lock().loaded_initial
	}

	/// The local range index ran dry while a window still wanted rows;
	/// cleared only by a subsequent insert.
	pub fn local_index_exhausted(&self) -> bool {
		self.shared.state.lock().local_index_exhausted
	}

	/// Deliver the matching current state as inserts, once. A request
	/// with neither an extra filter nor `optimized_only` completes the
	/// initial load; later requests are no-ops. Returns `false` when
	/// `optimized_only` could not be served.
	pub fn request_snapshot(&self, extra_filter: Option<Expression>, optimized_only: bool) -> bool {
		{
			let state = self.shared.state.lock();
			if state.loaded_initial {
				return true;
			}
		}

		let combined = match (self.shared.filter.clone(), extra_filter.clone()) {
			(Some(base), Some(extra)) => Some(expr::and(base, extra)),
			(Some(base), None) => Some(base),
			(None, extra) => extra,
		};

		let Some(snapshot) = self.collection.current_state_as_changes(&SnapshotOptions {
			filter: combined,
			order_by: None,
			limit: None,
			optimized_only,
		}) else {
			trace!(collection = %self.collection.name(), "optimized-only snapshot unavailable");
			return false;
		};

		let mut out = Vec::with_capacity(snapshot.len());
		{
			let mut state = self.shared.state.lock();
			for event in snapshot {
				if state.sent_keys.insert(event.key.clone()) {
					out.push(event);
				}
			}
			state.snapshot_sent = true;
			if extra_filter.is_none() && !optimized_only {
				state.loaded_initial = true;
			}
		}

		if !out.is_empty() {
			(self.shared.listener)(&out);
		}
		true
	}

	/// Pull up to `limit` not-yet-sent rows in index order, resuming
	/// strictly after `min_value`. Requires the subscription to be
	/// ordered and a range index to exist on the order field. Returns
	/// the number of rows delivered.
	pub fn request_limited_snapshot(&self, limit: usize, min_value: Option<Value>) -> usize {
		let Some((path, direction)) = self.shared.order_by.clone() else {
			debug!(collection = %self.collection.name(), "limited snapshot without order_by");
			return 0;
		};
		let Some(index) = self.collection.range_index_on(&path) else {
			debug!(collection = %self.collection.name(), "limited snapshot without range index");
			return 0;
		};

		let mut delivered = Vec::new();
		let mut query = TakeQuery {
			after: min_value,
			descending: direction == Direction::Desc,
		};

		loop {
			let result = {
				let state = self.shared.state.lock();
				let sent = &state.sent_keys;
				let delivered_keys: HashSet<&Key> = delivered.iter().map(|(key, _)| key).collect();
				index.take(limit - delivered.len(), &query, |key| {
					if sent.contains(key) || delivered_keys.contains(key) {
						return false;
					}
					match self.collection.get(key) {
						Some(row) => self
							.shared
							.filter
							.as_ref()
							.is_none_or(|filter| eval_predicate(filter, &row)),
						None => false,
					}
				})
			};
			let Some(result) = result else {
				return 0;
			};

			for key in result.keys {
				if let Some(row) = self.collection.get(&key) {
					delivered.push((key, row));
				}
			}

			if delivered.len() >= limit {
				break;
			}
			if result.exhausted {
				let mut state = self.shared.state.lock();
				state.local_index_exhausted = true;
				drop(state);
				self.load_more_from_source(limit - delivered.len());
				break;
			}
			query.after = result.last_seen;
		}

		let mut out = Vec::with_capacity(delivered.len());
		{
			let mut state = self.shared.state.lock();
			for (key, row) in delivered {
				if state.sent_keys.insert(key.clone()) {
					out.push(ChangeEvent::insert(key, row));
				}
			}
			state.snapshot_sent = true;
		}

		let count = out.len();
		if !out.is_empty() {
			(self.shared.listener)(&out);
		}
		count
	}

	/// Ask an on-demand source for more rows. Overlapping requests fold
	/// into one loading state; the status returns to ready when all of
	/// them settle, successfully or not.
	fn load_more_from_source(&self, wanted: usize) {
		if self.collection.inner_config().sync_mode != SyncMode::OnDemand {
			return;
		}

		{
			let mut state = self.shared.state.lock();
			state.outstanding_loads += 1;
			if state.outstanding_loads == 1 {
				self.collection.mark_loading_more(true);
			}
		}

		let options = SubsetOptions {
			filter: self.shared.filter.clone(),
			order_by: self.shared.order_by.clone(),
			limit: Some(wanted),
			offset: None,
		};
		let source = self.collection.inner_config().sync.clone();
		let handle = self.collection.current_sync_handle();
		let loaded = match handle {
			Some(handle) => source.load_subset(&options, &handle),
			None => false,
		};
		trace!(collection = %self.collection.name(), loaded, "load_subset settled");

		{
			let mut state = self.shared.state.lock();
			state.outstanding_loads -= 1;
			if state.outstanding_loads == 0 {
				self.collection.mark_loading_more(false);
			}
		}
	}

	pub fn unsubscribe(mut self) {
		self.release();
	}

	fn release(&mut self) {
		if self.active {
			self.active = false;
			self.collection.remove_listener(self.listener_id);
		}
	}
}

impl Drop for CollectionSubscription {
	fn drop(&mut self) {
		self.release();
	}
}
