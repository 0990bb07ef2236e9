// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! A live query binds a compiled pipeline to its source collections and
//! exposes the result as a collection of its own.
//!
//! Every source is consumed through a `CollectionSubscription`; batches
//! are queued and propagated by a scheduler job keyed by the output
//! collection, whose dependencies are the source collections, so chained
//! live queries flush in topological order within one wave. Subquery
//! sources compile to nested live queries consuming the same interface.

use std::{
	collections::HashMap,
	sync::{
		Arc, Weak,
		atomic::{AtomicBool, Ordering},
	},
};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, warn};

use rill_collection::{
	Collection, CollectionConfig, CollectionSubscription, SubscribeChangesOptions, SyncHandle, SyncSource, SyncWrite,
};
use rill_core::{ChangeEvent, CollectionId};
use rill_index::IndexKind;
use rill_query::{Direction, Expression, Query, Source};
use rill_runtime::Scheduler;
use rill_type::{Key, PropPath, Value, diagnostic::flow, error};

use crate::{
	Delta, FlowGraph, Result,
	compile::{Compiled, compile},
	multiset::deltas_from_event,
	operator::INDEX_FIELD,
};

static SCHEDULER: Lazy<Scheduler> = Lazy::new(Scheduler::new);
const FLOW_CONTEXT: &str = "flow";

/// Sync source of the output collection: it only parks the write handle
/// for the pipeline to push through.
struct LiveOutputSync {
	slot: Arc<Mutex<Option<SyncHandle>>>,
}

impl SyncSource for LiveOutputSync {
	fn sync(&self, handle: SyncHandle) -> Option<Box<dyn FnOnce() + Send>> {
		*self.slot.lock() = Some(handle);
		None
	}
}

type ResolvedSource = (String, Collection, Option<Expression>, Option<(PropPath, Direction)>);

struct LiveInner {
	graph: Mutex<FlowGraph>,
	output: Collection,
	output_handle: Arc<Mutex<Option<SyncHandle>>>,
	pending: Mutex<Vec<(String, Vec<Delta>)>>,
	subscriptions: Mutex<Vec<(String, Arc<CollectionSubscription>)>>,
	/// Job dependencies: the ids of every source collection.
	dependency_ids: Vec<String>,
	/// Alias of the windowed from-source that supports index-backed
	/// refills, when there is one.
	refill_alias: Option<String>,
	destroyed: AtomicBool,
	/// Nested live queries backing subquery sources.
	_children: Vec<LiveQuery>,
}

/// A maintained query result, readable through [`LiveQuery::collection`].
#[derive(Clone)]
pub struct LiveQuery {
	inner: Arc<LiveInner>,
}

impl LiveQuery {
	/// Compile `query` and bind it to `sources` (matched by collection
	/// id; subquery sources spawn nested live queries).
	pub fn new(query: Query, sources: impl IntoIterator<Item = Collection>) -> Result<LiveQuery> {
		let bindings: HashMap<CollectionId, Collection> =
			sources.into_iter().map(|collection| (collection.id(), collection)).collect();
		Self::build(query, &bindings)
	}

	fn build(query: Query, bindings: &HashMap<CollectionId, Collection>) -> Result<LiveQuery> {
		let Compiled {
			graph,
			sources,
		} = compile(&query)?;

		// resolve every source edge to a concrete collection
		let mut children = Vec::new();
		let mut resolved: Vec<ResolvedSource> = Vec::new();
		for binding in sources {
			let collection = match binding.source {
				Source::Collection(id) => bindings
					.get(&id)
					.cloned()
					.ok_or_else(|| error!(flow::unknown_source(&binding.alias)))?,
				Source::Subquery(inner) => {
					let child = Self::build(*inner, bindings)?;
					let collection = child.collection().clone();
					children.push(child);
					collection
				}
			};
			resolved.push((binding.alias, collection, binding.filter, binding.order));
		}

		let output_slot: Arc<Mutex<Option<SyncHandle>>> = Arc::new(Mutex::new(None));
		let output = Collection::create(
			CollectionConfig::new(Arc::new(LiveOutputSync {
				slot: output_slot.clone(),
			}))
			.with_id(format!("live-{}", CollectionId::next()))
			.with_compare(|left: &Value, right: &Value| left.field(INDEX_FIELD).cmp(right.field(INDEX_FIELD))),
		);

		let refill_alias = resolved
			.iter()
			.find(|(_, _, _, order)| order.is_some())
			.map(|(alias, _, _, _)| alias.clone());
		let dependency_ids: Vec<String> =
			resolved.iter().map(|(_, collection, _, _)| collection.id().to_string()).collect();

		let inner = Arc::new(LiveInner {
			graph: Mutex::new(graph),
			output,
			output_handle: output_slot,
			pending: Mutex::new(Vec::new()),
			subscriptions: Mutex::new(Vec::new()),
			dependency_ids,
			refill_alias,
			destroyed: AtomicBool::new(false),
			_children: children,
		});

		// wire the source subscriptions; each delivers into the pending
		// queue and schedules the flush job
		let window = query.take.or(if query.find_one {
			Some(1)
		} else {
			None
		});
		let take_hint = window.map(|take| take + query.skip.unwrap_or(0));
		for (alias, collection, filter, order) in resolved {
			if let Some((path, _)) = &order {
				collection.create_index(path.clone(), IndexKind::BTree);
			}

			let weak = Arc::downgrade(&inner);
			let listener_alias = alias.clone();
			let subscription = Arc::new(collection.subscribe_changes(
				move |events: &[ChangeEvent]| {
					LiveQuery::enqueue(&weak, &listener_alias, events);
				},
				SubscribeChangesOptions {
					include_initial_state: false,
					filter,
					order_by: order.clone(),
				},
			));
			inner.subscriptions.lock().push((alias.clone(), subscription.clone()));

			// demand-driven initial load: a windowed query pulls just
			// its window through the range index, everything else takes
			// the full snapshot
			match (order.is_some(), take_hint) {
				(true, Some(rows)) => {
					subscription.request_limited_snapshot(rows, None);
				}
				_ => {
					subscription.request_snapshot(None, false);
				}
			}
		}

		// even an empty initial pass settles the output collection
		Self::flush_job(&Arc::downgrade(&inner));
		if let Some(handle) = inner.output_handle.lock().clone() {
			handle.mark_ready();
		}

		Ok(LiveQuery {
			inner,
		})
	}

	/// The query result as a collection; subscribe to it, query it, or
	/// feed it into another live query.
	pub fn collection(&self) -> &Collection {
		&self.inner.output
	}

	/// Result rows in query order (sorted queries order by their index
	/// annotation).
	pub fn rows(&self) -> Vec<Value> {
		self.inner.output.to_array()
	}

	/// The single row of a `find_one` query.
	pub fn first(&self) -> Option<Value> {
		self.rows().into_iter().next()
	}

	pub fn preload(&self) -> Result<()> {
		self.inner.output.preload()
	}

	/// Detach from every source and drop outstanding work. The output
	/// collection survives with its last contents for existing readers.
	pub fn destroy(&self) {
		if self.inner.destroyed.swap(true, Ordering::SeqCst) {
			return;
		}
		self.inner.subscriptions.lock().clear();
		self.inner.pending.lock().clear();
	}

	fn enqueue(weak: &Weak<LiveInner>, alias: &str, events: &[ChangeEvent]) {
		let Some(inner) = weak.upgrade() else {
			return;
		};
		if inner.destroyed.load(Ordering::SeqCst) {
			return;
		}

		let alias_name = alias.to_string();
		let wrap = |row: &Value| Value::object([(alias_name.clone(), row.clone())]);
		let deltas: Vec<Delta> = events.iter().flat_map(|event| deltas_from_event(event, &wrap)).collect();
		inner.pending.lock().push((alias.to_string(), deltas));

		// one job per live query; re-scheduling before the flush simply
		// replaces it. Dependencies on source collections order chained
		// queries inside a wave; sources that are plain collections are
		// not jobs and count as satisfied.
		let job_id = inner.output.id().to_string();
		let dependencies = inner.dependency_ids.clone();
		let job_weak = weak.clone();
		SCHEDULER.schedule(FLOW_CONTEXT, job_id, dependencies, move || {
			LiveQuery::flush_job(&job_weak);
			Ok(())
		});
		if let Err(flush_error) = SCHEDULER.flush(FLOW_CONTEXT) {
			warn!(error = %flush_error, "flow scheduler flush failed");
		}
		// a concurrent flush may have claimed the job without finishing
		// it yet; draining directly serializes on the graph lock so the
		// caller returns with the pipeline settled
		LiveQuery::flush_job(&weak);
	}

	fn flush_job(weak: &Weak<LiveInner>) {
		let Some(inner) = weak.upgrade() else {
			return;
		};
		if inner.destroyed.load(Ordering::SeqCst) {
			return;
		}

		let batches: Vec<(String, Vec<Delta>)> = std::mem::take(&mut *inner.pending.lock());

		let (outputs, underfilled) = {
			let mut graph = inner.graph.lock();
			for (alias, deltas) in batches {
				if let Err(push_error) = graph.push_input(&alias, deltas) {
					warn!(error = %push_error, "dropping batch for unknown source");
				}
			}
			match graph.run() {
				Ok(outputs) => (outputs, graph.topk_underfilled()),
				Err(run_error) => {
					// a tripped safety cap is a bug report, not a hang
					warn!(error = %run_error, "dataflow safety cap exceeded");
					if let Some(handle) = inner.output_handle.lock().clone() {
						handle.mark_error();
					}
					return;
				}
			}
		};

		if !outputs.is_empty() {
			Self::write_outputs(&inner, outputs);
		}

		// the window wants more rows; pull them through the range index
		// unless it already ran dry (an insert resets that latch)
		if let Some(missing) = underfilled {
			if let Some(alias) = inner.refill_alias.clone() {
				let subscription = {
					let subscriptions = inner.subscriptions.lock();
					subscriptions
						.iter()
						.find(|(candidate, _)| *candidate == alias)
						.map(|(_, subscription)| subscription.clone())
				};
				if let Some(subscription) = subscription {
					if !subscription.local_index_exhausted() {
						let delivered = subscription.request_limited_snapshot(missing, None);
						debug!(missing, delivered, "top-k refill");
					}
				}
			}
		}
	}

	fn write_outputs(inner: &Arc<LiveInner>, outputs: Vec<Delta>) {
		let Some(handle) = inner.output_handle.lock().clone() else {
			return;
		};

		// group the batch per key: retract+insert is an update, a lone
		// insert or retract maps directly
		let mut per_key: indexmap::IndexMap<Key, (Option<Value>, Option<Value>)> = indexmap::IndexMap::new();
		for delta in outputs {
			let entry = per_key.entry(delta.key.clone()).or_insert((None, None));
			if delta.mult > 0 {
				entry.1 = Some(delta.row);
			} else {
				entry.0 = Some(delta.row);
			}
		}

		handle.begin();
		for (key, (removed, added)) in per_key {
			let write = match (removed, added) {
				(None, Some(row)) => SyncWrite::insert(row).with_key(key),
				(Some(_), Some(row)) => SyncWrite::update(row).with_key(key),
				(Some(row), None) => SyncWrite::delete(row).with_key(key),
				(None, None) => continue,
			};
			if let Err(write_error) = handle.write(write) {
				warn!(error = %write_error, "live output write failed");
			}
		}
		if let Err(commit_error) = handle.commit() {
			warn!(error = %commit_error, "live output commit failed");
		}
	}
}

impl Drop for LiveInner {
	fn drop(&mut self) {
		self.destroyed.store(true, Ordering::SeqCst);
	}
}
