// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Pacing strategies around transactions.
//!
//! `on_mutate` must be synchronous: it runs inside the pending
//! transaction as the ambient transaction, so collection operations made
//! in it attach their mutations there. The strategy decides when the
//! accumulated transaction commits; its persistence handler settles
//! `completed`/`failed` as usual. A transaction rolled back externally
//! before its strategy fires is skipped silently and the next `mutate`
//! starts a fresh one.

use std::{
	collections::VecDeque,
	sync::Arc,
	thread,
	time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::{debug, trace};

use rill_runtime::TimerService;
use rill_transaction::{MutationFn, Transaction, TransactionOptions, TransactionState};
use rill_type::Value;

use crate::Result;

#[derive(Clone, Debug)]
pub enum Strategy {
	/// Calls inside one window share a transaction; the trailing edge
	/// commits it (or the leading edge commits the first call alone).
	Debounce {
		wait: Duration,
		leading: bool,
	},
	/// The leading edge commits immediately; calls inside the window
	/// batch into a second transaction committed at the trailing edge.
	Throttle {
		wait: Duration,
		leading: bool,
		trailing: bool,
	},
	/// Every call is its own transaction; they commit strictly one
	/// after another, `wait` apart.
	Queue {
		wait: Option<Duration>,
	},
	/// Every call is its own transaction; transactions touching
	/// disjoint keys persist in parallel, overlapping ones serialize.
	DependencyQueue,
}

type OnMutate = Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>;

struct PaceState {
	/// Accumulating transaction of the open debounce/throttle window.
	current: Option<Transaction>,
	timer: Option<rill_runtime::TimerHandle>,
	window_started: Option<Instant>,
	/// Queue strategy: transactions awaiting their serialized commit.
	waiting: VecDeque<Transaction>,
	draining: bool,
}

pub struct PacedMutations {
	on_mutate: OnMutate,
	mutation_fn: MutationFn,
	strategy: Strategy,
	state: Arc<Mutex<PaceState>>,
}

impl PacedMutations {
	pub fn new(
		on_mutate: impl Fn(&Value) -> Result<()> + Send + Sync + 'static,
		mutation_fn: MutationFn,
		strategy: Strategy,
	) -> Arc<Self> {
		Arc::new(Self {
			on_mutate: Arc::new(on_mutate),
			mutation_fn,
			strategy,
			state: Arc::new(Mutex::new(PaceState {
				current: None,
				timer: None,
				window_started: None,
				waiting: VecDeque::new(),
				draining: false,
			})),
		})
	}

	pub fn mutate(self: &Arc<Self>, variables: Value) -> Result<Transaction> {
		self.mutate_with(variables, Vec::new())
	}

	/// Apply `variables` optimistically and let the strategy decide when
	/// to persist. `depends_on` delays the persistence handler until the
	/// given transactions settle (independent-transaction strategies
	/// only).
	pub fn mutate_with(self: &Arc<Self>, variables: Value, depends_on: Vec<Transaction>) -> Result<Transaction> {
		match self.strategy.clone() {
			Strategy::Debounce {
				wait,
				leading,
			} => self.mutate_debounced(variables, wait, leading),
			Strategy::Throttle {
				wait,
				leading,
				trailing,
			} => self.mutate_throttled(variables, wait, leading, trailing),
			Strategy::Queue {
				wait,
			} => self.mutate_queued(variables, depends_on, wait),
			Strategy::DependencyQueue => self.mutate_dependency_queued(variables, depends_on),
		}
	}

	fn fresh_transaction(&self, depends_on: Vec<Transaction>) -> Transaction {
		Transaction::new(TransactionOptions {
			auto_commit: false,
			mutation_fn: Some(self.mutation_fn.clone()),
			depends_on,
			..Default::default()
		})
	}

	/// The shared window transaction, replacing one that was rolled back
	/// externally.
	fn current_transaction(&self, state: &mut PaceState) -> (Transaction, bool) {
		if let Some(transaction) = &state.current {
			if transaction.state() == TransactionState::Pending {
				return (transaction.clone(), false);
			}
			trace!(id = %transaction.id(), "window transaction was rolled back externally, starting fresh");
		}
		let transaction = self.fresh_transaction(Vec::new());
		state.current = Some(transaction.clone());
		(transaction, true)
	}

	fn attach(&self, transaction: &Transaction, variables: &Value) -> Result<()> {
		let on_mutate = self.on_mutate.clone();
		transaction.mutate(|| on_mutate(variables))
	}

	fn mutate_debounced(self: &Arc<Self>, variables: Value, wait: Duration, leading: bool) -> Result<Transaction> {
		let mut state = self.state.lock();
		let window_open = state.window_started.is_some_and(|started| started.elapsed() < wait);

		if leading && !window_open {
			// leading edge: commit this call alone, keep the window
			// marker so followers batch until it closes
			let transaction = self.fresh_transaction(Vec::new());
			state.window_started = Some(Instant::now());
			drop(state);
			self.attach(&transaction, &variables)?;
			commit_skipping_rolled_back(&transaction);
			return Ok(transaction);
		}

		let (transaction, _created) = self.current_transaction(&mut state);
		state.window_started = Some(Instant::now());

		// trailing edge moves with every call
		if let Some(timer) = state.timer.take() {
			timer.cancel();
		}
		let paced = Arc::clone(self);
		state.timer = Some(TimerService::global().schedule(wait, move || {
			let transaction = {
				let mut state = paced.state.lock();
				state.timer = None;
				state.window_started = None;
				state.current.take()
			};
			if let Some(transaction) = transaction {
				commit_skipping_rolled_back(&transaction);
			}
		}));
		drop(state);

		self.attach(&transaction, &variables)?;
		Ok(transaction)
	}

	fn mutate_throttled(
		self: &Arc<Self>,
		variables: Value,
		wait: Duration,
		leading: bool,
		trailing: bool,
	) -> Result<Transaction> {
		let mut state = self.state.lock();
		let window_open = state.window_started.is_some_and(|started| started.elapsed() < wait);

		if !window_open {
			state.window_started = Some(Instant::now());
			// settle whatever the previous window left behind: a late
			// trailing batch commits, a trailing-less batch is dropped
			let stale = state.current.take();
			if let Some(timer) = state.timer.take() {
				timer.cancel();
			}
			let settle = |stale: Option<Transaction>| {
				if let Some(stale) = stale {
					if stale.state() == TransactionState::Pending {
						if trailing {
							commit_skipping_rolled_back(&stale);
						} else {
							stale.rollback().ok();
						}
					}
				}
			};
			if leading {
				let transaction = self.fresh_transaction(Vec::new());
				drop(state);
				settle(stale);
				self.attach(&transaction, &variables)?;
				commit_skipping_rolled_back(&transaction);
				return Ok(transaction);
			}
			drop(state);
			settle(stale);
			state = self.state.lock();
		}

		// inside the window: batch into the trailing transaction
		let (transaction, created) = self.current_transaction(&mut state);
		if created && trailing {
			let remaining = state
				.window_started
				.map(|started| wait.saturating_sub(started.elapsed()))
				.unwrap_or(wait);
			let paced = Arc::clone(self);
			state.timer = Some(TimerService::global().schedule(remaining, move || {
				let transaction = {
					let mut state = paced.state.lock();
					state.timer = None;
					state.window_started = None;
					state.current.take()
				};
				if let Some(transaction) = transaction {
					commit_skipping_rolled_back(&transaction);
				}
			}));
		}
		drop(state);

		self.attach(&transaction, &variables)?;
		Ok(transaction)
	}

	fn mutate_queued(
		self: &Arc<Self>,
		variables: Value,
		depends_on: Vec<Transaction>,
		wait: Option<Duration>,
	) -> Result<Transaction> {
		let transaction = self.fresh_transaction(depends_on);
		self.attach(&transaction, &variables)?;

		let start_draining = {
			let mut state = self.state.lock();
			state.waiting.push_back(transaction.clone());
			if state.draining {
				false
			} else {
				state.draining = true;
				true
			}
		};
		if start_draining {
			self.schedule_drain(wait.unwrap_or(Duration::ZERO));
		}
		Ok(transaction)
	}

	/// Pop and commit one queued transaction on the timer thread, then
	/// chain the next; the handler of transaction n+1 can never start
	/// before transaction n settled.
	fn schedule_drain(self: &Arc<Self>, delay: Duration) {
		let paced = Arc::clone(self);
		TimerService::global().schedule(delay, move || {
			let next = {
				let mut state = paced.state.lock();
				match state.waiting.pop_front() {
					Some(transaction) => Some(transaction),
					None => {
						state.draining = false;
						None
					}
				}
			};
			if let Some(transaction) = next {
				commit_skipping_rolled_back(&transaction);
				let wait = match &paced.strategy {
					Strategy::Queue {
						wait,
					} => wait.unwrap_or(Duration::ZERO),
					_ => Duration::ZERO,
				};
				paced.schedule_drain(wait);
			}
		});
	}

	fn mutate_dependency_queued(self: &Arc<Self>, variables: Value, depends_on: Vec<Transaction>) -> Result<Transaction> {
		let transaction = self.fresh_transaction(depends_on);
		self.attach(&transaction, &variables)?;

		// with the mutations applied the touched keys are known: depend
		// on every in-flight transaction this one overlaps
		{
			let mut state = self.state.lock();
			state.waiting.retain(|in_flight| !in_flight.state().is_terminal());
			let touched = transaction.touched();
			for in_flight in &state.waiting {
				let overlaps = touched.iter().any(|(collection, key)| in_flight.touches(*collection, key));
				if overlaps {
					transaction.add_dependency(in_flight.clone());
				}
			}
			state.waiting.push_back(transaction.clone());
		}

		// each transaction persists on its own thread; disjoint ones run
		// in parallel, overlapping ones block on their dependencies
		let worker = transaction.clone();
		thread::Builder::new()
			.name("rill-pace-commit".to_string())
			.spawn(move || {
				commit_skipping_rolled_back(&worker);
			})
			.expect("spawn commit thread");
		Ok(transaction)
	}
}

fn commit_skipping_rolled_back(transaction: &Transaction) {
	if transaction.state() != TransactionState::Pending {
		debug!(id = %transaction.id(), state = transaction.state().name(), "skipping non-pending transaction");
		return;
	}
	if let Err(commit_error) = transaction.commit() {
		debug!(id = %transaction.id(), error = %commit_error, "paced commit failed");
	}
}
