// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! One-shot timers on a dedicated thread.
//!
//! Backs the collection GC countdown and the paced-mutation strategies.
//! Callbacks run on the timer thread; a cancelled timer whose callback has
//! not started yet never fires.

use std::{
	collections::BTreeMap,
	sync::atomic::{AtomicU64, Ordering},
	thread,
	time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use once_cell::sync::Lazy;
use tracing::trace;

type Callback = Box<dyn FnOnce() + Send>;

enum Command {
	Schedule {
		id: u64,
		deadline: Instant,
		callback: Callback,
	},
	Cancel {
		id: u64,
	},
}

pub struct TimerService {
	sender: Sender<Command>,
	next_id: AtomicU64,
}

/// Handle to a scheduled timer; dropping it does NOT cancel the timer.
#[derive(Clone)]
pub struct TimerHandle {
	id: u64,
	sender: Sender<Command>,
}

impl TimerHandle {
	/// Cancel the timer if it has not fired yet.
	pub fn cancel(&self) {
		let _ = self.sender.send(Command::Cancel {
			id: self.id,
		});
	}
}

impl TimerService {
	pub fn new() -> Self {
		let (sender, receiver) = unbounded();
		thread::Builder::new()
			.name("rill-timer".to_string())
			.spawn(move || run(receiver))
			.expect("spawn timer thread");
		Self {
			sender,
			next_id: AtomicU64::new(1),
		}
	}

	/// The process-wide timer instance.
	pub fn global() -> &'static TimerService {
		static GLOBAL: Lazy<TimerService> = Lazy::new(TimerService::new);
		&GLOBAL
	}

	pub fn schedule(&self, delay: Duration, callback: impl FnOnce() + Send + 'static) -> TimerHandle {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		trace!(id, ?delay, "scheduling timer");
		let _ = self.sender.send(Command::Schedule {
			id,
			deadline: Instant::now() + delay,
			callback: Box::new(callback),
		});
		TimerHandle {
			id,
			sender: self.sender.clone(),
		}
	}
}

impl Default for TimerService {
	fn default() -> Self {
		Self::new()
	}
}

fn run(receiver: Receiver<Command>) {
	let mut timers: BTreeMap<(Instant, u64), Callback> = BTreeMap::new();

	loop {
		let next_deadline = timers.keys().next().map(|(deadline, _)| *deadline);

		let command = match next_deadline {
			Some(deadline) => match receiver.recv_deadline(deadline) {
				Ok(command) => Some(command),
				Err(RecvTimeoutError::Timeout) => None,
				Err(RecvTimeoutError::Disconnected) => return,
			},
			None => match receiver.recv() {
				Ok(command) => Some(command),
				Err(_) => return,
			},
		};

		match command {
			Some(Command::Schedule {
				id,
				deadline,
				callback,
			}) => {
				timers.insert((deadline, id), callback);
			}
			Some(Command::Cancel {
				id,
			}) => {
				timers.retain(|(_, timer_id), _| *timer_id != id);
			}
			None => {}
		}

		// fire everything that is due
		let now = Instant::now();
		while let Some(entry) = timers.first_entry() {
			if entry.key().0 > now {
				break;
			}
			let callback = entry.remove();
			callback();
		}
	}
}
