// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Topologically ordered job runner.
//!
//! Jobs are grouped by context; flushing a context runs every job it holds
//! in dependency order. Dependencies naming jobs outside the context are
//! treated as already satisfied; the producer may be something that is not
//! a job at all, like an external collection. Self-dependencies are
//! ignored. A genuine cycle among in-context jobs is an error.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use rill_type::{diagnostic::scheduler, error};

use crate::Result;

type JobFn = Box<dyn FnOnce() -> Result<()> + Send>;

struct Job {
	dependencies: Vec<String>,
	run: JobFn,
}

#[derive(Default)]
pub struct Scheduler {
	contexts: Mutex<HashMap<String, IndexMap<String, Job>>>,
}

impl Scheduler {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a job; a job with the same id in the same context is
	/// replaced and keeps its original position in the flush order.
	pub fn schedule(
		&self,
		context: impl Into<String>,
		id: impl Into<String>,
		dependencies: Vec<String>,
		run: impl FnOnce() -> Result<()> + Send + 'static,
	) {
		let mut contexts = self.contexts.lock();
		contexts.entry(context.into()).or_default().insert(
			id.into(),
			Job {
				dependencies,
				run: Box::new(run),
			},
		);
	}

	pub fn job_count(&self, context: &str) -> usize {
		self.contexts.lock().get(context).map(IndexMap::len).unwrap_or(0)
	}

	/// Run every job registered in `context`, respecting in-context
	/// dependencies. A failing job is logged and does not stop
	/// independent jobs. Returns an error only for a dependency cycle,
	/// in which case no job runs.
	pub fn flush(&self, context: &str) -> Result<()> {
		let jobs = match self.contexts.lock().remove(context) {
			Some(jobs) if !jobs.is_empty() => jobs,
			_ => return Ok(()),
		};

		let order = topological_order(context, &jobs)?;
		debug!(context, jobs = order.len(), "flushing scheduler context");

		let mut jobs = jobs;
		for id in order {
			let job = jobs.shift_remove(&id).expect("ordered job exists");
			if let Err(job_error) = (job.run)() {
				warn!(context, job = %id, error = %job_error, "scheduled job failed");
			}
		}
		Ok(())
	}
}

fn topological_order(context: &str, jobs: &IndexMap<String, Job>) -> Result<Vec<String>> {
	// Kahn's algorithm over in-context edges only; insertion order breaks
	// ties so the flush order is deterministic
	let mut blockers: IndexMap<&str, HashSet<&str>> = IndexMap::new();
	for (id, job) in jobs {
		let deps: HashSet<&str> = job
			.dependencies
			.iter()
			.map(String::as_str)
			.filter(|dep| *dep != id && jobs.contains_key(*dep))
			.collect();
		blockers.insert(id.as_str(), deps);
	}

	let mut order = Vec::with_capacity(jobs.len());
	while !blockers.is_empty() {
		let ready: Vec<&str> =
			blockers.iter().filter(|(_, deps)| deps.is_empty()).map(|(id, _)| *id).collect();
		if ready.is_empty() {
			let stuck: Vec<String> = blockers.keys().map(|id| id.to_string()).collect();
			return Err(error!(scheduler::unresolved_dependencies(context, &stuck)));
		}
		for id in ready {
			blockers.shift_remove(id);
			for (_, deps) in blockers.iter_mut() {
				deps.remove(id);
			}
			order.push(id.to_string());
		}
	}
	Ok(order)
}

#[cfg(test)]
mod tests {
	use std::sync::{Arc, Mutex};

	use super::Scheduler;

	fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Box<dyn FnOnce() -> crate::Result<()> + Send>)
	{
		let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
		let log_clone = Arc::clone(&log);
		let record = move |name: &'static str| -> Box<dyn FnOnce() -> crate::Result<()> + Send> {
			let log = Arc::clone(&log_clone);
			Box::new(move || {
				log.lock().unwrap().push(name);
				Ok(())
			})
		};
		(log, record)
	}

	#[test]
	fn test_flush_respects_dependencies() {
		let scheduler = Scheduler::new();
		let (log, record) = recorder();

		scheduler.schedule("ctx", "b", vec!["a".to_string()], record("b"));
		scheduler.schedule("ctx", "c", vec!["b".to_string()], record("c"));
		scheduler.schedule("ctx", "a", vec![], record("a"));

		scheduler.flush("ctx").unwrap();
		assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
		assert_eq!(scheduler.job_count("ctx"), 0);
	}

	#[test]
	fn test_out_of_context_dependency_is_satisfied() {
		let scheduler = Scheduler::new();
		let (log, record) = recorder();

		// "upstream" is not a job in this context; it must not block
		scheduler.schedule("ctx", "a", vec!["upstream".to_string()], record("a"));
		scheduler.flush("ctx").unwrap();
		assert_eq!(*log.lock().unwrap(), vec!["a"]);
	}

	#[test]
	fn test_self_dependency_is_ignored() {
		let scheduler = Scheduler::new();
		let (log, record) = recorder();

		scheduler.schedule("ctx", "a", vec!["a".to_string()], record("a"));
		scheduler.flush("ctx").unwrap();
		assert_eq!(*log.lock().unwrap(), vec!["a"]);
	}

	#[test]
	fn test_cycle_is_reported() {
		let scheduler = Scheduler::new();
		let (log, record) = recorder();

		scheduler.schedule("ctx", "a", vec!["b".to_string()], record("a"));
		scheduler.schedule("ctx", "b", vec!["a".to_string()], record("b"));

		let error = scheduler.flush("ctx").unwrap_err();
		assert_eq!(error.code(), "SCHEDULER_001");
		assert!(log.lock().unwrap().is_empty(), "no job runs when the context is cyclic");
	}

	#[test]
	fn test_failing_job_does_not_stop_independent_jobs() {
		let scheduler = Scheduler::new();
		let (log, record) = recorder();

		scheduler.schedule("ctx", "bad", vec![], || {
			Err(rill_type::error!(rill_type::internal!("boom")))
		});
		scheduler.schedule("ctx", "good", vec![], record("good"));

		scheduler.flush("ctx").unwrap();
		assert_eq!(*log.lock().unwrap(), vec!["good"]);
	}

	#[test]
	fn test_flush_of_unknown_context_is_noop() {
		let scheduler = Scheduler::new();
		scheduler.flush("missing").unwrap();
	}
}
