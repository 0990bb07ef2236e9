// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Arena-backed operator graph.
//!
//! Nodes hold indices into a shared pool instead of references to each
//! other; edges are `(node, port)` pairs. The compiler emits nodes in
//! topological order, so one forward sweep per wave moves every pending
//! batch at least one edge further.

use std::collections::HashMap;

use tracing::trace;

use rill_type::{diagnostic::flow, error};

use crate::{Delta, Result, operator::Operator};

/// A tick processes one node's pending input. A graph that has not
/// settled after this many ticks is broken (an ordering or predicate
/// bug), and reports instead of hanging.
pub const TICK_CAP: u64 = 100_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

struct Node {
	operator: Operator,
	/// Consumers of this node's output: `(node, input port)`.
	downstream: Vec<(NodeId, usize)>,
	/// Pending input batches per port.
	pending: Vec<Vec<Delta>>,
}

#[derive(Default)]
pub struct FlowGraph {
	nodes: Vec<Node>,
	inputs: HashMap<String, NodeId>,
	topk: Option<NodeId>,
	/// Deltas that reached a node with no consumers (the pipeline
	/// output), drained by [`FlowGraph::take_output`].
	output: Vec<Delta>,
}

impl FlowGraph {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add_node(&mut self, operator: Operator) -> NodeId {
		let ports = operator.input_ports();
		let id = NodeId(self.nodes.len());
		self.nodes.push(Node {
			operator,
			downstream: Vec::new(),
			pending: vec![Vec::new(); ports],
		});
		id
	}

	pub fn add_input(&mut self, alias: impl Into<String>) -> NodeId {
		let id = self.add_node(Operator::Input);
		self.inputs.insert(alias.into(), id);
		id
	}

	pub fn connect(&mut self, from: NodeId, to: NodeId, port: usize) {
		debug_assert!(from.0 < to.0, "edges must point forward through the arena");
		self.nodes[from.0].downstream.push((to, port));
	}

	pub fn mark_topk(&mut self, id: NodeId) {
		self.topk = Some(id);
	}

	pub fn input(&self, alias: &str) -> Option<NodeId> {
		self.inputs.get(alias).copied()
	}

	pub fn aliases(&self) -> impl Iterator<Item = &str> {
		self.inputs.keys().map(String::as_str)
	}

	/// Queue a batch at a source edge. Call [`FlowGraph::run`] to
	/// propagate it.
	pub fn push_input(&mut self, alias: &str, batch: Vec<Delta>) -> Result<()> {
		let id = self.input(alias).ok_or_else(|| error!(flow::unknown_source(alias)))?;
		self.nodes[id.0].pending[0].extend(batch);
		Ok(())
	}

	/// Drain every pending batch through the graph until no operator has
	/// work left, then return the outputs of this pass.
	pub fn run(&mut self) -> Result<Vec<Delta>> {
		let mut ticks: u64 = 0;
		loop {
			let mut worked = false;
			for index in 0..self.nodes.len() {
				for port in 0..self.nodes[index].pending.len() {
					if self.nodes[index].pending[port].is_empty() {
						continue;
					}
					worked = true;
					ticks += 1;
					if ticks > TICK_CAP {
						return Err(error!(flow::tick_cap_exceeded(
							TICK_CAP,
							format!("node {} still has pending input", index),
						)));
					}

					let batch = std::mem::take(&mut self.nodes[index].pending[port]);
					trace!(node = index, port, deltas = batch.len(), "processing batch");
					let produced = self.nodes[index].operator.apply(port, &batch);
					if produced.is_empty() {
						continue;
					}

					if self.nodes[index].downstream.is_empty() {
						self.output.extend(produced);
					} else {
						let downstream = self.nodes[index].downstream.clone();
						for (target, target_port) in downstream {
							self.nodes[target.0].pending[target_port].extend(produced.iter().cloned());
						}
					}
				}
			}
			if !worked {
				break;
			}
		}
		Ok(self.take_output())
	}

	pub fn take_output(&mut self) -> Vec<Delta> {
		std::mem::take(&mut self.output)
	}

	/// How many rows the top-k window still wants, if the pipeline has
	/// one.
	pub fn topk_underfilled(&self) -> Option<usize> {
		let id = self.topk?;
		match &self.nodes[id.0].operator {
			Operator::TopK(topk) => topk.underfilled(),
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use rill_query::expr;
	use rill_type::{Key, object};

	use super::FlowGraph;
	use crate::{Delta, operator::Operator};

	#[test]
	fn test_linear_pipeline_propagates() {
		let mut graph = FlowGraph::new();
		let input = graph.add_input("t");
		let filter = graph.add_node(Operator::Filter {
			predicate: expr::gt(expr::prop("v"), expr::value(10)),
		});
		graph.connect(input, filter, 0);

		graph.push_input("t", vec![
			Delta::insert(Key::Int8(1), object! { v: 5 }),
			Delta::insert(Key::Int8(2), object! { v: 15 }),
		])
		.unwrap();

		let out = graph.run().unwrap();
		assert_eq!(out.len(), 1);
		assert_eq!(out[0].key, Key::Int8(2));
	}

	#[test]
	fn test_unknown_input_alias_is_an_error() {
		let mut graph = FlowGraph::new();
		graph.add_input("t");
		let error = graph.push_input("missing", vec![]).unwrap_err();
		assert_eq!(error.code(), "FLOW_002");
	}

	#[test]
	fn test_empty_run_settles_immediately() {
		let mut graph = FlowGraph::new();
		graph.add_input("t");
		assert!(graph.run().unwrap().is_empty());
	}
}
