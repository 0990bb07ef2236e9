// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::{sync::Arc, time::Duration};

use rill_core::util::closest_match;
use rill_transaction::Transaction;
use rill_type::{Key, Value, diagnostic::config, error};

use crate::{Collection, Result, Schema, SyncSource};

pub type KeyOf = Arc<dyn Fn(&Value) -> Option<Key> + Send + Sync>;
pub type MutationHandler = Arc<dyn Fn(&Transaction, &Collection) -> Result<()> + Send + Sync>;
pub type Comparator = Arc<dyn Fn(&Value, &Value) -> std::cmp::Ordering + Send + Sync>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncMode {
	/// Start syncing at creation and keep everything local.
	#[default]
	Eager,
	/// Sync on first access; subscriptions pull subsets on demand.
	OnDemand,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AutoIndex {
	Off,
	/// Create an equality index the first time a subscription filters on
	/// `field = literal`.
	#[default]
	Eager,
}

pub const DEFAULT_GC_TIME: Duration = Duration::from_millis(300_000);

#[derive(Clone)]
pub struct CollectionConfig {
	pub id: Option<String>,
	pub key_of: KeyOf,
	pub sync: Arc<dyn SyncSource>,
	pub schema: Option<Arc<dyn Schema>>,
	pub gc_time: Duration,
	pub start_sync: bool,
	pub sync_mode: SyncMode,
	pub auto_index: AutoIndex,
	pub on_insert: Option<MutationHandler>,
	pub on_update: Option<MutationHandler>,
	pub on_delete: Option<MutationHandler>,
	pub compare: Option<Comparator>,
}

impl CollectionConfig {
	/// A configuration keyed by the `id` field of each row.
	pub fn new(sync: Arc<dyn SyncSource>) -> Self {
		Self::keyed_by_field(sync, "id")
	}

	pub fn keyed_by_field(sync: Arc<dyn SyncSource>, field: impl Into<String>) -> Self {
		let field = field.into();
		Self::keyed_by(sync, move |row: &Value| Key::from_value(row.field(&field)))
	}

	pub fn keyed_by(sync: Arc<dyn SyncSource>, key_of: impl Fn(&Value) -> Option<Key> + Send + Sync + 'static) -> Self {
		Self {
			id: None,
			key_of: Arc::new(key_of),
			sync,
			schema: None,
			gc_time: DEFAULT_GC_TIME,
			start_sync: true,
			sync_mode: SyncMode::default(),
			auto_index: AutoIndex::default(),
			on_insert: None,
			on_update: None,
			on_delete: None,
			compare: None,
		}
	}

	pub fn with_id(mut self, id: impl Into<String>) -> Self {
		self.id = Some(id.into());
		self
	}

	pub fn with_schema(mut self, schema: Arc<dyn Schema>) -> Self {
		self.schema = Some(schema);
		self
	}

	pub fn with_gc_time(mut self, gc_time: Duration) -> Self {
		self.gc_time = gc_time;
		self
	}

	pub fn with_start_sync(mut self, start_sync: bool) -> Self {
		self.start_sync = start_sync;
		self
	}

	pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
		self.sync_mode = sync_mode;
		self
	}

	pub fn with_auto_index(mut self, auto_index: AutoIndex) -> Self {
		self.auto_index = auto_index;
		self
	}

	pub fn on_insert(mut self, handler: impl Fn(&Transaction, &Collection) -> Result<()> + Send + Sync + 'static) -> Self {
		self.on_insert = Some(Arc::new(handler));
		self
	}

	pub fn on_update(mut self, handler: impl Fn(&Transaction, &Collection) -> Result<()> + Send + Sync + 'static) -> Self {
		self.on_update = Some(Arc::new(handler));
		self
	}

	pub fn on_delete(mut self, handler: impl Fn(&Transaction, &Collection) -> Result<()> + Send + Sync + 'static) -> Self {
		self.on_delete = Some(Arc::new(handler));
		self
	}

	pub fn with_compare(mut self, compare: impl Fn(&Value, &Value) -> std::cmp::Ordering + Send + Sync + 'static) -> Self {
		self.compare = Some(Arc::new(compare));
		self
	}

	/// Overlay dynamically supplied options (e.g. deserialized from an
	/// application config file) onto this configuration.
	pub fn with_options(mut self, options: &CollectionOptions) -> Self {
		if let Some(id) = &options.id {
			self.id = Some(id.clone());
		}
		if let Some(field) = &options.key_field {
			let field = field.clone();
			self.key_of = Arc::new(move |row: &Value| Key::from_value(row.field(&field)));
		}
		if let Some(gc_time) = options.gc_time {
			self.gc_time = gc_time;
		}
		if let Some(start_sync) = options.start_sync {
			self.start_sync = start_sync;
		}
		if let Some(sync_mode) = options.sync_mode {
			self.sync_mode = sync_mode;
		}
		if let Some(auto_index) = options.auto_index {
			self.auto_index = auto_index;
		}
		self
	}
}

const KNOWN_OPTIONS: [&str; 6] = ["id", "key_field", "gc_time", "start_sync", "sync_mode", "auto_index"];

/// Options parsed from a dynamic object; unknown keys are rejected with a
/// closest-match hint.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CollectionOptions {
	pub id: Option<String>,
	pub key_field: Option<String>,
	pub gc_time: Option<Duration>,
	pub start_sync: Option<bool>,
	pub sync_mode: Option<SyncMode>,
	pub auto_index: Option<AutoIndex>,
}

impl CollectionOptions {
	pub fn from_value(options: &Value) -> Result<Self> {
		let Some(fields) = options.as_object() else {
			return Err(error!(config::invalid_option("options", "expected an object")));
		};

		let mut parsed = Self::default();
		for (name, value) in fields {
			match name.as_str() {
				"id" => parsed.id = Some(text_option(name, value)?),
				"key_field" => parsed.key_field = Some(text_option(name, value)?),
				"gc_time" => {
					let millis = value
						.as_int8()
						.filter(|millis| *millis >= 0)
						.ok_or_else(|| error!(config::invalid_option(name, "expected milliseconds >= 0")))?;
					parsed.gc_time = Some(Duration::from_millis(millis as u64));
				}
				"start_sync" => {
					parsed.start_sync = Some(
						value.as_boolean()
							.ok_or_else(|| error!(config::invalid_option(name, "expected a boolean")))?,
					);
				}
				"sync_mode" => {
					parsed.sync_mode = Some(match text_option(name, value)?.as_str() {
						"eager" => SyncMode::Eager,
						"on_demand" => SyncMode::OnDemand,
						other => {
							return Err(error!(config::invalid_option(
								name,
								format!("'{}' is not one of eager, on_demand", other),
							)));
						}
					});
				}
				"auto_index" => {
					parsed.auto_index = Some(match text_option(name, value)?.as_str() {
						"off" => AutoIndex::Off,
						"eager" => AutoIndex::Eager,
						other => {
							return Err(error!(config::invalid_option(
								name,
								format!("'{}' is not one of off, eager", other),
							)));
						}
					});
				}
				unknown => {
					return Err(error!(config::unknown_option(unknown, closest_match(unknown, KNOWN_OPTIONS))));
				}
			}
		}
		Ok(parsed)
	}
}

fn text_option(name: &str, value: &Value) -> Result<String> {
	value.as_utf8().map(str::to_string).ok_or_else(|| error!(config::invalid_option(name, "expected a text value")))
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use rill_type::object;

	use super::{AutoIndex, CollectionOptions, SyncMode};

	#[test]
	fn test_options_parse_known_fields() {
		let options = CollectionOptions::from_value(&object! {
			id: "todos",
			gc_time: 5000,
			start_sync: false,
			sync_mode: "on_demand",
			auto_index: "off",
		})
		.unwrap();
		assert_eq!(options.id.as_deref(), Some("todos"));
		assert_eq!(options.gc_time, Some(Duration::from_millis(5000)));
		assert_eq!(options.start_sync, Some(false));
		assert_eq!(options.sync_mode, Some(SyncMode::OnDemand));
		assert_eq!(options.auto_index, Some(AutoIndex::Off));
	}

	#[test]
	fn test_unknown_option_suggests_closest_name() {
		let error = CollectionOptions::from_value(&object! { gcTime: 5000 }).unwrap_err();
		assert_eq!(error.code(), "CONFIG_001");
		assert!(error.diagnostic().help.as_deref().unwrap_or("").contains("gc_time"), "{:?}", error);
	}

	#[test]
	fn test_invalid_option_value() {
		let error = CollectionOptions::from_value(&object! { gc_time: "soon" }).unwrap_err();
		assert_eq!(error.code(), "CONFIG_002");
	}
}
