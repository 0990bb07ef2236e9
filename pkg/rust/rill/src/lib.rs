// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! rill: a client-side reactive relational data layer.
//!
//! Collections expose a synchronous optimistic view over
//! eventually-committed synced state; live queries maintain SQL-like
//! query results incrementally as their inputs change.
//!
//! ```
//! use std::sync::Arc;
//!
//! use rill::{Collection, LiveQuery, QueryBuilder, expr, object, storage_collection, MemoryStorage};
//!
//! let storage = MemoryStorage::new();
//! let todos = Collection::create(storage_collection(Arc::new(storage), "todos"));
//! todos.insert(object! { id: 1, title: "ship it", done: false }).unwrap();
//!
//! let open = QueryBuilder::from("t", todos.id())
//! 	.filter(expr::eq(expr::prop("t.done"), expr::value(false)))
//! 	.map([("id", expr::prop("t.id")), ("title", expr::prop("t.title"))])
//! 	.build()
//! 	.unwrap();
//! let live = LiveQuery::new(open, [todos]).unwrap();
//! assert_eq!(live.rows().len(), 1);
//! ```

pub use rill_collection::{
	AutoIndex, Collection, CollectionConfig, CollectionOptions, CollectionStatus, CollectionSubscription, Draft,
	FieldCheck, FieldSchema, ListenerGuard, Schema, SnapshotOptions, SubscribeChangesOptions, SubsetOptions,
	SubscriptionStatus, SyncHandle, SyncMode, SyncSource, SyncWrite, SyncWriteType, Validated,
};
pub use rill_core::{ChangeEvent, ChangeOp, CollectionId};
pub use rill_flow::LiveQuery;
pub use rill_index::{CollectionIndex, IndexKind};
pub use rill_pace::{PacedMutations, Strategy};
pub use rill_query::{Direction, Expression, IndexFlavor, Query, QueryBuilder, expr};
pub use rill_runtime::Scheduler;
pub use rill_storage::{MemoryStorage, StorageApi, StorageSync, storage_collection};
pub use rill_transaction::{
	MutationType, PendingMutation, Transaction, TransactionOptions, TransactionState, ambient_transaction,
};
pub use rill_type::{Error, Key, PropPath, SchemaIssue, Value, object};

pub type Result<T> = std::result::Result<T, Error>;
