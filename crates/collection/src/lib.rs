// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

pub use collection::{Collection, CollectionStatus, ListenerGuard, SyncHandle};
pub use config::{AutoIndex, CollectionConfig, CollectionOptions, KeyOf, MutationHandler, SyncMode};
pub use draft::Draft;
pub use schema::{FieldCheck, FieldSchema, Schema, Validated};
pub use snapshot::SnapshotOptions;
pub use subscription::{CollectionSubscription, SubscribeChangesOptions, SubscriptionStatus};
pub use sync::{SubsetOptions, SyncSource, SyncWrite, SyncWriteType};

mod collection;
mod config;
mod draft;
mod schema;
mod snapshot;
mod subscription;
mod sync;

pub type Result<T> = std::result::Result<T, rill_type::Error>;
