// Copyright (c) rilldb.dev 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

pub use mutation::{MutationId, MutationType, PendingMutation};
pub use registry::{
	active_transactions, ambient_transaction, overlay_mutations, pending_transactions_touching, persisting_elsewhere,
};
pub use transaction::{MutationFn, Transaction, TransactionId, TransactionOptions, TransactionState};

mod mutation;
mod registry;
mod transaction;

pub type Result<T> = std::result::Result<T, rill_type::Error>;
