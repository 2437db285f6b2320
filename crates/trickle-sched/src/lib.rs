// SPDX-License-Identifier: Apache-2.0
//! Sender-side transfer scheduler for trickle streams.
//!
//! The scheduler turns a normalized asset table into a sequence of wire
//! turns: deduplicated items grouped per property, rotated per primitive and
//! attribute, chunked per turn, and re-orderable between any two chunks by
//! receiver feedback. It is fully synchronous; the transport (see the
//! websocket gateway) drives it and owns all I/O waiting.
//!
//! Flow per session:
//!
//! 1. [`Scheduler::handle_feedback`] with an asset request yields the
//!    reference to resolve; the caller loads the table and calls
//!    [`Scheduler::launch`].
//! 2. [`Scheduler::next_turn`] stages frames; the caller dispatches them and
//!    calls [`Scheduler::confirm_dispatched`] (or [`Scheduler::pause`]).
//! 3. Repeat until the turn status reports completion.

mod ingest;
mod item;
mod queue;
mod scheduler;
mod unit;

pub use ingest::{ingest, Ingested, PropertyEntry};
pub use item::{BinarySource, Body, ItemStore, PendingHierarchy, TransferItem};
pub use queue::{QueueEntry, TransferQueue};
pub use scheduler::{Feedback, OutFrame, Scheduler, Status, Turn};
pub use unit::{Advance, MeshUnit, PropertyUnit, SubQueue};

use trickle_asset::AssetError;
use trickle_graph::GraphError;
use trickle_proto::ProtoError;

/// Errors that stop a stream.
///
/// Everything recoverable (unknown materials, undeliverable attributes,
/// unexpected feedback) is surfaced to the receiver as a warning header
/// instead and the stream continues.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Asset table or backing-store failure.
    #[error(transparent)]
    Asset(#[from] AssetError),
    /// Node graph inconsistency in the asset table.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Header encoding or id derivation failure.
    #[error(transparent)]
    Proto(#[from] ProtoError),
}
