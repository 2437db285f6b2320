// SPDX-License-Identifier: Apache-2.0
//! Receiver side of a trickle stream.
//!
//! The [`StreamClient`] consumes the transport's two frame types and drives
//! a renderer through the [`ScenePort`] trait: hierarchy records become a
//! scene tree (DAG fan-in resolved by node duplication), chunk bytes are
//! reassembled into whole typed elements across frame boundaries, and
//! animation channels report how many keyframes are playable as their
//! parameters trickle in.

mod assemble;
mod client;
mod decode;
mod port;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use assemble::{AssembleError, BufferAssembler};
pub use client::StreamClient;
pub use decode::GraphDecoder;
pub use port::{ElementData, ScenePort};
