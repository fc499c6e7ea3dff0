//! A composable, zero-copy, layered protocol stack for sensor-network devices.
//!
//! This is not a single wire protocol but rather a set of small, chainable layer
//! implementations -- framing, dispatch, transport, message exchange -- that a concrete device
//! wires together to get the concrete protocol it needs. The central abstraction is the
//! [`layer::Layer`] trait: every layer in a chain implements the same four-method contract
//! (`recv`, `getsendbuf`, `send`, `free`) so that layers can be composed without the upper
//! layers knowing what sits below them.
//!
//! ## Layering
//!
//! A chain is built bottom-up: a physical transport sits at the root, frame layers decode a
//! byte stream into discrete packets, dispatch layers route packets by a leading protocol tag,
//! and terminal layers (message exchange, transport ports, user protocols) consume the payload.
//! Each layer only ever talks to its immediate neighbours, found the way `ethox` wires its own
//! layers: by reference, configured once at construction and never reshuffled at runtime.
//!
//! ## Buffers
//!
//! There is no shared buffer pool. Sending a packet asks the bottommost layer for a buffer
//! large enough for the whole encapsulated chain via [`layer::Layer::getsendbuf`], each layer on
//! the way down reserving its own header by advancing the returned pointer. The caller fills in
//! payload and calls [`layer::Layer::send`] on the layer it asked, which propagates the send
//! down the same chain. At most one such buffer may be outstanding per layer at a time.
//!
//! ## Things that do not work yet -- Future work
//!
//! Layers borrow their persistent state mutably during `recv`/`send`. A layer cannot presently
//! be shared between two independent chains; `RefCell`-based interior mutability would allow it
//! at the cost of a runtime borrow check, mirroring the tradeoff `ethox` documents for its own
//! endpoints.
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc as alloc_crate;

#[cfg(feature = "alloc")]
pub(crate) use alloc_crate as alloc;

pub mod clock;
pub mod dispatch;
pub mod dup;
pub mod error;
pub mod frame;
pub mod layer;
pub mod managed;
pub mod message;
pub mod reactor;
pub mod redirect;
pub mod transport;
pub mod user;

pub use error::Error;
pub use layer::{Layer, Receiver, Stats};
