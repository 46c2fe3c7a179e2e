// Copyright 2024 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The network interface layer of a user-space TCP/IP stack.
//!
//! This crate implements the object that binds a link-layer transport to
//! the network-layer protocol machinery: it owns the set of addresses
//! bound to an interface, performs receive-side demultiplexing and
//! forwarding, and carries the IPv6 Neighbor Discovery obligations that
//! come with address ownership (DAD, solicited-node group membership,
//! SLAAC link-local generation, router solicitation gating).
//!
//! The collaborators an interface talks to (the owning [`stack::Stack`],
//! network and transport protocol implementations, the link endpoint
//! driver) are consumed through capability traits in [`protocol`] and
//! [`link`].

#![deny(missing_docs, unreachable_patterns)]

pub mod buffer;
pub mod counters;
pub mod device;
pub mod error;
pub mod link;
pub mod protocol;
pub mod route;
pub mod stack;
pub(crate) mod sync;
#[cfg(any(test, feature = "testutils"))]
pub mod testutil;
pub mod types;

pub use device::Nic;
pub use error::NicError;
pub use stack::Stack;
pub use types::{NetworkProtocolNumber, NicId, TransportProtocolNumber};
