// Copyright 2024 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Errors surfaced by interface administration.

use thiserror::Error;

/// Errors returned by address-table and group-membership operations.
///
/// Conditions recovered on the packet path (unknown receive protocol,
/// malformed packets, failed forwarding resolution) are counted, not
/// surfaced; see [`crate::counters`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum NicError {
    /// The address is already bound to the interface.
    #[error("duplicate address")]
    DuplicateAddress,
    /// The protocol number is not registered with the stack.
    #[error("unknown protocol")]
    UnknownProtocol,
    /// The address is not bound to the interface, or is bound with a
    /// kind the operation does not apply to.
    #[error("bad local address")]
    BadLocalAddress,
    /// The address is not known to the interface at all.
    #[error("bad address")]
    BadAddress,
    /// The address is known but not in the state the operation requires.
    #[error("invalid endpoint state")]
    InvalidEndpointState,
    /// The operation is not supported for the given arguments.
    #[error("not supported")]
    NotSupported,
    /// No route table entry matches the destination.
    #[error("no route to destination")]
    NoRoute,
    /// An interface with the same identifier already exists.
    #[error("duplicate NIC id")]
    DuplicateNicId,
}
