// Copyright 2024 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Routes.
//!
//! A route pairs the addressing of one packet flow with a counted
//! reference to the local endpoint sourcing it. The reference is held
//! for the lifetime of the route and released when the route drops, so
//! every path out of packet handling releases exactly once.

use core::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use net_types::ethernet::Mac;
use net_types::ip::{IpAddr, Ipv4};
use net_types::{MulticastAddr, Witness as _};
use thiserror::Error;

use crate::device::addresses::EndpointRef;
use crate::device::Nic;
use crate::protocol::{LinkResolutionResult, ResolutionWaiter};
use crate::stack::Stack;
use crate::types::{NetworkProtocolNumber, NicId};

/// A failed link-address resolution attempt.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// Resolution is in flight; the waiter fires when it settles.
    #[error("link address resolution would block")]
    WouldBlock(ResolutionWaiter),
    /// The next hop cannot be resolved.
    #[error("link address resolution failed")]
    Failed,
}

/// A route out of (or into) an interface for one packet flow.
pub struct Route {
    protocol: NetworkProtocolNumber,
    local_address: IpAddr,
    remote_address: IpAddr,
    local_link_address: Mac,
    remote_link_address: Option<Mac>,
    next_hop: Option<IpAddr>,
    nic_id: NicId,
    endpoint_ref: EndpointRef,
    handle_local: bool,
    multicast_loop: bool,
}

impl Debug for Route {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("protocol", &self.protocol)
            .field("local_address", &self.local_address)
            .field("remote_address", &self.remote_address)
            .field("next_hop", &self.next_hop)
            .field("nic_id", &self.nic_id)
            .finish()
    }
}

impl Route {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        protocol: NetworkProtocolNumber,
        local_address: IpAddr,
        remote_address: IpAddr,
        local_link_address: Mac,
        nic_id: NicId,
        endpoint_ref: EndpointRef,
        handle_local: bool,
        multicast_loop: bool,
    ) -> Self {
        Self {
            protocol,
            local_address,
            remote_address,
            local_link_address,
            remote_link_address: None,
            next_hop: None,
            nic_id,
            endpoint_ref,
            handle_local,
            multicast_loop,
        }
    }

    /// The network protocol the route carries.
    pub fn protocol(&self) -> NetworkProtocolNumber {
        self.protocol
    }

    /// The local (source) address.
    pub fn local_address(&self) -> IpAddr {
        self.local_address
    }

    /// The remote (destination) address.
    pub fn remote_address(&self) -> IpAddr {
        self.remote_address
    }

    /// The link address of the outgoing interface.
    pub fn local_link_address(&self) -> Mac {
        self.local_link_address
    }

    /// The link address of the remote, once known.
    pub fn remote_link_address(&self) -> Option<Mac> {
        self.remote_link_address
    }

    /// The gateway to send through, if the destination is not on-link.
    pub fn next_hop(&self) -> Option<IpAddr> {
        self.next_hop
    }

    /// The interface the route goes through.
    pub fn nic_id(&self) -> NicId {
        self.nic_id
    }

    /// Whether packets on this route may be delivered locally.
    pub fn handle_local(&self) -> bool {
        self.handle_local
    }

    /// Whether multicast packets on this route loop back.
    pub fn multicast_loop(&self) -> bool {
        self.multicast_loop
    }

    pub(crate) fn set_remote_link_address(&mut self, mac: Option<Mac>) {
        self.remote_link_address = mac;
    }

    pub(crate) fn set_local_link_address(&mut self, mac: Mac) {
        self.local_link_address = mac;
    }

    pub(crate) fn set_remote_address(&mut self, addr: IpAddr) {
        self.remote_address = addr;
    }

    pub(crate) fn set_next_hop(&mut self, next_hop: Option<IpAddr>) {
        self.next_hop = next_hop;
    }

    pub(crate) fn endpoint_ref(&self) -> &EndpointRef {
        &self.endpoint_ref
    }

    pub(crate) fn nic(&self) -> Option<Arc<Nic>> {
        self.endpoint_ref.nic()
    }

    /// Whether the remote link address still needs resolving before the
    /// route can be written to.
    pub fn is_resolution_required(&self) -> bool {
        self.endpoint_ref.is_valid_for_outgoing()
            && self.endpoint_ref.requires_link_resolution()
            && self.remote_link_address.is_none()
    }

    /// Resolves the remote link address.
    ///
    /// Multicast and broadcast destinations map directly to link
    /// addresses; anything else consults the protocol's link-address
    /// resolver, which may answer immediately, hand back a waiter, or
    /// fail.
    pub fn resolve(&mut self, stack: &Stack) -> Result<(), ResolutionError> {
        if !self.is_resolution_required() {
            return Ok(());
        }

        let next_addr = self.next_hop.unwrap_or(self.remote_address);
        match next_addr {
            IpAddr::V4(addr) => {
                if addr == Ipv4::LIMITED_BROADCAST_ADDRESS.get() {
                    self.remote_link_address = Some(Mac::BROADCAST);
                    return Ok(());
                }
                if let Some(group) = MulticastAddr::new(addr) {
                    self.remote_link_address = Some(Mac::from(&group));
                    return Ok(());
                }
            }
            IpAddr::V6(addr) => {
                if let Some(group) = MulticastAddr::new(addr) {
                    self.remote_link_address = Some(Mac::from(&group));
                    return Ok(());
                }
            }
        }

        let resolver =
            stack.link_address_resolver(self.protocol).ok_or(ResolutionError::Failed)?;
        match resolver.resolve(self.nic_id, next_addr, self.local_address) {
            LinkResolutionResult::Resolved(mac) => {
                self.remote_link_address = Some(mac);
                Ok(())
            }
            LinkResolutionResult::Pending(waiter) => Err(ResolutionError::WouldBlock(waiter)),
            LinkResolutionResult::Failed => Err(ResolutionError::Failed),
        }
    }
}
