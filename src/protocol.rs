// Copyright 2024 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Capability interfaces for the protocol machinery an interface talks
//! to: network protocols and their endpoints, transport protocols and
//! the demultiplexer, raw-packet observers, and link-address resolvers.

use std::sync::mpsc::Receiver;
use std::sync::Arc;

use net_types::ethernet::Mac;
use net_types::ip::IpAddr;
use thiserror::Error;

use crate::buffer::PacketBuffer;
use crate::error::NicError;
use crate::link::LinkEndpoint;
use crate::route::Route;
use crate::stack::Stack;
use crate::types::{
    AddressWithPrefix, ControlType, NetworkProtocolNumber, NicId, TransportProtocolNumber,
};

/// A network-layer protocol registered with the stack.
pub trait NetworkProtocol: Send + Sync {
    /// The protocol's number.
    fn number(&self) -> NetworkProtocolNumber;

    /// The minimum size of a valid packet header, in bytes. Packets
    /// whose first contiguous region is shorter are dropped as
    /// malformed.
    fn minimum_packet_size(&self) -> usize;

    /// Extracts the source and destination addresses from a packet
    /// header of at least [`NetworkProtocol::minimum_packet_size`]
    /// bytes.
    fn parse_addresses(&self, packet: &[u8]) -> (IpAddr, IpAddr);

    /// The prefix length assumed for addresses added without one
    /// (temporary endpoints, multicast group memberships).
    fn default_prefix_len(&self) -> u8;

    /// Creates an endpoint bound to `addr` on the interface `nic_id`.
    fn new_endpoint(
        &self,
        nic_id: NicId,
        addr: AddressWithPrefix,
        stack: &Arc<Stack>,
        link: &Arc<dyn LinkEndpoint>,
    ) -> Result<Box<dyn NetworkEndpoint>, NicError>;
}

/// The identifier of a network endpoint: its bound local address.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct NetworkEndpointId {
    /// The local address the endpoint is bound to.
    pub local_address: IpAddr,
}

/// A network-layer endpoint owned by an interface's address table.
pub trait NetworkEndpoint: Send + Sync {
    /// The endpoint's identifier.
    fn id(&self) -> &NetworkEndpointId;

    /// The prefix length of the bound address.
    fn prefix_len(&self) -> u8;

    /// Handles a packet addressed to this endpoint.
    fn handle_packet(&self, route: &Route, pkt: PacketBuffer);

    /// Releases protocol-level resources. Called exactly once, when the
    /// endpoint is removed from the table.
    fn close(&self);
}

/// An error parsing the port pair out of a transport header.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
#[error("malformed transport header")]
pub struct PortParseError;

/// A transport-layer protocol registered with the stack.
pub trait TransportProtocol: Send + Sync {
    /// The protocol's number.
    fn number(&self) -> TransportProtocolNumber;

    /// The minimum size of a valid transport header, in bytes.
    fn minimum_packet_size(&self) -> usize;

    /// Extracts `(src_port, dst_port)` from a transport header.
    fn parse_ports(&self, packet: &[u8]) -> Result<(u16, u16), PortParseError>;

    /// Last-resort handler for packets no endpoint claimed. Returns
    /// whether the packet was handled (e.g. by emitting an ICMP error);
    /// `false` counts the packet as malformed.
    fn handle_unknown_destination_packet(
        &self,
        route: &Route,
        id: &TransportEndpointId,
        pkt: PacketBuffer,
    ) -> bool;
}

/// The 4-tuple identifying a transport endpoint.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TransportEndpointId {
    /// The local port.
    pub local_port: u16,
    /// The local address.
    pub local_address: IpAddr,
    /// The remote port.
    pub remote_port: u16,
    /// The remote address.
    pub remote_address: IpAddr,
}

/// The transport demultiplexer consuming fully parsed packets.
pub trait TransportDemultiplexer: Send + Sync {
    /// Delivers a packet to the endpoint registered for `id`. Returns
    /// whether an endpoint claimed it.
    fn deliver_packet(
        &self,
        route: &Route,
        protocol: TransportProtocolNumber,
        pkt: &PacketBuffer,
        id: &TransportEndpointId,
    ) -> bool;

    /// Delivers a copy of the packet to raw sockets bound to
    /// `protocol`.
    fn deliver_raw_packet(
        &self,
        route: &Route,
        protocol: TransportProtocolNumber,
        pkt: PacketBuffer,
    );

    /// Delivers a transport control (error) packet keyed by `id`.
    /// Returns whether an endpoint claimed it.
    fn deliver_control_packet(
        &self,
        net: NetworkProtocolNumber,
        trans: TransportProtocolNumber,
        typ: ControlType,
        extra: u32,
        pkt: &PacketBuffer,
        id: &TransportEndpointId,
    ) -> bool;
}

/// An observer of raw packets on an interface, registered per network
/// protocol (or under the all-Ethertypes wildcard).
pub trait PacketObserver: Send + Sync {
    /// Called with an independent copy of every matching packet.
    ///
    /// Invoked outside the interface lease; implementations must
    /// tolerate delivery in any order and must not assume interface
    /// state is unchanged since the packet arrived.
    fn handle_packet(
        &self,
        nic: NicId,
        local: Mac,
        protocol: NetworkProtocolNumber,
        pkt: PacketBuffer,
    );
}

/// Notified when link-address resolution completes for a pending
/// request.
pub type ResolutionWaiter = Receiver<()>;

/// The outcome of a link-address resolution attempt.
#[derive(Debug)]
pub enum LinkResolutionResult {
    /// The link address is known.
    Resolved(Mac),
    /// Resolution is in flight; the waiter fires when it settles.
    Pending(ResolutionWaiter),
    /// The address cannot be resolved.
    Failed,
}

/// A link-address resolver for one network protocol (e.g. ARP for
/// IPv4).
pub trait LinkAddressResolver: Send + Sync {
    /// The network protocol this resolver serves.
    fn link_address_protocol(&self) -> NetworkProtocolNumber;

    /// Resolves the link address for `addr` as reachable from `nic`,
    /// sourcing any probe traffic from `local_addr`.
    fn resolve(&self, nic: NicId, addr: IpAddr, local_addr: IpAddr) -> LinkResolutionResult;
}
