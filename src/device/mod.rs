// Copyright 2024 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The network interface ("NIC").
//!
//! An interface binds one link endpoint to the stack's protocol
//! machinery. It owns the address table, multicast join counts and
//! packet-observer lists, and runs the receive dispatch: fan out to
//! observers, local delivery, or forwarding through a routing lookup.
//!
//! Locking: one reader-writer lease protects the mutable block
//! ([`NicState`]). Administrative operations take the write lease;
//! queries and the receive hot path take the read lease and release it
//! before invoking observers or protocol endpoints. Statistics and the
//! per-cell reference counts are atomics outside the lease.

pub mod addresses;
pub mod ndp;

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use net_types::ethernet::Mac;
use net_types::ip::{IpAddr, Ipv4, Ipv6, Subnet, SubnetEither};
use net_types::Witness as _;
use tracing::trace;

use crate::buffer::{PacketBuffer, Prependable};
use crate::counters::NicCounters;
use crate::error::NicError;
use crate::link::{LinkEndpoint, LinkEndpointCapabilities, NetworkDispatcher};
use crate::protocol::{PacketObserver, TransportEndpointId};
use crate::route::{ResolutionError, Route};
use crate::stack::Stack;
use crate::types::{
    AddressWithPrefix, ControlType, NetworkProtocolNumber, NicId, ProtocolAddress,
    TransportProtocolNumber,
};

use addresses::{
    AddressConfigType, AddressEndpoint, AddressKind, EndpointRef, PrimaryEndpointBehavior,
};
use ndp::{Lifetime, NdpState};

/// The mutable block of an interface, guarded by its lease.
pub(crate) struct NicState {
    pub(crate) enabled: bool,
    pub(crate) promiscuous: bool,
    pub(crate) spoofing: bool,
    pub(crate) primary: HashMap<NetworkProtocolNumber, Vec<Arc<AddressEndpoint>>>,
    pub(crate) endpoints: HashMap<IpAddr, Arc<AddressEndpoint>>,
    pub(crate) address_ranges: Vec<SubnetEither>,
    pub(crate) mcast_joins: HashMap<IpAddr, u32>,
    pub(crate) packet_observers: HashMap<NetworkProtocolNumber, Vec<Arc<dyn PacketObserver>>>,
    pub(crate) ndp: NdpState,
}

/// A network interface attached to a [`Stack`].
pub struct Nic {
    pub(crate) id: NicId,
    name: String,
    pub(crate) stack: Weak<Stack>,
    pub(crate) link: Arc<dyn LinkEndpoint>,
    context: Option<Box<dyn Any + Send + Sync>>,
    stats: NicCounters,
    pub(crate) state: crate::sync::RwLock<NicState>,
    pub(crate) weak_self: Weak<Nic>,
}

impl Nic {
    pub(crate) fn new(
        stack: Weak<Stack>,
        id: NicId,
        name: String,
        link: Arc<dyn LinkEndpoint>,
        ndp_configs: ndp::NdpConfigurations,
        observer_protocols: Vec<NetworkProtocolNumber>,
        context: Option<Box<dyn Any + Send + Sync>>,
    ) -> Arc<Self> {
        let packet_observers =
            observer_protocols.into_iter().map(|protocol| (protocol, Vec::new())).collect();
        Arc::new_cyclic(|weak_self| Nic {
            id,
            name,
            stack,
            link,
            context,
            stats: NicCounters::default(),
            state: crate::sync::RwLock::new(NicState {
                enabled: false,
                promiscuous: false,
                spoofing: false,
                primary: HashMap::new(),
                endpoints: HashMap::new(),
                address_ranges: Vec::new(),
                mcast_joins: HashMap::new(),
                packet_observers,
                ndp: NdpState::new(ndp_configs),
            }),
            weak_self: weak_self.clone(),
        })
    }

    /// The identifier of the interface.
    pub fn id(&self) -> NicId {
        self.id
    }

    /// The human-readable name of the interface.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The opaque context the interface was created with.
    pub fn context(&self) -> Option<&(dyn Any + Send + Sync)> {
        self.context.as_deref()
    }

    /// Transmit and receive statistics.
    pub fn stats(&self) -> &NicCounters {
        &self.stats
    }

    /// The link address of the interface.
    pub fn link_address(&self) -> Mac {
        self.link.link_address()
    }

    /// Whether the link endpoint is a loopback device.
    pub fn is_loopback(&self) -> bool {
        self.link.capabilities().contains(LinkEndpointCapabilities::LOOPBACK)
    }

    /// Whether the interface has been enabled.
    pub fn is_enabled(&self) -> bool {
        self.state.read().enabled
    }

    /// The stack that owns this interface.
    ///
    /// # Panics
    ///
    /// Panics if the stack has been dropped; an interface must not
    /// outlive its stack.
    pub(crate) fn stack(&self) -> Arc<Stack> {
        self.stack.upgrade().expect("NIC outlived its owning stack")
    }

    fn attach_link_endpoint(&self) {
        let nic = self.weak_self.upgrade().expect("attaching an unowned NIC");
        self.link.attach(nic);
    }

    /// Enables the interface: attaches it to the link endpoint and
    /// brings up the protocol obligations that come with being up
    /// (limited-broadcast acceptance, all-nodes membership, DAD,
    /// link-local SLAAC, router solicitation). Idempotent.
    pub fn enable(&self) -> Result<(), NicError> {
        {
            if self.state.read().enabled {
                return Ok(());
            }
        }

        let mut state = self.state.write();
        let state = &mut *state;
        if state.enabled {
            return Ok(());
        }
        state.enabled = true;

        self.attach_link_endpoint();

        let stack = self.stack();

        // An endpoint to receive limited-broadcast packets on this
        // interface. The prefix length is the full address length.
        if stack.network_protocol(NetworkProtocolNumber::IPV4).is_some() {
            let _: Arc<AddressEndpoint> = self.add_address_locked(
                state,
                ProtocolAddress {
                    protocol: NetworkProtocolNumber::IPV4,
                    address_with_prefix: AddressWithPrefix {
                        addr: IpAddr::V4(Ipv4::LIMITED_BROADCAST_ADDRESS.get()),
                        prefix_len: 32,
                    },
                },
                PrimaryEndpointBehavior::NeverPrimaryEndpoint,
                AddressKind::Permanent,
                AddressConfigType::Static,
                false,
            )?;
        }

        if stack.network_protocol(NetworkProtocolNumber::IPV6).is_none() {
            return Ok(());
        }

        // Re-run DAD over the permanent IPv6 unicast addresses: while
        // the interface was down, other nodes may have acquired them.
        let entries: Vec<Arc<AddressEndpoint>> = state
            .endpoints
            .values()
            .filter(|entry| {
                matches!(
                    entry.get_kind(),
                    AddressKind::Permanent | AddressKind::PermanentTentative
                )
            })
            .cloned()
            .collect();
        for entry in entries {
            let Some(addr) = addresses::ipv6_unicast(entry.protocol(), entry.addr()) else {
                continue;
            };
            entry.set_kind(AddressKind::PermanentTentative);
            self.start_duplicate_address_detection_locked(state, addr, &entry)?;
        }

        // All-nodes membership is required to receive the NDP messages
        // destined there (RFC 4861 section 4.2, RFC 4862 section
        // 5.4.2).
        self.join_group_locked(
            state,
            NetworkProtocolNumber::IPV6,
            IpAddr::V6(Ipv6::ALL_NODES_LINK_LOCAL_MULTICAST_ADDRESS.get()),
        )?;

        if stack.auto_gen_ipv6_link_local() && !self.is_loopback() {
            let link_local = Subnet::new(Ipv6::LINK_LOCAL_UNICAST_SUBNET.network(), 64)
                .expect("invalid link-local prefix");
            // A link-local address has an infinite preferred and valid
            // lifetime (RFC 4862 section 5.3).
            self.do_slaac_locked(state, link_local, Lifetime::Infinite, Lifetime::Infinite);
        }

        // Routers do not learn from Router Advertisements, so there is
        // no point soliciting them when operating as one.
        if !stack.forwarding() {
            self.start_soliciting_routers_locked(state);
        }

        Ok(())
    }

    /// Transitions the interface into an IPv6 router: host-only NDP
    /// state is invalidated and router solicitation stops.
    pub(crate) fn become_ipv6_router(&self) {
        let mut state = self.state.write();
        let state = &mut *state;
        self.cleanup_host_only_state_locked(state);
        self.stop_soliciting_routers_locked(state);
    }

    /// Transitions the interface into an IPv6 host: router solicitation
    /// starts.
    pub(crate) fn become_ipv6_host(&self) {
        let mut state = self.state.write();
        self.start_soliciting_routers_locked(&mut state);
    }

    /// Enables or disables promiscuous mode.
    pub fn set_promiscuous_mode(&self, enable: bool) {
        self.state.write().promiscuous = enable;
    }

    /// Whether promiscuous mode is enabled.
    pub fn is_promiscuous(&self) -> bool {
        self.state.read().promiscuous
    }

    /// Enables or disables address spoofing.
    pub fn set_spoofing(&self, enable: bool) {
        self.state.write().spoofing = enable;
    }

    /// Joins the multicast group `addr`, adding a backing endpoint on
    /// the first join.
    pub fn join_group(
        &self,
        protocol: NetworkProtocolNumber,
        addr: IpAddr,
    ) -> Result<(), NicError> {
        let mut state = self.state.write();
        self.join_group_locked(&mut state, protocol, addr)
    }

    pub(crate) fn join_group_locked(
        &self,
        state: &mut NicState,
        protocol: NetworkProtocolNumber,
        addr: IpAddr,
    ) -> Result<(), NicError> {
        let joins = state.mcast_joins.get(&addr).copied().unwrap_or(0);
        if joins == 0 {
            let stack = self.stack();
            let net_proto =
                stack.network_protocol(protocol).ok_or(NicError::UnknownProtocol)?;
            let _: Arc<AddressEndpoint> = self.add_address_locked(
                state,
                ProtocolAddress {
                    protocol,
                    address_with_prefix: AddressWithPrefix {
                        addr,
                        prefix_len: net_proto.default_prefix_len(),
                    },
                },
                PrimaryEndpointBehavior::NeverPrimaryEndpoint,
                AddressKind::Permanent,
                AddressConfigType::Static,
                false,
            )?;
        }
        let _ = state.mcast_joins.insert(addr, joins + 1);
        Ok(())
    }

    /// Leaves the multicast group `addr`, removing the backing endpoint
    /// on the last leave.
    pub fn leave_group(&self, addr: IpAddr) -> Result<(), NicError> {
        let mut state = self.state.write();
        self.leave_group_locked(&mut state, addr)
    }

    pub(crate) fn leave_group_locked(
        &self,
        state: &mut NicState,
        addr: IpAddr,
    ) -> Result<(), NicError> {
        let joins = state.mcast_joins.get(&addr).copied().unwrap_or(0);
        match joins {
            0 => return Err(NicError::BadLocalAddress),
            1 => {
                self.remove_permanent_address_locked(state, addr)?;
                let _ = state.mcast_joins.remove(&addr);
            }
            _ => {
                let _ = state.mcast_joins.insert(addr, joins - 1);
            }
        }
        Ok(())
    }

    /// Whether the interface is currently joined to `addr`.
    pub fn is_in_group(&self, addr: IpAddr) -> bool {
        self.state.read().mcast_joins.get(&addr).copied().unwrap_or(0) > 0
    }

    /// Registers a raw-packet observer for `protocol` (or the
    /// all-Ethertypes wildcard). Fails with
    /// [`NicError::NotSupported`] for protocols unknown to the stack.
    pub fn register_packet_observer(
        &self,
        protocol: NetworkProtocolNumber,
        observer: Arc<dyn PacketObserver>,
    ) -> Result<(), NicError> {
        let mut state = self.state.write();
        let list =
            state.packet_observers.get_mut(&protocol).ok_or(NicError::NotSupported)?;
        list.push(observer);
        Ok(())
    }

    /// Unregisters a previously registered packet observer.
    pub fn unregister_packet_observer(
        &self,
        protocol: NetworkProtocolNumber,
        observer: &Arc<dyn PacketObserver>,
    ) {
        let mut state = self.state.write();
        if let Some(list) = state.packet_observers.get_mut(&protocol) {
            if let Some(i) = list.iter().position(|other| Arc::ptr_eq(other, observer)) {
                let _ = list.remove(i);
            }
        }
    }

    /// Receives a packet from the link endpoint: fans it out to packet
    /// observers, attempts local delivery, and otherwise forwards it if
    /// the stack has forwarding enabled.
    pub fn deliver_network_packet(
        &self,
        link: &dyn LinkEndpoint,
        remote: Option<Mac>,
        local: Option<Mac>,
        protocol: NetworkProtocolNumber,
        pkt: PacketBuffer,
    ) {
        let Some(stack) = self.stack.upgrade() else {
            return;
        };

        let (net_proto, local, observers) = {
            let state = self.state.read();
            if !state.enabled {
                drop(state);
                self.stats.disabled_rx.count_packet(pkt.data.size() as u64);
                return;
            }

            self.stats.rx.count_packet(pkt.data.size() as u64);

            let Some(net_proto) = stack.network_protocol(protocol) else {
                drop(state);
                stack.stats().unknown_protocol_rcvd_packets.increment();
                return;
            };

            // A frame with no destination link address was sent
            // directly to this interface.
            let local = local.unwrap_or_else(|| self.link.link_address());

            let mut observers =
                state.packet_observers.get(&protocol).cloned().unwrap_or_default();
            if protocol != NetworkProtocolNumber::ETHERNET_ALL {
                if let Some(all) =
                    state.packet_observers.get(&NetworkProtocolNumber::ETHERNET_ALL)
                {
                    observers.extend(all.iter().cloned());
                }
            }
            (net_proto, local, observers)
        };

        // Observers run outside the lease, each with its own copy.
        for observer in &observers {
            observer.handle_packet(self.id, local, protocol, pkt.clone());
        }

        if protocol == NetworkProtocolNumber::IPV4 || protocol == NetworkProtocolNumber::IPV6 {
            stack.stats().ip.packets_received.increment();
        }

        if pkt.data.first().len() < net_proto.minimum_packet_size() {
            stack.stats().malformed_rcvd_packets.increment();
            return;
        }

        let (src, dst) = net_proto.parse_addresses(pkt.data.first());

        // A packet sourced from one of our own addresses should never
        // arrive from the wire. Loopback delivers through this path
        // too, so it is exempt.
        if stack.handle_local() && !self.is_loopback() && self.would_deliver_locally(src) {
            stack.stats().ip.invalid_source_addresses_received.increment();
            return;
        }

        if let Some(endpoint_ref) = self.get_ref(protocol, dst) {
            let mut route = Route::new(
                protocol,
                dst,
                src,
                link.link_address(),
                self.id,
                endpoint_ref,
                false,
                false,
            );
            route.set_remote_link_address(remote);
            route.endpoint_ref().endpoint().handle_packet(&route, pkt);
            return;
        }

        // This interface does not care about the packet; with
        // forwarding enabled, look for one that does.
        if stack.forwarding() {
            let mut route = match stack.find_route(None, None, dst, protocol, false) {
                Ok(route) => route,
                Err(_) => {
                    stack.stats().ip.invalid_destination_addresses_received.increment();
                    return;
                }
            };
            let Some(dest_nic) = route.nic() else {
                return;
            };

            let dest_ref = {
                let dest_state = dest_nic.state.read();
                let dest_state = &*dest_state;
                dest_state.endpoints.get(&dst).and_then(|entry| {
                    entry
                        .is_valid_for_outgoing_locked(dest_state)
                        .then(|| EndpointRef::try_new(entry))
                        .flatten()
                })
            };

            if let Some(dest_ref) = dest_ref {
                route.set_local_link_address(dest_nic.link_address());
                route.set_remote_link_address(remote);
                route.set_remote_address(src);
                dest_ref.endpoint().handle_packet(&route, pkt);
                drop(dest_ref);
            } else {
                // No endpoint on the destination interface; send the
                // packet out of it instead.
                match route.resolve(&stack) {
                    Ok(()) => dest_nic.write_forwarding_packet(&route, protocol, pkt),
                    Err(ResolutionError::WouldBlock(waiter)) => {
                        trace!("nic {}: queueing packet for {} pending resolution", self.id, dst);
                        stack.forwarder().enqueue(waiter, dest_nic, route, protocol, pkt);
                        // The forwarder releases the route.
                        return;
                    }
                    Err(ResolutionError::Failed) => {
                        stack.stats().ip.invalid_destination_addresses_received.increment();
                    }
                }
            }
            return;
        }

        // If a packet observer consumed the packet, it is not invalid.
        if observers.is_empty() {
            stack.stats().ip.invalid_destination_addresses_received.increment();
        }
    }

    /// Writes a forwarded packet out this interface's link endpoint.
    pub fn write_forwarding_packet(
        &self,
        route: &Route,
        protocol: NetworkProtocolNumber,
        mut pkt: PacketBuffer,
    ) {
        // TODO: decrement the TTL field in forwarded packets.
        pkt.header = Prependable::from_view(pkt.data.remove_first());

        match self.link.write_packet(route, None, protocol, &pkt) {
            Err(_) => {
                let Some(stack) = self.stack.upgrade() else {
                    return;
                };
                stack.stats().ip.outgoing_packet_errors.increment();
            }
            Ok(()) => {
                self.stats
                    .tx
                    .count_packet((pkt.header.used_length() + pkt.data.size()) as u64);
            }
        }
    }

    /// Delivers a parsed network-layer payload to the transport
    /// machinery.
    pub fn deliver_transport_packet(
        &self,
        route: &Route,
        protocol: TransportProtocolNumber,
        pkt: PacketBuffer,
    ) {
        let Some(stack) = self.stack.upgrade() else {
            return;
        };
        let Some(state) = stack.transport_protocol_state(protocol) else {
            stack.stats().unknown_protocol_rcvd_packets.increment();
            return;
        };

        // Raw sockets see every packet of their protocol, validly
        // formed or not.
        if let Some(demux) = stack.demux() {
            demux.deliver_raw_packet(route, protocol, pkt.clone());
        }

        if pkt.data.first().len() < state.proto.minimum_packet_size() {
            stack.stats().malformed_rcvd_packets.increment();
            return;
        }

        let (src_port, dst_port) = match state.proto.parse_ports(pkt.data.first()) {
            Ok(ports) => ports,
            Err(_) => {
                stack.stats().malformed_rcvd_packets.increment();
                return;
            }
        };

        let id = TransportEndpointId {
            local_port: dst_port,
            local_address: route.local_address(),
            remote_port: src_port,
            remote_address: route.remote_address(),
        };

        if let Some(demux) = stack.demux() {
            if demux.deliver_packet(route, protocol, &pkt, &id) {
                return;
            }
        }

        if let Some(handler) = state.default_handler() {
            if (*handler)(route, &id, &pkt) {
                return;
            }
        }

        // No destination for this packet; hand it to the protocol's
        // last-resort handler.
        if !state.proto.handle_unknown_destination_packet(route, &id, pkt) {
            stack.stats().malformed_rcvd_packets.increment();
        }
    }

    /// Delivers a transport control (error) packet to the demultiplexer.
    pub fn deliver_transport_control_packet(
        &self,
        local: IpAddr,
        remote: IpAddr,
        net: NetworkProtocolNumber,
        trans: TransportProtocolNumber,
        typ: ControlType,
        extra: u32,
        pkt: PacketBuffer,
    ) {
        let Some(stack) = self.stack.upgrade() else {
            return;
        };
        let Some(state) = stack.transport_protocol_state(trans) else {
            return;
        };

        // ICMPv4 only guarantees 8 bytes of the embedded transport
        // header; the ports of all known transports fit there.
        if pkt.data.first().len() < 8 {
            return;
        }

        let Ok((src_port, dst_port)) = state.proto.parse_ports(pkt.data.first()) else {
            return;
        };

        // The embedded packet was outgoing, so its ports are reversed
        // relative to normal receive.
        let id = TransportEndpointId {
            local_port: src_port,
            local_address: local,
            remote_port: dst_port,
            remote_address: remote,
        };

        if let Some(demux) = stack.demux() {
            let _: bool = demux.deliver_control_packet(net, trans, typ, extra, &pkt, &id);
        }
    }
}

impl NetworkDispatcher for Nic {
    fn deliver_network_packet(
        &self,
        link: &dyn LinkEndpoint,
        remote: Option<Mac>,
        local: Option<Mac>,
        protocol: NetworkProtocolNumber,
        pkt: PacketBuffer,
    ) {
        Nic::deliver_network_packet(self, link, remote, local, protocol, pkt);
    }
}
