// Copyright 2024 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The owning stack an interface registers with.
//!
//! The stack holds the protocol registries, the global forwarding flag,
//! the route table behind [`Stack::find_route`], stack-wide statistics,
//! and the forwarder queue that carries packets whose link-address
//! resolution is still in flight.

use core::sync::atomic::{AtomicBool, Ordering};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use net_types::ip::{IpAddr, SubnetEither};

use crate::buffer::PacketBuffer;
use crate::counters::StackCounters;
use crate::device::addresses::PrimaryEndpointBehavior;
use crate::device::ndp::{NdpConfigurations, NdpDispatcher};
use crate::device::Nic;
use crate::error::NicError;
use crate::link::LinkEndpoint;
use crate::protocol::{
    LinkAddressResolver, NetworkProtocol, ResolutionWaiter, TransportDemultiplexer,
    TransportEndpointId, TransportProtocol,
};
use crate::route::Route;
use crate::types::{NetworkProtocolNumber, NicId, TransportProtocolNumber};

/// A per-stack fallback handler for transport packets no endpoint
/// claimed. Returns whether it consumed the packet.
pub type TransportDefaultHandler =
    Arc<dyn Fn(&Route, &TransportEndpointId, &PacketBuffer) -> bool + Send + Sync>;

pub(crate) struct TransportProtocolState {
    pub(crate) proto: Arc<dyn TransportProtocol>,
    default_handler: crate::sync::Mutex<Option<TransportDefaultHandler>>,
}

impl TransportProtocolState {
    pub(crate) fn default_handler(&self) -> Option<TransportDefaultHandler> {
        self.default_handler.lock().clone()
    }
}

/// One entry of the route table.
#[derive(Clone, Debug)]
pub struct RouteEntry {
    /// The destinations the entry covers.
    pub destination: SubnetEither,
    /// The gateway to send through, if the destination is not on-link.
    pub gateway: Option<IpAddr>,
    /// The interface the entry routes through.
    pub nic: NicId,
}

fn subnet_contains(subnet: &SubnetEither, addr: IpAddr) -> bool {
    match (subnet, addr) {
        (SubnetEither::V4(subnet), IpAddr::V4(addr)) => subnet.contains(&addr),
        (SubnetEither::V6(subnet), IpAddr::V6(addr)) => subnet.contains(&addr),
        _ => false,
    }
}

/// A packet parked in the forwarder until link-address resolution
/// settles.
pub struct PendingPacket {
    /// Fires when the pending resolution settles; the worker should
    /// then retry [`Route::resolve`] and write or drop the packet.
    pub waiter: ResolutionWaiter,
    /// The interface to write the packet out of.
    pub nic: Arc<Nic>,
    /// The route the packet was being forwarded on. Dropping it
    /// releases the underlying endpoint reference.
    pub route: Route,
    /// The packet's network protocol.
    pub protocol: NetworkProtocolNumber,
    /// The packet itself.
    pub pkt: PacketBuffer,
}

/// The queue of packets waiting on link-address resolution. An external
/// worker drains it; the interface layer only enqueues.
#[derive(Default)]
pub struct Forwarder {
    pending: crate::sync::Mutex<VecDeque<PendingPacket>>,
}

impl Forwarder {
    pub(crate) fn enqueue(
        &self,
        waiter: ResolutionWaiter,
        nic: Arc<Nic>,
        route: Route,
        protocol: NetworkProtocolNumber,
        pkt: PacketBuffer,
    ) {
        self.pending.lock().push_back(PendingPacket { waiter, nic, route, protocol, pkt });
    }

    /// Removes and returns all queued packets.
    pub fn take_pending(&self) -> Vec<PendingPacket> {
        self.pending.lock().drain(..).collect()
    }

    /// The number of packets currently queued.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Construction parameters for a [`Stack`].
#[derive(Default)]
pub struct StackOptions {
    /// The network protocols the stack speaks.
    pub network_protocols: Vec<Arc<dyn NetworkProtocol>>,
    /// The transport protocols the stack speaks.
    pub transport_protocols: Vec<Arc<dyn TransportProtocol>>,
    /// Link-address resolvers, keyed by their network protocol.
    pub link_address_resolvers: Vec<Arc<dyn LinkAddressResolver>>,
    /// The transport demultiplexer packets are handed to.
    pub demux: Option<Arc<dyn TransportDemultiplexer>>,
    /// Receiver of NDP events.
    pub ndp_dispatcher: Option<Arc<dyn NdpDispatcher>>,
    /// NDP configuration applied to new interfaces.
    pub ndp_configs: NdpConfigurations,
    /// Whether packets sourced from a local address are rejected when
    /// they arrive from the wire.
    pub handle_local: bool,
    /// Whether enabling a non-loopback interface auto-generates an IPv6
    /// link-local address.
    pub auto_gen_ipv6_link_local: bool,
}

/// The protocol stack owning a set of interfaces.
pub struct Stack {
    network_protocols: HashMap<NetworkProtocolNumber, Arc<dyn NetworkProtocol>>,
    transport_protocols: HashMap<TransportProtocolNumber, TransportProtocolState>,
    link_addr_resolvers: HashMap<NetworkProtocolNumber, Arc<dyn LinkAddressResolver>>,
    demux: Option<Arc<dyn TransportDemultiplexer>>,
    ndp_dispatcher: Option<Arc<dyn NdpDispatcher>>,
    ndp_configs: NdpConfigurations,
    handle_local: bool,
    auto_gen_ipv6_link_local: bool,
    forwarding: AtomicBool,
    nics: crate::sync::RwLock<HashMap<NicId, Arc<Nic>>>,
    route_table: crate::sync::RwLock<Vec<RouteEntry>>,
    forwarder: Forwarder,
    stats: StackCounters,
}

impl Stack {
    /// Creates a stack from `options`.
    pub fn new(options: StackOptions) -> Arc<Self> {
        let StackOptions {
            network_protocols,
            transport_protocols,
            link_address_resolvers,
            demux,
            ndp_dispatcher,
            mut ndp_configs,
            handle_local,
            auto_gen_ipv6_link_local,
        } = options;
        ndp_configs.validate();

        Arc::new(Self {
            network_protocols: network_protocols
                .into_iter()
                .map(|proto| (proto.number(), proto))
                .collect(),
            transport_protocols: transport_protocols
                .into_iter()
                .map(|proto| {
                    (
                        proto.number(),
                        TransportProtocolState {
                            proto,
                            default_handler: crate::sync::Mutex::new(None),
                        },
                    )
                })
                .collect(),
            link_addr_resolvers: link_address_resolvers
                .into_iter()
                .map(|resolver| (resolver.link_address_protocol(), resolver))
                .collect(),
            demux,
            ndp_dispatcher,
            ndp_configs,
            handle_local,
            auto_gen_ipv6_link_local,
            forwarding: AtomicBool::new(false),
            nics: crate::sync::RwLock::new(HashMap::new()),
            route_table: crate::sync::RwLock::new(Vec::new()),
            forwarder: Forwarder::default(),
            stats: StackCounters::default(),
        })
    }

    /// Creates an interface with the given id and name, attached to
    /// `link`. The interface starts disabled.
    pub fn create_nic(
        self: &Arc<Self>,
        id: NicId,
        name: &str,
        link: Arc<dyn LinkEndpoint>,
    ) -> Result<Arc<Nic>, NicError> {
        self.create_nic_with_context(id, name, link, None)
    }

    /// Like [`Stack::create_nic`], with an opaque context token the
    /// interface hands back through [`Nic::context`].
    pub fn create_nic_with_context(
        self: &Arc<Self>,
        id: NicId,
        name: &str,
        link: Arc<dyn LinkEndpoint>,
        context: Option<Box<dyn core::any::Any + Send + Sync>>,
    ) -> Result<Arc<Nic>, NicError> {
        let mut nics = self.nics.write();
        if nics.contains_key(&id) {
            return Err(NicError::DuplicateNicId);
        }

        let mut observer_protocols: Vec<NetworkProtocolNumber> =
            self.network_protocols.keys().copied().collect();
        observer_protocols.push(NetworkProtocolNumber::ETHERNET_ALL);

        let nic = Nic::new(
            Arc::downgrade(self),
            id,
            name.to_string(),
            link,
            self.ndp_configs,
            observer_protocols,
            context,
        );
        let _ = nics.insert(id, Arc::clone(&nic));
        Ok(nic)
    }

    /// The interface with the given id, if any.
    pub fn nic(&self, id: NicId) -> Option<Arc<Nic>> {
        self.nics.read().get(&id).cloned()
    }

    pub(crate) fn network_protocol(
        &self,
        protocol: NetworkProtocolNumber,
    ) -> Option<Arc<dyn NetworkProtocol>> {
        self.network_protocols.get(&protocol).cloned()
    }

    pub(crate) fn transport_protocol_state(
        &self,
        protocol: TransportProtocolNumber,
    ) -> Option<&TransportProtocolState> {
        self.transport_protocols.get(&protocol)
    }

    /// Installs (or clears) the per-stack fallback handler for a
    /// transport protocol.
    pub fn set_transport_protocol_handler(
        &self,
        protocol: TransportProtocolNumber,
        handler: Option<TransportDefaultHandler>,
    ) {
        if let Some(state) = self.transport_protocols.get(&protocol) {
            *state.default_handler.lock() = handler;
        }
    }

    pub(crate) fn link_address_resolver(
        &self,
        protocol: NetworkProtocolNumber,
    ) -> Option<Arc<dyn LinkAddressResolver>> {
        self.link_addr_resolvers.get(&protocol).cloned()
    }

    pub(crate) fn demux(&self) -> Option<&Arc<dyn TransportDemultiplexer>> {
        self.demux.as_ref()
    }

    pub(crate) fn ndp_dispatcher(&self) -> Option<Arc<dyn NdpDispatcher>> {
        self.ndp_dispatcher.clone()
    }

    pub(crate) fn handle_local(&self) -> bool {
        self.handle_local
    }

    pub(crate) fn auto_gen_ipv6_link_local(&self) -> bool {
        self.auto_gen_ipv6_link_local
    }

    /// Whether the stack forwards packets between interfaces (i.e.
    /// operates as a router).
    pub fn forwarding(&self) -> bool {
        self.forwarding.load(Ordering::Acquire)
    }

    /// Enables or disables forwarding. Interfaces transition between
    /// IPv6 router and host behavior accordingly.
    pub fn set_forwarding(&self, enable: bool) {
        if self.forwarding.swap(enable, Ordering::AcqRel) == enable {
            return;
        }
        let nics: Vec<Arc<Nic>> = self.nics.read().values().cloned().collect();
        for nic in nics {
            if enable {
                nic.become_ipv6_router();
            } else {
                nic.become_ipv6_host();
            }
        }
    }

    /// Stack-wide statistics.
    pub fn stats(&self) -> &StackCounters {
        &self.stats
    }

    /// The forwarder queue.
    pub fn forwarder(&self) -> &Forwarder {
        &self.forwarder
    }

    /// Replaces the route table.
    pub fn set_route_table(&self, table: Vec<RouteEntry>) {
        *self.route_table.write() = table;
    }

    /// Finds a route to `remote_addr`.
    ///
    /// With `local_addr` unset, the chosen interface's primary endpoint
    /// (with source address selection for IPv6) supplies the source.
    pub fn find_route(
        &self,
        nic_id: Option<NicId>,
        local_addr: Option<IpAddr>,
        remote_addr: IpAddr,
        protocol: NetworkProtocolNumber,
        multicast_loop: bool,
    ) -> Result<Route, NicError> {
        let table = self.route_table.read();
        for entry in table.iter() {
            if nic_id.is_some_and(|id| id != entry.nic) {
                continue;
            }
            if !subnet_contains(&entry.destination, remote_addr) {
                continue;
            }
            let Some(nic) = self.nic(entry.nic) else {
                continue;
            };
            let endpoint_ref = match local_addr {
                None => nic.primary_endpoint(protocol, Some(remote_addr)),
                Some(local_addr) => nic.find_endpoint(
                    protocol,
                    local_addr,
                    PrimaryEndpointBehavior::CanBePrimaryEndpoint,
                ),
            };
            let Some(endpoint_ref) = endpoint_ref else {
                continue;
            };

            let local_addr = endpoint_ref.addr();
            let mut route = Route::new(
                protocol,
                local_addr,
                remote_addr,
                nic.link_address(),
                nic.id(),
                endpoint_ref,
                self.handle_local && !nic.is_loopback(),
                multicast_loop,
            );
            route.set_next_hop(entry.gateway);
            return Ok(route);
        }
        Err(NicError::NoRoute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use net_types::ethernet::Mac;
    use net_types::ip::{Ipv4, Ipv4Addr, Subnet};
    use net_types::Witness as _;

    use crate::device::addresses::PrimaryEndpointBehavior;
    use crate::link::LinkEndpointCapabilities;
    use crate::protocol::NetworkProtocol;
    use crate::route::ResolutionError;
    use crate::testutil::{
        FakeLinkEndpoint, FakeNetworkProtocol, FakeResolution, FakeResolver, LINK_ADDR1,
        LINK_ADDR2,
    };
    use crate::types::{AddressWithPrefix, ProtocolAddress};

    const NIC_ADDR: Ipv4Addr = Ipv4Addr::new([10, 0, 0, 1]);
    const REMOTE: Ipv4Addr = Ipv4Addr::new([10, 0, 0, 99]);
    const GATEWAY: Ipv4Addr = Ipv4Addr::new([10, 0, 0, 254]);

    struct RouteTest {
        stack: Arc<Stack>,
        resolver: Arc<FakeResolver>,
    }

    fn route_setup() -> RouteTest {
        let v4 = FakeNetworkProtocol::v4();
        let resolver = FakeResolver::new(NetworkProtocolNumber::IPV4);
        let stack = Stack::new(StackOptions {
            network_protocols: vec![v4 as Arc<dyn NetworkProtocol>],
            link_address_resolvers: vec![Arc::clone(&resolver) as _],
            ..Default::default()
        });
        let link =
            FakeLinkEndpoint::new(LinkEndpointCapabilities::RESOLUTION_REQUIRED, LINK_ADDR1);
        let nic = stack.create_nic(NicId(1), "eth0", link as _).unwrap();
        nic.add_address(
            ProtocolAddress {
                protocol: NetworkProtocolNumber::IPV4,
                address_with_prefix: AddressWithPrefix { addr: IpAddr::V4(NIC_ADDR), prefix_len: 24 },
            },
            PrimaryEndpointBehavior::CanBePrimaryEndpoint,
        )
        .unwrap();
        stack.set_route_table(vec![RouteEntry {
            destination: SubnetEither::V4(Subnet::new(Ipv4Addr::new([10, 0, 0, 0]), 24).unwrap()),
            gateway: None,
            nic: NicId(1),
        }]);
        RouteTest { stack, resolver }
    }

    #[test]
    fn find_route_picks_primary_source() {
        let test = route_setup();
        let route = test
            .stack
            .find_route(None, None, IpAddr::V4(REMOTE), NetworkProtocolNumber::IPV4, false)
            .unwrap();
        assert_eq!(route.local_address(), IpAddr::V4(NIC_ADDR));
        assert_eq!(route.remote_address(), IpAddr::V4(REMOTE));
        assert_eq!(route.local_link_address(), LINK_ADDR1);
        assert_eq!(route.nic_id(), NicId(1));
    }

    #[test]
    fn find_route_honors_nic_filter_and_misses() {
        let test = route_setup();
        assert_matches!(
            test.stack.find_route(
                Some(NicId(7)),
                None,
                IpAddr::V4(REMOTE),
                NetworkProtocolNumber::IPV4,
                false
            ),
            Err(NicError::NoRoute)
        );
        assert_matches!(
            test.stack.find_route(
                None,
                None,
                IpAddr::V4(Ipv4Addr::new([192, 168, 9, 9])),
                NetworkProtocolNumber::IPV4,
                false
            ),
            Err(NicError::NoRoute)
        );
    }

    #[test]
    fn resolve_consults_resolver_for_unicast() {
        let test = route_setup();
        test.resolver.set(IpAddr::V4(REMOTE), FakeResolution::Resolved(LINK_ADDR2));
        let mut route = test
            .stack
            .find_route(None, None, IpAddr::V4(REMOTE), NetworkProtocolNumber::IPV4, false)
            .unwrap();
        assert!(route.is_resolution_required());
        route.resolve(&test.stack).unwrap();
        assert_eq!(route.remote_link_address(), Some(LINK_ADDR2));
        assert!(!route.is_resolution_required());
    }

    #[test]
    fn resolve_goes_through_the_gateway() {
        let test = route_setup();
        test.stack.set_route_table(vec![RouteEntry {
            destination: SubnetEither::V4(Subnet::new(Ipv4Addr::new([0, 0, 0, 0]), 0).unwrap()),
            gateway: Some(IpAddr::V4(GATEWAY)),
            nic: NicId(1),
        }]);
        test.resolver.set(IpAddr::V4(GATEWAY), FakeResolution::Resolved(LINK_ADDR2));

        let mut route = test
            .stack
            .find_route(
                None,
                None,
                IpAddr::V4(Ipv4Addr::new([8, 8, 8, 8])),
                NetworkProtocolNumber::IPV4,
                false,
            )
            .unwrap();
        assert_eq!(route.next_hop(), Some(IpAddr::V4(GATEWAY)));
        route.resolve(&test.stack).unwrap();
        assert_eq!(route.remote_link_address(), Some(LINK_ADDR2));
    }

    #[test]
    fn resolve_maps_multicast_and_broadcast_without_resolver() {
        let test = route_setup();
        test.stack.set_route_table(vec![RouteEntry {
            destination: SubnetEither::V4(Subnet::new(Ipv4Addr::new([0, 0, 0, 0]), 0).unwrap()),
            gateway: None,
            nic: NicId(1),
        }]);

        let group = Ipv4Addr::new([224, 0, 0, 1]);
        let mut route = test
            .stack
            .find_route(None, None, IpAddr::V4(group), NetworkProtocolNumber::IPV4, false)
            .unwrap();
        route.resolve(&test.stack).unwrap();
        assert_eq!(
            route.remote_link_address(),
            Some(Mac::new([0x01, 0x00, 0x5e, 0x00, 0x00, 0x01]))
        );

        let mut route = test
            .stack
            .find_route(
                None,
                None,
                IpAddr::V4(Ipv4::LIMITED_BROADCAST_ADDRESS.get()),
                NetworkProtocolNumber::IPV4,
                false,
            )
            .unwrap();
        route.resolve(&test.stack).unwrap();
        assert_eq!(route.remote_link_address(), Some(Mac::BROADCAST));
    }

    #[test]
    fn resolve_fails_without_an_answer() {
        let test = route_setup();
        let mut route = test
            .stack
            .find_route(None, None, IpAddr::V4(REMOTE), NetworkProtocolNumber::IPV4, false)
            .unwrap();
        assert_matches!(route.resolve(&test.stack), Err(ResolutionError::Failed));
    }
}
