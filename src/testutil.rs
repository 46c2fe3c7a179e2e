// Copyright 2024 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Testing-related utilities: fake implementations of the capability
//! interfaces an interface consumes.

use core::sync::atomic::{AtomicBool, Ordering};
use std::collections::HashMap;
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;

use net_types::ethernet::Mac;
use net_types::ip::{IpAddr, Ipv4Addr, Ipv6Addr, Subnet};
use net_types::UnicastAddr;

use crate::buffer::PacketBuffer;
use crate::device::ndp::NdpDispatcher;
use crate::error::NicError;
use crate::link::{
    GsoProperties, LinkEndpoint, LinkEndpointCapabilities, LinkWriteError, NetworkDispatcher,
};
use crate::protocol::{
    LinkAddressResolver, LinkResolutionResult, NetworkEndpoint, NetworkEndpointId,
    NetworkProtocol, PacketObserver, PortParseError, TransportDemultiplexer,
    TransportEndpointId, TransportProtocol,
};
use crate::route::Route;
use crate::stack::Stack;
use crate::sync::Mutex;
use crate::types::{
    AddressWithPrefix, ControlType, NetworkProtocolNumber, NicId, TransportProtocolNumber,
};

/// A link address for the device under test.
pub const LINK_ADDR1: Mac = Mac::new([0x02, 0x03, 0x04, 0x05, 0x06, 0x07]);
/// A link address for a peer.
pub const LINK_ADDR2: Mac = Mac::new([0x02, 0x03, 0x04, 0x05, 0x06, 0x08]);
/// A link address for a second peer.
pub const LINK_ADDR3: Mac = Mac::new([0x02, 0x03, 0x04, 0x05, 0x06, 0x09]);

/// A link endpoint that records written packets and delivers nothing on
/// its own.
pub struct FakeLinkEndpoint {
    capabilities: LinkEndpointCapabilities,
    mac: Mac,
    dispatcher: Mutex<Option<Arc<dyn NetworkDispatcher>>>,
    written: Mutex<Vec<(NetworkProtocolNumber, PacketBuffer)>>,
    fail_writes: AtomicBool,
}

impl FakeLinkEndpoint {
    /// Creates an endpoint advertising `capabilities` with address
    /// `mac`.
    pub fn new(capabilities: LinkEndpointCapabilities, mac: Mac) -> Arc<Self> {
        Arc::new(Self {
            capabilities,
            mac,
            dispatcher: Mutex::new(None),
            written: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
        })
    }

    /// Whether a dispatcher has been attached.
    pub fn is_attached(&self) -> bool {
        self.dispatcher.lock().is_some()
    }

    /// The packets written so far.
    pub fn written(&self) -> Vec<(NetworkProtocolNumber, PacketBuffer)> {
        self.written.lock().clone()
    }

    /// Makes all subsequent writes fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }
}

impl LinkEndpoint for FakeLinkEndpoint {
    fn capabilities(&self) -> LinkEndpointCapabilities {
        self.capabilities
    }

    fn link_address(&self) -> Mac {
        self.mac
    }

    fn attach(&self, dispatcher: Arc<dyn NetworkDispatcher>) {
        *self.dispatcher.lock() = Some(dispatcher);
    }

    fn write_packet(
        &self,
        _route: &Route,
        _gso: Option<&GsoProperties>,
        protocol: NetworkProtocolNumber,
        pkt: &PacketBuffer,
    ) -> Result<(), LinkWriteError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(LinkWriteError::Rejected);
        }
        self.written.lock().push((protocol, pkt.clone()));
        Ok(())
    }
}

/// A packet delivered to a [`FakeNetworkEndpoint`].
#[derive(Clone, Debug)]
pub struct DeliveredPacket {
    /// The route's local (destination) address.
    pub local: IpAddr,
    /// The route's remote (source) address.
    pub remote: IpAddr,
    /// The route's remote link address, if set.
    pub remote_link: Option<Mac>,
    /// The packet payload.
    pub payload: Vec<u8>,
}

/// A network protocol with a trivial wire format: the header is the
/// destination address followed by the source address.
pub struct FakeNetworkProtocol {
    number: NetworkProtocolNumber,
    address_len: usize,
    default_prefix_len: u8,
    delivered: Arc<Mutex<Vec<DeliveredPacket>>>,
    closed: Arc<Mutex<Vec<IpAddr>>>,
}

impl FakeNetworkProtocol {
    /// A fake protocol registered under the IPv4 number.
    pub fn v4() -> Arc<Self> {
        Arc::new(Self {
            number: NetworkProtocolNumber::IPV4,
            address_len: 4,
            default_prefix_len: 24,
            delivered: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// A fake protocol registered under the IPv6 number.
    pub fn v6() -> Arc<Self> {
        Arc::new(Self {
            number: NetworkProtocolNumber::IPV6,
            address_len: 16,
            default_prefix_len: 64,
            delivered: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// The packets delivered to endpoints of this protocol.
    pub fn delivered(&self) -> Vec<DeliveredPacket> {
        self.delivered.lock().clone()
    }

    /// The addresses whose endpoints have been closed.
    pub fn closed(&self) -> Vec<IpAddr> {
        self.closed.lock().clone()
    }
}

impl NetworkProtocol for FakeNetworkProtocol {
    fn number(&self) -> NetworkProtocolNumber {
        self.number
    }

    fn minimum_packet_size(&self) -> usize {
        2 * self.address_len
    }

    fn parse_addresses(&self, packet: &[u8]) -> (IpAddr, IpAddr) {
        let dst = &packet[..self.address_len];
        let src = &packet[self.address_len..2 * self.address_len];
        let parse = |bytes: &[u8]| match self.address_len {
            4 => IpAddr::V4(Ipv4Addr::new(bytes.try_into().unwrap())),
            16 => IpAddr::V6(Ipv6Addr::from_bytes(bytes.try_into().unwrap())),
            len => panic!("unsupported address length {}", len),
        };
        (parse(src), parse(dst))
    }

    fn default_prefix_len(&self) -> u8 {
        self.default_prefix_len
    }

    fn new_endpoint(
        &self,
        _nic_id: NicId,
        addr: AddressWithPrefix,
        _stack: &Arc<Stack>,
        _link: &Arc<dyn LinkEndpoint>,
    ) -> Result<Box<dyn NetworkEndpoint>, NicError> {
        Ok(Box::new(FakeNetworkEndpoint {
            id: NetworkEndpointId { local_address: addr.addr },
            prefix_len: addr.prefix_len,
            delivered: Arc::clone(&self.delivered),
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct FakeNetworkEndpoint {
    id: NetworkEndpointId,
    prefix_len: u8,
    delivered: Arc<Mutex<Vec<DeliveredPacket>>>,
    closed: Arc<Mutex<Vec<IpAddr>>>,
}

impl NetworkEndpoint for FakeNetworkEndpoint {
    fn id(&self) -> &NetworkEndpointId {
        &self.id
    }

    fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    fn handle_packet(&self, route: &Route, pkt: PacketBuffer) {
        self.delivered.lock().push(DeliveredPacket {
            local: route.local_address(),
            remote: route.remote_address(),
            remote_link: route.remote_link_address(),
            payload: pkt.data.to_vec(),
        });
    }

    fn close(&self) {
        self.closed.lock().push(self.id.local_address);
    }
}

/// Builds a packet in the [`FakeNetworkProtocol`] IPv4 wire format.
pub fn fake_packet_v4(dst: Ipv4Addr, src: Ipv4Addr, payload: &[u8]) -> PacketBuffer {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&dst.ipv4_bytes());
    bytes.extend_from_slice(&src.ipv4_bytes());
    bytes.extend_from_slice(payload);
    PacketBuffer::from_view(bytes)
}

/// Builds a packet in the [`FakeNetworkProtocol`] IPv6 wire format.
pub fn fake_packet_v6(dst: Ipv6Addr, src: Ipv6Addr, payload: &[u8]) -> PacketBuffer {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&dst.ipv6_bytes());
    bytes.extend_from_slice(&src.ipv6_bytes());
    bytes.extend_from_slice(payload);
    PacketBuffer::from_view(bytes)
}

/// A transport protocol whose header is just the big-endian source and
/// destination ports.
pub struct FakeTransportProtocol {
    number: TransportProtocolNumber,
    handle_unknown: AtomicBool,
    unknown_calls: Mutex<Vec<TransportEndpointId>>,
}

impl FakeTransportProtocol {
    /// Creates a transport protocol with the given number.
    pub fn new(number: TransportProtocolNumber) -> Arc<Self> {
        Arc::new(Self {
            number,
            handle_unknown: AtomicBool::new(true),
            unknown_calls: Mutex::new(Vec::new()),
        })
    }

    /// Configures the return value of the unknown-destination handler.
    pub fn set_handle_unknown(&self, handle: bool) {
        self.handle_unknown.store(handle, Ordering::Relaxed);
    }

    /// The endpoint ids the unknown-destination handler was invoked
    /// with.
    pub fn unknown_calls(&self) -> Vec<TransportEndpointId> {
        self.unknown_calls.lock().clone()
    }
}

impl TransportProtocol for FakeTransportProtocol {
    fn number(&self) -> TransportProtocolNumber {
        self.number
    }

    fn minimum_packet_size(&self) -> usize {
        4
    }

    fn parse_ports(&self, packet: &[u8]) -> Result<(u16, u16), PortParseError> {
        if packet.len() < 4 {
            return Err(PortParseError);
        }
        let src = u16::from_be_bytes([packet[0], packet[1]]);
        let dst = u16::from_be_bytes([packet[2], packet[3]]);
        Ok((src, dst))
    }

    fn handle_unknown_destination_packet(
        &self,
        _route: &Route,
        id: &TransportEndpointId,
        _pkt: PacketBuffer,
    ) -> bool {
        self.unknown_calls.lock().push(*id);
        self.handle_unknown.load(Ordering::Relaxed)
    }
}

/// A demultiplexer that records deliveries.
#[derive(Default)]
pub struct FakeDemux {
    claim: AtomicBool,
    raw: Mutex<Vec<(TransportProtocolNumber, Vec<u8>)>>,
    packets: Mutex<Vec<TransportEndpointId>>,
    control: Mutex<Vec<(TransportEndpointId, ControlType)>>,
}

impl FakeDemux {
    /// Creates a demux; `claim` controls whether it claims delivered
    /// packets.
    pub fn new(claim: bool) -> Arc<Self> {
        Arc::new(Self { claim: AtomicBool::new(claim), ..Self::default() })
    }

    /// Raw-packet deliveries seen so far.
    pub fn raw(&self) -> Vec<(TransportProtocolNumber, Vec<u8>)> {
        self.raw.lock().clone()
    }

    /// Ordinary deliveries seen so far.
    pub fn packets(&self) -> Vec<TransportEndpointId> {
        self.packets.lock().clone()
    }

    /// Control-packet deliveries seen so far.
    pub fn control(&self) -> Vec<(TransportEndpointId, ControlType)> {
        self.control.lock().clone()
    }
}

impl TransportDemultiplexer for FakeDemux {
    fn deliver_packet(
        &self,
        _route: &Route,
        _protocol: TransportProtocolNumber,
        _pkt: &PacketBuffer,
        id: &TransportEndpointId,
    ) -> bool {
        self.packets.lock().push(*id);
        self.claim.load(Ordering::Relaxed)
    }

    fn deliver_raw_packet(
        &self,
        _route: &Route,
        protocol: TransportProtocolNumber,
        pkt: PacketBuffer,
    ) {
        self.raw.lock().push((protocol, pkt.data.to_vec()));
    }

    fn deliver_control_packet(
        &self,
        _net: NetworkProtocolNumber,
        _trans: TransportProtocolNumber,
        typ: ControlType,
        _extra: u32,
        _pkt: &PacketBuffer,
        id: &TransportEndpointId,
    ) -> bool {
        self.control.lock().push((*id, typ));
        true
    }
}

/// A packet seen by a [`FakeObserver`].
#[derive(Clone, Debug)]
pub struct ObservedPacket {
    /// The observing interface.
    pub nic: NicId,
    /// The local link address the packet arrived on.
    pub local: Mac,
    /// The packet's network protocol.
    pub protocol: NetworkProtocolNumber,
    /// The packet payload.
    pub payload: Vec<u8>,
}

/// A packet observer recording everything it sees.
#[derive(Default)]
pub struct FakeObserver {
    seen: Mutex<Vec<ObservedPacket>>,
}

impl FakeObserver {
    /// Creates an observer.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The packets observed so far.
    pub fn seen(&self) -> Vec<ObservedPacket> {
        self.seen.lock().clone()
    }
}

impl PacketObserver for FakeObserver {
    fn handle_packet(
        &self,
        nic: NicId,
        local: Mac,
        protocol: NetworkProtocolNumber,
        pkt: PacketBuffer,
    ) {
        self.seen.lock().push(ObservedPacket {
            nic,
            local,
            protocol,
            payload: pkt.data.to_vec(),
        });
    }
}

/// What a [`FakeResolver`] should answer for an address.
#[derive(Copy, Clone, Debug)]
pub enum FakeResolution {
    /// Answer immediately with the given link address.
    Resolved(Mac),
    /// Hand back a waiter that fires on [`FakeResolver::fire_pending`].
    Pending,
    /// Fail the resolution.
    Failed,
}

/// A link-address resolver scripted per address. Unknown addresses
/// fail.
pub struct FakeResolver {
    protocol: NetworkProtocolNumber,
    entries: Mutex<HashMap<IpAddr, FakeResolution>>,
    pending: Mutex<Vec<Sender<()>>>,
}

impl FakeResolver {
    /// Creates a resolver for `protocol`.
    pub fn new(protocol: NetworkProtocolNumber) -> Arc<Self> {
        Arc::new(Self {
            protocol,
            entries: Mutex::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
        })
    }

    /// Scripts the answer for `addr`.
    pub fn set(&self, addr: IpAddr, resolution: FakeResolution) {
        let _ = self.entries.lock().insert(addr, resolution);
    }

    /// Fires every outstanding pending waiter.
    pub fn fire_pending(&self) {
        for sender in self.pending.lock().drain(..) {
            let _ = sender.send(());
        }
    }
}

impl LinkAddressResolver for FakeResolver {
    fn link_address_protocol(&self) -> NetworkProtocolNumber {
        self.protocol
    }

    fn resolve(&self, _nic: NicId, addr: IpAddr, _local_addr: IpAddr) -> LinkResolutionResult {
        match self.entries.lock().get(&addr) {
            Some(FakeResolution::Resolved(mac)) => LinkResolutionResult::Resolved(*mac),
            Some(FakeResolution::Pending) => {
                let (sender, receiver) = channel();
                self.pending.lock().push(sender);
                LinkResolutionResult::Pending(receiver)
            }
            Some(FakeResolution::Failed) | None => LinkResolutionResult::Failed,
        }
    }
}

/// An NDP event recorded by [`FakeNdpDispatcher`].
#[derive(Clone, Debug, PartialEq)]
pub enum NdpEvent {
    /// DAD resolved or failed for an address.
    DadStatus {
        /// The address DAD ran for.
        addr: UnicastAddr<Ipv6Addr>,
        /// Whether the address resolved as unique.
        resolved: bool,
    },
    /// A default router was discovered.
    RouterDiscovered(Ipv6Addr),
    /// A default router was invalidated.
    RouterInvalidated(Ipv6Addr),
    /// An on-link prefix was discovered.
    PrefixDiscovered(Subnet<Ipv6Addr>),
    /// An on-link prefix was invalidated.
    PrefixInvalidated(Subnet<Ipv6Addr>),
    /// An address was generated by SLAAC.
    AutoGenAddress(AddressWithPrefix),
    /// A SLAAC address was invalidated.
    AutoGenAddressInvalidated(AddressWithPrefix),
}

/// An NDP dispatcher recording every event.
#[derive(Default)]
pub struct FakeNdpDispatcher {
    events: Mutex<Vec<NdpEvent>>,
}

impl FakeNdpDispatcher {
    /// Creates a dispatcher.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The events recorded so far.
    pub fn events(&self) -> Vec<NdpEvent> {
        self.events.lock().clone()
    }
}

impl NdpDispatcher for FakeNdpDispatcher {
    fn on_duplicate_address_detection_status(
        &self,
        _nic: NicId,
        addr: UnicastAddr<Ipv6Addr>,
        resolved: bool,
    ) {
        self.events.lock().push(NdpEvent::DadStatus { addr, resolved });
    }

    fn on_default_router_discovered(&self, _nic: NicId, addr: Ipv6Addr) {
        self.events.lock().push(NdpEvent::RouterDiscovered(addr));
    }

    fn on_default_router_invalidated(&self, _nic: NicId, addr: Ipv6Addr) {
        self.events.lock().push(NdpEvent::RouterInvalidated(addr));
    }

    fn on_on_link_prefix_discovered(&self, _nic: NicId, prefix: Subnet<Ipv6Addr>) {
        self.events.lock().push(NdpEvent::PrefixDiscovered(prefix));
    }

    fn on_on_link_prefix_invalidated(&self, _nic: NicId, prefix: Subnet<Ipv6Addr>) {
        self.events.lock().push(NdpEvent::PrefixInvalidated(prefix));
    }

    fn on_auto_gen_address(&self, _nic: NicId, addr: AddressWithPrefix) {
        self.events.lock().push(NdpEvent::AutoGenAddress(addr));
    }

    fn on_auto_gen_address_invalidated(&self, _nic: NicId, addr: AddressWithPrefix) {
        self.events.lock().push(NdpEvent::AutoGenAddressInvalidated(addr));
    }
}
