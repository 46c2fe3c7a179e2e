// Copyright 2024 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The interface address table.
//!
//! Every (protocol, local-address) binding on an interface is stored as
//! a reference-counted cell. The cell's kind drives a small state
//! machine:
//!
//! ```text
//! permanentTentative -> permanent          (DAD success)
//! permanentTentative -> (deleted)          (DAD failure)
//! permanent          -> permanentExpired   (address removed)
//! temporary          -> permanent          (in-place promotion on add)
//! permanentExpired   -> permanent          (re-add before last decref)
//! ```
//!
//! Permanent (and tentative) cells carry a +1 bias in their reference
//! count so that they survive with no routes referencing them; the bias
//! is dropped exactly once, when the address is removed. Expired and
//! temporary cells die on their last decrement.

use core::fmt::{self, Debug, Formatter};
use core::ops::Deref;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use net_types::ip::{IpAddr, Ipv4Addr, Ipv6, Ipv6Addr, Subnet, SubnetEither};
use net_types::{MulticastAddress, UnicastAddr, Witness as _};
use tracing::trace;

use crate::device::{Nic, NicState};
use crate::error::NicError;
use crate::link::LinkEndpointCapabilities;
use crate::protocol::NetworkEndpoint;
use crate::types::{AddressWithPrefix, NetworkProtocolNumber, ProtocolAddress};

/// How an address participates in primary-endpoint selection.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PrimaryEndpointBehavior {
    /// The address can be chosen as a source when the caller did not
    /// bind one. This is the default for added addresses.
    CanBePrimaryEndpoint,
    /// The address should be considered before all other primary
    /// addresses. With several such addresses, the most recently added
    /// comes first.
    FirstPrimaryEndpoint,
    /// The address is never used as an unspecified-source fallback.
    NeverPrimaryEndpoint,
}

/// The lifecycle kind of an address cell. Stored as an atomic so the
/// receive path can observe it without the interface lease.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum AddressKind {
    /// A permanent address that has not yet completed Duplicate Address
    /// Detection. Packets to it are dropped and it is not used as a
    /// source address.
    PermanentTentative = 0,
    /// An address explicitly added to the interface. Biased +1 in its
    /// reference count; removed only by an explicit remove.
    Permanent = 1,
    /// A permanent address that has been removed and is waiting for its
    /// last route reference to depart. Re-adding the address before
    /// then revives the same cell as permanent.
    PermanentExpired = 2,
    /// An address synthesized for spoofing or promiscuous delivery. Not
    /// biased; dies with its last route reference.
    Temporary = 3,
}

impl AddressKind {
    fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::PermanentTentative,
            1 => Self::Permanent,
            2 => Self::PermanentExpired,
            3 => Self::Temporary,
            kind => panic!("invalid address kind {}", kind),
        }
    }
}

/// How an address came to be on the interface.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum AddressConfigType {
    /// Added by an explicit action: an added address, a multicast join,
    /// or temporary synthesis.
    Static = 0,
    /// Generated by stateless address autoconfiguration.
    Slaac = 1,
}

impl AddressConfigType {
    fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::Static,
            1 => Self::Slaac,
            config => panic!("invalid address config type {}", config),
        }
    }
}

/// Which interface flag gates temporary-endpoint synthesis in
/// [`Nic::get_ref_or_create_temp`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum GetRefBehavior {
    /// Observe the interface's spoofing flag.
    Spoofing,
    /// Observe the interface's promiscuous flag.
    Promiscuous,
    /// Behave as if spoofing were enabled regardless of the flag.
    ForceSpoofing,
}

/// One (protocol, local-address) binding on an interface.
pub struct AddressEndpoint {
    /// Non-owning back-handle; the cell cannot outlive the interface
    /// except transiently during teardown, in which case the final
    /// decrement simply drops the cell.
    nic: Weak<Nic>,
    protocol: NetworkProtocolNumber,
    endpoint: Box<dyn NetworkEndpoint>,
    kind: AtomicU32,
    config_type: AtomicU32,
    deprecated: AtomicBool,
    /// Reference count. Zero means the cell is dead; `try_inc_ref` is
    /// the only safe way to obtain a reference to a cell not already
    /// held.
    refs: AtomicU32,
    /// Whether link-address resolution applies to routes through this
    /// endpoint.
    link_resolution: bool,
}

impl Debug for AddressEndpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressEndpoint")
            .field("addr", &self.addr())
            .field("protocol", &self.protocol)
            .field("kind", &self.get_kind())
            .field("refs", &self.ref_count())
            .finish()
    }
}

impl AddressEndpoint {
    /// The bound local address.
    pub fn addr(&self) -> IpAddr {
        self.endpoint.id().local_address
    }

    /// The network protocol of the binding.
    pub fn protocol(&self) -> NetworkProtocolNumber {
        self.protocol
    }

    /// The protocol endpoint backing the binding.
    pub fn endpoint(&self) -> &dyn NetworkEndpoint {
        &*self.endpoint
    }

    /// The current lifecycle kind.
    pub fn get_kind(&self) -> AddressKind {
        AddressKind::from_u32(self.kind.load(Ordering::Acquire))
    }

    pub(crate) fn set_kind(&self, kind: AddressKind) {
        self.kind.store(kind as u32, Ordering::Release);
    }

    /// Whether the address is deprecated for new connections.
    pub fn deprecated(&self) -> bool {
        self.deprecated.load(Ordering::Acquire)
    }

    pub(crate) fn set_deprecated(&self, deprecated: bool) {
        self.deprecated.store(deprecated, Ordering::Release);
    }

    pub(crate) fn config_type(&self) -> AddressConfigType {
        AddressConfigType::from_u32(self.config_type.load(Ordering::Acquire))
    }

    pub(crate) fn set_config_type(&self, config_type: AddressConfigType) {
        self.config_type.store(config_type as u32, Ordering::Release);
    }

    pub(crate) fn ref_count(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    pub(crate) fn nic(&self) -> Option<Arc<Nic>> {
        self.nic.upgrade()
    }

    pub(crate) fn requires_link_resolution(&self) -> bool {
        self.link_resolution
    }

    /// Whether the endpoint can source an outgoing packet: not expired,
    /// or the interface is spoofing.
    pub(crate) fn is_valid_for_outgoing(&self) -> bool {
        self.get_kind() != AddressKind::PermanentExpired
            || self.nic.upgrade().is_some_and(|nic| nic.state.read().spoofing)
    }

    pub(crate) fn is_valid_for_outgoing_locked(&self, state: &NicState) -> bool {
        self.get_kind() != AddressKind::PermanentExpired || state.spoofing
    }

    /// Increments the reference count. Only valid while the caller
    /// already holds a reference.
    pub(crate) fn inc_ref(&self) {
        let _: u32 = self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Increments the reference count unless it is zero. A zero count
    /// means the cell is scheduled for removal; acquiring a reference
    /// then would hand out a live handle on a dead cell.
    pub(crate) fn try_inc_ref(&self) -> bool {
        let mut count = self.refs.load(Ordering::Acquire);
        loop {
            if count == 0 {
                return false;
            }
            match self.refs.compare_exchange_weak(
                count,
                count + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => count = observed,
            }
        }
    }

    /// Decrements the reference count, removing the cell from its
    /// interface on zero. Must not be called with the interface lease
    /// held; use [`AddressEndpoint::dec_ref_locked`] there.
    pub(crate) fn dec_ref(&self) {
        if self.refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some(nic) = self.nic.upgrade() {
                nic.remove_endpoint(self);
            }
        }
    }

    /// Like [`AddressEndpoint::dec_ref`] with the interface write lease
    /// already held. Returns whether the cell was removed.
    pub(crate) fn dec_ref_locked(&self, nic: &Nic, state: &mut NicState) -> bool {
        if self.refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            nic.remove_endpoint_locked(state, self);
            return true;
        }
        false
    }
}

/// A counted reference to an address cell, released on drop.
///
/// Dropping the last reference re-enters the interface write lease to
/// remove the cell, so a guard must never be dropped while the caller
/// holds the lease; locked paths decrement through
/// [`AddressEndpoint::dec_ref_locked`] instead.
pub struct EndpointRef {
    entry: Arc<AddressEndpoint>,
}

impl Debug for EndpointRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let Self { entry } = self;
        write!(f, "EndpointRef({:?})", entry)
    }
}

impl EndpointRef {
    /// Takes ownership of a count already present on `entry` (a freshly
    /// created cell, or an increment performed by the caller).
    pub(crate) fn adopt(entry: Arc<AddressEndpoint>) -> Self {
        Self { entry }
    }

    /// Acquires a new reference if the cell is still alive.
    pub(crate) fn try_new(entry: &Arc<AddressEndpoint>) -> Option<Self> {
        entry.try_inc_ref().then(|| Self { entry: Arc::clone(entry) })
    }
}

impl Clone for EndpointRef {
    fn clone(&self) -> Self {
        // The holder of this guard already has a reference, so a plain
        // increment is safe.
        self.entry.inc_ref();
        Self { entry: Arc::clone(&self.entry) }
    }
}

impl Deref for EndpointRef {
    type Target = AddressEndpoint;

    fn deref(&self) -> &AddressEndpoint {
        &self.entry
    }
}

impl Drop for EndpointRef {
    fn drop(&mut self) {
        self.entry.dec_ref();
    }
}

/// IPv6 address scope, ordered smallest to largest.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
enum Ipv6AddressScope {
    LinkLocal,
    UniqueLocal,
    Global,
}

fn scope_for_ipv6_address(addr: Ipv6Addr) -> Ipv6AddressScope {
    let bytes = addr.ipv6_bytes();
    if addr.is_multicast() {
        // The multicast scope field, RFC 4291 section 2.7.
        return match bytes[1] & 0x0f {
            0x02 => Ipv6AddressScope::LinkLocal,
            _ => Ipv6AddressScope::Global,
        };
    }
    if Ipv6::LINK_LOCAL_UNICAST_SUBNET.contains(&addr) {
        Ipv6AddressScope::LinkLocal
    } else if bytes[0] & 0xfe == 0xfc {
        Ipv6AddressScope::UniqueLocal
    } else {
        Ipv6AddressScope::Global
    }
}

/// Returns the unicast witness of `addr` when it is an IPv6 unicast
/// address carried by the IPv6 protocol.
pub(crate) fn ipv6_unicast(
    protocol: NetworkProtocolNumber,
    addr: IpAddr,
) -> Option<UnicastAddr<Ipv6Addr>> {
    if protocol != NetworkProtocolNumber::IPV6 {
        return None;
    }
    match addr {
        IpAddr::V6(addr) => UnicastAddr::new(addr),
        IpAddr::V4(_) => None,
    }
}

fn set_host_bits(bytes: &mut [u8], prefix: u8) {
    let prefix = usize::from(prefix);
    for (i, byte) in bytes.iter_mut().enumerate() {
        let offset = i * 8;
        if offset + 8 <= prefix {
            continue;
        }
        let prefix_bits = prefix.saturating_sub(offset);
        *byte |= 0xffu8 >> prefix_bits;
    }
}

/// The highest address in `subnet` (the subnet-directed broadcast
/// address for IPv4).
fn subnet_last_address(subnet: &SubnetEither) -> IpAddr {
    match subnet {
        SubnetEither::V4(subnet) => {
            let mut bytes = subnet.network().ipv4_bytes();
            set_host_bits(&mut bytes, subnet.prefix());
            IpAddr::V4(Ipv4Addr::new(bytes))
        }
        SubnetEither::V6(subnet) => {
            let mut bytes = subnet.network().ipv6_bytes();
            set_host_bits(&mut bytes, subnet.prefix());
            IpAddr::V6(Ipv6Addr::from_bytes(bytes))
        }
    }
}

fn range_contains(subnet: &SubnetEither, addr: IpAddr) -> bool {
    // The subnet's own address and its broadcast address are not valid
    // hosts to synthesize endpoints for.
    let network = match subnet {
        SubnetEither::V4(subnet) => IpAddr::V4(subnet.network()),
        SubnetEither::V6(subnet) => IpAddr::V6(subnet.network()),
    };
    if addr == network || addr == subnet_last_address(subnet) {
        return false;
    }
    match (subnet, addr) {
        (SubnetEither::V4(subnet), IpAddr::V4(addr)) => subnet.contains(&addr),
        (SubnetEither::V6(subnet), IpAddr::V6(addr)) => subnet.contains(&addr),
        _ => false,
    }
}

impl Nic {
    /// Adds `protocol_address` to the interface so that it starts
    /// accepting packets targeted at it.
    pub fn add_address(
        &self,
        protocol_address: ProtocolAddress,
        behavior: PrimaryEndpointBehavior,
    ) -> Result<(), NicError> {
        let mut state = self.state.write();
        let _: Arc<AddressEndpoint> = self.add_address_locked(
            &mut state,
            protocol_address,
            behavior,
            AddressKind::Permanent,
            AddressConfigType::Static,
            false,
        )?;
        Ok(())
    }

    /// Adds an address with full control over kind and configuration.
    ///
    /// When an entry for the same local address already exists in a
    /// non-permanent state and `kind` is permanent, the entry is
    /// promoted in place. The returned cell's initial (or reinstated)
    /// count is the permanent bias for permanent kinds, and the
    /// caller's reference for temporary ones.
    pub(crate) fn add_address_locked(
        &self,
        state: &mut NicState,
        protocol_address: ProtocolAddress,
        behavior: PrimaryEndpointBehavior,
        kind: AddressKind,
        config_type: AddressConfigType,
        deprecated: bool,
    ) -> Result<Arc<AddressEndpoint>, NicError> {
        let ProtocolAddress { protocol, address_with_prefix } = protocol_address;
        let addr = address_with_prefix.addr;

        if let Some(entry) = state.endpoints.get(&addr) {
            if kind != AddressKind::Permanent {
                return Err(NicError::DuplicateAddress);
            }
            match entry.get_kind() {
                AddressKind::PermanentTentative | AddressKind::Permanent => {
                    return Err(NicError::DuplicateAddress);
                }
                AddressKind::PermanentExpired | AddressKind::Temporary => {
                    if entry.try_inc_ref() {
                        // Promote in place; the increment we just took
                        // becomes the permanent bias.
                        //
                        // TODO: run duplicate address detection when
                        // promoting an IPv6 endpoint to permanent.
                        let entry = Arc::clone(entry);
                        entry.set_kind(AddressKind::Permanent);
                        entry.set_deprecated(deprecated);
                        entry.set_config_type(config_type);

                        let list = state.primary.entry(protocol).or_default();
                        if let Some(i) =
                            list.iter().position(|other| Arc::ptr_eq(other, &entry))
                        {
                            match behavior {
                                PrimaryEndpointBehavior::CanBePrimaryEndpoint => {
                                    return Ok(entry);
                                }
                                PrimaryEndpointBehavior::FirstPrimaryEndpoint => {
                                    if i == 0 {
                                        return Ok(entry);
                                    }
                                    let _ = list.remove(i);
                                }
                                PrimaryEndpointBehavior::NeverPrimaryEndpoint => {
                                    let _ = list.remove(i);
                                    return Ok(entry);
                                }
                            }
                        }
                        Self::insert_primary_endpoint_locked(state, &entry, behavior);
                        return Ok(entry);
                    }
                    // A failed increment means the cell is on its way
                    // out, waiting on the lease we hold. Remove it here
                    // so a fresh cell can take the address; the pending
                    // removal becomes a no-op.
                    let dead = Arc::clone(entry);
                    self.remove_endpoint_locked(state, &dead);
                }
            }
        }

        let stack = self.stack();
        let net_proto = stack.network_protocol(protocol).ok_or(NicError::UnknownProtocol)?;
        let endpoint = net_proto.new_endpoint(self.id, address_with_prefix, &stack, &self.link)?;

        let unicast_v6 = ipv6_unicast(protocol, addr);

        // Permanent IPv6 unicast addresses go through DAD before they
        // are considered bound.
        let kind = match (unicast_v6.is_some(), kind) {
            (true, AddressKind::Permanent) => AddressKind::PermanentTentative,
            (_, kind) => kind,
        };

        let link_resolution = self
            .link
            .capabilities()
            .contains(LinkEndpointCapabilities::RESOLUTION_REQUIRED)
            && stack.link_address_resolver(protocol).is_some();

        let entry = Arc::new(AddressEndpoint {
            nic: self.weak_self.clone(),
            protocol,
            endpoint,
            kind: AtomicU32::new(kind as u32),
            config_type: AtomicU32::new(config_type as u32),
            deprecated: AtomicBool::new(deprecated),
            refs: AtomicU32::new(1),
            link_resolution,
        });

        if let Some(addr) = unicast_v6 {
            let snmc = addr.get().to_solicited_node_address();
            self.join_group_locked(state, protocol, IpAddr::V6(snmc.get()))?;
        }

        trace!("nic {}: adding address {} ({:?})", self.id, address_with_prefix, kind);

        let _: Option<Arc<AddressEndpoint>> = state.endpoints.insert(addr, Arc::clone(&entry));
        Self::insert_primary_endpoint_locked(state, &entry, behavior);

        if let Some(addr) = unicast_v6 {
            if kind == AddressKind::PermanentTentative && state.enabled {
                self.start_duplicate_address_detection_locked(state, addr, &entry)?;
            }
        }

        Ok(entry)
    }

    fn insert_primary_endpoint_locked(
        state: &mut NicState,
        entry: &Arc<AddressEndpoint>,
        behavior: PrimaryEndpointBehavior,
    ) {
        let list = state.primary.entry(entry.protocol()).or_default();
        match behavior {
            PrimaryEndpointBehavior::CanBePrimaryEndpoint => list.push(Arc::clone(entry)),
            PrimaryEndpointBehavior::FirstPrimaryEndpoint => list.insert(0, Arc::clone(entry)),
            PrimaryEndpointBehavior::NeverPrimaryEndpoint => {}
        }
    }

    /// Removes a permanent address from the interface.
    pub fn remove_address(&self, addr: IpAddr) -> Result<(), NicError> {
        let mut state = self.state.write();
        self.remove_permanent_address_locked(&mut state, addr)
    }

    pub(crate) fn remove_permanent_address_locked(
        &self,
        state: &mut NicState,
        addr: IpAddr,
    ) -> Result<(), NicError> {
        let entry = state.endpoints.get(&addr).ok_or(NicError::BadLocalAddress)?;
        let kind = entry.get_kind();
        if kind != AddressKind::Permanent && kind != AddressKind::PermanentTentative {
            return Err(NicError::BadLocalAddress);
        }
        let entry = Arc::clone(entry);

        let unicast_v6 = ipv6_unicast(entry.protocol(), addr);
        if let Some(addr) = unicast_v6 {
            if kind == AddressKind::PermanentTentative {
                self.stop_duplicate_address_detection_locked(state, addr);
            }
            if entry.config_type() == AddressConfigType::Slaac {
                self.cleanup_auto_gen_addr_resources_and_notify_locked(state, addr);
            }
        }

        trace!("nic {}: removing address {}", self.id, addr);

        entry.set_kind(AddressKind::PermanentExpired);
        if !entry.dec_ref_locked(self, state) {
            // Outstanding route references keep the cell alive until
            // their last decrement.
            return Ok(());
        }

        if let Some(addr) = unicast_v6 {
            let snmc = addr.get().to_solicited_node_address();
            self.leave_group_locked(state, IpAddr::V6(snmc.get()))?;
        }
        Ok(())
    }

    /// Removes `entry` from the table if the table still maps its
    /// address to this very cell. A newer cell under the same address
    /// makes this a no-op, which is what keeps removal idempotent when
    /// a zero-count cell races with a re-add.
    pub(crate) fn remove_endpoint_locked(&self, state: &mut NicState, entry: &AddressEndpoint) {
        let addr = entry.addr();
        match state.endpoints.get(&addr) {
            Some(current) if core::ptr::eq(Arc::as_ptr(current), entry) => {}
            _ => return,
        }
        assert!(
            entry.get_kind() != AddressKind::Permanent,
            "reference count dropped to zero before the address was removed"
        );

        let _: Option<Arc<AddressEndpoint>> = state.endpoints.remove(&addr);
        if let Some(list) = state.primary.get_mut(&entry.protocol()) {
            if let Some(i) =
                list.iter().position(|other| core::ptr::eq(Arc::as_ptr(other), entry))
            {
                let _ = list.remove(i);
            }
        }
        entry.endpoint().close();
    }

    pub(crate) fn remove_endpoint(&self, entry: &AddressEndpoint) {
        let mut state = self.state.write();
        self.remove_endpoint_locked(&mut state, entry);
    }

    /// Probes the table for `addr` without taking a reference. The
    /// returned cell may be torn down at any time; use the reference
    /// protocol to actually deliver through it.
    pub fn lookup(&self, addr: IpAddr) -> Option<Arc<AddressEndpoint>> {
        self.state.read().endpoints.get(&addr).cloned()
    }

    /// Whether `addr` is bound permanently (including while tentative).
    pub fn has_permanent_address(&self, addr: IpAddr) -> bool {
        let state = self.state.read();
        state.endpoints.get(&addr).is_some_and(|entry| {
            matches!(
                entry.get_kind(),
                AddressKind::Permanent | AddressKind::PermanentTentative
            )
        })
    }

    pub(crate) fn get_ref(
        &self,
        protocol: NetworkProtocolNumber,
        addr: IpAddr,
    ) -> Option<EndpointRef> {
        self.get_ref_or_create_temp(
            protocol,
            addr,
            PrimaryEndpointBehavior::CanBePrimaryEndpoint,
            GetRefBehavior::Promiscuous,
        )
    }

    /// Finds the endpoint bound to `addr`, synthesizing a temporary one
    /// under the spoofing rules if allowed.
    pub(crate) fn find_endpoint(
        &self,
        protocol: NetworkProtocolNumber,
        addr: IpAddr,
        behavior: PrimaryEndpointBehavior,
    ) -> Option<EndpointRef> {
        self.get_ref_or_create_temp(protocol, addr, behavior, GetRefBehavior::Spoofing)
    }

    /// Returns a counted reference to the endpoint for `addr`, creating
    /// a temporary endpoint when the selected mode flag (or a
    /// configured address range) permits.
    pub(crate) fn get_ref_or_create_temp(
        &self,
        protocol: NetworkProtocolNumber,
        addr: IpAddr,
        behavior: PrimaryEndpointBehavior,
        temp_ref: GetRefBehavior,
    ) -> Option<EndpointRef> {
        let create_temp = {
            let state = self.state.read();
            let flag = match temp_ref {
                GetRefBehavior::Spoofing => state.spoofing,
                GetRefBehavior::Promiscuous => state.promiscuous,
                GetRefBehavior::ForceSpoofing => true,
            };

            if let Some(entry) = state.endpoints.get(&addr) {
                match entry.get_kind() {
                    AddressKind::PermanentExpired => {
                        if !flag {
                            return None;
                        }
                        if let Some(guard) = EndpointRef::try_new(entry) {
                            return Some(guard);
                        }
                    }
                    AddressKind::Temporary | AddressKind::Permanent => {
                        if let Some(guard) = EndpointRef::try_new(entry) {
                            return Some(guard);
                        }
                    }
                    AddressKind::PermanentTentative => {}
                }
            }

            flag || state.address_ranges.iter().any(|range| range_contains(range, addr))
        };

        if !create_temp {
            return None;
        }

        // Retry under the write lease; another caller may have created
        // the endpoint while we upgraded.
        let mut state = self.state.write();
        if let Some(entry) = state.endpoints.get(&addr) {
            // Any kind is acceptable at this point, expired included.
            if let Some(guard) = EndpointRef::try_new(entry) {
                return Some(guard);
            }
            // The cell is scheduled for removal; clear it so the
            // temporary endpoint can take its place.
            let dead = Arc::clone(entry);
            self.remove_endpoint_locked(&mut state, &dead);
        }

        let stack = self.stack();
        let net_proto = stack.network_protocol(protocol)?;
        let entry = self
            .add_address_locked(
                &mut state,
                ProtocolAddress {
                    protocol,
                    address_with_prefix: AddressWithPrefix {
                        addr,
                        prefix_len: net_proto.default_prefix_len(),
                    },
                },
                behavior,
                AddressKind::Temporary,
                AddressConfigType::Static,
                false,
            )
            .ok()?;
        Some(EndpointRef::adopt(entry))
    }

    /// Returns the first usable primary endpoint for `protocol`,
    /// preferring non-deprecated addresses. IPv6 requests with a known
    /// remote run source address selection instead.
    pub(crate) fn primary_endpoint(
        &self,
        protocol: NetworkProtocolNumber,
        remote_addr: Option<IpAddr>,
    ) -> Option<EndpointRef> {
        if protocol == NetworkProtocolNumber::IPV6 {
            if let Some(IpAddr::V6(remote)) = remote_addr {
                return self.primary_ipv6_endpoint(remote);
            }
        }

        let mut chosen = None;
        let mut deprecated = None;
        {
            let state = self.state.read();
            if let Some(list) = state.primary.get(&protocol) {
                for entry in list {
                    if !entry.is_valid_for_outgoing_locked(&state) {
                        continue;
                    }
                    if !entry.deprecated() {
                        if let Some(guard) = EndpointRef::try_new(entry) {
                            chosen = Some(guard);
                            break;
                        }
                    } else if deprecated.is_none() {
                        // Keep a deprecated fallback in case no
                        // non-deprecated endpoint is usable.
                        deprecated = EndpointRef::try_new(entry);
                    }
                }
            }
        }
        // The lease is released; dropping the unused fallback here may
        // legally re-enter the write lease.
        chosen.or(deprecated)
    }

    /// IPv6 source address selection following RFC 6724 section 5,
    /// rules 1-3.
    fn primary_ipv6_endpoint(&self, remote_addr: Ipv6Addr) -> Option<EndpointRef> {
        struct Candidate<'a> {
            entry: &'a Arc<AddressEndpoint>,
            addr: Ipv6Addr,
            scope: Ipv6AddressScope,
            deprecated: bool,
        }

        let state = self.state.read();
        let list = state.primary.get(&NetworkProtocolNumber::IPV6)?;

        let mut candidates = list
            .iter()
            .filter(|entry| entry.is_valid_for_outgoing_locked(&state))
            .map(|entry| {
                let addr = match entry.addr() {
                    IpAddr::V6(addr) => addr,
                    // The IPv6 primary list cannot contain IPv4
                    // addresses.
                    addr => panic!("non-IPv6 address {} in the IPv6 primary list", addr),
                };
                Candidate {
                    entry,
                    addr,
                    scope: scope_for_ipv6_address(addr),
                    deprecated: entry.deprecated(),
                }
            })
            .collect::<Vec<_>>();

        let remote_scope = scope_for_ipv6_address(remote_addr);

        candidates.sort_by(|a, b| {
            use core::cmp::Ordering;

            // Rule 1: prefer same address.
            if a.addr == remote_addr {
                return Ordering::Less;
            }
            if b.addr == remote_addr {
                return Ordering::Greater;
            }

            // Rule 2: prefer appropriate scope; the smallest scope that
            // still covers the destination wins.
            if a.scope < b.scope {
                return if a.scope >= remote_scope { Ordering::Less } else { Ordering::Greater };
            }
            if b.scope < a.scope {
                return if b.scope < remote_scope { Ordering::Less } else { Ordering::Greater };
            }

            // Rule 3: avoid deprecated addresses.
            match (a.deprecated, b.deprecated) {
                (false, true) => Ordering::Less,
                (true, false) => Ordering::Greater,
                // Rules 4-8 are not implemented; preserve list order.
                _ => Ordering::Equal,
            }
        });

        candidates.iter().find_map(|candidate| EndpointRef::try_new(candidate.entry))
    }

    /// All addresses (primary and non-primary) bound to the interface.
    /// Expired and temporary bindings are not reported.
    pub fn all_addresses(&self) -> Vec<ProtocolAddress> {
        let state = self.state.read();
        state
            .endpoints
            .values()
            .filter(|entry| {
                !matches!(
                    entry.get_kind(),
                    AddressKind::PermanentExpired | AddressKind::Temporary
                )
            })
            .map(|entry| ProtocolAddress {
                protocol: entry.protocol(),
                address_with_prefix: AddressWithPrefix {
                    addr: entry.addr(),
                    prefix_len: entry.endpoint().prefix_len(),
                },
            })
            .collect()
    }

    /// The addresses eligible for primary-endpoint selection. Tentative
    /// addresses are additionally excluded: they are not yet bound.
    pub fn primary_addresses(&self) -> Vec<ProtocolAddress> {
        let state = self.state.read();
        let mut addrs = Vec::new();
        for (protocol, list) in &state.primary {
            for entry in list {
                match entry.get_kind() {
                    AddressKind::PermanentTentative
                    | AddressKind::PermanentExpired
                    | AddressKind::Temporary => continue,
                    AddressKind::Permanent => {}
                }
                addrs.push(ProtocolAddress {
                    protocol: *protocol,
                    address_with_prefix: AddressWithPrefix {
                        addr: entry.addr(),
                        prefix_len: entry.endpoint().prefix_len(),
                    },
                });
            }
        }
        addrs
    }

    /// The first non-deprecated primary address for `protocol`, falling
    /// back to the first deprecated one.
    pub fn primary_address(&self, protocol: NetworkProtocolNumber) -> Option<AddressWithPrefix> {
        let state = self.state.read();
        let list = state.primary.get(&protocol)?;

        let mut deprecated = None;
        for entry in list {
            match entry.get_kind() {
                AddressKind::PermanentTentative
                | AddressKind::PermanentExpired
                | AddressKind::Temporary => continue,
                AddressKind::Permanent => {}
            }
            let addr = AddressWithPrefix {
                addr: entry.addr(),
                prefix_len: entry.endpoint().prefix_len(),
            };
            if !entry.deprecated() {
                return Some(addr);
            }
            if deprecated.is_none() {
                deprecated = Some(addr);
            }
        }
        deprecated
    }

    /// Permits the interface to synthesize temporary endpoints for
    /// addresses within `subnet` (excluding the subnet's network and
    /// broadcast addresses).
    pub fn add_address_range(&self, subnet: SubnetEither) {
        self.state.write().address_ranges.push(subnet);
    }

    /// Removes a previously added address range.
    pub fn remove_address_range(&self, subnet: SubnetEither) {
        self.state.write().address_ranges.retain(|range| *range != subnet);
    }

    /// The configured address ranges, unioned with the host subnet of
    /// every bound address.
    pub fn address_ranges(&self) -> Vec<SubnetEither> {
        let state = self.state.read();
        let mut subnets = Vec::with_capacity(state.endpoints.len() + state.address_ranges.len());
        for addr in state.endpoints.keys() {
            // A full-length prefix always yields a valid subnet for an
            // address of that length.
            let subnet = match addr {
                IpAddr::V4(addr) => SubnetEither::V4(
                    Subnet::new(*addr, 32).expect("invalid host subnet for IPv4 address"),
                ),
                IpAddr::V6(addr) => SubnetEither::V6(
                    Subnet::new(*addr, 128).expect("invalid host subnet for IPv6 address"),
                ),
            };
            subnets.push(subnet);
        }
        subnets.extend(state.address_ranges.iter().cloned());
        subnets
    }

    /// Whether `addr` could be delivered locally: the decision
    /// [`Nic::get_ref`] would make, without taking a reference.
    pub(crate) fn would_deliver_locally(&self, addr: IpAddr) -> bool {
        let state = self.state.read();
        if let Some(entry) = state.endpoints.get(&addr) {
            match entry.get_kind() {
                AddressKind::PermanentExpired => {
                    if !state.promiscuous {
                        return false;
                    }
                    if entry.ref_count() != 0 {
                        return true;
                    }
                }
                AddressKind::Temporary | AddressKind::Permanent => {
                    if entry.ref_count() != 0 {
                        return true;
                    }
                }
                AddressKind::PermanentTentative => {}
            }
        }
        state.promiscuous
            || state.address_ranges.iter().any(|range| range_contains(range, addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_case::test_case;

    #[test]
    fn kind_round_trips() {
        for kind in [
            AddressKind::PermanentTentative,
            AddressKind::Permanent,
            AddressKind::PermanentExpired,
            AddressKind::Temporary,
        ] {
            assert_eq!(AddressKind::from_u32(kind as u32), kind);
        }
    }

    #[test_case("fe80::1" => Ipv6AddressScope::LinkLocal; "unicast link local")]
    #[test_case("ff02::1" => Ipv6AddressScope::LinkLocal; "multicast link local")]
    #[test_case("fd00::1" => Ipv6AddressScope::UniqueLocal; "unique local")]
    #[test_case("2001:db8::1" => Ipv6AddressScope::Global; "global")]
    #[test_case("ff0e::1" => Ipv6AddressScope::Global; "multicast global")]
    fn scope_classification(addr: &str) -> Ipv6AddressScope {
        let addr = addr.parse::<std::net::Ipv6Addr>().unwrap();
        scope_for_ipv6_address(Ipv6Addr::from_bytes(addr.octets()))
    }

    #[test]
    fn subnet_last_address_matches_mask() {
        let subnet = SubnetEither::V4(
            Subnet::new(Ipv4Addr::new([192, 168, 1, 0]), 24).unwrap(),
        );
        assert_eq!(
            subnet_last_address(&subnet),
            IpAddr::V4(Ipv4Addr::new([192, 168, 1, 255]))
        );

        let subnet = SubnetEither::V6(
            Subnet::new(Ipv6Addr::from_bytes([0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]), 64)
                .unwrap(),
        );
        let IpAddr::V6(last) = subnet_last_address(&subnet) else {
            panic!("expected an IPv6 address");
        };
        assert_eq!(
            last.ipv6_bytes(),
            [0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
        );
    }

    #[test]
    fn range_excludes_network_and_broadcast() {
        let subnet = SubnetEither::V4(
            Subnet::new(Ipv4Addr::new([10, 0, 0, 0]), 24).unwrap(),
        );
        assert!(!range_contains(&subnet, IpAddr::V4(Ipv4Addr::new([10, 0, 0, 0]))));
        assert!(!range_contains(&subnet, IpAddr::V4(Ipv4Addr::new([10, 0, 0, 255]))));
        assert!(range_contains(&subnet, IpAddr::V4(Ipv4Addr::new([10, 0, 0, 7]))));
        assert!(!range_contains(&subnet, IpAddr::V4(Ipv4Addr::new([10, 0, 1, 7]))));
    }

    use std::sync::Arc as StdArc;

    use crate::device::Nic;
    use crate::link::LinkEndpointCapabilities;
    use crate::protocol::NetworkProtocol;
    use crate::stack::{Stack, StackOptions};
    use crate::testutil::{FakeLinkEndpoint, FakeNetworkProtocol, LINK_ADDR1};
    use crate::types::NicId;

    struct TableTest {
        _stack: StdArc<Stack>,
        nic: StdArc<Nic>,
        v4: StdArc<FakeNetworkProtocol>,
    }

    fn table_setup(tweak: impl FnOnce(&mut StackOptions)) -> TableTest {
        let v4 = FakeNetworkProtocol::v4();
        let v6 = FakeNetworkProtocol::v6();
        let mut options = StackOptions {
            network_protocols: vec![
                StdArc::clone(&v4) as StdArc<dyn NetworkProtocol>,
                StdArc::clone(&v6) as StdArc<dyn NetworkProtocol>,
            ],
            ..Default::default()
        };
        tweak(&mut options);
        let stack = Stack::new(options);
        let link = FakeLinkEndpoint::new(LinkEndpointCapabilities::empty(), LINK_ADDR1);
        let nic = stack.create_nic(NicId(1), "eth0", link as _).unwrap();
        TableTest { _stack: stack, nic, v4 }
    }

    fn pa(protocol: NetworkProtocolNumber, addr: IpAddr, prefix_len: u8) -> ProtocolAddress {
        ProtocolAddress { protocol, address_with_prefix: AddressWithPrefix { addr, prefix_len } }
    }

    const ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new([1, 2, 3, 4]));
    const ADDR2: IpAddr = IpAddr::V4(Ipv4Addr::new([5, 6, 7, 8]));

    fn parse_v6(addr: &str) -> Ipv6Addr {
        let addr = addr.parse::<std::net::Ipv6Addr>().unwrap();
        Ipv6Addr::from_bytes(addr.octets())
    }

    #[test]
    fn add_remove_round_trip() {
        let test = table_setup(|_| {});
        test.nic
            .add_address(
                pa(NetworkProtocolNumber::IPV4, ADDR, 24),
                PrimaryEndpointBehavior::CanBePrimaryEndpoint,
            )
            .unwrap();
        assert!(test.nic.lookup(ADDR).is_some());

        test.nic.remove_address(ADDR).unwrap();
        assert!(test.nic.lookup(ADDR).is_none());
        assert_eq!(test.v4.closed(), vec![ADDR]);
        assert_eq!(test.nic.remove_address(ADDR), Err(NicError::BadLocalAddress));
    }

    #[test]
    fn add_duplicate_address_fails() {
        let test = table_setup(|_| {});
        let addr = pa(NetworkProtocolNumber::IPV4, ADDR, 24);
        test.nic.add_address(addr, PrimaryEndpointBehavior::CanBePrimaryEndpoint).unwrap();
        assert_eq!(
            test.nic.add_address(addr, PrimaryEndpointBehavior::CanBePrimaryEndpoint),
            Err(NicError::DuplicateAddress)
        );
    }

    #[test]
    fn add_with_unknown_protocol_fails() {
        let test = table_setup(|_| {});
        assert_eq!(
            test.nic.add_address(
                pa(NetworkProtocolNumber(0x9999), ADDR, 24),
                PrimaryEndpointBehavior::CanBePrimaryEndpoint
            ),
            Err(NicError::UnknownProtocol)
        );
    }

    #[test]
    fn temporary_endpoint_dies_with_last_reference() {
        let test = table_setup(|_| {});
        test.nic.set_spoofing(true);

        let guard = test
            .nic
            .get_ref_or_create_temp(
                NetworkProtocolNumber::IPV4,
                ADDR,
                PrimaryEndpointBehavior::CanBePrimaryEndpoint,
                GetRefBehavior::Spoofing,
            )
            .unwrap();
        assert_eq!(guard.get_kind(), AddressKind::Temporary);
        assert!(test.nic.lookup(ADDR).is_some());
        // Temporary endpoints are hidden from address listings.
        assert!(test.nic.all_addresses().is_empty());

        drop(guard);
        assert!(test.nic.lookup(ADDR).is_none());
        assert_eq!(test.v4.closed(), vec![ADDR]);
    }

    #[test]
    fn promotion_preserves_the_cell() {
        let test = table_setup(|_| {});
        test.nic.set_spoofing(true);

        test.nic
            .add_address(
                pa(NetworkProtocolNumber::IPV4, ADDR2, 24),
                PrimaryEndpointBehavior::CanBePrimaryEndpoint,
            )
            .unwrap();

        let guard = test
            .nic
            .get_ref_or_create_temp(
                NetworkProtocolNumber::IPV4,
                ADDR,
                PrimaryEndpointBehavior::CanBePrimaryEndpoint,
                GetRefBehavior::Spoofing,
            )
            .unwrap();
        assert_eq!(guard.get_kind(), AddressKind::Temporary);

        // Promote in place with a new primary position.
        test.nic
            .add_address(
                pa(NetworkProtocolNumber::IPV4, ADDR, 24),
                PrimaryEndpointBehavior::FirstPrimaryEndpoint,
            )
            .unwrap();

        let entry = test.nic.lookup(ADDR).unwrap();
        assert!(core::ptr::eq(Arc::as_ptr(&entry), &*guard));
        assert_eq!(guard.get_kind(), AddressKind::Permanent);

        let primary = test.nic.primary_addresses();
        assert_eq!(primary[0].address_with_prefix.addr, ADDR);
        assert_eq!(primary[1].address_with_prefix.addr, ADDR2);

        drop(guard);
        // The permanent bias keeps the cell alive.
        assert!(test.nic.lookup(ADDR).is_some());
        test.nic.remove_address(ADDR).unwrap();
        assert!(test.nic.lookup(ADDR).is_none());
    }

    #[test]
    fn expired_endpoint_usable_only_with_flag() {
        let test = table_setup(|_| {});
        test.nic
            .add_address(
                pa(NetworkProtocolNumber::IPV4, ADDR, 24),
                PrimaryEndpointBehavior::CanBePrimaryEndpoint,
            )
            .unwrap();
        let guard = test.nic.get_ref(NetworkProtocolNumber::IPV4, ADDR).unwrap();

        test.nic.remove_address(ADDR).unwrap();
        assert_eq!(guard.get_kind(), AddressKind::PermanentExpired);
        // Still in the table while the route reference is outstanding.
        assert!(test.nic.lookup(ADDR).is_some());
        assert!(test.nic.all_addresses().is_empty());
        assert!(!guard.is_valid_for_outgoing());

        assert!(test.nic.get_ref(NetworkProtocolNumber::IPV4, ADDR).is_none());
        test.nic.set_promiscuous_mode(true);
        let second = test.nic.get_ref(NetworkProtocolNumber::IPV4, ADDR).unwrap();
        drop(second);
        test.nic.set_promiscuous_mode(false);

        drop(guard);
        assert!(test.nic.lookup(ADDR).is_none());
        assert_eq!(test.v4.closed(), vec![ADDR]);
    }

    #[test]
    fn re_add_revives_expired_cell() {
        let test = table_setup(|_| {});
        test.nic
            .add_address(
                pa(NetworkProtocolNumber::IPV4, ADDR, 24),
                PrimaryEndpointBehavior::CanBePrimaryEndpoint,
            )
            .unwrap();
        let guard = test.nic.get_ref(NetworkProtocolNumber::IPV4, ADDR).unwrap();
        test.nic.remove_address(ADDR).unwrap();
        assert_eq!(guard.get_kind(), AddressKind::PermanentExpired);

        test.nic
            .add_address(
                pa(NetworkProtocolNumber::IPV4, ADDR, 24),
                PrimaryEndpointBehavior::CanBePrimaryEndpoint,
            )
            .unwrap();
        let entry = test.nic.lookup(ADDR).unwrap();
        assert!(core::ptr::eq(Arc::as_ptr(&entry), &*guard));
        assert_eq!(guard.get_kind(), AddressKind::Permanent);

        drop(guard);
        assert!(test.nic.lookup(ADDR).is_some());
    }

    #[test]
    fn tentative_addresses_are_not_primary() {
        let test = table_setup(|_| {});
        let addr = IpAddr::V6(parse_v6("fe80::1"));
        test.nic
            .add_address(
                pa(NetworkProtocolNumber::IPV6, addr, 64),
                PrimaryEndpointBehavior::CanBePrimaryEndpoint,
            )
            .unwrap();

        assert!(test
            .nic
            .all_addresses()
            .iter()
            .any(|entry| entry.address_with_prefix.addr == addr));
        assert!(test.nic.primary_addresses().is_empty());
        assert_eq!(test.nic.primary_address(NetworkProtocolNumber::IPV6), None);
    }

    #[test]
    fn primary_endpoint_prefers_non_deprecated() {
        let test = table_setup(|_| {});
        {
            let mut state = test.nic.state.write();
            let _ = test
                .nic
                .add_address_locked(
                    &mut state,
                    pa(NetworkProtocolNumber::IPV4, ADDR, 24),
                    PrimaryEndpointBehavior::CanBePrimaryEndpoint,
                    AddressKind::Permanent,
                    AddressConfigType::Static,
                    true,
                )
                .unwrap();
        }
        test.nic
            .add_address(
                pa(NetworkProtocolNumber::IPV4, ADDR2, 24),
                PrimaryEndpointBehavior::CanBePrimaryEndpoint,
            )
            .unwrap();

        let selected = test.nic.primary_endpoint(NetworkProtocolNumber::IPV4, None).unwrap();
        assert_eq!(selected.addr(), ADDR2);
        drop(selected);

        // With the non-deprecated endpoint gone, fall back to the
        // deprecated one.
        test.nic.remove_address(ADDR2).unwrap();
        let selected = test.nic.primary_endpoint(NetworkProtocolNumber::IPV4, None).unwrap();
        assert_eq!(selected.addr(), ADDR);
        drop(selected);

        assert_eq!(
            test.nic.primary_address(NetworkProtocolNumber::IPV4).unwrap().addr,
            ADDR
        );
    }

    fn add_v6(test: &TableTest, addr: &str, deprecated: bool) {
        let mut state = test.nic.state.write();
        let _ = test
            .nic
            .add_address_locked(
                &mut state,
                pa(NetworkProtocolNumber::IPV6, IpAddr::V6(parse_v6(addr)), 64),
                PrimaryEndpointBehavior::CanBePrimaryEndpoint,
                AddressKind::Permanent,
                AddressConfigType::Static,
                deprecated,
            )
            .unwrap();
    }

    fn select_v6(test: &TableTest, remote: &str) -> IpAddr {
        let selected = test
            .nic
            .primary_endpoint(
                NetworkProtocolNumber::IPV6,
                Some(IpAddr::V6(parse_v6(remote))),
            )
            .unwrap();
        let addr = selected.addr();
        drop(selected);
        addr
    }

    #[test]
    fn source_selection_prefers_matching_scope_and_freshness() {
        let test = table_setup(|options| {
            options.ndp_configs.dup_addr_detect_transmits = 0;
        });
        test.nic.enable().unwrap();

        add_v6(&test, "fe80::1", false);
        add_v6(&test, "2001:db8::2", true);
        add_v6(&test, "2001:db8::3", false);

        // Global remote: the link-local source has insufficient scope
        // and the deprecated global loses to the fresh one.
        assert_eq!(select_v6(&test, "2001:db8::1"), IpAddr::V6(parse_v6("2001:db8::3")));

        // Rule 1: an exact match wins even while deprecated.
        assert_eq!(select_v6(&test, "2001:db8::2"), IpAddr::V6(parse_v6("2001:db8::2")));

        // Link-local remote: the smallest scope covering it wins.
        assert_eq!(select_v6(&test, "fe80::99"), IpAddr::V6(parse_v6("fe80::1")));
    }

    #[test]
    fn address_range_synthesizes_temporaries() {
        let test = table_setup(|_| {});
        assert!(test.nic.get_ref(NetworkProtocolNumber::IPV4, ADDR).is_none());

        let subnet = SubnetEither::V4(Subnet::new(Ipv4Addr::new([1, 2, 3, 0]), 24).unwrap());
        test.nic.add_address_range(subnet.clone());

        let guard = test.nic.get_ref(NetworkProtocolNumber::IPV4, ADDR).unwrap();
        assert_eq!(guard.get_kind(), AddressKind::Temporary);
        drop(guard);

        // The subnet's network and broadcast addresses are excluded.
        assert!(test
            .nic
            .get_ref(NetworkProtocolNumber::IPV4, IpAddr::V4(Ipv4Addr::new([1, 2, 3, 0])))
            .is_none());
        assert!(test
            .nic
            .get_ref(NetworkProtocolNumber::IPV4, IpAddr::V4(Ipv4Addr::new([1, 2, 3, 255])))
            .is_none());

        assert!(test.nic.address_ranges().contains(&subnet));
        test.nic.remove_address_range(subnet.clone());
        assert!(!test.nic.address_ranges().contains(&subnet));
    }

    #[test]
    fn force_spoofing_synthesizes_regardless_of_flags() {
        let test = table_setup(|_| {});
        assert!(test.nic.get_ref(NetworkProtocolNumber::IPV4, ADDR).is_none());

        let guard = test
            .nic
            .get_ref_or_create_temp(
                NetworkProtocolNumber::IPV4,
                ADDR,
                PrimaryEndpointBehavior::CanBePrimaryEndpoint,
                GetRefBehavior::ForceSpoofing,
            )
            .unwrap();
        assert_eq!(guard.get_kind(), AddressKind::Temporary);

        // A cloned reference keeps the cell alive on its own.
        let second = guard.clone();
        drop(guard);
        assert!(test.nic.lookup(ADDR).is_some());
        drop(second);
        assert!(test.nic.lookup(ADDR).is_none());
    }

    #[test]
    fn address_ranges_include_host_subnets() {
        let test = table_setup(|_| {});
        test.nic
            .add_address(
                pa(NetworkProtocolNumber::IPV4, ADDR, 24),
                PrimaryEndpointBehavior::CanBePrimaryEndpoint,
            )
            .unwrap();
        let IpAddr::V4(host) = ADDR else { unreachable!() };
        let host_subnet = SubnetEither::V4(Subnet::new(host, 32).unwrap());
        assert!(test.nic.address_ranges().contains(&host_subnet));
    }
}
