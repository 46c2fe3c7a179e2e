// Copyright 2024 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Neighbor Discovery state owned by an interface.
//!
//! This module keeps the bookkeeping side of NDP: which tentative
//! addresses are undergoing Duplicate Address Detection, which routers
//! and on-link prefixes have been discovered, which addresses were
//! generated by SLAAC, and whether router solicitation is in progress.
//! Timers live outside the interface layer; the external timer
//! machinery drives DAD and router solicitation through
//! [`Nic::handle_dad_timer`] and
//! [`Nic::handle_router_solicitation_timer`].

use core::time::Duration;
use std::collections::HashMap;
use std::sync::Arc;

use net_types::ip::{IpAddr, Ipv6, Ipv6Addr, Subnet};
use net_types::{MulticastAddr, UnicastAddr, Witness as _};
use tracing::{debug, trace};

use crate::device::addresses::{
    AddressConfigType, AddressEndpoint, AddressKind, PrimaryEndpointBehavior,
};
use crate::device::{Nic, NicState};
use crate::error::NicError;
use crate::types::{AddressWithPrefix, NetworkProtocolNumber, NicId, ProtocolAddress};

/// The default value for *RetransTimer* as defined in RFC 4861 section
/// 10.
const RETRANSMIT_TIMER_DEFAULT: Duration = Duration::from_secs(1);

/// The default `DupAddrDetectTransmits` value from RFC 4862 section
/// 5.1.
const DUP_ADDR_DETECT_TRANSMITS_DEFAULT: u8 = 1;

/// The default `MAX_RTR_SOLICITATIONS` value from RFC 4861 section 10.
const MAX_ROUTER_SOLICITATIONS_DEFAULT: u8 = 3;

/// The maximum number of discovered default routers retained, as
/// recommended by RFC 4861 section 6.3.4.
const MAX_DISCOVERED_DEFAULT_ROUTERS: usize = 10;

/// The maximum number of discovered on-link prefixes retained.
const MAX_DISCOVERED_ON_LINK_PREFIXES: usize = 10;

/// A lifetime that may be forever/infinite.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Lifetime {
    /// A finite lifetime.
    Finite(Duration),
    /// An infinite lifetime.
    Infinite,
}

/// NDP behavior knobs for an interface.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NdpConfigurations {
    /// The number of Neighbor Solicitations sent before a tentative
    /// address is considered unique. Zero disables DAD: addresses are
    /// bound immediately.
    pub dup_addr_detect_transmits: u8,
    /// The time between DAD transmissions and between router
    /// solicitations.
    pub retransmit_timer: Duration,
    /// Whether Router Advertisements are processed at all.
    pub handle_ras: bool,
    /// Whether default routers are discovered from RAs.
    pub discover_default_routers: bool,
    /// Whether on-link prefixes are discovered from RAs.
    pub discover_on_link_prefixes: bool,
    /// Whether global addresses are auto-generated from autonomous
    /// prefixes in RAs.
    pub auto_gen_global_addresses: bool,
    /// The number of Router Solicitations sent when the interface
    /// becomes a host. Zero disables solicitation.
    pub max_router_solicitations: u8,
}

impl Default for NdpConfigurations {
    fn default() -> Self {
        Self {
            dup_addr_detect_transmits: DUP_ADDR_DETECT_TRANSMITS_DEFAULT,
            retransmit_timer: RETRANSMIT_TIMER_DEFAULT,
            handle_ras: true,
            discover_default_routers: true,
            discover_on_link_prefixes: true,
            auto_gen_global_addresses: false,
            max_router_solicitations: MAX_ROUTER_SOLICITATIONS_DEFAULT,
        }
    }
}

impl NdpConfigurations {
    /// Replaces invalid values with defaults. A retransmit timer below
    /// the protocol minimum of 1s is reset.
    pub fn validate(&mut self) {
        if self.retransmit_timer < RETRANSMIT_TIMER_DEFAULT {
            self.retransmit_timer = RETRANSMIT_TIMER_DEFAULT;
        }
    }
}

/// A Router Advertisement, as parsed by the ICMPv6 machinery.
#[derive(Clone, Debug)]
pub struct RouterAdvertisement {
    /// How long the sender is willing to be a default router. Zero
    /// means it is not one.
    pub router_lifetime: Duration,
    /// Prefix Information options carried by the advertisement.
    pub prefixes: Vec<PrefixInformation>,
}

/// A Prefix Information option from a Router Advertisement.
#[derive(Copy, Clone, Debug)]
pub struct PrefixInformation {
    /// The advertised prefix.
    pub prefix: Subnet<Ipv6Addr>,
    /// Whether the prefix is on-link.
    pub on_link: bool,
    /// Whether the prefix may be used for stateless address
    /// autoconfiguration.
    pub autonomous: bool,
    /// How long addresses from this prefix remain preferred.
    pub preferred_lifetime: Lifetime,
    /// How long the prefix (and addresses from it) remain valid.
    pub valid_lifetime: Lifetime,
}

/// Receives NDP events from interfaces.
///
/// Methods are invoked with the interface lease held; implementations
/// must not call back into interface administration.
pub trait NdpDispatcher: Send + Sync {
    /// DAD completed (`resolved` true) or was abandoned/failed
    /// (`resolved` false) for `addr` on `nic`.
    fn on_duplicate_address_detection_status(
        &self,
        nic: NicId,
        addr: UnicastAddr<Ipv6Addr>,
        resolved: bool,
    ) {
        let _ = (nic, addr, resolved);
    }

    /// A new default router was discovered.
    fn on_default_router_discovered(&self, nic: NicId, addr: Ipv6Addr) {
        let _ = (nic, addr);
    }

    /// A previously discovered default router was invalidated.
    fn on_default_router_invalidated(&self, nic: NicId, addr: Ipv6Addr) {
        let _ = (nic, addr);
    }

    /// A new on-link prefix was discovered.
    fn on_on_link_prefix_discovered(&self, nic: NicId, prefix: Subnet<Ipv6Addr>) {
        let _ = (nic, prefix);
    }

    /// A previously discovered on-link prefix was invalidated.
    fn on_on_link_prefix_invalidated(&self, nic: NicId, prefix: Subnet<Ipv6Addr>) {
        let _ = (nic, prefix);
    }

    /// An address was generated by SLAAC.
    fn on_auto_gen_address(&self, nic: NicId, addr: AddressWithPrefix) {
        let _ = (nic, addr);
    }

    /// A SLAAC-generated address was invalidated.
    fn on_auto_gen_address_invalidated(&self, nic: NicId, addr: AddressWithPrefix) {
        let _ = (nic, addr);
    }
}

/// What the external DAD timer machinery should do next for an
/// address.
#[derive(Debug, Eq, PartialEq)]
pub enum DadOutcome {
    /// Send one more Neighbor Solicitation to the given solicited-node
    /// group and tick again after the retransmit timer.
    Transmit {
        /// The solicited-node multicast group to probe.
        dst: MulticastAddr<Ipv6Addr>,
        /// Transmissions still outstanding after this one.
        remaining: u8,
    },
    /// DAD resolved; the address is now permanently bound.
    Resolved,
}

#[derive(Debug)]
struct DadState {
    transmits_remaining: u8,
}

#[derive(Debug)]
struct DefaultRouterState {
    invalidation_lifetime: Duration,
}

#[derive(Debug)]
struct OnLinkPrefixState {
    invalidation_lifetime: Lifetime,
}

#[derive(Debug)]
struct AutoGenAddressState {
    #[allow(dead_code)]
    preferred_lifetime: Lifetime,
    #[allow(dead_code)]
    valid_lifetime: Lifetime,
}

/// Per-interface NDP bookkeeping; lives under the interface lease.
pub(crate) struct NdpState {
    configs: NdpConfigurations,
    dad: HashMap<UnicastAddr<Ipv6Addr>, DadState>,
    default_routers: HashMap<Ipv6Addr, DefaultRouterState>,
    on_link_prefixes: HashMap<Subnet<Ipv6Addr>, OnLinkPrefixState>,
    auto_gen_addresses: HashMap<UnicastAddr<Ipv6Addr>, AutoGenAddressState>,
    soliciting_routers: bool,
    router_solicitations_remaining: u8,
}

impl NdpState {
    pub(crate) fn new(configs: NdpConfigurations) -> Self {
        Self {
            configs,
            dad: HashMap::new(),
            default_routers: HashMap::new(),
            on_link_prefixes: HashMap::new(),
            auto_gen_addresses: HashMap::new(),
            soliciting_routers: false,
            router_solicitations_remaining: 0,
        }
    }
}

fn eui64_interface_identifier(mac: net_types::ethernet::Mac) -> [u8; 8] {
    let bytes = mac.bytes();
    [
        bytes[0] ^ 0x02,
        bytes[1],
        bytes[2],
        0xff,
        0xfe,
        bytes[3],
        bytes[4],
        bytes[5],
    ]
}

impl Nic {
    fn notify_ndp<F: FnOnce(&dyn NdpDispatcher)>(&self, cb: F) {
        if let Some(dispatcher) =
            self.stack.upgrade().and_then(|stack| stack.ndp_dispatcher())
        {
            cb(&*dispatcher);
        }
    }

    /// Replaces the interface's NDP configuration, fixing invalid
    /// values.
    pub fn set_ndp_configs(&self, mut configs: NdpConfigurations) {
        configs.validate();
        self.state.write().ndp.configs = configs;
    }

    /// Whether `addr` is bound to the interface and still tentative.
    pub fn is_addr_tentative(&self, addr: UnicastAddr<Ipv6Addr>) -> bool {
        let key = IpAddr::from(addr.get());
        let state = self.state.read();
        state
            .endpoints
            .get(&key)
            .is_some_and(|entry| entry.get_kind() == AddressKind::PermanentTentative)
    }

    pub(crate) fn start_duplicate_address_detection_locked(
        &self,
        state: &mut NicState,
        addr: UnicastAddr<Ipv6Addr>,
        entry: &Arc<AddressEndpoint>,
    ) -> Result<(), NicError> {
        assert_eq!(
            entry.get_kind(),
            AddressKind::PermanentTentative,
            "attempted to start DAD on a non-tentative address"
        );

        let transmits = state.ndp.configs.dup_addr_detect_transmits;
        if transmits == 0 {
            // DAD is disabled; the address binds immediately.
            entry.set_kind(AddressKind::Permanent);
            self.notify_ndp(|d| d.on_duplicate_address_detection_status(self.id, addr, true));
            return Ok(());
        }

        trace!("nic {}: starting DAD for {} ({} transmits)", self.id, addr, transmits);
        let _ = state.ndp.dad.insert(addr, DadState { transmits_remaining: transmits });
        Ok(())
    }

    pub(crate) fn stop_duplicate_address_detection_locked(
        &self,
        state: &mut NicState,
        addr: UnicastAddr<Ipv6Addr>,
    ) {
        if state.ndp.dad.remove(&addr).is_some() {
            self.notify_ndp(|d| d.on_duplicate_address_detection_status(self.id, addr, false));
        }
    }

    /// Advances Duplicate Address Detection for `addr` by one timer
    /// tick. The external timer machinery calls this every retransmit
    /// interval, transmits the returned solicitation if one is due, and
    /// stops ticking once DAD resolves.
    pub fn handle_dad_timer(&self, addr: UnicastAddr<Ipv6Addr>) -> Result<DadOutcome, NicError> {
        let key = IpAddr::from(addr.get());
        let mut state = self.state.write();
        let state = &mut *state;

        let entry = state.endpoints.get(&key).cloned().ok_or(NicError::BadAddress)?;
        if entry.get_kind() != AddressKind::PermanentTentative {
            return Err(NicError::InvalidEndpointState);
        }
        let remaining = state
            .ndp
            .dad
            .get(&addr)
            .map(|dad| dad.transmits_remaining)
            .ok_or(NicError::BadAddress)?;

        if remaining == 0 {
            let _ = state.ndp.dad.remove(&addr);
            entry.set_kind(AddressKind::Permanent);
            trace!("nic {}: DAD resolved for {}", self.id, addr);
            self.notify_ndp(|d| d.on_duplicate_address_detection_status(self.id, addr, true));
            return Ok(DadOutcome::Resolved);
        }

        let remaining = remaining - 1;
        if let Some(dad) = state.ndp.dad.get_mut(&addr) {
            dad.transmits_remaining = remaining;
        }
        Ok(DadOutcome::Transmit { dst: addr.get().to_solicited_node_address(), remaining })
    }

    /// Informs the interface that `addr` was found to be owned by
    /// another node on the link. The tentative address is removed.
    pub fn dup_tentative_addr_detected(
        &self,
        addr: UnicastAddr<Ipv6Addr>,
    ) -> Result<(), NicError> {
        let key = IpAddr::from(addr.get());
        let mut state = self.state.write();
        let entry = state.endpoints.get(&key).ok_or(NicError::BadAddress)?;
        if entry.get_kind() != AddressKind::PermanentTentative {
            return Err(NicError::InvalidEndpointState);
        }
        debug!("nic {}: duplicate address detected for tentative {}", self.id, addr);
        self.remove_permanent_address_locked(&mut state, key)
    }

    /// Generates an address for `prefix` by stateless address
    /// autoconfiguration and adds it as a SLAAC address.
    pub(crate) fn do_slaac_locked(
        &self,
        state: &mut NicState,
        prefix: Subnet<Ipv6Addr>,
        preferred_lifetime: Lifetime,
        valid_lifetime: Lifetime,
    ) {
        // The EUI-64 interface identifier fills the low 64 bits, so only
        // 64-bit prefixes can be autoconfigured (RFC 4862 section 5.5.3).
        if prefix.prefix() != 64 {
            debug!("nic {}: cannot autoconfigure from non-/64 prefix {:?}", self.id, prefix);
            return;
        }

        let mut bytes = prefix.network().ipv6_bytes();
        bytes[8..].copy_from_slice(&eui64_interface_identifier(self.link.link_address()));
        let addr = Ipv6Addr::from_bytes(bytes);
        let Some(unicast) = UnicastAddr::new(addr) else {
            debug!("nic {}: autoconfigured address {} is not unicast", self.id, addr);
            return;
        };

        let address_with_prefix =
            AddressWithPrefix { addr: addr.into(), prefix_len: prefix.prefix() };
        match self.add_address_locked(
            state,
            ProtocolAddress {
                protocol: NetworkProtocolNumber::IPV6,
                address_with_prefix,
            },
            PrimaryEndpointBehavior::FirstPrimaryEndpoint,
            AddressKind::Permanent,
            AddressConfigType::Slaac,
            false,
        ) {
            Ok(_) => {
                trace!("nic {}: autoconfigured {}", self.id, address_with_prefix);
                let _ = state
                    .ndp
                    .auto_gen_addresses
                    .insert(unicast, AutoGenAddressState { preferred_lifetime, valid_lifetime });
                self.notify_ndp(|d| d.on_auto_gen_address(self.id, address_with_prefix));
            }
            Err(err) => {
                debug!("nic {}: failed to autoconfigure {}: {}", self.id, addr, err);
            }
        }
    }

    pub(crate) fn cleanup_auto_gen_addr_resources_and_notify_locked(
        &self,
        state: &mut NicState,
        addr: UnicastAddr<Ipv6Addr>,
    ) {
        if state.ndp.auto_gen_addresses.remove(&addr).is_some() {
            // SLAAC only configures from 64-bit prefixes.
            let address_with_prefix =
                AddressWithPrefix { addr: addr.get().into(), prefix_len: 64 };
            self.notify_ndp(|d| d.on_auto_gen_address_invalidated(self.id, address_with_prefix));
        }
    }

    /// Discards host-only NDP state: discovered default routers,
    /// on-link prefixes and SLAAC addresses. Used when the node becomes
    /// a router, which learns none of these from the network.
    pub(crate) fn cleanup_host_only_state_locked(&self, state: &mut NicState) {
        let addrs: Vec<_> = state.ndp.auto_gen_addresses.keys().copied().collect();
        for addr in addrs {
            if let Err(err) =
                self.remove_permanent_address_locked(state, addr.get().into())
            {
                debug!("nic {}: failed to invalidate SLAAC address {}: {}", self.id, addr, err);
            }
        }

        for (router, _) in state.ndp.default_routers.drain() {
            self.notify_ndp(|d| d.on_default_router_invalidated(self.id, router));
        }
        for (prefix, _) in state.ndp.on_link_prefixes.drain() {
            self.notify_ndp(|d| d.on_on_link_prefix_invalidated(self.id, prefix));
        }
    }

    pub(crate) fn start_soliciting_routers_locked(&self, state: &mut NicState) {
        let max = state.ndp.configs.max_router_solicitations;
        if max == 0 || state.ndp.soliciting_routers {
            return;
        }
        state.ndp.soliciting_routers = true;
        state.ndp.router_solicitations_remaining = max;
    }

    pub(crate) fn stop_soliciting_routers_locked(&self, state: &mut NicState) {
        state.ndp.soliciting_routers = false;
        state.ndp.router_solicitations_remaining = 0;
    }

    /// Whether router solicitation is in progress.
    pub fn is_soliciting_routers(&self) -> bool {
        self.state.read().ndp.soliciting_routers
    }

    /// Advances router solicitation by one timer tick. Returns whether
    /// a Router Solicitation should be sent now; `false` means the
    /// solicitation budget is exhausted and ticking should stop.
    pub fn handle_router_solicitation_timer(&self) -> bool {
        let mut state = self.state.write();
        if !state.ndp.soliciting_routers {
            return false;
        }
        if state.ndp.router_solicitations_remaining == 0 {
            state.ndp.soliciting_routers = false;
            return false;
        }
        state.ndp.router_solicitations_remaining -= 1;
        true
    }

    /// Handles a Router Advertisement received from `src` on this
    /// interface.
    pub fn handle_ndp_ra(&self, src: Ipv6Addr, ra: &RouterAdvertisement) {
        let stack = self.stack();
        let mut state = self.state.write();
        let state = &mut *state;

        // Routers do not learn from RAs.
        if stack.forwarding() || !state.ndp.configs.handle_ras {
            return;
        }

        if state.ndp.configs.discover_default_routers {
            let lifetime = ra.router_lifetime;
            if state.ndp.default_routers.contains_key(&src) {
                if lifetime.is_zero() {
                    let _ = state.ndp.default_routers.remove(&src);
                    self.notify_ndp(|d| d.on_default_router_invalidated(self.id, src));
                } else if let Some(router) = state.ndp.default_routers.get_mut(&src) {
                    router.invalidation_lifetime = lifetime;
                }
            } else if !lifetime.is_zero()
                && state.ndp.default_routers.len() < MAX_DISCOVERED_DEFAULT_ROUTERS
            {
                let _ = state
                    .ndp
                    .default_routers
                    .insert(src, DefaultRouterState { invalidation_lifetime: lifetime });
                self.notify_ndp(|d| d.on_default_router_discovered(self.id, src));
            }
        }

        for pi in &ra.prefixes {
            if pi.prefix == Ipv6::LINK_LOCAL_UNICAST_SUBNET {
                // The link-local prefix is always on-link and never
                // autoconfigured from RAs (RFC 4861 section 6.3.4).
                continue;
            }

            if state.ndp.configs.discover_on_link_prefixes && pi.on_link {
                let zero_lifetime = pi.valid_lifetime == Lifetime::Finite(Duration::ZERO);
                if state.ndp.on_link_prefixes.contains_key(&pi.prefix) {
                    if zero_lifetime {
                        let _ = state.ndp.on_link_prefixes.remove(&pi.prefix);
                        self.notify_ndp(|d| d.on_on_link_prefix_invalidated(self.id, pi.prefix));
                    } else if let Some(prefix_state) =
                        state.ndp.on_link_prefixes.get_mut(&pi.prefix)
                    {
                        prefix_state.invalidation_lifetime = pi.valid_lifetime;
                    }
                } else if !zero_lifetime
                    && state.ndp.on_link_prefixes.len() < MAX_DISCOVERED_ON_LINK_PREFIXES
                {
                    let _ = state.ndp.on_link_prefixes.insert(
                        pi.prefix,
                        OnLinkPrefixState { invalidation_lifetime: pi.valid_lifetime },
                    );
                    self.notify_ndp(|d| d.on_on_link_prefix_discovered(self.id, pi.prefix));
                }
            }

            if state.ndp.configs.auto_gen_global_addresses && pi.autonomous {
                if pi.valid_lifetime == Lifetime::Finite(Duration::ZERO) {
                    continue;
                }
                if pi.preferred_lifetime > pi.valid_lifetime {
                    continue;
                }
                self.do_slaac_locked(state, pi.prefix, pi.preferred_lifetime, pi.valid_lifetime);
            }
        }
    }
}
