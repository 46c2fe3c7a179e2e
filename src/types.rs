// Copyright 2024 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Identifiers and address types shared across the interface layer.

use core::fmt::{self, Display, Formatter};

use net_types::ip::IpAddr;

/// The identifier of a network interface.
///
/// Stable for the lifetime of the interface; assigned by the caller when
/// the interface is created.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NicId(pub u64);

impl Display for NicId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let Self(id) = self;
        write!(f, "{}", id)
    }
}

/// The number of a network-layer protocol, in EtherType space.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct NetworkProtocolNumber(pub u16);

impl NetworkProtocolNumber {
    /// IPv4.
    pub const IPV4: Self = Self(0x0800);
    /// IPv6.
    pub const IPV6: Self = Self(0x86DD);
    /// The wildcard number matching every EtherType. Packet observers
    /// registered under this number see traffic of all protocols.
    pub const ETHERNET_ALL: Self = Self(0x0003);
}

impl Display for NetworkProtocolNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let Self(n) = self;
        write!(f, "{:#06x}", n)
    }
}

/// The number of a transport-layer protocol.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TransportProtocolNumber(pub u8);

/// An address with its subnet prefix length.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AddressWithPrefix {
    /// The address.
    pub addr: IpAddr,
    /// The length of the subnet prefix, in bits.
    pub prefix_len: u8,
}

impl Display for AddressWithPrefix {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let Self { addr, prefix_len } = self;
        write!(f, "{}/{}", addr, prefix_len)
    }
}

/// An address with prefix, qualified by its network protocol.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ProtocolAddress {
    /// The network protocol the address belongs to.
    pub protocol: NetworkProtocolNumber,
    /// The address and prefix.
    pub address_with_prefix: AddressWithPrefix,
}

/// The kind of control message delivered through
/// [`crate::device::Nic::deliver_transport_control_packet`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ControlType {
    /// The target packet could not reach its destination network.
    NetworkUnreachable,
    /// No listener on the destination port.
    PortUnreachable,
    /// The packet would have required fragmentation.
    FragmentationNeeded,
}
