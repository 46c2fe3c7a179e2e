// Copyright 2024 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The link-endpoint capability interface.

use std::sync::Arc;

use bitflags::bitflags;
use net_types::ethernet::Mac;
use thiserror::Error;

use crate::buffer::PacketBuffer;
use crate::route::Route;
use crate::types::NetworkProtocolNumber;

bitflags! {
    /// Capabilities advertised by a link endpoint.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct LinkEndpointCapabilities: u32 {
        /// Link addresses must be resolved before writing packets.
        const RESOLUTION_REQUIRED = 1 << 0;
        /// The endpoint loops written packets back to the stack.
        const LOOPBACK = 1 << 1;
        /// The endpoint computes transmit checksums.
        const TX_CHECKSUM_OFFLOAD = 1 << 2;
        /// The endpoint validates receive checksums.
        const RX_CHECKSUM_OFFLOAD = 1 << 3;
    }
}

/// Segmentation-offload parameters passed through to a capable link.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct GsoProperties {
    /// The maximum segment size to emit.
    pub mss: u16,
}

/// An error writing a packet out a link endpoint.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum LinkWriteError {
    /// The device rejected the packet.
    #[error("link endpoint rejected the packet")]
    Rejected,
    /// The device queue is full.
    #[error("link endpoint queue is full")]
    QueueFull,
}

/// The driver side of an interface.
///
/// Implementations are externally synchronized for writes; the interface
/// layer may call [`LinkEndpoint::write_packet`] from multiple threads.
pub trait LinkEndpoint: Send + Sync {
    /// The capabilities of this endpoint.
    fn capabilities(&self) -> LinkEndpointCapabilities;

    /// The link-layer address of this endpoint.
    fn link_address(&self) -> Mac;

    /// Attaches a receiver: the endpoint will begin calling
    /// [`NetworkDispatcher::deliver_network_packet`] on `dispatcher` for
    /// every inbound frame.
    fn attach(&self, dispatcher: Arc<dyn NetworkDispatcher>);

    /// Writes a packet out the link.
    fn write_packet(
        &self,
        route: &Route,
        gso: Option<&GsoProperties>,
        protocol: NetworkProtocolNumber,
        pkt: &PacketBuffer,
    ) -> Result<(), LinkWriteError>;
}

/// The receiver a link endpoint delivers inbound frames to.
pub trait NetworkDispatcher: Send + Sync {
    /// Delivers one inbound frame.
    ///
    /// `local` is the destination link address of the frame, if the link
    /// layer carries one; `None` means the frame was addressed directly
    /// to this endpoint.
    fn deliver_network_packet(
        &self,
        link: &dyn LinkEndpoint,
        remote: Option<Mac>,
        local: Option<Mac>,
        protocol: NetworkProtocolNumber,
        pkt: PacketBuffer,
    );
}
