// Copyright 2024 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Common counter abstractions.

use core::sync::atomic::{AtomicU64, Ordering};

/// An atomic counter for packet statistics, e.g. IPv4 packets received.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Increments the counter value by 1.
    pub fn increment(&self) {
        // Use relaxed ordering since we do not use packet counter values to
        // synchronize other accesses.
        let Self(v) = self;
        let _: u64 = v.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds the provided value to the counter.
    pub fn add(&self, n: u64) {
        let Self(v) = self;
        let _: u64 = v.fetch_add(n, Ordering::Relaxed);
    }

    /// Atomically retrieves the counter value as a `u64`.
    pub fn get(&self) -> u64 {
        let Self(v) = self;
        v.load(Ordering::Relaxed)
    }
}

/// Packet and byte counts for one traffic direction.
#[derive(Debug, Default)]
pub struct DirectionCounters {
    /// Packet count.
    pub packets: Counter,
    /// Byte count.
    pub bytes: Counter,
}

impl DirectionCounters {
    /// Counts one packet of `bytes` bytes.
    pub(crate) fn count_packet(&self, bytes: u64) {
        self.packets.increment();
        self.bytes.add(bytes);
    }
}

/// Transmit and receive statistics for an interface.
#[derive(Debug, Default)]
pub struct NicCounters {
    /// Packets sent out the interface.
    pub tx: DirectionCounters,
    /// Packets received by the interface.
    pub rx: DirectionCounters,
    /// Packets that arrived while the interface was disabled.
    pub disabled_rx: DirectionCounters,
}

/// IP-layer statistics kept on the stack and incremented by interfaces.
#[derive(Debug, Default)]
pub struct IpCounters {
    /// Total IP packets received from the link layer.
    pub packets_received: Counter,
    /// Packets whose source address is local to a receiving interface.
    pub invalid_source_addresses_received: Counter,
    /// Packets dropped because no destination could accept them.
    pub invalid_destination_addresses_received: Counter,
    /// Packets that failed to be written out a link endpoint.
    pub outgoing_packet_errors: Counter,
}

/// Stack-wide statistics incremented by interfaces.
#[derive(Debug, Default)]
pub struct StackCounters {
    /// Packets received for an unregistered protocol number.
    pub unknown_protocol_rcvd_packets: Counter,
    /// Packets too short or unparseable for their protocol.
    pub malformed_rcvd_packets: Counter,
    /// IP-layer counters.
    pub ip: IpCounters,
}
