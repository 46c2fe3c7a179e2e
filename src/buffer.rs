// Copyright 2024 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Packet buffers.
//!
//! A received packet is carried as a vectorised view: an ordered list of
//! byte regions whose first region is guaranteed contiguous, so protocol
//! code can parse fixed-size headers without copying. An outgoing packet
//! additionally carries a prependable header region that lower layers
//! fill in back-to-front.

/// An ordered list of byte regions making up one packet's payload.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VectorisedView {
    views: Vec<Vec<u8>>,
    size: usize,
}

impl VectorisedView {
    /// Creates a view over a single contiguous region.
    pub fn from_view(view: Vec<u8>) -> Self {
        let size = view.len();
        Self { views: vec![view], size }
    }

    /// Creates a view over the given regions.
    pub fn new(views: Vec<Vec<u8>>) -> Self {
        let size = views.iter().map(Vec::len).sum();
        Self { views, size }
    }

    /// The total number of payload bytes across all regions.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The first contiguous region, or an empty slice if the view is
    /// empty.
    pub fn first(&self) -> &[u8] {
        self.views.first().map_or(&[], Vec::as_slice)
    }

    /// Removes and returns the first region.
    pub fn remove_first(&mut self) -> Vec<u8> {
        if self.views.is_empty() {
            return Vec::new();
        }
        let view = self.views.remove(0);
        self.size -= view.len();
        view
    }

    /// Copies the payload into one contiguous vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size);
        for view in &self.views {
            out.extend_from_slice(view);
        }
        out
    }
}

/// A byte region that grows from the back, so headers can be prepended
/// in layer order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Prependable {
    buf: Vec<u8>,
    start: usize,
}

impl Prependable {
    /// Creates an empty prependable region with room for `capacity`
    /// bytes of headers.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: vec![0; capacity], start: capacity }
    }

    /// Creates a prependable region whose used portion is exactly
    /// `view`; further prepends will grow in front of it.
    pub fn from_view(view: Vec<u8>) -> Self {
        Self { buf: view, start: 0 }
    }

    /// Reserves `size` bytes immediately in front of the used portion
    /// and returns them for the caller to fill.
    pub fn prepend(&mut self, size: usize) -> &mut [u8] {
        if size > self.start {
            let grow = size - self.start;
            let mut buf = vec![0; self.buf.len() + grow];
            buf[grow..].copy_from_slice(&self.buf);
            self.buf = buf;
            self.start = 0;
        } else {
            self.start -= size;
        }
        &mut self.buf[self.start..self.start + size]
    }

    /// The used portion.
    pub fn used_bytes(&self) -> &[u8] {
        &self.buf[self.start..]
    }

    /// The number of used bytes.
    pub fn used_length(&self) -> usize {
        self.buf.len() - self.start
    }
}

/// A packet moving through the interface layer.
///
/// `data` holds the payload as received or as handed down from a
/// transport; `header` holds link/network headers being assembled for
/// transmission. Cloning produces an independent copy, which is what
/// packet-observer fan-out requires.
#[derive(Clone, Debug, Default)]
pub struct PacketBuffer {
    /// The packet payload.
    pub data: VectorisedView,
    /// Headers assembled for transmission.
    pub header: Prependable,
}

impl PacketBuffer {
    /// Creates a packet whose payload is a single contiguous region.
    pub fn from_view(view: Vec<u8>) -> Self {
        Self { data: VectorisedView::from_view(view), header: Prependable::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_region_is_contiguous() {
        let vv = VectorisedView::new(vec![vec![1, 2, 3], vec![4, 5]]);
        assert_eq!(vv.first(), &[1, 2, 3]);
        assert_eq!(vv.size(), 5);
        assert_eq!(vv.to_vec(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn remove_first_shifts_regions() {
        let mut vv = VectorisedView::new(vec![vec![1, 2], vec![3]]);
        assert_eq!(vv.remove_first(), vec![1, 2]);
        assert_eq!(vv.first(), &[3]);
        assert_eq!(vv.size(), 1);
        assert_eq!(vv.remove_first(), vec![3]);
        assert_eq!(vv.remove_first(), Vec::<u8>::new());
    }

    #[test]
    fn prepend_grows_frontwards() {
        let mut p = Prependable::with_capacity(4);
        p.prepend(2).copy_from_slice(&[3, 4]);
        p.prepend(2).copy_from_slice(&[1, 2]);
        assert_eq!(p.used_bytes(), &[1, 2, 3, 4]);
        assert_eq!(p.used_length(), 4);
    }

    #[test]
    fn prepend_beyond_capacity_reallocates() {
        let mut p = Prependable::from_view(vec![9, 9]);
        p.prepend(3).copy_from_slice(&[1, 2, 3]);
        assert_eq!(p.used_bytes(), &[1, 2, 3, 9, 9]);
    }

    #[test]
    fn clone_is_independent() {
        let pkt = PacketBuffer::from_view(vec![1, 2, 3]);
        let mut copy = pkt.clone();
        let _: Vec<u8> = copy.data.remove_first();
        assert_eq!(pkt.data.size(), 3);
        assert_eq!(copy.data.size(), 0);
    }
}
