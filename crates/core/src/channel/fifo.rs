// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Bounded circular channel.
//!
//! With a window `W` configured, at most `W` elements are visible at once:
//! available-read is the occupied count and available-write is `W` minus that,
//! so the two always sum to `W`. Without a window, `W` is the capacity.
//! Consumed elements free their slot again; the consumed counter is
//! bookkeeping only and never narrows the window.

use super::{byte_len, clamp_count, copy_bits, Interface, InterfaceError, InterfaceResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FifoChannel {
    bitsize: u16,
    align: u16,
    capacity: usize,
    window: Option<usize>,
    slots: Vec<u8>,
    head: usize,
    len: usize,
    consumed: u64,
}

impl serde::Serialize for FifoChannel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("FifoChannel", 6)?;
        s.serialize_field("bitsize", &self.bitsize)?;
        s.serialize_field("capacity", &self.capacity)?;
        s.serialize_field("window", &self.window)?;
        s.serialize_field("consumed", &self.consumed)?;
        s.serialize_field("occupied", &self.len)?;
        s.serialize_field("pending", &self.pending())?;
        s.end()
    }
}

impl FifoChannel {
    /// `window` values above `capacity` are clamped.
    pub fn new(bitsize: u16, align: u16, capacity: usize, window: Option<usize>) -> Self {
        let align = align.max(1);
        Self {
            bitsize,
            align,
            capacity,
            window: window.map(|w| w.min(capacity)),
            slots: vec![0u8; capacity * usize::from(align)],
            head: 0,
            len: 0,
            consumed: 0,
        }
    }

    /// FIFO pre-loaded with `initial`, split into `align`-byte elements.
    pub fn with_data(
        bitsize: u16,
        align: u16,
        capacity: usize,
        window: Option<usize>,
        initial: &[u8],
    ) -> Self {
        let mut fifo = Self::new(bitsize, align, capacity, window);
        for chunk in initial.chunks(usize::from(fifo.align)) {
            if fifo.push(chunk, fifo.bitsize).is_err() {
                tracing::warn!("Initial FIFO data exceeds {} elements, truncated", fifo.limit());
                break;
            }
        }
        fifo
    }

    fn stride(&self) -> usize {
        usize::from(self.align)
    }

    fn limit(&self) -> usize {
        self.window.unwrap_or(self.capacity)
    }

    fn slot(&self, pos: usize) -> std::ops::Range<usize> {
        let start = (pos % self.capacity.max(1)) * self.stride();
        start..start + self.stride()
    }

    fn access_len(&self, bitsize: u16) -> usize {
        byte_len(bitsize.min(self.bitsize)).min(self.stride())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn window(&self) -> Option<usize> {
        self.window
    }

    /// Total elements consumed since creation.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Append one element, committing it.
    pub fn push(&mut self, data: &[u8], bitsize: u16) -> InterfaceResult {
        self.write(data, bitsize, 0, true)
    }

    /// Remove the front element into `buf`.
    pub fn pop(&mut self, buf: &mut [u8], bitsize: u16) -> InterfaceResult {
        self.read(buf, bitsize, 0, true)
    }

    /// Pending elements, front first.
    pub fn pending(&self) -> Vec<Vec<u8>> {
        (0..self.len)
            .map(|i| self.slots[self.slot(self.head + i)].to_vec())
            .collect()
    }
}

impl Interface for FifoChannel {
    fn read(&mut self, buf: &mut [u8], bitsize: u16, _addr: u64, shift: bool) -> InterfaceResult {
        if self.len == 0 {
            return Err(InterfaceError::Empty);
        }
        let n = self.access_len(bitsize).min(buf.len());
        let start = self.slot(self.head).start;
        buf[..n].copy_from_slice(&self.slots[start..start + n]);
        if shift {
            self.head = (self.head + 1) % self.capacity;
            self.len -= 1;
            self.consumed += 1;
        }
        Ok(self.available_read())
    }

    /// With `shift` the element is appended. Without it the newest element
    /// is overwritten in place, which needs no capacity but fails with EMPTY
    /// when there is nothing to overwrite.
    fn write(&mut self, buf: &[u8], bitsize: u16, _addr: u64, shift: bool) -> InterfaceResult {
        let pos = if shift {
            if self.len >= self.limit() {
                return Err(InterfaceError::Full);
            }
            self.head + self.len
        } else {
            if self.len == 0 {
                return Err(InterfaceError::Empty);
            }
            self.head + self.len - 1
        };
        let bits = bitsize.min(self.bitsize);
        let range = self.slot(pos);
        copy_bits(&mut self.slots[range], buf, bits);
        if shift {
            self.len += 1;
        }
        Ok(self.available_write())
    }

    fn available_read(&self) -> u32 {
        clamp_count(self.len)
    }

    fn available_write(&self) -> u32 {
        clamp_count(self.limit().saturating_sub(self.len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn elem(v: u8) -> [u8; 1] {
        [v]
    }

    #[test]
    fn test_fifo_order_and_bounds() {
        let mut fifo = FifoChannel::new(8, 1, 4, None);
        for v in 1..=4u8 {
            assert_eq!(fifo.push(&elem(v), 8), Ok(u32::from(4 - v)));
        }
        assert_eq!(fifo.push(&elem(5), 8), Err(InterfaceError::Full));

        let mut buf = [0u8; 1];
        for v in 1..=4u8 {
            fifo.pop(&mut buf, 8).unwrap();
            assert_eq!(buf[0], v);
        }
        assert_eq!(fifo.pop(&mut buf, 8), Err(InterfaceError::Empty));
        assert_eq!(fifo.consumed(), 4);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut fifo = FifoChannel::with_data(8, 1, 2, None, &[9]);
        let mut buf = [0u8; 1];
        assert_eq!(fifo.read(&mut buf, 8, 0, false), Ok(1));
        assert_eq!(fifo.read(&mut buf, 8, 0, false), Ok(1));
        assert_eq!(buf[0], 9);
        assert_eq!(fifo.consumed(), 0);
    }

    #[test]
    fn test_unshifted_write_overwrites_newest_element() {
        let mut fifo = FifoChannel::new(8, 1, 2, None);
        assert_eq!(fifo.write(&[1], 8, 0, false), Err(InterfaceError::Empty));
        fifo.push(&elem(1), 8).unwrap();
        fifo.push(&elem(2), 8).unwrap();
        assert_eq!(fifo.write(&[7], 8, 0, false), Ok(0));
        assert_eq!(fifo.pending(), vec![vec![1], vec![7]]);

        let mut buf = [0u8; 1];
        fifo.pop(&mut buf, 8).unwrap();
        assert_eq!(buf[0], 1);
        fifo.pop(&mut buf, 8).unwrap();
        assert_eq!(buf[0], 7);
    }

    #[test]
    fn test_overwrite_on_full_fifo_needs_no_capacity() {
        let mut fifo = FifoChannel::with_data(8, 1, 1, None, &[4]);
        assert_eq!(fifo.push(&elem(5), 8), Err(InterfaceError::Full));
        assert_eq!(fifo.write(&[6], 8, 0, false), Ok(0));
        let mut buf = [0u8; 1];
        fifo.pop(&mut buf, 8).unwrap();
        assert_eq!(buf[0], 6);
    }

    #[test]
    fn test_consumed_elements_do_not_shrink_window() {
        let mut fifo = FifoChannel::new(8, 1, 4, Some(2));
        let mut buf = [0u8; 1];
        for v in 0..10u8 {
            fifo.push(&elem(v), 8).unwrap();
            fifo.pop(&mut buf, 8).unwrap();
        }
        assert_eq!(fifo.consumed(), 10);
        assert_eq!(fifo.available_read(), 0);
        assert_eq!(fifo.available_write(), 2);
        fifo.push(&elem(1), 8).unwrap();
        fifo.push(&elem(2), 8).unwrap();
        assert_eq!(fifo.available_read() + fifo.available_write(), 2);
    }

    #[test]
    fn test_window_limits_visibility() {
        let mut fifo = FifoChannel::new(8, 1, 8, Some(3));
        for v in 0..3u8 {
            fifo.push(&elem(v), 8).unwrap();
        }
        assert_eq!(fifo.available_write(), 0);
        assert_eq!(fifo.push(&elem(9), 8), Err(InterfaceError::Full));
        let mut buf = [0u8; 1];
        fifo.pop(&mut buf, 8).unwrap();
        assert_eq!(fifo.available_read(), 2);
        assert_eq!(fifo.available_write(), 1);
    }

    #[test]
    fn test_wraparound_keeps_order() {
        let mut fifo = FifoChannel::new(16, 2, 3, None);
        let mut buf = [0u8; 2];
        for round in 0..5u16 {
            fifo.push(&round.to_le_bytes(), 16).unwrap();
            fifo.push(&(round + 100).to_le_bytes(), 16).unwrap();
            fifo.pop(&mut buf, 16).unwrap();
            assert_eq!(u16::from_le_bytes(buf), round);
            fifo.pop(&mut buf, 16).unwrap();
            assert_eq!(u16::from_le_bytes(buf), round + 100);
        }
    }

    #[derive(Debug, Clone)]
    enum Step {
        Push(u8),
        Pop,
        Peek,
        Overwrite(u8),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            any::<u8>().prop_map(Step::Push),
            Just(Step::Pop),
            Just(Step::Peek),
            any::<u8>().prop_map(Step::Overwrite),
        ]
    }

    proptest! {
        #[test]
        fn prop_capacity_invariants(
            capacity in 1usize..16,
            window in proptest::option::of(1usize..16),
            steps in proptest::collection::vec(step(), 0..64),
        ) {
            let mut fifo = FifoChannel::new(8, 1, capacity, window);
            let limit = fifo.window().unwrap_or(capacity);
            let mut model = std::collections::VecDeque::new();
            let mut buf = [0u8; 1];

            for s in steps {
                let can_write = fifo.available_write() > 0;
                let can_read = fifo.available_read() > 0;
                match s {
                    Step::Push(v) => {
                        let r = fifo.push(&[v], 8);
                        prop_assert_eq!(r.is_ok(), can_write);
                        if r.is_ok() { model.push_back(v); }
                    }
                    Step::Overwrite(v) => {
                        let r = fifo.write(&[v], 8, 0, false);
                        prop_assert_eq!(r.is_ok(), can_read);
                        if let Some(back) = model.back_mut() { *back = v; }
                    }
                    Step::Pop => {
                        let r = fifo.pop(&mut buf, 8);
                        prop_assert_eq!(r.is_ok(), can_read);
                        if r.is_ok() { prop_assert_eq!(Some(buf[0]), model.pop_front()); }
                    }
                    Step::Peek => {
                        let r = fifo.read(&mut buf, 8, 0, false);
                        prop_assert_eq!(r.is_ok(), can_read);
                        if r.is_ok() { prop_assert_eq!(Some(&buf[0]), model.front()); }
                    }
                }
                prop_assert_eq!(
                    fifo.available_read() + fifo.available_write(),
                    limit as u32
                );
                prop_assert_eq!(fifo.len(), model.len());
            }
        }
    }
}
