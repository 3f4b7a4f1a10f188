// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{byte_len, clamp_count, copy_bits, Interface, InterfaceError, InterfaceResult};

/// Fixed-capacity array addressed by byte offset; element `i` lives at
/// `i * align`.
///
/// Unshifted accesses are random access by address. Shifted accesses stream
/// through the visible window with a cursor: each one handles the element at
/// `consumed` and advances it, failing with EMPTY/FULL once the window is
/// exhausted. Both availability counts are `window - consumed`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ArrayChannel {
    bitsize: u16,
    align: u16,
    count: usize,
    window: Option<usize>,
    consumed: usize,
    data: Vec<u8>,
}

impl ArrayChannel {
    pub fn new(bitsize: u16, align: u16, count: usize, initial: &[u8]) -> Self {
        Self::with_window(bitsize, align, count, None, initial)
    }

    /// `window` values above `count` are clamped.
    pub fn with_window(
        bitsize: u16,
        align: u16,
        count: usize,
        window: Option<usize>,
        initial: &[u8],
    ) -> Self {
        let align = align.max(1);
        let mut data = vec![0u8; count * usize::from(align)];
        let n = initial.len().min(data.len());
        data[..n].copy_from_slice(&initial[..n]);
        Self {
            bitsize,
            align,
            count,
            window: window.map(|w| w.min(count)),
            consumed: 0,
            data,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn window(&self) -> Option<usize> {
        self.window
    }

    /// Elements streamed through shifted accesses.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Move the streaming cursor back to the first element.
    pub fn rewind(&mut self) {
        self.consumed = 0;
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn element(&self, index: usize) -> Option<&[u8]> {
        let stride = usize::from(self.align);
        self.data.get(index * stride..(index + 1) * stride)
    }

    fn remaining(&self) -> usize {
        self.window
            .unwrap_or(self.count)
            .saturating_sub(self.consumed)
    }

    fn element_range(&self, index: usize, bitsize: u16) -> std::ops::Range<usize> {
        let stride = usize::from(self.align);
        let start = index * stride;
        start..start + byte_len(bitsize.min(self.bitsize)).min(stride)
    }

    fn addressed(&self, addr: u64, bitsize: u16) -> Result<std::ops::Range<usize>, InterfaceError> {
        let index = usize::try_from(addr / u64::from(self.align)).map_err(|_| InterfaceError::Error)?;
        if index >= self.count {
            tracing::debug!(
                "Array access at {:#x} beyond {} elements",
                addr,
                self.count
            );
            return Err(InterfaceError::Error);
        }
        Ok(self.element_range(index, bitsize))
    }

    /// Element under the cursor, or `exhausted` when the window is used up.
    fn streamed(
        &self,
        bitsize: u16,
        exhausted: InterfaceError,
    ) -> Result<std::ops::Range<usize>, InterfaceError> {
        if self.remaining() == 0 {
            return Err(exhausted);
        }
        Ok(self.element_range(self.consumed, bitsize))
    }
}

impl Interface for ArrayChannel {
    fn read(&mut self, buf: &mut [u8], bitsize: u16, addr: u64, shift: bool) -> InterfaceResult {
        let range = if shift {
            self.streamed(bitsize, InterfaceError::Empty)?
        } else {
            self.addressed(addr, bitsize)?
        };
        let n = range.len().min(buf.len());
        buf[..n].copy_from_slice(&self.data[range.start..range.start + n]);
        if shift {
            self.consumed += 1;
        }
        Ok(self.available_read())
    }

    fn write(&mut self, buf: &[u8], bitsize: u16, addr: u64, shift: bool) -> InterfaceResult {
        let range = if shift {
            self.streamed(bitsize, InterfaceError::Full)?
        } else {
            self.addressed(addr, bitsize)?
        };
        copy_bits(&mut self.data[range], buf, bitsize.min(self.bitsize));
        if shift {
            self.consumed += 1;
        }
        Ok(self.available_write())
    }

    fn available_read(&self) -> u32 {
        clamp_count(self.remaining())
    }

    fn available_write(&self) -> u32 {
        clamp_count(self.remaining())
    }
}
