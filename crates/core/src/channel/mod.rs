// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Driver-side channels that satisfy the simulator's interface operations.

pub mod array;
pub mod fifo;
pub mod memory;
pub mod port;

pub use array::ArrayChannel;
pub use fifo::FifoChannel;
pub use memory::MemoryMap;
pub use port::PortChannel;

use bitflags::bitflags;

/// Recoverable channel outcome, carried on the wire as a negative code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[repr(i32)]
pub enum InterfaceError {
    #[error("malformed or unsupported interface request")]
    Error = -1,
    #[error("no data available")]
    Empty = -2,
    #[error("no space available")]
    Full = -3,
}

impl InterfaceError {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(Self::Error),
            -2 => Some(Self::Empty),
            -3 => Some(Self::Full),
            _ => None,
        }
    }
}

/// Remaining element count on success.
pub type InterfaceResult = Result<u32, InterfaceError>;

/// Pack a result into the payload `info` word.
pub fn encode_result(result: InterfaceResult) -> u32 {
    match result {
        Ok(n) => n.min(i32::MAX as u32),
        Err(e) => e.code() as u32,
    }
}

/// Unpack an `info` word written by [`encode_result`]. Unknown negative codes
/// read as [`InterfaceError::Error`].
pub fn decode_result(info: u32) -> InterfaceResult {
    let code = info as i32;
    if code >= 0 {
        Ok(code as u32)
    } else {
        Err(InterfaceError::from_code(code).unwrap_or(InterfaceError::Error))
    }
}

bitflags! {
    /// Availability query carried by INTERFACE_INFO.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ReportQuery: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

/// Capability set shared by every channel kind.
pub trait Interface {
    /// Copy the front (or addressed) element into `buf`. With `shift` the
    /// element is consumed.
    fn read(&mut self, buf: &mut [u8], bitsize: u16, addr: u64, shift: bool) -> InterfaceResult;

    /// Store `buf` at the back (or addressed) slot. With `shift` the write is
    /// committed, otherwise the slot is overwritten in place.
    fn write(&mut self, buf: &[u8], bitsize: u16, addr: u64, shift: bool) -> InterfaceResult;

    fn available_read(&self) -> u32;

    fn available_write(&self) -> u32;

    fn report(&self, query: u32) -> InterfaceResult {
        match ReportQuery::from_bits(query) {
            Some(q) if q == ReportQuery::READ => Ok(self.available_read()),
            Some(q) if q == ReportQuery::WRITE => Ok(self.available_write()),
            _ => Err(InterfaceError::Error),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Channel {
    Port(PortChannel),
    Array(ArrayChannel),
    Fifo(FifoChannel),
    Memory(MemoryMap),
}

impl Channel {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Channel::Port(_) => "port",
            Channel::Array(_) => "array",
            Channel::Fifo(_) => "fifo",
            Channel::Memory(_) => "memory",
        }
    }

    fn inner(&self) -> &dyn Interface {
        match self {
            Channel::Port(c) => c,
            Channel::Array(c) => c,
            Channel::Fifo(c) => c,
            Channel::Memory(c) => c,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Interface {
        match self {
            Channel::Port(c) => c,
            Channel::Array(c) => c,
            Channel::Fifo(c) => c,
            Channel::Memory(c) => c,
        }
    }

    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Interface for Channel {
    fn read(&mut self, buf: &mut [u8], bitsize: u16, addr: u64, shift: bool) -> InterfaceResult {
        self.inner_mut().read(buf, bitsize, addr, shift)
    }

    fn write(&mut self, buf: &[u8], bitsize: u16, addr: u64, shift: bool) -> InterfaceResult {
        self.inner_mut().write(buf, bitsize, addr, shift)
    }

    fn available_read(&self) -> u32 {
        self.inner().available_read()
    }

    fn available_write(&self) -> u32 {
        self.inner().available_write()
    }

    fn report(&self, query: u32) -> InterfaceResult {
        self.inner().report(query)
    }
}

/// Bytes needed for `bitsize` bits.
pub fn byte_len(bitsize: u16) -> usize {
    usize::from(bitsize).div_ceil(8)
}

/// Copy the low `bitsize` bits of `src` into `dst`, keeping the untouched
/// high bits of a trailing partial byte. Returns the bytes touched.
pub fn copy_bits(dst: &mut [u8], src: &[u8], bitsize: u16) -> usize {
    let len = byte_len(bitsize).min(dst.len()).min(src.len());
    if len == 0 {
        return 0;
    }
    let whole = usize::from(bitsize / 8).min(len);
    dst[..whole].copy_from_slice(&src[..whole]);
    let rem = bitsize % 8;
    if whole < len && rem != 0 {
        let mask = (1u8 << rem) - 1;
        dst[whole] = (dst[whole] & !mask) | (src[whole] & mask);
    }
    len
}

fn clamp_count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
