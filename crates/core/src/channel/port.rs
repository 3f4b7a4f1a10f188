// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{byte_len, copy_bits, Interface, InterfaceResult};

/// A single scalar value. Always readable and writable.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PortChannel {
    bitsize: u16,
    value: Vec<u8>,
}

impl PortChannel {
    pub fn new(bitsize: u16, initial: &[u8]) -> Self {
        let mut value = vec![0u8; byte_len(bitsize)];
        copy_bits(&mut value, initial, bitsize);
        Self { bitsize, value }
    }

    /// Pointer-sized port holding a simulator address.
    pub fn pointer(address: u64) -> Self {
        Self::new(64, &address.to_le_bytes())
    }

    pub fn bitsize(&self) -> u16 {
        self.bitsize
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

impl Interface for PortChannel {
    fn read(&mut self, buf: &mut [u8], bitsize: u16, _addr: u64, _shift: bool) -> InterfaceResult {
        let n = byte_len(bitsize.min(self.bitsize)).min(buf.len());
        buf[..n].copy_from_slice(&self.value[..n]);
        Ok(1)
    }

    fn write(&mut self, buf: &[u8], bitsize: u16, _addr: u64, _shift: bool) -> InterfaceResult {
        copy_bits(&mut self.value, buf, bitsize.min(self.bitsize));
        Ok(1)
    }

    fn available_read(&self) -> u32 {
        1
    }

    fn available_write(&self) -> u32 {
        1
    }
}
