// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Simulator address space backed by driver-owned regions.

use super::{byte_len, clamp_count, copy_bits, Interface, InterfaceError, InterfaceResult};
use crate::{CosimError, CosimResult};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Region {
    pub base: u64,
    pub data: Vec<u8>,
}

impl Region {
    fn end(&self) -> u64 {
        self.base + self.data.len() as u64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryMap {
    regions: BTreeMap<u64, Region>,
}

impl serde::Serialize for MemoryMap {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("MemoryMap", 1)?;
        s.serialize_field("regions", &self.regions.values().collect::<Vec<_>>())?;
        s.end()
    }
}

impl MemoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose `data` to the simulator at `base`. Mapping the same range again
    /// is accepted and keeps the existing contents.
    pub fn map(&mut self, base: u64, data: Vec<u8>) -> CosimResult<()> {
        if data.is_empty() {
            return Err(CosimError::Registration(format!(
                "empty memory region at {:#x}",
                base
            )));
        }
        let end = base
            .checked_add(data.len() as u64)
            .ok_or_else(|| CosimError::Registration(format!("region at {:#x} wraps", base)))?;

        if let Some(existing) = self.regions.get(&base) {
            if existing.end() == end {
                tracing::debug!("Region {:#x}..{:#x} already mapped", base, end);
                return Ok(());
            }
        }
        let overlapping = self
            .regions
            .range(..end)
            .next_back()
            .filter(|(_, r)| r.end() > base);
        if let Some((_, r)) = overlapping {
            return Err(CosimError::Registration(format!(
                "memory region {:#x}..{:#x} overlaps {:#x}..{:#x}",
                base,
                end,
                r.base,
                r.end()
            )));
        }

        tracing::info!("Mapped {} bytes at {:#x}", data.len(), base);
        self.regions.insert(base, Region { base, data });
        Ok(())
    }

    pub fn region(&self, base: u64) -> Option<&Region> {
        self.regions.get(&base)
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    fn lookup(&self, addr: u64, len: usize) -> Option<(u64, usize)> {
        let (base, region) = self.regions.range(..=addr).next_back()?;
        let offset = usize::try_from(addr - base).ok()?;
        (offset.checked_add(len)? <= region.data.len()).then_some((*base, offset))
    }

    fn report_unmapped(&self, addr: u64, len: usize) {
        let nearest = self
            .regions
            .values()
            .min_by_key(|r| {
                if addr < r.base {
                    r.base - addr
                } else {
                    addr.saturating_sub(r.end())
                }
            })
            .map(|r| format!("{:#x}..{:#x} ({} bytes)", r.base, r.end(), r.data.len()));
        tracing::error!(
            "Access to unmapped range {:#x} (+{}); nearest region is {}",
            addr,
            len,
            nearest.as_deref().unwrap_or("none")
        );
    }

    fn remaining(&self, base: u64, offset: usize, len: usize) -> u32 {
        self.regions
            .get(&base)
            .map(|r| clamp_count(r.data.len() - offset - len))
            .unwrap_or(0)
    }
}

impl Interface for MemoryMap {
    /// Returns the bytes left in the region after the accessed range.
    fn read(&mut self, buf: &mut [u8], bitsize: u16, addr: u64, _shift: bool) -> InterfaceResult {
        let len = byte_len(bitsize).min(buf.len());
        let Some((base, offset)) = self.lookup(addr, len) else {
            self.report_unmapped(addr, len);
            return Err(InterfaceError::Error);
        };
        let region = &self.regions[&base];
        buf[..len].copy_from_slice(&region.data[offset..offset + len]);
        Ok(self.remaining(base, offset, len))
    }

    fn write(&mut self, buf: &[u8], bitsize: u16, addr: u64, _shift: bool) -> InterfaceResult {
        let len = byte_len(bitsize).min(buf.len());
        let Some((base, offset)) = self.lookup(addr, len) else {
            self.report_unmapped(addr, len);
            return Err(InterfaceError::Error);
        };
        if let Some(region) = self.regions.get_mut(&base) {
            copy_bits(&mut region.data[offset..offset + len], buf, bitsize);
        }
        Ok(self.remaining(base, offset, len))
    }

    /// Total mapped bytes.
    fn available_read(&self) -> u32 {
        clamp_count(self.regions.values().map(|r| r.data.len()).sum())
    }

    fn available_write(&self) -> u32 {
        self.available_read()
    }
}
