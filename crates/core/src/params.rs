// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Storage sizes declared for indexed parameters; arrays and FIFOs without
//! an explicit count derive their element count from here.

use crate::operation::{IDX_EMPTY, IDX_OUT_OF_BOUNDS};
use crate::{CosimError, CosimResult};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct ParamStore {
    sizes: BTreeMap<u8, u64>,
}

impl ParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the storage size of parameter `index` unless one is known.
    pub fn alloc(&mut self, index: u8, bytes: u64) {
        self.sizes.entry(index).or_insert_with(|| {
            tracing::info!("Memory size for parameter {} set to {} bytes", index, bytes);
            bytes
        });
    }

    /// Override the storage size of parameter `index`.
    pub fn set_size(&mut self, index: u8, bytes: u64) {
        tracing::info!("Memory size for parameter {} set to {} bytes", index, bytes);
        self.sizes.insert(index, bytes);
    }

    pub fn size(&self, index: u8) -> CosimResult<u64> {
        if self.sizes.is_empty() {
            return Err(CosimError::Param {
                index: IDX_EMPTY,
                reason: format!("size of {} requested with no parameters allocated", index),
            });
        }
        self.sizes.get(&index).copied().ok_or_else(|| CosimError::Param {
            index: IDX_OUT_OF_BOUNDS,
            reason: format!("parameter {} has no size", index),
        })
    }

    /// Element count for an array/FIFO parameter of `align`-byte elements.
    pub fn element_count(&self, index: u8, align: u16) -> CosimResult<usize> {
        let bytes = self.size(index)?;
        usize::try_from(bytes / u64::from(align.max(1))).map_err(|_| CosimError::Param {
            index,
            reason: format!("{} bytes is not addressable", bytes),
        })
    }
}
