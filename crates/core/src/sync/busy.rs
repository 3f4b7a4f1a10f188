// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{IpcState, SyncBackend};
use crate::segment::RawSegment;
use crate::{CosimResult, Entity};

/// Spins on the state word. Both processes should own a core.
#[derive(Debug, Clone, Copy, Default)]
pub struct BusyWait;

impl SyncBackend for BusyWait {
    fn name(&self) -> &'static str {
        "busy"
    }

    fn wait_until(
        &self,
        seg: &RawSegment,
        _entity: Entity,
        ready: &dyn Fn(IpcState) -> bool,
    ) -> CosimResult<IpcState> {
        loop {
            let state = seg.state();
            if ready(state) {
                return Ok(state);
            }
            std::hint::spin_loop();
        }
    }

    fn notify(&self, _seg: &RawSegment, _to: Entity) -> CosimResult<()> {
        Ok(())
    }
}
