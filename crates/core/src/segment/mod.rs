// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! The shared segment: one state word, the participants' process ids and a
//! single operation record.

mod mapped;

pub use mapped::MappedSegment;

use crate::operation::OpKind;
use crate::sync::IpcState;
use crate::wire::{self, WireOperation};
use crate::{CosimResult, Entity, Operation};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

/// Segment record as laid out in shared memory.
#[repr(C, align(8))]
pub struct RawSegment {
    handle: AtomicU32,
    proc_ids: [AtomicI32; Entity::COUNT],
    _pad: u32,
    operation: UnsafeCell<WireOperation>,
}

// SAFETY: the operation area is only touched by the participant that moved the
// handle into LOCKED (or is the reader of a REQUEST/RESPONSE addressed to it).
unsafe impl Sync for RawSegment {}

/// Bytes a backing file must provide.
pub const SEGMENT_BYTES: usize = std::mem::size_of::<RawSegment>();

impl RawSegment {
    /// A FREE segment carrying a NONE operation and no known peers.
    pub fn new() -> Self {
        Self {
            handle: AtomicU32::new(IpcState::Free as u32),
            proc_ids: [AtomicI32::new(0), AtomicI32::new(0)],
            _pad: 0,
            operation: UnsafeCell::new(WireOperation::zeroed()),
        }
    }

    pub fn state(&self) -> IpcState {
        IpcState::from_raw(self.handle.load(Ordering::Acquire))
    }

    pub fn raw_state(&self) -> u32 {
        self.handle.load(Ordering::Acquire)
    }

    pub fn store_state(&self, state: IpcState) {
        self.handle.store(state as u32, Ordering::Release);
    }

    /// Atomically move `from` to `to`. Returns the observed state on failure.
    pub fn transition(&self, from: IpcState, to: IpcState) -> Result<(), IpcState> {
        self.handle
            .compare_exchange(from as u32, to as u32, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(IpcState::from_raw)
    }

    pub fn pid(&self, entity: Entity) -> i32 {
        self.proc_ids[entity.slot()].load(Ordering::Acquire)
    }

    pub fn set_pid(&self, entity: Entity, pid: i32) {
        self.proc_ids[entity.slot()].store(pid, Ordering::Release);
    }

    pub fn load_raw(&self) -> WireOperation {
        // SAFETY: the record is plain data; ordering comes from the handle's
        // acquire load performed by the caller.
        unsafe { std::ptr::read_volatile(self.operation.get()) }
    }

    pub fn store_raw(&self, op: &WireOperation) {
        // SAFETY: see `load_raw`; the caller owns the LOCKED segment.
        unsafe { std::ptr::write_volatile(self.operation.get(), *op) }
    }

    pub fn load(&self) -> Result<Operation, u8> {
        wire::decode(&self.load_raw())
    }

    pub fn store(&self, op: &Operation) {
        self.store_raw(&wire::encode(op));
    }

    pub fn snapshot(&self) -> SegmentSnapshot {
        let raw = self.load_raw();
        SegmentSnapshot {
            state: self.state(),
            raw_state: self.raw_state(),
            sim_pid: self.pid(Entity::Sim),
            driver_pid: self.pid(Entity::Driver),
            op_kind: OpKind::from_u8(raw.kind),
            raw_op_kind: raw.kind,
        }
    }
}

impl Default for RawSegment {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RawSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawSegment")
            .field("state", &self.state())
            .field("sim_pid", &self.pid(Entity::Sim))
            .field("driver_pid", &self.pid(Entity::Driver))
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of a segment, used by the `inspect` command.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SegmentSnapshot {
    pub state: IpcState,
    pub raw_state: u32,
    pub sim_pid: i32,
    pub driver_pid: i32,
    pub op_kind: Option<OpKind>,
    pub raw_op_kind: u8,
}

/// Storage that backs a [`RawSegment`].
pub trait SegmentMemory: Send + Sync + std::fmt::Debug {
    /// The mapped record, or `None` once closed.
    fn raw(&self) -> Option<&RawSegment>;

    /// Release the storage. Calling this twice is not an error.
    fn close(&mut self, entity: Entity) -> CosimResult<()>;
}

/// In-process segment shared between threads.
#[derive(Debug, Clone, Default)]
pub struct LocalSegment {
    inner: Option<Arc<RawSegment>>,
}

impl LocalSegment {
    pub fn new() -> Self {
        Self {
            inner: Some(Arc::new(RawSegment::new())),
        }
    }
}

impl SegmentMemory for LocalSegment {
    fn raw(&self) -> Option<&RawSegment> {
        self.inner.as_deref()
    }

    fn close(&mut self, entity: Entity) -> CosimResult<()> {
        if self.inner.take().is_some() {
            tracing::debug!("{} detached from local segment", entity);
        }
        Ok(())
    }
}
