// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::operation::{Operation, SimState};
use crate::segment::{MappedSegment, RawSegment, SegmentMemory, SegmentSnapshot};
use crate::sync::{backend_from_config, IpcState, SyncBackend, TransitionPolicy};
use crate::{CosimError, CosimResult, Entity};
use labwired_cosim_config::CosimConfig;

/// One participant's handle on the shared segment.
///
/// Owns the segment storage and the synchronization backend; every protocol
/// operation goes through here so that a closed endpoint fails cleanly
/// instead of touching unmapped memory.
#[derive(Debug)]
pub struct Endpoint {
    segment: Box<dyn SegmentMemory>,
    backend: Box<dyn SyncBackend>,
    entity: Entity,
    policy: TransitionPolicy,
}

impl Endpoint {
    pub fn new(
        segment: Box<dyn SegmentMemory>,
        backend: Box<dyn SyncBackend>,
        entity: Entity,
        policy: TransitionPolicy,
    ) -> CosimResult<Self> {
        let ep = Self {
            segment,
            backend,
            entity,
            policy,
        };
        ep.backend.attach(ep.raw()?, entity)?;
        tracing::debug!("{} attached using the {} backend", entity, ep.backend.name());
        Ok(ep)
    }

    /// Map the configured backing file and attach as `entity`, waiting for the
    /// peer when the configuration asks for a rendezvous.
    pub fn open(config: &CosimConfig, entity: Entity) -> CosimResult<Self> {
        let segment = MappedSegment::open(&config.shm_path, entity)?;
        let backend = backend_from_config(config)?;
        let ep = Self::new(
            Box::new(segment),
            backend,
            entity,
            TransitionPolicy::from(config.checked_transitions),
        )?;
        if config.rendezvous {
            ep.rendezvous()?;
        }
        Ok(ep)
    }

    pub fn entity(&self) -> Entity {
        self.entity
    }

    pub fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn is_closed(&self) -> bool {
        self.segment.raw().is_none()
    }

    fn raw(&self) -> CosimResult<&RawSegment> {
        self.segment.raw().ok_or(CosimError::Closed)
    }

    pub fn rendezvous(&self) -> CosimResult<()> {
        self.backend.rendezvous(self.raw()?, self.entity)
    }

    pub fn state(&self) -> CosimResult<IpcState> {
        Ok(self.raw()?.state())
    }

    pub fn snapshot(&self) -> CosimResult<SegmentSnapshot> {
        Ok(self.raw()?.snapshot())
    }

    pub fn reserve(&self) -> CosimResult<()> {
        self.backend.reserve(self.raw()?, self.entity)
    }

    pub fn commit_as_request(&self) -> CosimResult<()> {
        self.backend
            .commit_as_request(self.raw()?, self.entity, self.policy)
    }

    pub fn commit_as_response(&self) -> CosimResult<()> {
        self.backend
            .commit_as_response(self.raw()?, self.entity, self.policy)
    }

    pub fn release(&self) -> CosimResult<()> {
        self.backend.release(self.raw()?, self.entity)
    }

    pub fn wait_for(&self, state: IpcState) -> CosimResult<()> {
        self.backend.wait_for(self.raw()?, self.entity, state)
    }

    /// Block until `ready` accepts the handle, returning the observed state.
    pub fn wait_until(&self, ready: &dyn Fn(IpcState) -> bool) -> CosimResult<IpcState> {
        self.backend.wait_until(self.raw()?, self.entity, ready)
    }

    /// Single FREE -> LOCKED attempt; `false` when the peer got there first.
    pub fn try_reserve(&self) -> CosimResult<bool> {
        Ok(self
            .raw()?
            .transition(IpcState::Free, IpcState::Locked)
            .is_ok())
    }

    /// Claim a pending request for processing (REQUEST -> LOCKED).
    pub fn accept(&self) -> CosimResult<()> {
        let seg = self.raw()?;
        match self.policy {
            TransitionPolicy::Checked => seg
                .transition(IpcState::Request, IpcState::Locked)
                .map_err(|found| CosimError::ProtocolViolation {
                    expected: IpcState::Request,
                    found,
                }),
            TransitionPolicy::Unchecked => {
                seg.store_state(IpcState::Locked);
                Ok(())
            }
        }
    }

    pub fn force_state_change(
        &self,
        state: SimState,
        retval: u8,
        target: IpcState,
    ) -> CosimResult<()> {
        self.backend
            .force_state_change(self.raw()?, self.entity, state, retval, target)
    }

    pub fn store(&self, op: &Operation) -> CosimResult<()> {
        self.raw()?.store(op);
        Ok(())
    }

    pub fn load(&self) -> CosimResult<Operation> {
        self.raw()?
            .load()
            .map_err(CosimError::UnexpectedOperation)
    }

    /// Detach and unmap. Later calls are no-ops.
    pub fn close(&mut self) -> CosimResult<()> {
        if let Some(seg) = self.segment.raw() {
            self.backend.detach(seg, self.entity)?;
        } else {
            tracing::debug!("{} endpoint already closed", self.entity);
            return Ok(());
        }
        self.segment.close(self.entity)?;
        tracing::info!("{} endpoint closed", self.entity);
        Ok(())
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!("Closing {} endpoint failed: {}", self.entity, e);
        }
    }
}
