// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! FREE -> LOCKED -> REQUEST -> RESPONSE -> FREE handle protocol.
//!
//! Every transition is a single compare-and-exchange on the segment's state
//! word. The backends differ only in how a participant waits for the peer and
//! how the peer is told that the state moved.

mod busy;
mod signal;

pub use busy::BusyWait;
pub use signal::SignalBackend;

use crate::operation::{Operation, SimState};
use crate::segment::RawSegment;
use crate::{CosimError, CosimResult, Entity};
use labwired_cosim_config::{CosimConfig, SyncMode};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u32)]
pub enum IpcState {
    Free = 0,
    Locked = 1,
    Request = 2,
    Response = 3,
}

impl IpcState {
    /// Values outside the protocol read as LOCKED so nobody claims the segment.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => IpcState::Free,
            2 => IpcState::Request,
            3 => IpcState::Response,
            _ => IpcState::Locked,
        }
    }
}

/// What a commit does when the segment is not LOCKED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransitionPolicy {
    /// Refuse the transition and report a protocol violation.
    #[default]
    Checked,
    /// Store the new state regardless of the current one.
    Unchecked,
}

impl From<bool> for TransitionPolicy {
    fn from(checked: bool) -> Self {
        if checked {
            TransitionPolicy::Checked
        } else {
            TransitionPolicy::Unchecked
        }
    }
}

/// Wait/notify strategy plus the protocol operations built on top of it.
pub trait SyncBackend: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Block until `ready` accepts the current state, returning that state.
    fn wait_until(
        &self,
        seg: &RawSegment,
        entity: Entity,
        ready: &dyn Fn(IpcState) -> bool,
    ) -> CosimResult<IpcState>;

    /// Tell `to` that the state word changed.
    fn notify(&self, seg: &RawSegment, to: Entity) -> CosimResult<()>;

    /// Per-process setup after the segment is mapped.
    fn attach(&self, _seg: &RawSegment, _entity: Entity) -> CosimResult<()> {
        Ok(())
    }

    fn detach(&self, _seg: &RawSegment, _entity: Entity) -> CosimResult<()> {
        Ok(())
    }

    /// Block until the peer has attached.
    fn rendezvous(&self, _seg: &RawSegment, _entity: Entity) -> CosimResult<()> {
        Ok(())
    }

    fn wait_for(&self, seg: &RawSegment, entity: Entity, state: IpcState) -> CosimResult<()> {
        self.wait_until(seg, entity, &|s| s == state).map(|_| ())
    }

    /// Take the segment FREE -> LOCKED, retrying lost races.
    fn reserve(&self, seg: &RawSegment, entity: Entity) -> CosimResult<()> {
        loop {
            self.wait_for(seg, entity, IpcState::Free)?;
            if seg.transition(IpcState::Free, IpcState::Locked).is_ok() {
                tracing::trace!("{} reserved the segment", entity);
                return Ok(());
            }
        }
    }

    fn commit_as_request(
        &self,
        seg: &RawSegment,
        entity: Entity,
        policy: TransitionPolicy,
    ) -> CosimResult<()> {
        commit(self, seg, entity, IpcState::Request, policy)
    }

    fn commit_as_response(
        &self,
        seg: &RawSegment,
        entity: Entity,
        policy: TransitionPolicy,
    ) -> CosimResult<()> {
        commit(self, seg, entity, IpcState::Response, policy)
    }

    fn release(&self, seg: &RawSegment, entity: Entity) -> CosimResult<()> {
        seg.store_state(IpcState::Free);
        tracing::trace!("{} released the segment", entity);
        self.notify(seg, entity.peer())
    }

    /// Seize the segment outside the reserve/commit pairing, write a
    /// STATE_CHANGE and leave the handle in `target`.
    fn force_state_change(
        &self,
        seg: &RawSegment,
        entity: Entity,
        state: SimState,
        retval: u8,
        target: IpcState,
    ) -> CosimResult<()> {
        loop {
            let current = self.wait_until(seg, entity, &|s| s != IpcState::Locked)?;
            if seg.transition(current, IpcState::Locked).is_ok() {
                break;
            }
        }
        seg.store(&Operation::state_change(state, retval));
        seg.store_state(target);
        tracing::debug!(
            "{} announced {} ({}) leaving {:?}",
            entity,
            state.names(),
            retval,
            target
        );
        self.notify(seg, entity.peer())
    }
}

fn commit<B: SyncBackend + ?Sized>(
    backend: &B,
    seg: &RawSegment,
    entity: Entity,
    target: IpcState,
    policy: TransitionPolicy,
) -> CosimResult<()> {
    match policy {
        TransitionPolicy::Checked => seg
            .transition(IpcState::Locked, target)
            .map_err(|found| CosimError::ProtocolViolation {
                expected: IpcState::Locked,
                found,
            })?,
        TransitionPolicy::Unchecked => seg.store_state(target),
    }
    tracing::trace!("{} committed {:?}", entity, target);
    backend.notify(seg, entity.peer())
}

/// Build the backend selected by the configuration.
pub fn backend_from_config(config: &CosimConfig) -> CosimResult<Box<dyn SyncBackend>> {
    Ok(match config.sync {
        SyncMode::Busy => Box::new(BusyWait),
        SyncMode::Signal => Box::new(SignalBackend::new(
            config.signal,
            Duration::from_millis(config.signal_timeout_ms),
        )?),
    })
}
