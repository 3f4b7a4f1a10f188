// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Simulator side: issues interface operations and lifecycle announcements.

use crate::channel::{decode_result, InterfaceResult, ReportQuery};
use crate::driver::SimOutcome;
use crate::operation::{InterfacePayload, OpKind, Operation, SimState};
use crate::sync::IpcState;
use crate::{CosimError, CosimResult, Endpoint, Entity};
use labwired_cosim_config::CosimConfig;

/// Driver's answer to one interface operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceReply {
    pub result: InterfaceResult,
    /// Index echoed by the driver; 254/255 flag an empty or unknown table.
    pub index: u8,
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub struct SimClient {
    endpoint: Endpoint,
    peer_outcome: Option<SimOutcome>,
}

impl SimClient {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            peer_outcome: None,
        }
    }

    /// Attach to the driver's segment as SIM.
    pub fn open(config: &CosimConfig) -> CosimResult<Self> {
        Ok(Self::new(Endpoint::open(config, Entity::Sim)?))
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Lifecycle state the driver announced out of band, if any.
    pub fn peer_outcome(&self) -> Option<SimOutcome> {
        self.peer_outcome
    }

    /// Take the segment for a new request.
    ///
    /// A driver announcement seizes an idle segment and leaves it in
    /// RESPONSE, so RESPONSE is watched for alongside FREE. The announcement
    /// stays in place so every later call sees it too.
    fn reserve(&mut self) -> CosimResult<()> {
        if let Some(o) = self.peer_outcome {
            return Err(CosimError::PeerTerminated {
                state: o.state.names(),
                retval: o.retval,
            });
        }
        loop {
            let state = self
                .endpoint
                .wait_until(&|s| matches!(s, IpcState::Free | IpcState::Response))?;
            if state == IpcState::Response {
                return match self.endpoint.load()? {
                    Operation::StateChange { state, retval } => {
                        self.peer_terminated(state, retval)
                    }
                    _ => Err(CosimError::ProtocolViolation {
                        expected: IpcState::Free,
                        found: IpcState::Response,
                    }),
                };
            }
            if self.endpoint.try_reserve()? {
                return Ok(());
            }
        }
    }

    /// reserve -> store -> REQUEST -> wait RESPONSE -> load -> release.
    fn transact(&mut self, op: &Operation) -> CosimResult<Operation> {
        self.reserve()?;
        self.endpoint.store(op)?;
        self.endpoint.commit_as_request()?;
        self.endpoint.wait_for(IpcState::Response)?;
        let reply = self.endpoint.load();
        self.endpoint.release()?;
        reply
    }

    fn peer_terminated<T>(&mut self, state: SimState, retval: u8) -> CosimResult<T> {
        tracing::warn!("Driver announced {} ({})", state.names(), retval);
        self.peer_outcome = Some(SimOutcome { state, retval });
        Err(CosimError::PeerTerminated {
            state: state.names(),
            retval,
        })
    }

    /// Announce READY and wait for the driver's SETUP.
    pub fn ready(&mut self) -> CosimResult<SimState> {
        match self.transact(&Operation::state_change(SimState::READY, 0))? {
            Operation::StateChange { state, .. } if state == SimState::SETUP => {
                tracing::info!("Driver answered SETUP");
                Ok(state)
            }
            Operation::StateChange { state, retval } => self.peer_terminated(state, retval),
            other => Err(CosimError::UnexpectedOperation(other.kind() as u8)),
        }
    }

    fn interface(&mut self, kind: OpKind, payload: InterfacePayload) -> CosimResult<InterfaceReply> {
        tracing::debug!("SIM issuing {:?} on channel {}", kind, payload.index);
        match self.transact(&Operation::interface(kind, payload))? {
            Operation::Interface { payload, .. } => {
                let result = decode_result(payload.info);
                let data = match result {
                    Ok(_) => payload.data().to_vec(),
                    Err(_) => Vec::new(),
                };
                Ok(InterfaceReply {
                    result,
                    index: payload.index,
                    data,
                })
            }
            Operation::StateChange { state, retval } => self.peer_terminated(state, retval),
            Operation::None => Err(CosimError::UnexpectedOperation(OpKind::None as u8)),
        }
    }

    /// Read `bitsize` bits at `addr` without consuming.
    pub fn read(&mut self, index: u8, addr: u64, bitsize: u16) -> CosimResult<InterfaceReply> {
        self.interface(
            OpKind::InterfaceRead,
            InterfacePayload::with_data(index, addr, bitsize, &[]),
        )
    }

    pub fn pop(&mut self, index: u8, bitsize: u16) -> CosimResult<InterfaceReply> {
        self.interface(
            OpKind::InterfacePop,
            InterfacePayload::with_data(index, 0, bitsize, &[]),
        )
    }

    pub fn write(
        &mut self,
        index: u8,
        addr: u64,
        bitsize: u16,
        data: &[u8],
    ) -> CosimResult<InterfaceReply> {
        self.interface(
            OpKind::InterfaceWrite,
            InterfacePayload::with_data(index, addr, bitsize, data),
        )
    }

    pub fn push(&mut self, index: u8, bitsize: u16, data: &[u8]) -> CosimResult<InterfaceReply> {
        self.interface(
            OpKind::InterfacePush,
            InterfacePayload::with_data(index, 0, bitsize, data),
        )
    }

    /// Ask the driver how many elements channel `index` can deliver or accept.
    pub fn info(&mut self, index: u8, query: ReportQuery) -> CosimResult<InterfaceReply> {
        let mut payload = InterfacePayload::new(index);
        payload.info = query.bits();
        self.interface(OpKind::InterfaceInfo, payload)
    }

    /// Unbind channel `index` on the driver.
    pub fn exit_interface(&mut self, index: u8) -> CosimResult<InterfaceReply> {
        self.interface(OpKind::InterfaceExit, InterfacePayload::new(index))
    }

    /// Announce a terminal lifecycle state; the driver's serve loop returns it.
    pub fn finish(&self, state: SimState, retval: u8) -> CosimResult<()> {
        tracing::info!("SIM announcing {} ({})", state.names(), retval);
        self.endpoint
            .force_state_change(state, retval, IpcState::Request)
    }

    /// Announce END with `status` and terminate the process.
    pub fn exit(mut self, status: i32) -> ! {
        self.terminate(SimState::END, status)
    }

    pub fn abort(mut self) -> ! {
        tracing::error!("Simulation called abort");
        self.terminate(SimState::ABORT, 1)
    }

    fn terminate(&mut self, state: SimState, status: i32) -> ! {
        if let Err(e) = self.finish(state, status as u8) {
            tracing::error!("Failed to announce {}: {}", state.names(), e);
        }
        if let Err(e) = self.endpoint.close() {
            tracing::error!("{}", e);
        }
        std::process::exit(status)
    }

    pub fn close(&mut self) -> CosimResult<()> {
        self.endpoint.close()
    }
}
