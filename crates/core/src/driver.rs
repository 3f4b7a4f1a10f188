// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Driver side: owns the channels and answers the simulator's requests.

use crate::channel::{
    encode_result, ArrayChannel, Channel, FifoChannel, Interface, InterfaceError,
    InterfaceResult, MemoryMap, PortChannel,
};
use crate::operation::{
    InterfacePayload, OpKind, Operation, SimState, IDX_EMPTY, IDX_OUT_OF_BOUNDS,
    MAX_CHANNEL_INDEX,
};
use crate::params::ParamStore;
use crate::sync::IpcState;
use crate::{CosimError, CosimResult, Endpoint, Entity};
use anyhow::Context;
use labwired_cosim_config::{parse_size, ChannelDecl, CosimConfig};
use std::collections::BTreeMap;

/// Lifecycle state and return value last announced by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimOutcome {
    pub state: SimState,
    pub retval: u8,
}

impl SimOutcome {
    pub fn is_success(&self) -> bool {
        self.state.contains(SimState::END)
            && !self.state.intersects(SimState::ERROR | SimState::ABORT)
            && self.retval == 0
    }
}

pub struct Driver {
    endpoint: Endpoint,
    channels: BTreeMap<u8, Channel>,
    params: ParamStore,
    outcome: Option<SimOutcome>,
    served: u64,
}

impl Driver {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            channels: BTreeMap::new(),
            params: ParamStore::new(),
            outcome: None,
            served: 0,
        }
    }

    /// Create the segment described by `config` and attach as DRIVER.
    pub fn open(config: &CosimConfig) -> CosimResult<Self> {
        Ok(Self::new(Endpoint::open(config, Entity::Driver)?))
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn params(&self) -> &ParamStore {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ParamStore {
        &mut self.params
    }

    pub fn channel(&self, index: u8) -> Option<&Channel> {
        self.channels.get(&index)
    }

    pub fn channel_mut(&mut self, index: u8) -> Option<&mut Channel> {
        self.channels.get_mut(&index)
    }

    /// Operations answered since the driver was created.
    pub fn served(&self) -> u64 {
        self.served
    }

    fn insert(&mut self, index: u8, channel: Channel) -> CosimResult<()> {
        if index > MAX_CHANNEL_INDEX {
            return Err(CosimError::Registration(format!(
                "channel index {} is reserved",
                index
            )));
        }
        if let Some(existing) = self.channels.get(&index) {
            return Err(CosimError::Registration(format!(
                "channel {} is already bound to a {}",
                index,
                existing.kind_name()
            )));
        }
        tracing::info!("Registered {} channel at index {}", channel.kind_name(), index);
        self.channels.insert(index, channel);
        Ok(())
    }

    fn element_count(&self, index: u8, align: u16, count: Option<usize>) -> CosimResult<usize> {
        match count {
            Some(n) => Ok(n),
            None => self.params.element_count(index, align),
        }
    }

    pub fn register_port(&mut self, index: u8, bitsize: u16, initial: &[u8]) -> CosimResult<()> {
        self.insert(index, Channel::Port(PortChannel::new(bitsize, initial)))
    }

    pub fn register_pointer(&mut self, index: u8, address: u64) -> CosimResult<()> {
        self.insert(index, Channel::Port(PortChannel::pointer(address)))
    }

    /// Without `count` the element count comes from the parameter size.
    /// `window` bounds shifted accesses and defaults to the whole array.
    pub fn register_array(
        &mut self,
        index: u8,
        bitsize: u16,
        align: u16,
        count: Option<usize>,
        window: Option<usize>,
        initial: &[u8],
    ) -> CosimResult<()> {
        let count = self.element_count(index, align, count)?;
        self.insert(
            index,
            Channel::Array(ArrayChannel::with_window(
                bitsize, align, count, window, initial,
            )),
        )
    }

    pub fn register_fifo(
        &mut self,
        index: u8,
        bitsize: u16,
        align: u16,
        count: Option<usize>,
        window: Option<usize>,
        initial: &[u8],
    ) -> CosimResult<()> {
        let count = self.element_count(index, align, count)?;
        self.insert(
            index,
            Channel::Fifo(FifoChannel::with_data(
                bitsize, align, count, window, initial,
            )),
        )
    }

    pub fn register_memory(&mut self, index: u8) -> CosimResult<()> {
        self.insert(index, Channel::Memory(MemoryMap::new()))
    }

    /// Expose `data` at simulator address `base` through memory channel `index`.
    pub fn map_memory(&mut self, index: u8, base: u64, data: Vec<u8>) -> CosimResult<()> {
        match self.channels.get_mut(&index) {
            Some(Channel::Memory(map)) => map.map(base, data),
            Some(other) => Err(CosimError::Registration(format!(
                "channel {} is a {}, not a memory channel",
                index,
                other.kind_name()
            ))),
            None => Err(CosimError::Registration(format!(
                "no memory channel at index {}",
                index
            ))),
        }
    }

    pub fn unregister(&mut self, index: u8) -> Option<Channel> {
        let removed = self.channels.remove(&index);
        if removed.is_some() {
            tracing::info!("Unbound channel {}", index);
        }
        removed
    }

    /// Drop every registered channel.
    pub fn finalize(&mut self) {
        if !self.channels.is_empty() {
            tracing::debug!("Finalizing {} channels", self.channels.len());
        }
        self.channels.clear();
    }

    /// Register the parameter sizes and channels declared in `config`.
    pub fn register_manifest(&mut self, config: &CosimConfig) -> anyhow::Result<()> {
        for (&index, &bytes) in &config.params {
            self.params.set_size(index, bytes);
        }
        for decl in &config.channels {
            let index = decl.index();
            let registered = match decl {
                ChannelDecl::Port { bitsize, value, .. } => {
                    self.register_port(index, *bitsize, value)
                }
                ChannelDecl::Pointer { address, .. } => self.register_pointer(index, *address),
                ChannelDecl::Array {
                    bitsize,
                    align,
                    count,
                    window,
                    data,
                    ..
                } => self.register_array(
                    index,
                    *bitsize,
                    *align,
                    count.map(|c| c as usize),
                    window.map(|w| w as usize),
                    data,
                ),
                ChannelDecl::Fifo {
                    bitsize,
                    align,
                    count,
                    window,
                    data,
                    ..
                } => self.register_fifo(
                    index,
                    *bitsize,
                    *align,
                    count.map(|c| c as usize),
                    window.map(|w| w as usize),
                    data,
                ),
                ChannelDecl::Memory { regions, .. } => {
                    self.register_memory(index)?;
                    for region in regions {
                        let size = parse_size(&region.size).with_context(|| {
                            format!("Invalid size for region {:#x}", region.base)
                        })?;
                        if region.data.len() as u64 > size {
                            anyhow::bail!(
                                "Region {:#x} data exceeds its {} byte size",
                                region.base,
                                size
                            );
                        }
                        let mut bytes = region.data.clone();
                        bytes.resize(size as usize, 0);
                        self.map_memory(index, region.base, bytes)?;
                    }
                    Ok(())
                }
            };
            registered.with_context(|| format!("Failed to register channel {}", index))?;
        }
        Ok(())
    }

    /// Run one interface operation against the channel table, storing the
    /// result code in `payload.info`.
    pub fn dispatch(&mut self, kind: OpKind, payload: &mut InterfacePayload) -> InterfaceResult {
        let result = self.dispatch_inner(kind, payload);
        payload.info = encode_result(result);
        tracing::debug!(
            "{:?} on channel {} ({} bits @ {:#x}) -> {:?}",
            kind,
            payload.index,
            payload.bitsize,
            payload.addr,
            result
        );
        result
    }

    fn dispatch_inner(&mut self, kind: OpKind, payload: &mut InterfacePayload) -> InterfaceResult {
        if self.channels.is_empty() {
            tracing::error!("{:?} on channel {} with no channels registered", kind, payload.index);
            payload.index = IDX_EMPTY;
            return Err(InterfaceError::Error);
        }
        let index = payload.index;
        if kind == OpKind::InterfaceExit {
            return match self.unregister(index) {
                Some(_) => Ok(0),
                None => {
                    payload.index = IDX_OUT_OF_BOUNDS;
                    Err(InterfaceError::Error)
                }
            };
        }
        let Some(channel) = self.channels.get_mut(&index) else {
            tracing::error!("Channel index out of bounds: {}", index);
            payload.index = IDX_OUT_OF_BOUNDS;
            return Err(InterfaceError::Error);
        };
        let (bitsize, addr) = (payload.bitsize, payload.addr);
        match kind {
            OpKind::InterfaceRead => channel.read(&mut payload.buffer, bitsize, addr, false),
            OpKind::InterfacePop => channel.read(&mut payload.buffer, bitsize, addr, true),
            OpKind::InterfaceWrite => channel.write(&payload.buffer, bitsize, addr, false),
            OpKind::InterfacePush => channel.write(&payload.buffer, bitsize, addr, true),
            OpKind::InterfaceInfo => channel.report(payload.info),
            _ => Err(InterfaceError::Error),
        }
    }

    /// Wait for the simulator's READY, answer SETUP and serve until it
    /// announces a lifecycle change.
    pub fn sim_start(&mut self) -> CosimResult<SimOutcome> {
        tracing::debug!("Waiting for simulator state report...");
        self.endpoint.wait_for(IpcState::Request)?;
        self.endpoint.accept()?;
        match self.endpoint.load() {
            Ok(Operation::StateChange { state, retval }) if state == SimState::READY => {
                self.endpoint
                    .store(&Operation::state_change(SimState::SETUP, retval))?;
                self.endpoint.commit_as_response()?;
                tracing::info!("Simulator is ready, launching simulation");
            }
            Ok(op) => return self.reject(op.kind() as u8),
            Err(CosimError::UnexpectedOperation(raw)) => return self.reject(raw),
            Err(e) => return Err(e),
        }
        self.serve()
    }

    /// Answer the simulator's READY with ABORT so it does not wait on a
    /// driver that cannot serve it.
    pub fn decline_start(&mut self) -> CosimResult<()> {
        self.endpoint.wait_for(IpcState::Request)?;
        self.endpoint.accept()?;
        self.endpoint
            .store(&Operation::state_change(SimState::ABORT, 1))?;
        self.endpoint.commit_as_response()
    }

    /// Answer requests until a STATE_CHANGE arrives.
    pub fn serve(&mut self) -> CosimResult<SimOutcome> {
        loop {
            self.endpoint.wait_for(IpcState::Request)?;
            self.endpoint.accept()?;
            match self.endpoint.load() {
                Ok(Operation::StateChange { state, retval }) => {
                    let outcome = SimOutcome { state, retval };
                    self.outcome = Some(outcome);
                    self.endpoint.release()?;
                    tracing::info!("Simulator state: {} ({})", state.names(), retval);
                    return Ok(outcome);
                }
                Ok(Operation::Interface { kind, mut payload }) => {
                    let _ = self.dispatch(kind, &mut payload);
                    self.endpoint
                        .store(&Operation::Interface { kind, payload })?;
                    self.endpoint.commit_as_response()?;
                    self.served += 1;
                }
                Ok(Operation::None) => return self.reject(OpKind::None as u8),
                Err(CosimError::UnexpectedOperation(raw)) => return self.reject(raw),
                Err(e) => return Err(e),
            }
        }
    }

    /// Answer an unserviceable request with ABORT while still holding it.
    fn reject<T>(&mut self, raw_kind: u8) -> CosimResult<T> {
        tracing::error!("Unexpected transaction type: {}", raw_kind);
        self.endpoint
            .store(&Operation::state_change(SimState::ABORT, 1))?;
        self.endpoint.commit_as_response()?;
        Err(CosimError::UnexpectedOperation(raw_kind))
    }

    /// Most recent lifecycle state reported by the simulator.
    pub fn sim_end(&self) -> Option<SimOutcome> {
        if let Some(o) = &self.outcome {
            tracing::debug!("Simulator state: {} ({})", o.state.names(), o.retval);
        }
        self.outcome
    }

    /// Announce `state` to the simulator out of band.
    pub fn announce(&self, state: SimState, retval: u8) -> CosimResult<()> {
        self.endpoint
            .force_state_change(state, retval, IpcState::Response)
    }

    /// Announce END with `status` and terminate the process.
    pub fn exit(mut self, status: i32) -> ! {
        tracing::info!("Exit called with value {}", status);
        self.terminate(SimState::END, status)
    }

    /// Announce ABORT and terminate the process.
    pub fn abort(mut self) -> ! {
        tracing::error!("Co-simulation called abort");
        self.terminate(SimState::ABORT, 1)
    }

    pub fn assert_failed(self, assertion: &str, file: &str, line: u32) -> ! {
        tracing::error!("{}:{}: Assertion `{}' failed.", file, line, assertion);
        self.abort()
    }

    fn terminate(&mut self, state: SimState, status: i32) -> ! {
        if let Err(e) = self.announce(state, status as u8) {
            tracing::error!("Failed to announce {}: {}", state.names(), e);
        }
        if let Err(e) = self.close() {
            tracing::error!("{}", e);
        }
        std::process::exit(status)
    }

    /// JSON view of the final state and every channel.
    pub fn report(&self) -> serde_json::Value {
        let channels: serde_json::Map<String, serde_json::Value> = self
            .channels
            .iter()
            .map(|(i, c)| (i.to_string(), c.snapshot()))
            .collect();
        serde_json::json!({
            "state": self.outcome.map(|o| o.state.names()),
            "retval": self.outcome.map(|o| o.retval),
            "served": self.served,
            "channels": channels,
        })
    }

    pub fn close(&mut self) -> CosimResult<()> {
        self.finalize();
        self.endpoint.close()
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("endpoint", &self.endpoint)
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .field("outcome", &self.outcome)
            .field("served", &self.served)
            .finish()
    }
}
