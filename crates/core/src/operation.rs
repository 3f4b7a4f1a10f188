// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Typed operations multiplexed over the shared segment.

use bitflags::bitflags;

/// Size of the interface data buffer carried by every operation.
pub const BUFFER_BYTES: usize = 512;
/// Highest index a channel can be registered at.
pub const MAX_CHANNEL_INDEX: u8 = 253;
/// Reported back in `index` when no channel or parameter is registered at all.
pub const IDX_EMPTY: u8 = 254;
/// Reported back in `index` when the requested index is not registered.
pub const IDX_OUT_OF_BOUNDS: u8 = 255;

bitflags! {
    /// Lifecycle state announced through STATE_CHANGE operations.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SimState: u8 {
        const READY = 1 << 0;
        const SETUP = 1 << 1;
        const RUNNING = 1 << 2;
        const END = 1 << 3;
        const ERROR = 1 << 4;
        const ABORT = 1 << 5;
    }
}

impl SimState {
    pub fn is_terminal(self) -> bool {
        self.intersects(SimState::END | SimState::ERROR | SimState::ABORT)
    }

    /// Flag names joined with `|`, e.g. `END|ERROR`.
    pub fn names(self) -> String {
        let names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        if names.is_empty() {
            "NONE".to_string()
        } else {
            names.join("|")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum OpKind {
    None = 0,
    StateChange = 1,
    InterfaceRead = 2,
    InterfaceWrite = 3,
    InterfacePop = 4,
    InterfacePush = 5,
    InterfaceInfo = 6,
    InterfaceExit = 7,
}

impl OpKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::StateChange),
            2 => Some(Self::InterfaceRead),
            3 => Some(Self::InterfaceWrite),
            4 => Some(Self::InterfacePop),
            5 => Some(Self::InterfacePush),
            6 => Some(Self::InterfaceInfo),
            7 => Some(Self::InterfaceExit),
            _ => None,
        }
    }

    pub fn is_interface(self) -> bool {
        !matches!(self, OpKind::None | OpKind::StateChange)
    }
}

/// Interface payload: channel index, opaque info word, address, width and data.
#[derive(Clone, PartialEq, Eq)]
pub struct InterfacePayload {
    pub index: u8,
    pub info: u32,
    pub addr: u64,
    pub bitsize: u16,
    pub buffer: [u8; BUFFER_BYTES],
}

impl InterfacePayload {
    pub fn new(index: u8) -> Self {
        Self {
            index,
            info: 0,
            addr: 0,
            bitsize: 0,
            buffer: [0; BUFFER_BYTES],
        }
    }

    /// Payload carrying `data`, truncated to the buffer size.
    pub fn with_data(index: u8, addr: u64, bitsize: u16, data: &[u8]) -> Self {
        let mut payload = Self::new(index);
        payload.addr = addr;
        payload.bitsize = bitsize;
        let len = data.len().min(BUFFER_BYTES);
        payload.buffer[..len].copy_from_slice(&data[..len]);
        payload
    }

    /// Bytes covered by `bitsize`.
    pub fn byte_len(&self) -> usize {
        (usize::from(self.bitsize).div_ceil(8)).min(BUFFER_BYTES)
    }

    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.byte_len()]
    }
}

impl std::fmt::Debug for InterfacePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfacePayload")
            .field("index", &self.index)
            .field("info", &format_args!("{:#x}", self.info))
            .field("addr", &format_args!("{:#x}", self.addr))
            .field("bitsize", &self.bitsize)
            .field("data", &self.data())
            .finish()
    }
}

/// Decoded contents of the segment's operation area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    None,
    StateChange {
        state: SimState,
        retval: u8,
    },
    Interface {
        kind: OpKind,
        payload: Box<InterfacePayload>,
    },
}

impl Operation {
    pub fn state_change(state: SimState, retval: u8) -> Self {
        Operation::StateChange { state, retval }
    }

    pub fn interface(kind: OpKind, payload: InterfacePayload) -> Self {
        debug_assert!(kind.is_interface());
        Operation::Interface {
            kind,
            payload: Box::new(payload),
        }
    }

    pub fn kind(&self) -> OpKind {
        match self {
            Operation::None => OpKind::None,
            Operation::StateChange { .. } => OpKind::StateChange,
            Operation::Interface { kind, .. } => *kind,
        }
    }
}
