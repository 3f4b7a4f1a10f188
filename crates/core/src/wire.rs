// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Fixed binary layout of the operation area.
//!
//! Both processes map the same bytes, so field order, padding and the 8-byte
//! alignment are part of the contract. Nothing outside this module touches the
//! raw union.

use crate::operation::{InterfacePayload, OpKind, Operation, SimState, BUFFER_BYTES};
use std::mem::{align_of, size_of};

#[repr(C)]
#[derive(Clone, Copy)]
pub struct WireStateChange {
    pub state: u8,
    pub retval: u8,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct WireInterface {
    pub index: u8,
    _pad0: [u8; 3],
    pub info: u32,
    pub addr: u64,
    pub bitsize: u16,
    _pad1: [u8; 6],
    pub buffer: [u8; BUFFER_BYTES],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union WirePayload {
    pub sc: WireStateChange,
    pub iface: WireInterface,
}

#[repr(C, align(8))]
#[derive(Clone, Copy)]
pub struct WireOperation {
    pub kind: u8,
    _pad: [u8; 7],
    pub payload: WirePayload,
}

const _: () = assert!(size_of::<WireInterface>() == 24 + BUFFER_BYTES);
const _: () = assert!(size_of::<WireOperation>() == 8 + size_of::<WireInterface>());
const _: () = assert!(align_of::<WireOperation>() == 8);

impl WireOperation {
    pub fn zeroed() -> Self {
        // SAFETY: every field is plain integer data; all-zero is a valid NONE operation.
        unsafe { std::mem::zeroed() }
    }
}

impl From<&InterfacePayload> for WireInterface {
    fn from(p: &InterfacePayload) -> Self {
        WireInterface {
            index: p.index,
            _pad0: [0; 3],
            info: p.info,
            addr: p.addr,
            bitsize: p.bitsize,
            _pad1: [0; 6],
            buffer: p.buffer,
        }
    }
}

impl From<&WireInterface> for InterfacePayload {
    fn from(w: &WireInterface) -> Self {
        InterfacePayload {
            index: w.index,
            info: w.info,
            addr: w.addr,
            bitsize: w.bitsize,
            buffer: w.buffer,
        }
    }
}

pub fn encode(op: &Operation) -> WireOperation {
    let mut wire = WireOperation::zeroed();
    wire.kind = op.kind() as u8;
    match op {
        Operation::None => {}
        Operation::StateChange { state, retval } => {
            wire.payload.sc = WireStateChange {
                state: state.bits(),
                retval: *retval,
            };
        }
        Operation::Interface { payload, .. } => {
            wire.payload.iface = WireInterface::from(payload.as_ref());
        }
    }
    wire
}

/// Decode a raw operation. Unknown kinds are returned as the raw tag.
pub fn decode(wire: &WireOperation) -> Result<Operation, u8> {
    let kind = OpKind::from_u8(wire.kind).ok_or(wire.kind)?;
    let op = match kind {
        OpKind::None => Operation::None,
        OpKind::StateChange => {
            // SAFETY: both union views are plain bytes of an initialized record.
            let sc = unsafe { wire.payload.sc };
            Operation::StateChange {
                state: SimState::from_bits_retain(sc.state),
                retval: sc.retval,
            }
        }
        _ => {
            // SAFETY: as above.
            let iface = unsafe { &wire.payload.iface };
            Operation::Interface {
                kind,
                payload: Box::new(InterfacePayload::from(iface)),
            }
        }
    };
    Ok(op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn test_layout_offsets() {
        assert_eq!(offset_of!(WireOperation, payload), 8);
        assert_eq!(offset_of!(WireInterface, info), 4);
        assert_eq!(offset_of!(WireInterface, addr), 8);
        assert_eq!(offset_of!(WireInterface, bitsize), 16);
        assert_eq!(offset_of!(WireInterface, buffer), 24);
        assert_eq!(offset_of!(WireStateChange, retval), 1);
    }

    #[test]
    fn test_state_change_survives_encoding() {
        let op = Operation::state_change(SimState::END | SimState::ERROR, 42);
        let wire = encode(&op);
        assert_eq!(wire.kind, OpKind::StateChange as u8);
        assert_eq!(decode(&wire).unwrap(), op);
    }

    #[test]
    fn test_interface_payload_survives_encoding() {
        let mut payload = InterfacePayload::with_data(7, 0xdead_beef_0000, 96, &[1; 12]);
        payload.info = 0x8000_0001;
        payload.buffer[BUFFER_BYTES - 1] = 0x5A;
        let op = Operation::interface(OpKind::InterfacePush, payload);
        assert_eq!(decode(&encode(&op)).unwrap(), op);
    }

    #[test]
    fn test_unknown_kind_is_reported() {
        let mut wire = WireOperation::zeroed();
        wire.kind = 0x42;
        assert_eq!(decode(&wire).err(), Some(0x42));
    }

    #[test]
    fn test_zeroed_is_none() {
        assert_eq!(decode(&WireOperation::zeroed()).unwrap(), Operation::None);
    }
}
