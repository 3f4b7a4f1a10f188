// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Co-simulation bridge between a generated-hardware simulator and a software
//! driver process, exchanging typed operations through one shared segment.

pub mod channel;
pub mod driver;
pub mod endpoint;
pub mod operation;
pub mod params;
pub mod segment;
pub mod sim;
pub mod sync;
pub mod wire;


pub use channel::{Channel, Interface, InterfaceError, InterfaceResult, ReportQuery};
pub use driver::{Driver, SimOutcome};
pub use endpoint::Endpoint;
pub use operation::{InterfacePayload, OpKind, Operation, SimState};
pub use segment::{LocalSegment, MappedSegment, RawSegment, SegmentMemory, SegmentSnapshot};
pub use sim::{InterfaceReply, SimClient};
pub use sync::{BusyWait, IpcState, SignalBackend, SyncBackend, TransitionPolicy};

/// One of the two protocol participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Entity {
    /// Hardware simulator process.
    Sim = 0,
    /// Software driver/testbench process.
    Driver = 1,
}

impl Entity {
    pub const COUNT: usize = 2;

    pub fn peer(self) -> Entity {
        match self {
            Entity::Sim => Entity::Driver,
            Entity::Driver => Entity::Sim,
        }
    }

    pub fn slot(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entity::Sim => write!(f, "SIM"),
            Entity::Driver => write!(f, "DRIVER"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CosimError {
    #[error("shared segment file {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("shared segment mapping failed: {0}")]
    Map(String),
    #[error("signal {signal} {action} failed: {source}")]
    Signal {
        signal: i32,
        action: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("illegal transition: expected {expected:?}, found {found:?}")]
    ProtocolViolation { expected: IpcState, found: IpcState },
    #[error("endpoint is closed")]
    Closed,
    #[error("parameter {index}: {reason}")]
    Param { index: u8, reason: String },
    #[error("channel registration failed: {0}")]
    Registration(String),
    #[error("unexpected operation kind {0}")]
    UnexpectedOperation(u8),
    #[error("peer announced {state} with return value {retval}")]
    PeerTerminated { state: String, retval: u8 },
    #[error("{entity} (pid {pid}) exited without announcing a final state")]
    PeerLost { entity: Entity, pid: i32 },
    #[error("configuration error: {0}")]
    Config(String),
}

impl CosimError {
    /// Errors after which the two processes cannot keep talking.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CosimError::Io { .. }
                | CosimError::Map(_)
                | CosimError::Signal { .. }
                | CosimError::PeerLost { .. }
        )
    }
}

pub type CosimResult<T> = Result<T, CosimError>;
