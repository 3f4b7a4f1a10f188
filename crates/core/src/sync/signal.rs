// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Blocking waits on a dedicated signal.
//!
//! Each entity publishes its pid in the segment. A transition the peer must
//! observe is followed by `kill(peer, signo)`; a waiter blocks in
//! `sigtimedwait` and re-checks the state word after every wakeup or timeout,
//! so a lost signal costs at most one timeout interval. Each timeout also
//! checks that the peer's pid still exists, so a peer that died without
//! announcing surfaces as [`CosimError::PeerLost`].

use super::{IpcState, SyncBackend};
use crate::segment::RawSegment;
use crate::{CosimError, CosimResult, Entity};
use std::io;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SignalBackend {
    signo: i32,
    timeout: Duration,
}

extern "C" fn ignore_signal(_: libc::c_int) {}

impl SignalBackend {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

    pub fn new(signo: i32, timeout: Duration) -> CosimResult<Self> {
        if signo <= 0 || signo > libc::SIGRTMAX() || signo == libc::SIGKILL || signo == libc::SIGSTOP
        {
            return Err(CosimError::Config(format!(
                "signal {} cannot be used for synchronization",
                signo
            )));
        }
        Ok(Self { signo, timeout })
    }

    pub fn signo(&self) -> i32 {
        self.signo
    }

    fn err(&self, action: &'static str) -> CosimError {
        CosimError::Signal {
            signal: self.signo,
            action,
            source: io::Error::last_os_error(),
        }
    }

    fn sigset(&self) -> CosimResult<libc::sigset_t> {
        // SAFETY: the set is initialised by sigemptyset before use.
        unsafe {
            let mut set: libc::sigset_t = std::mem::zeroed();
            if libc::sigemptyset(&mut set) != 0 || libc::sigaddset(&mut set, self.signo) != 0 {
                return Err(self.err("set setup"));
            }
            Ok(set)
        }
    }

    /// Keep the signal from killing the process when it lands on a thread
    /// that is not waiting for it.
    fn install_fallback_handler(&self) -> CosimResult<()> {
        // SAFETY: plain sigaction queries/updates with zero-initialised structs.
        unsafe {
            let mut current: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(self.signo, std::ptr::null(), &mut current) != 0 {
                return Err(self.err("disposition query"));
            }
            if current.sa_sigaction != libc::SIG_DFL {
                return Ok(());
            }
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = ignore_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
            action.sa_flags = libc::SA_RESTART;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(self.signo, &action, std::ptr::null_mut()) != 0 {
                return Err(self.err("handler install"));
            }
        }
        Ok(())
    }

    /// Sleep until the signal arrives or the timeout elapses.
    fn sleep_once(&self, set: &libc::sigset_t) -> CosimResult<()> {
        let ts = libc::timespec {
            tv_sec: self.timeout.as_secs() as libc::time_t,
            tv_nsec: self.timeout.subsec_nanos() as libc::c_long,
        };
        // SAFETY: `set` and `ts` are valid for the duration of the call.
        let rc = unsafe { libc::sigtimedwait(set, std::ptr::null_mut(), &ts) };
        if rc >= 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EAGAIN) | Some(libc::EINTR) => Ok(()),
            _ => Err(CosimError::Signal {
                signal: self.signo,
                action: "wait",
                source: err,
            }),
        }
    }

    /// Fails once the published pid of `peer` no longer names a process.
    fn check_peer(&self, seg: &RawSegment, peer: Entity) -> CosimResult<()> {
        let pid = seg.pid(peer);
        if pid <= 0 {
            return Ok(());
        }
        // SAFETY: signal 0 only checks that the process exists.
        if unsafe { libc::kill(pid, 0) } == 0 {
            return Ok(());
        }
        if io::Error::last_os_error().raw_os_error() == Some(libc::ESRCH) {
            tracing::error!("{} (pid {}) is gone", peer, pid);
            return Err(CosimError::PeerLost { entity: peer, pid });
        }
        Ok(())
    }
}

impl Default for SignalBackend {
    fn default() -> Self {
        Self {
            signo: libc::SIGUSR1,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }
}

impl SyncBackend for SignalBackend {
    fn name(&self) -> &'static str {
        "signal"
    }

    fn attach(&self, seg: &RawSegment, entity: Entity) -> CosimResult<()> {
        self.install_fallback_handler()?;
        let set = self.sigset()?;
        // SAFETY: `set` is initialised; the old mask is not requested.
        let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) };
        if rc != 0 {
            return Err(CosimError::Signal {
                signal: self.signo,
                action: "mask",
                source: io::Error::from_raw_os_error(rc),
            });
        }
        // SAFETY: getpid has no preconditions.
        let pid = unsafe { libc::getpid() };
        seg.set_pid(entity, pid);
        tracing::debug!("{} registered pid {} for signal {}", entity, pid, self.signo);
        Ok(())
    }

    fn detach(&self, seg: &RawSegment, entity: Entity) -> CosimResult<()> {
        seg.set_pid(entity, 0);
        Ok(())
    }

    fn rendezvous(&self, seg: &RawSegment, entity: Entity) -> CosimResult<()> {
        let peer = entity.peer();
        let set = self.sigset()?;
        tracing::info!("{} waiting for {} to attach", entity, peer);
        while seg.pid(peer) == 0 {
            self.sleep_once(&set)?;
        }
        self.notify(seg, peer)?;
        tracing::info!("{} found {} at pid {}", entity, peer, seg.pid(peer));
        Ok(())
    }

    fn wait_until(
        &self,
        seg: &RawSegment,
        entity: Entity,
        ready: &dyn Fn(IpcState) -> bool,
    ) -> CosimResult<IpcState> {
        let set = self.sigset()?;
        loop {
            let state = seg.state();
            if ready(state) {
                return Ok(state);
            }
            self.sleep_once(&set)?;
            self.check_peer(seg, entity.peer())?;
        }
    }

    fn notify(&self, seg: &RawSegment, to: Entity) -> CosimResult<()> {
        let pid = seg.pid(to);
        if pid == 0 {
            tracing::trace!("{} has no registered pid, skipping signal", to);
            return Ok(());
        }
        // SAFETY: kill with a positive pid and a validated signal number.
        if unsafe { libc::kill(pid, self.signo) } == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            tracing::warn!("{} (pid {}) is gone, signal dropped", to, pid);
            return Ok(());
        }
        Err(CosimError::Signal {
            signal: self.signo,
            action: "delivery",
            source: err,
        })
    }
}
