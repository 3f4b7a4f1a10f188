// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{RawSegment, SegmentMemory, SEGMENT_BYTES};
use crate::{CosimError, CosimResult, Entity};
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Segment backed by a memory-mapped file.
///
/// The driver creates and zeroes the file, the simulator attaches to it, and
/// the driver removes it on close.
#[derive(Debug)]
pub struct MappedSegment {
    path: PathBuf,
    mmap: Option<MmapMut>,
}

impl MappedSegment {
    /// Open the segment the way `entity` expects to find it.
    pub fn open(path: impl AsRef<Path>, entity: Entity) -> CosimResult<Self> {
        match entity {
            Entity::Driver => Self::create(path),
            Entity::Sim => Self::attach(path),
        }
    }

    /// Create (or truncate) the backing file and map a fresh FREE segment.
    pub fn create(path: impl AsRef<Path>) -> CosimResult<Self> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| CosimError::Io {
            path: path.clone(),
            source,
        };
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(io_err)?;
        // Shrinking to zero first clears any stale record left behind.
        file.set_len(0).map_err(io_err)?;
        file.set_len(SEGMENT_BYTES as u64).map_err(io_err)?;
        let seg = Self::map(path.clone(), &file)?;
        tracing::info!("Created shared segment {:?} ({} bytes)", path, SEGMENT_BYTES);
        Ok(seg)
    }

    /// Map an existing backing file.
    pub fn attach(path: impl AsRef<Path>) -> CosimResult<Self> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| CosimError::Io {
            path: path.clone(),
            source,
        };
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(io_err)?;
        let len = file.metadata().map_err(io_err)?.len();
        if len < SEGMENT_BYTES as u64 {
            return Err(CosimError::Map(format!(
                "{:?} holds {} bytes, expected at least {}",
                path, len, SEGMENT_BYTES
            )));
        }
        let seg = Self::map(path.clone(), &file)?;
        tracing::info!("Attached to shared segment {:?}", path);
        Ok(seg)
    }

    fn map(path: PathBuf, file: &std::fs::File) -> CosimResult<Self> {
        // SAFETY: the file is shared only with the peer process, which follows
        // the same handle protocol for every access.
        let mmap = unsafe { MmapMut::map_mut(file) }
            .map_err(|e| CosimError::Map(format!("{:?}: {}", path, e)))?;
        if mmap.len() < SEGMENT_BYTES
            || (mmap.as_ptr() as usize) % std::mem::align_of::<RawSegment>() != 0
        {
            return Err(CosimError::Map(format!(
                "{:?}: mapping is too small or misaligned",
                path
            )));
        }
        Ok(Self {
            path,
            mmap: Some(mmap),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SegmentMemory for MappedSegment {
    fn raw(&self) -> Option<&RawSegment> {
        self.mmap.as_ref().map(|m| {
            // SAFETY: size and alignment were checked in `map`, and every field
            // of RawSegment is valid for any bit pattern the peer can write.
            unsafe { &*(m.as_ptr() as *const RawSegment) }
        })
    }

    fn close(&mut self, entity: Entity) -> CosimResult<()> {
        let Some(mmap) = self.mmap.take() else {
            tracing::debug!("{} segment {:?} already closed", entity, self.path);
            return Ok(());
        };
        if let Err(e) = mmap.flush() {
            tracing::warn!("Flushing {:?} failed: {}", self.path, e);
        }
        drop(mmap);

        if entity == Entity::Driver {
            match std::fs::remove_file(&self.path) {
                Ok(()) => tracing::info!("Removed shared segment {:?}", self.path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::warn!("Shared segment {:?} was already removed", self.path);
                }
                Err(source) => {
                    return Err(CosimError::Io {
                        path: self.path.clone(),
                        source,
                    })
                }
            }
        }
        Ok(())
    }
}

impl Drop for MappedSegment {
    fn drop(&mut self) {
        if self.mmap.is_some() {
            tracing::debug!("Unmapping {:?} without explicit close", self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::IpcState;

    #[test]
    fn test_driver_creates_and_sim_attaches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.shm");

        let mut driver = MappedSegment::open(&path, Entity::Driver).unwrap();
        let mut sim = MappedSegment::open(&path, Entity::Sim).unwrap();

        let d = driver.raw().unwrap();
        d.set_pid(Entity::Driver, 77);
        d.store_state(IpcState::Request);

        let s = sim.raw().unwrap();
        assert_eq!(s.pid(Entity::Driver), 77);
        assert_eq!(s.state(), IpcState::Request);

        sim.close(Entity::Sim).unwrap();
        assert!(path.exists());
        driver.close(Entity::Driver).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_create_clears_stale_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.shm");
        std::fs::write(&path, vec![0xFF; SEGMENT_BYTES]).unwrap();

        let mut seg = MappedSegment::create(&path).unwrap();
        assert_eq!(seg.raw().unwrap().state(), IpcState::Free);
        seg.close(Entity::Driver).unwrap();
    }

    #[test]
    fn test_attach_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = MappedSegment::attach(dir.path().join("absent.shm")).unwrap_err();
        assert!(matches!(err, CosimError::Io { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_attach_short_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.shm");
        std::fs::write(&path, [0u8; 4]).unwrap();
        assert!(matches!(
            MappedSegment::attach(&path),
            Err(CosimError::Map(_))
        ));
    }

    #[test]
    fn test_close_twice_and_missing_file_are_benign() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.shm");
        let mut seg = MappedSegment::create(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        seg.close(Entity::Driver).unwrap();
        seg.close(Entity::Driver).unwrap();
        assert!(seg.raw().is_none());
    }
}
