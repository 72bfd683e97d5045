// Copyright 2023 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! The file-backed segment.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use log::{debug, info};
use memmap2::{MmapMut, MmapOptions};

use super::{arena, NamedAddress, Segment, SegmentAddr, SegmentError};

/// The default initial size of a [`MappedSegment`]'s backing file.
pub const INITIAL_SIZE: usize = 32768;

/// The smallest backing file this backend will create.
const MIN_SIZE: usize = 4096;

/// A segment backed by a memory-mapped file.
///
/// The backing file is entirely self-describing: every structure
/// inside it is linked by offsets, and the allocator and directory
/// state live in the file's header region. A process (the same one or
/// a different one) can therefore [`open`](MappedSegment::open) the
/// file later and pick up the named-address directory and everything
/// reachable from it without re-parsing any zone data.
///
/// Growth extends the file and remaps it; the mapping's base address
/// may change every time.
pub struct MappedSegment {
    file: File,
    map: MmapMut,
    path: PathBuf,
}

impl MappedSegment {
    /// Creates a new segment file at `path` with the given initial
    /// size. The file must not already exist.
    pub fn create<P: AsRef<Path>>(path: P, initial_size: usize) -> Result<Self, SegmentError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        let len = initial_size.max(MIN_SIZE);
        file.set_len(len as u64)?;
        let mut map = unsafe { MmapOptions::new().map_mut(&file)? };
        arena::init(&mut map);
        Ok(Self { file, map, path })
    }

    /// Opens an existing segment file, recovering its directory and
    /// contents.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SegmentError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let map = unsafe { MmapOptions::new().map_mut(&file)? };
        if !arena::is_initialized(&map) {
            return Err(SegmentError::BadBackingStore);
        }
        info!("recovered mapped segment from {}", path.display());
        Ok(Self { file, map, path })
    }

    /// Returns the path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn grow_for(&mut self, size: usize) -> Result<(), SegmentError> {
        let needed = arena::required_len_for(&self.map, size);
        let mut new_len = self.map.len();
        while new_len < needed {
            new_len = new_len.checked_mul(2).ok_or(SegmentError::OutOfMemory)?;
        }
        self.map.flush()?;
        self.file.set_len(new_len as u64)?;
        self.map = unsafe { MmapOptions::new().map_mut(&self.file)? };
        debug!(
            "grew mapped segment {} to {} bytes",
            self.path.display(),
            new_len
        );
        Ok(())
    }
}

impl Segment for MappedSegment {
    fn allocate(&mut self, size: usize) -> Result<SegmentAddr, SegmentError> {
        if let Some(addr) = arena::alloc(&mut self.map, size) {
            return Ok(addr.into());
        }
        self.grow_for(size)?;
        arena::alloc(&mut self.map, size)
            .map(SegmentAddr::from)
            .ok_or(SegmentError::OutOfMemory)
    }

    fn deallocate(&mut self, addr: SegmentAddr, size: usize) {
        arena::free(&mut self.map, addr.get(), size);
    }

    fn bytes(&self, addr: SegmentAddr, len: usize) -> &[u8] {
        let at = addr.get() as usize;
        &self.map[at..at + len]
    }

    fn bytes_mut(&mut self, addr: SegmentAddr, len: usize) -> &mut [u8] {
        let at = addr.get() as usize;
        &mut self.map[at..at + len]
    }

    fn set_named_address(
        &mut self,
        key: &str,
        addr: SegmentAddr,
    ) -> Result<u64, SegmentError> {
        if let Some(generation) = arena::dir_set(&mut self.map, key, addr.get()) {
            return Ok(generation);
        }
        self.grow_for(key.len() + 64)?;
        arena::dir_set(&mut self.map, key, addr.get()).ok_or(SegmentError::OutOfMemory)
    }

    fn named_address(&self, key: &str) -> Option<NamedAddress> {
        arena::dir_get(&self.map, key).map(|(addr, generation)| NamedAddress {
            addr: addr.into(),
            generation,
        })
    }

    fn clear_named_address(&mut self, key: &str) -> bool {
        arena::dir_clear(&mut self.map, key)
    }

    fn all_memory_deallocated(&self) -> bool {
        arena::live_allocations(&self.map) == 0
    }
}

impl Drop for MappedSegment {
    fn drop(&mut self) {
        // Push the final state out to the file; errors here have no
        // recovery path.
        let _ = self.map.flush();
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
