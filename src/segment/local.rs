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

//! The heap-backed segment.

use log::warn;

use super::{arena, NamedAddress, Segment, SegmentAddr, SegmentError};

/// The initial region size for a [`LocalSegment`].
const INITIAL_LEN: usize = 4096;

/// A segment backed by ordinary process memory.
///
/// Storage comes from a single `Vec<u8>` that doubles when exhausted,
/// so the only limit is the host's. The vector may relocate when it
/// grows, which makes this backend exercise the offset-only linking
/// rules just as thoroughly as the mapped one.
pub struct LocalSegment {
    region: Vec<u8>,
}

impl LocalSegment {
    /// Creates a new, empty `LocalSegment`.
    pub fn new() -> Self {
        let mut region = vec![0; INITIAL_LEN];
        arena::init(&mut region);
        Self { region }
    }

    fn grow_for(&mut self, size: usize) {
        let needed = arena::required_len_for(&self.region, size);
        let mut new_len = self.region.len();
        while new_len < needed {
            new_len *= 2;
        }
        self.region.resize(new_len, 0);
    }
}

impl Default for LocalSegment {
    fn default() -> Self {
        Self::new()
    }
}

impl Segment for LocalSegment {
    fn allocate(&mut self, size: usize) -> Result<SegmentAddr, SegmentError> {
        if let Some(addr) = arena::alloc(&mut self.region, size) {
            return Ok(addr.into());
        }
        self.grow_for(size);
        arena::alloc(&mut self.region, size)
            .map(SegmentAddr::from)
            .ok_or(SegmentError::OutOfMemory)
    }

    fn deallocate(&mut self, addr: SegmentAddr, size: usize) {
        arena::free(&mut self.region, addr.get(), size);
    }

    fn bytes(&self, addr: SegmentAddr, len: usize) -> &[u8] {
        let at = addr.get() as usize;
        &self.region[at..at + len]
    }

    fn bytes_mut(&mut self, addr: SegmentAddr, len: usize) -> &mut [u8] {
        let at = addr.get() as usize;
        &mut self.region[at..at + len]
    }

    fn set_named_address(
        &mut self,
        key: &str,
        addr: SegmentAddr,
    ) -> Result<u64, SegmentError> {
        if let Some(generation) = arena::dir_set(&mut self.region, key, addr.get()) {
            return Ok(generation);
        }
        self.grow_for(key.len() + 64);
        arena::dir_set(&mut self.region, key, addr.get()).ok_or(SegmentError::OutOfMemory)
    }

    fn named_address(&self, key: &str) -> Option<NamedAddress> {
        arena::dir_get(&self.region, key).map(|(addr, generation)| NamedAddress {
            addr: addr.into(),
            generation,
        })
    }

    fn clear_named_address(&mut self, key: &str) -> bool {
        arena::dir_clear(&mut self.region, key)
    }

    fn all_memory_deallocated(&self) -> bool {
        arena::live_allocations(&self.region) == 0
    }
}

impl Drop for LocalSegment {
    fn drop(&mut self) {
        let live = arena::live_allocations(&self.region);
        if live != 0 {
            warn!("local segment dropped with {} live allocations", live);
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::super::tests as contract;
    use super::*;

    #[test]
    fn allocate_and_release() {
        contract::allocate_and_release(&mut LocalSegment::new());
    }

    #[test]
    fn reuses_released_blocks() {
        contract::reuses_released_blocks(&mut LocalSegment::new());
    }

    #[test]
    fn named_addresses() {
        contract::named_addresses(&mut LocalSegment::new());
    }

    #[test]
    fn survives_growth() {
        contract::survives_growth(&mut LocalSegment::new());
    }
}
