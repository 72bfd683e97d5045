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

//! A deterministic segment for tests.

use super::{arena, NamedAddress, Segment, SegmentAddr, SegmentError};

/// The initial region size for a [`MockSegment`]. Deliberately tiny so
/// that almost any use grows (and relocates) the region.
const INITIAL_LEN: usize = 256;

/// An in-memory segment for tests, with the same contract as the real
/// backends and two extra behaviors:
///
/// * every growth copies the region into a freshly allocated buffer,
///   so any code that cached a resolved address across an allocation
///   reads garbage instead of silently working; and
/// * an allocation-failure countdown ([`MockSegment::fail_after`])
///   makes a chosen future allocation report
///   [`SegmentError::OutOfMemory`], for testing error paths.
pub struct MockSegment {
    region: Vec<u8>,
    fail_after: Option<usize>,
}

impl MockSegment {
    /// Creates a new `MockSegment`.
    pub fn new() -> Self {
        let mut region = vec![0; INITIAL_LEN];
        arena::init(&mut region);
        Self {
            region,
            fail_after: None,
        }
    }

    /// Makes allocation number `n` from now (0-based) fail with
    /// [`SegmentError::OutOfMemory`]. The countdown is disarmed once
    /// it fires.
    pub fn fail_after(&mut self, n: usize) {
        self.fail_after = Some(n);
    }

    fn grow_for(&mut self, size: usize) {
        let needed = arena::required_len_for(&self.region, size);
        let mut new_len = self.region.len();
        while new_len < needed {
            new_len *= 2;
        }
        // A fresh buffer, not a resize-in-place: the old bytes move.
        let mut new_region = vec![0; new_len];
        new_region[..self.region.len()].copy_from_slice(&self.region);
        self.region = new_region;
    }
}

impl Default for MockSegment {
    fn default() -> Self {
        Self::new()
    }
}

impl Segment for MockSegment {
    fn allocate(&mut self, size: usize) -> Result<SegmentAddr, SegmentError> {
        if let Some(n) = self.fail_after {
            if n == 0 {
                self.fail_after = None;
                return Err(SegmentError::OutOfMemory);
            }
            self.fail_after = Some(n - 1);
        }
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

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
