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

//! Memory segments: the allocator abstraction the zone data structures
//! are built on.
//!
//! A [`Segment`] hands out storage from a single contiguous region that
//! may be ordinary heap memory ([`LocalSegment`]), a growable
//! memory-mapped file ([`MappedSegment`]), or a deterministic test
//! double ([`MockSegment`]). Growth may *relocate* the entire region,
//! so nothing built on a segment may hold a raw pointer or slice across
//! an allocation: every cross-structure link is a [`SegmentAddr`]
//! (a byte offset from the segment base), resolved through
//! [`Segment::bytes`] at the moment of use.
//!
//! Segments also provide a named-address directory: a small map from
//! string keys to addresses that lets a reader locate a finished
//! structure (and, for mapped segments, lets a different process
//! recover it after reopening the backing file). Each entry carries a
//! generation counter that is bumped on every store, so readers can
//! detect republication without relying on memory ordering.

use std::fmt;
use std::io;

mod arena;
mod local;
mod mapped;
mod mock;
pub use local::LocalSegment;
pub use mapped::MappedSegment;
pub use mock::MockSegment;

////////////////////////////////////////////////////////////////////////
// ADDRESSES                                                          //
////////////////////////////////////////////////////////////////////////

/// The address of an allocation within a [`Segment`]: a byte offset
/// from the segment base. Offset zero is occupied by the segment
/// header, so no allocation ever has address zero; stored structures
/// use a zero offset as their null reference.
#[derive(Clone, Copy, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct SegmentAddr(u64);

impl SegmentAddr {
    /// Returns the raw byte offset.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for SegmentAddr {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for SegmentAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SegmentAddr({:#x})", self.0)
    }
}

/// A named-address directory entry, as returned by
/// [`Segment::named_address`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NamedAddress {
    /// The stored address.
    pub addr: SegmentAddr,

    /// The entry's generation: 1 for the initial store, incremented by
    /// every subsequent [`Segment::set_named_address`] for the key.
    pub generation: u64,
}

////////////////////////////////////////////////////////////////////////
// THE SEGMENT TRAIT                                                  //
////////////////////////////////////////////////////////////////////////

/// The capability interface implemented by every segment backend.
///
/// Implementations are not internally synchronized; a segment and the
/// structures inside it belong to one writer at a time (see the crate
/// docs for the publication protocol).
pub trait Segment {
    /// Allocates `size` bytes and returns their address. The returned
    /// allocation is 8-byte aligned and zero-filled. Growable backends
    /// extend (and possibly relocate) their region as needed; an error
    /// is returned only if growth itself fails.
    fn allocate(&mut self, size: usize) -> Result<SegmentAddr, SegmentError>;

    /// Releases an allocation previously obtained from `allocate` with
    /// the given size. Releasing an address that was not allocated
    /// (or was already released) corrupts the segment; callers are
    /// responsible for pairing calls correctly.
    fn deallocate(&mut self, addr: SegmentAddr, size: usize);

    /// Returns the `len` bytes starting at `addr`.
    ///
    /// # Panics
    ///
    /// Panics if the range is outside the segment.
    fn bytes(&self, addr: SegmentAddr, len: usize) -> &[u8];

    /// Returns the `len` bytes starting at `addr`, mutably.
    ///
    /// # Panics
    ///
    /// Panics if the range is outside the segment.
    fn bytes_mut(&mut self, addr: SegmentAddr, len: usize) -> &mut [u8];

    /// Stores `addr` in the directory under `key`, creating the entry
    /// or overwriting an existing one. Returns the entry's new
    /// generation.
    fn set_named_address(&mut self, key: &str, addr: SegmentAddr)
        -> Result<u64, SegmentError>;

    /// Looks up `key` in the directory. An unset key yields [`None`],
    /// not an error.
    fn named_address(&self, key: &str) -> Option<NamedAddress>;

    /// Removes `key` from the directory, returning whether it was set.
    fn clear_named_address(&mut self, key: &str) -> bool;

    /// Returns whether every allocation has been released. Directory
    /// entries are bookkeeping, not allocations, and do not count.
    /// This is a diagnostic for owners and tests to detect leaks at
    /// teardown.
    fn all_memory_deallocated(&self) -> bool;
}

////////////////////////////////////////////////////////////////////////
// SCALAR ACCESS HELPERS                                              //
////////////////////////////////////////////////////////////////////////

// The zone data structures store little-endian scalars at fixed offsets
// within their allocations. These helpers keep the call sites honest:
// each one resolves the segment base, copies the scalar out, and drops
// the borrow, so no reference survives a subsequent allocation.

pub(crate) fn get_u16(seg: &dyn Segment, at: u64) -> u16 {
    u16::from_le_bytes(seg.bytes(at.into(), 2).try_into().unwrap())
}

pub(crate) fn get_u32(seg: &dyn Segment, at: u64) -> u32 {
    u32::from_le_bytes(seg.bytes(at.into(), 4).try_into().unwrap())
}

pub(crate) fn get_u64(seg: &dyn Segment, at: u64) -> u64 {
    u64::from_le_bytes(seg.bytes(at.into(), 8).try_into().unwrap())
}

pub(crate) fn put_u16(seg: &mut dyn Segment, at: u64, value: u16) {
    seg.bytes_mut(at.into(), 2).copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_u32(seg: &mut dyn Segment, at: u64, value: u32) {
    seg.bytes_mut(at.into(), 4).copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_u64(seg: &mut dyn Segment, at: u64, value: u64) {
    seg.bytes_mut(at.into(), 8).copy_from_slice(&value.to_le_bytes());
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// Errors that arise during segment operations.
#[derive(Debug)]
pub enum SegmentError {
    /// An allocation could not be satisfied, even after attempting to
    /// grow the backing region.
    OutOfMemory,

    /// An I/O error from a file-backed segment.
    Io(io::Error),

    /// The backing file of a mapped segment is not a segment (or is
    /// truncated or corrupt).
    BadBackingStore,
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::OutOfMemory => f.write_str("out of memory in segment"),
            Self::Io(e) => write!(f, "segment I/O error: {}", e),
            Self::BadBackingStore => {
                f.write_str("the backing file is not a valid segment")
            }
        }
    }
}

impl From<io::Error> for SegmentError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl std::error::Error for SegmentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
