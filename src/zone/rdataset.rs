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

//! Segment-resident record sets.
//!
//! An [`RdataSet`] holds everything stored for one RR type at one owner
//! name: the plain RDATA, the RDATA of covering RRSIGs, the TTL, and a
//! link to the next set in the owning node's chain. The RDATA are
//! encoded the same way [`Rrset`](crate::rr::Rrset) encodes them — each
//! prefixed with a 16-bit length, plain entries first, signature
//! entries after — in a single allocation, so an entire set is one
//! contiguous region.
//!
//! A set always carries at least one plain or one signature RDATA; a
//! set with neither is never constructed. A set whose plain count is
//! zero is a *signature-only placeholder*: it stands in for a type that
//! has no data of its own (yet) and is skipped by [`RdataSet::find`]
//! unless the caller asks for placeholders.
//!
//! Sets are immutable once written. The updater replaces a set (with a
//! freshly built one spliced into the same chain position) rather than
//! editing it, so merge and subtract never move neighbouring sets.

use std::iter::FusedIterator;

use crate::rr::{Ttl, Type};
use crate::segment::{get_u16, get_u32, get_u64, put_u16, put_u32, put_u64};
use crate::segment::{Segment, SegmentError};

// Field offsets. The encoded RDATA region follows the fixed header.
const R_NEXT: u64 = 0;
const R_TYPE: u64 = 8;
const R_RDATA_COUNT: u64 = 10;
const R_SIG_COUNT: u64 = 12;
const R_TTL: u64 = 16;
const R_DATA_LEN: u64 = 20;
const R_DATA: u64 = 24;
const HEADER_LEN: usize = 24;

/// A handle to one segment-resident record set.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RdataSet(u64);

impl RdataSet {
    pub(crate) fn addr(self) -> u64 {
        self.0
    }

    pub(crate) fn from_addr(addr: u64) -> Self {
        debug_assert_ne!(addr, 0);
        Self(addr)
    }

    /// Returns the RR type this set stores.
    pub fn rr_type(self, seg: &dyn Segment) -> Type {
        Type::from(get_u16(seg, self.0 + R_TYPE))
    }

    /// Returns the number of plain RDATA.
    pub fn rdata_count(self, seg: &dyn Segment) -> usize {
        get_u16(seg, self.0 + R_RDATA_COUNT) as usize
    }

    /// Returns the number of covering-signature RDATA.
    pub fn sig_rdata_count(self, seg: &dyn Segment) -> usize {
        get_u16(seg, self.0 + R_SIG_COUNT) as usize
    }

    /// Returns the set's TTL.
    pub fn ttl(self, seg: &dyn Segment) -> Ttl {
        Ttl::from(get_u32(seg, self.0 + R_TTL))
    }

    /// Returns the next set in the owning node's chain.
    pub fn next(self, seg: &dyn Segment) -> Option<RdataSet> {
        match get_u64(seg, self.0 + R_NEXT) {
            0 => None,
            addr => Some(Self(addr)),
        }
    }

    /// Returns an iterator over the plain RDATA.
    pub fn rdatas(self, seg: &dyn Segment) -> RdataIter<'_> {
        RdataIter {
            cursor: self.encoded(seg),
            remaining: self.rdata_count(seg),
        }
    }

    /// Returns an iterator over the covering-signature RDATA.
    pub fn sig_rdatas(self, seg: &dyn Segment) -> RdataIter<'_> {
        let mut skip = RdataIter {
            cursor: self.encoded(seg),
            remaining: self.rdata_count(seg),
        };
        for _ in &mut skip {}
        RdataIter {
            cursor: skip.cursor,
            remaining: self.sig_rdata_count(seg),
        }
    }

    /// Scans the chain starting at `head` for a set of `rr_type`.
    /// Signature-only placeholders are skipped unless
    /// `include_sig_only` is set.
    pub fn find(
        seg: &dyn Segment,
        head: Option<RdataSet>,
        rr_type: Type,
        include_sig_only: bool,
    ) -> Option<RdataSet> {
        let mut cur = head;
        while let Some(set) = cur {
            if set.rr_type(seg) == rr_type
                && (include_sig_only || set.rdata_count(seg) > 0)
            {
                return Some(set);
            }
            cur = set.next(seg);
        }
        None
    }

    fn encoded(self, seg: &dyn Segment) -> &[u8] {
        let len = get_u32(seg, self.0 + R_DATA_LEN) as usize;
        seg.bytes((self.0 + R_DATA).into(), len)
    }

    pub(crate) fn set_next(self, seg: &mut dyn Segment, next: u64) {
        put_u64(seg, self.0 + R_NEXT, next);
    }

    pub(crate) fn next_addr(self, seg: &dyn Segment) -> u64 {
        get_u64(seg, self.0 + R_NEXT)
    }

    /// Copies the plain RDATA out into owned buffers.
    pub(crate) fn rdatas_owned(self, seg: &dyn Segment) -> Vec<Vec<u8>> {
        self.rdatas(seg).map(<[u8]>::to_vec).collect()
    }

    /// Copies the signature RDATA out into owned buffers.
    pub(crate) fn sig_rdatas_owned(self, seg: &dyn Segment) -> Vec<Vec<u8>> {
        self.sig_rdatas(seg).map(<[u8]>::to_vec).collect()
    }
}

/// An iterator over the RDATA in a set's encoded region.
pub struct RdataIter<'a> {
    cursor: &'a [u8],
    remaining: usize,
}

impl<'a> Iterator for RdataIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let len_octets: [u8; 2] = self.cursor.get(0..2)?.try_into().ok()?;
        let len = u16::from_le_bytes(len_octets) as usize;
        let rdata = self.cursor.get(2..len + 2)?;
        self.cursor = &self.cursor[len + 2..];
        self.remaining -= 1;
        Some(rdata)
    }
}

impl FusedIterator for RdataIter<'_> {}

////////////////////////////////////////////////////////////////////////
// CONSTRUCTION AND RELEASE                                           //
////////////////////////////////////////////////////////////////////////

/// Builds a new set in `seg` with the given contents and chain link,
/// returning its address. At least one RDATA (plain or signature) must
/// be supplied.
pub(crate) fn create(
    seg: &mut dyn Segment,
    rr_type: Type,
    ttl: Ttl,
    rdatas: &[Vec<u8>],
    sigs: &[Vec<u8>],
    next: u64,
) -> Result<u64, SegmentError> {
    debug_assert!(
        !rdatas.is_empty() || !sigs.is_empty(),
        "a record set must carry plain or signature RDATA"
    );
    let mut encoded = Vec::new();
    for rdata in rdatas.iter().chain(sigs) {
        encoded.extend_from_slice(&(rdata.len() as u16).to_le_bytes());
        encoded.extend_from_slice(rdata);
    }
    let addr = seg.allocate(HEADER_LEN + encoded.len())?.get();
    put_u64(seg, addr + R_NEXT, next);
    put_u16(seg, addr + R_TYPE, rr_type.into());
    put_u16(seg, addr + R_RDATA_COUNT, rdatas.len() as u16);
    put_u16(seg, addr + R_SIG_COUNT, sigs.len() as u16);
    put_u32(seg, addr + R_TTL, u32::from(ttl));
    put_u32(seg, addr + R_DATA_LEN, encoded.len() as u32);
    seg.bytes_mut((addr + R_DATA).into(), encoded.len())
        .copy_from_slice(&encoded);
    Ok(addr)
}

/// Releases one set.
pub(crate) fn destroy(seg: &mut dyn Segment, addr: u64) {
    let len = get_u32(seg, addr + R_DATA_LEN) as usize;
    seg.deallocate(addr.into(), HEADER_LEN + len);
}

/// Releases a whole chain.
pub(crate) fn destroy_chain(seg: &mut dyn Segment, head: u64) {
    let mut cur = head;
    while cur != 0 {
        let next = get_u64(seg, cur + R_NEXT);
        destroy(seg, cur);
        cur = next;
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
