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

//! Segment-resident zone data and the protocol for building it.
//!
//! A [`ZoneData`] is one zone's complete dataset: a [`ZoneTree`] of
//! ordinary records, zone-wide metadata (the minimum TTL from the SOA,
//! the DNSSEC signed flag), and — for NSEC3-signed zones — a separate
//! [`Nsec3Data`] with its own tree of hashed owner names, kept apart
//! from the ordinary names because the two name spaces must never be
//! compared against each other.
//!
//! Zone data is built and mutated through a [`ZoneDataUpdater`] bound
//! exclusively to it, one RRset (plus optional covering RRSIG set) at a
//! time, and torn down as a unit with [`ZoneData::destroy`]. A
//! finished build is published by storing the [`ZoneData`] address in
//! the segment's named-address directory; readers resolve the name at
//! the moment of use and never observe a partially built tree.

use log::debug;

use crate::name::Name;
use crate::rr::Ttl;
use crate::segment::{get_u32, get_u64, put_u32, put_u64};
use crate::segment::{Segment, SegmentAddr, SegmentError};

mod error;
pub mod rdataset;
mod tree;
mod updater;
pub use error::Error;
pub use rdataset::RdataSet;
pub use tree::{FindResult, NodeFlags, ZoneNode, ZoneTree};
pub use updater::ZoneDataUpdater;

// ZoneData field offsets.
const Z_TREE: u64 = 0;
const Z_NSEC3: u64 = 8;
const Z_MIN_TTL: u64 = 16;
const Z_FLAGS: u64 = 20;
const ZONE_DATA_LEN: usize = 24;

const ZF_SIGNED: u32 = 0x1;
const ZF_BUILD_LOCK: u32 = 0x2;

// Nsec3Data field offsets. The salt follows the fixed header.
const X_TREE: u64 = 0;
const X_FLAGS: u64 = 8;
const X_HASH_ALG: u64 = 12;
const X_ITERATIONS: u64 = 16;
const X_SALT_LEN: u64 = 20;
const X_SALT: u64 = 24;
const NSEC3_DATA_LEN: usize = 24;

const XF_SIGNED: u32 = 0x1;

////////////////////////////////////////////////////////////////////////
// ZONE DATA                                                          //
////////////////////////////////////////////////////////////////////////

/// A handle to one zone's segment-resident dataset.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ZoneData(u64);

impl ZoneData {
    /// Creates empty zone data for the zone `origin` in `seg`. The
    /// main tree initially holds only the origin node.
    pub fn create(seg: &mut dyn Segment, origin: &Name) -> Result<Self, SegmentError> {
        let tree = ZoneTree::create(seg, origin)?;
        let addr = match seg.allocate(ZONE_DATA_LEN) {
            Ok(addr) => addr.get(),
            Err(e) => {
                tree.destroy(seg);
                return Err(e);
            }
        };
        put_u64(seg, addr + Z_TREE, tree.root_addr());
        Ok(Self(addr))
    }

    /// Destroys zone data, returning every node, every record set,
    /// and the NSEC3 data (if present) to `seg`.
    pub fn destroy(seg: &mut dyn Segment, data: ZoneData) {
        if let Some(nsec3) = data.nsec3_data(seg) {
            Nsec3Data::destroy(seg, nsec3);
        }
        data.zone_tree(seg).destroy(seg);
        seg.deallocate(data.0.into(), ZONE_DATA_LEN);
    }

    /// Returns the segment address of this zone data, for publication
    /// in a named-address directory.
    pub fn address(self) -> SegmentAddr {
        self.0.into()
    }

    /// Reconstructs a handle from a published address.
    pub fn from_address(addr: SegmentAddr) -> Self {
        Self(addr.get())
    }

    /// Returns the tree of ordinary records.
    pub fn zone_tree(self, seg: &dyn Segment) -> ZoneTree {
        ZoneTree::from_root_addr(get_u64(seg, self.0 + Z_TREE))
    }

    /// Returns the zone's origin name.
    pub fn origin(self, seg: &dyn Segment) -> Name {
        self.zone_tree(seg).origin(seg)
    }

    /// Locates or creates the node for `name` in the main tree. See
    /// [`ZoneTree::insert`].
    pub fn insert_name(
        self,
        seg: &mut dyn Segment,
        name: &Name,
    ) -> Result<(ZoneNode, bool), SegmentError> {
        self.zone_tree(seg).insert(seg, name)
    }

    /// Returns the zone's minimum TTL (the MINIMUM field of the most
    /// recently added SOA, used as the default negative-caching TTL).
    /// Zero until a SOA has been added.
    pub fn min_ttl(self, seg: &dyn Segment) -> Ttl {
        Ttl::from(get_u32(seg, self.0 + Z_MIN_TTL))
    }

    pub(crate) fn set_min_ttl(self, seg: &mut dyn Segment, ttl: Ttl) {
        put_u32(seg, self.0 + Z_MIN_TTL, ttl.into());
    }

    /// Returns whether the zone is DNSSEC-signed: true once any NSEC,
    /// or any RRSIG covering NSEC, has been added.
    pub fn is_signed(self, seg: &dyn Segment) -> bool {
        self.flags(seg) & ZF_SIGNED != 0
    }

    pub(crate) fn set_signed(self, seg: &mut dyn Segment) {
        let flags = self.flags(seg) | ZF_SIGNED;
        put_u32(seg, self.0 + Z_FLAGS, flags);
    }

    /// Returns whether the zone is NSEC3-signed, i.e. whether the
    /// NSEC3 name space exists.
    pub fn is_nsec3_signed(self, seg: &dyn Segment) -> bool {
        get_u64(seg, self.0 + Z_NSEC3) != 0
    }

    /// Returns the NSEC3 data, if the zone has any.
    pub fn nsec3_data(self, seg: &dyn Segment) -> Option<Nsec3Data> {
        match get_u64(seg, self.0 + Z_NSEC3) {
            0 => None,
            addr => Some(Nsec3Data(addr)),
        }
    }

    pub(crate) fn set_nsec3_data(self, seg: &mut dyn Segment, nsec3: Nsec3Data) {
        put_u64(seg, self.0 + Z_NSEC3, nsec3.0);
    }

    pub(crate) fn try_acquire_build_lock(self, seg: &mut dyn Segment) -> bool {
        let flags = self.flags(seg);
        if flags & ZF_BUILD_LOCK != 0 {
            return false;
        }
        put_u32(seg, self.0 + Z_FLAGS, flags | ZF_BUILD_LOCK);
        true
    }

    pub(crate) fn release_build_lock(self, seg: &mut dyn Segment) {
        let flags = self.flags(seg) & !ZF_BUILD_LOCK;
        put_u32(seg, self.0 + Z_FLAGS, flags);
    }

    fn flags(self, seg: &dyn Segment) -> u32 {
        get_u32(seg, self.0 + Z_FLAGS)
    }
}

////////////////////////////////////////////////////////////////////////
// NSEC3 DATA                                                         //
////////////////////////////////////////////////////////////////////////

/// The NSEC3 name space of a zone: a separate [`ZoneTree`] keyed by
/// hashed owner names, together with the hash parameters and an
/// NSEC3-signed flag.
///
/// Created lazily by the updater the first time NSEC3 or NSEC3PARAM
/// data is added; see [`ZoneDataUpdater`] for the exact rules.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Nsec3Data(u64);

impl Nsec3Data {
    /// Creates the NSEC3 name space. `params` is the leading portion
    /// of an NSEC3 or NSEC3PARAM RDATA, which both start with the hash
    /// algorithm, flags, iterations, and salt ([RFC 5155 § 3.1, 4.1]);
    /// the fields are recorded for readers that answer NSEC3 queries.
    ///
    /// [RFC 5155 § 3.1, 4.1]: https://datatracker.ietf.org/doc/html/rfc5155#section-3.1
    pub(crate) fn create(
        seg: &mut dyn Segment,
        origin: &Name,
        params: &[u8],
    ) -> Result<Self, SegmentError> {
        let hash_alg = params.first().copied().unwrap_or(0);
        let iterations = match params.get(2..4) {
            Some(octets) => u16::from_be_bytes(octets.try_into().unwrap()),
            None => 0,
        };
        let salt = match params.get(4).map(|&len| len as usize) {
            Some(len) => params.get(5..5 + len).unwrap_or(&[]),
            None => &[],
        };

        let tree = ZoneTree::create(seg, origin)?;
        let addr = match seg.allocate(NSEC3_DATA_LEN + salt.len()) {
            Ok(addr) => addr.get(),
            Err(e) => {
                tree.destroy(seg);
                return Err(e);
            }
        };
        put_u64(seg, addr + X_TREE, tree.root_addr());
        put_u32(seg, addr + X_HASH_ALG, hash_alg as u32);
        put_u32(seg, addr + X_ITERATIONS, iterations as u32);
        put_u32(seg, addr + X_SALT_LEN, salt.len() as u32);
        seg.bytes_mut((addr + X_SALT).into(), salt.len())
            .copy_from_slice(salt);
        debug!("created NSEC3 data for {}", origin);
        Ok(Self(addr))
    }

    pub(crate) fn destroy(seg: &mut dyn Segment, nsec3: Nsec3Data) {
        nsec3.nsec3_tree(seg).destroy(seg);
        let salt_len = get_u32(seg, nsec3.0 + X_SALT_LEN) as usize;
        seg.deallocate(nsec3.0.into(), NSEC3_DATA_LEN + salt_len);
    }

    /// Returns the tree of NSEC3 records.
    pub fn nsec3_tree(self, seg: &dyn Segment) -> ZoneTree {
        ZoneTree::from_root_addr(get_u64(seg, self.0 + X_TREE))
    }

    /// Locates or creates the node for `name` in the NSEC3 tree.
    pub fn insert_name(
        self,
        seg: &mut dyn Segment,
        name: &Name,
    ) -> Result<(ZoneNode, bool), SegmentError> {
        self.nsec3_tree(seg).insert(seg, name)
    }

    /// Returns the NSEC3 hash algorithm.
    pub fn hash_algorithm(self, seg: &dyn Segment) -> u8 {
        get_u32(seg, self.0 + X_HASH_ALG) as u8
    }

    /// Returns the NSEC3 iteration count.
    pub fn iterations(self, seg: &dyn Segment) -> u16 {
        get_u32(seg, self.0 + X_ITERATIONS) as u16
    }

    /// Returns the NSEC3 salt.
    pub fn salt(self, seg: &dyn Segment) -> &[u8] {
        let salt_len = get_u32(seg, self.0 + X_SALT_LEN) as usize;
        seg.bytes((self.0 + X_SALT).into(), salt_len)
    }

    /// Returns whether any RRSIG covering NSEC3 has been added.
    pub fn is_signed(self, seg: &dyn Segment) -> bool {
        get_u32(seg, self.0 + X_FLAGS) & XF_SIGNED != 0
    }

    pub(crate) fn set_signed(self, seg: &mut dyn Segment) {
        let flags = get_u32(seg, self.0 + X_FLAGS) | XF_SIGNED;
        put_u32(seg, self.0 + X_FLAGS, flags);
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
