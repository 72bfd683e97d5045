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

//! The incremental update protocol for zone data.
//!
//! A [`ZoneDataUpdater`] is bound exclusively to one [`ZoneData`] and
//! feeds it one RRset at a time: each [`add`](ZoneDataUpdater::add) or
//! [`remove`](ZoneDataUpdater::remove) call carries an optional plain
//! RRset and an optional covering RRSIG set for a single (owner, type)
//! slot. The updater keeps everything consistent that is easy to get
//! wrong by hand: routing NSEC3-space types to the separate NSEC3
//! tree, creating that space lazily, wildcard and delegation flags on
//! nodes, the zone's minimum TTL and signed state, and releasing nodes
//! and record sets back to the segment the moment they become empty.
//!
//! Each (owner, type) slot moves among four states — absent,
//! plain-only, signature-only, plain-and-signature — under `add` and
//! `remove`. A signature-only slot is a placeholder: it keeps the
//! RRSIG available without pretending the covered data exists.
//!
//! There is no rollback across calls. A failed call leaves previously
//! completed calls in place (and may leave an empty node behind);
//! callers that need all-or-nothing semantics rebuild from scratch
//! instead.

use log::debug;

use crate::class::Class;
use crate::name::Name;
use crate::rr::{Rrset, Type};
use crate::segment::Segment;

use super::rdataset::{self, RdataSet};
use super::tree::{FindResult, NodeFlags, ZoneNode};
use super::{Error, Nsec3Data, ZoneData};

/// Builds and mutates one zone's [`ZoneData`] in place.
pub struct ZoneDataUpdater {
    class: Class,
    origin: Name,
    data: ZoneData,
}

impl ZoneDataUpdater {
    /// Binds an updater to `data`. Fails with
    /// [`Error::InvalidOperation`] if the data is already bound to an
    /// updater. The binding is recorded in the segment itself, so for
    /// a mapped segment it also excludes writers in other processes.
    pub fn new(
        seg: &mut dyn Segment,
        class: Class,
        origin: Name,
        data: ZoneData,
    ) -> Result<Self, Error> {
        if !data.try_acquire_build_lock(seg) {
            return Err(Error::InvalidOperation);
        }
        debug_assert_eq!(data.origin(seg), origin);
        Ok(Self {
            class,
            origin,
            data,
        })
    }

    /// Returns the zone data this updater is bound to.
    pub fn zone_data(&self) -> ZoneData {
        self.data
    }

    /// Releases the binding, making the data available to a future
    /// updater. ([`ZoneData::destroy`] releases it implicitly.)
    pub fn finish(self, seg: &mut dyn Segment) {
        self.data.release_build_lock(seg);
    }

    /// Adds one RRset and/or its covering RRSIG set at one owner name.
    ///
    /// Either argument may be omitted (an RRset with no RDATA counts
    /// as omitted here), but not both. An RRSIG-only addition creates
    /// a signature-only placeholder for the covered type; it never
    /// flips delegation behavior or, for NSEC3PARAM, the NSEC3-signed
    /// state, but it does mark wildcard parents and it does mark the
    /// zone signed when it covers NSEC.
    pub fn add(
        &mut self,
        seg: &mut dyn Segment,
        rrset: Option<&Rrset>,
        rrsig: Option<&Rrset>,
    ) -> Result<(), Error> {
        let rrset = rrset.filter(|set| !set.is_empty());
        let rrsig = rrsig.filter(|set| !set.is_empty());
        let (owner, covered) = self.validate_add(rrset, rrsig)?;
        if covered == Type::NSEC3 {
            self.add_nsec3(seg, owner, rrset, rrsig)
        } else {
            self.add_ordinary(seg, owner, covered, rrset, rrsig)
        }
    }

    /// Removes RDATA (and/or signature RDATA) from one (owner, type)
    /// slot.
    ///
    /// Exactly one of the arguments may be omitted. The owner name and
    /// the slot must exist, and a supplied RRset must have RDATA; all
    /// other mismatches are lenient: RDATA that does not match
    /// anything stored is ignored. Removing the last plain RDATA while
    /// signatures remain leaves a signature-only placeholder; removing
    /// everything releases the slot, and then the node too if nothing
    /// else needs it.
    pub fn remove(
        &mut self,
        seg: &mut dyn Segment,
        rrset: Option<&Rrset>,
        rrsig: Option<&Rrset>,
    ) -> Result<(), Error> {
        let (owner, covered) = self.validate_remove(rrset, rrsig)?;
        let tree = if covered == Type::NSEC3 {
            match self.data.nsec3_data(seg) {
                Some(nsec3) => nsec3.nsec3_tree(seg),
                None => return Err(Error::RemoveError),
            }
        } else {
            self.data.zone_tree(seg)
        };
        let node = match tree.find(seg, owner) {
            FindResult::Exact(node) => node,
            _ => return Err(Error::RemoveError),
        };
        let old = match RdataSet::find(seg, node.data(seg), covered, true) {
            Some(set) => set,
            None => return Err(Error::RemoveError),
        };

        let mut rdatas = old.rdatas_owned(seg);
        if let Some(set) = rrset {
            for rdata in set.rdatas() {
                rdatas.retain(|stored| stored.as_slice() != rdata.octets());
            }
        }
        let mut sigs = old.sig_rdatas_owned(seg);
        if let Some(set) = rrsig {
            for rdata in set.rdatas() {
                sigs.retain(|stored| stored.as_slice() != rdata.octets());
            }
        }

        if rdatas.len() == old.rdata_count(seg) && sigs.len() == old.sig_rdata_count(seg)
        {
            // Nothing matched. This is not an error; the slot is left
            // as it was.
            return Ok(());
        }
        if rdatas.is_empty() && sigs.is_empty() {
            unlink_from_chain(seg, node, old);
            rdataset::destroy(seg, old.addr());
            if node.data_head(seg) == 0 {
                debug!("removing emptied node {}", tree.name_of(seg, node));
                tree.remove_if_empty(seg, node);
            }
        } else {
            let ttl = old.ttl(seg);
            let next = old.next_addr(seg);
            let replacement = rdataset::create(seg, covered, ttl, &rdatas, &sigs, next)?;
            splice_into_chain(seg, node, old, replacement);
            rdataset::destroy(seg, old.addr());
        }
        Ok(())
    }

    fn add_ordinary(
        &mut self,
        seg: &mut dyn Segment,
        owner: &Name,
        covered: Type,
        rrset: Option<&Rrset>,
        rrsig: Option<&Rrset>,
    ) -> Result<(), Error> {
        let tree = self.data.zone_tree(seg);
        if owner.is_wildcard() {
            let parent = owner.parent().unwrap();
            let (parent_node, _) = tree.insert(seg, &parent)?;
            parent_node.set_flag(seg, NodeFlags::WILDCARD);
        }
        let (node, _) = tree.insert(seg, owner)?;
        merge_into_chain(seg, node, covered, rrset, rrsig)?;

        if rrset.is_some() {
            if (covered == Type::NS && *owner != self.origin) || covered == Type::DNAME {
                node.set_flag(seg, NodeFlags::CALLBACK);
            }
            if covered == Type::SOA {
                if let Some(minimum) = rrset.and_then(Rrset::soa_minimum) {
                    self.data.set_min_ttl(seg, minimum);
                }
            }
            if covered == Type::NSEC3PARAM && self.data.nsec3_data(seg).is_none() {
                let params = first_rdata(rrset);
                let nsec3 = Nsec3Data::create(seg, &self.origin, &params)?;
                self.data.set_nsec3_data(seg, nsec3);
            }
        }
        if covered == Type::NSEC {
            self.data.set_signed(seg);
        }
        Ok(())
    }

    fn add_nsec3(
        &mut self,
        seg: &mut dyn Segment,
        owner: &Name,
        rrset: Option<&Rrset>,
        rrsig: Option<&Rrset>,
    ) -> Result<(), Error> {
        let nsec3 = match self.data.nsec3_data(seg) {
            Some(nsec3) => nsec3,
            None => match rrset {
                Some(set) => {
                    // The NSEC3 RDATA's leading fields double as the
                    // zone's hash parameters.
                    let nsec3 = Nsec3Data::create(seg, &self.origin, &first_rdata(Some(set)))?;
                    self.data.set_nsec3_data(seg, nsec3);
                    nsec3
                }
                // An RRSIG alone cannot establish the NSEC3 space: it
                // carries no hash parameters. Callers must add NSEC3
                // or NSEC3PARAM first.
                None => return Err(Error::NotImplemented),
            },
        };
        let (node, _) = nsec3.nsec3_tree(seg).insert(seg, owner)?;
        merge_into_chain(seg, node, Type::NSEC3, rrset, rrsig)?;
        if rrsig.is_some() {
            nsec3.set_signed(seg);
        }
        Ok(())
    }

    fn validate_add<'a>(
        &self,
        rrset: Option<&'a Rrset>,
        rrsig: Option<&'a Rrset>,
    ) -> Result<(&'a Name, Type), Error> {
        let covered_by_sig = match rrsig {
            Some(sig) => {
                if sig.rr_type != Type::RRSIG {
                    return Err(Error::BadRrsig);
                }
                match sig.covered_type() {
                    Some(covered) => Some(covered),
                    None => return Err(Error::BadRrsig),
                }
            }
            None => None,
        };
        let (owner, covered) = match (rrset, rrsig) {
            (Some(set), Some(sig)) => {
                if set.owner() != sig.owner() || covered_by_sig != Some(set.rr_type) {
                    return Err(Error::BadRrsig);
                }
                (set.owner(), set.rr_type)
            }
            (Some(set), None) => (set.owner(), set.rr_type),
            (None, Some(sig)) => (sig.owner(), covered_by_sig.unwrap()),
            (None, None) => return Err(Error::NullRrset),
        };
        for set in [rrset, rrsig].into_iter().flatten() {
            if set.class != self.class {
                return Err(Error::ClassMismatch);
            }
        }
        if !owner.eq_or_subdomain_of(&self.origin) {
            return Err(Error::NotInZone);
        }
        Ok((owner, covered))
    }

    fn validate_remove<'a>(
        &self,
        rrset: Option<&'a Rrset>,
        rrsig: Option<&'a Rrset>,
    ) -> Result<(&'a Name, Type), Error> {
        if rrset.is_none() && rrsig.is_none() {
            return Err(Error::NullRrset);
        }
        for set in [rrset, rrsig].into_iter().flatten() {
            if set.is_empty() {
                return Err(Error::RemoveError);
            }
            if set.class != self.class {
                return Err(Error::ClassMismatch);
            }
        }
        let covered_by_sig = match rrsig {
            Some(sig) => {
                if sig.rr_type != Type::RRSIG {
                    return Err(Error::RemoveError);
                }
                match sig.covered_type() {
                    Some(covered) => Some(covered),
                    None => return Err(Error::RemoveError),
                }
            }
            None => None,
        };
        match (rrset, rrsig) {
            (Some(set), Some(sig)) => {
                if set.owner() != sig.owner() || covered_by_sig != Some(set.rr_type) {
                    return Err(Error::RemoveError);
                }
                Ok((set.owner(), set.rr_type))
            }
            (Some(set), None) => Ok((set.owner(), set.rr_type)),
            (None, Some(sig)) => Ok((sig.owner(), covered_by_sig.unwrap())),
            (None, None) => unreachable!(),
        }
    }
}

/// Copies an RRset's RDATA into owned buffers.
fn collect_rdatas(rrset: &Rrset) -> Vec<Vec<u8>> {
    rrset.rdatas().map(|rdata| rdata.octets().to_vec()).collect()
}

/// Returns the first RDATA of `rrset`, or an empty buffer.
fn first_rdata(rrset: Option<&Rrset>) -> Vec<u8> {
    rrset
        .and_then(|set| set.rdatas().next())
        .map(|rdata| rdata.octets().to_vec())
        .unwrap_or_default()
}

/// Merges the given RDATA into the node's slot for `covered`, creating
/// the slot if it does not exist. Duplicate RDATA are dropped. The
/// slot keeps its chain position; a brand-new slot is appended, so the
/// chain stays in insertion order.
fn merge_into_chain(
    seg: &mut dyn Segment,
    node: ZoneNode,
    covered: Type,
    rrset: Option<&Rrset>,
    rrsig: Option<&Rrset>,
) -> Result<(), Error> {
    let new_rdatas = rrset.map(collect_rdatas).unwrap_or_default();
    let new_sigs = rrsig.map(collect_rdatas).unwrap_or_default();
    match RdataSet::find(seg, node.data(seg), covered, true) {
        Some(old) => {
            let mut rdatas = old.rdatas_owned(seg);
            for rdata in new_rdatas {
                if !rdatas.contains(&rdata) {
                    rdatas.push(rdata);
                }
            }
            let mut sigs = old.sig_rdatas_owned(seg);
            for sig in new_sigs {
                if !sigs.contains(&sig) {
                    sigs.push(sig);
                }
            }
            // An incoming plain RRset's TTL wins; a signature-only
            // merge keeps the stored TTL.
            let ttl = match rrset {
                Some(set) => set.ttl,
                None => old.ttl(seg),
            };
            let next = old.next_addr(seg);
            let replacement = rdataset::create(seg, covered, ttl, &rdatas, &sigs, next)?;
            splice_into_chain(seg, node, old, replacement);
            rdataset::destroy(seg, old.addr());
        }
        None => {
            let ttl = match (rrset, rrsig) {
                (Some(set), _) => set.ttl,
                (None, Some(sig)) => sig.ttl,
                (None, None) => unreachable!(),
            };
            let fresh = rdataset::create(seg, covered, ttl, &new_rdatas, &new_sigs, 0)?;
            append_to_chain(seg, node, fresh);
        }
    }
    Ok(())
}

fn append_to_chain(seg: &mut dyn Segment, node: ZoneNode, addr: u64) {
    let head = node.data_head(seg);
    if head == 0 {
        node.set_data_head(seg, addr);
        return;
    }
    let mut cur = RdataSet::from_addr(head);
    loop {
        match cur.next(seg) {
            Some(next) => cur = next,
            None => {
                cur.set_next(seg, addr);
                return;
            }
        }
    }
}

/// Replaces `old` with the set at `addr` (whose next link must already
/// equal `old`'s) in the node's chain.
fn splice_into_chain(seg: &mut dyn Segment, node: ZoneNode, old: RdataSet, addr: u64) {
    if node.data_head(seg) == old.addr() {
        node.set_data_head(seg, addr);
        return;
    }
    let mut cur = RdataSet::from_addr(node.data_head(seg));
    loop {
        if cur.next_addr(seg) == old.addr() {
            cur.set_next(seg, addr);
            return;
        }
        match cur.next(seg) {
            Some(next) => cur = next,
            None => unreachable!("the replaced set is not in the node's chain"),
        }
    }
}

fn unlink_from_chain(seg: &mut dyn Segment, node: ZoneNode, set: RdataSet) {
    let next = set.next_addr(seg);
    if node.data_head(seg) == set.addr() {
        node.set_data_head(seg, next);
        return;
    }
    let mut cur = RdataSet::from_addr(node.data_head(seg));
    loop {
        if cur.next_addr(seg) == set.addr() {
            cur.set_next(seg, next);
            return;
        }
        match cur.next(seg) {
            Some(following) => cur = following,
            None => unreachable!("the unlinked set is not in the node's chain"),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use lazy_static::lazy_static;

    use super::*;
    use crate::rr::Ttl;
    use crate::segment::{LocalSegment, MappedSegment, MockSegment, SegmentError};
    use crate::zone::ZoneTree;

    lazy_static! {
        static ref ZNAME: Name = "example.org.".parse().unwrap();
    }

    fn name(text: &str) -> Name {
        text.parse().unwrap()
    }

    fn rrset(owner: &str, rr_type: Type, ttl: u32, rdatas: &[&[u8]]) -> Rrset {
        let mut set = Rrset::new(name(owner), rr_type, Class::IN, Ttl::from(ttl));
        for rdata in rdatas {
            set.push_rdata((*rdata).try_into().unwrap());
        }
        set
    }

    /// An RRSIG set covering `covered`, with one RDATA per tag. The
    /// signature body is fake; only the covered-type field matters
    /// here.
    fn rrsig(owner: &str, covered: Type, ttl: u32, tags: &[&str]) -> Rrset {
        let mut set = Rrset::new(name(owner), Type::RRSIG, Class::IN, Ttl::from(ttl));
        for tag in tags {
            let mut rdata = u16::from(covered).to_be_bytes().to_vec();
            rdata.extend_from_slice(tag.as_bytes());
            set.push_rdata(rdata.as_slice().try_into().unwrap());
        }
        set
    }

    fn soa(minimum: u32) -> Rrset {
        let mut rdata = vec![1, b'n', 0, 1, b'r', 0];
        for value in [0u32, 0, 0, 0, minimum] {
            rdata.extend_from_slice(&value.to_be_bytes());
        }
        let mut set = Rrset::new(ZNAME.clone(), Type::SOA, Class::IN, Ttl::from(3600));
        set.push_rdata(rdata.as_slice().try_into().unwrap());
        set
    }

    // Hash algorithm 1, flags 0, 12 iterations, salt AABBCCDD. Not
    // meaningful NSEC3 parameters, but well-formed enough for these
    // tests.
    const NSEC3_PARAMS: [u8; 9] = [1, 0, 0, 12, 4, 0xaa, 0xbb, 0xcc, 0xdd];

    fn nsec3param() -> Rrset {
        let mut set =
            Rrset::new(ZNAME.clone(), Type::NSEC3PARAM, Class::IN, Ttl::from(3600));
        set.push_rdata(NSEC3_PARAMS.as_slice().try_into().unwrap());
        set
    }

    fn nsec3(owner: &str) -> Rrset {
        let mut rdata = NSEC3_PARAMS.to_vec();
        rdata.extend_from_slice(b"\x14fake-next-hashed-own");
        let mut set = Rrset::new(name(owner), Type::NSEC3, Class::IN, Ttl::from(5));
        set.push_rdata(rdata.as_slice().try_into().unwrap());
        set
    }

    fn for_each_segment(test: &dyn Fn(&mut dyn Segment)) {
        test(&mut MockSegment::new());
        test(&mut LocalSegment::new());
        let dir = tempfile::tempdir().unwrap();
        let mut mapped = MappedSegment::create(dir.path().join("updater.seg"), 4096).unwrap();
        test(&mut mapped);
    }

    fn setup(seg: &mut dyn Segment) -> ZoneDataUpdater {
        let data = ZoneData::create(seg, &ZNAME).unwrap();
        seg.set_named_address("zone", data.address()).unwrap();
        ZoneDataUpdater::new(seg, Class::IN, ZNAME.clone(), data).unwrap()
    }

    fn teardown(seg: &mut dyn Segment, updater: ZoneDataUpdater) {
        ZoneData::destroy(seg, updater.zone_data());
        seg.clear_named_address("zone");
        assert!(seg.all_memory_deallocated(), "memory leak detected");
    }

    fn clear_zone_data(seg: &mut dyn Segment, updater: ZoneDataUpdater) -> ZoneDataUpdater {
        ZoneData::destroy(seg, updater.zone_data());
        let data = ZoneData::create(seg, &ZNAME).unwrap();
        seg.set_named_address("zone", data.address()).unwrap();
        ZoneDataUpdater::new(seg, Class::IN, ZNAME.clone(), data).unwrap()
    }

    fn get_node(seg: &mut dyn Segment, data: ZoneData, owner: &str) -> ZoneNode {
        data.insert_name(seg, &name(owner)).unwrap().0
    }

    /// Checks the plain/signature RDATA counts of the slot for
    /// `rr_type` at `owner`. Expected counts of (0, 0) assert that the
    /// slot does not exist.
    fn check_rdataset(
        seg: &dyn Segment,
        tree: ZoneTree,
        owner: &str,
        rr_type: Type,
        expected: usize,
        expected_sigs: usize,
    ) {
        let node = match tree.find(seg, &name(owner)) {
            FindResult::Exact(node) => node,
            other => panic!("no node for {}: {:?}", owner, other),
        };
        let mut cur = node.data(seg);
        while let Some(set) = cur {
            if set.rr_type(seg) == rr_type {
                assert_eq!(set.rdata_count(seg), expected, "{} {}", owner, rr_type);
                assert_eq!(
                    set.sig_rdata_count(seg),
                    expected_sigs,
                    "{} {} sigs",
                    owner,
                    rr_type
                );
                return;
            }
            cur = set.next(seg);
        }
        // No slot of the type was found.
        assert_eq!(expected, 0);
        assert_eq!(expected_sigs, 0);
    }

    #[test]
    fn both_null() {
        for_each_segment(&|seg| {
            let mut updater = setup(seg);
            // At least either the covered RRset or the RRSIG must be
            // supplied.
            assert!(matches!(updater.add(seg, None, None), Err(Error::NullRrset)));
            assert!(matches!(
                updater.remove(seg, None, None),
                Err(Error::NullRrset)
            ));
            teardown(seg, updater);
        });
    }

    #[test]
    fn zone_min_ttl() {
        for_each_segment(&|seg| {
            let mut updater = setup(seg);
            // Adding a SOA updates the zone's minimum TTL.
            assert_eq!(updater.zone_data().min_ttl(seg), Ttl::from(0));
            updater.add(seg, Some(&soa(1200)), None).unwrap();
            assert_eq!(updater.zone_data().min_ttl(seg), Ttl::from(1200));
            teardown(seg, updater);
        });
    }

    #[test]
    fn rrsig_only() {
        for_each_segment(&|seg| {
            let mut updater = setup(seg);
            let data = updater.zone_data();

            // An RRSIG without its covered RRset can be added; the
            // resulting slot has signature RDATA but no plain RDATA.
            updater
                .add(
                    seg,
                    None,
                    Some(&rrsig("www.example.org.", Type::A, 3600, &["sig1"])),
                )
                .unwrap();
            let node = get_node(seg, data, "www.example.org.");
            let set = RdataSet::find(seg, node.data(seg), Type::A, true).unwrap();
            assert_eq!(set.rdata_count(seg), 0);
            assert_eq!(set.sig_rdata_count(seg), 1);
            // A plain-data lookup skips the placeholder.
            assert!(RdataSet::find(seg, node.data(seg), Type::A, false).is_none());

            // The placeholder must not prohibit an actual A RRset from
            // being added later; the two merge into one slot.
            updater
                .add(
                    seg,
                    Some(&rrset("www.example.org.", Type::A, 3600, &[&[192, 0, 2, 1]])),
                    None,
                )
                .unwrap();
            check_rdataset(seg, data.zone_tree(seg), "www.example.org.", Type::A, 1, 1);

            // Wildcard marking applies to the RRSIG-only case too.
            updater
                .add(
                    seg,
                    None,
                    Some(&rrsig("*.wild.example.org.", Type::A, 3600, &["sig1"])),
                )
                .unwrap();
            let node = get_node(seg, data, "wild.example.org.");
            assert!(node.flags(seg).contains(NodeFlags::WILDCARD));

            // Simply adding an RRSIG covering a delegating NS must not
            // enable the search-time callback.
            updater
                .add(
                    seg,
                    None,
                    Some(&rrsig("child.example.org.", Type::NS, 3600, &["sig1"])),
                )
                .unwrap();
            let node = get_node(seg, data, "child.example.org.");
            assert!(!node.flags(seg).contains(NodeFlags::CALLBACK));

            // Same for DNAME.
            updater
                .add(
                    seg,
                    None,
                    Some(&rrsig("dname.example.org.", Type::DNAME, 3600, &["sig1"])),
                )
                .unwrap();
            let node = get_node(seg, data, "dname.example.org.");
            assert!(!node.flags(seg).contains(NodeFlags::CALLBACK));

            // An RRSIG for NSEC3PARAM alone doesn't make the zone
            // NSEC3-signed.
            updater
                .add(
                    seg,
                    None,
                    Some(&rrsig("example.org.", Type::NSEC3PARAM, 3600, &["sig1"])),
                )
                .unwrap();
            assert!(!data.is_nsec3_signed(seg));

            // An RRSIG covering NSEC does mark the zone signed, just
            // like NSEC itself.
            assert!(!data.is_signed(seg));
            updater
                .add(
                    seg,
                    None,
                    Some(&rrsig("example.org.", Type::NSEC, 3600, &["sig1"])),
                )
                .unwrap();
            assert!(data.is_signed(seg));

            teardown(seg, updater);
        });
    }

    fn check_nsec3_rdata(seg: &mut dyn Segment, data: ZoneData, owner: &str) {
        let nsec3 = data.nsec3_data(seg).unwrap();
        let (node, _) = nsec3.insert_name(seg, &name(owner)).unwrap();
        let set = RdataSet::find(seg, node.data(seg), Type::NSEC3, true).unwrap();
        assert_eq!(set.rr_type(seg), Type::NSEC3);
        assert_eq!(set.rdata_count(seg), 0);
        assert_eq!(set.sig_rdata_count(seg), 1);
    }

    #[test]
    fn rrsig_for_nsec3_only() {
        // Adding only an RRSIG covering NSEC3 is tricky: it belongs in
        // the separate NSEC3 tree, but that space exists only once
        // NSEC3 or NSEC3PARAM data has been added. So RRSIG-only is
        // accepted in many cases, but rejected when nothing has
        // established the space.
        for_each_segment(&|seg| {
            let mut updater = setup(seg);

            // NSEC3PARAM first, then RRSIG-only, which is okay.
            updater
                .add(
                    seg,
                    Some(&nsec3param()),
                    Some(&rrsig("example.org.", Type::NSEC3PARAM, 3600, &["sig1"])),
                )
                .unwrap();
            assert!(updater.zone_data().is_nsec3_signed(seg));
            updater
                .add(
                    seg,
                    None,
                    Some(&rrsig("09GM.example.org.", Type::NSEC3, 3600, &["sig1"])),
                )
                .unwrap();
            check_nsec3_rdata(seg, updater.zone_data(), "09GM.example.org.");

            // Clear the zone, then establish the space with an NSEC3.
            let mut updater = clear_zone_data(seg, updater);
            updater
                .add(
                    seg,
                    Some(&nsec3("AABB.example.org.")),
                    Some(&rrsig("AABB.example.org.", Type::NSEC3, 5, &["sig1"])),
                )
                .unwrap();
            updater
                .add(
                    seg,
                    None,
                    Some(&rrsig("09GM.example.org.", Type::NSEC3, 3600, &["sig1"])),
                )
                .unwrap();
            check_nsec3_rdata(seg, updater.zone_data(), "09GM.example.org.");

            // With no NSEC3-related data beforehand, the RRSIG-only
            // addition is rejected; a limitation of the current
            // design.
            let mut updater = clear_zone_data(seg, updater);
            assert!(matches!(
                updater.add(
                    seg,
                    None,
                    Some(&rrsig("09GM.example.org.", Type::NSEC3, 3600, &["sig1"])),
                ),
                Err(Error::NotImplemented)
            ));

            teardown(seg, updater);
        });
    }

    #[test]
    fn nsec3_space_records_the_hash_parameters() {
        for_each_segment(&|seg| {
            let mut updater = setup(seg);
            updater.add(seg, Some(&nsec3param()), None).unwrap();
            let nsec3_data = updater.zone_data().nsec3_data(seg).unwrap();
            assert_eq!(nsec3_data.hash_algorithm(seg), 1);
            assert_eq!(nsec3_data.iterations(seg), 12);
            assert_eq!(nsec3_data.salt(seg), &[0xaa, 0xbb, 0xcc, 0xdd]);
            assert!(!nsec3_data.is_signed(seg));

            // A signature in the NSEC3 space marks it signed.
            updater
                .add(
                    seg,
                    Some(&nsec3("AABB.example.org.")),
                    Some(&rrsig("AABB.example.org.", Type::NSEC3, 5, &["sig1"])),
                )
                .unwrap();
            assert!(updater.zone_data().nsec3_data(seg).unwrap().is_signed(seg));
            teardown(seg, updater);
        });
    }

    #[test]
    fn updater_collision() {
        for_each_segment(&|seg| {
            let updater = setup(seg);
            let data = updater.zone_data();
            assert!(matches!(
                ZoneDataUpdater::new(seg, Class::IN, ZNAME.clone(), data),
                Err(Error::InvalidOperation)
            ));
            // Once the first updater finishes, binding works again.
            updater.finish(seg);
            let updater = ZoneDataUpdater::new(seg, Class::IN, ZNAME.clone(), data).unwrap();
            teardown(seg, updater);
        });
    }

    #[test]
    fn bad_add() {
        for_each_segment(&|seg| {
            let mut updater = setup(seg);
            // Out of zone.
            assert!(matches!(
                updater.add(
                    seg,
                    Some(&rrset("example.com.", Type::A, 3600, &[&[192, 0, 2, 1]])),
                    None
                ),
                Err(Error::NotInZone)
            ));
            // Wrong class.
            let mut chaos = Rrset::new(
                name("a.example.org."),
                Type::TXT,
                Class::CH,
                Ttl::from(3600),
            );
            chaos.push_rdata(b"x".as_slice().try_into().unwrap());
            assert!(matches!(
                updater.add(seg, Some(&chaos), None),
                Err(Error::ClassMismatch)
            ));
            // The signature argument must be an RRSIG covering the
            // plain set's type.
            assert!(matches!(
                updater.add(
                    seg,
                    Some(&rrset("a.example.org.", Type::A, 3600, &[&[192, 0, 2, 1]])),
                    Some(&rrsig("a.example.org.", Type::AAAA, 3600, &["sig1"]))
                ),
                Err(Error::BadRrsig)
            ));
            // Owner names of the pair must agree.
            assert!(matches!(
                updater.add(
                    seg,
                    Some(&rrset("a.example.org.", Type::A, 3600, &[&[192, 0, 2, 1]])),
                    Some(&rrsig("b.example.org.", Type::A, 3600, &["sig1"]))
                ),
                Err(Error::BadRrsig)
            ));
            teardown(seg, updater);
        });
    }

    #[test]
    fn remove() {
        for_each_segment(&|seg| {
            let mut updater = setup(seg);
            let tree = updater.zone_data().zone_tree(seg);
            let a_name = "a.example.org.";

            updater
                .add(
                    seg,
                    Some(&rrset(
                        a_name,
                        Type::AAAA,
                        5,
                        &[
                            &[0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1],
                            &[0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2],
                        ],
                    )),
                    Some(&rrsig(a_name, Type::AAAA, 5, &["sig1", "sig2"])),
                )
                .unwrap();
            updater
                .add(
                    seg,
                    Some(&rrset(
                        a_name,
                        Type::A,
                        5,
                        &[&[192, 0, 2, 1], &[192, 0, 2, 2]],
                    )),
                    None,
                )
                .unwrap();
            updater
                .add(
                    seg,
                    Some(&rrset(a_name, Type::TXT, 5, &[b"text-data1", b"text-data2"])),
                    None,
                )
                .unwrap();

            // Removing from a middle slot, one RDATA remaining.
            updater
                .remove(seg, Some(&rrset(a_name, Type::A, 5, &[&[192, 0, 2, 1]])), None)
                .unwrap();
            check_rdataset(seg, tree, a_name, Type::AAAA, 2, 2);
            check_rdataset(seg, tree, a_name, Type::A, 1, 0);
            check_rdataset(seg, tree, a_name, Type::TXT, 2, 0);

            // Removing from a middle slot, all gone for that type.
            updater
                .remove(seg, Some(&rrset(a_name, Type::A, 5, &[&[192, 0, 2, 2]])), None)
                .unwrap();
            check_rdataset(seg, tree, a_name, Type::AAAA, 2, 2);
            check_rdataset(seg, tree, a_name, Type::A, 0, 0);
            check_rdataset(seg, tree, a_name, Type::TXT, 2, 0);

            // Removing from the tail slot, one RDATA remaining.
            updater
                .remove(seg, Some(&rrset(a_name, Type::TXT, 5, &[b"text-data2"])), None)
                .unwrap();
            check_rdataset(seg, tree, a_name, Type::AAAA, 2, 2);
            check_rdataset(seg, tree, a_name, Type::TXT, 1, 0);

            // Removing from the tail slot, all gone for that type.
            updater
                .remove(seg, Some(&rrset(a_name, Type::TXT, 5, &[b"text-data1"])), None)
                .unwrap();
            check_rdataset(seg, tree, a_name, Type::AAAA, 2, 2);
            check_rdataset(seg, tree, a_name, Type::TXT, 0, 0);

            // Even if the RDATA don't match, remove() doesn't
            // complain; the API is deliberately lenient.
            updater
                .remove(
                    seg,
                    Some(&rrset(
                        a_name,
                        Type::AAAA,
                        5,
                        &[&[0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 3]],
                    )),
                    None,
                )
                .unwrap();
            check_rdataset(seg, tree, a_name, Type::AAAA, 2, 2);

            // Removing one RRSIG only.
            updater
                .remove(seg, None, Some(&rrsig(a_name, Type::AAAA, 5, &["sig1"])))
                .unwrap();
            check_rdataset(seg, tree, a_name, Type::AAAA, 2, 1);

            // Removing all the plain RDATA leaves a signature-only
            // placeholder.
            updater
                .remove(
                    seg,
                    Some(&rrset(
                        a_name,
                        Type::AAAA,
                        5,
                        &[
                            &[0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2],
                            &[0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1],
                        ],
                    )),
                    None,
                )
                .unwrap();
            check_rdataset(seg, tree, a_name, Type::AAAA, 0, 1);

            // Removing the rest deletes the slot, and with it the
            // node; the name then partial-matches the origin. This
            // also exercises removing a signature-only slot.
            updater
                .remove(seg, None, Some(&rrsig(a_name, Type::AAAA, 5, &["sig2"])))
                .unwrap();
            match tree.find(seg, &name(a_name)) {
                FindResult::Partial(node) => assert_eq!(node, tree.root()),
                other => panic!("unexpected result {:?}", other),
            }

            teardown(seg, updater);
        });
    }

    #[test]
    fn bad_remove() {
        for_each_segment(&|seg| {
            let mut updater = setup(seg);
            let a_name = "a.example.org.";

            // No such name.
            assert!(matches!(
                updater.remove(
                    seg,
                    Some(&rrset(a_name, Type::A, 5, &[&[192, 0, 2, 1]])),
                    None
                ),
                Err(Error::RemoveError)
            ));

            // No such type at an existing name.
            updater
                .add(
                    seg,
                    Some(&rrset(
                        a_name,
                        Type::AAAA,
                        5,
                        &[&[0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]],
                    )),
                    None,
                )
                .unwrap();
            assert!(matches!(
                updater.remove(
                    seg,
                    Some(&rrset(a_name, Type::A, 5, &[&[192, 0, 2, 1]])),
                    None
                ),
                Err(Error::RemoveError)
            ));

            // An RRset without RDATA is rejected, on either side.
            let empty = Rrset::new(name(a_name), Type::AAAA, Class::IN, Ttl::from(10));
            assert!(matches!(
                updater.remove(seg, Some(&empty), None),
                Err(Error::RemoveError)
            ));
            let empty_sig = Rrset::new(name(a_name), Type::RRSIG, Class::IN, Ttl::from(10));
            assert!(matches!(
                updater.remove(seg, None, Some(&empty_sig)),
                Err(Error::RemoveError)
            ));

            teardown(seg, updater);
        });
    }

    // The test data are not really valid NSEC3 records, but they are
    // well-formed and sufficient here.
    #[test]
    fn remove_nsec3() {
        for_each_segment(&|seg| {
            let mut updater = setup(seg);
            let n3_name = "n3.example.org.";

            // Invalid case: removing when there is no NSEC3 space at
            // all.
            assert!(matches!(
                updater.remove(
                    seg,
                    Some(&nsec3(n3_name)),
                    Some(&rrsig(n3_name, Type::NSEC3, 5, &["sig1"]))
                ),
                Err(Error::RemoveError)
            ));

            // Add an NSEC3 and its RRSIG, then remove both; the node
            // goes away with them.
            updater
                .add(
                    seg,
                    Some(&nsec3(n3_name)),
                    Some(&rrsig(n3_name, Type::NSEC3, 5, &["sig1"])),
                )
                .unwrap();
            updater
                .remove(
                    seg,
                    Some(&nsec3(n3_name)),
                    Some(&rrsig(n3_name, Type::NSEC3, 5, &["sig1"])),
                )
                .unwrap();
            let nsec3_tree = updater.zone_data().nsec3_data(seg).unwrap().nsec3_tree(seg);
            assert!(matches!(
                nsec3_tree.find(seg, &name(n3_name)),
                FindResult::Partial(_)
            ));

            // Re-add them and remove the NSEC3 only.
            updater
                .add(
                    seg,
                    Some(&nsec3(n3_name)),
                    Some(&rrsig(n3_name, Type::NSEC3, 5, &["sig1"])),
                )
                .unwrap();
            updater.remove(seg, Some(&nsec3(n3_name)), None).unwrap();
            assert!(matches!(
                nsec3_tree.find(seg, &name(n3_name)),
                FindResult::Exact(_)
            ));

            // Re-add and remove the RRSIG only.
            updater
                .add(
                    seg,
                    Some(&nsec3(n3_name)),
                    Some(&rrsig(n3_name, Type::NSEC3, 5, &["sig1"])),
                )
                .unwrap();
            updater
                .remove(seg, None, Some(&rrsig(n3_name, Type::NSEC3, 5, &["sig1"])))
                .unwrap();
            assert!(matches!(
                nsec3_tree.find(seg, &name(n3_name)),
                FindResult::Exact(_)
            ));

            // The specified name doesn't exist.
            updater
                .add(
                    seg,
                    Some(&nsec3(n3_name)),
                    Some(&rrsig(n3_name, Type::NSEC3, 5, &["sig1"])),
                )
                .unwrap();
            assert!(matches!(
                updater.remove(
                    seg,
                    Some(&nsec3("not.example.org.")),
                    Some(&rrsig("not.example.org.", Type::NSEC3, 5, &["sig1"]))
                ),
                Err(Error::RemoveError)
            ));

            teardown(seg, updater);
        });
    }

    #[test]
    fn add_remove_round_trip_releases_memory() {
        for_each_segment(&|seg| {
            let mut updater = setup(seg);
            let tree = updater.zone_data().zone_tree(seg);

            updater
                .add(
                    seg,
                    Some(&rrset("www.example.org.", Type::A, 3600, &[&[192, 0, 2, 1]])),
                    Some(&rrsig("www.example.org.", Type::A, 3600, &["sig1"])),
                )
                .unwrap();
            updater
                .add(
                    seg,
                    Some(&rrset("*.wild.example.org.", Type::TXT, 3600, &[b"wild"])),
                    None,
                )
                .unwrap();

            updater
                .remove(
                    seg,
                    Some(&rrset("www.example.org.", Type::A, 3600, &[&[192, 0, 2, 1]])),
                    Some(&rrsig("www.example.org.", Type::A, 3600, &["sig1"])),
                )
                .unwrap();
            updater
                .remove(
                    seg,
                    Some(&rrset("*.wild.example.org.", Type::TXT, 3600, &[b"wild"])),
                    None,
                )
                .unwrap();

            // Everything has unwound to the origin.
            for owner in ["www.example.org.", "*.wild.example.org.", "wild.example.org."] {
                match tree.find(seg, &name(owner)) {
                    FindResult::Partial(node) => assert_eq!(node, tree.root()),
                    other => panic!("unexpected result for {}: {:?}", owner, other),
                }
            }

            teardown(seg, updater);
        });
    }

    #[test]
    fn failed_allocation_surfaces_and_leaves_the_zone_usable() {
        let mut seg = MockSegment::new();
        let mut updater = setup(&mut seg);
        seg.fail_after(0);
        assert!(matches!(
            updater.add(
                &mut seg,
                Some(&rrset("oom.example.org.", Type::A, 3600, &[&[192, 0, 2, 1]])),
                None
            ),
            Err(Error::Segment(SegmentError::OutOfMemory))
        ));
        // The failure is surfaced, not retried, and the zone remains
        // usable.
        updater
            .add(
                &mut seg,
                Some(&rrset("oom.example.org.", Type::A, 3600, &[&[192, 0, 2, 1]])),
                None,
            )
            .unwrap();
        check_rdataset(
            &seg,
            updater.zone_data().zone_tree(&seg),
            "oom.example.org.",
            Type::A,
            1,
            0,
        );
        teardown(&mut seg, updater);
    }

    // Adds and removes many small RRsets. The underlying segment grows
    // (and relocates) many times mid-build; some growths happen while
    // inserting the RRSIG, some with the TXT.
    #[test]
    fn many_small_rrsets() {
        let mut seg = LocalSegment::new();
        let mut updater = setup(&mut seg);
        let data = updater.zone_data();
        let txt_rdata = [b'X'; 30];

        for i in 0..32768 {
            let owner = format!("{}.example.org.", i);
            let txt = rrset(&owner, Type::TXT, 3600, &[&txt_rdata[..]]);
            let sig = rrsig(&owner, Type::TXT, 3600, &["FAKE"]);
            updater.add(&mut seg, Some(&txt), Some(&sig)).unwrap();
            updater.remove(&mut seg, Some(&txt), None).unwrap();
            updater.remove(&mut seg, None, Some(&sig)).unwrap();
            updater.add(&mut seg, Some(&txt), Some(&sig)).unwrap();

            let node = get_node(&mut seg, data, &owner);
            let set = RdataSet::find(&seg, node.data(&seg), Type::TXT, true).unwrap();
            assert_eq!(set.rdata_count(&seg), 1);
            assert_eq!(set.sig_rdata_count(&seg), 1);
        }

        teardown(&mut seg, updater);
    }

    #[test]
    fn mapped_segment_reopen_recovers_the_zone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zone.seg");
        {
            let mut seg = MappedSegment::create(&path, 4096).unwrap();
            let data = ZoneData::create(&mut seg, &ZNAME).unwrap();
            let mut updater =
                ZoneDataUpdater::new(&mut seg, Class::IN, ZNAME.clone(), data).unwrap();
            updater
                .add(
                    &mut seg,
                    Some(&rrset("www.example.org.", Type::A, 3600, &[&[192, 0, 2, 1]])),
                    Some(&rrsig("www.example.org.", Type::A, 3600, &["sig1"])),
                )
                .unwrap();
            updater.add(&mut seg, Some(&soa(1200)), None).unwrap();
            updater.finish(&mut seg);
            seg.set_named_address("zone/example.org", data.address())
                .unwrap();
        }

        // A different attachment to the same backing file recovers the
        // published zone without re-parsing anything.
        let mut seg = MappedSegment::open(&path).unwrap();
        let found = seg.named_address("zone/example.org").unwrap();
        assert_eq!(found.generation, 1);
        let data = ZoneData::from_address(found.addr);
        assert_eq!(data.origin(&seg), *ZNAME);
        assert_eq!(data.min_ttl(&seg), Ttl::from(1200));
        match data.zone_tree(&seg).find(&seg, &name("www.example.org.")) {
            FindResult::Exact(node) => {
                let set = RdataSet::find(&seg, node.data(&seg), Type::A, true).unwrap();
                assert_eq!(set.rdata_count(&seg), 1);
                assert_eq!(set.sig_rdata_count(&seg), 1);
            }
            other => panic!("unexpected result {:?}", other),
        }

        // The previous updater finished, so a new one can bind.
        let updater = ZoneDataUpdater::new(&mut seg, Class::IN, ZNAME.clone(), data).unwrap();
        updater.finish(&mut seg);
    }
}
