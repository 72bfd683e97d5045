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

//! An in-memory, segment-resident storage engine for authoritative DNS
//! zone data.
//!
//! The engine keeps a zone as a name-indexed tree of record sets that
//! can live in ordinary process heap or in a growable, file-backed
//! region, and provides the incremental updater that builds and
//! mutates that tree while preserving the DNSSEC-related invariants
//! (signed-ness, the separate NSEC3 name space, wildcard and
//! delegation marking, minimum-TTL tracking).
//!
//! The layers, bottom up:
//!
//! * [`segment`] — the allocator abstraction. A [`segment::Segment`]
//!   hands out offset-addressed storage from one contiguous region;
//!   because growth may relocate the region, everything built on top
//!   links by offset and resolves through the segment at each access.
//!   Backends: heap ([`segment::LocalSegment`]), memory-mapped file
//!   ([`segment::MappedSegment`]), test double
//!   ([`segment::MockSegment`]).
//! * [`zone`] — the data structures: [`zone::ZoneTree`] and
//!   [`zone::ZoneNode`] (the name tree, with exact and
//!   closest-encloser lookup), [`zone::RdataSet`] (per-type record
//!   storage at a node), [`zone::ZoneData`] and [`zone::Nsec3Data`]
//!   (one zone's dataset), and [`zone::ZoneDataUpdater`] (the
//!   RRset-at-a-time build and mutation protocol).
//! * [`name`], [`rr`], and [`class`] — the value types the engine
//!   consumes: domain names with label-ordered comparison, RR types,
//!   TTLs, RDATA, and RRsets.
//!
//! Builds are single-writer: one updater per zone data, enforced at
//! binding time. A finished build is published by storing the zone
//! data's address in the segment's named-address directory; readers
//! resolve the name (and its generation counter) at the moment of use,
//! so they never observe a partially built tree, and a republication
//! is a single directory store.

pub mod class;
pub mod name;
pub mod rr;
pub mod segment;
mod util;
pub mod zone;
