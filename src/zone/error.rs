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

//! Implementation of the [`Error`] type for zone-data operations.

use std::fmt;

use crate::segment::SegmentError;

/// Errors that arise while building or mutating zone data.
#[derive(Debug)]
pub enum Error {
    /// `add` or `remove` was invoked with neither a plain RRset nor a
    /// signature RRset.
    NullRrset,

    /// The RRset's owner is not at or below the zone origin.
    NotInZone,

    /// The RRset's class does not match the zone's class.
    ClassMismatch,

    /// The signature argument is not a usable RRSIG set: wrong type,
    /// no RDATA, a covered type that contradicts the plain set, or an
    /// owner that differs from the plain set's.
    BadRrsig,

    /// A removal targeted a nonexistent name, a nonexistent type at an
    /// existing name, or supplied an RRset with no RDATA.
    RemoveError,

    /// A signature-only addition tried to bootstrap the NSEC3 space
    /// with no prior NSEC3 or NSEC3PARAM; a documented limitation, not
    /// a defect.
    NotImplemented,

    /// A second updater was bound to zone data that already has one.
    InvalidOperation,

    /// The underlying segment failed (out of memory, I/O).
    Segment(SegmentError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NullRrset => f.write_str("both the RRset and the RRSIG are empty"),
            Self::NotInZone => f.write_str("the RRset's owner is not within the zone"),
            Self::ClassMismatch => {
                f.write_str("the RRset's class does not match the zone's class")
            }
            Self::BadRrsig => f.write_str("the RRSIG argument is not usable"),
            Self::RemoveError => {
                f.write_str("the removal target does not exist or the RRset is empty")
            }
            Self::NotImplemented => f.write_str(
                "an RRSIG-only addition cannot bootstrap the NSEC3 name space",
            ),
            Self::InvalidOperation => {
                f.write_str("the zone data is already bound to an updater")
            }
            Self::Segment(e) => write!(f, "segment failure: {}", e),
        }
    }
}

impl From<SegmentError> for Error {
    fn from(e: SegmentError) -> Self {
        Self::Segment(e)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Segment(e) => Some(e),
            _ => None,
        }
    }
}
