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

//! Implementation of data structures related to domain names.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use arrayvec::ArrayVec;

/// The maximum number of non-root labels in a domain name.
pub const MAX_N_LABELS: usize = 127;

/// The maximum length of the uncompressed on-the-wire representation of
/// a domain name.
pub const MAX_WIRE_LEN: usize = 255;

/// The maximum length of a label in a domain name (not including the
/// octet that provides the length).
pub const MAX_LABEL_LEN: usize = 63;

////////////////////////////////////////////////////////////////////////
// NAME STRUCTURE                                                     //
////////////////////////////////////////////////////////////////////////

/// A structure to represent a domain name.
///
/// A `Name` owns the uncompressed on-the-wire representation of a
/// domain name ([RFC 1035 § 3.1]) together with an index giving the
/// offset of each label in that representation. Label 0 is the
/// leftmost (most specific) label; the terminal null label of the root
/// is not indexed.
///
/// In accordance with [RFC 1034 § 3.1], comparisons between `Name`s
/// are ASCII-case-insensitive, while case is preserved in the internal
/// representation. The [`Ord`] implementation orders names label by
/// label starting from the root, which is the order the DNS tree
/// imposes (and the order DNSSEC canonical form uses).
///
/// [RFC 1034 § 3.1]: https://datatracker.ietf.org/doc/html/rfc1034#section-3.1
/// [RFC 1035 § 3.1]: https://datatracker.ietf.org/doc/html/rfc1035#section-3.1
#[derive(Clone)]
pub struct Name {
    wire: Box<[u8]>,
    offsets: Box<[u8]>,
}

impl Name {
    /// Returns the root name `.`.
    pub fn root() -> Self {
        Self {
            wire: Box::new([0]),
            offsets: Box::new([]),
        }
    }

    /// Constructs a `Name` from its uncompressed on-the-wire
    /// representation. The representation must be exactly one name,
    /// terminated by the null root label.
    pub fn try_from_wire(wire: &[u8]) -> Result<Self, Error> {
        if wire.len() > MAX_WIRE_LEN {
            return Err(Error::TooLong);
        }
        let mut offsets = ArrayVec::<u8, MAX_N_LABELS>::new();
        let mut pos = 0;
        loop {
            let len = *wire.get(pos).ok_or(Error::BadWireRepresentation)? as usize;
            if len == 0 {
                pos += 1;
                break;
            } else if len > MAX_LABEL_LEN {
                return Err(Error::LabelTooLong);
            }
            offsets.try_push(pos as u8).or(Err(Error::TooManyLabels))?;
            pos += 1 + len;
        }
        if pos != wire.len() {
            return Err(Error::BadWireRepresentation);
        }
        Ok(Self {
            wire: wire.into(),
            offsets: offsets.as_slice().into(),
        })
    }

    /// Returns the on-the-wire representation of this `Name`.
    pub fn wire_repr(&self) -> &[u8] {
        &self.wire
    }

    /// Returns the number of labels in this `Name`, not counting the
    /// terminal null label. The root name has zero labels.
    pub fn label_count(&self) -> usize {
        self.offsets.len()
    }

    /// Returns label `n` of this `Name`. Label 0 is the leftmost
    /// label.
    ///
    /// # Panics
    ///
    /// Panics if `n` is out of range.
    pub fn label(&self, n: usize) -> &[u8] {
        let offset = self.offsets[n] as usize;
        let len = self.wire[offset] as usize;
        &self.wire[offset + 1..offset + 1 + len]
    }

    /// Returns an iterator over the labels of this `Name`, leftmost
    /// first. The terminal null label is not included.
    pub fn labels(&self) -> impl Iterator<Item = &[u8]> + '_ {
        (0..self.label_count()).map(|n| self.label(n))
    }

    /// Returns whether this `Name`'s leftmost label is the asterisk
    /// label `*`.
    pub fn is_wildcard(&self) -> bool {
        self.label_count() > 0 && self.label(0) == b"*"
    }

    /// Returns the `Name` produced by removing the leftmost label, or
    /// [`None`] for the root name.
    pub fn parent(&self) -> Option<Self> {
        if self.label_count() == 0 {
            return None;
        }
        let first_len = self.wire[0] as usize;
        let wire = &self.wire[1 + first_len..];
        let offsets: Vec<u8> = self.offsets[1..]
            .iter()
            .map(|&o| o - (first_len as u8 + 1))
            .collect();
        Some(Self {
            wire: wire.into(),
            offsets: offsets.into(),
        })
    }

    /// Returns whether this `Name` equals `other` or is a subdomain of
    /// it. Comparison is case-insensitive.
    pub fn eq_or_subdomain_of(&self, other: &Self) -> bool {
        let n = self.label_count();
        let m = other.label_count();
        if n < m {
            return false;
        }
        (0..m).all(|k| label_eq(self.label(n - 1 - k), other.label(m - 1 - k)))
    }
}

/// Compares two labels per the canonical DNS ordering: byte-wise,
/// ASCII-case-insensitively, with a shorter label that is a prefix of a
/// longer one sorting first.
pub(crate) fn label_cmp(a: &[u8], b: &[u8]) -> Ordering {
    let a_lower = a.iter().map(u8::to_ascii_lowercase);
    let b_lower = b.iter().map(u8::to_ascii_lowercase);
    a_lower.cmp(b_lower)
}

/// Tests two labels for ASCII-case-insensitive equality.
pub(crate) fn label_eq(a: &[u8], b: &[u8]) -> bool {
    a.eq_ignore_ascii_case(b)
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        let n = self.label_count();
        let m = other.label_count();
        for k in 0..n.min(m) {
            let ordering = label_cmp(self.label(n - 1 - k), other.label(m - 1 - k));
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        n.cmp(&m)
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Case-insensitive, to agree with PartialEq. The length octets
        // are included, so label boundaries contribute to the hash.
        for &octet in self.wire.iter() {
            state.write_u8(octet.to_ascii_lowercase());
        }
    }
}

impl FromStr for Name {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.is_empty() {
            return Err(Error::Empty);
        }
        if text == "." {
            return Ok(Self::root());
        }
        let text = text.strip_suffix('.').unwrap_or(text);
        let mut wire = Vec::with_capacity(text.len() + 2);
        let mut offsets = ArrayVec::<u8, MAX_N_LABELS>::new();
        for label in text.split('.') {
            if label.is_empty() {
                return Err(Error::EmptyLabel);
            } else if label.len() > MAX_LABEL_LEN {
                return Err(Error::LabelTooLong);
            }
            offsets
                .try_push(wire.len() as u8)
                .or(Err(Error::TooManyLabels))?;
            wire.push(label.len() as u8);
            wire.extend_from_slice(label.as_bytes());
            if wire.len() + 1 > MAX_WIRE_LEN {
                return Err(Error::TooLong);
            }
        }
        wire.push(0);
        Ok(Self {
            wire: wire.into(),
            offsets: offsets.as_slice().into(),
        })
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.label_count() == 0 {
            return f.write_str(".");
        }
        for label in self.labels() {
            for &octet in label {
                if octet.is_ascii_graphic() && octet != b'.' && octet != b'\\' {
                    write!(f, "{}", octet as char)?;
                } else {
                    write!(f, "\\{:03}", octet)?;
                }
            }
            f.write_str(".")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// Errors that arise when constructing a [`Name`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    Empty,
    EmptyLabel,
    LabelTooLong,
    TooLong,
    TooManyLabels,
    BadWireRepresentation,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::Empty => f.write_str("the name is empty"),
            Self::EmptyLabel => f.write_str("the name contains an empty label"),
            Self::LabelTooLong => f.write_str("a label exceeds 63 octets"),
            Self::TooLong => f.write_str("the name exceeds 255 octets"),
            Self::TooManyLabels => f.write_str("the name has too many labels"),
            Self::BadWireRepresentation => {
                f.write_str("the on-the-wire representation is not a valid name")
            }
        }
    }
}

impl std::error::Error for Error {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
