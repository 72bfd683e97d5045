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

//! Data structures and routines for handling DNS resource record data.

use std::convert::TryFrom;
use std::fmt;
use std::iter::FusedIterator;
use std::ops::Deref;
use std::str::FromStr;

use crate::class::Class;
use crate::name::Name;
use crate::util::Caseless;

////////////////////////////////////////////////////////////////////////
// RRSETS                                                             //
////////////////////////////////////////////////////////////////////////

/// A data structure for resource record sets.
///
/// [RFC 2181 § 5] defined an RRset as a group of records with the same
/// owner, class, and type, and also stipulated that all records in an
/// RRset have the same TTL. Zone data is fed to this crate one RRset at
/// a time, so this is the unit the update protocol works in. Multiple
/// records are stored in the same `Rrset` structure by setting their
/// common [`Type`], [`Class`], and [`Ttl`], and then pushing their
/// [`Rdata`]s, one for each record.
///
/// The RDATA are stored contiguously, each prefixed with a 16-bit
/// length, which keeps many small RDATA in the same cache line and is
/// also the encoding the segment-resident record sets use.
///
/// [RFC 2181 § 5]: https://datatracker.ietf.org/doc/html/rfc2181#section-5
pub struct Rrset {
    owner: Name,
    pub rr_type: Type,
    pub class: Class,
    pub ttl: Ttl,
    rdatas: Vec<u8>,
}

impl Rrset {
    /// Creates a new `Rrset` with the given owner, RR type, class, and
    /// TTL. It will initially contain no record data.
    pub fn new(owner: Name, rr_type: Type, class: Class, ttl: Ttl) -> Self {
        Self {
            owner,
            rr_type,
            class,
            ttl,
            rdatas: Vec::new(),
        }
    }

    /// Returns the owner name of this `Rrset`.
    pub fn owner(&self) -> &Name {
        &self.owner
    }

    /// Adds an [`Rdata`] to this `Rrset`. Following the behavior of
    /// other nameservers, we silently discard [`Rdata`] that is already
    /// present in the `Rrset`.
    pub fn push_rdata(&mut self, rdata: &Rdata) {
        for existing_rdata in self.rdatas() {
            if existing_rdata.octets() == rdata.octets() {
                return;
            }
        }
        self.rdatas.reserve(2 + rdata.len());
        self.rdatas
            .extend_from_slice(&(rdata.len() as u16).to_le_bytes());
        self.rdatas.extend_from_slice(rdata);
    }

    /// Returns an iterator over the [`Rdata`] of this `Rrset`.
    pub fn rdatas(&self) -> RdataIterator {
        RdataIterator {
            cursor: &self.rdatas,
        }
    }

    /// Returns the number of [`Rdata`] in this `Rrset`.
    pub fn rdata_count(&self) -> usize {
        self.rdatas().count()
    }

    /// Returns whether this `Rrset` contains no [`Rdata`].
    pub fn is_empty(&self) -> bool {
        self.rdatas.is_empty()
    }

    /// For an RRSIG `Rrset`, returns the covered RR type recorded in
    /// the first RDATA ([RFC 4034 § 3.1]: the type covered field is the
    /// first 16 bits, in network byte order). Returns [`None`] if this
    /// is not an RRSIG set or it has no well-formed RDATA.
    ///
    /// [RFC 4034 § 3.1]: https://datatracker.ietf.org/doc/html/rfc4034#section-3.1
    pub fn covered_type(&self) -> Option<Type> {
        if self.rr_type != Type::RRSIG {
            return None;
        }
        let first = self.rdatas().next()?;
        let octets: [u8; 2] = first.octets().get(0..2)?.try_into().ok()?;
        Some(Type::from(u16::from_be_bytes(octets)))
    }

    /// For a SOA `Rrset`, returns the MINIMUM field of the first RDATA
    /// ([RFC 1035 § 3.3.13]: the final 32-bit integer). Returns
    /// [`None`] if this is not a SOA set or it has no well-formed
    /// RDATA.
    ///
    /// [RFC 1035 § 3.3.13]: https://datatracker.ietf.org/doc/html/rfc1035#section-3.3.13
    pub fn soa_minimum(&self) -> Option<Ttl> {
        if self.rr_type != Type::SOA {
            return None;
        }
        let first = self.rdatas().next()?;
        let octets = first.octets();
        if octets.len() < 4 {
            return None;
        }
        let minimum: [u8; 4] = octets[octets.len() - 4..].try_into().ok()?;
        Some(Ttl::from(u32::from_be_bytes(minimum)))
    }
}

impl fmt::Debug for Rrset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Rrset")
            .field("owner", &self.owner)
            .field("rr_type", &self.rr_type)
            .field("class", &self.class)
            .field("ttl", &self.ttl)
            .field("rdata_count", &self.rdata_count())
            .finish()
    }
}

/// An iterator over the [`Rdata`] of an [`Rrset`].
pub struct RdataIterator<'a> {
    cursor: &'a [u8],
}

impl<'a> Iterator for RdataIterator<'a> {
    type Item = &'a Rdata;

    fn next(&mut self) -> Option<Self::Item> {
        let len_octets: &[u8; 2] = self.cursor.get(0..2)?.try_into().ok()?;
        let len = u16::from_le_bytes(*len_octets) as usize;
        if let Some(rdata) = self.cursor.get(2..len + 2) {
            self.cursor = &self.cursor[len + 2..];
            Some(Rdata::from_unchecked(rdata))
        } else {
            None
        }
    }
}

impl FusedIterator for RdataIterator<'_> {}

////////////////////////////////////////////////////////////////////////
// RDATA                                                              //
////////////////////////////////////////////////////////////////////////

/// A type for record RDATA.
///
/// The RDATA of a record is limited to 65,535 octets. The `Rdata` type
/// is a wrapper over `[u8]` that can only be constructed if the
/// underlying data has a valid length.
#[derive(Eq, PartialEq)]
#[repr(transparent)]
pub struct Rdata {
    octets: [u8],
}

impl Rdata {
    /// Converts a `&[u8]` to a `&Rdata`, without checking the length;
    /// for internal use only.
    fn from_unchecked(octets: &[u8]) -> &Self {
        unsafe { &*(octets as *const [u8] as *const Self) }
    }

    /// Returns the underlying octet slice.
    pub fn octets(&self) -> &[u8] {
        self
    }
}

impl<'a> TryFrom<&'a [u8]> for &'a Rdata {
    type Error = RdataTooLongError;

    fn try_from(octets: &'a [u8]) -> Result<Self, Self::Error> {
        if octets.len() > (u16::MAX as usize) {
            Err(RdataTooLongError)
        } else {
            Ok(Rdata::from_unchecked(octets))
        }
    }
}

impl<'a, const N: usize> TryFrom<&'a [u8; N]> for &'a Rdata {
    type Error = RdataTooLongError;

    fn try_from(octets: &'a [u8; N]) -> Result<Self, Self::Error> {
        octets[..].try_into()
    }
}

impl Deref for Rdata {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.octets
    }
}

impl fmt::Debug for Rdata {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Rdata({} octets)", self.octets.len())
    }
}

/// An error signaling that a `&[u8]` cannot be converted to a `&Rdata`
/// because it is too long.
#[derive(Debug, Eq, PartialEq)]
pub struct RdataTooLongError;

impl fmt::Display for RdataTooLongError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("RDATA is too long")
    }
}

impl std::error::Error for RdataTooLongError {}

////////////////////////////////////////////////////////////////////////
// RR TYPES                                                           //
////////////////////////////////////////////////////////////////////////

/// Represents the RR type of a DNS record.
///
/// An RR type is represented on the wire as an unsigned 16-bit integer.
/// Hence this is basically a wrapper around `u16` with nice
/// [`Debug`](fmt::Debug), [`Display`](fmt::Display), and [`FromStr`]
/// implementations for working with the common textual representations
/// of RR types. In addition, constants for common RR types (e.g.
/// [`Type::A`]) are provided.
#[derive(Clone, Copy, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Type(u16);

impl Type {
    pub const A: Type = Type(1);
    pub const NS: Type = Type(2);
    pub const CNAME: Type = Type(5);
    pub const SOA: Type = Type(6);
    pub const PTR: Type = Type(12);
    pub const HINFO: Type = Type(13);
    pub const MX: Type = Type(15);
    pub const TXT: Type = Type(16);
    pub const AAAA: Type = Type(28);
    pub const SRV: Type = Type(33);
    pub const DNAME: Type = Type(39);
    pub const DS: Type = Type(43);
    pub const RRSIG: Type = Type(46);
    pub const NSEC: Type = Type(47);
    pub const DNSKEY: Type = Type(48);
    pub const NSEC3: Type = Type(50);
    pub const NSEC3PARAM: Type = Type(51);
}

impl From<u16> for Type {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl From<Type> for u16 {
    fn from(rr_type: Type) -> Self {
        rr_type.0
    }
}

impl FromStr for Type {
    type Err = &'static str;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match Caseless(text) {
            Caseless("A") => Ok(Self::A),
            Caseless("NS") => Ok(Self::NS),
            Caseless("CNAME") => Ok(Self::CNAME),
            Caseless("SOA") => Ok(Self::SOA),
            Caseless("PTR") => Ok(Self::PTR),
            Caseless("HINFO") => Ok(Self::HINFO),
            Caseless("MX") => Ok(Self::MX),
            Caseless("TXT") => Ok(Self::TXT),
            Caseless("AAAA") => Ok(Self::AAAA),
            Caseless("SRV") => Ok(Self::SRV),
            Caseless("DNAME") => Ok(Self::DNAME),
            Caseless("DS") => Ok(Self::DS),
            Caseless("RRSIG") => Ok(Self::RRSIG),
            Caseless("NSEC") => Ok(Self::NSEC),
            Caseless("DNSKEY") => Ok(Self::DNSKEY),
            Caseless("NSEC3") => Ok(Self::NSEC3),
            Caseless("NSEC3PARAM") => Ok(Self::NSEC3PARAM),
            _ => {
                if text
                    .get(0..4)
                    .map_or(false, |prefix| prefix.eq_ignore_ascii_case("TYPE"))
                {
                    text[4..]
                        .parse::<u16>()
                        .map(Self::from)
                        .or(Err("type value is not a valid unsigned 16-bit integer"))
                } else {
                    Err("unknown type")
                }
            }
        }
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::A => f.write_str("A"),
            Self::NS => f.write_str("NS"),
            Self::CNAME => f.write_str("CNAME"),
            Self::SOA => f.write_str("SOA"),
            Self::PTR => f.write_str("PTR"),
            Self::HINFO => f.write_str("HINFO"),
            Self::MX => f.write_str("MX"),
            Self::TXT => f.write_str("TXT"),
            Self::AAAA => f.write_str("AAAA"),
            Self::SRV => f.write_str("SRV"),
            Self::DNAME => f.write_str("DNAME"),
            Self::DS => f.write_str("DS"),
            Self::RRSIG => f.write_str("RRSIG"),
            Self::NSEC => f.write_str("NSEC"),
            Self::DNSKEY => f.write_str("DNSKEY"),
            Self::NSEC3 => f.write_str("NSEC3"),
            Self::NSEC3PARAM => f.write_str("NSEC3PARAM"),
            Self(value) => write!(f, "TYPE{}", value), // RFC 3597 § 5
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TTLS                                                               //
////////////////////////////////////////////////////////////////////////

/// The time to live (TTL) of a DNS record.
///
/// There are contradictory definitions of the TTL field in [RFC 1035]
/// (see [erratum 2130]), so [RFC 2181 § 8] clarified that TTL values
/// are unsigned integers between 0 and 2³¹ - 1, inclusive. Because the
/// TTL field is 32 bits wide, the most significant bit is zero. A TTL
/// value received with the most significant bit set is interpreted as
/// zero.
///
/// This type wraps `u32` to implement [RFC 2181 § 8]. The public API
/// will only instantiate `Ttl` objects whose underlying `u32` values
/// have the most significant bit set to zero, and `Ttl::from(u32)`
/// treats TTL wire values with the most significant bit set as zero.
///
/// [Erratum 2130]: https://www.rfc-editor.org/errata/eid2130
/// [RFC 1035]: https://datatracker.ietf.org/doc/html/rfc1035
/// [RFC 2181 § 8]: https://datatracker.ietf.org/doc/html/rfc2181#section-8
#[derive(Clone, Copy, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Ttl(u32);

impl From<u32> for Ttl {
    fn from(raw: u32) -> Self {
        if raw > i32::MAX as u32 {
            Self(0)
        } else {
            Self(raw)
        }
    }
}

impl From<Ttl> for u32 {
    fn from(ttl: Ttl) -> Self {
        ttl.0
    }
}

impl fmt::Debug for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Name {
        "example.org.".parse().unwrap()
    }

    #[test]
    fn rrset_works() {
        let loopback1: &Rdata = (&[127, 0, 0, 1]).try_into().unwrap();
        let loopback2: &Rdata = (&[127, 0, 0, 2]).try_into().unwrap();
        let mut rrset = Rrset::new(owner(), Type::A, Class::IN, Ttl::from(3600));
        rrset.push_rdata(loopback1);
        rrset.push_rdata(loopback2);
        assert_eq!(rrset.rr_type, Type::A);
        assert_eq!(rrset.class, Class::IN);
        assert_eq!(u32::from(rrset.ttl), 3600);
        assert_eq!(rrset.rdatas().collect::<Vec<_>>(), [loopback1, loopback2]);
        assert_eq!(rrset.rdata_count(), 2);
    }

    #[test]
    fn rrset_ignores_duplicates() {
        let loopback: &Rdata = (&[127, 0, 0, 1]).try_into().unwrap();
        let mut rrset = Rrset::new(owner(), Type::A, Class::IN, Ttl::from(3600));
        rrset.push_rdata(loopback);
        rrset.push_rdata(loopback);
        assert_eq!(rrset.rdata_count(), 1);
    }

    #[test]
    fn covered_type_reads_the_leading_octets() {
        let mut rrsig = Rrset::new(owner(), Type::RRSIG, Class::IN, Ttl::from(3600));
        let mut rdata = u16::from(Type::AAAA).to_be_bytes().to_vec();
        rdata.extend_from_slice(b"fake signature");
        rrsig.push_rdata(rdata.as_slice().try_into().unwrap());
        assert_eq!(rrsig.covered_type(), Some(Type::AAAA));

        let a = Rrset::new(owner(), Type::A, Class::IN, Ttl::from(3600));
        assert_eq!(a.covered_type(), None);
    }

    #[test]
    fn soa_minimum_reads_the_trailing_octets() {
        let mut soa = Rrset::new(owner(), Type::SOA, Class::IN, Ttl::from(3600));
        let mut rdata = Vec::new();
        rdata.extend_from_slice(&[1, b'n', 0]); // MNAME n.
        rdata.extend_from_slice(&[1, b'r', 0]); // RNAME r.
        for value in [1u32, 7200, 3600, 2_419_200, 1200] {
            rdata.extend_from_slice(&value.to_be_bytes());
        }
        soa.push_rdata(rdata.as_slice().try_into().unwrap());
        assert_eq!(soa.soa_minimum(), Some(Ttl::from(1200)));
    }

    #[test]
    fn rdata_constructor_rejects_long_slice() {
        let too_long = vec![0; u16::MAX as usize + 1];
        assert_eq!(<&Rdata>::try_from(&too_long[..]), Err(RdataTooLongError));
    }

    #[test]
    fn type_displays_according_to_rfc3597() {
        // TYPE65280 is from the private use range, so it should always
        // be unknown.
        let rr_type = Type::from(0xff00);
        assert_eq!(rr_type.to_string(), "TYPE65280");
        assert_eq!(Type::NSEC3PARAM.to_string(), "NSEC3PARAM");
    }

    #[test]
    fn type_parses_according_to_rfc3597() {
        let type_a: Type = "TYPE1".parse().unwrap();
        let type_65280: Type = "TYPE65280".parse().unwrap();
        assert_eq!(type_a, Type::A);
        assert_eq!(u16::from(type_65280), 65280);
        assert_eq!("nsec3".parse::<Type>().unwrap(), Type::NSEC3);
    }

    #[test]
    fn small_ttls_are_not_modified() {
        let i32_max = i32::MAX as u32;
        assert_eq!(u32::from(Ttl::from(0)), 0);
        assert_eq!(u32::from(Ttl::from(23)), 23);
        assert_eq!(u32::from(Ttl::from(i32_max)), i32_max);
    }

    #[test]
    fn large_ttls_become_zero() {
        assert_eq!(u32::from(Ttl::from(i32::MAX as u32 + 1)), 0);
    }
}
