//! Kademlia node Id or a lookup target, and the XOR metric over them.
use rand::Rng;
use std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

use crate::{Error, Result};

/// The size of node IDs in bytes.
pub const ID_SIZE: usize = 20;
/// The size of node IDs in bits, which is also the number of k-buckets in a routing table.
pub const MAX_DISTANCE: u8 = ID_SIZE as u8 * 8;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Kademlia node Id or a lookup target
///
/// The derived ordering is plain byte order, useful for keying ordered maps.
/// Closeness is only ever measured through [Id::distance].
pub struct Id(pub [u8; ID_SIZE]);

impl Id {
    pub fn random() -> Id {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; ID_SIZE] = rng.gen();

        Id(random_bytes)
    }

    /// Create a new Id from some bytes. Returns Err if `bytes` is not of length
    /// [ID_SIZE](crate::ID_SIZE).
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Id> {
        let bytes = bytes.as_ref();
        if bytes.len() != ID_SIZE {
            return Err(Error::InvalidIdSize(bytes.len()));
        }

        let mut tmp: [u8; ID_SIZE] = [0; ID_SIZE];
        tmp[..ID_SIZE].clone_from_slice(&bytes[..ID_SIZE]);

        Ok(Id(tmp))
    }

    /// Derive an Id from arbitrary content, as the SHA-1 digest of `data`.
    pub fn digest<T: AsRef<[u8]>>(data: T) -> Id {
        Id(sha1_smol::Sha1::from(data).digest().bytes())
    }

    /// XOR distance between this Id and another, as a 160 bits unsigned integer.
    ///
    /// Symmetric, and zero only when both ids are identical.
    pub fn distance(&self, other: &Id) -> Distance {
        let mut xor = [0_u8; ID_SIZE];

        for (i, byte) in xor.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }

        Distance(xor)
    }

    /// Index of the k-bucket `other` belongs to, in a routing table owned by `self`.
    ///
    /// That is the position of the first bit (counting from the most significant bit)
    /// where both ids differ:
    ///
    /// Index of an Id differing in the first bit is 0
    /// Index of an Id differing only in the last bit is 159
    /// Index of an Id with 5 leading matching bits is 5
    ///
    /// Returns `None` for `self`, which never belongs to its own routing table.
    pub fn bucket_index(&self, other: &Id) -> Option<u8> {
        for i in 0..ID_SIZE {
            let xor = self.0[i] ^ other.0[i];

            if xor != 0 {
                // leading zeros so far + leading zeros of this byte
                return Some((i as u32 * 8 + xor.leading_zeros()) as u8);
            }
        }

        None
    }

    /// Random Id falling in the bucket `index` of a routing table owned by `self`,
    /// useful to refresh a bucket by looking up a target within its range.
    ///
    /// `index` is clamped to 159.
    pub fn random_in_bucket(&self, index: u8) -> Id {
        let index = index.min(MAX_DISTANCE - 1);
        let mut bytes = Id::random().0;

        let byte = (index / 8) as usize;
        let bit = index % 8;

        bytes[..byte].copy_from_slice(&self.0[..byte]);

        let prefix: u8 = !(0xff >> bit);
        let flipped: u8 = 0x80 >> bit;

        bytes[byte] = (self.0[byte] & prefix)
            | (!self.0[byte] & flipped)
            | (bytes[byte] & !(prefix | flipped));

        Id(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl FromStr for Id {
    type Err = Error;

    /// Parse an Id from 40 hexadecimal characters.
    fn from_str(s: &str) -> Result<Id> {
        if s.len() != ID_SIZE * 2 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidIdEncoding(s.to_string()));
        }

        let mut bytes = [0_u8; ID_SIZE];

        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| Error::InvalidIdEncoding(s.to_string()))?;
        }

        Ok(Id(bytes))
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// XOR of two [Id]s.
///
/// Ordering compares the bytes as a big-endian unsigned integer: smaller is closer.
pub struct Distance(pub [u8; ID_SIZE]);

impl Distance {
    pub const ZERO: Distance = Distance([0; ID_SIZE]);
    pub const MAX: Distance = Distance([0xff; ID_SIZE]);

    pub fn is_zero(&self) -> bool {
        self == &Distance::ZERO
    }

    /// Number of leading zero bits, 160 for [Distance::ZERO].
    ///
    /// For a non zero distance between `a` and `b` this is `a.bucket_index(&b)`.
    pub fn leading_zeros(&self) -> u32 {
        let mut zeros = 0;

        for byte in self.0.iter() {
            zeros += byte.leading_zeros();

            if *byte != 0 {
                break;
            }
        }

        zeros
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }
}

impl Display for Distance {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

impl Debug for Distance {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Distance({})", self)
    }
}

fn write_hex(f: &mut Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for byte in bytes {
        write!(f, "{:02x}", byte)?;
    }

    Ok(())
}
