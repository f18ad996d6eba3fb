//! Core wire types shared by every role: keys, tags, shares, and the
//! fixed-width records that travel the wire.
//!
//! These mirror `original_source/DPPIR/types/types.h`'s packed C structs.
//! We hand-roll `to_bytes`/`from_bytes` instead of deriving `serde::Serialize`
//! because the exact byte layout (native-endian, no padding) is itself a
//! tested invariant, not an implementation detail serde would be free to
//! change.

/// Width of the signature slot reserved in every value/share.
pub const SIG_SIZE: usize = 48;
/// Width of a full database record / additive share / response.
pub const PRESHARE_SIZE: usize = 4 + SIG_SIZE;
/// The prime modulus for incremental (multiplicative) sharing: 2^31 - 1.
pub const INCREMENTAL_PRIME: u32 = 2_147_483_647;

pub type PartyId = u8;
pub type ServerId = u8;
pub type Index = u32;

/// Address into the database.
pub type Key = u32;
/// The non-signature half of a database record.
pub type Value = u32;
/// Opaque per-query routing identifier, unlinkable across hops.
pub type Tag = u64;
/// Running multiplicative tally for incremental reconstruction.
pub type IncrementalTally = u32;
/// Per-row noise count drawn from the Laplace sampler.
pub type Sample = u32;

/// A 52-byte buffer: database record, additive preshare, or response payload.
pub type Preshare = [u8; PRESHARE_SIZE];

/// Pair (x, y) defining the affine step `t <- t*y + x mod p`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IncrementalShare {
    pub x: u32,
    pub y: u32,
}

impl IncrementalShare {
    pub const ENCODED_SIZE: usize = 8;

    pub fn to_bytes(self) -> [u8; Self::ENCODED_SIZE] {
        let mut buf = [0u8; Self::ENCODED_SIZE];
        buf[0..4].copy_from_slice(&self.x.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.y.to_ne_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        IncrementalShare {
            x: u32::from_ne_bytes(buf[0..4].try_into().unwrap()),
            y: u32::from_ne_bytes(buf[4..8].try_into().unwrap()),
        }
    }
}

/// A per-query secret installed at one party: the tag it is stored under,
/// the tag the next party should expect (unused at the backend), one
/// incremental share, and one additive preshare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfflineSecret {
    pub tag: Tag,
    pub next_tag: Tag,
    pub share: IncrementalShare,
    pub preshare: Preshare,
}

impl OfflineSecret {
    pub const ENCODED_SIZE: usize = 8 + 8 + IncrementalShare::ENCODED_SIZE + PRESHARE_SIZE;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_SIZE);
        buf.extend_from_slice(&self.tag.to_ne_bytes());
        buf.extend_from_slice(&self.next_tag.to_ne_bytes());
        buf.extend_from_slice(&self.share.to_bytes());
        buf.extend_from_slice(&self.preshare);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        assert!(buf.len() >= Self::ENCODED_SIZE);
        let tag = u64::from_ne_bytes(buf[0..8].try_into().unwrap());
        let next_tag = u64::from_ne_bytes(buf[8..16].try_into().unwrap());
        let share = IncrementalShare::from_bytes(&buf[16..24]);
        let mut preshare = [0u8; PRESHARE_SIZE];
        preshare.copy_from_slice(&buf[24..24 + PRESHARE_SIZE]);
        OfflineSecret {
            tag,
            next_tag,
            share,
            preshare,
        }
    }
}

/// An online-stage query: the tag routing it and the running tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Query {
    pub tag: Tag,
    pub tally: IncrementalTally,
}

impl Query {
    pub const ENCODED_SIZE: usize = 8 + 4;

    pub fn to_bytes(self) -> [u8; Self::ENCODED_SIZE] {
        let mut buf = [0u8; Self::ENCODED_SIZE];
        buf[0..8].copy_from_slice(&self.tag.to_ne_bytes());
        buf[8..12].copy_from_slice(&self.tally.to_ne_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        Query {
            tag: u64::from_ne_bytes(buf[0..8].try_into().unwrap()),
            tally: u32::from_ne_bytes(buf[8..12].try_into().unwrap()),
        }
    }
}

/// An online-stage response: the masked value and its (currently opaque,
/// never populated) signature slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub value: Value,
    pub sig: [u8; SIG_SIZE],
}

impl Response {
    pub const ENCODED_SIZE: usize = PRESHARE_SIZE;

    pub fn to_bytes(self) -> Preshare {
        let mut buf = [0u8; PRESHARE_SIZE];
        buf[0..4].copy_from_slice(&self.value.to_ne_bytes());
        buf[4..].copy_from_slice(&self.sig);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        let value = u32::from_ne_bytes(buf[0..4].try_into().unwrap());
        let mut sig = [0u8; SIG_SIZE];
        sig.copy_from_slice(&buf[4..PRESHARE_SIZE]);
        Response { value, sig }
    }

    /// XOR this response (as tally) with a 52-byte additive share.
    pub fn xor_share(self, share: &Preshare) -> Response {
        let tally = self.to_bytes();
        let mut out = [0u8; PRESHARE_SIZE];
        for i in 0..PRESHARE_SIZE {
            out[i] = tally[i] ^ share[i];
        }
        Response::from_bytes(&out)
    }
}
