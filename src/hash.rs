//! Order-insensitive structural hashing used to group equivalent nodes and
//! subgraphs.

/// Modulus of the additive hash; summing keeps the result independent of
/// the order in which parts are fed.
pub const HASH_MODULUS: u64 = 10_000_019;

/// djb2-style string hash, masked to 31 bits.
pub fn str_hash(text: &str) -> u64 {
    let mut hash: u32 = 5381;
    for unit in text.encode_utf16() {
        hash = hash
            .wrapping_add(hash.wrapping_shl(5))
            .wrapping_add(unit as u32);
    }
    (hash & 0x7fff_ffff) as u64
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SumHash(u64);

impl SumHash {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn add(&mut self, part: &str) {
        self.0 = (self.0 + str_hash(part)) % HASH_MODULUS;
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl<'a> FromIterator<&'a str> for SumHash {
    fn from_iter<T: IntoIterator<Item = &'a str>>(iter: T) -> Self {
        let mut hash = SumHash::new();
        for part in iter {
            hash.add(part);
        }
        hash
    }
}
