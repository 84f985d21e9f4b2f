use {
  multihash::{Hasher, Sha3_256},
  serde::{Deserialize, Serialize},
  std::{fmt::Debug, str::FromStr},
};

/// A 32-byte cryptographic digest over the canonical byte serialization
/// of a data structure, wrapped the way the rest of the codebase wraps
/// content hashes: base58 for display, raw bytes for wire/storage keys.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash([u8; 32]);

impl Hash {
  pub fn of(bytes: &[u8]) -> Self {
    let mut hasher = Sha3_256::default();
    hasher.update(bytes);
    Self(hasher.finalize().try_into().unwrap())
  }

  /// Combines a sequence of child hashes into a single root hash. Used
  /// for transaction lists and validator sets where order is part of
  /// the committed value.
  pub fn of_roots<'a>(hashes: impl IntoIterator<Item = &'a Hash>) -> Self {
    let mut hasher = Sha3_256::default();
    for h in hashes {
      hasher.update(&h.0);
    }
    Self(hasher.finalize().try_into().unwrap())
  }

  pub fn as_bytes(&self) -> &[u8; 32] {
    &self.0
  }

  pub const fn zero() -> Self {
    Self([0u8; 32])
  }
}

impl AsRef<[u8]> for Hash {
  fn as_ref(&self) -> &[u8] {
    &self.0
  }
}

impl Debug for Hash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", bs58::encode(self.0).into_string())
  }
}

impl std::fmt::Display for Hash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", bs58::encode(self.0).into_string())
  }
}

impl FromStr for Hash {
  type Err = bs58::decode::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut bytes = [0u8; 32];
    bs58::decode(s).into(&mut bytes)?;
    Ok(Self(bytes))
  }
}

#[cfg(test)]
mod test {
  use super::Hash;

  #[test]
  fn of_roots_is_order_sensitive() {
    let a = Hash::of(b"a");
    let b = Hash::of(b"b");
    assert_ne!(Hash::of_roots([&a, &b]), Hash::of_roots([&b, &a]));
  }

  #[test]
  fn display_roundtrips() {
    let h = Hash::of(b"hello");
    let s = h.to_string();
    let parsed: Hash = s.parse().unwrap();
    assert_eq!(h, parsed);
  }
}
