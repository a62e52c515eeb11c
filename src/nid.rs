//! Symbol name identifiers (NIDs).
//!
//! Guest modules do not export symbols under their readable names. Every
//! export is keyed by an 11 character NID derived from a truncated SHA-1 of
//! the name, followed by the library and module the symbol belongs to:
//!
//! ```text
//! hcuQgD53UxM#libc#libc
//! ```
//!
//! The encoding is one way; lookups encode the requested name and compare
//! keys.

use sha1::{Digest, Sha1};
use std::fmt;

/// Number of characters in an encoded NID.
pub const NID_LEN: usize = 11;

/// Salt appended to every symbol name before hashing.
pub const NID_SUFFIX: [u8; 16] = [
    0x51, 0x8D, 0x64, 0xA6, 0x35, 0xDE, 0xD8, 0xC1, 0xE6, 0xB0, 0x39, 0xB1, 0xC3, 0xE5, 0x52, 0x30,
];

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+-";

/// An encoded symbol name, stored NUL terminated as the guest sees it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nid([u8; NID_LEN + 1]);

impl Nid {
    pub fn as_str(&self) -> &str {
        // Every byte before the terminator comes from `ALPHABET`.
        std::str::from_utf8(&self.0[..NID_LEN]).unwrap_or_default()
    }

    /// The NID including its trailing NUL.
    pub fn as_bytes_with_nul(&self) -> &[u8; NID_LEN + 1] {
        &self.0
    }
}

impl fmt::Display for Nid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Nid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nid({})", self.as_str())
    }
}

/// Encode a symbol name into its NID.
///
/// Names are taken as raw bytes because guest strings are not required to
/// be UTF-8.
pub fn encode(name: impl AsRef<[u8]>) -> Nid {
    let mut hasher = Sha1::new();
    hasher.update(name.as_ref());
    hasher.update(NID_SUFFIX);
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let value = u64::from_le_bytes(prefix);

    let mut out = [0u8; NID_LEN + 1];
    for (i, slot) in out.iter_mut().take(NID_LEN - 1).enumerate() {
        *slot = ALPHABET[((value >> (58 - 6 * i)) & 0x3f) as usize];
    }
    // Only four bits remain for the last character.
    out[NID_LEN - 1] = ALPHABET[((value & 0xf) * 4) as usize];
    Nid(out)
}

/// Build the export-table key for a symbol of `module`.
///
/// The module name fills both the library and the module field.
pub fn lookup_key(nid: &Nid, module: &str) -> String {
    versioned_key(nid, module, module)
}

/// Build an export-table key with distinct library and module names.
pub fn versioned_key(nid: &Nid, library: &str, module: &str) -> String {
    format!("{nid}#{library}#{module}")
}
