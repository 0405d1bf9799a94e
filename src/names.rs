//! Unguessable names for the named IPC objects of one session.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use core::{fmt::{self, Display, Formatter},
           ops::Range};
use getrandom::getrandom;
use std::ffi::CString;


/// A per-session name stem like `/smk-yv_dzpRXevTMrIb_Q`, from which each object's name is
/// derived by a suffix.
///
/// Random names prevent DoS attacks and accidental clashes with other runs, because they're
/// unguessable, unlike the fixed names (`/agent`, `/sem0`, `/shm`) that would collide between
/// two concurrent runs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct UniqueName {
    stem: [u8; Self::STEM_LEN],
}


impl UniqueName {
    // Note: This shouldn't be too large, because some OSs limit names to 31 bytes and the
    // longest suffix is `-smoker0`.
    const RAND_LEN: usize = 12; // 96-bit entropy.
    const INIT_UNIQUE: [u8; Self::RAND_LEN] = [
        // This was generated from my `/dev/urandom`.
        0x3B, 0x91, 0xE0, 0x5C, 0x27, 0xAA, 0x48, 0xD3, 0x0F, 0x76, 0xC1, 0x9E,
    ];
    const PREFIX: &'static [u8] = b"/smk-";
    const STEM_LEN: usize = match base64::encoded_len(Self::RAND_LEN, false) {
        Some(len) => Self::PREFIX.len() + len,
        #[allow(clippy::unreachable)]
        None => unreachable!(), // Note: compile-time only.
    };
    const B64_RANGE: Range<usize> = Self::PREFIX.len() .. Self::STEM_LEN;

    /// A fresh random stem.
    #[allow(clippy::expect_used)]
    pub(crate) fn generate() -> Self {
        let mut stem = [0; Self::STEM_LEN];
        stem[.. Self::PREFIX.len()].copy_from_slice(Self::PREFIX);
        // Init to something unique, just in case `getrandom()` fails, to avoid clashes with any
        // (legit) name already in use in the host.  An unlucky clash is still caught, because
        // every object is created exclusively and creation is retried with a new stem.
        let mut random: [u8; Self::RAND_LEN] = Self::INIT_UNIQUE;
        let _ignore_err = getrandom(&mut random);
        // Use URL-safe base64 because some OSs don't support non-leading '/' chars.
        let _b64_size = URL_SAFE_NO_PAD
            .encode_slice(random, &mut stem[Self::B64_RANGE])
            .expect("output size is always enough");
        Self { stem }
    }

    /// The stem followed by `-{suffix}`, as a C string.
    #[allow(clippy::expect_used)]
    pub(crate) fn with(&self, suffix: &str) -> CString {
        let mut name = Vec::with_capacity(Self::STEM_LEN + 1 + suffix.len() + 1);
        name.extend_from_slice(&self.stem);
        name.push(b'-');
        name.extend_from_slice(suffix.as_bytes());
        CString::new(name).expect("base64 and our suffixes have no nul")
    }
}


/// Shows the stem.
impl Display for UniqueName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        // Only ASCII: a prefix plus base64.
        self.stem.iter().try_for_each(|&b| write!(f, "{}", char::from(b)))
    }
}
