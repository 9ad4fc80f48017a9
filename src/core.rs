use std::sync::atomic::{AtomicBool, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::globs::GlobSet;
use crate::manifest::Manifest;
use crate::policy::Policy;
use crate::profile::{Flags, Profile};

/// A 32-byte BLAKE3 hash used for change detection.
///
/// Every incremental task fingerprints its inputs with it, and the service
/// worker uses it as the revision of each precached file.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub(crate) struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub(crate) fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub(crate) fn hash_file(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        Ok(blake3::Hasher::new().update_mmap(path)?.finalize().into())
    }

    pub(crate) fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in &self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// Incremental hasher for fingerprints made of several parts.
#[derive(Default)]
pub(crate) struct Blake3Hasher(blake3::Hasher);

impl Blake3Hasher {
    /// Feeds a length-prefixed chunk, so that `["ab", "c"]` and `["a", "bc"]`
    /// never collide.
    pub(crate) fn chunk(&mut self, bytes: impl AsRef<[u8]>) -> &mut Self {
        let bytes = bytes.as_ref();
        self.0.update(&(bytes.len() as u64).to_le_bytes());
        self.0.update(bytes);
        self
    }
}

impl From<Blake3Hasher> for Hash32 {
    fn from(value: Blake3Hasher) -> Self {
        let bytes: [u8; 32] = value.0.finalize().into();
        Hash32::from(bytes)
    }
}

/// Everything a task may depend on, injected once at startup.
///
/// The environment is immutable after construction, apart from the flag
/// recording whether a live server session is running.
#[derive(Debug)]
pub struct Environment {
    /// Project root; every profile path is relative to it.
    pub root: Utf8PathBuf,
    pub manifest: Manifest,
    pub profile: Profile,
    pub globs: GlobSet,
    pub policy: Policy,
    server_active: AtomicBool,
}

impl Environment {
    /// Selects the profile from the manifest flags and derives the rest.
    pub fn new(root: impl Into<Utf8PathBuf>, manifest: Manifest) -> Self {
        let profile = Profile::select(&Flags::from(&manifest));
        Self::with_profile(root, manifest, profile)
    }

    pub fn with_profile(root: impl Into<Utf8PathBuf>, manifest: Manifest, profile: Profile) -> Self {
        let policy = Policy::from_manifest(&manifest);
        let globs = GlobSet::from_profile(&profile);

        Self {
            root: root.into(),
            manifest,
            profile,
            globs,
            policy,
            server_active: AtomicBool::new(false),
        }
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Resolves a project relative path against the root.
    pub fn path(&self, relative: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.root.join(relative)
    }

    /// Directory holding persisted fingerprint snapshots.
    pub fn cache_dir(&self) -> Utf8PathBuf {
        self.root.join(".cache/gantry")
    }

    pub fn set_server_active(&self, active: bool) {
        self.server_active.store(active, Ordering::SeqCst);
    }

    /// Lint and test failures are only fatal outside interactive sessions.
    pub fn is_interactive(&self) -> bool {
        self.server_active.load(Ordering::SeqCst) || self.manifest.enable_sync
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_hex() {
        let hash = Hash32::from([0xABu8; 32]);
        assert_eq!(hash.to_hex(), "ab".repeat(32));
    }

    #[test]
    fn test_chunked_hashing_is_unambiguous() {
        let mut a = Blake3Hasher::default();
        a.chunk("ab").chunk("c");
        let mut b = Blake3Hasher::default();
        b.chunk("a").chunk("bc");

        assert_ne!(Hash32::from(a), Hash32::from(b));
    }

    #[test]
    fn test_interactive() {
        let env = Environment::new("/tmp/project", Manifest::default());
        assert!(!env.is_interactive());

        env.set_server_active(true);
        assert!(env.is_interactive());

        let env = Environment::new(
            "/tmp/project",
            Manifest {
                enable_sync: true,
                ..Default::default()
            },
        );
        assert!(env.is_interactive());
    }
}
