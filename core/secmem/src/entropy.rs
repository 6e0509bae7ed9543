//! Kernel entropy, opened before the filesystem disappears.

use std::fs::File;
use std::io::Read;

use crate::SecmemError;

/// A retained handle on the kernel CSPRNG.
///
/// The handle must be opened before the filesystem pivot: afterwards
/// `/dev/urandom` no longer resolves inside the sandbox root, but the open
/// descriptor keeps working in every descendant process.
pub struct EntropySource {
    dev: File,
}

impl EntropySource {
    pub fn open() -> Result<Self, SecmemError> {
        let dev = File::open("/dev/urandom").map_err(SecmemError::Entropy)?;
        Ok(Self { dev })
    }

    /// Fill `buf` entirely with fresh random bytes.
    pub fn fill(&mut self, buf: &mut [u8]) -> Result<(), SecmemError> {
        if buf.is_empty() {
            return Err(SecmemError::ZeroLength);
        }
        self.dev.read_exact(buf).map_err(SecmemError::Entropy)
    }
}
