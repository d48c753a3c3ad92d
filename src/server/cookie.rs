//! The shared-secret authentication cookie.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Read as _, Write as _};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use rand::RngCore as _;

/// Length of the cookie on disk and on the wire.
pub const COOKIE_LENGTH: usize = 256;

/// A randomly generated blob readable only by the user running the server.
/// A client that presents the same bytes is granted access.
#[derive(Clone)]
pub struct AuthCookie {
    data: [u8; COOKIE_LENGTH],
}

impl AuthCookie {
    /// Loads an existing cookie from disk, or generates one and writes it.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        match Self::load(path.as_ref()) {
            Ok(cookie) => Ok(cookie),
            Err(_) => Self::create(path.as_ref()),
        }
    }

    /// Loads an existing cookie from disk. Fails if the file is missing or
    /// not exactly cookie-sized.
    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut file = fs::File::open(path)?;
        let mut data = [0; COOKIE_LENGTH];
        file.read_exact(&mut data)?;

        // Trailing bytes mean this is not a cookie file.
        let mut rest = [0u8; 1];
        if file.read(&mut rest)? != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "cookie file has trailing data",
            ));
        }

        Ok(Self { data })
    }

    /// Generates a new cookie and stores it, replacing any existing file.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        log::info!("generating new auth cookie at {}", path.as_ref().display());

        let _ = fs::remove_file(&path);

        const ACCESS_MODE: u32 = 0o600;
        let mut file = OpenOptions::new()
            .mode(ACCESS_MODE)
            .write(true)
            .create_new(true)
            .open(path)?;

        let mut data = [0; COOKIE_LENGTH];
        rand::rng().fill_bytes(&mut data);

        file.write_all(&data)?;
        file.flush()?;

        Ok(Self { data })
    }

    /// An ephemeral cookie that never touches disk; every comparison
    /// against client input fails unless the bytes leaked, which is the
    /// point of using it in tests.
    pub fn random() -> Self {
        let mut data = [0; COOKIE_LENGTH];
        rand::rng().fill_bytes(&mut data);
        Self { data }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Compares client-supplied bytes in constant time.
    pub fn matches(&self, other: &[u8]) -> bool {
        if other.len() != COOKIE_LENGTH {
            return false;
        }

        let mut diff = 0u8;
        for (a, b) in self.data.iter().zip(other) {
            diff |= a ^ b;
        }

        diff == 0
    }
}

impl fmt::Debug for AuthCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthCookie {{ (data hidden) }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_disk() -> anyhow::Result<()> {
        let dir = std::env::temp_dir().join(format!("pavane-cookie-test-{}", std::process::id()));
        fs::create_dir_all(&dir)?;
        let path = dir.join("cookie");

        let created = AuthCookie::load_or_create(&path)?;
        let loaded = AuthCookie::load_or_create(&path)?;

        assert!(created.matches(loaded.bytes()));

        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn matching_is_length_strict() {
        let cookie = AuthCookie::random();

        assert!(cookie.matches(cookie.bytes()));
        assert!(!cookie.matches(&cookie.bytes()[..COOKIE_LENGTH - 1]));
        assert!(!cookie.matches(&[]));

        let mut tweaked = [0u8; COOKIE_LENGTH];
        tweaked.copy_from_slice(cookie.bytes());
        tweaked[0] ^= 1;
        assert!(!cookie.matches(&tweaked));
    }
}
