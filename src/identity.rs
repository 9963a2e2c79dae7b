//! Relay identity keys
//!
//! The gateway authenticates to the keyed-frame relay service with a
//! long-lived x25519 keypair, separate from any WireGuard key. Keys
//! travel as one line of prefixed hex: `privkey:<64 hex>` for the
//! private half, `nodekey:<64 hex>` for the public half the service
//! routes on.

use anyhow::{bail, Context, Result};
use log::info;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Text prefix for serialized private keys
pub const PRIVATE_KEY_PREFIX: &str = "privkey:";
/// Text prefix for serialized public keys
pub const PUBLIC_KEY_PREFIX: &str = "nodekey:";

/// Public half of a relay identity; the address peers send to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Abbreviated form for log lines
    pub fn short(&self) -> String {
        format!("[{}]", &hex::encode(self.0)[..10])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", PUBLIC_KEY_PREFIX, hex::encode(self.0))
    }
}

impl FromStr for PublicKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(Self(decode_key(s.trim(), PUBLIC_KEY_PREFIX)?))
    }
}

/// Private half of a relay identity
#[derive(Clone)]
pub struct PrivateKey([u8; 32]);

impl PrivateKey {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive the public half (x25519 base-point multiplication)
    pub fn public(&self) -> PublicKey {
        let secret = x25519_dalek::StaticSecret::from(self.0);
        PublicKey(*x25519_dalek::PublicKey::from(&secret).as_bytes())
    }
}

impl fmt::Display for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", PRIVATE_KEY_PREFIX, hex::encode(self.0))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never leak key material into logs
        write!(f, "PrivateKey({}…)", PRIVATE_KEY_PREFIX)
    }
}

impl FromStr for PrivateKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(Self(decode_key(s.trim(), PRIVATE_KEY_PREFIX)?))
    }
}

fn decode_key(s: &str, prefix: &str) -> Result<[u8; 32]> {
    let Some(hex_part) = s.strip_prefix(prefix) else {
        bail!("key must start with {:?}", prefix);
    };

    let decoded = hex::decode(hex_part).context("key payload is not valid hex")?;
    let bytes: [u8; 32] = decoded
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("key must be 32 bytes, got {}", decoded.len()))?;
    Ok(bytes)
}

/// Load the identity from `path`, or create one.
///
/// - no path: generate an ephemeral key (the remote side needs the new
///   public key each run)
/// - path exists: parse it, trimming surrounding whitespace
/// - path missing: generate, persist with owner-only permissions
pub fn load_or_generate(path: Option<&Path>) -> Result<PrivateKey> {
    let Some(path) = path else {
        info!("no key file configured, using ephemeral identity");
        return Ok(PrivateKey::generate());
    };

    if path.exists() {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read key file {:?}", path))?;
        let key: PrivateKey = text
            .parse()
            .with_context(|| format!("failed to parse key file {:?}", path))?;
        info!("loaded identity from {:?}", path);
        return Ok(key);
    }

    let key = PrivateKey::generate();
    fs::write(path, key.to_string())
        .with_context(|| format!("failed to save key to {:?}", path))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to restrict permissions on {:?}", path))?;
    }

    info!("generated new identity and saved to {:?}", path);
    Ok(key)
}
