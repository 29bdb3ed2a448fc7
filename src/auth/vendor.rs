//! Vendor authentication payloads: MAC list and signed challenge

use super::provider::{ChallengeSigner, IdentitySource};
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::path::Path;

/// Length of each nonce half in the signed challenge
pub const CHALLENGE_NONCE_LEN: usize = 32;

const SERVER_LABEL: &[u8] = b"herodb";
const CLIENT_LABEL: &[u8] = b"client";

/// Identity source backed by the local machine.
///
/// MAC addresses come from `/sys/class/net/*/address`; the other vendor
/// secrets are not available locally and must come from a custom source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentity;

impl IdentitySource for SystemIdentity {
    fn mac_addresses(&self) -> Result<Vec<[u8; 6]>> {
        read_interface_addresses(Path::new("/sys/class/net"))
    }
}

fn read_interface_addresses(root: &Path) -> Result<Vec<[u8; 6]>> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut macs = Vec::new();
    for entry in entries {
        let path = entry?.path().join("address");
        // interfaces without a hardware address have no such file
        if let Ok(text) = std::fs::read_to_string(&path) {
            if let Some(mac) = parse_mac(text.trim()) {
                macs.push(mac);
            }
        }
    }
    Ok(macs)
}

/// Parse `aa:bb:cc:dd:ee:ff` (or `-` separated)
pub fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let mut out = [0u8; 6];
    let mut parts = s.split([':', '-']);
    for byte in out.iter_mut() {
        let part = parts.next()?;
        if part.len() != 2 {
            return None;
        }
        *byte = u8::from_str_radix(part, 16).ok()?;
    }
    parts.next().is_none().then_some(out)
}

/// Comma-joined, sorted, de-duplicated `AA:BB:CC:DD:EE:FF` list.
/// All-zero addresses are skipped; `None` when nothing remains.
pub fn format_mac_list(macs: &[[u8; 6]]) -> Option<String> {
    let unique: BTreeSet<String> = macs
        .iter()
        .filter(|mac| mac.iter().any(|&b| b != 0))
        .map(|mac| {
            mac.iter()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<_>>()
                .join(":")
        })
        .collect();
    if unique.is_empty() {
        None
    } else {
        Some(unique.into_iter().collect::<Vec<_>>().join(","))
    }
}

/// Server half of the vendor signed challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedChallenge {
    server_nonce: Vec<u8>,
    tag: Vec<u8>,
}

impl SignedChallenge {
    /// Split the challenge blob into the server nonce and trailing tag
    pub fn parse(blob: &[u8]) -> Result<Self> {
        if blob.len() < CHALLENGE_NONCE_LEN {
            return Err(Error::Protocol(format!(
                "signed challenge too short: {} bytes",
                blob.len()
            )));
        }
        let (nonce, tag) = blob.split_at(CHALLENGE_NONCE_LEN);
        Ok(Self {
            server_nonce: nonce.to_vec(),
            tag: tag.to_vec(),
        })
    }

    /// The server's 32-byte nonce `Rb`
    pub fn server_nonce(&self) -> &[u8] {
        &self.server_nonce
    }

    /// Bytes after the server nonce; informational only
    pub fn tag(&self) -> &[u8] {
        &self.tag
    }

    /// `Ra ‖ Rb ‖ "client" ‖ sign(user, Ra ‖ Rb ‖ "herodb")`
    pub fn response(&self, user: &str, signer: &dyn ChallengeSigner) -> Result<Vec<u8>> {
        let client_nonce = signer.random(CHALLENGE_NONCE_LEN)?;
        if client_nonce.len() != CHALLENGE_NONCE_LEN {
            return Err(Error::Provider(format!(
                "signer returned {} random bytes, expected {}",
                client_nonce.len(),
                CHALLENGE_NONCE_LEN
            )));
        }

        let mut signed = Vec::with_capacity(2 * CHALLENGE_NONCE_LEN + SERVER_LABEL.len());
        signed.extend_from_slice(&client_nonce);
        signed.extend_from_slice(&self.server_nonce);
        signed.extend_from_slice(SERVER_LABEL);
        let signature = signer.sign(user, &signed)?;

        let mut out =
            Vec::with_capacity(2 * CHALLENGE_NONCE_LEN + CLIENT_LABEL.len() + signature.len());
        out.extend_from_slice(&client_nonce);
        out.extend_from_slice(&self.server_nonce);
        out.extend_from_slice(CLIENT_LABEL);
        out.extend_from_slice(&signature);
        Ok(out)
    }
}
