//! c32check address rendering.
//!
//! Addresses are the version byte and hash160 from a spending condition or
//! principal, rendered as `S` + version character + Crockford-style base32
//! over `hash160 ‖ checksum`, where the checksum is the first four bytes of
//! `sha256(sha256(version ‖ hash160))`. Zero bytes at the front of the
//! payload are preserved as literal `0` digits so the encoding stays
//! injective.

use sha2::{Digest, Sha256};

/// Which chain the sidecar indexes. Selects the address version bytes used
/// when rendering sender addresses.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum Network {
    Mainnet,
    Testnet,
}

pub const ADDRESS_VERSION_MAINNET_SINGLE_SIG: u8 = 22;
pub const ADDRESS_VERSION_MAINNET_MULTI_SIG: u8 = 20;
pub const ADDRESS_VERSION_TESTNET_SINGLE_SIG: u8 = 26;
pub const ADDRESS_VERSION_TESTNET_MULTI_SIG: u8 = 21;

impl Network {
    pub fn single_sig_version(self) -> u8 {
        match self {
            Self::Mainnet => ADDRESS_VERSION_MAINNET_SINGLE_SIG,
            Self::Testnet => ADDRESS_VERSION_TESTNET_SINGLE_SIG,
        }
    }

    pub fn multi_sig_version(self) -> u8 {
        match self {
            Self::Mainnet => ADDRESS_VERSION_MAINNET_MULTI_SIG,
            Self::Testnet => ADDRESS_VERSION_TESTNET_MULTI_SIG,
        }
    }
}

const C32_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Render `version ‖ hash160` as a textual address.
pub fn c32_address(version: u8, hash160: &[u8; 20]) -> String {
    let mut payload = [0u8; 24];
    payload[..20].copy_from_slice(hash160);
    payload[20..].copy_from_slice(&checksum(version, hash160));

    let mut address = String::with_capacity(41);
    address.push('S');
    address.push(C32_ALPHABET[usize::from(version & 0x1f)] as char);
    address.push_str(&c32_encode(&payload));
    address
}

fn checksum(version: u8, hash160: &[u8; 20]) -> [u8; 4] {
    let mut hasher = Sha256::new();
    hasher.update([version]);
    hasher.update(hash160);
    let once = hasher.finalize();
    let twice = Sha256::digest(once);
    let mut out = [0u8; 4];
    out.copy_from_slice(&twice[..4]);
    out
}

/// Big-endian base-32 conversion of the whole byte string, with one leading
/// `0` digit per leading zero byte.
fn c32_encode(bytes: &[u8]) -> String {
    // digits accumulate least significant first
    let mut digits = Vec::with_capacity(bytes.len() * 8 / 5 + 1);
    let mut carry: u32 = 0;
    let mut carry_bits: u32 = 0;
    for byte in bytes.iter().rev() {
        carry |= u32::from(*byte) << carry_bits;
        carry_bits += 8;
        while carry_bits >= 5 {
            digits.push(C32_ALPHABET[(carry & 0x1f) as usize]);
            carry >>= 5;
            carry_bits -= 5;
        }
    }
    if carry_bits > 0 {
        digits.push(C32_ALPHABET[(carry & 0x1f) as usize]);
    }
    while digits.last() == Some(&b'0') {
        digits.pop();
    }
    for byte in bytes {
        if *byte == 0 {
            digits.push(b'0');
        } else {
            break;
        }
    }
    digits.iter().rev().map(|digit| *digit as char).collect()
}
