//! Credentials, the signer seam, and counterfactual wallet derivation.
//!
//! EIP-712 signing and API-key derivation live outside this crate; the
//! [`Signer`] trait is the boundary the order builder consumes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::error::SdkError;

/// CLOB API credentials used for authenticated WebSocket channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ApiCreds {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

impl ApiCreds {
    pub fn new(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            passphrase: passphrase.into(),
        }
    }

    /// All three fields must be non-empty.
    pub fn is_valid(&self) -> bool {
        !self.api_key.is_empty() && !self.secret.is_empty() && !self.passphrase.is_empty()
    }
}

/// Order signature scheme, matching the exchange's numeric encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SignatureType {
    #[default]
    Eoa,
    Proxy,
    GnosisSafe,
}

impl SignatureType {
    pub fn code(self) -> u8 {
        match self {
            SignatureType::Eoa => 0,
            SignatureType::Proxy => 1,
            SignatureType::GnosisSafe => 2,
        }
    }
}

/// A 20-byte EVM address, displayed as lowercase `0x`-hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.strip_prefix("0x").unwrap_or(s);
        if hex.len() != 40 || !hex.is_ascii() {
            return Err(SdkError::validation(format!("invalid address length: {s}")));
        }
        let mut out = [0u8; 20];
        for (i, byte) in out.iter_mut().enumerate() {
            let pair = &hex[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(pair, 16)
                .map_err(|_| SdkError::validation(format!("invalid address hex: {s}")))?;
        }
        Ok(Address(out))
    }
}

impl Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Boundary to the out-of-crate signing stack. The order builder needs only
/// the signing address and the chain scope; `chain_id == 0` means unscoped.
pub trait Signer: Send + Sync {
    fn address(&self) -> Address;
    fn chain_id(&self) -> u64;
}

// Counterfactual wallet factories. The proxy-wallet and safe factories are
// chain deployments; derivation is CREATE2 over the owner-keyed salt.
const POLYGON_CHAIN_ID: u64 = 137;
const AMOY_CHAIN_ID: u64 = 80002;

const PROXY_FACTORY: &str = "0xab45c5a4b0c941a2f231c04c3f49182e1a254052";
const SAFE_FACTORY: &str = "0xaacfeea03eb1561c4e67d661e40682bd20e3541b";

const PROXY_INIT_CODE_HASH: [u8; 32] = [
    0xd2, 0x9d, 0xe2, 0x6a, 0x6c, 0x1b, 0xe3, 0x81, 0x46, 0x1c, 0x0e, 0xb1, 0x4b, 0x0e, 0x7e,
    0x50, 0x45, 0x78, 0x8a, 0x14, 0x9b, 0x1f, 0x09, 0xe6, 0x5c, 0xd8, 0x3a, 0xb0, 0x67, 0x4e,
    0x26, 0xcf,
];
const SAFE_INIT_CODE_HASH: [u8; 32] = [
    0x56, 0xe3, 0x08, 0x1a, 0x3d, 0x1b, 0xb2, 0xc7, 0x4a, 0xf4, 0x21, 0x9e, 0x1f, 0x4c, 0x1a,
    0x6a, 0x40, 0xd4, 0x27, 0xf3, 0x0c, 0xa6, 0xbd, 0x2b, 0x74, 0x28, 0x0c, 0x05, 0x28, 0x0e,
    0x63, 0x0d,
];

fn factory_for_chain(chain_id: u64, safe: bool) -> Result<Address, SdkError> {
    match chain_id {
        POLYGON_CHAIN_ID | AMOY_CHAIN_ID => {
            let raw = if safe { SAFE_FACTORY } else { PROXY_FACTORY };
            raw.parse()
        }
        _ => Err(SdkError::validation(format!(
            "no wallet factory deployment for chain {chain_id}"
        ))),
    }
}

fn create2(factory: Address, salt: [u8; 32], init_code_hash: [u8; 32]) -> Address {
    let mut hasher = Keccak256::new();
    hasher.update([0xff]);
    hasher.update(factory.as_bytes());
    hasher.update(salt);
    hasher.update(init_code_hash);
    let digest = hasher.finalize();
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[12..]);
    Address(out)
}

fn owner_salt(owner: Address) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(owner.as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Derives the owner's proxy wallet address on the given chain.
pub fn derive_proxy_wallet_for_chain(owner: Address, chain_id: u64) -> Result<Address, SdkError> {
    let factory = factory_for_chain(chain_id, false)?;
    Ok(create2(factory, owner_salt(owner), PROXY_INIT_CODE_HASH))
}

/// Derives the owner's proxy wallet on the default deployment.
pub fn derive_proxy_wallet(owner: Address) -> Result<Address, SdkError> {
    derive_proxy_wallet_for_chain(owner, POLYGON_CHAIN_ID)
}

/// Derives the owner's Gnosis Safe address on the given chain.
pub fn derive_safe_wallet_for_chain(owner: Address, chain_id: u64) -> Result<Address, SdkError> {
    let factory = factory_for_chain(chain_id, true)?;
    Ok(create2(factory, owner_salt(owner), SAFE_INIT_CODE_HASH))
}

/// Derives the owner's Gnosis Safe on the default deployment.
pub fn derive_safe_wallet(owner: Address) -> Result<Address, SdkError> {
    derive_safe_wallet_for_chain(owner, POLYGON_CHAIN_ID)
}
