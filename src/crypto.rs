//! Crypto Service. ECDSA over secp256k1 (`k256`), hashing the signed
//! bytes with BLAKE2b-256 before signing, mirroring the hash-then-sign /
//! verify-by-recomputing pattern used elsewhere in the pack this crate is
//! grounded on. The private key is loaded once at startup and held for the
//! process lifetime.

use k256::ecdsa::signature::{Signer as _, Verifier as _};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;
use crate::pcb::IsdAs;

fn hash(data: &[u8]) -> [u8; 32] {
    let digest = blake2b_simd::Params::new().hash_length(32).hash(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_bytes());
    out
}

/// One hop of trust: `subject`'s public key, as issued by `issuer`. The PCB
/// protocol only ever exercises a chain one hop deep (AD certificate issued
/// directly by a core AD), so no further links are modeled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertChain {
    pub subject: IsdAs,
    pub issuer: IsdAs,
    pub public_key: [u8; 33],
}

/// The trust anchor document for an ISD at a given version: the set of core
/// ADs and their public keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trc {
    pub version: u32,
    pub core_ads: Vec<IsdAs>,
    pub core_keys: Vec<(IsdAs, [u8; 33])>,
}

impl Trc {
    pub fn key_for(&self, ad: IsdAs) -> Option<&[u8; 33]> {
        self.core_keys.iter().find(|(isd_as, _)| *isd_as == ad).map(|(_, k)| k)
    }
}

pub struct CryptoService {
    signing_key: SigningKey,
}

impl CryptoService {
    /// `key_bytes` is the base64-decoded raw 32-byte secp256k1 scalar read
    /// from the AD's signing key file.
    pub fn from_raw_key(key_bytes: &[u8]) -> Result<Self, CryptoError> {
        let signing_key = SigningKey::from_slice(key_bytes).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self { signing_key })
    }

    pub fn public_key_bytes(&self) -> [u8; 33] {
        let point = VerifyingKey::from(&self.signing_key).to_encoded_point(true);
        let mut out = [0u8; 33];
        out.copy_from_slice(point.as_bytes());
        out
    }

    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        let digest = hash(data);
        let sig: Signature = self.signing_key.sign(&digest);
        sig.to_der().as_bytes().to_vec()
    }

    /// Verifies `sig` over `data` for `subject`, checking it against the
    /// *subject's* key (`chain.public_key` — the AD marking is signed by the
    /// hop that produced it, not by its issuer) while requiring the chain's
    /// issuer be anchored as a core AD in `trc`. Never panics; any mismatch
    /// simply yields `false`.
    pub fn verify(&self, data: &[u8], sig: &[u8], subject: IsdAs, chain: &CertChain, trc: &Trc) -> bool {
        if chain.subject != subject {
            return false;
        }
        if !trc.core_ads.contains(&chain.issuer) {
            return false;
        }
        let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(&chain.public_key) else {
            return false;
        };
        let Ok(signature) = Signature::from_der(sig) else {
            return false;
        };
        let digest = hash(data);
        verifying_key.verify(&digest, &signature).is_ok()
    }
}
