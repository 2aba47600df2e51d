// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::Error;
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use rand::RngCore;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};

/// A PEM encoded key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_pem: String,
    pub public_pem: String,
}

/// Generates the housekeeping key pair used to sign and verify API tokens.
pub trait KeyPairGenerator: Send + Sync {
    fn generate(&self) -> Result<KeyPair, Error>;
}

pub struct RsaKeyPairGenerator {
    bits: usize,
}

impl RsaKeyPairGenerator {
    pub fn new(bits: usize) -> RsaKeyPairGenerator {
        RsaKeyPairGenerator { bits }
    }
}

impl KeyPairGenerator for RsaKeyPairGenerator {
    fn generate(&self) -> Result<KeyPair, Error> {
        let mut rng = rand::thread_rng();
        let private_key =
            RsaPrivateKey::new(&mut rng, self.bits).map_err(|e| Error::KeyGenerationFailed(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);
        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| Error::KeyGenerationFailed(e.to_string()))?;
        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| Error::KeyGenerationFailed(e.to_string()))?;
        Ok(KeyPair {
            private_pem: private_pem.as_str().to_string(),
            public_pem,
        })
    }
}

/// A URL-safe random string out of `bytes` random bytes.
pub fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE.encode(buf)
}
