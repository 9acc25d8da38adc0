use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

/// Black-box cryptographic primitives consumed by the access resolver.
pub trait CryptoProvider: Send + Sync {
    fn hmac_sha256(&self, key: &[u8], message: &[u8]) -> [u8; 32];
    fn random_bytes(&self, out: &mut [u8]);
}

#[derive(Clone, Copy, Default)]
pub struct StdCrypto;

impl StdCrypto {
    pub fn new() -> Self {
        Self
    }
}

impl CryptoProvider for StdCrypto {
    fn hmac_sha256(&self, key: &[u8], message: &[u8]) -> [u8; 32] {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(key).expect("hmac accepts keys of any length");
        mac.update(message);
        mac.finalize().into_bytes().into()
    }

    fn random_bytes(&self, out: &mut [u8]) {
        rand::thread_rng().fill_bytes(out);
    }
}
