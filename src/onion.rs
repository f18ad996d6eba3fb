//! Onion (nested sealed-box) encryption for the offline secret chain.
//!
//! Each party's share of a query is wrapped in its own sealed-box layer, the
//! outermost layer first in the wire encoding but encrypted last: the
//! innermost (final) party's secret is sealed with no payload behind it, and
//! every preceding party's secret is sealed together with the ciphertext
//! already produced for the parties after it. One `decrypt` call peels
//! exactly one layer, exposing that party's `OfflineSecret` and the
//! remaining cipher for the next party to peel.

use crypto_box::seal::SealedBox;
use crypto_box::{PublicKey, SecretKey};
use rand::rngs::OsRng;

use crate::error::{Error, Result};
use crate::types::OfflineSecret;

/// Overhead a single `crypto_box` sealed-box layer adds: a 32-byte ephemeral
/// public key plus a 16-byte Poly1305 tag.
pub const SEAL_OVERHEAD: usize = 32 + 16;

pub fn generate_keypair() -> (PublicKey, SecretKey) {
    let secret = SecretKey::generate(&mut OsRng);
    let public = secret.public_key();
    (public, secret)
}

/// Total byte size of an onion cipher wrapping `party_count` layers.
pub fn cipher_size(party_count: usize) -> usize {
    party_count * (OfflineSecret::ENCODED_SIZE + SEAL_OVERHEAD)
}

/// Nests `secrets` into one onion cipher for the parties starting at
/// `first_party` (`secrets[i]` is meant for party `first_party + i`),
/// sealing from the innermost (last) party outward so that each layer's
/// plaintext is that party's secret followed by the cipher for all parties
/// after it.
pub fn encrypt(
    secrets: &[OfflineSecret],
    first_party: usize,
    pkeys: &[PublicKey],
) -> Result<Vec<u8>> {
    let mut inner: Vec<u8> = Vec::new();
    for local_idx in (0..secrets.len()).rev() {
        let mut plaintext = secrets[local_idx].to_bytes();
        plaintext.extend_from_slice(&inner);
        inner = SealedBox::encrypt(&mut OsRng, &pkeys[first_party + local_idx], &plaintext)
            .map_err(|e| Error::Protocol(format!("onion seal failed: {e}")))?;
    }
    Ok(inner)
}

/// One decrypted onion layer: the `OfflineSecret` meant for this party and
/// the remaining cipher for the next party, both borrowed from one owned
/// buffer so no extra copy of either is needed.
pub struct OnionLayer {
    buf: Vec<u8>,
}

impl OnionLayer {
    pub fn message(&self) -> OfflineSecret {
        OfflineSecret::from_bytes(&self.buf[..OfflineSecret::ENCODED_SIZE])
    }

    pub fn next_layer(&self) -> &[u8] {
        &self.buf[OfflineSecret::ENCODED_SIZE..]
    }
}

/// Peels one layer off `cipher`, meant for the holder of `secret_key`.
pub fn decrypt(cipher: &[u8], secret_key: &SecretKey) -> Result<OnionLayer> {
    let buf = SealedBox::decrypt(secret_key, cipher)
        .map_err(|e| Error::Protocol(format!("onion unseal failed: {e}")))?;
    Ok(OnionLayer { buf })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IncrementalShare, PRESHARE_SIZE};

    fn secret(tag: u64) -> OfflineSecret {
        OfflineSecret {
            tag,
            next_tag: tag + 1,
            share: IncrementalShare { x: 1, y: 2 },
            preshare: [0u8; PRESHARE_SIZE],
        }
    }

    #[test]
    fn peels_layers_in_order() {
        let keys: Vec<_> = (0..3).map(|_| generate_keypair()).collect();
        let pkeys: Vec<_> = keys.iter().map(|(p, _)| p.clone()).collect();
        let secrets = vec![secret(10), secret(20), secret(30)];

        let cipher = encrypt(&secrets, 0, &pkeys).unwrap();
        assert_eq!(cipher.len(), cipher_size(3));

        let layer0 = decrypt(&cipher, &keys[0].1).unwrap();
        assert_eq!(layer0.message(), secrets[0]);

        let layer1 = decrypt(layer0.next_layer(), &keys[1].1).unwrap();
        assert_eq!(layer1.message(), secrets[1]);

        let layer2 = decrypt(layer1.next_layer(), &keys[2].1).unwrap();
        assert_eq!(layer2.message(), secrets[2]);
        assert!(layer2.next_layer().is_empty());
    }

    #[test]
    fn encrypts_a_sub_chain_starting_past_party_zero() {
        let keys: Vec<_> = (0..4).map(|_| generate_keypair()).collect();
        let pkeys: Vec<_> = keys.iter().map(|(p, _)| p.clone()).collect();
        // Only parties 2 and 3 are targeted; secrets[0] belongs to party 2.
        let secrets = vec![secret(10), secret(20)];

        let cipher = encrypt(&secrets, 2, &pkeys).unwrap();
        assert_eq!(cipher.len(), cipher_size(2));

        let layer0 = decrypt(&cipher, &keys[2].1).unwrap();
        assert_eq!(layer0.message(), secrets[0]);

        let layer1 = decrypt(layer0.next_layer(), &keys[3].1).unwrap();
        assert_eq!(layer1.message(), secrets[1]);
        assert!(layer1.next_layer().is_empty());
    }
}
