//! Password-based AES fallback path (§4.2): used when no PQC keypair is
//! available for the recipient (legacy callers, offline export). AES-256-CBC
//! encrypt-then-MAC with HMAC-SHA256, keyed via PBKDF2-SHA256 over the
//! caller-supplied password.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;

use super::primitives::{constant_time_eq, CryptoError};

pub const PBKDF2_ITERATIONS: u32 = 600_000;
const SALT_LEN: usize = 16;
const IV_LEN: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

pub struct AesSealed {
    pub salt: [u8; SALT_LEN],
    pub iv: [u8; IV_LEN],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; 32],
}

/// Derive a 32-byte AES key and a 32-byte MAC key from `password` and
/// `salt` via PBKDF2-SHA256, then encrypt-then-MAC `plaintext`.
pub fn encrypt_aes(password: &[u8], plaintext: &[u8]) -> AesSealed {
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut iv);

    let (enc_key, mac_key) = derive_keys(password, &salt);

    let ciphertext = Aes256CbcEnc::new(&enc_key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut mac = HmacSha256::new_from_slice(&mac_key).expect("hmac accepts any key length");
    mac.update(&salt);
    mac.update(&iv);
    mac.update(&ciphertext);
    let tag: [u8; 32] = mac.finalize().into_bytes().into();

    AesSealed {
        salt,
        iv,
        ciphertext,
        tag,
    }
}

/// Verify the MAC over `(salt, iv, ciphertext)` before attempting to decrypt
/// anything — encrypt-then-MAC means we must never feed attacker-controlled
/// ciphertext to the cipher before authenticating it.
pub fn decrypt_aes(
    password: &[u8],
    salt: &[u8; SALT_LEN],
    iv: &[u8; IV_LEN],
    ciphertext: &[u8],
    tag: &[u8; 32],
) -> Result<Vec<u8>, CryptoError> {
    let (enc_key, mac_key) = derive_keys(password, salt);

    let mut mac = HmacSha256::new_from_slice(&mac_key).expect("hmac accepts any key length");
    mac.update(salt);
    mac.update(iv);
    mac.update(ciphertext);
    let expected: [u8; 32] = mac.finalize().into_bytes().into();

    if !constant_time_eq(&expected, tag) {
        return Err(CryptoError::AuthenticationFailure);
    }

    Aes256CbcDec::new(&enc_key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailure)
}

fn derive_keys(password: &[u8], salt: &[u8]) -> ([u8; 32], [u8; 32]) {
    let mut combined = [0u8; 64];
    pbkdf2_hmac::<Sha256>(password, salt, PBKDF2_ITERATIONS, &mut combined);
    let mut enc_key = [0u8; 32];
    let mut mac_key = [0u8; 32];
    enc_key.copy_from_slice(&combined[..32]);
    mac_key.copy_from_slice(&combined[32..]);
    (enc_key, mac_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_correct_password() {
        let sealed = encrypt_aes(b"correct horse battery staple", b"governance decision log");
        let opened = decrypt_aes(
            b"correct horse battery staple",
            &sealed.salt,
            &sealed.iv,
            &sealed.ciphertext,
            &sealed.tag,
        )
        .unwrap();
        assert_eq!(opened, b"governance decision log");
    }

    #[test]
    fn wrong_password_fails_closed() {
        let sealed = encrypt_aes(b"correct horse battery staple", b"governance decision log");
        let result = decrypt_aes(
            b"wrong password",
            &sealed.salt,
            &sealed.iv,
            &sealed.ciphertext,
            &sealed.tag,
        );
        assert_eq!(result, Err(CryptoError::AuthenticationFailure));
    }

    #[test]
    fn tampered_ciphertext_fails_mac_before_decrypting() {
        let mut sealed = encrypt_aes(b"pw", b"data");
        let last = sealed.ciphertext.len() - 1;
        sealed.ciphertext[last] ^= 0x01;
        let result = decrypt_aes(
            b"pw",
            &sealed.salt,
            &sealed.iv,
            &sealed.ciphertext,
            &sealed.tag,
        );
        assert_eq!(result, Err(CryptoError::AuthenticationFailure));
    }
}
