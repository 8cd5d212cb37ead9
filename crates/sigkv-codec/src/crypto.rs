//! Encrypted request/response channel
//!
//! Requests are encapsulated to the service's public key with HPKE
//! (DHKEM X25519, HKDF-SHA256, AES-256-GCM), prefixed by a 7-byte
//! key-config header naming the key id and algorithm identifiers. The
//! response comes back under a key derived from the same HPKE context: the
//! service exports a secret bound to the response media type, salts it with
//! the encapsulated key and a fresh response nonce, and seals the body with
//! AES-256-GCM. Pairing a response with the wrong request context therefore
//! fails decryption.
//!
//! The gateway half (request decryption, response encryption) is what a
//! key-value service performs; it lives here so the full channel can be
//! exercised end to end in tests.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use hkdf::Hkdf;
use hpke::aead::{AeadCtxR, AeadCtxS, AesGcm256};
use hpke::kdf::HkdfSha256;
use hpke::kem::X25519HkdfSha256;
use hpke::{Deserializable, Kem as KemTrait, OpModeR, OpModeS, Serializable};
use rand::RngCore;
use sha2::Sha256;

use sigkv_core::{ErrorInfo, Result};

type Kem = X25519HkdfSha256;

/// Media type bound into the request encapsulation.
pub const REQUEST_MEDIA_TYPE: &str = "message/ad-auction-trusted-signals-request";

/// Media type bound into the response key derivation.
pub const RESPONSE_MEDIA_TYPE: &str = "message/ad-auction-trusted-signals-response";

const KEM_ID: u16 = 0x0020; // DHKEM(X25519, HKDF-SHA256)
const KDF_ID: u16 = 0x0001; // HKDF-SHA256
const AEAD_ID: u16 = 0x0002; // AES-256-GCM

const KEY_CONFIG_HEADER_SIZE: usize = 7;
const ENCAPPED_KEY_SIZE: usize = 32;
const AEAD_KEY_SIZE: usize = 32;
const AEAD_NONCE_SIZE: usize = 12;
/// Response nonce length: max(key size, nonce size).
const RESPONSE_NONCE_SIZE: usize = 32;

/// Service public key used to encapsulate a request.
#[derive(Debug, Clone)]
pub struct PublicKey {
    /// Key identifier assigned by the key-distribution channel.
    pub id: u8,
    /// Raw X25519 public key bytes.
    pub key: Vec<u8>,
}

/// Client-side state kept between sending a request and reading its
/// response. Must be paired with the exact response that answers the
/// request it was created from.
pub struct RequestContext {
    enc: Vec<u8>,
    ctx: AeadCtxS<AesGcm256, HkdfSha256, Kem>,
}

/// Encapsulate a framed request body under the service's public key.
///
/// Returns the serialized encapsulated request (key-config header,
/// encapsulated KEM share, AEAD ciphertext) and the context needed to open
/// the matching response.
///
/// # Panics
///
/// Panics if `public_key.key` is not a valid 32-byte X25519 public key;
/// building a request is infallible for well-formed key material.
pub fn encrypt_request(body: &[u8], public_key: &PublicKey) -> (Vec<u8>, RequestContext) {
    let service_pk = <Kem as KemTrait>::PublicKey::from_bytes(&public_key.key)
        .expect("trusted signals public key must be 32 X25519 bytes");

    let header = key_config_header(public_key.id);
    let info = hpke_info(REQUEST_MEDIA_TYPE, &header);

    let (encapped_key, mut ctx) = hpke::setup_sender::<AesGcm256, HkdfSha256, Kem, _>(
        &OpModeS::Base,
        &service_pk,
        &info,
        &mut rand::thread_rng(),
    )
    .expect("HPKE sender setup with a valid key");
    let ciphertext = ctx.seal(body, b"").expect("HPKE seal");

    let enc = encapped_key.to_bytes().to_vec();
    let mut request = Vec::with_capacity(header.len() + enc.len() + ciphertext.len());
    request.extend_from_slice(&header);
    request.extend_from_slice(&enc);
    request.extend_from_slice(&ciphertext);

    (request, RequestContext { enc, ctx })
}

impl RequestContext {
    /// Open a response sealed by the gateway for this request.
    pub fn decrypt_response(&self, response: &[u8]) -> Result<Vec<u8>> {
        if response.len() < RESPONSE_NONCE_SIZE {
            return Err(ErrorInfo::new("Response is shorter than the response nonce."));
        }
        let (response_nonce, ciphertext) = response.split_at(RESPONSE_NONCE_SIZE);

        let mut secret = [0u8; AEAD_KEY_SIZE];
        self.ctx
            .export(RESPONSE_MEDIA_TYPE.as_bytes(), &mut secret)
            .map_err(|_| ErrorInfo::new("Failed to export response secret."))?;
        let (key, nonce) = derive_response_key(&secret, &self.enc, response_nonce);

        let cipher = Aes256Gcm::new_from_slice(&key).expect("AES-256 key size");
        cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| ErrorInfo::new("Failed to open response AEAD."))
    }
}

/// Gateway half of the channel: holds the service private key, decrypts
/// encapsulated requests, and seals responses for their senders.
pub struct Gateway {
    key_id: u8,
    private_key: <Kem as KemTrait>::PrivateKey,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// Per-request gateway state for sealing the matching response.
pub struct GatewayContext {
    enc: Vec<u8>,
    ctx: AeadCtxR<AesGcm256, HkdfSha256, Kem>,
}

impl std::fmt::Debug for GatewayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayContext")
            .field("enc", &self.enc)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn new(key_id: u8, private_key_bytes: &[u8]) -> Result<Self> {
        let private_key = <Kem as KemTrait>::PrivateKey::from_bytes(private_key_bytes)
            .map_err(|_| ErrorInfo::new("Invalid gateway private key."))?;
        Ok(Self {
            key_id,
            private_key,
        })
    }

    /// Generate a fresh keypair, returning the gateway and the matching
    /// public key under `key_id`.
    pub fn generate(key_id: u8) -> (Self, PublicKey) {
        let (private_key, public_key) = Kem::gen_keypair(&mut rand::thread_rng());
        (
            Self {
                key_id,
                private_key,
            },
            PublicKey {
                id: key_id,
                key: public_key.to_bytes().to_vec(),
            },
        )
    }

    /// Decrypt an encapsulated request, returning the plaintext body and
    /// the context for sealing the matching response.
    pub fn decrypt_request(&self, request: &[u8]) -> Result<(Vec<u8>, GatewayContext)> {
        if request.len() < KEY_CONFIG_HEADER_SIZE + ENCAPPED_KEY_SIZE {
            return Err(ErrorInfo::new(
                "Encapsulated request is shorter than its header.",
            ));
        }
        let (header, rest) = request.split_at(KEY_CONFIG_HEADER_SIZE);
        if header != key_config_header(self.key_id) {
            return Err(ErrorInfo::new("Unsupported request key configuration."));
        }
        let (enc, ciphertext) = rest.split_at(ENCAPPED_KEY_SIZE);

        let encapped_key = <Kem as KemTrait>::EncappedKey::from_bytes(enc)
            .map_err(|_| ErrorInfo::new("Invalid encapsulated key."))?;
        let info = hpke_info(REQUEST_MEDIA_TYPE, header);

        let mut ctx = hpke::setup_receiver::<AesGcm256, HkdfSha256, Kem>(
            &OpModeR::Base,
            &self.private_key,
            &encapped_key,
            &info,
        )
        .map_err(|_| ErrorInfo::new("Failed to set up request decryption."))?;
        let body = ctx
            .open(ciphertext, b"")
            .map_err(|_| ErrorInfo::new("Failed to open request AEAD."))?;

        Ok((
            body,
            GatewayContext {
                enc: enc.to_vec(),
                ctx,
            },
        ))
    }
}

impl GatewayContext {
    /// Seal a response body for the client that sent the request.
    pub fn encrypt_response(&self, body: &[u8]) -> Vec<u8> {
        let mut response_nonce = [0u8; RESPONSE_NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut response_nonce);

        let mut secret = [0u8; AEAD_KEY_SIZE];
        self.ctx
            .export(RESPONSE_MEDIA_TYPE.as_bytes(), &mut secret)
            .expect("HPKE export");
        let (key, nonce) = derive_response_key(&secret, &self.enc, &response_nonce);

        let cipher = Aes256Gcm::new_from_slice(&key).expect("AES-256 key size");
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), body)
            .expect("AEAD seal");

        let mut response = Vec::with_capacity(response_nonce.len() + ciphertext.len());
        response.extend_from_slice(&response_nonce);
        response.extend_from_slice(&ciphertext);
        response
    }
}

fn key_config_header(key_id: u8) -> [u8; KEY_CONFIG_HEADER_SIZE] {
    let mut header = [0u8; KEY_CONFIG_HEADER_SIZE];
    header[0] = key_id;
    header[1..3].copy_from_slice(&KEM_ID.to_be_bytes());
    header[3..5].copy_from_slice(&KDF_ID.to_be_bytes());
    header[5..7].copy_from_slice(&AEAD_ID.to_be_bytes());
    header
}

fn hpke_info(media_type: &str, header: &[u8]) -> Vec<u8> {
    let mut info = Vec::with_capacity(media_type.len() + 1 + header.len());
    info.extend_from_slice(media_type.as_bytes());
    info.push(0x00);
    info.extend_from_slice(header);
    info
}

/// Derive the response AEAD key and nonce from the exported secret, the
/// encapsulated key, and the response nonce.
fn derive_response_key(
    secret: &[u8],
    enc: &[u8],
    response_nonce: &[u8],
) -> ([u8; AEAD_KEY_SIZE], [u8; AEAD_NONCE_SIZE]) {
    let mut salt = Vec::with_capacity(enc.len() + response_nonce.len());
    salt.extend_from_slice(enc);
    salt.extend_from_slice(response_nonce);

    let hkdf = Hkdf::<Sha256>::new(Some(&salt), secret);
    let mut key = [0u8; AEAD_KEY_SIZE];
    let mut nonce = [0u8; AEAD_NONCE_SIZE];
    hkdf.expand(b"key", &mut key).expect("HKDF expand key");
    hkdf.expand(b"nonce", &mut nonce).expect("HKDF expand nonce");
    (key, nonce)
}
