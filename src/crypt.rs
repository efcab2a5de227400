//! PDF "cryptography": the standard security handler, revisions 2 through 4.

use crate::error::*;
use crate::object::{GenNr, Object, ObjNr, Resolve};
use crate::primitive::Dictionary;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use std::collections::HashMap;
use std::fmt;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// The 32-byte pad from 7.6.3.3 that fills out short passwords.
const PASSWORD_PAD: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56,
    0xFF, 0xFA, 0x01, 0x08, 0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80,
    0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

fn pad_password(pass: &[u8]) -> [u8; 32] {
    let mut padded = [0; 32];
    let n = pass.len().min(32);
    padded[..n].copy_from_slice(&pass[..n]);
    padded[n..].copy_from_slice(&PASSWORD_PAD[..32 - n]);
    padded
}

/// An RC4 keystream. The stream cipher is its own inverse, so [`Rc4::apply`]
/// both encrypts and decrypts.
pub struct Rc4 {
    s: [u8; 256],
    a: u8,
    b: u8,
}

impl Rc4 {
    pub fn with_key(key: &[u8]) -> Rc4 {
        debug_assert!(!key.is_empty() && key.len() <= 256);
        let mut s = [0u8; 256];
        for (i, slot) in s.iter_mut().enumerate() {
            *slot = i as u8;
        }
        let mut swap_at = 0u8;
        for (i, &k) in (0..256).zip(key.iter().cycle()) {
            swap_at = swap_at.wrapping_add(s[i]).wrapping_add(k);
            s.swap(i, swap_at as usize);
        }
        Rc4 { s, a: 0, b: 0 }
    }

    /// XOR the keystream for `key` over `data` in place.
    pub fn apply(key: &[u8], data: &mut [u8]) {
        for (byte, k) in data.iter_mut().zip(Rc4::with_key(key)) {
            *byte ^= k;
        }
    }
}

impl Iterator for Rc4 {
    type Item = u8;
    fn next(&mut self) -> Option<u8> {
        self.a = self.a.wrapping_add(1);
        self.b = self.b.wrapping_add(self.s[self.a as usize]);
        self.s.swap(self.a as usize, self.b as usize);
        let mix = self.s[self.a as usize].wrapping_add(self.s[self.b as usize]);
        Some(self.s[mix as usize])
    }
}

/// The /Encrypt dictionary (7.6.1 table 20 and 7.6.3.2 table 21).
#[derive(Debug, Clone)]
pub struct CryptDict {
    o: Vec<u8>,
    u: Vec<u8>,
    r: u32,
    p: i32,
    v: i32,
    bits: u32,
    crypt_filters: HashMap<String, CryptFilter>,
    default_crypt_filter: Option<String>,
    encrypt_metadata: bool,
}

impl CryptDict {
    pub fn from_dict(dict: &Dictionary, r: &impl Resolve) -> Result<CryptDict> {
        let mut dict = dict.clone();
        let o = dict.require("CryptDict", "O")?.as_string()?.as_bytes().to_vec();
        let u = dict.require("CryptDict", "U")?.as_string()?.as_bytes().to_vec();
        let rev = u32::from_primitive(dict.require("CryptDict", "R")?, r)?;
        let p = i32::from_primitive(dict.require("CryptDict", "P")?, r)?;
        let v = i32::from_primitive(dict.require("CryptDict", "V")?, r)?;
        let bits = match dict.remove("Length") {
            Some(p) => u32::from_primitive(p, r)?,
            None => 40,
        };
        let mut crypt_filters = HashMap::new();
        if let Some(cf) = dict.remove("CF") {
            for (name, filter) in Dictionary::from_primitive(cf, r)? {
                crypt_filters.insert(name, CryptFilter::from_dict(filter.as_dict()?, r)?);
            }
        }
        let default_crypt_filter = match dict.remove("StmF") {
            Some(p) => Some(p.into_name()?),
            None => None,
        };
        let encrypt_metadata = match dict.remove("EncryptMetadata") {
            Some(p) => bool::from_primitive(p, r)?,
            None => true,
        };
        Ok(CryptDict {
            o, u, r: rev, p, v, bits,
            crypt_filters,
            default_crypt_filter,
            encrypt_metadata,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptMethod {
    None,
    V2,
    AESV2
}
impl CryptMethod {
    fn from_name(name: &str) -> Result<CryptMethod> {
        Ok(match name {
            "None" | "Identity" => CryptMethod::None,
            "V2" => CryptMethod::V2,
            "AESV2" => CryptMethod::AESV2,
            m => bail!("unimplemented crypt method {:?}", m),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub enum StandardSecurityHandlerRevision {
    R2,
    R3,
    R4,
}

/// One entry of the document's /CF dictionary.
#[derive(Debug, Clone)]
pub struct CryptFilter {
    pub method: CryptMethod,
    pub length: Option<u32>,
}
impl CryptFilter {
    pub fn from_dict(dict: &Dictionary, r: &impl Resolve) -> Result<CryptFilter> {
        let method = match dict.get("CFM") {
            Some(p) => CryptMethod::from_name(p.clone().into_name()?.as_str())?,
            None => CryptMethod::None,
        };
        let length = match dict.get("Length") {
            Some(p) => Some(u32::from_primitive(p.clone(), r)?),
            None => None,
        };
        Ok(CryptFilter { method, length })
    }
}

pub struct Decoder {
    key_size: usize,
    /// Room for the largest supported key; only `key_size` bytes are live.
    key: [u8; 16],
    method: CryptMethod,
    revision: StandardSecurityHandlerRevision,
    /// Named crypt filters configured in the document's /CF dictionary.
    filters: HashMap<String, CryptFilter>,
}
impl Decoder {
    pub fn default(dict: &CryptDict, id: &[u8]) -> Result<Decoder> {
        Decoder::from_password(dict, id, b"")
    }
    fn key(&self) -> &[u8] {
        &self.key[.. self.key_size]
    }
    pub fn from_password(dict: &CryptDict, id: &[u8], pass: &[u8]) -> Result<Decoder> {
        let decoder = Decoder::derive(dict, id, pass)?;
        if decoder.check_password(dict, id) {
            Ok(decoder)
        } else {
            Err(PdfError::InvalidPassword)
        }
    }
    fn derive(dict: &CryptDict, id: &[u8], pass: &[u8]) -> Result<Decoder> {
        let (key_bits, method) = match dict.v {
            1 => (40, CryptMethod::V2),
            2 => (dict.bits, CryptMethod::V2),
            4 => {
                let name = match dict.default_crypt_filter {
                    Some(ref name) => name.as_str(),
                    None => "Identity",
                };
                match dict.crypt_filters.get(name) {
                    Some(default) => match default.method {
                        CryptMethod::V2 | CryptMethod::AESV2 => (
                            default.length.map(|n| 8 * n).unwrap_or(dict.bits),
                            default.method,
                        ),
                        CryptMethod::None => (dict.bits, CryptMethod::None),
                    },
                    None => (dict.bits, CryptMethod::None),
                }
            },
            v => bail!("unsupported V value {}", v),
        };
        let revision = match dict.r {
            2 => StandardSecurityHandlerRevision::R2,
            3 => StandardSecurityHandlerRevision::R3,
            4 => StandardSecurityHandlerRevision::R4,
            other => bail!("unsupported standard security handler revision {}", other),
        };

        // Algorithm 2: hash the padded password together with /O, /P and the
        // file id, then (from revision 3) fold the truncated digest through
        // md5 another fifty times.
        let key_len = key_bits as usize / 8;
        let mut hasher = md5::Context::new();
        hasher.consume(pad_password(pass));
        hasher.consume(&dict.o);
        hasher.consume(dict.p.to_le_bytes());
        hasher.consume(id);
        if dict.r >= 4 && !dict.encrypt_metadata {
            hasher.consume([0xff; 4]);
        }
        if !dict.encrypt_metadata {
            warn!("plaintext metadata streams are not treated specially");
        }
        let mut digest = hasher.compute().0;
        if dict.r >= 3 {
            for _ in 0..50 {
                digest = md5::compute(&digest[..key_len]).0;
            }
        }

        Ok(Decoder {
            key: digest,
            key_size: key_len,
            method,
            revision,
            filters: dict.crypt_filters.clone(),
        })
    }

    /// The /U value this decoder's key would produce (Algorithms 4 and 5).
    fn compute_u(&self, id: &[u8]) -> Vec<u8> {
        match self.revision {
            StandardSecurityHandlerRevision::R2 => {
                // the pad constant under RC4 with the file key
                let mut user = PASSWORD_PAD.to_vec();
                Rc4::apply(self.key(), &mut user);
                user
            }
            StandardSecurityHandlerRevision::R3 | StandardSecurityHandlerRevision::R4 => {
                // hash pad + id, then twenty RC4 passes, each keyed by the
                // file key XORed with the round number
                let mut hasher = md5::Context::new();
                hasher.consume(PASSWORD_PAD);
                hasher.consume(id);
                let mut user = hasher.compute().0.to_vec();
                for round in 0u8..20 {
                    let mut round_key = [0u8; 16];
                    for (slot, &k) in round_key.iter_mut().zip(self.key.iter()) {
                        *slot = k ^ round;
                    }
                    Rc4::apply(&round_key[..self.key_size], &mut user);
                }
                user
            }
        }
    }

    pub fn check_password(&self, dict: &CryptDict, id: &[u8]) -> bool {
        let expected = self.compute_u(id);
        match self.revision {
            StandardSecurityHandlerRevision::R2 => expected == dict.u,
            StandardSecurityHandlerRevision::R3 | StandardSecurityHandlerRevision::R4 => {
                // only the first half of /U is defined for revision 3 and up
                dict.u.len() >= 16 && dict.u[..16] == expected[..16]
            }
        }
    }

    /// The object key of Algorithm 1: file key extended with the low bytes of
    /// the object id and generation (plus the AES salt), hashed and clipped.
    fn object_key(&self, id: ObjNr, gen: GenNr, aes: bool) -> ([u8; 16], usize) {
        let mut material = Vec::with_capacity(self.key_size + 9);
        material.extend_from_slice(self.key());
        material.extend_from_slice(&id.to_le_bytes()[..3]);
        material.extend_from_slice(&gen.to_le_bytes()[..2]);
        if aes {
            material.extend_from_slice(b"sAlT");
        }
        (md5::compute(&material).0, (self.key_size + 5).min(16))
    }

    /// Per-object decryption with the document's default method.
    pub fn decrypt<'buf>(&self, id: ObjNr, gen: GenNr, data: &'buf mut [u8]) -> Result<&'buf [u8]> {
        self.decrypt_with_method(self.method, id, gen, data)
    }

    /// Decryption through one of the configured named crypt filters.
    /// `/Identity` and unknown names leave the data untouched.
    pub fn decrypt_with_filter<'buf>(
        &self,
        name: &str,
        id: ObjNr,
        gen: GenNr,
        data: &'buf mut [u8],
    ) -> Result<&'buf [u8]> {
        if name == "Identity" {
            return Ok(data);
        }
        let method = match self.filters.get(name) {
            Some(f) => f.method,
            None => {
                warn!("unknown crypt filter /{}", name);
                return Ok(data);
            }
        };
        self.decrypt_with_method(method, id, gen, data)
    }

    fn decrypt_with_method<'buf>(
        &self,
        method: CryptMethod,
        id: ObjNr,
        gen: GenNr,
        data: &'buf mut [u8],
    ) -> Result<&'buf [u8]> {
        match method {
            CryptMethod::None => Ok(data),
            CryptMethod::V2 => {
                let (key, n) = self.object_key(id, gen, false);
                Rc4::apply(&key[..n], data);
                Ok(data)
            }
            CryptMethod::AESV2 => {
                let (key, n) = self.object_key(id, gen, true);
                // the ciphertext is prefixed with its 16-byte CBC
                // initialization vector
                if data.len() < 16 {
                    err!(PdfError::DecryptionFailure);
                }
                let (iv, body) = data.split_at_mut(16);
                let cipher = Aes128CbcDec::new_from_slices(&key[..n], iv)
                    .map_err(|_| PdfError::DecryptionFailure)?;
                cipher
                    .decrypt_padded_mut::<Pkcs7>(body)
                    .map_err(|_| PdfError::DecryptionFailure)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn with_key(
        key: [u8; 16],
        key_size: usize,
        method: CryptMethod,
        filters: HashMap<String, CryptFilter>,
    ) -> Decoder {
        Decoder {
            key,
            key_size,
            method,
            revision: StandardSecurityHandlerRevision::R3,
            filters,
        }
    }
}
impl fmt::Debug for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Decoder")
            .field("key", &self.key())
            .field("method", &self.method)
            .finish()
    }
}
