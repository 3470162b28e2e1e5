//! Credential material presented to the relay on every new connection.
//!
//! Licence issuance and signature verification happen elsewhere; this module
//! only turns an already-verified grant, or a local debug identity, into the
//! four opaque header values of the allocation request.

use bytes::{BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};

use crate::{
    error::CredentialError,
    frame::{ALLOCATE_PATH, HEADER_TERMINATOR},
};

/// Public identifier used by locally synthesised credentials.
pub const BUILTIN_PUBLIC_ID: &[u8] = b"BUILTIN";

/// Minimum nonce length accepted by [`CredentialSource::Nonce`].
pub const MIN_NONCE_LEN: usize = 5;

/// The credential tuple sent as `X-Cred0`..`X-Cred3`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    /// Public identifier (`X-Cred0`).
    pub public_id: Bytes,
    /// First opaque string (`X-Cred1`).
    pub str1: Bytes,
    /// Second opaque string (`X-Cred2`).
    pub str2: Bytes,
    /// Signature (`X-Cred3`).
    pub signature: Bytes,
}

impl Credentials {
    /// Encode the allocation request written immediately after connecting.
    ///
    /// # Examples
    ///
    /// ```
    /// use bytes::Bytes;
    /// use relaywire::credentials::Credentials;
    ///
    /// let creds = Credentials {
    ///     public_id: Bytes::from_static(b"p"),
    ///     str1: Bytes::from_static(b"a"),
    ///     str2: Bytes::from_static(b"b"),
    ///     signature: Bytes::from_static(b"s"),
    /// };
    /// assert_eq!(
    ///     &creds.allocation_request()[..],
    ///     &b"GET /allocate HTTP/1.1\r\nX-Cred0: p\r\nX-Cred1: a\r\nX-Cred2: b\r\nX-Cred3: s\r\n\r\n"[..]
    /// );
    /// ```
    #[must_use]
    pub fn allocation_request(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(
            64 + self.public_id.len() + self.str1.len() + self.str2.len() + self.signature.len(),
        );
        out.put_slice(b"GET ");
        out.put_slice(ALLOCATE_PATH);
        out.put_slice(b" HTTP/1.1");
        for (index, value) in [&self.public_id, &self.str1, &self.str2, &self.signature]
            .into_iter()
            .enumerate()
        {
            out.put_slice(format!("\r\nX-Cred{index}: ").as_bytes());
            out.put_slice(value);
        }
        out.put_slice(HEADER_TERMINATOR);
        out.freeze()
    }
}

/// A licence grant whose signature has already been verified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LicenseGrant {
    /// Connections the licence allows.
    pub connection_count: usize,
    /// First key material blob, sent hex-encoded.
    pub key_material_1: Vec<u8>,
    /// Second key material blob, sent hex-encoded.
    pub key_material_2: Vec<u8>,
}

/// Where the pool's credentials come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CredentialSource {
    /// A verified licence.
    License(LicenseGrant),
    /// Local debugging against a relay that accepts placeholder signatures.
    Debug {
        /// Application name announced to the relay.
        app_name: String,
        /// Desired pool size.
        connection_count: usize,
    },
    /// A nonce-signed identity limited to a single connection.
    Nonce {
        /// Application name announced to the relay.
        app_name: String,
        /// Connection nonce, at least [`MIN_NONCE_LEN`] bytes.
        nonce: Vec<u8>,
    },
}

impl CredentialSource {
    /// Resolve into the credential tuple and the initial desired pool size.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] when an application name is empty or a
    /// nonce is shorter than [`MIN_NONCE_LEN`].
    pub fn resolve(&self) -> Result<(Credentials, usize), CredentialError> {
        match self {
            Self::License(grant) => Ok((
                Credentials {
                    public_id: Bytes::new(),
                    str1: hex_bytes(&grant.key_material_1),
                    str2: hex_bytes(&grant.key_material_2),
                    signature: Bytes::new(),
                },
                grant.connection_count,
            )),
            Self::Debug {
                app_name,
                connection_count,
            } => {
                check_app_name(app_name)?;
                let placeholder = hex_bytes(b"null");
                Ok((
                    Credentials {
                        public_id: Bytes::from_static(BUILTIN_PUBLIC_ID),
                        str1: identity(app_name, *connection_count),
                        str2: placeholder.clone(),
                        signature: placeholder,
                    },
                    *connection_count,
                ))
            }
            Self::Nonce { app_name, nonce } => {
                check_app_name(app_name)?;
                if nonce.len() < MIN_NONCE_LEN {
                    return Err(CredentialError::NonceTooShort {
                        len: nonce.len(),
                        min: MIN_NONCE_LEN,
                    });
                }
                // Nonce identities are always limited to one connection.
                let str1 = identity(app_name, 1);
                let mut hasher = Sha256::new();
                hasher.update(Sha256::digest(&str1));
                hasher.update(b":");
                hasher.update(nonce);
                let digest = hasher.finalize();
                Ok((
                    Credentials {
                        public_id: Bytes::from_static(BUILTIN_PUBLIC_ID),
                        str1,
                        str2: hex_bytes(nonce),
                        signature: hex_bytes(&digest[..4]),
                    },
                    1,
                ))
            }
        }
    }
}

fn check_app_name(app_name: &str) -> Result<(), CredentialError> {
    if app_name.is_empty() {
        return Err(CredentialError::EmptyAppName);
    }
    Ok(())
}

fn identity(app_name: &str, count: usize) -> Bytes {
    Bytes::from(format!("name:{app_name},period:1,num:{count}"))
}

fn hex_bytes(data: &[u8]) -> Bytes { Bytes::from(hex::encode(data)) }

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn licence_grant_hex_encodes_key_material() {
        let source = CredentialSource::License(LicenseGrant {
            connection_count: 4,
            key_material_1: vec![0xab, 0x01],
            key_material_2: vec![0xff],
        });
        let (creds, count) = source.resolve().expect("resolve licence");

        assert_eq!(count, 4);
        assert!(creds.public_id.is_empty());
        assert_eq!(&creds.str1[..], b"ab01");
        assert_eq!(&creds.str2[..], b"ff");
        assert!(creds.signature.is_empty());
    }

    #[test]
    fn debug_identity_uses_placeholder_signature() {
        let source = CredentialSource::Debug {
            app_name: "demo".into(),
            connection_count: 2,
        };
        let (creds, count) = source.resolve().expect("resolve debug");

        assert_eq!(count, 2);
        assert_eq!(&creds.public_id[..], b"BUILTIN");
        assert_eq!(&creds.str1[..], b"name:demo,period:1,num:2");
        assert_eq!(&creds.str2[..], b"6e756c6c");
        assert_eq!(&creds.signature[..], b"6e756c6c");
    }

    #[test]
    fn nonce_identity_is_signed_and_limited_to_one_connection() {
        let source = CredentialSource::Nonce {
            app_name: "demo".into(),
            nonce: vec![1, 2, 3, 4, 5],
        };
        let (creds, count) = source.resolve().expect("resolve nonce");

        assert_eq!(count, 1);
        assert_eq!(&creds.str1[..], b"name:demo,period:1,num:1");
        assert_eq!(&creds.str2[..], b"0102030405");
        assert_eq!(&creds.signature[..], b"9482a5da");
    }

    #[rstest]
    #[case::empty_debug_name(
        CredentialSource::Debug { app_name: String::new(), connection_count: 1 },
        CredentialError::EmptyAppName
    )]
    #[case::short_nonce(
        CredentialSource::Nonce { app_name: "demo".into(), nonce: vec![1, 2, 3, 4] },
        CredentialError::NonceTooShort { len: 4, min: MIN_NONCE_LEN }
    )]
    fn invalid_sources_are_rejected(#[case] source: CredentialSource, #[case] expected: CredentialError) {
        assert_eq!(source.resolve(), Err(expected));
    }

    #[test]
    fn allocation_request_parses_as_one_frame() {
        let (creds, _) = CredentialSource::Debug {
            app_name: "demo".into(),
            connection_count: 1,
        }
        .resolve()
        .expect("resolve debug");
        let frames = crate::codec::Framer::new().feed_collect(&creds.allocation_request());

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].target(), Some(ALLOCATE_PATH));
        assert_eq!(frames[0].header(b"X-CRED1").map(|v| &v[..]), Some(&b"name:demo,period:1,num:1"[..]));
    }
}
