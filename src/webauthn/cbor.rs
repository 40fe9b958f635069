//! Byte-level WebAuthn decoding
//!
//! CBOR decoding of the attestation object and COSE key map, and binary
//! parsing of the authenticator-data block. All parsing here is exact:
//! truncated or misshapen input is rejected, never padded or guessed at.

use ciborium::de::from_reader;
use ciborium::ser::into_writer;
use ciborium::value::Value;
use uuid::Uuid;

use crate::errors::AuthError;

/// Flag bit 0: user present
pub const FLAG_USER_PRESENT: u8 = 0b0000_0001;
/// Flag bit 2: user verified
pub const FLAG_USER_VERIFIED: u8 = 0b0000_0100;
/// Flag bit 3: backup eligible
pub const FLAG_BACKUP_ELIGIBLE: u8 = 0b0000_1000;
/// Flag bit 4: backup state
pub const FLAG_BACKUP_STATE: u8 = 0b0001_0000;
/// Flag bit 6: attested credential data present
pub const FLAG_ATTESTED_CREDENTIAL: u8 = 0b0100_0000;

/// COSE key type for EC2 keys
const COSE_KTY_EC2: i128 = 2;
/// COSE algorithm identifier for ES256
const COSE_ALG_ES256: i128 = -7;
/// COSE curve identifier for P-256
const COSE_CRV_P256: i128 = 1;

/// Decoded attestation object: `{fmt, attStmt, authData}`.
#[derive(Debug, Clone)]
pub struct AttestationObject {
    pub fmt: String,
    pub att_stmt: Vec<(Value, Value)>,
    pub auth_data: Vec<u8>,
}

impl AttestationObject {
    /// Whether the attestation statement carries a certificate chain.
    #[must_use]
    pub fn has_certificate_chain(&self) -> bool {
        self.att_stmt.iter().any(|(k, v)| {
            k.as_text() == Some("x5c") && v.as_array().is_some_and(|a| !a.is_empty())
        })
    }
}

/// Decode an attestation object from raw CBOR bytes.
///
/// # Errors
/// Returns `MalformedAttestation` for anything that is not a CBOR map with
/// a text `fmt`, a map `attStmt`, and a byte-string `authData`.
pub fn decode_attestation_object(bytes: &[u8]) -> Result<AttestationObject, AuthError> {
    let value: Value = from_reader(bytes)
        .map_err(|_| AuthError::MalformedAttestation("invalid CBOR".to_string()))?;
    let map = value
        .as_map()
        .ok_or_else(|| AuthError::MalformedAttestation("attestation is not a map".to_string()))?;

    let fmt = map
        .iter()
        .find(|(k, _)| k.as_text() == Some("fmt"))
        .and_then(|(_, v)| v.as_text())
        .ok_or_else(|| AuthError::MalformedAttestation("missing fmt".to_string()))?
        .to_string();

    let att_stmt = map
        .iter()
        .find(|(k, _)| k.as_text() == Some("attStmt"))
        .and_then(|(_, v)| v.as_map())
        .ok_or_else(|| AuthError::MalformedAttestation("missing attStmt".to_string()))?
        .clone();

    let auth_data = map
        .iter()
        .find(|(k, _)| k.as_text() == Some("authData"))
        .and_then(|(_, v)| v.as_bytes())
        .ok_or_else(|| AuthError::MalformedAttestation("missing authData".to_string()))?
        .clone();

    Ok(AttestationObject {
        fmt,
        att_stmt,
        auth_data,
    })
}

/// The attested-credential block inside authenticator data.
#[derive(Debug, Clone)]
pub struct AttestedCredential {
    /// 16-byte device-family identifier
    pub aaguid: Uuid,
    /// Raw credential ID bytes
    pub credential_id: Vec<u8>,
    /// COSE key, re-serialized from the decoded map so it is re-parseable
    /// exactly as stored
    pub cose_key: Vec<u8>,
}

/// Parsed authenticator data:
/// `rpIdHash[32] || flags[1] || signCount[4 BE] || (attestedCredentialData)?`
#[derive(Debug, Clone)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub sign_count: u32,
    pub attested_credential: Option<AttestedCredential>,
}

impl AuthenticatorData {
    #[must_use]
    pub fn user_present(&self) -> bool {
        self.flags & FLAG_USER_PRESENT != 0
    }

    #[must_use]
    pub fn user_verified(&self) -> bool {
        self.flags & FLAG_USER_VERIFIED != 0
    }

    #[must_use]
    pub fn backup_eligible(&self) -> bool {
        self.flags & FLAG_BACKUP_ELIGIBLE != 0
    }

    #[must_use]
    pub fn backup_state(&self) -> bool {
        self.flags & FLAG_BACKUP_STATE != 0
    }
}

/// Parse an authenticator-data block.
///
/// # Errors
/// Returns `MalformedAttestation` when the block is shorter than its fixed
/// header or the attested-credential lengths overrun the buffer.
pub fn parse_authenticator_data(bytes: &[u8]) -> Result<AuthenticatorData, AuthError> {
    if bytes.len() < 37 {
        return Err(AuthError::MalformedAttestation(
            "authenticator data too short".to_string(),
        ));
    }

    let mut rp_id_hash = [0u8; 32];
    rp_id_hash.copy_from_slice(&bytes[..32]);
    let flags = bytes[32];
    let sign_count = u32::from_be_bytes([bytes[33], bytes[34], bytes[35], bytes[36]]);

    let attested_credential = if flags & FLAG_ATTESTED_CREDENTIAL != 0 {
        Some(parse_attested_credential(&bytes[37..])?)
    } else {
        None
    };

    Ok(AuthenticatorData {
        rp_id_hash,
        flags,
        sign_count,
        attested_credential,
    })
}

fn parse_attested_credential(bytes: &[u8]) -> Result<AttestedCredential, AuthError> {
    // aaguid[16] || credentialIdLength[2 BE] || credentialId[L] || COSE key
    if bytes.len() < 18 {
        return Err(AuthError::MalformedAttestation(
            "attested credential data too short".to_string(),
        ));
    }

    let mut aaguid_bytes = [0u8; 16];
    aaguid_bytes.copy_from_slice(&bytes[..16]);
    let aaguid = Uuid::from_bytes(aaguid_bytes);

    let id_len = usize::from(u16::from_be_bytes([bytes[16], bytes[17]]));
    let key_start = 18 + id_len;
    if bytes.len() <= key_start {
        return Err(AuthError::MalformedAttestation(
            "attested credential data truncated".to_string(),
        ));
    }
    let credential_id = bytes[18..key_start].to_vec();

    // Decode the COSE key and re-serialize it, normalizing the stored form
    // and dropping any trailing extension bytes.
    let key_value: Value = from_reader(&bytes[key_start..])
        .map_err(|_| AuthError::MalformedAttestation("invalid COSE key CBOR".to_string()))?;
    let mut cose_key = Vec::new();
    into_writer(&key_value, &mut cose_key)
        .map_err(|_| AuthError::MalformedAttestation("unserializable COSE key".to_string()))?;

    Ok(AttestedCredential {
        aaguid,
        credential_id,
        cose_key,
    })
}

/// The EC2/P-256 coordinates extracted from a COSE key.
#[derive(Debug, Clone)]
pub struct CoseEc2Key {
    pub x: [u8; 32],
    pub y: [u8; 32],
}

/// Extract and validate an EC2/P-256 ES256 key from COSE bytes.
///
/// # Errors
/// Returns `UnsupportedAlgorithm` for any key type, algorithm, or curve
/// other than EC2/ES256/P-256, and `InvalidKeyFormat` for missing or
/// wrong-length coordinates.
pub fn parse_ec2_p256(cose_bytes: &[u8]) -> Result<CoseEc2Key, AuthError> {
    let value: Value = from_reader(cose_bytes)
        .map_err(|_| AuthError::InvalidKeyFormat("invalid COSE CBOR".to_string()))?;
    let map = value
        .as_map()
        .ok_or_else(|| AuthError::InvalidKeyFormat("COSE key is not a map".to_string()))?;

    // Key type (1), algorithm (3), and curve (-1) must all match ES256/P-256.
    if map_int(map, 1) != Some(COSE_KTY_EC2)
        || map_int(map, 3) != Some(COSE_ALG_ES256)
        || map_int(map, -1) != Some(COSE_CRV_P256)
    {
        return Err(AuthError::UnsupportedAlgorithm);
    }

    let x = coordinate(map, -2, "x")?;
    let y = coordinate(map, -3, "y")?;
    Ok(CoseEc2Key { x, y })
}

fn coordinate(map: &[(Value, Value)], label: i64, name: &str) -> Result<[u8; 32], AuthError> {
    let bytes = map_get(map, label)
        .and_then(Value::as_bytes)
        .ok_or_else(|| AuthError::InvalidKeyFormat(format!("missing {name} coordinate")))?;
    let array: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
        AuthError::InvalidKeyFormat(format!(
            "{name} coordinate is {} bytes, expected 32",
            bytes.len()
        ))
    })?;
    Ok(array)
}

fn map_get(map: &[(Value, Value)], label: i64) -> Option<&Value> {
    let key = Value::Integer(label.into());
    map.iter().find(|(k, _)| k == &key).map(|(_, v)| v)
}

fn map_int(map: &[(Value, Value)], label: i64) -> Option<i128> {
    match map_get(map, label) {
        Some(Value::Integer(i)) => Some(i128::from(*i)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cose_key(x_len: usize, alg: i128) -> Vec<u8> {
        let map = Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer(2.into())),
            (
                Value::Integer(3.into()),
                Value::Integer(i64::try_from(alg).unwrap().into()),
            ),
            (Value::Integer((-1).into()), Value::Integer(1.into())),
            (Value::Integer((-2).into()), Value::Bytes(vec![0xAA; x_len])),
            (Value::Integer((-3).into()), Value::Bytes(vec![0xBB; 32])),
        ]);
        let mut bytes = Vec::new();
        into_writer(&map, &mut bytes).unwrap();
        bytes
    }

    fn sample_auth_data(flags: u8, count: u32, with_credential: bool) -> Vec<u8> {
        let mut data = vec![0x11; 32];
        data.push(flags);
        data.extend_from_slice(&count.to_be_bytes());
        if with_credential {
            data.extend_from_slice(&[0x22; 16]); // aaguid
            let cred_id = [0x33; 20];
            data.extend_from_slice(&u16::try_from(cred_id.len()).unwrap().to_be_bytes());
            data.extend_from_slice(&cred_id);
            data.extend_from_slice(&sample_cose_key(32, -7));
        }
        data
    }

    #[test]
    fn parses_header_fields() {
        let auth_data = sample_auth_data(FLAG_USER_PRESENT | FLAG_USER_VERIFIED, 42, false);
        let parsed = parse_authenticator_data(&auth_data).unwrap();
        assert_eq!(parsed.sign_count, 42);
        assert!(parsed.user_present());
        assert!(parsed.user_verified());
        assert!(!parsed.backup_eligible());
        assert!(parsed.attested_credential.is_none());
    }

    #[test]
    fn parses_attested_credential_block() {
        let auth_data = sample_auth_data(
            FLAG_USER_PRESENT | FLAG_ATTESTED_CREDENTIAL | FLAG_BACKUP_ELIGIBLE | FLAG_BACKUP_STATE,
            1,
            true,
        );
        let parsed = parse_authenticator_data(&auth_data).unwrap();
        assert!(parsed.backup_eligible());
        assert!(parsed.backup_state());

        let attested = parsed.attested_credential.unwrap();
        assert_eq!(attested.credential_id, vec![0x33; 20]);
        assert_eq!(attested.aaguid, Uuid::from_bytes([0x22; 16]));

        let key = parse_ec2_p256(&attested.cose_key).unwrap();
        assert_eq!(key.x, [0xAA; 32]);
        assert_eq!(key.y, [0xBB; 32]);
    }

    #[test]
    fn short_auth_data_is_malformed() {
        let err = parse_authenticator_data(&[0u8; 36]).unwrap_err();
        assert!(matches!(err, AuthError::MalformedAttestation(_)));
    }

    #[test]
    fn truncated_credential_block_is_malformed() {
        let mut auth_data = sample_auth_data(FLAG_ATTESTED_CREDENTIAL, 0, true);
        auth_data.truncate(40);
        let err = parse_authenticator_data(&auth_data).unwrap_err();
        assert!(matches!(err, AuthError::MalformedAttestation(_)));
    }

    #[test]
    fn non_es256_key_is_unsupported() {
        let err = parse_ec2_p256(&sample_cose_key(32, -257)).unwrap_err();
        assert!(matches!(err, AuthError::UnsupportedAlgorithm));
    }

    #[test]
    fn wrong_length_coordinate_is_invalid_key_format() {
        let err = parse_ec2_p256(&sample_cose_key(31, -7)).unwrap_err();
        assert!(matches!(err, AuthError::InvalidKeyFormat(_)));
    }

    #[test]
    fn decodes_attestation_object() {
        let att = Value::Map(vec![
            (Value::Text("fmt".to_string()), Value::Text("none".to_string())),
            (Value::Text("attStmt".to_string()), Value::Map(vec![])),
            (
                Value::Text("authData".to_string()),
                Value::Bytes(sample_auth_data(FLAG_USER_PRESENT, 0, false)),
            ),
        ]);
        let mut bytes = Vec::new();
        into_writer(&att, &mut bytes).unwrap();

        let decoded = decode_attestation_object(&bytes).unwrap();
        assert_eq!(decoded.fmt, "none");
        assert!(decoded.att_stmt.is_empty());
        assert!(!decoded.has_certificate_chain());
        assert_eq!(decoded.auth_data.len(), 37);
    }

    #[test]
    fn garbage_bytes_are_malformed() {
        let err = decode_attestation_object(&[0xFF, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, AuthError::MalformedAttestation(_)));
    }
}
