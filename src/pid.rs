//! v3 PIDs: 128-bit random values in a 23-digit base-48 notation.
//!
//! The alphabet omits vowels and visually ambiguous characters so the
//! identifiers survive being read aloud or retyped. Digits are emitted
//! least-significant first.

use uuid::Uuid;

use crate::error::Error;

const ALPHABET: &[u8; 48] = b"bcdfghjkmnpqrstvwxyzBCDFGHJKLMNPQRSTVWXYZ3456789";

/// Fixed length of every v3 PID.
pub const PID_V3_LEN: usize = 23;

/// Generates a fresh v3 PID from a random UUID.
pub fn generate() -> String {
    uuid2str(&Uuid::new_v4())
}

/// Encodes a UUID as a 23-digit base-48 string.
pub fn uuid2str(value: &Uuid) -> String {
    let mut unevaluated = value.as_u128();
    let mut result = String::with_capacity(PID_V3_LEN);
    for _ in 0..PID_V3_LEN {
        let remainder = (unevaluated % ALPHABET.len() as u128) as usize;
        unevaluated /= ALPHABET.len() as u128;
        result.push(ALPHABET[remainder] as char);
    }
    result
}

/// Decodes a 23-digit base-48 string back into the UUID it encodes.
pub fn str2uuid(value: &str) -> Result<Uuid, Error> {
    if value.len() != PID_V3_LEN {
        return Err(Error::Validation(format!(
            "invalid v3 pid \"{}\": must be exactly {} characters long",
            value, PID_V3_LEN
        )));
    }

    let mut acc: u128 = 0;
    for &byte in value.as_bytes().iter().rev() {
        let digit = ALPHABET
            .iter()
            .position(|&known| known == byte)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "invalid v3 pid \"{}\": character {:?} is not in the alphabet",
                    value, byte as char
                ))
            })?;
        acc = acc
            .checked_mul(ALPHABET.len() as u128)
            .and_then(|shifted| shifted.checked_add(digit as u128))
            .ok_or_else(|| {
                Error::Validation(format!(
                    "invalid v3 pid \"{}\": value does not fit in 128 bits",
                    value
                ))
            })?;
    }
    Ok(Uuid::from_u128(acc))
}
