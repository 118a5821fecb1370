//! Job identifiers and owner capability tokens.

use rand::RngCore;

/// Unique job id (uuid v4, hex without dashes).
pub fn generate_job_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// 256-bit owner token, hex encoded.
pub fn generate_owner_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Compare a presented token against the stored one in constant time.
pub fn tokens_match(provided: &str, expected: &str) -> bool {
    constant_time_eq(provided.as_bytes(), expected.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
