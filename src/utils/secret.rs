//! Random passphrases and certificate common names

use rand::rngs::OsRng;
use rand::RngCore;

pub const PASSPHRASE_LEN: usize = 16;

/// Generate a random alphanumeric token from the OS CSPRNG.
///
/// Raw bytes are drawn in chunks and only those already in `[A-Za-z0-9]`
/// are kept, so every accepted character is uniformly distributed.
pub fn generate_token(len: usize) -> String {
    let mut token = String::with_capacity(len);
    let mut chunk = [0u8; 64];
    while token.len() < len {
        OsRng.fill_bytes(&mut chunk);
        for byte in chunk {
            if byte.is_ascii_alphanumeric() {
                token.push(byte as char);
                if token.len() == len {
                    break;
                }
            }
        }
    }
    token
}

/// Generate a 16 character passphrase
pub fn generate_passphrase() -> String {
    generate_token(PASSPHRASE_LEN)
}

/// 4 random bytes as 8 lowercase hex characters
pub fn random_hex_suffix() -> String {
    let mut bytes = [0u8; 4];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Common name for one certificate role, unique per run
pub fn common_name(hostname: &str, role: &str) -> String {
    format!("{}-{}-{}", hostname, role, random_hex_suffix())
}
