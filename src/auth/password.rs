//! Password responses

use ::md5::{Digest, Md5};

/// `"md5" + hex(md5(hex(md5(password ‖ user)) ‖ salt))`
pub fn compute_md5_password(user: &str, password: &str, salt: &[u8; 4]) -> String {
    let mut inner = Md5::new();
    inner.update(password.as_bytes());
    inner.update(user.as_bytes());
    let inner_hex = hex(&inner.finalize());

    let mut outer = Md5::new();
    outer.update(inner_hex.as_bytes());
    outer.update(salt);
    format!("md5{}", hex(&outer.finalize()))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_response() {
        assert_eq!(
            compute_md5_password("postgres", "postgres", &[1, 2, 3, 4]),
            "md568be9ed08db75f318087ab337aaea044"
        );
    }

    #[test]
    fn test_salt_changes_response() {
        let a = compute_md5_password("u", "p", &[0, 0, 0, 0]);
        let b = compute_md5_password("u", "p", &[0, 0, 0, 1]);
        assert_ne!(a, b);
        assert_eq!(a, compute_md5_password("u", "p", &[0, 0, 0, 0]));
    }
}
