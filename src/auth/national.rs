//! SCRAM-GM-256, the national-algorithm SCRAM variant
//!
//! Message shapes are those of [`super::scram`]; every primitive is built
//! from a pluggable keyed block hash `H(k, d)` with the fixed key `herodb`.

use super::provider::NationalHash;
use super::scram::{ScramAlgorithm, ScramError};
use std::sync::Arc;

/// Mechanism name offered by the server
pub const MECHANISM: &str = "SCRAM-GM-256";

const BLOCK_KEY: &[u8] = b"herodb";

/// [`ScramAlgorithm`] over a [`NationalHash`]
#[derive(Clone)]
pub struct NationalAlgorithm {
    hash: Arc<dyn NationalHash>,
}

impl NationalAlgorithm {
    /// Wrap a block-hash implementation
    pub fn new(hash: Arc<dyn NationalHash>) -> Self {
        Self { hash }
    }

    fn block(&self, data: &[u8]) -> Result<Vec<u8>, ScramError> {
        self.hash
            .block_hash(BLOCK_KEY, data)
            .map_err(|e| ScramError::Crypto(e.to_string()))
    }
}

impl ScramAlgorithm for NationalAlgorithm {
    fn name(&self) -> &'static str {
        MECHANISM
    }

    fn salted_password(
        &self,
        password: &[u8],
        salt: &[u8],
        iterations: u32,
    ) -> Result<Vec<u8>, ScramError> {
        let mut first = Vec::with_capacity(password.len() + salt.len() + 4);
        first.extend_from_slice(password);
        first.extend_from_slice(salt);
        first.extend_from_slice(&1u32.to_be_bytes());

        let mut result = self.block(&first)?;
        let mut previous = result.clone();
        for _ in 1..iterations {
            let mut input = Vec::with_capacity(password.len() + previous.len());
            input.extend_from_slice(password);
            input.extend_from_slice(&previous);
            previous = self.block(&input)?;
            if previous.len() != result.len() {
                return Err(ScramError::Crypto(
                    "block hash output length changed between rounds".to_string(),
                ));
            }
            for (acc, b) in result.iter_mut().zip(previous.iter()) {
                *acc ^= b;
            }
        }
        Ok(result)
    }

    fn keyed(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, ScramError> {
        let mut input = Vec::with_capacity(key.len() + data.len());
        input.extend_from_slice(key);
        input.extend_from_slice(data);
        self.block(&input)
    }

    fn digest(&self, data: &[u8]) -> Result<Vec<u8>, ScramError> {
        self.block(data)
    }
}

/// Whether the server offered the national mechanism
pub fn offered(mechanisms: &[String]) -> Result<(), ScramError> {
    if mechanisms.iter().any(|m| m.eq_ignore_ascii_case(MECHANISM)) {
        Ok(())
    } else {
        Err(ScramError::NoCommonMechanism(format!(
            "server did not offer {}: {}",
            MECHANISM,
            mechanisms.join(", ")
        )))
    }
}
