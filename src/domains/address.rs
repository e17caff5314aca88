use std::fmt;
use std::str::FromStr;

use rand_core::{OsRng, RngCore};

use crate::error::{RelayError, Result};

/// Size of a freshly minted identity.
pub const ID_LEN: usize = 16;

/// Shortest identity accepted from the wire.
pub const MIN_ID_LEN: usize = 4;

/// Random participant identity. Broker object names are derived from it, so
/// two identities never share a topic or subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Id(Vec<u8>);

impl Id {
    pub fn generate() -> Result<Self> {
        let mut buf = [0u8; ID_LEN];
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| RelayError::RandomSource(e.to_string()))?;
        Ok(Self(buf.to_vec()))
    }

    pub fn parse(value: &str) -> Result<Self> {
        let bytes = hex::decode(value)
            .map_err(|e| RelayError::MalformedId(format!("{value:?}: {e}")))?;
        if bytes.len() < MIN_ID_LEN {
            return Err(RelayError::MalformedId(format!(
                "{value:?}: {} bytes, need at least {MIN_ID_LEN}",
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn topic(&self) -> String {
        format!("t{self}")
    }

    pub fn subscription(&self) -> String {
        format!("s{self}")
    }
}

impl From<[u8; ID_LEN]> for Id {
    fn from(value: [u8; ID_LEN]) -> Self {
        Self(value.to_vec())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl FromStr for Id {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
