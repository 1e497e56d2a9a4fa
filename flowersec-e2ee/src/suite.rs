use crate::error::{E2eeError, E2eeResult};

/// ECDH suite selected for a handshake (spec.md §6: `suite:1|2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suite {
    X25519 = 1,
    P256 = 2,
}

impl Suite {
    pub fn from_wire(v: u16) -> E2eeResult<Self> {
        match v {
            1 => Ok(Suite::X25519),
            2 => Ok(Suite::P256),
            _ => Err(E2eeError::InvalidSuite),
        }
    }

    pub fn to_wire(self) -> u16 {
        self as u16
    }

    /// Length of this suite's uncompressed public key on the wire.
    pub fn public_key_len(self) -> usize {
        match self {
            Suite::X25519 => 32,
            Suite::P256 => 65,
        }
    }
}

impl std::fmt::Display for Suite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Suite::X25519 => f.write_str("x25519"),
            Suite::P256 => f.write_str("p256"),
        }
    }
}

impl std::str::FromStr for Suite {
    type Err = E2eeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x25519" => Ok(Suite::X25519),
            "p256" => Ok(Suite::P256),
            _ => Err(E2eeError::InvalidSuite),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip() {
        assert_eq!(Suite::from_wire(1).unwrap(), Suite::X25519);
        assert_eq!(Suite::from_wire(2).unwrap(), Suite::P256);
        assert!(Suite::from_wire(3).is_err());
    }

    #[test]
    fn display_and_from_str_round_trip() {
        assert_eq!(Suite::X25519.to_string().parse::<Suite>().unwrap(), Suite::X25519);
        assert_eq!(Suite::P256.to_string().parse::<Suite>().unwrap(), Suite::P256);
    }

    #[test]
    fn public_key_lengths_match_spec() {
        assert_eq!(Suite::X25519.public_key_len(), 32);
        assert_eq!(Suite::P256.public_key_len(), 65);
    }
}
