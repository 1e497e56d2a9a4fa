use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// `client (1)` or `server (2)` (spec.md GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client = 1,
    Server = 2,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}

impl TryFrom<u8> for Role {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            1 => Ok(Role::Client),
            2 => Ok(Role::Server),
            other => Err(other),
        }
    }
}

impl Serialize for Role {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u8::deserialize(deserializer)?;
        Role::try_from(raw).map_err(|v| serde::de::Error::custom(format!("invalid role: {v}")))
    }
}

/// Attach token payload (spec.md §3 "Attach token").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPayload {
    pub kid: String,
    pub aud: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    pub channel_id: String,
    pub role: Role,
    pub token_id: String,
    pub init_exp: i64,
    pub idle_timeout_seconds: u64,
    pub iat: i64,
    pub exp: i64,
}
