//! The `Attach` flight: the first WebSocket text frame every endpoint sends
//! (spec.md §4.3, wire shape in §6).

use serde::Deserialize;

use crate::error::{TunnelError, TunnelResult};

pub const MAX_CHANNEL_ID_BYTES: usize = 256;
pub const MAX_TOKEN_BYTES: usize = 4096;
pub const MIN_ENDPOINT_INSTANCE_ID_BYTES: usize = 16;
pub const MAX_ENDPOINT_INSTANCE_ID_BYTES: usize = 32;
const ATTACH_VERSION: u8 = 1;

#[derive(Debug, Deserialize)]
struct WireAttach {
    v: u8,
    channel_id: String,
    role: u8,
    token: String,
    endpoint_instance_id: String,
}

/// A validated `Attach` request, ready for token verification.
#[derive(Debug, Clone)]
pub struct Attach {
    pub channel_id: String,
    pub role: flowersec_token::Role,
    pub token: String,
    pub endpoint_instance_id: Vec<u8>,
}

/// Parse and structurally validate an `Attach` text frame, in the exact
/// order spec.md §4.3 requires: version, channel_id, role, token,
/// endpoint_instance_id. Token signature/claim verification happens
/// separately, after this returns.
pub fn parse_attach(text: &str) -> TunnelResult<Attach> {
    let wire: WireAttach =
        serde_json::from_str(text).map_err(|e| TunnelError::InvalidAttach(e.to_string()))?;

    if wire.v != ATTACH_VERSION {
        return Err(TunnelError::InvalidAttach(format!("unsupported version {}", wire.v)));
    }
    if wire.channel_id.is_empty() || wire.channel_id.len() > MAX_CHANNEL_ID_BYTES {
        return Err(TunnelError::InvalidAttach("channel_id out of bounds".into()));
    }
    let role = flowersec_token::Role::try_from(wire.role)
        .map_err(|v| TunnelError::InvalidAttach(format!("invalid role {v}")))?;
    if wire.token.is_empty() || wire.token.len() > MAX_TOKEN_BYTES {
        return Err(TunnelError::InvalidAttach("token out of bounds".into()));
    }
    let endpoint_instance_id = flowersec_util::b64u::decode(&wire.endpoint_instance_id)
        .map_err(|_| TunnelError::InvalidAttach("endpoint_instance_id is not valid base64url".into()))?;
    if !(MIN_ENDPOINT_INSTANCE_ID_BYTES..=MAX_ENDPOINT_INSTANCE_ID_BYTES).contains(&endpoint_instance_id.len()) {
        return Err(TunnelError::InvalidAttach("endpoint_instance_id out of bounds".into()));
    }

    Ok(Attach { channel_id: wire.channel_id, role, token: wire.token, endpoint_instance_id })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_json(overrides: &str) -> String {
        let base = serde_json::json!({
            "v": 1,
            "channel_id": "chan_1",
            "role": 1,
            "token": "FST1.x.y",
            "endpoint_instance_id": flowersec_util::b64u::encode(&[1u8; 16]),
        });
        let mut value = base;
        let extra: serde_json::Value = serde_json::from_str(overrides).unwrap();
        value.as_object_mut().unwrap().extend(extra.as_object().unwrap().clone());
        value.to_string()
    }

    #[test]
    fn parses_a_well_formed_attach() {
        let attach = parse_attach(&valid_json("{}")).unwrap();
        assert_eq!(attach.channel_id, "chan_1");
        assert_eq!(attach.role, flowersec_token::Role::Client);
    }

    #[test]
    fn rejects_wrong_version() {
        let err = parse_attach(&valid_json(r#"{"v":2}"#)).unwrap_err();
        assert!(matches!(err, TunnelError::InvalidAttach(_)));
    }

    #[test]
    fn rejects_empty_channel_id() {
        let err = parse_attach(&valid_json(r#"{"channel_id":""}"#)).unwrap_err();
        assert!(matches!(err, TunnelError::InvalidAttach(_)));
    }

    #[test]
    fn rejects_invalid_role() {
        let err = parse_attach(&valid_json(r#"{"role":9}"#)).unwrap_err();
        assert!(matches!(err, TunnelError::InvalidAttach(_)));
    }

    #[test]
    fn rejects_empty_token() {
        let err = parse_attach(&valid_json(r#"{"token":""}"#)).unwrap_err();
        assert!(matches!(err, TunnelError::InvalidAttach(_)));
    }

    #[test]
    fn rejects_short_endpoint_instance_id() {
        let short = flowersec_util::b64u::encode(&[1u8; 8]);
        let err = parse_attach(&valid_json(&format!(r#"{{"endpoint_instance_id":"{short}"}}"#))).unwrap_err();
        assert!(matches!(err, TunnelError::InvalidAttach(_)));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = parse_attach("not json").unwrap_err();
        assert!(matches!(err, TunnelError::InvalidAttach(_)));
    }
}
