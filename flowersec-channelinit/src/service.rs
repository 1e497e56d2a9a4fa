//! `ChannelInitService`: issues paired client/server grants (spec.md §4.2).

use ed25519_dalek::SigningKey;
use flowersec_e2ee::Suite;
use flowersec_token::{Role, TokenPayload, sign_token};

use crate::config::ChannelInitConfig;
use crate::error::{ChannelInitError, ChannelInitResult};
use crate::grant::{ChannelGrant, ChannelGrantPair};

fn random_bytes(len: usize) -> ChannelInitResult<Vec<u8>> {
    let mut buf = vec![0u8; len];
    getrandom::fill(&mut buf).map_err(|_| ChannelInitError::RandomFailed)?;
    Ok(buf)
}

/// `token_exp_seconds` after `token_exp_seconds` clamped so it never exceeds
/// `init_exp`, guarded against overflow (spec.md §4.2).
fn clamp_exp(now_unix_s: i64, token_exp_seconds: u64, init_exp: i64) -> ChannelInitResult<i64> {
    let token_exp_seconds = i64::try_from(token_exp_seconds).map_err(|_| ChannelInitError::ExpOverflow)?;
    let exp = now_unix_s.checked_add(token_exp_seconds).ok_or(ChannelInitError::ExpOverflow)?;
    Ok(exp.min(init_exp))
}

pub struct ChannelInitService {
    config: ChannelInitConfig,
    signing_key: SigningKey,
}

impl ChannelInitService {
    pub fn new(config: ChannelInitConfig, signing_key: SigningKey) -> ChannelInitResult<Self> {
        if config.allowed_suites.is_empty() {
            return Err(ChannelInitError::EmptyAllowedSuites);
        }
        if let Some(suite) = config.default_suite {
            if !config.allowed_suites.contains(&suite) {
                return Err(ChannelInitError::InvalidDefaultSuite);
            }
        }
        Ok(Self { config, signing_key })
    }

    fn default_suite(&self) -> Suite {
        self.config.default_suite.or_else(|| self.config.allowed_suites.first().copied()).unwrap_or(Suite::X25519)
    }

    /// Issue matched client/server grants for `channel_id`: a fresh PSK,
    /// shared `init_exp`/idle timeout/default suite, and independently
    /// token-id'd signed tokens (spec.md §4.2).
    pub fn issue_grants(&self, channel_id: &str, now_unix_s: i64) -> ChannelInitResult<ChannelGrantPair> {
        if channel_id.is_empty() {
            return Err(ChannelInitError::EmptyChannelId);
        }
        let init_exp = now_unix_s.checked_add(self.config.init_exp_seconds).ok_or(ChannelInitError::ExpOverflow)?;
        let exp = clamp_exp(now_unix_s, self.config.token_exp_seconds, init_exp)?;

        let psk = random_bytes(32)?;
        let psk_b64u = flowersec_util::b64u::encode(&psk);
        let default_suite = self.default_suite();
        let allowed_suites: Vec<String> = self.config.allowed_suites.iter().map(Suite::to_string).collect();

        let client = self.issue_one(
            channel_id,
            Role::Client,
            now_unix_s,
            init_exp,
            exp,
            &psk_b64u,
            default_suite,
            allowed_suites.clone(),
        )?;
        let server = self.issue_one(
            channel_id,
            Role::Server,
            now_unix_s,
            init_exp,
            exp,
            &psk_b64u,
            default_suite,
            allowed_suites,
        )?;
        Ok(ChannelGrantPair { client, server })
    }

    #[allow(clippy::too_many_arguments)]
    fn issue_one(
        &self,
        channel_id: &str,
        role: Role,
        now_unix_s: i64,
        init_exp: i64,
        exp: i64,
        psk_b64u: &str,
        default_suite: Suite,
        allowed_suites: Vec<String>,
    ) -> ChannelInitResult<ChannelGrant> {
        let token_id = flowersec_util::b64u::encode(&random_bytes(24)?);
        let payload = TokenPayload {
            kid: self.config.kid.clone(),
            aud: self.config.aud.clone(),
            iss: self.config.iss.clone(),
            channel_id: channel_id.to_string(),
            role,
            token_id,
            init_exp,
            idle_timeout_seconds: self.config.idle_timeout_seconds,
            iat: now_unix_s,
            exp,
        };
        let token = sign_token(&self.signing_key, &payload)?;
        Ok(ChannelGrant {
            tunnel_url: self.config.tunnel_url.clone(),
            channel_id: channel_id.to_string(),
            channel_init_expire_at_unix_s: init_exp,
            idle_timeout_seconds: self.config.idle_timeout_seconds,
            role: role.to_string(),
            token,
            e2ee_psk_b64u: psk_b64u.to_string(),
            allowed_suites,
            default_suite: default_suite.to_string(),
        })
    }

    /// Re-sign a fresh token for an already-issued grant. Refuses once the
    /// grant is past `init_exp` (± skew) — spec.md §4.2 `ReissueToken`.
    pub fn reissue_token(&self, channel_id: &str, role: Role, init_exp: i64, now_unix_s: i64) -> ChannelInitResult<String> {
        if now_unix_s > init_exp.saturating_add(self.config.skew_seconds) {
            return Err(ChannelInitError::PastInitExp);
        }
        let exp = clamp_exp(now_unix_s, self.config.token_exp_seconds, init_exp)?;
        let token_id = flowersec_util::b64u::encode(&random_bytes(24)?);
        let payload = TokenPayload {
            kid: self.config.kid.clone(),
            aud: self.config.aud.clone(),
            iss: self.config.iss.clone(),
            channel_id: channel_id.to_string(),
            role,
            token_id,
            init_exp,
            idle_timeout_seconds: self.config.idle_timeout_seconds,
            iat: now_unix_s,
            exp,
        };
        Ok(sign_token(&self.signing_key, &payload)?)
    }
}
