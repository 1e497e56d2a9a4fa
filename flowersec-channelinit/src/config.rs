use flowersec_e2ee::Suite;

pub const DEFAULT_TOKEN_EXP_SECONDS: u64 = 60;
pub const DEFAULT_IDLE_TIMEOUT_SECONDS: u64 = 60;
pub const DEFAULT_INIT_EXP_SECONDS: i64 = 120;
pub const DEFAULT_SKEW_SECONDS: i64 = 30;

/// Parameters an operator fixes once per issuer instance (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct ChannelInitConfig {
    pub tunnel_url: String,
    pub aud: String,
    pub iss: Option<String>,
    pub kid: String,
    pub allowed_suites: Vec<Suite>,
    /// Unset resolves to the first entry of `allowed_suites`.
    pub default_suite: Option<Suite>,
    pub token_exp_seconds: u64,
    pub idle_timeout_seconds: u64,
    pub init_exp_seconds: i64,
    pub skew_seconds: i64,
}

impl ChannelInitConfig {
    pub fn new(
        tunnel_url: impl Into<String>,
        aud: impl Into<String>,
        kid: impl Into<String>,
        allowed_suites: Vec<Suite>,
    ) -> Self {
        Self {
            tunnel_url: tunnel_url.into(),
            aud: aud.into(),
            iss: None,
            kid: kid.into(),
            allowed_suites,
            default_suite: None,
            token_exp_seconds: DEFAULT_TOKEN_EXP_SECONDS,
            idle_timeout_seconds: DEFAULT_IDLE_TIMEOUT_SECONDS,
            init_exp_seconds: DEFAULT_INIT_EXP_SECONDS,
            skew_seconds: DEFAULT_SKEW_SECONDS,
        }
    }
}
