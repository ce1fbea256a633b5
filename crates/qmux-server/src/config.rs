use qmux_core::token::{RESET_SECRET_LEN, TOKEN_SECRET_LEN};
use qmux_core::MAX_CID_LEN;
use std::time::Duration;

/// Require a valid retry token (or a recent validation) before accepting a
/// connection.
pub const VALIDATE_ADDRESS: u32 = 1 << 0;
/// Let the validated-address LRU short-circuit repeat validations. Only
/// meaningful together with [`VALIDATE_ADDRESS`].
pub const VALIDATE_ADDRESS_LRU: u32 = 1 << 1;
/// Never emit stateless-reset packets.
pub const DISABLE_STATELESS_RESET: u32 = 1 << 2;

pub const MIN_RETRY_TOKEN_EXPIRATION: Duration = Duration::from_secs(1);
pub const MAX_RETRY_TOKEN_EXPIRATION: Duration = Duration::from_secs(60);
pub const DEFAULT_RETRY_TOKEN_EXPIRATION: Duration = Duration::from_secs(10);

pub const DEFAULT_MAX_CONNECTIONS_PER_HOST: usize = 100;
pub const DEFAULT_MAX_STATELESS_RESETS_PER_HOST: usize = 10;

/// Length of server-issued connection ids.
pub const DEFAULT_SERVER_CID_LEN: usize = 18;

/// Fatal construction-time errors. Everything else the socket survives;
/// these it refuses to exist with.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("session reset secret must be exactly {RESET_SECRET_LEN} bytes, got {0}")]
    ResetSecretLength(usize),
    #[error("server connection-id length must be 1..={MAX_CID_LEN}, got {0}")]
    ServerCidLength(usize),
    #[error("packet loss probability {0} is outside 0.0..=1.0")]
    LossProbability(f64),
}

/// Builder-style socket configuration.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    pub options: u32,
    pub retry_token_expiration: Duration,
    pub max_connections_per_host: usize,
    pub max_stateless_resets_per_host: usize,
    pub session_reset_secret: Option<Vec<u8>>,
    pub server_cid_len: usize,
    pub qlog: bool,
    /// Whether datagrams whose header cannot be decoded count as ignored
    /// packets. On by default; exists as a knob because the accounting is
    /// observable in the stats contract.
    pub count_undecodable: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            options: 0,
            retry_token_expiration: DEFAULT_RETRY_TOKEN_EXPIRATION,
            max_connections_per_host: DEFAULT_MAX_CONNECTIONS_PER_HOST,
            max_stateless_resets_per_host: DEFAULT_MAX_STATELESS_RESETS_PER_HOST,
            session_reset_secret: None,
            server_cid_len: DEFAULT_SERVER_CID_LEN,
            qlog: false,
            count_undecodable: true,
        }
    }
}

impl SocketConfig {
    pub fn with_options(mut self, options: u32) -> Self {
        self.options = options;
        self
    }

    /// Set the retry-token lifetime, clamped into
    /// [`MIN_RETRY_TOKEN_EXPIRATION`]..=[`MAX_RETRY_TOKEN_EXPIRATION`].
    pub fn with_retry_token_expiration(mut self, expiration: Duration) -> Self {
        self.retry_token_expiration =
            expiration.clamp(MIN_RETRY_TOKEN_EXPIRATION, MAX_RETRY_TOKEN_EXPIRATION);
        self
    }

    pub fn with_max_connections_per_host(mut self, limit: usize) -> Self {
        self.max_connections_per_host = limit;
        self
    }

    pub fn with_max_stateless_resets_per_host(mut self, limit: usize) -> Self {
        self.max_stateless_resets_per_host = limit;
        self
    }

    /// Provide the stateless-reset secret instead of generating one. Length
    /// is checked at socket construction.
    pub fn with_session_reset_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.session_reset_secret = Some(secret.into());
        self
    }

    pub fn with_server_cid_len(mut self, len: usize) -> Self {
        self.server_cid_len = len;
        self
    }

    pub fn with_qlog(mut self, enabled: bool) -> Self {
        self.qlog = enabled;
        self
    }

    pub fn count_undecodable(mut self, count: bool) -> Self {
        self.count_undecodable = count;
        self
    }

    pub fn option_set(&self, option: u32) -> bool {
        self.options & option != 0
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if let Some(secret) = &self.session_reset_secret {
            if secret.len() != RESET_SECRET_LEN {
                return Err(ConfigError::ResetSecretLength(secret.len()));
            }
        }
        if self.server_cid_len == 0 || self.server_cid_len > MAX_CID_LEN {
            return Err(ConfigError::ServerCidLength(self.server_cid_len));
        }
        Ok(())
    }
}

/// Secrets held read-only by the socket for the lifetime of the process.
pub(crate) struct SocketSecrets {
    pub(crate) token_secret: [u8; TOKEN_SECRET_LEN],
    pub(crate) reset_token_secret: [u8; RESET_SECRET_LEN],
}

impl SocketSecrets {
    pub(crate) fn from_config(config: &SocketConfig) -> Self {
        let token_secret = qmux_core::entropy::random_array();
        let reset_token_secret = match &config.session_reset_secret {
            Some(secret) => {
                let mut out = [0u8; RESET_SECRET_LEN];
                out.copy_from_slice(secret);
                out
            }
            None => qmux_core::entropy::random_array(),
        };
        Self {
            token_secret,
            reset_token_secret,
        }
    }
}
