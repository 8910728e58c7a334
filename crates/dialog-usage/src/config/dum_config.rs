//! # Dialog Usage Manager Configuration
//!
//! ## Quick Start
//!
//! ```rust
//! use rvoip_dialog_usage::config::DumConfig;
//! use std::time::Duration;
//!
//! let config = DumConfig::builder()
//!     .with_local_aor("sip:alice@atlanta.com")
//!     .with_contact("sip:alice@192.0.2.10:5060")
//!     .with_t1(Duration::from_millis(500))
//!     .build()
//!     .expect("valid configuration");
//!
//! assert_eq!(config.wait_for_notify_timeout(), Duration::from_secs(32));
//! ```
//!
//! ## Timers
//!
//! | Value | Default | Use |
//! |-------|---------|-----|
//! | `t1` | 500ms | RFC 3261 round-trip estimate |
//! | `wait_for_notify_multiplier` | 64 | WaitForNotify = multiplier × T1 |
//! | `default_refresh_secs` | 3600 | refresh basis when neither NOTIFY nor SUBSCRIBE carry one |
//! | `min_refresh_gap_secs` | 2 | refreshes closer than this to the last SUBSCRIBE are refused |

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{DialogError, DialogResult};
use crate::message::{Method, NameAddr, Uri};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DumConfig {
    /// Address-of-record used as From for locally initiated subscriptions
    pub local_aor: String,
    pub display_name: Option<String>,
    /// Contact advertised in dialog-forming requests and responses
    pub contact: String,
    pub t1: Duration,
    pub wait_for_notify_multiplier: u32,
    pub default_refresh_secs: u32,
    pub min_refresh_gap_secs: u64,
    pub max_forwards: u32,
    /// Allow header for INVITE/UPDATE/PRACK requests and 2xx
    pub allowed_methods: Vec<Method>,
    /// Supported header for INVITE/UPDATE/PRACK requests and 2xx
    pub supported_options: Vec<String>,
    /// Response codes treated as transaction-terminating on top of the
    /// built-in classification
    pub additional_transaction_terminating_responses: Vec<u16>,
}

impl Default for DumConfig {
    fn default() -> Self {
        Self {
            local_aor: "sip:anonymous@localhost".to_string(),
            display_name: None,
            contact: "sip:anonymous@127.0.0.1:5060".to_string(),
            t1: Duration::from_millis(500),
            wait_for_notify_multiplier: 64,
            default_refresh_secs: 3600,
            min_refresh_gap_secs: 2,
            max_forwards: 70,
            allowed_methods: vec![
                Method::Invite,
                Method::Ack,
                Method::Cancel,
                Method::Bye,
                Method::Options,
                Method::Subscribe,
                Method::Notify,
                Method::Refer,
                Method::Update,
                Method::Info,
                Method::Prack,
            ],
            supported_options: vec!["norefersub".to_string()],
            additional_transaction_terminating_responses: Vec::new(),
        }
    }
}

impl DumConfig {
    pub fn builder() -> DumConfigBuilder {
        DumConfigBuilder::default()
    }

    /// How long a confirmed SUBSCRIBE waits for its NOTIFY.
    pub fn wait_for_notify_timeout(&self) -> Duration {
        self.t1 * self.wait_for_notify_multiplier
    }

    pub fn local_name_addr(&self) -> NameAddr {
        let mut addr = NameAddr::new(Uri::new(self.local_aor.clone()));
        addr.display_name = self.display_name.clone();
        addr
    }

    pub fn local_contact(&self) -> NameAddr {
        NameAddr::new(Uri::new(self.contact.clone()))
    }

    pub fn validate(&self) -> DialogResult<()> {
        if !Uri::new(self.local_aor.as_str()).is_sip() {
            return Err(DialogError::config_error("local_aor must be a SIP or SIPS URI"));
        }
        if !Uri::new(self.contact.as_str()).is_sip() {
            return Err(DialogError::config_error("contact must be a SIP or SIPS URI"));
        }
        if self.t1.is_zero() {
            return Err(DialogError::config_error("t1 must be greater than zero"));
        }
        if self.wait_for_notify_multiplier == 0 {
            return Err(DialogError::config_error(
                "wait_for_notify_multiplier must be greater than zero",
            ));
        }
        if self.max_forwards == 0 {
            return Err(DialogError::config_error("max_forwards must be greater than zero"));
        }
        if let Some(code) = self
            .additional_transaction_terminating_responses
            .iter()
            .find(|code| !(400..700).contains(*code))
        {
            return Err(DialogError::ConfigError {
                message: format!("{} is not a failure response code", code),
            });
        }
        Ok(())
    }
}

/// Builder for [`DumConfig`]
#[derive(Debug, Default)]
pub struct DumConfigBuilder {
    config: DumConfig,
}

impl DumConfigBuilder {
    pub fn with_local_aor(mut self, aor: impl Into<String>) -> Self {
        self.config.local_aor = aor.into();
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.config.display_name = Some(name.into());
        self
    }

    pub fn with_contact(mut self, contact: impl Into<String>) -> Self {
        self.config.contact = contact.into();
        self
    }

    pub fn with_t1(mut self, t1: Duration) -> Self {
        self.config.t1 = t1;
        self
    }

    pub fn with_wait_for_notify_multiplier(mut self, multiplier: u32) -> Self {
        self.config.wait_for_notify_multiplier = multiplier;
        self
    }

    pub fn with_default_refresh_secs(mut self, secs: u32) -> Self {
        self.config.default_refresh_secs = secs;
        self
    }

    pub fn with_min_refresh_gap_secs(mut self, secs: u64) -> Self {
        self.config.min_refresh_gap_secs = secs;
        self
    }

    pub fn with_max_forwards(mut self, max_forwards: u32) -> Self {
        self.config.max_forwards = max_forwards;
        self
    }

    pub fn with_allowed_methods(mut self, methods: Vec<Method>) -> Self {
        self.config.allowed_methods = methods;
        self
    }

    pub fn with_supported_option(mut self, option: impl Into<String>) -> Self {
        self.config.supported_options.push(option.into());
        self
    }

    pub fn with_transaction_terminating_response(mut self, code: u16) -> Self {
        self.config
            .additional_transaction_terminating_responses
            .push(code);
        self
    }

    pub fn build(self) -> DialogResult<DumConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
