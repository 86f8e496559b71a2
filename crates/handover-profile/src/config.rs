//! Timing constants and limits for the handover profile.
//!
//! Defaults are the production values. Every duration (de)serialises as an
//! integer number of milliseconds so a JSON override file stays readable:
//!
//! ```json
//! { "protocol_message_timeout": 500, "mtu": 256 }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use handover_frame::MARSHAL_HEADER_LEN;

/// Smallest MTU that still fits a marshal header and one data byte.
pub const MIN_MTU: usize = MARSHAL_HEADER_LEN + 1;

/// Errors raised while loading or validating a [`HandoverConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The JSON document could not be parsed.
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),

    /// A field holds a value the engine cannot work with.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Handover profile configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HandoverConfig {
    /// Outbound packet size on the handover channel. Default: 895 bytes.
    pub mtu: usize,
    /// Wait for START_CFM, UNMARSHAL_P1_CFM and for the next packet on the
    /// secondary. Default: 2100 ms.
    #[serde(with = "millis")]
    pub protocol_message_timeout: Duration,
    /// Space claim for each P1 marshal packet. Default: 100 ms.
    #[serde(with = "millis")]
    pub p1_marshal_timeout: Duration,
    /// Space claim for each P0 marshal packet. Default: 100 ms.
    #[serde(with = "millis")]
    pub p0_marshal_timeout: Duration,
    /// Time the secondary's clients get to absorb the client entries of one
    /// P1 packet. Default: 100 ms.
    #[serde(with = "millis")]
    pub p1_unmarshal_timeout: Duration,
    /// Space claim on the baseband marshal sink. Default: 1000 ms.
    #[serde(with = "millis")]
    pub p0_unmarshal_timeout: Duration,
    /// Disabling inbound data on the handset link. Default: 750 ms.
    #[serde(with = "millis")]
    pub acl_receive_enable_timeout: Duration,
    /// Processing of data already received. Default: 500 ms.
    #[serde(with = "millis")]
    pub acl_received_data_processed_timeout: Duration,
    /// Draining of handset-link transmit queues before prepare. Default: 500 ms.
    #[serde(with = "millis")]
    pub acl_transmit_pending_timeout: Duration,
    /// Draining of the peer link after P0 is sent. This is the link
    /// supervision timeout. Default: 5000 ms.
    #[serde(with = "millis")]
    pub p0_transmit_pending_timeout: Duration,
    /// Leaving sniff mode before prepare. Default: 500 ms.
    #[serde(with = "millis")]
    pub exit_sniff_timeout: Duration,
    /// Re-entering sniff mode after commit. Default: 100 ms.
    #[serde(with = "millis")]
    pub reenter_sniff_timeout: Duration,
    /// Prepare deadline when the handset link is active. Default: 20 ms.
    #[serde(with = "millis")]
    pub acl_handover_prepare_timeout: Duration,
    /// Prepare deadline in sniff is this many sniff intervals. Default: 2.
    pub sniff_interval_multiplier: u32,
    /// Service search attempts before giving up. Default: 3.
    pub sdp_search_try_limit: u8,
    /// Handsets carried in a START_REQ. Default: 1.
    pub num_handsets: u8,
}

impl Default for HandoverConfig {
    fn default() -> Self {
        Self {
            mtu: 895,
            protocol_message_timeout: Duration::from_millis(2100),
            p1_marshal_timeout: Duration::from_millis(100),
            p0_marshal_timeout: Duration::from_millis(100),
            p1_unmarshal_timeout: Duration::from_millis(100),
            p0_unmarshal_timeout: Duration::from_millis(1000),
            acl_receive_enable_timeout: Duration::from_millis(750),
            acl_received_data_processed_timeout: Duration::from_millis(500),
            acl_transmit_pending_timeout: Duration::from_millis(500),
            p0_transmit_pending_timeout: Duration::from_millis(5000),
            exit_sniff_timeout: Duration::from_millis(500),
            reenter_sniff_timeout: Duration::from_millis(100),
            acl_handover_prepare_timeout: Duration::from_millis(20),
            sniff_interval_multiplier: 2,
            sdp_search_try_limit: 3,
            num_handsets: 1,
        }
    }
}

impl HandoverConfig {
    /// Parse and validate a JSON override document. Missing fields keep
    /// their defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values the engine cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mtu < MIN_MTU || self.mtu > usize::from(u16::MAX) {
            return Err(ConfigError::Invalid(format!(
                "mtu {} outside {MIN_MTU}..={}",
                self.mtu,
                u16::MAX
            )));
        }
        if self.sniff_interval_multiplier == 0 {
            return Err(ConfigError::Invalid(
                "sniff_interval_multiplier must be at least 1".to_string(),
            ));
        }
        if self.sdp_search_try_limit == 0 {
            return Err(ConfigError::Invalid(
                "sdp_search_try_limit must be at least 1".to_string(),
            ));
        }
        if self.num_handsets != 1 {
            return Err(ConfigError::Invalid(format!(
                "num_handsets {} unsupported (only 1)",
                self.num_handsets
            )));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
