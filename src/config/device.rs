use core::fmt;

use heapless::String;

use super::{NetworkId, NetworkKey};
use crate::device::power::WakeMode;
use crate::radio::traits::StackLogLevel;

/// Maximum network name length accepted by the stack
pub const MAX_NETWORK_NAME_LEN: usize = 128;
/// Maximum network passphrase length accepted by the stack
pub const MAX_PASSPHRASE_LEN: usize = 128;
/// Highest frequency sub-band (0 selects all sub-bands)
pub const MAX_FREQUENCY_SUB_BAND: u8 = 8;
/// Highest number of ack retries for confirmed uplinks
pub const MAX_ACK_RETRIES: u8 = 8;
/// Join delay bounds in seconds
pub const JOIN_DELAY_RANGE: core::ops::RangeInclusive<u8> = 1..=15;

/// Configuration error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Network name is empty
    EmptyNetworkName,
    /// Network passphrase is empty
    EmptyPassphrase,
    /// Network name or passphrase does not fit the stack limits
    CredentialTooLong,
    /// Frequency sub-band above [`MAX_FREQUENCY_SUB_BAND`]
    SubBandOutOfRange(u8),
    /// Ack retries above [`MAX_ACK_RETRIES`]
    AckOutOfRange(u8),
    /// Join delay outside [`JOIN_DELAY_RANGE`]
    JoinDelayOutOfRange(u8),
    /// Link checks enabled with a zero failure threshold
    LinkCheckThresholdZero,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyNetworkName => f.write_str("network name is empty"),
            Self::EmptyPassphrase => f.write_str("network passphrase is empty"),
            Self::CredentialTooLong => f.write_str("network credential is too long"),
            Self::SubBandOutOfRange(band) => write!(f, "frequency sub-band {} out of range", band),
            Self::AckOutOfRange(ack) => write!(f, "ack retries {} out of range", ack),
            Self::JoinDelayOutOfRange(delay) => write!(f, "join delay {}s out of range", delay),
            Self::LinkCheckThresholdZero => f.write_str("link check threshold must be non-zero"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}

/// OTA credentials, either a name and passphrase or an ID and key.
///
/// The stack derives the network ID from the name (CRC64) and the key from
/// the passphrase (CMAC), so only one form is ever applied.
#[derive(Clone, PartialEq, Eq)]
pub enum CredentialMode {
    /// Network name and passphrase
    NameAndPassphrase {
        /// Network name
        name: String<MAX_NETWORK_NAME_LEN>,
        /// Network passphrase
        passphrase: String<MAX_PASSPHRASE_LEN>,
    },
    /// Network ID (8 bytes) and key (16 bytes)
    IdAndKey {
        /// Network ID
        network_id: NetworkId,
        /// Network key
        network_key: NetworkKey,
    },
}

impl CredentialMode {
    /// Create name and passphrase credentials
    pub fn name_and_passphrase(name: &str, passphrase: &str) -> Result<Self, ConfigError> {
        let mut n = String::new();
        n.push_str(name).map_err(|_| ConfigError::CredentialTooLong)?;
        let mut p = String::new();
        p.push_str(passphrase)
            .map_err(|_| ConfigError::CredentialTooLong)?;
        Ok(Self::NameAndPassphrase {
            name: n,
            passphrase: p,
        })
    }

    /// Create network ID and key credentials
    pub fn id_and_key(network_id: NetworkId, network_key: NetworkKey) -> Self {
        Self::IdAndKey {
            network_id,
            network_key,
        }
    }

    /// Short name of the credential form, safe to log
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NameAndPassphrase { .. } => "name/passphrase",
            Self::IdAndKey { .. } => "id/key",
        }
    }
}

// Keeps keys and passphrases out of debug output.
impl fmt::Debug for CredentialMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NameAndPassphrase { name, .. } => f
                .debug_struct("NameAndPassphrase")
                .field("name", name)
                .finish_non_exhaustive(),
            Self::IdAndKey { network_id, .. } => f
                .debug_struct("IdAndKey")
                .field("network_id", network_id)
                .finish_non_exhaustive(),
        }
    }
}

/// Network credentials and uplink acknowledgement policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkCredentials {
    /// Credential form
    pub mode: CredentialMode,
    /// Frequency sub-band, only relevant for 915 MHz plans (0 = all)
    pub frequency_sub_band: u8,
    /// Public network sync word
    pub public_network: bool,
    /// Ack retries; 0 sends unconfirmed uplinks
    pub ack: u8,
}

impl NetworkCredentials {
    /// Create network credentials
    pub fn new(mode: CredentialMode, frequency_sub_band: u8, public_network: bool, ack: u8) -> Self {
        Self {
            mode,
            frequency_sub_band,
            public_network,
            ack,
        }
    }

    /// Whether uplinks are sent confirmed
    pub fn confirmed_uplinks(&self) -> bool {
        self.ack > 0
    }

    /// Validate the credentials
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let CredentialMode::NameAndPassphrase { name, passphrase } = &self.mode {
            if name.is_empty() {
                return Err(ConfigError::EmptyNetworkName);
            }
            if passphrase.is_empty() {
                return Err(ConfigError::EmptyPassphrase);
            }
        }
        if self.frequency_sub_band > MAX_FREQUENCY_SUB_BAND {
            return Err(ConfigError::SubBandOutOfRange(self.frequency_sub_band));
        }
        if self.ack > MAX_ACK_RETRIES {
            return Err(ConfigError::AckOutOfRange(self.ack));
        }
        Ok(())
    }
}

/// Network link check policy
///
/// The device requests a link check every `count` uplinks and declares the
/// connection lost after `threshold` consecutive unanswered checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkCheckPolicy {
    /// Uplinks between link checks (0 disables link checks)
    pub count: u8,
    /// Failed checks before the link is considered lost
    pub threshold: u8,
}

impl LinkCheckPolicy {
    /// Create a link check policy
    pub const fn new(count: u8, threshold: u8) -> Self {
        Self { count, threshold }
    }

    /// Link checks disabled
    pub const fn disabled() -> Self {
        Self {
            count: 0,
            threshold: 0,
        }
    }

    /// Whether link checks are requested at all
    pub fn is_enabled(&self) -> bool {
        self.count > 0
    }
}

impl Default for LinkCheckPolicy {
    fn default() -> Self {
        Self::new(3, 5)
    }
}

/// Device behaviour set once at cold start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceConfig {
    /// Adaptive data rate
    pub adr: bool,
    /// Join accept delay in seconds
    pub join_delay: u8,
    /// Enter deep sleep between uplinks (RAM is lost)
    pub deep_sleep: bool,
    /// Wake-up source between uplinks
    pub wake_mode: WakeMode,
    /// Seconds between uplinks
    pub sleep_interval_s: u32,
    /// Log level requested from the stack
    pub log_level: StackLogLevel,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adr: true,
            join_delay: 5,
            deep_sleep: false,
            wake_mode: WakeMode::RtcOrInterrupt,
            sleep_interval_s: 30,
            log_level: StackLogLevel::Info,
        }
    }
}

impl DeviceConfig {
    /// Validate the device settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !JOIN_DELAY_RANGE.contains(&self.join_delay) {
            return Err(ConfigError::JoinDelayOutOfRange(self.join_delay));
        }
        Ok(())
    }
}

/// Everything applied to the stack on a cold start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Network credentials
    pub credentials: NetworkCredentials,
    /// Link check policy
    pub link_check: LinkCheckPolicy,
    /// Device settings
    pub device: DeviceConfig,
}

impl SessionConfig {
    /// Create a configuration with default link check and device settings
    pub fn new(credentials: NetworkCredentials) -> Self {
        Self {
            credentials,
            link_check: LinkCheckPolicy::default(),
            device: DeviceConfig::default(),
        }
    }

    /// Replace the link check policy
    pub fn with_link_check(mut self, link_check: LinkCheckPolicy) -> Self {
        self.link_check = link_check;
        self
    }

    /// Replace the device settings
    pub fn with_device(mut self, device: DeviceConfig) -> Self {
        self.device = device;
        self
    }

    /// Validate the whole configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.credentials.validate()?;
        if self.link_check.is_enabled() && self.link_check.threshold == 0 {
            return Err(ConfigError::LinkCheckThresholdZero);
        }
        self.device.validate()
    }
}

/// Session state tracked by the controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SessionState {
    /// A join exchange has completed and the stack reports joined
    pub joined: bool,
    /// The stack holds a copy of the current session in NVM
    pub persisted: bool,
    /// The session was restored from NVM after a warm restart
    pub restored: bool,
}

impl SessionState {
    /// Fresh, unjoined session
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful join
    pub fn mark_joined(&mut self) {
        self.joined = true;
        // the session in NVM predates this join
        self.persisted = false;
    }

    /// Record loss of the network session
    pub fn mark_lost(&mut self) {
        self.joined = false;
    }
}
