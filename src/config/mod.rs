//! Device and network configuration
//!
//! This module contains the settings applied to the LoRaWAN stack on a cold
//! start:
//! - OTA network credentials (name/passphrase or ID/key)
//! - Link check policy
//! - Device settings (ADR, join delay, sleep behaviour)
//! - Session state tracked across low-power transitions

/// Credentials, device settings and session state
pub mod device;

pub use device::{
    ConfigError, CredentialMode, DeviceConfig, LinkCheckPolicy, NetworkCredentials, SessionConfig,
    SessionState,
};

/// Network ID (8 bytes)
pub type NetworkId = [u8; 8];
/// Network key (16 bytes)
pub type NetworkKey = [u8; 16];
