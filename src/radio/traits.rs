use heapless::Vec;

use crate::config::{NetworkId, NetworkKey};

/// Largest downlink application payload
pub const MAX_DOWNLINK_SIZE: usize = 242;

/// Network join mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum JoinMode {
    /// Session keys provisioned by hand (ABP)
    Manual,
    /// Over-the-air activation on request
    Ota,
    /// Over-the-air activation started automatically by the stack
    AutoOta,
    /// Peer to peer, no network server
    PeerToPeer,
}

/// Acknowledgement reported by the stack for an uplink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AckStatus {
    /// Confirmed uplink acknowledged by the network
    Acked,
    /// Confirmed uplink sent but no ack received within the retries
    NotAcked,
    /// Unconfirmed uplink, no ack requested
    NotRequested,
}

/// Application data received in the receive windows after an uplink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downlink {
    /// Application port (FPort)
    pub port: u8,
    /// Decrypted payload
    pub data: Vec<u8, MAX_DOWNLINK_SIZE>,
}

impl Downlink {
    /// Copy a received payload, `None` if it does not fit
    pub fn new(port: u8, data: &[u8]) -> Option<Self> {
        Vec::from_slice(data).ok().map(|data| Self { port, data })
    }
}

/// Log verbosity of the stack's own logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StackLogLevel {
    /// Logging off
    None,
    /// Fatal errors only
    Fatal,
    /// Errors
    Error,
    /// Warnings
    Warning,
    /// Informational
    Info,
    /// Debug
    Debug,
    /// Everything
    Trace,
}

/// LoRaWAN radio/MAC stack
///
/// The stack owns the MAC state machine, the channel plan, key derivation
/// and the non-volatile regions for configuration and session data. The
/// session controller only configures it and sequences its operations.
pub trait RadioStack {
    /// Error type for stack operations
    type Error;

    /// Run a join exchange
    ///
    /// Returns `WouldBlock` while the join request is in flight or the
    /// join accept windows are still open.
    fn join(&mut self) -> nb::Result<(), Self::Error>;

    /// Whether the stack currently holds a joined session
    fn join_status(&mut self) -> bool;

    /// Transmit an uplink
    fn send(&mut self, data: &[u8], confirmed: bool) -> Result<AckStatus, Self::Error>;

    /// Take the downlink received after the last uplink, if any
    ///
    /// The stack clears it once taken.
    fn take_downlink(&mut self) -> Option<Downlink>;

    /// Current join mode
    fn join_mode(&self) -> JoinMode;

    /// Set join mode
    fn set_join_mode(&mut self, mode: JoinMode) -> Result<(), Self::Error>;

    /// Set network name (the stack derives the network ID from it)
    fn set_network_name(&mut self, name: &str) -> Result<(), Self::Error>;

    /// Set network passphrase (the stack derives the network key from it)
    fn set_network_passphrase(&mut self, passphrase: &str) -> Result<(), Self::Error>;

    /// Set network ID
    fn set_network_id(&mut self, id: &NetworkId) -> Result<(), Self::Error>;

    /// Set network key
    fn set_network_key(&mut self, key: &NetworkKey) -> Result<(), Self::Error>;

    /// Set frequency sub-band
    fn set_frequency_sub_band(&mut self, sub_band: u8) -> Result<(), Self::Error>;

    /// Select public or private network sync word
    fn set_public_network(&mut self, public: bool) -> Result<(), Self::Error>;

    /// Set ack retries for confirmed uplinks
    fn set_ack(&mut self, retries: u8) -> Result<(), Self::Error>;

    /// Set uplinks between link checks
    fn set_link_check_count(&mut self, count: u8) -> Result<(), Self::Error>;

    /// Set failed link checks before the session is dropped
    fn set_link_check_threshold(&mut self, threshold: u8) -> Result<(), Self::Error>;

    /// Enable or disable adaptive data rate
    fn set_adr(&mut self, enabled: bool) -> Result<(), Self::Error>;

    /// Set join accept delay in seconds
    fn set_join_delay(&mut self, seconds: u8) -> Result<(), Self::Error>;

    /// Set stack log level
    fn set_log_level(&mut self, level: StackLogLevel);

    /// Restore factory configuration
    fn reset_config(&mut self);

    /// Write configuration to non-volatile storage
    fn save_config(&mut self) -> Result<(), Self::Error>;

    /// Drop the network session held in RAM
    fn reset_network_session(&mut self);

    /// Write the network session to non-volatile storage
    fn save_network_session(&mut self) -> Result<(), Self::Error>;

    /// Load the network session from non-volatile storage
    fn restore_network_session(&mut self) -> Result<(), Self::Error>;

    /// Milliseconds until a channel is free for the next transmission
    fn next_tx_ms(&self) -> u32;
}
