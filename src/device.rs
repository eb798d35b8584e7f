//! OTA session controller
//!
//! This module drives the device side of a LoRaWAN session on top of an
//! external radio stack. It decides between a cold start and a warm
//! restart, keeps the device joined, sends uplinks and persists the
//! session before deep sleep.

/// Join retry policy
pub mod backoff;

/// Low-power transitions
pub mod power;

use core::fmt;

use embedded_hal::blocking::delay::DelayMs;
use heapless::Vec;

use crate::{
    config::device::{SessionConfig, SessionState},
    radio::traits::{AckStatus, Downlink, JoinMode, RadioStack},
    sensor::{LightReading, LightSensor},
};
use backoff::Backoff;
use power::{PowerControl, SleepMode, WakeReason};

/// Maximum application payload size
pub const MAX_PAYLOAD_SIZE: usize = 242;

/// Non-fatal faults kept for inspection
pub const MAX_FAULTS: usize = 8;

/// How the controller came up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Configuration reset and applied from scratch
    ColdStart,
    /// Woke from deep sleep, session restored from NVM
    WarmRestart,
}

/// Controller lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControllerState {
    /// Not yet initialized
    ColdStart,
    /// Configured, not joined
    Idle,
    /// Joined, uplinks allowed
    Joined,
    /// In low-power mode
    Suspended,
}

/// Stack setting applied during a cold start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Setting {
    /// Network name
    NetworkName,
    /// Network passphrase
    NetworkPassphrase,
    /// Network ID
    NetworkId,
    /// Network key
    NetworkKey,
    /// Frequency sub-band
    FrequencySubBand,
    /// Public network flag
    PublicNetwork,
    /// Ack retries
    Ack,
    /// Link check count
    LinkCheckCount,
    /// Link check threshold
    LinkCheckThreshold,
    /// Adaptive data rate
    Adr,
    /// Join delay
    JoinDelay,
}

/// Device error
///
/// Only [`DeviceError::InvalidConfig`] stops initialization; the others are
/// logged and recorded as faults while the control loop carries on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceError {
    /// Configuration rejected before touching the stack
    InvalidConfig(crate::config::ConfigError),
    /// Configuration could not be written to NVM
    ConfigSaveFailed,
    /// Stack refused the OTA join mode, previous mode kept
    JoinModeSetFailed,
    /// Stack refused a setting
    SettingRejected(Setting),
    /// Session could not be written to NVM
    SessionSaveFailed,
    /// Session could not be read back from NVM
    SessionRestoreFailed,
}

impl From<crate::config::ConfigError> for DeviceError {
    fn from(error: crate::config::ConfigError) -> Self {
        DeviceError::InvalidConfig(error)
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(e) => write!(f, "invalid configuration: {}", e),
            Self::ConfigSaveFailed => f.write_str("failed to save configuration"),
            Self::JoinModeSetFailed => f.write_str("failed to set network join mode to OTA"),
            Self::SettingRejected(s) => write!(f, "stack rejected setting {:?}", s),
            Self::SessionSaveFailed => f.write_str("failed to save network session"),
            Self::SessionRestoreFailed => f.write_str("failed to restore network session"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DeviceError {}

/// Successful outcome of [`SessionController::ensure_joined`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Joined {
    /// The stack already held a joined session
    AlreadyJoined,
    /// A join exchange just completed
    Joined,
}

/// Join failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinError<E> {
    /// [`SessionController::initialize`] has not run, the stack is not
    /// configured
    NotInitialized,
    /// The stack reported an error
    Failed {
        /// Stack error
        error: E,
        /// Wait before the next attempt
        retry_in_ms: u32,
    },
    /// The exchange finished without a join accept
    NoAccept {
        /// Wait before the next attempt
        retry_in_ms: u32,
    },
}

impl<E> JoinError<E> {
    /// Wait before the next attempt in milliseconds
    pub fn retry_in_ms(&self) -> u32 {
        match self {
            Self::NotInitialized => 0,
            Self::Failed { retry_in_ms, .. } | Self::NoAccept { retry_in_ms } => *retry_in_ms,
        }
    }
}

impl<E> fmt::Display for JoinError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => f.write_str("controller not initialized"),
            Self::Failed { retry_in_ms, .. } => {
                write!(f, "failed to join network, retry in {} ms", retry_in_ms)
            }
            Self::NoAccept { retry_in_ms } => {
                write!(f, "no join accept received, retry in {} ms", retry_in_ms)
            }
        }
    }
}

#[cfg(feature = "std")]
impl<E: fmt::Debug> std::error::Error for JoinError<E> {}

/// Uplink outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendOutcome {
    /// Confirmed uplink acknowledged
    Ack,
    /// No acknowledgement, either not requested or not received
    NoAck,
}

/// Uplink failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError<E> {
    /// Not joined and the join attempt made first failed
    Join(JoinError<E>),
    /// Payload larger than [`MAX_PAYLOAD_SIZE`]
    PayloadTooLarge(usize),
    /// The stack failed to transmit
    SendFailed(E),
}

impl<E> From<JoinError<E>> for SendError<E> {
    fn from(error: JoinError<E>) -> Self {
        SendError::Join(error)
    }
}

impl<E> fmt::Display for SendError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Join(e) => write!(f, "not joined: {}", e),
            Self::PayloadTooLarge(len) => write!(f, "payload of {} bytes too large", len),
            Self::SendFailed(_) => f.write_str("failed to send data"),
        }
    }
}

#[cfg(feature = "std")]
impl<E: fmt::Debug> std::error::Error for SendError<E> {}

/// What one pass of the control loop did
#[derive(Debug)]
pub struct CycleReport<E, PE> {
    /// Join check result
    pub join: Result<Joined, JoinError<E>>,
    /// Light reading taken, if joined
    pub reading: Option<LightReading>,
    /// Uplink result, if joined
    pub send: Option<Result<SendOutcome, SendError<E>>>,
    /// Data received after the uplink
    pub downlink: Option<Downlink>,
    /// Sleep depth used at the end of the cycle
    pub sleep_mode: SleepMode,
    /// Sleep result
    pub wake: Result<WakeReason, PE>,
}

/// Device-side LoRaWAN session controller
pub struct SessionController<S: RadioStack, P: PowerControl> {
    /// Radio/MAC stack
    stack: S,
    /// Platform power control
    power: P,
    /// Configuration applied on cold start
    config: SessionConfig,
    /// Session state
    session: SessionState,
    /// Lifecycle state
    state: ControllerState,
    /// Cold start or warm restart has run
    initialized: bool,
    /// Join retry policy
    backoff: Backoff,
    /// Depth of the sleep in progress
    sleeping: Option<SleepMode>,
    /// Non-fatal faults since the last clear, oldest first
    faults: Vec<DeviceError, MAX_FAULTS>,
    /// Faults pushed out of `faults`
    dropped_faults: u32,
    /// Downlink not yet taken by the application
    downlink: Option<Downlink>,
}

impl<S: RadioStack, P: PowerControl> SessionController<S, P> {
    /// Create a controller owning the stack and power control
    pub fn new(stack: S, power: P, config: SessionConfig) -> Self {
        Self {
            stack,
            power,
            config,
            session: SessionState::new(),
            state: ControllerState::ColdStart,
            initialized: false,
            backoff: Backoff::default(),
            sleeping: None,
            faults: Vec::new(),
            dropped_faults: 0,
            downlink: None,
        }
    }

    /// Replace the join retry policy
    ///
    /// Deep sleep restarts the program, so a platform that keeps the
    /// failure count in retained memory hands it back here before a warm
    /// restart (see [`Backoff::with_failures`]).
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Lifecycle state
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Session state
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Join retry policy
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Radio stack
    pub fn stack(&self) -> &S {
        &self.stack
    }

    /// Radio stack, mutably
    pub fn stack_mut(&mut self) -> &mut S {
        &mut self.stack
    }

    /// Power control
    pub fn power(&self) -> &P {
        &self.power
    }

    /// Power control, mutably
    pub fn power_mut(&mut self) -> &mut P {
        &mut self.power
    }

    /// The most recent non-fatal faults since the last clear, oldest first
    pub fn faults(&self) -> &[DeviceError] {
        &self.faults
    }

    /// Faults that no longer fit in [`SessionController::faults`]
    pub fn dropped_faults(&self) -> u32 {
        self.dropped_faults
    }

    /// Forget recorded faults
    pub fn clear_faults(&mut self) {
        self.faults.clear();
        self.dropped_faults = 0;
    }

    /// Take the last downlink received, if the application has not yet
    pub fn take_downlink(&mut self) -> Option<Downlink> {
        self.downlink.take()
    }

    /// Give back the stack and power control
    pub fn release(self) -> (S, P) {
        (self.stack, self.power)
    }

    /// Bring the controller up, choosing cold start or warm restart from
    /// the platform standby flag
    pub fn initialize(&mut self) -> Result<Mode, DeviceError> {
        let standby = self.power.standby_flag();
        self.initialize_with(standby)
    }

    /// Bring the controller up with an explicit standby flag
    pub fn initialize_with(&mut self, standby: bool) -> Result<Mode, DeviceError> {
        self.config.validate()?;

        if standby {
            // RAM was lost in deep sleep, the session only survives in NVM
            info!("restoring network session from NVM");
            self.initialized = true;
            self.restore_session();
            return Ok(Mode::WarmRestart);
        }

        info!("defaulting stack configuration");
        self.stack.reset_config();
        self.stack.reset_network_session();
        self.session = SessionState::new();
        self.backoff.reset();

        self.stack.set_log_level(self.config.device.log_level);
        self.ensure_ota_join_mode();
        self.apply_credentials();
        self.apply_link_check();
        self.apply_device_settings();

        info!("saving configuration");
        if self.stack.save_config().is_err() {
            error!("failed to save configuration");
            self.record(DeviceError::ConfigSaveFailed);
        }

        self.log_config();
        self.initialized = true;
        self.state = ControllerState::Idle;
        Ok(Mode::ColdStart)
    }

    fn ensure_ota_join_mode(&mut self) {
        if self.stack.join_mode() == JoinMode::Ota {
            return;
        }
        info!("changing network join mode to OTA");
        if self.stack.set_join_mode(JoinMode::Ota).is_err() {
            error!("failed to set network join mode to OTA");
            self.record(DeviceError::JoinModeSetFailed);
        }
    }

    fn apply_credentials(&mut self) {
        use crate::config::CredentialMode;

        let credentials = self.config.credentials.clone();
        match &credentials.mode {
            CredentialMode::NameAndPassphrase { name, passphrase } => {
                info!("setting network name and passphrase");
                let r = self.stack.set_network_name(name);
                self.check(Setting::NetworkName, r);
                let r = self.stack.set_network_passphrase(passphrase);
                self.check(Setting::NetworkPassphrase, r);
            }
            CredentialMode::IdAndKey {
                network_id,
                network_key,
            } => {
                info!("setting network id and key");
                let r = self.stack.set_network_id(network_id);
                self.check(Setting::NetworkId, r);
                let r = self.stack.set_network_key(network_key);
                self.check(Setting::NetworkKey, r);
            }
        }

        let r = self.stack.set_frequency_sub_band(credentials.frequency_sub_band);
        self.check(Setting::FrequencySubBand, r);
        let r = self.stack.set_public_network(credentials.public_network);
        self.check(Setting::PublicNetwork, r);
        let r = self.stack.set_ack(credentials.ack);
        self.check(Setting::Ack, r);
    }

    fn apply_link_check(&mut self) {
        let policy = self.config.link_check;
        let r = self.stack.set_link_check_count(policy.count);
        self.check(Setting::LinkCheckCount, r);
        let r = self.stack.set_link_check_threshold(policy.threshold);
        self.check(Setting::LinkCheckThreshold, r);
    }

    fn apply_device_settings(&mut self) {
        let device = self.config.device;
        let r = self.stack.set_adr(device.adr);
        self.check(Setting::Adr, r);
        let r = self.stack.set_join_delay(device.join_delay);
        self.check(Setting::JoinDelay, r);
    }

    fn check(&mut self, setting: Setting, result: Result<(), S::Error>) {
        if result.is_err() {
            error!("failed to set {:?}", setting);
            self.record(DeviceError::SettingRejected(setting));
        }
    }

    fn log_config(&self) {
        let credentials = &self.config.credentials;
        let device = &self.config.device;
        info!("credentials: {}", credentials.mode.kind());
        info!(
            "sub-band: {}, public network: {}, ack: {}",
            credentials.frequency_sub_band,
            credentials.public_network,
            credentials.ack
        );
        info!(
            "link check count: {}, threshold: {}",
            self.config.link_check.count,
            self.config.link_check.threshold
        );
        info!(
            "adr: {}, join delay: {}s, deep sleep: {}",
            device.adr,
            device.join_delay,
            device.deep_sleep
        );
    }

    fn record(&mut self, fault: DeviceError) {
        if self.faults.is_full() {
            self.faults.rotate_left(1);
            self.faults.pop();
            self.dropped_faults = self.dropped_faults.saturating_add(1);
        }
        let _ = self.faults.push(fault);
    }

    fn poll_downlink(&mut self) {
        if let Some(downlink) = self.stack.take_downlink() {
            info!(
                "received {} bytes on port {}",
                downlink.data.len(),
                downlink.port
            );
            debug!("downlink data: {:?}", &downlink.data[..]);
            self.downlink = Some(downlink);
        }
    }

    fn awake_state(&self) -> ControllerState {
        if !self.initialized {
            ControllerState::ColdStart
        } else if self.session.joined {
            ControllerState::Joined
        } else {
            ControllerState::Idle
        }
    }

    fn restore_session(&mut self) {
        match self.stack.restore_network_session() {
            Ok(()) => self.session.restored = true,
            Err(_) => {
                error!("failed to restore network session");
                self.session.restored = false;
                self.record(DeviceError::SessionRestoreFailed);
            }
        }
        self.session.joined = self.stack.join_status();
        self.state = self.awake_state();
    }

    fn retry_delay_ms(&self) -> u32 {
        // some bands need to wait for a free channel before the next request
        self.backoff.next_delay_ms().max(self.stack.next_tx_ms())
    }

    /// Make sure the device holds a joined session, attempting one join if
    /// it does not
    ///
    /// Failures are recorded in the backoff policy; the returned error says
    /// how long to wait before calling again.
    pub fn ensure_joined(&mut self) -> Result<Joined, JoinError<S::Error>> {
        if !self.initialized {
            warn!("join refused, controller not initialized");
            return Err(JoinError::NotInitialized);
        }
        if self.stack.join_status() {
            self.session.joined = true;
            self.state = ControllerState::Joined;
            return Ok(Joined::AlreadyJoined);
        }

        if self.session.joined {
            warn!("network session lost");
        }
        self.session.mark_lost();
        self.state = ControllerState::Idle;

        info!("attempt {} to join network", self.backoff.failures() + 1);
        match nb::block!(self.stack.join()) {
            Ok(()) if self.stack.join_status() => {
                info!("joined network");
                self.backoff.reset();
                self.session.mark_joined();
                self.state = ControllerState::Joined;
                Ok(Joined::Joined)
            }
            Ok(()) => {
                self.backoff.record_failure();
                let retry_in_ms = self.retry_delay_ms();
                warn!("no join accept received, retry in {} ms", retry_in_ms);
                Err(JoinError::NoAccept { retry_in_ms })
            }
            Err(error) => {
                self.backoff.record_failure();
                let retry_in_ms = self.retry_delay_ms();
                error!("failed to join network, retry in {} ms", retry_in_ms);
                Err(JoinError::Failed { error, retry_in_ms })
            }
        }
    }

    /// Join, blocking on `delay` between attempts
    ///
    /// `max_attempts` of `None` retries until the join succeeds. At least
    /// one attempt is always made, so `Some(0)` behaves like `Some(1)`.
    pub fn join_with_retry<D: DelayMs<u32>>(
        &mut self,
        delay: &mut D,
        max_attempts: Option<u32>,
    ) -> Result<Joined, JoinError<S::Error>> {
        let max_attempts = max_attempts.map(|max| max.max(1));
        let mut attempts: u32 = 0;
        loop {
            match self.ensure_joined() {
                Ok(joined) => return Ok(joined),
                Err(JoinError::NotInitialized) => return Err(JoinError::NotInitialized),
                Err(e) => {
                    attempts = attempts.saturating_add(1);
                    if max_attempts.map_or(false, |max| attempts >= max) {
                        return Err(e);
                    }
                    let wait = e.retry_in_ms();
                    info!("waiting {} ms until next join attempt", wait);
                    delay.delay_ms(wait);
                }
            }
        }
    }

    /// Send an uplink, joining first if needed
    ///
    /// With an ack count of 0 the uplink is unconfirmed and always reports
    /// [`SendOutcome::NoAck`]. Data received in the receive windows is kept
    /// for [`SessionController::take_downlink`].
    pub fn send_payload(&mut self, data: &[u8]) -> Result<SendOutcome, SendError<S::Error>> {
        if data.len() > MAX_PAYLOAD_SIZE {
            return Err(SendError::PayloadTooLarge(data.len()));
        }
        self.ensure_joined()?;

        let confirmed = self.config.credentials.confirmed_uplinks();
        match self.stack.send(data, confirmed) {
            Ok(AckStatus::Acked) => {
                info!("successfully sent data to gateway, acked");
                self.poll_downlink();
                Ok(SendOutcome::Ack)
            }
            Ok(status) => {
                if status == AckStatus::NotAcked {
                    warn!("sent data to gateway, no ack received");
                } else {
                    info!("successfully sent data to gateway");
                }
                self.poll_downlink();
                Ok(SendOutcome::NoAck)
            }
            Err(error) => {
                error!("failed to send data to gateway");
                if !self.stack.join_status() {
                    warn!("network session lost");
                    self.session.mark_lost();
                    self.state = ControllerState::Idle;
                }
                Err(SendError::SendFailed(error))
            }
        }
    }

    /// Prepare for a low-power transition
    ///
    /// Deep sleep loses RAM, so the session is written to NVM first.
    /// Shallow sleep keeps it in RAM and writes nothing.
    pub fn prepare_for_low_power(&mut self, deep_sleep: bool) -> Result<(), DeviceError> {
        if !SleepMode::from_deep(deep_sleep).requires_session_persist() {
            return Ok(());
        }

        info!("saving network session to NVM");
        match self.stack.save_network_session() {
            Ok(()) => {
                self.session.persisted = true;
                Ok(())
            }
            Err(_) => {
                error!("failed to save network session");
                self.session.persisted = false;
                self.record(DeviceError::SessionSaveFailed);
                Err(DeviceError::SessionSaveFailed)
            }
        }
    }

    /// Sleep for the configured interval
    pub fn sleep(&mut self) -> Result<WakeReason, P::Error> {
        let interval = self.config.device.sleep_interval_s;
        self.sleep_for(interval)
    }

    /// Sleep for `interval_s` seconds in the configured sleep mode
    ///
    /// Returns once the platform wakes the device; the controller then goes
    /// through [`SessionController::wake`].
    pub fn sleep_for(&mut self, interval_s: u32) -> Result<WakeReason, P::Error> {
        let device = self.config.device;
        let mode = SleepMode::from_deep(device.deep_sleep);
        // a failed save is already recorded, sleeping still goes ahead
        let _ = self.prepare_for_low_power(device.deep_sleep);

        debug!("entering {:?} sleep for {}s", mode, interval_s);
        self.sleeping = Some(mode);
        self.state = ControllerState::Suspended;
        match self.power.sleep(mode, device.wake_mode, interval_s) {
            Ok(reason) => {
                self.wake(reason);
                Ok(reason)
            }
            Err(e) => {
                error!("failed to enter low-power mode");
                self.sleeping = None;
                self.state = self.awake_state();
                Err(e)
            }
        }
    }

    /// Resume after a sleep
    ///
    /// After deep sleep the session is restored from NVM and the join
    /// status re-read; after shallow sleep the state in RAM is kept.
    pub fn wake(&mut self, reason: WakeReason) {
        debug!("woke up by {:?}", reason);
        match self.sleeping.take() {
            Some(SleepMode::Deep) => {
                info!("restoring network session from NVM");
                self.restore_session();
            }
            _ => self.state = self.awake_state(),
        }
    }

    /// One pass of the control loop: join check, uplink, sleep
    ///
    /// When the join fails the device sleeps for the retry delay instead of
    /// the configured interval. Nothing is joined or sent before
    /// [`SessionController::initialize`].
    pub fn run_cycle<L: LightSensor + ?Sized>(
        &mut self,
        sensor: &mut L,
    ) -> CycleReport<S::Error, P::Error> {
        let join = self.ensure_joined();

        let mut reading = None;
        let mut send = None;
        let interval = match &join {
            Ok(_) => {
                let light = LightReading::sample(sensor);
                info!("light: {}", light.0);
                reading = Some(light);
                send = Some(self.send_payload(&light.to_bytes()));
                self.config.device.sleep_interval_s
            }
            Err(JoinError::NotInitialized) => self.config.device.sleep_interval_s,
            Err(e) => e.retry_in_ms().div_ceil(1000).max(1),
        };
        let downlink = self.downlink.take();

        let sleep_mode = SleepMode::from_deep(self.config.device.deep_sleep);
        let wake = self.sleep_for(interval);

        CycleReport {
            join,
            reading,
            send,
            downlink,
            sleep_mode,
            wake,
        }
    }
}
