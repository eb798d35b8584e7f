//! LoRaWAN over-the-air activation session controller
//!
//! This crate drives the device side of a LoRaWAN session on top of an
//! external radio/MAC stack. The stack does the protocol work; the
//! controller configures it, keeps the device joined, sends sensor uplinks
//! and saves or restores the session around low-power transitions.
//!
//! # Features
//! - Cold start vs. warm restart (wake from deep sleep) handling
//! - OTA credentials as network name/passphrase or network ID/key
//! - Link check and acknowledgement policy
//! - Capped exponential backoff between join attempts
//! - Session persistence before deep sleep
//! - Downlink data handed to the application
//! - No unsafe code, `no_std`
//!
//! # Example
//! ```no_run
//! use lorawan_session::{
//!     config::{CredentialMode, NetworkCredentials, SessionConfig},
//!     device::{power::PowerControl, SessionController},
//!     radio::RadioStack,
//!     sensor::LightSensor,
//! };
//!
//! fn run<S: RadioStack, P: PowerControl, L: LightSensor>(stack: S, power: P, mut sensor: L) -> ! {
//!     let credentials = NetworkCredentials::new(
//!         CredentialMode::id_and_key([0x80, 0, 0, 0, 0, 0, 0, 0x07], [0x69; 16]),
//!         0,    // frequency sub-band
//!         true, // public network
//!         0,    // unconfirmed uplinks
//!     );
//!     let mut controller = SessionController::new(stack, power, SessionConfig::new(credentials));
//!
//!     controller.initialize().expect("invalid configuration");
//!     loop {
//!         controller.run_cycle(&mut sensor);
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![forbid(unsafe_code)]

#[macro_use]
mod fmt;

/// Device and network configuration
pub mod config;

/// Session controller and power handling
pub mod device;

/// Radio stack interface
pub mod radio;

/// Uplink payload source
pub mod sensor;
