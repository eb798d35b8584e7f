//! OTA session loop against a simulated stack
//!
//! Runs the join/send/sleep cycle on the host. The simulated stack accepts
//! most joins after a couple of polls and drops the session when too many
//! link checks go unanswered, so rejoins and backoff show up in the log.
//! Set `OTA_LOG` (e.g. `OTA_LOG=info`) to change the log filter.

use std::{thread, time::Duration};

use lorawan_session::{
    config::{
        CredentialMode, DeviceConfig, LinkCheckPolicy, NetworkCredentials, NetworkId, NetworkKey,
        SessionConfig,
    },
    device::{
        power::{PowerControl, SleepMode, WakeMode, WakeReason},
        SessionController,
    },
    radio::traits::{AckStatus, Downlink, JoinMode, RadioStack, StackLogLevel},
    sensor::RandomLight,
};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

const NETWORK_ID: NetworkId = [0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x07];
const NETWORK_KEY: NetworkKey = [
    0x69, 0x74, 0x7F, 0x38, 0xBC, 0x5F, 0xC6, 0x9C, 0x5E, 0x2F, 0x0E, 0x0C, 0xFD, 0xEB, 0x8C, 0x19,
];
const CYCLES: usize = 12;

/// Stack simulation error
#[derive(Debug)]
enum SimError {
    Busy,
}

struct SimulatedStack {
    rng: SmallRng,
    joined: bool,
    join_mode: JoinMode,
    join_polls: u8,
    link_check_count: u8,
    link_check_threshold: u8,
    uplinks: u32,
    missed_checks: u8,
    rx: Option<Downlink>,
    nvm_session: Option<bool>,
}

impl SimulatedStack {
    fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            joined: false,
            join_mode: JoinMode::Manual,
            join_polls: 0,
            link_check_count: 0,
            link_check_threshold: 0,
            uplinks: 0,
            missed_checks: 0,
            rx: None,
            nvm_session: None,
        }
    }

    fn link_check(&mut self) {
        if self.link_check_count == 0 || self.uplinks % u32::from(self.link_check_count) != 0 {
            return;
        }
        if self.rng.gen_bool(0.6) {
            self.missed_checks = 0;
        } else {
            self.missed_checks += 1;
            println!("          (sim) link check unanswered: {}", self.missed_checks);
            if self.missed_checks >= self.link_check_threshold {
                self.joined = false;
                self.missed_checks = 0;
            }
        }
    }
}

impl RadioStack for SimulatedStack {
    type Error = SimError;

    fn join(&mut self) -> nb::Result<(), SimError> {
        // join accept windows take a few polls
        if self.join_polls < 2 {
            self.join_polls += 1;
            return Err(nb::Error::WouldBlock);
        }
        self.join_polls = 0;
        if self.rng.gen_bool(0.5) {
            self.joined = true;
            Ok(())
        } else if self.rng.gen_bool(0.5) {
            Ok(())
        } else {
            Err(nb::Error::Other(SimError::Busy))
        }
    }

    fn join_status(&mut self) -> bool {
        self.joined
    }

    fn send(&mut self, _data: &[u8], confirmed: bool) -> Result<AckStatus, SimError> {
        if !self.joined {
            return Err(SimError::Busy);
        }
        self.uplinks += 1;
        self.link_check();
        // the network answers now and then on port 1
        if self.rng.gen_bool(0.25) {
            let level: u8 = self.rng.gen();
            self.rx = Downlink::new(1, &[level]);
        }
        match (confirmed, self.rng.gen_bool(0.8)) {
            (false, _) => Ok(AckStatus::NotRequested),
            (true, true) => Ok(AckStatus::Acked),
            (true, false) => Ok(AckStatus::NotAcked),
        }
    }

    fn take_downlink(&mut self) -> Option<Downlink> {
        self.rx.take()
    }

    fn join_mode(&self) -> JoinMode {
        self.join_mode
    }

    fn set_join_mode(&mut self, mode: JoinMode) -> Result<(), SimError> {
        self.join_mode = mode;
        Ok(())
    }

    fn set_network_name(&mut self, _name: &str) -> Result<(), SimError> {
        Ok(())
    }

    fn set_network_passphrase(&mut self, _passphrase: &str) -> Result<(), SimError> {
        Ok(())
    }

    fn set_network_id(&mut self, _id: &NetworkId) -> Result<(), SimError> {
        Ok(())
    }

    fn set_network_key(&mut self, _key: &NetworkKey) -> Result<(), SimError> {
        Ok(())
    }

    fn set_frequency_sub_band(&mut self, _sub_band: u8) -> Result<(), SimError> {
        Ok(())
    }

    fn set_public_network(&mut self, _public: bool) -> Result<(), SimError> {
        Ok(())
    }

    fn set_ack(&mut self, _retries: u8) -> Result<(), SimError> {
        Ok(())
    }

    fn set_link_check_count(&mut self, count: u8) -> Result<(), SimError> {
        self.link_check_count = count;
        Ok(())
    }

    fn set_link_check_threshold(&mut self, threshold: u8) -> Result<(), SimError> {
        self.link_check_threshold = threshold;
        Ok(())
    }

    fn set_adr(&mut self, _enabled: bool) -> Result<(), SimError> {
        Ok(())
    }

    fn set_join_delay(&mut self, _seconds: u8) -> Result<(), SimError> {
        Ok(())
    }

    fn set_log_level(&mut self, _level: StackLogLevel) {}

    fn reset_config(&mut self) {
        self.join_mode = JoinMode::Manual;
        self.link_check_count = 0;
        self.link_check_threshold = 0;
    }

    fn save_config(&mut self) -> Result<(), SimError> {
        Ok(())
    }

    fn reset_network_session(&mut self) {
        self.joined = false;
    }

    fn save_network_session(&mut self) -> Result<(), SimError> {
        self.nvm_session = Some(self.joined);
        Ok(())
    }

    fn restore_network_session(&mut self) -> Result<(), SimError> {
        self.joined = self.nvm_session.ok_or(SimError::Busy)?;
        Ok(())
    }

    fn next_tx_ms(&self) -> u32 {
        0
    }
}

/// Sleeps one host millisecond per device second
struct ScaledSleep;

impl PowerControl for ScaledSleep {
    type Error = SimError;

    fn standby_flag(&self) -> bool {
        false
    }

    fn sleep(
        &mut self,
        mode: SleepMode,
        wake: WakeMode,
        interval_s: u32,
    ) -> Result<WakeReason, SimError> {
        if wake.uses_rtc() {
            thread::sleep(Duration::from_millis(u64::from(interval_s)));
        }
        println!("          (sim) {:?} sleep {}s", mode, interval_s);
        Ok(if wake.uses_rtc() {
            WakeReason::Rtc
        } else {
            WakeReason::Interrupt
        })
    }
}

fn main() {
    let filter = EnvFilter::try_from_env("OTA_LOG").unwrap_or_else(|_| EnvFilter::new("debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let credentials = NetworkCredentials::new(
        CredentialMode::id_and_key(NETWORK_ID, NETWORK_KEY),
        0,
        true,
        0,
    );
    let config = SessionConfig::new(credentials)
        .with_link_check(LinkCheckPolicy::new(3, 2))
        .with_device(DeviceConfig {
            deep_sleep: true,
            ..DeviceConfig::default()
        });

    let mut controller = SessionController::new(SimulatedStack::new(7), ScaledSleep, config);
    let mode = controller.initialize().expect("invalid configuration");
    println!("started with {:?}", mode);

    let mut sensor = RandomLight::new(SmallRng::seed_from_u64(0));
    for cycle in 1..=CYCLES {
        let report = controller.run_cycle(&mut sensor);
        println!(
            "cycle {:>2}: join {:?}, sent {:?}, received {:?}, state {:?}",
            cycle,
            report.join.map_err(|e| e.retry_in_ms()),
            report.reading.map(|r| r.to_bytes()),
            report.downlink.map(|d| d.data),
            controller.state()
        );
    }

    for fault in controller.faults() {
        println!("fault: {}", fault);
    }
}
