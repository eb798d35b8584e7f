//! Low-power transitions
//!
//! This module describes the sleep states available between uplinks and
//! the platform hook that enters them:
//! - Shallow sleep: IO state and RAM retained, execution resumes in place
//! - Deep sleep: IOs float and RAM is lost, the device restarts on wake
//! - Wake sources: RTC alarm, external interrupt or either

/// Sleep depth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SleepMode {
    /// RAM retained, application resumes after wake
    Shallow,
    /// RAM lost, application restarts from the top after wake
    Deep,
}

impl SleepMode {
    /// Sleep mode for the configured deep-sleep flag
    pub fn from_deep(deep: bool) -> Self {
        if deep {
            SleepMode::Deep
        } else {
            SleepMode::Shallow
        }
    }

    /// Whether RAM survives this sleep
    pub fn retains_ram(&self) -> bool {
        matches!(self, SleepMode::Shallow)
    }

    /// Whether the network session must be written to NVM first
    pub fn requires_session_persist(&self) -> bool {
        !self.retains_ram()
    }
}

/// Wake-up source configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeMode {
    /// RTC alarm after the sleep interval
    Rtc,
    /// External interrupt only, the interval is ignored
    Interrupt,
    /// Whichever of the RTC alarm or interrupt comes first
    RtcOrInterrupt,
}

impl WakeMode {
    /// Whether the RTC alarm is armed
    pub fn uses_rtc(&self) -> bool {
        matches!(self, WakeMode::Rtc | WakeMode::RtcOrInterrupt)
    }

    /// Whether the wake interrupt pin is armed
    pub fn uses_interrupt(&self) -> bool {
        matches!(self, WakeMode::Interrupt | WakeMode::RtcOrInterrupt)
    }
}

/// What ended a sleep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeReason {
    /// RTC alarm fired
    Rtc,
    /// External interrupt
    Interrupt,
}

/// Platform power control
pub trait PowerControl {
    /// Error type for power operations
    type Error;

    /// Whether this boot is a wake from deep sleep
    fn standby_flag(&self) -> bool;

    /// Enter low-power mode
    ///
    /// `interval_s` is only meaningful when `wake` arms the RTC. On real
    /// hardware a deep sleep does not return; the device reboots with the
    /// standby flag set.
    fn sleep(
        &mut self,
        mode: SleepMode,
        wake: WakeMode,
        interval_s: u32,
    ) -> Result<WakeReason, Self::Error>;
}
