use lorawan_session::{
    config::{CredentialMode, DeviceConfig, LinkCheckPolicy, NetworkCredentials, SessionConfig},
    device::{
        backoff::Backoff,
        power::{SleepMode, WakeMode, WakeReason},
        ControllerState, DeviceError, JoinError, Joined, Mode, SendError, SendOutcome, Setting,
        SessionController,
    },
    radio::traits::{AckStatus, Downlink, JoinMode, StackLogLevel},
};

use mock::{Event, JoinOutcome, Journal, MockDelay, MockError, MockPower, MockStack};

const NETWORK_ID: [u8; 8] = [0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x07];
const NETWORK_KEY: [u8; 16] = [
    0x69, 0x74, 0x7F, 0x38, 0xBC, 0x5F, 0xC6, 0x9C, 0x5E, 0x2F, 0x0E, 0x0C, 0xFD, 0xEB, 0x8C, 0x19,
];

type Controller = SessionController<MockStack, MockPower>;

fn id_key_config(ack: u8, deep_sleep: bool) -> SessionConfig {
    let credentials =
        NetworkCredentials::new(CredentialMode::id_and_key(NETWORK_ID, NETWORK_KEY), 0, true, ack);
    SessionConfig::new(credentials)
        .with_link_check(LinkCheckPolicy::new(3, 5))
        .with_device(DeviceConfig {
            deep_sleep,
            ..DeviceConfig::default()
        })
}

// Test helper to create a controller around fresh mocks
fn create_controller(config: SessionConfig) -> (Controller, Journal) {
    let journal = mock::journal();
    let stack = MockStack::new(journal.clone());
    let power = MockPower::new(journal.clone());
    (SessionController::new(stack, power, config), journal)
}

fn events(journal: &Journal) -> Vec<Event> {
    journal.borrow().clone()
}

fn position(journal: &Journal, pred: impl Fn(&Event) -> bool) -> Option<usize> {
    journal.borrow().iter().position(pred)
}

#[test]
fn test_cold_start_applies_id_key_configuration() {
    let (mut controller, journal) = create_controller(id_key_config(0, false));

    assert_eq!(controller.initialize().unwrap(), Mode::ColdStart);
    assert_eq!(controller.state(), ControllerState::Idle);
    assert!(controller.faults().is_empty());

    assert_eq!(
        events(&journal),
        vec![
            Event::ResetConfig,
            Event::ResetNetworkSession,
            Event::SetLogLevel(StackLogLevel::Info),
            Event::SetJoinMode(JoinMode::Ota),
            Event::SetNetworkId(NETWORK_ID),
            Event::SetNetworkKey(NETWORK_KEY),
            Event::SetFrequencySubBand(0),
            Event::SetPublicNetwork(true),
            Event::SetAck(0),
            Event::SetLinkCheckCount(3),
            Event::SetLinkCheckThreshold(5),
            Event::SetAdr(true),
            Event::SetJoinDelay(5),
            Event::SaveConfig,
        ]
    );
}

#[test]
fn test_cold_start_with_name_and_passphrase_skips_id_and_key() {
    let credentials = NetworkCredentials::new(
        CredentialMode::name_and_passphrase("MultiTech", "MultiTech").unwrap(),
        1,
        false,
        2,
    );
    let (mut controller, journal) = create_controller(SessionConfig::new(credentials));

    controller.initialize().unwrap();

    let events = events(&journal);
    assert!(events.contains(&Event::SetNetworkName("MultiTech".into())));
    assert!(events.contains(&Event::SetNetworkPassphrase("MultiTech".into())));
    assert!(!events
        .iter()
        .any(|e| matches!(e, Event::SetNetworkId(_) | Event::SetNetworkKey(_))));
}

#[test]
fn test_join_mode_left_alone_when_already_ota() {
    let (mut controller, journal) = create_controller(id_key_config(0, false));
    controller.stack_mut().join_mode = JoinMode::Ota;
    controller.stack_mut().keep_join_mode_on_reset = true;

    controller.initialize().unwrap();

    assert!(!events(&journal)
        .iter()
        .any(|e| matches!(e, Event::SetJoinMode(_))));
    assert_eq!(controller.stack().join_mode, JoinMode::Ota);
}

#[test]
fn test_config_persisted_before_first_join() {
    let (mut controller, journal) = create_controller(id_key_config(0, false));

    controller.initialize().unwrap();
    assert_eq!(controller.ensure_joined().unwrap(), Joined::Joined);

    let save = position(&journal, |e| *e == Event::SaveConfig).unwrap();
    let join = position(&journal, |e| *e == Event::Join).unwrap();
    assert!(save < join);
}

#[test]
fn test_config_save_failure_is_not_fatal() {
    let (mut controller, journal) = create_controller(id_key_config(0, false));
    controller.stack_mut().fail_save_config = true;

    assert_eq!(controller.initialize().unwrap(), Mode::ColdStart);
    assert_eq!(controller.faults(), &[DeviceError::ConfigSaveFailed]);

    // the loop proceeds
    let report = controller.run_cycle(&mut || 0x1234u16);
    assert_eq!(report.join, Ok(Joined::Joined));
    assert_eq!(report.send, Some(Ok(SendOutcome::NoAck)));
    assert!(events(&journal).contains(&Event::Send {
        data: vec![0x12, 0x34],
        confirmed: false,
    }));
}

#[test]
fn test_join_mode_and_setting_failures_recorded() {
    let (mut controller, _journal) = create_controller(id_key_config(0, false));
    controller.stack_mut().fail_join_mode = true;
    controller.stack_mut().reject_adr = true;

    controller.initialize().unwrap();

    assert_eq!(
        controller.faults(),
        &[
            DeviceError::JoinModeSetFailed,
            DeviceError::SettingRejected(Setting::Adr),
        ]
    );
    assert_eq!(controller.stack().join_mode, JoinMode::Manual);

    controller.clear_faults();
    assert!(controller.faults().is_empty());
}

#[test]
fn test_invalid_config_rejected_before_touching_stack() {
    let mut config = id_key_config(0, false);
    config.credentials.ack = 9;
    let (mut controller, journal) = create_controller(config);

    assert!(matches!(
        controller.initialize(),
        Err(DeviceError::InvalidConfig(_))
    ));
    assert!(events(&journal).is_empty());
    assert_eq!(controller.state(), ControllerState::ColdStart);
}

#[test]
fn test_cold_start_scenario_sends_light_every_cycle() {
    let (mut controller, journal) = create_controller(id_key_config(0, false));
    controller.initialize().unwrap();

    let mut readings = [0x0102u16, 0x7CFF].into_iter();
    let mut sensor = move || readings.next().unwrap();

    let first = controller.run_cycle(&mut sensor);
    assert_eq!(first.join, Ok(Joined::Joined));
    assert!(controller.session().joined);

    let second = controller.run_cycle(&mut sensor);
    assert_eq!(second.join, Ok(Joined::AlreadyJoined));

    let sent: Vec<Vec<u8>> = events(&journal)
        .into_iter()
        .filter_map(|e| match e {
            Event::Send { data, .. } => Some(data),
            _ => None,
        })
        .collect();
    assert_eq!(sent, vec![vec![0x01, 0x02], vec![0x7C, 0xFF]]);

    let joins = events(&journal).iter().filter(|e| **e == Event::Join).count();
    assert_eq!(joins, 1);
    assert_eq!(controller.state(), ControllerState::Joined);
}

#[test]
fn test_no_send_while_not_joined() {
    let (mut controller, journal) = create_controller(id_key_config(0, false));
    controller.initialize().unwrap();
    controller.stack_mut().join_outcomes = [JoinOutcome::Fail].into();

    let result = controller.send_payload(&[0xAA, 0xBB]);
    assert!(matches!(
        result,
        Err(SendError::Join(JoinError::Failed {
            error: MockError::Error,
            ..
        }))
    ));

    assert!(!events(&journal)
        .iter()
        .any(|e| matches!(e, Event::Send { .. })));
    assert!(!controller.session().joined);
    assert_eq!(controller.state(), ControllerState::Idle);
}

#[test]
fn test_send_triggers_join_first() {
    let (mut controller, journal) = create_controller(id_key_config(0, false));
    controller.initialize().unwrap();

    assert_eq!(controller.send_payload(&[1, 2]), Ok(SendOutcome::NoAck));

    let join = position(&journal, |e| *e == Event::Join).unwrap();
    let send = position(&journal, |e| matches!(e, Event::Send { .. })).unwrap();
    assert!(join < send);
}

#[test]
fn test_pending_join_is_polled_to_completion() {
    let (mut controller, journal) = create_controller(id_key_config(0, false));
    controller.initialize().unwrap();
    controller.stack_mut().join_pending_polls = 3;

    assert_eq!(controller.ensure_joined(), Ok(Joined::Joined));
    let joins = events(&journal).iter().filter(|e| **e == Event::Join).count();
    assert_eq!(joins, 1);
}

#[test]
fn test_failed_joins_back_off_and_cap() {
    let (controller, _journal) = create_controller(id_key_config(0, false));
    let mut controller = controller.with_backoff(Backoff::new(1_000, 3_000, 2));
    controller.initialize().unwrap();
    controller.stack_mut().join_outcomes =
        [JoinOutcome::Fail, JoinOutcome::NoAccept, JoinOutcome::Fail, JoinOutcome::Fail].into();

    let delays: Vec<u32> = (0..4)
        .map(|_| controller.ensure_joined().unwrap_err().retry_in_ms())
        .collect();
    assert_eq!(delays, vec![1_000, 2_000, 3_000, 3_000]);

    assert_eq!(controller.ensure_joined(), Ok(Joined::Joined));
    assert_eq!(controller.backoff().failures(), 0);
}

#[test]
fn test_retry_waits_for_free_channel() {
    let (mut controller, _journal) = create_controller(id_key_config(0, false));
    controller.initialize().unwrap();
    controller.stack_mut().join_outcomes = [JoinOutcome::NoAccept].into();
    controller.stack_mut().next_tx_ms = 42_000;

    let err = controller.ensure_joined().unwrap_err();
    assert_eq!(err, JoinError::NoAccept { retry_in_ms: 42_000 });
}

#[test]
fn test_join_with_retry_delays_between_attempts() {
    let (controller, journal) = create_controller(id_key_config(0, false));
    let mut controller = controller.with_backoff(Backoff::new(500, 10_000, 2));
    controller.initialize().unwrap();
    controller.stack_mut().join_outcomes = [JoinOutcome::Fail, JoinOutcome::Fail].into();

    let mut delay = MockDelay {
        journal: journal.clone(),
    };
    assert_eq!(
        controller.join_with_retry(&mut delay, None),
        Ok(Joined::Joined)
    );

    let delays: Vec<u32> = events(&journal)
        .into_iter()
        .filter_map(|e| match e {
            Event::Delay(ms) => Some(ms),
            _ => None,
        })
        .collect();
    assert_eq!(delays, vec![500, 1_000]);
}

#[test]
fn test_join_with_retry_gives_up_after_max_attempts() {
    let (mut controller, journal) = create_controller(id_key_config(0, false));
    controller.initialize().unwrap();
    controller.stack_mut().join_outcomes = [JoinOutcome::Fail; 5].into();

    let mut delay = MockDelay {
        journal: journal.clone(),
    };
    let result = controller.join_with_retry(&mut delay, Some(2));
    assert!(result.is_err());

    let joins = events(&journal).iter().filter(|e| **e == Event::Join).count();
    assert_eq!(joins, 2);
}

#[test]
fn test_failed_join_cycle_sleeps_for_retry_delay() {
    let (mut controller, journal) = create_controller(id_key_config(0, false));
    controller.initialize().unwrap();
    controller.stack_mut().join_outcomes = [JoinOutcome::Fail].into();

    let report = controller.run_cycle(&mut || 7u16);
    assert!(report.join.is_err());
    assert!(report.send.is_none());
    assert!(report.reading.is_none());

    assert_eq!(
        events(&journal).last(),
        Some(&Event::Sleep {
            mode: SleepMode::Shallow,
            wake: WakeMode::RtcOrInterrupt,
            interval_s: 5,
        })
    );
}

#[test]
fn test_ack_count_selects_confirmed_uplinks() {
    let (mut controller, journal) = create_controller(id_key_config(3, false));
    controller.initialize().unwrap();
    controller.stack_mut().ack_status = AckStatus::Acked;

    assert_eq!(controller.send_payload(&[1]), Ok(SendOutcome::Ack));
    controller.stack_mut().ack_status = AckStatus::NotAcked;
    assert_eq!(controller.send_payload(&[2]), Ok(SendOutcome::NoAck));

    assert!(events(&journal).contains(&Event::Send {
        data: vec![1],
        confirmed: true,
    }));
}

#[test]
fn test_oversized_payload_rejected() {
    let (mut controller, journal) = create_controller(id_key_config(0, false));
    controller.initialize().unwrap();

    let payload = [0u8; 243];
    assert_eq!(
        controller.send_payload(&payload),
        Err(SendError::PayloadTooLarge(243))
    );
    assert!(!events(&journal).contains(&Event::Join));
}

#[test]
fn test_send_failure_with_lost_link_clears_joined() {
    let (mut controller, _journal) = create_controller(id_key_config(0, false));
    controller.initialize().unwrap();
    controller.ensure_joined().unwrap();

    controller.stack_mut().fail_send = true;
    controller.stack_mut().lose_link_on_send_failure = true;
    assert_eq!(
        controller.send_payload(&[1]),
        Err(SendError::SendFailed(MockError::Error))
    );
    assert!(!controller.session().joined);
    assert_eq!(controller.state(), ControllerState::Idle);

    // next cycle rejoins
    controller.stack_mut().fail_send = false;
    let report = controller.run_cycle(&mut || 1u16);
    assert_eq!(report.join, Ok(Joined::Joined));
}

#[test]
fn test_send_failure_keeps_session_when_still_joined() {
    let (mut controller, _journal) = create_controller(id_key_config(0, false));
    controller.initialize().unwrap();
    controller.ensure_joined().unwrap();
    controller.stack_mut().fail_send = true;

    assert!(controller.send_payload(&[1]).is_err());
    assert!(controller.session().joined);
    assert_eq!(controller.state(), ControllerState::Joined);
}

#[test]
fn test_deep_sleep_persists_session_right_before_sleep() {
    let (mut controller, journal) = create_controller(id_key_config(0, true));
    controller.initialize().unwrap();

    controller.run_cycle(&mut || 1u16);

    let events = events(&journal);
    let sleep = events
        .iter()
        .position(|e| matches!(e, Event::Sleep { mode: SleepMode::Deep, .. }))
        .unwrap();
    assert_eq!(events[sleep - 1], Event::SaveNetworkSession);
    assert!(controller.session().persisted);
}

#[test]
fn test_shallow_sleep_never_persists() {
    let (mut controller, journal) = create_controller(id_key_config(0, false));
    controller.initialize().unwrap();

    for _ in 0..3 {
        controller.run_cycle(&mut || 1u16);
    }
    controller.prepare_for_low_power(false).unwrap();

    assert!(!events(&journal).contains(&Event::SaveNetworkSession));
    assert!(!controller.session().persisted);
    assert_eq!(controller.state(), ControllerState::Joined);
}

#[test]
fn test_session_save_failure_still_sleeps() {
    let (mut controller, journal) = create_controller(id_key_config(0, true));
    controller.initialize().unwrap();
    controller.stack_mut().fail_save_session = true;

    assert_eq!(
        controller.prepare_for_low_power(true),
        Err(DeviceError::SessionSaveFailed)
    );
    let report = controller.run_cycle(&mut || 1u16);
    assert_eq!(report.wake, Ok(WakeReason::Rtc));
    assert!(events(&journal)
        .iter()
        .any(|e| matches!(e, Event::Sleep { .. })));
    assert!(controller
        .faults()
        .contains(&DeviceError::SessionSaveFailed));
}

#[test]
fn test_warm_restart_restores_without_reconfiguring() {
    // first boot: cold start, join, deep sleep
    let (mut controller, _journal) = create_controller(id_key_config(0, true));
    controller.initialize().unwrap();
    controller.run_cycle(&mut || 1u16);
    let (mut stack, mut power) = controller.release();

    // RAM lost, device reboots with the standby flag set
    stack.power_cycle();
    let journal = mock::journal();
    stack.journal = journal.clone();
    power.journal = journal.clone();
    power.standby = true;

    let mut controller = SessionController::new(stack, power, id_key_config(0, true));
    assert_eq!(controller.initialize().unwrap(), Mode::WarmRestart);
    assert_eq!(controller.state(), ControllerState::Joined);
    assert!(controller.session().restored);

    let report = controller.run_cycle(&mut || 0xBEEFu16);
    assert_eq!(report.join, Ok(Joined::AlreadyJoined));

    let events = events(&journal);
    assert_eq!(events[0], Event::RestoreNetworkSession);
    assert!(!events.iter().any(|e| matches!(
        e,
        Event::ResetConfig | Event::SaveConfig | Event::Join | Event::SetJoinMode(_)
    )));
    assert_eq!(
        events[1],
        Event::Send {
            data: vec![0xBE, 0xEF],
            confirmed: false,
        }
    );
}

#[test]
fn test_warm_restart_without_saved_session_joins() {
    let (mut controller, journal) = create_controller(id_key_config(0, true));
    controller.power_mut().standby = true;

    assert_eq!(controller.initialize().unwrap(), Mode::WarmRestart);
    assert_eq!(controller.state(), ControllerState::Idle);
    assert_eq!(controller.faults(), &[DeviceError::SessionRestoreFailed]);

    controller.run_cycle(&mut || 1u16);
    assert!(events(&journal).contains(&Event::Join));
}

#[test]
fn test_simulated_deep_sleep_restores_on_wake() {
    let (mut controller, journal) = create_controller(id_key_config(0, true));
    controller.initialize().unwrap();
    controller.ensure_joined().unwrap();

    let reason = controller.sleep().unwrap();
    assert_eq!(reason, WakeReason::Rtc);

    let events = events(&journal);
    let save = events
        .iter()
        .position(|e| *e == Event::SaveNetworkSession)
        .unwrap();
    let restore = events
        .iter()
        .position(|e| *e == Event::RestoreNetworkSession)
        .unwrap();
    assert!(save < restore);
    assert_eq!(controller.state(), ControllerState::Joined);
}

#[test]
fn test_sleep_failure_returns_to_awake_state() {
    let (mut controller, _journal) = create_controller(id_key_config(0, false));
    controller.initialize().unwrap();
    controller.ensure_joined().unwrap();
    controller.power_mut().fail_sleep = true;

    assert_eq!(controller.sleep(), Err(MockError::Error));
    assert_eq!(controller.state(), ControllerState::Joined);
}

#[test]
fn test_interrupt_wake_mode_passed_to_power_control() {
    let config = id_key_config(0, false).with_device(DeviceConfig {
        wake_mode: WakeMode::Interrupt,
        sleep_interval_s: 60,
        ..DeviceConfig::default()
    });
    let (mut controller, journal) = create_controller(config);
    controller.initialize().unwrap();

    controller.run_cycle(&mut || 1u16);
    assert_eq!(
        events(&journal).last(),
        Some(&Event::Sleep {
            mode: SleepMode::Shallow,
            wake: WakeMode::Interrupt,
            interval_s: 60,
        })
    );
}

#[test]
fn test_join_and_send_refused_before_initialize() {
    let (mut controller, journal) = create_controller(id_key_config(0, false));

    let report = controller.run_cycle(&mut || 0x0102u16);
    assert_eq!(report.join, Err(JoinError::NotInitialized));
    assert!(report.reading.is_none());
    assert!(report.send.is_none());
    assert_eq!(controller.state(), ControllerState::ColdStart);

    assert_eq!(
        controller.send_payload(&[0x01, 0x02]),
        Err(SendError::Join(JoinError::NotInitialized))
    );
    let mut delay = MockDelay {
        journal: journal.clone(),
    };
    assert_eq!(
        controller.join_with_retry(&mut delay, None),
        Err(JoinError::NotInitialized)
    );

    // only the idle sleep of the cycle reached the platform
    assert_eq!(
        events(&journal),
        vec![Event::Sleep {
            mode: SleepMode::Shallow,
            wake: WakeMode::RtcOrInterrupt,
            interval_s: 30,
        }]
    );

    controller.initialize().unwrap();
    let report = controller.run_cycle(&mut || 0x0102u16);
    assert_eq!(report.join, Ok(Joined::Joined));
    let save = position(&journal, |e| *e == Event::SaveConfig).unwrap();
    let join = position(&journal, |e| *e == Event::Join).unwrap();
    assert!(save < join);
}

#[test]
fn test_downlink_reported_after_uplink() {
    let (mut controller, _journal) = create_controller(id_key_config(0, false));
    controller.initialize().unwrap();
    let downlink = Downlink::new(2, &[0xCA, 0xFE]).unwrap();
    controller.stack_mut().downlinks = [downlink.clone()].into();

    let report = controller.run_cycle(&mut || 1u16);
    assert_eq!(report.downlink, Some(downlink));

    let report = controller.run_cycle(&mut || 1u16);
    assert_eq!(report.downlink, None);
}

#[test]
fn test_downlink_kept_until_taken() {
    let (mut controller, _journal) = create_controller(id_key_config(0, false));
    controller.initialize().unwrap();
    let downlink = Downlink::new(10, &[0x01]).unwrap();
    controller.stack_mut().downlinks = [downlink.clone()].into();

    controller.send_payload(&[0x00]).unwrap();
    // a later uplink without rx data does not clear it
    controller.send_payload(&[0x00]).unwrap();
    assert_eq!(controller.take_downlink(), Some(downlink));
    assert_eq!(controller.take_downlink(), None);
}

#[test]
fn test_backoff_failures_carried_across_warm_restart() {
    let (controller, _journal) = create_controller(id_key_config(0, true));
    let mut controller =
        controller.with_backoff(Backoff::new(1_000, 60_000, 2).with_failures(2));
    controller.power_mut().standby = true;

    assert_eq!(controller.initialize().unwrap(), Mode::WarmRestart);
    controller.stack_mut().join_outcomes = [JoinOutcome::Fail].into();

    let error = controller.ensure_joined().unwrap_err();
    assert_eq!(error.retry_in_ms(), 4_000);
    assert_eq!(controller.backoff().failures(), 3);
}

#[test]
fn test_join_with_retry_zero_attempts_tries_once() {
    let (mut controller, journal) = create_controller(id_key_config(0, false));
    controller.initialize().unwrap();
    controller.stack_mut().join_outcomes = [JoinOutcome::Fail; 3].into();

    let mut delay = MockDelay {
        journal: journal.clone(),
    };
    assert!(controller.join_with_retry(&mut delay, Some(0)).is_err());

    let events = events(&journal);
    assert_eq!(events.iter().filter(|e| **e == Event::Join).count(), 1);
    assert!(!events.iter().any(|e| matches!(e, Event::Delay(_))));
}

#[test]
fn test_fault_list_keeps_most_recent() {
    let (mut controller, _journal) = create_controller(id_key_config(0, true));
    controller.stack_mut().fail_join_mode = true;
    controller.initialize().unwrap();
    assert_eq!(controller.faults(), &[DeviceError::JoinModeSetFailed]);

    controller.stack_mut().fail_save_session = true;
    for _ in 0..8 {
        let _ = controller.prepare_for_low_power(true);
    }
    assert_eq!(controller.faults(), &[DeviceError::SessionSaveFailed; 8]);
    assert_eq!(controller.dropped_faults(), 1);

    controller.clear_faults();
    assert!(controller.faults().is_empty());
    assert_eq!(controller.dropped_faults(), 0);
}
