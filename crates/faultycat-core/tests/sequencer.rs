mod common;

use std::sync::Arc;
use std::time::Duration;

use common::FakeTransport;
use faultycat_core::prelude::*;
use pretty_assertions::assert_eq;
use tokio::time::{timeout, Instant};

fn rising_edge_lp() -> GlitchConfig {
    GlitchConfig {
        trigger_type: TriggerType::RisingEdge,
        trigger_pull: TriggerPull::None,
        glitch_output: GlitchOutput::LP,
        delay_before_pulse: 1000,
        pulse_width: 2500,
    }
}

async fn connected(fake: &FakeTransport) -> Session {
    connected_with(fake, SessionConfig::default()).await
}

async fn connected_with(fake: &FakeTransport, config: SessionConfig) -> Session {
    let s = Session::new(Arc::new(fake.clone()), config);
    s.connect("/dev/ttyACM0").await.unwrap();
    s
}

/// Millisecond settles for tests that run on the real clock
fn quick_timings() -> SessionConfig {
    SessionConfig {
        timings: SequenceTimings {
            glitch_settle_ms: 5,
            pulse_width_settle_ms: 5,
            verify_window_ms: 5,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_glitch_apply_write_order_and_pacing() {
    let fake = FakeTransport::new();
    fake.reply("co", "Enter trigger type (0-6):\r\n")
        .reply("2500", "Glitcher configured successfully\r\n")
        .reply("gl", "Trigger: Rising Edge\r\nOutput: LP\r\n");
    let s = connected(&fake).await;

    let start = Instant::now();
    let report = s.apply_glitch(&rising_edge_lp()).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(fake.written(), vec!["co", "3", "0", "1", "1000", "2500", "gl"]);
    let ms = Duration::from_millis;
    assert_eq!(
        fake.windows(),
        vec![ms(500), ms(500), ms(500), ms(500), ms(500), ms(2000), ms(1000)]
    );
    // five 500 ms settles and one 2000 ms settle before the read-back
    assert!(elapsed >= ms(4500), "sequence took only {:?}", elapsed);

    assert_eq!(report.steps.len(), 6);
    assert_eq!(
        report.output,
        "Enter trigger type (0-6):\r\nGlitcher configured successfully\r\nTrigger: Rising Edge\r\nOutput: LP\r\n"
    );
    assert_eq!(report.verification.as_ref().unwrap().command, "gl");
    assert_eq!(s.last_message().unwrap().severity, Severity::Success);
}

#[tokio::test(start_paused = true)]
async fn test_adc_apply_write_order() {
    let fake = FakeTransport::new();
    let s = connected(&fake).await;

    let report = s.apply_adc(&AdcConfig { sample_count: 1000 }).await.unwrap();
    assert_eq!(fake.written(), vec!["con", "1000"]);
    assert_eq!(fake.windows(), vec![Duration::from_millis(200); 2]);
    assert!(report.verification.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_failure_mid_sequence_stops_and_reports_prior_output() {
    let fake = FakeTransport::new();
    fake.reply("co", "Enter trigger type (0-6):\r\n")
        .reply("3", "Trigger type set to: Rising Edge\r\n");
    let s = connected(&fake).await;
    fake.fail_write_at(2);

    let err = s.apply_glitch(&rising_edge_lp()).await.unwrap_err();
    match err {
        SessionError::Configuration {
            step_index,
            accumulated_output,
            cause,
        } => {
            assert_eq!(step_index, 2);
            assert_eq!(
                accumulated_output,
                "Enter trigger type (0-6):\r\nTrigger type set to: Rising Edge\r\n"
            );
            assert!(matches!(*cause, SessionError::Transport(_)));
        }
        other => panic!("expected configuration error, got {:?}", other),
    }

    assert_eq!(fake.written(), vec!["co", "3"]);
    assert_eq!(s.state(), SessionState::Disconnected);
    assert!(matches!(
        s.apply_glitch(&rising_edge_lp()).await,
        Err(SessionError::NotConnected)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_read_failure_mid_sequence_reports_step() {
    let fake = FakeTransport::new();
    fake.reply("co", "Enter trigger type (0-6):\r\n")
        .reply("3", "Trigger type set to: Rising Edge\r\n");
    let s = connected(&fake).await;
    fake.fail_read_at(2);

    match s.apply_glitch(&rising_edge_lp()).await.unwrap_err() {
        SessionError::Configuration {
            step_index,
            accumulated_output,
            cause,
        } => {
            assert_eq!(step_index, 2);
            assert_eq!(
                accumulated_output,
                "Enter trigger type (0-6):\r\nTrigger type set to: Rising Edge\r\n"
            );
            assert!(matches!(*cause, SessionError::Transport(ProtocolError::ConnectionLost(_))));
        }
        other => panic!("expected configuration error, got {:?}", other),
    }

    // The pull value went out, its read failed, nothing followed
    assert_eq!(fake.written(), vec!["co", "3", "0"]);
    assert_eq!(s.state(), SessionState::Disconnected);
}

// Real time: the fake board blocks a pool thread while the caller gives up.
#[tokio::test]
async fn test_abandoned_glitch_apply_can_be_rerun() {
    let fake = FakeTransport::new();
    let s = connected_with(&fake, quick_timings()).await;
    fake.delay_io(Duration::from_millis(200));

    let abandoned = timeout(Duration::from_millis(50), s.apply_glitch(&rising_edge_lp())).await;
    assert!(abandoned.is_err());
    assert_eq!(s.state(), SessionState::Connected);

    fake.delay_io(Duration::ZERO);
    let report = s.apply_glitch(&rising_edge_lp()).await.unwrap();
    assert_eq!(report.steps.len(), 6);
    assert_eq!(
        fake.written(),
        vec!["co", "co", "3", "0", "1", "1000", "2500", "gl"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_rerun_after_reconnect_sends_full_sequence() {
    let fake = FakeTransport::new();
    let s = connected(&fake).await;
    fake.fail_write_at(4);
    assert!(s.apply_glitch(&rising_edge_lp()).await.is_err());

    fake.board.lock().unwrap().fail_write_at = None;
    s.connect("/dev/ttyACM0").await.unwrap();
    s.apply_glitch(&rising_edge_lp()).await.unwrap();

    let written = fake.written();
    assert_eq!(&written[4..], &["co", "3", "0", "1", "1000", "2500", "gl"]);
}

#[tokio::test(start_paused = true)]
async fn test_pulse_train_runs_arm_pulses_disarm() {
    let fake = FakeTransport::new();
    fake.reply("a", "armed\r\n");
    let s = connected(&fake).await;

    let train = PulseTrain {
        count: 2,
        interval: Duration::from_millis(300),
    };
    let start = Instant::now();
    let report = s.pulse_train(&train).await.unwrap();

    assert_eq!(fake.written(), vec!["d", "a", "p", "p", "d"]);
    assert!(start.elapsed() >= Duration::from_millis(2600));
    assert_eq!(report.output, "armed\r\n");
}

#[tokio::test]
async fn test_invalid_adc_count_sends_nothing() {
    let fake = FakeTransport::new();
    let s = connected(&fake).await;
    let err = s.apply_adc(&AdcConfig { sample_count: 50 }).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidParameter(_)));
    assert!(fake.written().is_empty());
    assert_eq!(s.state(), SessionState::Connected);
}
