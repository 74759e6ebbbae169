//! Capture session integration tests
//!
//! Drives sessions end to end through the simulated engine and USB
//! provider.
//!
//! # Test Scenarios
//! - Open and close lifecycle, including double close
//! - Scripted captures with ordered quality events
//! - Cancellation and the single terminal event per capture
//! - Device detach during a capture
//! - Property and contrast validation across the writable table
//! - Open options, rolling info and out-of-range engine frame timings
//!
//! Run with: `cargo test -p scanner --test session_tests`

use common::test_utils::{DEFAULT_TEST_TIMEOUT, create_mock_entry_list, create_mock_raw_image, with_timeout};
use proptest::prelude::*;
use protocol::properties::writable_properties;
use protocol::{
    CaptureOptions, CaptureOutcome, FailureCategory, FailureCode, FingerCountState, FingerQuality,
    ImageResolution, ImageType, OpenState, PropertyId, PropertyKind, PropertySpec, RollingData,
    RollingState, SessionEvent,
};
use scanner::sim::{SimOp, SimulatedEngine, SimulatedProvider};
use scanner::{
    CaptureSession, OpenOptions, RawExtendedResult, RawRollingInfo, Scanner, ScannerSettings,
    SessionEvents, SessionState,
};
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    scanner: Scanner,
    engine: SimulatedEngine,
    provider: SimulatedProvider,
}

fn fixture(devices: u32) -> Fixture {
    let engine = SimulatedEngine::with_devices(devices as usize);
    engine.set_step_delay(Duration::from_millis(1));
    let provider = SimulatedProvider::with_devices(create_mock_entry_list(devices));
    let scanner = Scanner::new(
        Arc::new(engine.clone()),
        Arc::new(provider.clone()),
        ScannerSettings::default(),
    );
    scanner.registry().enumerate();
    Fixture {
        scanner,
        engine,
        provider,
    }
}

fn open(fixture: &Fixture) -> (CaptureSession, SessionEvents) {
    let mut session = fixture.scanner.open(0).unwrap();
    let events = session.take_events().unwrap();
    (session, events)
}

fn begin(session: &CaptureSession) {
    session
        .begin_capture(
            ImageType::FlatSingleFinger,
            ImageResolution::Ppi500,
            CaptureOptions::AUTO_CAPTURE,
        )
        .unwrap();
}

/// Collect events up to and including the terminal one
async fn until_terminal(events: &mut SessionEvents) -> (Vec<SessionEvent>, CaptureOutcome) {
    with_timeout(DEFAULT_TEST_TIMEOUT, async {
        let mut seen = Vec::new();
        while let Some(event) = events.next().await {
            if let SessionEvent::CaptureFinished(outcome) = event {
                return (seen, outcome);
            }
            seen.push(event);
        }
        panic!("stream ended before the terminal event");
    })
    .await
    .unwrap()
}

fn terminal_count(events: &[SessionEvent]) -> usize {
    events.iter().filter(|e| e.is_terminal()).count()
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

mod lifecycle {
    use super::*;

    #[test]
    fn test_open_marks_registry_open() {
        let fixture = fixture(1);
        let (session, _events) = open(&fixture);

        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(session.index(), 0);
        assert_eq!(
            fixture.scanner.registry().describe(0).unwrap().open_state,
            OpenState::Open
        );
    }

    #[test]
    fn test_second_open_is_busy() {
        let fixture = fixture(1);
        let (_session, _events) = open(&fixture);

        let failure = fixture.scanner.open(0).unwrap_err();
        assert_eq!(failure.code, FailureCode::DeviceBusy);
    }

    #[test]
    fn test_open_without_devices() {
        let fixture = fixture(0);
        let failure = fixture.scanner.open(0).unwrap_err();
        assert_eq!(failure.code, FailureCode::DeviceNotFound);
    }

    #[test]
    fn test_close_twice_is_noop() {
        let fixture = fixture(1);
        let (session, mut events) = open(&fixture);
        let device = session.device_id();

        session.close();
        session.close();

        assert_eq!(session.state(), SessionState::Closed);
        assert!(!fixture.provider.is_transport_open(device));
        assert!(events.next_blocking().is_none());
        assert_eq!(
            session.begin_capture(
                ImageType::FlatSingleFinger,
                ImageResolution::Ppi500,
                CaptureOptions::NONE
            )
            .unwrap_err()
            .code,
            FailureCode::WrongState
        );
    }

    #[test]
    fn test_reopen_after_close() {
        let fixture = fixture(1);
        let (session, _events) = open(&fixture);
        session.close();

        let (again, _events) = open(&fixture);
        assert_eq!(again.state(), SessionState::Open);
    }

    #[test]
    fn test_open_options_reach_engine() {
        let fixture = fixture(1);
        let options = OpenOptions::with_uniformity_mask("/opt/fpscan/masks/columbo.msk");

        let session = fixture.scanner.open_with(0, &options).unwrap();
        assert_eq!(fixture.engine.open_options(0), Some(options));
        session.close();

        fixture.scanner.open(0).unwrap();
        assert_eq!(fixture.engine.open_options(0), Some(OpenOptions::default()));
    }

    #[tokio::test]
    async fn test_async_open_options_reach_engine() {
        let fixture = fixture(1);
        let mut discovery = fixture.scanner.registry().subscribe().unwrap();
        let options = OpenOptions::with_uniformity_mask("/opt/fpscan/masks/watson.msk");

        fixture.scanner.open_async_with(0, &options).unwrap();
        let session = with_timeout(DEFAULT_TEST_TIMEOUT, async {
            loop {
                if let Some(scanner::DiscoveryEvent::OpenComplete { result, .. }) =
                    discovery.next().await
                {
                    break result;
                }
            }
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(fixture.engine.open_options(0), Some(options));
    }

    #[test]
    fn test_drop_closes_session() {
        let fixture = fixture(1);
        let (session, _events) = open(&fixture);
        let device = session.device_id();
        drop(session);

        assert!(!fixture.provider.is_transport_open(device));
        assert_eq!(
            fixture.scanner.registry().describe(0).unwrap().open_state,
            OpenState::Closed
        );
    }
}

// ============================================================================
// Capture Tests
// ============================================================================

mod capture {
    use super::*;

    #[tokio::test]
    async fn test_scripted_capture_completes_with_good_quality() {
        let fixture = fixture(1);
        let (session, mut events) = open(&fixture);
        begin(&session);
        assert_eq!(session.state(), SessionState::Capturing);

        let (seen, outcome) = until_terminal(&mut events).await;
        let CaptureOutcome::Completed(result) = outcome else {
            panic!("expected a completed capture, got {:?}", outcome);
        };

        assert_eq!(result.quality().primary(), FingerQuality::Good);
        assert_eq!(result.image_type(), ImageType::FlatSingleFinger);
        assert_eq!(result.finger_images().len(), 1);
        assert!(matches!(seen.first(), Some(SessionEvent::AcquisitionBegun(_))));
        assert!(seen.contains(&SessionEvent::FingerCountChanged(FingerCountState::TooFew)));
        assert_eq!(session.state(), SessionState::Open);
    }

    #[tokio::test]
    async fn test_quality_events_arrive_in_order() {
        let fixture = fixture(1);
        fixture.engine.set_quality_script(vec![
            FingerQuality::Poor,
            FingerQuality::Fair,
            FingerQuality::Good,
        ]);
        let (session, mut events) = open(&fixture);
        begin(&session);

        let (seen, _) = until_terminal(&mut events).await;
        let qualities: Vec<FingerQuality> = seen
            .iter()
            .filter_map(|e| match e {
                SessionEvent::FingerQualityChanged(q) => Some(q.primary()),
                _ => None,
            })
            .collect();
        assert_eq!(
            qualities,
            vec![FingerQuality::Poor, FingerQuality::Fair, FingerQuality::Good]
        );
    }

    #[test]
    fn test_begin_while_capturing_is_rejected() {
        let fixture = fixture(1);
        fixture.engine.set_auto_script(false);
        let (session, _events) = open(&fixture);
        begin(&session);

        let failure = session
            .begin_capture(
                ImageType::FlatSingleFinger,
                ImageResolution::Ppi500,
                CaptureOptions::AUTO_CAPTURE,
            )
            .unwrap_err();
        assert_eq!(failure.code, FailureCode::CaptureStillRunning);
    }

    #[test]
    fn test_begin_with_no_image_type() {
        let fixture = fixture(1);
        let (session, _events) = open(&fixture);
        let failure = session
            .begin_capture(ImageType::None, ImageResolution::Ppi500, CaptureOptions::NONE)
            .unwrap_err();
        assert_eq!(failure.code, FailureCode::CaptureInvalidMode);
        assert_eq!(session.state(), SessionState::Open);
    }

    #[test]
    fn test_native_begin_failure_restores_open() {
        let fixture = fixture(1);
        fixture.engine.fail_next(SimOp::BeginCapture, -305);
        let (session, _events) = open(&fixture);

        let failure = session
            .begin_capture(
                ImageType::FlatSingleFinger,
                ImageResolution::Ppi500,
                CaptureOptions::NONE,
            )
            .unwrap_err();
        assert_eq!(failure.native, Some(-305));
        assert_eq!(session.state(), SessionState::Open);
        assert!(session.active_capture().is_none());
    }

    #[tokio::test]
    async fn test_cancel_before_any_frame() {
        let fixture = fixture(1);
        fixture.engine.set_auto_script(false);
        let (session, mut events) = open(&fixture);
        begin(&session);

        session.cancel_capture().unwrap();
        let (_, outcome) = until_terminal(&mut events).await;
        assert_eq!(
            outcome,
            CaptureOutcome::Failed(protocol::Failure::new(FailureCode::CaptureStop))
        );
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(
            session.cancel_capture().unwrap_err().code,
            FailureCode::CaptureNotRunning
        );
    }

    #[tokio::test]
    async fn test_cancel_returns_last_preview() {
        let fixture = fixture(1);
        fixture.engine.set_auto_script(false);
        let (session, mut events) = open(&fixture);
        begin(&session);

        let handle = fixture.engine.handle_for(0).unwrap();
        let sink = fixture.engine.sink().unwrap();
        sink.preview_available(handle, create_mock_raw_image(8, 4, false));

        let event = with_timeout(DEFAULT_TEST_TIMEOUT, events.next()).await.unwrap();
        assert!(matches!(event, Some(SessionEvent::PreviewAvailable(_))));

        session.cancel_capture().unwrap();
        let (_, outcome) = until_terminal(&mut events).await;
        let CaptureOutcome::Cancelled(frame) = outcome else {
            panic!("expected a cancelled capture, got {:?}", outcome);
        };
        assert_eq!(frame.width(), 8);
    }

    #[tokio::test]
    async fn test_manual_capture_completes() {
        let fixture = fixture(1);
        fixture.engine.set_auto_script(false);
        let (session, mut events) = open(&fixture);
        begin(&session);

        session.capture_manually().unwrap();
        let (_, outcome) = until_terminal(&mut events).await;
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_negative_extended_status_fails_capture() {
        let fixture = fixture(1);
        fixture.engine.set_auto_script(false);
        fixture.engine.set_result_status(-302);
        let (session, mut events) = open(&fixture);
        begin(&session);

        session.capture_manually().unwrap();
        let (_, outcome) = until_terminal(&mut events).await;
        let CaptureOutcome::Failed(failure) = outcome else {
            panic!("expected a failed capture, got {:?}", outcome);
        };
        assert_eq!(failure.code, FailureCode::CaptureTimeout);
    }

    #[tokio::test]
    async fn test_close_during_capture_delivers_terminal() {
        let fixture = fixture(1);
        fixture.engine.set_auto_script(false);
        let (session, mut events) = open(&fixture);
        begin(&session);

        session.close();
        let (_, outcome) = until_terminal(&mut events).await;
        assert!(!outcome.is_success());
        assert!(with_timeout(DEFAULT_TEST_TIMEOUT, events.next()).await.unwrap().is_none());
    }
}

// ============================================================================
// Engine Input Tests
// ============================================================================

mod engine_input {
    use super::*;

    const HUGE_FRAME_TIME: f64 = 1e30;

    #[tokio::test]
    async fn test_preview_with_huge_frame_time() {
        let fixture = fixture(1);
        fixture.engine.set_auto_script(false);
        let (session, mut events) = open(&fixture);
        begin(&session);

        let handle = fixture.engine.handle_for(0).unwrap();
        let mut raw = create_mock_raw_image(8, 4, false);
        raw.frame_time = HUGE_FRAME_TIME;
        fixture.engine.sink().unwrap().preview_available(handle, raw);

        let event = with_timeout(DEFAULT_TEST_TIMEOUT, events.next()).await.unwrap();
        let Some(SessionEvent::PreviewAvailable(frame)) = event else {
            panic!("expected a preview, got {:?}", event);
        };
        assert_eq!(frame.frame_time(), Duration::ZERO);
        assert_eq!(frame.width(), 8);
    }

    #[tokio::test]
    async fn test_result_with_huge_frame_time() {
        let fixture = fixture(1);
        fixture.engine.set_auto_script(false);
        let (session, mut events) = open(&fixture);
        begin(&session);

        let handle = fixture.engine.handle_for(0).unwrap();
        let mut image = create_mock_raw_image(16, 8, true);
        image.frame_time = HUGE_FRAME_TIME;
        let mut segment = create_mock_raw_image(8, 8, true);
        segment.frame_time = f64::MAX;
        fixture.engine.sink().unwrap().result_extended(
            handle,
            RawExtendedResult {
                status: 0,
                image,
                image_type: ImageType::FlatSingleFinger.code(),
                detected_finger_count: 1,
                segments: vec![segment],
                positions: vec![Default::default()],
            },
        );

        let (_, outcome) = until_terminal(&mut events).await;
        let CaptureOutcome::Completed(result) = outcome else {
            panic!("expected a completed capture, got {:?}", outcome);
        };
        assert_eq!(result.image().frame_time(), Duration::ZERO);
        assert_eq!(result.finger_images()[0].frame_time(), Duration::ZERO);
        assert_eq!(session.state(), SessionState::Open);
    }

    #[test]
    fn test_rolling_info_during_roll() {
        let fixture = fixture(1);
        fixture.engine.set_auto_script(false);
        let (session, _events) = open(&fixture);
        assert_eq!(
            session.rolling_info().unwrap_err().code,
            FailureCode::CaptureNotRunning
        );

        session
            .begin_capture(
                ImageType::RollSingleFinger,
                ImageResolution::Ppi500,
                CaptureOptions::AUTO_CAPTURE,
            )
            .unwrap();
        assert_eq!(
            session.rolling_info().unwrap(),
            RollingData {
                state: RollingState::TakeAcquisition,
                line_x: 32,
            }
        );

        fixture
            .engine
            .set_rolling_info(Some(RawRollingInfo { state: 9, line_x: 0 }));
        assert_eq!(
            session.rolling_info().unwrap_err().code,
            FailureCode::CommandFailed
        );

        session.close();
        assert_eq!(session.rolling_info().unwrap_err().code, FailureCode::WrongState);
    }
}

// ============================================================================
// Detach Tests
// ============================================================================

mod detach {
    use super::*;

    #[tokio::test]
    async fn test_detach_while_capturing() {
        let fixture = fixture(1);
        fixture.engine.set_auto_script(false);
        let mut discovery = fixture.scanner.registry().subscribe().unwrap();
        let (session, mut events) = open(&fixture);
        let device = session.device_id();
        let handle = fixture.engine.handle_for(0).unwrap();
        begin(&session);

        fixture.provider.detach(device);

        let drained = with_timeout(DEFAULT_TEST_TIMEOUT, async {
            let mut all = Vec::new();
            while let Some(event) = events.next().await {
                all.push(event);
            }
            all
        })
        .await
        .unwrap();

        let broken = drained
            .iter()
            .position(|e| *e == SessionEvent::CommunicationBroken)
            .expect("communication broken delivered");
        let terminal = drained
            .iter()
            .position(|e| e.is_terminal())
            .expect("terminal delivered");
        assert!(broken < terminal);
        assert_eq!(terminal_count(&drained), 1);
        assert_eq!(
            drained[terminal],
            SessionEvent::CaptureFinished(CaptureOutcome::Failed(protocol::Failure::new(
                FailureCode::CommunicationBroken
            )))
        );

        assert_eq!(session.state(), SessionState::Closed);
        assert!(!fixture.engine.is_open(handle));
        assert!(fixture.scanner.registry().device(device).is_none());

        let mut detached = false;
        while let Some(event) = discovery.try_next() {
            if let scanner::DiscoveryEvent::DeviceDetached(id) = event {
                assert_eq!(id, device);
                detached = true;
            }
        }
        assert!(detached);
        session.close();
    }

    #[test]
    fn test_engine_reported_broken_link_closes_session() {
        let fixture = fixture(1);
        let (session, mut events) = open(&fixture);
        let handle = fixture.engine.handle_for(0).unwrap();

        fixture.engine.sink().unwrap().communication_broken(handle);
        assert_eq!(events.next_blocking(), Some(SessionEvent::CommunicationBroken));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(events.next_blocking().is_none());
        assert!(!fixture.engine.is_open(handle));
    }
}

// ============================================================================
// Property Tests
// ============================================================================

mod properties {
    use super::*;

    #[test]
    fn test_contrast_out_of_range_keeps_value() {
        let fixture = fixture(1);
        let (session, _events) = open(&fixture);
        session.set_contrast(20).unwrap();

        let failure = session.set_contrast(35).unwrap_err();
        assert_eq!(failure.category(), FailureCategory::ParameterUsage);
        assert_eq!(session.contrast().unwrap(), 20);
        assert_eq!(session.property(PropertyId::Contrast).unwrap(), "20");
    }

    #[test]
    fn test_read_only_property_rejected() {
        let fixture = fixture(1);
        let (session, _events) = open(&fixture);
        let failure = session.set_property(PropertyId::Firmware, "9.9").unwrap_err();
        assert_eq!(failure.code, FailureCode::NotSupported);
        assert_eq!(session.property(PropertyId::Firmware).unwrap(), "3.1.0");
    }

    #[test]
    fn test_unknown_native_status_is_command_failure() {
        let fixture = fixture(1);
        let (session, _events) = open(&fixture);
        fixture.engine.fail_next(SimOp::SetProperty, -9999);

        let failure = session.set_property(PropertyId::CaptureTimeout, "60").unwrap_err();
        assert_eq!(failure.code, FailureCode::CommandFailed);
        assert_eq!(failure.native, Some(-9999));
        assert_eq!(session.property(PropertyId::CaptureTimeout).unwrap(), "-1");
    }

    #[test]
    fn test_reserved_property_needs_key() {
        let fixture = fixture(1);
        let (session, _events) = open(&fixture);
        let id = PropertyId::ReservedEnableTofForRoll;

        assert_eq!(
            session.set_property(id, "TRUE").unwrap_err().code,
            FailureCode::NotSupported
        );
        assert!(session.set_property_reserved("wrong", id, "TRUE").is_err());
        session
            .set_property_reserved(scanner::sim::SIM_RESERVED_KEY, id, "true")
            .unwrap();
        assert_eq!(session.property(id).unwrap(), "TRUE");
    }

    fn canonical_value(kind: PropertyKind) -> BoxedStrategy<String> {
        match kind {
            PropertyKind::Text => "[A-Za-z0-9]{1,12}".boxed(),
            PropertyKind::Integer => any::<i32>().prop_map(|n| n.to_string()).boxed(),
            PropertyKind::Range { min, max } => (min..=max).prop_map(|n| n.to_string()).boxed(),
            PropertyKind::Timeout { min, max } => prop_oneof![Just(-1i64), min..=max]
                .prop_map(|n| n.to_string())
                .boxed(),
            PropertyKind::Bool => any::<bool>()
                .prop_map(|b| if b { "TRUE" } else { "FALSE" }.to_string())
                .boxed(),
            PropertyKind::List { count, min, max } => prop::collection::vec(min..=max, count)
                .prop_map(|items| {
                    items
                        .iter()
                        .map(|n| n.to_string())
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .boxed(),
        }
    }

    /// Upper bound of a bounded kind, with the number of values it takes
    fn bounds(kind: PropertyKind) -> Option<(i64, i64, usize)> {
        match kind {
            PropertyKind::Range { min, max } | PropertyKind::Timeout { min, max } => {
                Some((min, max, 1))
            }
            PropertyKind::List { count, min, max } => Some((min, max, count)),
            _ => None,
        }
    }

    fn writable_value() -> impl Strategy<Value = (PropertyId, String)> {
        let specs: Vec<&'static PropertySpec> = writable_properties().collect();
        prop::sample::select(specs)
            .prop_flat_map(|spec| canonical_value(spec.kind).prop_map(move |value| (spec.id, value)))
    }

    fn out_of_range_value() -> impl Strategy<Value = (PropertyId, String)> {
        let specs: Vec<&'static PropertySpec> = writable_properties()
            .filter(|spec| bounds(spec.kind).is_some())
            .collect();
        (prop::sample::select(specs), 1i64..1000).prop_map(|(spec, excess)| {
            let (min, max, count) = bounds(spec.kind).unwrap_or((0, 0, 1));
            let mut items = vec![min.to_string(); count];
            items[0] = (max + excess).to_string();
            (spec.id, items.join(" "))
        })
    }

    #[test]
    fn test_every_writable_property_is_settable() {
        let fixture = fixture(1);
        let (session, _events) = open(&fixture);
        let writable: Vec<PropertyId> = writable_properties().map(|spec| spec.id).collect();
        assert!(writable.contains(&PropertyId::Contrast));

        for id in writable {
            let current = session.property(id).unwrap();
            if let Ok(value) = id.spec().normalize(&current) {
                session.set_property(id, &value).unwrap();
                assert_eq!(session.property(id).unwrap(), value, "{}", id);
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn prop_writable_round_trip((id, value) in writable_value()) {
            let fixture = fixture(1);
            let (session, _events) = open(&fixture);
            session.set_property(id, &value).unwrap();
            prop_assert_eq!(session.property(id).unwrap(), value);
        }

        #[test]
        fn prop_writable_out_of_range_rejected((id, value) in out_of_range_value()) {
            let fixture = fixture(1);
            let (session, _events) = open(&fixture);
            let before = session.property(id).unwrap();

            let failure = session.set_property(id, &value).unwrap_err();
            prop_assert_eq!(failure.code, FailureCode::InvalidParamValue);
            prop_assert_eq!(session.property(id).unwrap(), before);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_timeout_round_trip(seconds in 10i64..=3600) {
            let fixture = fixture(1);
            let (session, _events) = open(&fixture);
            session.set_property(PropertyId::CaptureTimeout, &seconds.to_string()).unwrap();
            prop_assert_eq!(
                session.property(PropertyId::CaptureTimeout).unwrap(),
                seconds.to_string()
            );
        }

        #[test]
        fn prop_out_of_range_timeout_rejected(seconds in prop_oneof![-1000i64..-1, 0i64..10, 3601i64..100_000]) {
            let fixture = fixture(1);
            let (session, _events) = open(&fixture);
            let failure = session
                .set_property(PropertyId::CaptureTimeout, &seconds.to_string())
                .unwrap_err();
            prop_assert_eq!(failure.code, FailureCode::InvalidParamValue);
            prop_assert_eq!(session.property(PropertyId::CaptureTimeout).unwrap(), "-1");
        }
    }
}

// ============================================================================
// Terminal Event Tests
// ============================================================================

mod terminal {
    use super::*;

    #[derive(Debug, Clone)]
    enum Step {
        Begin,
        Cancel,
        Finish,
        Progress(u8),
        SpuriousResult,
        Drain,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            2 => Just(Step::Begin),
            1 => Just(Step::Cancel),
            1 => Just(Step::Finish),
            4 => (0u8..4).prop_map(Step::Progress),
            1 => Just(Step::SpuriousResult),
            2 => Just(Step::Drain),
        ]
    }

    fn drain(events: &mut SessionEvents, terminals: &mut usize) {
        while let Some(event) = events.try_next() {
            if event.is_terminal() {
                *terminals += 1;
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        /// Every accepted begin_capture ends in exactly one terminal event
        #[test]
        fn prop_one_terminal_per_capture(steps in prop::collection::vec(step(), 1..40)) {
            let fixture = fixture(1);
            fixture.engine.set_auto_script(false);
            let (session, mut events) = open(&fixture);
            let handle = fixture.engine.handle_for(0).unwrap();
            let sink = fixture.engine.sink().unwrap();

            let mut begun = 0usize;
            let mut terminals = 0usize;
            for step in steps {
                match step {
                    Step::Begin => {
                        if session
                            .begin_capture(
                                ImageType::FlatSingleFinger,
                                ImageResolution::Ppi500,
                                CaptureOptions::AUTO_CAPTURE,
                            )
                            .is_ok()
                        {
                            begun += 1;
                        }
                    }
                    Step::Cancel => {
                        let _ = session.cancel_capture();
                    }
                    Step::Finish => {
                        fixture.engine.finish_capture(handle);
                    }
                    Step::Progress(kind) => match kind {
                        0 => sink.preview_available(handle, create_mock_raw_image(8, 4, false)),
                        1 => sink.finger_quality_changed(handle, &[FingerQuality::Fair.code()]),
                        2 => sink.finger_count_changed(handle, FingerCountState::Ok.code()),
                        _ => sink.platen_state_changed(handle, 1),
                    },
                    Step::SpuriousResult => sink.result_extended(handle, Default::default()),
                    Step::Drain => drain(&mut events, &mut terminals),
                }
            }

            session.close();
            while let Some(event) = events.next_blocking() {
                if event.is_terminal() {
                    terminals += 1;
                }
            }

            prop_assert_eq!(terminals, begun);
        }
    }
}
