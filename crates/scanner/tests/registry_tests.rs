//! Device registry integration tests
//!
//! Discovery subscriptions, hotplug, permission and asynchronous open,
//! driven through the simulated provider and engine.
//!
//! # Test Scenarios
//! - Attach and detach notifications with device counts
//! - Single active subscription and re-subscription
//! - Device count changes found by re-enumeration
//! - Permission requests and their effect on open
//! - Access checks that call back into the registry
//! - Open progress and async open completion
//!
//! Run with: `cargo test -p scanner --test registry_tests`

use common::test_utils::{DEFAULT_TEST_TIMEOUT, create_mock_entry, create_mock_entry_list, with_timeout};
use protocol::{DeviceId, FailureCode, OpenState, Permission, UsbDeviceEntry};
use scanner::sim::{SimOp, SimulatedEngine, SimulatedProvider};
use scanner::{
    DeviceRegistry, DiscoveryEvent, DiscoveryStream, HotplugSink, Scanner, ScannerSettings,
    TransportHandle, UsbAccessProvider, WatchGuard,
};
use std::sync::{Arc, OnceLock, mpsc};
use std::time::Duration;

fn scanner_with(devices: u32) -> (Scanner, SimulatedEngine, SimulatedProvider) {
    let engine = SimulatedEngine::with_devices(devices as usize);
    let provider = SimulatedProvider::with_devices(create_mock_entry_list(devices));
    let scanner = Scanner::new(
        Arc::new(engine.clone()),
        Arc::new(provider.clone()),
        ScannerSettings::default(),
    );
    scanner.registry().enumerate();
    (scanner, engine, provider)
}

async fn next_event(stream: &mut DiscoveryStream) -> DiscoveryEvent {
    with_timeout(DEFAULT_TEST_TIMEOUT, stream.next())
        .await
        .unwrap()
        .expect("discovery stream ended")
}

// ============================================================================
// Hotplug Tests
// ============================================================================

mod hotplug {
    use super::*;

    #[tokio::test]
    async fn test_attach_and_detach_events() {
        let (scanner, _engine, provider) = scanner_with(0);
        let mut stream = scanner.registry().subscribe().unwrap();

        provider.attach(create_mock_entry(7, 0x113F, 0x1100));
        match next_event(&mut stream).await {
            DiscoveryEvent::DeviceAttached(descriptor) => {
                assert_eq!(descriptor.id, DeviceId(7));
                assert_eq!(descriptor.permission, Permission::Granted);
                assert_eq!(descriptor.open_state, OpenState::Closed);
            }
            other => panic!("expected attach, got {:?}", other),
        }
        assert!(matches!(
            next_event(&mut stream).await,
            DiscoveryEvent::DeviceCountChanged(1)
        ));
        assert_eq!(scanner.registry().index_of(DeviceId(7)), Some(0));

        provider.detach(DeviceId(7));
        assert!(matches!(
            next_event(&mut stream).await,
            DiscoveryEvent::DeviceDetached(DeviceId(7))
        ));
        assert!(matches!(
            next_event(&mut stream).await,
            DiscoveryEvent::DeviceCountChanged(0)
        ));
        assert!(scanner.registry().is_empty());
    }

    #[test]
    fn test_enumerate_reports_count_change() {
        let (scanner, _engine, provider) = scanner_with(0);
        provider.attach(create_mock_entry(4, 0x113F, 0x1100));
        let mut stream = scanner.registry().subscribe().unwrap();
        assert!(stream.try_next().is_none());

        assert_eq!(scanner.registry().enumerate().len(), 1);
        assert!(matches!(
            stream.try_next(),
            Some(DiscoveryEvent::DeviceAttached(d)) if d.id == DeviceId(4)
        ));
        assert!(matches!(
            stream.try_next(),
            Some(DiscoveryEvent::DeviceCountChanged(1))
        ));

        // unchanged list, no count event
        scanner.registry().enumerate();
        assert!(stream.try_next().is_none());
    }

    #[test]
    fn test_enumerate_reports_missed_detach() {
        let (scanner, _engine, provider) = scanner_with(2);
        provider.detach(DeviceId(1));
        let mut stream = scanner.registry().subscribe().unwrap();

        assert_eq!(scanner.registry().enumerate().len(), 1);
        assert!(matches!(
            stream.try_next(),
            Some(DiscoveryEvent::DeviceDetached(DeviceId(1)))
        ));
        assert!(matches!(
            stream.try_next(),
            Some(DiscoveryEvent::DeviceCountChanged(1))
        ));
        assert!(stream.try_next().is_none());
    }

    #[test]
    fn test_attach_keeps_order() {
        let (scanner, _engine, provider) = scanner_with(2);
        let _stream = scanner.registry().subscribe().unwrap();
        provider.attach(create_mock_entry(9, 0x1FBA, 0x1500));

        let ids: Vec<DeviceId> = scanner.registry().devices().iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![DeviceId(1), DeviceId(2), DeviceId(9)]);
    }

    #[test]
    fn test_duplicate_attach_ignored() {
        let (scanner, _engine, provider) = scanner_with(1);
        let mut stream = scanner.registry().subscribe().unwrap();
        provider.detach(DeviceId(1));
        provider.attach(create_mock_entry(1, 0x113F, 0x1100));
        provider.attach(create_mock_entry(1, 0x113F, 0x1100));

        assert_eq!(scanner.registry().len(), 1);
        let attaches = std::iter::from_fn(|| stream.try_next())
            .filter(|e| matches!(e, DiscoveryEvent::DeviceAttached(_)))
            .count();
        assert_eq!(attaches, 1);
    }

    #[test]
    fn test_engine_device_count_forwarded() {
        let (scanner, engine, _provider) = scanner_with(1);
        let mut stream = scanner.registry().subscribe().unwrap();
        engine.set_device_count(3);

        assert!(matches!(
            stream.try_next(),
            Some(DiscoveryEvent::DeviceCountChanged(3))
        ));
    }
}

// ============================================================================
// Subscription Tests
// ============================================================================

mod subscription {
    use super::*;

    #[test]
    fn test_second_subscription_rejected() {
        let (scanner, _engine, _provider) = scanner_with(1);
        let _stream = scanner.registry().subscribe().unwrap();
        assert!(scanner.registry().subscribe().is_err());
    }

    #[test]
    fn test_resubscribe_after_unsubscribe() {
        let (scanner, _engine, provider) = scanner_with(1);
        let mut stream = scanner.registry().subscribe().unwrap();
        assert_eq!(provider.watcher_count(), 1);

        stream.unsubscribe();
        assert!(!stream.is_active());
        assert!(!scanner.registry().has_subscription());
        assert_eq!(provider.watcher_count(), 0);

        let mut again = scanner.registry().subscribe().unwrap();
        provider.attach(create_mock_entry(5, 0x113F, 0x1100));
        assert!(matches!(
            again.try_next(),
            Some(DiscoveryEvent::DeviceAttached(_))
        ));
        assert!(stream.try_next().is_none());
    }

    #[test]
    fn test_drop_releases_subscription() {
        let (scanner, _engine, provider) = scanner_with(1);
        drop(scanner.registry().subscribe().unwrap());
        assert!(!scanner.registry().has_subscription());
        assert_eq!(provider.watcher_count(), 0);
    }

    #[test]
    fn test_watch_failure_leaves_no_subscription() {
        let (scanner, _engine, provider) = scanner_with(1);
        provider.set_unavailable(true);
        assert!(scanner.registry().subscribe().is_err());
        assert!(!scanner.registry().has_subscription());

        provider.set_unavailable(false);
        assert!(scanner.registry().subscribe().is_ok());
    }

    #[test]
    fn test_events_without_subscriber_are_dropped() {
        let (scanner, _engine, provider) = scanner_with(0);
        provider.attach(create_mock_entry(3, 0x113F, 0x1100));
        // no watch was running, so the registry never heard of it
        assert!(scanner.registry().is_empty());
        assert_eq!(scanner.registry().enumerate().len(), 1);
    }
}

// ============================================================================
// Permission Tests
// ============================================================================

mod permission {
    use super::*;

    #[tokio::test]
    async fn test_permission_grant_enables_open() {
        let (scanner, engine, provider) = scanner_with(0);
        engine.set_device_count(1);
        provider.attach_without_permission(create_mock_entry(1, 0x113F, 0x1100));
        let descriptors = scanner.registry().enumerate();
        assert_eq!(descriptors[0].permission, Permission::Unknown);

        let failure = scanner.open(0).unwrap_err();
        assert_eq!(failure.code, FailureCode::DeviceNotAccessible);

        let mut stream = scanner.registry().subscribe().unwrap();
        provider.set_auto_grant(true);
        scanner.registry().request_permission(DeviceId(1));

        assert!(matches!(
            next_event(&mut stream).await,
            DiscoveryEvent::PermissionResult { device: DeviceId(1), granted: true }
        ));
        assert_eq!(
            scanner.registry().device(DeviceId(1)).unwrap().permission,
            Permission::Granted
        );
        assert!(scanner.open(0).is_ok());
    }

    #[tokio::test]
    async fn test_permission_denied() {
        let (scanner, _engine, provider) = scanner_with(0);
        provider.attach_without_permission(create_mock_entry(2, 0x113F, 0x1100));
        scanner.registry().enumerate();
        let mut stream = scanner.registry().subscribe().unwrap();

        scanner.registry().request_permission(DeviceId(2));
        assert!(matches!(
            next_event(&mut stream).await,
            DiscoveryEvent::PermissionResult { granted: false, .. }
        ));
        assert_eq!(
            scanner.open(0).unwrap_err().code,
            FailureCode::DeviceNotAccessible
        );
    }

    /// Provider whose access check reads the registry it serves
    struct ReentrantProvider {
        inner: SimulatedProvider,
        registry: OnceLock<DeviceRegistry>,
    }

    impl UsbAccessProvider for ReentrantProvider {
        fn enumerate(&self) -> common::Result<Vec<UsbDeviceEntry>> {
            self.inner.enumerate()
        }

        fn has_permission(&self, device: DeviceId) -> bool {
            if let Some(registry) = self.registry.get() {
                let _ = registry.len();
            }
            self.inner.has_permission(device)
        }

        fn request_permission(&self, device: DeviceId, sink: HotplugSink) {
            self.inner.request_permission(device, sink)
        }

        fn open_transport(&self, device: DeviceId) -> common::Result<TransportHandle> {
            self.inner.open_transport(device)
        }

        fn release_transport(&self, transport: TransportHandle) {
            self.inner.release_transport(transport)
        }

        fn watch(&self, sink: HotplugSink) -> common::Result<WatchGuard> {
            self.inner.watch(sink)
        }
    }

    #[test]
    fn test_access_check_runs_outside_registry_lock() {
        let inner = SimulatedProvider::new();
        inner.attach_without_permission(create_mock_entry(6, 0x113F, 0x1100));
        let provider = Arc::new(ReentrantProvider {
            inner: inner.clone(),
            registry: OnceLock::new(),
        });
        let scanner = Scanner::new(
            Arc::new(SimulatedEngine::with_devices(1)),
            provider.clone(),
            ScannerSettings::default(),
        );
        let _ = provider.registry.set(scanner.registry().clone());
        scanner.registry().enumerate();
        assert_eq!(
            scanner.registry().device(DeviceId(6)).unwrap().permission,
            Permission::Unknown
        );

        // granted behind the registry's back, so open must ask the provider
        inner.set_permission(DeviceId(6), true);
        let (tx, rx) = mpsc::channel();
        let opener = scanner.clone();
        std::thread::spawn(move || {
            let _ = tx.send(opener.open(0).map(|_| ()));
        });

        let result = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("open blocked on the registry lock");
        assert!(result.is_ok());
        assert_eq!(
            scanner.registry().device(DeviceId(6)).unwrap().permission,
            Permission::Granted
        );
    }
}

// ============================================================================
// Open Progress Tests
// ============================================================================

mod open_progress {
    use super::*;

    #[test]
    fn test_progress_is_monotonic() {
        let (scanner, engine, _provider) = scanner_with(1);
        engine.set_open_progress(vec![0, 40, 20, 60, 100]);
        let mut stream = scanner.registry().subscribe().unwrap();

        let _session = scanner.open(0).unwrap();
        let progress: Vec<u8> = std::iter::from_fn(|| stream.try_next())
            .filter_map(|e| match e {
                DiscoveryEvent::InitProgress { index: 0, progress } => Some(progress),
                _ => None,
            })
            .collect();

        assert_eq!(progress, vec![0, 40, 60, 100]);
    }

    #[tokio::test]
    async fn test_open_async_delivers_session() {
        let (scanner, _engine, _provider) = scanner_with(1);
        let mut stream = scanner.registry().subscribe().unwrap();

        scanner.open_async(0).unwrap();
        assert_eq!(scanner.open(0).unwrap_err().code, FailureCode::DeviceBusy);

        let session = loop {
            match next_event(&mut stream).await {
                DiscoveryEvent::OpenComplete { index, result } => {
                    assert_eq!(index, 0);
                    break result.unwrap();
                }
                DiscoveryEvent::InitProgress { .. } => continue,
                other => panic!("unexpected discovery event {:?}", other),
            }
        };

        assert_eq!(session.index(), 0);
        assert_eq!(
            scanner.registry().describe(0).unwrap().open_state,
            OpenState::Open
        );
        assert_eq!(scanner.open(0).unwrap_err().code, FailureCode::DeviceBusy);
    }

    #[tokio::test]
    async fn test_open_async_failure_reported() {
        let (scanner, engine, provider) = scanner_with(1);
        engine.fail_next(SimOp::Open, -206);
        let mut stream = scanner.registry().subscribe().unwrap();

        scanner.open_async(0).unwrap();
        let failure = loop {
            if let DiscoveryEvent::OpenComplete { result, .. } = next_event(&mut stream).await {
                break result.unwrap_err();
            }
        };

        assert_eq!(failure.code, FailureCode::DeviceBusy);
        assert_eq!(
            scanner.registry().describe(0).unwrap().open_state,
            OpenState::Closed
        );
        assert!(!provider.is_transport_open(DeviceId(1)));
    }

    #[test]
    fn test_open_async_unknown_index() {
        let (scanner, _engine, _provider) = scanner_with(1);
        assert_eq!(
            scanner.open_async(4).unwrap_err().code,
            FailureCode::DeviceNotFound
        );
    }
}
