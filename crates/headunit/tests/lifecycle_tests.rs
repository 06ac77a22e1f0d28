//! Process lifecycle: startup, one session, and the ordered shutdown

use aoap::DeviceId;
use common::StopSignal;
use headunit::app::App;
use headunit::app::events;
use headunit::app::session::SessionState;
use headunit::executor::IoExecutorPool;
use headunit::test_utils::{
    DEFAULT_TEST_TIMEOUT, MockDevice, MockEventSource, RecordingFactory, negotiation_context_on,
    with_timeout,
};
use headunit::usb::{HubCore, QueryChain, UsbEventPump};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_shutdown_joins_every_worker() {
    let pool = IoExecutorPool::new(4).unwrap();
    let executor = pool.handle().clone();

    let stop = StopSignal::new();
    let pump = UsbEventPump::start(
        MockEventSource::new(),
        4,
        Duration::from_secs(180),
        stop.clone(),
    )
    .unwrap();

    let (events, inbox) = events::channel();
    let chain = Arc::new(QueryChain::new(negotiation_context_on(executor.clone())));
    let core = HubCore::new(chain, executor.clone(), events.clone());
    let factory = RecordingFactory::new();
    let app = App::new(Arc::new(factory.clone()), core.clone()).spawn(&executor, events, inbox);

    app.wait_for_device().unwrap();
    let (device, probe) = MockDevice::accessory(DeviceId::new(1, 42));

    executor.block_on(async {
        with_timeout(DEFAULT_TEST_TIMEOUT, async {
            while !core.is_watching() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(core.device_arrived(Box::new(device)));
        with_timeout(DEFAULT_TEST_TIMEOUT, app.wait_for_state(SessionState::Active))
            .await
            .unwrap()
            .unwrap();

        app.stop().await;
    });

    assert_eq!(factory.starts(), 1);
    assert_eq!(factory.stops(), 1);
    assert_eq!(probe.transports_closed(), 1);

    drop(core);
    assert_eq!(pump.shutdown(), 4);
    assert!(stop.is_raised());

    let stats = pool.shutdown(Duration::from_secs(5));
    assert_eq!(stats.started(), stats.stopped());
    assert_eq!(stats.alive(), 0);
}
