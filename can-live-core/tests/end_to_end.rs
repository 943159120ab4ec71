// End-to-end behavior of worker + registry driven through the Monitor
use can_live_core::device::{ScriptedDriver, Step};
use can_live_core::{Monitor, MonitorConfig, MonitorObserver, Selector, WorkerState};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Collector {
    elapsed: Vec<f64>,
    created: Vec<Selector>,
    disconnects: usize,
}

impl MonitorObserver for Collector {
    fn on_frame_received(&mut self, elapsed: f64, _id: u32, _payload_hex: &str) {
        self.elapsed.push(elapsed);
    }

    fn on_channel_created(&mut self, selector: Selector) {
        self.created.push(selector);
    }

    fn on_disconnected(&mut self, _reason: &str) {
        self.disconnects += 1;
    }
}

fn pump_frames(monitor: &mut Monitor<ScriptedDriver>, collector: &mut Collector, frames: usize) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while collector.elapsed.len() < frames {
        assert!(Instant::now() < deadline, "timed out waiting for {} frames", frames);
        monitor.pump(collector, Duration::from_millis(10));
    }
}

fn bus_trace() -> Vec<Step> {
    vec![
        Step::frame(10.000, 0x100, &[0xAA]).unwrap(),
        Step::echo(1, 10.0005, 0x100, &[0x55]).unwrap(),
        Step::frame(10.001, 0x100, &[0xBB]).unwrap(),
        Step::frame(10.900, 0x200, &[0xCC]).unwrap(),
    ]
}

fn entries(monitor: &Monitor<ScriptedDriver>, selector: Selector) -> Vec<String> {
    monitor
        .registry()
        .get(selector)
        .map(|channel| channel.entries().map(str::to_string).collect())
        .unwrap_or_default()
}

#[test]
fn test_trace_with_dedicated_channel() {
    let mut monitor = Monitor::new(ScriptedDriver::new(bus_trace()), MonitorConfig::default());
    monitor.ensure_channel(Selector::Id(0x100));
    let mut collector = Collector::default();

    monitor.start(500_000, &mut collector).unwrap();
    pump_frames(&mut monitor, &mut collector, 3);
    monitor.stop();

    // Echo frame dropped, times relative to the first accepted frame
    let expected = [0.000, 0.001, 0.900];
    assert_eq!(collector.elapsed.len(), 3);
    for (got, want) in collector.elapsed.iter().zip(expected) {
        assert!((got - want).abs() < 1e-9, "elapsed {} != {}", got, want);
    }

    assert_eq!(
        entries(&monitor, Selector::Id(0x100)),
        vec![" +99.99s AA 0.00s", "  +1.0ms BB 0.00s"]
    );
    assert_eq!(
        entries(&monitor, Selector::CatchAll),
        vec![" +99.99s ID 0x200: [CC] 0.90s"]
    );
}

#[test]
fn test_trace_on_catch_all_only() {
    let mut monitor = Monitor::new(ScriptedDriver::new(bus_trace()), MonitorConfig::default());
    let mut collector = Collector::default();

    monitor.start(500_000, &mut collector).unwrap();
    pump_frames(&mut monitor, &mut collector, 3);
    monitor.stop();

    assert_eq!(
        entries(&monitor, Selector::CatchAll),
        vec![
            " +99.99s ID 0x100: [AA] 0.00s",
            "  +1.0ms ID 0x100: [BB] 0.00s",
            "+899.0ms ID 0x200: [CC] 0.90s",
        ]
    );
}

#[test]
fn test_auto_add_creates_each_channel_once() {
    let trace = vec![
        Step::frame(1.0, 0x100, &[0x01]).unwrap(),
        Step::frame(1.1, 0x100, &[0x02]).unwrap(),
        Step::frame(1.2, 0x100, &[0x03]).unwrap(),
        Step::frame(1.3, 0x200, &[0x04]).unwrap(),
    ];
    let mut monitor = Monitor::new(ScriptedDriver::new(trace), MonitorConfig::default());
    monitor.set_auto_add(true);
    let mut collector = Collector::default();

    monitor.start(500_000, &mut collector).unwrap();
    pump_frames(&mut monitor, &mut collector, 4);
    monitor.stop();

    assert_eq!(collector.created, vec![Selector::Id(0x100), Selector::Id(0x200)]);
    assert_eq!(
        entries(&monitor, Selector::CatchAll),
        vec![
            " +99.99s ID 0x100: [01] 0.00s",
            "+300.0ms ID 0x200: [04] 0.30s",
        ]
    );
    assert_eq!(entries(&monitor, Selector::Id(0x100)).len(), 2);
    assert!(entries(&monitor, Selector::Id(0x200)).is_empty());
}

#[test]
fn test_restart_resets_channel_clocks() {
    let driver = ScriptedDriver::with_runs(vec![
        vec![
            Step::frame(50.0, 0x100, &[0x01]).unwrap(),
            Step::frame(50.2, 0x100, &[0x02]).unwrap(),
        ],
        vec![Step::frame(7.0, 0x100, &[0x03]).unwrap()],
    ]);
    let mut monitor = Monitor::new(driver, MonitorConfig::default());
    monitor.ensure_channel(Selector::Id(0x100));
    let mut collector = Collector::default();

    monitor.start(500_000, &mut collector).unwrap();
    pump_frames(&mut monitor, &mut collector, 2);
    monitor.stop();
    assert_eq!(monitor.state(), WorkerState::Stopped);

    monitor.start(500_000, &mut collector).unwrap();
    pump_frames(&mut monitor, &mut collector, 3);
    monitor.stop();

    let log = entries(&monitor, Selector::Id(0x100));
    assert_eq!(log.len(), 3);
    assert_eq!(log[1], "+200.0ms 02 0.20s");
    // First entry of the new run does not reference the previous run
    assert_eq!(log[2], " +99.99s 03 0.00s");
    assert_eq!(monitor.worker().driver().opened(), 2);
    assert_eq!(monitor.worker().driver().stopped(), 2);
}

#[test]
fn test_mid_stream_failure() {
    let _ = env_logger::builder().is_test(true).try_init();

    // Second open gets a silent adapter
    let driver = ScriptedDriver::with_runs(vec![vec![
        Step::frame(3.0, 0x100, &[0x01]).unwrap(),
        Step::Fail("device unplugged".to_string()),
        Step::frame(3.1, 0x100, &[0x02]).unwrap(),
    ]]);
    let mut monitor = Monitor::new(driver, MonitorConfig::default());
    let mut collector = Collector::default();
    monitor.start(500_000, &mut collector).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while collector.disconnects == 0 {
        assert!(Instant::now() < deadline, "no disconnect reported");
        monitor.pump(&mut collector, Duration::from_millis(10));
    }
    // Give a stray frame every chance to show up
    monitor.pump(&mut collector, Duration::from_millis(50));

    assert_eq!(collector.disconnects, 1);
    assert_eq!(collector.elapsed.len(), 1);
    assert_eq!(monitor.state(), WorkerState::Disconnected);
    assert_eq!(monitor.worker().driver().stopped(), 1);

    // The user may start again after a disconnect
    monitor.start(500_000, &mut collector).unwrap();
    monitor.stop();
    assert_eq!(monitor.state(), WorkerState::Stopped);
}

#[test]
fn test_channel_capacity_bound() {
    let trace: Vec<Step> = (0..250)
        .map(|i| Step::frame(i as f64 * 0.01, 0x100, &[i as u8]).unwrap())
        .collect();
    let mut monitor = Monitor::new(ScriptedDriver::new(trace), MonitorConfig::default());
    let mut collector = Collector::default();

    monitor.start(500_000, &mut collector).unwrap();
    pump_frames(&mut monitor, &mut collector, 250);
    monitor.stop();

    let log = entries(&monitor, Selector::CatchAll);
    assert_eq!(log.len(), 200);
    assert!(log[0].contains("[32]"), "oldest kept entry is frame 50: {}", log[0]);
    assert!(log[199].contains("[F9]"));
}
