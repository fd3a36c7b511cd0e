//! Integration tests for full refresh passes.
//!
//! These tests drive the engine against a simulated host and check the
//! accounting, the degraded paths and handle hygiene through the public API.

use taskshare::engine::{Engine, EngineError, EngineOptions};
use taskshare::kernel::simulated::{HostSnapshot, SimProcess, SimRegion, SimThread};
use taskshare::kernel::{ShareMode, SharedSegment, SimulatedKernel, ThreadRunState, TimeValue};
use taskshare::process::ProcessState;

const PAGE: u64 = 4096;

fn shared(address: u64, object_id: u32, ref_count: u32, pages: u32) -> SimRegion {
    SimRegion::new(address, pages as u64 * PAGE, ShareMode::Shared)
        .object(object_id, ref_count)
        .resident(0, pages)
}

fn refresh(kernel: &SimulatedKernel) -> taskshare::engine::Snapshot {
    Engine::new(EngineOptions::default())
        .refresh(kernel)
        .expect("refresh")
}

#[test]
fn test_empty_host_yields_empty_snapshot() {
    let kernel = SimulatedKernel::new(HostSnapshot::default());
    let snapshot = refresh(&kernel);
    assert!(snapshot.records.is_empty());
    assert_eq!(snapshot.totals.processes, 0);
    assert_eq!(snapshot.totals.max_pid, 0);
}

#[test]
fn test_denied_host_is_reported_as_host_access() {
    let kernel = SimulatedKernel::new(HostSnapshot {
        host_denied: true,
        ..HostSnapshot::default()
    });
    let result = Engine::new(EngineOptions::default()).refresh(&kernel);
    assert!(matches!(result, Err(EngineError::HostAccess(_))));
}

#[test]
fn test_degraded_processes_become_zombies() {
    let mut denied = SimProcess::new(10, "denied");
    denied.task_denied = true;
    let mut no_info = SimProcess::new(11, "noinfo");
    no_info.task_info_fails = true;
    let mut no_threads = SimProcess::new(12, "nothreads");
    no_threads.threads = None;
    let healthy = SimProcess::new(13, "healthy")
        .with_thread(SimThread::new(ThreadRunState::Running, 0));

    let kernel = SimulatedKernel::new(HostSnapshot::with_processes(vec![
        denied, no_info, no_threads, healthy,
    ]));
    let snapshot = refresh(&kernel);

    assert_eq!(snapshot.records.len(), 4);
    for pid in [10, 11, 12] {
        let record = snapshot.find(pid).expect("record");
        assert_eq!(record.state, ProcessState::Zombie, "pid {}", pid);
    }
    assert_eq!(snapshot.find(13).expect("record").state, ProcessState::Running);
    assert_eq!(snapshot.counters.zombies, 3);
    assert_eq!(snapshot.count(ProcessState::Zombie), 3);
    assert_eq!(snapshot.running(), 1);
}

#[test]
fn test_empty_bsd_slot_is_counted_but_not_listed() {
    let mut gone = SimProcess::new(20, "gone");
    gone.status = 0;
    let kernel = SimulatedKernel::new(HostSnapshot::with_processes(vec![
        SimProcess::new(1, "launchd"),
        gone,
    ]));
    let snapshot = refresh(&kernel);
    assert_eq!(snapshot.records.len(), 1);
    assert_eq!(snapshot.count(ProcessState::Zombie), 1);
    assert!(snapshot.find(20).is_none());
}

#[test]
fn test_every_handle_is_released() {
    let mut denied = SimProcess::new(30, "denied");
    denied.task_denied = true;
    let mut host = HostSnapshot::with_processes(vec![
        SimProcess::new(1, "launchd")
            .with_region(SimRegion::new(0x1000, PAGE, ShareMode::Private).resident(1, 0))
            .with_thread(SimThread::new(ThreadRunState::Waiting, 2))
            .with_thread(SimThread::new(ThreadRunState::Running, 0)),
        SimProcess::new(2, "taskshare")
            .with_thread(SimThread::new(ThreadRunState::Running, 0))
            .with_thread(SimThread::new(ThreadRunState::Waiting, 1)),
        denied,
    ]);
    host.self_pid = Some(2);
    let kernel = SimulatedKernel::new(host);

    let mut engine = Engine::new(EngineOptions::default());
    for _ in 0..3 {
        let snapshot = engine.refresh(&kernel).expect("refresh");
        assert_eq!(snapshot.records.len(), 3);
        assert_eq!(snapshot.find(2).expect("self").threads, 2);
        assert_eq!(kernel.outstanding_handles(), 0);
    }
    assert_eq!(kernel.self_task_releases(), 0);
}

#[test]
fn test_repeated_refresh_is_stable() {
    let kernel = SimulatedKernel::new(HostSnapshot::with_processes(vec![
        SimProcess::new(1, "a").with_region(shared(0x1000, 5, 2, 3)),
        SimProcess::new(2, "b").with_region(shared(0x1000, 5, 2, 3)),
        SimProcess::new(3, "c").with_region(shared(0x1000, 9, 1, 4)),
    ]));
    let mut engine = Engine::new(EngineOptions::default());
    let first = engine.refresh(&kernel).expect("first");
    let second = engine.refresh(&kernel).expect("second");

    assert_eq!(first.totals, second.totals);
    assert_eq!(engine.passes(), 2);
    assert_eq!(engine.alias_table().len(), 2);
    assert_eq!(kernel.outstanding_handles(), 0);
}

#[test]
fn test_object_shared_by_two_tasks_is_not_aliased() {
    let kernel = SimulatedKernel::new(HostSnapshot::with_processes(vec![
        SimProcess::new(1, "a").with_region(shared(0x1000, 5, 2, 3)),
        SimProcess::new(2, "b").with_region(shared(0x1000, 5, 2, 3)),
    ]));
    let snapshot = refresh(&kernel);
    for pid in [1, 2] {
        let record = snapshot.find(pid).expect("record");
        assert_eq!(record.shared_bytes, 3 * PAGE);
        assert_eq!(record.aliased_bytes, 0);
        assert_eq!(record.private_bytes, 0);
    }
    assert_eq!(snapshot.totals.aliased_bytes, 0);
}

#[test]
fn test_object_held_by_one_task_counts_as_private() {
    let kernel = SimulatedKernel::new(HostSnapshot::with_processes(vec![SimProcess::new(
        1, "solo",
    )
    .with_region(shared(0x1000, 7, 2, 2))
    .with_region(shared(0x100000, 7, 2, 2))]));
    let snapshot = refresh(&kernel);
    let record = snapshot.find(1).expect("record");
    assert_eq!(record.aliased_bytes, 2 * PAGE);
    assert_eq!(record.private_bytes, 2 * PAGE);
    assert_eq!(record.shared_bytes, 0);
    assert_eq!(record.virtual_private_bytes, 4 * PAGE);
}

#[test]
fn test_copy_on_write_depends_on_reference_count() {
    let kernel = SimulatedKernel::new(HostSnapshot::with_processes(vec![
        SimProcess::new(1, "single").with_region(
            SimRegion::new(0x1000, 8 * PAGE, ShareMode::CopyOnWrite)
                .object(40, 1)
                .resident(2, 3),
        ),
        SimProcess::new(2, "multi").with_region(
            SimRegion::new(0x1000, 8 * PAGE, ShareMode::CopyOnWrite)
                .object(41, 4)
                .resident(2, 3),
        ),
    ]));
    let snapshot = refresh(&kernel);

    let single = snapshot.find(1).expect("single");
    assert_eq!(single.private_bytes, 5 * PAGE);
    assert_eq!(single.shared_bytes, 0);

    let multi = snapshot.find(2).expect("multi");
    assert_eq!(multi.private_bytes, 2 * PAGE);
    assert_eq!(multi.shared_bytes, 3 * PAGE);
}

#[test]
fn test_thread_cpu_time_is_summed() {
    let mut p = SimProcess::new(5, "worker")
        .with_thread(
            SimThread::new(ThreadRunState::Waiting, 1)
                .cpu(TimeValue::new(1, 0), TimeValue::new(0, 500_000)),
        )
        .with_thread(
            SimThread::new(ThreadRunState::Waiting, 30)
                .cpu(TimeValue::new(2, 0), TimeValue::new(0, 0)),
        );
    p.user_time = TimeValue::new(10, 0);
    let kernel = SimulatedKernel::new(HostSnapshot::with_processes(vec![p]));
    let snapshot = refresh(&kernel);

    let record = snapshot.find(5).expect("record");
    assert_eq!(record.threads, 2);
    assert_eq!(record.state, ProcessState::Sleeping);
    assert_eq!(record.total_time.as_millis(), 13_500);
    assert_eq!(snapshot.totals.threads, 2);
}

#[test]
fn test_command_recovery_and_fallback() {
    let kernel = SimulatedKernel::new(HostSnapshot::with_processes(vec![
        SimProcess::new(1, "launchd").with_command_line("/sbin/launchd", &["/sbin/launchd"]),
        SimProcess::new(2, "mdworker_shar"),
        SimProcess::new(3, "xpcproxy")
            .with_command_line("/usr/libexec/xpcproxy", &["xpcproxy", "com.apple.mdworker"]),
        SimProcess::new(4, "sh").with_bare_arguments(b"/bin/sh\0-c\0"),
    ]));
    let snapshot = refresh(&kernel);
    assert_eq!(snapshot.find(1).expect("record").command, "launchd");
    assert_eq!(snapshot.find(2).expect("record").command, "(mdworker_shar)");
    assert_eq!(snapshot.find(3).expect("record").command, "xpcproxy");
    assert_eq!(snapshot.find(4).expect("record").command, "sh");
    assert_eq!(snapshot.counters.command_fallbacks, 1);
}

#[test]
fn test_command_recovered_with_thousands_of_arguments() {
    let argv: Vec<String> = std::iter::once("/usr/local/bin/rsync".to_string())
        .chain((0..4999).map(|i| format!("file{}", i)))
        .collect();
    let argv: Vec<&str> = argv.iter().map(String::as_str).collect();
    let kernel = SimulatedKernel::new(HostSnapshot::with_processes(vec![SimProcess::new(
        8, "rsync",
    )
    .with_command_line("/usr/local/bin/rsync", &argv)]));

    let snapshot = refresh(&kernel);
    let record = snapshot.find(8).expect("record");
    assert_eq!(record.command, "rsync");
    assert_eq!(snapshot.counters.command_fallbacks, 0);
}

fn reserved_empty(address: u64) -> SimRegion {
    let mut region = SimRegion::new(address, PAGE, ShareMode::Empty);
    region.reserved = true;
    region
}

#[test]
fn test_split_segment_corrects_virtual_size_once() {
    let segment = SharedSegment::LEGACY;
    let reported = segment.reserved_size() + 10 * PAGE;
    let mut host = HostSnapshot::with_processes(vec![
        SimProcess::new(1, "split")
            .with_sizes(reported, 4 * PAGE)
            .with_region(SimRegion::new(0x1000, PAGE, ShareMode::Private).resident(1, 0))
            .with_region(reserved_empty(segment.text_base))
            .with_region(reserved_empty(segment.text_base + 0x10_0000))
            .with_region(reserved_empty(segment.data_base)),
        SimProcess::new(2, "unsplit").with_sizes(reported, 4 * PAGE).with_region(
            SimRegion::new(segment.text_base, PAGE, ShareMode::Shared)
                .object(3, 9)
                .resident(0, 1),
        ),
    ]);
    host.shared_segment = segment;
    let kernel = SimulatedKernel::new(host);
    let snapshot = refresh(&kernel);

    assert_eq!(snapshot.find(1).expect("split").virtual_size, 10 * PAGE);
    assert_eq!(snapshot.find(2).expect("unsplit").virtual_size, reported);
    assert_eq!(snapshot.totals.virtual_bytes, 10 * PAGE + reported);
}

#[test]
fn test_virtual_size_correction_saturates() {
    let segment = SharedSegment::LEGACY;
    let mut host = HostSnapshot::with_processes(vec![SimProcess::new(1, "small")
        .with_sizes(5 * PAGE, PAGE)
        .with_region(reserved_empty(segment.text_base))
        .with_region(reserved_empty(segment.data_base))]);
    host.shared_segment = segment;
    let kernel = SimulatedKernel::new(host);
    let snapshot = refresh(&kernel);

    assert_eq!(snapshot.find(1).expect("record").virtual_size, 0);
}

#[test]
fn test_port_counts_are_optional() {
    let mut no_ports = SimProcess::new(2, "b");
    no_ports.ports = None;
    let mut with_ports = SimProcess::new(1, "a");
    with_ports.ports = Some(42);
    let kernel = SimulatedKernel::new(HostSnapshot::with_processes(vec![with_ports, no_ports]));

    let snapshot = refresh(&kernel);
    assert_eq!(snapshot.find(1).expect("record").ports, Some(42));
    assert_eq!(snapshot.find(2).expect("record").ports, None);

    let snapshot = Engine::new(EngineOptions {
        collect_port_counts: false,
        ..EngineOptions::default()
    })
    .refresh(&kernel)
    .expect("refresh");
    assert_eq!(snapshot.find(1).expect("record").ports, None);
}

#[test]
fn test_records_are_sorted_by_pid_and_max_pid_tracked() {
    let kernel = SimulatedKernel::new(HostSnapshot::with_processes(vec![
        SimProcess::new(300, "c"),
        SimProcess::new(1, "a"),
        SimProcess::new(42, "b"),
    ]));
    let snapshot = refresh(&kernel);
    let pids: Vec<i32> = snapshot.records.iter().map(|r| r.pid).collect();
    assert_eq!(pids, vec![1, 42, 300]);
    assert_eq!(snapshot.totals.max_pid, 300);
}
