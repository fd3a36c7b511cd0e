//! Generate testdata command implementation.
//!
//! Writes a synthetic host snapshot that the simulated kernel can serve.
//! Shared objects are mapped into random subsets of processes so that some
//! of them end up mapped by a single task and are detected as aliased.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use taskshare::kernel::simulated::{HostSnapshot, SimProcess, SimRegion, SimThread};
use taskshare::kernel::{ShareMode, SharedSegment, ThreadRunState, TimeValue};
use tracing::{debug, info};

const PAGE: u64 = 4096;
const MB: u64 = 1024 * 1024;

/// First address handed to ordinary regions; the shared segment lies above.
const REGION_BASE: u64 = 0x0000_1000;
const REGION_STRIDE: u64 = 0x0100_0000;

const NAMES: &[(&str, &str)] = &[
    ("launchd", "/sbin/launchd"),
    ("WindowServer", "/System/Library/PrivateFrameworks/SkyLight.framework/Resources/WindowServer"),
    ("Finder", "/System/Library/CoreServices/Finder.app/Contents/MacOS/Finder"),
    ("Dock", "/System/Library/CoreServices/Dock.app/Contents/MacOS/Dock"),
    ("mds", "/System/Library/Frameworks/CoreServices.framework/Frameworks/Metadata.framework/Support/mds"),
    ("mdworker", "/System/Library/Frameworks/CoreServices.framework/Frameworks/Metadata.framework/Versions/A/Support/mdworker"),
    ("coreaudiod", "/usr/sbin/coreaudiod"),
    ("configd", "/usr/libexec/configd"),
    ("syslogd", "/usr/sbin/syslogd"),
    ("sshd", "/usr/sbin/sshd"),
    ("bash", "/bin/bash"),
    ("zsh", "/bin/zsh"),
    ("Safari", "/Applications/Safari.app/Contents/MacOS/Safari"),
    ("Mail", "/Applications/Mail.app/Contents/MacOS/Mail"),
    ("Terminal", "/Applications/Utilities/Terminal.app/Contents/MacOS/Terminal"),
    ("postgres", "/usr/local/bin/postgres"),
    ("nginx", "/usr/local/sbin/nginx"),
    ("python3", "/usr/bin/python3"),
];

const THREAD_STATES: &[ThreadRunState] = &[
    ThreadRunState::Running,
    ThreadRunState::Waiting,
    ThreadRunState::Waiting,
    ThreadRunState::Waiting,
    ThreadRunState::Uninterruptible,
    ThreadRunState::Stopped,
];

fn random_time(rng: &mut StdRng, max_seconds: u32) -> TimeValue {
    TimeValue::new(rng.gen_range(0..=max_seconds), rng.gen_range(0..1_000_000))
}

fn random_thread(rng: &mut StdRng) -> SimThread {
    let state = *THREAD_STATES
        .choose(rng)
        .unwrap_or(&ThreadRunState::Waiting);
    let mut thread = SimThread::new(state, rng.gen_range(0..60)).cpu(
        random_time(rng, 300),
        random_time(rng, 120),
    );
    thread.swapped = rng.gen_bool(0.05);
    thread.idle = rng.gen_bool(0.02);
    thread
}

/// Builds a synthetic host.
pub fn generate_host(processes: usize, shared_objects: usize, seed: Option<u64>) -> HostSnapshot {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let segment = SharedSegment::LEGACY;

    let mut procs: Vec<SimProcess> = Vec::with_capacity(processes + 1);
    let mut kernel_task = SimProcess::new(0, "kernel_task");
    kernel_task.ppid = 0;
    kernel_task.regions.push(
        SimRegion::new(REGION_BASE, 512 * MB, ShareMode::Private).resident(64 * 1024, 0),
    );
    for _ in 0..rng.gen_range(40..80) {
        let thread = random_thread(&mut rng);
        kernel_task = kernel_task.with_thread(thread);
    }
    procs.push(kernel_task);

    let mut next_pid = 1;
    for i in 0..processes {
        let (comm, path) = NAMES[i % NAMES.len()];
        let mut p = SimProcess::new(next_pid, comm);
        p.ppid = if next_pid == 1 { 0 } else { 1 };
        p.uid = if rng.gen_bool(0.6) { 0 } else { 501 };
        p.user_time = random_time(&mut rng, 30);
        p.system_time = random_time(&mut rng, 10);
        p.ports = Some(rng.gen_range(10..2000));
        next_pid += rng.gen_range(1..40);

        // Private heap and stack regions.
        let mut address = REGION_BASE;
        for _ in 0..rng.gen_range(2..6) {
            let pages = rng.gen_range(16..4096u64);
            let resident = rng.gen_range(1..=pages) as u32;
            p.regions.push(
                SimRegion::new(address, pages * PAGE, ShareMode::Private).resident(resident, 0),
            );
            address += REGION_STRIDE;
        }

        // Copy-on-write image with an occasional single reference.
        let cow_pages = rng.gen_range(64..1024u64);
        let cow_ref = if rng.gen_bool(0.3) { 1 } else { 3 };
        p.regions.push(
            SimRegion::new(address, cow_pages * PAGE, ShareMode::CopyOnWrite)
                .object(100_000 + i as u32, cow_ref)
                .resident(rng.gen_range(0..32), rng.gen_range(0..cow_pages as u32)),
        );

        // Framework pages inside the shared segment.
        if rng.gen_bool(0.7) {
            p.regions.push(
                SimRegion::new(segment.text_base, 16 * MB, ShareMode::Shared)
                    .resident(rng.gen_range(0..64), 2048),
            );
        }
        if rng.gen_bool(0.2) {
            let mut empty = SimRegion::new(segment.data_base, segment.data_size, ShareMode::Empty);
            empty.reserved = true;
            p.regions.push(empty);
        }

        for _ in 0..rng.gen_range(1..12) {
            let thread = random_thread(&mut rng);
            p = p.with_thread(thread);
        }

        if rng.gen_bool(0.9) {
            let pid_file = format!("/var/run/{}.pid", comm);
            p = p.with_command_line(path, &[path, "--pid-file", &pid_file]);
        }
        // A sandboxed process now and then refuses its task port.
        if i % 25 == 24 {
            p.task_denied = true;
        }
        procs.push(p);
    }

    // Map each shared object into a random subset of processes, placed above
    // the shared segment so the per-process regions stay ordered.
    let shared_base = segment.data_base + segment.data_size;
    let user_procs = procs.len() - 1;
    for object in 0..shared_objects {
        if user_procs == 0 {
            break;
        }
        let mappers = if object % 4 == 0 {
            1
        } else {
            rng.gen_range(1..=user_procs.min(8))
        };
        let mut indices: Vec<usize> = (1..procs.len()).collect();
        indices.shuffle(&mut rng);
        indices.truncate(mappers);

        let pages = rng.gen_range(8..512u64);
        let resident = rng.gen_range(1..=pages) as u32;
        for index in indices {
            procs[index].regions.push(
                SimRegion::new(
                    shared_base + object as u64 * REGION_STRIDE,
                    pages * PAGE,
                    ShareMode::Shared,
                )
                .object(1 + object as u32, mappers as u32)
                .resident(0, resident),
            );
        }
    }

    for p in procs.iter_mut() {
        p.regions.sort_by_key(|r| r.address);
        let virtual_size: u64 = p.regions.iter().map(|r| r.size).sum();
        let resident_pages: u64 = p
            .regions
            .iter()
            .map(|r| (r.private_pages_resident + r.shared_pages_resident) as u64)
            .sum();
        p.virtual_size = virtual_size;
        p.resident_size = resident_pages * PAGE;
    }

    let mut host = HostSnapshot::with_processes(procs);
    host.generated_at = Some(Utc::now().to_rfc3339());
    host.page_size = PAGE;
    host.shared_segment = segment;
    host
}

/// Generates a synthetic host snapshot JSON file.
pub fn command_generate_testdata(
    output: PathBuf,
    processes: usize,
    shared_objects: usize,
    seed: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    debug!(
        "Generating test data: processes={}, shared_objects={}, output={}",
        processes,
        shared_objects,
        output.display()
    );

    let host = generate_host(processes, shared_objects, seed);
    host.save(&output)?;

    let regions: usize = host.processes.iter().map(|p| p.regions.len()).sum();
    info!("Wrote {} processes to {}", host.processes.len(), output.display());
    println!("✅ Test data written to: {}", output.display());
    println!(
        "   📊 {} processes, {} regions, {} shared objects",
        host.processes.len(),
        regions,
        shared_objects
    );
    println!("   ▶️  Serve it with: taskshare -t {}", output.display());
    Ok(())
}
