//! Drive the adaptive deadline scheduler against a simulated device.
//!
//! Requests arrive on a seeded random schedule, the device services up to
//! `--queue-depth` of them at once with a latency linear in size plus
//! jitter, and the scheduler's model learns that latency as it goes.

use adaptive_iosched::logging::init_logging;
use adaptive_iosched::metrics::{gather_text, SchedulerMetrics};
use adaptive_iosched::{
    ClassTable, Clock, ManualClock, ModelSnapshot, OpClass, Request, RequestId, Result, Scheduler,
    SchedulerConfig, SchedulerStats,
};
use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};

const SIZES: [u64; 7] = [512, 4096, 4096, 8192, 16384, 65536, 131072];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "iosched-sim", version, about = "Adaptive deadline I/O scheduler simulator")]
struct Args {
    /// Scheduler configuration as JSON; defaults are used for missing fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of requests to generate
    #[arg(long, default_value_t = 20_000)]
    requests: u64,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Mean gap between arrivals in microseconds
    #[arg(long, default_value_t = 20)]
    arrival_us: u64,

    /// Requests the device services concurrently
    #[arg(long, default_value_t = 32)]
    queue_depth: usize,

    /// Device latency for a request of 4 KiB or less, in microseconds
    #[arg(long, default_value_t = 80)]
    device_base_us: u64,

    /// Additional device latency per KiB above 4 KiB, in nanoseconds
    #[arg(long, default_value_t = 400)]
    device_ns_per_kib: u64,

    /// Uniform latency jitter as a percentage of the nominal latency
    #[arg(long, default_value_t = 10)]
    jitter_percent: u64,

    /// Percentage of reads; the rest is split between writes, discards and other
    #[arg(long, default_value_t = 60)]
    read_percent: u64,

    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Append the Prometheus exposition to the report
    #[arg(long)]
    metrics: bool,

    #[arg(long, default_value = "info")]
    log_level: Level,

    #[arg(long)]
    log_json: bool,
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
struct ClassReport {
    completed: u64,
    mean_latency_ns: u64,
    max_latency_ns: u64,
    deadline_misses: u64,
    #[serde(skip)]
    total_latency_ns: u64,
}

impl ClassReport {
    fn record(&mut self, latency: u64, missed: bool) {
        self.completed += 1;
        self.total_latency_ns = self.total_latency_ns.saturating_add(latency);
        self.max_latency_ns = self.max_latency_ns.max(latency);
        self.mean_latency_ns = self.total_latency_ns / self.completed;
        if missed {
            self.deadline_misses += 1;
        }
    }
}

#[derive(Debug, Serialize)]
struct Report {
    requests: u64,
    simulated_ns: u64,
    stats: SchedulerStats,
    classes: ClassTable<ClassReport>,
    models: ClassTable<ModelSnapshot>,
}

struct Device {
    base_ns: u64,
    ns_per_kib: u64,
    jitter_percent: u64,
}

impl Device {
    fn service_time(&self, size: u64, rng: &mut StdRng) -> u64 {
        let kib = size.saturating_sub(4096) / 1024;
        let nominal = self.base_ns + self.ns_per_kib * kib;
        let spread = nominal * self.jitter_percent / 100;
        if spread == 0 {
            return nominal.max(1);
        }
        (nominal - spread + rng.random_range(0..=2 * spread)).max(1)
    }
}

struct InFlight {
    request: Request,
    deadline: Option<u64>,
}

fn pick_class(rng: &mut StdRng, read_percent: u64) -> OpClass {
    let roll = rng.random_range(0..100);
    if roll < read_percent {
        return OpClass::Read;
    }
    match rng.random_range(0..10) {
        0 => OpClass::Discard,
        1 => OpClass::Other,
        _ => OpClass::Write,
    }
}

fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => SchedulerConfig::from_json_file(path)?,
        None => SchedulerConfig::default(),
    };
    let clock = Arc::new(ManualClock::new(0));
    let sched = Scheduler::with_clock(config, clock.clone())?;
    let device = Device {
        base_ns: args.device_base_us * 1_000,
        ns_per_kib: args.device_ns_per_kib,
        jitter_percent: args.jitter_percent.min(100),
    };
    let mut rng = StdRng::seed_from_u64(args.seed);

    info!(
        requests = args.requests,
        seed = args.seed,
        queue_depth = args.queue_depth,
        "starting simulation"
    );

    let mean_gap = args.arrival_us * 1_000;
    let mut next_id = 0u64;
    let mut next_arrival = 0u64;
    let mut completions: BinaryHeap<Reverse<(u64, RequestId)>> = BinaryHeap::new();
    let mut device_queue: HashMap<RequestId, InFlight> = HashMap::new();
    let mut classes: ClassTable<ClassReport> = ClassTable::default();

    loop {
        let arrivals_left = next_id < args.requests;
        let next_completion = completions.peek().map(|Reverse((at, _))| *at);
        let now = match (arrivals_left, next_completion) {
            (false, None) if !sched.has_work() => break,
            (false, None) => clock.now_ns(),
            (true, None) => next_arrival,
            (false, Some(at)) => at,
            (true, Some(at)) => at.min(next_arrival),
        };
        clock.set(now);

        while let Some(Reverse((at, id))) = completions.peek().copied() {
            if at > now {
                break;
            }
            completions.pop();
            if let Some(mut done) = device_queue.remove(&id) {
                let latency = now.saturating_sub(done.request.arrival_ns);
                let missed = done.deadline.is_some_and(|d| now > d);
                classes[done.request.op].record(latency, missed);
                sched.complete(&mut done.request, now);
            }
        }
        sched.tick(now);

        if arrivals_left && next_arrival <= now {
            let op = pick_class(&mut rng, args.read_percent.min(100));
            let size = match op {
                OpClass::Other => 0,
                _ => SIZES[rng.random_range(0..SIZES.len())],
            };
            sched.submit(Request::new(next_id, op, size, now))?;
            next_id += 1;
            next_arrival = now + rng.random_range(0..=2 * mean_gap);
        }

        while device_queue.len() < args.queue_depth.max(1) {
            let Some(mut request) = sched.next() else {
                break;
            };
            request.mark_started(now);
            let finish = now + device.service_time(request.size, &mut rng);
            completions.push(Reverse((finish, request.id)));
            let deadline = request.deadline();
            device_queue.insert(request.id, InFlight { request, deadline });
        }
    }

    sched.check_quiescent()?;

    let report = Report {
        requests: args.requests,
        simulated_ns: clock.now_ns(),
        stats: sched.stats(),
        classes,
        models: ClassTable::from_fn(|class| sched.model_snapshot(class)),
    };

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_text(&report),
    }

    if args.metrics {
        let registry = prometheus::Registry::new();
        let metrics = SchedulerMetrics::new(&registry)?;
        metrics.update(&sched);
        print!("{}", gather_text(&registry)?);
    }
    Ok(())
}

fn print_text(report: &Report) {
    println!(
        "simulated {} requests in {:.3} ms",
        report.requests,
        report.simulated_ns as f64 / 1e6
    );
    println!("{}", report.stats);
    for class in OpClass::ALL {
        let c = &report.classes[class];
        if c.completed == 0 {
            continue;
        }
        println!();
        println!(
            "[{}] completed {} mean {} ns max {} ns deadline misses {}",
            class, c.completed, c.mean_latency_ns, c.max_latency_ns, c.deadline_misses
        );
        println!("{}", report.models[class]);
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.log_level, args.log_json);

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
