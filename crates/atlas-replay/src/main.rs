//! Atlas replay - synthetic workload driver.
//!
//! Drives the order book, the resource pool and the scheduler with
//! deterministic synthetic load and prints latency distributions.
//!
//! `RUST_LOG=atlas_sched=debug cargo run -p atlas-replay --release` shows the
//! scheduler's event-loop decisions alongside the summaries.

use std::time::{Duration, Instant};

use atlas_book::{OrderBook, OrderId, Price, Side, Size, Submit};
use atlas_metrics::{format_nanos, LatencyHistogram, MonotonicTimer};
use atlas_pool::Pool;
use atlas_sched::{Scheduler, SchedulerConfig};
use tracing_subscriber::EnvFilter;

const BOOK_INSERTS: u64 = 100_000;
const BOOK_CROSSES: u64 = 20_000;
const POOL_CYCLES: u64 = 100_000;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("atlas replay - synthetic workload driver");
    println!();

    let timer = MonotonicTimer::new();

    println!("[1/3] order book");
    run_book_phase(&timer);
    println!();

    println!("[2/3] resource pool");
    run_pool_phase(&timer);
    println!();

    println!("[3/3] scheduler");
    run_sched_phase();
}

fn run_book_phase(timer: &MonotonicTimer) {
    let mut book = OrderBook::new(Price(100_000), Price(1));
    let mut insert = LatencyHistogram::new();
    let mut cross = LatencyHistogram::new();
    let mut cancel = LatencyHistogram::new();
    let mut amend = LatencyHistogram::new();

    // Build resting depth: 100 levels a side around 50_000.
    let mut resting: Vec<OrderId> = Vec::with_capacity(BOOK_INSERTS as usize);
    for i in 0..BOOK_INSERTS {
        let side = if i % 2 == 0 { Side::Bid } else { Side::Offer };
        let price = if side.is_bid() {
            50_000 - (i % 100)
        } else {
            50_001 + (i % 100)
        };

        let t0 = timer.now();
        let submit = book
            .add_order(Price(price), Size(10), side)
            .expect("synthetic insert parameters are valid");
        insert.record(timer.nanos_between(t0, timer.now()));

        if let Submit::Resting { order_id } = submit {
            resting.push(order_id);
        }
    }

    // Marketable flow across the spread, alternating sides.
    for i in 0..BOOK_CROSSES {
        let (price, side) = if i % 2 == 0 {
            (50_004, Side::Bid)
        } else {
            (49_997, Side::Offer)
        };

        let t0 = timer.now();
        let _ = book.add_order(Price(price), Size(25), side);
        cross.record(timer.nanos_between(t0, timer.now()));
    }

    // Cancel a slice of the resting orders, amend another.
    for id in resting.iter().step_by(7) {
        let t0 = timer.now();
        let _ = book.cancel(*id);
        cancel.record(timer.nanos_between(t0, timer.now()));
    }
    for id in resting.iter().skip(3).step_by(11) {
        if let atlas_book::OrderStatus::Active(state) = book.order_status(*id) {
            let t0 = timer.now();
            let _ = book.update(*id, Price(50_000), Size(state.filled_size.as_raw() + 30));
            amend.record(timer.nanos_between(t0, timer.now()));
        }
    }

    insert.print_summary("insert");
    cross.print_summary("crossing submit");
    cancel.print_summary("cancel");
    amend.print_summary("amend");

    let l1 = book.l1();
    println!(
        "final book: {} active / {} done, best bid {:?}, best offer {:?}",
        book.active_orders(),
        book.done_orders(),
        l1.best_bid.map(|level| level.price.as_raw()),
        l1.best_offer.map(|level| level.price.as_raw()),
    );
}

fn run_pool_phase(timer: &MonotonicTimer) {
    let pool: Pool<Vec<u8>> = Pool::with_factory(|| vec![0_u8; 64 * 1024]);
    let mut acquire = LatencyHistogram::new();

    for _ in 0..POOL_CYCLES {
        let t0 = timer.now();
        let lease = pool.acquire();
        acquire.record(timer.nanos_between(t0, timer.now()));
        drop(lease);
    }

    acquire.print_summary("acquire + release");
    println!(
        "buffers built for {} cycles: {} (recycling)",
        POOL_CYCLES,
        pool.created()
    );

    let burst: Vec<_> = (0..8).map(|_| pool.acquire()).collect();
    drop(burst);
    println!(
        "after a burst of 8 concurrent leases: built {}, idle {}",
        pool.created(),
        pool.idle_count()
    );
}

fn run_sched_phase() {
    let start = Instant::now();
    let config = SchedulerConfig {
        max_runtime: Duration::from_secs(2),
        ..SchedulerConfig::default()
    };
    let sched = Scheduler::spawn_with(start, config);

    // Staggered one-shots plus one repeating task, cancelled partway.
    let mut deadlines = Vec::new();
    for i in 0..20u64 {
        let at = start + Duration::from_millis(40 + i * 20);
        let id = sched
            .schedule_once(at, Duration::from_millis(1))
            .expect("scheduler accepts tasks while running");
        deadlines.push((id, at));
    }
    let repeating = sched
        .schedule_repeated(start + Duration::from_millis(50), Duration::from_millis(100), Duration::from_millis(2))
        .expect("scheduler accepts tasks while running");

    std::thread::sleep(Duration::from_millis(600));
    sched
        .cancel(repeating)
        .expect("repeating task is cancellable while running");

    let history = sched.history();
    let mut jitter = LatencyHistogram::new();
    let mut repeats = 0usize;
    for run in &history {
        match deadlines.iter().find(|(id, _)| *id == run.id) {
            Some((_, deadline)) => {
                jitter.record(run.started_at.saturating_duration_since(*deadline).as_nanos() as u64)
            }
            None => repeats += 1,
        }
    }

    jitter.print_summary("dispatch jitter (start - deadline)");
    println!(
        "{} one-shot dispatches, {} repeating dispatches before cancel (worst jitter {})",
        jitter.count(),
        repeats,
        format_nanos(jitter.max())
    );

    drop(sched);
}
