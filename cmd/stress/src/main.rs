//! Stress test - many clients, one object
//!
//! N threads each get their own portal and ping the same example object.
//! Every ping must be counted exactly once: the object's monitor admits
//! one handler at a time no matter how many threads invoke it.
//!
//! Usage: stress [threads] [pings-per-thread] [home-place]

use kinv::stubs::{get_debug_info, ExampleCap, KernelMemoryCap};
use kinv::{caps, CapPtr, Kernel, KResult, Portal, RuntimeConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Instant;

const OBJECT: ExampleCap = ExampleCap(CapPtr(10));
const FIRST_PORTAL: u32 = 16;

fn arg<T: std::str::FromStr>(n: usize) -> Option<T> {
    std::env::args().nth(n).and_then(|s| s.parse().ok())
}

fn client(kernel: &Arc<Kernel>, cap: CapPtr, barrier: &Barrier, pings: usize, failed: &AtomicU64) -> KResult<()> {
    let portal = Portal::boot(kernel, cap);
    barrier.wait();
    let portal = portal?;
    let mut lock = portal.lock();
    for _ in 0..pings {
        let f = OBJECT.ping(lock, 100);
        if f.wait().is_err() {
            failed.fetch_add(1, Ordering::Relaxed);
        }
        lock = f.reuse();
    }
    Ok(())
}

fn main() {
    println!("=== kinv Stress Test ===\n");

    let num_threads: usize = arg(1).unwrap_or(8);
    let pings: usize = arg(2).unwrap_or(10_000);
    let home: Option<u16> = arg(3);

    let config = RuntimeConfig::from_env()
        .num_places(4)
        .cap_table_slots(FIRST_PORTAL as usize + num_threads + 1);

    let kernel = match Kernel::boot(config) {
        Ok(k) => k,
        Err(e) => {
            eprintln!("boot failed: {}", e);
            std::process::exit(1);
        }
    };

    let setup = || -> KResult<Portal> {
        let portal = Portal::boot(&kernel, CapPtr(8))?;
        {
            let root = KernelMemoryCap(caps::ROOT_MEMORY);
            let f = root.create_example(portal.lock(), caps::EXAMPLE_FACTORY, OBJECT.0);
            f.wait()?;
            if let Some(place) = home {
                let f = OBJECT.move_home(f.reuse(), place);
                f.wait()?;
            }
        }
        Ok(portal)
    };
    let portal = match setup() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("setup failed: {}", e);
            std::process::exit(1);
        }
    };

    println!("Threads:         {}", num_threads);
    println!("Pings/thread:    {}", pings);
    println!("Object home:     {}", home.map_or("caller".to_string(), |p| format!("place {}", p)));

    let barrier = Arc::new(Barrier::new(num_threads + 1));
    let failed = Arc::new(AtomicU64::new(0));

    let handles: Vec<_> = (0..num_threads)
        .map(|i| {
            let kernel = Arc::clone(&kernel);
            let barrier = Arc::clone(&barrier);
            let failed = Arc::clone(&failed);
            let cap = CapPtr(FIRST_PORTAL + i as u32);
            std::thread::Builder::new()
                .name(format!("client-{}", i))
                .spawn(move || client(&kernel, cap, &barrier, pings, &failed))
        })
        .collect();

    barrier.wait();
    let start = Instant::now();

    let mut spawn_errors = 0;
    for h in handles {
        match h {
            Ok(h) => match h.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    eprintln!("client failed: {}", e);
                    spawn_errors += 1;
                }
                Err(_) => spawn_errors += 1,
            },
            Err(e) => {
                eprintln!("spawn failed: {}", e);
                spawn_errors += 1;
            }
        }
    }
    let elapsed = start.elapsed();

    let expected = (num_threads - spawn_errors) * pings;
    let info = get_debug_info(portal.lock(), OBJECT.0).wait();

    println!("\n=== Results ===");
    println!("Calls:           {}", expected);
    println!("Failed calls:    {}", failed.load(Ordering::Relaxed));
    println!("Time:            {:?}", elapsed);
    println!("Throughput:      {:.0} calls/sec", expected as f64 / elapsed.as_secs_f64());

    let ok = match info {
        Ok(info) => {
            let text = info.text();
            println!("Object:          {}", text);
            text.contains(&format!(" {} pings", expected))
        }
        Err(e) => {
            println!("Object:          debug info failed: {}", e);
            false
        }
    };
    println!("Exclusivity:     {}", if ok { "every ping counted once" } else { "MISMATCH" });

    kernel.shutdown();
    println!("\n=== Stress Test Complete ===");
    if !ok || failed.load(Ordering::Relaxed) > 0 || spawn_errors > 0 {
        std::process::exit(1);
    }
}
