//! kinv End-to-End Smoke Test
//!
//! Boots the in-process kernel and walks one portal through every object:
//!   Part A: boot and the root capability space
//!   Part B: example object (create, print, ping, move home, debug info)
//!   Part C: kernel memory (child memory, properties, exhaustion, delete)
//!   Part D: capmaps and portals
//!
//! Run: KINV_LOG_LEVEL=info ./target/release/kinv-smoke

use kinv::protocol::example::Ping;
use kinv::protocol::kernel_memory::CreateBase;
use kinv::stubs::{get_debug_info, ExampleCap, KernelMemoryCap};
use kinv::{caps, CapPtr, CapPtrDepth, Error, Kernel, Portal, RuntimeConfig};

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

const PORTAL: CapPtr = CapPtr(8);

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    /// Record the outcome of a call that should succeed
    fn expect_ok<T>(&mut self, name: &str, res: Result<T, Error>) -> Option<T> {
        match res {
            Ok(v) => {
                self.pass(name);
                Some(v)
            }
            Err(e) => {
                self.fail(name, &e.to_string());
                None
            }
        }
    }

    fn expect_err<T>(&mut self, name: &str, res: Result<T, Error>, want: Error) {
        match res {
            Err(e) if e == want => self.pass(name),
            Err(e) => self.fail(name, &format!("got {}, want {}", e, want)),
            Ok(_) => self.fail(name, &format!("succeeded, want {}", want)),
        }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

// ════════════════════════════════════════════════════════════
// Part A: Boot
// ════════════════════════════════════════════════════════════

fn test_boot(t: &mut TestRunner) -> Option<(Arc<Kernel>, Portal)> {
    t.section("Part A: Boot");

    let config = RuntimeConfig::from_env().num_places(2);
    config.print();

    t.expect_err("invalid config rejected", Kernel::boot(config.clone().num_places(0)), Error::InvalidArgument);

    let kernel = t.expect_ok("kernel boots", Kernel::boot(config))?;
    let portal = t.expect_ok("portal at slot 8", Portal::boot(&kernel, PORTAL))?;
    t.expect_err("slot 8 now taken", kernel.boot_portal(PORTAL), Error::CapNonempty);

    let info = get_debug_info(portal.lock(), caps::ROOT_MEMORY).wait();
    if let Some(info) = t.expect_ok("root memory debug info", info) {
        println!("       {}", info.text());
    }
    Some((kernel, portal))
}

// ════════════════════════════════════════════════════════════
// Part B: Example object
// ════════════════════════════════════════════════════════════

fn test_example(t: &mut TestRunner, portal: &Portal) {
    t.section("Part B: Example object");
    let root = KernelMemoryCap(caps::ROOT_MEMORY);
    let obj = ExampleCap(CapPtr(10));

    let f = root.create_example(portal.lock(), caps::EXAMPLE_FACTORY, obj.0);
    t.expect_ok("create example at slot 10", f.wait());
    let f = root.create_example(f.reuse(), caps::EXAMPLE_FACTORY, obj.0);
    t.expect_err("second create on slot 10", f.wait(), Error::LostRace);

    let f = obj.print_message(f.reuse(), "hello from kinv-smoke");
    t.expect_ok("print message", f.wait());

    let f = obj.ping(f.reuse(), 1000);
    let res = f.wait();
    t.check(
        "ping runs on the caller",
        matches!(res, Ok(Ping { place: Ping::CALLER_THREAD, .. })),
        &format!("{:?}", res),
    );

    let f = obj.move_home(f.reuse(), 1);
    t.expect_ok("move home to place 1", f.wait());
    let f = obj.ping(f.reuse(), 1000);
    let res = f.wait();
    t.check("ping runs on place 1", matches!(res, Ok(Ping { place: 1, .. })), &format!("{:?}", res));

    let f = obj.move_home(f.reuse(), 99);
    t.expect_err("move home to missing place", f.wait(), Error::InvalidArgument);

    let f = ExampleCap(caps::ROOT_MEMORY).ping(f.reuse(), 0);
    t.expect_err("ping on kernel memory", f.wait(), Error::NotImplemented);

    let f = get_debug_info(f.reuse(), obj.0);
    if let Some(info) = t.expect_ok("example debug info", f.wait()) {
        println!("       {}", info.text());
    }
}

// ════════════════════════════════════════════════════════════
// Part C: Kernel memory
// ════════════════════════════════════════════════════════════

fn test_memory(t: &mut TestRunner, kernel: &Kernel, portal: &Portal) {
    t.section("Part C: Kernel memory");
    let root = KernelMemoryCap(caps::ROOT_MEMORY);
    let child = KernelMemoryCap(CapPtr(11));

    let f = root.create_kernel_memory(portal.lock(), caps::KERNEL_MEMORY_FACTORY, child.0, 1 << 20, 4096);
    t.expect_ok("carve 1 MiB child", f.wait());

    let f = child.properties(f.reuse());
    let res = f.wait();
    t.check(
        "child reports 1 MiB free",
        matches!(&res, Ok(p) if p.size == 1 << 20 && p.free == 1 << 20),
        &format!("{:?}", res),
    );

    let f = root.create_kernel_memory(f.reuse(), caps::KERNEL_MEMORY_FACTORY, CapPtr(12), 1 << 40, 4096);
    t.expect_err("oversized child", f.wait(), Error::InsufficientResources);
    let f = root.create_kernel_memory(f.reuse(), caps::KERNEL_MEMORY_FACTORY, CapPtr(12), 6000, 4096);
    t.expect_err("unaligned child", f.wait(), Error::Unaligned);

    let f = child.create_example(f.reuse(), caps::EXAMPLE_FACTORY, CapPtr(12));
    t.expect_ok("example paid by child, slot 12 reused", f.wait());
    drop(f);

    let (tx, rx) = mpsc::channel();
    let deleted = kernel.delete_cap(CapPtr(12), Box::new(move || {
        let _ = tx.send(());
    }));
    t.expect_ok("delete example", deleted);
    t.check(
        "example storage returned",
        rx.recv_timeout(Duration::from_secs(5)).is_ok(),
        "timed out",
    );

    let (tx, rx) = mpsc::channel();
    let deleted = kernel.delete_cap(child.0, Box::new(move || {
        let _ = tx.send(());
    }));
    t.expect_ok("delete child memory", deleted);
    t.check(
        "child range returned",
        rx.recv_timeout(Duration::from_secs(5)).is_ok(),
        "timed out",
    );
    t.expect_err(
        "root memory cannot be deleted",
        kernel.delete_cap(caps::ROOT_MEMORY, Box::new(|| {})),
        Error::RequestDenied,
    );
}

// ════════════════════════════════════════════════════════════
// Part D: Capmaps and portals
// ════════════════════════════════════════════════════════════

fn test_capmap_portal(t: &mut TestRunner, kernel: &Arc<Kernel>, portal: &Portal) {
    t.section("Part D: Capmaps and portals");
    let root = KernelMemoryCap(caps::ROOT_MEMORY);
    let map = CapPtr(13);

    let f = root.create_capmap(portal.lock(), caps::CAPMAP_FACTORY, map, 4);
    t.expect_ok("create 16-slot capmap", f.wait());
    let msg = CreateBase::new(CapPtr(0x23), caps::EXAMPLE_FACTORY).set_indirect_dest(map, CapPtrDepth(4));
    let f = root.create(f.reuse(), &msg);
    t.expect_ok("create example inside the map", f.wait());
    let f = get_debug_info(f.reuse(), map);
    if let Some(info) = t.expect_ok("capmap debug info", f.wait()) {
        println!("       {}", info.text());
    }

    let f = root.create_portal(f.reuse(), caps::PORTAL_FACTORY, CapPtr(14));
    t.expect_ok("create portal at slot 14", f.wait());
    drop(f);

    let unbound = Portal::new(CapPtr(14), portal.buffer().clone(), kernel.clone());
    let f = get_debug_info(unbound.lock(), caps::ROOT_MEMORY);
    t.expect_err("unbound portal", f.wait(), Error::PortalNoBuffer);
    drop(f);

    if let Some(buf) = t.expect_ok("bind a buffer", kernel.bind_portal(CapPtr(14))) {
        let second = Portal::new(CapPtr(14), buf, kernel.clone());
        let f = get_debug_info(second.lock(), caps::ROOT_MEMORY);
        t.expect_ok("second portal works", f.wait());
        drop(f);
        t.expect_ok("signal portal", second.signal(CapPtr(14)));
    }

    let lock = portal.lock();
    t.check("locked portal rejects try_lock", portal.try_lock().is_none(), "second lock granted");
    drop(lock);
    t.check("released portal accepts try_lock", portal.try_lock().is_some(), "still locked");
}

fn main() {
    println!("=== kinv Smoke Test ===");
    let mut t = TestRunner::new();

    if let Some((kernel, portal)) = test_boot(&mut t) {
        test_example(&mut t, &portal);
        test_memory(&mut t, &kernel, &portal);
        test_capmap_portal(&mut t, &kernel, &portal);
        kernel.shutdown();
    }

    t.summary();
    if t.failed > 0 {
        std::process::exit(1);
    }
}
