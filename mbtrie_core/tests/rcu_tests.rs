use mbtrie_core::{two_copy, Backoff, CoreHeap, RcuProtected};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Barrier,
    },
    thread,
    time::{Duration, Instant},
};

/// Two fields that must always be seen together.
struct Pair {
    a: u64,
    b: u64,
}

impl Pair {
    fn new(a: u64) -> Self {
        Self { a, b: a.wrapping_mul(3) }
    }

    fn consistent(&self) -> bool {
        self.b == self.a.wrapping_mul(3)
    }
}

#[test]
fn open_reader_blocks_reclamation() {
    reader_blocks_reclamation_with(Backoff::new(32));
}

#[test]
fn spin_only_writer_waits_for_reader() {
    assert_eq!(Backoff::spin_only().yield_after(), 0);
    reader_blocks_reclamation_with(Backoff::spin_only());
}

fn reader_blocks_reclamation_with(backoff: Backoff) {
    let rcu: Arc<RcuProtected<u64>> =
        Arc::new(RcuProtected::with_value(1, CoreHeap, 0, backoff));
    let (ready_tx, ready_rx) = mpsc::channel();

    let r = Arc::clone(&rcu);
    let reader = thread::spawn(move || {
        let g = r.begin_read();
        ready_tx.send(()).unwrap();
        thread::sleep(Duration::from_millis(50));
        // still the value that was current when the section began
        assert_eq!(g.get(), Some(&1));
    });

    ready_rx.recv().unwrap();
    let start = Instant::now();
    rcu.publish(2);
    assert!(start.elapsed() >= Duration::from_millis(45));
    assert_eq!(rcu.readers(), 0);
    reader.join().unwrap();
    assert_eq!(rcu.begin_read().get(), Some(&2));
}

#[test]
fn raw_swap_does_not_wait() {
    let rcu: Arc<RcuProtected<u64>> = Arc::new(RcuProtected::new(CoreHeap, 1, Backoff::default()));
    let g = rcu.begin_read();
    assert!(g.get().is_none());

    let fresh = mbtrie_core::heap::alloc_value(rcu.heap(), rcu.core(), 9u64);
    let old = unsafe { rcu.raw_swap(fresh.as_ptr()) };
    assert!(old.is_null());
    assert_eq!(g.read_current(), Some(&9));
    drop(g);
    assert_eq!(rcu.readers(), 0);
}

#[test]
fn concurrent_readers_see_whole_values() {
    const UPDATES: u64 = 5_000;
    let readers = num_cpus::get().saturating_sub(1).clamp(2, 4);
    let rcu: Arc<RcuProtected<Pair>> =
        Arc::new(RcuProtected::with_value(Pair::new(0), CoreHeap, 0, Backoff::new(64)));
    let stop = Arc::new(AtomicBool::new(false));
    let barrier = Arc::new(Barrier::new(readers + 1));

    let handles: Vec<_> = (0..readers)
        .map(|_| {
            let (r, s, b) = (Arc::clone(&rcu), Arc::clone(&stop), Arc::clone(&barrier));
            thread::spawn(move || {
                b.wait();
                let mut last = 0;
                while !s.load(Ordering::Acquire) {
                    {
                        let g = r.begin_read();
                        let p = g.get().expect("never retracted");
                        assert!(p.consistent(), "torn read: a={} b={}", p.a, p.b);
                        assert!(p.a >= last, "went backwards: {} < {}", p.a, last);
                        last = p.a;
                    }
                    thread::yield_now();
                }
            })
        })
        .collect();

    barrier.wait();
    for i in 1..=UPDATES {
        rcu.publish(Pair::new(i));
    }
    stop.store(true, Ordering::Release);
    for h in handles {
        h.join().expect("reader thread panicked");
    }
    assert_eq!(rcu.begin_read().get().map(|p| p.a), Some(UPDATES));
}

#[test]
fn two_copy_readers_never_see_partial_updates() {
    const ROUNDS: u64 = 2_000;
    let readers = num_cpus::get().saturating_sub(1).clamp(2, 4);
    let (mut writer, reader) = two_copy([0u64; 16], [0u64; 16], Backoff::new(64));
    let stop = Arc::new(AtomicBool::new(false));

    let handles: Vec<_> = (0..readers)
        .map(|_| {
            let (r, s) = (reader.clone(), Arc::clone(&stop));
            thread::spawn(move || {
                while !s.load(Ordering::Acquire) {
                    {
                        let g = r.begin_read();
                        let first = g[0];
                        assert!(g.iter().all(|&x| x == first), "mixed generations");
                    }
                    thread::yield_now();
                }
            })
        })
        .collect();

    for gen in 1..=ROUNDS {
        writer.get_updating_copy_phase1().fill(gen);
        writer.get_updating_copy_phase2().fill(gen);
    }
    stop.store(true, Ordering::Release);
    for h in handles {
        h.join().expect("reader thread panicked");
    }
    assert!(writer.active().iter().all(|&x| x == ROUNDS));
    assert_eq!(reader.readers(), 0);
}

#[test]
fn two_copy_writer_waits_for_reader() {
    let (mut writer, reader) = two_copy(0u32, 0u32, Backoff::new(8));
    let (ready_tx, ready_rx) = mpsc::channel();

    let held = thread::spawn(move || {
        let g = reader.begin_read();
        ready_tx.send(()).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(*g, 0);
    });

    ready_rx.recv().unwrap();
    *writer.get_updating_copy_phase1() = 7;
    let start = Instant::now();
    *writer.get_updating_copy_phase2() = 7;
    assert!(start.elapsed() >= Duration::from_millis(45));
    held.join().unwrap();
    assert_eq!(*writer.active(), 7);
}
