//! Stress tests designed to break the scheduler.
//!
//! These tests exercise volume, random interleavings, deep graphs and
//! re-entrant mutation.

#[cfg(test)]
mod stress_tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::engine::Engine;
    use crate::operators::{forward, restore, Guard, Sample};
    use crate::signal::Signal;
    use crate::store::Store;
    use crate::testing::Recorder;

    // ==========================================================================
    // TEST: Ten thousand emits with a steady arena
    // ==========================================================================

    #[test]
    fn test_sequential_emits_reclaim_arena() {
        let engine = Engine::builder().arena_capacity(4).build();
        let inc = engine.signal::<u64>().unwrap();
        let count = engine.store(0_u64).unwrap();
        count.on(&inc, |c, n| Some(c + n)).unwrap();
        let notified = Recorder::new();
        notified.watch_store(&count);

        inc.emit(1);
        let capacity = engine.stats().arena_capacity;

        let num_emits = 10_000;
        for _ in 1..num_emits {
            inc.emit(1);
        }

        let stats = engine.stats();
        assert_eq!(count.get(), num_emits);
        assert_eq!(notified.len(), num_emits as usize);
        assert_eq!(stats.ticks, num_emits);
        assert_eq!(stats.arena_capacity, capacity, "arena grew across ticks");
        assert_eq!(stats.arena_high_water, 1);
        assert_eq!(stats.dropped_thunks, 0);
    }

    // ==========================================================================
    // TEST: Random emit sequences match a plain fold
    // ==========================================================================

    #[test]
    fn test_random_sequences_match_reference_fold() {
        let mut rng = fastrand::Rng::with_seed(0x5eed);

        for _round in 0..50 {
            let engine = Engine::new();
            let add = engine.signal::<i64>().unwrap();
            let mul = engine.signal::<i64>().unwrap();
            let clear = engine.signal::<()>().unwrap();
            let acc = engine.store(0_i64).unwrap();
            acc.on(&add, |a, n| Some(a + n))
                .unwrap()
                .on(&mul, |a, n| Some(a.wrapping_mul(*n) % 1_000_003))
                .unwrap()
                .reset(&clear)
                .unwrap();
            let seen = Recorder::new();
            seen.watch_store(&acc);

            let mut expected = 0_i64;
            let mut notifications = 0;
            for _ in 0..rng.usize(1..200) {
                let batch_len = rng.usize(1..4);
                engine.batch(|| {
                    for _ in 0..batch_len {
                        match rng.u8(0..3) {
                            0 => {
                                let n = rng.i64(-50..50);
                                expected += n;
                                add.emit(n);
                            }
                            1 => {
                                let n = rng.i64(-3..4);
                                expected = expected.wrapping_mul(n) % 1_000_003;
                                mul.emit(n);
                            }
                            _ => {
                                expected = 0;
                                clear.emit(());
                            }
                        }
                    }
                });
                notifications += 1;
                assert_eq!(acc.get(), expected);
            }

            assert_eq!(seen.len(), notifications, "one notification per batch");
            assert_eq!(seen.last(), Some(expected));
        }
    }

    // ==========================================================================
    // TEST: Deep chains settle in one tick
    // ==========================================================================

    #[test]
    fn test_deep_signal_chain() {
        let engine = Engine::new();
        let head = engine.signal::<u32>().unwrap();

        let depth = 500;
        let mut tail: Signal<u32> = head.clone();
        for _ in 0..depth {
            tail = Sample::clock(&tail).map(|n| n + 1).to_signal().unwrap();
        }
        let seen = Recorder::new();
        seen.watch_signal(&tail);

        head.emit(0);
        head.emit(1000);

        assert_eq!(seen.values(), vec![depth, 1000 + depth]);
        assert_eq!(engine.stats().ticks, 2);
    }

    #[test]
    fn test_deep_store_chain_notifies_each_link_once() {
        let engine = Engine::new();
        let root = engine.store(0_i32).unwrap();

        let mut links: Vec<Store<i32>> = Vec::new();
        let mut last = root.clone();
        for _ in 0..100 {
            last = last.map(|v| v + 1).unwrap();
            links.push(last.clone());
        }
        let counts: Vec<Recorder<i32>> = links
            .iter()
            .map(|link| {
                let rec = Recorder::new();
                rec.watch_store(link);
                rec
            })
            .collect();

        root.set(10);

        assert_eq!(last.get(), 110);
        for (depth, rec) in counts.iter().enumerate() {
            assert_eq!(rec.values(), vec![11 + depth as i32]);
        }
    }

    // ==========================================================================
    // TEST: Diamond graphs see merged state
    // ==========================================================================

    #[test]
    fn test_diamond_notifies_once_with_both_sides() {
        let engine = Engine::new();
        let input = engine.signal::<i32>().unwrap();
        let left = input.map(|n| n * 2).unwrap();
        let right = input.map(|n| n * 3).unwrap();
        let sum = engine.store(0).unwrap();
        sum.on(&left, |s, n| Some(s + n))
            .unwrap()
            .on(&right, |s, n| Some(s + n))
            .unwrap();
        let seen = Recorder::new();
        seen.watch_store(&sum);

        input.emit(1);
        input.emit(2);

        assert_eq!(seen.values(), vec![5, 15]);
    }

    // ==========================================================================
    // TEST: Re-entrant fan-out from watchers
    // ==========================================================================

    #[test]
    fn test_watchers_emitting_in_a_cascade() {
        let engine = Engine::new();
        let levels: Vec<Signal<u32>> = (0..5).map(|_| engine.signal().unwrap()).collect();
        let total = engine.store(0_u32).unwrap();
        for level in &levels {
            total.on(level, |t, _| Some(t + 1)).unwrap();
        }

        // Each level fans out twice into the next one.
        for pair in levels.windows(2) {
            let next = pair[1].clone();
            pair[0].watch(move |n| {
                next.emit(*n);
                next.emit(*n);
            });
        }

        let finished = Rc::new(RefCell::new(0));
        let f = finished.clone();
        levels[4].watch(move |_| *f.borrow_mut() += 1);

        levels[0].emit(7);

        // 1 + 2 + 4 + 8 + 16 emits in total.
        assert_eq!(total.get(), 31);
        assert_eq!(*finished.borrow(), 16);
        assert_eq!(engine.stats().ticks, 1);
    }

    #[test]
    fn test_effects_chained_through_outcomes() {
        let engine = Engine::new();
        let step = engine
            .effect(|n: u32| -> anyhow::Result<u32> {
                anyhow::ensure!(n < 20, "limit reached at {n}");
                Ok(n + 1)
            })
            .unwrap();

        let again = step.clone();
        step.done().watch(move |d| again.run(d.result));
        let stopped_at = restore(&step.fail().map(|f| f.params).unwrap(), 0).unwrap();

        step.run(0);

        assert_eq!(step.runs(), 21);
        assert_eq!(stopped_at.get(), 20);
        assert!(!step.pending().get());
        assert_eq!(engine.stats().ticks, 1);
    }

    // ==========================================================================
    // TEST: Many wires on one clock
    // ==========================================================================

    #[test]
    fn test_many_wires_share_one_payload() {
        let engine = Engine::new();
        let clock = engine.signal::<u64>().unwrap();
        let sink = engine.store(0_u64).unwrap();
        let hits = engine.store(0_u32).unwrap();
        let hit = engine.signal::<u64>().unwrap();
        hits.on(&hit, |h, _| Some(h + 1)).unwrap();

        for threshold in 0..64_u64 {
            Guard::clock(&clock)
                .filter(move |n| *n >= threshold)
                .target(&hit)
                .build()
                .unwrap();
        }
        forward(&clock, &sink).unwrap();

        clock.emit(10);
        assert_eq!(sink.get(), 10);
        assert_eq!(hits.get(), 11);
        // One payload for the clock emit plus one per delivered hit. Store
        // writes never touch the arena.
        assert_eq!(engine.stats().arena_high_water, 12);
    }

    // ==========================================================================
    // TEST: Repeated engine lifecycles
    // ==========================================================================

    #[test]
    fn test_sequential_engine_reuse() {
        let weak_probe = Rc::new(());
        for round in 0..100 {
            let engine = Engine::new();
            let sig = engine.signal::<u32>().unwrap();
            let cell = restore(&sig, 0).unwrap();
            let probe = weak_probe.clone();
            cell.watch(move |_| {
                let _ = &probe;
            });
            sig.emit(round);
            assert_eq!(cell.get(), round);
        }
        // Every watcher closure was released with its engine.
        assert_eq!(Rc::strong_count(&weak_probe), 1);
    }
}
