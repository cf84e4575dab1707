use std::{cell::Cell, rc::Rc, time::Duration};

use chain_player::{
    player::{
        clock::Clock,
        cycle::{CycleKind, CycleScheduler},
    },
    testing::ManualClock,
};
use futures::{executor::LocalPool, future};

fn tick_counter(count: &Rc<Cell<usize>>) -> impl FnMut() -> Option<future::Ready<()>> + 'static {
    let count = count.clone();
    move || {
        count.set(count.get() + 1);
        Some(future::ready(()))
    }
}

fn run_for(pool: &mut LocalPool, clock: &ManualClock, millis: i64) {
    pool.run_until_stalled();
    for _ in 0..millis / 10 {
        clock.advance(10);
        pool.run_until_stalled();
    }
}

#[test]
fn test_cycles_tick_independently() {
    let mut pool = LocalPool::new();
    let spawner = pool.spawner();
    let clock = Rc::new(ManualClock::new(0));
    let shared: Rc<dyn Clock> = clock.clone();
    let main = Rc::new(Cell::new(0));
    let sub = Rc::new(Cell::new(0));

    let mut cycles = CycleScheduler::new();
    cycles
        .schedule(CycleKind::Main, Duration::from_secs(5), true, shared.clone(), &spawner, tick_counter(&main))
        .unwrap();
    cycles
        .schedule(CycleKind::Sub, Duration::from_secs(1), false, shared, &spawner, tick_counter(&sub))
        .unwrap();

    run_for(&mut pool, &clock, 0);
    assert_eq!(main.get(), 1);
    assert_eq!(sub.get(), 0);

    run_for(&mut pool, &clock, 5000);
    assert_eq!(main.get(), 2);
    assert_eq!(sub.get(), 5);

    cycles.forget(CycleKind::Sub);
    assert!(!cycles.is_scheduled(CycleKind::Sub));
    assert!(cycles.is_scheduled(CycleKind::Main));
    run_for(&mut pool, &clock, 5000);
    assert_eq!(main.get(), 3);
    assert_eq!(sub.get(), 5);

    cycles.clear();
    run_for(&mut pool, &clock, 10_000);
    assert_eq!(main.get(), 3);
}

#[test]
fn test_cycle_ends_when_tick_declines() {
    let mut pool = LocalPool::new();
    let clock = Rc::new(ManualClock::new(0));
    let count = Rc::new(Cell::new(0));
    let ticks = count.clone();

    let mut cycles = CycleScheduler::new();
    cycles
        .schedule(CycleKind::Main, Duration::from_millis(100), true, clock.clone(), &pool.spawner(), move || {
            ticks.set(ticks.get() + 1);
            (ticks.get() < 3).then(|| future::ready(()))
        })
        .unwrap();

    run_for(&mut pool, &clock, 1000);
    assert_eq!(count.get(), 3);
    assert_eq!(clock.pending_timers(), 0);
}

#[test]
fn test_rescheduling_replaces_previous_task() {
    let mut pool = LocalPool::new();
    let clock = Rc::new(ManualClock::new(0));
    let first = Rc::new(Cell::new(0));
    let second = Rc::new(Cell::new(0));

    let mut cycles = CycleScheduler::new();
    cycles
        .schedule(CycleKind::Sub, Duration::from_secs(1), true, clock.clone(), &pool.spawner(), tick_counter(&first))
        .unwrap();
    run_for(&mut pool, &clock, 0);
    cycles
        .schedule(CycleKind::Sub, Duration::from_secs(1), true, clock.clone(), &pool.spawner(), tick_counter(&second))
        .unwrap();
    run_for(&mut pool, &clock, 3000);
    assert_eq!(first.get(), 1);
    assert_eq!(second.get(), 4);
}
