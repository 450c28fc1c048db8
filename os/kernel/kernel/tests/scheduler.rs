mod common;

use common::{boot, boot_with, call, config, fork};
use kernel::image::RamDisk;
use kernel::task::{Queue, TaskId, TaskState};
use kernel::SyscallOutcome;
use kernel_syscall::Sysno;
use proptest::prelude::*;
use std::collections::HashMap;

#[test]
fn equal_tasks_share_the_cpu_round_robin() {
    let slice = 3;
    let mut k = boot_with(config().with_time_slice(slice), RamDisk::new());
    let (_, a) = fork(&mut k);
    let (_, b) = fork(&mut k);

    let mut order = Vec::new();
    for _ in 0..9 {
        order.push(k.current().unwrap());
        for _ in 0..slice {
            k.tick();
        }
    }

    assert_eq!(&order[..3], [TaskId::FIRST, a, b]);
    assert_eq!(&order[3..6], &order[..3]);
    assert_eq!(&order[6..], &order[..3]);
}

#[test]
fn running_task_heads_the_ready_list() {
    let mut k = boot();
    let (_, child) = fork(&mut k);
    assert!(k.yield_now());
    assert_eq!(k.current(), Some(child));
    assert_eq!(k.ready_tasks().next(), Some(child));
    assert_eq!(k.task(TaskId::FIRST).state(), TaskState::Ready);
    assert_eq!(k.task(child).state(), TaskState::Running);
}

#[test]
fn yield_alone_keeps_running() {
    let mut k = boot();
    let switches = k.cpu().switches().len();
    assert_eq!(call(&mut k, Sysno::Yield, [0; 4]), (SyscallOutcome::Returned, 0));
    assert_eq!(k.current(), Some(TaskId::FIRST));
    assert_eq!(k.cpu().switches().len(), switches);
}

#[test]
fn sleeper_wakes_after_enough_ticks() {
    let mut k = boot();
    let (_, child) = fork(&mut k);

    // 25 ms at 10 ms per tick.
    assert_eq!(call(&mut k, Sysno::Sleep, [25, 0, 0, 0]).0, SyscallOutcome::Switched);
    assert_eq!(k.task(TaskId::FIRST).state(), TaskState::Sleep);
    assert_eq!(k.task(TaskId::FIRST).sleep_ticks(), 3);
    assert_eq!(k.current(), Some(child));

    k.tick();
    k.tick();
    assert_eq!(k.sleeping_tasks().collect::<Vec<_>>(), [TaskId::FIRST]);
    k.tick();
    assert_eq!(k.sleeping_tasks().count(), 0);
    assert_eq!(k.ready_tasks().collect::<Vec<_>>(), [child, TaskId::FIRST]);
    assert_eq!(k.task(TaskId::FIRST).queue(), Some(Queue::Ready));
}

#[test]
fn idle_runs_while_everyone_sleeps() {
    let mut k = boot();
    k.sleep(1);
    assert_eq!(k.current(), Some(TaskId::IDLE));
    assert_eq!(k.task(TaskId::IDLE).state(), TaskState::Running);
    assert_eq!(k.ready_tasks().count(), 0);

    assert!(k.tick());
    assert_eq!(k.current(), Some(TaskId::FIRST));
    let last = k.cpu().last_switch().unwrap();
    assert_eq!(last.to_tss, k.task(TaskId::FIRST).tss_selector());
    assert_eq!(k.cpu().active_directory(), Some(k.task(TaskId::FIRST).page_directory()));
}

#[test]
fn critical_sections_are_balanced() {
    let mut k = boot();
    fork(&mut k);
    for _ in 0..25 {
        k.tick();
    }
    k.yield_now();
    assert_eq!(k.irq().depth(), 0);
    assert!(kernel_sync::CriticalSection::enabled(k.irq()));
}

#[derive(Debug, Clone)]
enum Step {
    Tick,
    Yield,
    Sleep(u32),
    Fork,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => Just(Step::Tick),
        2 => Just(Step::Yield),
        1 => (0u32..50).prop_map(Step::Sleep),
        1 => Just(Step::Fork),
    ]
}

proptest! {
    #[test]
    fn every_task_sits_on_at_most_one_queue(steps in prop::collection::vec(step(), 1..120)) {
        let mut k = boot_with(config().with_time_slice(2), RamDisk::new());
        for s in steps {
            let current = k.current().unwrap();
            match s {
                Step::Tick => { k.tick(); }
                Step::Yield => { k.yield_now(); }
                Step::Sleep(ms) if current != TaskId::IDLE => { k.sleep(ms); }
                Step::Fork if current != TaskId::IDLE => {
                    let _ = k.fork(&common::frame(Sysno::Fork, [0; 4]));
                }
                _ => { k.tick(); }
            }

            let mut seen: HashMap<TaskId, usize> = HashMap::new();
            for id in k.ready_tasks().chain(k.sleeping_tasks()) {
                *seen.entry(id).or_default() += 1;
            }
            prop_assert!(seen.values().all(|&n| n == 1));
            for id in k.sleeping_tasks() {
                prop_assert_eq!(k.task(id).state(), TaskState::Sleep);
            }

            let current = k.current().unwrap();
            prop_assert_eq!(k.task(current).state(), TaskState::Running);
            if current == TaskId::IDLE {
                prop_assert_eq!(k.ready_tasks().count(), 0);
            } else {
                prop_assert_eq!(k.ready_tasks().next(), Some(current));
            }
        }
    }
}
