//! # Round-robin scheduler
//!
//! Strict FIFO over the ready list with a uniform time slice. The running
//! task stays at the head of the ready list; anything that blocks it takes it
//! off, anything that wakes a task appends it to the tail. When the ready
//! list is empty the idle task runs.
//!
//! All queue and state mutation happens with interrupts masked, and the
//! helpers prefixed `set_` assume the caller already entered the critical
//! section.

use crate::Kernel;
use crate::platform::{Cpu, Platform};
use crate::task::{Queue, TaskId, TaskState};
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use log::trace;

#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    pub(crate) current: Option<TaskId>,
    pub(crate) ready: VecDeque<TaskId>,
    pub(crate) sleeping: VecDeque<TaskId>,
    pub(crate) all: Vec<TaskId>,
}

impl Scheduler {
    fn remove(list: &mut VecDeque<TaskId>, id: TaskId) {
        if let Some(pos) = list.iter().position(|&t| t == id) {
            list.remove(pos);
        }
    }
}

impl<P: Platform> Kernel<P> {
    /// Append `id` to the ready tail. The idle task is never queued.
    pub(crate) fn set_ready(&mut self, id: TaskId) {
        if id == TaskId::IDLE {
            return;
        }
        self.sched.ready.push_back(id);
        let task = self.tasks.get_mut(id);
        task.state = TaskState::Ready;
        task.queue = Some(Queue::Ready);
    }

    /// Take `id` off the ready list.
    pub(crate) fn set_unready(&mut self, id: TaskId) {
        if id == TaskId::IDLE {
            return;
        }
        Scheduler::remove(&mut self.sched.ready, id);
        self.tasks.get_mut(id).queue = None;
    }

    /// Park `id` on the sleep list for `ticks` ticks.
    pub(crate) fn set_sleep(&mut self, id: TaskId, ticks: u32) {
        if ticks == 0 {
            return;
        }
        self.sched.sleeping.push_back(id);
        let task = self.tasks.get_mut(id);
        task.sleep_ticks = ticks;
        task.state = TaskState::Sleep;
        task.queue = Some(Queue::Sleep);
    }

    pub(crate) fn set_wakeup(&mut self, id: TaskId) {
        Scheduler::remove(&mut self.sched.sleeping, id);
        self.tasks.get_mut(id).queue = None;
    }

    /// Move the running task off the ready list into `state`, parked on a
    /// wait list the caller owns.
    pub(crate) fn block_current(&mut self, state: TaskState) -> TaskId {
        let current = self.running();
        self.set_unready(current);
        let task = self.tasks.get_mut(current);
        task.state = state;
        task.queue = Some(Queue::Wait);
        current
    }

    /// Make a task taken off a wait list runnable again.
    pub(crate) fn unblock(&mut self, id: TaskId) {
        self.tasks.get_mut(id).queue = None;
        self.set_ready(id);
    }

    fn next_task(&self) -> TaskId {
        self.sched.ready.front().copied().unwrap_or(TaskId::IDLE)
    }

    /// Hand the CPU to the next task; `true` if a different task now runs.
    pub(crate) fn switch(&mut self) -> bool {
        let from = self.sched.current;
        let to = self.next_task();

        self.tasks.get_mut(to).state = TaskState::Running;
        if from == Some(to) {
            return false;
        }

        self.sched.current = Some(to);
        if let Some(from) = from {
            let outgoing = self.tasks.get_mut(from);
            if outgoing.state == TaskState::Running {
                outgoing.state = TaskState::Ready;
            }
        }

        trace!("switch {from:?} -> {to}");
        let to_tss = self.tasks.get(to).tss_selector;
        match from {
            Some(from) => {
                let (outgoing, incoming) = self.tasks.pair_mut(from, to);
                self.cpu
                    .switch_context(&mut outgoing.context, &incoming.context, to_tss);
            }
            None => {
                let incoming = self.tasks.get(to);
                self.cpu
                    .switch_context(&mut self.boot_context, &incoming.context, to_tss);
            }
        }
        true
    }

    /// Timer interrupt: age sleepers, then charge the running task's slice.
    ///
    /// Returns `true` if the tick caused a task switch.
    pub fn tick(&mut self) -> bool {
        self.critical(|k| {
            let mut woken = Vec::new();
            for &id in &k.sched.sleeping {
                let task = k.tasks.get_mut(id);
                task.sleep_ticks = task.sleep_ticks.saturating_sub(1);
                if task.sleep_ticks == 0 {
                    woken.push(id);
                }
            }
            for id in woken {
                k.set_wakeup(id);
                k.set_ready(id);
            }

            let Some(current) = k.sched.current else {
                return false;
            };
            if current == TaskId::IDLE {
                return !k.sched.ready.is_empty() && k.switch();
            }

            let task = k.tasks.get_mut(current);
            task.slice_curr = task.slice_curr.saturating_sub(1);
            if task.slice_curr > 0 {
                return false;
            }
            task.slice_curr = task.slice_max;
            k.set_unready(current);
            k.set_ready(current);
            k.switch()
        })
    }

    /// Give up the CPU if another task is ready.
    pub fn yield_now(&mut self) -> bool {
        self.critical(|k| {
            if k.sched.ready.len() <= 1 {
                return false;
            }
            let current = k.running();
            k.set_unready(current);
            k.set_ready(current);
            k.switch()
        })
    }
}
