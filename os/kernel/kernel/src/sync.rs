//! Task-blocking synchronization: a recursive [`Mutex`] and a counting
//! [`Semaphore`], both with FIFO wait lists.
//!
//! A call that has to wait parks the caller, switches away and returns
//! [`Poll::Pending`]. Wake-ups hand the resource over directly, so a task that
//! was woken already holds what it waited for and must not call again.
//!
//! Both primitives do nothing while no task is running (early boot).

use crate::Kernel;
use crate::platform::Platform;
use crate::task::{TaskId, TaskState};
use alloc::collections::VecDeque;
use core::task::Poll;
use log::warn;

#[derive(Debug, Default)]
pub struct Mutex {
    owner: Option<TaskId>,
    locked_count: u32,
    waiters: VecDeque<TaskId>,
}

impl Mutex {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            owner: None,
            locked_count: 0,
            waiters: VecDeque::new(),
        }
    }

    /// Acquire for the running task; re-entrant for the owner.
    pub fn lock<P: Platform>(&mut self, kernel: &mut Kernel<P>) -> Poll<()> {
        kernel.critical(|k| {
            let Some(current) = k.current() else {
                return Poll::Ready(());
            };
            if self.locked_count == 0 {
                self.owner = Some(current);
                self.locked_count = 1;
                Poll::Ready(())
            } else if self.owner == Some(current) {
                self.locked_count += 1;
                Poll::Ready(())
            } else {
                let me = k.block_current(TaskState::Blocked);
                self.waiters.push_back(me);
                k.switch();
                Poll::Pending
            }
        })
    }

    /// Release one level; the last one passes ownership to the first waiter.
    /// Calls from anyone but the owner are ignored.
    pub fn unlock<P: Platform>(&mut self, kernel: &mut Kernel<P>) {
        kernel.critical(|k| {
            let Some(current) = k.current() else {
                return;
            };
            if self.owner != Some(current) {
                warn!("mutex unlock by {current}, owner is {:?}", self.owner);
                return;
            }
            self.locked_count -= 1;
            if self.locked_count > 0 {
                return;
            }
            self.owner = None;
            if let Some(next) = self.waiters.pop_front() {
                self.owner = Some(next);
                self.locked_count = 1;
                k.unblock(next);
            }
        });
    }

    #[must_use]
    pub const fn owner(&self) -> Option<TaskId> {
        self.owner
    }

    #[must_use]
    pub const fn locked_count(&self) -> u32 {
        self.locked_count
    }

    pub fn waiters(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.waiters.iter().copied()
    }
}

#[derive(Debug, Default)]
pub struct Semaphore {
    count: u32,
    waiters: VecDeque<TaskId>,
}

impl Semaphore {
    #[must_use]
    pub const fn new(count: u32) -> Self {
        Self {
            count,
            waiters: VecDeque::new(),
        }
    }

    /// Take one unit, or block until [`notify`](Self::notify) hands one over.
    pub fn wait<P: Platform>(&mut self, kernel: &mut Kernel<P>) -> Poll<()> {
        kernel.critical(|k| {
            if k.current().is_none() {
                return Poll::Ready(());
            }
            if self.count > 0 {
                self.count -= 1;
                return Poll::Ready(());
            }
            let me = k.block_current(TaskState::Blocked);
            self.waiters.push_back(me);
            k.switch();
            Poll::Pending
        })
    }

    pub fn notify<P: Platform>(&mut self, kernel: &mut Kernel<P>) {
        kernel.critical(|k| {
            if k.current().is_none() {
                return;
            }
            match self.waiters.pop_front() {
                Some(next) => k.unblock(next),
                None => self.count += 1,
            }
        });
    }

    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    pub fn waiters(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.waiters.iter().copied()
    }
}
