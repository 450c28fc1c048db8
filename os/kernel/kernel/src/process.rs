//! # Task lifecycle
//!
//! `Created → Ready → Running → {Ready | Sleep | Waiting | Blocked | Zombie}`;
//! `wait` reaps a zombie and returns its slot to the pool.
//!
//! Every operation that allocates (task slot, TSS selector, kernel stack,
//! address space, open-file references) releases everything again when a
//! later step fails, so a failed `fork` or `exec` leaves no trace.

use crate::elf::{EHDR_SIZE, ElfError, PHDR_SIZE, PT_LOAD, Ph32, parse_header, parse_program_header};
use crate::file::{FdTable, FileId};
use crate::gdt::{KERNEL_CS, KERNEL_DS, USER_CS, USER_DS};
use crate::image::{ImageSource, read_exact};
use crate::platform::{Cpu, Platform};
use crate::task::{EFLAGS_DEFAULT, EFLAGS_IF, Pid, Task, TaskContext, TaskFlags, TaskId, TaskState};
use crate::{Kernel, KernelError};
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::task::Poll;
use kernel_info::memory::{
    FIRST_TASK_PAGES, MEM_TASK_ARG_SIZE, MEM_TASK_STACK_SIZE, MEM_TASK_STACK_TOP, TASK_BASE,
};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};
use kernel_syscall::{SYSCALL_PARAM_BYTES, SyscallFrame};
use kernel_vmem::PageFlags;
use log::{debug, warn};

/// `name`, cut to at most `max` bytes on a character boundary.
fn truncated(name: &str, max: usize) -> String {
    let mut end = name.len().min(max);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    String::from(&name[..end])
}

/// Last component of a path.
fn base_name(path: &str) -> &str {
    path.rsplit('/').find(|s| !s.is_empty()).unwrap_or(path)
}

/// The `argc`/`argv` block `exec` places at the bottom of the argument area:
/// a zero return address, `argc`, a pointer to `argv[]`, the null-terminated
/// pointer array, then the strings.
fn argument_block(base: u32, argv: &[&[u8]]) -> Result<Vec<u8>, KernelError> {
    if argv.len() >= (MEM_TASK_ARG_SIZE / 4) as usize {
        return Err(KernelError::ArgumentsTooLarge);
    }
    #[allow(clippy::cast_possible_truncation)]
    let argc = argv.len() as u32;
    let header = 3 * 4;
    let table = base + header;
    let strings_at = table + (argc + 1) * 4;
    let strings_len: usize = argv.iter().map(|a| a.len() + 1).sum();
    let total = (strings_at - base) as usize + strings_len;
    if total > MEM_TASK_ARG_SIZE as usize {
        return Err(KernelError::ArgumentsTooLarge);
    }

    let mut block = Vec::with_capacity(total);
    block.extend_from_slice(&0u32.to_le_bytes());
    block.extend_from_slice(&argc.to_le_bytes());
    block.extend_from_slice(&table.to_le_bytes());

    let mut next = strings_at;
    for arg in argv {
        block.extend_from_slice(&next.to_le_bytes());
        #[allow(clippy::cast_possible_truncation)]
        let len = arg.len() as u32;
        next += len + 1;
    }
    block.extend_from_slice(&0u32.to_le_bytes());
    for arg in argv {
        block.extend_from_slice(arg);
        block.push(0);
    }
    Ok(block)
}

impl<P: Platform> Kernel<P> {
    /// Fill slot `id` with a fresh task: TSS selector, one-page kernel stack
    /// and an address space holding only the kernel mappings.
    ///
    /// A `stack_top` of zero runs the task on its kernel stack.
    pub(crate) fn task_init(
        &mut self,
        id: TaskId,
        name: &str,
        entry: u32,
        stack_top: u32,
        flags: TaskFlags,
    ) -> Result<(), KernelError> {
        #[allow(clippy::cast_possible_truncation)]
        let limit = size_of::<TaskContext>() as u32 - 1;
        let tss = self.gdt.alloc_tss(self.tasks.context_address(id), limit)?;

        let kernel_stack = match self.vmm.frames().alloc(1) {
            Ok(pa) => pa,
            Err(e) => {
                self.gdt.free(tss);
                return Err(e.into());
            }
        };
        let dir = match self.vmm.create_address_space() {
            Ok(dir) => dir,
            Err(e) => {
                self.vmm.frames().free(kernel_stack, 1);
                self.gdt.free(tss);
                return Err(e.into());
            }
        };

        let (code, data) = if flags.contains(TaskFlags::SYSTEM) {
            (KERNEL_CS, KERNEL_DS)
        } else {
            (USER_CS, USER_DS)
        };
        let data = u32::from(data);
        let kernel_top = kernel_stack.as_u32() + PAGE_SIZE;
        let context = TaskContext {
            esp0: kernel_top,
            ss0: u32::from(KERNEL_DS),
            cr3: dir.as_u32(),
            eip: entry,
            eflags: EFLAGS_DEFAULT | EFLAGS_IF,
            esp: if stack_top == 0 { kernel_top } else { stack_top },
            cs: u32::from(code),
            ss: data,
            ds: data,
            es: data,
            fs: data,
            gs: data,
            ..TaskContext::default()
        };

        *self.tasks.get_mut(id) = Task {
            in_use: true,
            name: truncated(name, self.config.task_name_len),
            flags,
            slice_max: self.config.time_slice,
            slice_curr: self.config.time_slice,
            context,
            tss_selector: tss,
            kernel_stack: Some(kernel_stack),
            files: FdTable::new(self.config.fds_per_task),
            ..Task::default()
        };
        debug!("task {id} '{name}' initialised, tss {tss:#x}");
        Ok(())
    }

    /// Hand `id` the next process id. Only tasks that made it through
    /// their setup get one, so failed forks leave no gaps.
    pub(crate) fn assign_pid(&mut self, id: TaskId) -> Pid {
        let pid = self.next_pid;
        self.next_pid += 1;
        self.tasks.get_mut(id).pid = pid;
        pid
    }

    /// Release everything [`task_init`](Self::task_init) allocated and free the slot.
    pub(crate) fn task_uninit(&mut self, id: TaskId) {
        let task = self.tasks.get(id);
        let tss = task.tss_selector;
        let kernel_stack = task.kernel_stack;
        let dir = task.page_directory();

        self.gdt.free(tss);
        if let Some(stack) = kernel_stack {
            self.vmm.frames().free(stack, 1);
        }
        if dir != PhysicalAddress::zero() {
            self.vmm.destroy_address_space(dir);
        }
        self.critical(|k| {
            k.sched.all.retain(|&t| t != id);
            k.tasks.clear(id);
        });
        debug!("task {id} released");
    }

    /// Number an initialised task and publish it to the scheduler.
    pub(crate) fn task_start(&mut self, id: TaskId) -> Pid {
        self.critical(|k| {
            let pid = k.assign_pid(id);
            k.sched.all.push(id);
            k.set_ready(id);
            pid
        })
    }

    /// Build the first user task from a flat `image` at [`TASK_BASE`] and make
    /// it the running task. Its stack sits at the top of a
    /// [`FIRST_TASK_PAGES`] region; the heap starts right above it.
    ///
    /// # Errors
    /// [`KernelError::InvalidArgument`] if the image does not fit the region;
    /// resource exhaustion as for `fork`.
    pub fn start_first_task(&mut self, image: &[u8]) -> Result<(), KernelError> {
        let region = FIRST_TASK_PAGES * PAGE_SIZE;
        if image.len() > region as usize {
            return Err(KernelError::InvalidArgument);
        }
        let base = VirtualAddress::new(TASK_BASE);
        let top = TASK_BASE + region;

        self.task_init(TaskId::FIRST, "first task", TASK_BASE, top, TaskFlags::empty())?;
        let dir = self.tasks.get(TaskId::FIRST).page_directory();
        let loaded = self
            .vmm
            .alloc_and_map(dir, base, region, PageFlags::USER | PageFlags::WRITABLE)
            .and_then(|()| self.vmm.copy_bytes_between(dir, base, image));
        if let Err(e) = loaded {
            warn!("first task: {e}");
            self.task_uninit(TaskId::FIRST);
            return Err(e.into());
        }

        let first = self.tasks.get_mut(TaskId::FIRST);
        first.heap_start = top;
        first.heap_end = top;

        self.critical(|k| {
            k.assign_pid(TaskId::FIRST);
            k.sched.all.push(TaskId::FIRST);
            k.set_ready(TaskId::FIRST);
            k.tasks.get_mut(TaskId::FIRST).state = TaskState::Running;
            k.sched.current = Some(TaskId::FIRST);
            k.cpu.load_page_directory(dir);
        });
        debug!("first task running, {} byte image", image.len());
        Ok(())
    }

    #[must_use]
    pub fn getpid(&self) -> Pid {
        self.tasks.get(self.running()).pid
    }

    /// Duplicate the calling task. The child resumes at the caller's return
    /// address with `eax = 0` and gets its own copy of every writable page.
    ///
    /// # Errors
    /// [`KernelError::TaskTableFull`], [`KernelError::DescriptorTableFull`] or
    /// [`KernelError::OutOfMemory`]; the parent is left untouched.
    pub fn fork(&mut self, frame: &SyscallFrame) -> Result<Pid, KernelError> {
        let parent = self.running();
        let child = self
            .critical(|k| k.tasks.claim_slot())
            .ok_or(KernelError::TaskTableFull)?;

        let name = self.tasks.get(parent).name.clone();
        let stack = frame.esp + SYSCALL_PARAM_BYTES;
        if let Err(e) = self.task_init(child, &name, frame.eip, stack, TaskFlags::empty()) {
            self.critical(|k| k.tasks.clear(child));
            return Err(e);
        }

        let (from, to) = self.tasks.pair_mut(parent, child);
        let ctx = &mut to.context;
        ctx.eax = 0;
        ctx.ebx = frame.ebx;
        ctx.ecx = frame.ecx;
        ctx.edx = frame.edx;
        ctx.esi = frame.esi;
        ctx.edi = frame.edi;
        ctx.ebp = frame.ebp;
        ctx.cs = frame.cs;
        ctx.ds = frame.ds;
        ctx.es = frame.es;
        ctx.fs = frame.fs;
        ctx.gs = frame.gs;
        ctx.ss = frame.ss;
        ctx.eflags = frame.eflags;
        to.slice_max = from.slice_max;
        to.slice_curr = from.slice_max;
        to.heap_start = from.heap_start;
        to.heap_end = from.heap_end;
        to.parent = Some(parent);
        let (from_dir, to_dir) = (from.page_directory(), to.page_directory());

        if let Err(e) = self.vmm.fork_address_space(to_dir, from_dir) {
            warn!("fork of {parent} failed: {e}");
            self.task_uninit(child);
            return Err(e.into());
        }

        let inherited = self.tasks.get(parent).files.clone();
        for file in inherited.files() {
            self.files.inc_ref(file);
        }
        self.tasks.get_mut(child).files = inherited;

        let pid = self.task_start(child);
        debug!("{parent} forked pid {pid} into {child}");
        Ok(pid)
    }

    /// Replace the calling task's image with the program at `path`.
    ///
    /// On success `frame` is rewritten so the gate returns into the new
    /// program's entry point with `argc`/`argv` on its stack.
    ///
    /// # Errors
    /// Missing or malformed image, oversized arguments, or memory exhaustion.
    /// The old image stays active and `frame` is untouched.
    pub fn exec(
        &mut self,
        frame: &mut SyscallFrame,
        path: &str,
        argv: &[&[u8]],
    ) -> Result<(), KernelError> {
        let current = self.running();
        let dir = self.vmm.create_address_space()?;

        let (entry, heap) = match self.build_image(dir, path, argv) {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("exec {path}: {e}");
                self.vmm.destroy_address_space(dir);
                return Err(e);
            }
        };

        let name = truncated(base_name(path), self.config.task_name_len);
        let task = self.tasks.get_mut(current);
        let old = task.page_directory();
        task.context.cr3 = dir.as_u32();
        task.heap_start = heap.as_u32();
        task.heap_end = heap.as_u32();
        task.name = name;
        self.cpu.load_page_directory(dir);
        self.vmm.destroy_address_space(old);

        frame.eip = entry.as_u32();
        frame.esp = MEM_TASK_STACK_TOP - MEM_TASK_ARG_SIZE - SYSCALL_PARAM_BYTES;
        frame.eflags = EFLAGS_DEFAULT | EFLAGS_IF;
        frame.eax = 0;
        frame.ebx = 0;
        frame.ecx = 0;
        frame.edx = 0;
        frame.esi = 0;
        frame.edi = 0;
        frame.ebp = 0;
        debug!("{current} exec {path}, entry {entry}");
        Ok(())
    }

    /// Load `path`, map the user stack and place the arguments into `dir`.
    fn build_image(
        &mut self,
        dir: PhysicalAddress,
        path: &str,
        argv: &[&[u8]],
    ) -> Result<(VirtualAddress, VirtualAddress), KernelError> {
        let loaded = self.load_program(dir, path)?;

        let stack_bottom = VirtualAddress::new(MEM_TASK_STACK_TOP - MEM_TASK_STACK_SIZE);
        self.vmm.alloc_and_map(
            dir,
            stack_bottom,
            MEM_TASK_STACK_SIZE,
            PageFlags::USER | PageFlags::WRITABLE,
        )?;

        let base = MEM_TASK_STACK_TOP - MEM_TASK_ARG_SIZE;
        let block = argument_block(base, argv)?;
        self.vmm
            .copy_bytes_between(dir, VirtualAddress::new(base), &block)?;
        Ok(loaded)
    }

    fn load_program(
        &mut self,
        dir: PhysicalAddress,
        path: &str,
    ) -> Result<(VirtualAddress, VirtualAddress), KernelError> {
        let handle = self.images.open(path)?;
        let result = self.load_segments(dir, handle);
        self.images.close(handle);
        result
    }

    /// Map and fill every `PT_LOAD` segment; returns the entry point and the
    /// highest segment end.
    fn load_segments(
        &mut self,
        dir: PhysicalAddress,
        handle: <P::Images as ImageSource>::Handle,
    ) -> Result<(VirtualAddress, VirtualAddress), KernelError> {
        let mut raw = [0u8; EHDR_SIZE];
        if !read_exact(&mut self.images, handle, &mut raw)? {
            return Err(ElfError::TooShort.into());
        }
        let header = parse_header(&raw)?;

        let mut end = VirtualAddress::new(TASK_BASE);
        for index in 0..header.e_phnum {
            self.images.seek(handle, header.ph_offset(index)?)?;
            let mut raw = [0u8; PHDR_SIZE];
            if !read_exact(&mut self.images, handle, &mut raw)? {
                return Err(ElfError::TooShort.into());
            }
            let ph = parse_program_header(&raw)?;
            if ph.p_type != PT_LOAD {
                continue;
            }
            end = end.max(self.load_segment(dir, handle, &ph)?);
        }
        Ok((header.e_entry, end))
    }

    fn load_segment(
        &mut self,
        dir: PhysicalAddress,
        handle: <P::Images as ImageSource>::Handle,
        ph: &Ph32,
    ) -> Result<VirtualAddress, KernelError> {
        let end = ph.end()?;
        if ph.p_vaddr.as_u32() < TASK_BASE
            || end.as_u32() > MEM_TASK_STACK_TOP - MEM_TASK_STACK_SIZE
        {
            return Err(ElfError::BadSegment(ph.p_vaddr).into());
        }

        let mut flags = PageFlags::USER;
        if ph.p_flags.write() {
            flags |= PageFlags::WRITABLE;
        }
        let mut page = ph.p_vaddr.align_down();
        while page < end {
            // Segments may share a page; the first one maps it.
            if self.vmm.get_physical(dir, page).is_none() {
                self.vmm.alloc_and_map(dir, page, PAGE_SIZE, flags)?;
            }
            page = page + PAGE_SIZE;
        }

        self.images.seek(handle, ph.p_offset)?;
        let mut buf = vec![0u8; PAGE_SIZE as usize];
        let mut done = 0;
        while done < ph.p_filesz {
            let chunk = (ph.p_filesz - done).min(PAGE_SIZE);
            let part = &mut buf[..chunk as usize];
            if !read_exact(&mut self.images, handle, part)? {
                return Err(ElfError::TooShort.into());
            }
            self.vmm.copy_bytes_between(dir, ph.p_vaddr + done, part)?;
            done += chunk;
        }
        Ok(end)
    }

    /// Terminate the calling task with `status` and switch away.
    ///
    /// Open files are closed, children are handed to the first task, and
    /// the parent is woken if it is waiting. The slot stays a zombie until
    /// the parent reaps it with [`wait`](Self::wait).
    pub fn exit(&mut self, status: i32) {
        let current = self.running();
        let open: Vec<FileId> = self.tasks.get_mut(current).files.drain().collect();
        for file in open {
            self.files.release(file);
        }

        self.critical(|k| {
            let children: Vec<TaskId> = k
                .tasks
                .iter()
                .filter(|(_, t)| t.parent == Some(current))
                .map(|(id, _)| id)
                .collect();
            let mut orphaned_zombie = false;
            for child in children {
                let task = k.tasks.get_mut(child);
                task.parent = Some(TaskId::FIRST);
                orphaned_zombie |= task.state == TaskState::Zombie;
            }
            if orphaned_zombie {
                k.wake_if_waiting(TaskId::FIRST);
            }
            if let Some(parent) = k.tasks.get(current).parent {
                k.wake_if_waiting(parent);
            }

            k.set_unready(current);
            let task = k.tasks.get_mut(current);
            task.state = TaskState::Zombie;
            task.status = status;
            debug!("{current} exited with {status}");
            k.switch();
        });
    }

    fn wake_if_waiting(&mut self, id: TaskId) {
        if self.tasks.get(id).state == TaskState::Waiting {
            self.set_ready(id);
        }
    }

    /// Reap one zombie child of the calling task.
    ///
    /// With no zombie child yet the task waits (and the CPU switches away);
    /// the call has to be issued again once it runs.
    pub fn wait(&mut self) -> Poll<(Pid, i32)> {
        let current = self.running();
        self.critical(|k| {
            let zombie = k
                .tasks
                .iter()
                .find(|(_, t)| t.parent == Some(current) && t.state == TaskState::Zombie)
                .map(|(id, t)| (id, t.pid, t.status));

            if let Some((id, pid, status)) = zombie {
                k.task_uninit(id);
                debug!("{current} reaped pid {pid} ({status})");
                return Poll::Ready((pid, status));
            }

            k.set_unready(current);
            k.tasks.get_mut(current).state = TaskState::Waiting;
            k.switch();
            Poll::Pending
        })
    }

    /// Put the calling task to sleep for at least `ms` milliseconds.
    pub fn sleep(&mut self, ms: u32) -> bool {
        let ticks = self.config.ms_to_ticks(ms);
        self.critical(|k| {
            let current = k.running();
            k.set_unready(current);
            k.set_sleep(current, ticks);
            k.switch()
        })
    }

    /// Grow the heap by `increment` bytes and return the previous break.
    ///
    /// Slack in the page that holds the current break is used first; the
    /// rest is backed by fresh zeroed pages.
    ///
    /// # Errors
    /// [`KernelError::InvalidArgument`] for a negative or overflowing
    /// increment, [`KernelError::OutOfMemory`].
    pub fn sbrk(&mut self, increment: i32) -> Result<u32, KernelError> {
        let current = self.running();
        let task = self.tasks.get(current);
        let (previous, dir) = (task.heap_end, task.page_directory());

        let increment = u32::try_from(increment).map_err(|_| KernelError::InvalidArgument)?;
        if increment == 0 {
            return Ok(previous);
        }
        let end = previous
            .checked_add(increment)
            .filter(|&end| end <= MEM_TASK_STACK_TOP - MEM_TASK_STACK_SIZE)
            .ok_or(KernelError::InvalidArgument)?;

        // Pages left behind by an earlier, partly failed call are reused.
        let mut page = VirtualAddress::new(kernel_memory_addresses::align_up(previous, PAGE_SIZE));
        while page.as_u32() < end {
            if self.vmm.get_physical(dir, page).is_none() {
                self.vmm
                    .alloc_and_map(dir, page, PAGE_SIZE, PageFlags::USER | PageFlags::WRITABLE)?;
            }
            page = page + PAGE_SIZE;
        }
        self.tasks.get_mut(current).heap_end = end;
        Ok(previous)
    }

    /// Open a new system-wide file for the calling task.
    ///
    /// # Errors
    /// [`KernelError::FileTableFull`] or [`KernelError::FdTableFull`].
    pub fn open_file(&mut self) -> Result<usize, KernelError> {
        let current = self.running();
        let file = self.files.alloc()?;
        if let Some(fd) = self.tasks.get_mut(current).files.alloc_fd(file) {
            Ok(fd)
        } else {
            self.files.release(file);
            Err(KernelError::FdTableFull)
        }
    }

    /// # Errors
    /// [`KernelError::BadFd`] if `fd` is not open.
    pub fn close_file(&mut self, fd: usize) -> Result<(), KernelError> {
        let current = self.running();
        let file = self
            .tasks
            .get_mut(current)
            .files
            .remove_fd(fd)
            .ok_or(KernelError::BadFd(fd))?;
        self.files.release(file);
        Ok(())
    }
}
