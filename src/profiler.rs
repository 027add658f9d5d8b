//! Wall-clock sampling profiler.
//!
//! A SIGPROF timer fires at [`SAMPLE_RATE_HZ`] while the compiled program
//! runs. The handler reads the interrupted program counter out of the signal
//! context; samples landing inside the JIT region are appended to a bounded
//! ring and attributed to an IR node through the debug map. The handler does
//! no allocation and bounded work: a full ring drops the sample, the map
//! lookup is a linear scan over at most one entry per IR node.
//!
//! Shared-state discipline: `start` publishes the profiler state to a
//! process-global pointer with release ordering before arming the timer;
//! `stop` disarms the timer first and clears the pointer last. Per-node
//! sample counters are atomics, so the post-run reader needs no
//! synchronization beyond program order.

use std::cell::UnsafeCell;
use std::io::{self, Write};
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicUsize, Ordering};

use crate::ast::{Node, NodeKind};
use crate::debug_map::DebugMap;
use crate::Error;

/// Sampling frequency of the SIGPROF timer.
pub const SAMPLE_RATE_HZ: i64 = 1000;

/// Capacity of the raw-sample ring. Overflow drops samples silently.
pub const MAX_SAMPLES: usize = 100_000;

/// One raw sample: interrupted PC and microseconds since `start`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sample {
    pub pc: usize,
    pub timestamp_us: u64,
}

struct SampleRing {
    slots: Box<[UnsafeCell<Sample>]>,
    /// Number of valid slots. Only the signal handler writes it.
    len: AtomicUsize,
    dropped: AtomicUsize,
}

// SAFETY: slots are written only by the signal handler, which preempts the
// single thread driving execution; the owner reads them only after `stop`
// has disarmed the timer and unpublished the pointer.
unsafe impl Sync for SampleRing {}

struct ProfilerShared {
    code_start: usize,
    code_end: usize,
    start_time_us: u64,
    ring: SampleRing,
    /// One sample counter per IR node, indexed by pre-order position.
    counters: Box<[AtomicU32]>,
    map: DebugMap,
}

/// The profiler currently wired to the signal handler.
static CURRENT: AtomicPtr<ProfilerShared> = AtomicPtr::new(ptr::null_mut());

/// Owns the sampling state and the timer lifecycle. Stops itself on drop so
/// the timer can never outlive the shared state it signals into.
pub struct Profiler {
    shared: Box<ProfilerShared>,
    running: bool,
}

impl Profiler {
    /// Build a profiler over the code region recorded in `map`, with one
    /// counter per IR node.
    pub fn new(map: DebugMap, node_count: u32) -> Profiler {
        let code_start = map.code_start();
        let code_end = code_start + map.code_size();
        let slots = (0..MAX_SAMPLES)
            .map(|_| UnsafeCell::new(Sample::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let counters = (0..node_count)
            .map(|_| AtomicU32::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Profiler {
            shared: Box::new(ProfilerShared {
                code_start,
                code_end,
                start_time_us: 0,
                ring: SampleRing {
                    slots,
                    len: AtomicUsize::new(0),
                    dropped: AtomicUsize::new(0),
                },
                counters,
                map,
            }),
            running: false,
        }
    }

    /// Install the SIGPROF handler and arm the interval timer.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.running {
            return Ok(());
        }
        self.shared.start_time_us = now_us();

        // Publish before the first signal can possibly fire.
        CURRENT.store(&mut *self.shared, Ordering::Release);

        unsafe {
            let mut sa: libc::sigaction = std::mem::zeroed();
            let handler: extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void) =
                prof_signal_handler;
            sa.sa_sigaction = handler as usize;
            sa.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
            libc::sigemptyset(&mut sa.sa_mask);
            if libc::sigaction(libc::SIGPROF, &sa, ptr::null_mut()) != 0 {
                CURRENT.store(ptr::null_mut(), Ordering::Release);
                return Err(Error::Profiler(io::Error::last_os_error()));
            }

            let interval = libc::timeval {
                tv_sec: 0,
                tv_usec: (1_000_000 / SAMPLE_RATE_HZ) as libc::suseconds_t,
            };
            let timer = libc::itimerval {
                it_interval: interval,
                it_value: interval,
            };
            if libc::setitimer(libc::ITIMER_PROF, &timer, ptr::null_mut()) != 0 {
                let err = io::Error::last_os_error();
                restore_default_handler();
                CURRENT.store(ptr::null_mut(), Ordering::Release);
                return Err(Error::Profiler(err));
            }
        }

        self.running = true;
        log::info!(
            "profiler started: sampling at {SAMPLE_RATE_HZ} Hz, code region {:#x}..{:#x}",
            self.shared.code_start,
            self.shared.code_end
        );
        Ok(())
    }

    /// Disarm the timer, restore the default handler, unpublish the state.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        unsafe {
            let zero: libc::itimerval = std::mem::zeroed();
            libc::setitimer(libc::ITIMER_PROF, &zero, ptr::null_mut());
            restore_default_handler();
        }
        // Timer is quiet now; only then drop the handler's view.
        CURRENT.store(ptr::null_mut(), Ordering::Release);
        self.running = false;
        log::info!(
            "profiler stopped: collected {} samples ({} dropped)",
            self.sample_count(),
            self.dropped_count()
        );
    }

    pub fn sample_count(&self) -> usize {
        self.shared.ring.len.load(Ordering::Acquire)
    }

    pub fn dropped_count(&self) -> usize {
        self.shared.ring.dropped.load(Ordering::Relaxed)
    }

    /// Drain the raw samples. Only meaningful after `stop`.
    pub fn samples(&self) -> Vec<Sample> {
        assert!(!self.running, "samples are drained after stop()");
        let n = self.sample_count();
        (0..n)
            // SAFETY: the handler is unpublished, nothing writes the slots.
            .map(|i| unsafe { *self.shared.ring.slots[i].get() })
            .collect()
    }

    pub fn debug_map(&self) -> &DebugMap {
        &self.shared.map
    }

    /// Emit the folded-stack profile.
    ///
    /// Depth-first over the IR: loops contribute `@line:col LOOP` frames to
    /// the stack prefix of their descendants, and every non-loop node with
    /// samples emits one `stack count` line. The pre-order walk mirrors the
    /// code generator's numbering, which is what ties counters to nodes.
    pub fn write_folded(&self, program: &[Node], out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "# Folded stack format for flame graphs")?;
        writeln!(out, "# Format: @line:col NODE_TAG count")?;
        writeln!(out)?;
        let mut next = 0u32;
        self.write_folded_level(program, "", &mut next, out)
    }

    fn write_folded_level(
        &self,
        nodes: &[Node],
        prefix: &str,
        next: &mut u32,
        out: &mut impl Write,
    ) -> io::Result<()> {
        for node in nodes {
            let index = *next;
            *next += 1;
            let frame = format!("@{}:{} {}", node.line, node.column, node.tag().name());

            if let NodeKind::Loop { body } = &node.kind {
                let stack = if prefix.is_empty() {
                    frame
                } else {
                    format!("{prefix};{frame}")
                };
                self.write_folded_level(body, &stack, next, out)?;
            } else {
                let count = self.shared.counters[index as usize].load(Ordering::Relaxed);
                if count > 0 {
                    if prefix.is_empty() {
                        writeln!(out, "{frame} {count}")?;
                    } else {
                        writeln!(out, "{prefix};{frame} {count}")?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Drop for Profiler {
    fn drop(&mut self) {
        self.stop();
    }
}

unsafe fn restore_default_handler() {
    let mut sa: libc::sigaction = std::mem::zeroed();
    sa.sa_sigaction = libc::SIG_DFL;
    libc::sigemptyset(&mut sa.sa_mask);
    libc::sigaction(libc::SIGPROF, &sa, ptr::null_mut());
}

extern "C" fn prof_signal_handler(
    _sig: libc::c_int,
    _info: *mut libc::siginfo_t,
    ctx: *mut libc::c_void,
) {
    let shared = CURRENT.load(Ordering::Acquire);
    if shared.is_null() {
        return;
    }
    // SAFETY: `stop` unpublishes the pointer before the owner goes away, and
    // the timer is disarmed before that.
    let shared = unsafe { &*shared };

    let Some(pc) = (unsafe { context_pc(ctx) }) else {
        return;
    };
    if pc < shared.code_start || pc >= shared.code_end {
        return;
    }

    let elapsed = now_us().saturating_sub(shared.start_time_us);
    let n = shared.ring.len.load(Ordering::Relaxed);
    if n < shared.ring.slots.len() {
        // SAFETY: single writer — this handler, on the one executing thread.
        unsafe {
            *shared.ring.slots[n].get() = Sample {
                pc,
                timestamp_us: elapsed,
            };
        }
        shared.ring.len.store(n + 1, Ordering::Release);
    } else {
        shared.ring.dropped.fetch_add(1, Ordering::Relaxed);
    }

    if let Some(entry) = shared.map.find_by_pc(pc) {
        if let Some(counter) = shared.counters.get(entry.node_index as usize) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// ── PC extraction from the signal machine context ────────────────

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
unsafe fn context_pc(ctx: *mut libc::c_void) -> Option<usize> {
    let uc = ctx as *const libc::ucontext_t;
    if uc.is_null() {
        return None;
    }
    Some((*uc).uc_mcontext.gregs[libc::REG_RIP as usize] as usize)
}

#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
unsafe fn context_pc(ctx: *mut libc::c_void) -> Option<usize> {
    let uc = ctx as *const libc::ucontext_t;
    if uc.is_null() {
        return None;
    }
    Some((*uc).uc_mcontext.pc as usize)
}

#[cfg(all(target_os = "macos", target_arch = "x86_64"))]
unsafe fn context_pc(ctx: *mut libc::c_void) -> Option<usize> {
    let uc = ctx as *const libc::ucontext_t;
    if uc.is_null() {
        return None;
    }
    let mc = (*uc).uc_mcontext;
    if mc.is_null() {
        return None;
    }
    Some((*mc).__ss.__rip as usize)
}

#[cfg(all(target_os = "macos", target_arch = "aarch64"))]
unsafe fn context_pc(ctx: *mut libc::c_void) -> Option<usize> {
    let uc = ctx as *const libc::ucontext_t;
    if uc.is_null() {
        return None;
    }
    let mc = (*uc).uc_mcontext;
    if mc.is_null() {
        return None;
    }
    Some((*mc).__ss.__pc as usize)
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
unsafe fn context_pc(_ctx: *mut libc::c_void) -> Option<usize> {
    None
}

fn now_us() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    ts.tv_sec as u64 * 1_000_000 + ts.tv_nsec as u64 / 1_000
}
