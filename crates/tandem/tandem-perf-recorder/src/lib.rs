//! Per-stage latency recorder for the channel's send and receive paths.
//!
//! With the `record` feature **off** (the default), `PerfRecorder` is a
//! zero-sized type and every method is an `#[inline(always)]` no-op.
//!
//! With `record` **on**, each stage owns a pre-allocated sample buffer and
//! `begin`/`end` pairs store elapsed nanoseconds from the monotonic clock.
//! Samples beyond `MAX_SAMPLES` per stage are dropped.

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PerfStage {
    /// Acquiring a direction mutex.
    Lock = 0,
    /// Recreating an outbound segment with a larger capacity.
    Grow = 1,
    /// Re-attaching a segment after the peer grew it.
    Rebind = 2,
    /// Copying a payload into the outbound segment.
    Write = 3,
    Post = 4,
    /// Waiting on the inbound semaphore (successful waits only).
    Wait = 5,
    /// Copying a payload out of the inbound segment.
    Read = 6,
}

pub const NUM_STAGES: usize = 7;
pub const MAX_SAMPLES: usize = 65_536;

impl PerfStage {
    pub const ALL: [PerfStage; NUM_STAGES] = [
        PerfStage::Lock,
        PerfStage::Grow,
        PerfStage::Rebind,
        PerfStage::Write,
        PerfStage::Post,
        PerfStage::Wait,
        PerfStage::Read,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PerfStage::Lock => "lock",
            PerfStage::Grow => "grow",
            PerfStage::Rebind => "rebind",
            PerfStage::Write => "write",
            PerfStage::Post => "post",
            PerfStage::Wait => "wait",
            PerfStage::Read => "read",
        }
    }
}

// ─── Feature: record ON ─────────────────────────────────────────────────────

#[cfg(feature = "record")]
mod inner {
    use super::*;

    #[cfg(target_os = "macos")]
    #[inline(always)]
    #[allow(deprecated)]
    pub fn now_ns() -> u64 {
        use std::sync::OnceLock;
        static TIMEBASE: OnceLock<(u64, u64)> = OnceLock::new();
        let (numer, denom) = *TIMEBASE.get_or_init(|| {
            let mut info = libc::mach_timebase_info_data_t { numer: 0, denom: 0 };
            let rc = unsafe { libc::mach_timebase_info(&mut info) };
            if rc != 0 || info.denom == 0 {
                (1, 1)
            } else {
                (info.numer as u64, info.denom as u64)
            }
        });
        let t = unsafe { libc::mach_absolute_time() } as u128;
        ((t * numer as u128) / denom as u128) as u64
    }

    #[cfg(not(target_os = "macos"))]
    #[inline(always)]
    pub fn now_ns() -> u64 {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
        }
        (ts.tv_sec as u64) * 1_000_000_000 + ts.tv_nsec as u64
    }

    struct StageBuf {
        samples: Vec<u64>,
        /// Start of an open `begin`, taken by the matching `end` or `cancel`.
        pending: Option<u64>,
    }

    impl StageBuf {
        fn new() -> Self {
            Self {
                samples: Vec::with_capacity(MAX_SAMPLES),
                pending: None,
            }
        }

        #[inline(always)]
        fn push(&mut self, ns: u64) {
            if self.samples.len() < MAX_SAMPLES {
                self.samples.push(ns);
            }
        }
    }

    pub struct PerfRecorder {
        stages: [StageBuf; NUM_STAGES],
    }

    impl PerfRecorder {
        pub fn new() -> Self {
            Self {
                stages: std::array::from_fn(|_| StageBuf::new()),
            }
        }

        #[inline(always)]
        pub fn begin(&mut self, stage: PerfStage) {
            self.stages[stage as usize].pending = Some(now_ns());
        }

        /// Records the time since the last `begin`. Does nothing if the stage
        /// was never begun or was cancelled.
        #[inline(always)]
        pub fn end(&mut self, stage: PerfStage) {
            let buf = &mut self.stages[stage as usize];
            if let Some(start) = buf.pending.take() {
                buf.push(now_ns().saturating_sub(start));
            }
        }

        /// Discards an open `begin` without recording a sample.
        #[inline(always)]
        pub fn cancel(&mut self, stage: PerfStage) {
            self.stages[stage as usize].pending = None;
        }

        #[inline(always)]
        pub fn record(&mut self, stage: PerfStage, duration_ns: u64) {
            self.stages[stage as usize].push(duration_ns);
        }

        pub fn samples(&self, stage: PerfStage) -> &[u64] {
            &self.stages[stage as usize].samples
        }

        pub fn count(&self, stage: PerfStage) -> usize {
            self.stages[stage as usize].samples.len()
        }

        pub fn drain(&mut self, stage: PerfStage) {
            self.stages[stage as usize].samples.clear();
        }

        pub fn reset(&mut self) {
            for buf in self.stages.iter_mut() {
                buf.samples.clear();
            }
        }
    }

    impl Default for PerfRecorder {
        fn default() -> Self {
            Self::new()
        }
    }
}

// ─── Feature: record OFF (zero-cost stubs) ──────────────────────────────────

#[cfg(not(feature = "record"))]
mod inner {
    use super::*;

    #[inline(always)]
    pub fn now_ns() -> u64 {
        0
    }

    pub struct PerfRecorder;

    impl PerfRecorder {
        #[inline(always)]
        pub fn new() -> Self {
            Self
        }
        #[inline(always)]
        pub fn begin(&mut self, _stage: PerfStage) {}
        #[inline(always)]
        pub fn end(&mut self, _stage: PerfStage) {}
        #[inline(always)]
        pub fn cancel(&mut self, _stage: PerfStage) {}
        #[inline(always)]
        pub fn record(&mut self, _stage: PerfStage, _duration_ns: u64) {}
        #[inline(always)]
        pub fn samples(&self, _stage: PerfStage) -> &[u64] {
            &[]
        }
        #[inline(always)]
        pub fn count(&self, _stage: PerfStage) -> usize {
            0
        }
        #[inline(always)]
        pub fn drain(&mut self, _stage: PerfStage) {}
        #[inline(always)]
        pub fn reset(&mut self) {}
    }

    impl Default for PerfRecorder {
        fn default() -> Self {
            Self
        }
    }
}

pub use inner::{PerfRecorder, now_ns};
