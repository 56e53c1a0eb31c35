//! Shared memory layouts for the control segment and the data segments.
//!
//! Both layouts start with a magic number and a version so that an endpoint
//! attaching to an existing object can tell it apart from stale or foreign
//! data before trusting anything else in it.
//!
//! # Control segment
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ magic (8B atomic) │ version (8B) │ attached (8B atomic)      │
//! ├──────────────────────────────────────────────────────────────┤
//! │ DirectionSlot[master→slave]                                  │
//! │  ┌───────────────────┬────────────────┬───────────────────┐  │
//! │  │ capacity (atomic) │ mutex tag      │ pthread mutex     │  │
//! │  └───────────────────┴────────────────┴───────────────────┘  │
//! ├──────────────────────────────────────────────────────────────┤
//! │ DirectionSlot[slave→master]                                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The mutexes live here rather than in the data segments because a data
//! segment is destroyed and recreated when it grows, while its mutex is held.
//!
//! # Data segment
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ magic │ version │ capacity │ len (atomic)     (64B header)   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ payload bytes [0, capacity)                                  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::mem::size_of;
use std::sync::atomic::{AtomicU64, Ordering};
use tandem_sync::ProcessMutex;

/// ASCII "TANDCTRL".
pub const CONTROL_MAGIC: u64 = 0x5441_4E44_4354_524C;

/// ASCII "TANDSEGM".
pub const SEGMENT_MAGIC: u64 = 0x5441_4E44_5345_474D;

/// Increment on any incompatible change to either layout.
pub const LAYOUT_VERSION: u64 = 1;

/// Room for the longest mutex name the naming rules allow.
pub const MUTEX_TAG_LEN: usize = 256;

#[repr(C)]
pub struct DirectionSlot {
    /// Authoritative payload capacity of the direction's data segment.
    /// Written only by that direction's writer while holding `mutex`.
    pub capacity: AtomicU64,
    /// NUL-padded name of `mutex`, checked by every endpoint that attaches.
    pub mutex_tag: [u8; MUTEX_TAG_LEN],
    pub mutex: ProcessMutex,
}

#[repr(C, align(64))]
pub struct ControlHeader {
    /// Zero until the creator has initialised every other field.
    pub magic: AtomicU64,
    pub version: u64,
    /// Number of endpoints currently attached to the channel.
    pub attached: AtomicU64,
    pub directions: [DirectionSlot; 2],
}

#[repr(C, align(64))]
pub struct SegmentHeader {
    pub magic: u64,
    pub version: u64,
    /// Payload bytes that follow the header.
    pub capacity: u64,
    /// Length of the current payload snapshot.
    pub len: AtomicU64,
}

pub const fn control_bytes() -> usize {
    size_of::<ControlHeader>()
}

pub const fn payload_offset() -> usize {
    size_of::<SegmentHeader>()
}

/// Total object size for a data segment carrying `capacity` payload bytes,
/// `None` if it does not fit the address space.
pub fn bytes_for_segment(capacity: u64) -> Option<usize> {
    usize::try_from(capacity)
        .ok()?
        .checked_add(payload_offset())
        .filter(|&total| total <= isize::MAX as usize)
}

pub fn encode_tag(name: &str) -> [u8; MUTEX_TAG_LEN] {
    let mut tag = [0u8; MUTEX_TAG_LEN];
    let n = name.len().min(MUTEX_TAG_LEN);
    tag[..n].copy_from_slice(&name.as_bytes()[..n]);
    tag
}

impl ControlHeader {
    /// Checks a published header. `mapped` is the length of the mapping.
    pub fn validate(&self, mapped: usize) -> Result<(), &'static str> {
        if mapped < control_bytes() {
            return Err("control segment is too small");
        }
        if self.magic.load(Ordering::Acquire) != CONTROL_MAGIC {
            return Err("bad control magic");
        }
        if self.version != LAYOUT_VERSION {
            return Err("control layout version mismatch");
        }
        Ok(())
    }

    pub fn slot(&self, index: usize) -> &DirectionSlot {
        &self.directions[index]
    }
}

impl DirectionSlot {
    pub fn tag_matches(&self, name: &str) -> bool {
        self.mutex_tag == encode_tag(name)
    }
}

impl SegmentHeader {
    /// Checks a data segment against the capacity published for it.
    pub fn validate(&self, expected_capacity: u64, mapped: usize) -> Result<(), &'static str> {
        if self.magic != SEGMENT_MAGIC {
            return Err("bad segment magic");
        }
        if self.version != LAYOUT_VERSION {
            return Err("segment layout version mismatch");
        }
        if self.capacity != expected_capacity {
            return Err("segment capacity disagrees with control segment");
        }
        match bytes_for_segment(self.capacity) {
            Some(total) if total <= mapped => Ok(()),
            _ => Err("segment is smaller than its recorded capacity"),
        }
    }
}
