//! Directional data segments: one payload buffer per traffic direction.
//!
//! Every method here expects the caller to hold the direction's mutex from
//! the control segment. The writer grows a segment by unlinking the name and
//! creating a larger object in its place; readers notice the new capacity in
//! the control segment and re-open the name.

use crate::error::ChannelError;
use crate::growth::grown_capacity;
use crate::naming::Direction;
use crate::shm_layout::{
    LAYOUT_VERSION, SEGMENT_MAGIC, SegmentHeader, bytes_for_segment, payload_offset,
};
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use tandem_shm::{Origin, SharedMemory};
use tracing::debug;

#[derive(Debug)]
pub(crate) struct DirectionalSegment {
    direction: Direction,
    shm: SharedMemory,
    /// Capacity of the object currently mapped by this endpoint.
    capacity: u64,
}

/// Writes a fresh header into a newly created object.
///
/// # Safety
/// `shm` must have been created by the caller and be at least
/// `bytes_for_segment(capacity)` long; nobody else may map it yet.
unsafe fn init_header(shm: &SharedMemory, capacity: u64) {
    unsafe {
        ptr::write(
            shm.as_ptr() as *mut SegmentHeader,
            SegmentHeader {
                magic: SEGMENT_MAGIC,
                version: LAYOUT_VERSION,
                capacity,
                len: AtomicU64::new(0),
            },
        );
    }
}

impl DirectionalSegment {
    /// Attaches to the direction's segment, creating it with `capacity` if no
    /// endpoint has yet.
    pub(crate) fn create_or_open(
        name: &str,
        direction: Direction,
        capacity: u64,
    ) -> Result<Self, ChannelError> {
        let size = bytes_for_segment(capacity).ok_or(ChannelError::MessageTooLarge { len: capacity })?;
        let (shm, origin) =
            SharedMemory::create_or_open(name, size).map_err(|source| ChannelError::Construction {
                resource: name.to_owned(),
                source,
            })?;

        if origin == Origin::Created {
            // SAFETY: created just now, sized for `capacity`, and the caller
            // holds the direction mutex so no peer can open it concurrently.
            unsafe { init_header(&shm, capacity) };
            debug!(segment = name, %direction, capacity, "created data segment");
        }

        let segment = Self {
            direction,
            shm,
            capacity,
        };
        segment.validate()?;
        Ok(segment)
    }

    #[inline]
    fn header(&self) -> &SegmentHeader {
        // SAFETY: validated to be at least a header long at attach time.
        unsafe { &*(self.shm.as_ptr() as *const SegmentHeader) }
    }

    fn validate(&self) -> Result<(), ChannelError> {
        self.header()
            .validate(self.capacity, self.shm.len())
            .map_err(|reason| ChannelError::Corrupt {
                resource: self.shm.name().to_owned(),
                reason,
            })
    }

    pub(crate) fn name(&self) -> &str {
        self.shm.name()
    }

    pub(crate) fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Re-opens the segment after a writer recreated it with `published`
    /// capacity.
    pub(crate) fn rebind(&mut self, published: u64) -> Result<(), ChannelError> {
        let shm = SharedMemory::open(self.name()).map_err(|source| ChannelError::Rebind {
            resource: self.name().to_owned(),
            source,
        })?;
        let previous = std::mem::replace(&mut self.shm, shm);
        let stale = self.capacity;
        self.capacity = published;
        if let Err(e) = self.validate() {
            self.shm = previous;
            self.capacity = stale;
            return Err(e);
        }
        debug!(
            segment = self.name(),
            direction = %self.direction,
            from = stale,
            to = published,
            "rebound data segment"
        );
        Ok(())
    }

    /// Replaces the segment with one large enough for `needed` bytes.
    ///
    /// Returns the new capacity, which the caller must publish in the control
    /// segment before releasing the mutex.
    pub(crate) fn grow(&mut self, needed: u64) -> Result<u64, ChannelError> {
        let new_capacity =
            grown_capacity(self.capacity, needed).ok_or(ChannelError::MessageTooLarge { len: needed })?;
        let size =
            bytes_for_segment(new_capacity).ok_or(ChannelError::MessageTooLarge { len: needed })?;
        let growth = |source| ChannelError::Growth {
            resource: self.name().to_owned(),
            requested: new_capacity,
            source,
        };

        SharedMemory::unlink(self.name()).map_err(growth)?;
        let shm = SharedMemory::create(self.name(), size).map_err(growth)?;
        // SAFETY: created just now with room for `new_capacity`; the name was
        // unlinked under the direction mutex so no reader can have opened it.
        unsafe { init_header(&shm, new_capacity) };

        debug!(
            segment = self.name(),
            direction = %self.direction,
            from = self.capacity,
            to = new_capacity,
            "grew data segment"
        );
        self.shm = shm;
        self.capacity = new_capacity;
        Ok(new_capacity)
    }

    /// Replaces the current snapshot with `payload`.
    ///
    /// The caller has made sure `payload` fits.
    pub(crate) fn write(&mut self, payload: &[u8]) {
        debug_assert!(payload.len() as u64 <= self.capacity);
        // SAFETY: payload_offset() + payload.len() is within the mapping
        // because the capacity was validated against the mapped length.
        unsafe {
            let dst = self.shm.as_ptr().add(payload_offset());
            ptr::copy_nonoverlapping(payload.as_ptr(), dst, payload.len());
        }
        self.header()
            .len
            .store(payload.len() as u64, Ordering::Release);
    }

    /// Copies the current snapshot into `out`, replacing its contents.
    pub(crate) fn read_into(&self, out: &mut Vec<u8>) -> Result<(), ChannelError> {
        let len = self.header().len.load(Ordering::Acquire);
        if len > self.capacity {
            return Err(ChannelError::Corrupt {
                resource: self.name().to_owned(),
                reason: "payload length exceeds segment capacity",
            });
        }
        // SAFETY: len <= capacity, which fits the mapping.
        let payload = unsafe {
            std::slice::from_raw_parts(self.shm.as_ptr().add(payload_offset()), len as usize)
        };
        out.clear();
        out.extend_from_slice(payload);
        Ok(())
    }
}
