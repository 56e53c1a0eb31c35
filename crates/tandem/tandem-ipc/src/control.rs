//! The control segment: capacities, mutexes and the attachment count.

use crate::error::ChannelError;
use crate::naming::{ChannelNames, Direction};
use crate::shm_layout::{
    CONTROL_MAGIC, ControlHeader, LAYOUT_VERSION, control_bytes, encode_tag,
};
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tandem_shm::SharedMemory;
use tandem_sync::ProcessMutex;
use tracing::debug;

const ATTACH_POLL: Duration = Duration::from_millis(1);

#[derive(Debug)]
pub(crate) struct ControlSegment {
    shm: SharedMemory,
}

impl ControlSegment {
    /// Creates the control segment, or attaches to one created by the peer.
    ///
    /// An attaching endpoint waits up to `attach_timeout` for the creator to
    /// size the object and publish its header.
    pub(crate) fn create_or_open(
        names: &ChannelNames,
        initial_capacity: u64,
        attach_timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let name = names.control();
        let construction = |source: io::Error| ChannelError::Construction {
            resource: name.to_owned(),
            source,
        };
        let deadline = Instant::now() + attach_timeout;

        loop {
            match SharedMemory::create(name, control_bytes()) {
                Ok(shm) => {
                    // SAFETY: we created the object; nobody else reads it
                    // until the magic is published below.
                    let init = unsafe {
                        init_header(shm.as_ptr() as *mut ControlHeader, names, initial_capacity)
                    };
                    if let Err(e) = init {
                        let _ = SharedMemory::unlink(name);
                        return Err(construction(e));
                    }
                    debug!(segment = name, initial_capacity, "created control segment");
                    return Ok(Self { shm });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(construction(e)),
            }

            match SharedMemory::open(name) {
                Ok(shm) => {
                    let control = Self { shm };
                    control.wait_published(deadline).map_err(construction)?;
                    control
                        .header()
                        .validate(control.shm.len())
                        .map_err(|reason| ChannelError::Corrupt {
                            resource: name.to_owned(),
                            reason,
                        })?;
                    control.check_tags(names)?;
                    debug!(segment = name, "attached to control segment");
                    return Ok(control);
                }
                // The creator has not sized the object yet, or removed it
                // between our create and open.
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::UnexpectedEof | io::ErrorKind::NotFound
                    ) && Instant::now() < deadline =>
                {
                    thread::sleep(ATTACH_POLL);
                }
                Err(e) => return Err(construction(e)),
            }
        }
    }

    fn wait_published(&self, deadline: Instant) -> io::Result<()> {
        if self.shm.len() < control_bytes() {
            // Let validate() report the size mismatch.
            return Ok(());
        }
        while self.header().magic.load(Ordering::Acquire) == 0 {
            if Instant::now() >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "creator never published the control segment",
                ));
            }
            thread::sleep(ATTACH_POLL);
        }
        Ok(())
    }

    fn check_tags(&self, names: &ChannelNames) -> Result<(), ChannelError> {
        for direction in Direction::ALL {
            if !self.header().slot(direction.index()).tag_matches(names.mutex(direction)) {
                return Err(ChannelError::Corrupt {
                    resource: self.shm.name().to_owned(),
                    reason: "mutex tag does not match the channel name",
                });
            }
        }
        Ok(())
    }

    #[inline]
    fn header(&self) -> &ControlHeader {
        // SAFETY: the mapping is at least control_bytes() long (checked at
        // attach) and outlives the returned reference.
        unsafe { &*(self.shm.as_ptr() as *const ControlHeader) }
    }

    pub(crate) fn capacity(&self, direction: Direction) -> u64 {
        self.header()
            .slot(direction.index())
            .capacity
            .load(Ordering::Acquire)
    }

    /// Records a new capacity. Caller holds the direction's mutex.
    pub(crate) fn publish_capacity(&self, direction: Direction, capacity: u64) {
        self.header()
            .slot(direction.index())
            .capacity
            .store(capacity, Ordering::Release);
    }

    pub(crate) fn mutex(&self, direction: Direction) -> &ProcessMutex {
        &self.header().slot(direction.index()).mutex
    }

    /// Registers one more endpoint, returning the new count.
    pub(crate) fn attach(&self) -> u64 {
        self.header().attached.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Unregisters an endpoint, returning how many remain.
    pub(crate) fn detach(&self) -> u64 {
        self.header().attached.fetch_sub(1, Ordering::AcqRel).saturating_sub(1)
    }

    pub(crate) fn attached(&self) -> u64 {
        self.header().attached.load(Ordering::Acquire)
    }
}

/// Initialises a freshly created, zero-filled control header.
///
/// # Safety
/// `h` must point to a mapping of at least `control_bytes()` that no other
/// endpoint uses until the magic is stored.
unsafe fn init_header(
    h: *mut ControlHeader,
    names: &ChannelNames,
    initial_capacity: u64,
) -> io::Result<()> {
    unsafe {
        ptr::addr_of_mut!((*h).version).write(LAYOUT_VERSION);
        ptr::addr_of_mut!((*h).attached).write(AtomicU64::new(0));

        let slots = ptr::addr_of_mut!((*h).directions) as *mut crate::shm_layout::DirectionSlot;
        for direction in Direction::ALL {
            let slot = slots.add(direction.index());
            ptr::addr_of_mut!((*slot).capacity).write(AtomicU64::new(initial_capacity));
            ptr::addr_of_mut!((*slot).mutex_tag).write(encode_tag(names.mutex(direction)));
            ProcessMutex::init_at(ptr::addr_of_mut!((*slot).mutex))?;
        }

        // Publish last: openers spin on a non-zero magic.
        (*h).magic.store(CONTROL_MAGIC, Ordering::Release);
    }
    Ok(())
}
