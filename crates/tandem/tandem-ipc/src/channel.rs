//! The channel facade: construction, send/receive and teardown.

use crate::control::ControlSegment;
use crate::error::ChannelError;
use crate::naming::{ChannelNames, Direction, Role};
use crate::segment::DirectionalSegment;
use std::fmt;
use std::time::Duration;
use tandem_perf_recorder::{PerfRecorder, PerfStage};
use tandem_shm::SharedMemory;
use tandem_sync::{NamedSemaphore, ProcessMutexGuard};
use tracing::{debug, info, trace, warn};

/// Payload capacity of a data segment created by a fresh channel.
pub const DEFAULT_INITIAL_CAPACITY: u64 = 4096;

/// How long an endpoint waits for its peer to finish creating shared state.
pub const DEFAULT_ATTACH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    pub name: String,
    pub channel_number: u32,
    pub role: Role,
    /// Used only if this endpoint creates the control segment; otherwise
    /// the capacities recorded by the creator apply.
    pub initial_capacity: u64,
    pub attach_timeout: Duration,
}

impl ChannelOptions {
    pub fn new(name: impl Into<String>, channel_number: u32, role: Role) -> Self {
        Self {
            name: name.into(),
            channel_number,
            role,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            attach_timeout: DEFAULT_ATTACH_TIMEOUT,
        }
    }

    pub fn initial_capacity(mut self, capacity: u64) -> Self {
        self.initial_capacity = capacity;
        self
    }

    pub fn attach_timeout(mut self, timeout: Duration) -> Self {
        self.attach_timeout = timeout;
        self
    }
}

/// The data segment and semaphore for one direction, as seen by this endpoint.
struct Endpoint {
    direction: Direction,
    segment: DirectionalSegment,
    semaphore: NamedSemaphore,
}

impl Endpoint {
    fn attach(
        control: &ControlSegment,
        names: &ChannelNames,
        direction: Direction,
    ) -> Result<Self, ChannelError> {
        let semaphore = NamedSemaphore::create_or_open(names.semaphore(direction))
            .map_err(ChannelError::ResourceUnavailable)?;

        // Held so the segment cannot be regrown while we attach to it.
        let _lock = lock(control, names, direction)?;
        let segment = DirectionalSegment::create_or_open(
            names.data(direction),
            direction,
            control.capacity(direction),
        )?;

        Ok(Self {
            direction,
            segment,
            semaphore,
        })
    }
}

fn lock<'a>(
    control: &'a ControlSegment,
    names: &ChannelNames,
    direction: Direction,
) -> Result<ProcessMutexGuard<'a>, ChannelError> {
    control
        .mutex(direction)
        .lock()
        .map_err(|source| ChannelError::Lock {
            resource: names.mutex(direction).to_owned(),
            source,
        })
}

/// Unlinks every name of a channel, returning how many existed.
fn unlink_all(names: &ChannelNames) -> usize {
    let mut removed = 0;
    for name in names.shared_memory() {
        match SharedMemory::unlink(name) {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(e) => warn!(resource = name, error = %e, "failed to unlink shared memory"),
        }
    }
    for name in names.semaphores() {
        match NamedSemaphore::unlink(name) {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(e) => warn!(resource = name, error = %e, "failed to unlink semaphore"),
        }
    }
    removed
}

/// One endpoint of a master/slave shared memory channel.
///
/// Methods take `&mut self`: a single instance is used by one thread at a
/// time. Separate instances, in this process or another, are serialized by
/// the per-direction mutex.
pub struct IpcChannel {
    base_name: String,
    channel_number: u32,
    role: Role,
    names: ChannelNames,
    control: ControlSegment,
    outbound: Endpoint,
    inbound: Endpoint,
    recorder: PerfRecorder,
}

/// Holds the outbound mutex across several sends.
///
/// Each [`SendGuard::send`] replaces the outbound payload and posts the
/// semaphore once; the peer cannot read until the guard is dropped.
pub struct SendGuard<'a> {
    _lock: ProcessMutexGuard<'a>,
    control: &'a ControlSegment,
    names: &'a ChannelNames,
    endpoint: &'a mut Endpoint,
    recorder: &'a mut PerfRecorder,
}

impl IpcChannel {
    pub fn new(name: &str, channel_number: u32, role: Role) -> Result<Self, ChannelError> {
        Self::with_options(ChannelOptions::new(name, channel_number, role))
    }

    pub fn with_options(options: ChannelOptions) -> Result<Self, ChannelError> {
        let ChannelOptions {
            name,
            channel_number,
            role,
            initial_capacity,
            attach_timeout,
        } = options;

        let names = ChannelNames::resolve(&name, channel_number)?;
        let control =
            ControlSegment::create_or_open(&names, initial_capacity.max(1), attach_timeout)?;
        let endpoints = Endpoint::attach(&control, &names, role.outbound()).and_then(|outbound| {
            let inbound = Endpoint::attach(&control, &names, role.inbound())?;
            Ok((outbound, inbound))
        });
        let (outbound, inbound) = match endpoints {
            Ok(endpoints) => endpoints,
            Err(e) => {
                // Nobody else is attached, so nobody else will ever unlink
                // what this attempt created.
                if control.attached() == 0 {
                    let removed = unlink_all(&names);
                    warn!(
                        channel = %name,
                        channel_number,
                        removed,
                        error = %e,
                        "channel construction failed, removed its resources"
                    );
                }
                return Err(e);
            }
        };
        let attached = control.attach();

        info!(
            channel = %name,
            channel_number,
            %role,
            attached,
            outbound_capacity = outbound.segment.capacity(),
            inbound_capacity = inbound.segment.capacity(),
            "channel open"
        );

        Ok(Self {
            base_name: name,
            channel_number,
            role,
            names,
            control,
            outbound,
            inbound,
            recorder: PerfRecorder::new(),
        })
    }

    /// Unlinks every resource name of a channel, whether or not endpoints
    /// are attached, returning how many names existed.
    ///
    /// Meant for clearing names left behind by processes that died without
    /// dropping their endpoint. Endpoints still attached keep working on
    /// their existing mappings but can no longer be found by new peers.
    pub fn remove(name: &str, channel_number: u32) -> Result<usize, ChannelError> {
        let names = ChannelNames::resolve(name, channel_number)?;
        let removed = unlink_all(&names);
        info!(channel = name, channel_number, removed, "removed channel resources");
        Ok(removed)
    }

    pub fn channel_number(&self) -> u32 {
        self.channel_number
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn names(&self) -> &ChannelNames {
        &self.names
    }

    pub fn outbound_capacity(&self) -> u64 {
        self.control.capacity(self.outbound.direction)
    }

    pub fn inbound_capacity(&self) -> u64 {
        self.control.capacity(self.inbound.direction)
    }

    /// Includes this endpoint.
    pub fn attached_endpoints(&self) -> u64 {
        self.control.attached()
    }

    pub fn recorder(&self) -> &PerfRecorder {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut PerfRecorder {
        &mut self.recorder
    }

    pub fn lock_outbound(&mut self) -> Result<SendGuard<'_>, ChannelError> {
        let Self {
            names,
            control,
            outbound,
            recorder,
            ..
        } = self;
        let control: &ControlSegment = control;

        recorder.begin(PerfStage::Lock);
        let guard = lock(control, names, outbound.direction)?;
        recorder.end(PerfStage::Lock);

        Ok(SendGuard {
            _lock: guard,
            control,
            names,
            endpoint: outbound,
            recorder,
        })
    }

    /// Replaces the outbound payload with `payload` and wakes the peer.
    ///
    /// Grows the outbound segment first if `payload` does not fit.
    pub fn send(&mut self, payload: impl AsRef<[u8]>) -> Result<(), ChannelError> {
        {
            let mut guard = self.lock_outbound()?;
            guard.write(payload.as_ref())?;
        }
        self.recorder.begin(PerfStage::Post);
        self.outbound.semaphore.post().map_err(ChannelError::Signal)?;
        self.recorder.end(PerfStage::Post);
        Ok(())
    }

    /// Waits for a message and copies it into `buf`.
    ///
    /// Returns `Ok(false)` if `timeout` expired first; `buf` and the
    /// semaphore are left untouched. `None` and a zero timeout block until a
    /// message arrives.
    pub fn receive_into(
        &mut self,
        buf: &mut Vec<u8>,
        timeout: Option<Duration>,
    ) -> Result<bool, ChannelError> {
        self.recorder.begin(PerfStage::Wait);
        let signaled = self
            .inbound
            .semaphore
            .wait(timeout)
            .map_err(ChannelError::Signal)?;
        if !signaled {
            self.recorder.cancel(PerfStage::Wait);
            trace!(channel = %self.base_name, role = %self.role, "receive timed out");
            return Ok(false);
        }
        self.recorder.end(PerfStage::Wait);

        let Self {
            names,
            control,
            inbound,
            recorder,
            ..
        } = self;
        let direction = inbound.direction;

        recorder.begin(PerfStage::Lock);
        let _lock = lock(control, names, direction)?;
        recorder.end(PerfStage::Lock);

        let published = control.capacity(direction);
        if published != inbound.segment.capacity() {
            recorder.begin(PerfStage::Rebind);
            inbound.segment.rebind(published)?;
            recorder.end(PerfStage::Rebind);
        }

        recorder.begin(PerfStage::Read);
        inbound.segment.read_into(buf)?;
        recorder.end(PerfStage::Read);

        trace!(direction = %direction, len = buf.len(), "received");
        Ok(true)
    }

    pub fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<Vec<u8>>, ChannelError> {
        let mut buf = Vec::new();
        Ok(self.receive_into(&mut buf, timeout)?.then_some(buf))
    }
}

impl SendGuard<'_> {
    pub fn send(&mut self, payload: impl AsRef<[u8]>) -> Result<(), ChannelError> {
        self.write(payload.as_ref())?;
        self.recorder.begin(PerfStage::Post);
        self.endpoint
            .semaphore
            .post()
            .map_err(ChannelError::Signal)?;
        self.recorder.end(PerfStage::Post);
        Ok(())
    }

    pub fn capacity(&self) -> u64 {
        self.endpoint.segment.capacity()
    }

    fn write(&mut self, payload: &[u8]) -> Result<(), ChannelError> {
        let direction = self.endpoint.direction;
        let segment = &mut self.endpoint.segment;

        // Another writer instance for this direction may have grown it.
        let published = self.control.capacity(direction);
        if published != segment.capacity() {
            self.recorder.begin(PerfStage::Rebind);
            segment.rebind(published)?;
            self.recorder.end(PerfStage::Rebind);
        }

        let needed = payload.len() as u64;
        if needed > segment.capacity() {
            self.recorder.begin(PerfStage::Grow);
            let capacity = segment.grow(needed)?;
            self.control.publish_capacity(direction, capacity);
            self.recorder.end(PerfStage::Grow);
        }

        self.recorder.begin(PerfStage::Write);
        segment.write(payload);
        self.recorder.end(PerfStage::Write);

        trace!(
            mutex = self.names.mutex(direction),
            len = payload.len(),
            "wrote payload"
        );
        Ok(())
    }
}

impl Drop for IpcChannel {
    fn drop(&mut self) {
        let remaining = self.control.detach();
        if remaining == 0 {
            let removed = unlink_all(&self.names);
            info!(
                channel = %self.base_name,
                channel_number = self.channel_number,
                removed,
                "last endpoint closed, channel resources removed"
            );
        } else {
            debug!(
                channel = %self.base_name,
                channel_number = self.channel_number,
                role = %self.role,
                remaining,
                "endpoint closed"
            );
        }
    }
}

impl fmt::Debug for IpcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpcChannel")
            .field("base_name", &self.base_name)
            .field("channel_number", &self.channel_number)
            .field("role", &self.role)
            .field("outbound", &self.outbound.segment.name())
            .field("inbound", &self.inbound.segment.name())
            .finish()
    }
}
