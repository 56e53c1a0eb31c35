//! Named POSIX shared-memory objects mapped read-write with `memmap2`.
//!
//! A [`SharedMemory`] is a `shm_open` object plus a `MAP_SHARED` mapping of
//! its full length. Two processes that open the same name see the same bytes.
//! Objects are never resized in place: a region that needs more room is
//! unlinked and created again under the same name, and holders of the old
//! mapping re-open by name.

use memmap2::MmapMut;
use std::{
    ffi::CString,
    fs::File,
    io,
    os::fd::{FromRawFd, OwnedFd},
};

/// Whether [`SharedMemory::create_or_open`] created the object or found it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Created,
    Opened,
}

pub struct SharedMemory {
    name: String,
    _file: File,
    mmap: MmapMut,
    base: *mut u8,
}

// SAFETY: the mapping is process-wide and stays valid for the lifetime of
// `SharedMemory`; access to its contents is synchronized by the callers.
unsafe impl Send for SharedMemory {}
unsafe impl Sync for SharedMemory {}

fn c_name(name: &str) -> io::Result<CString> {
    CString::new(name).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "shared memory name contains a NUL byte",
        )
    })
}

fn shm_open(name: &CString, flags: libc::c_int) -> io::Result<File> {
    // SAFETY: `name` is a valid NUL-terminated string; flags are POSIX constants.
    let fd = unsafe { libc::shm_open(name.as_ptr(), flags, 0o600) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `fd` was just returned by shm_open and is owned by nobody else.
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };
    Ok(File::from(owned))
}

fn shm_unlink(name: &CString) -> io::Result<()> {
    // SAFETY: `name` is a valid NUL-terminated string.
    if unsafe { libc::shm_unlink(name.as_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl SharedMemory {
    /// Create a new object of `size_bytes` and map it read-write.
    ///
    /// Fails with `ErrorKind::AlreadyExists` if the name is taken. The new
    /// object is zero-filled.
    pub fn create(name: &str, size_bytes: usize) -> io::Result<Self> {
        if size_bytes == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "shared memory size must be > 0",
            ));
        }
        let c = c_name(name)?;
        let file = shm_open(&c, libc::O_CREAT | libc::O_EXCL | libc::O_RDWR)?;

        if let Err(e) = file.set_len(size_bytes as u64) {
            let _ = shm_unlink(&c);
            return Err(e);
        }

        // SAFETY: the object was just created by us and sized above.
        let mut mmap = match unsafe { MmapMut::map_mut(&file) } {
            Ok(m) => m,
            Err(e) => {
                let _ = shm_unlink(&c);
                return Err(e);
            }
        };
        let base = mmap.as_mut_ptr();

        Ok(Self {
            name: name.to_owned(),
            _file: file,
            mmap,
            base,
        })
    }

    /// Open an existing object and map its whole length.
    ///
    /// An object that exists but has not been sized by its creator yet is
    /// reported as `ErrorKind::UnexpectedEof` so the caller can retry.
    pub fn open(name: &str) -> io::Result<Self> {
        let c = c_name(name)?;
        let file = shm_open(&c, libc::O_RDWR)?;

        if file.metadata()?.len() == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "shared memory object has not been sized yet",
            ));
        }

        // SAFETY: other processes may write the object; every access to its contents
        // goes through the layouts built on top of this type.
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let base = mmap.as_mut_ptr();

        Ok(Self {
            name: name.to_owned(),
            _file: file,
            mmap,
            base,
        })
    }

    /// Open `name` if it exists, otherwise create it with `size_bytes`.
    pub fn create_or_open(name: &str, size_bytes: usize) -> io::Result<(Self, Origin)> {
        match Self::create(name, size_bytes) {
            Ok(shm) => Ok((shm, Origin::Created)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Self::open(name).map(|shm| (shm, Origin::Opened))
            }
            Err(e) => Err(e),
        }
    }

    /// Remove `name` from the OS namespace.
    ///
    /// Existing mappings stay valid. Returns `Ok(false)` if the name was
    /// already gone.
    pub fn unlink(name: &str) -> io::Result<bool> {
        let c = c_name(name)?;
        match shm_unlink(&c) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return raw pointer to start of the mapped object
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

impl std::fmt::Debug for SharedMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMemory")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_name(label: &str) -> String {
        format!("/tshm-{}-{label}", std::process::id())
    }

    #[test]
    fn created_object_is_visible_to_opener() {
        let name = test_name("vis");
        let writer = SharedMemory::create(&name, 4096).unwrap();
        unsafe { writer.as_ptr().add(17).write(0xAB) };

        let reader = SharedMemory::open(&name).unwrap();
        assert!(reader.len() >= 4096);
        assert_eq!(unsafe { reader.as_ptr().add(17).read() }, 0xAB);
        assert_eq!(unsafe { reader.as_ptr().read() }, 0);

        assert!(SharedMemory::unlink(&name).unwrap());
    }

    #[test]
    fn create_refuses_existing_name() {
        let name = test_name("excl");
        let _first = SharedMemory::create(&name, 1024).unwrap();
        let err = SharedMemory::create(&name, 1024).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        SharedMemory::unlink(&name).unwrap();
    }

    #[test]
    fn create_or_open_reports_origin() {
        let name = test_name("origin");
        let (_a, origin_a) = SharedMemory::create_or_open(&name, 2048).unwrap();
        let (_b, origin_b) = SharedMemory::create_or_open(&name, 2048).unwrap();
        assert_eq!(origin_a, Origin::Created);
        assert_eq!(origin_b, Origin::Opened);
        SharedMemory::unlink(&name).unwrap();
    }

    #[test]
    fn unlink_keeps_mapping_and_frees_name() {
        let name = test_name("unlink");
        let shm = SharedMemory::create(&name, 1024).unwrap();
        assert!(SharedMemory::unlink(&name).unwrap());
        assert!(!SharedMemory::unlink(&name).unwrap());

        unsafe { shm.as_ptr().write(7) };
        assert_eq!(unsafe { shm.as_ptr().read() }, 7);

        let err = SharedMemory::open(&name).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn zero_size_is_rejected() {
        let err = SharedMemory::create(&test_name("zero"), 0).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
