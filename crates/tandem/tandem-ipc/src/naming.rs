//! Resource names derived from a channel's base name and number.
//!
//! Every OS object a channel touches is named from `(base, channel_number)`
//! alone, which is how the two endpoints find each other:
//!
//! ```text
//! /{base}-{n}-ctl        control segment
//! /{base}-{n}-ms         master → slave data segment
//! /{base}-{n}-sm         slave → master data segment
//! {base}-{n}-ms-mtx      mutex tag stored in the control segment
//! /{base}-{n}-ms-sem     master → slave semaphore
//! ```
//!
//! The channel number is decimal and never contains `-`, so splitting at the
//! last `-` before the suffix recovers `(base, n)`: distinct pairs never share
//! a name.

use std::fmt;

/// Longest name, leading `/` included, every supported platform accepts for
/// both shared memory objects and named semaphores.
#[cfg(target_vendor = "apple")]
pub const MAX_NAME_LEN: usize = 31;
#[cfg(not(target_vendor = "apple"))]
pub const MAX_NAME_LEN: usize = 250;

/// Which end of the channel this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Master,
    Slave,
}

/// One of the two traffic directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    MasterToSlave,
    SlaveToMaster,
}

impl Role {
    pub fn from_is_slave(is_slave: bool) -> Self {
        if is_slave { Role::Slave } else { Role::Master }
    }

    pub fn peer(self) -> Self {
        match self {
            Role::Master => Role::Slave,
            Role::Slave => Role::Master,
        }
    }

    /// The direction this role writes.
    pub fn outbound(self) -> Direction {
        match self {
            Role::Master => Direction::MasterToSlave,
            Role::Slave => Direction::SlaveToMaster,
        }
    }

    /// The direction this role reads.
    pub fn inbound(self) -> Direction {
        self.peer().outbound()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Master => "master",
            Role::Slave => "slave",
        })
    }
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::MasterToSlave, Direction::SlaveToMaster];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Direction::MasterToSlave => 0,
            Direction::SlaveToMaster => 1,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Direction::MasterToSlave => "ms",
            Direction::SlaveToMaster => "sm",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::MasterToSlave => "master->slave",
            Direction::SlaveToMaster => "slave->master",
        })
    }
}

/// Reasons a base name cannot be turned into OS-safe, collision-free names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamingError {
    #[error("channel base name is empty")]
    Empty,

    #[error("channel base name contains {ch:?}; only ASCII letters, digits, '_', '-' and '.' are allowed")]
    InvalidCharacter { ch: char },

    #[error("resource name '{name}' is {len} bytes, the platform allows {max}")]
    TooLong {
        name: String,
        len: usize,
        max: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNames {
    control: String,
    data: [String; 2],
    mutex: [String; 2],
    semaphore: [String; 2],
}

fn valid_base_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

impl ChannelNames {
    pub fn resolve(base: &str, channel_number: u32) -> Result<Self, NamingError> {
        if base.is_empty() {
            return Err(NamingError::Empty);
        }
        if let Some(ch) = base.chars().find(|&c| !valid_base_char(c)) {
            return Err(NamingError::InvalidCharacter { ch });
        }

        let stem = format!("{base}-{channel_number}");
        let names = Self {
            control: format!("/{stem}-ctl"),
            data: Direction::ALL.map(|d| format!("/{stem}-{}", d.tag())),
            mutex: Direction::ALL.map(|d| format!("{stem}-{}-mtx", d.tag())),
            semaphore: Direction::ALL.map(|d| format!("/{stem}-{}-sem", d.tag())),
        };

        if let Some(name) = names.iter().find(|n| n.len() > MAX_NAME_LEN) {
            return Err(NamingError::TooLong {
                name: name.to_owned(),
                len: name.len(),
                max: MAX_NAME_LEN,
            });
        }
        Ok(names)
    }

    pub fn control(&self) -> &str {
        &self.control
    }

    pub fn data(&self, direction: Direction) -> &str {
        &self.data[direction.index()]
    }

    pub fn mutex(&self, direction: Direction) -> &str {
        &self.mutex[direction.index()]
    }

    pub fn semaphore(&self, direction: Direction) -> &str {
        &self.semaphore[direction.index()]
    }

    /// Control and data segment names.
    pub fn shared_memory(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.control.as_str()).chain(self.data.iter().map(String::as_str))
    }

    pub fn semaphores(&self) -> impl Iterator<Item = &str> {
        self.semaphore.iter().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.shared_memory()
            .chain(self.mutex.iter().map(String::as_str))
            .chain(self.semaphores())
    }
}
