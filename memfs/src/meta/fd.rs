//! Bounded pool of open-file descriptor numbers.

use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::error::{FsError, Result};

pub type Fd = u64;

/// Hands out descriptor numbers from `[0, max_fd)`.
///
/// Released numbers go to the back of the queue, so reuse is FIFO. Callers
/// must not release a descriptor twice; the pool does not deduplicate.
pub struct DescriptorAllocator {
    free: Mutex<VecDeque<Fd>>,
    max_fd: Fd,
}

impl DescriptorAllocator {
    pub fn new(max_fd: Fd) -> Self {
        Self {
            free: Mutex::new((0..max_fd).collect()),
            max_fd,
        }
    }

    pub fn acquire(&self) -> Result<Fd> {
        match self.free.lock().pop_front() {
            Some(fd) => Ok(fd),
            None => {
                tracing::error!("fd exhausted");
                Err(FsError::TooManyOpen)
            }
        }
    }

    pub fn release(&self, fd: Fd) {
        debug_assert!(fd < self.max_fd, "fd {fd} outside the pool");
        self.free.lock().push_back(fd);
    }

    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    pub fn capacity(&self) -> Fd {
        self.max_fd
    }
}
