//! flock(2) based instance lock.

use std::fs::File;

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};

use super::LockFailure;

pub(crate) struct HeldLock(Flock<File>);

pub(super) fn lock_exclusive_nonblocking(file: File) -> Result<HeldLock, LockFailure> {
    match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(lock) => Ok(HeldLock(lock)),
        // EWOULDBLOCK and EAGAIN share a value on Linux but not on every Unix.
        Err((_, errno)) if errno == Errno::EWOULDBLOCK || errno == Errno::EAGAIN => {
            Err(LockFailure::Contended)
        }
        Err((_, errno)) => Err(LockFailure::Other(std::io::Error::from(errno))),
    }
}

/// Unlocks and closes the descriptor.
pub(super) fn unlock(held: HeldLock) -> std::io::Result<()> {
    match held.0.unlock() {
        Ok(file) => {
            drop(file);
            Ok(())
        }
        // Dropping the Flock closes the descriptor, which releases the lock anyway.
        Err((_, errno)) => Err(std::io::Error::from(errno)),
    }
}
