//! LockFileEx based instance lock.

use std::fs::File;
use std::os::windows::io::AsRawHandle;

use windows::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
use windows::Win32::Storage::FileSystem::{
    LockFileEx, UnlockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
};
use windows::Win32::System::IO::OVERLAPPED;

use super::LockFailure;

pub(crate) struct HeldLock(File);

pub(super) fn lock_exclusive_nonblocking(file: File) -> Result<HeldLock, LockFailure> {
    let handle = HANDLE(file.as_raw_handle());
    let mut overlapped = OVERLAPPED::default();

    // Locks the first byte; every instance uses the same range.
    let result = unsafe {
        LockFileEx(
            handle,
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
            None,
            1,
            0,
            &mut overlapped,
        )
    };

    match result {
        Ok(()) => Ok(HeldLock(file)),
        Err(e) if e.code() == ERROR_LOCK_VIOLATION.to_hresult() => Err(LockFailure::Contended),
        Err(e) => Err(LockFailure::Other(std::io::Error::other(e.message()))),
    }
}

/// Unlocks and closes the handle.
pub(super) fn unlock(held: HeldLock) -> std::io::Result<()> {
    let handle = HANDLE(held.0.as_raw_handle());
    let mut overlapped = OVERLAPPED::default();
    let result = unsafe { UnlockFileEx(handle, None, 1, 0, &mut overlapped) };
    drop(held);
    result.map_err(|e| std::io::Error::other(e.message()))
}
