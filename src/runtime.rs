//! Console intrinsics called from emitted code.
//!
//! Both functions use the C ABI and raw file descriptors: writes are
//! unbuffered so output is observable the instant the compiled program emits
//! it, and reads hand back one byte at a time. The profiler's SIGPROF timer
//! runs with SA_RESTART, but a retry loop guards against stray EINTR anyway.

use std::io::{Error, ErrorKind};

/// Write one byte to stdout.
pub extern "C" fn bf_putchar(byte: u8) {
    let buf = [byte];
    loop {
        let rc = unsafe { libc::write(1, buf.as_ptr() as *const libc::c_void, 1) };
        if rc >= 0 || Error::last_os_error().kind() != ErrorKind::Interrupted {
            return;
        }
    }
}

/// Read one byte from stdin. Returns the byte, or -1 on EOF or error — the
/// caller's template leaves the target cell unchanged in that case.
pub extern "C" fn bf_getchar() -> i32 {
    let mut buf = [0u8; 1];
    loop {
        let rc = unsafe { libc::read(0, buf.as_mut_ptr() as *mut libc::c_void, 1) };
        match rc {
            1 => return buf[0] as i32,
            0 => return -1,
            _ => {
                if Error::last_os_error().kind() != ErrorKind::Interrupted {
                    return -1;
                }
            }
        }
    }
}
