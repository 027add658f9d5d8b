//! Guard-paged tape allocation.
//!
//! The tape is a private anonymous mapping of `guard + tape + guard` where
//! both guards are a full page of inaccessible memory. The emitted code gets
//! a pointer already offset into the usable region; running off either end
//! lands on a guard page and the process takes a fault at the exact
//! misbehaving instruction.

use crate::Error;

/// A page-aligned tape flanked by two inaccessible guard pages.
pub struct Tape {
    base: *mut u8,
    total: usize,
    page: usize,
    usable: usize,
    offset: usize,
}

impl Tape {
    /// Allocate a tape of `size` usable bytes (rounded up to whole pages)
    /// with the entry cursor placed `offset` bytes into it.
    ///
    /// The caller has already validated `offset < size`.
    pub fn new(size: usize, offset: usize) -> Result<Tape, Error> {
        let page = page_size();
        let usable = size.div_ceil(page) * page;
        let total = page + usable + page;

        // Map everything inaccessible, then open up the middle. The two
        // outer pages stay PROT_NONE for the life of the tape.
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                total,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(Error::Map(std::io::Error::last_os_error()));
        }
        let base = base as *mut u8;

        let rc = unsafe {
            libc::mprotect(
                base.add(page) as *mut libc::c_void,
                usable,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::munmap(base as *mut libc::c_void, total) };
            return Err(Error::Map(err));
        }

        Ok(Tape {
            base,
            total,
            page,
            usable,
            offset,
        })
    }

    /// The pointer handed to the compiled entry function: start of the
    /// usable region plus the configured cursor offset.
    pub fn entry_ptr(&self) -> *mut u8 {
        unsafe { self.base.add(self.page + self.offset) }
    }

    /// Read back a cell relative to the entry pointer. Test support.
    pub fn cell(&self, index: usize) -> u8 {
        assert!(self.offset + index < self.usable, "cell out of range");
        unsafe { *self.entry_ptr().add(index) }
    }

    /// Usable tape bytes (page-rounded).
    pub fn usable_len(&self) -> usize {
        self.usable
    }
}

impl Drop for Tape {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.total);
        }
    }
}

fn page_size() -> usize {
    let rc = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if rc <= 0 {
        4096
    } else {
        rc as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tape_is_zeroed_and_writable_across_the_usable_region() {
        let tape = Tape::new(65536, 4096).unwrap();
        assert!(tape.usable_len() >= 65536);

        let ptr = tape.entry_ptr();
        unsafe {
            // Entry cell, far right edge of the configured size, and the
            // negative working region in front of the entry pointer.
            assert_eq!(*ptr, 0);
            *ptr = 0xAB;
            *ptr.add(65536 - 4096 - 1) = 0xCD;
            *ptr.sub(4096) = 0xEF;
            assert_eq!(*ptr, 0xAB);
            assert_eq!(*ptr.add(65536 - 4096 - 1), 0xCD);
            assert_eq!(*ptr.sub(4096), 0xEF);
        }
        assert_eq!(tape.cell(0), 0xAB);
    }

    #[test]
    fn small_sizes_round_up_to_a_page() {
        let tape = Tape::new(1, 0).unwrap();
        assert!(tape.usable_len() >= 1);
        unsafe {
            *tape.entry_ptr() = 1;
        }
    }
}
