use std::ptr::NonNull;

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. As the allocator, our top level view of this has nothing to
/// do with the concrete implementations / APIs offered by each kernel.
///
/// It is also the seam that lets the pool be driven by a fake provider in
/// tests, where counting region requests matters more than touching the real
/// OS facility.
pub trait RegionProvider {
    /// Requests an anonymous, readable-writable memory region of `len` bytes.
    /// Returns a pointer to the region or `None` if the underlying call fails.
    /// The allocator always asks for whole multiples of [`Self::page_size`].
    fn request(&mut self, len: usize) -> Option<NonNull<u8>>;

    /// Returns the region of size `len` starting at `addr` back to the OS.
    ///
    /// **SAFETY**: `addr` and `len` must be exactly what a previous
    /// [`RegionProvider::request`] on this provider produced, and the region
    /// must not be used afterwards.
    unsafe fn release(&mut self, addr: NonNull<u8>, len: usize);

    /// Virtual memory page size in bytes. Must be a power of two and stay
    /// constant for the lifetime of the provider.
    fn page_size(&self) -> usize;
}

/// The real thing: anonymous read/write mappings from the operating system.
///
/// On Unix this is `mmap`/`munmap`, on Windows `VirtualAlloc`/`VirtualFree`.
/// The page size is looked up once at construction since the kernel will not
/// change it under us.
pub struct OsMemory {
    page_size: usize,
}

impl OsMemory {
    pub fn new() -> Self {
        Self {
            page_size: platform::page_size(),
        }
    }
}

impl Default for OsMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionProvider for OsMemory {
    fn request(&mut self, len: usize) -> Option<NonNull<u8>> {
        platform::request(len)
    }

    unsafe fn release(&mut self, addr: NonNull<u8>, len: usize) {
        unsafe { platform::release(addr, len) }
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}

#[cfg(unix)]
mod platform {
    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    use libc::{mmap, munmap, off_t, size_t};

    pub(super) fn request(len: usize) -> Option<NonNull<u8>> {
        // mmap parameters.
        const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
        // Read-Write only memory.
        const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
        const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        const FD: c_int = -1;
        const OFFSET: off_t = 0;

        unsafe {
            let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

            match addr {
                libc::MAP_FAILED => None,
                addr => Some(NonNull::new_unchecked(addr).cast::<u8>()),
            }
        }
    }

    pub(super) unsafe fn release(addr: NonNull<u8>, len: usize) {
        unsafe {
            munmap(addr.as_ptr().cast::<c_void>(), len as size_t);
        }
    }

    pub(super) fn page_size() -> usize {
        unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
    }
}

#[cfg(windows)]
mod platform {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use windows::Win32::System::{Memory, SystemInformation};

    pub(super) fn request(len: usize) -> Option<NonNull<u8>> {
        // Read-Write only.
        let protection = Memory::PAGE_READWRITE;
        let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

        unsafe {
            let addr = Memory::VirtualAlloc(None, len, flags, protection);

            NonNull::new(addr.cast())
        }
    }

    pub(super) unsafe fn release(addr: NonNull<u8>, _len: usize) {
        unsafe {
            let _ = Memory::VirtualFree(addr.as_ptr().cast::<c_void>(), 0, Memory::MEM_RELEASE);
        }
    }

    pub(super) fn page_size() -> usize {
        unsafe {
            let mut system_info = MaybeUninit::uninit();
            SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

            system_info.assume_init().dwPageSize as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_a_nonzero_power_of_two() {
        let os = OsMemory::new();

        assert!(os.page_size() > 0);
        assert!(os.page_size().is_power_of_two());
    }

    #[test]
    fn request_and_release_round_trip() {
        let mut os = OsMemory::new();
        let len = os.page_size();

        let addr = os.request(len).expect("OS refused a single page");

        unsafe {
            // The region must be writable and readable over its whole span.
            addr.as_ptr().write_bytes(0xA5, len);
            assert_eq!(addr.as_ptr().read(), 0xA5);
            assert_eq!(addr.as_ptr().add(len - 1).read(), 0xA5);

            os.release(addr, len);
        }
    }
}
