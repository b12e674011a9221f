//! Shared-memory pixel buffers
//!
//! A buffer is backed by an anonymous memfd sized `stride * height`, filled
//! through a temporary mapping, and handed to the compositor as a
//! `wl_shm_pool`. The pool is destroyed right after the buffer is created;
//! the compositor keeps its own reference to the memory.

use log::debug;
use memmap2::MmapMut;
use std::ffi::CString;
use std::fs::File;
use std::os::fd::{AsFd, FromRawFd, OwnedFd};

use wayland_client::protocol::{wl_buffer, wl_shm, wl_shm_pool};
use wayland_client::{Dispatch, QueueHandle};

use crate::error::BufferError;

/// Bytes per ARGB8888 pixel
pub const BYTES_PER_PIXEL: i32 = 4;

/// An anonymous file holding one frame of ARGB8888 pixels.
#[derive(Debug)]
pub struct ShmPixels {
    file: File,
    width: i32,
    height: i32,
}

impl ShmPixels {
    /// Allocate a `width`x`height` frame filled with `color`.
    pub fn solid(width: i32, height: i32, color: u32) -> Result<Self, BufferError> {
        if width <= 0 || height <= 0 {
            return Err(BufferError::InvalidSize { width, height });
        }
        let size = Self::byte_len(width, height);
        // wl_shm pool sizes are i32
        if size > i32::MAX as u64 {
            return Err(BufferError::InvalidSize { width, height });
        }

        let fd = create_memfd("wlpeek-shm").map_err(BufferError::Memfd)?;
        let file = File::from(fd);
        file.set_len(size)
            .map_err(|source| BufferError::Truncate { size, source })?;

        // SAFETY: the memfd is private to this process and nothing else
        // resizes it while the mapping is alive.
        let mut map = unsafe { MmapMut::map_mut(&file) }.map_err(BufferError::Map)?;
        for pixel in map.chunks_exact_mut(BYTES_PER_PIXEL as usize) {
            pixel.copy_from_slice(&color.to_ne_bytes());
        }
        map.flush().map_err(BufferError::Map)?;

        debug!("filled {}x{} shm frame with {:#010x}", width, height, color);
        Ok(Self { file, width, height })
    }

    pub fn stride(&self) -> i32 {
        self.width * BYTES_PER_PIXEL
    }

    pub fn len(&self) -> i32 {
        self.stride() * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    fn byte_len(width: i32, height: i32) -> u64 {
        width as u64 * height as u64 * BYTES_PER_PIXEL as u64
    }
}

/// Create a `wl_buffer` of `width`x`height` filled with `color`.
pub fn create_buffer<D>(
    shm: &wl_shm::WlShm,
    qh: &QueueHandle<D>,
    width: i32,
    height: i32,
    color: u32,
) -> Result<wl_buffer::WlBuffer, BufferError>
where
    D: Dispatch<wl_shm_pool::WlShmPool, ()> + Dispatch<wl_buffer::WlBuffer, ()> + 'static,
{
    let pixels = ShmPixels::solid(width, height, color)?;

    let pool = shm.create_pool(pixels.file().as_fd(), pixels.len(), qh, ());
    let buffer = pool.create_buffer(
        0,
        width,
        height,
        pixels.stride(),
        wl_shm::Format::Argb8888,
        qh,
        (),
    );
    pool.destroy();

    debug!("created {}x{} wl_buffer", width, height);
    Ok(buffer)
}

fn create_memfd(name: &str) -> std::io::Result<OwnedFd> {
    let name = CString::new(name).map_err(std::io::Error::other)?;
    let fd = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: memfd_create returned a fresh descriptor we now own.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}
