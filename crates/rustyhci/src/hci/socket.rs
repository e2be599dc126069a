//! HCI Socket implementation for Bluetooth communication
//!
//! This module provides the [`Socket`] abstraction the transport is written
//! against and its Linux implementation, a raw HCI socket bound to the user
//! channel of one controller.

use crate::context::Signal;
use crate::error::HciError;
use log::{debug, warn};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

// Bluetooth socket constants
const AF_BLUETOOTH: i32 = 31;
const BTPROTO_HCI: i32 = 1;
const HCI_CHANNEL_USER: u16 = 1;

// _IOW('H', 201, int) and _IOW('H', 202, int)
const HCIDEVUP: libc::c_ulong = 0x4004_48C9;
const HCIDEVDOWN: libc::c_ulong = 0x4004_48CA;

/// Number of controller ids probed when no id is given
pub const MAX_CONTROLLERS: u16 = 16;

// Reader wake-up period used to notice close()
const READ_POLL_MS: libc::c_int = 100;

/// Blocking duplex packet stream to a controller.
///
/// Each `read` yields exactly one controller packet, starting with its packet
/// type byte. `read` returns `Ok(0)` once the socket has been closed.
pub trait Socket: Send + Sync {
    fn read(&self, buf: &mut [u8]) -> Result<usize, HciError>;

    fn write(&self, buf: &[u8]) -> Result<usize, HciError>;

    /// Close the socket. Safe to call more than once and concurrently with a
    /// blocked reader.
    fn close(&self) -> Result<(), HciError>;

    /// One-shot signal fired by `close`
    fn closed(&self) -> Signal;
}

/// Represents an HCI socket
#[derive(Debug)]
pub struct HciSocket {
    fd: RawFd,
    dev_id: u16,
    is_closed: AtomicBool,
    closed: Signal,
}

// Define the sockaddr_hci structure
#[repr(C)]
struct SockaddrHci {
    hci_family: libc::sa_family_t,
    hci_dev: u16,
    hci_channel: u16,
}

impl HciSocket {
    /// Opens the user channel of a controller.
    ///
    /// With `None`, controller ids `0..16` are tried in order and the first
    /// one that binds is used.
    pub fn open(dev_id: Option<u16>) -> Result<Self, HciError> {
        if let Some(id) = dev_id {
            return Self::open_id(id);
        }

        for id in 0..MAX_CONTROLLERS {
            match Self::open_id(id) {
                Ok(socket) => return Ok(socket),
                Err(e) => debug!("hci{}: {}", id, e),
            }
        }
        Err(HciError::NoController)
    }

    fn open_id(dev_id: u16) -> Result<Self, HciError> {
        let fd = unsafe {
            libc::socket(
                AF_BLUETOOTH,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                BTPROTO_HCI,
            )
        };

        if fd < 0 {
            return Err(HciError::SocketError(std::io::Error::last_os_error()));
        }

        // The user channel needs the device down; cycling it first clears
        // any state left by another host stack.
        unsafe {
            libc::ioctl(fd, HCIDEVDOWN as _, dev_id as libc::c_int);
            libc::ioctl(fd, HCIDEVUP as _, dev_id as libc::c_int);
        }
        if unsafe { libc::ioctl(fd, HCIDEVDOWN as _, dev_id as libc::c_int) } < 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(HciError::BindError(err));
        }

        let addr = SockaddrHci {
            hci_family: AF_BLUETOOTH as libc::sa_family_t,
            hci_dev: dev_id,
            hci_channel: HCI_CHANNEL_USER,
        };

        let result = unsafe {
            libc::bind(
                fd,
                &addr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<SockaddrHci>() as libc::socklen_t,
            )
        };

        if result < 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(HciError::BindError(err));
        }

        debug!("hci{}: user channel bound", dev_id);
        Ok(HciSocket {
            fd,
            dev_id,
            is_closed: AtomicBool::new(false),
            closed: Signal::new(),
        })
    }

    pub fn dev_id(&self) -> u16 {
        self.dev_id
    }

    // Wait for readability, waking periodically to observe close()
    fn wait_readable(&self) -> Result<bool, HciError> {
        loop {
            if self.is_closed.load(Ordering::SeqCst) {
                return Ok(false);
            }

            let mut pfd = libc::pollfd {
                fd: self.fd,
                events: libc::POLLIN,
                revents: 0,
            };
            let n = unsafe { libc::poll(&mut pfd, 1, READ_POLL_MS) };
            if n < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(HciError::ReceiveError(err));
            }
            if n > 0 {
                return Ok(true);
            }
        }
    }
}

impl Socket for HciSocket {
    fn read(&self, buf: &mut [u8]) -> Result<usize, HciError> {
        if !self.wait_readable()? {
            return Ok(0);
        }

        let n = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n < 0 {
            if self.is_closed.load(Ordering::SeqCst) {
                return Ok(0);
            }
            return Err(HciError::ReceiveError(std::io::Error::last_os_error()));
        }
        Ok(n as usize)
    }

    fn write(&self, buf: &[u8]) -> Result<usize, HciError> {
        if self.is_closed.load(Ordering::SeqCst) {
            return Err(HciError::TransportClosed);
        }

        match unsafe { libc::write(self.fd, buf.as_ptr() as *const libc::c_void, buf.len()) } {
            -1 => Err(HciError::SendError(std::io::Error::last_os_error())),
            n => Ok(n as usize),
        }
    }

    fn close(&self) -> Result<(), HciError> {
        if self.is_closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.closed.fire();
        release_fd(self.fd).map_err(|e| {
            warn!("hci{}: release user channel: {}", self.dev_id, e);
            HciError::SocketError(e)
        })
    }

    fn closed(&self) -> Signal {
        self.closed.clone()
    }
}

// Point `fd` at /dev/null. The user channel is released now, while the
// descriptor number stays owned by the socket until drop.
fn release_fd(fd: RawFd) -> std::io::Result<()> {
    let null = unsafe {
        libc::open(
            b"/dev/null\0".as_ptr() as *const libc::c_char,
            libc::O_RDWR | libc::O_CLOEXEC,
        )
    };
    if null < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let rc = unsafe { libc::dup2(null, fd) };
    let err = std::io::Error::last_os_error();
    unsafe { libc::close(null) };
    if rc < 0 {
        return Err(err);
    }
    Ok(())
}

impl AsRawFd for HciSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for HciSocket {
    fn drop(&mut self) {
        if unsafe { libc::close(self.fd) } < 0 {
            warn!("hci{}: close: {}", self.dev_id, std::io::Error::last_os_error());
        }
    }
}
