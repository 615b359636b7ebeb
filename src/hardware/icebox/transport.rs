//! Serial line transport: open, exclusive lock, raw termios, restore on release.
//! Reads and writes go through the tokio reactor so callers can put a deadline
//! on every read.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::io::unix::AsyncFd;
use tracing::{debug, warn};

use crate::error::{PowerError, PowerResult, TermiosStage};

/// Byte-oriented access to an acquired serial line.
#[async_trait]
pub trait SerialIo: Send {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read whatever is available, waiting until at least one byte arrives.
    /// Callers bound this with a timeout.
    async fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Hands out exclusive serial ports by device path. Dropping the port
/// releases it.
#[async_trait]
pub trait Connector: Send + Sync {
    type Port: SerialIo;

    async fn acquire(&self, device: &str) -> PowerResult<Self::Port>;

    /// Give a port back, surfacing any failure to restore it.
    fn release(&self, port: Self::Port) -> PowerResult<()> {
        drop(port);
        Ok(())
    }
}

/// Connector for real tty devices.
#[derive(Debug, Clone)]
pub struct TtyConnector {
    pub lock_attempts: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

impl Default for TtyConnector {
    fn default() -> Self {
        Self {
            lock_attempts: 60,
            backoff_min: Duration::from_millis(250),
            backoff_max: Duration::from_millis(1000),
        }
    }
}

impl TtyConnector {
    /// Take the advisory lock, retrying while another process holds it.
    /// Several single-node invocations may race for the same line.
    async fn lock(&self, fd: RawFd, device: &str) -> PowerResult<()> {
        self.lock_with(device, || {
            if unsafe { libc::lockf(fd, libc::F_TLOCK, 0) } == 0 {
                Ok(())
            } else {
                Err(io::Error::last_os_error())
            }
        })
        .await
    }

    /// Retry `try_lock` with jittered backoff while it reports the lock busy.
    async fn lock_with<F>(&self, device: &str, mut try_lock: F) -> PowerResult<()>
    where
        F: FnMut() -> io::Result<()>,
    {
        for attempt in 1..=self.lock_attempts {
            let err = match try_lock() {
                Ok(()) => {
                    debug!("Locked {} (attempt {})", device, attempt);
                    return Ok(());
                }
                Err(err) => err,
            };

            match err.raw_os_error() {
                Some(libc::EAGAIN) | Some(libc::EACCES) => {}
                _ => {
                    return Err(PowerError::Io {
                        path: device.to_string(),
                        source: err,
                    })
                }
            }

            if attempt < self.lock_attempts {
                let wait = rand::thread_rng().gen_range(self.backoff_min..=self.backoff_max);
                debug!(
                    "{} is locked by another process, retrying in {:?} ({}/{})",
                    device, wait, attempt, self.lock_attempts
                );
                tokio::time::sleep(wait).await;
            }
        }

        Err(PowerError::LockTimeout {
            path: device.to_string(),
            attempts: self.lock_attempts,
        })
    }
}

#[async_trait]
impl Connector for TtyConnector {
    type Port = TtyPort;

    async fn acquire(&self, device: &str) -> PowerResult<TtyPort> {
        let file = open_device(device)?;
        self.lock(file.as_raw_fd(), device).await?;

        // Closing the file drops the lock, so early returns below leak nothing.
        // SAFETY: the AsyncFd owns `file`, so the fd stays open and unchanged
        // for as long as it is registered.
        let io = unsafe { AsyncFd::register(file) }.map_err(|e| PowerError::Io {
            path: device.to_string(),
            source: io::Error::from(e),
        })?;
        let saved = configure_raw(io.get_ref().as_raw_fd(), device)?;

        debug!("Acquired {} in raw mode", device);
        Ok(TtyPort {
            device: device.to_string(),
            io,
            saved,
            released: false,
        })
    }

    fn release(&self, port: TtyPort) -> PowerResult<()> {
        port.release()
    }
}

/// An exclusively held, raw-mode tty. Prior settings are restored and the
/// lock dropped when the port is released or goes out of scope.
pub struct TtyPort {
    device: String,
    io: AsyncFd<File>,
    saved: libc::termios,
    released: bool,
}

impl TtyPort {
    /// Release explicitly, reporting a failed termios restore.
    pub fn release(mut self) -> PowerResult<()> {
        self.restore()
    }

    fn restore(&mut self) -> PowerResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let fd = self.io.get_ref().as_raw_fd();
        let restore_failed = unsafe { libc::tcsetattr(fd, libc::TCSANOW, &self.saved) } != 0;
        let restore_err = restore_failed.then(io::Error::last_os_error);

        unsafe { libc::lockf(fd, libc::F_ULOCK, 0) };
        debug!("Released {}", self.device);

        match restore_err {
            Some(source) => Err(PowerError::TerminalRestoreFailed {
                path: self.device.clone(),
                source,
            }),
            None => Ok(()),
        }
    }
}

impl Drop for TtyPort {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            warn!("{}", e);
        }
    }
}

#[async_trait]
impl SerialIo for TtyPort {
    async fn write_all(&mut self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            let mut guard = self.io.writable().await?;
            match guard.try_io(|inner| {
                let mut file: &File = inner.get_ref();
                file.write(data)
            }) {
                Ok(Ok(0)) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(Ok(n)) => data = &data[n..],
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }

    async fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.io.readable().await?;
            match guard.try_io(|inner| {
                let mut file: &File = inner.get_ref();
                file.read(buf)
            }) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

/// Open a tty read/write without making it our controlling terminal.
pub fn open_device(device: &str) -> PowerResult<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
        .open(device)
        .map_err(|source| PowerError::DeviceOpenFailed {
            path: device.to_string(),
            source,
        })
}

/// Switch the line to 8-bit clean raw mode, keeping its baud rate.
/// Returns the previous settings.
fn configure_raw(fd: RawFd, device: &str) -> PowerResult<libc::termios> {
    let mut saved: libc::termios = unsafe { std::mem::zeroed() };
    if unsafe { libc::tcgetattr(fd, &mut saved) } != 0 {
        return Err(PowerError::TerminalConfigFailed {
            path: device.to_string(),
            stage: TermiosStage::Get,
            source: io::Error::last_os_error(),
        });
    }

    let mut raw = saved;
    raw.c_iflag = libc::IGNBRK | libc::IGNPAR | libc::INPCK;
    raw.c_oflag = 0;
    raw.c_cflag = libc::CS8 | libc::CREAD | libc::CLOCAL;
    raw.c_lflag = 0;
    raw.c_cc[libc::VMIN] = 1;
    raw.c_cc[libc::VTIME] = 0;

    let set_failed = unsafe {
        libc::cfsetispeed(&mut raw, libc::cfgetispeed(&saved));
        libc::cfsetospeed(&mut raw, libc::cfgetospeed(&saved));
        libc::tcsetattr(fd, libc::TCSANOW, &raw) != 0
    };
    if set_failed {
        return Err(PowerError::TerminalConfigFailed {
            path: device.to_string(),
            stage: TermiosStage::Set,
            source: io::Error::last_os_error(),
        });
    }

    Ok(saved)
}
