//! Tunnel abstraction.
//!
//! The packet loop reads whole IPv4 datagrams from the tunnel and writes
//! whole datagrams back. Both directions sit behind traits so the loop can
//! be driven without a real TUN device.

use std::future::Future;
use std::io;

/// Source of inbound datagrams.
pub trait TunnelReader: Send + 'static {
    /// Read one datagram into `buf`.
    /// Returns `Ok(0)` once the tunnel is closed.
    fn read_packet(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;
}

/// Sink for outbound datagrams.
pub trait TunnelWriter: Send + 'static {
    /// Write one complete datagram.
    fn write_packet(&mut self, packet: &[u8]) -> impl Future<Output = io::Result<()>> + Send;
}

#[cfg(unix)]
pub use fd::{FdReader, FdWriter, open_fd};

#[cfg(unix)]
mod fd {
    use std::fs::File;
    use std::io::{self, Read, Write};
    use std::os::fd::{AsRawFd, FromRawFd, RawFd};
    use std::sync::Arc;

    use nix::fcntl::{FcntlArg, OFlag, fcntl};
    use tokio::io::unix::AsyncFd;

    use super::{TunnelReader, TunnelWriter};

    /// Reading half of an inherited tunnel descriptor.
    #[derive(Debug)]
    pub struct FdReader {
        fd: Arc<AsyncFd<File>>,
    }

    /// Writing half of an inherited tunnel descriptor.
    #[derive(Debug)]
    pub struct FdWriter {
        fd: Arc<AsyncFd<File>>,
    }

    /// Take ownership of an already-open tunnel descriptor.
    ///
    /// The descriptor is switched to non-blocking mode and registered with
    /// the runtime's reactor, so a pending read is dropped with its future.
    /// The descriptor closes once both halves are dropped. Must be called
    /// from within a tokio runtime.
    ///
    /// # Safety
    ///
    /// `fd` must be an open descriptor that nothing else owns or closes.
    pub unsafe fn open_fd(fd: RawFd) -> io::Result<(FdReader, FdWriter)> {
        // SAFETY: the caller hands over exclusive ownership of `fd`.
        let file = unsafe { File::from_raw_fd(fd) };
        set_nonblocking(&file)?;

        let fd = Arc::new(AsyncFd::new(file)?);
        Ok((
            FdReader {
                fd: Arc::clone(&fd),
            },
            FdWriter { fd },
        ))
    }

    fn set_nonblocking(file: &File) -> io::Result<()> {
        let flags = fcntl(file.as_raw_fd(), FcntlArg::F_GETFL)?;
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(file.as_raw_fd(), FcntlArg::F_SETFL(flags))?;
        Ok(())
    }

    impl TunnelReader for FdReader {
        async fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            loop {
                let mut guard = self.fd.readable().await?;
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

    impl TunnelWriter for FdWriter {
        async fn write_packet(&mut self, packet: &[u8]) -> io::Result<()> {
            loop {
                let mut guard = self.fd.writable().await?;
                match guard.try_io(|inner| {
                    let mut file: &File = inner.get_ref();
                    file.write(packet)
                }) {
                    Ok(Ok(written)) if written == packet.len() => return Ok(()),
                    Ok(Ok(written)) => {
                        return Err(io::Error::new(
                            io::ErrorKind::WriteZero,
                            format!("short tunnel write: {written} of {} bytes", packet.len()),
                        ));
                    }
                    Ok(Err(err)) => return Err(err),
                    Err(_would_block) => continue,
                }
            }
        }
    }
}
