//! Tunnel I/O for the packet loop.

mod tunnel;

pub use tunnel::{TunnelReader, TunnelWriter};
#[cfg(unix)]
pub use tunnel::{FdReader, FdWriter, open_fd};

#[cfg(test)]
pub use tunnel::tests as mock;
