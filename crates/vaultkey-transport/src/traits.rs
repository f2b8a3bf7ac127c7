use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// A duplex byte link to a vault device.
///
/// Implementations must be splittable: the command channel reads responses
/// through one handle and writes requests through another, both referring to
/// the same underlying pipe.
pub trait DeviceLink: Read + Write + Send + 'static {
    /// Bound how long a single `read` may block. `None` blocks indefinitely.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()>;

    /// Bound how long a single `write` may block. `None` blocks indefinitely.
    fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()>;

    /// Open a second handle onto the same link.
    fn try_clone_link(&self) -> Result<Box<dyn DeviceLink>>;

    /// Short label for diagnostics.
    fn describe(&self) -> String {
        "device-link".to_string()
    }
}

impl DeviceLink for Box<dyn DeviceLink> {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        (**self).set_read_timeout(timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        (**self).set_write_timeout(timeout)
    }

    fn try_clone_link(&self) -> Result<Box<dyn DeviceLink>> {
        (**self).try_clone_link()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// A connected link to a device bridge. Implements `Read` and `Write`.
///
/// On Unix this wraps a Unix domain socket stream whose far end is a bridge
/// process relaying bytes to the token's USB CDC interface.
pub struct LinkStream {
    inner: LinkStreamInner,
}

enum LinkStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for LinkStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for LinkStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl LinkStream {
    /// Wrap an already-connected Unix domain socket stream.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: LinkStreamInner::Unix(stream),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => {
                let cloned = stream.try_clone()?;
                Ok(Self::from_unix(cloned))
            }
        }
    }
}

impl DeviceLink for LinkStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    fn try_clone_link(&self) -> Result<Box<dyn DeviceLink>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn describe(&self) -> String {
        match &self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(_) => "unix-bridge".to_string(),
        }
    }
}

impl std::fmt::Debug for LinkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            #[cfg(unix)]
            LinkStreamInner::Unix(_) => f.debug_struct("LinkStream").field("type", &"unix").finish(),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn clone_shares_the_same_pipe() {
        let (left, mut right) = std::os::unix::net::UnixStream::pair().unwrap();
        let link = LinkStream::from_unix(left);
        let mut writer = link.try_clone_link().unwrap();

        writer.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        right.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn read_timeout_surfaces_as_would_block() {
        let (left, _right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut link = LinkStream::from_unix(left);
        link.set_read_timeout(Some(Duration::from_millis(10))).unwrap();

        let mut buf = [0u8; 1];
        let err = link.read(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
        ));
    }

    #[test]
    fn write_timeout_bounds_a_full_socket() {
        let (left, _right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut link = LinkStream::from_unix(left);
        link.set_write_timeout(Some(Duration::from_millis(10))).unwrap();

        let chunk = [0u8; 64 * 1024];
        let err = loop {
            if let Err(err) = link.write(&chunk) {
                break err;
            }
        };
        assert!(matches!(
            err.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
        ));
    }

    #[test]
    fn describe_names_the_backing_transport() {
        let (left, _right) = std::os::unix::net::UnixStream::pair().unwrap();
        let link = LinkStream::from_unix(left);
        assert_eq!(link.describe(), "unix-bridge");
        assert!(format!("{link:?}").contains("unix"));
    }
}
