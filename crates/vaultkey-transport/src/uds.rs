use std::path::Path;

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::LinkStream;

/// Maximum socket path length.
/// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
#[cfg(target_os = "linux")]
const MAX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const MAX_PATH_LEN: usize = 104;

/// Connect to a device bridge listening on a Unix domain socket (blocking).
pub fn connect_bridge(path: impl AsRef<Path>) -> Result<LinkStream> {
    let path = path.as_ref();

    let path_bytes = path.as_os_str().len();
    if path_bytes >= MAX_PATH_LEN {
        return Err(TransportError::PathTooLong {
            path: path.to_path_buf(),
            len: path_bytes,
            max: MAX_PATH_LEN,
        });
    }

    let stream =
        std::os::unix::net::UnixStream::connect(path).map_err(|e| TransportError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
    debug!(?path, "connected to device bridge");
    Ok(LinkStream::from_unix(stream))
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::os::unix::net::UnixListener;

    use super::*;

    #[test]
    fn connects_to_listening_bridge() {
        let dir = std::env::temp_dir().join(format!("vaultkey-bridge-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let sock_path = dir.join("bridge.sock");
        let _ = std::fs::remove_file(&sock_path);
        let listener = UnixListener::bind(&sock_path).unwrap();

        let handle = std::thread::spawn(move || {
            let (mut server, _) = listener.accept().unwrap();
            let mut buf = [0u8; 5];
            server.read_exact(&mut buf).unwrap();
            buf
        });

        let mut link = connect_bridge(&sock_path).unwrap();
        link.write_all(b"hello").unwrap();
        assert_eq!(&handle.join().unwrap(), b"hello");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_bridge_is_a_connect_error() {
        let path = std::env::temp_dir().join(format!(
            "vaultkey-missing-{}.sock",
            std::process::id()
        ));
        let result = connect_bridge(&path);
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[test]
    fn path_too_long() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let result = connect_bridge(&long_path);
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }
}
