//! Unix domain socket line transport, for `local:///path/to.sock`
//! addresses (the `local://` scheme on Unix platforms).

use std::os::unix::net::{UnixListener, UnixStream};
use std::time::Duration;

use crate::error::IoError;
use crate::line::{Acceptor, Line, LineFactory, LineOption};

pub struct UnixLine {
    stream: UnixStream,
}

impl UnixLine {
    fn new(stream: UnixStream) -> Self {
        Self { stream }
    }
}

impl Line for UnixLine {
    fn read(&self, buf: &mut [u8]) -> Result<usize, IoError> {
        use std::io::Read;
        match (&self.stream).read(buf) {
            Ok(0) => Err(IoError::ConnectionLost),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::NotConnected
                ) =>
            {
                Err(IoError::ConnectionLost)
            }
            Err(e) => Err(IoError::Os(e)),
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize, IoError> {
        use std::io::Write;
        (&self.stream).write(buf).map_err(IoError::Os)
    }

    fn set_option(&self, option: LineOption, value: Duration) -> Result<(), IoError> {
        match option {
            LineOption::ReceiveTimeout => self
                .stream
                .set_read_timeout(Some(value))
                .map_err(IoError::Os),
            LineOption::SendTimeout => self
                .stream
                .set_write_timeout(Some(value))
                .map_err(IoError::Os),
        }
    }
}

pub struct UnixAcceptor {
    listener: UnixListener,
}

impl Acceptor for UnixAcceptor {
    fn wait_connection(&self, timeout: Duration) -> Result<Option<Box<dyn Line>>, IoError> {
        self.listener.set_nonblocking(true).map_err(IoError::Os)?;

        let deadline = std::time::Instant::now() + timeout;
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    stream.set_nonblocking(false).map_err(IoError::Os)?;
                    return Ok(Some(Box::new(UnixLine::new(stream))));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if std::time::Instant::now() >= deadline {
                        return Ok(None);
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => return Err(IoError::Os(e)),
            }
        }
    }
}

#[derive(Default)]
pub struct UnixLineFactory;

impl UnixLineFactory {
    pub fn new() -> Self {
        Self
    }
}

impl LineFactory for UnixLineFactory {
    fn supports_scheme(&self, scheme: &str) -> bool {
        scheme == "local"
    }

    fn create_client(&self, address: &str) -> Result<Box<dyn Line>, IoError> {
        let (_, path) = crate::addr::parse(address)
            .ok_or(IoError::UnsupportedOption("malformed local address"))?;
        let stream = UnixStream::connect(path).map_err(IoError::Os)?;
        Ok(Box::new(UnixLine::new(stream)))
    }

    fn create_server(&self, address: &str) -> Result<Box<dyn Acceptor>, IoError> {
        let (_, path) = crate::addr::parse(address)
            .ok_or(IoError::UnsupportedOption("malformed local address"))?;
        // A stale socket file from a previous run left the path bound;
        // remove it before binding fresh, mirroring how the broker/quote
        // source servers are expected to be restarted cleanly.
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path).map_err(IoError::Os)?;
        Ok(Box::new(UnixAcceptor { listener }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn client_and_server_exchange_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let sock_path = dir.path().join("tickline-test.sock");
        let address = format!("local://{}", sock_path.display());

        let factory = UnixLineFactory::new();
        let acceptor = factory.create_server(&address).unwrap();

        let client_address = address.clone();
        let client = thread::spawn(move || {
            let factory = UnixLineFactory::new();
            factory.create_client(&client_address).unwrap()
        });

        let server_line = acceptor
            .wait_connection(Duration::from_secs(2))
            .unwrap()
            .expect("connection arrives");
        let client_line = client.join().unwrap();

        client_line.write(b"hi").unwrap();
        let mut buf = [0u8; 2];
        let mut total = 0;
        while total < 2 {
            total += server_line.read(&mut buf[total..]).unwrap();
        }
        assert_eq!(&buf, b"hi");
    }
}
