//! TCP line transport, for `tcp://host:port` (client/server) and
//! `tcp://*:port` (server, bind-all-interfaces) addresses.

use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::IoError;
use crate::line::{Acceptor, Line, LineFactory, LineOption};

pub struct TcpLine {
    stream: TcpStream,
}

impl TcpLine {
    fn new(stream: TcpStream) -> Result<Self, IoError> {
        stream.set_nodelay(true).map_err(IoError::Os)?;
        Ok(Self { stream })
    }
}

impl Line for TcpLine {
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

pub struct TcpAcceptor {
    listener: TcpListener,
}

impl Acceptor for TcpAcceptor {
    fn wait_connection(&self, timeout: Duration) -> Result<Option<Box<dyn Line>>, IoError> {
        self.listener
            .set_nonblocking(true)
            .map_err(IoError::Os)?;

        let deadline = std::time::Instant::now() + timeout;
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    stream.set_nonblocking(false).map_err(IoError::Os)?;
                    return Ok(Some(Box::new(TcpLine::new(stream)?)));
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
pub struct TcpLineFactory;

impl TcpLineFactory {
    pub fn new() -> Self {
        Self
    }
}

fn bindable(rest: &str) -> String {
    // `*:port` means bind on all interfaces, matching the `tcp://*:4444`
    // server address form.
    match rest.split_once(':') {
        Some(("*", port)) => format!("0.0.0.0:{port}"),
        _ => rest.to_string(),
    }
}

impl LineFactory for TcpLineFactory {
    fn supports_scheme(&self, scheme: &str) -> bool {
        scheme == "tcp"
    }

    fn create_client(&self, address: &str) -> Result<Box<dyn Line>, IoError> {
        let (_, rest) = crate::addr::parse(address)
            .ok_or(IoError::UnsupportedOption("malformed tcp address"))?;
        let stream = TcpStream::connect(rest).map_err(IoError::Os)?;
        Ok(Box::new(TcpLine::new(stream)?))
    }

    fn create_server(&self, address: &str) -> Result<Box<dyn Acceptor>, IoError> {
        let (_, rest) = crate::addr::parse(address)
            .ok_or(IoError::UnsupportedOption("malformed tcp address"))?;
        let bind_addr = bindable(rest);
        let mut addrs = bind_addr
            .to_socket_addrs()
            .map_err(IoError::Os)?;
        let addr = addrs
            .next()
            .ok_or(IoError::UnsupportedOption("tcp address resolves to nothing"))?;
        let listener = TcpListener::bind(addr).map_err(IoError::Os)?;
        Ok(Box::new(TcpAcceptor { listener }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn client_and_server_exchange_bytes() {
        let factory = TcpLineFactory::new();
        let acceptor = factory.create_server("tcp://127.0.0.1:18273").unwrap();
        let client = thread::spawn(move || {
            let factory = TcpLineFactory::new();
            factory.create_client("tcp://127.0.0.1:18273").unwrap()
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

    #[test]
    fn wildcard_bind_address_resolves_all_interfaces() {
        assert_eq!(bindable("*:4444"), "0.0.0.0:4444");
        assert_eq!(bindable("127.0.0.1:4444"), "127.0.0.1:4444");
    }
}
