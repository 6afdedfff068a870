//! URI-scheme-based factory registry: the first registered [`LineFactory`]
//! that claims a scheme is used to build clients/acceptors for it.

use crate::addr;
use crate::error::IoError;
use crate::line::{Acceptor, Line, LineFactory};

/// Holds registered [`LineFactory`] instances in insertion order and
/// dispatches on the address' URI scheme.
pub struct FactoryRegistry {
    factories: Vec<Box<dyn LineFactory>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self { factories: Vec::new() }
    }

    /// Builds a registry with the default factories for this platform:
    /// `inproc`, `local` (Unix socket / named pipe), and `tcp`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(crate::line::inproc::InprocLineFactory::new()));
        #[cfg(unix)]
        registry.register(Box::new(crate::line::unix::UnixLineFactory::new()));
        #[cfg(windows)]
        registry.register(Box::new(crate::line::pipe::PipeLineFactory::new()));
        registry.register(Box::new(crate::line::tcp::TcpLineFactory::new()));
        registry
    }

    pub fn register(&mut self, factory: Box<dyn LineFactory>) {
        self.factories.push(factory);
    }

    fn factory_for<'a>(&'a self, scheme: &str) -> Option<&'a dyn LineFactory> {
        self.factories
            .iter()
            .find(|f| f.supports_scheme(scheme))
            .map(|f| f.as_ref())
    }

    /// Builds a client [`Line`] for `address`. Returns `Ok(None)` for an
    /// unrecognized scheme.
    pub fn create_client(&self, address: &str) -> Result<Option<Box<dyn Line>>, IoError> {
        let Some((scheme, _rest)) = addr::parse(address) else {
            return Ok(None);
        };
        match self.factory_for(scheme) {
            Some(factory) => factory.create_client(address).map(Some),
            None => Ok(None),
        }
    }

    /// Builds a server [`Acceptor`] bound to `address`. Returns `Ok(None)`
    /// for an unrecognized scheme.
    pub fn create_server(&self, address: &str) -> Result<Option<Box<dyn Acceptor>>, IoError> {
        let Some((scheme, _rest)) = addr::parse(address) else {
            return Ok(None);
        };
        match self.factory_for(scheme) {
            Some(factory) => factory.create_server(address).map(Some),
            None => Ok(None),
        }
    }
}

impl Default for FactoryRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_scheme_yields_none() {
        let registry = FactoryRegistry::with_defaults();
        assert!(registry.create_client("carrier-pigeon://nowhere").unwrap().is_none());
    }

    #[test]
    fn inproc_round_trips_through_registry() {
        let registry = FactoryRegistry::with_defaults();
        let acceptor = registry
            .create_server("inproc://registry-test")
            .unwrap()
            .expect("inproc scheme recognized");

        let client_thread = std::thread::spawn({
            let registry = FactoryRegistry::with_defaults();
            move || {
                registry
                    .create_client("inproc://registry-test")
                    .unwrap()
                    .expect("inproc scheme recognized")
            }
        });

        let server_line = acceptor
            .wait_connection(std::time::Duration::from_secs(2))
            .unwrap()
            .expect("client connected");
        let client_line = client_thread.join().unwrap();

        client_line.write(b"ping").unwrap();
        let mut buf = [0u8; 4];
        server_line.read(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }
}
