//! `service_name -> endpoint` map with a transport-defined fallback.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::rpc::{Error, Result};
use crate::rpc::transport::Endpoint;

/// Per-transport default endpoint derivation, e.g. UNIX-domain's
/// `/var/run/<name>`. UDP and shared-memory have no default.
pub type DefaultEndpointFn = dyn Fn(&str) -> Option<Endpoint> + Send + Sync;

pub struct ServiceLocator {
    map: Mutex<HashMap<String, Endpoint>>,
    default_fn: Option<Box<DefaultEndpointFn>>,
}

impl ServiceLocator {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
            default_fn: None,
        }
    }

    pub fn with_default(default_fn: impl Fn(&str) -> Option<Endpoint> + Send + Sync + 'static) -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
            default_fn: Some(Box::new(default_fn)),
        }
    }

    /// Inserting a duplicate fails with `DuplicateService`.
    pub fn set_service_location(&self, service_name: impl Into<String>, ep: Endpoint) -> Result<()> {
        let service_name = service_name.into();
        let mut map = self.map.lock();
        if map.contains_key(&service_name) {
            return Err(Error::DuplicateService);
        }
        map.insert(service_name, ep);
        Ok(())
    }

    /// Resolving an unknown name with no transport-defined fallback fails
    /// with `UnknownService`.
    pub fn get_service_location(&self, service_name: &str) -> Result<Endpoint> {
        if let Some(ep) = self.map.lock().get(service_name).cloned() {
            return Ok(ep);
        }
        if let Some(default_fn) = &self.default_fn {
            if let Some(ep) = default_fn(service_name) {
                return Ok(ep);
            }
        }
        Err(Error::UnknownService)
    }
}

impl Default for ServiceLocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_insert_fails() {
        let locator = ServiceLocator::new();
        locator.set_service_location("svc", "/tmp/svc".into()).unwrap();
        let err = locator.set_service_location("svc", "/tmp/other".into()).unwrap_err();
        assert_eq!(err, Error::DuplicateService);
    }

    #[test]
    fn unknown_without_default_fails() {
        let locator = ServiceLocator::new();
        let err = locator.get_service_location("absent").unwrap_err();
        assert_eq!(err, Error::UnknownService);
    }

    #[test]
    fn falls_back_to_transport_default() {
        let locator = ServiceLocator::with_default(|name| Some(format!("/var/run/{name}")));
        let ep = locator.get_service_location("absent").unwrap();
        assert_eq!(ep, "/var/run/absent");
    }
}
