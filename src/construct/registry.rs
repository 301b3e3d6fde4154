//! Name-keyed capability registries.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::resolve::function::{Function, Functions, builtin_functions};

use super::capability::{CodecConstructor, Discovery, Transport};

/// Maps names to shared capability implementations.
pub struct Registry<T: ?Sized> {
    entries: HashMap<String, Arc<T>>,
}

impl<T: ?Sized> Registry<T> {
    pub fn new() -> Self {
        Registry {
            entries: HashMap::new(),
        }
    }

    /// Register an implementation, replacing any previous one with that name.
    pub fn register(&mut self, name: impl Into<String>, entry: Arc<T>) {
        self.entries.insert(name.into(), entry);
    }

    pub fn with(mut self, name: impl Into<String>, entry: Arc<T>) -> Self {
        self.register(name, entry);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.entries.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Registry::new()
    }
}

impl<T: ?Sized> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

/// Every capability the compiler may bind flows to. Template functions start
/// out with `strconcat` and `sprintf`.
#[derive(Debug)]
pub struct Capabilities {
    pub transports: Registry<dyn Transport>,
    pub codecs: Registry<dyn CodecConstructor>,
    pub discovery: Registry<dyn Discovery>,
    pub functions: Functions,
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities {
            transports: Registry::new(),
            codecs: Registry::new(),
            discovery: Registry::new(),
            functions: builtin_functions(),
        }
    }
}

impl Capabilities {
    pub fn new() -> Self {
        Capabilities::default()
    }

    pub fn with_transport(mut self, name: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        self.transports.register(name, transport);
        self
    }

    pub fn with_codec(mut self, name: impl Into<String>, codec: Arc<dyn CodecConstructor>) -> Self {
        self.codecs.register(name, codec);
        self
    }

    pub fn with_discovery(mut self, name: impl Into<String>, discovery: Arc<dyn Discovery>) -> Self {
        self.discovery.register(name, discovery);
        self
    }

    pub fn with_function(mut self, name: impl Into<String>, function: Arc<dyn Function>) -> Self {
        self.functions.register(name, function);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construct::capability::{AddressResolver, BoxError, StaticResolver};

    struct Dns;

    impl Discovery for Dns {
        fn resolver(&self, host: &str) -> Result<Arc<dyn AddressResolver>, BoxError> {
            Ok(Arc::new(StaticResolver::new(host)))
        }
    }

    #[test]
    fn lookup_by_name() {
        let capabilities = Capabilities::new().with_discovery("dns", Arc::new(Dns));

        assert!(capabilities.discovery.contains("dns"));
        assert!(capabilities.discovery.get("consul").is_none());
        assert!(capabilities.transports.is_empty());
        assert_eq!(capabilities.functions.names(), vec!["sprintf", "strconcat"]);
        assert_eq!(format!("{:?}", capabilities.discovery), r#"{"dns"}"#);
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let mut registry: Registry<dyn Discovery> = Registry::new();
        registry.register("dns", Arc::new(Dns));
        registry.register("dns", Arc::new(Dns));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names(), vec!["dns"]);
    }
}
