// Explicit registry of codecs and enforceable stores, passed to whoever needs it

use crate::codec::CodecRegistry;
use crate::enforcer::StoreRegistration;
use std::fmt;
use std::sync::Arc;

/// Created once at startup and handed to stores and the enforcer.
#[derive(Clone, Default)]
pub struct Registry {
    codecs: CodecRegistry,
    registrations: Vec<Arc<dyn StoreRegistration>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_codecs(codecs: CodecRegistry) -> Self {
        Registry {
            codecs,
            registrations: Vec::new(),
        }
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    pub fn codecs_mut(&mut self) -> &mut CodecRegistry {
        &mut self.codecs
    }

    /// Add a store registration. A registration with the same name is
    /// replaced.
    pub fn register(&mut self, registration: Arc<dyn StoreRegistration>) {
        self.unregister(registration.name());
        self.registrations.push(registration);
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn StoreRegistration>> {
        let idx = self.registrations.iter().position(|r| r.name() == name)?;
        Some(self.registrations.remove(idx))
    }

    pub fn registrations(&self) -> &[Arc<dyn StoreRegistration>] {
        &self.registrations
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.registrations.iter().map(|r| r.name()).collect();
        f.debug_struct("Registry")
            .field("codecs", &self.codecs)
            .field("registrations", &names)
            .finish()
    }
}
