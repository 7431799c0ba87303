//! HandlerRegistry — a read-only, process-init-populated mapping from
//! channel-type tag to its registered handler. Lookup is O(1). Mirrors the
//! pattern of assembling long-lived `Arc<dyn Trait>` services once in
//! `main` and threading them through shared state, rather than a mutable
//! global.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::contract::RegisteredHandler;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no handler registered for channel type '{0}'")]
    UnknownChannelType(String),

    #[error("channel type '{0}' is already registered")]
    DuplicateChannelType(String),
}

/// Builds a `HandlerRegistry` during process init, then freezes it.
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<&'static str, RegisteredHandler>,
}

impl HandlerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for its declared channel type. An adapter may
    /// register multiple channel-type tags by calling this once per tag
    /// with distinct `RegisteredHandler` wrappers around the same
    /// underlying handler instance.
    pub fn register(mut self, handler: RegisteredHandler) -> Result<Self, RegistryError> {
        let tag = handler.handler.channel_type();
        if self.handlers.contains_key(tag) {
            return Err(RegistryError::DuplicateChannelType(tag.to_string()));
        }
        self.handlers.insert(tag, handler);
        Ok(self)
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry { handlers: Arc::new(self.handlers) }
    }
}

/// Read-only after construction; cloning is cheap (one `Arc` bump).
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: Arc<HashMap<&'static str, RegisteredHandler>>,
}

impl HandlerRegistry {
    pub fn lookup(&self, channel_type: &str) -> Result<RegisteredHandler, RegistryError> {
        self.handlers
            .get(channel_type)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownChannelType(channel_type.to_string()))
    }

    pub fn channel_types(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
