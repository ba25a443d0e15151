//! Polymorphic Read Dispatcher (C7).
//!
//! A caller result type `R` declares a [`TypeRegistry<R>`] mapping a stored row's `row_type_tag`
//! to a decoder. This is the extension point that lets a single query return a union of payload
//! shapes coexisting under one partition.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RowVaultError;
use crate::value::AttributeMap;

/// Decodes a stored attribute map into one variant of `R`.
pub type Provider<R> = Arc<dyn Fn(&AttributeMap) -> Result<R, RowVaultError> + Send + Sync>;

/// Maps row-type tags to decoders for a single result type `R`.
#[derive(Clone)]
pub struct TypeRegistry<R> {
    providers: HashMap<String, Provider<R>>,
}

impl<R> Default for TypeRegistry<R> {
    fn default() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }
}

impl<R> TypeRegistry<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a decoder for `row_type_tag`. Overwrites any prior registration for the same tag.
    pub fn register(
        mut self,
        row_type_tag: impl Into<String>,
        provider: impl Fn(&AttributeMap) -> Result<R, RowVaultError> + Send + Sync + 'static,
    ) -> Self {
        self.providers.insert(row_type_tag.into(), Arc::new(provider));
        self
    }

    /// Decode `item` using the provider registered for `row_type_tag`.
    ///
    /// Fails with [`RowVaultError::UnexpectedType`] if no provider is registered for the tag.
    pub fn decode(&self, row_type_tag: &str, item: &AttributeMap) -> Result<R, RowVaultError> {
        match self.providers.get(row_type_tag) {
            Some(provider) => provider(item),
            None => Err(RowVaultError::UnexpectedType {
                provided: row_type_tag.to_string(),
            }),
        }
    }
}
