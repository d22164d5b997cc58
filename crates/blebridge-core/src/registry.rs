//! Handle registry for discovered GATT objects.
//!
//! Native services, characteristics and descriptors cannot cross the script
//! boundary, so each one is registered under a small integer handle that
//! scripts pass back on later calls. A registry belongs to exactly one device
//! session; dropping the session drops every handle it issued.

use std::collections::{HashMap, HashSet};

use blebridge_types::ObjectHandle;

use crate::error::{Error, Result};
use crate::native::{AttributePath, NativeCharacteristic, NativeDescriptor, NativeService};

/// A registered GATT object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattObject {
    /// A service.
    Service(NativeService),
    /// A characteristic.
    Characteristic(NativeCharacteristic),
    /// A descriptor.
    Descriptor(NativeDescriptor),
}

impl GattObject {
    /// Attribute path of the object.
    pub fn path(&self) -> AttributePath {
        match self {
            Self::Service(s) => s.path(),
            Self::Characteristic(c) => c.path(),
            Self::Descriptor(d) => d.path(),
        }
    }

    /// Short name of the object kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Service(_) => "service",
            Self::Characteristic(_) => "characteristic",
            Self::Descriptor(_) => "descriptor",
        }
    }
}

/// Maps object handles to registered objects.
///
/// Handles start at 1 and increase monotonically for the registry's lifetime.
#[derive(Debug)]
pub struct HandleRegistry<T> {
    objects: HashMap<ObjectHandle, T>,
    next_handle: u64,
}

impl<T> HandleRegistry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            next_handle: 1,
        }
    }

    /// Register an object under a fresh handle.
    pub fn register(&mut self, object: T) -> ObjectHandle {
        let handle = ObjectHandle(self.next_handle);
        self.next_handle += 1;
        self.objects.insert(handle, object);
        handle
    }

    /// Look up an object.
    ///
    /// Unknown or unregistered handles fail with [`Error::ObjectNotFound`].
    pub fn resolve(&self, handle: ObjectHandle) -> Result<&T> {
        self.objects
            .get(&handle)
            .ok_or(Error::ObjectNotFound(handle))
    }

    /// Remove an object, returning it if it was registered.
    pub fn unregister(&mut self, handle: ObjectHandle) -> Option<T> {
        self.objects.remove(&handle)
    }

    /// Find the handle of the first object matching `predicate`.
    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Option<ObjectHandle> {
        self.objects
            .iter()
            .find(|(_, object)| predicate(object))
            .map(|(handle, _)| *handle)
    }

    /// Number of registered objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Drop every object and restart numbering at 1.
    pub fn clear(&mut self) {
        self.objects.clear();
        self.next_handle = 1;
    }
}

impl<T> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleRegistry<GattObject> {
    /// Register a GATT object, reusing the existing handle if an object with
    /// the same attribute path was discovered before.
    pub fn register_gatt(&mut self, object: GattObject) -> ObjectHandle {
        let path = object.path();
        if let Some(handle) = self.find(|existing| existing.path() == path) {
            // Refresh properties reported by the latest discovery.
            self.objects.insert(handle, object);
            return handle;
        }
        self.register(object)
    }
}

/// Paths listed more than once in one discovery result, each reported once.
///
/// Siblings sharing a UUID (several HID Report characteristics, say) have
/// the same path, so [`HandleRegistry::register_gatt`] folds them into one
/// handle.
pub fn duplicate_paths<I>(paths: I) -> Vec<AttributePath>
where
    I: IntoIterator<Item = AttributePath>,
{
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for path in paths {
        if !seen.insert(path) && !duplicates.contains(&path) {
            duplicates.push(path);
        }
    }
    duplicates
}
