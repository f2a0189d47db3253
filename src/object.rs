// Common object infrastructure
//
// Every first-class entity (compositor, output, surface, buffer,
// view, layer, plane, seat and its devices) embeds an ObjectCore:
// a type tag, a destroy signal emitted exactly once, and a typed
// user-data registry.
//
// Austin Shafer - 2024
use crate::signal::{Listener, Signal};
use utils::log;

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Compositor,
    Output,
    Surface,
    Buffer,
    View,
    Layer,
    Plane,
    Seat,
    Pointer,
    Keyboard,
    Touch,
}

/// Typed user-data registry
///
/// Replaces a pointer-keyed map: entries are keyed by their own
/// type, so a lookup always returns the exact type that was
/// stored. Entries are dropped (running their destructors) when
/// the owning object is destroyed.
pub struct UserDataMap {
    ud_map: RefCell<HashMap<TypeId, Box<dyn Any>>>,
}

impl UserDataMap {
    pub fn new() -> Self {
        Self {
            ud_map: RefCell::new(HashMap::new()),
        }
    }

    pub fn set<T: Any>(&self, data: T) {
        self.ud_map
            .borrow_mut()
            .insert(TypeId::of::<T>(), Box::new(data));
    }

    /// Run `func` against the stored value of type T, if any
    pub fn with<T: Any, R>(&self, func: impl FnOnce(&T) -> R) -> Option<R> {
        self.ud_map
            .borrow()
            .get(&TypeId::of::<T>())
            .and_then(|b| b.downcast_ref::<T>())
            .map(func)
    }

    pub fn get_clone<T: Any + Clone>(&self) -> Option<T> {
        self.with(|v: &T| v.clone())
    }

    pub fn contains<T: Any>(&self) -> bool {
        self.ud_map.borrow().contains_key(&TypeId::of::<T>())
    }

    pub fn remove<T: Any>(&self) -> bool {
        self.ud_map.borrow_mut().remove(&TypeId::of::<T>()).is_some()
    }

    fn clear(&self) {
        self.ud_map.borrow_mut().clear();
    }
}

/// The common head of every squall object
pub struct ObjectCore {
    oc_type: ObjectType,
    oc_destroy_signal: Signal<()>,
    oc_user_data: UserDataMap,
    oc_destroyed: bool,
}

impl ObjectCore {
    pub fn new(ty: ObjectType) -> Self {
        Self {
            oc_type: ty,
            oc_destroy_signal: Signal::new(),
            oc_user_data: UserDataMap::new(),
            oc_destroyed: false,
        }
    }

    pub fn object_type(&self) -> ObjectType {
        self.oc_type
    }

    pub fn user_data(&self) -> &UserDataMap {
        &self.oc_user_data
    }

    pub fn add_destroy_listener(&self, func: impl Fn(&()) + 'static) -> Listener<()> {
        self.oc_destroy_signal.add(func)
    }

    pub fn is_destroyed(&self) -> bool {
        self.oc_destroyed
    }

    /// Tear this object down
    ///
    /// Emits the destroy signal exactly once and drops the user
    /// data. Returns false on a double-destroy, which is an
    /// invariant violation: fatal in debug builds, logged and
    /// ignored in release.
    pub fn fini(&mut self) -> bool {
        match self.begin_fini() {
            Some(sig) => {
                sig.emit(&());
                true
            }
            None => false,
        }
    }

    /// First half of fini for owners that hold the object inside a
    /// RefCell: marks the object destroyed and hands back the
    /// signal so the caller can emit after releasing its borrow
    /// (listeners commonly reach back into the object).
    pub fn begin_fini(&mut self) -> Option<Signal<()>> {
        if self.oc_destroyed {
            log::error!("double destroy of {:?} object", self.oc_type);
            debug_assert!(!self.oc_destroyed);
            return None;
        }
        self.oc_destroyed = true;
        self.oc_user_data.clear();

        Some(self.oc_destroy_signal.clone())
    }
}
