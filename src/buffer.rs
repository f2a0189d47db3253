// Client buffer tracking
//
// A Buffer wraps the client's pixel source. The compositor side
// holds it by explicit reference count: the current state of any
// surface it is committed to, plus any in-flight render node.
// When the count drops back to zero the client is told it may
// reuse the storage.
//
// Austin Shafer - 2024
use crate::object::{ObjectCore, ObjectType, UserDataMap};
use crate::signal::Listener;
use utils::log;

use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// The wire layer's half of a buffer
///
/// Implemented by whatever owns the client resource so the core
/// can hand the storage back without knowing about the protocol.
pub trait BufferResource {
    /// Tell the client the buffer is free for reuse
    fn release(&self);
}

pub(crate) struct BufferInternal {
    pub(crate) b_core: ObjectCore,
    b_resource: Option<Box<dyn BufferResource>>,
    b_ref_count: u32,
    /// unknown until the buffer is first attached to a renderer
    b_size: Option<(i32, i32)>,
}

/// Refcounted handle to a client pixel source
#[derive(Clone)]
pub struct Buffer {
    pub(crate) b_internal: Rc<RefCell<BufferInternal>>,
}

/// Used by surface pending state to observe buffer death without
/// keeping the buffer alive.
pub(crate) type WeakBuffer = Weak<RefCell<BufferInternal>>;

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.b_internal, &other.b_internal)
    }
}

impl Buffer {
    /// Called on first sighting of a client buffer resource
    pub fn new(resource: Box<dyn BufferResource>) -> Buffer {
        Buffer {
            b_internal: Rc::new(RefCell::new(BufferInternal {
                b_core: ObjectCore::new(ObjectType::Buffer),
                b_resource: Some(resource),
                b_ref_count: 0,
                b_size: None,
            })),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakBuffer {
        Rc::downgrade(&self.b_internal)
    }

    pub fn reference(&self) {
        self.b_internal.borrow_mut().b_ref_count += 1;
    }

    /// Drop one compositor-side reference
    ///
    /// The release event goes to the client exactly when the last
    /// reference goes away.
    pub fn unreference(&self) {
        let mut internal = self.b_internal.borrow_mut();
        if internal.b_ref_count == 0 {
            log::error!("buffer unreference below zero");
            debug_assert!(internal.b_ref_count > 0);
            return;
        }

        internal.b_ref_count -= 1;
        if internal.b_ref_count == 0 {
            if let Some(res) = internal.b_resource.as_ref() {
                res.release();
            }
        }
    }

    pub fn ref_count(&self) -> u32 {
        self.b_internal.borrow().b_ref_count
    }

    pub fn size(&self) -> Option<(i32, i32)> {
        self.b_internal.borrow().b_size
    }

    /// Recorded when a backend renderer first attaches the buffer
    pub fn set_size(&self, w: i32, h: i32) {
        self.b_internal.borrow_mut().b_size = Some((w, h));
    }

    pub fn add_destroy_listener(&self, func: impl Fn(&()) + 'static) -> Listener<()> {
        self.b_internal.borrow().b_core.add_destroy_listener(func)
    }

    pub fn user_data(&self) -> std::cell::Ref<UserDataMap> {
        std::cell::Ref::map(self.b_internal.borrow(), |i| i.b_core.user_data())
    }

    pub fn is_destroyed(&self) -> bool {
        self.b_internal.borrow().b_core.is_destroyed()
    }

    /// The client resource died
    ///
    /// Observers (pending surface states) clear their handles, and
    /// any still-held references become inert: there is nobody left
    /// to send release to.
    pub fn destroy(&self) {
        let sig = {
            let mut internal = self.b_internal.borrow_mut();
            internal.b_resource = None;
            internal.b_core.begin_fini()
        };
        // emit outside the borrow, listeners will reach back in
        if let Some(sig) = sig {
            sig.emit(&());
        }
    }
}
