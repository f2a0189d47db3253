// Double-buffered client surface state
//
// A surface accumulates client requests (attach, damage, region
// sets, frame callbacks) in a pending state that commit promotes
// atomically into the current state. Everything the assignment
// engine reads lives in the current state.
//
// Austin Shafer - 2024
use crate::buffer::Buffer;
use crate::compositor::{Compositor, WeakCompositor};
use crate::matrix::OutputTransform;
use crate::object::{ObjectCore, ObjectType};
use crate::signal::Listener;
use crate::view::{View, WeakView};
use crate::ProtocolError;
use utils::log;
use utils::region::{Rect, Region};

use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// One client frame callback resource
///
/// Fired at most once, then dropped. The wire layer destroys the
/// wl_callback resource from its implementation of done.
pub trait FrameCallback {
    fn done(&self, time_ms: u32);
}

/// The pending half of a surface
///
/// Accumulators are cleared when commit promotes them, with one
/// twist: opaque/input sets are flagged so a commit that never
/// touched them leaves the current regions alone.
pub(crate) struct SurfaceState {
    ss_buffer: Option<Buffer>,
    ss_buffer_destroy: Option<Listener<()>>,
    ss_x: i32,
    ss_y: i32,
    ss_newly_attached: bool,

    ss_transform: OutputTransform,
    ss_scale: i32,

    ss_damage: Region,
    ss_opaque: Region,
    ss_opaque_set: bool,
    ss_input: Region,
    ss_input_set: bool,

    ss_frame_callbacks: Vec<Box<dyn FrameCallback>>,
}

impl SurfaceState {
    fn new() -> Self {
        Self {
            ss_buffer: None,
            ss_buffer_destroy: None,
            ss_x: 0,
            ss_y: 0,
            ss_newly_attached: false,
            ss_transform: OutputTransform::Normal,
            ss_scale: 1,
            ss_damage: Region::empty(),
            ss_opaque: Region::empty(),
            ss_opaque_set: false,
            ss_input: Region::empty(),
            ss_input_set: false,
            ss_frame_callbacks: Vec::new(),
        }
    }
}

pub(crate) struct SurfaceInternal {
    pub(crate) s_core: ObjectCore,
    s_compositor: WeakCompositor,

    /// current buffer and its accumulated attach offset
    s_buffer: Option<Buffer>,
    s_x: i32,
    s_y: i32,
    s_transform: OutputTransform,
    s_scale: i32,

    /// Surface size in surface local coordinates: buffer dims
    /// rotated by the transform, divided by the scale.
    s_w: i32,
    s_h: i32,

    s_damage: Region,
    s_opaque: Region,
    s_input: Region,

    s_frame_callbacks: Vec<Box<dyn FrameCallback>>,

    s_pending: SurfaceState,

    s_role: Option<String>,
    pub(crate) s_views: Vec<WeakView>,
}

/// Handle to a client surface
#[derive(Clone)]
pub struct Surface {
    pub(crate) s_internal: Rc<RefCell<SurfaceInternal>>,
}

pub(crate) type WeakSurface = Weak<RefCell<SurfaceInternal>>;

impl PartialEq for Surface {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.s_internal, &other.s_internal)
    }
}

impl Surface {
    pub(crate) fn new(compositor: WeakCompositor) -> Surface {
        Surface {
            s_internal: Rc::new(RefCell::new(SurfaceInternal {
                s_core: ObjectCore::new(ObjectType::Surface),
                s_compositor: compositor,
                s_buffer: None,
                s_x: 0,
                s_y: 0,
                s_transform: OutputTransform::Normal,
                s_scale: 1,
                s_w: 0,
                s_h: 0,
                s_damage: Region::empty(),
                s_opaque: Region::empty(),
                // the default input region accepts everything
                s_input: Region::infinite(),
                s_frame_callbacks: Vec::new(),
                s_pending: SurfaceState::new(),
                s_role: None,
                s_views: Vec::new(),
            })),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakSurface {
        Rc::downgrade(&self.s_internal)
    }

    pub(crate) fn from_weak(weak: &WeakSurface) -> Option<Surface> {
        weak.upgrade().map(|rc| Surface { s_internal: rc })
    }

    /// wl_surface.attach
    ///
    /// A None buffer is legal and means the surface has no content
    /// after the next commit. Re-attaching the buffer that is
    /// already pending changes nothing.
    pub fn attach(&self, buffer: Option<&Buffer>, x: i32, y: i32) {
        let mut internal = self.s_internal.borrow_mut();

        if let (Some(new), Some(old)) = (buffer, internal.s_pending.ss_buffer.as_ref()) {
            if new == old {
                return;
            }
        }

        // drop the observer on whatever was pending before
        internal.s_pending.ss_buffer_destroy = None;

        internal.s_pending.ss_buffer = buffer.cloned();
        internal.s_pending.ss_x = x;
        internal.s_pending.ss_y = y;
        internal.s_pending.ss_newly_attached = true;

        if let Some(buf) = buffer {
            // If the client destroys this buffer before committing,
            // the pending attach silently becomes attach(null).
            let weak = Rc::downgrade(&self.s_internal);
            internal.s_pending.ss_buffer_destroy = Some(buf.add_destroy_listener(move |_| {
                if let Some(surf) = weak.upgrade() {
                    let mut s = surf.borrow_mut();
                    s.s_pending.ss_buffer = None;
                    s.s_pending.ss_buffer_destroy = None;
                }
            }));
        }
    }

    /// wl_surface.damage, in surface local coordinates
    pub fn damage(&self, rect: &Rect<i32>) {
        self.s_internal
            .borrow_mut()
            .s_pending
            .ss_damage
            .add(rect);
    }

    /// wl_surface.frame
    pub fn frame(&self, callback: Box<dyn FrameCallback>) {
        self.s_internal
            .borrow_mut()
            .s_pending
            .ss_frame_callbacks
            .push(callback);
    }

    /// wl_surface.set_opaque_region, None means nothing is opaque
    pub fn set_opaque_region(&self, region: Option<&Region>) {
        let mut internal = self.s_internal.borrow_mut();
        internal.s_pending.ss_opaque = match region {
            Some(r) => r.clone(),
            None => Region::empty(),
        };
        internal.s_pending.ss_opaque_set = true;
    }

    /// wl_surface.set_input_region, None means everything accepts input
    pub fn set_input_region(&self, region: Option<&Region>) {
        let mut internal = self.s_internal.borrow_mut();
        internal.s_pending.ss_input = match region {
            Some(r) => r.clone(),
            None => Region::infinite(),
        };
        internal.s_pending.ss_input_set = true;
    }

    /// wl_surface.set_buffer_transform
    ///
    /// An out of range value is a protocol error, the caller posts
    /// it on the client resource and disconnects.
    pub fn set_buffer_transform(&self, transform: i32) -> crate::Result<()> {
        match OutputTransform::from_i32(transform) {
            Some(t) => {
                self.s_internal.borrow_mut().s_pending.ss_transform = t;
                Ok(())
            }
            None => Err(ProtocolError::InvalidTransform(transform).into()),
        }
    }

    /// wl_surface.set_buffer_scale
    pub fn set_buffer_scale(&self, scale: i32) -> crate::Result<()> {
        if scale < 1 {
            return Err(ProtocolError::InvalidScale(scale).into());
        }
        self.s_internal.borrow_mut().s_pending.ss_scale = scale;
        Ok(())
    }

    /// A role is assigned once for the surface's lifetime
    pub fn set_role(&self, role: &str) -> crate::Result<()> {
        let mut internal = self.s_internal.borrow_mut();
        if let Some(existing) = internal.s_role.as_ref() {
            return Err(ProtocolError::RoleTaken(existing.clone()).into());
        }
        internal.s_role = Some(role.to_owned());
        Ok(())
    }

    pub fn get_role(&self) -> Option<String> {
        self.s_internal.borrow().s_role.clone()
    }

    /// wl_surface.commit: atomically promote pending to current
    pub fn commit(&self) {
        let compositor = Compositor::from_weak(&self.s_internal.borrow().s_compositor);
        let newly_attached;

        {
            let mut s = self.s_internal.borrow_mut();

            // surface.attach()
            newly_attached = s.s_pending.ss_newly_attached;
            if newly_attached {
                // The observer's job ends here: once current, the
                // refcount keeps the buffer alive.
                s.s_pending.ss_buffer_destroy = None;

                if let Some(buf) = s.s_pending.ss_buffer.as_ref() {
                    buf.reference();
                }
                let old = s.s_buffer.take();
                s.s_buffer = s.s_pending.ss_buffer.take();

                let (dx, dy) = (s.s_pending.ss_x, s.s_pending.ss_y);
                s.s_x += dx;
                s.s_y += dy;
                s.s_pending.ss_x = 0;
                s.s_pending.ss_y = 0;
                s.s_pending.ss_newly_attached = false;

                if let Some(old) = old {
                    old.unreference();
                }
            }

            // surface.set_buffer_transform(), surface.set_buffer_scale()
            s.s_transform = s.s_pending.ss_transform;
            s.s_scale = s.s_pending.ss_scale;

            // surface.frame(): move, not copy
            let cbs = std::mem::replace(&mut s.s_pending.ss_frame_callbacks, Vec::new());
            s.s_frame_callbacks.extend(cbs);

            // surface.damage()
            let pend = std::mem::replace(&mut s.s_pending.ss_damage, Region::empty());
            s.s_damage.union(&pend);

            // surface.set_opaque_region(), surface.set_input_region()
            if s.s_pending.ss_opaque_set {
                s.s_opaque = std::mem::replace(&mut s.s_pending.ss_opaque, Region::empty());
                s.s_pending.ss_opaque_set = false;
            }
            if s.s_pending.ss_input_set {
                s.s_input = std::mem::replace(&mut s.s_pending.ss_input, Region::empty());
                s.s_pending.ss_input_set = false;
            }
        }

        if let Some(comp) = compositor.as_ref() {
            if newly_attached {
                // Renderers learn buffer dimensions on attach
                comp.attach_surface_to_outputs(self);
            }
        }
        self.update_size();

        // Views of this surface track its size
        let (w, h) = self.size();
        for view in self.views().iter() {
            view.handle_surface_commit(w, h);
        }

        if let Some(comp) = compositor.as_ref() {
            comp.schedule_surface_outputs(self);
        }
    }

    /// Derive surface local size from the current buffer
    pub(crate) fn update_size(&self) {
        let mut internal = self.s_internal.borrow_mut();

        let mut w = 0;
        let mut h = 0;
        if let Some(buf) = internal.s_buffer.as_ref() {
            if let Some((bw, bh)) = buf.size() {
                if internal.s_transform.swaps_dimensions() {
                    w = bh;
                    h = bw;
                } else {
                    w = bw;
                    h = bh;
                }
                w /= internal.s_scale;
                h /= internal.s_scale;
            }
        }

        internal.s_w = w;
        internal.s_h = h;
    }

    pub fn size(&self) -> (i32, i32) {
        let internal = self.s_internal.borrow();
        (internal.s_w, internal.s_h)
    }

    pub fn get_buffer(&self) -> Option<Buffer> {
        self.s_internal.borrow().s_buffer.clone()
    }

    pub fn get_buffer_offset(&self) -> (i32, i32) {
        let internal = self.s_internal.borrow();
        (internal.s_x, internal.s_y)
    }

    pub fn get_buffer_transform(&self) -> OutputTransform {
        self.s_internal.borrow().s_transform
    }

    pub fn get_buffer_scale(&self) -> i32 {
        self.s_internal.borrow().s_scale
    }

    pub fn get_damage_region(&self) -> Region {
        self.s_internal.borrow().s_damage.clone()
    }

    pub fn get_opaque_region(&self) -> Region {
        self.s_internal.borrow().s_opaque.clone()
    }

    pub fn get_input_region(&self) -> Region {
        self.s_internal.borrow().s_input.clone()
    }

    pub fn user_data(&self) -> std::cell::Ref<crate::object::UserDataMap> {
        std::cell::Ref::map(self.s_internal.borrow(), |i| i.s_core.user_data())
    }

    pub fn add_destroy_listener(&self, func: impl Fn(&()) + 'static) -> Listener<()> {
        self.s_internal.borrow().s_core.add_destroy_listener(func)
    }

    pub fn views(&self) -> Vec<View> {
        self.s_internal
            .borrow()
            .s_views
            .iter()
            .filter_map(View::from_weak)
            .collect()
    }

    pub(crate) fn add_view(&self, view: &View) {
        self.s_internal.borrow_mut().s_views.push(view.downgrade());
    }

    pub(crate) fn remove_view(&self, view: &View) {
        let mut internal = self.s_internal.borrow_mut();
        internal
            .s_views
            .retain(|w| match View::from_weak(w) {
                Some(v) => v != *view,
                None => false,
            });
    }

    /// Hand the accumulated damage to the repaint pass and clear it
    pub(crate) fn take_damage(&self) -> Region {
        let mut internal = self.s_internal.borrow_mut();
        std::mem::replace(&mut internal.s_damage, Region::empty())
    }

    pub(crate) fn has_damage(&self) -> bool {
        !self.s_internal.borrow().s_damage.is_empty()
    }

    /// Drain the current frame callbacks for frame-done delivery
    pub(crate) fn take_frame_callbacks(&self) -> Vec<Box<dyn FrameCallback>> {
        let mut internal = self.s_internal.borrow_mut();
        std::mem::replace(&mut internal.s_frame_callbacks, Vec::new())
    }

    pub fn is_destroyed(&self) -> bool {
        self.s_internal.borrow().s_core.is_destroyed()
    }

    /// Tear down this surface
    ///
    /// Views observing us drop their content references through
    /// the destroy signal.
    pub fn destroy(&self) {
        let compositor = Compositor::from_weak(&self.s_internal.borrow().s_compositor);

        let sig = {
            let mut internal = self.s_internal.borrow_mut();
            let sig = match internal.s_core.begin_fini() {
                Some(s) => s,
                None => return,
            };

            if let Some(buf) = internal.s_buffer.take() {
                buf.unreference();
            }
            internal.s_pending.ss_buffer = None;
            internal.s_pending.ss_buffer_destroy = None;
            internal.s_frame_callbacks.clear();
            internal.s_pending.ss_frame_callbacks.clear();
            sig
        };

        sig.emit(&());

        if let Some(comp) = compositor {
            comp.remove_surface(self);
        }

        log::debug!("surface destroyed");
    }
}

#[cfg(test)]
impl Surface {
    /// All pending accumulators are empty (post-commit invariant)
    pub(crate) fn pending_is_clear(&self) -> bool {
        let s = self.s_internal.borrow();
        !s.s_pending.ss_newly_attached
            && s.s_pending.ss_buffer.is_none()
            && s.s_pending.ss_damage.is_empty()
            && s.s_pending.ss_frame_callbacks.is_empty()
            && !s.s_pending.ss_opaque_set
            && !s.s_pending.ss_input_set
    }
}
