// Per-output compositing planes
//
// A plane is one compositing destination on an output: the
// primary framebuffer plus whatever overlays or cursor planes
// the hardware offers. Each repaint pass hands every plane a
// render list (views plus visible regions) and a damage region;
// the clip region records what this plane hides from the planes
// beneath it.
//
// Austin Shafer - 2024
use crate::matrix::Transform;
use crate::object::{ObjectCore, ObjectType};
use crate::output::{Output, WeakOutput};
use crate::signal::Listener;
use crate::view::View;
use utils::region::Region;

use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// One entry of a plane's render list
///
/// Held for a single frame: rebuilt by every repaint pass. The
/// transform is a snapshot of the view's global transform at
/// assignment time.
#[derive(Clone)]
pub struct RenderItem {
    pub ri_view: View,
    pub ri_transform: Transform,
    /// what the renderer actually needs to draw of this view, in
    /// output coordinates
    pub ri_visible: Region,
}

pub(crate) struct PlaneInternal {
    pub(crate) p_core: ObjectCore,
    p_output: WeakOutput,

    pub(crate) p_render_list: Vec<RenderItem>,
    pub(crate) p_damage: Region,
    pub(crate) p_clip: Region,
}

#[derive(Clone)]
pub struct Plane {
    pub(crate) p_internal: Rc<RefCell<PlaneInternal>>,
}

pub(crate) type WeakPlane = Weak<RefCell<PlaneInternal>>;

impl PartialEq for Plane {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.p_internal, &other.p_internal)
    }
}

impl Plane {
    pub(crate) fn new(output: WeakOutput) -> Plane {
        Plane {
            p_internal: Rc::new(RefCell::new(PlaneInternal {
                p_core: ObjectCore::new(ObjectType::Plane),
                p_output: output,
                p_render_list: Vec::new(),
                p_damage: Region::empty(),
                p_clip: Region::empty(),
            })),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakPlane {
        Rc::downgrade(&self.p_internal)
    }

    pub(crate) fn from_weak(weak: &WeakPlane) -> Option<Plane> {
        weak.upgrade().map(|rc| Plane { p_internal: rc })
    }

    pub fn get_output(&self) -> Option<Output> {
        Output::from_weak(&self.p_internal.borrow().p_output)
    }

    /// The views to composite on this plane, back to front
    pub fn get_render_list(&self) -> Vec<RenderItem> {
        self.p_internal.borrow().p_render_list.clone()
    }

    pub fn get_damage_region(&self) -> Region {
        self.p_internal.borrow().p_damage.clone()
    }

    pub fn get_clip_region(&self) -> Region {
        self.p_internal.borrow().p_clip.clone()
    }

    pub fn add_damage(&self, damage: &Region) {
        self.p_internal.borrow_mut().p_damage.union(damage);
    }

    /// Backends subtract what they have already flushed
    pub fn subtract_damage(&self, handled: &Region) {
        self.p_internal.borrow_mut().p_damage.subtract(handled);
    }

    pub(crate) fn clear_damage(&self) {
        self.p_internal.borrow_mut().p_damage.clear();
    }

    pub(crate) fn set_render_state(&self, list: Vec<RenderItem>, clip: Region) {
        let mut internal = self.p_internal.borrow_mut();
        internal.p_render_list = list;
        internal.p_clip = clip;
    }

    pub fn add_destroy_listener(&self, func: impl Fn(&()) + 'static) -> Listener<()> {
        self.p_internal.borrow().p_core.add_destroy_listener(func)
    }

    pub fn is_destroyed(&self) -> bool {
        self.p_internal.borrow().p_core.is_destroyed()
    }

    /// Remove this plane from its output
    ///
    /// Views that were assigned here observe the weak handle as
    /// gone and fall back to fresh assignment on the next pass.
    pub fn destroy(&self) {
        let output = self.get_output();

        let sig = {
            let mut internal = self.p_internal.borrow_mut();
            let sig = match internal.p_core.begin_fini() {
                Some(s) => s,
                None => return,
            };
            internal.p_render_list.clear();
            sig
        };
        sig.emit(&());

        if let Some(out) = output {
            out.remove_plane(self);
            out.schedule_repaint();
        }
    }
}
