// Views: surfaces placed in the scene
//
// A view positions a surface (or a content-less grouping node)
// in the global scene. Views form a tree via parents/children,
// get coarse stacking from layers, and carry the per-output
// plane assignment state the damage engine works from.
//
// Austin Shafer - 2024
use crate::compositor::{Compositor, WeakCompositor};
use crate::layer::{Layer, WeakLayer};
use crate::matrix::Transform;
use crate::object::{ObjectCore, ObjectType};
use crate::output::Output;
use crate::plane::{Plane, WeakPlane};
use crate::signal::Listener;
use crate::surface::{Surface, WeakSurface};
use crate::SquallError;
use utils::log;
use utils::region::{Rect, Region};

use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Per-output plane assignment state, owned by the view
///
/// The plane and the previous visible region from the last
/// completed repaint pass; the damage rules compare against
/// these.
pub(crate) struct PlaneEntry {
    /// plane this view was on after the last pass
    pub(crate) pe_plane: Option<WeakPlane>,
    /// visible region from the last pass, in output coordinates
    pub(crate) pe_visible: Region,
    /// plane requested for the in-progress pass (backend's answer)
    pub(crate) pe_pending_plane: Option<WeakPlane>,
}

impl PlaneEntry {
    fn new() -> Self {
        Self {
            pe_plane: None,
            pe_visible: Region::empty(),
            pe_pending_plane: None,
        }
    }
}

pub(crate) struct ViewInternal {
    pub(crate) v_core: ObjectCore,
    v_compositor: WeakCompositor,
    pub(crate) v_id: u64,

    /* Hierarchy */
    v_parent: Option<WeakView>,
    v_parent_destroy: Option<Listener<()>>,
    /// front to back: index 0 is the topmost child
    v_children: Vec<WeakView>,

    /* Geometry */
    pub(crate) v_geometry_dirty: bool,
    v_x: f64,
    v_y: f64,
    v_w: i32,
    v_h: i32,
    v_transform: Transform,
    pub(crate) v_global_transform: Transform,

    v_alpha: f32,
    pub(crate) v_visibility: bool,
    pub(crate) v_mapped: bool,

    v_layer: Option<WeakLayer>,

    /* Content */
    pub(crate) v_surface: Option<WeakSurface>,
    v_surface_destroy: Option<Listener<()>>,

    /// derived, in global coordinates
    pub(crate) v_bounding: Region,
    pub(crate) v_opaque: Region,

    v_clip_to_parent: bool,
    v_clip_region: Option<Region>,
    /// destination size override, replaces the surface size
    v_viewport: Option<(i32, i32)>,

    /// bit per output id, refreshed by the repaint pass
    pub(crate) v_output_overlap: u32,
    /// indexed by output id
    pub(crate) v_plane_entries: Vec<PlaneEntry>,
}

/// Handle to a scene graph node
#[derive(Clone)]
pub struct View {
    pub(crate) v_internal: Rc<RefCell<ViewInternal>>,
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View")
            .field("v_id", &self.v_internal.borrow().v_id)
            .finish()
    }
}

pub(crate) type WeakView = Weak<RefCell<ViewInternal>>;

impl PartialEq for View {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.v_internal, &other.v_internal)
    }
}

impl View {
    pub(crate) fn new(compositor: WeakCompositor, id: u64, surface: Option<&Surface>) -> View {
        let view = View {
            v_internal: Rc::new(RefCell::new(ViewInternal {
                v_core: ObjectCore::new(ObjectType::View),
                v_compositor: compositor,
                v_id: id,
                v_parent: None,
                v_parent_destroy: None,
                v_children: Vec::new(),
                v_geometry_dirty: true,
                v_x: 0.0,
                v_y: 0.0,
                v_w: 0,
                v_h: 0,
                v_transform: Transform::identity(),
                v_global_transform: Transform::identity(),
                v_alpha: 1.0,
                v_visibility: true,
                v_mapped: false,
                v_layer: None,
                v_surface: None,
                v_surface_destroy: None,
                v_bounding: Region::empty(),
                v_opaque: Region::empty(),
                v_clip_to_parent: false,
                v_clip_region: None,
                v_viewport: None,
                v_output_overlap: 0,
                v_plane_entries: Vec::new(),
            })),
        };

        if let Some(surf) = surface {
            view.set_content(surf);
        }

        view
    }

    pub(crate) fn downgrade(&self) -> WeakView {
        Rc::downgrade(&self.v_internal)
    }

    pub(crate) fn from_weak(weak: &WeakView) -> Option<View> {
        weak.upgrade().map(|rc| View { v_internal: rc })
    }

    fn compositor(&self) -> Option<Compositor> {
        Compositor::from_weak(&self.v_internal.borrow().v_compositor)
    }

    fn set_content(&self, surface: &Surface) {
        let weak = self.downgrade();
        let listener = surface.add_destroy_listener(move |_| {
            if let Some(view) = View::from_weak(&weak) {
                view.handle_surface_destroy();
            }
        });

        {
            let mut internal = self.v_internal.borrow_mut();
            internal.v_surface = Some(surface.downgrade());
            internal.v_surface_destroy = Some(listener);
            let (w, h) = surface.size();
            internal.v_w = w;
            internal.v_h = h;
        }
        surface.add_view(self);
    }

    fn handle_surface_destroy(&self) {
        {
            let mut internal = self.v_internal.borrow_mut();
            internal.v_surface = None;
            internal.v_surface_destroy = None;
            internal.v_w = 0;
            internal.v_h = 0;
        }
        self.mark_geometry_dirty();
        self.schedule_repaint();
    }

    pub fn get_surface(&self) -> Option<Surface> {
        let internal = self.v_internal.borrow();
        internal.v_surface.as_ref().and_then(Surface::from_weak)
    }

    /* ---------------- hierarchy ---------------- */

    pub fn get_parent(&self) -> Option<View> {
        let internal = self.v_internal.borrow();
        internal.v_parent.as_ref().and_then(View::from_weak)
    }

    /// Children of this view, topmost first
    pub fn children(&self) -> Vec<View> {
        self.v_internal
            .borrow()
            .v_children
            .iter()
            .filter_map(View::from_weak)
            .collect()
    }

    pub fn set_parent(&self, parent: Option<&View>) -> crate::Result<()> {
        if let Some(p) = parent {
            if p.is_destroyed() {
                return Err(SquallError::ViewGone);
            }
        }

        // no-op when nothing changes
        if self.get_parent().as_ref() == parent {
            return Ok(());
        }

        if let Some(old) = self.get_parent() {
            old.v_internal.borrow_mut().v_children.retain(|w| {
                View::from_weak(w).map(|v| v != *self).unwrap_or(false)
            });
        }
        {
            let mut internal = self.v_internal.borrow_mut();
            internal.v_parent = None;
            internal.v_parent_destroy = None;
        }

        if let Some(new_parent) = parent {
            let weak = self.downgrade();
            let listener = new_parent
                .v_internal
                .borrow()
                .v_core
                .add_destroy_listener(move |_| {
                    if let Some(view) = View::from_weak(&weak) {
                        let _ = view.set_parent(None);
                    }
                });

            new_parent
                .v_internal
                .borrow_mut()
                .v_children
                .insert(0, self.downgrade());

            let mut internal = self.v_internal.borrow_mut();
            internal.v_parent = Some(new_parent.downgrade());
            internal.v_parent_destroy = Some(listener);
        }

        self.mark_geometry_dirty();
        self.schedule_repaint();
        Ok(())
    }

    /* ---------------- geometry setters ---------------- */

    pub fn set_position(&self, x: f64, y: f64) {
        {
            let mut internal = self.v_internal.borrow_mut();
            if internal.v_x == x && internal.v_y == y {
                return;
            }
            internal.v_x = x;
            internal.v_y = y;
        }
        self.mark_geometry_dirty();
        self.schedule_repaint();
    }

    pub fn get_position(&self) -> (f64, f64) {
        let internal = self.v_internal.borrow();
        (internal.v_x, internal.v_y)
    }

    /// Explicit size for views without surfaces; views with a
    /// surface are resized on commit instead.
    pub fn resize(&self, w: i32, h: i32) {
        {
            let mut internal = self.v_internal.borrow_mut();
            if internal.v_w == w && internal.v_h == h {
                return;
            }
            internal.v_w = w;
            internal.v_h = h;
        }
        self.mark_geometry_dirty();
        self.schedule_repaint();
    }

    pub fn get_size(&self) -> (i32, i32) {
        let internal = self.v_internal.borrow();
        (internal.v_w, internal.v_h)
    }

    pub fn set_transform(&self, transform: Transform) {
        self.v_internal.borrow_mut().v_transform = transform;
        self.mark_geometry_dirty();
        self.schedule_repaint();
    }

    pub fn get_transform(&self) -> Transform {
        self.v_internal.borrow().v_transform
    }

    pub fn get_global_transform(&self) -> Transform {
        self.v_internal.borrow().v_global_transform
    }

    pub fn set_visibility(&self, visible: bool) {
        {
            let mut internal = self.v_internal.borrow_mut();
            if internal.v_visibility == visible {
                return;
            }
            internal.v_visibility = visible;
        }
        self.mark_geometry_dirty();
        self.schedule_repaint();
    }

    pub fn get_visibility(&self) -> bool {
        self.v_internal.borrow().v_visibility
    }

    pub fn set_alpha(&self, alpha: f32) {
        {
            let mut internal = self.v_internal.borrow_mut();
            if internal.v_alpha == alpha {
                return;
            }
            internal.v_alpha = alpha;
        }
        self.mark_geometry_dirty();
        self.schedule_repaint();
    }

    pub fn get_alpha(&self) -> f32 {
        self.v_internal.borrow().v_alpha
    }

    pub fn set_clip_region(&self, region: Option<Region>) {
        self.v_internal.borrow_mut().v_clip_region = region;
        self.mark_geometry_dirty();
        self.schedule_repaint();
    }

    pub fn set_clip_to_parent(&self, clip: bool) {
        self.v_internal.borrow_mut().v_clip_to_parent = clip;
        self.mark_geometry_dirty();
        self.schedule_repaint();
    }

    /// Override the destination size used for bounding math
    pub fn set_viewport(&self, size: Option<(i32, i32)>) {
        self.v_internal.borrow_mut().v_viewport = size;
        self.mark_geometry_dirty();
        self.schedule_repaint();
    }

    pub fn map(&self) {
        {
            let mut internal = self.v_internal.borrow_mut();
            if internal.v_mapped {
                return;
            }
            internal.v_mapped = true;
        }
        self.mark_geometry_dirty();
        self.schedule_repaint();
    }

    pub fn unmap(&self) {
        {
            let mut internal = self.v_internal.borrow_mut();
            if !internal.v_mapped {
                return;
            }
            internal.v_mapped = false;
        }
        // what we covered must be repainted by whoever is below
        self.damage_below();
        self.schedule_repaint();
    }

    pub fn is_mapped(&self) -> bool {
        self.v_internal.borrow().v_mapped
    }

    /* ---------------- stacking ---------------- */

    pub fn get_layer(&self) -> Option<Layer> {
        let internal = self.v_internal.borrow();
        internal.v_layer.as_ref().and_then(Layer::from_weak)
    }

    /// Move this view into `layer`, on top of its stack
    pub fn set_layer(&self, layer: &Layer) {
        if let Some(old) = self.get_layer() {
            if old == *layer {
                return;
            }
            old.remove_view(self);
        }

        layer.insert_view(self, None, true);
        self.v_internal.borrow_mut().v_layer = Some(layer.downgrade());
        self.mark_geometry_dirty();
        self.schedule_repaint();
    }

    pub fn stack_top(&self) {
        if let Some(layer) = self.get_layer() {
            layer.insert_view(self, None, true);
            self.mark_geometry_dirty();
            self.schedule_repaint();
        }
    }

    pub fn stack_bottom(&self) {
        if let Some(layer) = self.get_layer() {
            layer.insert_view(self, None, false);
            self.mark_geometry_dirty();
            self.schedule_repaint();
        }
    }

    /// Place directly above `target`, pulling us into its layer
    pub fn stack_above(&self, target: &View) {
        if let Some(layer) = target.get_layer() {
            layer.insert_view(self, Some(target), true);
            self.v_internal.borrow_mut().v_layer = Some(layer.downgrade());
            self.mark_geometry_dirty();
            self.schedule_repaint();
        }
    }

    pub fn stack_below(&self, target: &View) {
        if let Some(layer) = target.get_layer() {
            // directly below == directly above whoever is under it
            let views = layer.views();
            let pos = views.iter().position(|v| v == target);
            match pos {
                Some(0) => layer.insert_view(self, None, false),
                Some(p) => layer.insert_view(self, Some(&views[p - 1]), true),
                None => return,
            }
            self.v_internal.borrow_mut().v_layer = Some(layer.downgrade());
            self.mark_geometry_dirty();
            self.schedule_repaint();
        }
    }

    pub fn get_above(&self) -> Option<View> {
        let layer = self.get_layer()?;
        let views = layer.views();
        let pos = views.iter().position(|v| v == self)?;
        views.get(pos + 1).cloned()
    }

    pub fn get_below(&self) -> Option<View> {
        let layer = self.get_layer()?;
        let views = layer.views();
        let pos = views.iter().position(|v| v == self)?;
        if pos == 0 {
            return None;
        }
        views.get(pos - 1).cloned()
    }

    /* ---------------- derived geometry ---------------- */

    /// Force geometry recomputation for us and every descendant
    pub(crate) fn mark_geometry_dirty(&self) {
        {
            let mut internal = self.v_internal.borrow_mut();
            if internal.v_geometry_dirty {
                return;
            }
            internal.v_geometry_dirty = true;
        }
        for child in self.children().iter() {
            child.mark_geometry_dirty();
        }
    }

    pub(crate) fn is_geometry_dirty(&self) -> bool {
        self.v_internal.borrow().v_geometry_dirty
    }

    /// Recompute global transform, bounding and opaque regions.
    /// Walks root first so a parent is always clean before its
    /// children read it.
    pub(crate) fn update_geometry(&self) {
        let parent = self.get_parent();
        if let Some(p) = parent.as_ref() {
            p.update_geometry();
        }

        if !self.v_internal.borrow().v_geometry_dirty {
            return;
        }

        let (parent_global, parent_bounding) = match parent.as_ref() {
            Some(p) => {
                let pi = p.v_internal.borrow();
                (pi.v_global_transform, Some(pi.v_bounding.clone()))
            }
            None => (Transform::identity(), None),
        };

        let surface_opaque = self.get_surface().map(|s| s.get_opaque_region());

        let mut internal = self.v_internal.borrow_mut();

        let local = Transform::translate(internal.v_x as f32, internal.v_y as f32)
            .multiply(&internal.v_transform);
        let global = parent_global.multiply(&local);
        internal.v_global_transform = global;

        let (w, h) = internal.v_viewport.unwrap_or((internal.v_w, internal.v_h));

        let mut bounding = Region::empty();
        if w > 0 && h > 0 {
            bounding.add(&global.transform_rect_bounds(&Rect::new(0, 0, w, h)));
        }
        if internal.v_clip_to_parent {
            match parent_bounding {
                Some(pb) => bounding.intersect(&pb),
                None => {}
            }
        }
        if let Some(clip) = internal.v_clip_region.as_ref() {
            bounding.intersect(clip);
        }

        // Opacity must never over-promise: only exact integer
        // translations can carry the surface's opaque region to
        // the screen, anything else contributes nothing.
        let mut opaque = Region::empty();
        if internal.v_alpha >= 1.0 && global.is_integer_translate() {
            if let Some(mut sop) = surface_opaque {
                sop.intersect_rect(&Rect::new(0, 0, w, h));
                opaque = global.transform_region(&sop);
                opaque.intersect(&bounding);
            }
        }

        internal.v_bounding = bounding;
        internal.v_opaque = opaque;
        internal.v_geometry_dirty = false;
    }

    pub fn get_bounding_region(&self) -> Region {
        self.v_internal.borrow().v_bounding.clone()
    }

    pub fn get_opaque_region(&self) -> Region {
        self.v_internal.borrow().v_opaque.clone()
    }

    /// Surface committed: track its size unless a viewport
    /// override is in place
    pub(crate) fn handle_surface_commit(&self, w: i32, h: i32) {
        {
            let mut internal = self.v_internal.borrow_mut();
            if internal.v_viewport.is_some() || (internal.v_w == w && internal.v_h == h) {
                return;
            }
            internal.v_w = w;
            internal.v_h = h;
        }
        self.mark_geometry_dirty();
    }

    /* ---------------- plane assignment ---------------- */

    pub(crate) fn plane_entry_ensure(&self, output_id: u32) {
        let mut internal = self.v_internal.borrow_mut();
        let idx = output_id as usize;
        while internal.v_plane_entries.len() <= idx {
            internal.v_plane_entries.push(PlaneEntry::new());
        }
    }

    /// Called by an output backend from assign_planes to place
    /// this view on one of the output's planes.
    pub fn assign_plane(&self, output: &Output, plane: &Plane) -> crate::Result<()> {
        if self.is_destroyed() {
            return Err(SquallError::ViewGone);
        }
        match plane.get_output() {
            Some(o) if o == *output => {}
            Some(_) => {
                // a backend handing us another output's plane is an
                // invariant violation, the view falls back to primary
                log::error!("assign_plane: plane does not belong to output");
                debug_assert!(false);
                return Ok(());
            }
            None => return Err(SquallError::OutputGone),
        }

        self.plane_entry_ensure(output.get_id());
        let mut internal = self.v_internal.borrow_mut();
        internal.v_plane_entries[output.get_id() as usize].pe_pending_plane =
            Some(plane.downgrade());
        Ok(())
    }

    /// Damage every plane we are currently visible on. Used when
    /// the view stops covering what it used to (unmap, destroy).
    pub(crate) fn damage_below(&self) {
        let internal = self.v_internal.borrow();
        for entry in internal.v_plane_entries.iter() {
            if let Some(plane) = entry.pe_plane.as_ref().and_then(Plane::from_weak) {
                plane.add_damage(&entry.pe_visible);
            }
        }
    }

    /* ---------------- lifetime ---------------- */

    pub(crate) fn schedule_repaint(&self) {
        if let Some(comp) = self.compositor() {
            comp.schedule_view_outputs(self);
        }
    }

    pub fn add_destroy_listener(&self, func: impl Fn(&()) + 'static) -> Listener<()> {
        self.v_internal.borrow().v_core.add_destroy_listener(func)
    }

    pub fn user_data(&self) -> std::cell::Ref<crate::object::UserDataMap> {
        std::cell::Ref::map(self.v_internal.borrow(), |i| i.v_core.user_data())
    }

    pub fn is_destroyed(&self) -> bool {
        self.v_internal.borrow().v_core.is_destroyed()
    }

    pub fn destroy(&self) {
        let compositor = self.compositor();

        // everything below us needs repainting once we are gone
        self.damage_below();

        let sig = {
            let mut internal = self.v_internal.borrow_mut();
            let sig = match internal.v_core.begin_fini() {
                Some(s) => s,
                None => return,
            };
            internal.v_plane_entries.clear();
            internal.v_surface_destroy = None;
            sig
        };
        // children observe this and re-parent to None
        sig.emit(&());

        if let Some(parent) = self.get_parent() {
            parent.v_internal.borrow_mut().v_children.retain(|w| {
                View::from_weak(w).map(|v| v != *self).unwrap_or(false)
            });
        }
        {
            let mut internal = self.v_internal.borrow_mut();
            internal.v_parent = None;
            internal.v_parent_destroy = None;
        }

        if let Some(layer) = self.get_layer() {
            layer.remove_view(self);
        }
        if let Some(surf) = self.get_surface() {
            surf.remove_view(self);
        }
        if let Some(comp) = compositor {
            comp.remove_view(self);
            comp.schedule_repaint_all();
        }
    }
}
