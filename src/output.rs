// Outputs and the repaint engine
//
// An output owns its planes and frame state machine, and runs
// the per-refresh pass: flatten the scene, let the backend
// assign views to planes, compute per-plane visible regions and
// damage, hand the result to the backend, and deliver frame
// callbacks when the backend reports the flip.
//
// Austin Shafer - 2024
use crate::buffer::Buffer;
use crate::compositor::{Compositor, WeakCompositor};
use crate::matrix::OutputTransform;
use crate::object::{ObjectCore, ObjectType};
use crate::plane::{Plane, RenderItem};
use crate::signal::Listener;
use crate::surface::Surface;
use crate::view::View;
use crate::SquallError;
use utils::log;
use utils::region::{Rect, Region};

use std::cell::RefCell;
use std::rc::{Rc, Weak};

bitflags! {
    pub struct OutputModeFlags: u32 {
        const CURRENT   = 0x1;
        const PREFERRED = 0x2;
    }
}

/// A (width, height, refresh) tuple the output can adopt.
/// Refresh is in mHz, following the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputMode {
    pub m_flags: OutputModeFlags,
    pub m_w: i32,
    pub m_h: i32,
    pub m_refresh: u32,
}

/// Client-visible hint for glyph rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubpixelOrder {
    Unknown,
    None,
    HorizontalRgb,
    HorizontalBgr,
    VerticalRgb,
    VerticalBgr,
}

#[derive(Debug, Clone)]
pub struct OutputGeometry {
    pub og_x: i32,
    pub og_y: i32,
    pub og_w: i32,
    pub og_h: i32,
    pub og_subpixel: SubpixelOrder,
    pub og_maker: String,
    pub og_model: String,
    pub og_transform: OutputTransform,
}

/// The contract a display backend implements for the core
///
/// Backends wrap mode-setting hardware, a nested compositor
/// window, or nothing at all for tests. The core calls in; the
/// backend answers by calling `Output::finish_frame` (or
/// `Output::start_repaint_loop` when it has no vblank source)
/// and `View::assign_plane`.
pub trait OutputBackend {
    fn destroy(&mut self) {}

    fn get_subpixel_order(&self) -> SubpixelOrder;
    fn get_maker_name(&self) -> String;
    fn get_model_name(&self) -> String;

    fn get_mode_count(&self) -> usize;
    fn get_mode(&self, index: usize) -> Option<OutputMode>;
    fn set_mode(&mut self, mode: &OutputMode) -> bool;

    /// Place views on this output's planes by calling
    /// `view.assign_plane(output, plane)`. Views left unassigned
    /// land on the primary plane.
    fn assign_planes(&mut self, output: &Output, views: &[View]) {
        let _ = (output, views);
    }

    /// Push the per-plane render lists to the hardware/renderer.
    /// The backend must eventually call `output.finish_frame(ts)`.
    fn repaint(&mut self, output: &Output, planes: &[Plane]);

    /// Import the surface's current buffer into the backend's
    /// renderer and report its pixel dimensions.
    fn attach_surface(&mut self, surface: &Surface) -> (i32, i32);

    /// Hand accumulated surface damage to the renderer. Return
    /// true to keep the buffer referenced until the frame
    /// finishes (the renderer samples it in place), false when
    /// the content was copied out.
    fn flush_surface_damage(&mut self, surface: &Surface, damage: &Region) -> bool;
}

struct FrameState {
    f_scheduled: bool,
    f_pending: bool,
    /// one more repaint was requested while pending
    f_render_again: bool,
    /// surfaces whose views were rendered this pass, owed a
    /// frame-done
    f_rendered_surfaces: Vec<Surface>,
    /// buffers the in-flight frame is scanning out of
    f_retained: Vec<Buffer>,
}

pub(crate) struct OutputInternal {
    pub(crate) o_core: ObjectCore,
    o_compositor: WeakCompositor,
    o_id: u32,

    o_backend: Option<Box<dyn OutputBackend>>,

    o_geometry: OutputGeometry,
    o_scale: i32,

    o_modes: Vec<OutputMode>,
    o_current_mode: Option<OutputMode>,

    /// bottom to top; index 0 is the primary plane
    o_planes: Vec<Plane>,
    /// views overlapping this output, back to front, from the
    /// last repaint pass
    o_views: Vec<View>,

    o_frame: FrameState,
    /// a mode change arrived while a frame was pending
    o_mode_change_deferred: bool,
}

#[derive(Clone)]
pub struct Output {
    pub(crate) o_internal: Rc<RefCell<OutputInternal>>,
}

pub(crate) type WeakOutput = Weak<RefCell<OutputInternal>>;

impl PartialEq for Output {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.o_internal, &other.o_internal)
    }
}

impl Output {
    pub(crate) fn new(
        compositor: WeakCompositor,
        id: u32,
        backend: Box<dyn OutputBackend>,
    ) -> Output {
        let geometry = OutputGeometry {
            og_x: 0,
            og_y: 0,
            og_w: 0,
            og_h: 0,
            og_subpixel: backend.get_subpixel_order(),
            og_maker: backend.get_maker_name(),
            og_model: backend.get_model_name(),
            og_transform: OutputTransform::Normal,
        };

        let output = Output {
            o_internal: Rc::new(RefCell::new(OutputInternal {
                o_core: ObjectCore::new(ObjectType::Output),
                o_compositor: compositor,
                o_id: id,
                o_backend: Some(backend),
                o_geometry: geometry,
                o_scale: 1,
                o_modes: Vec::new(),
                o_current_mode: None,
                o_planes: Vec::new(),
                o_views: Vec::new(),
                o_frame: FrameState {
                    f_scheduled: false,
                    f_pending: false,
                    f_render_again: false,
                    f_rendered_surfaces: Vec::new(),
                    f_retained: Vec::new(),
                },
                o_mode_change_deferred: false,
            })),
        };

        output.update_modes();
        {
            let mut internal = output.o_internal.borrow_mut();
            if let Some(mode) = internal.o_current_mode {
                internal.o_geometry.og_w = mode.m_w;
                internal.o_geometry.og_h = mode.m_h;
            }
        }

        output
    }

    pub(crate) fn downgrade(&self) -> WeakOutput {
        Rc::downgrade(&self.o_internal)
    }

    pub(crate) fn from_weak(weak: &WeakOutput) -> Option<Output> {
        weak.upgrade().map(|rc| Output { o_internal: rc })
    }

    fn compositor(&self) -> Option<Compositor> {
        Compositor::from_weak(&self.o_internal.borrow().o_compositor)
    }

    /// Run `func` against the backend without holding our borrow,
    /// so the backend may call back into this output.
    pub(crate) fn with_backend<R>(
        &self,
        func: impl FnOnce(&mut dyn OutputBackend, &Output) -> R,
    ) -> Option<R> {
        let mut backend = self.o_internal.borrow_mut().o_backend.take();
        let ret = backend.as_mut().map(|b| func(b.as_mut(), self));

        let mut internal = self.o_internal.borrow_mut();
        // the slot is only repopulated if nobody tore us down
        // while the backend had control
        if internal.o_backend.is_none() && !internal.o_core.is_destroyed() {
            internal.o_backend = backend;
        }
        ret
    }

    pub fn get_id(&self) -> u32 {
        self.o_internal.borrow().o_id
    }

    pub fn get_geometry(&self) -> OutputGeometry {
        self.o_internal.borrow().o_geometry.clone()
    }

    pub fn get_scale(&self) -> i32 {
        self.o_internal.borrow().o_scale
    }

    pub fn set_scale(&self, scale: i32) {
        {
            let mut internal = self.o_internal.borrow_mut();
            if scale < 1 || internal.o_scale == scale {
                return;
            }
            internal.o_scale = scale;
        }
        self.schedule_repaint();
    }

    fn extent(&self) -> Rect<i32> {
        let internal = self.o_internal.borrow();
        Rect::new(
            internal.o_geometry.og_x,
            internal.o_geometry.og_y,
            internal.o_geometry.og_w,
            internal.o_geometry.og_h,
        )
    }

    pub fn move_to(&self, x: i32, y: i32) {
        {
            let mut internal = self.o_internal.borrow_mut();
            if internal.o_geometry.og_x == x && internal.o_geometry.og_y == y {
                return;
            }
            internal.o_geometry.og_x = x;
            internal.o_geometry.og_y = y;
        }
        self.schedule_repaint();
    }

    /* ---------------- modes ---------------- */

    /// Re-query the backend's mode list. The current mode is the
    /// one flagged CURRENT, falling back to PREFERRED, falling
    /// back to the first.
    fn update_modes(&self) {
        let modes = self
            .with_backend(|b, _| {
                let count = b.get_mode_count();
                let mut modes = Vec::with_capacity(count);
                for i in 0..count {
                    if let Some(m) = b.get_mode(i) {
                        modes.push(m);
                    }
                }
                modes
            })
            .unwrap_or_default();

        let mut internal = self.o_internal.borrow_mut();
        internal.o_current_mode = modes
            .iter()
            .find(|m| m.m_flags.contains(OutputModeFlags::CURRENT))
            .or_else(|| modes.iter().find(|m| m.m_flags.contains(OutputModeFlags::PREFERRED)))
            .or_else(|| modes.first())
            .copied();
        internal.o_modes = modes;

        if internal.o_current_mode.is_none() {
            log::error!("output {} has no modes", internal.o_id);
        }
    }

    pub fn get_mode_count(&self) -> usize {
        self.o_internal.borrow().o_modes.len()
    }

    pub fn get_mode(&self, index: usize) -> Option<OutputMode> {
        self.o_internal.borrow().o_modes.get(index).copied()
    }

    pub fn get_current_mode(&self) -> Option<OutputMode> {
        self.o_internal.borrow().o_current_mode
    }

    /// Ask the backend to adopt `mode`
    ///
    /// A failed mode-set leaves the output untouched and is
    /// reported to the caller, which may disable the output.
    pub fn set_mode(&self, mode: &OutputMode) -> crate::Result<()> {
        if self.is_destroyed() {
            return Err(SquallError::OutputGone);
        }

        if let Some(cur) = self.get_current_mode() {
            if cur.m_w == mode.m_w && cur.m_h == mode.m_h && cur.m_refresh == mode.m_refresh {
                return Ok(());
            }
        }

        let ok = self.with_backend(|b, _| b.set_mode(mode)).unwrap_or(false);
        if !ok {
            return Err(SquallError::BadMode(mode.m_w, mode.m_h));
        }

        self.handle_mode_change();
        Ok(())
    }

    /// The backend reports its mode changed
    ///
    /// If a frame is in flight it completes against the old mode;
    /// the new mode is adopted on finish_frame.
    pub fn handle_mode_change(&self) {
        {
            let mut internal = self.o_internal.borrow_mut();
            if internal.o_frame.f_pending {
                internal.o_mode_change_deferred = true;
                return;
            }
        }
        self.apply_mode_change();
    }

    fn apply_mode_change(&self) {
        self.update_modes();

        let (extent, views) = {
            let mut internal = self.o_internal.borrow_mut();
            if let Some(mode) = internal.o_current_mode {
                internal.o_geometry.og_w = mode.m_w;
                internal.o_geometry.og_h = mode.m_h;
            }
            (
                Rect::new(
                    internal.o_geometry.og_x,
                    internal.o_geometry.og_y,
                    internal.o_geometry.og_w,
                    internal.o_geometry.og_h,
                ),
                internal.o_views.clone(),
            )
        };

        // everything on screen is invalid now
        let full = Region::from_rect(extent);
        for plane in self.planes().iter() {
            plane.clear_damage();
            plane.add_damage(&full);
        }

        // forget what views used to cover so the next pass damages
        // from scratch
        let oid = self.get_id() as usize;
        for view in views.iter() {
            let mut vi = view.v_internal.borrow_mut();
            if let Some(entry) = vi.v_plane_entries.get_mut(oid) {
                entry.pe_visible.clear();
            }
        }

        self.schedule_repaint();
    }

    /* ---------------- planes ---------------- */

    /// Create a plane on this output, below `above` or topmost
    /// when None. The first plane created is the primary plane.
    pub fn add_plane(&self, above: Option<&Plane>) -> Plane {
        let plane = Plane::new(self.downgrade());

        let mut internal = self.o_internal.borrow_mut();
        match above {
            Some(a) => {
                let pos = internal.o_planes.iter().position(|p| p == a);
                match pos {
                    Some(p) => internal.o_planes.insert(p, plane.clone()),
                    None => {
                        log::error!("add_plane: above plane not on this output");
                        internal.o_planes.push(plane.clone());
                    }
                }
            }
            None => internal.o_planes.push(plane.clone()),
        }

        plane
    }

    pub(crate) fn remove_plane(&self, plane: &Plane) {
        self.o_internal.borrow_mut().o_planes.retain(|p| p != plane);
    }

    pub fn planes(&self) -> Vec<Plane> {
        self.o_internal.borrow().o_planes.clone()
    }

    pub fn views(&self) -> Vec<View> {
        self.o_internal.borrow().o_views.clone()
    }

    /* ---------------- frame scheduling ---------------- */

    pub fn is_pending(&self) -> bool {
        self.o_internal.borrow().o_frame.f_pending
    }

    pub fn is_scheduled(&self) -> bool {
        self.o_internal.borrow().o_frame.f_scheduled
    }

    /// Ask for a repaint on the next idle
    ///
    /// While a frame is pending this only flags that one more
    /// repaint must run when the frame finishes.
    pub fn schedule_repaint(&self) {
        let comp = match self.compositor() {
            Some(c) => c,
            None => return,
        };

        {
            let mut internal = self.o_internal.borrow_mut();
            if internal.o_core.is_destroyed() {
                return;
            }
            if internal.o_frame.f_pending {
                internal.o_frame.f_render_again = true;
                return;
            }
            if internal.o_frame.f_scheduled {
                return;
            }
            internal.o_frame.f_scheduled = true;
        }

        // repaint on the next idle so commits coalesce
        let weak = self.downgrade();
        comp.add_idle_task(move || {
            if let Some(output) = Output::from_weak(&weak) {
                output.idle_repaint();
            }
        });
    }

    fn idle_repaint(&self) {
        {
            let mut internal = self.o_internal.borrow_mut();
            if internal.o_core.is_destroyed() {
                return;
            }
            internal.o_frame.f_scheduled = false;
            if internal.o_frame.f_pending {
                // lost the race with another repaint source, run
                // again when it finishes
                internal.o_frame.f_render_again = true;
                return;
            }
        }
        self.repaint();
    }

    /* ---------------- the repaint pass ---------------- */

    /// One full assignment/damage pass followed by the backend
    /// hand-off. See the per-step comments; this is the engine
    /// the rest of the crate feeds.
    pub(crate) fn repaint(&self) {
        let comp = match self.compositor() {
            Some(c) => c,
            None => return,
        };

        let oid = self.get_id();
        let extent = self.extent();
        let overlap_bit: u32 = if oid < 32 { 1 << oid } else { 0 };

        // 1. flatten the scene back-to-front and keep the views
        // that can put pixels on this output. A view that was
        // geometry-dirty gets its full footprint damaged below.
        let mut out_views = Vec::new();
        let mut dirty_views = Vec::new();
        for view in comp.flat_view_list().iter() {
            let was_dirty = view.is_geometry_dirty();
            view.update_geometry();

            let mut vi = view.v_internal.borrow_mut();
            let renderable = vi.v_mapped
                && vi.v_visibility
                && vi.v_surface.is_some()
                && vi.v_bounding.intersects_rect(&extent);

            if renderable {
                vi.v_output_overlap |= overlap_bit;
            } else {
                vi.v_output_overlap &= !overlap_bit;
            }
            drop(vi);

            if renderable {
                view.plane_entry_ensure(oid);
                view.v_internal.borrow_mut().v_plane_entries[oid as usize].pe_pending_plane = None;
                out_views.push(view.clone());
                dirty_views.push(was_dirty);
            }
        }

        // 2. the backend sorts views onto its planes; whatever it
        // declines lands on the primary plane
        self.with_backend(|b, out| b.assign_planes(out, &out_views));

        let planes = self.planes();
        let primary = match planes.first() {
            Some(p) => p.clone(),
            None => {
                log::error!("output {} repainting with no planes", oid);
                return;
            }
        };

        // resolve assignments, damaging the old plane when a view
        // moved somewhere else
        struct Assignment {
            a_view: View,
            a_plane: Plane,
            /// joined this plane on this pass
            a_moved: bool,
            /// geometry changed, the whole footprint repaints
            a_dirty: bool,
        }
        let mut assignments: Vec<Assignment> = Vec::with_capacity(out_views.len());
        for (i, view) in out_views.iter().enumerate() {
            let mut vi = view.v_internal.borrow_mut();
            let entry = &mut vi.v_plane_entries[oid as usize];

            let new_plane = entry
                .pe_pending_plane
                .take()
                .and_then(|w| Plane::from_weak(&w))
                .unwrap_or_else(|| primary.clone());

            let old_plane = entry.pe_plane.as_ref().and_then(Plane::from_weak);
            let moved = match old_plane.as_ref() {
                Some(old) => *old != new_plane,
                None => true,
            };
            if moved {
                if let Some(old) = old_plane {
                    // view left this plane, what it covered there
                    // must be repainted
                    old.add_damage(&entry.pe_visible);
                    entry.pe_visible.clear();
                }
            }
            entry.pe_plane = Some(new_plane.downgrade());
            drop(vi);

            assignments.push(Assignment {
                a_view: view.clone(),
                a_plane: new_plane,
                a_moved: moved,
                a_dirty: dirty_views[i],
            });
        }

        // views rendered last pass that vanished from this one
        // leave their footprint as damage
        let prev_views = {
            let internal = self.o_internal.borrow();
            internal.o_views.clone()
        };
        for view in prev_views.iter() {
            if out_views.contains(view) || view.is_destroyed() {
                continue;
            }
            let mut vi = view.v_internal.borrow_mut();
            if let Some(entry) = vi.v_plane_entries.get_mut(oid as usize) {
                if let Some(plane) = entry.pe_plane.as_ref().and_then(Plane::from_weak) {
                    plane.add_damage(&entry.pe_visible);
                }
                entry.pe_plane = None;
                entry.pe_visible.clear();
            }
        }

        // 3.-5. per-plane visibility, damage and clip, walking
        // planes top-down so occlusion flows downward
        let mut clip_above = Region::empty();
        for plane in planes.iter().rev() {
            let mut plane_opaque = Region::empty();
            let mut damage = Region::empty();
            let mut items_rev: Vec<RenderItem> = Vec::new();

            for a in assignments.iter().rev() {
                if a.a_plane != *plane {
                    continue;
                }
                let view = &a.a_view;

                let mut vi = view.v_internal.borrow_mut();

                // visible = bounding minus everything in front
                let mut visible = vi.v_bounding.clone();
                let mut occlusion = clip_above.clone();
                occlusion.union(&plane_opaque);
                visible.subtract(&occlusion);
                visible.intersect_rect(&extent);

                let entry = &mut vi.v_plane_entries[oid as usize];
                if a.a_moved {
                    // a fresh assignment paints everything visible;
                    // the old footprint was damaged above
                    damage.union(&visible);
                } else if a.a_dirty {
                    // geometry changed: old and new footprints both
                    // repaint
                    damage.union(&visible);
                    damage.union(&entry.pe_visible);
                } else {
                    // occlusion shifted around a stationary view
                    damage.union(&visible.xor(&entry.pe_visible));
                }
                entry.pe_visible = visible.clone();

                let global = vi.v_global_transform;
                let mut vis_opaque = vi.v_opaque.clone();
                vis_opaque.intersect(&visible);
                plane_opaque.union(&vis_opaque);

                items_rev.push(RenderItem {
                    ri_view: view.clone(),
                    ri_transform: global,
                    ri_visible: visible,
                });
                drop(vi);

                if !a.a_moved {
                    // content damage carried into output space
                    if let Some(surf) = view.get_surface() {
                        if surf.has_damage() {
                            let global = view.get_global_transform();
                            let mut d = global.transform_region(&surf.get_damage_region());
                            d.intersect_rect(&extent);
                            damage.union(&d);
                        }
                    }
                }
            }

            // planes above already present these pixels
            damage.subtract(&clip_above);
            plane.add_damage(&damage);

            items_rev.reverse();
            plane.set_render_state(items_rev, plane_opaque.clone());

            clip_above.union(&plane_opaque);
        }

        // flush surface damage into the backend's renderer and
        // take render references on the buffers it keeps sampling
        let mut rendered: Vec<Surface> = Vec::new();
        for view in out_views.iter() {
            if let Some(surf) = view.get_surface() {
                if !rendered.contains(&surf) {
                    rendered.push(surf);
                }
            }
        }

        let mut retained: Vec<Buffer> = Vec::new();
        for surf in rendered.iter() {
            if !surf.has_damage() {
                continue;
            }
            let damage = surf.take_damage();
            let keep = self
                .with_backend(|b, _| b.flush_surface_damage(surf, &damage))
                .unwrap_or(false);
            if keep {
                if let Some(buf) = surf.get_buffer() {
                    buf.reference();
                    retained.push(buf);
                }
            }
        }

        {
            let mut internal = self.o_internal.borrow_mut();
            internal.o_frame.f_pending = true;
            internal.o_frame.f_rendered_surfaces = rendered;
            internal.o_frame.f_retained = retained;
            internal.o_views = out_views;
        }

        let handed: Vec<Region> = planes.iter().map(|p| p.get_damage_region()).collect();
        self.with_backend(|b, out| b.repaint(out, &planes));

        // the backend consumed exactly what we handed it; damage
        // added during the hand-off (a synchronous finish plus
        // mode change) survives for the next pass
        for (plane, consumed) in planes.iter().zip(handed.iter()) {
            plane.subtract_damage(consumed);
        }
    }

    /* ---------------- frame completion ---------------- */

    /// The backend reports the frame hit glass at `time_ms`
    ///
    /// Exactly one finish is expected per pending episode.
    pub fn finish_frame(&self, time_ms: u32) {
        let (surfaces, retained, render_again, deferred_mode) = {
            let mut internal = self.o_internal.borrow_mut();
            if !internal.o_frame.f_pending {
                log::error!("finish_frame on output {} with no frame pending", internal.o_id);
                return;
            }
            internal.o_frame.f_pending = false;
            (
                std::mem::replace(&mut internal.o_frame.f_rendered_surfaces, Vec::new()),
                std::mem::replace(&mut internal.o_frame.f_retained, Vec::new()),
                std::mem::replace(&mut internal.o_frame.f_render_again, false),
                std::mem::replace(&mut internal.o_mode_change_deferred, false),
            )
        };

        // frame-done on every surface we presented
        for surf in surfaces.iter() {
            for cb in surf.take_frame_callbacks().iter() {
                cb.done(time_ms);
            }
        }

        // the flip retired the previous scanout, clients may reuse
        for buf in retained.iter() {
            buf.unreference();
        }

        if deferred_mode {
            self.apply_mode_change();
        }
        if render_again {
            self.schedule_repaint();
        }
    }

    /// For backends with no vblank source: fabricate a finish on
    /// the next main loop iteration using the compositor's clock.
    pub fn start_repaint_loop(&self) {
        let comp = match self.compositor() {
            Some(c) => c,
            None => return,
        };

        let weak = self.downgrade();
        let clock = comp.clone();
        comp.add_idle_task(move || {
            if let Some(output) = Output::from_weak(&weak) {
                output.finish_frame(clock.get_time_ms());
            }
        });
    }

    /* ---------------- lifetime ---------------- */

    pub fn add_destroy_listener(&self, func: impl Fn(&()) + 'static) -> Listener<()> {
        self.o_internal.borrow().o_core.add_destroy_listener(func)
    }

    pub fn is_destroyed(&self) -> bool {
        self.o_internal.borrow().o_core.is_destroyed()
    }

    pub fn destroy(&self) {
        let comp = self.compositor();

        let (sig, backend, planes) = {
            let mut internal = self.o_internal.borrow_mut();
            let sig = match internal.o_core.begin_fini() {
                Some(s) => s,
                None => return,
            };
            (
                sig,
                internal.o_backend.take(),
                std::mem::replace(&mut internal.o_planes, Vec::new()),
            )
        };

        sig.emit(&());

        for plane in planes.iter() {
            plane.destroy();
        }
        if let Some(mut backend) = backend {
            backend.destroy();
        }
        if let Some(comp) = comp {
            comp.remove_output(self);
        }
    }
}
