// The compositor: top level owner of everything
//
// Owns the surface/layer/seat/output/view lists, the idle task
// queue the frame scheduler rides on, and the input event hook
// chain. All of it is single-threaded: embedders drive the
// display and backend fds from their own poll loop and call
// dispatch_idle between batches.
//
// Austin Shafer - 2024
use crate::input::{InputEvent, Seat};
use crate::layer::Layer;
use crate::object::{ObjectCore, ObjectType};
use crate::output::{Output, OutputBackend};
use crate::signal::Listener;
use crate::surface::Surface;
use crate::view::View;
use crate::SquallError;
use utils::log;
use utils::timing;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

struct EventHook {
    eh_id: u32,
    eh_func: Rc<dyn Fn(&Seat, &InputEvent) -> bool>,
}

/// Returned from add_event_hook for later removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHookId(u32);

pub(crate) struct CompositorInternal {
    pub(crate) c_core: ObjectCore,
    c_socket_name: String,

    c_surfaces: Vec<Surface>,
    /// bottom to top
    c_layers: Vec<Layer>,
    c_seats: Vec<Seat>,
    c_outputs: Vec<Output>,
    /// every live view, in creation order; z-order comes from
    /// the layer stack
    c_views: Vec<View>,

    c_idle_queue: VecDeque<Box<dyn FnOnce()>>,

    /// newest hooks run first, the default hook is the oldest
    c_event_hooks: Vec<EventHook>,

    c_output_id_next: u32,
    c_view_id_next: u64,
    c_hook_id_next: u32,
}

#[derive(Clone)]
pub struct Compositor {
    pub(crate) c_internal: Rc<RefCell<CompositorInternal>>,
}

pub(crate) type WeakCompositor = Weak<RefCell<CompositorInternal>>;

impl PartialEq for Compositor {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.c_internal, &other.c_internal)
    }
}

impl Compositor {
    /// Stand up a compositor advertising `socket_name`
    ///
    /// The default input hook is installed here, so a compositor
    /// with no custom hooks still delivers events to clients.
    pub fn new(socket_name: &str) -> Compositor {
        let comp = Compositor {
            c_internal: Rc::new(RefCell::new(CompositorInternal {
                c_core: ObjectCore::new(ObjectType::Compositor),
                c_socket_name: socket_name.to_owned(),
                c_surfaces: Vec::new(),
                c_layers: Vec::new(),
                c_seats: Vec::new(),
                c_outputs: Vec::new(),
                c_views: Vec::new(),
                c_idle_queue: VecDeque::new(),
                c_event_hooks: Vec::new(),
                c_output_id_next: 0,
                c_view_id_next: 0,
                c_hook_id_next: 0,
            })),
        };

        comp.add_event_hook(|seat, event| seat.dispatch_default(event));

        comp
    }

    pub(crate) fn downgrade(&self) -> WeakCompositor {
        Rc::downgrade(&self.c_internal)
    }

    pub(crate) fn from_weak(weak: &WeakCompositor) -> Option<Compositor> {
        weak.upgrade().map(|rc| Compositor { c_internal: rc })
    }

    pub fn get_socket_name(&self) -> String {
        self.c_internal.borrow().c_socket_name.clone()
    }

    /// The compositor's monotonic clock, in protocol milliseconds
    pub fn get_time_ms(&self) -> u32 {
        timing::get_current_millis32()
    }

    /* ---------------- surfaces ---------------- */

    pub fn create_surface(&self) -> Surface {
        let surf = Surface::new(self.downgrade());
        self.c_internal.borrow_mut().c_surfaces.push(surf.clone());
        surf
    }

    pub(crate) fn remove_surface(&self, surface: &Surface) {
        self.c_internal
            .borrow_mut()
            .c_surfaces
            .retain(|s| s != surface);
    }

    pub fn surfaces(&self) -> Vec<Surface> {
        self.c_internal.borrow().c_surfaces.clone()
    }

    /* ---------------- views ---------------- */

    /// Make a new view presenting `surface`, or a content-less
    /// grouping node. A handle to an already-destroyed surface is
    /// refused.
    pub fn create_view(&self, surface: Option<&Surface>) -> crate::Result<View> {
        if let Some(surf) = surface {
            if surf.is_destroyed() {
                return Err(SquallError::SurfaceGone);
            }
        }

        let id = {
            let mut internal = self.c_internal.borrow_mut();
            let id = internal.c_view_id_next;
            internal.c_view_id_next += 1;
            id
        };

        let view = View::new(self.downgrade(), id, surface);
        self.c_internal.borrow_mut().c_views.push(view.clone());
        Ok(view)
    }

    pub(crate) fn remove_view(&self, view: &View) {
        self.c_internal.borrow_mut().c_views.retain(|v| v != view);
    }

    /// Global back-to-front order: layers bottom to top, each
    /// layer's views bottom to top, children stacked above their
    /// parent.
    pub fn flat_view_list(&self) -> Vec<View> {
        fn push_tree(list: &mut Vec<View>, view: &View) {
            list.push(view.clone());
            // children are stored front-to-back
            for child in view.children().iter().rev() {
                push_tree(list, child);
            }
        }

        let layers = self.layers();
        let mut list = Vec::new();
        for layer in layers.iter() {
            for view in layer.views().iter() {
                // child views ride with their parent
                if view.get_parent().is_none() {
                    push_tree(&mut list, view);
                }
            }
        }
        list
    }

    /* ---------------- layers ---------------- */

    pub fn create_layer(&self) -> Layer {
        Layer::new(self.downgrade())
    }

    /// Put `layer` into the stack directly above `below`, or at
    /// the bottom when None.
    pub fn stack_layer(&self, layer: &Layer, below: Option<&Layer>) {
        let mut internal = self.c_internal.borrow_mut();
        internal.c_layers.retain(|l| l != layer);

        match below {
            Some(target) => {
                match internal.c_layers.iter().position(|l| l == target) {
                    Some(pos) => internal.c_layers.insert(pos + 1, layer.clone()),
                    None => {
                        log::error!("stack_layer: target layer is not stacked");
                        internal.c_layers.push(layer.clone());
                    }
                }
            }
            None => internal.c_layers.insert(0, layer.clone()),
        }
    }

    pub(crate) fn remove_layer(&self, layer: &Layer) {
        self.c_internal.borrow_mut().c_layers.retain(|l| l != layer);
    }

    /// Bottom to top
    pub fn layers(&self) -> Vec<Layer> {
        self.c_internal.borrow().c_layers.clone()
    }

    pub fn get_top_layer(&self) -> Option<Layer> {
        self.layers().pop()
    }

    pub fn get_bottom_layer(&self) -> Option<Layer> {
        self.layers().into_iter().next()
    }

    /* ---------------- seats ---------------- */

    pub fn create_seat(&self, name: &str) -> Seat {
        let seat = Seat::new(self.downgrade(), name);
        self.c_internal.borrow_mut().c_seats.push(seat.clone());
        seat
    }

    pub(crate) fn remove_seat(&self, seat: &Seat) {
        self.c_internal.borrow_mut().c_seats.retain(|s| s != seat);
    }

    pub fn seats(&self) -> Vec<Seat> {
        self.c_internal.borrow().c_seats.clone()
    }

    /* ---------------- outputs ---------------- */

    pub fn add_output(&self, backend: Box<dyn OutputBackend>) -> Output {
        let id = {
            let mut internal = self.c_internal.borrow_mut();
            let id = internal.c_output_id_next;
            internal.c_output_id_next += 1;
            id
        };
        if id >= 32 {
            log::critical!("more than 32 outputs, overlap tracking will degrade");
        }

        let output = Output::new(self.downgrade(), id, backend);
        self.c_internal.borrow_mut().c_outputs.push(output.clone());

        output.schedule_repaint();
        output
    }

    pub(crate) fn remove_output(&self, output: &Output) {
        self.c_internal
            .borrow_mut()
            .c_outputs
            .retain(|o| o != output);
    }

    pub fn outputs(&self) -> Vec<Output> {
        self.c_internal.borrow().c_outputs.clone()
    }

    pub fn schedule_repaint_all(&self) {
        for output in self.outputs().iter() {
            output.schedule_repaint();
        }
    }

    /// Repaint the outputs a view can appear on. A geometry-dirty
    /// view schedules everywhere since its new footprint is not
    /// known yet.
    pub(crate) fn schedule_view_outputs(&self, view: &View) {
        let (dirty, mask) = {
            let vi = view.v_internal.borrow();
            (vi.v_geometry_dirty, vi.v_output_overlap)
        };

        for output in self.outputs().iter() {
            let bit: u32 = if output.get_id() < 32 {
                1 << output.get_id()
            } else {
                0
            };
            if dirty || bit == 0 || (mask & bit) != 0 {
                output.schedule_repaint();
            }
        }
    }

    /// Repaint the outputs any view of this surface overlaps
    pub(crate) fn schedule_surface_outputs(&self, surface: &Surface) {
        let mut dirty = false;
        let mut mask = 0;
        for view in surface.views().iter() {
            let vi = view.v_internal.borrow();
            dirty |= vi.v_geometry_dirty;
            mask |= vi.v_output_overlap;
        }

        for output in self.outputs().iter() {
            let bit: u32 = if output.get_id() < 32 {
                1 << output.get_id()
            } else {
                0
            };
            if dirty || bit == 0 || (mask & bit) != 0 {
                output.schedule_repaint();
            }
        }
    }

    /// A newly committed buffer is shown to every backend renderer
    /// so its dimensions become known.
    pub(crate) fn attach_surface_to_outputs(&self, surface: &Surface) {
        let buffer = match surface.get_buffer() {
            Some(b) => b,
            None => return,
        };

        for output in self.outputs().iter() {
            if let Some((w, h)) = output.with_backend(|b, _| b.attach_surface(surface)) {
                buffer.set_size(w, h);
            }
        }
    }

    /* ---------------- idle tasks ---------------- */

    /// Queue work to run after the current event batch drains
    pub fn add_idle_task(&self, func: impl FnOnce() + 'static) {
        self.c_internal
            .borrow_mut()
            .c_idle_queue
            .push_back(Box::new(func));
    }

    /// Drain the idle queue. Called by the embedder between event
    /// batches; tasks may enqueue further tasks, which also run.
    /// Returns the number of tasks executed.
    pub fn dispatch_idle(&self) -> usize {
        let mut count = 0;
        loop {
            let task = self.c_internal.borrow_mut().c_idle_queue.pop_front();
            match task {
                Some(t) => {
                    t();
                    count += 1;
                }
                None => return count,
            }
        }
    }

    pub fn has_idle_tasks(&self) -> bool {
        !self.c_internal.borrow().c_idle_queue.is_empty()
    }

    /* ---------------- event hooks ---------------- */

    /// Hooks run newest-first; the first to return true consumes
    /// the event. The default client-forwarding hook is installed
    /// at creation and therefore runs last.
    pub fn add_event_hook(
        &self,
        func: impl Fn(&Seat, &InputEvent) -> bool + 'static,
    ) -> EventHookId {
        let mut internal = self.c_internal.borrow_mut();
        let id = internal.c_hook_id_next;
        internal.c_hook_id_next += 1;

        internal.c_event_hooks.push(EventHook {
            eh_id: id,
            eh_func: Rc::new(func),
        });
        EventHookId(id)
    }

    pub fn remove_event_hook(&self, id: EventHookId) {
        self.c_internal
            .borrow_mut()
            .c_event_hooks
            .retain(|h| h.eh_id != id.0);
    }

    pub(crate) fn dispatch_event(&self, seat: &Seat, event: &InputEvent) {
        let hooks: Vec<Rc<dyn Fn(&Seat, &InputEvent) -> bool>> = self
            .c_internal
            .borrow()
            .c_event_hooks
            .iter()
            .rev()
            .map(|h| h.eh_func.clone())
            .collect();

        for hook in hooks.iter() {
            if hook(seat, event) {
                return;
            }
        }
    }

    /* ---------------- lifetime ---------------- */

    pub fn add_destroy_listener(&self, func: impl Fn(&()) + 'static) -> Listener<()> {
        self.c_internal.borrow().c_core.add_destroy_listener(func)
    }

    /// Orderly teardown: outputs first (their destroy signals let
    /// embedders restore consoles), then scene state.
    pub fn destroy(&self) {
        let sig = {
            let mut internal = self.c_internal.borrow_mut();
            match internal.c_core.begin_fini() {
                Some(s) => s,
                None => return,
            }
        };

        for output in self.outputs().iter() {
            output.destroy();
        }
        let views: Vec<View> = self.c_internal.borrow().c_views.clone();
        for view in views.iter() {
            view.destroy();
        }
        for surf in self.surfaces().iter() {
            surf.destroy();
        }
        for seat in self.seats().iter() {
            seat.destroy();
        }

        {
            let mut internal = self.c_internal.borrow_mut();
            internal.c_layers.clear();
            internal.c_idle_queue.clear();
            internal.c_event_hooks.clear();
        }

        sig.emit(&());
    }
}
