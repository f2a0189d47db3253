// Layer stacking
//
// Layers give the shell coarse z-ordering: the compositor keeps
// an ordered layer list, each layer keeps an ordered view list,
// and the global back-to-front order is the concatenation.
//
// Austin Shafer - 2024
use crate::compositor::{Compositor, WeakCompositor};
use crate::object::{ObjectCore, ObjectType};
use crate::signal::Listener;
use crate::view::{View, WeakView};

use std::cell::RefCell;
use std::rc::{Rc, Weak};

pub(crate) struct LayerInternal {
    pub(crate) l_core: ObjectCore,
    l_compositor: WeakCompositor,
    /// back to front: index 0 is the bottom view
    pub(crate) l_views: Vec<WeakView>,
}

#[derive(Clone)]
pub struct Layer {
    pub(crate) l_internal: Rc<RefCell<LayerInternal>>,
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("ptr", &Rc::as_ptr(&self.l_internal))
            .finish()
    }
}

pub(crate) type WeakLayer = Weak<RefCell<LayerInternal>>;

impl PartialEq for Layer {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.l_internal, &other.l_internal)
    }
}

impl Layer {
    pub(crate) fn new(compositor: WeakCompositor) -> Layer {
        Layer {
            l_internal: Rc::new(RefCell::new(LayerInternal {
                l_core: ObjectCore::new(ObjectType::Layer),
                l_compositor: compositor,
                l_views: Vec::new(),
            })),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakLayer {
        Rc::downgrade(&self.l_internal)
    }

    pub(crate) fn from_weak(weak: &WeakLayer) -> Option<Layer> {
        weak.upgrade().map(|rc| Layer { l_internal: rc })
    }

    /// The live views of this layer, bottom first
    pub fn views(&self) -> Vec<View> {
        self.l_internal
            .borrow()
            .l_views
            .iter()
            .filter_map(View::from_weak)
            .collect()
    }

    pub fn get_top_view(&self) -> Option<View> {
        self.views().pop()
    }

    pub fn get_bottom_view(&self) -> Option<View> {
        self.views().into_iter().next()
    }

    /// The layer directly above this one in the compositor stack
    pub fn get_above(&self) -> Option<Layer> {
        let comp = Compositor::from_weak(&self.l_internal.borrow().l_compositor)?;
        let layers = comp.layers();
        let pos = layers.iter().position(|l| l == self)?;
        layers.get(pos + 1).cloned()
    }

    pub fn get_below(&self) -> Option<Layer> {
        let comp = Compositor::from_weak(&self.l_internal.borrow().l_compositor)?;
        let layers = comp.layers();
        let pos = layers.iter().position(|l| l == self)?;
        if pos == 0 {
            return None;
        }
        layers.get(pos - 1).cloned()
    }

    pub(crate) fn remove_view(&self, view: &View) {
        self.l_internal.borrow_mut().l_views.retain(|w| {
            match View::from_weak(w) {
                Some(v) => v != *view,
                // drop dead entries while we are here
                None => false,
            }
        });
    }

    /// Insert `view` directly above `below`, or at the stack
    /// position given by `top` when `below` is None.
    pub(crate) fn insert_view(&self, view: &View, below: Option<&View>, top: bool) {
        self.remove_view(view);

        let mut internal = self.l_internal.borrow_mut();
        match below {
            Some(target) => {
                let pos = internal.l_views.iter().position(|w| {
                    View::from_weak(w).map(|v| v == *target).unwrap_or(false)
                });
                match pos {
                    Some(p) => internal.l_views.insert(p + 1, view.downgrade()),
                    // a dead target stacks on top
                    None => internal.l_views.push(view.downgrade()),
                }
            }
            None if top => internal.l_views.push(view.downgrade()),
            None => internal.l_views.insert(0, view.downgrade()),
        }
    }

    pub fn add_destroy_listener(&self, func: impl Fn(&()) + 'static) -> Listener<()> {
        self.l_internal.borrow().l_core.add_destroy_listener(func)
    }

    /// Remove this layer from the compositor stack
    ///
    /// Views keep their weak layer handle and simply observe it as
    /// gone, they are not destroyed with the layer.
    pub fn destroy(&self) {
        let compositor = Compositor::from_weak(&self.l_internal.borrow().l_compositor);

        let sig = {
            let mut internal = self.l_internal.borrow_mut();
            let sig = match internal.l_core.begin_fini() {
                Some(s) => s,
                None => return,
            };
            internal.l_views.clear();
            sig
        };
        sig.emit(&());

        if let Some(comp) = compositor {
            comp.remove_layer(self);
            comp.schedule_repaint_all();
        }
    }
}
