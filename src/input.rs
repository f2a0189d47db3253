// Seats and input dispatch
//
// Input backends deliver already-normalized events to a seat.
// Events run down the compositor's hook chain; the default hook
// forwards them to the client resources of the focused surface
// with a per-seat serial.
//
// Austin Shafer - 2024
use crate::compositor::{Compositor, WeakCompositor};
use crate::object::{ObjectCore, ObjectType};
use crate::signal::{Listener, Signal};

use std::cell::RefCell;
use std::rc::Rc;

bitflags! {
    pub struct SeatCapabilities: u32 {
        const POINTER  = 0x1;
        const KEYBOARD = 0x2;
        const TOUCH    = 0x4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEventKind {
    PointerMotion,
    PointerButton,
    PointerAxis,
    KeyboardKey,
    TouchDown,
    TouchUp,
    TouchMotion,
    TouchFrame,
}

/// A normalized input event from a backend
#[derive(Debug, Clone, Copy)]
pub struct InputEvent {
    pub ev_kind: InputEventKind,
    pub ev_time: u32,
    /// touch point id, axis id, or zero
    pub ev_index: u32,
    /// button/key state: 0 released, 1 pressed; or the raw code
    /// meaning depends on the kind
    pub ev_state: u32,
    /// axis value
    pub ev_value: f64,
    pub ev_x: f64,
    pub ev_y: f64,
}

pub mod keycodes {
    //! The evdev modifier keycodes the seat tracks itself
    pub const KEY_LEFTCTRL: u32 = 29;
    pub const KEY_LEFTSHIFT: u32 = 42;
    pub const KEY_RIGHTSHIFT: u32 = 54;
    pub const KEY_LEFTALT: u32 = 56;
    pub const KEY_RIGHTCTRL: u32 = 97;
    pub const KEY_RIGHTALT: u32 = 100;
}

bitflags! {
    pub struct Modifiers: u32 {
        const SHIFT = 0x1;
        const CTRL  = 0x2;
        const ALT   = 0x4;
    }
}

/* Client-side halves of the input devices, implemented by the
 * wire layer. The core only pushes events out through these. */

pub trait PointerResource {
    fn motion(&self, time: u32, x: f64, y: f64);
    fn button(&self, serial: u32, time: u32, button: u32, state: u32);
    fn axis(&self, time: u32, axis: u32, value: f64);
}

pub trait KeyboardResource {
    fn key(&self, serial: u32, time: u32, key: u32, state: u32);
}

pub trait TouchResource {
    fn down(&self, serial: u32, time: u32, id: u32, x: f64, y: f64);
    fn up(&self, serial: u32, time: u32, id: u32);
    fn motion(&self, time: u32, id: u32, x: f64, y: f64);
    fn frame(&self);
}

#[allow(dead_code)]
pub(crate) struct PointerInternal {
    pub(crate) pt_core: ObjectCore,
    pt_resources: Vec<Rc<dyn PointerResource>>,
    pt_x: f64,
    pt_y: f64,
}

#[derive(Clone)]
pub struct Pointer {
    pt_internal: Rc<RefCell<PointerInternal>>,
}

impl Pointer {
    fn new() -> Self {
        Self {
            pt_internal: Rc::new(RefCell::new(PointerInternal {
                pt_core: ObjectCore::new(ObjectType::Pointer),
                pt_resources: Vec::new(),
                pt_x: 0.0,
                pt_y: 0.0,
            })),
        }
    }

    pub fn add_resource(&self, res: Rc<dyn PointerResource>) {
        self.pt_internal.borrow_mut().pt_resources.push(res);
    }

    pub fn get_position(&self) -> (f64, f64) {
        let internal = self.pt_internal.borrow();
        (internal.pt_x, internal.pt_y)
    }

    fn resources(&self) -> Vec<Rc<dyn PointerResource>> {
        self.pt_internal.borrow().pt_resources.clone()
    }

    fn set_position(&self, x: f64, y: f64) {
        let mut internal = self.pt_internal.borrow_mut();
        internal.pt_x = x;
        internal.pt_y = y;
    }
}

#[allow(dead_code)]
pub(crate) struct KeyboardInternal {
    pub(crate) kb_core: ObjectCore,
    kb_resources: Vec<Rc<dyn KeyboardResource>>,
}

#[derive(Clone)]
pub struct Keyboard {
    kb_internal: Rc<RefCell<KeyboardInternal>>,
}

impl Keyboard {
    fn new() -> Self {
        Self {
            kb_internal: Rc::new(RefCell::new(KeyboardInternal {
                kb_core: ObjectCore::new(ObjectType::Keyboard),
                kb_resources: Vec::new(),
            })),
        }
    }

    pub fn add_resource(&self, res: Rc<dyn KeyboardResource>) {
        self.kb_internal.borrow_mut().kb_resources.push(res);
    }

    fn resources(&self) -> Vec<Rc<dyn KeyboardResource>> {
        self.kb_internal.borrow().kb_resources.clone()
    }
}

#[allow(dead_code)]
pub(crate) struct TouchInternal {
    pub(crate) tc_core: ObjectCore,
    tc_resources: Vec<Rc<dyn TouchResource>>,
}

#[derive(Clone)]
pub struct Touch {
    tc_internal: Rc<RefCell<TouchInternal>>,
}

impl Touch {
    fn new() -> Self {
        Self {
            tc_internal: Rc::new(RefCell::new(TouchInternal {
                tc_core: ObjectCore::new(ObjectType::Touch),
                tc_resources: Vec::new(),
            })),
        }
    }

    pub fn add_resource(&self, res: Rc<dyn TouchResource>) {
        self.tc_internal.borrow_mut().tc_resources.push(res);
    }

    fn resources(&self) -> Vec<Rc<dyn TouchResource>> {
        self.tc_internal.borrow().tc_resources.clone()
    }
}

pub(crate) struct SeatInternal {
    pub(crate) se_core: ObjectCore,
    se_compositor: WeakCompositor,
    se_name: String,
    se_caps: SeatCapabilities,
    se_modifiers: Modifiers,

    se_pointer: Option<Pointer>,
    se_keyboard: Option<Keyboard>,
    se_touch: Option<Touch>,

    se_serial: u32,

    se_caps_signal: Signal<SeatCapabilities>,
    se_name_signal: Signal<String>,
}

/// One "user": a named group of input devices
#[derive(Clone)]
pub struct Seat {
    pub(crate) se_internal: Rc<RefCell<SeatInternal>>,
}

impl PartialEq for Seat {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.se_internal, &other.se_internal)
    }
}

impl Seat {
    pub(crate) fn new(compositor: WeakCompositor, name: &str) -> Seat {
        Seat {
            se_internal: Rc::new(RefCell::new(SeatInternal {
                se_core: ObjectCore::new(ObjectType::Seat),
                se_compositor: compositor,
                se_name: name.to_owned(),
                se_caps: SeatCapabilities::empty(),
                se_modifiers: Modifiers::empty(),
                se_pointer: None,
                se_keyboard: None,
                se_touch: None,
                se_serial: 0,
                se_caps_signal: Signal::new(),
                se_name_signal: Signal::new(),
            })),
        }
    }

    pub fn get_name(&self) -> String {
        self.se_internal.borrow().se_name.clone()
    }

    /// Input backends rename seats on device changes
    pub fn set_name(&self, name: &str) {
        let sig = {
            let mut internal = self.se_internal.borrow_mut();
            internal.se_name = name.to_owned();
            internal.se_name_signal.clone()
        };
        sig.emit(&name.to_owned());
    }

    pub fn get_capabilities(&self) -> SeatCapabilities {
        self.se_internal.borrow().se_caps
    }

    /// Device add/remove from the input backend: grow or shrink
    /// the device set and tell observers (the wire layer
    /// broadcasts new capabilities to clients).
    pub fn set_capabilities(&self, caps: SeatCapabilities) {
        let sig = {
            let mut internal = self.se_internal.borrow_mut();
            if internal.se_caps == caps {
                return;
            }
            internal.se_caps = caps;

            if caps.contains(SeatCapabilities::POINTER) && internal.se_pointer.is_none() {
                internal.se_pointer = Some(Pointer::new());
            }
            if !caps.contains(SeatCapabilities::POINTER) {
                internal.se_pointer = None;
            }
            if caps.contains(SeatCapabilities::KEYBOARD) && internal.se_keyboard.is_none() {
                internal.se_keyboard = Some(Keyboard::new());
            }
            if !caps.contains(SeatCapabilities::KEYBOARD) {
                internal.se_keyboard = None;
            }
            if caps.contains(SeatCapabilities::TOUCH) && internal.se_touch.is_none() {
                internal.se_touch = Some(Touch::new());
            }
            if !caps.contains(SeatCapabilities::TOUCH) {
                internal.se_touch = None;
            }

            internal.se_caps_signal.clone()
        };
        sig.emit(&caps);
    }

    pub fn add_capabilities_listener(
        &self,
        func: impl Fn(&SeatCapabilities) + 'static,
    ) -> Listener<SeatCapabilities> {
        self.se_internal.borrow().se_caps_signal.add(func)
    }

    pub fn add_name_listener(&self, func: impl Fn(&String) + 'static) -> Listener<String> {
        self.se_internal.borrow().se_name_signal.add(func)
    }

    pub fn get_pointer(&self) -> Option<Pointer> {
        self.se_internal.borrow().se_pointer.clone()
    }

    pub fn get_keyboard(&self) -> Option<Keyboard> {
        self.se_internal.borrow().se_keyboard.clone()
    }

    pub fn get_touch(&self) -> Option<Touch> {
        self.se_internal.borrow().se_touch.clone()
    }

    pub fn get_modifiers(&self) -> Modifiers {
        self.se_internal.borrow().se_modifiers
    }

    pub fn next_serial(&self) -> u32 {
        let mut internal = self.se_internal.borrow_mut();
        internal.se_serial = internal.se_serial.wrapping_add(1);
        internal.se_serial
    }

    /// Entry point for input backends: run the event down the
    /// compositor's hook chain.
    pub fn handle_event(&self, event: &InputEvent) {
        self.update_modifiers(event);

        let comp = Compositor::from_weak(&self.se_internal.borrow().se_compositor);
        if let Some(comp) = comp {
            comp.dispatch_event(self, event);
        }
    }

    fn update_modifiers(&self, event: &InputEvent) {
        if event.ev_kind != InputEventKind::KeyboardKey {
            return;
        }

        use keycodes::*;
        let flag = match event.ev_index {
            KEY_LEFTSHIFT | KEY_RIGHTSHIFT => Modifiers::SHIFT,
            KEY_LEFTCTRL | KEY_RIGHTCTRL => Modifiers::CTRL,
            KEY_LEFTALT | KEY_RIGHTALT => Modifiers::ALT,
            _ => return,
        };

        let mut internal = self.se_internal.borrow_mut();
        if event.ev_state != 0 {
            internal.se_modifiers |= flag;
        } else {
            internal.se_modifiers &= !flag;
        }
    }

    /// The default hook: forward to the client resources
    pub(crate) fn dispatch_default(&self, event: &InputEvent) -> bool {
        match event.ev_kind {
            InputEventKind::PointerMotion => {
                if let Some(ptr) = self.get_pointer() {
                    ptr.set_position(event.ev_x, event.ev_y);
                    for res in ptr.resources().iter() {
                        res.motion(event.ev_time, event.ev_x, event.ev_y);
                    }
                    return true;
                }
            }
            InputEventKind::PointerButton => {
                if let Some(ptr) = self.get_pointer() {
                    let serial = self.next_serial();
                    for res in ptr.resources().iter() {
                        res.button(serial, event.ev_time, event.ev_index, event.ev_state);
                    }
                    return true;
                }
            }
            InputEventKind::PointerAxis => {
                if let Some(ptr) = self.get_pointer() {
                    for res in ptr.resources().iter() {
                        res.axis(event.ev_time, event.ev_index, event.ev_value);
                    }
                    return true;
                }
            }
            InputEventKind::KeyboardKey => {
                if let Some(kbd) = self.get_keyboard() {
                    let serial = self.next_serial();
                    for res in kbd.resources().iter() {
                        res.key(serial, event.ev_time, event.ev_index, event.ev_state);
                    }
                    return true;
                }
            }
            InputEventKind::TouchDown => {
                if let Some(touch) = self.get_touch() {
                    let serial = self.next_serial();
                    for res in touch.resources().iter() {
                        res.down(serial, event.ev_time, event.ev_index, event.ev_x, event.ev_y);
                    }
                    return true;
                }
            }
            InputEventKind::TouchUp => {
                if let Some(touch) = self.get_touch() {
                    let serial = self.next_serial();
                    for res in touch.resources().iter() {
                        res.up(serial, event.ev_time, event.ev_index);
                    }
                    return true;
                }
            }
            InputEventKind::TouchMotion => {
                if let Some(touch) = self.get_touch() {
                    for res in touch.resources().iter() {
                        res.motion(event.ev_time, event.ev_index, event.ev_x, event.ev_y);
                    }
                    return true;
                }
            }
            InputEventKind::TouchFrame => {
                if let Some(touch) = self.get_touch() {
                    for res in touch.resources().iter() {
                        res.frame();
                    }
                    return true;
                }
            }
        }

        false
    }

    pub fn is_destroyed(&self) -> bool {
        self.se_internal.borrow().se_core.is_destroyed()
    }

    pub fn destroy(&self) {
        let comp = Compositor::from_weak(&self.se_internal.borrow().se_compositor);

        let sig = {
            let mut internal = self.se_internal.borrow_mut();
            let sig = match internal.se_core.begin_fini() {
                Some(s) => s,
                None => return,
            };
            internal.se_pointer = None;
            internal.se_keyboard = None;
            internal.se_touch = None;
            sig
        };
        sig.emit(&());

        if let Some(comp) = comp {
            comp.remove_seat(self);
        }
    }
}
