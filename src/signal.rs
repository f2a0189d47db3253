// Destroy signals and friends
//
// Every first-class object carries a destroy signal, and a few
// (buffers, parents, outputs) are observed by other objects that
// need to drop their references when the target dies. This module
// replaces hand-maintained back-pointer lists with a signal that
// owns its sinks and hands out detachable listener handles.
//
// Austin Shafer - 2024
use std::cell::RefCell;
use std::rc::{Rc, Weak};

struct SignalEntry<T> {
    se_id: u32,
    se_func: Rc<dyn Fn(&T)>,
}

struct SignalInternal<T> {
    si_next_id: u32,
    si_entries: Vec<SignalEntry<T>>,
}

/// A list of sinks notified in subscription order
///
/// Emission snapshots the sink list first, so a sink may detach
/// itself (or any other listener) while the signal is firing
/// without invalidating the iteration.
pub struct Signal<T> {
    s_internal: Rc<RefCell<SignalInternal<T>>>,
}

/// Shallow clone: both handles fire the same sink list
impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            s_internal: self.s_internal.clone(),
        }
    }
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self {
            s_internal: Rc::new(RefCell::new(SignalInternal {
                si_next_id: 0,
                si_entries: Vec::new(),
            })),
        }
    }

    /// Subscribe to this signal
    ///
    /// The returned listener detaches on drop, so the subscriber
    /// keeps it alive for as long as it wants notifications.
    pub fn add(&self, func: impl Fn(&T) + 'static) -> Listener<T> {
        let mut internal = self.s_internal.borrow_mut();
        let id = internal.si_next_id;
        internal.si_next_id += 1;

        internal.si_entries.push(SignalEntry {
            se_id: id,
            se_func: Rc::new(func),
        });

        Listener {
            l_id: id,
            l_signal: Rc::downgrade(&self.s_internal),
        }
    }

    pub fn emit(&self, arg: &T) {
        // Clone the sinks out so entries can detach while we run.
        // A sink detached mid-emit may still see this emission, it
        // will not see the next one.
        let funcs: Vec<Rc<dyn Fn(&T)>> = self
            .s_internal
            .borrow()
            .si_entries
            .iter()
            .map(|e| e.se_func.clone())
            .collect();

        for f in funcs.iter() {
            f(arg);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.s_internal.borrow().si_entries.len()
    }
}

/// Subscription handle for one sink of a `Signal`
///
/// Detaching is idempotent and happens automatically on drop.
pub struct Listener<T> {
    l_id: u32,
    l_signal: Weak<RefCell<SignalInternal<T>>>,
}

impl<T> Listener<T> {
    pub fn detach(&self) {
        if let Some(sig) = self.l_signal.upgrade() {
            let mut internal = sig.borrow_mut();
            // already-removed ids just fall through
            if let Some(pos) = internal.si_entries.iter().position(|e| e.se_id == self.l_id) {
                internal.si_entries.remove(pos);
            }
        }
    }
}

impl<T> Drop for Listener<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn emit_reaches_all_sinks() {
        let sig: Signal<u32> = Signal::new();
        let count = Rc::new(Cell::new(0));

        let c1 = count.clone();
        let _l1 = sig.add(move |v| c1.set(c1.get() + v));
        let c2 = count.clone();
        let _l2 = sig.add(move |v| c2.set(c2.get() + v));

        sig.emit(&3);
        assert_eq!(count.get(), 6);
    }

    #[test]
    fn detach_is_idempotent() {
        let sig: Signal<()> = Signal::new();
        let count = Rc::new(Cell::new(0));

        let c = count.clone();
        let l = sig.add(move |_| c.set(c.get() + 1));
        sig.emit(&());
        l.detach();
        l.detach();
        sig.emit(&());
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn drop_detaches() {
        let sig: Signal<()> = Signal::new();
        let count = Rc::new(Cell::new(0));

        {
            let c = count.clone();
            let _l = sig.add(move |_| c.set(c.get() + 1));
            sig.emit(&());
        }
        sig.emit(&());
        assert_eq!(count.get(), 1);
        assert_eq!(sig.listener_count(), 0);
    }

    #[test]
    fn unsubscribe_during_emit() {
        let sig: Signal<()> = Signal::new();

        // A sink that detaches another listener while the signal is
        // firing must not invalidate the emission.
        let count = Rc::new(Cell::new(0));
        let victim: Rc<RefCell<Option<Listener<()>>>> = Rc::new(RefCell::new(None));

        let v = victim.clone();
        let _l1 = sig.add(move |_| {
            v.borrow_mut().take();
        });
        let c = count.clone();
        *victim.borrow_mut() = Some(sig.add(move |_| c.set(c.get() + 1)));

        sig.emit(&());
        // the victim may or may not have seen this emission, but
        // the next one must skip it
        let first = count.get();
        assert!(first <= 1);
        sig.emit(&());
        assert_eq!(count.get(), first);
    }
}
