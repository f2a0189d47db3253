// Helper class for watching file descriptors
// OS-compatibility layer
//
// Austin Shafer - 2024
extern crate nix;

#[cfg(not(target_os = "freebsd"))]
use nix::sys::select::*;

#[cfg(target_os = "freebsd")]
use nix::sys::event::*;
use std::os::unix::io::{BorrowedFd, RawFd};

// =============================================
// kqueue version
// =============================================

// A file descriptor watcher
#[cfg(target_os = "freebsd")]
pub struct FdWatch {
    // The kqueue handle
    fdw_kq: Kqueue,
    // Events to watch
    fdw_events: Vec<KEvent>,
}

#[cfg(target_os = "freebsd")]
impl FdWatch {
    // Helper for creating a kevent for reading an fd
    fn read_fd_kevent(fd: RawFd) -> KEvent {
        KEvent::new(
            fd as usize,
            EventFilter::EVFILT_READ,
            EventFlag::EV_ADD,
            FilterFlag::all(),
            0,
            0,
        )
    }

    pub fn new() -> FdWatch {
        FdWatch {
            fdw_kq: Kqueue::new().expect("Could not create kqueue"),
            fdw_events: Vec::new(),
        }
    }

    pub fn add_fd(&mut self, fd: RawFd) {
        let kev = FdWatch::read_fd_kevent(fd);
        self.fdw_events.push(kev);
    }

    pub fn register_events(&mut self) {
        // Register our kevent with the kqueue to receive updates
        self.fdw_kq
            .kevent(self.fdw_events.as_slice(), &mut [], None)
            .expect("Could not register watch event with kqueue");
    }

    // returns true if something is ready to be read
    pub fn wait_for_events(&mut self, timeout: Option<usize>) -> bool {
        let ts = timeout.map(|ms| std::time::Duration::from_millis(ms as u64));
        match self
            .fdw_kq
            .kevent(&[], self.fdw_events.as_mut_slice(), ts)
        {
            Ok(n) => n > 0,
            Err(_) => false,
        }
    }
}

// =============================================
// Generic select
// =============================================

// A file descriptor watcher
#[cfg(not(target_os = "freebsd"))]
pub struct FdWatch {
    // Events to watch
    fdw_events: Vec<RawFd>,
}

#[cfg(not(target_os = "freebsd"))]
impl FdWatch {
    pub fn new() -> FdWatch {
        FdWatch {
            fdw_events: Vec::new(),
        }
    }

    /// The caller keeps ownership of `fd`, it must outlive
    /// this watcher.
    pub fn add_fd(&mut self, fd: RawFd) {
        self.fdw_events.push(fd);
    }

    pub fn register_events(&mut self) {
        // noop since select doesn't need registration
    }

    // timeout in ms
    // returns true if something is ready to be read
    pub fn wait_for_events(&mut self, timeout: Option<usize>) -> bool {
        use nix::sys::time::TimeValLike;

        // borrow our raw fds for the lifetime of this call
        let fds: Vec<BorrowedFd> = self
            .fdw_events
            .iter()
            .map(|fd| unsafe { BorrowedFd::borrow_raw(*fd) })
            .collect();

        let mut fdset = FdSet::new();
        for fd in fds.iter() {
            fdset.insert(*fd);
        }

        // add all of our fds to the readfd list
        let mut out = match timeout {
            Some(ms) => Some(nix::sys::time::TimeVal::milliseconds(ms as i64)),
            None => None,
        };
        match select(None, Some(&mut fdset), None, None, out.as_mut()) {
            Ok(n) => n > 0,
            Err(_) => false,
        }
    }
}
