// A minimal squall server
//
// Stands the compositor core up against a headless output
// backend and runs the frame loop until SIGINT/SIGTERM. This is
// the smallest useful embedding: a real server would add a
// display socket, a shell, and hardware backends, all of which
// plug into the same traits used here.
//
// Austin Shafer - 2024
extern crate nix;
extern crate squall;
extern crate utils;

use squall::{
    Compositor, Output, OutputBackend, OutputMode, OutputModeFlags, Plane, Region, SubpixelOrder,
    Surface, View,
};
use utils::fdwatch::FdWatch;
use utils::log;

use nix::libc;
use nix::sys::signal;
use std::sync::atomic::{AtomicBool, Ordering};

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn handle_term(_: libc::c_int) {
    RUNNING.store(false, Ordering::SeqCst);
}

/// Configuration pulled from the environment
struct Options {
    opt_renderer: String,
    opt_vt: Option<u32>,
    opt_no_scanout: bool,
    opt_no_shadow: bool,
}

impl Options {
    fn from_env() -> Option<Options> {
        let renderer = std::env::var("SQUALL_RENDERER").unwrap_or_else(|_| "software".to_owned());
        match renderer.as_str() {
            "gl" | "software" => {}
            other => {
                log::error!("unknown renderer {}", other);
                return None;
            }
        }

        Some(Options {
            opt_renderer: renderer,
            opt_vt: std::env::var("SQUALL_VT").ok().and_then(|v| v.parse().ok()),
            opt_no_scanout: std::env::var("SQUALL_NO_SCANOUT").is_ok(),
            opt_no_shadow: std::env::var("SQUALL_NO_SHADOW").is_ok(),
        })
    }
}

/// An output backend with no hardware behind it
///
/// It accepts one fixed mode and fabricates frame completion
/// through start_repaint_loop, the path real backends take when
/// they have no vblank source.
struct HeadlessBackend {
    hb_mode: OutputMode,
    hb_scanout: bool,
}

impl OutputBackend for HeadlessBackend {
    fn get_subpixel_order(&self) -> SubpixelOrder {
        SubpixelOrder::Unknown
    }
    fn get_maker_name(&self) -> String {
        "squall".to_owned()
    }
    fn get_model_name(&self) -> String {
        "headless".to_owned()
    }

    fn get_mode_count(&self) -> usize {
        1
    }
    fn get_mode(&self, index: usize) -> Option<OutputMode> {
        match index {
            0 => Some(self.hb_mode),
            _ => None,
        }
    }
    fn set_mode(&mut self, mode: &OutputMode) -> bool {
        mode.m_w == self.hb_mode.m_w && mode.m_h == self.hb_mode.m_h
    }

    fn assign_planes(&mut self, _output: &Output, views: &[View]) {
        // no overlays here; everything composites on primary
        if self.hb_scanout {
            log::verbose!("scanout fast path would inspect {} views", views.len());
        }
    }

    fn repaint(&mut self, output: &Output, planes: &[Plane]) {
        for plane in planes.iter() {
            log::verbose!(
                "repaint: plane with {} views, damage {:?}",
                plane.get_render_list().len(),
                plane.get_damage_region().extents()
            );
        }
        // nothing will flip; finish on the next loop iteration
        output.start_repaint_loop();
    }

    fn attach_surface(&mut self, _surface: &Surface) -> (i32, i32) {
        (0, 0)
    }

    fn flush_surface_damage(&mut self, _surface: &Surface, _damage: &Region) -> bool {
        // the headless renderer copies nothing and keeps nothing
        false
    }
}

fn install_signal_handlers() {
    let action = signal::SigAction::new(
        signal::SigHandler::Handler(handle_term),
        signal::SaFlags::empty(),
        signal::SigSet::empty(),
    );
    unsafe {
        signal::sigaction(signal::Signal::SIGINT, &action).expect("sigaction(SIGINT)");
        signal::sigaction(signal::Signal::SIGTERM, &action).expect("sigaction(SIGTERM)");
    }
}

fn main() {
    let opts = match Options::from_env() {
        Some(o) => o,
        None => std::process::exit(1),
    };
    println!(
        "starting headless sample: renderer={} vt={:?} no_scanout={} no_shadow={}",
        opts.opt_renderer, opts.opt_vt, opts.opt_no_scanout, opts.opt_no_shadow
    );

    install_signal_handlers();

    let comp = Compositor::new("squall-0");
    let output = comp.add_output(Box::new(HeadlessBackend {
        hb_mode: OutputMode {
            m_flags: OutputModeFlags::CURRENT | OutputModeFlags::PREFERRED,
            m_w: 1920,
            m_h: 1080,
            m_refresh: 60_000,
        },
        hb_scanout: !opts.opt_no_scanout,
    }));
    let _primary = output.add_plane(None);

    let layer = comp.create_layer();
    comp.stack_layer(&layer, None);

    let _seat = comp.create_seat("seat0");

    // The poll loop a real server would hang display and input
    // fds on. Headless, it only paces the artificial frame clock.
    let mut watch = FdWatch::new();
    watch.register_events();

    let start = comp.get_time_ms();
    let mut frames: u64 = 0;
    while RUNNING.load(Ordering::SeqCst) {
        if comp.dispatch_idle() > 0 {
            frames += 1;
        }
        // ~60Hz tick in place of real vblank
        watch.wait_for_events(Some(16));
    }

    let uptime_ms = comp.get_time_ms().wrapping_sub(start);
    println!("shutting down after {} ms, {} idle batches", uptime_ms, frames);

    comp.destroy();
    std::process::exit(0);
}
