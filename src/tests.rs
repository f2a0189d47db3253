/// Scene graph and frame scheduler tests
///
/// These drive the whole pipeline through a test output backend:
/// commit surfaces, run the idle repaint, inspect what the
/// backend was handed, and finish frames by hand.
///
/// Austin Shafer - 2024
use crate::buffer::{Buffer, BufferResource};
use crate::input::{InputEvent, InputEventKind, PointerResource, SeatCapabilities};
use crate::output::{Output, OutputBackend, OutputMode, OutputModeFlags, SubpixelOrder};
use crate::plane::Plane;
use crate::surface::{FrameCallback, Surface};
use crate::view::View;
use crate::{Compositor, Layer, Rect, Region, SquallError};

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/* ---------------- test doubles ---------------- */

#[allow(dead_code)]
struct PlaneRecord {
    pr_plane: Plane,
    pr_damage: Region,
    pr_clip: Region,
    pr_items: Vec<(View, Region)>,
}

struct RepaintRecord {
    rr_planes: Vec<PlaneRecord>,
}

#[derive(Default)]
struct TestBackendState {
    tb_modes: Vec<OutputMode>,
    tb_attach_size: (i32, i32),
    tb_keep_buffer: bool,
    /// accept exactly this view onto this plane, decline the rest
    tb_assign_view: Option<(View, Plane)>,
    tb_repaints: Vec<RepaintRecord>,
    tb_flushes: Vec<(Surface, Region)>,
}

struct TestBackend {
    tb_state: Rc<RefCell<TestBackendState>>,
}

impl OutputBackend for TestBackend {
    fn get_subpixel_order(&self) -> SubpixelOrder {
        SubpixelOrder::Unknown
    }
    fn get_maker_name(&self) -> String {
        "squall".to_owned()
    }
    fn get_model_name(&self) -> String {
        "testmode".to_owned()
    }

    fn get_mode_count(&self) -> usize {
        self.tb_state.borrow().tb_modes.len()
    }
    fn get_mode(&self, index: usize) -> Option<OutputMode> {
        self.tb_state.borrow().tb_modes.get(index).copied()
    }
    fn set_mode(&mut self, mode: &OutputMode) -> bool {
        let mut state = self.tb_state.borrow_mut();
        for m in state.tb_modes.iter_mut() {
            if m.m_w == mode.m_w && m.m_h == mode.m_h {
                m.m_flags |= OutputModeFlags::CURRENT;
            } else {
                m.m_flags &= !OutputModeFlags::CURRENT;
            }
        }
        true
    }

    fn assign_planes(&mut self, output: &Output, views: &[View]) {
        let target = self.tb_state.borrow().tb_assign_view.clone();
        if let Some((wanted, plane)) = target {
            for view in views.iter() {
                if *view == wanted {
                    view.assign_plane(output, &plane).unwrap();
                }
            }
        }
    }

    fn repaint(&mut self, _output: &Output, planes: &[Plane]) {
        let record = RepaintRecord {
            rr_planes: planes
                .iter()
                .map(|p| PlaneRecord {
                    pr_plane: p.clone(),
                    pr_damage: p.get_damage_region(),
                    pr_clip: p.get_clip_region(),
                    pr_items: p
                        .get_render_list()
                        .iter()
                        .map(|item| (item.ri_view.clone(), item.ri_visible.clone()))
                        .collect(),
                })
                .collect(),
        };
        self.tb_state.borrow_mut().tb_repaints.push(record);
    }

    fn attach_surface(&mut self, _surface: &Surface) -> (i32, i32) {
        self.tb_state.borrow().tb_attach_size
    }

    fn flush_surface_damage(&mut self, surface: &Surface, damage: &Region) -> bool {
        let mut state = self.tb_state.borrow_mut();
        state.tb_flushes.push((surface.clone(), damage.clone()));
        state.tb_keep_buffer
    }
}

struct TestBufferResource {
    tr_released: Rc<Cell<u32>>,
}

impl BufferResource for TestBufferResource {
    fn release(&self) {
        self.tr_released.set(self.tr_released.get() + 1);
    }
}

struct TestFrameCallback {
    tc_fired: Rc<RefCell<Vec<u32>>>,
}

impl FrameCallback for TestFrameCallback {
    fn done(&self, time_ms: u32) {
        self.tc_fired.borrow_mut().push(time_ms);
    }
}

struct TestPointerResource {
    /// (serial, button, state)
    tp_buttons: Rc<RefCell<Vec<(u32, u32, u32)>>>,
}

impl PointerResource for TestPointerResource {
    fn motion(&self, _time: u32, _x: f64, _y: f64) {}
    fn button(&self, serial: u32, _time: u32, button: u32, state: u32) {
        self.tp_buttons.borrow_mut().push((serial, button, state));
    }
    fn axis(&self, _time: u32, _axis: u32, _value: f64) {}
}

/* ---------------- fixture ---------------- */

struct Fixture {
    f_comp: Compositor,
    f_output: Output,
    f_primary: Plane,
    f_layer: Layer,
    f_state: Rc<RefCell<TestBackendState>>,
}

fn mode(w: i32, h: i32, flags: OutputModeFlags) -> OutputMode {
    OutputMode {
        m_flags: flags,
        m_w: w,
        m_h: h,
        m_refresh: 60_000,
    }
}

/// One output at (0, 0) with a primary plane, one layer, and the
/// initial empty frame already finished.
fn fixture(w: i32, h: i32) -> Fixture {
    let comp = Compositor::new("squall-test-0");

    let state = Rc::new(RefCell::new(TestBackendState {
        tb_modes: vec![mode(w, h, OutputModeFlags::CURRENT)],
        tb_attach_size: (256, 256),
        tb_keep_buffer: true,
        tb_assign_view: None,
        tb_repaints: Vec::new(),
        tb_flushes: Vec::new(),
    }));

    let output = comp.add_output(Box::new(TestBackend {
        tb_state: state.clone(),
    }));
    let primary = output.add_plane(None);

    // drain the initial empty repaint so tests start from idle
    comp.dispatch_idle();
    if output.is_pending() {
        output.finish_frame(comp.get_time_ms());
    }
    state.borrow_mut().tb_repaints.clear();

    let layer = comp.create_layer();
    comp.stack_layer(&layer, None);

    Fixture {
        f_comp: comp,
        f_output: output,
        f_primary: primary,
        f_layer: layer,
        f_state: state,
    }
}

impl Fixture {
    /// A mapped view of a fresh surface at (x, y)
    fn make_view(&self, x: f64, y: f64) -> (Surface, View) {
        let surf = self.f_comp.create_surface();
        let view = self.f_comp.create_view(Some(&surf)).unwrap();
        view.set_layer(&self.f_layer);
        view.set_position(x, y);
        view.map();
        (surf, view)
    }

    fn make_buffer(&self) -> (Buffer, Rc<Cell<u32>>) {
        let released = Rc::new(Cell::new(0));
        let buf = Buffer::new(Box::new(TestBufferResource {
            tr_released: released.clone(),
        }));
        (buf, released)
    }

    /// Run the scheduled repaint and return how many repaints the
    /// backend saw in total
    fn run_repaint(&self) -> usize {
        self.f_comp.dispatch_idle();
        self.f_state.borrow().tb_repaints.len()
    }

    fn finish(&self, ts: u32) {
        self.f_output.finish_frame(ts);
    }

    fn last_repaint<R>(&self, func: impl FnOnce(&RepaintRecord) -> R) -> R {
        let state = self.f_state.borrow();
        func(state.tb_repaints.last().expect("no repaint recorded"))
    }
}

fn full_rect(w: i32, h: i32) -> Region {
    Region::from_rect(Rect::new(0, 0, w, h))
}

/* ---------------- scenarios ---------------- */

#[test]
fn single_view_end_to_end() {
    let fix = fixture(1920, 1080);
    let (surf, view) = fix.make_view(0.0, 0.0);
    let (buf, _released) = fix.make_buffer();

    let fired = Rc::new(RefCell::new(Vec::new()));
    surf.attach(Some(&buf), 0, 0);
    surf.damage(&Rect::new(0, 0, 256, 256));
    surf.frame(Box::new(TestFrameCallback {
        tc_fired: fired.clone(),
    }));
    surf.commit();

    assert!(surf.pending_is_clear());
    assert_eq!(surf.size(), (256, 256));

    assert_eq!(fix.run_repaint(), 1);

    fix.last_repaint(|rec| {
        assert_eq!(rec.rr_planes.len(), 1);
        let plane = &rec.rr_planes[0];
        assert_eq!(plane.pr_items.len(), 1);
        assert_eq!(plane.pr_items[0].0, view);
        assert_eq!(plane.pr_items[0].1, full_rect(256, 256));
        assert_eq!(plane.pr_damage, full_rect(256, 256));
    });

    // flush carried the surface damage to the renderer
    {
        let state = fix.f_state.borrow();
        assert_eq!(state.tb_flushes.len(), 1);
        assert_eq!(state.tb_flushes[0].1, full_rect(256, 256));
    }

    // current state + the in-flight render reference
    assert_eq!(buf.ref_count(), 2);
    assert!(fired.borrow().is_empty());

    fix.finish(12345);
    assert_eq!(*fired.borrow(), vec![12345]);
    assert_eq!(buf.ref_count(), 1);
    assert!(!fix.f_output.is_pending());
}

#[test]
fn opaque_view_occludes_below() {
    let fix = fixture(1920, 1080);
    let (bottom_surf, bottom_view) = fix.make_view(0.0, 0.0);
    let (top_surf, top_view) = fix.make_view(0.0, 0.0);

    let (bottom_buf, _) = fix.make_buffer();
    bottom_surf.attach(Some(&bottom_buf), 0, 0);
    bottom_surf.damage(&Rect::new(0, 0, 256, 256));
    bottom_surf.commit();

    let (top_buf, _) = fix.make_buffer();
    top_surf.attach(Some(&top_buf), 0, 0);
    top_surf.damage(&Rect::new(0, 0, 256, 256));
    top_surf.set_opaque_region(Some(&full_rect(256, 256)));
    top_surf.commit();

    fix.run_repaint();

    fix.last_repaint(|rec| {
        let plane = &rec.rr_planes[0];
        assert_eq!(plane.pr_items.len(), 2);
        // back to front
        assert_eq!(plane.pr_items[0].0, bottom_view);
        assert_eq!(plane.pr_items[1].0, top_view);
        // fully occluded
        assert!(plane.pr_items[0].1.is_empty());
        assert_eq!(plane.pr_items[1].1, full_rect(256, 256));
        // the plane hides its opaque pixels from planes below
        assert_eq!(plane.pr_clip, full_rect(256, 256));
    });
    fix.finish(1);

    // a second frame only repaints the top view's new damage
    top_surf.damage(&Rect::new(10, 10, 20, 20));
    top_surf.commit();
    fix.run_repaint();

    fix.last_repaint(|rec| {
        let plane = &rec.rr_planes[0];
        assert_eq!(plane.pr_damage, Region::from_rect(Rect::new(10, 10, 20, 20)));
    });
}

#[test]
fn mode_change_waits_for_pending_frame() {
    let fix = fixture(1920, 1080);
    {
        let mut state = fix.f_state.borrow_mut();
        state.tb_modes.push(mode(1280, 720, OutputModeFlags::empty()));
    }

    let (surf, _view) = fix.make_view(0.0, 0.0);
    let (buf, _) = fix.make_buffer();
    surf.attach(Some(&buf), 0, 0);
    surf.damage(&Rect::new(0, 0, 256, 256));
    surf.commit();
    fix.run_repaint();
    assert!(fix.f_output.is_pending());

    // the backend reports a new mode mid-flight
    {
        let mut state = fix.f_state.borrow_mut();
        state.tb_modes[0].m_flags = OutputModeFlags::empty();
        state.tb_modes[1].m_flags = OutputModeFlags::CURRENT;
    }
    fix.f_output.handle_mode_change();

    // the in-flight frame still runs against the old geometry
    let geo = fix.f_output.get_geometry();
    assert_eq!((geo.og_w, geo.og_h), (1920, 1080));

    fix.finish(1);

    // now the new mode is adopted and everything is invalid
    let geo = fix.f_output.get_geometry();
    assert_eq!((geo.og_w, geo.og_h), (1280, 720));
    assert_eq!(fix.f_primary.get_damage_region(), full_rect(1280, 720));
    // and a repaint was scheduled automatically
    assert!(fix.f_comp.has_idle_tasks());
}

#[test]
fn buffer_destroyed_between_attach_and_commit() {
    let fix = fixture(1920, 1080);
    let (surf, view) = fix.make_view(0.0, 0.0);

    // first frame with buffer a
    let (buf_a, released_a) = fix.make_buffer();
    surf.attach(Some(&buf_a), 0, 0);
    surf.commit();
    assert_eq!(surf.size(), (256, 256));

    // attach b, then the client destroys it before committing
    let (buf_b, _released_b) = fix.make_buffer();
    surf.attach(Some(&buf_b), 0, 0);
    buf_b.destroy();
    surf.commit();

    // the commit behaved like attach(null)
    assert_eq!(surf.size(), (0, 0));
    assert!(surf.get_buffer().is_none());
    // buffer a went back to the client
    assert_eq!(buf_a.ref_count(), 0);
    assert_eq!(released_a.get(), 1);

    // views survive with empty bounding regions
    fix.run_repaint();
    view.update_geometry();
    assert!(view.get_bounding_region().is_empty());
}

#[test]
fn event_hook_consumes_before_default() {
    let fix = fixture(1920, 1080);
    let seat = fix.f_comp.create_seat("seat0");
    seat.set_capabilities(SeatCapabilities::POINTER);

    let buttons = Rc::new(RefCell::new(Vec::new()));
    seat.get_pointer()
        .unwrap()
        .add_resource(Rc::new(TestPointerResource {
            tp_buttons: buttons.clone(),
        }));

    // swallow button 0, pass everything else on
    let _hook = fix.f_comp.add_event_hook(|_seat, event| {
        event.ev_kind == InputEventKind::PointerButton && event.ev_index == 0
    });

    let mut event = InputEvent {
        ev_kind: InputEventKind::PointerButton,
        ev_time: 10,
        ev_index: 0,
        ev_state: 1,
        ev_value: 0.0,
        ev_x: 0.0,
        ev_y: 0.0,
    };
    seat.handle_event(&event);
    assert!(buttons.borrow().is_empty());

    event.ev_index = 1;
    seat.handle_event(&event);
    {
        let b = buttons.borrow();
        assert_eq!(b.len(), 1);
        let (serial, button, state) = b[0];
        assert!(serial > 0);
        assert_eq!(button, 1);
        assert_eq!(state, 1);
    }
}

#[test]
fn restack_to_other_layer_damages_footprint() {
    let fix = fixture(1920, 1080);
    let top_layer = fix.f_comp.create_layer();
    fix.f_comp.stack_layer(&top_layer, Some(&fix.f_layer));

    let (surf, view) = fix.make_view(100.0, 100.0);
    // a child hangs onto its parent across the restack
    let child = fix.f_comp.create_view(None).unwrap();
    child.set_parent(Some(&view)).unwrap();

    let (buf, _) = fix.make_buffer();
    surf.attach(Some(&buf), 0, 0);
    surf.commit();
    fix.run_repaint();
    fix.finish(1);

    view.set_layer(&top_layer);
    fix.run_repaint();

    fix.last_repaint(|rec| {
        // the whole footprint repaints: old and new visible agree
        // here, so the union is the view's visible region
        let plane = &rec.rr_planes[0];
        assert_eq!(
            plane.pr_damage,
            Region::from_rect(Rect::new(100, 100, 256, 256))
        );
    });

    assert_eq!(child.get_parent(), Some(view.clone()));
}

/* ---------------- invariants & boundaries ---------------- */

#[test]
fn commit_without_changes_is_idempotent() {
    let fix = fixture(1920, 1080);
    let (surf, _view) = fix.make_view(0.0, 0.0);
    let (buf, _) = fix.make_buffer();

    surf.attach(Some(&buf), 0, 0);
    surf.damage(&Rect::new(0, 0, 256, 256));
    surf.set_opaque_region(Some(&full_rect(256, 256)));
    surf.commit();
    fix.run_repaint();
    fix.finish(1);

    let size = surf.size();
    let opaque = surf.get_opaque_region();

    // an empty commit changes nothing and repaints nothing
    surf.commit();
    assert!(surf.pending_is_clear());
    assert_eq!(surf.size(), size);
    assert_eq!(surf.get_opaque_region(), opaque);
    assert_eq!(buf.ref_count(), 1);

    let flushes_before = fix.f_state.borrow().tb_flushes.len();
    fix.run_repaint();
    fix.last_repaint(|rec| {
        assert!(rec.rr_planes[0].pr_damage.is_empty());
        assert_eq!(rec.rr_planes[0].pr_items.len(), 1);
    });
    assert_eq!(fix.f_state.borrow().tb_flushes.len(), flushes_before);
}

#[test]
fn transform_and_scale_idempotent_on_size() {
    let fix = fixture(1920, 1080);
    let (surf, _view) = fix.make_view(0.0, 0.0);
    let (buf, _) = fix.make_buffer();

    surf.attach(Some(&buf), 0, 0);
    surf.set_buffer_transform(1).unwrap(); // 90 degrees
    surf.set_buffer_scale(2).unwrap();
    surf.commit();

    // 256x256 rotated then halved
    assert_eq!(surf.size(), (128, 128));

    surf.set_buffer_transform(1).unwrap();
    surf.set_buffer_scale(2).unwrap();
    surf.commit();
    assert_eq!(surf.size(), (128, 128));
}

#[test]
fn invalid_transform_and_scale_are_protocol_errors() {
    let fix = fixture(1920, 1080);
    let surf = fix.f_comp.create_surface();

    assert!(surf.set_buffer_transform(8).is_err());
    assert!(surf.set_buffer_transform(-1).is_err());
    assert!(surf.set_buffer_scale(0).is_err());
    assert!(surf.set_buffer_scale(1).is_ok());

    // roles are write-once
    assert!(surf.set_role("toplevel").is_ok());
    assert!(surf.set_role("cursor").is_err());
    assert_eq!(surf.get_role(), Some("toplevel".to_owned()));
}

#[test]
fn schedule_while_pending_coalesces_to_one_repaint() {
    let fix = fixture(1920, 1080);
    let (surf, _view) = fix.make_view(0.0, 0.0);
    let (buf, _) = fix.make_buffer();
    surf.attach(Some(&buf), 0, 0);
    surf.commit();
    fix.run_repaint();
    assert!(fix.f_output.is_pending());

    // commits while pending only set the render-again bit
    surf.damage(&Rect::new(0, 0, 10, 10));
    surf.commit();
    surf.damage(&Rect::new(20, 20, 10, 10));
    surf.commit();
    assert!(!fix.f_comp.has_idle_tasks());
    assert_eq!(fix.f_state.borrow().tb_repaints.len(), 1);

    // finishing the frame schedules exactly one more pass, which
    // carries both accumulated damage rects
    fix.finish(1);
    assert!(fix.f_comp.has_idle_tasks());
    assert_eq!(fix.run_repaint(), 2);

    fix.last_repaint(|rec| {
        let mut expected = Region::from_rect(Rect::new(0, 0, 10, 10));
        expected.add(&Rect::new(20, 20, 10, 10));
        assert_eq!(rec.rr_planes[0].pr_damage, expected);
    });
}

#[test]
fn alpha_zero_contributes_no_clip() {
    let fix = fixture(1920, 1080);
    let (bottom_surf, bottom_view) = fix.make_view(0.0, 0.0);
    let (top_surf, top_view) = fix.make_view(0.0, 0.0);
    top_view.set_alpha(0.0);

    let (b0, _) = fix.make_buffer();
    bottom_surf.attach(Some(&b0), 0, 0);
    bottom_surf.commit();
    let (b1, _) = fix.make_buffer();
    top_surf.attach(Some(&b1), 0, 0);
    top_surf.set_opaque_region(Some(&full_rect(256, 256)));
    top_surf.commit();

    fix.run_repaint();

    fix.last_repaint(|rec| {
        let plane = &rec.rr_planes[0];
        assert!(plane.pr_clip.is_empty());
        // the transparent view occludes nothing
        let bottom = plane
            .pr_items
            .iter()
            .find(|(v, _)| *v == bottom_view)
            .unwrap();
        assert_eq!(bottom.1, full_rect(256, 256));
        let top = plane.pr_items.iter().find(|(v, _)| *v == top_view).unwrap();
        assert_eq!(top.1, full_rect(256, 256));
    });
}

#[test]
fn null_attach_empties_the_surface() {
    let fix = fixture(1920, 1080);
    let (surf, view) = fix.make_view(0.0, 0.0);
    let (buf, released) = fix.make_buffer();

    surf.attach(Some(&buf), 0, 0);
    surf.commit();
    assert_eq!(surf.size(), (256, 256));

    surf.attach(None, 0, 0);
    surf.commit();
    assert_eq!(surf.size(), (0, 0));
    assert_eq!(buf.ref_count(), 0);
    assert_eq!(released.get(), 1);

    fix.run_repaint();
    view.update_geometry();
    assert!(view.get_bounding_region().is_empty());
    // the contentless view renders nowhere
    fix.last_repaint(|rec| {
        assert!(rec.rr_planes[0].pr_items.is_empty());
    });
}

#[test]
fn view_destroy_emits_once_and_weak_refs_observe_gone() {
    let fix = fixture(1920, 1080);
    let (surf, view) = fix.make_view(0.0, 0.0);

    let count = Rc::new(Cell::new(0));
    let c = count.clone();
    let _l = view.add_destroy_listener(move |_| c.set(c.get() + 1));

    view.destroy();
    assert_eq!(count.get(), 1);
    assert!(view.is_destroyed());
    assert!(surf.views().is_empty());
    assert!(fix.f_layer.views().is_empty());
}

#[test]
fn overlay_plane_clips_primary() {
    let fix = fixture(1920, 1080);
    let overlay = fix.f_output.add_plane(None);

    // the overlay view covers part of the primary view
    let (under_surf, under_view) = fix.make_view(0.0, 0.0);
    let (over_surf, over_view) = fix.make_view(128.0, 128.0);

    let (b0, _) = fix.make_buffer();
    under_surf.attach(Some(&b0), 0, 0);
    under_surf.commit();
    let (b1, _) = fix.make_buffer();
    over_surf.attach(Some(&b1), 0, 0);
    over_surf.set_opaque_region(Some(&full_rect(256, 256)));
    over_surf.commit();

    // the backend accepts the top view onto the overlay and
    // declines the other, which falls back to primary
    fix.f_state.borrow_mut().tb_assign_view = Some((over_view.clone(), overlay.clone()));

    fix.run_repaint();

    fix.last_repaint(|rec| {
        assert_eq!(rec.rr_planes.len(), 2);
        let primary = &rec.rr_planes[0];
        let over = &rec.rr_planes[1];

        // the under view stayed on primary, clipped by the
        // overlay's opaque footprint
        assert_eq!(primary.pr_items.len(), 1);
        assert_eq!(primary.pr_items[0].0, under_view);
        let mut expected = full_rect(256, 256);
        expected.subtract_rect(&Rect::new(128, 128, 256, 256));
        assert_eq!(primary.pr_items[0].1, expected);

        assert_eq!(over.pr_items.len(), 1);
        assert_eq!(over.pr_items[0].0, over_view);
        assert_eq!(
            over.pr_clip,
            Region::from_rect(Rect::new(128, 128, 256, 256))
        );
    });
}

#[test]
fn unmap_damages_what_was_covered() {
    let fix = fixture(1920, 1080);
    let (surf, view) = fix.make_view(50.0, 60.0);
    let (buf, _) = fix.make_buffer();
    surf.attach(Some(&buf), 0, 0);
    surf.commit();
    fix.run_repaint();
    fix.finish(1);

    view.unmap();
    fix.run_repaint();

    fix.last_repaint(|rec| {
        let plane = &rec.rr_planes[0];
        assert!(plane.pr_items.is_empty());
        assert_eq!(
            plane.pr_damage,
            Region::from_rect(Rect::new(50, 60, 256, 256))
        );
    });
}

#[test]
fn buffer_refcount_tracks_holders() {
    let fix = fixture(1920, 1080);
    let (surf, _view) = fix.make_view(0.0, 0.0);
    let (buf, released) = fix.make_buffer();

    // pending attach holds no reference
    surf.attach(Some(&buf), 0, 0);
    surf.damage(&Rect::new(0, 0, 256, 256));
    assert_eq!(buf.ref_count(), 0);

    // current state holds one
    surf.commit();
    assert_eq!(buf.ref_count(), 1);

    // the render node holds another while the frame flies
    fix.run_repaint();
    assert_eq!(buf.ref_count(), 2);
    fix.finish(1);
    assert_eq!(buf.ref_count(), 1);

    // replacing the buffer releases it to the client
    surf.attach(None, 0, 0);
    surf.commit();
    assert_eq!(buf.ref_count(), 0);
    assert_eq!(released.get(), 1);
}

#[test]
fn seat_capability_and_name_signals() {
    let fix = fixture(1920, 1080);
    let seat = fix.f_comp.create_seat("seat0");

    let caps_seen = Rc::new(RefCell::new(Vec::new()));
    let cs = caps_seen.clone();
    let _cl = seat.add_capabilities_listener(move |c| cs.borrow_mut().push(*c));
    let names_seen = Rc::new(RefCell::new(Vec::new()));
    let ns = names_seen.clone();
    let _nl = seat.add_name_listener(move |n| ns.borrow_mut().push(n.clone()));

    seat.set_capabilities(SeatCapabilities::POINTER | SeatCapabilities::KEYBOARD);
    // setting the same caps again is silent
    seat.set_capabilities(SeatCapabilities::POINTER | SeatCapabilities::KEYBOARD);
    seat.set_capabilities(SeatCapabilities::POINTER);

    assert_eq!(caps_seen.borrow().len(), 2);
    assert!(seat.get_pointer().is_some());
    assert!(seat.get_keyboard().is_none());

    seat.set_name("seat0-renamed");
    assert_eq!(*names_seen.borrow(), vec!["seat0-renamed".to_owned()]);
}

#[test]
fn layer_navigation() {
    let comp = Compositor::new("squall-test-layers");
    let bottom = comp.create_layer();
    let top = comp.create_layer();
    comp.stack_layer(&bottom, None);
    comp.stack_layer(&top, Some(&bottom));

    assert_eq!(comp.get_bottom_layer(), Some(bottom.clone()));
    assert_eq!(comp.get_top_layer(), Some(top.clone()));
    assert_eq!(bottom.get_above(), Some(top.clone()));
    assert_eq!(top.get_below(), Some(bottom.clone()));
    assert_eq!(top.get_above(), None);
    assert_eq!(bottom.get_below(), None);
}

#[test]
fn views_stack_within_a_layer() {
    let fix = fixture(1920, 1080);
    let (_s0, v0) = fix.make_view(0.0, 0.0);
    let (_s1, v1) = fix.make_view(0.0, 0.0);
    let (_s2, v2) = fix.make_view(0.0, 0.0);

    // creation order is stacking order
    assert_eq!(fix.f_layer.views(), vec![v0.clone(), v1.clone(), v2.clone()]);

    v0.stack_top();
    assert_eq!(fix.f_layer.views(), vec![v1.clone(), v2.clone(), v0.clone()]);

    v0.stack_bottom();
    assert_eq!(fix.f_layer.views(), vec![v0.clone(), v1.clone(), v2.clone()]);

    v2.stack_below(&v1);
    assert_eq!(fix.f_layer.views(), vec![v0.clone(), v2.clone(), v1.clone()]);

    v0.stack_above(&v2);
    assert_eq!(fix.f_layer.views(), vec![v2.clone(), v0.clone(), v1.clone()]);

    assert_eq!(v0.get_above(), Some(v1.clone()));
    assert_eq!(v0.get_below(), Some(v2.clone()));
}

#[test]
fn parent_destroy_reparents_children_to_none() {
    let fix = fixture(1920, 1080);
    let (_s, parent) = fix.make_view(10.0, 10.0);
    let child = fix.f_comp.create_view(None).unwrap();
    child.set_parent(Some(&parent)).unwrap();
    assert_eq!(child.get_parent(), Some(parent.clone()));

    parent.destroy();
    assert_eq!(child.get_parent(), None);
}

#[test]
fn child_geometry_composes_with_parent() {
    let fix = fixture(1920, 1080);
    let (_s, parent) = fix.make_view(100.0, 50.0);
    let (_cs, child) = fix.make_view(0.0, 0.0);
    child.set_parent(Some(&parent)).unwrap();
    child.set_position(10.0, 20.0);

    parent.update_geometry();
    child.update_geometry();

    let (x, y) = child.get_global_transform().apply_point(0.0, 0.0);
    assert_eq!((x, y), (110.0, 70.0));

    // dirtying the parent dirties the whole subtree
    parent.set_position(0.0, 0.0);
    assert!(child.is_geometry_dirty());
    child.update_geometry();
    let (x, y) = child.get_global_transform().apply_point(0.0, 0.0);
    assert_eq!((x, y), (10.0, 20.0));
}

#[test]
fn operations_on_destroyed_objects_report_gone() {
    let fix = fixture(1920, 1080);

    // a dead surface cannot get new views
    let surf = fix.f_comp.create_surface();
    surf.destroy();
    assert!(matches!(
        fix.f_comp.create_view(Some(&surf)),
        Err(SquallError::SurfaceGone)
    ));

    // a dead view cannot become a parent
    let (_s, parent) = fix.make_view(0.0, 0.0);
    let child = fix.f_comp.create_view(None).unwrap();
    parent.destroy();
    assert!(matches!(
        child.set_parent(Some(&parent)),
        Err(SquallError::ViewGone)
    ));

    // an output that was torn down refuses mode-sets, and its
    // planes refuse assignment once the output itself is gone
    let state = Rc::new(RefCell::new(TestBackendState {
        tb_modes: vec![mode(640, 480, OutputModeFlags::CURRENT)],
        ..Default::default()
    }));
    let out2 = fix.f_comp.add_output(Box::new(TestBackend { tb_state: state }));
    let plane2 = out2.add_plane(None);
    out2.destroy();
    assert!(matches!(
        out2.set_mode(&mode(640, 480, OutputModeFlags::CURRENT)),
        Err(SquallError::OutputGone)
    ));

    drop(out2);
    let (_s2, view) = fix.make_view(0.0, 0.0);
    assert!(matches!(
        view.assign_plane(&fix.f_output, &plane2),
        Err(SquallError::OutputGone)
    ));
}
