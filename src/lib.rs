// Squall - a Wayland compositor core
//
// This library owns the compositor's scene graph and presentation
// pipeline: double-buffered surface state, views stacked in layers,
// per-output planes with damage tracking, and the frame scheduler
// that couples them to vertical refresh. Renderers, display
// hardware backends, and the wire protocol live behind the traits
// in `output`, `buffer`, `surface` and `input`.
//
// Austin Shafer - 2024
#![allow(non_camel_case_types)]
#[macro_use]
extern crate bitflags;
extern crate cgmath;
extern crate thiserror;
extern crate utils;

pub mod buffer;
pub mod compositor;
pub mod input;
pub mod layer;
pub mod matrix;
pub mod object;
pub mod output;
pub mod plane;
pub mod signal;
pub mod surface;
pub mod view;

#[cfg(test)]
mod tests;

pub use buffer::{Buffer, BufferResource};
pub use compositor::{Compositor, EventHookId};
pub use input::{
    InputEvent, InputEventKind, Keyboard, KeyboardResource, Modifiers, Pointer, PointerResource,
    Seat, SeatCapabilities, Touch, TouchResource,
};
pub use layer::Layer;
pub use matrix::{OutputTransform, Transform, TransformKind};
pub use object::{ObjectType, UserDataMap};
pub use output::{
    Output, OutputBackend, OutputGeometry, OutputMode, OutputModeFlags, SubpixelOrder,
};
pub use plane::{Plane, RenderItem};
pub use signal::{Listener, Signal};
pub use surface::{FrameCallback, Surface};
pub use utils::region::{Rect, Region};
pub use view::View;

use thiserror::Error;

/// Errors a client request can provoke
///
/// The wire layer posts these on the offending client resource and
/// disconnects the client; core state is unaffected.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The client sent a buffer transform outside the eight symmetries
    #[error("invalid buffer transform value: {0}")]
    InvalidTransform(i32),
    /// The client sent a buffer scale below one
    #[error("invalid buffer scale value (should be >= 1): {0}")]
    InvalidScale(i32),
    /// A role can be assigned to a surface only once
    #[error("surface already has role {0}")]
    RoleTaken(String),
}

/// Library error taxonomy
///
/// Protocol errors belong to a misbehaving client; the rest are for
/// the embedding server and its backends.
#[derive(Error, Debug)]
pub enum SquallError {
    /// A client request broke the protocol
    #[error("client protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// The backend rejected the requested mode
    #[error("output backend rejected mode {0}x{1}")]
    BadMode(i32, i32),
    /// A handle named an output that has been destroyed
    #[error("output is gone")]
    OutputGone,
    /// A handle named a surface that has been destroyed
    #[error("surface is gone")]
    SurfaceGone,
    /// A handle named a view that has been destroyed
    #[error("view is gone")]
    ViewGone,
}

pub type Result<T> = std::result::Result<T, SquallError>;
