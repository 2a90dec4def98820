//! `inkcalc`: the engine behind a freehand maths canvas.
//!
//! Pointer strokes are rasterized into an RGBA surface. On submit, a snapshot
//! of the surface and the current variable bindings go to a recognition
//! service; the returned results become annotations anchored at the centre of
//! the drawn content, and assignment results update the bindings for later
//! submissions.
//!
//! The library does not initialize logging; the `inkcalc` binary does.

pub mod annotation;
pub mod bbox;
pub mod color;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod geom;
pub mod recognition;
pub mod render;
pub mod script;
pub mod session;
pub mod stroke;
pub mod tool;
pub mod variables;

pub use config::Config;
pub use error::SubmitError;
pub use geom::{BoundingBox, Point};
pub use session::Session;
