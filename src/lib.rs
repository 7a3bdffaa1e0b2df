//! Glitchy: a layered glitch-art editor core.
//!
//! Images and raw byte dumps become [`stream::PixelStream`] layers. Effects
//! rewrite pixel ranges, the compositor merges the layers into one canvas and
//! [`components::history`] keeps the undo stack. [`project::Project`] ties
//! these together into the session operations the CLI drives.

pub mod logger;

pub mod canvas;
pub mod cli;
pub mod components;
pub mod io;
pub mod ops;
pub mod project;
pub mod settings;
pub mod stream;
pub mod worker;

pub use canvas::{CanvasState, Compositor, RenderProperties, RenderType};
pub use components::{EffectHistory, UndoKind};
pub use ops::{ChannelSelection, Effect, EffectEngine, EffectError, EffectKind, EffectParams};
pub use project::Project;
pub use stream::{PixelStream, StreamId};
