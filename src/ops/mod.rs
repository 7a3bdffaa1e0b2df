pub mod effects;
pub mod engine;

pub use effects::{ChannelSelection, Effect, EffectError, EffectKind, EffectParams};
pub use engine::EffectEngine;
