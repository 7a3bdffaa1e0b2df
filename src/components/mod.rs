pub mod history;

pub use history::{EffectHistory, UndoKind};
