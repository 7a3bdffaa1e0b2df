// ============================================================================
// EFFECT ENGINE: builds effects from a stream's selection and replays chains
// ============================================================================

use crate::ops::effects::{Effect, EffectError, EffectParams};
use crate::stream::PixelStream;

/// Stateless apart from the rayon switch for per-pixel effects.
#[derive(Clone, Copy, Debug)]
pub struct EffectEngine {
    parallel: bool,
}

impl Default for EffectEngine {
    fn default() -> Self {
        Self { parallel: true }
    }
}

impl EffectEngine {
    pub fn new(parallel: bool) -> Self {
        Self { parallel }
    }

    pub fn parallel(&self) -> bool {
        self.parallel
    }

    /// Validate `params` against `stream` and capture its selection as the
    /// effect range. Nothing is mutated.
    pub fn prepare(&self, stream: &PixelStream, params: EffectParams) -> Result<Effect, EffectError> {
        if stream.is_empty() {
            return Err(EffectError::EmptyStream);
        }
        params.validate()?;
        Ok(Effect::new(params, stream.selection()))
    }

    /// Run an already prepared effect and append it to the chain.
    pub fn commit(&self, stream: &mut PixelStream, effect: Effect) {
        let has_alpha = stream.has_alpha;
        effect.apply_with(stream.pixels_mut(), has_alpha, self.parallel);
        stream.push_effect(effect);
    }

    /// Build an effect over the current selection, apply it, and append it.
    pub fn apply_effect(
        &self,
        stream: &mut PixelStream,
        params: EffectParams,
    ) -> Result<(), EffectError> {
        let effect = self.prepare(stream, params)?;
        self.commit(stream, effect);
        Ok(())
    }

    /// Apply every enabled effect in chain order. Expects freshly reset pixels.
    pub fn apply_enabled_effects(&self, stream: &mut PixelStream) {
        let has_alpha = stream.has_alpha;
        // Chain is cloned out so the pixel buffer can be borrowed mutably
        let chain: Vec<Effect> = stream
            .effects()
            .iter()
            .filter(|e| e.is_enabled())
            .cloned()
            .collect();
        let pixels = stream.pixels_mut();
        for effect in &chain {
            effect.apply_with(pixels, has_alpha, self.parallel);
        }
    }

    /// Reset and replay every dirty stream, then mark it rendered. Returns the
    /// number of streams rebuilt.
    pub fn reconcile_dirty_streams<'a, I>(&self, streams: I) -> usize
    where
        I: IntoIterator<Item = &'a mut PixelStream>,
    {
        let mut rebuilt = 0;
        for stream in streams {
            if stream.is_rendered() {
                continue;
            }
            stream.reset_to_original();
            self.apply_enabled_effects(stream);
            stream.set_rendered(true);
            rebuilt += 1;
        }
        rebuilt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::effects::{BLUE_MASK, EffectKind, RED_MASK, WHOLE_PIXELS};

    fn params(kind: EffectKind, modifiers: &[i32]) -> EffectParams {
        EffectParams::from_modifiers(kind, modifiers).unwrap()
    }

    fn gradient(n: u32) -> PixelStream {
        let pixels = (0..n).map(|i| 0xFF00_0000 | i.wrapping_mul(0x0001_0307)).collect();
        PixelStream::from_image("gradient.png", n, 1, false, pixels)
    }

    #[test]
    fn apply_captures_current_selection() {
        let engine = EffectEngine::default();
        let mut s = gradient(16);
        s.set_selection(4, 7);
        engine
            .apply_effect(&mut s, params(EffectKind::Invert, &[BLUE_MASK as i32]))
            .unwrap();

        s.set_selection(0, 15);
        assert_eq!(s.effects()[0].range(), (4, 7));
        assert_eq!(s.pixel(3), s.original_pixels().get(3).copied());
        assert_ne!(s.pixel(4), s.original_pixels().get(4).copied());
    }

    #[test]
    fn replay_reproduces_sequential_application() {
        let engine = EffectEngine::new(false);
        let mut s = gradient(64);
        engine.apply_effect(&mut s, params(EffectKind::BitShift, &[24, 5])).unwrap();
        s.set_selection(10, 40);
        engine.apply_effect(&mut s, params(EffectKind::Shuffle, &[WHOLE_PIXELS])).unwrap();
        engine.apply_effect(&mut s, params(EffectKind::Smear, &[4, 6])).unwrap();
        s.set_selection(0, 63);
        engine.apply_effect(&mut s, params(EffectKind::Sort, &[RED_MASK as i32])).unwrap();
        let expected = s.pixels().to_vec();

        s.reset_to_original();
        engine.apply_enabled_effects(&mut s);
        assert_eq!(s.pixels(), expected.as_slice());
    }

    #[test]
    fn disabled_effects_are_skipped_on_replay() {
        let engine = EffectEngine::default();
        let mut s = gradient(8);
        engine.apply_effect(&mut s, params(EffectKind::Invert, &[0xFF])).unwrap();
        s.toggle_effect(0);

        let rebuilt = engine.reconcile_dirty_streams(std::iter::once(&mut s));
        assert_eq!(rebuilt, 1);
        assert!(s.is_rendered());
        assert_eq!(s.pixels(), s.original_pixels());
    }

    #[test]
    fn clean_streams_are_left_alone() {
        let engine = EffectEngine::default();
        let mut s = gradient(8);
        s.set_pixel(0, 1234);
        assert_eq!(engine.reconcile_dirty_streams([&mut s]), 0);
        assert_eq!(s.pixel(0), Some(1234));
    }

    #[test]
    fn rejected_effect_leaves_stream_untouched() {
        let engine = EffectEngine::default();
        let mut s = gradient(8);
        let bad = EffectParams::Invert { masks: vec![0] };
        assert_eq!(engine.apply_effect(&mut s, bad), Err(EffectError::NoChannels));
        assert!(s.effects().is_empty());
        assert_eq!(s.pixels(), s.original_pixels());

        let mut empty = PixelStream::empty(0);
        assert_eq!(
            engine.apply_effect(&mut empty, params(EffectKind::Invert, &[0xFF])),
            Err(EffectError::EmptyStream)
        );
    }
}
