// ============================================================================
// PIXEL STREAM: a flat run of packed ARGB pixels plus its effect chain
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::ops::Effect;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique handle for a stream. Not persisted: loaded streams get
/// fresh ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl StreamId {
    pub fn next() -> Self {
        StreamId(NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PixelStream {
    #[serde(skip, default = "StreamId::next")]
    id: StreamId,
    pub title: String,
    pixels: Vec<u32>,
    original_pixels: Vec<u32>,
    pub has_alpha: bool,
    /// Offset of index 0 on the composite canvas. May be negative.
    pub pos: i64,
    /// Source dimensions. Informational only, never checked against the length.
    pub width: u32,
    pub height: u32,
    selection_start: usize,
    selection_end: usize,
    effects: Vec<Effect>,
    /// Enabled flags of `effects`, one entry per undoable action on this stream.
    #[serde(skip)]
    effect_snapshots: Vec<Vec<bool>>,
    pub visible: bool,
    #[serde(skip, default = "default_true")]
    rendered: bool,
}

impl PixelStream {
    /// Zero-filled stream of `len` pixels.
    pub fn empty(len: usize) -> Self {
        Self::build("render".to_string(), vec![0; len], true, 0, 0)
    }

    /// Stream decoded from an image file.
    pub fn from_image(
        title: impl Into<String>,
        width: u32,
        height: u32,
        has_alpha: bool,
        pixels: Vec<u32>,
    ) -> Self {
        Self::build(title.into(), pixels, has_alpha, width, height)
    }

    /// Stream of arbitrary packed data. Width and height are both the integer
    /// square root of the length.
    pub fn from_raw(title: impl Into<String>, pixels: Vec<u32>, has_alpha: bool) -> Self {
        let side = (pixels.len() as f64).sqrt() as u32;
        Self::build(title.into(), pixels, has_alpha, side, side)
    }

    fn build(title: String, pixels: Vec<u32>, has_alpha: bool, width: u32, height: u32) -> Self {
        let selection_end = pixels.len().saturating_sub(1);
        Self {
            id: StreamId::next(),
            title,
            original_pixels: pixels.clone(),
            pixels,
            has_alpha,
            pos: 0,
            width,
            height,
            selection_start: 0,
            selection_end,
            effects: Vec::new(),
            effect_snapshots: Vec::new(),
            visible: true,
            rendered: true,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u32] {
        &mut self.pixels
    }

    pub fn original_pixels(&self) -> &[u32] {
        &self.original_pixels
    }

    pub fn has_index(&self, index: i64) -> bool {
        index >= 0 && (index as u64) < self.pixels.len() as u64
    }

    pub fn pixel(&self, index: usize) -> Option<u32> {
        self.pixels.get(index).copied()
    }

    /// Overwrite one pixel. Out-of-range indices are ignored.
    pub fn set_pixel(&mut self, index: usize, pixel: u32) {
        if let Some(p) = self.pixels.get_mut(index) {
            *p = pixel;
        }
    }

    // ========================================================================
    // SELECTION
    // ========================================================================

    /// Inclusive `(start, end)` that new effects will cover.
    pub fn selection(&self) -> (usize, usize) {
        (self.selection_start, self.selection_end)
    }

    /// Normalise and store a selection. An `end` outside `[0, len-1]` becomes
    /// `len-1`; `start` is clamped to `[0, end]`.
    pub fn set_selection(&mut self, start: i64, end: i64) {
        let last = self.pixels.len().saturating_sub(1) as i64;
        let end = if end < 0 || end > last { last } else { end };
        let start = start.clamp(0, end);
        self.selection_start = start as usize;
        self.selection_end = end as usize;
    }

    /// Selected pixels, excluding the one at the end index.
    pub fn copy_range(&self) -> Vec<u32> {
        self.pixels[self.selection_start..self.selection_end].to_vec()
    }

    /// Same slice as [`copy_range`](Self::copy_range), zero-filled in place.
    pub fn cut_range(&mut self) -> Vec<u32> {
        let range = self.selection_start..self.selection_end;
        let cut = self.pixels[range.clone()].to_vec();
        self.pixels[range].fill(0);
        cut
    }

    // ========================================================================
    // EFFECT CHAIN
    // ========================================================================

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn effect(&self, index: usize) -> Option<&Effect> {
        self.effects.get(index)
    }

    pub(crate) fn push_effect(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    /// One display line per effect, oldest first.
    pub fn applied_effects(&self) -> Vec<String> {
        self.effects
            .iter()
            .map(|e| {
                if e.is_enabled() {
                    e.to_string()
                } else {
                    format!("{} (off)", e)
                }
            })
            .collect()
    }

    /// Flip one effect's enabled flag and mark the stream for replay.
    /// Returns the new state, or `None` for a bad index.
    pub fn toggle_effect(&mut self, index: usize) -> Option<bool> {
        let effect = self.effects.get_mut(index)?;
        effect.toggle_enabled();
        self.rendered = false;
        Some(effect.is_enabled())
    }

    // ========================================================================
    // UNDO SNAPSHOTS
    // ========================================================================

    /// Record the enabled flags of every effect. Call right before an undoable
    /// mutation of this stream.
    pub fn snapshot_effect_flags(&mut self) {
        let flags = self.effects.iter().map(Effect::is_enabled).collect();
        self.effect_snapshots.push(flags);
    }

    pub fn snapshot_count(&self) -> usize {
        self.effect_snapshots.len()
    }

    /// Roll the effect chain back to the last snapshot. An effect appended
    /// after the snapshot is dropped. The stream is left dirty.
    ///
    /// Panics if no snapshot exists; history and stream are out of sync.
    pub fn restore_last_snapshot(&mut self) {
        let snapshot = self
            .effect_snapshots
            .pop()
            .expect("undo requested for a stream with no effect snapshot");

        if self.effects.len() > snapshot.len() {
            self.effects.pop();
        }
        for (effect, enabled) in self.effects.iter_mut().zip(snapshot) {
            effect.set_enabled(enabled);
        }
        self.rendered = false;
    }

    // ========================================================================
    // RENDER STATE
    // ========================================================================

    /// Copy the pristine pixels back. The effect chain is untouched.
    pub fn reset_to_original(&mut self) {
        self.pixels.copy_from_slice(&self.original_pixels);
        self.rendered = false;
    }

    pub fn is_rendered(&self) -> bool {
        self.rendered
    }

    pub fn set_rendered(&mut self, rendered: bool) {
        self.rendered = rendered;
    }

    pub(crate) fn clear_snapshots(&mut self) {
        self.effect_snapshots.clear();
    }

    /// Sanity-check a deserialised stream and normalise its selection.
    pub(crate) fn check_loaded(&mut self) -> Result<(), String> {
        if self.pixels.len() != self.original_pixels.len() {
            return Err(format!(
                "stream '{}' has {} pixels but {} original pixels",
                self.title,
                self.pixels.len(),
                self.original_pixels.len()
            ));
        }
        let (start, end) = (self.selection_start as i64, self.selection_end as i64);
        self.set_selection(start, end);
        self.effect_snapshots.clear();
        self.rendered = true;
        Ok(())
    }

    /// Swap in a buffer computed off-thread. Lengths must match.
    pub(crate) fn install_pixels(&mut self, pixels: Vec<u32>) {
        assert_eq!(
            pixels.len(),
            self.original_pixels.len(),
            "background result has the wrong length"
        );
        self.pixels = pixels;
    }
}
