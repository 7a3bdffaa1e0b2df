// ============================================================================
// CANVAS: ordered layer set and the composite renderer
// ============================================================================
//
// Layers are pixel streams laid end to end on a flat canvas of
// `width * height` pixels. Each stream starts at its own signed offset; the
// compositor folds every visible stream into one output buffer with the
// selected merge operator, oldest layer first.
// ============================================================================

use std::fmt;

use image::RgbaImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::ops::{EffectEngine, EffectError, EffectParams};
use crate::stream::{PixelStream, StreamId};

/// Output pixels handled per rayon task.
const COMPOSITE_CHUNK: usize = 1 << 14;

// ============================================================================
// RENDER PROPERTIES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RenderType {
    #[default]
    Sum,
    Or,
    Difference,
    Average,
}

impl RenderType {
    pub fn all() -> &'static [RenderType] {
        &[
            RenderType::Sum,
            RenderType::Or,
            RenderType::Difference,
            RenderType::Average,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            RenderType::Sum => "Sum",
            RenderType::Or => "OR",
            RenderType::Difference => "Difference",
            RenderType::Average => "Average",
        }
    }

    /// Boundary encoding: 0 = Sum, 1 = Or, 2 = Difference, 3 = Average.
    pub fn code(&self) -> u32 {
        match self {
            RenderType::Sum => 0,
            RenderType::Or => 1,
            RenderType::Difference => 2,
            RenderType::Average => 3,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        RenderType::all().get(code as usize).copied()
    }

    /// Name for a boundary code, empty for unknown codes.
    pub fn name_for_code(code: u32) -> &'static str {
        RenderType::from_code(code).map_or("", |rt| rt.name())
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "sum" => Some(RenderType::Sum),
            "or" => Some(RenderType::Or),
            "difference" | "diff" | "xor" => Some(RenderType::Difference),
            "average" | "avg" => Some(RenderType::Average),
            _ => None,
        }
    }

    /// Merge an incoming layer pixel onto the accumulated value.
    pub fn merge(&self, incoming: u32, acc: u32, incoming_has_alpha: bool) -> u32 {
        let opaque = if incoming_has_alpha { 0 } else { 0xFF00_0000 };
        match self {
            // Channel overflow carries on purpose
            RenderType::Sum => incoming.wrapping_add(acc) | opaque,
            RenderType::Or => incoming | acc,
            RenderType::Difference => (incoming ^ acc) | opaque,
            RenderType::Average => average(incoming, acc),
        }
    }
}

impl fmt::Display for RenderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-channel mean. A pixel with zero alpha counts as absent.
fn average(p1: u32, p2: u32) -> u32 {
    if p1 >> 24 == 0 {
        return p2;
    }
    if p2 >> 24 == 0 {
        return p1;
    }
    let mut merged = 0;
    for shift in [24, 16, 8, 0] {
        let c1 = (p1 >> shift) & 0xFF;
        let c2 = (p2 >> shift) & 0xFF;
        merged |= ((c1 + c2) / 2) << shift;
    }
    merged
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RenderProperties {
    pub width: u32,
    pub height: u32,
    pub render_type: RenderType,
}

impl RenderProperties {
    pub fn new(width: u32, height: u32, render_type: RenderType) -> Self {
        Self {
            width,
            height,
            render_type,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Set fields from boundary values. `0` for a dimension and any code
    /// above 3 mean "leave unchanged".
    pub fn apply(&mut self, width: u32, height: u32, render_type_code: u32) {
        if width != 0 {
            self.width = width;
        }
        if height != 0 {
            self.height = height;
        }
        if let Some(rt) = RenderType::from_code(render_type_code) {
            self.render_type = rt;
        }
    }
}

// ============================================================================
// COMPOSITOR
// ============================================================================

/// Owns the composite buffer between renders so repeated renders at the same
/// size do not reallocate.
#[derive(Debug, Default)]
pub struct Compositor {
    buffer: Vec<u32>,
    parallel: bool,
}

impl Compositor {
    pub fn new(parallel: bool) -> Self {
        Self {
            buffer: Vec::new(),
            parallel,
        }
    }

    /// Merge all visible streams onto a zeroed `width * height` buffer.
    pub fn render(&mut self, streams: &[PixelStream], props: &RenderProperties) -> &[u32] {
        let len = props.pixel_count();
        self.buffer.clear();
        self.buffer.resize(len, 0);

        let rt = props.render_type;
        if self.parallel && len > COMPOSITE_CHUNK {
            // Each chunk folds every stream in order, so the result matches
            // the sequential merge exactly.
            self.buffer
                .par_chunks_mut(COMPOSITE_CHUNK)
                .enumerate()
                .for_each(|(i, chunk)| merge_into(chunk, i * COMPOSITE_CHUNK, streams, rt));
        } else {
            merge_into(&mut self.buffer, 0, streams, rt);
        }
        &self.buffer
    }

}

/// Merge the part of every visible stream that lands on
/// `[base, base + out.len())`.
fn merge_into(out: &mut [u32], base: usize, streams: &[PixelStream], rt: RenderType) {
    let base = base as i64;
    let end = base + out.len() as i64;

    for stream in streams.iter().filter(|s| s.visible) {
        let pixels = stream.pixels();
        // Stream indices whose canvas position falls inside this chunk
        let first = (base - stream.pos).max(0);
        let last = (end - stream.pos).min(pixels.len() as i64);
        if first >= last {
            continue;
        }
        for i in first..last {
            let target = (i + stream.pos - base) as usize;
            out[target] = rt.merge(pixels[i as usize], out[target], stream.has_alpha);
        }
    }
}

/// Convert packed ARGB to an RGBA image. Returns `None` if the buffer does not
/// hold `width * height` pixels.
pub fn to_rgba_image(pixels: &[u32], width: u32, height: u32) -> Option<RgbaImage> {
    if pixels.len() != width as usize * height as usize {
        return None;
    }
    let mut raw = Vec::with_capacity(pixels.len() * 4);
    for &p in pixels {
        let [a, r, g, b] = p.to_be_bytes();
        raw.extend_from_slice(&[r, g, b, a]);
    }
    RgbaImage::from_raw(width, height, raw)
}

// ============================================================================
// CANVAS STATE
// ============================================================================

/// Ordered layer set with the engine and compositor that work on it.
#[derive(Debug, Default)]
pub struct CanvasState {
    streams: Vec<PixelStream>,
    engine: EffectEngine,
    compositor: Compositor,
}

impl CanvasState {
    pub fn new(parallel: bool) -> Self {
        Self {
            streams: Vec::new(),
            engine: EffectEngine::new(parallel),
            compositor: Compositor::new(parallel),
        }
    }

    pub fn engine(&self) -> &EffectEngine {
        &self.engine
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn streams(&self) -> &[PixelStream] {
        &self.streams
    }

    pub fn streams_mut(&mut self) -> &mut [PixelStream] {
        &mut self.streams
    }

    pub fn ids(&self) -> Vec<StreamId> {
        self.streams.iter().map(PixelStream::id).collect()
    }

    pub fn stream(&self, id: StreamId) -> Option<&PixelStream> {
        self.streams.iter().find(|s| s.id() == id)
    }

    pub fn stream_mut(&mut self, id: StreamId) -> Option<&mut PixelStream> {
        self.streams.iter_mut().find(|s| s.id() == id)
    }

    pub fn add_stream(&mut self, stream: PixelStream) -> StreamId {
        let id = stream.id();
        self.streams.push(stream);
        id
    }

    pub fn add_image(
        &mut self,
        title: impl Into<String>,
        width: u32,
        height: u32,
        has_alpha: bool,
        pixels: Vec<u32>,
    ) -> StreamId {
        self.add_stream(PixelStream::from_image(title, width, height, has_alpha, pixels))
    }

    pub fn add_raw(&mut self, title: impl Into<String>, pixels: Vec<u32>, has_alpha: bool) -> StreamId {
        self.add_stream(PixelStream::from_raw(title, pixels, has_alpha))
    }

    pub fn remove_stream(&mut self, id: StreamId) -> Option<PixelStream> {
        let index = self.streams.iter().position(|s| s.id() == id)?;
        Some(self.streams.remove(index))
    }

    /// Replace the whole layer set, e.g. after loading a project.
    pub fn set_streams(&mut self, streams: Vec<PixelStream>) {
        self.streams = streams;
    }

    pub fn clear(&mut self) {
        self.streams.clear();
    }

    /// Apply an effect to one stream's current selection.
    pub fn apply_effect(&mut self, id: StreamId, params: EffectParams) -> Result<(), EffectError> {
        let engine = self.engine;
        let stream = self.stream_mut(id).ok_or(EffectError::UnknownStream(id))?;
        engine.apply_effect(stream, params)
    }

    /// Rebuild every stream marked dirty. Returns how many were rebuilt.
    pub fn reconcile_dirty_streams(&mut self) -> usize {
        self.engine.reconcile_dirty_streams(self.streams.iter_mut())
    }

    pub fn render(&mut self, props: &RenderProperties) -> &[u32] {
        self.compositor.render(&self.streams, props)
    }

    /// Duplicate the source selection (end excluded) into a new layer.
    pub fn copy_selection_to_new_layer(&mut self, source: StreamId) -> Option<StreamId> {
        let pixels = self.stream(source)?.copy_range();
        self.add_selection_layer(source, pixels)
    }

    /// Like [`copy_selection_to_new_layer`](Self::copy_selection_to_new_layer),
    /// but zeroes the copied pixels in the source.
    pub fn cut_selection_to_new_layer(&mut self, source: StreamId) -> Option<StreamId> {
        let pixels = self.stream_mut(source)?.cut_range();
        self.add_selection_layer(source, pixels)
    }

    fn add_selection_layer(&mut self, source: StreamId, pixels: Vec<u32>) -> Option<StreamId> {
        let src = self.stream(source)?;
        let title = format!("Layer {}", self.streams.len() + 1);
        let (selection_start, _) = src.selection();
        let pos = src.pos + selection_start as i64;
        let width = src.width;
        let has_alpha = src.has_alpha;

        let height = if width == 0 {
            0
        } else {
            (pixels.len() / width as usize) as u32
        };

        let mut layer = PixelStream::from_raw(title, pixels, has_alpha);
        layer.pos = pos;
        layer.width = width;
        layer.height = height;
        Some(self.add_stream(layer))
    }
}
