// ============================================================================
// GLITCH EFFECTS: range-bounded bitwise transforms over packed ARGB pixels
// ============================================================================
//
// Every effect mutates `pixels[start..=end]` of a stream in place. The range is
// captured from the stream's selection when the effect is created and never
// changes afterwards, so an effect can be replayed on a freshly reset buffer.
//
// Effects:
//   - BitShift: circular shift of the whole bit stream
//   - Invert:   XOR with a channel mask
//   - Reorder:  move channels between ARGB slots
//   - Shuffle:  Durstenfeld shuffle of pixels or individual channels
//   - Smear:    reverb-like fade of previous pixels into the current one
//   - Sort:     sort pixels or individual channels
//
// Invert and Reorder are per-pixel and run on rayon above a size threshold.
// BitShift and Smear depend on neighbouring pixels and stay sequential.
// ============================================================================

use std::fmt;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::stream::StreamId;

// ============================================================================
// CHANNEL MASKS
// ============================================================================

pub const ALPHA_MASK: u32 = 0xFF00_0000;
pub const RED_MASK: u32 = 0x00FF_0000;
pub const GREEN_MASK: u32 = 0x0000_FF00;
pub const BLUE_MASK: u32 = 0x0000_00FF;

/// Channel masks in slot order `[A, R, G, B]`.
pub const CHANNEL_MASKS: [u32; 4] = [ALPHA_MASK, RED_MASK, GREEN_MASK, BLUE_MASK];

/// Modifier value that selects whole pixels instead of channels.
pub const WHOLE_PIXELS: i32 = -1;

/// Below this many pixels the per-pixel effects skip rayon.
const PARALLEL_THRESHOLD: usize = 1 << 16;

/// Bit offset of a channel mask inside a packed pixel. Unknown masks map to 0.
pub fn channel_shift(mask: u32) -> u32 {
    match mask {
        ALPHA_MASK => 24,
        RED_MASK => 16,
        GREEN_MASK => 8,
        _ => 0,
    }
}

/// Short channel labels for display, e.g. `"A G "`.
pub fn channel_names(masks: &[u32]) -> String {
    let mut names = String::new();
    for &mask in masks {
        match mask {
            ALPHA_MASK => names.push_str("A "),
            RED_MASK => names.push_str("R "),
            GREEN_MASK => names.push_str("G "),
            BLUE_MASK => names.push_str("B "),
            _ => {}
        }
    }
    names
}

fn is_channel_mask(mask: u32) -> bool {
    CHANNEL_MASKS.contains(&mask)
}

// ============================================================================
// ERRORS
// ============================================================================

/// Reasons an effect request is refused. Nothing is recorded or mutated when
/// one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectError {
    /// The target stream has no pixels.
    EmptyStream,
    /// No channel was selected.
    NoChannels,
    /// A modifier that should be a channel mask is not one.
    InvalidChannelMask(u32),
    /// BitShift by zero bits.
    ZeroShift,
    /// BitShift parameters outside `1 <= shift <= affected_bits <= 32`.
    InvalidShift { affected_bits: i32, shift: i32 },
    /// Any other malformed modifier list.
    InvalidModifiers(String),
    /// No stream with this id in the canvas.
    UnknownStream(StreamId),
    /// The stream already has an effect job in flight.
    StreamBusy(StreamId),
}

impl fmt::Display for EffectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectError::EmptyStream => write!(f, "stream has no pixels"),
            EffectError::NoChannels => write!(f, "no channels selected"),
            EffectError::InvalidChannelMask(m) => write!(f, "not a channel mask: {:#010x}", m),
            EffectError::ZeroShift => write!(f, "shift amount must not be zero"),
            EffectError::InvalidShift { affected_bits, shift } => write!(
                f,
                "invalid bit shift: {} bits over a {}-bit domain",
                shift, affected_bits
            ),
            EffectError::InvalidModifiers(e) => write!(f, "invalid modifiers: {}", e),
            EffectError::UnknownStream(id) => write!(f, "unknown stream {}", id),
            EffectError::StreamBusy(id) => write!(f, "stream {} is busy", id),
        }
    }
}

impl std::error::Error for EffectError {}

// ============================================================================
// EFFECT KIND & PARAMETERS
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectKind {
    BitShift,
    Invert,
    Reorder,
    Shuffle,
    Smear,
    Sort,
}

impl EffectKind {
    pub fn all() -> &'static [EffectKind] {
        &[
            EffectKind::BitShift,
            EffectKind::Invert,
            EffectKind::Reorder,
            EffectKind::Shuffle,
            EffectKind::Smear,
            EffectKind::Sort,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            EffectKind::BitShift => "Bitshift",
            EffectKind::Invert => "Invert",
            EffectKind::Reorder => "Reorder",
            EffectKind::Shuffle => "Shuffle",
            EffectKind::Smear => "Smear",
            EffectKind::Sort => "Sort",
        }
    }

    /// Case-insensitive lookup used by the CLI.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "bitshift" | "shift" => Some(EffectKind::BitShift),
            "invert" => Some(EffectKind::Invert),
            "reorder" => Some(EffectKind::Reorder),
            "shuffle" => Some(EffectKind::Shuffle),
            "smear" => Some(EffectKind::Smear),
            "sort" => Some(EffectKind::Sort),
            _ => None,
        }
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whole pixels, or a list of channel masks handled independently.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelSelection {
    Whole,
    Channels(Vec<u32>),
}

impl ChannelSelection {
    fn from_modifiers(modifiers: &[i32]) -> Result<Self, EffectError> {
        match modifiers.first() {
            None => Err(EffectError::NoChannels),
            Some(&WHOLE_PIXELS) => Ok(ChannelSelection::Whole),
            Some(_) => {
                let masks: Vec<u32> = modifiers.iter().map(|&m| m as u32).collect();
                if let Some(&bad) = masks.iter().find(|&&m| !is_channel_mask(m)) {
                    return Err(EffectError::InvalidChannelMask(bad));
                }
                Ok(ChannelSelection::Channels(masks))
            }
        }
    }

    fn label(&self) -> String {
        match self {
            ChannelSelection::Whole => "pixels".to_string(),
            ChannelSelection::Channels(masks) => channel_names(masks).trim_end().to_string(),
        }
    }
}

/// Typed parameters, one variant per effect kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectParams {
    /// Circular shift of `shift` bits over an `affected_bits`-wide pixel domain.
    BitShift { affected_bits: u32, shift: u32 },
    /// Channel masks XOR-ed into every pixel.
    Invert { masks: Vec<u32> },
    /// `targets[slot]` is the channel that ends up in slot `[A, R, G, B][slot]`.
    Reorder { targets: [u32; 4] },
    /// `seed` makes replays produce the same permutation.
    Shuffle { selection: ChannelSelection, seed: u64 },
    /// Kernel length in pixels and intensity in tenths (0..=10).
    Smear { length: usize, intensity: i32 },
    Sort { selection: ChannelSelection },
}

impl EffectParams {
    pub fn kind(&self) -> EffectKind {
        match self {
            EffectParams::BitShift { .. } => EffectKind::BitShift,
            EffectParams::Invert { .. } => EffectKind::Invert,
            EffectParams::Reorder { .. } => EffectKind::Reorder,
            EffectParams::Shuffle { .. } => EffectKind::Shuffle,
            EffectParams::Smear { .. } => EffectKind::Smear,
            EffectParams::Sort { .. } => EffectKind::Sort,
        }
    }

    /// Decode the flat `i32` modifier encoding used at the presentation
    /// boundary. Shuffle gets a fresh random seed.
    pub fn from_modifiers(kind: EffectKind, modifiers: &[i32]) -> Result<Self, EffectError> {
        let params = match kind {
            EffectKind::BitShift => {
                let [affected_bits, shift] = take_two(modifiers, "bitshift needs [bits, shift]")?;
                if shift == 0 {
                    return Err(EffectError::ZeroShift);
                }
                if !(1..=32).contains(&affected_bits) || shift < 0 || shift > affected_bits {
                    return Err(EffectError::InvalidShift { affected_bits, shift });
                }
                EffectParams::BitShift {
                    affected_bits: affected_bits as u32,
                    shift: shift as u32,
                }
            }
            EffectKind::Invert => EffectParams::Invert {
                masks: modifiers.iter().map(|&m| m as u32).collect(),
            },
            EffectKind::Reorder => {
                let targets: [u32; 4] = modifiers
                    .iter()
                    .map(|&m| m as u32)
                    .collect::<Vec<_>>()
                    .try_into()
                    .map_err(|_| {
                        EffectError::InvalidModifiers("reorder needs four channel masks".into())
                    })?;
                EffectParams::Reorder { targets }
            }
            EffectKind::Shuffle => EffectParams::Shuffle {
                selection: ChannelSelection::from_modifiers(modifiers)?,
                seed: rand::random(),
            },
            EffectKind::Smear => {
                let [length, intensity] = take_two(modifiers, "smear needs [length, intensity]")?;
                if length < 1 {
                    return Err(EffectError::InvalidModifiers(format!(
                        "smear length must be positive, got {}",
                        length
                    )));
                }
                EffectParams::Smear {
                    length: length as usize,
                    intensity,
                }
            }
            EffectKind::Sort => EffectParams::Sort {
                selection: ChannelSelection::from_modifiers(modifiers)?,
            },
        };
        params.validate()?;
        Ok(params)
    }

    /// Reject parameter sets that would select nothing or are out of domain.
    pub fn validate(&self) -> Result<(), EffectError> {
        match self {
            EffectParams::BitShift { affected_bits, shift } => {
                if *shift == 0 {
                    return Err(EffectError::ZeroShift);
                }
                if !(1..=32).contains(affected_bits) || shift > affected_bits {
                    return Err(EffectError::InvalidShift {
                        affected_bits: *affected_bits as i32,
                        shift: *shift as i32,
                    });
                }
            }
            EffectParams::Invert { masks } => {
                if masks.iter().fold(0, |acc, m| acc | m) == 0 {
                    return Err(EffectError::NoChannels);
                }
            }
            EffectParams::Reorder { targets } => {
                if let Some(&bad) = targets.iter().find(|&&m| !is_channel_mask(m)) {
                    return Err(EffectError::InvalidChannelMask(bad));
                }
                for (i, t) in targets.iter().enumerate() {
                    if targets[i + 1..].contains(t) {
                        return Err(EffectError::InvalidModifiers(
                            "reorder targets must be a permutation of A, R, G, B".into(),
                        ));
                    }
                }
            }
            EffectParams::Shuffle { selection, .. } | EffectParams::Sort { selection } => {
                if let ChannelSelection::Channels(masks) = selection {
                    if masks.is_empty() {
                        return Err(EffectError::NoChannels);
                    }
                    if let Some(&bad) = masks.iter().find(|&&m| !is_channel_mask(m)) {
                        return Err(EffectError::InvalidChannelMask(bad));
                    }
                }
            }
            EffectParams::Smear { length, intensity } => {
                if *length == 0 {
                    return Err(EffectError::InvalidModifiers("smear length is zero".into()));
                }
                if !(0..=10).contains(intensity) {
                    return Err(EffectError::InvalidModifiers(format!(
                        "smear intensity must be within 0..=10, got {}",
                        intensity
                    )));
                }
            }
        }
        Ok(())
    }
}

fn take_two(modifiers: &[i32], msg: &str) -> Result<[i32; 2], EffectError> {
    match modifiers {
        [a, b, ..] => Ok([*a, *b]),
        _ => Err(EffectError::InvalidModifiers(msg.to_string())),
    }
}

// ============================================================================
// EFFECT
// ============================================================================

/// One entry of a stream's effect chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Effect {
    params: EffectParams,
    /// Inclusive index bounds.
    range: (usize, usize),
    enabled: bool,
}

impl Effect {
    pub fn new(params: EffectParams, range: (usize, usize)) -> Self {
        Self {
            params,
            range,
            enabled: true,
        }
    }

    pub fn kind(&self) -> EffectKind {
        self.params.kind()
    }

    pub fn params(&self) -> &EffectParams {
        &self.params
    }

    pub fn range(&self) -> (usize, usize) {
        self.range
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn toggle_enabled(&mut self) {
        self.enabled = !self.enabled;
    }

    /// One-line description for effect lists, e.g. `Sort (R B) 0..=99`.
    pub fn describe(&self) -> String {
        let detail = match &self.params {
            EffectParams::BitShift { affected_bits, shift } => {
                format!("{} of {} bits", shift, affected_bits)
            }
            EffectParams::Invert { masks } => channel_names(masks).trim_end().to_string(),
            EffectParams::Reorder { targets } => channel_names(targets).trim_end().to_string(),
            EffectParams::Shuffle { selection, .. } | EffectParams::Sort { selection } => {
                selection.label()
            }
            EffectParams::Smear { length, intensity } => {
                format!("length {}, intensity {}%", length, intensity * 10)
            }
        };
        let state = if self.enabled { "" } else { " [disabled]" };
        format!(
            "{} ({}) {}..={}{}",
            self.kind().name(),
            detail,
            self.range.0,
            self.range.1,
            state
        )
    }

    /// Apply to `pixels`. Ranges reaching past the buffer are clipped.
    pub fn apply(&self, pixels: &mut [u32], has_alpha: bool) {
        self.apply_with(pixels, has_alpha, true)
    }

    /// Like [`apply`](Self::apply); `parallel` lets the per-pixel effects use rayon.
    pub fn apply_with(&self, pixels: &mut [u32], has_alpha: bool, parallel: bool) {
        let Some((start, end)) = clip_range(self.range, pixels.len()) else {
            return;
        };

        match &self.params {
            EffectParams::BitShift { affected_bits, shift } => {
                bit_shift(pixels, start, end, has_alpha, *affected_bits, *shift)
            }
            EffectParams::Invert { masks } => {
                let mask = masks.iter().fold(0, |acc, m| acc | m);
                invert(&mut pixels[start..=end], mask, parallel)
            }
            EffectParams::Reorder { targets } => {
                reorder(&mut pixels[start..=end], targets, parallel)
            }
            EffectParams::Shuffle { selection, seed } => {
                let mut rng = Xoshiro256StarStar::seed_from_u64(*seed);
                shuffle(&mut pixels[start..=end], selection, &mut rng)
            }
            EffectParams::Smear { length, intensity } => {
                let kernel = smear_kernel(*length, *intensity);
                smear(&mut pixels[start..=end], &kernel)
            }
            EffectParams::Sort { selection } => sort(&mut pixels[start..=end], selection),
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind().name())
    }
}

fn clip_range((start, end): (usize, usize), len: usize) -> Option<(usize, usize)> {
    if len == 0 || start >= len {
        return None;
    }
    let end = end.min(len - 1);
    (start <= end).then_some((start, end))
}

// ============================================================================
// BITSHIFT
// ============================================================================

fn low_bits(count: u32) -> u32 {
    if count >= 32 { u32::MAX } else { (1u32 << count) - 1 }
}

/// Right-rotates the bit stream formed by the pixels in the range. The bits
/// shifted out of a pixel enter the top of the next one; the first pixel
/// receives the low bits of the last pixel of the whole buffer.
///
/// Without native alpha the alpha byte is XOR-ed away before shifting and
/// forced back to 0xFF afterwards.
fn bit_shift(
    pixels: &mut [u32],
    start: usize,
    end: usize,
    has_alpha: bool,
    affected_bits: u32,
    shift: u32,
) {
    let alpha_channel = if has_alpha { 0 } else { ALPHA_MASK };
    let mask = low_bits(shift);
    let carry_shift = affected_bits - shift;

    let mut carried = pixels[pixels.len() - 1] & mask;

    for px in &mut pixels[start..=end] {
        let p = *px ^ alpha_channel;
        let remainder = p & mask;
        *px = alpha_channel
            | p.checked_shr(shift).unwrap_or(0)
            | carried.checked_shl(carry_shift).unwrap_or(0);
        carried = remainder;
    }
}

// ============================================================================
// INVERT & REORDER
// ============================================================================

fn invert(pixels: &mut [u32], mask: u32, parallel: bool) {
    if parallel && pixels.len() >= PARALLEL_THRESHOLD {
        pixels.par_iter_mut().for_each(|p| *p ^= mask);
    } else {
        pixels.iter_mut().for_each(|p| *p ^= mask);
    }
}

fn reorder_pixel(pixel: u32, targets: &[u32; 4]) -> u32 {
    let mut reordered = pixel;
    for (&source, &target) in CHANNEL_MASKS.iter().zip(targets) {
        if source == target {
            continue;
        }
        let channel = pixel & target;
        let distance = channel_shift(target) as i32 - channel_shift(source) as i32;
        let moved = if distance < 0 {
            channel << distance.unsigned_abs()
        } else {
            channel >> distance
        };
        reordered = (reordered & !source) | moved;
    }
    reordered
}

fn reorder(pixels: &mut [u32], targets: &[u32; 4], parallel: bool) {
    if *targets == CHANNEL_MASKS {
        return;
    }
    if parallel && pixels.len() >= PARALLEL_THRESHOLD {
        pixels
            .par_iter_mut()
            .for_each(|p| *p = reorder_pixel(*p, targets));
    } else {
        pixels.iter_mut().for_each(|p| *p = reorder_pixel(*p, targets));
    }
}

// ============================================================================
// SHUFFLE
// ============================================================================

/// Durstenfeld shuffle: walk from the top, swap with a random lower-or-equal index.
fn durstenfeld<T, R: Rng>(values: &mut [T], rng: &mut R) {
    for i in (0..values.len()).rev() {
        let j = rng.random_range(0..=i);
        values.swap(i, j);
    }
}

fn shuffle<R: Rng>(pixels: &mut [u32], selection: &ChannelSelection, rng: &mut R) {
    match selection {
        ChannelSelection::Whole => durstenfeld(pixels, rng),
        ChannelSelection::Channels(masks) => {
            for &mask in masks {
                let mut channels: Vec<u32> = pixels.iter().map(|p| p & mask).collect();
                durstenfeld(&mut channels, rng);
                for (p, c) in pixels.iter_mut().zip(channels) {
                    *p = (*p & !mask) | c;
                }
            }
        }
    }
}

// ============================================================================
// SMEAR
// ============================================================================

/// `length` rows of 256 precomputed intensity-scaled byte values. Row 0 stays
/// zero; intensity falls off linearly from row 1 onward.
fn smear_kernel(length: usize, intensity: i32) -> Vec<[u32; 256]> {
    let mut kernel = vec![[0u32; 256]; length];
    let mut intensity = f64::from(intensity) / 10.0;
    let fall_off = intensity / length as f64;

    for row in kernel.iter_mut().skip(1) {
        for (j, value) in row.iter_mut().enumerate() {
            *value = (j as f64 * intensity) as u32;
        }
        intensity -= fall_off;
    }
    kernel
}

/// Each pixel is OR-ed with the OR of its predecessors' scaled channels.
/// Reads come from the unmodified range so earlier writes do not feed back.
fn smear(pixels: &mut [u32], kernel: &[[u32; 256]]) {
    let source = pixels.to_vec();

    for (pi, &original) in source.iter().enumerate() {
        // Already white, nothing can be added
        if original == 0xFFFF_FFFF {
            continue;
        }

        let (mut a, mut r, mut g, mut b) = (0u32, 0u32, 0u32, 0u32);
        for (ki, intensities) in kernel.iter().enumerate().skip(1) {
            if ki > pi {
                break;
            }
            let p = source[pi - ki];
            a |= intensities[((p >> 24) & 0xFF) as usize];
            r |= intensities[((p >> 16) & 0xFF) as usize];
            g |= intensities[((p >> 8) & 0xFF) as usize];
            b |= intensities[(p & 0xFF) as usize];
        }

        pixels[pi] |= (a << 24) | (r << 16) | (g << 8) | b;
    }
}

// ============================================================================
// SORT
// ============================================================================

/// Sorting follows signed 32-bit order, so pixels with the top alpha bit set
/// come first.
fn sort(pixels: &mut [u32], selection: &ChannelSelection) {
    match selection {
        ChannelSelection::Whole => pixels.sort_unstable_by_key(|&p| p as i32),
        ChannelSelection::Channels(masks) => {
            for &mask in masks {
                let mut values: Vec<u32> = pixels.iter().map(|p| p & mask).collect();
                values.sort_unstable_by_key(|&v| v as i32);
                for (p, v) in pixels.iter_mut().zip(values) {
                    *p = (*p & !mask) | v;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn effect(kind: EffectKind, modifiers: &[i32], range: (usize, usize)) -> Effect {
        Effect::new(EffectParams::from_modifiers(kind, modifiers).unwrap(), range)
    }

    fn sorted(mut v: Vec<u32>) -> Vec<u32> {
        v.sort_unstable();
        v
    }

    #[test]
    fn invert_blue_channel_example() {
        let mut px = vec![0x11223344, 0x55667788, 0x99AABBCC, 0xDDEEFF00];
        effect(EffectKind::Invert, &[0xFF], (0, 3)).apply(&mut px, false);
        assert_eq!(px, vec![0x112233BB, 0x55667777, 0x99AABB33, 0xDDEEFFFF]);
    }

    #[test]
    fn invert_twice_is_identity() {
        let original = vec![0xFF102030, 0x00ABCDEF, 0x12345678];
        let mut px = original.clone();
        let fx = effect(EffectKind::Invert, &[ALPHA_MASK as i32, RED_MASK as i32], (0, 2));
        fx.apply(&mut px, true);
        assert_ne!(px, original);
        fx.apply(&mut px, true);
        assert_eq!(px, original);
    }

    #[test]
    fn invert_respects_range() {
        let mut px = vec![0, 0, 0, 0];
        effect(EffectKind::Invert, &[0xFF], (1, 2)).apply(&mut px, true);
        assert_eq!(px, vec![0, 0xFF, 0xFF, 0]);
    }

    #[test]
    fn bitshift_single_pixel_inverse() {
        for k in 1..24 {
            let mut px = vec![0xFF123456];
            effect(EffectKind::BitShift, &[24, k], (0, 0)).apply(&mut px, false);
            effect(EffectKind::BitShift, &[24, 24 - k], (0, 0)).apply(&mut px, false);
            assert_eq!(px, vec![0xFF123456], "k = {}", k);
        }
    }

    #[test]
    fn bitshift_by_eight_moves_low_byte_to_next_pixel() {
        let mut px = vec![0xFF112233, 0xFF445566];
        effect(EffectKind::BitShift, &[24, 8], (0, 1)).apply(&mut px, false);
        assert_eq!(px, vec![0xFF661122, 0xFF334455]);
    }

    #[test]
    fn bitshift_complementary_shifts_rotate_by_one_pixel() {
        let original = vec![0xFF112233, 0xFF445566, 0xFF778899];
        let mut px = original.clone();
        effect(EffectKind::BitShift, &[24, 8], (0, 2)).apply(&mut px, false);
        effect(EffectKind::BitShift, &[24, 16], (0, 2)).apply(&mut px, false);
        assert_eq!(px, vec![0xFF778899, 0xFF112233, 0xFF445566]);
        assert_eq!(sorted(px), sorted(original));
    }

    #[test]
    fn bitshift_subrange_carries_from_buffer_end() {
        let mut px = vec![0xFF112233, 0xFF445566, 0xFF778899, 0xFFAABBCC];
        effect(EffectKind::BitShift, &[24, 8], (0, 1)).apply(&mut px, false);
        // The first carry is the low byte of the last pixel, not of the range end
        assert_eq!(px, vec![0xFFCC1122, 0xFF334455, 0xFF778899, 0xFFAABBCC]);
    }

    #[test]
    fn bitshift_with_alpha_uses_all_32_bits() {
        let mut px = vec![0x12345678];
        effect(EffectKind::BitShift, &[32, 4], (0, 0)).apply(&mut px, true);
        assert_eq!(px, vec![0x81234567]);
    }

    #[test]
    fn bitshift_rejects_zero_and_oversized_shift() {
        assert_eq!(
            EffectParams::from_modifiers(EffectKind::BitShift, &[24, 0]),
            Err(EffectError::ZeroShift)
        );
        assert!(matches!(
            EffectParams::from_modifiers(EffectKind::BitShift, &[24, 25]),
            Err(EffectError::InvalidShift { .. })
        ));
    }

    #[test]
    fn reorder_identity_is_noop() {
        let original = vec![0x11223344, 0xAABBCCDD];
        let mut px = original.clone();
        let ids: Vec<i32> = CHANNEL_MASKS.iter().map(|&m| m as i32).collect();
        effect(EffectKind::Reorder, &ids, (0, 1)).apply(&mut px, true);
        assert_eq!(px, original);
    }

    #[test]
    fn reorder_swaps_red_and_blue() {
        let mut px = vec![0xFF112233];
        let targets = [ALPHA_MASK, BLUE_MASK, GREEN_MASK, RED_MASK].map(|m| m as i32);
        effect(EffectKind::Reorder, &targets, (0, 0)).apply(&mut px, true);
        assert_eq!(px, vec![0xFF332211]);
    }

    #[test]
    fn reorder_rejects_duplicates() {
        let targets = [ALPHA_MASK, RED_MASK, RED_MASK, BLUE_MASK].map(|m| m as i32);
        assert!(matches!(
            EffectParams::from_modifiers(EffectKind::Reorder, &targets),
            Err(EffectError::InvalidModifiers(_))
        ));
    }

    #[test]
    fn shuffle_preserves_multiset() {
        let original: Vec<u32> = (0..200).map(|i| 0xFF000000 | i * 977).collect();
        let mut px = original.clone();
        effect(EffectKind::Shuffle, &[WHOLE_PIXELS], (10, 189)).apply(&mut px, true);
        assert_eq!(&px[..10], &original[..10]);
        assert_eq!(&px[190..], &original[190..]);
        assert_eq!(sorted(px), sorted(original));
    }

    #[test]
    fn shuffle_channels_preserves_each_channel_multiset() {
        let original: Vec<u32> = (0..64u32).map(|i| (i << 16) | (255 - i)).collect();
        let mut px = original.clone();
        effect(EffectKind::Shuffle, &[RED_MASK as i32], (0, 63)).apply(&mut px, true);

        let reds = |v: &[u32]| sorted(v.iter().map(|p| p & RED_MASK).collect());
        assert_eq!(reds(&px), reds(&original));
        // Blue untouched in place
        for (a, b) in px.iter().zip(&original) {
            assert_eq!(a & BLUE_MASK, b & BLUE_MASK);
        }
    }

    #[test]
    fn shuffle_replays_identically() {
        let original: Vec<u32> = (0..100).collect();
        let fx = effect(EffectKind::Shuffle, &[WHOLE_PIXELS], (0, 99));
        let mut a = original.clone();
        let mut b = original.clone();
        fx.apply(&mut a, true);
        fx.apply(&mut b, true);
        assert_eq!(a, b);
    }

    #[test]
    fn sort_whole_uses_signed_order() {
        let mut px = vec![0x00000010, 0xFF000000, 0x00000001, 0x7FFFFFFF];
        effect(EffectKind::Sort, &[WHOLE_PIXELS], (0, 3)).apply(&mut px, true);
        assert_eq!(px, vec![0xFF000000, 0x00000001, 0x00000010, 0x7FFFFFFF]);
        assert!(px.windows(2).all(|w| (w[0] as i32) <= (w[1] as i32)));
    }

    #[test]
    fn sort_single_element_is_noop() {
        let mut px = vec![5, 3, 9];
        effect(EffectKind::Sort, &[WHOLE_PIXELS], (1, 1)).apply(&mut px, true);
        assert_eq!(px, vec![5, 3, 9]);
    }

    #[test]
    fn sort_channel_keeps_other_channels() {
        let mut px = vec![0x00300001, 0x00100002, 0x00200003];
        effect(EffectKind::Sort, &[RED_MASK as i32], (0, 2)).apply(&mut px, true);
        assert_eq!(px, vec![0x00100001, 0x00200002, 0x00300003]);
    }

    #[test]
    fn smear_brightens_following_pixels_only() {
        let mut px = vec![0x000000FF, 0, 0, 0];
        effect(EffectKind::Smear, &[3, 10], (0, 3)).apply(&mut px, true);
        // First pixel has no predecessors
        assert_eq!(px[0], 0x000000FF);
        // Row 1 at full intensity, row 2 at about 2/3
        assert_eq!(px[1], 0x000000FF);
        assert!((169..=170).contains(&px[2]), "got {}", px[2]);
        // Kernel of length 3 reaches two pixels back at most
        assert_eq!(px[3], 0);
    }

    #[test]
    fn smear_kernel_stops_at_range_start() {
        let mut px = vec![0x000000FF, 0, 0, 0];
        effect(EffectKind::Smear, &[3, 10], (1, 3)).apply(&mut px, true);
        assert_eq!(px, vec![0x000000FF, 0, 0, 0]);
    }

    #[test]
    fn smear_skips_white_and_never_darkens() {
        let original = vec![0x00808080, 0xFFFFFFFF, 0x00010203];
        let mut px = original.clone();
        effect(EffectKind::Smear, &[5, 7], (0, 2)).apply(&mut px, true);
        assert_eq!(px[1], 0xFFFFFFFF);
        for (a, b) in px.iter().zip(&original) {
            assert_eq!(a & b, *b);
        }
    }

    #[test]
    fn empty_channel_selection_is_rejected() {
        assert_eq!(
            EffectParams::from_modifiers(EffectKind::Invert, &[]),
            Err(EffectError::NoChannels)
        );
        assert_eq!(
            EffectParams::from_modifiers(EffectKind::Invert, &[0]),
            Err(EffectError::NoChannels)
        );
        assert_eq!(
            EffectParams::from_modifiers(EffectKind::Sort, &[]),
            Err(EffectError::NoChannels)
        );
        assert_eq!(
            EffectParams::from_modifiers(EffectKind::Shuffle, &[0x1234]),
            Err(EffectError::InvalidChannelMask(0x1234))
        );
    }

    #[test]
    fn large_ranges_match_sequential_result() {
        let len = PARALLEL_THRESHOLD + 5;
        let original: Vec<u32> = (0..len as u32).map(|i| i.wrapping_mul(0x9E37_79B9)).collect();
        let last = len - 1;

        let invert = effect(EffectKind::Invert, &[RED_MASK as i32, BLUE_MASK as i32], (2, last));
        let mut par = original.clone();
        let mut seq = original.clone();
        invert.apply_with(&mut par, true, true);
        invert.apply_with(&mut seq, true, false);
        assert_eq!(par, seq);
        assert_eq!(par[..2], original[..2]);
        assert_eq!(par[last], original[last] ^ 0x00FF00FF);

        let targets = [ALPHA_MASK, BLUE_MASK, GREEN_MASK, RED_MASK].map(|m| m as i32);
        let reorder = effect(EffectKind::Reorder, &targets, (0, last));
        let mut par = original.clone();
        let mut seq = original.clone();
        reorder.apply_with(&mut par, true, true);
        reorder.apply_with(&mut seq, true, false);
        assert_eq!(par, seq);
        assert_eq!(par[1], reorder_pixel(original[1], &targets.map(|m| m as u32)));
    }

    #[test]
    fn describe_lists_parameters_and_state() {
        let mut sort = effect(EffectKind::Sort, &[RED_MASK as i32, BLUE_MASK as i32], (0, 99));
        assert_eq!(sort.describe(), "Sort (R B) 0..=99");
        sort.set_enabled(false);
        assert_eq!(sort.describe(), "Sort (R B) 0..=99 [disabled]");
        assert_eq!(
            effect(EffectKind::Smear, &[100, 10], (0, 5)).describe(),
            "Smear (length 100, intensity 100%) 0..=5"
        );
        assert_eq!(
            effect(EffectKind::Shuffle, &[WHOLE_PIXELS], (3, 4)).describe(),
            "Shuffle (pixels) 3..=4"
        );
    }

    #[test]
    fn channel_names_follow_argb_labels() {
        assert_eq!(channel_names(&[ALPHA_MASK, BLUE_MASK]), "A B ");
        assert_eq!(channel_shift(GREEN_MASK), 8);
        assert_eq!(channel_shift(0x1234), 0);
    }
}
