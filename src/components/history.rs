use crate::canvas::{CanvasState, RenderProperties};
use crate::stream::{PixelStream, StreamId};
use crate::{log_info, log_warn};

// ============================================================================
// UNDO KINDS
// ============================================================================

/// What an undoable action changed. Property kinds keep the previous value in
/// the property list; stream changes keep the stream id in the stream list and
/// an effect-flag snapshot on the stream itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UndoKind {
    Width,
    Height,
    RenderType,
    Stream,
}

impl UndoKind {
    pub fn is_property(&self) -> bool {
        !matches!(self, UndoKind::Stream)
    }
}

#[derive(Clone, Debug)]
struct UndoRecord {
    description: String,
    kind: UndoKind,
}

// ============================================================================
// EFFECT HISTORY
// ============================================================================

/// Plain action log plus a single-step, LIFO undo stack. There is no redo.
#[derive(Debug, Default)]
pub struct EffectHistory {
    /// Every action in chronological order, undoable or not.
    log: Vec<String>,
    undo_stack: Vec<UndoRecord>,
    changed_properties: Vec<u32>,
    changed_streams: Vec<StreamId>,
    unsaved_changes: bool,
}

impl EffectHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a non-undoable entry to the log.
    pub fn save_action(&mut self, description: impl Into<String>) {
        self.log.push(description.into());
        self.unsaved_changes = true;
    }

    /// Record a render-property change. `previous` is the value to restore:
    /// a dimension, or a render-type code.
    pub fn record_property(&mut self, description: impl Into<String>, kind: UndoKind, previous: u32) {
        assert!(kind.is_property(), "record_property called with {:?}", kind);
        self.push_record(description.into(), kind);
        self.changed_properties.push(previous);
    }

    /// Record a change to `stream`. Snapshots its effect flags, so call this
    /// before mutating it.
    pub fn record_stream_change(&mut self, description: impl Into<String>, stream: &mut PixelStream) {
        self.push_record(description.into(), UndoKind::Stream);
        stream.snapshot_effect_flags();
        self.changed_streams.push(stream.id());
    }

    fn push_record(&mut self, description: String, kind: UndoKind) {
        self.log.push(description.clone());
        self.undo_stack.push(UndoRecord { description, kind });
        self.unsaved_changes = true;
    }

    /// Undo the most recent undoable action. Returns `Undoing <description>...`,
    /// or `None` when there is nothing to undo.
    ///
    /// Property changes are written straight into `props`; the caller decides
    /// when to re-render. Stream changes restore effect flags and leave the
    /// stream dirty for the next reconcile.
    pub fn undo(&mut self, canvas: &mut CanvasState, props: &mut RenderProperties) -> Option<String> {
        let record = self.undo_stack.pop()?;
        self.save_action(format!("Undo: {}", record.description));

        match record.kind {
            UndoKind::Width => props.apply(self.pop_property(), 0, 4),
            UndoKind::Height => props.apply(0, self.pop_property(), 4),
            UndoKind::RenderType => props.apply(0, 0, self.pop_property()),
            UndoKind::Stream => {
                let id = self
                    .changed_streams
                    .pop()
                    .expect("stream undo list out of sync with undo records");
                match canvas.stream_mut(id) {
                    Some(stream) => stream.restore_last_snapshot(),
                    None => log_warn!("Undo target stream {} no longer exists", id),
                }
            }
        }

        log_info!("Undo: {}", record.description);
        Some(format!("Undoing {}...", record.description))
    }

    fn pop_property(&mut self) -> u32 {
        self.changed_properties
            .pop()
            .expect("property undo list out of sync with undo records")
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.undo_stack.last().map(|r| r.description.as_str())
    }

    /// The log, newest first.
    pub fn latest_actions(&self) -> Vec<String> {
        self.log.iter().rev().cloned().collect()
    }

    /// Replace the log with `newest_first`, stored chronologically.
    pub fn set_history(&mut self, newest_first: &[String]) {
        self.log = newest_first.iter().rev().cloned().collect();
    }

    /// Drop the log and the undo stack. Effects already applied stay applied.
    pub fn clear(&mut self, canvas: &mut CanvasState) {
        self.log.clear();
        self.undo_stack.clear();
        self.changed_properties.clear();
        self.changed_streams.clear();
        for stream in canvas.streams_mut() {
            stream.clear_snapshots();
        }
        self.unsaved_changes = true;
    }

    pub fn is_unsaved(&self) -> bool {
        self.unsaved_changes
    }

    pub fn set_unsaved(&mut self, unsaved: bool) {
        self.unsaved_changes = unsaved;
    }
}

/// Log lines for a render-property change, one per changed field, oldest first.
pub fn property_change_messages(old: &RenderProperties, new: &RenderProperties) -> Vec<(String, UndoKind, u32)> {
    let mut changes = Vec::new();
    if new.width != old.width {
        changes.push((
            format!("Changed width from {} to: {}", old.width, new.width),
            UndoKind::Width,
            old.width,
        ));
    }
    if new.height != old.height {
        changes.push((
            format!("Changed height from {} to: {}", old.height, new.height),
            UndoKind::Height,
            old.height,
        ));
    }
    if new.render_type != old.render_type {
        changes.push((
            format!("Changed type from {} to {}", old.render_type, new.render_type),
            UndoKind::RenderType,
            old.render_type.code(),
        ));
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::RenderType;
    use crate::ops::{EffectKind, EffectParams};

    fn canvas_with_stream() -> (CanvasState, StreamId) {
        let mut canvas = CanvasState::new(false);
        let id = canvas.add_image("a.png", 4, 1, true, vec![0x10, 0x20, 0x30, 0x40]);
        (canvas, id)
    }

    #[test]
    fn undo_on_empty_history_is_noop() {
        let (mut canvas, _) = canvas_with_stream();
        let mut props = RenderProperties::new(4, 1, RenderType::Sum);
        let mut history = EffectHistory::new();
        assert_eq!(history.undo(&mut canvas, &mut props), None);
        assert!(history.latest_actions().is_empty());
    }

    #[test]
    fn effect_then_undo_restores_pixels_after_reconcile() {
        let (mut canvas, id) = canvas_with_stream();
        let mut props = RenderProperties::new(4, 1, RenderType::Sum);
        let mut history = EffectHistory::new();

        history.record_stream_change("Applying Invert to a.png", canvas.stream_mut(id).unwrap());
        let params = EffectParams::from_modifiers(EffectKind::Invert, &[0xFF]).unwrap();
        canvas.apply_effect(id, params).unwrap();
        assert_eq!(canvas.stream(id).unwrap().pixel(0), Some(0xEF));

        let msg = history.undo(&mut canvas, &mut props);
        assert_eq!(msg.as_deref(), Some("Undoing Applying Invert to a.png..."));
        assert!(canvas.stream(id).unwrap().effects().is_empty());

        canvas.reconcile_dirty_streams();
        assert_eq!(canvas.stream(id).unwrap().pixels(), &[0x10, 0x20, 0x30, 0x40]);
        assert_eq!(
            history.latest_actions(),
            vec!["Undo: Applying Invert to a.png", "Applying Invert to a.png"]
        );
    }

    #[test]
    fn property_undo_restores_previous_values_in_lifo_order() {
        let (mut canvas, _) = canvas_with_stream();
        let old = RenderProperties::new(4, 1, RenderType::Sum);
        let new = RenderProperties::new(8, 2, RenderType::Average);
        let mut history = EffectHistory::new();
        for (msg, kind, prev) in property_change_messages(&old, &new) {
            history.record_property(msg, kind, prev);
        }
        assert_eq!(history.undo_count(), 3);
        assert_eq!(history.undo_description(), Some("Changed type from Sum to Average"));

        let mut props = new;
        history.undo(&mut canvas, &mut props);
        assert_eq!(props, RenderProperties::new(8, 2, RenderType::Sum));
        history.undo(&mut canvas, &mut props);
        assert_eq!(props, RenderProperties::new(8, 1, RenderType::Sum));
        history.undo(&mut canvas, &mut props);
        assert_eq!(props, old);
        assert!(!history.can_undo());
    }

    #[test]
    fn undo_of_removed_stream_only_logs() {
        let (mut canvas, id) = canvas_with_stream();
        let mut props = RenderProperties::new(4, 1, RenderType::Sum);
        let mut history = EffectHistory::new();
        history.record_stream_change("Toggling Invert to false", canvas.stream_mut(id).unwrap());
        canvas.remove_stream(id);

        assert!(history.undo(&mut canvas, &mut props).is_some());
        assert_eq!(props, RenderProperties::new(4, 1, RenderType::Sum));
    }

    #[test]
    fn set_history_takes_newest_first() {
        let mut history = EffectHistory::new();
        history.set_history(&["c".to_string(), "b".to_string(), "a".to_string()]);
        history.save_action("d");
        assert_eq!(history.latest_actions(), vec!["d", "c", "b", "a"]);
    }

    #[test]
    fn clear_drops_undo_but_keeps_effects() {
        let (mut canvas, id) = canvas_with_stream();
        let mut history = EffectHistory::new();
        history.record_stream_change("Applying Sort to a.png", canvas.stream_mut(id).unwrap());
        let params = EffectParams::from_modifiers(EffectKind::Sort, &[-1]).unwrap();
        canvas.apply_effect(id, params).unwrap();

        history.clear(&mut canvas);
        assert!(!history.can_undo());
        assert!(history.latest_actions().is_empty());
        let stream = canvas.stream(id).unwrap();
        assert_eq!(stream.effects().len(), 1);
        assert_eq!(stream.snapshot_count(), 0);
    }

    #[test]
    fn messages_use_render_type_names() {
        let old = RenderProperties::new(1, 1, RenderType::Or);
        let new = RenderProperties::new(1, 1, RenderType::Difference);
        let changes = property_change_messages(&old, &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, "Changed type from OR to Difference");
        assert_eq!(changes[0].2, 1);
        assert_eq!(RenderType::name_for_code(9), "");
    }
}
