use std::path::{Path, PathBuf};

use image::RgbaImage;
use uuid::Uuid;

use crate::canvas::{CanvasState, RenderProperties, to_rgba_image};
use crate::components::history::{EffectHistory, property_change_messages};
use crate::io::{self, DecodedImage, ExportError, ExportFormat, ProjectError, ProjectFile};
use crate::ops::{EffectError, EffectKind, EffectParams};
use crate::settings::AppSettings;
use crate::stream::{PixelStream, StreamId};
use crate::worker::EffectWorker;
use crate::{log_err, log_info, log_warn};

/// Single open document: layers, render properties, history and the
/// background effect worker.
#[derive(Debug)]
pub struct Project {
    pub id: Uuid,
    pub canvas: CanvasState,
    pub history: EffectHistory,
    pub properties: RenderProperties,
    pub settings: AppSettings,
    worker: EffectWorker,
    /// `None` for unsaved/untitled projects.
    pub path: Option<PathBuf>,
    /// Display name (derived from path or "Untitled-X")
    pub name: String,
    /// The next import sizes the canvas.
    first_import: bool,
}

impl Project {
    pub fn new_untitled(untitled_counter: usize, settings: AppSettings) -> Self {
        let parallel = settings.parallel_render;
        Self {
            id: Uuid::new_v4(),
            canvas: CanvasState::new(parallel),
            history: EffectHistory::new(),
            properties: RenderProperties::new(0, 0, settings.default_render_type),
            settings,
            worker: EffectWorker::new(parallel),
            path: None,
            name: format!("Untitled-{}", untitled_counter),
            first_import: true,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.history.is_unsaved()
    }

    /// Get the display title (name with dirty indicator)
    pub fn display_title(&self) -> String {
        if self.is_dirty() {
            format!("{}*", self.name)
        } else {
            self.name.clone()
        }
    }

    fn update_name_from_path(&mut self) {
        if let Some(ref path) = self.path {
            self.name = io::file_title(path);
        }
    }

    /// Action log, newest first.
    pub fn latest_actions(&self) -> Vec<String> {
        self.history.latest_actions()
    }

    // ========================================================================
    // IMPORT
    // ========================================================================

    /// Decode an image file into a new layer. Failures are logged and yield `None`.
    pub fn load_image(&mut self, path: &Path) -> Option<StreamId> {
        self.settings.last_path_import = path.display().to_string();
        match io::decode_image(path) {
            Ok(decoded) => Some(self.add_decoded(io::file_title(path), decoded)),
            Err(e) => {
                log_err!("Could not load image {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Add an already decoded image as a new layer.
    pub fn add_decoded(&mut self, title: String, image: DecodedImage) -> StreamId {
        let id = self
            .canvas
            .add_image(title.clone(), image.width, image.height, image.has_alpha, image.pixels);
        self.after_import(id);
        self.history.save_action(format!("Imported image: {}", title));
        log_info!("Imported image: {} ({}x{})", title, image.width, image.height);
        id
    }

    /// Read any file as raw pixel data into a new layer.
    pub fn load_raw(&mut self, path: &Path, alpha: bool) -> Option<StreamId> {
        self.settings.last_path_raw = path.display().to_string();
        match io::read_raw(path, alpha, self.settings.max_raw_bytes) {
            Ok(pixels) => Some(self.add_raw(io::file_title(path), pixels, alpha)),
            Err(e) => {
                log_err!("Could not import raw {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn add_raw(&mut self, title: String, pixels: Vec<u32>, alpha: bool) -> StreamId {
        let count = pixels.len();
        let id = self.canvas.add_raw(title.clone(), pixels, alpha);
        self.after_import(id);
        self.history.save_action(format!("Imported raw: {}", title));
        log_info!("Imported raw: {} ({} pixels)", title, count);
        id
    }

    /// The first import sizes the canvas to the new stream and resets the
    /// merge operator to the configured default.
    fn after_import(&mut self, id: StreamId) {
        if !self.first_import {
            return;
        }
        if let Some(stream) = self.canvas.stream(id) {
            let render_type = self.settings.default_render_type;
            self.properties = RenderProperties::new(stream.width, stream.height, render_type);
            self.first_import = false;
        }
    }

    // ========================================================================
    // EFFECTS
    // ========================================================================

    /// Validate and record an effect, then run it in the background. The
    /// result lands on the next [`poll_jobs`](Self::poll_jobs) or
    /// [`finish_jobs`](Self::finish_jobs).
    pub fn request_effect(&mut self, id: StreamId, params: EffectParams) -> Result<(), EffectError> {
        if self.worker.is_busy(id) {
            return Err(EffectError::StreamBusy(id));
        }
        let stream = self.canvas.stream(id).ok_or(EffectError::UnknownStream(id))?;
        let effect = self.canvas.engine().prepare(stream, params)?;
        let message = format!("Applying {} to {}", effect, stream.title);

        if let Some(stream) = self.canvas.stream_mut(id) {
            self.history.record_stream_change(message.clone(), stream);
        }
        log_info!("{}", message);
        self.worker.submit(&self.canvas, id, effect, message)
    }

    /// [`request_effect`](Self::request_effect) and wait for it.
    pub fn apply_effect(&mut self, id: StreamId, params: EffectParams) -> Result<(), EffectError> {
        self.request_effect(id, params)?;
        self.finish_jobs();
        Ok(())
    }

    /// Decode the boundary modifier encoding and apply.
    pub fn apply_modifiers(&mut self, id: StreamId, kind: EffectKind, modifiers: &[i32]) -> Result<(), EffectError> {
        let params = EffectParams::from_modifiers(kind, modifiers)?;
        self.apply_effect(id, params)
    }

    /// Install finished background effects. Returns the streams that changed.
    pub fn poll_jobs(&mut self) -> Vec<StreamId> {
        self.worker.poll(&mut self.canvas)
    }

    /// Wait for every background effect.
    pub fn finish_jobs(&mut self) -> Vec<StreamId> {
        self.worker.finish_all(&mut self.canvas)
    }

    pub fn pending_jobs(&self) -> usize {
        self.worker.pending()
    }

    /// Enable or disable one effect and rebuild the stream.
    pub fn toggle_effect(&mut self, id: StreamId, index: usize) -> Result<bool, EffectError> {
        if self.worker.is_busy(id) {
            return Err(EffectError::StreamBusy(id));
        }
        let stream = self.canvas.stream_mut(id).ok_or(EffectError::UnknownStream(id))?;
        let Some(effect) = stream.effect(index) else {
            return Err(EffectError::InvalidModifiers(format!("no effect at index {}", index)));
        };
        let message = format!("Toggling {} to {}", effect, !effect.is_enabled());

        self.history.record_stream_change(message.clone(), stream);
        let enabled = stream.toggle_effect(index).unwrap_or_default();
        log_info!("{}", message);
        self.update_effects();
        Ok(enabled)
    }

    /// Rebuild every stream whose effect chain changed.
    pub fn update_effects(&mut self) -> usize {
        self.canvas.reconcile_dirty_streams()
    }

    // ========================================================================
    // LAYERS
    // ========================================================================

    pub fn set_selection(&mut self, id: StreamId, start: i64, end: i64) -> bool {
        match self.canvas.stream_mut(id) {
            Some(stream) => {
                stream.set_selection(start, end);
                true
            }
            None => false,
        }
    }

    /// Copy the selection (end excluded) into a new layer.
    pub fn copy_selection(&mut self, id: StreamId) -> Option<StreamId> {
        self.selection_to_layer(id, false)
    }

    /// Move the selection (end excluded) into a new layer, zeroing the source.
    pub fn cut_selection(&mut self, id: StreamId) -> Option<StreamId> {
        self.selection_to_layer(id, true)
    }

    fn selection_to_layer(&mut self, id: StreamId, cut: bool) -> Option<StreamId> {
        self.finish_jobs();
        let stream = self.canvas.stream_mut(id)?;
        let (start, end) = stream.selection();
        let verb = if cut { "Extracting" } else { "Duplicate" };
        let message = format!("{} selection: {} to {} from {}", verb, start, end, stream.title);
        self.history.record_stream_change(message.clone(), stream);
        log_info!("{}", message);

        if cut {
            self.canvas.cut_selection_to_new_layer(id)
        } else {
            self.canvas.copy_selection_to_new_layer(id)
        }
    }

    /// Drop a layer. Logged but not undoable.
    pub fn remove_stream(&mut self, id: StreamId) -> Option<PixelStream> {
        self.finish_jobs();
        let removed = self.canvas.remove_stream(id)?;
        self.history.save_action(format!("Removed image: {}", removed.title));
        log_info!("Removed image: {}", removed.title);
        Some(removed)
    }

    // ========================================================================
    // RENDERING
    // ========================================================================

    /// Change canvas size and merge operator, recording one undoable entry per
    /// changed field. Returns how many fields changed. A width or height of
    /// `0` keeps the current value.
    pub fn set_render_properties(&mut self, requested: RenderProperties) -> usize {
        let mut new = self.properties;
        new.apply(requested.width, requested.height, requested.render_type.code());
        let changes = property_change_messages(&self.properties, &new);
        for (message, kind, previous) in &changes {
            self.history.record_property(message.clone(), *kind, *previous);
            log_info!("{}", message);
        }
        self.properties = new;
        changes.len()
    }

    /// Undo the last undoable action and rebuild what it touched.
    pub fn undo(&mut self) -> Option<String> {
        self.finish_jobs();
        let message = self.history.undo(&mut self.canvas, &mut self.properties)?;
        self.update_effects();
        Some(message)
    }

    /// Composite all visible layers with the current properties.
    pub fn render(&mut self) -> &[u32] {
        self.canvas.render(&self.properties)
    }

    pub fn render_image(&mut self) -> Option<RgbaImage> {
        let (w, h) = (self.properties.width, self.properties.height);
        let pixels = self.canvas.render(&self.properties);
        to_rgba_image(pixels, w, h)
    }

    /// Render and write the composite. The format comes from `format`, then
    /// the path's extension, then PNG.
    pub fn export_image(&mut self, path: &Path, format: Option<ExportFormat>) -> Result<PathBuf, ExportError> {
        self.finish_jobs();
        let title = io::file_title(path);
        self.history.save_action(format!("Exporting image: {}", title));
        self.settings.last_path_export = path.display().to_string();

        let format = format
            .or_else(|| ExportFormat::from_path(path))
            .unwrap_or_default();
        let image = self.render_image().ok_or(ExportError::EmptyCanvas)?;
        match io::export_image(&image, path, format) {
            Ok(written) => {
                log_info!("Exporting image: {}", written.display());
                Ok(written)
            }
            Err(e) => {
                log_err!("Failed to save image {}: {}", path.display(), e);
                Err(e)
            }
        }
    }

    // ========================================================================
    // PROJECT FILES
    // ========================================================================

    pub fn save_project(&mut self, path: &Path) -> Result<(), ProjectError> {
        self.finish_jobs();
        self.settings.last_path_save = path.display().to_string();
        let title = io::file_title(path);
        self.history.save_action(format!("Saved project: {}", title));

        let file = ProjectFile::new(
            self.properties.width,
            self.properties.height,
            self.properties.render_type.code(),
            self.history.latest_actions(),
            self.canvas.streams().to_vec(),
        );
        if let Err(e) = io::save_project(&file, path) {
            log_err!("Failed to save project {}: {}", path.display(), e);
            return Err(e);
        }

        self.history.set_unsaved(false);
        self.path = Some(path.to_path_buf());
        self.update_name_from_path();
        log_info!("Saved project: {}", title);
        Ok(())
    }

    /// Replace everything with a saved project. The undo stack starts empty.
    /// Failures are logged and leave the current project untouched.
    pub fn load_project(&mut self, path: &Path) -> bool {
        self.settings.last_path_load = path.display().to_string();
        let file = match io::load_project(path) {
            Ok(file) => file,
            Err(e) => {
                log_err!("Could not load project {}: {}", path.display(), e);
                return false;
            }
        };

        self.finish_jobs();
        self.history.clear(&mut self.canvas);
        self.first_import = file.streams.is_empty();
        self.canvas.set_streams(file.streams);
        self.properties = RenderProperties::new(0, 0, self.settings.default_render_type);
        self.properties.apply(file.width, file.height, file.render_type);
        self.history.set_history(&file.actions);

        let title = io::file_title(path);
        self.history.save_action(format!("Loaded project: {}", title));
        self.history.set_unsaved(false);
        self.path = Some(path.to_path_buf());
        self.update_name_from_path();
        log_info!("Loaded project: {}", title);
        true
    }

    /// Drop all layers and history.
    pub fn new_project(&mut self) {
        self.finish_jobs();
        self.canvas.clear();
        self.history.clear(&mut self.canvas);
        self.first_import = true;
        self.path = None;
        log_info!("New project");
    }

    /// Warn if layers still reference jobs. Called before the project is dropped.
    pub fn close(&mut self) {
        let pending = self.pending_jobs();
        if pending > 0 {
            log_warn!("Waiting for {} effect job(s) before closing", pending);
        }
        self.finish_jobs();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::RenderType;
    use crate::ops::effects::BLUE_MASK;

    fn project() -> Project {
        let settings = AppSettings {
            parallel_render: false,
            ..AppSettings::default()
        };
        Project::new_untitled(1, settings)
    }

    fn opaque_image(project: &mut Project) -> StreamId {
        project.add_decoded(
            "tiny.png".into(),
            DecodedImage {
                width: 2,
                height: 2,
                has_alpha: false,
                pixels: vec![0xFF112233, 0xFF445566, 0xFF778899, 0xFFAABBCC],
            },
        )
    }

    #[test]
    fn first_import_sizes_canvas() {
        let mut p = project();
        opaque_image(&mut p);
        assert_eq!(p.properties, RenderProperties::new(2, 2, RenderType::Sum));
        p.add_raw("more.bin".into(), vec![0; 100], true);
        assert_eq!(p.properties.width, 2);
        assert_eq!(p.latest_actions(), vec!["Imported raw: more.bin", "Imported image: tiny.png"]);
    }

    #[test]
    fn effect_logs_and_undoes() {
        let mut p = project();
        let id = opaque_image(&mut p);
        p.apply_modifiers(id, EffectKind::Invert, &[BLUE_MASK as i32]).unwrap();
        assert_eq!(p.canvas.stream(id).unwrap().pixel(0), Some(0xFF1122CC));
        assert_eq!(p.latest_actions()[0], "Applying Invert to tiny.png");

        assert_eq!(p.undo().as_deref(), Some("Undoing Applying Invert to tiny.png..."));
        let stream = p.canvas.stream(id).unwrap();
        assert!(stream.effects().is_empty());
        assert_eq!(stream.pixels(), stream.original_pixels());
    }

    #[test]
    fn invalid_effect_records_nothing() {
        let mut p = project();
        let id = opaque_image(&mut p);
        let before = p.latest_actions();
        assert_eq!(
            p.apply_modifiers(id, EffectKind::BitShift, &[24, 0]),
            Err(EffectError::ZeroShift)
        );
        assert_eq!(p.latest_actions(), before);
        assert!(!p.history.can_undo());
    }

    #[test]
    fn toggle_is_undoable() {
        let mut p = project();
        let id = opaque_image(&mut p);
        p.apply_modifiers(id, EffectKind::Invert, &[BLUE_MASK as i32]).unwrap();
        let inverted = p.canvas.stream(id).unwrap().pixels().to_vec();

        assert_eq!(p.toggle_effect(id, 0), Ok(false));
        assert_eq!(p.latest_actions()[0], "Toggling Invert to false");
        let original = p.canvas.stream(id).unwrap().original_pixels().to_vec();
        assert_eq!(p.canvas.stream(id).unwrap().pixels(), original.as_slice());

        p.undo();
        assert_eq!(p.canvas.stream(id).unwrap().pixels(), inverted.as_slice());
        assert!(p.toggle_effect(id, 3).is_err());
    }

    #[test]
    fn render_properties_record_each_change() {
        let mut p = project();
        opaque_image(&mut p);
        let changed = p.set_render_properties(RenderProperties::new(4, 2, RenderType::Or));
        assert_eq!(changed, 2);
        assert_eq!(
            &p.latest_actions()[..2],
            &["Changed type from Sum to OR", "Changed width from 2 to: 4"]
        );
        p.undo();
        assert_eq!(p.properties.render_type, RenderType::Sum);
        p.undo();
        assert_eq!(p.properties.width, 2);
    }

    #[test]
    fn cut_selection_is_undone_by_replay() {
        let mut p = project();
        let id = opaque_image(&mut p);
        p.set_selection(id, 1, 3);
        let layer = p.cut_selection(id).unwrap();
        assert_eq!(p.latest_actions()[0], "Extracting selection: 1 to 3 from tiny.png");
        assert_eq!(p.canvas.stream(id).unwrap().pixels(), &[0xFF112233, 0, 0, 0xFFAABBCC]);
        assert_eq!(p.canvas.stream(layer).unwrap().title, "Layer 2");

        p.undo();
        let stream = p.canvas.stream(id).unwrap();
        assert_eq!(stream.pixels(), stream.original_pixels());
        // The extracted layer itself stays
        assert_eq!(p.canvas.len(), 2);
    }

    #[test]
    fn zero_dimension_keeps_current_value() {
        let mut p = project();
        opaque_image(&mut p);
        let before = p.latest_actions();
        assert_eq!(p.set_render_properties(RenderProperties::new(0, 2, RenderType::Sum)), 0);
        assert_eq!(p.properties, RenderProperties::new(2, 2, RenderType::Sum));
        assert_eq!(p.latest_actions(), before);
        assert!(!p.history.can_undo());
        assert_eq!(p.render().len(), 4);

        assert_eq!(p.set_render_properties(RenderProperties::new(3, 0, RenderType::Sum)), 1);
        assert_eq!(p.properties, RenderProperties::new(3, 2, RenderType::Sum));
        assert_eq!(p.latest_actions()[0], "Changed width from 2 to: 3");
    }

    #[test]
    fn first_import_uses_configured_render_type() {
        let settings = AppSettings {
            parallel_render: false,
            default_render_type: RenderType::Difference,
            ..AppSettings::default()
        };
        let mut p = Project::new_untitled(2, settings);
        opaque_image(&mut p);
        assert_eq!(p.properties, RenderProperties::new(2, 2, RenderType::Difference));
    }

    #[test]
    fn display_title_tracks_unsaved_changes() {
        let mut p = project();
        assert_eq!(p.display_title(), "Untitled-1");
        opaque_image(&mut p);
        assert_eq!(p.display_title(), "Untitled-1*");
    }

    #[test]
    fn failed_import_returns_none() {
        let mut p = project();
        let missing = std::env::temp_dir().join("glitchy_missing_input_31337.png");
        assert!(p.load_image(&missing).is_none());
        assert!(p.load_raw(&missing, true).is_none());
        assert!(p.canvas.is_empty());
        assert!(p.latest_actions().is_empty());
    }
}
