// ============================================================================
// EFFECT WORKER: runs effect application off the calling thread
// ============================================================================
//
// A job gets a copy of the target stream's pixels, applies the prepared
// effect on the rayon pool and sends the finished buffer back over a channel.
// Nothing in the canvas changes until `poll`/`finish_all` installs the result,
// so a render in between sees the stream exactly as it was before the job.
// A stream with a job in flight accepts no further jobs.
// ============================================================================

use std::collections::HashSet;
use std::sync::mpsc;

use crate::canvas::CanvasState;
use crate::ops::{Effect, EffectError};
use crate::stream::StreamId;
use crate::{log_err, log_info, log_warn};

struct JobResult {
    stream: StreamId,
    effect: Effect,
    description: String,
    /// `None` when the job panicked.
    pixels: Option<Vec<u32>>,
}

pub struct EffectWorker {
    sender: mpsc::Sender<JobResult>,
    receiver: mpsc::Receiver<JobResult>,
    in_flight: HashSet<StreamId>,
    parallel: bool,
}

impl Default for EffectWorker {
    fn default() -> Self {
        Self::new(true)
    }
}

impl std::fmt::Debug for EffectWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectWorker")
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

impl EffectWorker {
    pub fn new(parallel: bool) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender,
            receiver,
            in_flight: HashSet::new(),
            parallel,
        }
    }

    pub fn is_busy(&self, id: StreamId) -> bool {
        self.in_flight.contains(&id)
    }

    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    /// Start applying `effect` to a copy of the stream's pixels.
    pub fn submit(
        &mut self,
        canvas: &CanvasState,
        id: StreamId,
        effect: Effect,
        description: String,
    ) -> Result<(), EffectError> {
        if self.is_busy(id) {
            return Err(EffectError::StreamBusy(id));
        }
        let stream = canvas.stream(id).ok_or(EffectError::UnknownStream(id))?;
        let mut pixels = stream.pixels().to_vec();
        let has_alpha = stream.has_alpha;
        let parallel = self.parallel;
        let sender = self.sender.clone();

        self.in_flight.insert(id);
        rayon::spawn(move || {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                effect.apply_with(&mut pixels, has_alpha, parallel);
            }));
            let pixels = match outcome {
                Ok(()) => Some(pixels),
                Err(panic_info) => {
                    let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                        s.to_string()
                    } else if let Some(s) = panic_info.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "unknown panic payload".to_string()
                    };
                    log_err!("Effect job '{}' panicked: {}", description, msg);
                    None
                }
            };
            let _ = sender.send(JobResult {
                stream: id,
                effect,
                description,
                pixels,
            });
        });
        Ok(())
    }

    /// Install every finished job without blocking. Returns the streams that
    /// changed.
    pub fn poll(&mut self, canvas: &mut CanvasState) -> Vec<StreamId> {
        let mut changed = Vec::new();
        while let Ok(result) = self.receiver.try_recv() {
            if let Some(id) = self.install(canvas, result) {
                changed.push(id);
            }
        }
        changed
    }

    /// Block until no job is in flight, installing results as they arrive.
    pub fn finish_all(&mut self, canvas: &mut CanvasState) -> Vec<StreamId> {
        let mut changed = self.poll(canvas);
        while !self.in_flight.is_empty() {
            match self.receiver.recv() {
                Ok(result) => {
                    if let Some(id) = self.install(canvas, result) {
                        changed.push(id);
                    }
                }
                Err(_) => break,
            }
        }
        changed
    }

    fn install(&mut self, canvas: &mut CanvasState, result: JobResult) -> Option<StreamId> {
        let JobResult {
            stream: id,
            effect,
            description,
            pixels,
        } = result;
        self.in_flight.remove(&id);

        let pixels = pixels?;
        let Some(stream) = canvas.stream_mut(id) else {
            log_warn!("Dropping result of '{}': stream {} was removed", description, id);
            return None;
        };
        stream.install_pixels(pixels);
        stream.push_effect(effect);
        log_info!("Finished: {}", description);
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{EffectKind, EffectParams};

    fn invert(canvas: &CanvasState, id: StreamId) -> Effect {
        let params = EffectParams::from_modifiers(EffectKind::Invert, &[0xFF]).unwrap();
        canvas.engine().prepare(canvas.stream(id).unwrap(), params).unwrap()
    }

    #[test]
    fn result_is_installed_only_when_collected() {
        let mut canvas = CanvasState::new(false);
        let id = canvas.add_raw("a", vec![0x00, 0x0F, 0xF0, 0xFF], true);
        let mut worker = EffectWorker::new(false);

        let effect = invert(&canvas, id);
        worker.submit(&canvas, id, effect, "invert".into()).unwrap();
        assert!(worker.is_busy(id));
        assert_eq!(canvas.stream(id).unwrap().pixels(), &[0x00, 0x0F, 0xF0, 0xFF]);

        assert_eq!(worker.finish_all(&mut canvas), vec![id]);
        assert!(!worker.is_busy(id));
        let stream = canvas.stream(id).unwrap();
        assert_eq!(stream.pixels(), &[0xFF, 0xF0, 0x0F, 0x00]);
        assert_eq!(stream.effects().len(), 1);
    }

    #[test]
    fn busy_stream_rejects_second_job() {
        let mut canvas = CanvasState::new(false);
        let id = canvas.add_raw("a", vec![1; 16], true);
        let mut worker = EffectWorker::new(false);

        let first = invert(&canvas, id);
        let second = invert(&canvas, id);
        worker.submit(&canvas, id, first, "first".into()).unwrap();
        assert_eq!(
            worker.submit(&canvas, id, second, "second".into()),
            Err(EffectError::StreamBusy(id))
        );
        worker.finish_all(&mut canvas);
        assert_eq!(canvas.stream(id).unwrap().effects().len(), 1);
    }

    #[test]
    fn result_for_removed_stream_is_dropped() {
        let mut canvas = CanvasState::new(false);
        let id = canvas.add_raw("a", vec![1; 4], true);
        let mut worker = EffectWorker::new(false);
        let effect = invert(&canvas, id);
        worker.submit(&canvas, id, effect, "gone".into()).unwrap();
        canvas.remove_stream(id);

        assert!(worker.finish_all(&mut canvas).is_empty());
        assert_eq!(worker.pending(), 0);
    }
}
