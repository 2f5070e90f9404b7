use crate::config::ThrottleConfig;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Accumulated final-segment text awaiting analysis
#[derive(Debug)]
struct AnalysisBuffer {
    pending_text: String,
    last_dispatch_at: Option<Instant>,
    in_flight: bool,
}

/// Decides when accumulated transcript text is worth an annotation call
///
/// A dispatch fires only when the throttle window has elapsed since the last
/// one AND the trimmed pending text meets the minimum length. The buffer is
/// cleared atomically as part of the dispatch decision, so text arriving
/// while a call is outstanding accumulates into a fresh buffer for the next
/// dispatch — at most one analysis call is in flight per consultation.
///
/// Dispatch is evaluated on segment arrival. Without an idle-flush policy,
/// text below the threshold stays buffered until the next utterance; see
/// [`ThrottleConfig::idle_flush_ms`].
pub struct ThrottleController {
    window: Duration,
    min_chars: usize,
    buffer: Mutex<AnalysisBuffer>,
}

impl ThrottleController {
    pub fn new(config: &ThrottleConfig) -> Self {
        Self {
            window: config.window(),
            min_chars: config.min_text_chars,
            buffer: Mutex::new(AnalysisBuffer {
                pending_text: String::new(),
                last_dispatch_at: None,
                in_flight: false,
            }),
        }
    }

    /// Append a final segment's text and evaluate the dispatch conditions.
    ///
    /// Returns the full pending text to analyze when a dispatch should fire;
    /// the internal buffer is already cleared and the in-flight guard set by
    /// the time this returns.
    pub fn offer(&self, text: &str, now: Instant) -> Option<String> {
        let mut buffer = self.buffer.lock();

        if !buffer.pending_text.is_empty() {
            buffer.pending_text.push(' ');
        }
        buffer.pending_text.push_str(text);

        let window_open = buffer
            .last_dispatch_at
            .map_or(true, |at| now.duration_since(at) >= self.window);
        let length = buffer.pending_text.trim().len();

        if !window_open || length < self.min_chars {
            trace!(length, window_open, "Buffering transcript text");
            return None;
        }

        if buffer.in_flight {
            trace!(length, "Analysis already in flight, accumulating for next dispatch");
            return None;
        }

        Some(Self::take_pending(&mut buffer, now))
    }

    /// Flush aged pending text without a new arrival (idle-flush policy).
    ///
    /// Ignores the minimum length: the point of the policy is to bound the
    /// latency of short trailing utterances once speech stops.
    pub fn flush_idle(&self, now: Instant) -> Option<String> {
        let mut buffer = self.buffer.lock();

        if buffer.in_flight || buffer.pending_text.trim().is_empty() {
            return None;
        }

        let window_open = buffer
            .last_dispatch_at
            .map_or(true, |at| now.duration_since(at) >= self.window);
        if !window_open {
            return None;
        }

        debug!("Flushing idle transcript buffer");
        Some(Self::take_pending(&mut buffer, now))
    }

    /// Mark the outstanding analysis call as finished, allowing the next
    /// dispatch. Must be called on both success and failure paths.
    pub fn complete(&self) {
        let mut buffer = self.buffer.lock();
        buffer.in_flight = false;
    }

    /// Trimmed length of the text currently buffered
    pub fn pending_len(&self) -> usize {
        self.buffer.lock().pending_text.trim().len()
    }

    fn take_pending(buffer: &mut AnalysisBuffer, now: Instant) -> String {
        let text = std::mem::take(&mut buffer.pending_text).trim().to_string();
        buffer.last_dispatch_at = Some(now);
        buffer.in_flight = true;
        debug!(length = text.len(), "Dispatching transcript for analysis");
        text
    }
}
