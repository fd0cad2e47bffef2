//! Optional text-presence scanner.
//!
//! Recognition is expensive and runs off the analysis worker. The gate
//! only kicks the scanner at a bounded rate and treats results as absent
//! once they go stale.

use crate::capture::{Frame, TextGateConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use crossbeam::channel::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// One finished recognition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextReading {
    /// Recognized text reduced to lowercase ASCII letters.
    pub normalized: String,
    pub lines: usize,
    /// Timestamp of the frame the scanner was kicked with.
    pub read_at_ms: u64,
}

impl TextReading {
    pub fn new(raw: &str, lines: usize, read_at_ms: u64) -> Self {
        Self {
            normalized: normalize_text(raw),
            lines,
            read_at_ms,
        }
    }
}

/// Lowercases and keeps only `a`..=`z`.
pub fn normalize_text(raw: &str) -> String {
    raw.chars()
        .map(|c| c.to_ascii_lowercase())
        .filter(|c| c.is_ascii_lowercase())
        .collect()
}

/// Normalized text that looks like a card back.
pub fn is_deckish(normalized: &str) -> bool {
    normalized.contains("deck")
}

/// Asynchronous text recognizer.
pub trait TextScanner {
    /// Starts recognition on `frame` unless a run is in flight. Returns
    /// whether the frame was accepted.
    fn kick(&mut self, frame: &Frame, now_ms: u64) -> bool;

    /// Most recent finished reading.
    fn latest(&self) -> Option<TextReading>;
}

/// Scanner that never sees text.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTextScanner;

impl TextScanner for NullTextScanner {
    fn kick(&mut self, _frame: &Frame, _now_ms: u64) -> bool {
        false
    }

    fn latest(&self) -> Option<TextReading> {
        None
    }
}

/// Raw recognizer output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecognizedText {
    pub text: String,
    pub lines: usize,
}

/// Blocking text recognizer run on the scanner's worker thread.
pub trait TextRecognizer: Send + 'static {
    fn recognize(&mut self, frame: &Frame) -> Result<RecognizedText, String>;
}

/// Single-flight scanner that runs a [`TextRecognizer`] on its own thread.
pub struct ThreadedTextScanner {
    busy: Arc<AtomicBool>,
    latest: Arc<Mutex<Option<TextReading>>>,
    jobs: Option<Sender<(Frame, u64)>>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ThreadedTextScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadedTextScanner")
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

impl ThreadedTextScanner {
    pub fn spawn<R: TextRecognizer>(mut recognizer: R) -> Self {
        let busy = Arc::new(AtomicBool::new(false));
        let latest = Arc::new(Mutex::new(None));
        let (tx, rx) = channel::unbounded::<(Frame, u64)>();

        let worker_busy = Arc::clone(&busy);
        let worker_latest = Arc::clone(&latest);
        let handle = std::thread::spawn(move || {
            for (frame, kicked_at) in rx {
                match recognizer.recognize(&frame) {
                    Ok(out) => {
                        let reading = TextReading::new(&out.text, out.lines, kicked_at);
                        tracing::trace!(
                            chars = reading.normalized.len(),
                            lines = reading.lines,
                            "Text scanner finished"
                        );
                        if let Ok(mut slot) = worker_latest.lock() {
                            *slot = Some(reading);
                        }
                    }
                    Err(e) => tracing::debug!(error = %e, "Text scanner failed"),
                }
                worker_busy.store(false, Ordering::Release);
            }
        });

        Self {
            busy,
            latest,
            jobs: Some(tx),
            handle: Some(handle),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl TextScanner for ThreadedTextScanner {
    fn kick(&mut self, frame: &Frame, now_ms: u64) -> bool {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let sent = self
            .jobs
            .as_ref()
            .is_some_and(|tx| tx.send((frame.clone(), now_ms)).is_ok());
        if !sent {
            self.busy.store(false, Ordering::Release);
        }
        sent
    }

    fn latest(&self) -> Option<TextReading> {
        self.latest.lock().ok().and_then(|slot| slot.clone())
    }
}

impl Drop for ThreadedTextScanner {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Text scanner worker panicked");
            }
        }
    }
}

/// Rate limiting and freshness rules around a [`TextScanner`].
#[derive(Debug)]
pub struct TextGate<P> {
    scanner: P,
    config: TextGateConfig,
    last_kick_ms: Option<u64>,
}

impl<P: TextScanner> TextGate<P> {
    pub fn new(scanner: P, config: TextGateConfig) -> Self {
        Self {
            scanner,
            config,
            last_kick_ms: None,
        }
    }

    /// Kicks the scanner unless it was kicked within the last period.
    pub fn maybe_kick(&mut self, frame: &Frame, now_ms: u64) -> bool {
        if !super::runtime::elapsed(self.last_kick_ms, now_ms, self.config.period_ms) {
            return false;
        }
        let accepted = self.scanner.kick(frame, now_ms);
        if accepted {
            self.last_kick_ms = Some(now_ms);
        }
        accepted
    }

    /// Latest reading if it is not older than the stale limit.
    pub fn fresh_reading(&self, now_ms: u64) -> Option<TextReading> {
        self.scanner
            .latest()
            .filter(|r| now_ms.saturating_sub(r.read_at_ms) <= self.config.stale_ms)
    }

    /// Enough fresh text to count as a card face.
    pub fn text_present(&self, now_ms: u64) -> bool {
        self.fresh_reading(now_ms).is_some_and(|r| {
            r.normalized.len() >= self.config.min_chars || r.lines >= self.config.min_lines
        })
    }

    /// Fresh text that reads like a card back.
    pub fn deckish(&self, now_ms: u64) -> bool {
        self.fresh_reading(now_ms)
            .is_some_and(|r| is_deckish(&r.normalized))
    }

    pub fn config(&self) -> &TextGateConfig {
        &self.config
    }

    pub fn scanner(&self) -> &P {
        &self.scanner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    /// Scanner returning a fixed reading on every kick.
    #[derive(Default)]
    struct ScriptedScanner {
        text: String,
        lines: usize,
        kicks: u32,
        latest: Option<TextReading>,
    }

    impl TextScanner for ScriptedScanner {
        fn kick(&mut self, _frame: &Frame, now_ms: u64) -> bool {
            self.kicks += 1;
            self.latest = Some(TextReading::new(&self.text, self.lines, now_ms));
            true
        }

        fn latest(&self) -> Option<TextReading> {
            self.latest.clone()
        }
    }

    struct FixedRecognizer(&'static str);

    impl TextRecognizer for FixedRecognizer {
        fn recognize(&mut self, _frame: &Frame) -> Result<RecognizedText, String> {
            Ok(RecognizedText {
                text: self.0.to_string(),
                lines: 1,
            })
        }
    }

    #[test]
    fn test_normalize_keeps_letters_only() {
        assert_eq!(normalize_text("Magic: The Gathering 1993!"), "magicthegathering");
        assert!(is_deckish(&normalize_text("DECK master")));
        assert!(!is_deckish("dek"));
    }

    #[test]
    fn test_kicks_are_rate_limited() {
        let scanner = ScriptedScanner::default();
        let mut gate = TextGate::new(scanner, TextGateConfig::default());
        let frame = Frame::uniform(0, 8, 8, 0);

        assert!(gate.maybe_kick(&frame, 1000));
        assert!(!gate.maybe_kick(&frame, 1100));
        assert!(gate.maybe_kick(&frame, 1320));
        assert_eq!(gate.scanner().kicks, 2);
    }

    #[test]
    fn test_reading_goes_stale() {
        let scanner = ScriptedScanner {
            text: "a".repeat(40),
            ..Default::default()
        };
        let mut gate = TextGate::new(scanner, TextGateConfig::default());
        gate.maybe_kick(&Frame::uniform(0, 8, 8, 0), 0);

        assert!(gate.text_present(1200));
        assert!(!gate.text_present(1201));
    }

    #[test]
    fn test_line_count_counts_as_text() {
        let scanner = ScriptedScanner {
            text: "short".into(),
            lines: 2,
            ..Default::default()
        };
        let mut gate = TextGate::new(scanner, TextGateConfig::default());
        gate.maybe_kick(&Frame::uniform(0, 8, 8, 0), 0);
        assert!(gate.text_present(10));
        assert!(!gate.deckish(10));
    }

    #[test]
    fn test_threaded_scanner_delivers_reading() {
        let mut scanner = ThreadedTextScanner::spawn(FixedRecognizer("Deck Master"));
        assert!(scanner.kick(&Frame::uniform(0, 8, 8, 0), 42));

        let deadline = Instant::now() + Duration::from_secs(5);
        while scanner.latest().is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let reading = scanner.latest().unwrap();
        assert_eq!(reading.normalized, "deckmaster");
        assert_eq!(reading.read_at_ms, 42);
    }
}
