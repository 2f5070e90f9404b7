use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Microphone capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate the transcription endpoint expects (Hz)
    pub sample_rate: u32,
    /// Samples per emitted frame. 1600 samples at 16 kHz is 100 ms of audio,
    /// small enough for live captioning latency
    pub frame_samples: usize,
    /// Substring match against input device names; default device when unset
    pub device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_samples: 1_600,
            device: None,
        }
    }
}

/// Reconnection policy for the transcription transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Attempts before the transport gives up and reports failure
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay before reconnect attempt `attempt` (zero-based):
    /// `min(base * 2^attempt, max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.min(16);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Throttle policy for annotation dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Minimum elapsed time between annotation dispatches
    pub window_ms: u64,
    /// Minimum accumulated text length (trimmed) before a dispatch
    pub min_text_chars: usize,
    /// When set, pending text older than the window is flushed even without
    /// a new segment arriving. When unset, dispatch is evaluated only on
    /// segment arrival: short trailing utterances stay buffered until the
    /// next segment.
    pub idle_flush_ms: Option<u64>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            window_ms: 5_000,
            min_text_chars: 50,
            idle_flush_ms: None,
        }
    }
}

impl ThrottleConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn idle_flush(&self) -> Option<Duration> {
        self.idle_flush_ms.map(Duration::from_millis)
    }
}

/// Top-level configuration for a consultation streaming session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub audio: AudioConfig,
    pub reconnect: ReconnectConfig,
    pub throttle: ThrottleConfig,
    /// Keepalive interval for the transcription socket; the remote endpoint
    /// closes connections that go quiet
    pub keepalive_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            reconnect: ReconnectConfig::default(),
            throttle: ThrottleConfig::default(),
            keepalive_ms: 8_000,
        }
    }
}

impl StreamConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(rate) = env_parse("CONSULT_SAMPLE_RATE") {
            config.audio.sample_rate = rate;
        }
        if let Some(samples) = env_parse("CONSULT_FRAME_SAMPLES") {
            config.audio.frame_samples = samples;
        }
        config.audio.device = std::env::var("CONSULT_AUDIO_DEVICE").ok();

        if let Some(ms) = env_parse("CONSULT_RECONNECT_BASE_MS") {
            config.reconnect.base_delay_ms = ms;
        }
        if let Some(ms) = env_parse("CONSULT_RECONNECT_MAX_MS") {
            config.reconnect.max_delay_ms = ms;
        }
        if let Some(attempts) = env_parse("CONSULT_RECONNECT_MAX_ATTEMPTS") {
            config.reconnect.max_attempts = attempts;
        }

        if let Some(ms) = env_parse("CONSULT_THROTTLE_WINDOW_MS") {
            config.throttle.window_ms = ms;
        }
        if let Some(chars) = env_parse("CONSULT_THROTTLE_MIN_CHARS") {
            config.throttle.min_text_chars = chars;
        }
        config.throttle.idle_flush_ms = env_parse("CONSULT_IDLE_FLUSH_MS");

        if let Some(ms) = env_parse("CONSULT_KEEPALIVE_MS") {
            config.keepalive_ms = ms;
        }

        config
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}
