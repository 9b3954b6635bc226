//! Inbound stream diagnostics.
//!
//! [`Diagnostics`] keeps rolling counters that reset on each reporting
//! interval. [`StageTimings`] averages how long each loop stage takes.

use std::fmt;
use std::time::{Duration, Instant};

/// One reporting interval's worth of inbound counters.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticsReport {
    pub elapsed: Duration,
    pub packets: u64,
    pub bytes: u64,
    pub lost_packets: u64,
    pub decode_failures: u64,
    /// Samples per channel decoded in this interval.
    pub decoded_samples: u64,
    pub min_sample: i16,
    pub max_sample: i16,
}

impl DiagnosticsReport {
    /// Effective decoded sample rate over the interval.
    pub fn sample_rate_hz(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.decoded_samples as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for DiagnosticsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rate={:.0}Hz packets={} bytes={} lost={} decode_failures={} pcm=[{}, {}]",
            self.sample_rate_hz(),
            self.packets,
            self.bytes,
            self.lost_packets,
            self.decode_failures,
            self.min_sample,
            self.max_sample
        )
    }
}

pub struct Diagnostics {
    interval: Duration,
    window_start: Instant,
    packets: u64,
    bytes: u64,
    lost_packets: u64,
    decode_failures: u64,
    decoded_samples: u64,
    min_sample: i16,
    max_sample: i16,
    last_sequence: Option<u16>,
}

impl Diagnostics {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    fn starting_at(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            window_start: now,
            packets: 0,
            bytes: 0,
            lost_packets: 0,
            decode_failures: 0,
            decoded_samples: 0,
            min_sample: i16::MAX,
            max_sample: i16::MIN,
            last_sequence: None,
        }
    }

    /// Counts an arriving packet and returns how many packets were skipped
    /// since the previous one.
    pub fn record_packet(&mut self, sequence: u16, payload_len: usize) -> u16 {
        self.packets += 1;
        self.bytes += payload_len as u64;

        let gap = match self.last_sequence {
            Some(last) => {
                let delta = sequence.wrapping_sub(last);
                // Anything "behind" us is a reorder or duplicate, not loss,
                // and must not move the tracker backwards.
                if delta == 0 || delta > u16::MAX / 2 {
                    return 0;
                }
                delta - 1
            }
            None => 0,
        };
        self.last_sequence = Some(sequence);
        self.lost_packets += gap as u64;
        gap
    }

    pub fn record_decode_failure(&mut self) {
        self.decode_failures += 1;
    }

    /// Accounts for one decoded frame of interleaved PCM.
    pub fn record_pcm(&mut self, samples_per_channel: usize, pcm: &[i16]) {
        self.decoded_samples += samples_per_channel as u64;
        for &s in pcm {
            self.min_sample = self.min_sample.min(s);
            self.max_sample = self.max_sample.max(s);
        }
    }

    /// Returns a report and resets the counters once the interval has passed.
    pub fn poll(&mut self) -> Option<DiagnosticsReport> {
        self.poll_at(Instant::now())
    }

    fn poll_at(&mut self, now: Instant) -> Option<DiagnosticsReport> {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.interval {
            return None;
        }

        let seen_pcm = self.decoded_samples > 0;
        let report = DiagnosticsReport {
            elapsed,
            packets: self.packets,
            bytes: self.bytes,
            lost_packets: self.lost_packets,
            decode_failures: self.decode_failures,
            decoded_samples: self.decoded_samples,
            min_sample: if seen_pcm { self.min_sample } else { 0 },
            max_sample: if seen_pcm { self.max_sample } else { 0 },
        };

        let last_sequence = self.last_sequence;
        *self = Self::starting_at(self.interval, now);
        self.last_sequence = last_sequence;
        Some(report)
    }
}

/// Loop stages timed by [`StageTimings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Read,
    Decode,
    Write,
}

/// Per-stage average durations over a fixed number of iterations.
pub struct StageTimings {
    window: u32,
    iterations: u32,
    totals: [Duration; 3],
}

impl StageTimings {
    pub fn new(window: u32) -> Self {
        Self {
            window: window.max(1),
            iterations: 0,
            totals: [Duration::ZERO; 3],
        }
    }

    pub fn add(&mut self, stage: Stage, elapsed: Duration) {
        self.totals[stage as usize] += elapsed;
    }

    /// Closes one iteration. Every `window` iterations returns the averages
    /// `(read, decode, write)` and starts over.
    pub fn finish_iteration(&mut self) -> Option<[Duration; 3]> {
        self.iterations += 1;
        if self.iterations < self.window {
            return None;
        }
        let averages = self.totals.map(|total| total / self.iterations);
        self.iterations = 0;
        self.totals = [Duration::ZERO; 3];
        Some(averages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_after_interval_and_reset() {
        let start = Instant::now();
        let mut diag = Diagnostics::starting_at(Duration::from_secs(1), start);

        diag.record_packet(10, 100);
        diag.record_pcm(960, &[-5, 300, 7]);
        diag.record_packet(11, 50);
        diag.record_pcm(960, &[-900, 2]);

        assert!(diag.poll_at(start + Duration::from_millis(500)).is_none());

        let report = diag.poll_at(start + Duration::from_secs(1)).unwrap();
        assert_eq!(report.packets, 2);
        assert_eq!(report.bytes, 150);
        assert_eq!(report.decoded_samples, 1920);
        assert_eq!(report.min_sample, -900);
        assert_eq!(report.max_sample, 300);
        assert!((report.sample_rate_hz() - 1920.0).abs() < 1e-6);

        let empty = diag.poll_at(start + Duration::from_secs(2)).unwrap();
        assert_eq!(empty.packets, 0);
        assert_eq!(empty.min_sample, 0);
        assert_eq!(empty.max_sample, 0);
    }

    #[test]
    fn test_sequence_gaps_count_as_loss() {
        let mut diag = Diagnostics::new(Duration::from_secs(1));
        assert_eq!(diag.record_packet(u16::MAX - 1, 1), 0);
        assert_eq!(diag.record_packet(u16::MAX, 1), 0);
        // Wraps cleanly.
        assert_eq!(diag.record_packet(0, 1), 0);
        assert_eq!(diag.record_packet(3, 1), 2);
        // A late packet is not a loss.
        assert_eq!(diag.record_packet(2, 1), 0);
    }

    #[test]
    fn test_late_packet_does_not_rewind_tracking() {
        let mut diag = Diagnostics::new(Duration::from_secs(1));
        let gaps: Vec<u16> = [0, 2, 1, 3]
            .into_iter()
            .map(|seq| diag.record_packet(seq, 1))
            .collect();
        assert_eq!(gaps, vec![0, 1, 0, 0]);
        assert_eq!(diag.lost_packets, 1);

        // A duplicate is ignored too.
        assert_eq!(diag.record_packet(3, 1), 0);
        assert_eq!(diag.record_packet(4, 1), 0);
    }

    #[test]
    fn test_sequence_tracking_survives_reset() {
        let start = Instant::now();
        let mut diag = Diagnostics::starting_at(Duration::from_millis(10), start);
        diag.record_packet(5, 1);
        diag.poll_at(start + Duration::from_millis(20)).unwrap();
        assert_eq!(diag.record_packet(6, 1), 0);
    }

    #[test]
    fn test_stage_timings_average() {
        let mut timings = StageTimings::new(2);
        timings.add(Stage::Read, Duration::from_millis(4));
        timings.add(Stage::Decode, Duration::from_millis(2));
        assert!(timings.finish_iteration().is_none());
        timings.add(Stage::Read, Duration::from_millis(2));
        timings.add(Stage::Write, Duration::from_millis(1));
        let averages = timings.finish_iteration().unwrap();
        assert_eq!(averages[Stage::Read as usize], Duration::from_millis(3));
        assert_eq!(averages[Stage::Decode as usize], Duration::from_millis(1));
        assert_eq!(averages[Stage::Write as usize], Duration::from_micros(500));
        assert!(timings.finish_iteration().is_none());
    }
}
