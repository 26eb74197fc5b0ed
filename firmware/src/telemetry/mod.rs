//! Diagnostic stream for the camera node.
//!
//! Core telemetry records are rendered through their `Display` form and
//! shipped over defmt on the target. Host builds print the same lines to
//! stdout so the formatting helpers stay testable off-target.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use core::time::Duration;

use camnode_core::telemetry::{DiagnosticSink, TelemetryInstant, TelemetryRecord, TimestampMicros};
use embassy_time::Instant;

/// Embassy instant wrapped so core telemetry can timestamp with it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct BootInstant(pub Instant);

impl TelemetryInstant for BootInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        let micros = self.0.saturating_duration_since(earlier.0).as_micros();
        Duration::from_micros(micros)
    }

    fn as_micros(&self) -> TimestampMicros {
        self.0.as_micros()
    }
}

/// Sink that mirrors every record to the console transport.
#[derive(Copy, Clone, Debug, Default)]
pub struct ConsoleSink;

impl DiagnosticSink<BootInstant> for ConsoleSink {
    fn emit(&mut self, record: &TelemetryRecord<BootInstant>) {
        emit_log(record, record.event.is_warning());
    }

    fn server_response(&mut self, attempt: u8, body: &[u8]) {
        emit_response(attempt, printable_prefix(body));
    }
}

/// Longest prefix of `body` that is valid UTF-8, without trailing whitespace.
pub fn printable_prefix(body: &[u8]) -> &str {
    let text = match core::str::from_utf8(body) {
        Ok(text) => text,
        Err(err) => core::str::from_utf8(&body[..err.valid_up_to()]).unwrap_or_default(),
    };
    text.trim_end()
}

#[cfg(target_os = "none")]
fn emit_log(record: &TelemetryRecord<BootInstant>, warning: bool) {
    if warning {
        defmt::warn!("{}", defmt::Display2Format(record));
    } else {
        defmt::info!("{}", defmt::Display2Format(record));
    }
}

#[cfg(not(target_os = "none"))]
fn emit_log(record: &TelemetryRecord<BootInstant>, warning: bool) {
    if warning {
        println!("WARN {record}");
    } else {
        println!("{record}");
    }
}

#[cfg(target_os = "none")]
fn emit_response(attempt: u8, text: &str) {
    defmt::info!("  server response (attempt {}): {}", attempt, text);
}

#[cfg(not(target_os = "none"))]
fn emit_response(attempt: u8, text: &str) {
    println!("  server response (attempt {attempt}): {text}");
}

/// Embassy timer driving the cycle's polls and retry delays.
#[cfg(target_os = "none")]
pub struct EmbassyClock;

#[cfg(target_os = "none")]
impl camnode_core::telemetry::Timebase for EmbassyClock {
    type Instant = BootInstant;

    fn now(&self) -> BootInstant {
        BootInstant(Instant::now())
    }

    async fn delay(&mut self, duration: Duration) {
        let ticks = embassy_time::Duration::try_from(duration).unwrap_or(embassy_time::Duration::MAX);
        embassy_time::Timer::after(ticks).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printable_prefix_stops_at_invalid_utf8() {
        assert_eq!(printable_prefix(b"{\"stored\":true}\r\n"), "{\"stored\":true}");
        assert_eq!(printable_prefix(b"ok\xff\xfe"), "ok");
        assert_eq!(printable_prefix(b""), "");
    }

    #[test]
    fn boot_instant_saturates() {
        let earlier = BootInstant(Instant::from_micros(2_500));
        let later = BootInstant(Instant::from_micros(4_000));

        assert_eq!(later.saturating_duration_since(earlier), Duration::from_micros(1_500));
        assert_eq!(earlier.saturating_duration_since(later), Duration::ZERO);
        assert_eq!(later.as_micros(), 4_000);
    }
}
