//! Relay statistics printed at shutdown.

use std::time::Duration;

use contracts::CorrelationId;

/// Statistics from a relay run
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    /// Total duration of the run
    pub duration: Duration,

    /// HTTP-side counters
    pub ingestion: ingestion::MetricsSnapshot,

    /// Dispatcher counters at shutdown
    pub dispatch: dispatcher::MetricsSnapshot,

    /// All dispatches finished within the grace period
    pub drained: bool,

    /// Envelopes still in flight when the grace period ran out
    pub abandoned: Vec<CorrelationId>,
}

impl RelayStats {
    /// Accepted requests per second
    pub fn accept_rate(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.ingestion.accepted as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Share of failed broker attempts, as percentage
    pub fn failure_rate(&self) -> f64 {
        if self.dispatch.attempts > 0 {
            (self.dispatch.failed_attempts as f64 / self.dispatch.attempts as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                     Relay Statistics                         ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Accepted: {}", self.ingestion.accepted);
        println!("   ├─ Invalid: {}", self.ingestion.invalid);
        println!("   ├─ Refused: {}", self.ingestion.refused);
        println!("   └─ Accept rate: {:.2}/s", self.accept_rate());

        println!("\n📈 Dispatch");
        println!("   ├─ Attempts: {}", self.dispatch.attempts);
        println!(
            "   ├─ Failed attempts: {} ({:.2}%)",
            self.dispatch.failed_attempts,
            self.failure_rate()
        );
        println!("   ├─ Delivered: {}", self.dispatch.delivered);
        println!("   └─ Dead-lettered: {}", self.dispatch.dead_lettered);

        if !self.abandoned.is_empty() {
            println!("\n⚠️  Still in flight at exit ({})", self.abandoned.len());
            for id in &self.abandoned {
                println!("   ├─ {}", id);
            }
        }

        println!();
    }
}
