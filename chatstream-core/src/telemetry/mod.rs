//! Telemetry for streamed requests.
//! Nothing is emitted unless a sink is handed to the session builder.

pub mod keys;
pub mod types;
#[cfg(test)]
pub mod test_span;

pub use keys::*;
pub use types::*;

/// Implement this to receive one record per finalized request.
///
/// Requirements:
/// - Implementations must be thread-safe (`Send + Sync`) and `'static`.
/// - `record_completion` runs on the request task; keep it cheap and never panic.
pub trait TelemetrySink: Send + Sync + 'static {
    fn record_completion(&self, log: CompletionLog);
}

/// Collects records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    logs: std::sync::Mutex<Vec<CompletionLog>>,
}

impl MemorySink {
    pub fn take(&self) -> Vec<CompletionLog> {
        self.logs
            .lock()
            .map(|mut l| std::mem::take(&mut *l))
            .unwrap_or_default()
    }
}

impl TelemetrySink for MemorySink {
    fn record_completion(&self, log: CompletionLog) {
        if let Ok(mut logs) = self.logs.lock() {
            logs.push(log);
        }
    }
}
