//! Work dispatcher sizing (component G, §4.8).
//!
//! The queue/dedup/per-key-serialization/backoff contract itself is provided
//! entirely by `kube::runtime::Controller` — this module only resolves the
//! configurable worker pool size, the one knob spec.md leaves to the
//! deployment (`--worker-threads`, default CPU count).

/// Resolves the worker pool size: the configured value, or the host's CPU
/// count when unset, matching spec.md §4.8's default.
pub fn worker_count(configured: Option<usize>) -> usize {
    configured.unwrap_or_else(num_cpus::get).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_value_wins() {
        assert_eq!(worker_count(Some(4)), 4);
    }

    #[test]
    fn zero_is_clamped_to_one() {
        assert_eq!(worker_count(Some(0)), 1);
    }

    #[test]
    fn default_is_cpu_count() {
        assert_eq!(worker_count(None), num_cpus::get().max(1));
    }
}
