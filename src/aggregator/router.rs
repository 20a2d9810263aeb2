//! Health-aware source routing.
//!
//! Keeps the adapter set ordered by priority and filters it through a
//! time-bounded health cache. Health probes are single-flight per adapter so
//! concurrent callers cannot stampede a provider's status endpoint.

use log::{debug, info};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::sources::SourceAdapter;

#[derive(Debug, Clone, Copy)]
struct HealthEntry {
    /// `None` until the first probe answers; unknown adapters are
    /// optimistically routable.
    healthy: Option<bool>,
    last_checked: Option<Instant>,
}

impl HealthEntry {
    fn unknown() -> Self {
        Self {
            healthy: None,
            last_checked: None,
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.last_checked
            .map(|at| at.elapsed() < ttl)
            .unwrap_or(false)
    }
}

pub struct SourceRouter<S: SourceAdapter + ?Sized> {
    adapters: Vec<Arc<S>>,
    health: Mutex<HashMap<String, HealthEntry>>,
    probes: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    health_ttl: Duration,
}

impl<S: SourceAdapter + ?Sized> SourceRouter<S> {
    pub fn new(mut adapters: Vec<Arc<S>>, health_ttl: Duration) -> Self {
        adapters.sort_by(|a, b| {
            b.priority()
                .cmp(&a.priority())
                .then_with(|| a.name().cmp(b.name()))
        });
        Self {
            adapters,
            health: Mutex::new(HashMap::new()),
            probes: Mutex::new(HashMap::new()),
            health_ttl,
        }
    }

    /// All adapters in priority order, ignoring health. Used for provenance.
    pub fn all_sources(&self) -> &[Arc<S>] {
        &self.adapters
    }

    /// The currently usable subset, in priority order. Adapters whose
    /// verdict is stale get re-probed (one probe per adapter at a time);
    /// only an explicit `healthy == false` excludes an adapter.
    pub async fn usable_sources(&self) -> Vec<Arc<S>> {
        let mut usable = Vec::with_capacity(self.adapters.len());
        for adapter in &self.adapters {
            self.ensure_probed(adapter).await;
            let verdict = self
                .health
                .lock()
                .ok()
                .and_then(|h| h.get(adapter.name()).map(|e| e.healthy))
                .unwrap_or(None);
            if verdict != Some(false) {
                usable.push(adapter.clone());
            }
        }
        usable
    }

    /// Immediately demotes an adapter that just failed mid-call. Its next
    /// re-probe is deferred by the normal interval.
    pub fn mark_unhealthy(&self, name: &str) {
        if let Ok(mut health) = self.health.lock() {
            info!("marking source '{}' unhealthy", name);
            health.insert(
                name.to_string(),
                HealthEntry {
                    healthy: Some(false),
                    last_checked: Some(Instant::now()),
                },
            );
        }
    }

    async fn ensure_probed(&self, adapter: &Arc<S>) {
        let name = adapter.name().to_string();

        let fresh = self
            .health
            .lock()
            .ok()
            .map(|h| {
                h.get(&name)
                    .copied()
                    .unwrap_or_else(HealthEntry::unknown)
                    .is_fresh(self.health_ttl)
            })
            .unwrap_or(true);
        if fresh {
            return;
        }

        let gate = {
            let mut probes = match self.probes.lock() {
                Ok(probes) => probes,
                Err(_) => return,
            };
            probes
                .entry(name.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = gate.lock().await;

        // Someone else may have probed while we waited on the gate.
        let still_stale = self
            .health
            .lock()
            .ok()
            .map(|h| {
                !h.get(&name)
                    .copied()
                    .unwrap_or_else(HealthEntry::unknown)
                    .is_fresh(self.health_ttl)
            })
            .unwrap_or(false);
        if !still_stale {
            return;
        }

        let healthy = adapter.is_available().await;
        debug!("health probe for '{}': {}", name, healthy);
        if let Ok(mut health) = self.health.lock() {
            health.insert(
                name,
                HealthEntry {
                    healthy: Some(healthy),
                    last_checked: Some(Instant::now()),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct FakeAdapter {
        name: String,
        priority: u8,
        available: AtomicBool,
        probes: AtomicU32,
    }

    impl FakeAdapter {
        fn new(name: &str, priority: u8, available: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                priority,
                available: AtomicBool::new(available),
                probes: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl SourceAdapter for FakeAdapter {
        fn name(&self) -> &str {
            &self.name
        }
        fn priority(&self) -> u8 {
            self.priority
        }
        fn reliability(&self) -> f64 {
            0.9
        }
        async fn is_available(&self) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.available.load(Ordering::SeqCst)
        }
    }

    fn router(adapters: Vec<Arc<FakeAdapter>>) -> SourceRouter<FakeAdapter> {
        SourceRouter::new(adapters, Duration::from_secs(300))
    }

    #[tokio::test]
    async fn sources_come_back_in_priority_order() {
        let r = router(vec![
            FakeAdapter::new("low", 75, true),
            FakeAdapter::new("high", 95, true),
            FakeAdapter::new("mid", 85, true),
        ]);
        let names: Vec<_> = r
            .usable_sources()
            .await
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        assert_eq!(names, vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn unhealthy_adapters_are_filtered_out() {
        let r = router(vec![
            FakeAdapter::new("up", 95, true),
            FakeAdapter::new("down", 85, false),
        ]);
        let names: Vec<_> = r
            .usable_sources()
            .await
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        assert_eq!(names, vec!["up"]);
    }

    #[tokio::test]
    async fn health_verdicts_are_cached_for_the_ttl() {
        let adapter = FakeAdapter::new("src", 95, true);
        let r = router(vec![adapter.clone()]);
        r.usable_sources().await;
        r.usable_sources().await;
        r.usable_sources().await;
        assert_eq!(adapter.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mark_unhealthy_defers_the_next_probe() {
        let adapter = FakeAdapter::new("src", 95, true);
        let r = router(vec![adapter.clone()]);
        r.mark_unhealthy("src");
        let usable = r.usable_sources().await;
        assert!(usable.is_empty());
        // The fresh negative verdict must suppress a re-probe.
        assert_eq!(adapter.probes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_probe() {
        let adapter = FakeAdapter::new("src", 95, true);
        let r = Arc::new(SourceRouter::new(
            vec![adapter.clone()],
            Duration::from_secs(300),
        ));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let r = r.clone();
            handles.push(tokio::spawn(async move { r.usable_sources().await.len() }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), 1);
        }
        assert_eq!(adapter.probes.load(Ordering::SeqCst), 1);
    }
}
