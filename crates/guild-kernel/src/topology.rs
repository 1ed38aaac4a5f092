//! Runtime topology detection.
//!
//! The host exposes marker capabilities through [`CapabilityProbe`]. The
//! detector asks once, classifies, and caches the answer for its lifetime.
//! Probe failures (errors or panics) classify as [`Topology::Unknown`],
//! which routing treats like a single global authority.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tracing::{debug, info, warn};

/// Threading model of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topology {
    /// One tick thread owns all state
    SingleAuthority,
    /// Regions own disjoint state on their own threads; a global region owns the rest
    PartitionedRegions,
    /// Probing failed; routed like `SingleAuthority`
    Unknown,
}

impl Topology {
    pub fn code(self) -> &'static str {
        match self {
            Topology::SingleAuthority => "single_authority",
            Topology::PartitionedRegions => "partitioned_regions",
            Topology::Unknown => "unknown",
        }
    }

    pub fn is_partitioned(self) -> bool {
        matches!(self, Topology::PartitionedRegions)
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Capabilities a host may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    /// Per-region schedulers exist
    RegionizedScheduler,
    /// A dedicated scheduler for the global region exists
    GlobalRegionScheduler,
    /// A classic single tick thread exists
    TickThread,
}

#[derive(Debug, Clone, Error)]
#[error("probe for {marker:?} failed: {reason}")]
pub struct ProbeError {
    pub marker: Marker,
    pub reason: String,
}

/// Pure capability lookup implemented by the host.
pub trait CapabilityProbe: Send + Sync {
    fn probe(&self, marker: Marker) -> Result<bool, ProbeError>;
}

/// Memoized topology classification.
pub struct TopologyDetector {
    probe: Arc<dyn CapabilityProbe>,
    resolved: OnceLock<Topology>,
}

impl TopologyDetector {
    pub fn new(probe: Arc<dyn CapabilityProbe>) -> Self {
        Self {
            probe,
            resolved: OnceLock::new(),
        }
    }

    /// Detector with a fixed answer.
    pub fn fixed(topology: Topology) -> Self {
        let resolved = OnceLock::new();
        let _ = resolved.set(topology);
        Self {
            probe: Arc::new(NoCapabilities),
            resolved,
        }
    }

    /// Classify the host. Probes run on the first call only.
    pub fn topology(&self) -> Topology {
        *self.resolved.get_or_init(|| {
            let topology = classify(self.probe.as_ref());
            info!(topology = %topology, "Runtime topology resolved");
            topology
        })
    }
}

impl fmt::Debug for TopologyDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopologyDetector")
            .field("resolved", &self.resolved.get())
            .finish()
    }
}

fn probe_safely(probe: &dyn CapabilityProbe, marker: Marker) -> Option<bool> {
    match catch_unwind(AssertUnwindSafe(|| probe.probe(marker))) {
        Ok(Ok(present)) => {
            debug!(?marker, present, "Capability probed");
            Some(present)
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Capability probe failed");
            None
        }
        Err(_) => {
            warn!(?marker, "Capability probe panicked");
            None
        }
    }
}

fn classify(probe: &dyn CapabilityProbe) -> Topology {
    match probe_safely(probe, Marker::RegionizedScheduler) {
        None => return Topology::Unknown,
        Some(true) => {
            return match probe_safely(probe, Marker::GlobalRegionScheduler) {
                Some(true) => Topology::PartitionedRegions,
                _ => Topology::Unknown,
            };
        }
        Some(false) => {}
    }
    match probe_safely(probe, Marker::TickThread) {
        Some(true) => Topology::SingleAuthority,
        _ => Topology::Unknown,
    }
}

struct NoCapabilities;

impl CapabilityProbe for NoCapabilities {
    fn probe(&self, _marker: Marker) -> Result<bool, ProbeError> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticProbe {
        present: HashSet<Marker>,
        calls: AtomicUsize,
    }

    impl StaticProbe {
        fn with(markers: &[Marker]) -> Arc<Self> {
            Arc::new(Self {
                present: markers.iter().copied().collect(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl CapabilityProbe for StaticProbe {
        fn probe(&self, marker: Marker) -> Result<bool, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.present.contains(&marker))
        }
    }

    struct FailingProbe;

    impl CapabilityProbe for FailingProbe {
        fn probe(&self, marker: Marker) -> Result<bool, ProbeError> {
            Err(ProbeError {
                marker,
                reason: "host refused introspection".into(),
            })
        }
    }

    struct PanickingProbe;

    impl CapabilityProbe for PanickingProbe {
        fn probe(&self, _marker: Marker) -> Result<bool, ProbeError> {
            panic!("probe exploded");
        }
    }

    #[test]
    fn test_single_authority() {
        let detector = TopologyDetector::new(StaticProbe::with(&[Marker::TickThread]));
        assert_eq!(detector.topology(), Topology::SingleAuthority);
    }

    #[test]
    fn test_partitioned_requires_global_region() {
        let full = TopologyDetector::new(StaticProbe::with(&[
            Marker::RegionizedScheduler,
            Marker::GlobalRegionScheduler,
        ]));
        assert_eq!(full.topology(), Topology::PartitionedRegions);

        let partial = TopologyDetector::new(StaticProbe::with(&[Marker::RegionizedScheduler]));
        assert_eq!(partial.topology(), Topology::Unknown);
    }

    #[test]
    fn test_no_markers_is_unknown() {
        let detector = TopologyDetector::new(StaticProbe::with(&[]));
        assert_eq!(detector.topology(), Topology::Unknown);
    }

    #[test]
    fn test_probe_failures_fall_back_to_unknown() {
        assert_eq!(
            TopologyDetector::new(Arc::new(FailingProbe)).topology(),
            Topology::Unknown
        );
        assert_eq!(
            TopologyDetector::new(Arc::new(PanickingProbe)).topology(),
            Topology::Unknown
        );
    }

    #[test]
    fn test_probes_run_once() {
        let probe = StaticProbe::with(&[Marker::TickThread]);
        let detector = TopologyDetector::new(probe.clone());
        let first = detector.topology();
        let calls = probe.calls.load(Ordering::SeqCst);
        for _ in 0..5 {
            assert_eq!(detector.topology(), first);
        }
        assert_eq!(probe.calls.load(Ordering::SeqCst), calls);
    }

    #[test]
    fn test_fixed_detector() {
        assert_eq!(
            TopologyDetector::fixed(Topology::PartitionedRegions).topology(),
            Topology::PartitionedRegions
        );
    }
}
