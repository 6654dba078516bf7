//! Top-level swap optimizer: memory-pressure gate, partitioner, and swap
//! rewriter wired into one graph-to-graph pass with before/after statistics.

use std::env;

use thiserror::Error;

use crate::device::Cluster;
use crate::partition::partition_graph;
use crate::pressure::{need_swap, MemoryEstimator};
use crate::rewrite::{swap_tensors, SwapStats, DEFAULT_PARTITION_DISTANCE};
use crate::spec::Graph;
use crate::stats::{graph_stats, GraphStats};
use crate::view::{GraphView, GraphViewError, NodeId};

/// Environment variable carrying the partition quantum.
pub const QUANTUM_ENV_VAR: &str = "KPART";

/// Memory optimization level requested by the caller. Partitioning and
/// swap rewriting run for every level except [`MemOptLevel::NoMemOpt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOptLevel {
    DefaultMemOpt,
    SwappingHeuristics,
    Heuristics,
    Manual,
    NoMemOpt,
}

impl MemOptLevel {
    pub fn swapping_enabled(self) -> bool {
        !matches!(self, MemOptLevel::NoMemOpt)
    }
}

#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error("invalid partition quantum: {reason}")]
    InvalidConfig { reason: String },
    #[error(transparent)]
    InvalidGraph(#[from] GraphViewError),
}

/// Reads the partition quantum from [`QUANTUM_ENV_VAR`]. The quantum has no
/// default: a missing or non-positive value is a configuration error, not an
/// implicit zero.
pub fn partition_quantum_from_env() -> Result<usize, OptimizeError> {
    let raw = env::var(QUANTUM_ENV_VAR).map_err(|_| OptimizeError::InvalidConfig {
        reason: format!("{QUANTUM_ENV_VAR} is not set"),
    })?;
    let quantum = raw
        .trim()
        .parse::<usize>()
        .map_err(|_| OptimizeError::InvalidConfig {
            reason: format!("{QUANTUM_ENV_VAR}='{raw}' is not a positive integer"),
        })?;
    if quantum == 0 {
        return Err(OptimizeError::InvalidConfig {
            reason: format!("{QUANTUM_ENV_VAR} must be positive"),
        });
    }
    Ok(quantum)
}

/// Outcome of one optimizer run.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct OptimizeSummary {
    pub stats_before: GraphStats,
    pub stats_after: GraphStats,
    /// Advisory gate verdict; `None` when no estimator was supplied or
    /// estimation failed.
    pub need_swap: Option<bool>,
    pub num_partitions: usize,
    pub swaps: SwapStats,
}

/// Memory-pressure-aware partitioner and tensor swap rewriter.
pub struct SwapOptimizer {
    level: MemOptLevel,
    partition_distance: i32,
    estimator: Option<Box<dyn MemoryEstimator>>,
}

impl SwapOptimizer {
    pub fn new(level: MemOptLevel) -> Self {
        SwapOptimizer {
            level,
            partition_distance: DEFAULT_PARTITION_DISTANCE,
            estimator: None,
        }
    }

    /// Overrides the partition-distance threshold of the rewriter.
    pub fn with_partition_distance(mut self, partition_distance: i32) -> Self {
        self.partition_distance = partition_distance;
        self
    }

    /// Supplies a static memory estimator backing the pressure gate.
    pub fn with_estimator(mut self, estimator: Box<dyn MemoryEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    /// Partitions `graph` and inserts swap nodes for long-lived tensors.
    ///
    /// The gate verdict is advisory: rewriting proceeds for every swapping
    /// level whether or not memory pressure was detected, and estimation
    /// failures are logged rather than propagated.
    pub fn optimize(
        &self,
        cluster: &Cluster,
        graph: &mut Graph,
    ) -> Result<OptimizeSummary, OptimizeError> {
        let stats_before = graph_stats(&GraphView::new(graph)?);
        log::info!("graph stats before swap rewrite: {stats_before}");

        let mut summary = OptimizeSummary {
            stats_before,
            stats_after: stats_before,
            ..OptimizeSummary::default()
        };
        if !self.level.swapping_enabled() {
            return Ok(summary);
        }

        summary.need_swap = self.check_memory_pressure(cluster);

        let quantum = partition_quantum_from_env()?;
        let partitions = partition_graph(graph, cluster.devices(), quantum)?;
        summary.num_partitions = partitions.len();

        summary.swaps = swap_tensors(graph, &partitions, self.partition_distance)?;

        let view = GraphView::new(graph)?;
        summary.stats_after = graph_stats(&view);
        log::info!("graph stats after swap rewrite: {}", summary.stats_after);
        if crate::env::pass_stats_enabled() {
            dump_partitioned_graph(&view);
        }
        Ok(summary)
    }

    fn check_memory_pressure(&self, cluster: &Cluster) -> Option<bool> {
        let estimator = self.estimator.as_deref()?;
        match estimator.infer_statically(cluster.devices()) {
            Ok(peak_usage) => {
                let pressured = need_swap(cluster.devices(), &peak_usage);
                log::info!("memory pressure check: need_swap = {pressured}");
                Some(pressured)
            }
            Err(error) => {
                log::warn!("failed to infer memory usage: {error}");
                None
            }
        }
    }
}

fn dump_partitioned_graph(view: &GraphView<'_>) {
    for i in 0..view.num_nodes() {
        let node = view.node(NodeId(i as u32));
        println!(
            "[swap-pass] node = {} op = {} device = {} partition = {} num_inputs = {}",
            node.name,
            node.op,
            node.device,
            node.partition,
            node.input.len()
        );
    }
}
