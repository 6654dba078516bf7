pub mod device;
mod env;
pub mod optimizer;
pub mod partition;
pub mod pressure;
pub mod registry;
pub mod rewrite;
pub mod spec;
pub mod stats;
pub mod swappable;
pub mod view;

pub use optimizer::{MemOptLevel, OptimizeError, OptimizeSummary, SwapOptimizer};
pub use spec::{AttrValue, DataType, Graph, Node};
