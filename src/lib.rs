//! # RCF
//!
//! Governs a multi-step agent run: records it as a trajectory graph, turns
//! per-step vote distributions into uncertainty scores, sizes the compute for
//! the next step from that uncertainty, prunes loops and dead branches from
//! the graph, and watches the session for fatigue and goal hijacking.
//!
//! ## Features
//!
//! - **Trajectory Graph**: append-only node/edge arena with stable JSON form
//! - **Uncertainty**: normalized Shannon entropy of votes or probabilities
//! - **Compute Allocation**: threshold bands with a capped linear ramp
//! - **Pruning**: iterative cycle removal and unproductive-branch pruning
//! - **Failure Monitor**: rolling-window fatigue and hijack scores with alerts
//!
//! ## Architecture
//!
//! ```text
//! Driving loop → Session → UncertaintyEstimator → ComputeAllocator
//!                   ↓                ↓
//!           TrajectoryGraph → FailureMonitor
//!                   ↓
//!           TrajectoryPruner (on snapshots)
//! ```
//!
//! ## Example
//!
//! ```
//! use rcf::{Config, Session, StepInput};
//!
//! let mut session = Session::new(&Config::default())?;
//! let outcome = session.record_step(StepInput::new("search", vec!["a", "a", "b", "a"]))?;
//! assert_eq!(outcome.allocation.compute, 6);
//! assert!(outcome.alerts.is_empty());
//! # Ok::<(), rcf::AppError>(())
//! ```

#![warn(missing_docs)]

/// Compute allocation from uncertainty.
pub mod allocator;
/// Command-line interface.
pub mod cli;
/// Configuration management.
pub mod config;
/// Error types and result aliases.
pub mod error;
/// Fatigue and hijack monitoring.
pub mod monitor;
/// Loop and dead-branch pruning.
pub mod pruner;
/// Per-session facade for the driving loop.
pub mod session;
/// Trajectory graph and its serialized form.
pub mod trajectory;
/// Uncertainty estimation from votes.
pub mod uncertainty;

pub use allocator::{AllocationBand, AllocationDecision, ComputeAllocator};
pub use config::Config;
pub use error::{AppError, AppResult, CoreError, CoreResult};
pub use monitor::{AlertKind, FailureMonitor, HijackDetector, MonitorSnapshot, StepRecord};
pub use pruner::{PruneReport, TrajectoryPruner};
pub use session::{Session, StepInput, StepOutcome};
pub use trajectory::{Edge, Node, NodeId, TrajectoryGraph};
pub use uncertainty::{UncertaintyEstimator, VoteSet};
