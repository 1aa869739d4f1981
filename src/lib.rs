//! Simulates the time evolution of a multi-qubit state by compiling each
//! circuit column into small GPU compute programs over a packed amplitude
//! buffer, then reading back per-wire probabilities and the final state.
//! A CPU reference path interprets the same gate descriptions directly.

pub mod circuit;
pub mod control_mask;
#[cfg(feature = "gpu")]
pub mod eval;
pub mod gate;
#[cfg(feature = "gpu")]
pub mod gpu;
#[cfg(feature = "gpu")]
pub mod ket;
pub mod matrix;
pub mod simulate;
pub mod stats;
pub mod stats_cache;
#[cfg(feature = "gpu")]
pub mod trader;

pub use circuit::{CircuitDefinition, CircuitDefinitionError, GateColumn, Slot};
pub use control_mask::ControlMask;
#[cfg(feature = "gpu")]
pub use eval::GpuEvaluator;
pub use gate::Gate;
#[cfg(feature = "gpu")]
pub use gpu::GpuContext;
pub use stats::{CircuitStats, EvalError};
pub use stats_cache::CircuitStatsCache;
