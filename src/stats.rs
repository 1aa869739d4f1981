use std::collections::HashMap;
use std::error::Error;
use std::fmt::{self, Display};
use std::sync::Arc;

use num_complex::Complex;

use crate::circuit::CircuitDefinition;
use crate::matrix::Matrix;

/// Gate-specific display payload, keyed by the gate's column and row.
#[derive(Debug, Clone, PartialEq)]
pub enum CustomStat {
    /// Reduced density matrix over the display gate's span.
    DensityMatrix(Matrix),
}

/// Everything a single evaluation of a circuit at one time produced.
///
/// Immutable once built; the arrays are shared, so re-stamping a cached
/// result with a new time costs nothing and returns bit-identical data.
#[derive(Debug, Clone)]
pub struct CircuitStats {
    circuit: Arc<CircuitDefinition>,
    time: f64,
    wire_probabilities: Arc<Vec<Vec<f32>>>,
    final_amplitudes: Arc<Vec<Complex<f32>>>,
    custom_stats: Arc<HashMap<(usize, u32), CustomStat>>,
}

impl CircuitStats {
    pub(crate) fn new(
        circuit: Arc<CircuitDefinition>,
        time: f64,
        wire_probabilities: Vec<Vec<f32>>,
        final_amplitudes: Vec<Complex<f32>>,
        custom_stats: HashMap<(usize, u32), CustomStat>,
    ) -> CircuitStats {
        CircuitStats {
            circuit,
            time,
            wire_probabilities: Arc::new(wire_probabilities),
            final_amplitudes: Arc::new(final_amplitudes),
            custom_stats: Arc::new(custom_stats),
        }
    }

    /// Evaluate `circuit` at `time` on the CPU reference path.
    pub fn from_circuit_at_time(
        circuit: &Arc<CircuitDefinition>,
        time: f64,
    ) -> Result<CircuitStats, EvalError> {
        crate::simulate::circuit_stats(circuit, time)
    }

    pub fn circuit(&self) -> &Arc<CircuitDefinition> {
        &self.circuit
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Probabilities of each wire reading 1, per applied column.
    pub fn wire_probabilities(&self) -> &[Vec<f32>] {
        &self.wire_probabilities
    }

    /// Probability that `wire` reads 1 once `column` has been applied.
    pub fn wire_probability(&self, column: usize, wire: u32) -> f32 {
        self.wire_probabilities[column][wire as usize]
    }

    /// The state vector after the final column.
    pub fn final_amplitudes(&self) -> &[Complex<f32>] {
        &self.final_amplitudes
    }

    /// The payload a display gate at `(column, row)` produced, if any.
    pub fn custom_stat(&self, column: usize, row: u32) -> Option<&CustomStat> {
        self.custom_stats.get(&(column, row))
    }

    /// The same results presented as of a different time.
    ///
    /// Only valid when the circuit's outputs are known to be constant over
    /// the interval separating the two times; the cache enforces that.
    pub fn restamped(&self, time: f64) -> CircuitStats {
        CircuitStats {
            circuit: Arc::clone(&self.circuit),
            time,
            wire_probabilities: Arc::clone(&self.wire_probabilities),
            final_amplitudes: Arc::clone(&self.final_amplitudes),
            custom_stats: Arc::clone(&self.custom_stats),
        }
    }
}

/// Why an evaluation aborted. Configuration problems never land here; they
/// become per-gate disable reasons instead.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    /// A gate aborted the evaluation.
    GateFailed {
        column: usize,
        row: u32,
        message: String,
    },
    /// The gate only has a GPU implementation.
    NeedsGpu { gate: &'static str },
    /// The binding layer rejected a generated shader's arguments.
    #[cfg(feature = "gpu")]
    Shader(crate::gpu::shader::ShaderArgError),
}

impl Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::GateFailed {
                column,
                row,
                message,
            } => write!(f, "gate at column {column} row {row} failed: {message}"),
            EvalError::NeedsGpu { gate } => {
                write!(f, "gate {gate} is only implemented for the gpu engine")
            }
            #[cfg(feature = "gpu")]
            EvalError::Shader(e) => write!(f, "shader argument error: {e}"),
        }
    }
}

impl Error for EvalError {}

#[cfg(feature = "gpu")]
impl From<crate::gpu::shader::ShaderArgError> for EvalError {
    fn from(e: crate::gpu::shader::ShaderArgError) -> EvalError {
        EvalError::Shader(e)
    }
}

/// Marginal probability of each wire reading 1, from a full state vector.
pub fn wire_probabilities(amplitudes: &[Complex<f32>], wire_count: u32) -> Vec<f32> {
    (0..wire_count)
        .map(|wire| {
            amplitudes
                .iter()
                .enumerate()
                .filter(|(index, _)| index >> wire & 1 == 1)
                .map(|(_, amp)| amp.norm_sqr())
                .sum()
        })
        .collect()
}

/// Reduced density matrix of the `span` wires starting at `row`, tracing
/// out everything else.
pub fn density_matrix(amplitudes: &[Complex<f32>], row: u32, span: u32) -> Matrix {
    let dim = 1usize << span;
    let span_mask = (dim - 1) << row;
    let mut data = vec![Complex::ZERO; dim * dim];
    for (index, amp) in amplitudes.iter().enumerate() {
        let u = (index & span_mask) >> row;
        let rest = index & !span_mask;
        for v in 0..dim {
            let partner = amplitudes[rest | (v << row)];
            data[u * dim + v] += amp * partner.conj();
        }
    }
    Matrix::new(dim, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_probabilities_of_a_basis_state() {
        let mut amps = vec![Complex::ZERO; 8];
        amps[0b101] = Complex::ONE;
        assert_eq!(wire_probabilities(&amps, 3), vec![1.0, 0.0, 1.0]);
    }

    #[test]
    fn density_matrix_of_an_equal_superposition() {
        let s = std::f32::consts::FRAC_1_SQRT_2;
        let amps = vec![
            Complex::new(s, 0.0),
            Complex::new(s, 0.0),
        ];
        let rho = density_matrix(&amps, 0, 1);
        for row in 0..2 {
            for col in 0..2 {
                assert!((rho.at(row, col) - Complex::new(0.5, 0.0)).norm() < 1e-6);
            }
        }
    }

    #[test]
    fn density_matrix_traces_out_other_wires() {
        // Bell pair: tracing out one half leaves the maximally mixed state.
        let s = std::f32::consts::FRAC_1_SQRT_2;
        let mut amps = vec![Complex::ZERO; 4];
        amps[0b00] = Complex::new(s, 0.0);
        amps[0b11] = Complex::new(s, 0.0);
        let rho = density_matrix(&amps, 0, 1);
        assert!((rho.at(0, 0) - Complex::new(0.5, 0.0)).norm() < 1e-6);
        assert!((rho.at(1, 1) - Complex::new(0.5, 0.0)).norm() < 1e-6);
        assert!(rho.at(0, 1).norm() < 1e-6);
        assert!(rho.at(1, 0).norm() < 1e-6);
    }
}
