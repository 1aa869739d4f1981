use std::collections::HashMap;
use std::sync::Arc;

use num_complex::Complex;
use rayon::prelude::*;

use crate::circuit::{CircuitDefinition, ColumnContext, Slot};
use crate::control_mask::ControlMask;
use crate::gate::{ContextKey, DisplayKind, GateEffect, KetEnv, PermutationEffect, PhaseEffect};
use crate::matrix::Matrix;
use crate::stats::{self, CircuitStats, CustomStat, EvalError};

/// Evaluate `circuit` at `time` entirely on the CPU.
///
/// Interprets the same symbolic gate effects the GPU engine compiles to
/// shaders, column by column over a full state vector, so both paths
/// produce the same statistics.
pub fn circuit_stats(
    circuit: &Arc<CircuitDefinition>,
    time: f64,
) -> Result<CircuitStats, EvalError> {
    let wire_count = circuit.wire_count();
    let len = 1usize << wire_count;
    let mut amps = vec![Complex::ZERO; len];
    amps[0] = Complex::ONE;

    let reasons = circuit.disable_reasons();
    let mut wire_probs = Vec::with_capacity(circuit.columns().len());
    let mut custom = HashMap::new();

    for (col_index, column) in circuit.columns().iter().enumerate() {
        let controls = column.controls();
        let ctx = column.context();

        for (wire, slot) in column.slots().iter().enumerate() {
            let Slot::Gate(gate) = slot else { continue };
            if reasons[col_index][wire].is_some() {
                continue;
            }
            let row = wire as u32;
            match &gate.effect {
                GateEffect::Matrix(m) => apply_matrix(&mut amps, m, row, controls),
                GateEffect::MatrixFn(f) => apply_matrix(&mut amps, &f(time), row, controls),
                GateEffect::Permutation(p) => {
                    apply_permutation(&mut amps, p, gate.span, row, controls, &ctx, time)
                }
                GateEffect::Phase(p) => {
                    apply_phase(&mut amps, p, gate.span, row, controls, &ctx, time)
                }
                GateEffect::Display(_) | GateEffect::Identity => {}
                GateEffect::Fail(message) => {
                    return Err(EvalError::GateFailed {
                        column: col_index,
                        row,
                        message: (*message).to_string(),
                    })
                }
                #[cfg(feature = "gpu")]
                GateEffect::Custom(_) => return Err(EvalError::NeedsGpu { gate: gate.name }),
            }
        }

        if let Some((a, b)) = column.swap_pair() {
            apply_swap(&mut amps, a, b, controls);
        }

        for (wire, slot) in column.slots().iter().enumerate() {
            let Slot::Gate(gate) = slot else { continue };
            if reasons[col_index][wire].is_some() {
                continue;
            }
            if let GateEffect::Display(DisplayKind::DensityMatrix) = gate.effect {
                custom.insert(
                    (col_index, wire as u32),
                    CustomStat::DensityMatrix(stats::density_matrix(&amps, wire as u32, gate.span)),
                );
            }
        }

        wire_probs.push(stats::wire_probabilities(&amps, wire_count));
    }

    Ok(CircuitStats::new(
        Arc::clone(circuit),
        time,
        wire_probs,
        amps,
        custom,
    ))
}

fn ket_env(index: usize, span: u32, time: f64, ctx: &ColumnContext) -> KetEnv {
    let read = |key| match ctx.input_range(key) {
        Some(r) => (index >> r.offset & ((1 << r.length) - 1)) as u32,
        None => 0,
    };
    KetEnv {
        span,
        time,
        input_a: read(ContextKey::InputA),
        input_b: read(ContextKey::InputB),
        modulus: ctx.modulus().unwrap_or(0) as u32,
    }
}

fn apply_matrix(amps: &mut Vec<Complex<f32>>, matrix: &Matrix, row: u32, controls: ControlMask) {
    let dim = matrix.width();
    let span_mask = (dim - 1) << row;
    let next: Vec<Complex<f32>> = (0..amps.len())
        .into_par_iter()
        .map(|index| {
            if !controls.allows_state(index as u32) {
                return amps[index];
            }
            let u = (index & span_mask) >> row;
            let rest = index & !span_mask;
            (0..dim)
                .map(|v| matrix.at(u, v) * amps[rest | (v << row)])
                .sum()
        })
        .collect();
    *amps = next;
}

fn apply_permutation(
    amps: &mut Vec<Complex<f32>>,
    effect: &PermutationEffect,
    span: u32,
    row: u32,
    controls: ControlMask,
    ctx: &ColumnContext,
    time: f64,
) {
    let span_mask = ((1usize << span) - 1) << row;
    let next: Vec<Complex<f32>> = (0..amps.len())
        .into_par_iter()
        .map(|index| {
            if !controls.allows_state(index as u32) {
                return amps[index];
            }
            let env = ket_env(index, span, time, ctx);
            let v = ((index & span_mask) >> row) as u32;
            let src = (effect.src_for)(v, &env) as usize;
            amps[(index & !span_mask) | (src << row)]
        })
        .collect();
    *amps = next;
}

fn apply_phase(
    amps: &mut Vec<Complex<f32>>,
    effect: &PhaseEffect,
    span: u32,
    row: u32,
    controls: ControlMask,
    ctx: &ColumnContext,
    time: f64,
) {
    let span_mask = ((1usize << span) - 1) << row;
    amps.par_iter_mut().enumerate().for_each(|(index, amp)| {
        if !controls.allows_state(index as u32) {
            return;
        }
        let env = ket_env(index, span, time, ctx);
        let v = ((index & span_mask) >> row) as u32;
        *amp *= (effect.phase_for)(v, &env);
    });
}

fn apply_swap(amps: &mut Vec<Complex<f32>>, a: u32, b: u32, controls: ControlMask) {
    let next: Vec<Complex<f32>> = (0..amps.len())
        .into_par_iter()
        .map(|index| {
            if !controls.allows_state(index as u32) {
                return amps[index];
            }
            let bit_a = index >> a & 1;
            let bit_b = index >> b & 1;
            let src = (index & !(1 << a) & !(1 << b)) | (bit_b << a) | (bit_a << b);
            amps[src]
        })
        .collect();
    *amps = next;
}
