use std::collections::HashMap;
use std::sync::Arc;

use crate::circuit::{CircuitDefinition, ColumnContext, Slot};
use crate::control_mask::ControlMask;
use crate::gate::{DisplayKind, Gate, GateEffect};
use crate::gpu::pool::{Texture, TextureFormat, TexturePool, TextureShape};
use crate::gpu::shader::{self, ShaderApplication};
use crate::gpu::GpuContext;
use crate::ket::{self, KetArgs};
use crate::stats::{self, CircuitStats, CustomStat, EvalError};
use crate::trader::StateTrader;

/// Read-only view handed to deferred operations when they resolve.
pub struct OpContext<'a> {
    pub gpu: &'a GpuContext,
    pub time: f64,
    pub row: u32,
    pub wire_count: u32,
    pub controls: ControlMask,
    pub custom: &'a ColumnContext,
}

/// One gate application: either a ready shader application, or a function
/// producing one once the evaluation context is known.
pub enum Operation {
    Direct(ShaderApplication),
    Deferred(Box<dyn Fn(&OpContext<'_>) -> Result<ShaderApplication, EvalError>>),
}

/// Mutable evaluation state threaded through one circuit evaluation.
///
/// Carries the time, the anchor row, the column's combined controls and
/// their rendered flag texture, the traded buffer pair, and the column's
/// typed context map.
pub struct CircuitEvalContext<'a> {
    pub gpu: &'a GpuContext,
    pub time: f64,
    pub row: u32,
    pub wire_count: u32,
    pub controls: ControlMask,
    pub controls_texture: &'a Texture,
    pub trader: &'a mut StateTrader,
    pub custom: &'a ColumnContext,
}

impl CircuitEvalContext<'_> {
    pub fn op_context(&self) -> OpContext<'_> {
        OpContext {
            gpu: self.gpu,
            time: self.time,
            row: self.row,
            wire_count: self.wire_count,
            controls: self.controls,
            custom: self.custom,
        }
    }

    /// Resolve `operation` and apply it through the state trader.
    pub fn apply_operation(&mut self, operation: &Operation) -> Result<(), EvalError> {
        match operation {
            Operation::Direct(app) => {
                self.trader
                    .shade_and_trade(self.gpu, app, self.controls_texture)
            }
            Operation::Deferred(produce) => {
                let app = produce(&self.op_context())?;
                self.trader
                    .shade_and_trade(self.gpu, &app, self.controls_texture)
            }
        }
        Ok(())
    }

    /// A context identical except anchored at `row`, sharing the trader.
    pub fn with_row(&mut self, row: u32) -> CircuitEvalContext<'_> {
        CircuitEvalContext {
            gpu: self.gpu,
            time: self.time,
            row,
            wire_count: self.wire_count,
            controls: self.controls,
            controls_texture: self.controls_texture,
            trader: &mut *self.trader,
            custom: self.custom,
        }
    }
}

impl Gate {
    /// Reverses the order of the wires it spans, as a chain of swaps driven
    /// through the evaluation context.
    pub fn reverse(span: u32) -> Gate {
        Gate {
            name: "Reverse",
            span,
            stable_duration: f64::INFINITY,
            effect: GateEffect::Custom(reverse_op),
            required_context: &[],
            context_provider: None,
            known_matrix: None,
        }
    }
}

fn reverse_op(gate: &Gate, ctx: &mut CircuitEvalContext) -> Result<(), EvalError> {
    for i in 0..gate.span / 2 {
        let q1 = ctx.row + i;
        let q2 = ctx.row + gate.span - 1 - i;
        let app = ket::swap_op(ctx.gpu, ctx.wire_count, q1, q2)?;
        ctx.apply_operation(&Operation::Direct(app))?;
    }
    Ok(())
}

/// Drives circuit evaluation on the GPU, reusing one texture pool across
/// evaluations.
pub struct GpuEvaluator<'g> {
    gpu: &'g GpuContext,
    pool: TexturePool,
}

impl<'g> GpuEvaluator<'g> {
    pub fn new(gpu: &'g GpuContext) -> GpuEvaluator<'g> {
        GpuEvaluator {
            gpu,
            pool: TexturePool::new(),
        }
    }

    /// The pool, for leak accounting.
    pub fn pool(&self) -> &TexturePool {
        &self.pool
    }

    /// Evaluate `circuit` at `time`, producing the same statistics as the
    /// CPU reference path. Every texture taken during the evaluation is
    /// deposited before this returns, on the error path included.
    pub fn stats(
        &mut self,
        circuit: &Arc<CircuitDefinition>,
        time: f64,
    ) -> Result<CircuitStats, EvalError> {
        let mut trader =
            StateTrader::seeded_classical(self.gpu, &mut self.pool, circuit.wire_count(), 0);
        let result = self.run(circuit, time, &mut trader);
        trader.dispose(&mut self.pool);
        result
    }

    fn run(
        &mut self,
        circuit: &Arc<CircuitDefinition>,
        time: f64,
        trader: &mut StateTrader,
    ) -> Result<CircuitStats, EvalError> {
        let gpu = self.gpu;
        let wire_count = circuit.wire_count();
        let flag_shape = TextureShape::for_wire_count(wire_count, TextureFormat::U32);
        let reasons = circuit.disable_reasons();

        let mut wire_probs = Vec::with_capacity(circuit.columns().len());
        let mut custom = HashMap::new();

        for (col_index, column) in circuit.columns().iter().enumerate() {
            let controls = column.controls();
            let ctx_map = column.context();
            let column_reasons = &reasons[col_index];

            let (probs, displays) = self.pool.scoped(gpu, flag_shape, |_, flags| {
                ket::render_control_flags(gpu, controls, flags)?;

                for (wire, slot) in column.slots().iter().enumerate() {
                    let Slot::Gate(gate) = slot else { continue };
                    if column_reasons[wire].is_some() {
                        continue;
                    }
                    let mut ctx = CircuitEvalContext {
                        gpu,
                        time,
                        row: wire as u32,
                        wire_count,
                        controls,
                        controls_texture: flags,
                        trader: &mut *trader,
                        custom: &ctx_map,
                    };
                    apply_gate(&mut ctx, gate, col_index)?;
                }

                if let Some((a, b)) = column.swap_pair() {
                    let app = ket::swap_op(gpu, wire_count, a, b)?;
                    trader.shade_and_trade(gpu, &app, flags);
                }

                let amplitudes = shader::read_back_complex(gpu, trader.current());
                let mut displays = Vec::new();
                for (wire, slot) in column.slots().iter().enumerate() {
                    let Slot::Gate(gate) = slot else { continue };
                    if column_reasons[wire].is_some() {
                        continue;
                    }
                    if let GateEffect::Display(DisplayKind::DensityMatrix) = gate.effect {
                        displays.push((
                            (col_index, wire as u32),
                            CustomStat::DensityMatrix(stats::density_matrix(
                                &amplitudes,
                                wire as u32,
                                gate.span,
                            )),
                        ));
                    }
                }
                Ok::<_, EvalError>((stats::wire_probabilities(&amplitudes, wire_count), displays))
            })?;

            custom.extend(displays);
            wire_probs.push(probs);
        }

        let final_amplitudes = shader::read_back_complex(gpu, trader.current());
        Ok(CircuitStats::new(
            Arc::clone(circuit),
            time,
            wire_probs,
            final_amplitudes,
            custom,
        ))
    }
}

fn apply_gate(
    ctx: &mut CircuitEvalContext,
    gate: &Gate,
    column: usize,
) -> Result<(), EvalError> {
    let args = KetArgs::new(ctx.row, gate.span, ctx.wire_count)
        .with_context(ctx.custom)
        .with_time(ctx.time);
    match &gate.effect {
        GateEffect::Matrix(m) => {
            let app = ket::matrix_op(ctx.gpu, m, args)?;
            ctx.apply_operation(&Operation::Direct(app))
        }
        GateEffect::MatrixFn(f) => {
            let f = *f;
            ctx.apply_operation(&Operation::Deferred(Box::new(move |op: &OpContext| {
                Ok(ket::matrix_op(op.gpu, &f(op.time), args)?)
            })))
        }
        GateEffect::Permutation(p) => {
            let app = ket::permutation_op(ctx.gpu, p.wgsl_body, &args)?;
            ctx.apply_operation(&Operation::Direct(app))
        }
        GateEffect::Phase(p) => {
            let app = ket::phase_op(ctx.gpu, p.wgsl_body, &args)?;
            ctx.apply_operation(&Operation::Direct(app))
        }
        GateEffect::Display(_) | GateEffect::Identity => Ok(()),
        GateEffect::Fail(message) => Err(EvalError::GateFailed {
            column,
            row: ctx.row,
            message: (*message).to_string(),
        }),
        GateEffect::Custom(apply) => apply(gate, ctx),
    }
}
