use std::sync::Arc;

use ketsim::circuit::{CircuitDefinition, CircuitDefinitionError, GateColumn, Slot};
use ketsim::gate::Gate;
use num_complex::Complex;

fn circuit(wires: u32, columns: Vec<GateColumn>) -> Arc<CircuitDefinition> {
    Arc::new(CircuitDefinition::new(wires, columns).unwrap())
}

#[test]
fn invalid_definitions() {
    assert_eq!(
        CircuitDefinition::new(0, vec![]).unwrap_err(),
        CircuitDefinitionError::BadWireCount { wires: 0 }
    );
    assert_eq!(
        CircuitDefinition::new(17, vec![]).unwrap_err(),
        CircuitDefinitionError::BadWireCount { wires: 17 }
    );
    assert_eq!(
        CircuitDefinition::new(2, vec![GateColumn::empty(1)]).unwrap_err(),
        CircuitDefinitionError::ColumnLengthMismatch {
            column: 0,
            len: 1,
            wires: 2
        }
    );
    assert_eq!(
        CircuitDefinition::new(
            3,
            vec![GateColumn::new(vec![
                Slot::Empty,
                Slot::Gate(Gate::increment(2)),
                Slot::Gate(Gate::x()),
            ])]
        )
        .unwrap_err(),
        CircuitDefinitionError::GateOverlap { column: 0, row: 2 }
    );
}

mod cpu {
    use super::*;
    use ketsim::stats::{CircuitStats, CustomStat, EvalError};
    use ketsim::stats_cache::CircuitStatsCache;

    #[test]
    fn controlled_not_with_the_control_off_is_a_no_op() {
        let c = circuit(
            2,
            vec![GateColumn::new(vec![
                Slot::Control { desired: true },
                Slot::Gate(Gate::x()),
            ])],
        );
        for time in [0.0, 0.3, 0.9] {
            let stats = CircuitStats::from_circuit_at_time(&c, time).unwrap();
            assert_amplitudes(
                stats.final_amplitudes(),
                &[
                    Complex::ONE,
                    Complex::ZERO,
                    Complex::ZERO,
                    Complex::ZERO,
                ],
            );
        }
    }

    #[test]
    fn hadamard_makes_the_controlled_not_half_likely() {
        let c = circuit(
            2,
            vec![
                GateColumn::new(vec![Slot::Gate(Gate::h()), Slot::Empty]),
                GateColumn::new(vec![
                    Slot::Control { desired: true },
                    Slot::Gate(Gate::x()),
                ]),
            ],
        );
        let stats = CircuitStats::from_circuit_at_time(&c, 0.0).unwrap();
        assert!((stats.wire_probability(1, 1) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn hadamard_is_self_inverse() {
        let c = circuit(
            1,
            vec![
                GateColumn::new(vec![Slot::Gate(Gate::h())]),
                GateColumn::new(vec![Slot::Gate(Gate::h())]),
            ],
        );
        let stats = CircuitStats::from_circuit_at_time(&c, 0.0).unwrap();
        assert_amplitudes(stats.final_amplitudes(), &[Complex::ONE, Complex::ZERO]);
    }

    #[test]
    fn anti_control_fires_on_zero() {
        let c = circuit(
            2,
            vec![GateColumn::new(vec![
                Slot::Control { desired: false },
                Slot::Gate(Gate::x()),
            ])],
        );
        let stats = CircuitStats::from_circuit_at_time(&c, 0.0).unwrap();
        assert_amplitudes(
            stats.final_amplitudes(),
            &[
                Complex::ZERO,
                Complex::ZERO,
                Complex::ONE,
                Complex::ZERO,
            ],
        );
    }

    #[test]
    fn modular_addition_wraps_at_the_published_modulus() {
        // Target register holds 2, input register A holds 2, modulus 3:
        // 2 + 2 mod 3 = 1.
        let c = circuit(
            5,
            vec![
                GateColumn::new(vec![
                    Slot::Empty,
                    Slot::Gate(Gate::x()),
                    Slot::Empty,
                    Slot::Gate(Gate::x()),
                    Slot::Empty,
                ]),
                GateColumn::new(vec![
                    Slot::Gate(Gate::plus_a_mod_r(2)),
                    Slot::Empty,
                    Slot::Gate(Gate::input_a(2)),
                    Slot::Empty,
                    Slot::Gate(Gate::set_modulus(3)),
                ]),
            ],
        );
        let stats = CircuitStats::from_circuit_at_time(&c, 0.0).unwrap();
        let expected_index = 0b01001; // target = 1, input register still 2
        assert!((stats.final_amplitudes()[expected_index] - Complex::ONE).norm() < 1e-4);
    }

    #[test]
    fn display_gate_payload_reaches_the_stats() {
        let c = circuit(
            2,
            vec![
                GateColumn::new(vec![Slot::Gate(Gate::h()), Slot::Empty]),
                GateColumn::new(vec![Slot::Gate(Gate::density_display()), Slot::Empty]),
            ],
        );
        let stats = CircuitStats::from_circuit_at_time(&c, 0.0).unwrap();
        let CustomStat::DensityMatrix(rho) = stats.custom_stat(1, 0).unwrap();
        assert!((rho.at(0, 0) - Complex::new(0.5, 0.0)).norm() < 1e-6);
        assert!((rho.at(0, 1) - Complex::new(0.5, 0.0)).norm() < 1e-6);
        assert_eq!(stats.custom_stat(0, 0), None);
    }

    #[test]
    fn broken_gate_surfaces_as_a_recoverable_error() {
        let c = circuit(
            2,
            vec![
                GateColumn::new(vec![Slot::Gate(Gate::h()), Slot::Empty]),
                GateColumn::new(vec![Slot::Gate(Gate::broken()), Slot::Empty]),
            ],
        );
        let err = CircuitStats::from_circuit_at_time(&c, 0.0).unwrap_err();
        assert_eq!(
            err,
            EvalError::GateFailed {
                column: 1,
                row: 0,
                message: "deliberate failure".to_string(),
            }
        );
    }

    #[test]
    fn cache_reuses_static_results_across_times() {
        let c = circuit(
            2,
            vec![GateColumn::new(vec![
                Slot::Gate(Gate::h()),
                Slot::Gate(Gate::x()),
            ])],
        );
        let mut cache = CircuitStatsCache::new();
        let mut computed = 0;
        let mut compute = |circuit: &Arc<CircuitDefinition>, time: f64| {
            computed += 1;
            CircuitStats::from_circuit_at_time(circuit, time)
        };
        let a = cache.stats_at(&c, 0.1, &mut compute).unwrap();
        let b = cache.stats_at(&c, 0.8, &mut compute).unwrap();
        assert_eq!(computed, 1);
        assert_eq!(b.time(), 0.8);
        assert_eq!(a.final_amplitudes(), b.final_amplitudes());
    }

    #[test]
    fn cache_recomputes_time_varying_circuits_per_bucket() {
        let c = circuit(
            1,
            vec![GateColumn::new(vec![Slot::Gate(Gate::x_pow())])],
        );
        let mut cache = CircuitStatsCache::new();
        let computed = std::cell::Cell::new(0);
        let mut compute = |circuit: &Arc<CircuitDefinition>, time: f64| {
            computed.set(computed.get() + 1);
            CircuitStats::from_circuit_at_time(circuit, time)
        };
        cache.stats_at(&c, 0.1000, &mut compute).unwrap();
        cache.stats_at(&c, 0.1001, &mut compute).unwrap();
        assert_eq!(computed.get(), 1, "same fine-grained bucket");
        cache.stats_at(&c, 0.6, &mut compute).unwrap();
        assert_eq!(computed.get(), 2, "a different bucket recomputes");
    }
}

#[cfg(feature = "gpu")]
mod gpu {
    use super::*;
    use std::sync::OnceLock;

    use ketsim::control_mask::ControlMask;
    use ketsim::eval::GpuEvaluator;
    use ketsim::gate::GateEffect;
    use ketsim::gpu::pool::{TextureFormat, TexturePool, TextureShape};
    use ketsim::gpu::shader::{self, ShaderApplication, ShaderArgError, UniformValue};
    use ketsim::gpu::GpuContext;
    use ketsim::ket::{self, KetArgs};
    use ketsim::matrix::Matrix;
    use ketsim::stats::{CircuitStats, CustomStat, EvalError};
    use ketsim::trader::StateTrader;

    static GPU: OnceLock<GpuContext> = OnceLock::new();

    fn gpu() -> &'static GpuContext {
        GPU.get_or_init(|| GpuContext::new().expect("a GPU adapter is required for these tests"))
    }

    #[test]
    fn empty_circuit_keeps_the_seed_state() {
        let mut evaluator = GpuEvaluator::new(gpu());
        let stats = evaluator.stats(&circuit(2, vec![]), 0.0).unwrap();
        assert_amplitudes(
            stats.final_amplitudes(),
            &[
                Complex::ONE,
                Complex::ZERO,
                Complex::ZERO,
                Complex::ZERO,
            ],
        );
        assert_eq!(evaluator.pool().live_count(), 0);
    }

    #[test]
    fn controlled_not_with_the_control_off_is_a_no_op() {
        let c = circuit(
            2,
            vec![GateColumn::new(vec![
                Slot::Control { desired: true },
                Slot::Gate(Gate::x()),
            ])],
        );
        let mut evaluator = GpuEvaluator::new(gpu());
        let stats = evaluator.stats(&c, 0.4).unwrap();
        assert_amplitudes(
            stats.final_amplitudes(),
            &[
                Complex::ONE,
                Complex::ZERO,
                Complex::ZERO,
                Complex::ZERO,
            ],
        );
    }

    #[test]
    fn hadamard_makes_the_controlled_not_half_likely() {
        let c = circuit(
            2,
            vec![
                GateColumn::new(vec![Slot::Gate(Gate::h()), Slot::Empty]),
                GateColumn::new(vec![
                    Slot::Control { desired: true },
                    Slot::Gate(Gate::x()),
                ]),
            ],
        );
        let mut evaluator = GpuEvaluator::new(gpu());
        let stats = evaluator.stats(&c, 0.0).unwrap();
        assert!((stats.wire_probability(1, 1) - 0.5).abs() < 1e-4);
    }

    #[test]
    fn hadamard_is_self_inverse() {
        let c = circuit(
            1,
            vec![
                GateColumn::new(vec![Slot::Gate(Gate::h())]),
                GateColumn::new(vec![Slot::Gate(Gate::h())]),
            ],
        );
        let mut evaluator = GpuEvaluator::new(gpu());
        let stats = evaluator.stats(&c, 0.0).unwrap();
        assert_amplitudes(stats.final_amplitudes(), &[Complex::ONE, Complex::ZERO]);
    }

    #[test]
    fn time_parameterized_gates_follow_the_clock() {
        let c = circuit(
            1,
            vec![GateColumn::new(vec![Slot::Gate(Gate::x_pow())])],
        );
        let mut evaluator = GpuEvaluator::new(gpu());
        assert!((evaluator.stats(&c, 0.0).unwrap().wire_probability(0, 0) - 0.0).abs() < 1e-4);
        assert!((evaluator.stats(&c, 0.5).unwrap().wire_probability(0, 0) - 0.5).abs() < 1e-4);
        assert!((evaluator.stats(&c, 1.0).unwrap().wire_probability(0, 0) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn matches_the_cpu_path_on_random_circuits() {
        for seed in 0..4 {
            let c = Arc::new(CircuitDefinition::random(4, 8, seed));
            let mut evaluator = GpuEvaluator::new(gpu());
            let on_gpu = evaluator.stats(&c, 0.0).unwrap();
            let on_cpu = CircuitStats::from_circuit_at_time(&c, 0.0).unwrap();
            for (a, b) in on_gpu
                .final_amplitudes()
                .iter()
                .zip(on_cpu.final_amplitudes())
            {
                assert!((a - b).norm() < 1e-4, "seed {seed}: {a} vs {b}");
            }
            for (col, (pa, pb)) in on_gpu
                .wire_probabilities()
                .iter()
                .zip(on_cpu.wire_probabilities())
                .enumerate()
            {
                for (wire, (a, b)) in pa.iter().zip(pb).enumerate() {
                    assert!(
                        (a - b).abs() < 1e-4,
                        "seed {seed} column {col} wire {wire}: {a} vs {b}"
                    );
                }
            }
        }
    }

    /// Apply the gate's shader to every basis state of its own span and
    /// reassemble the transition matrix it implements.
    fn transition_matrix(gate: &Gate, time: f64) -> Matrix {
        let gpu = gpu();
        let span = gate.span;
        let dim = 1u32 << span;
        let mut pool = TexturePool::new();
        let flags = pool.take(gpu, TextureShape::for_wire_count(span, TextureFormat::U32));
        ket::render_control_flags(gpu, ControlMask::NO_CONTROLS, &flags).unwrap();

        let mut columns = Vec::new();
        for basis in 0..dim {
            let mut trader = StateTrader::seeded_classical(gpu, &mut pool, span, basis);
            let args = KetArgs::new(0, span, span).with_time(time);
            let app = match &gate.effect {
                GateEffect::Matrix(m) => ket::matrix_op(gpu, m, args).unwrap(),
                GateEffect::MatrixFn(f) => ket::matrix_op(gpu, &f(time), args).unwrap(),
                GateEffect::Permutation(p) => ket::permutation_op(gpu, p.wgsl_body, &args).unwrap(),
                GateEffect::Phase(p) => ket::phase_op(gpu, p.wgsl_body, &args).unwrap(),
                _ => panic!("{} has no shader", gate.name),
            };
            trader.shade_and_trade(gpu, &app, &flags);
            columns.push(shader::read_back_complex(gpu, trader.current()));
            trader.dispose(&mut pool);
        }
        pool.deposit(flags);

        let mut data = Vec::with_capacity((dim * dim) as usize);
        for row in 0..dim as usize {
            for col in 0..dim as usize {
                data.push(columns[col][row]);
            }
        }
        Matrix::new(dim as usize, data)
    }

    #[test]
    fn gate_shaders_match_their_declared_matrices() {
        for gate in [
            Gate::x(),
            Gate::y(),
            Gate::z(),
            Gate::h(),
            Gate::s(),
            Gate::s_dagger(),
            Gate::t(),
        ] {
            let from_shader = transition_matrix(&gate, 0.0);
            let declared = gate.matrix_at(0.0).expect(gate.name);
            assert!(
                from_shader.approx_eq(&declared, 1e-4),
                "{} shader disagrees with its matrix",
                gate.name
            );
        }
        for time in [0.0, 0.25, 0.75] {
            for gate in [Gate::x_pow(), Gate::z_pow()] {
                let from_shader = transition_matrix(&gate, time);
                let declared = gate.matrix_at(time).unwrap();
                assert!(
                    from_shader.approx_eq(&declared, 1e-4),
                    "{} at t={time} disagrees",
                    gate.name
                );
            }
        }
    }

    #[test]
    fn permutation_shaders_match_their_declared_permutations() {
        use ketsim::gate::KetEnv;
        for gate in [Gate::increment(3), Gate::decrement(3)] {
            let GateEffect::Permutation(p) = &gate.effect else {
                panic!()
            };
            let env = KetEnv {
                span: 3,
                time: 0.0,
                input_a: 0,
                input_b: 0,
                modulus: 0,
            };
            let mut data = vec![Complex::ZERO; 64];
            for row in 0..8u32 {
                let col = (p.src_for)(row, &env);
                data[(row * 8 + col) as usize] = Complex::ONE;
            }
            let declared = Matrix::new(8, data);
            let from_shader = transition_matrix(&gate, 0.0);
            assert!(
                from_shader.approx_eq(&declared, 1e-6),
                "{} shader disagrees with its permutation",
                gate.name
            );
        }
    }

    #[test]
    fn trader_alternates_between_exactly_two_buffers() {
        let gpu = gpu();
        let mut pool = TexturePool::new();
        let flags = pool.take(gpu, TextureShape::for_wire_count(1, TextureFormat::U32));
        ket::render_control_flags(gpu, ControlMask::NO_CONTROLS, &flags).unwrap();

        let mut trader = StateTrader::seeded_classical(gpu, &mut pool, 1, 0);
        let mut seen = std::collections::HashSet::new();
        seen.insert(trader.current().id());
        let matrix = Gate::h().known_matrix.unwrap();
        let mut previous = trader.current().id();
        for _ in 0..8 {
            let app = ket::matrix_op(gpu, &matrix, KetArgs::new(0, 1, 1)).unwrap();
            trader.shade_and_trade(gpu, &app, &flags);
            assert_ne!(
                trader.current().id(),
                previous,
                "an operation never writes the buffer it read"
            );
            previous = trader.current().id();
            seen.insert(previous);
        }
        assert_eq!(seen.len(), 2, "double buffering reuses the same pair");
        trader.dispose(&mut pool);
        pool.deposit(flags);
        assert_eq!(pool.live_count(), 0);
        assert_eq!(pool.pooled_count(), 3);
    }

    #[test]
    fn pool_recycles_by_exact_shape() {
        let gpu = gpu();
        let mut pool = TexturePool::new();
        let amp_shape = TextureShape::for_wire_count(2, TextureFormat::ComplexF32);
        let flag_shape = TextureShape::for_wire_count(2, TextureFormat::U32);

        let a = pool.take(gpu, amp_shape);
        let b = pool.take(gpu, amp_shape);
        let f = pool.take(gpu, flag_shape);
        assert_eq!(pool.live_count(), 3);
        let a_id = a.id();
        pool.deposit(a);
        assert_eq!(pool.live_count(), 2);
        assert_eq!(pool.pooled_count(), 1);

        // Identical request gets the recycled buffer back.
        let again = pool.take(gpu, amp_shape);
        assert_eq!(again.id(), a_id);
        // A different shape never does.
        let other = pool.take(gpu, flag_shape);
        assert_ne!(other.id(), a_id);

        pool.deposit(again);
        pool.deposit(other);
        pool.deposit(b);
        pool.deposit(f);
        assert_eq!(pool.live_count(), 0);
        assert_eq!(pool.pooled_count(), 4);
    }

    #[test]
    #[should_panic(expected = "texture deposited twice")]
    fn depositing_more_than_was_taken_panics() {
        let gpu = gpu();
        let mut pool = TexturePool::new();
        let shape = TextureShape::for_wire_count(1, TextureFormat::U32);
        let a = pool.take(gpu, shape);
        pool.deposit(a);
        // Nothing of this shape is live any more, so returning a stray
        // texture of the same shape over-deposits.
        let mut rogue = TexturePool::new();
        let stray = rogue.take(gpu, shape);
        pool.deposit(stray);
    }

    #[test]
    fn scoped_take_deposits_on_the_error_path() {
        let gpu = gpu();
        let mut pool = TexturePool::new();
        let shape = TextureShape::for_wire_count(1, TextureFormat::U32);
        let result: Result<(), EvalError> = pool.scoped(gpu, shape, |_, _| {
            Err(EvalError::NeedsGpu { gate: "test" })
        });
        assert!(result.is_err());
        assert_eq!(pool.live_count(), 0);
        assert_eq!(pool.pooled_count(), 1);
    }

    #[test]
    fn control_flags_mirror_the_mask() {
        let gpu = gpu();
        let mut pool = TexturePool::new();
        let mask = ControlMask::from_bit_is(0, true)
            .combine(ControlMask::from_bit_is(2, false))
            .unwrap();
        let shape = TextureShape::for_wire_count(3, TextureFormat::U32);
        pool.scoped(gpu, shape, |_, flags| {
            ket::render_control_flags(gpu, mask, flags).unwrap();
            let words = shader::read_back_u32(gpu, flags);
            for (state, word) in words.iter().enumerate() {
                let expected = u32::from(mask.allows_state(state as u32));
                assert_eq!(*word, expected, "state {state}");
            }
        });
    }

    #[test]
    fn binding_layer_names_the_offending_argument() {
        let gpu = gpu();
        let shader = gpu.shaders().get_or_compile(
            gpu,
            &ket::permutation_source("fn ket_src(v: u32) -> u32 { return v; }"),
            &ket::ket_signature(),
        );
        let missing = ShaderApplication::new(&shader, &[UniformValue::U32(0)]).unwrap_err();
        assert_eq!(missing, ShaderArgError::Missing { name: "span" });

        let args = KetArgs::new(0, 1, 1);
        let mut values = args.values();
        values[10] = UniformValue::U32(9); // `time` expects a float
        let mismatch = ShaderApplication::new(&shader, &values).unwrap_err();
        assert!(matches!(
            mismatch,
            ShaderArgError::Mismatch { name: "time", .. }
        ));

        let mut extra = args.values();
        extra.push(UniformValue::U32(1));
        assert!(matches!(
            ShaderApplication::new(&shader, &extra).unwrap_err(),
            ShaderArgError::Extra { .. }
        ));
    }

    #[test]
    fn reverse_gate_runs_only_on_the_gpu() {
        let c = circuit(
            3,
            vec![
                GateColumn::new(vec![Slot::Gate(Gate::x()), Slot::Empty, Slot::Empty]),
                GateColumn::new(vec![Slot::Gate(Gate::reverse(3)), Slot::Empty, Slot::Empty]),
            ],
        );
        let mut evaluator = GpuEvaluator::new(gpu());
        let stats = evaluator.stats(&c, 0.0).unwrap();
        assert!((stats.final_amplitudes()[0b100] - Complex::ONE).norm() < 1e-4);

        assert_eq!(
            CircuitStats::from_circuit_at_time(&c, 0.0).unwrap_err(),
            EvalError::NeedsGpu { gate: "Reverse" }
        );
    }

    #[test]
    fn swap_and_displays_work_through_the_evaluator() {
        let c = circuit(
            2,
            vec![
                GateColumn::new(vec![Slot::Gate(Gate::h()), Slot::Empty]),
                GateColumn::new(vec![Slot::SwapHalf, Slot::SwapHalf]),
                GateColumn::new(vec![Slot::Empty, Slot::Gate(Gate::density_display())]),
            ],
        );
        let mut evaluator = GpuEvaluator::new(gpu());
        let stats = evaluator.stats(&c, 0.0).unwrap();
        assert!((stats.wire_probability(1, 1) - 0.5).abs() < 1e-4);
        let CustomStat::DensityMatrix(rho) = stats.custom_stat(2, 1).unwrap();
        assert!((rho.at(0, 0) - Complex::new(0.5, 0.0)).norm() < 1e-4);
    }

    #[test]
    fn disabled_gates_are_skipped_by_the_evaluator() {
        let c = circuit(
            2,
            vec![GateColumn::new(vec![
                Slot::Gate(Gate::plus_a(1)),
                Slot::Empty,
            ])],
        );
        let mut evaluator = GpuEvaluator::new(gpu());
        let stats = evaluator.stats(&c, 0.0).unwrap();
        assert!((stats.final_amplitudes()[0] - Complex::ONE).norm() < 1e-6);
    }

    #[test]
    fn evaluation_errors_still_release_every_texture() {
        let c = circuit(
            1,
            vec![GateColumn::new(vec![Slot::Gate(Gate::broken())])],
        );
        let mut evaluator = GpuEvaluator::new(gpu());
        assert!(evaluator.stats(&c, 0.0).is_err());
        assert_eq!(evaluator.pool().live_count(), 0);
    }
}

fn assert_amplitudes(actual: &[Complex<f32>], expected: &[Complex<f32>]) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).norm() < 1e-4,
            "amplitude {i}: {a} differs from {e}"
        );
    }
}
