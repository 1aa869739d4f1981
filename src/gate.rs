use std::f64::consts::{FRAC_1_SQRT_2, PI};
use std::fmt::{self, Display};

use num_complex::Complex;

use crate::matrix::{c32, Matrix};

/// Largest supported register width.
///
/// Bounds every state buffer at 2^16 cells, which keeps readback volume
/// reasonable and keeps every span-local value exact when a shader body
/// converts it to `f32` for trigonometry.
pub const MAX_WIRE_COUNT: u32 = 16;

/// Keys of the typed per-column side channel between gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKey {
    InputA,
    InputB,
    Modulus,
}

impl ContextKey {
    /// Disable reason shown on a gate whose required entry is absent.
    pub fn missing_reason(self) -> &'static str {
        match self {
            ContextKey::InputA => "need input A",
            ContextKey::InputB => "need input B",
            ContextKey::Modulus => "need modulus",
        }
    }
}

impl Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextKey::InputA => write!(f, "input A"),
            ContextKey::InputB => write!(f, "input B"),
            ContextKey::Modulus => write!(f, "modulus"),
        }
    }
}

/// A contiguous run of wires some gate declared as an input register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputRange {
    pub offset: u32,
    pub length: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextValue {
    Range(InputRange),
    Constant(u64),
}

/// Context entry a gate publishes for the rest of its column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextProvider {
    InputA,
    InputB,
    Modulus(u64),
}

/// Per-state environment handed to the CPU mirrors of ket shader bodies.
///
/// Mirrors exactly what a generated shader can observe: the gate's span,
/// the evaluation time, and the classical values read from the column's
/// input registers at the current state index.
#[derive(Debug, Clone, Copy)]
pub struct KetEnv {
    pub span: u32,
    pub time: f64,
    pub input_a: u32,
    pub input_b: u32,
    pub modulus: u32,
}

/// Classical reversible mapping of span-local basis values.
///
/// `wgsl_body` must define `fn ket_src(v: u32) -> u32`, returning the
/// span-local source index whose amplitude the output index copies.
/// `src_for` is the same mapping evaluated on the CPU; the two are the
/// dual declaration the round-trip tests compare.
#[derive(Debug, Clone, Copy)]
pub struct PermutationEffect {
    pub wgsl_body: &'static str,
    pub src_for: fn(u32, &KetEnv) -> u32,
}

/// Diagonal unit phase factor per span-local basis value.
///
/// `wgsl_body` must define `fn ket_phase(v: u32) -> vec2<f32>`.
#[derive(Debug, Clone, Copy)]
pub struct PhaseEffect {
    pub wgsl_body: &'static str,
    pub phase_for: fn(u32, &KetEnv) -> Complex<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayKind {
    DensityMatrix,
}

/// Direct access to the evaluation context; may apply several operations.
#[cfg(feature = "gpu")]
pub type CustomEffect =
    fn(&Gate, &mut crate::eval::CircuitEvalContext) -> Result<(), crate::stats::EvalError>;

/// What a gate does to the amplitude buffer.
#[derive(Debug, Clone)]
pub enum GateEffect {
    /// Constant unitary applied through the generic matrix shader.
    Matrix(Matrix),
    /// Time-parameterized unitary, re-sampled at every evaluation.
    MatrixFn(fn(f64) -> Matrix),
    Permutation(PermutationEffect),
    Phase(PhaseEffect),
    /// Publishes a display payload without touching amplitudes.
    Display(DisplayKind),
    /// No amplitude effect; markers that only shape the column.
    Identity,
    /// Always aborts evaluation (diagnostics).
    Fail(&'static str),
    /// Drives the evaluation context directly.
    #[cfg(feature = "gpu")]
    Custom(CustomEffect),
}

/// Symbolic description of one gate, consumed by both evaluators.
#[derive(Debug, Clone)]
pub struct Gate {
    pub name: &'static str,
    /// Number of contiguous wires the gate occupies, anchored at its row.
    pub span: u32,
    /// How long from any given time the gate's effect stays constant.
    /// `f64::INFINITY` for gates that ignore time, `0.0` for gates that
    /// vary continuously.
    pub stable_duration: f64,
    pub effect: GateEffect,
    /// Context entries that must be published in the same column.
    pub required_context: &'static [ContextKey],
    /// Context entry this gate publishes for the rest of its column.
    pub context_provider: Option<ContextProvider>,
    /// Reference unitary used to cross-check shader semantics in tests.
    pub known_matrix: Option<Matrix>,
}

impl Gate {
    fn static_unitary(name: &'static str, matrix: Matrix) -> Gate {
        Gate {
            name,
            span: matrix.width().trailing_zeros(),
            stable_duration: f64::INFINITY,
            effect: GateEffect::Matrix(matrix.clone()),
            required_context: &[],
            context_provider: None,
            known_matrix: Some(matrix),
        }
    }

    fn static_phase(name: &'static str, effect: PhaseEffect, matrix: Matrix) -> Gate {
        Gate {
            name,
            span: matrix.width().trailing_zeros(),
            stable_duration: f64::INFINITY,
            effect: GateEffect::Phase(effect),
            required_context: &[],
            context_provider: None,
            known_matrix: Some(matrix),
        }
    }

    pub fn x() -> Gate {
        Gate::static_unitary(
            "X",
            Matrix::new(
                2,
                vec![Complex::ZERO, Complex::ONE, Complex::ONE, Complex::ZERO],
            ),
        )
    }

    pub fn y() -> Gate {
        Gate::static_unitary(
            "Y",
            Matrix::new(
                2,
                vec![Complex::ZERO, -Complex::I, Complex::I, Complex::ZERO],
            ),
        )
    }

    pub fn h() -> Gate {
        let s = FRAC_1_SQRT_2 as f32;
        Gate::static_unitary(
            "H",
            Matrix::new(
                2,
                vec![
                    Complex::new(s, 0.0),
                    Complex::new(s, 0.0),
                    Complex::new(s, 0.0),
                    Complex::new(-s, 0.0),
                ],
            ),
        )
    }

    pub fn z() -> Gate {
        Gate::static_phase(
            "Z",
            PhaseEffect {
                wgsl_body: "fn ket_phase(v: u32) -> vec2<f32> {\n\
                            \x20   if (v == 0u) { return vec2<f32>(1.0, 0.0); }\n\
                            \x20   return vec2<f32>(-1.0, 0.0);\n\
                            }",
                phase_for: |v, _| {
                    if v == 0 {
                        Complex::ONE
                    } else {
                        -Complex::ONE
                    }
                },
            },
            Matrix::diagonal(&[Complex::ONE, -Complex::ONE]),
        )
    }

    pub fn s() -> Gate {
        Gate::static_phase(
            "S",
            PhaseEffect {
                wgsl_body: "fn ket_phase(v: u32) -> vec2<f32> {\n\
                            \x20   if (v == 0u) { return vec2<f32>(1.0, 0.0); }\n\
                            \x20   return vec2<f32>(0.0, 1.0);\n\
                            }",
                phase_for: |v, _| if v == 0 { Complex::ONE } else { Complex::I },
            },
            Matrix::diagonal(&[Complex::ONE, Complex::I]),
        )
    }

    pub fn s_dagger() -> Gate {
        Gate::static_phase(
            "S^-1",
            PhaseEffect {
                wgsl_body: "fn ket_phase(v: u32) -> vec2<f32> {\n\
                            \x20   if (v == 0u) { return vec2<f32>(1.0, 0.0); }\n\
                            \x20   return vec2<f32>(0.0, -1.0);\n\
                            }",
                phase_for: |v, _| if v == 0 { Complex::ONE } else { -Complex::I },
            },
            Matrix::diagonal(&[Complex::ONE, -Complex::I]),
        )
    }

    pub fn t() -> Gate {
        let e = c32(Complex::from_polar(1.0, PI / 4.0));
        Gate::static_phase(
            "T",
            PhaseEffect {
                wgsl_body: "fn ket_phase(v: u32) -> vec2<f32> {\n\
                            \x20   if (v == 0u) { return vec2<f32>(1.0, 0.0); }\n\
                            \x20   return vec2<f32>(0.70710678, 0.70710678);\n\
                            }",
                phase_for: |v, _| {
                    if v == 0 {
                        Complex::ONE
                    } else {
                        c32(Complex::from_polar(1.0, PI / 4.0))
                    }
                },
            },
            Matrix::diagonal(&[Complex::ONE, e]),
        )
    }

    /// X raised to the evaluation time, cycling once per time unit.
    pub fn x_pow() -> Gate {
        Gate {
            name: "X^t",
            span: 1,
            stable_duration: 0.0,
            effect: GateEffect::MatrixFn(x_pow_matrix),
            required_context: &[],
            context_provider: None,
            known_matrix: None,
        }
    }

    /// Z raised to the evaluation time, cycling once per time unit.
    pub fn z_pow() -> Gate {
        Gate {
            name: "Z^t",
            span: 1,
            stable_duration: 0.0,
            effect: GateEffect::MatrixFn(z_pow_matrix),
            required_context: &[],
            context_provider: None,
            known_matrix: None,
        }
    }

    /// Adds one to the value of the spanned register, wrapping.
    pub fn increment(span: u32) -> Gate {
        Gate {
            name: "+1",
            span,
            stable_duration: f64::INFINITY,
            effect: GateEffect::Permutation(PermutationEffect {
                wgsl_body: "fn ket_src(v: u32) -> u32 {\n\
                            \x20   let m = (1u << params.span) - 1u;\n\
                            \x20   return (v + m) & m;\n\
                            }",
                src_for: |v, env| {
                    let m = (1 << env.span) - 1;
                    (v + m) & m
                },
            }),
            required_context: &[],
            context_provider: None,
            known_matrix: None,
        }
    }

    /// Subtracts one from the value of the spanned register, wrapping.
    pub fn decrement(span: u32) -> Gate {
        Gate {
            name: "-1",
            span,
            stable_duration: f64::INFINITY,
            effect: GateEffect::Permutation(PermutationEffect {
                wgsl_body: "fn ket_src(v: u32) -> u32 {\n\
                            \x20   return (v + 1u) & ((1u << params.span) - 1u);\n\
                            }",
                src_for: |v, env| (v + 1) & ((1 << env.span) - 1),
            }),
            required_context: &[],
            context_provider: None,
            known_matrix: None,
        }
    }

    /// Adds the value of input register A into the spanned register.
    pub fn plus_a(span: u32) -> Gate {
        Gate {
            name: "+A",
            span,
            stable_duration: f64::INFINITY,
            effect: GateEffect::Permutation(PermutationEffect {
                wgsl_body: "fn ket_src(v: u32) -> u32 {\n\
                            \x20   let m = (1u << params.span) - 1u;\n\
                            \x20   return (v + (m + 1u) - (input_a() & m)) & m;\n\
                            }",
                src_for: |v, env| {
                    let m = (1 << env.span) - 1;
                    (v + (m + 1) - (env.input_a & m)) & m
                },
            }),
            required_context: &[ContextKey::InputA],
            context_provider: None,
            known_matrix: None,
        }
    }

    /// Adds input register A into the spanned register, modulo the column's
    /// modulus. Values at or above the modulus pass through unchanged.
    pub fn plus_a_mod_r(span: u32) -> Gate {
        Gate {
            name: "+A mod R",
            span,
            stable_duration: f64::INFINITY,
            effect: GateEffect::Permutation(PermutationEffect {
                wgsl_body: "fn ket_src(v: u32) -> u32 {\n\
                            \x20   let r = params.modulus;\n\
                            \x20   if (v >= r) { return v; }\n\
                            \x20   let a = input_a() % r;\n\
                            \x20   return (v + r - a) % r;\n\
                            }",
                src_for: |v, env| {
                    let r = env.modulus;
                    if v >= r {
                        return v;
                    }
                    let a = env.input_a % r;
                    (v + r - a) % r
                },
            }),
            required_context: &[ContextKey::InputA, ContextKey::Modulus],
            context_provider: None,
            known_matrix: None,
        }
    }

    /// Applies a phase proportional to the register's value, one full turn
    /// across the register's range.
    pub fn phase_gradient(span: u32) -> Gate {
        Gate {
            name: "Grad",
            span,
            stable_duration: f64::INFINITY,
            effect: GateEffect::Phase(PhaseEffect {
                wgsl_body: "fn ket_phase(v: u32) -> vec2<f32> {\n\
                            \x20   let turn = f32(v) / f32(1u << params.span);\n\
                            \x20   let theta = 6.2831853 * turn;\n\
                            \x20   return vec2<f32>(cos(theta), sin(theta));\n\
                            }",
                phase_for: |v, env| {
                    let turn = v as f64 / (1u64 << env.span) as f64;
                    c32(Complex::from_polar(1.0, 2.0 * PI * turn))
                },
            }),
            required_context: &[],
            context_provider: None,
            known_matrix: None,
        }
    }

    /// Marks the spanned wires as input register A for the rest of the column.
    pub fn input_a(span: u32) -> Gate {
        Gate {
            name: "Input A",
            span,
            stable_duration: f64::INFINITY,
            effect: GateEffect::Identity,
            required_context: &[],
            context_provider: Some(ContextProvider::InputA),
            known_matrix: None,
        }
    }

    /// Marks the spanned wires as input register B for the rest of the column.
    pub fn input_b(span: u32) -> Gate {
        Gate {
            name: "Input B",
            span,
            stable_duration: f64::INFINITY,
            effect: GateEffect::Identity,
            required_context: &[],
            context_provider: Some(ContextProvider::InputB),
            known_matrix: None,
        }
    }

    /// Publishes the constant modulus `r` for the rest of the column.
    pub fn set_modulus(r: u64) -> Gate {
        Gate {
            name: "Set R",
            span: 1,
            stable_duration: f64::INFINITY,
            effect: GateEffect::Identity,
            required_context: &[],
            context_provider: Some(ContextProvider::Modulus(r)),
            known_matrix: None,
        }
    }

    /// Reports the reduced density matrix of the wire it sits on.
    pub fn density_display() -> Gate {
        Gate {
            name: "Density",
            span: 1,
            stable_duration: f64::INFINITY,
            effect: GateEffect::Display(DisplayKind::DensityMatrix),
            required_context: &[],
            context_provider: None,
            known_matrix: None,
        }
    }

    /// A gate that always aborts evaluation, for exercising error recovery.
    pub fn broken() -> Gate {
        Gate {
            name: "Broken",
            span: 1,
            stable_duration: f64::INFINITY,
            effect: GateEffect::Fail("deliberate failure"),
            required_context: &[],
            context_provider: None,
            known_matrix: None,
        }
    }

    /// The gate's unitary at `time`, when one is known.
    pub fn matrix_at(&self, time: f64) -> Option<Matrix> {
        match &self.effect {
            GateEffect::Matrix(m) => Some(m.clone()),
            GateEffect::MatrixFn(f) => Some(f(time)),
            _ => self.known_matrix.clone(),
        }
    }
}

fn x_pow_matrix(t: f64) -> Matrix {
    let e = Complex::from_polar(1.0, PI * t);
    let a = (Complex::new(1.0, 0.0) + e) * 0.5;
    let b = (Complex::new(1.0, 0.0) - e) * 0.5;
    Matrix::new(2, vec![c32(a), c32(b), c32(b), c32(a)])
}

fn z_pow_matrix(t: f64) -> Matrix {
    Matrix::diagonal(&[Complex::ONE, c32(Complex::from_polar(1.0, PI * t))])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(span: u32) -> KetEnv {
        KetEnv {
            span,
            time: 0.0,
            input_a: 0,
            input_b: 0,
            modulus: 0,
        }
    }

    #[test]
    fn known_matrices_are_unitary() {
        for gate in [
            Gate::x(),
            Gate::y(),
            Gate::z(),
            Gate::h(),
            Gate::s(),
            Gate::s_dagger(),
            Gate::t(),
        ] {
            let m = gate.known_matrix.expect(gate.name);
            assert!(m.is_unitary(1e-6), "{} is not unitary", gate.name);
        }
    }

    #[test]
    fn time_matrices_are_unitary_and_periodic() {
        for t in [0.0, 0.25, 0.5, 0.99] {
            assert!(x_pow_matrix(t).is_unitary(1e-6));
            assert!(z_pow_matrix(t).is_unitary(1e-6));
        }
        assert!(x_pow_matrix(0.0).approx_eq(&Matrix::identity(2), 1e-6));
        assert!(x_pow_matrix(1.0).approx_eq(&Gate::x().known_matrix.unwrap(), 1e-6));
        assert!(z_pow_matrix(1.0).approx_eq(&Gate::z().known_matrix.unwrap(), 1e-6));
    }

    #[test]
    fn phase_mirrors_match_known_matrices() {
        for gate in [Gate::z(), Gate::s(), Gate::s_dagger(), Gate::t()] {
            let GateEffect::Phase(effect) = gate.effect else {
                panic!("{} is not a phase gate", gate.name);
            };
            let known = gate.known_matrix.expect(gate.name);
            for v in 0..2 {
                let phase = (effect.phase_for)(v, &env(1));
                let entry = known.at(v as usize, v as usize);
                assert!(
                    (phase - entry).norm() < 1e-6,
                    "{} diagonal {v}: {phase} vs {entry}",
                    gate.name
                );
            }
        }
    }

    #[test]
    fn increment_and_decrement_invert_each_other() {
        let GateEffect::Permutation(inc) = Gate::increment(3).effect else {
            panic!()
        };
        let GateEffect::Permutation(dec) = Gate::decrement(3).effect else {
            panic!()
        };
        for v in 0..8 {
            assert_eq!((dec.src_for)((inc.src_for)(v, &env(3)), &env(3)), v);
        }
    }

    #[test]
    fn plus_a_shifts_by_register_value() {
        let GateEffect::Permutation(p) = Gate::plus_a(3).effect else {
            panic!()
        };
        let mut e = env(3);
        e.input_a = 5;
        // Output value v copies from v - 5 mod 8.
        assert_eq!((p.src_for)(0, &e), 3);
        assert_eq!((p.src_for)(5, &e), 0);
        assert_eq!((p.src_for)(7, &e), 2);
    }

    #[test]
    fn plus_a_mod_r_is_a_bijection_below_the_modulus() {
        let GateEffect::Permutation(p) = Gate::plus_a_mod_r(3).effect else {
            panic!()
        };
        let mut e = env(3);
        e.modulus = 5;
        e.input_a = 3;
        let mut seen = [false; 8];
        for v in 0..8 {
            let s = (p.src_for)(v, &e);
            assert!(!seen[s as usize]);
            seen[s as usize] = true;
            if v >= 5 {
                assert_eq!(s, v, "values at or above the modulus pass through");
            } else {
                assert!(s < 5);
            }
        }
    }

    #[test]
    fn phase_gradient_walks_the_unit_circle() {
        let GateEffect::Phase(p) = Gate::phase_gradient(2).effect else {
            panic!()
        };
        let quarter = (p.phase_for)(1, &env(2));
        assert!((quarter - Complex::I).norm() < 1e-6);
        let half = (p.phase_for)(2, &env(2));
        assert!((half + Complex::ONE).norm() < 1e-6);
    }
}
