//! Turns a gate's permutation/phase/amplitude body into a complete WGSL
//! compute program over the packed amplitude buffer.
//!
//! The body text is an opaque DSL supplied by the gate; this module only
//! wraps it with the fixed boilerplate: the shared uniform block, span
//! index math, input-register helpers, and control masking. State indices
//! disallowed by the active control mask pass through unchanged.

use crate::circuit::ColumnContext;
use crate::control_mask::ControlMask;
use crate::gate::{ContextKey, InputRange};
use crate::gpu::pool::Texture;
use crate::gpu::shader::{
    ShaderApplication, ShaderArgError, ShaderSignature, UniformDecl, UniformKind, UniformValue,
};
use crate::gpu::{GpuContext, WORKGROUP_SIZE};
use crate::matrix::Matrix;

/// Uniforms shared by every generated ket shader, in declaration order.
const KET_UNIFORMS: [UniformDecl; 13] = [
    UniformDecl {
        name: "span_offset",
        kind: UniformKind::U32,
    },
    UniformDecl {
        name: "span",
        kind: UniformKind::U32,
    },
    UniformDecl {
        name: "state_len",
        kind: UniformKind::U32,
    },
    UniformDecl {
        name: "in_a_offset",
        kind: UniformKind::U32,
    },
    UniformDecl {
        name: "in_a_len",
        kind: UniformKind::U32,
    },
    UniformDecl {
        name: "in_b_offset",
        kind: UniformKind::U32,
    },
    UniformDecl {
        name: "in_b_len",
        kind: UniformKind::U32,
    },
    UniformDecl {
        name: "modulus",
        kind: UniformKind::U32,
    },
    UniformDecl {
        name: "q1",
        kind: UniformKind::U32,
    },
    UniformDecl {
        name: "q2",
        kind: UniformKind::U32,
    },
    UniformDecl {
        name: "time",
        kind: UniformKind::F32,
    },
    UniformDecl {
        name: "m_r0",
        kind: UniformKind::Vec4F,
    },
    UniformDecl {
        name: "m_r1",
        kind: UniformKind::Vec4F,
    },
];

/// Signature of every generated ket shader: the shared uniform block and
/// two inputs, the source amplitudes and the control flags.
pub fn ket_signature() -> ShaderSignature {
    ShaderSignature {
        uniforms: KET_UNIFORMS.to_vec(),
        inputs: 2,
    }
}

const KET_PRELUDE: &str = "\
@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> src_amps: array<vec2<f32>>;
@group(0) @binding(2) var<storage, read> control_flags: array<u32>;
@group(0) @binding(3) var<storage, read_write> dst_amps: array<vec2<f32>>;

var<private> ket_id: u32;

fn cmul(a: vec2<f32>, b: vec2<f32>) -> vec2<f32> {
    return vec2<f32>(a.x * b.x - a.y * b.y, a.x * b.y + a.y * b.x);
}
fn span_mask() -> u32 {
    return ((1u << params.span) - 1u) << params.span_offset;
}
fn input_a() -> u32 {
    if (params.in_a_len == 0u) { return 0u; }
    return (ket_id >> params.in_a_offset) & ((1u << params.in_a_len) - 1u);
}
fn input_b() -> u32 {
    if (params.in_b_len == 0u) { return 0u; }
    return (ket_id >> params.in_b_offset) & ((1u << params.in_b_len) - 1u);
}
fn inp(v: u32) -> vec2<f32> {
    let base = ket_id & (0xffffffffu ^ span_mask());
    return src_amps[base | (v << params.span_offset)];
}
";

/// Assemble a complete program around `body`, finishing with `epilog` as
/// the per-cell write.
fn ket_source(body: &str, epilog: &str) -> String {
    format!(
        "{params}\n{KET_PRELUDE}\n{body}\n\n\
         @compute @workgroup_size({workgroup})\n\
         fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{\n\
         \x20   let id = gid.x;\n\
         \x20   if (id >= params.state_len) {{ return; }}\n\
         \x20   ket_id = id;\n\
         \x20   if (control_flags[id] == 0u) {{\n\
         \x20       dst_amps[id] = src_amps[id];\n\
         \x20       return;\n\
         \x20   }}\n\
         \x20   let v = (id & span_mask()) >> params.span_offset;\n\
         {epilog}\
         }}\n",
        params = ket_signature().params_struct(),
        workgroup = WORKGROUP_SIZE,
    )
}

/// Program whose body `fn ket_src(v: u32) -> u32` names the span-local
/// source index each output copies from.
pub fn permutation_source(body: &str) -> String {
    ket_source(body, "    dst_amps[id] = inp(ket_src(v));\n")
}

/// Program whose body `fn ket_phase(v: u32) -> vec2<f32>` gives the unit
/// factor multiplied onto each amplitude in place.
pub fn phase_source(body: &str) -> String {
    ket_source(body, "    dst_amps[id] = cmul(src_amps[id], ket_phase(v));\n")
}

/// Program whose body `fn ket_amp(v: u32) -> vec2<f32>` computes the new
/// amplitude outright, reading partners through `inp`.
pub fn amplitude_source(body: &str) -> String {
    ket_source(body, "    dst_amps[id] = ket_amp(v);\n")
}

/// Body applying a single-wire unitary fed through the matrix uniforms.
const MATRIX_1Q_BODY: &str = "\
fn ket_amp(v: u32) -> vec2<f32> {
    let row = select(params.m_r1, params.m_r0, v == 0u);
    return cmul(row.xy, inp(0u)) + cmul(row.zw, inp(1u));
}";

/// Body exchanging the two wires named by the swap uniforms; spans the
/// whole register.
const SWAP_BODY: &str = "\
fn ket_src(v: u32) -> u32 {
    let pair = (1u << params.q1) | (1u << params.q2);
    let b1 = (v >> params.q1) & 1u;
    let b2 = (v >> params.q2) & 1u;
    return (v & (0xffffffffu ^ pair)) | (b2 << params.q1) | (b1 << params.q2);
}";

/// Argument builder for the shared ket uniform block.
#[derive(Debug, Clone, Copy)]
pub struct KetArgs {
    pub span_offset: u32,
    pub span: u32,
    pub state_len: u32,
    pub input_a: Option<InputRange>,
    pub input_b: Option<InputRange>,
    pub modulus: u32,
    pub swap_wires: (u32, u32),
    pub time: f32,
    pub matrix_rows: [[f32; 4]; 2],
}

impl KetArgs {
    pub fn new(row: u32, span: u32, wire_count: u32) -> KetArgs {
        KetArgs {
            span_offset: row,
            span,
            state_len: 1 << wire_count,
            input_a: None,
            input_b: None,
            modulus: 0,
            swap_wires: (0, 0),
            time: 0.0,
            matrix_rows: [[0.0; 4]; 2],
        }
    }

    /// Pick up the column's input registers and modulus.
    pub fn with_context(mut self, ctx: &ColumnContext) -> KetArgs {
        self.input_a = ctx.input_range(ContextKey::InputA);
        self.input_b = ctx.input_range(ContextKey::InputB);
        self.modulus = ctx.modulus().unwrap_or(0) as u32;
        self
    }

    pub fn with_time(mut self, time: f64) -> KetArgs {
        self.time = time as f32;
        self
    }

    pub fn with_swap(mut self, q1: u32, q2: u32) -> KetArgs {
        self.swap_wires = (q1, q2);
        self
    }

    /// # Panics
    /// If the matrix is not a single-wire unitary.
    pub fn with_matrix(mut self, matrix: &Matrix) -> KetArgs {
        assert_eq!(
            matrix.width(),
            2,
            "the matrix shader covers single-wire unitaries"
        );
        for row in 0..2 {
            self.matrix_rows[row] = [
                matrix.at(row, 0).re,
                matrix.at(row, 0).im,
                matrix.at(row, 1).re,
                matrix.at(row, 1).im,
            ];
        }
        self
    }

    /// Values in the order of the shared uniform declarations.
    pub fn values(&self) -> Vec<UniformValue> {
        let (a_offset, a_len) = match self.input_a {
            Some(r) => (r.offset, r.length),
            None => (0, 0),
        };
        let (b_offset, b_len) = match self.input_b {
            Some(r) => (r.offset, r.length),
            None => (0, 0),
        };
        vec![
            UniformValue::U32(self.span_offset),
            UniformValue::U32(self.span),
            UniformValue::U32(self.state_len),
            UniformValue::U32(a_offset),
            UniformValue::U32(a_len),
            UniformValue::U32(b_offset),
            UniformValue::U32(b_len),
            UniformValue::U32(self.modulus),
            UniformValue::U32(self.swap_wires.0),
            UniformValue::U32(self.swap_wires.1),
            UniformValue::F32(self.time),
            UniformValue::Vec4F(self.matrix_rows[0]),
            UniformValue::Vec4F(self.matrix_rows[1]),
        ]
    }
}

/// Compile (cached) a permutation ket shader and bind `args`.
pub fn permutation_op(
    gpu: &GpuContext,
    body: &str,
    args: &KetArgs,
) -> Result<ShaderApplication, ShaderArgError> {
    let shader = gpu
        .shaders()
        .get_or_compile(gpu, &permutation_source(body), &ket_signature());
    ShaderApplication::new(&shader, &args.values())
}

/// Compile (cached) a phase ket shader and bind `args`.
pub fn phase_op(
    gpu: &GpuContext,
    body: &str,
    args: &KetArgs,
) -> Result<ShaderApplication, ShaderArgError> {
    let shader = gpu
        .shaders()
        .get_or_compile(gpu, &phase_source(body), &ket_signature());
    ShaderApplication::new(&shader, &args.values())
}

/// Compile (cached) an amplitude ket shader and bind `args`.
pub fn amplitude_op(
    gpu: &GpuContext,
    body: &str,
    args: &KetArgs,
) -> Result<ShaderApplication, ShaderArgError> {
    let shader = gpu
        .shaders()
        .get_or_compile(gpu, &amplitude_source(body), &ket_signature());
    ShaderApplication::new(&shader, &args.values())
}

/// The generic single-wire unitary, fed through the matrix uniforms.
pub fn matrix_op(
    gpu: &GpuContext,
    matrix: &Matrix,
    args: KetArgs,
) -> Result<ShaderApplication, ShaderArgError> {
    amplitude_op(gpu, MATRIX_1Q_BODY, &args.with_matrix(matrix))
}

/// The dedicated two-wire swap, spanning the whole register so the wires
/// need not be adjacent.
pub fn swap_op(
    gpu: &GpuContext,
    wire_count: u32,
    q1: u32,
    q2: u32,
) -> Result<ShaderApplication, ShaderArgError> {
    permutation_op(
        gpu,
        SWAP_BODY,
        &KetArgs::new(0, wire_count, wire_count).with_swap(q1, q2),
    )
}

const CONTROL_FLAGS_SOURCE: &str = "\
struct Params {
    include_mask: u32,
    desired_mask: u32,
    len: u32,
}
@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read_write> flags: array<u32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let id = gid.x;
    if (id >= params.len) { return; }
    flags[id] = select(0u, 1u, (id & params.include_mask) == params.desired_mask);
}
";

fn control_flags_signature() -> ShaderSignature {
    ShaderSignature {
        uniforms: vec![
            UniformDecl {
                name: "include_mask",
                kind: UniformKind::U32,
            },
            UniformDecl {
                name: "desired_mask",
                kind: UniformKind::U32,
            },
            UniformDecl {
                name: "len",
                kind: UniformKind::U32,
            },
        ],
        inputs: 0,
    }
}

/// Fill `dst` with the per-state allow flag for `mask`.
pub fn render_control_flags(
    gpu: &GpuContext,
    mask: ControlMask,
    dst: &Texture,
) -> Result<(), ShaderArgError> {
    let shader = gpu
        .shaders()
        .get_or_compile(gpu, CONTROL_FLAGS_SOURCE, &control_flags_signature());
    let app = ShaderApplication::new(&shader, &[
        UniformValue::U32(mask.inclusion_mask()),
        UniformValue::U32(mask.desired_mask()),
        UniformValue::U32(dst.shape().cell_count()),
    ])?;
    app.render(gpu, &[], dst);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{Gate, GateEffect};

    #[test]
    fn generated_sources_wrap_the_body() {
        let GateEffect::Permutation(p) = Gate::increment(2).effect else {
            panic!()
        };
        let source = permutation_source(p.wgsl_body);
        assert!(source.starts_with("struct Params {"));
        assert!(source.contains("fn ket_src(v: u32) -> u32"));
        assert!(source.contains("dst_amps[id] = inp(ket_src(v));"));
        assert!(source.contains("if (control_flags[id] == 0u)"));
        assert!(source.contains("@workgroup_size(64)"));
    }

    #[test]
    fn ket_args_match_the_shared_signature() {
        let values = KetArgs::new(1, 2, 4).values();
        let signature = ket_signature();
        assert_eq!(values.len(), signature.uniforms.len());
        for (value, decl) in values.iter().zip(&signature.uniforms) {
            let kind = match value {
                UniformValue::U32(_) => UniformKind::U32,
                UniformValue::F32(_) => UniformKind::F32,
                UniformValue::Vec2F(_) => UniformKind::Vec2F,
                UniformValue::Vec4F(_) => UniformKind::Vec4F,
            };
            assert_eq!(kind, decl.kind, "{}", decl.name);
        }
    }

    #[test]
    fn matrix_rows_interleave_real_and_imaginary_parts() {
        let GateEffect::Matrix(m) = Gate::y().effect else {
            panic!()
        };
        let args = KetArgs::new(0, 1, 1).with_matrix(&m);
        assert_eq!(args.matrix_rows[0], [0.0, 0.0, 0.0, -1.0]);
        assert_eq!(args.matrix_rows[1], [0.0, 1.0, 0.0, 0.0]);
    }
}
