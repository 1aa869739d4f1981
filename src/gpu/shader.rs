use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use num_complex::Complex;
use wgpu::util::DeviceExt;

use super::pool::Texture;
use super::{GpuContext, WORKGROUP_SIZE};

/// Kinds a shader uniform argument can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    U32,
    F32,
    Vec2F,
    Vec4F,
}

impl UniformKind {
    pub fn wgsl_type(self) -> &'static str {
        match self {
            UniformKind::U32 => "u32",
            UniformKind::F32 => "f32",
            UniformKind::Vec2F => "vec2<f32>",
            UniformKind::Vec4F => "vec4<f32>",
        }
    }

    fn alignment(self) -> usize {
        match self {
            UniformKind::U32 | UniformKind::F32 => 4,
            UniformKind::Vec2F => 8,
            UniformKind::Vec4F => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformDecl {
    pub name: &'static str,
    pub kind: UniformKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    U32(u32),
    F32(f32),
    Vec2F([f32; 2]),
    Vec4F([f32; 4]),
}

impl UniformValue {
    fn kind(self) -> UniformKind {
        match self {
            UniformValue::U32(_) => UniformKind::U32,
            UniformValue::F32(_) => UniformKind::F32,
            UniformValue::Vec2F(_) => UniformKind::Vec2F,
            UniformValue::Vec4F(_) => UniformKind::Vec4F,
        }
    }

    fn write(self, out: &mut Vec<u8>) {
        match self {
            UniformValue::U32(v) => out.extend(v.to_ne_bytes()),
            UniformValue::F32(v) => out.extend(v.to_ne_bytes()),
            UniformValue::Vec2F(v) => out.extend(v.iter().flat_map(|x| x.to_ne_bytes())),
            UniformValue::Vec4F(v) => out.extend(v.iter().flat_map(|x| x.to_ne_bytes())),
        }
    }
}

/// Declared interface of a program: its uniform block, in order, and how
/// many read-only input textures it binds before the writable destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSignature {
    pub uniforms: Vec<UniformDecl>,
    pub inputs: usize,
}

impl ShaderSignature {
    /// The WGSL struct declaration matching this uniform block. WGSL's own
    /// layout rules agree with [`pack_uniforms`] member for member.
    pub fn params_struct(&self) -> String {
        let mut out = String::from("struct Params {\n");
        for decl in &self.uniforms {
            out.push_str(&format!("    {}: {},\n", decl.name, decl.kind.wgsl_type()));
        }
        out.push_str("}\n");
        out
    }
}

/// A compute program compiled once and reused for every application.
pub struct CompiledShader {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    signature: ShaderSignature,
}

impl CompiledShader {
    pub fn signature(&self) -> &ShaderSignature {
        &self.signature
    }
}

/// The binding layer rejected an argument list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderArgError {
    Missing {
        name: &'static str,
    },
    Extra {
        index: usize,
    },
    Mismatch {
        name: &'static str,
        expected: UniformKind,
        found: UniformKind,
    },
}

impl Display for ShaderArgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderArgError::Missing { name } => write!(f, "missing shader argument `{name}`"),
            ShaderArgError::Extra { index } => {
                write!(f, "unexpected extra shader argument at position {index}")
            }
            ShaderArgError::Mismatch {
                name,
                expected,
                found,
            } => write!(
                f,
                "shader argument `{name}` should be {expected:?} but was {found:?}"
            ),
        }
    }
}

impl Error for ShaderArgError {}

/// Pack values into the byte layout WGSL gives the matching struct: each
/// member aligned to its own alignment, the whole block padded out to 16.
fn pack_uniforms(decls: &[UniformDecl], args: &[UniformValue]) -> Vec<u8> {
    let mut out = Vec::new();
    for (decl, arg) in decls.iter().zip(args) {
        while out.len() % decl.kind.alignment() != 0 {
            out.push(0);
        }
        arg.write(&mut out);
    }
    while out.len() % 16 != 0 {
        out.push(0);
    }
    out
}

/// A compiled shader plus one packed argument set, ready to render.
pub struct ShaderApplication {
    shader: Arc<CompiledShader>,
    uniform_bytes: Vec<u8>,
}

impl ShaderApplication {
    /// Bind typed arguments, validating them against `shader`'s declared
    /// uniforms.
    pub fn new(
        shader: &Arc<CompiledShader>,
        args: &[UniformValue],
    ) -> Result<ShaderApplication, ShaderArgError> {
        let decls = &shader.signature.uniforms;
        if args.len() < decls.len() {
            return Err(ShaderArgError::Missing {
                name: decls[args.len()].name,
            });
        }
        if args.len() > decls.len() {
            return Err(ShaderArgError::Extra { index: decls.len() });
        }
        for (decl, arg) in decls.iter().zip(args) {
            if arg.kind() != decl.kind {
                return Err(ShaderArgError::Mismatch {
                    name: decl.name,
                    expected: decl.kind,
                    found: arg.kind(),
                });
            }
        }
        Ok(ShaderApplication {
            shader: Arc::clone(shader),
            uniform_bytes: pack_uniforms(decls, args),
        })
    }

    /// Dispatch over every cell of `dst`, reading `inputs`.
    ///
    /// # Panics
    /// If the input count does not match the signature, or any input is
    /// the destination itself; an invocation must never read the buffer
    /// it writes.
    pub fn render(&self, gpu: &GpuContext, inputs: &[&Texture], dst: &Texture) {
        let signature = &self.shader.signature;
        assert_eq!(
            inputs.len(),
            signature.inputs,
            "shader binds {} input textures",
            signature.inputs
        );
        for input in inputs {
            assert_ne!(
                input.id(),
                dst.id(),
                "a shader must never read and write the same texture"
            );
        }

        let uniform_buf = gpu
            .device()
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("params"),
                contents: &self.uniform_bytes,
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: uniform_buf.as_entire_binding(),
        }];
        for (i, input) in inputs.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: 1 + i as u32,
                resource: input.buffer().as_entire_binding(),
            });
        }
        entries.push(wgpu::BindGroupEntry {
            binding: 1 + inputs.len() as u32,
            resource: dst.buffer().as_entire_binding(),
        });
        let bind_group = gpu.device().create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &self.shader.layout,
            entries: &entries,
        });

        let mut encoder = gpu.device().create_command_encoder(&Default::default());
        {
            let mut pass = encoder.begin_compute_pass(&Default::default());
            pass.set_pipeline(&self.shader.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(dst.shape().cell_count().div_ceil(WORKGROUP_SIZE), 1, 1);
        }
        gpu.queue().submit(Some(encoder.finish()));
    }
}

/// Compiles each distinct WGSL source once and shares the pipeline.
pub struct ShaderCache {
    compiled: Mutex<HashMap<u64, Arc<CompiledShader>>>,
}

impl ShaderCache {
    pub(crate) fn new() -> ShaderCache {
        ShaderCache {
            compiled: Mutex::new(HashMap::new()),
        }
    }

    /// The compiled program for `source`, compiling it on first sight.
    pub fn get_or_compile(
        &self,
        gpu: &GpuContext,
        source: &str,
        signature: &ShaderSignature,
    ) -> Arc<CompiledShader> {
        let key = hash_source(source);
        let mut map = self.compiled.lock().expect("shader cache poisoned");
        if let Some(shader) = map.get(&key) {
            return Arc::clone(shader);
        }
        let shader = Arc::new(compile(gpu, source, signature.clone()));
        map.insert(key, Arc::clone(&shader));
        shader
    }

    /// Number of distinct programs compiled so far.
    pub fn len(&self) -> usize {
        self.compiled.lock().expect("shader cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn hash_source(source: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    hasher.finish()
}

fn compile(gpu: &GpuContext, source: &str, signature: ShaderSignature) -> CompiledShader {
    assert!(
        !signature.uniforms.is_empty(),
        "programs declare at least one uniform"
    );
    let module = gpu
        .device()
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: None,
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

    let mut entries = vec![wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }];
    for i in 0..signature.inputs {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 1 + i as u32,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });
    }
    entries.push(wgpu::BindGroupLayoutEntry {
        binding: 1 + signature.inputs as u32,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    });
    let layout = gpu
        .device()
        .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: None,
            entries: &entries,
        });
    let pipeline_layout = gpu
        .device()
        .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: None,
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
    let pipeline = gpu
        .device()
        .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: None,
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            cache: None,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });

    CompiledShader {
        pipeline,
        layout,
        signature,
    }
}

/// Upload amplitudes into `texture`, one complex value per cell.
///
/// # Panics
/// If the amplitude count does not match the texture's cell count.
pub fn upload_complex(gpu: &GpuContext, texture: &Texture, amplitudes: &[Complex<f32>]) {
    assert_eq!(amplitudes.len() as u32, texture.shape().cell_count());
    let bytes: Vec<u8> = amplitudes
        .iter()
        .flat_map(|a| {
            a.re.to_ne_bytes()
                .into_iter()
                .chain(a.im.to_ne_bytes())
        })
        .collect();
    gpu.queue().write_buffer(texture.buffer(), 0, &bytes);
}

/// Read `texture` back as complex amplitudes. Blocks until the queue
/// drains.
pub fn read_back_complex(gpu: &GpuContext, texture: &Texture) -> Vec<Complex<f32>> {
    read_back(gpu, texture)
        .chunks_exact(8)
        .map(|c| {
            Complex::new(
                f32::from_ne_bytes([c[0], c[1], c[2], c[3]]),
                f32::from_ne_bytes([c[4], c[5], c[6], c[7]]),
            )
        })
        .collect()
}

/// Read `texture` back as flag words. Blocks until the queue drains.
pub fn read_back_u32(gpu: &GpuContext, texture: &Texture) -> Vec<u32> {
    read_back(gpu, texture)
        .chunks_exact(4)
        .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn read_back(gpu: &GpuContext, texture: &Texture) -> Vec<u8> {
    let size = texture.shape().byte_len();
    let download = gpu.device().create_buffer(&wgpu::BufferDescriptor {
        label: Some("download"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = gpu.device().create_command_encoder(&Default::default());
    encoder.copy_buffer_to_buffer(texture.buffer(), 0, &download, 0, size);
    gpu.queue().submit(Some(encoder.finish()));

    let slice = download.slice(..);
    slice.map_async(wgpu::MapMode::Read, |_| {});
    gpu.device().poll(wgpu::Maintain::Wait);
    let data = slice.get_mapped_range().to_vec();
    download.unmap();
    data
}
