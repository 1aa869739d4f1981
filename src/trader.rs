use num_complex::Complex;

use crate::gpu::pool::{Texture, TextureFormat, TexturePool, TextureShape};
use crate::gpu::shader::{self, ShaderApplication};
use crate::gpu::GpuContext;

/// Double-buffered amplitude state.
///
/// `current` always holds the latest valid state and `spare` is the target
/// of the next operation; the two are swapped after every application, so
/// no shader ever reads the buffer it writes. Both buffers come from the
/// pool and go back to it exactly once, on [`StateTrader::dispose`].
pub struct StateTrader {
    current: Texture,
    spare: Texture,
}

impl StateTrader {
    /// A trader holding the classical `basis_index` state of `wire_count`
    /// wires.
    pub fn seeded_classical(
        gpu: &GpuContext,
        pool: &mut TexturePool,
        wire_count: u32,
        basis_index: u32,
    ) -> StateTrader {
        let shape = TextureShape::for_wire_count(wire_count, TextureFormat::ComplexF32);
        let current = pool.take(gpu, shape);
        let spare = pool.take(gpu, shape);
        let mut amplitudes = vec![Complex::ZERO; shape.cell_count() as usize];
        amplitudes[basis_index as usize] = Complex::ONE;
        shader::upload_complex(gpu, &current, &amplitudes);
        StateTrader { current, spare }
    }

    /// The latest valid state.
    pub fn current(&self) -> &Texture {
        &self.current
    }

    /// Render `app` reading the current state into the spare buffer, then
    /// swap the two.
    pub fn shade_and_trade(
        &mut self,
        gpu: &GpuContext,
        app: &ShaderApplication,
        controls: &Texture,
    ) {
        app.render(gpu, &[&self.current, controls], &self.spare);
        std::mem::swap(&mut self.current, &mut self.spare);
    }

    /// Return both buffers to the pool. Consuming `self` makes a second
    /// deposit or a use-after-dispose unrepresentable.
    pub fn dispose(self, pool: &mut TexturePool) {
        pool.deposit(self.current);
        pool.deposit(self.spare);
    }
}
