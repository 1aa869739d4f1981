use num_complex::Complex;

/// A small square matrix of single-precision complex entries, row-major.
///
/// Covers gate unitaries (2x2 for single-wire gates) and the reduced density
/// matrices produced by display gates.
#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    width: usize,
    data: Vec<Complex<f32>>,
}

impl Matrix {
    /// # Panics
    /// If `data.len() != width * width`.
    pub fn new(width: usize, data: Vec<Complex<f32>>) -> Matrix {
        assert_eq!(data.len(), width * width, "matrix data must be square");
        Matrix { width, data }
    }

    pub fn identity(width: usize) -> Matrix {
        let mut data = vec![Complex::ZERO; width * width];
        for i in 0..width {
            data[i * width + i] = Complex::ONE;
        }
        Matrix { width, data }
    }

    pub fn diagonal(entries: &[Complex<f32>]) -> Matrix {
        let width = entries.len();
        let mut data = vec![Complex::ZERO; width * width];
        for (i, &e) in entries.iter().enumerate() {
            data[i * width + i] = e;
        }
        Matrix { width, data }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn at(&self, row: usize, col: usize) -> Complex<f32> {
        self.data[row * self.width + col]
    }

    pub fn conjugate_transpose(&self) -> Matrix {
        let mut data = Vec::with_capacity(self.data.len());
        for row in 0..self.width {
            for col in 0..self.width {
                data.push(self.at(col, row).conj());
            }
        }
        Matrix {
            width: self.width,
            data,
        }
    }

    /// # Panics
    /// If the widths differ.
    pub fn mul(&self, rhs: &Matrix) -> Matrix {
        assert_eq!(self.width, rhs.width, "matrix widths must match");
        let mut data = Vec::with_capacity(self.data.len());
        for row in 0..self.width {
            for col in 0..self.width {
                data.push((0..self.width).map(|k| self.at(row, k) * rhs.at(k, col)).sum());
            }
        }
        Matrix {
            width: self.width,
            data,
        }
    }

    /// Whether every entry is within `tolerance` of the other matrix's.
    pub fn approx_eq(&self, other: &Matrix, tolerance: f32) -> bool {
        self.width == other.width
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| (a - b).norm() <= tolerance)
    }

    pub fn is_unitary(&self, tolerance: f32) -> bool {
        self.mul(&self.conjugate_transpose())
            .approx_eq(&Matrix::identity(self.width), tolerance)
    }
}

/// Narrow a double-precision complex value to the single precision the
/// amplitude buffers carry.
pub(crate) fn c32(z: Complex<f64>) -> Complex<f32> {
    Complex::new(z.re as f32, z.im as f32)
}
