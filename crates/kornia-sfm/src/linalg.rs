use glam::{DMat3, DVec3};

/// The 3x3 identity matrix.
pub const IDENTITY_MAT33: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// Convert a row-major 3x3 array into a glam matrix.
pub fn to_dmat3(m: &[[f64; 3]; 3]) -> DMat3 {
    // glam stores columns, the array stores rows
    DMat3::from_cols_array_2d(m).transpose()
}

/// Convert a glam matrix into a row-major 3x3 array.
pub fn from_dmat3(m: &DMat3) -> [[f64; 3]; 3] {
    m.transpose().to_cols_array_2d()
}

/// Invert a 3x3 matrix, returning `None` when it is singular.
pub fn try_inverse(m: &DMat3) -> Option<DMat3> {
    let det = m.determinant();
    if !det.is_finite() || det.abs() < f64::EPSILON {
        return None;
    }
    Some(m.inverse())
}

/// Build the skew-symmetric matrix `[t]x` such that `[t]x * v = t x v`.
pub fn skew_symmetric(t: DVec3) -> DMat3 {
    DMat3::from_cols(
        DVec3::new(0.0, t.z, -t.y),
        DVec3::new(-t.z, 0.0, t.x),
        DVec3::new(t.y, -t.x, 0.0),
    )
}

/// Read back the vector of a skew-symmetric matrix.
pub fn skew_symmetric_vector(m: &DMat3) -> DVec3 {
    DVec3::new(m.y_axis.z, m.z_axis.x, m.x_axis.y)
}

fn dmat3_to_faer(m: &DMat3) -> faer::Mat<f64> {
    faer::Mat::<f64>::from_fn(3, 3, |i, j| m.col(j)[i])
}

fn faer_to_dmat3(m: faer::MatRef<'_, f64>) -> DMat3 {
    debug_assert!(m.nrows() == 3 && m.ncols() == 3);
    DMat3::from_cols(
        DVec3::new(m.read(0, 0), m.read(1, 0), m.read(2, 0)),
        DVec3::new(m.read(0, 1), m.read(1, 1), m.read(2, 1)),
        DVec3::new(m.read(0, 2), m.read(1, 2), m.read(2, 2)),
    )
}

/// Singular value decomposition of a 3x3 matrix, `M = U * diag(s) * Vt`.
///
/// The singular values are sorted in non-increasing order.
#[derive(Debug, Clone, Copy)]
pub struct Svd3 {
    /// Left singular vectors as columns.
    pub u: DMat3,
    /// Singular values.
    pub s: DVec3,
    /// Transposed right singular vectors.
    pub vt: DMat3,
}

impl Svd3 {
    /// Rebuild `U * diag(s) * Vt` for the given singular values.
    pub fn compose(&self, s: DVec3) -> DMat3 {
        self.u * DMat3::from_diagonal(s) * self.vt
    }

    /// Negate the right singular vectors.
    pub fn negate_vt(&mut self) {
        self.vt = self.vt * -1.0;
    }
}

/// Compute the singular value decomposition of a 3x3 matrix.
pub fn svd3(m: &DMat3) -> Svd3 {
    let svd = dmat3_to_faer(m).svd();
    let s = svd.s_diagonal();
    Svd3 {
        u: faer_to_dmat3(svd.u()),
        s: DVec3::new(s.read(0), s.read(1), s.read(2)),
        vt: faer_to_dmat3(svd.v()).transpose(),
    }
}

/// Numerical rank of a matrix from its singular values.
///
/// Singular values below `max(s) * max(rows, cols) * f64::EPSILON` count as zero.
pub fn matrix_rank(m: faer::MatRef<'_, f64>) -> usize {
    let svd = m.svd();
    let s = svd.s_diagonal();
    let s_max = (0..s.nrows()).map(|i| s.read(i)).fold(0.0, f64::max);
    let tol = s_max * m.nrows().max(m.ncols()) as f64 * f64::EPSILON;
    (0..s.nrows()).filter(|&i| s.read(i) > tol).count()
}

/// Numerical rank of a 3x3 matrix.
pub fn matrix_rank33(m: &DMat3) -> usize {
    matrix_rank(dmat3_to_faer(m).as_ref())
}

/// Project a matrix to the closest orthogonal matrix in the Frobenius sense, `U * Vt`.
pub fn nearest_rotation(m: &DMat3) -> DMat3 {
    let svd = svd3(m);
    svd.u * svd.vt
}
