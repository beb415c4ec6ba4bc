use crate::error::SfmError;

/// Solve the homogeneous system `M * v = 0` in the least-squares sense.
///
/// Returns the unit-norm vector minimizing `||M * v||`, i.e. the right singular vector
/// associated with the smallest singular value of `M`.
///
/// # Arguments
///
/// * `mat_m` - The coefficient matrix with one or more rows per correspondence.
///
/// # Errors
///
/// Returns [`SfmError::InsufficientConstraints`] when `M` has fewer than `n_unknowns - 1`
/// rows, in which case the null space is not one-dimensional.
///
/// Example:
///
/// ```
/// use kornia_sfm::solver::solve_homogeneous;
///
/// // x - y = 0 and y - z = 0 => v ~ (1, 1, 1)
/// let mut m = faer::Mat::<f64>::zeros(2, 3);
/// m.write(0, 0, 1.0);
/// m.write(0, 1, -1.0);
/// m.write(1, 1, 1.0);
/// m.write(1, 2, -1.0);
/// let v = solve_homogeneous(m.as_ref()).unwrap();
/// assert!((v[0] - v[2]).abs() < 1e-12);
/// ```
pub fn solve_homogeneous(mat_m: faer::MatRef<'_, f64>) -> Result<Vec<f64>, SfmError> {
    let (equations, unknowns) = (mat_m.nrows(), mat_m.ncols());
    if unknowns == 0 || equations + 1 < unknowns {
        return Err(SfmError::InsufficientConstraints {
            equations,
            unknowns,
        });
    }

    // the last column of V spans the (approximate) null space
    let svd = mat_m.svd();
    let v = svd.v().col(unknowns - 1);

    Ok((0..unknowns).map(|i| v.read(i)).collect())
}
