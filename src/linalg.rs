//! Bridge between `ndarray` arrays at the API surface and `faer` kernels for
//! the dense products and symmetric factorizations the engine relies on.

use faer::linalg::matmul::matmul;
use faer::linalg::solvers::{self, Ldlt as FaerLdlt, Llt as FaerLlt, Solve as FaerSolve};
use faer::{Accum, Mat, MatRef, Par, Side, get_global_parallelism};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Ix2};
use std::marker::PhantomData;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinalgError {
    #[error("Cholesky factorization failed: {0:?}")]
    Cholesky(solvers::LltError),
    #[error("LDLT factorization failed: {0:?}")]
    Ldlt(solvers::LdltError),
}

/// Zero-copy `MatRef` view of a 2D ndarray.
///
/// Layouts faer kernels cannot traverse safely (negative or zero strides)
/// are materialized into a compact owned copy instead.
pub struct MatView<'a> {
    ptr: *const f64,
    rows: usize,
    cols: usize,
    row_stride: isize,
    col_stride: isize,
    owned: Option<Array2<f64>>,
    _marker: PhantomData<&'a f64>,
}

impl<'a> MatView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix2>) -> Self {
        let (rows, cols) = array.dim();
        let strides = array.strides();
        if strides[0] <= 0 || strides[1] <= 0 {
            let owned = array.to_owned();
            return Self {
                ptr: std::ptr::null(),
                rows,
                cols,
                row_stride: 0,
                col_stride: 0,
                owned: Some(owned),
                _marker: PhantomData,
            };
        }
        Self {
            ptr: array.as_ptr(),
            rows,
            cols,
            row_stride: strides[0],
            col_stride: strides[1],
            owned: None,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        if let Some(owned) = &self.owned {
            let strides = owned.strides();
            // SAFETY: pointer/shape/strides come from an owned compact copy
            // stored inside this wrapper, valid for the returned lifetime.
            return unsafe {
                MatRef::from_raw_parts(
                    owned.as_ptr(),
                    owned.nrows(),
                    owned.ncols(),
                    strides[0],
                    strides[1],
                )
            };
        }
        // SAFETY: pointer/shape/strides come from a live ndarray view with
        // positive strides borrowed for 'a.
        unsafe {
            MatRef::from_raw_parts(self.ptr, self.rows, self.cols, self.row_stride, self.col_stride)
        }
    }
}

/// Zero-copy single-column `MatRef` view of a 1D ndarray.
pub struct ColView<'a> {
    ptr: *const f64,
    len: usize,
    stride: isize,
    owned: Option<Array1<f64>>,
    _marker: PhantomData<&'a f64>,
}

impl<'a> ColView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix1>) -> Self {
        let len = array.len();
        let stride = array.strides()[0];
        if stride <= 0 {
            let owned = array.to_owned();
            return Self {
                ptr: std::ptr::null(),
                len,
                stride: 1,
                owned: Some(owned),
                _marker: PhantomData,
            };
        }
        Self {
            ptr: array.as_ptr(),
            len,
            stride,
            owned: None,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        if let Some(owned) = &self.owned {
            // SAFETY: analogous to MatView::as_ref.
            return unsafe { MatRef::from_raw_parts(owned.as_ptr(), owned.len(), 1, 1, 0) };
        }
        // SAFETY: analogous to MatView::as_ref.
        unsafe { MatRef::from_raw_parts(self.ptr, self.len, 1, self.stride, 0) }
    }
}

pub fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((mat.nrows(), mat.ncols()));
    for j in 0..mat.ncols() {
        for i in 0..mat.nrows() {
            out[[i, j]] = mat[(i, j)];
        }
    }
    out
}

#[inline]
fn should_use_faer_matmul(m: usize, n: usize, k: usize) -> bool {
    // Stay on ndarray for tiny products to avoid setup overhead, switch to
    // faer GEMM for moderate and larger sizes.
    const MIN_DIM: usize = 32;
    const MIN_FLOP_SCALE: usize = 64 * 64;
    (m >= MIN_DIM || n >= MIN_DIM || k >= MIN_DIM)
        && m.saturating_mul(n).saturating_mul(k) >= MIN_FLOP_SCALE
}

#[inline]
fn gemm_parallelism(m: usize, n: usize, k: usize) -> Par {
    if m < 128 || n < 128 || k < 128 {
        Par::Seq
    } else {
        get_global_parallelism()
    }
}

/// Compute `A^T * A` for `A` of shape (n, p), producing the (p, p) Gram
/// matrix.
#[inline]
pub fn fast_ata<S: Data<Elem = f64>>(a: &ArrayBase<S, Ix2>) -> Array2<f64> {
    let (n, p) = a.dim();
    if !should_use_faer_matmul(p, p, n) {
        return a.t().dot(a);
    }

    let mut result = Mat::<f64>::zeros(p, p);
    let a_view = MatView::new(a);
    let a_ref = a_view.as_ref();
    matmul(
        result.as_mut(),
        Accum::Replace,
        a_ref.transpose(),
        a_ref,
        1.0,
        gemm_parallelism(p, p, n),
    );
    mat_to_array(result.as_ref())
}

/// Compute `A^T * B` for `A` (n, p) and `B` (n, q), producing (p, q).
#[inline]
pub fn fast_atb<S1: Data<Elem = f64>, S2: Data<Elem = f64>>(
    a: &ArrayBase<S1, Ix2>,
    b: &ArrayBase<S2, Ix2>,
) -> Array2<f64> {
    let (n_a, p) = a.dim();
    let (n_b, q) = b.dim();
    debug_assert_eq!(n_a, n_b, "A and B must have the same number of rows");

    if !should_use_faer_matmul(p, q, n_a) {
        return a.t().dot(b);
    }

    let mut result = Mat::<f64>::zeros(p, q);
    let a_view = MatView::new(a);
    let b_view = MatView::new(b);
    matmul(
        result.as_mut(),
        Accum::Replace,
        a_view.as_ref().transpose(),
        b_view.as_ref(),
        1.0,
        gemm_parallelism(p, q, n_a),
    );
    mat_to_array(result.as_ref())
}

/// Compute `A * v` for `A` (n, p) and `v` of length p.
#[inline]
pub fn fast_av<S1: Data<Elem = f64>, S2: Data<Elem = f64>>(
    a: &ArrayBase<S1, Ix2>,
    v: &ArrayBase<S2, Ix1>,
) -> Array1<f64> {
    let (n, p) = a.dim();
    debug_assert_eq!(p, v.len(), "A columns must match v length");

    if !should_use_faer_matmul(n, 1, p) {
        return a.dot(v);
    }

    let mut result = Mat::<f64>::zeros(n, 1);
    let a_view = MatView::new(a);
    let v_view = ColView::new(v);
    matmul(
        result.as_mut(),
        Accum::Replace,
        a_view.as_ref(),
        v_view.as_ref(),
        1.0,
        gemm_parallelism(n, 1, p),
    );
    let mut out = Array1::<f64>::zeros(n);
    for i in 0..n {
        out[i] = result[(i, 0)];
    }
    out
}

/// Symmetric positive-(semi)definite factorization with an LLT first attempt
/// and an LDLT fallback for semi-definite systems.
pub enum SymmetricFactor {
    Llt(FaerLlt<f64>),
    Ldlt(FaerLdlt<f64>),
}

impl SymmetricFactor {
    pub fn new<S: Data<Elem = f64>>(
        matrix: &ArrayBase<S, Ix2>,
        side: Side,
    ) -> Result<Self, LinalgError> {
        let view = MatView::new(matrix);
        let mat = view.as_ref();
        if let Ok(llt) = FaerLlt::new(mat, side) {
            return Ok(SymmetricFactor::Llt(llt));
        }
        let ldlt = FaerLdlt::new(mat, side).map_err(LinalgError::Ldlt)?;
        Ok(SymmetricFactor::Ldlt(ldlt))
    }

    #[inline]
    fn solve_ref(&self, rhs: MatRef<'_, f64>) -> Mat<f64> {
        match self {
            SymmetricFactor::Llt(f) => f.solve(rhs),
            SymmetricFactor::Ldlt(f) => f.solve(rhs),
        }
    }

    pub fn solve_vec(&self, rhs: &Array1<f64>) -> Array1<f64> {
        let rhs_view = ColView::new(rhs);
        let solution = self.solve_ref(rhs_view.as_ref());
        let mut out = Array1::<f64>::zeros(rhs.len());
        for i in 0..out.len() {
            out[i] = solution[(i, 0)];
        }
        out
    }

    pub fn solve_mat(&self, rhs: &Array2<f64>) -> Array2<f64> {
        let rhs_view = MatView::new(rhs);
        mat_to_array(self.solve_ref(rhs_view.as_ref()).as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn fast_ata_matches_ndarray_dot() {
        let a = array![[1.0, 2.0], [0.5, -3.0], [2.0, 0.0]];
        let expected = a.t().dot(&a);
        let got = fast_ata(&a);
        for i in 0..2 {
            for j in 0..2 {
                assert_abs_diff_eq!(expected[[i, j]], got[[i, j]], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn fast_atb_matches_ndarray_dot() {
        let a = array![[1.0, 2.0], [0.5, -3.0], [2.0, 0.0]];
        let b = array![[0.25, 1.0], [-1.0, 0.5], [2.0, -2.0]];
        let expected = a.t().dot(&b);
        let got = fast_atb(&a, &b);
        for i in 0..2 {
            for j in 0..2 {
                assert_abs_diff_eq!(expected[[i, j]], got[[i, j]], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn fast_av_matches_ndarray_dot() {
        let a = array![[1.0, 2.0, -1.0], [0.5, -3.0, 4.0]];
        let v = array![0.25, -1.0, 2.0];
        let expected = a.dot(&v);
        let got = fast_av(&a, &v);
        for i in 0..2 {
            assert_abs_diff_eq!(expected[i], got[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn symmetric_factor_solves_spd_system() {
        // A = M^T M + I is symmetric positive definite.
        let m = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let mut a = m.t().dot(&m);
        a[[0, 0]] += 1.0;
        a[[1, 1]] += 1.0;

        let rhs = array![1.0, -2.0];
        let factor = SymmetricFactor::new(&a, Side::Lower).expect("SPD factorization");
        let x = factor.solve_vec(&rhs);
        let back = a.dot(&x);
        for i in 0..2 {
            assert!((back[i] - rhs[i]).abs() < 1e-10, "residual at {i}");
        }
    }

    #[test]
    fn symmetric_factor_views_handle_transposed_input() {
        let m = array![[2.0, 0.5], [0.5, 3.0]];
        let mt = m.t();
        // Symmetric, so the transposed view factorizes to the same system.
        let factor = SymmetricFactor::new(&mt, Side::Lower).expect("factorization");
        let rhs = array![1.0, 1.0];
        let x = factor.solve_vec(&rhs);
        let back = m.dot(&x);
        for i in 0..2 {
            assert!((back[i] - rhs[i]).abs() < 1e-10);
        }
    }
}
