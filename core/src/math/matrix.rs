use ndarray::{Array1, Array2};
use num_complex::Complex64;

const MAX_SWEEPS: usize = 100;

/// Eigen-decomposition of a Hermitian matrix.
///
/// `values` are sorted in descending order and column `k` of `vectors` is the
/// unit eigenvector belonging to `values[k]`.
#[derive(Debug, Clone)]
pub struct HermitianEigen {
    pub values: Vec<f64>,
    pub vectors: Array2<Complex64>,
}

pub struct MatrixHelper;

impl MatrixHelper {
    /// `v · vᴴ`
    pub fn outer_conj(v: &Array1<Complex64>) -> Array2<Complex64> {
        let n = v.len();
        Array2::from_shape_fn((n, n), |(i, j)| v[i] * v[j].conj())
    }

    /// Cyclic complex Jacobi eigen-solver. Returns `None` for non-square or
    /// empty input.
    pub fn hermitian_eigen(matrix: &Array2<Complex64>) -> Option<HermitianEigen> {
        let (rows, cols) = matrix.dim();
        if rows == 0 || rows != cols {
            return None;
        }
        let n = rows;
        let mut a = matrix.clone();
        let mut v = Array2::<Complex64>::eye(n);

        let total: f64 = a.iter().map(|z| z.norm_sqr()).sum();
        let tolerance = (total * 1e-26).max(f64::MIN_POSITIVE);

        for _ in 0..MAX_SWEEPS {
            if Self::off_diagonal_norm_sqr(&a) <= tolerance {
                break;
            }
            for p in 0..n {
                for q in (p + 1)..n {
                    Self::rotate(&mut a, &mut v, p, q);
                }
            }
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&i, &j| a[[j, j]].re.total_cmp(&a[[i, i]].re));

        let values = order.iter().map(|&i| a[[i, i]].re).collect();
        let vectors = Array2::from_shape_fn((n, n), |(row, col)| v[[row, order[col]]]);
        Some(HermitianEigen { values, vectors })
    }

    fn off_diagonal_norm_sqr(a: &Array2<Complex64>) -> f64 {
        a.indexed_iter()
            .filter(|((i, j), _)| i != j)
            .map(|(_, z)| z.norm_sqr())
            .sum()
    }

    /// Zeroes `a[p][q]` with the unitary `G = diag(1, e^{-iφ}) · R(θ)` and
    /// accumulates `G` into `v`.
    fn rotate(a: &mut Array2<Complex64>, v: &mut Array2<Complex64>, p: usize, q: usize) {
        let b = a[[p, q]];
        let magnitude = b.norm();
        if magnitude <= f64::MIN_POSITIVE {
            return;
        }
        let phase = Complex64::from_polar(1.0, -b.arg());
        let theta = 0.5 * (2.0 * magnitude).atan2(a[[q, q]].re - a[[p, p]].re);
        let (s, c) = theta.sin_cos();

        let g_pp = Complex64::new(c, 0.0);
        let g_pq = Complex64::new(s, 0.0);
        let g_qp = phase * -s;
        let g_qq = phase * c;

        let n = a.nrows();
        for k in 0..n {
            let (akp, akq) = (a[[k, p]], a[[k, q]]);
            a[[k, p]] = akp * g_pp + akq * g_qp;
            a[[k, q]] = akp * g_pq + akq * g_qq;
        }
        for k in 0..n {
            let (apk, aqk) = (a[[p, k]], a[[q, k]]);
            a[[p, k]] = g_pp.conj() * apk + g_qp.conj() * aqk;
            a[[q, k]] = g_pq.conj() * apk + g_qq.conj() * aqk;
        }
        for k in 0..n {
            let (vkp, vkq) = (v[[k, p]], v[[k, q]]);
            v[[k, p]] = vkp * g_pp + vkq * g_qp;
            v[[k, q]] = vkp * g_pq + vkq * g_qq;
        }

        a[[p, q]] = Complex64::new(0.0, 0.0);
        a[[q, p]] = Complex64::new(0.0, 0.0);
        a[[p, p]] = Complex64::new(a[[p, p]].re, 0.0);
        a[[q, q]] = Complex64::new(a[[q, q]].re, 0.0);
    }
}
