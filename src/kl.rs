//! 指数型共分散関数のカルーネン・レーヴ (KL) 展開。
//!
//! 単位区間 [0, 1] 上の共分散 `C(x, x') = exp(-|x - x'| / ℓ)` の固有値問題は
//! 超越方程式の根として解析的に解けます。2次元の基底は1次元の固有関数の積として構成し、
//! 固有値の大きい順に `kl_terms` 個を採用します。

use crate::error::{Error, Result};
use std::f64::consts::PI;

/// 区間 [0, 1] の半幅。固有関数は中心 0.5 からの距離で評価します。
const HALF: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Parity {
    Even,
    Odd,
}

/// 1次元の固有モード。
#[derive(Debug, Clone, Copy)]
pub struct Mode1d {
    /// 超越方程式の根 ω
    pub omega: f64,
    /// 固有値 λ = 2c / (ω² + c²)
    pub eigenvalue: f64,
    parity: Parity,
    norm: f64,
}

impl Mode1d {
    fn new(omega: f64, c: f64, parity: Parity) -> Self {
        let shift = (2.0 * omega * HALF).sin() / (2.0 * omega);
        let norm = match parity {
            Parity::Even => (HALF + shift).sqrt(),
            Parity::Odd => (HALF - shift).sqrt(),
        };
        Self {
            omega,
            eigenvalue: 2.0 * c / (omega * omega + c * c),
            parity,
            norm,
        }
    }

    /// 位置 `x` ∈ [0, 1] における正規化された固有関数の値。
    pub fn eval(&self, x: f64) -> f64 {
        let s = x - HALF;
        match self.parity {
            Parity::Even => (self.omega * s).cos() / self.norm,
            Parity::Odd => (self.omega * s).sin() / self.norm,
        }
    }

    /// 根が満たすべき特性方程式の残差。
    #[cfg(test)]
    fn characteristic(&self, c: f64) -> f64 {
        characteristic(self.parity, self.omega, c)
    }
}

fn characteristic(parity: Parity, omega: f64, c: f64) -> f64 {
    let wa = omega * HALF;
    match parity {
        Parity::Even => c * wa.cos() - omega * wa.sin(),
        Parity::Odd => omega * wa.cos() + c * wa.sin(),
    }
}

/// 区間 [lo, hi] で符号が反転する関数の根を二分法で求めます。
fn bisect(f: impl Fn(f64) -> f64, mut lo: f64, mut hi: f64) -> f64 {
    let mut f_lo = f(lo);
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        let f_mid = f(mid);
        if f_mid == 0.0 || (hi - lo) < 1e-14 {
            return mid;
        }
        if f_lo.signum() == f_mid.signum() {
            lo = mid;
            f_lo = f_mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// 固有値の大きい順に `count` 個の1次元モードを返します。
pub fn modes_1d(correlation_length: f64, count: usize) -> Result<Vec<Mode1d>> {
    if !(correlation_length > 0.0) {
        return Err(Error::Config(format!(
            "相関長は正の値である必要があります (correlation_length = {correlation_length})"
        )));
    }
    let c = 1.0 / correlation_length;
    let mut modes = Vec::with_capacity(2 * count);
    for k in 0..count {
        let k = k as f64;
        // 偶モードの根は [kπ/a, (kπ+π/2)/a]、奇モードの根は [(kπ+π/2)/a, (k+1)π/a] に1つずつ存在する
        let even = bisect(
            |w| characteristic(Parity::Even, w, c),
            k * PI / HALF,
            (k * PI + 0.5 * PI) / HALF,
        );
        let odd = bisect(
            |w| characteristic(Parity::Odd, w, c),
            (k * PI + 0.5 * PI) / HALF,
            (k + 1.0) * PI / HALF,
        );
        modes.push(Mode1d::new(even, c, Parity::Even));
        modes.push(Mode1d::new(odd, c, Parity::Odd));
    }
    modes.sort_by(|a, b| a.omega.total_cmp(&b.omega));
    modes.truncate(count);
    Ok(modes)
}

/// 2次元 KL 展開の1項。
#[derive(Debug, Clone, Copy)]
pub struct KlTerm {
    pub eigenvalue: f64,
    x_mode: Mode1d,
    y_mode: Mode1d,
}

impl KlTerm {
    pub fn eval(&self, x: f64, y: f64) -> f64 {
        self.x_mode.eval(x) * self.y_mode.eval(y)
    }
}

/// 分離型の2次元 KL 基底。
#[derive(Debug, Clone)]
pub struct KlBasis {
    terms: Vec<KlTerm>,
}

impl KlBasis {
    pub fn new(correlation_length: f64, kl_terms: usize) -> Result<Self> {
        if kl_terms == 0 {
            return Err(Error::Config("kl_terms は 1 以上である必要があります".into()));
        }
        let modes = modes_1d(correlation_length, kl_terms)?;
        let mut pairs = Vec::with_capacity(kl_terms * kl_terms);
        for (i, x_mode) in modes.iter().enumerate() {
            for (j, y_mode) in modes.iter().enumerate() {
                pairs.push((i, j, x_mode.eigenvalue * y_mode.eigenvalue));
            }
        }
        pairs.sort_by(|a, b| b.2.total_cmp(&a.2).then((a.0 + a.1, a.0).cmp(&(b.0 + b.1, b.0))));

        let terms = pairs
            .into_iter()
            .take(kl_terms)
            .map(|(i, j, eigenvalue)| KlTerm {
                eigenvalue,
                x_mode: modes[i],
                y_mode: modes[j],
            })
            .collect();
        Ok(Self { terms })
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> &[KlTerm] {
        &self.terms
    }

    /// `n × n` の節点格子上で各項を評価します (行 = y, 列 = x)。
    pub fn grid_fields(&self, n: usize) -> Vec<Vec<f64>> {
        let coord = |i: usize| {
            if n > 1 {
                i as f64 / (n - 1) as f64
            } else {
                0.0
            }
        };
        self.terms
            .iter()
            .map(|term| {
                let mut field = Vec::with_capacity(n * n);
                for row in 0..n {
                    for col in 0..n {
                        field.push(term.eval(coord(col), coord(row)));
                    }
                }
                field
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn midpoint<F: Fn(f64) -> f64>(f: F, n: usize) -> f64 {
        let h = 1.0 / n as f64;
        (0..n).map(|i| f((i as f64 + 0.5) * h)).sum::<f64>() * h
    }

    #[test]
    fn roots_satisfy_characteristic_equation() {
        let c = 1.0 / 0.2;
        for mode in modes_1d(0.2, 8).unwrap() {
            assert!(mode.characteristic(c).abs() < 1e-8, "{mode:?}");
        }
    }

    #[test]
    fn eigenvalues_are_positive_and_non_increasing() {
        let modes = modes_1d(0.2, 10).unwrap();
        assert_eq!(modes.len(), 10);
        for pair in modes.windows(2) {
            assert!(pair[0].eigenvalue > 0.0);
            assert!(pair[0].eigenvalue >= pair[1].eigenvalue);
        }
    }

    #[test]
    fn eigenfunctions_are_orthonormal() {
        let modes = modes_1d(0.3, 4).unwrap();
        for (i, a) in modes.iter().enumerate() {
            for (j, b) in modes.iter().enumerate() {
                let inner = midpoint(|x| a.eval(x) * b.eval(x), 20_000);
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((inner - expected).abs() < 1e-4, "<{i},{j}> = {inner}");
            }
        }
    }

    #[test]
    fn modes_solve_the_integral_eigenproblem() {
        let ell = 0.2;
        let mode = modes_1d(ell, 3).unwrap()[1];
        for &x in &[0.1, 0.3, 0.75] {
            let lhs = midpoint(|y| (-(x - y).abs() / ell).exp() * mode.eval(y), 20_000);
            let rhs = mode.eigenvalue * mode.eval(x);
            assert!((lhs - rhs).abs() < 1e-3, "x = {x}: {lhs} vs {rhs}");
        }
    }

    #[test]
    fn eigenvalues_sum_to_the_trace() {
        let total: f64 = modes_1d(0.2, 200).unwrap().iter().map(|m| m.eigenvalue).sum();
        assert!(total > 0.98 && total < 1.0 + 1e-9, "{total}");
    }

    #[test]
    fn basis_keeps_the_largest_products() {
        let basis = KlBasis::new(0.2, 6).unwrap();
        let modes = modes_1d(0.2, 6).unwrap();
        assert_eq!(basis.len(), 6);
        assert!((basis.terms()[0].eigenvalue - modes[0].eigenvalue.powi(2)).abs() < 1e-12);
        for pair in basis.terms().windows(2) {
            assert!(pair[0].eigenvalue >= pair[1].eigenvalue);
        }
    }

    #[test]
    fn grid_fields_are_row_major_in_y() {
        let basis = KlBasis::new(0.5, 3).unwrap();
        let n = 5;
        let fields = basis.grid_fields(n);
        assert_eq!(fields.len(), 3);
        let term = basis.terms()[1];
        // 行 1, 列 3 は (x, y) = (0.75, 0.25)
        assert!((fields[1][n + 3] - term.eval(0.75, 0.25)).abs() < 1e-12);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        assert!(matches!(KlBasis::new(0.2, 0), Err(Error::Config(_))));
        assert!(matches!(KlBasis::new(0.0, 3), Err(Error::Config(_))));
    }
}
