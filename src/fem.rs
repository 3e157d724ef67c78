//! 一様な四角形双一次 (Q1) 要素によるガウス点評価。
//!
//! 節点格子の隣接する 2×2 節点が1要素に対応します。要素上の形状関数値とその導関数を
//! 2×2 の畳み込みカーネルとして保持し、`conv2d` で全要素のガウス点値を一度に求めます。
//! 畳み込みなので自動微分はそのまま通ります。

use burn::prelude::*;
use burn::tensor::module::conv2d;
use burn::tensor::ops::ConvOptions;

/// 1次元2点ガウス則の積分点 ±1/√3
pub const GAUSS_COORD: f64 = 0.577_350_269_189_625_8;

/// 2×2 ガウス則の積分点数
pub const NUM_GAUSS_POINTS: usize = 4;

/// 参照要素 [-1, 1]² 上の積分点 (ξ, η)。η (行方向) が外側のループです。
pub const GAUSS_POINTS: [(f64, f64); NUM_GAUSS_POINTS] = [
    (-GAUSS_COORD, -GAUSS_COORD),
    (GAUSS_COORD, -GAUSS_COORD),
    (-GAUSS_COORD, GAUSS_COORD),
    (GAUSS_COORD, GAUSS_COORD),
];

pub const GAUSS_WEIGHTS: [f64; NUM_GAUSS_POINTS] = [1.0; NUM_GAUSS_POINTS];

/// 要素内の節点 (行, 列) に対応する参照座標。
fn node_coords(row: usize, col: usize) -> (f64, f64) {
    (2.0 * col as f64 - 1.0, 2.0 * row as f64 - 1.0)
}

/// 節点 (行, 列) の双一次形状関数 N(ξ, η)。
pub fn shape_function(row: usize, col: usize, xi: f64, eta: f64) -> f64 {
    let (xn, yn) = node_coords(row, col);
    0.25 * (1.0 + xi * xn) * (1.0 + eta * yn)
}

/// 形状関数の参照座標での勾配 (∂N/∂ξ, ∂N/∂η)。
pub fn shape_gradient(row: usize, col: usize, xi: f64, eta: f64) -> (f64, f64) {
    let (xn, yn) = node_coords(row, col);
    (0.25 * xn * (1.0 + eta * yn), 0.25 * yn * (1.0 + xi * xn))
}

/// `[gp, row, col]` 順に平坦化した値・x微分・y微分カーネル。
fn element_kernels(h: f64) -> [[f32; 16]; 3] {
    let jac = 2.0 / h;
    let mut kernels = [[0.0f32; 16]; 3];
    for (gp, &(xi, eta)) in GAUSS_POINTS.iter().enumerate() {
        for row in 0..2 {
            for col in 0..2 {
                let idx = gp * 4 + row * 2 + col;
                let (dxi, deta) = shape_gradient(row, col, xi, eta);
                kernels[0][idx] = shape_function(row, col, xi, eta) as f32;
                kernels[1][idx] = (dxi * jac) as f32;
                kernels[2][idx] = (deta * jac) as f32;
            }
        }
    }
    kernels
}

/// 単位正方形上の一様メッシュに対するガウス点評価器。
#[derive(Debug, Clone)]
pub struct GaussQuadrature2d<B: Backend> {
    value_kernel: Tensor<B, 4>,
    dx_kernel: Tensor<B, 4>,
    dy_kernel: Tensor<B, 4>,
    weights: Tensor<B, 1>,
    h: f64,
}

impl<B: Backend> GaussQuadrature2d<B> {
    /// `domain_size` 節点/辺 の格子用に初期化します。要素幅は h = 1 / (domain_size - 1)。
    pub fn new(domain_size: usize, device: &B::Device) -> Self {
        let h = 1.0 / (domain_size.max(2) - 1) as f64;
        let [value, dx, dy] = element_kernels(h);
        let kernel = |k: [f32; 16]| {
            Tensor::<B, 4>::from_data(TensorData::new(k.to_vec(), [NUM_GAUSS_POINTS, 1, 2, 2]), device)
        };
        let weights = GAUSS_WEIGHTS.map(|w| w as f32);
        Self {
            value_kernel: kernel(value),
            dx_kernel: kernel(dx),
            dy_kernel: kernel(dy),
            weights: Tensor::from_data(TensorData::new(weights.to_vec(), [NUM_GAUSS_POINTS]), device),
            h,
        }
    }

    pub fn element_size(&self) -> f64 {
        self.h
    }

    /// ガウス点の重み `[4]`。
    pub fn weights(&self) -> Tensor<B, 1> {
        self.weights.clone()
    }

    /// `[b, 1, n, n]` の節点値から `[b, 4, n-1, n-1]` のガウス点値を求めます。
    pub fn gauss_pt_evaluation(&self, field: Tensor<B, 4>) -> Tensor<B, 4> {
        Self::apply(field, self.value_kernel.clone())
    }

    pub fn gauss_pt_evaluation_der_x(&self, field: Tensor<B, 4>) -> Tensor<B, 4> {
        Self::apply(field, self.dx_kernel.clone())
    }

    pub fn gauss_pt_evaluation_der_y(&self, field: Tensor<B, 4>) -> Tensor<B, 4> {
        Self::apply(field, self.dy_kernel.clone())
    }

    fn apply(field: Tensor<B, 4>, kernel: Tensor<B, 4>) -> Tensor<B, 4> {
        conv2d(field, kernel, None, ConvOptions::new([1, 1], [0, 0], [1, 1], 1))
    }
}
