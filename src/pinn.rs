use crate::data::PoissonBatch;
use crate::fem::{GaussQuadrature2d, NUM_GAUSS_POINTS};
use crate::model::Ae;
use burn::prelude::*;

/// ネットワーク出力から物理損失を計算する問題定義。
pub trait PhysicsLoss<B: Backend> {
    /// 入力テンソルの境界マスクに従って境界条件を課します。
    fn apply_boundary(&self, u: Tensor<B, 4>, inputs: Tensor<B, 4>) -> Tensor<B, 4>;

    /// 解の候補 `u` に対する残差損失 (スカラー) を返します。
    fn loss(&self, u: Tensor<B, 4>, inputs: Tensor<B, 4>, forcing: Tensor<B, 4>) -> Tensor<B, 1>;
}

/// 拡散係数 ν が場所ごとに変わるポアソン方程式 -∇·(ν∇u) = f。
///
/// 入力チャネル 1 (bc1) の節点では u = 1、チャネル 2 (bc2) の節点では u = 0 を課し、
/// ガウス点で評価したエネルギー汎関数の要素平均を損失とします。
#[derive(Debug, Clone)]
pub struct Poisson<B: Backend> {
    quadrature: GaussQuadrature2d<B>,
}

impl<B: Backend> Poisson<B> {
    pub fn new(domain_size: usize, device: &B::Device) -> Self {
        Self {
            quadrature: GaussQuadrature2d::new(domain_size, device),
        }
    }

    /// ネットワークには拡散係数のチャネルだけを入力します。
    pub fn forward(&self, network: &Ae<B>, batch: &PoissonBatch<B>) -> Tensor<B, 4> {
        network.forward(batch.inputs.clone().narrow(1, 0, 1))
    }
}

impl<B: Backend> PhysicsLoss<B> for Poisson<B> {
    fn apply_boundary(&self, u: Tensor<B, 4>, inputs: Tensor<B, 4>) -> Tensor<B, 4> {
        let bc1 = inputs.clone().narrow(1, 1, 1).greater_elem(0.5);
        let bc2 = inputs.narrow(1, 2, 1).greater_elem(0.5);
        u.mask_fill(bc1, 1.0).mask_fill(bc2, 0.0)
    }

    fn loss(&self, u: Tensor<B, 4>, inputs: Tensor<B, 4>, forcing: Tensor<B, 4>) -> Tensor<B, 1> {
        let nu = inputs.clone().narrow(1, 0, 1);
        let u = self.apply_boundary(u, inputs);

        let q = &self.quadrature;
        let nu_gp = q.gauss_pt_evaluation(nu);
        let f_gp = q.gauss_pt_evaluation(forcing);
        let u_gp = q.gauss_pt_evaluation(u.clone());
        let u_x_gp = q.gauss_pt_evaluation_der_x(u.clone());
        let u_y_gp = q.gauss_pt_evaluation_der_y(u);

        let weights = q.weights().reshape([1, NUM_GAUSS_POINTS, 1, 1]);
        let grad_sq = u_x_gp.powf_scalar(2.0) + u_y_gp.powf_scalar(2.0);
        let res_elmwise = (nu_gp * grad_sq - u_gp * f_gp) * weights;
        res_elmwise.sum_dim(1).mean()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = NdArray<f32>;

    fn grid(n: usize, f: impl Fn(usize, usize) -> f32) -> Tensor<TestBackend, 4> {
        let values = (0..n * n).map(|i| f(i / n, i % n)).collect::<Vec<_>>();
        Tensor::from_data(TensorData::new(values, [1, 1, n, n]), &Default::default())
    }

    fn inputs(n: usize, nu: f32) -> Tensor<TestBackend, 4> {
        Tensor::cat(
            vec![
                grid(n, |_, _| nu),
                grid(n, |_, c| if c == 0 { 1.0 } else { 0.0 }),
                grid(n, |_, c| if c == n - 1 { 1.0 } else { 0.0 }),
                grid(n, |_, _| 0.0),
            ],
            1,
        )
    }

    #[test]
    fn boundary_columns_are_overwritten() {
        let n = 4;
        let poisson = Poisson::<TestBackend>::new(n, &Default::default());
        let u = grid(n, |_, _| 0.5);
        let values = poisson
            .apply_boundary(u, inputs(n, 1.0))
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        for (i, v) in values.iter().enumerate() {
            let expected = match i % n {
                0 => 1.0,
                c if c == n - 1 => 0.0,
                _ => 0.5,
            };
            assert_eq!(*v, expected);
        }
    }

    #[test]
    fn linear_profile_has_known_energy() {
        let n = 9;
        let h = 1.0 / (n - 1) as f32;
        let poisson = Poisson::<TestBackend>::new(n, &Default::default());
        let u = grid(n, |_, c| 1.0 - c as f32 * h);
        let zero = grid(n, |_, _| 0.0);
        // |∇u|² = 1, 重み合計 4
        let loss = poisson.loss(u, inputs(n, 1.0), zero).into_scalar();
        assert!((loss - 4.0).abs() < 1e-3, "{loss}");
    }

    #[test]
    fn forcing_enters_with_negative_sign() {
        let n = 9;
        let h = 1.0 / (n - 1) as f32;
        let poisson = Poisson::<TestBackend>::new(n, &Default::default());
        let u = grid(n, |_, c| 1.0 - c as f32 * h);
        let ones = grid(n, |_, _| 1.0);
        // 要素平均の u は 0.5 なので 4 - 4 * 0.5
        let loss = poisson.loss(u, inputs(n, 1.0), ones).into_scalar();
        assert!((loss - 2.0).abs() < 1e-3, "{loss}");
    }

    #[test]
    fn diffusivity_scales_the_gradient_term() {
        let n = 5;
        let h = 1.0 / (n - 1) as f32;
        let poisson = Poisson::<TestBackend>::new(n, &Default::default());
        let u = grid(n, |_, c| 1.0 - c as f32 * h);
        let zero = grid(n, |_, _| 0.0);
        let loss = poisson.loss(u, inputs(n, 2.5), zero).into_scalar();
        assert!((loss - 10.0).abs() < 1e-3, "{loss}");
    }

    #[test]
    fn boundary_nodes_receive_no_gradient() {
        type AdBackend = Autodiff<TestBackend>;
        let n = 5;
        let device = Default::default();
        let poisson = Poisson::<AdBackend>::new(n, &device);
        let values = (0..n * n)
            .map(|i| ((i / n) as f32 * 0.3).sin() + (i % n) as f32 * 0.1)
            .collect::<Vec<_>>();
        let u = Tensor::<AdBackend, 4>::from_data(TensorData::new(values, [1, 1, n, n]), &device)
            .require_grad();
        let inputs = Tensor::<AdBackend, 4>::from_inner(inputs(n, 1.0));
        let forcing = Tensor::<AdBackend, 4>::ones([1, 1, n, n], &device);

        let grads = poisson.loss(u.clone(), inputs, forcing).backward();
        let grad = u.grad(&grads).unwrap().into_data().to_vec::<f32>().unwrap();
        for row in 0..n {
            assert_eq!(grad[row * n], 0.0);
            assert_eq!(grad[row * n + n - 1], 0.0);
        }
        assert!(grad.iter().any(|g| g.abs() > 1e-6));
    }
}
