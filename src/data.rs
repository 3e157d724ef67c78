//! KL 展開によるランダム拡散係数場のデータセット。
//!
//! 係数ファイル (`sobol_<N>d.npy`) の各行が1サンプルです。各サンプルは拡散係数場と
//! 2つのディリクレ境界マスク、予備チャネルからなる4チャネルの入力と、外力場を返します。

use crate::error::{self, Error};
use crate::kl::KlBasis;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use ndarray::Array2;
use ndarray_npy::{ReadNpyExt, WriteNpyExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::path::Path;

/// 入力テンソルのチャネル数 (拡散係数, bc1, bc2, 予備)
pub const INPUT_CHANNELS: usize = 4;

/// データセットの設定。
#[derive(Config, Debug)]
pub struct KlSumConfig {
    #[config(default = 6)]
    pub kl_terms: usize,
    /// 1辺あたりの節点数
    #[config(default = 32)]
    pub domain_size: usize,
    #[config(default = 0.2)]
    pub correlation_length: f64,
    /// 対数拡散係数の標準偏差
    #[config(default = 1.0)]
    pub sigma: f64,
    /// 一様な外力の値
    #[config(default = 0.0)]
    pub forcing: f64,
}

/// 係数ファイルを読み込みます。値は [0, 1] の一様サンプルを想定しています。
pub fn load_coefficients(path: &Path, kl_terms: usize) -> error::Result<Array2<f64>> {
    let open = || File::open(path).map_err(|e| Error::io(path, e));
    let coeffs = match Array2::<f64>::read_npy(open()?) {
        Ok(arr) => arr,
        Err(f64_err) => match Array2::<f32>::read_npy(open()?) {
            Ok(arr) => arr.mapv(f64::from),
            Err(_) => {
                return Err(Error::Npy {
                    path: path.to_path_buf(),
                    message: f64_err.to_string(),
                });
            }
        },
    };

    let (rows, cols) = coeffs.dim();
    if cols != kl_terms {
        return Err(Error::Shape(format!(
            "'{}' の列数 {cols} が kl_terms {kl_terms} と一致しません",
            path.display()
        )));
    }
    if rows == 0 {
        return Err(Error::Shape(format!("'{}' にサンプルがありません", path.display())));
    }
    Ok(coeffs)
}

/// [0, 1) の一様乱数で係数サンプルを生成します。
pub fn sample_coefficients(samples: usize, kl_terms: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_simple_fn((samples, kl_terms), || rng.random::<f64>())
}

pub fn write_coefficients(path: &Path, coeffs: &Array2<f64>) -> error::Result<()> {
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    coeffs.write_npy(file).map_err(|e| Error::Npy {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// データセットの1サンプル。
#[derive(Debug, Clone)]
pub struct PoissonItem {
    pub coeffs: Vec<f64>,
    /// `[4, n, n]` を行優先で平坦化した入力
    pub inputs: Vec<f32>,
    /// `[1, n, n]` の外力
    pub forcing: Vec<f32>,
}

pub struct KlSumDataset {
    coeffs: Array2<f64>,
    basis_fields: Vec<Vec<f64>>,
    scales: Vec<f64>,
    domain_size: usize,
    sigma: f64,
    forcing: f32,
}

impl KlSumDataset {
    pub fn new(config: &KlSumConfig, coeffs: Array2<f64>) -> error::Result<Self> {
        if config.domain_size < 2 {
            return Err(Error::Config(format!(
                "domain_size は 2 以上である必要があります ({})",
                config.domain_size
            )));
        }
        if coeffs.ncols() != config.kl_terms {
            return Err(Error::Shape(format!(
                "係数の列数 {} が kl_terms {} と一致しません",
                coeffs.ncols(),
                config.kl_terms
            )));
        }
        let basis = KlBasis::new(config.correlation_length, config.kl_terms)?;
        let scales = basis.terms().iter().map(|t| t.eigenvalue.sqrt()).collect();
        Ok(Self {
            basis_fields: basis.grid_fields(config.domain_size),
            scales,
            coeffs,
            domain_size: config.domain_size,
            sigma: config.sigma,
            forcing: config.forcing as f32,
        })
    }

    pub fn from_file(config: &KlSumConfig, path: &Path) -> error::Result<Self> {
        let coeffs = load_coefficients(path, config.kl_terms)?;
        tracing::info!(
            path = %path.display(),
            samples = coeffs.nrows(),
            "係数ファイルを読み込みました"
        );
        Self::new(config, coeffs)
    }

    pub fn domain_size(&self) -> usize {
        self.domain_size
    }

    pub fn coefficients(&self, index: usize) -> Option<Vec<f64>> {
        (index < self.coeffs.nrows()).then(|| self.coeffs.row(index).to_vec())
    }

    /// 係数から拡散係数場 ν = exp(σ Σ √λ_k ξ_k φ_k) を計算します。
    pub fn diffusivity(&self, coeffs: &[f64]) -> Vec<f64> {
        let n2 = self.domain_size * self.domain_size;
        let mut log_nu = vec![0.0; n2];
        for ((field, scale), &c) in self.basis_fields.iter().zip(&self.scales).zip(coeffs) {
            let xi = 3f64.sqrt() * (2.0 * c - 1.0);
            for (acc, phi) in log_nu.iter_mut().zip(field) {
                *acc += scale * xi * phi;
            }
        }
        log_nu.into_iter().map(|v| (self.sigma * v).exp()).collect()
    }

    fn boundary_masks(&self) -> (Vec<f32>, Vec<f32>) {
        let n = self.domain_size;
        let mut bc1 = vec![0.0f32; n * n];
        let mut bc2 = vec![0.0f32; n * n];
        for row in 0..n {
            bc1[row * n] = 1.0;
            bc2[row * n + n - 1] = 1.0;
        }
        (bc1, bc2)
    }
}

impl Dataset<PoissonItem> for KlSumDataset {
    fn get(&self, index: usize) -> Option<PoissonItem> {
        let coeffs = self.coefficients(index)?;
        let n2 = self.domain_size * self.domain_size;
        let (bc1, bc2) = self.boundary_masks();

        let mut inputs = Vec::with_capacity(INPUT_CHANNELS * n2);
        inputs.extend(self.diffusivity(&coeffs).into_iter().map(|v| v as f32));
        inputs.extend(bc1);
        inputs.extend(bc2);
        inputs.extend(std::iter::repeat_n(0.0f32, n2));

        Some(PoissonItem {
            coeffs,
            inputs,
            forcing: vec![self.forcing; n2],
        })
    }

    fn len(&self) -> usize {
        self.coeffs.nrows()
    }
}

/// バッチ化された入力と外力。
#[derive(Debug, Clone)]
pub struct PoissonBatch<B: Backend> {
    /// `[batch, 4, n, n]`
    pub inputs: Tensor<B, 4>,
    /// `[batch, 1, n, n]`
    pub forcing: Tensor<B, 4>,
}

#[derive(Clone, Debug)]
pub struct PoissonBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> PoissonBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    pub fn batch(&self, items: &[PoissonItem], domain_size: usize) -> PoissonBatch<B> {
        let b = items.len();
        let n = domain_size;
        let inputs: Vec<f32> = items.iter().flat_map(|i| i.inputs.iter().copied()).collect();
        let forcing: Vec<f32> = items.iter().flat_map(|i| i.forcing.iter().copied()).collect();
        PoissonBatch {
            inputs: Tensor::from_data(
                TensorData::new(inputs, [b, INPUT_CHANNELS, n, n]),
                &self.device,
            ),
            forcing: Tensor::from_data(TensorData::new(forcing, [b, 1, n, n]), &self.device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    fn small_config() -> KlSumConfig {
        KlSumConfig::new().with_kl_terms(3).with_domain_size(5)
    }

    #[test]
    fn samples_round_trip_through_npy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sobol_3d.npy");
        let coeffs = sample_coefficients(10, 3, 42);
        assert!(coeffs.iter().all(|&c| (0.0..1.0).contains(&c)));
        write_coefficients(&path, &coeffs).unwrap();
        let loaded = load_coefficients(&path, 3).unwrap();
        assert_eq!(loaded, coeffs);
    }

    #[test]
    fn sampling_is_seeded() {
        assert_eq!(sample_coefficients(4, 2, 7), sample_coefficients(4, 2, 7));
        assert_ne!(sample_coefficients(4, 2, 7), sample_coefficients(4, 2, 8));
    }

    #[test]
    fn wrong_column_count_is_a_shape_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coeffs.npy");
        write_coefficients(&path, &sample_coefficients(4, 2, 0)).unwrap();
        assert!(matches!(load_coefficients(&path, 6), Err(Error::Shape(_))));
    }

    #[test]
    fn single_precision_files_are_widened() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sobol_2d.npy");
        let coeffs = Array2::from_shape_vec((3, 2), vec![0.0f32, 0.25, 0.5, 0.75, 1.0, 0.125]).unwrap();
        coeffs.write_npy(File::create(&path).unwrap()).unwrap();

        let loaded = load_coefficients(&path, 2).unwrap();
        assert_eq!(loaded.dim(), (3, 2));
        assert_eq!(loaded, coeffs.mapv(f64::from));
    }

    #[test]
    fn empty_file_is_a_shape_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sobol_2d.npy");
        write_coefficients(&path, &Array2::zeros((0, 2))).unwrap();
        assert!(matches!(load_coefficients(&path, 2), Err(Error::Shape(_))));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let path = Path::new("does/not/exist/sobol_6d.npy");
        assert!(matches!(load_coefficients(path, 6), Err(Error::Io { .. })));
    }

    #[test]
    fn midpoint_coefficients_give_unit_diffusivity() {
        let coeffs = Array2::from_elem((1, 3), 0.5);
        let dataset = KlSumDataset::new(&small_config(), coeffs).unwrap();
        let nu = dataset.diffusivity(&[0.5, 0.5, 0.5]);
        assert!(nu.iter().all(|v| (v - 1.0).abs() < 1e-12));
    }

    #[test]
    fn items_carry_boundary_masks_and_placeholder() {
        let config = small_config().with_forcing(2.0);
        let dataset = KlSumDataset::new(&config, sample_coefficients(3, 3, 1)).unwrap();
        assert_eq!(dataset.len(), 3);
        let item = dataset.get(2).unwrap();
        let n = 5;
        let n2 = n * n;
        assert_eq!(item.inputs.len(), INPUT_CHANNELS * n2);
        assert!(item.inputs[..n2].iter().all(|&v| v > 0.0));
        for row in 0..n {
            for col in 0..n {
                let bc1 = item.inputs[n2 + row * n + col];
                let bc2 = item.inputs[2 * n2 + row * n + col];
                assert_eq!(bc1, if col == 0 { 1.0 } else { 0.0 });
                assert_eq!(bc2, if col == n - 1 { 1.0 } else { 0.0 });
            }
        }
        assert!(item.inputs[3 * n2..].iter().all(|&v| v == 0.0));
        assert!(item.forcing.iter().all(|&v| v == 2.0));
        assert!(dataset.get(3).is_none());
    }

    #[test]
    fn batcher_stacks_items() {
        let dataset = KlSumDataset::new(&small_config(), sample_coefficients(3, 3, 1)).unwrap();
        let items: Vec<_> = (0..3).filter_map(|i| dataset.get(i)).collect();
        let batcher = PoissonBatcher::<NdArray<f32>>::new(Default::default());
        let batch = batcher.batch(&items, dataset.domain_size());
        assert_eq!(batch.inputs.dims(), [3, 4, 5, 5]);
        assert_eq!(batch.forcing.dims(), [3, 1, 5, 5]);
    }
}
