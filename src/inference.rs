use crate::checkpoint::{RunDirectory, recorder};
use crate::config::TrainingConfig;
use crate::data::{KlSumDataset, PoissonBatcher};
use crate::error::{Error, Result};
use crate::model::Ae;
use crate::pinn::{PhysicsLoss, Poisson};
use crate::plot::{ContourRow, plot_contours};
use burn::backend::NdArray;
use burn::data::dataset::Dataset;
use burn::module::Module;
use burn::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

type MyBackend = NdArray<f32>;

/// クエリサンプルに対する評価結果。
#[derive(Debug, Clone)]
pub struct QueryReport {
    pub coeffs: Vec<Vec<f64>>,
    pub loss: f32,
    pub rows: Vec<ContourRow>,
}

fn to_f32_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| Error::TensorData(format!("{e:?}")))
}

/// 先頭 `num_query` 個のサンプルで損失を計算し、境界条件を課した解を返します。
pub fn evaluate_queries<B: Backend>(
    model: &Ae<B>,
    poisson: &Poisson<B>,
    dataset: &KlSumDataset,
    num_query: usize,
    device: &B::Device,
) -> Result<QueryReport> {
    let items: Vec<_> = (0..num_query.min(dataset.len()))
        .filter_map(|i| dataset.get(i))
        .collect();
    if items.is_empty() {
        return Err(Error::Shape("評価するサンプルがありません".into()));
    }
    let n = dataset.domain_size();
    let batch = PoissonBatcher::<B>::new(device.clone()).batch(&items, n);

    let u = poisson.forward(model, &batch);
    let loss = poisson.loss(u.clone(), batch.inputs.clone(), batch.forcing);
    let solution = poisson.apply_boundary(u, batch.inputs.clone());

    let nu = to_f32_vec(batch.inputs.narrow(1, 0, 1))?;
    let solution = to_f32_vec(solution)?;
    let n2 = n * n;
    let rows = nu
        .chunks(n2)
        .zip(solution.chunks(n2))
        .map(|(k, u)| ContourRow {
            diffusivity: k.to_vec(),
            solution: u.to_vec(),
        })
        .collect();

    Ok(QueryReport {
        coeffs: items.into_iter().map(|item| item.coeffs).collect(),
        loss: loss.into_scalar().elem::<f32>(),
        rows,
    })
}

/// `infer`サブコマンドを実行します。
///
/// 実行ディレクトリから設定と学習済みネットワークを読み込み、クエリサンプルを評価します。
pub fn run(
    run_dir: &Path,
    checkpoint: Option<&Path>,
    num_query: Option<usize>,
) -> Result<QueryReport> {
    let device = Default::default();
    let run = RunDirectory::open(run_dir)?;
    let config = TrainingConfig::load_from(run.path())?;

    let model_path = checkpoint
        .map(Path::to_path_buf)
        .unwrap_or_else(|| run.network_path());
    let model_file = model_path.with_extension("mpk");
    if !model_file.exists() {
        return Err(Error::io(
            &model_file,
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "モデルファイルが見つかりません。最初に 'train' コマンドでモデルを学習・保存してください。",
            ),
        ));
    }

    tracing::info!("推論を実行します - バックエンド: NdArray (CPU)");
    let inference_start = Instant::now();

    tracing::info!("保存済みモデルを '{}' からロード中...", model_file.display());
    let model = config
        .model
        .init::<MyBackend>(&device)
        .load_file(model_path, &recorder(), &device)?;

    let dataset = KlSumDataset::from_file(&config.dataset, &config.sobol_path())?;
    let poisson = Poisson::<MyBackend>::new(config.dataset.domain_size, &device);
    let report = evaluate_queries(
        &model,
        &poisson,
        &dataset,
        num_query.unwrap_or(config.num_query),
        &device,
    )?;
    let inference_duration = inference_start.elapsed();

    tracing::info!("inference for: {:?}", report.coeffs);
    tracing::info!("loss incurred for this coeff: {:.6}", report.loss);
    tracing::info!("=> 推論時間: {:.2?}", inference_duration);

    let contour: PathBuf = run.path().join("inference_contour.png");
    match plot_contours(&contour, &report.rows, config.dataset.domain_size) {
        Ok(()) => tracing::info!("=> 等高線図を '{}' に保存しました。", contour.display()),
        Err(e) => tracing::warn!("等高線図の描画に失敗しました: {}", e),
    }
    Ok(report)
}
