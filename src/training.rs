use crate::checkpoint::{CheckpointManager, MetricsLogger, RunDirectory, recorder};
use crate::config::{MonitorMode, TrainingConfig};
use crate::data::{KlSumDataset, PoissonBatcher};
use crate::error::{Error, Result};
use crate::inference::evaluate_queries;
use crate::model::Ae;
use crate::pinn::{PhysicsLoss, Poisson};
use crate::plot::{plot_contours, plot_loss_history};
use burn::backend::{Autodiff, NdArray};
use burn::data::dataset::Dataset;
use burn::module::{AutodiffModule, Module};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use std::time::Instant;

type MyBackend = Autodiff<NdArray<f32>>;

/// エポック単位で段階的に学習率を減衰させるスケジューラ。
#[derive(Debug, Clone)]
pub struct MultiStepLr {
    base: f64,
    milestones: Vec<usize>,
    gamma: f64,
}

impl MultiStepLr {
    pub fn new(base: f64, milestones: Vec<usize>, gamma: f64) -> Self {
        Self {
            base,
            milestones,
            gamma,
        }
    }

    /// 0 始まりのエポック `epoch` で使う学習率。
    pub fn lr(&self, epoch: usize) -> f64 {
        let passed = self.milestones.iter().filter(|&&m| m <= epoch).count();
        self.base * self.gamma.powi(passed as i32)
    }
}

/// 監視値が `patience` エポック改善しなければ停止を指示します。
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    mode: MonitorMode,
    min_delta: f64,
    patience: usize,
    best: Option<f64>,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(mode: MonitorMode, min_delta: f64, patience: usize) -> Self {
        Self {
            mode,
            min_delta,
            patience,
            best: None,
            wait: 0,
        }
    }

    /// 監視値を更新し、学習を停止すべきなら `true` を返します。
    pub fn update(&mut self, value: f32) -> bool {
        let value = value as f64;
        if !value.is_finite() {
            return true;
        }
        let improved = match (self.best, &self.mode) {
            (None, _) => true,
            (Some(best), MonitorMode::Min) => value < best - self.min_delta,
            (Some(best), MonitorMode::Max) => value > best + self.min_delta,
        };
        if improved {
            self.best = Some(value);
            self.wait = 0;
            false
        } else {
            self.wait += 1;
            self.wait >= self.patience
        }
    }
}

/// 学習結果の要約。
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub run_dir: PathBuf,
    pub epochs: usize,
    pub steps: usize,
    pub final_loss: f32,
    /// エポックごとの平均損失
    pub loss_history: Vec<f32>,
    pub best_checkpoint: Option<PathBuf>,
    pub stopped_early: bool,
}

/// `train`サブコマンドを実行します。
pub fn run(config: TrainingConfig, log_root: &Path) -> Result<TrainingSummary> {
    let device = Default::default();
    config.validate()?;
    let config = config.with_resolved_sobol_file()?;
    let dataset = KlSumDataset::from_file(&config.dataset, &config.sobol_path())?;
    let run = RunDirectory::create(log_root, &format!("klsum_{}", config.dataset.domain_size))?;
    tracing::info!("学習を開始します (KL展開ポアソン方程式) - バックエンド: NdArray (CPU)");
    fit::<MyBackend>(&config, &dataset, &run, &device)
}

/// データセット全体でネットワークを学習し、結果を実行ディレクトリに保存します。
pub fn fit<B: AutodiffBackend>(
    config: &TrainingConfig,
    dataset: &KlSumDataset,
    run: &RunDirectory,
    device: &B::Device,
) -> Result<TrainingSummary> {
    config.validate()?;
    if dataset.domain_size() != config.dataset.domain_size {
        return Err(Error::Shape(format!(
            "データセットの格子 {} と設定 {} が一致しません",
            dataset.domain_size(),
            config.dataset.domain_size
        )));
    }
    B::seed(config.seed);
    config.save_to(run.path())?;

    let n = config.dataset.domain_size;
    let max_epochs = config.epochs_for(dataset.len());
    tracing::info!(max_epochs, samples = dataset.len(), "Max_epochs = {max_epochs}");

    // --- モデルとオプティマイザの初期化 ---
    let mut model = config.model.init::<B>(device);
    let mut optim = AdamConfig::new().init();
    let scheduler = MultiStepLr::new(
        config.learning_rate,
        config.lr_milestones.clone(),
        config.lr_gamma,
    );
    let poisson = Poisson::<B>::new(n, device);
    let valid_poisson = Poisson::<B::InnerBackend>::new(n, device);
    let batcher = PoissonBatcher::<B>::new(device.clone());

    let mut metrics = MetricsLogger::create(run.path())?;
    let mut checkpoints =
        CheckpointManager::new(run.checkpoint_dir(), config.checkpoint_mode.clone());
    let mut early_stopping =
        EarlyStopping::new(config.monitor_mode.clone(), config.min_delta, config.patience);

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut indices: Vec<usize> = (0..dataset.len()).collect();
    let mut loss_history = Vec::with_capacity(max_epochs);
    let mut step = 0usize;
    let mut epochs = 0usize;
    let mut stopped_early = false;
    let training_start = Instant::now();

    // --- 学習ループ ---
    for epoch in 0..max_epochs {
        let lr = scheduler.lr(epoch);
        indices.shuffle(&mut rng);

        let mut loss_sum = 0.0f64;
        let mut batches = 0usize;
        for chunk in indices.chunks(config.batch_size) {
            let items: Vec<_> = chunk.iter().filter_map(|&i| dataset.get(i)).collect();
            let batch = batcher.batch(&items, n);
            let u = poisson.forward(&model, &batch);
            let loss = poisson.loss(u, batch.inputs, batch.forcing);

            let loss_val = loss.clone().into_scalar().elem::<f32>();
            loss_sum += loss_val as f64;
            batches += 1;
            step += 1;
            metrics.log_step(epoch, step, loss_val, lr)?;
            tracing::trace!(epoch, step, loss = loss_val, "PDE_loss");

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(lr, model, grads);
        }
        epochs += 1;

        let epoch_loss = if batches > 0 {
            (loss_sum / batches as f64) as f32
        } else {
            f32::NAN
        };
        loss_history.push(epoch_loss);
        metrics.log_epoch(epoch, step, epoch_loss, lr)?;
        tracing::info!("[Epoch {}] Loss: {:.6}, lr: {:e}", epoch, epoch_loss, lr);

        checkpoints.on_epoch_end(&model, epoch, step, epoch_loss)?;
        report_epoch(
            &model.valid(),
            &valid_poisson,
            dataset,
            config.num_query,
            &run.contour_path(epoch),
            device,
        );

        if early_stopping.update(epoch_loss) {
            tracing::info!(epoch, "監視値が改善しないため学習を早期終了します");
            stopped_early = true;
            break;
        }
    }
    let training_duration = training_start.elapsed();
    tracing::info!("学習が完了しました。");
    tracing::info!("=> 学習時間: {:.2?}", training_duration);

    // --- 結果の保存と描画 ---
    let loss_graph = run.path().join("loss_graph.png");
    match plot_loss_history(&loss_graph, &loss_history) {
        Ok(()) => tracing::info!("=> 損失グラフを '{}' に保存しました。", loss_graph.display()),
        Err(e) => tracing::warn!("グラフの描画に失敗しました: {}", e),
    }

    let network_path = run.network_path();
    model.save_file(network_path.clone(), &recorder())?;
    tracing::info!("=> モデルを '{}.mpk' に保存しました。", network_path.display());

    Ok(TrainingSummary {
        run_dir: run.path().to_path_buf(),
        epochs,
        steps: step,
        final_loss: loss_history.last().copied().unwrap_or(f32::NAN),
        loss_history,
        best_checkpoint: checkpoints
            .best_path()
            .map(|p| p.with_extension("mpk")),
        stopped_early,
    })
}

/// エポック終了時にクエリサンプルの損失を記録し、等高線図を保存します。
fn report_epoch<B: Backend>(
    model: &Ae<B>,
    poisson: &Poisson<B>,
    dataset: &KlSumDataset,
    num_query: usize,
    path: &Path,
    device: &B::Device,
) {
    let report = match evaluate_queries(model, poisson, dataset, num_query, device) {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!("クエリサンプルの評価に失敗しました: {}", e);
            return;
        }
    };
    tracing::info!("inference for: {:?}", report.coeffs);
    tracing::info!("loss incurred for this coeff: {:.6}", report.loss);
    if let Err(e) = plot_contours(path, &report.rows, dataset.domain_size()) {
        tracing::warn!("等高線図の描画に失敗しました: {}", e);
    }
}
