use crate::config::{MonitorMode, TrainingConfig};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// clapでコマンドラインの構造を定義します。
#[derive(Parser, Debug)]
#[command(author, version, about = "Stochastic Poisson solver trained with a finite-element residual loss (Burn)", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// 実行するサブコマンドを定義します（train, infer, sample）。
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// オートエンコーダを学習し、結果を実行ディレクトリに保存します
    Train(TrainArgs),
    /// 学習済みネットワークでクエリサンプルを評価します
    Infer(InferArgs),
    /// KL係数のサンプルファイル (.npy) を生成します
    Sample(SampleArgs),
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// JSON 設定ファイル。省略時は既定値を使います
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// 係数ファイル (既定: sobol_<kl_terms>d.npy)
    #[arg(long)]
    pub sobol_file: Option<PathBuf>,
    /// ログとチェックポイントのルートディレクトリ
    #[arg(long, default_value = ".")]
    pub log_root: PathBuf,
    #[arg(long)]
    pub kl_terms: Option<usize>,
    #[arg(long)]
    pub domain_size: Option<usize>,
    #[arg(long)]
    pub learning_rate: Option<f64>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    #[arg(long)]
    pub max_epochs: Option<usize>,
    /// 早期終了の改善方向 (min / max)
    #[arg(long, value_parser = parse_monitor_mode)]
    pub monitor_mode: Option<MonitorMode>,
    #[arg(long)]
    pub seed: Option<u64>,
}

fn parse_monitor_mode(value: &str) -> Result<MonitorMode, String> {
    match value.to_ascii_lowercase().as_str() {
        "min" => Ok(MonitorMode::Min),
        "max" => Ok(MonitorMode::Max),
        other => Err(format!("'{other}' は min か max を指定してください")),
    }
}

impl TrainArgs {
    /// コマンドライン引数で設定を上書きします。
    pub fn apply(&self, mut config: TrainingConfig) -> TrainingConfig {
        if let Some(path) = &self.sobol_file {
            config.sobol_file = Some(path.to_string_lossy().into_owned());
        }
        if let Some(kl_terms) = self.kl_terms {
            config.dataset.kl_terms = kl_terms;
        }
        if let Some(domain_size) = self.domain_size {
            config.dataset.domain_size = domain_size;
        }
        if let Some(lr) = self.learning_rate {
            config.learning_rate = lr;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if self.max_epochs.is_some() {
            config.max_epochs = self.max_epochs;
        }
        if let Some(mode) = &self.monitor_mode {
            config.monitor_mode = mode.clone();
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        config
    }
}

#[derive(Args, Debug)]
pub struct InferArgs {
    /// 学習時に作成された実行ディレクトリ (例: klsum_32/version_0)
    pub run_dir: PathBuf,
    /// network.mpk の代わりに読み込むチェックポイント
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,
    #[arg(long)]
    pub num_query: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SampleArgs {
    #[arg(long, default_value_t = 6)]
    pub kl_terms: usize,
    #[arg(long, default_value_t = 65536)]
    pub samples: usize,
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
    /// 出力先 (既定: sobol_<kl_terms>d.npy)
    #[arg(long)]
    pub output: Option<PathBuf>,
}
