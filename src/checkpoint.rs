//! 実行ディレクトリ、チェックポイント、メトリクス CSV の管理。
//!
//! ```text
//! <log_root>/klsum_<domain_size>/version_<k>/
//!     config.json
//!     metrics.csv
//!     contour_<epoch>.png
//!     loss_graph.png
//!     network.mpk
//!     checkpoints/
//!         epoch=<e>-step=<s>.mpk   (最良のみ)
//!         last.mpk
//! ```

use crate::config::MonitorMode;
use crate::error::{Error, Result};
use crate::model::Ae;
use burn::module::Module;
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use serde::Serialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// 学習済みネットワークのファイル名 (拡張子はレコーダーが付与します)
pub const NETWORK_FILENAME: &str = "network";
pub const METRICS_FILENAME: &str = "metrics.csv";
const CHECKPOINT_DIR: &str = "checkpoints";
const VERSION_PREFIX: &str = "version_";

pub fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

/// 1回の学習実行に対応するディレクトリ。
#[derive(Debug, Clone)]
pub struct RunDirectory {
    path: PathBuf,
}

impl RunDirectory {
    /// `<log_root>/<name>/version_<k>` を未使用の最小の k で作成します。
    pub fn create(log_root: &Path, name: &str) -> Result<Self> {
        let base = log_root.join(name);
        fs::create_dir_all(&base).map_err(|e| Error::io(&base, e))?;
        let version = next_version(&base)?;
        let path = base.join(format!("{VERSION_PREFIX}{version}"));
        fs::create_dir_all(path.join(CHECKPOINT_DIR)).map_err(|e| Error::io(&path, e))?;
        tracing::info!(path = %path.display(), "実行ディレクトリを作成しました");
        Ok(Self { path })
    }

    /// 既存の実行ディレクトリを開きます。
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_dir() {
            return Err(Error::io(
                &path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "実行ディレクトリが存在しません"),
            ));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.path.join(CHECKPOINT_DIR)
    }

    pub fn network_path(&self) -> PathBuf {
        self.path.join(NETWORK_FILENAME)
    }

    pub fn contour_path(&self, epoch: usize) -> PathBuf {
        self.path.join(format!("contour_{epoch}.png"))
    }
}

fn next_version(base: &Path) -> Result<usize> {
    let entries = fs::read_dir(base).map_err(|e| Error::io(base, e))?;
    let next = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_prefix(VERSION_PREFIX))
                .and_then(|v| v.parse::<usize>().ok())
        })
        .max()
        .map_or(0, |v| v + 1);
    Ok(next)
}

/// 監視値が改善したときに最良モデルを、毎エポック `last` を保存します。
pub struct CheckpointManager {
    dir: PathBuf,
    mode: MonitorMode,
    best: Option<(f32, PathBuf)>,
}

impl CheckpointManager {
    pub fn new(dir: PathBuf, mode: MonitorMode) -> Self {
        Self {
            dir,
            mode,
            best: None,
        }
    }

    pub fn best_path(&self) -> Option<&Path> {
        self.best.as_ref().map(|(_, path)| path.as_path())
    }

    pub fn best_value(&self) -> Option<f32> {
        self.best.as_ref().map(|(value, _)| *value)
    }

    /// エポック終了時に呼び出します。最良チェックポイントを更新した場合は `true`。
    pub fn on_epoch_end<B: Backend>(
        &mut self,
        model: &Ae<B>,
        epoch: usize,
        step: usize,
        value: f32,
    ) -> Result<bool> {
        model
            .clone()
            .save_file(self.dir.join("last"), &recorder())?;

        let improved = match self.best_value() {
            None => !value.is_nan(),
            Some(best) => match self.mode {
                MonitorMode::Min => value < best,
                MonitorMode::Max => value > best,
            },
        };
        if !improved {
            return Ok(false);
        }

        let path = self.dir.join(format!("epoch={epoch}-step={step}"));
        model.clone().save_file(path.clone(), &recorder())?;
        if let Some((_, previous)) = self.best.replace((value, path)) {
            let file = previous.with_extension("mpk");
            if let Err(e) = fs::remove_file(&file) {
                tracing::warn!(path = %file.display(), error = %e, "古いチェックポイントを削除できませんでした");
            }
        }
        tracing::debug!(epoch, step, value, "最良チェックポイントを更新しました");
        Ok(true)
    }
}

#[derive(Debug, Serialize)]
struct MetricsRow {
    epoch: usize,
    step: usize,
    loss: Option<f32>,
    #[serde(rename = "PDE_loss")]
    pde_loss: Option<f32>,
    epoch_loss: Option<f32>,
    lr: f64,
}

/// ステップ/エポック単位の損失を CSV に記録します。
pub struct MetricsLogger {
    writer: csv::Writer<File>,
    path: PathBuf,
}

impl MetricsLogger {
    pub fn create(dir: &Path) -> Result<Self> {
        let path = dir.join(METRICS_FILENAME);
        Ok(Self {
            writer: csv::Writer::from_path(&path)?,
            path,
        })
    }

    pub fn log_step(&mut self, epoch: usize, step: usize, loss: f32, lr: f64) -> Result<()> {
        self.writer.serialize(MetricsRow {
            epoch,
            step,
            loss: Some(loss),
            pde_loss: Some(loss),
            epoch_loss: None,
            lr,
        })?;
        Ok(())
    }

    pub fn log_epoch(&mut self, epoch: usize, step: usize, epoch_loss: f32, lr: f64) -> Result<()> {
        self.writer.serialize(MetricsRow {
            epoch,
            step,
            loss: None,
            pde_loss: None,
            epoch_loss: Some(epoch_loss),
            lr,
        })?;
        self.writer.flush().map_err(|e| Error::io(&self.path, e))
    }
}
