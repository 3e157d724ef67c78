use crate::data::KlSumConfig;
use crate::error::{self, Error};
use crate::model::AeConfig;
use burn::prelude::*;
use std::path::{Path, PathBuf};

/// 実行ディレクトリに保存する設定ファイル名
pub const CONFIG_FILENAME: &str = "config.json";

/// 監視する損失の改善方向。
#[derive(Config, Debug, PartialEq, Eq)]
pub enum MonitorMode {
    Min,
    Max,
}

/// 学習実験全体のハイパーパラメータ。
#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub model: AeConfig,
    pub dataset: KlSumConfig,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    #[config(default = 16)]
    pub batch_size: usize,
    /// 学習全体で目安とする最適化ステップ数。エポック数はここから導出します。
    #[config(default = 200000)]
    pub total_steps: usize,
    /// 導出したエポック数を上書きする場合に指定します。
    pub max_epochs: Option<usize>,
    #[config(default = "vec![10, 15, 30]")]
    pub lr_milestones: Vec<usize>,
    #[config(default = 0.1)]
    pub lr_gamma: f64,
    #[config(default = 10)]
    pub patience: usize,
    #[config(default = 1e-8)]
    pub min_delta: f64,
    /// 早期終了が監視する改善方向
    #[config(default = "MonitorMode::Min")]
    pub monitor_mode: MonitorMode,
    /// 最良チェックポイントを選ぶ改善方向。早期終了とは独立です。
    #[config(default = "MonitorMode::Min")]
    pub checkpoint_mode: MonitorMode,
    /// エポック終了時に等高線図を描くサンプル数
    #[config(default = 6)]
    pub num_query: usize,
    #[config(default = 42)]
    pub seed: u64,
    /// 係数ファイル。省略時は `sobol_<kl_terms>d.npy`。
    pub sobol_file: Option<String>,
}

impl TrainingConfig {
    /// 既定値の設定を作成します。
    pub fn default_experiment() -> Self {
        Self::new(AeConfig::new(), KlSumConfig::new())
    }

    pub fn sobol_path(&self) -> PathBuf {
        match &self.sobol_file {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(format!("sobol_{}d.npy", self.dataset.kl_terms)),
        }
    }

    /// 1エポックあたりのステップ数から最大エポック数を求めます。
    pub fn epochs_for(&self, samples: usize) -> usize {
        if let Some(epochs) = self.max_epochs {
            return epochs;
        }
        let steps_per_epoch = samples as f64 / self.batch_size as f64;
        if steps_per_epoch <= 0.0 {
            return 0;
        }
        (self.total_steps as f64 / steps_per_epoch).ceil() as usize
    }

    /// 係数ファイルのパスを絶対パスに解決した設定を返します。
    ///
    /// `config.json` に保存したパスは別の作業ディレクトリからの推論でも参照されます。
    pub fn with_resolved_sobol_file(mut self) -> error::Result<Self> {
        let path = self.sobol_path();
        let resolved = std::fs::canonicalize(&path).map_err(|e| Error::io(&path, e))?;
        self.sobol_file = Some(resolved.to_string_lossy().into_owned());
        Ok(self)
    }

    pub fn validate(&self) -> error::Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size は 1 以上である必要があります".into()));
        }
        if self.num_query == 0 {
            return Err(Error::Config("num_query は 1 以上である必要があります".into()));
        }
        if self.dataset.kl_terms == 0 {
            return Err(Error::Config("kl_terms は 1 以上である必要があります".into()));
        }
        let n = self.dataset.domain_size;
        let factor = 1usize << self.model.n_downsample;
        if n < 2 || n % factor != 0 {
            return Err(Error::Config(format!(
                "domain_size ({n}) は 2 以上かつ 2^n_downsample ({factor}) の倍数である必要があります"
            )));
        }
        if !(self.learning_rate > 0.0) {
            return Err(Error::Config(format!(
                "learning_rate は正の値である必要があります ({})",
                self.learning_rate
            )));
        }
        Ok(())
    }

    pub fn save_to(&self, dir: &Path) -> error::Result<()> {
        let path = dir.join(CONFIG_FILENAME);
        self.save(&path).map_err(|e| Error::io(path, e))
    }

    pub fn load_from(dir: &Path) -> error::Result<Self> {
        Self::load_file(&dir.join(CONFIG_FILENAME))
    }

    pub fn load_file(path: &Path) -> error::Result<Self> {
        Self::load(path).map_err(|e| Error::Config(format!("'{}': {e:?}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_klsum_experiment() {
        let config = TrainingConfig::default_experiment();
        assert_eq!(config.dataset.kl_terms, 6);
        assert_eq!(config.dataset.domain_size, 32);
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.lr_milestones, vec![10, 15, 30]);
        assert_eq!(config.monitor_mode, MonitorMode::Min);
        assert_eq!(config.checkpoint_mode, MonitorMode::Min);
        assert_eq!(config.sobol_path(), PathBuf::from("sobol_6d.npy"));
        config.validate().unwrap();
    }

    #[test]
    fn epochs_follow_the_step_budget() {
        let config = TrainingConfig::default_experiment();
        // 65536 / 16 = 4096 ステップ/エポック → ceil(200000 / 4096) = 49
        assert_eq!(config.epochs_for(65536), 49);
        assert_eq!(config.clone().with_max_epochs(Some(3)).epochs_for(65536), 3);
    }

    #[test]
    fn rejects_domain_not_divisible_by_downsampling() {
        let mut config = TrainingConfig::default_experiment();
        config.dataset.domain_size = 30;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn round_trips_through_the_run_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrainingConfig::default_experiment()
            .with_batch_size(4)
            .with_sobol_file(Some("coeffs.npy".into()));
        config.save_to(dir.path()).unwrap();
        let loaded = TrainingConfig::load_from(dir.path()).unwrap();
        assert_eq!(loaded.batch_size, 4);
        assert_eq!(loaded.sobol_path(), PathBuf::from("coeffs.npy"));
        assert_eq!(loaded.model.dims, config.model.dims);
    }

    #[test]
    fn sobol_file_resolves_to_an_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sobol_6d.npy"), b"").unwrap();
        let indirect = dir.path().join("sub").join("..").join("sobol_6d.npy");
        let config = TrainingConfig::default_experiment()
            .with_sobol_file(Some(indirect.to_string_lossy().into_owned()))
            .with_resolved_sobol_file()
            .unwrap();
        let resolved = config.sobol_path();
        assert!(resolved.is_absolute());
        assert!(!resolved.components().any(|c| c == std::path::Component::ParentDir));
        assert_eq!(
            resolved,
            std::fs::canonicalize(dir.path().join("sobol_6d.npy")).unwrap()
        );
    }

    #[test]
    fn unresolvable_sobol_file_is_an_io_error() {
        let config = TrainingConfig::default_experiment()
            .with_sobol_file(Some("does/not/exist/sobol_6d.npy".into()));
        assert!(matches!(
            config.with_resolved_sobol_file(),
            Err(Error::Io { .. })
        ));
    }
}
