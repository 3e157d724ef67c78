use std::path::PathBuf;
use thiserror::Error;

/// クレート全体で使用するエラー型。
#[derive(Debug, Error)]
pub enum Error {
    #[error("ファイル '{path}' の入出力に失敗しました: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{path}' の .npy 読み込みに失敗しました: {message}")]
    Npy { path: PathBuf, message: String },

    #[error("形状が一致しません: {0}")]
    Shape(String),

    #[error("設定が不正です: {0}")]
    Config(String),

    #[error("モデルの保存/読み込みに失敗しました: {0}")]
    Record(#[from] burn::record::RecorderError),

    #[error("メトリクスの書き込みに失敗しました: {0}")]
    Csv(#[from] csv::Error),

    #[error("テンソルデータの変換に失敗しました: {0}")]
    TensorData(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
