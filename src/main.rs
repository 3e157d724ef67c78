//! # KL展開ランダム係数ポアソン方程式の学習プログラム
//!
//! `clap` クレートを利用して、コマンドラインから`train`（学習）、`infer`（推論）、
//! `sample`（係数ファイル生成）の機能を個別に実行できます。
//!
//! ## 使い方
//!
//! ```bash
//! cargo run --release -- sample --kl-terms 6
//! cargo run --release -- train
//! cargo run --release -- infer klsum_32/version_0
//! ```

use anyhow::Context;
use clap::Parser;
use klsum_fem::cli::{Cli, Commands};
use klsum_fem::config::TrainingConfig;
use klsum_fem::{data, inference, training};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// プログラムのエントリーポイント。
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train(args) => {
            let config = match &args.config {
                Some(path) => TrainingConfig::load_file(path)
                    .with_context(|| format!("設定ファイル '{}' を読み込めません", path.display()))?,
                None => TrainingConfig::default_experiment(),
            };
            let config = args.apply(config);
            let summary = training::run(config, &args.log_root)?;
            tracing::info!(
                run_dir = %summary.run_dir.display(),
                epochs = summary.epochs,
                steps = summary.steps,
                final_loss = summary.final_loss,
                stopped_early = summary.stopped_early,
                "学習を終了しました"
            );
        }
        Commands::Infer(args) => {
            inference::run(&args.run_dir, args.checkpoint.as_deref(), args.num_query)?;
        }
        Commands::Sample(args) => {
            let output = args
                .output
                .unwrap_or_else(|| PathBuf::from(format!("sobol_{}d.npy", args.kl_terms)));
            let coeffs = data::sample_coefficients(args.samples, args.kl_terms, args.seed);
            data::write_coefficients(&output, &coeffs)?;
            tracing::info!("=> {} 件の係数を '{}' に保存しました。", args.samples, output.display());
        }
    }

    Ok(())
}
