//! # KL展開ランダム係数ポアソン方程式の物理情報学習ライブラリ
//!
//! `burn` フレームワークを使用して、畳み込みオートエンコーダを有限要素法による
//! 残差損失で学習し、ランダムな拡散係数を持つ2次元ポアソン方程式を解くための
//! 主要なコンポーネントを提供します。教師データは使用しません。

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod fem;
pub mod inference;
pub mod kl;
pub mod model;
pub mod pinn;
pub mod plot;
pub mod training;

pub use error::{Error, Result};
