use burn::nn::PaddingConfig2d;
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::Relu;
use burn::prelude::*;

/// オートエンコーダの構成。
#[derive(Config, Debug)]
pub struct AeConfig {
    #[config(default = 1)]
    pub in_channels: usize,
    #[config(default = 1)]
    pub out_channels: usize,
    /// 最初の畳み込み層のチャネル数。ダウンサンプルごとに2倍になります。
    #[config(default = 64)]
    pub dims: usize,
    #[config(default = 3)]
    pub n_downsample: usize,
}

impl AeConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Ae<B> {
        let same = || PaddingConfig2d::Explicit(1, 1);
        let input = Conv2dConfig::new([self.in_channels, self.dims], [3, 3])
            .with_padding(same())
            .init(device);

        let mut down = Vec::with_capacity(self.n_downsample);
        let mut channels = self.dims;
        for _ in 0..self.n_downsample {
            down.push(
                Conv2dConfig::new([channels, channels * 2], [4, 4])
                    .with_stride([2, 2])
                    .with_padding(same())
                    .init(device),
            );
            channels *= 2;
        }

        let mut up = Vec::with_capacity(self.n_downsample);
        for _ in 0..self.n_downsample {
            up.push(
                ConvTranspose2dConfig::new([channels, channels / 2], [4, 4])
                    .with_stride([2, 2])
                    .with_padding([1, 1])
                    .init(device),
            );
            channels /= 2;
        }

        let output = Conv2dConfig::new([self.dims, self.out_channels], [3, 3])
            .with_padding(same())
            .init(device);

        Ae {
            input,
            down,
            up,
            output,
            activation: Relu::new(),
        }
    }
}

/// 拡散係数場を解の場に写す畳み込みオートエンコーダ。
///
/// 入力 `[b, in_channels, n, n]` を stride 2 の畳み込みで `n / 2^k` まで縮小し、
/// 転置畳み込みで元の解像度 `[b, out_channels, n, n]` に戻します。
#[derive(Module, Debug)]
pub struct Ae<B: Backend> {
    input: Conv2d<B>,
    down: Vec<Conv2d<B>>,
    up: Vec<ConvTranspose2d<B>>,
    output: Conv2d<B>,
    activation: Relu,
}

impl<B: Backend> Ae<B> {
    /// モデルの順伝播を実行します。
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.activation.forward(self.input.forward(input));
        for conv in &self.down {
            x = self.activation.forward(conv.forward(x));
        }
        for deconv in &self.up {
            x = self.activation.forward(deconv.forward(x));
        }
        self.output.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn output_matches_input_resolution() {
        let device = Default::default();
        let model = AeConfig::new()
            .with_dims(4)
            .with_n_downsample(2)
            .init::<TestBackend>(&device);
        let input = Tensor::<TestBackend, 4>::ones([2, 1, 16, 16], &device);
        assert_eq!(model.forward(input).dims(), [2, 1, 16, 16]);
    }

    #[test]
    fn default_config_handles_the_32_grid() {
        let device = Default::default();
        let model = AeConfig::new().with_dims(2).init::<TestBackend>(&device);
        let input = Tensor::<TestBackend, 4>::zeros([1, 1, 32, 32], &device);
        assert_eq!(model.forward(input).dims(), [1, 1, 32, 32]);
    }
}
