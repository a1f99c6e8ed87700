use burn::{
    nn::{Dropout, DropoutConfig, Gelu, Linear, LinearConfig},
    prelude::*,
};

/// Configuration for the feed-forward stage of an Earth-specific block.
#[derive(Config, Debug)]
pub struct MlpConfig {
    pub dim: usize,
    /// Hidden width as a multiple of `dim`.
    #[config(default = "4")]
    pub expansion: usize,
    #[config(default = "0.0")]
    pub dropout: f64,
}

impl MlpConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Mlp<B> {
        let hidden = self.dim * self.expansion;

        Mlp {
            fc1: LinearConfig::new(self.dim, hidden).init(device),
            act: Gelu::new(),
            fc2: LinearConfig::new(hidden, self.dim).init(device),
            drop: DropoutConfig::new(self.dropout).init(),
        }
    }
}

/// `Linear → GELU → Dropout → Linear → Dropout`.
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    fc1: Linear<B>,
    act: Gelu,
    fc2: Linear<B>,
    drop: Dropout,
}

impl<B: Backend> Mlp<B> {
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let x = self.fc1.forward(x);
        let x = self.act.forward(x);
        let x = self.drop.forward(x);
        let x = self.fc2.forward(x);

        self.drop.forward(x)
    }
}
