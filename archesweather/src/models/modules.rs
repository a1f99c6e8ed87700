mod attention;
mod axial;
mod block;
mod embedding;
mod layer;
mod mask;
mod mlp;
mod modulation;
mod recovery;
mod sampling;
mod window;

pub use attention::*;
pub use axial::*;
pub use block::*;
pub use embedding::*;
pub use layer::*;
pub use mask::*;
pub use mlp::*;
pub use modulation::*;
pub use recovery::*;
pub use sampling::*;
pub use window::*;
