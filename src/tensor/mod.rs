//! Dense CPU tensors
//!
//! Just enough tensor machinery for discriminator scores, hidden embeddings
//! and the small reference models: elementwise maps, reductions, 2-D matmul
//! and seeded random construction.

pub mod core;
pub mod devices;
pub mod ops;

pub use self::core::{Shape, Tensor};
pub use devices::Device;
pub use ops::{manual_seed, one_hot, randint, randn, uniform};
