//! Neural network components

pub mod embeddings;
pub mod layers;
pub mod models;
pub mod losses;
pub mod optimizers;

pub use embeddings::EmbeddingsGuard;
pub use layers::*;
pub use models::*;
pub use losses::*;
pub use optimizers::*;
