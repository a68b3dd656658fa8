//! Scoped control of a discriminator's embedding output

use std::ops::{Deref, DerefMut};

use super::models::Discriminator;

/// Exclusive borrow of a discriminator with its embeddings flag forced to a
/// value for the lifetime of the guard.
///
/// The previous flag is written back when the guard drops, which also covers
/// early returns through `?` and panics unwinding through the caller. For a
/// discriminator without the autoencoding capability the guard is a plain
/// pass-through.
pub struct EmbeddingsGuard<'a> {
    discriminator: &'a mut dyn Discriminator,
    previous: Option<bool>,
}

impl<'a> EmbeddingsGuard<'a> {
    pub fn new(discriminator: &'a mut dyn Discriminator, enabled: bool) -> Self {
        let previous = discriminator.as_autoencoding_mut().map(|d| {
            let previous = d.embeddings();
            d.set_embeddings(enabled);
            previous
        });
        if let Some(previous) = previous {
            tracing::trace!(previous, enabled, "discriminator embeddings toggled");
        }
        Self {
            discriminator,
            previous,
        }
    }

    /// Flag value that will be restored, `None` for score-only discriminators
    pub fn previous(&self) -> Option<bool> {
        self.previous
    }
}

impl<'a> Deref for EmbeddingsGuard<'a> {
    type Target = dyn Discriminator + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.discriminator
    }
}

impl<'a> DerefMut for EmbeddingsGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.discriminator
    }
}

impl Drop for EmbeddingsGuard<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous {
            if let Some(d) = self.discriminator.as_autoencoding_mut() {
                d.set_embeddings(previous);
            }
        }
    }
}
