//! # Compressor Registry
//!
//! Tabella statica categoria → cascade, costruita una volta all'avvio e poi
//! solo letta: i worker la condividono tramite `Arc` senza lock.

use crate::cascade::{archive, document, image, media, pdf, StrategyCascade};
use crate::detect::Category;
use crate::error::CompressError;
use crate::probe::BackendProbe;
use std::collections::HashMap;
use std::sync::Arc;

pub struct CompressorRegistry {
    cascades: HashMap<Category, Arc<StrategyCascade>>,
    probe: Arc<BackendProbe>,
}

impl CompressorRegistry {
    pub fn new(probe: Arc<BackendProbe>) -> Self {
        let image = Arc::new(image::cascade(probe.clone()));
        let cascades = [
            (Category::Image, image.clone()),
            (Category::Pdf, Arc::new(pdf::cascade(probe.clone()))),
            (Category::Document, Arc::new(document::cascade(image))),
            (Category::Audio, Arc::new(media::audio_cascade(probe.clone()))),
            (Category::Video, Arc::new(media::video_cascade(probe.clone()))),
            (Category::Archive, Arc::new(archive::cascade(probe.clone()))),
        ]
        .into_iter()
        .collect();
        Self { cascades, probe }
    }

    pub fn probe(&self) -> &Arc<BackendProbe> {
        &self.probe
    }

    /// Cascade responsible for the category and extension
    pub fn resolve(&self, category: Category, extension: &str) -> Result<Arc<StrategyCascade>, CompressError> {
        let unsupported = || {
            CompressError::UnsupportedFormat(if extension.is_empty() {
                category.to_string()
            } else {
                format!("{} ({})", category, extension)
            })
        };
        let cascade = self.cascades.get(&category).ok_or_else(unsupported)?;
        if extension.is_empty() || cascade.supports(extension) {
            Ok(cascade.clone())
        } else {
            Err(unsupported())
        }
    }

    /// Categories with a registered cascade
    pub fn categories(&self) -> Vec<Category> {
        let mut categories: Vec<_> = self.cascades.keys().copied().collect();
        categories.sort_by_key(|c| c.name());
        categories
    }
}
