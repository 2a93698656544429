//! Prediction artifacts and their in-process cache.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use super::classifier::{load_classifier, Classifier};
use super::preprocess::Preprocessor;
use super::PredictionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub preprocessor: PathBuf,
    pub model: PathBuf,
}

/// A loaded, mutually consistent preprocessor and classifier.
pub struct Artifacts {
    pub preprocessor: Preprocessor,
    pub classifier: Box<dyn Classifier>,
}

impl Artifacts {
    /// Load both artifacts. The preprocessor is read first, so a missing
    /// preprocessor is reported even when the model is also missing.
    pub fn load(paths: &ArtifactPaths) -> Result<Self, PredictionError> {
        let preprocessor = Preprocessor::load(&paths.preprocessor)?;
        let classifier = load_classifier(&paths.model)?;

        if let Some(expected) = classifier.input_width() {
            let produced = preprocessor.output_width();
            if expected != produced {
                return Err(PredictionError::ArtifactInvalid {
                    kind: "classifier",
                    path: paths.model.clone(),
                    reason: format!("expects {expected} features, preprocessor produces {produced}"),
                });
            }
        }
        Ok(Self { preprocessor, classifier })
    }
}

/// Holds the artifacts once loaded.
///
/// With caching off, every `get` reads the files again. Load failures are
/// never cached: the next call retries.
pub struct ArtifactStore {
    paths: ArtifactPaths,
    cache_enabled: bool,
    cached: RwLock<Option<Arc<Artifacts>>>,
}

impl ArtifactStore {
    pub fn new(paths: ArtifactPaths, cache_enabled: bool) -> Self {
        Self {
            paths,
            cache_enabled,
            cached: RwLock::new(None),
        }
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }

    pub fn is_loaded(&self) -> bool {
        self.cached
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or_else(|poisoned| poisoned.into_inner().is_some())
    }

    pub fn get(&self) -> Result<Arc<Artifacts>, PredictionError> {
        if !self.cache_enabled {
            return Artifacts::load(&self.paths).map(Arc::new);
        }

        {
            let guard = self.cached.read().unwrap_or_else(|p| p.into_inner());
            if let Some(artifacts) = guard.as_ref() {
                return Ok(Arc::clone(artifacts));
            }
        }

        let mut guard = self.cached.write().unwrap_or_else(|p| p.into_inner());
        // Another request may have loaded them while we waited.
        if let Some(artifacts) = guard.as_ref() {
            return Ok(Arc::clone(artifacts));
        }
        let artifacts = Arc::new(Artifacts::load(&self.paths)?);
        *guard = Some(Arc::clone(&artifacts));
        Ok(artifacts)
    }

    /// Load fresh artifacts and swap them in. On failure the previous
    /// artifacts stay in place.
    pub fn reload(&self) -> Result<(), PredictionError> {
        let fresh = Arc::new(Artifacts::load(&self.paths)?);
        if self.cache_enabled {
            let mut guard = self.cached.write().unwrap_or_else(|p| p.into_inner());
            *guard = Some(fresh);
        }
        tracing::info!(
            preprocessor = %self.paths.preprocessor.display(),
            model = %self.paths.model.display(),
            "Prediction artifacts reloaded"
        );
        Ok(())
    }
}
