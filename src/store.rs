use std::{
    fs,
    marker::PhantomData,
    path::{Path, PathBuf},
};

use serde::{Serialize, de::DeserializeOwned};

use crate::prelude::*;

/// Whole-snapshot JSON file that survives the process restarts.
///
/// Reading never fails: a missing or corrupt file yields the zero-valued state.
/// Writing never fails either: errors are logged and the in-memory state stays authoritative.
pub struct Store<S> {
    path: PathBuf,
    marker: PhantomData<fn() -> S>,
}

impl<S: Serialize + DeserializeOwned + Default> Store<S> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), marker: PhantomData }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn load(&self) -> S {
        self.load_fallibly().unwrap_or_else(|error| {
            warn!("failed to load the state, starting afresh: {error:#}");
            S::default()
        })
    }

    fn load_fallibly(&self) -> Result<S> {
        if !self.path.is_file() {
            info!("no saved state yet");
            return Ok(S::default());
        }
        let contents = fs::read(&self.path).context("failed to read the state file")?;
        serde_json::from_slice(&contents).context("failed to deserialize the state")
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn save(&self, state: &S) {
        if let Err(error) = self.save_fallibly(state) {
            error!("failed to save the state: {error:#}");
        }
    }

    /// Write the snapshot next to the target and move it over, so that readers never see a torn file.
    fn save_fallibly(&self, state: &S) -> Result {
        let contents = serde_json::to_vec_pretty(state)?;
        let temporary_path = self.path.with_extension("json.tmp");
        fs::write(&temporary_path, contents).context("failed to write the temporary file")?;
        fs::rename(&temporary_path, &self.path).context("failed to replace the state file")?;
        debug!("saved");
        Ok(())
    }
}
