//! Scene state service.
//!
//! Holds what asset is loaded and which animation is active. Every
//! successful mutation is reported to the configured [`EventEmitter`] while
//! the write lock is still held, so events leave in the same order as the
//! state changes. Emitters must not call back into the scene.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::event::{EventEmitter, EventKind};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SceneError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("No asset is loaded")]
    NoAssetLoaded,
    #[error("No animation is loaded")]
    NoAnimationLoaded,
}

/// Point-in-time copy of the scene.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneSnapshot {
    pub current_asset_path: Option<String>,
    pub current_animation: Option<String>,
    pub playing: bool,
}

impl SceneSnapshot {
    pub fn is_loaded(&self) -> bool {
        self.current_asset_path.is_some()
    }

    /// Payload of the `init` event sent to newly connected viewers.
    pub fn init_payload(&self) -> Value {
        json!({
            "currentAssetPath": self.current_asset_path,
            "isLoaded": self.is_loaded(),
        })
    }
}

pub struct SceneState {
    inner: RwLock<SceneSnapshot>,
    emitter: Arc<dyn EventEmitter>,
}

impl std::fmt::Debug for SceneState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneState")
            .field("inner", &*self.inner.read())
            .field("emitter", &"<emitter>")
            .finish()
    }
}

impl SceneState {
    pub fn new(emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            inner: RwLock::new(SceneSnapshot::default()),
            emitter,
        }
    }

    pub fn snapshot(&self) -> SceneSnapshot {
        self.inner.read().clone()
    }

    /// Run `f` against the current state while holding the read lock.
    ///
    /// Mutations emit under the write lock, so anything `f` subscribes to
    /// sees every event that is not already reflected in the snapshot.
    pub fn observe<R>(&self, f: impl FnOnce(&SceneSnapshot) -> R) -> R {
        let state = self.inner.read();
        f(&state)
    }

    /// Replace the current asset. Any active animation is dropped.
    pub fn load_asset(&self, path: &str) -> Result<SceneSnapshot, SceneError> {
        let path = path.trim();
        if path.is_empty() {
            return Err(SceneError::InvalidArgument("asset path is empty".to_string()));
        }

        let mut state = self.inner.write();
        state.current_asset_path = Some(path.to_string());
        state.current_animation = None;
        state.playing = false;

        debug!(path, "asset loaded");
        self.emitter
            .emit(EventKind::AssetLoaded, json!({ "path": path }));
        Ok(state.clone())
    }

    pub fn load_animation(&self, name: &str) -> Result<SceneSnapshot, SceneError> {
        let mut state = self.inner.write();
        self.select_animation(&mut state, name)?;
        Ok(state.clone())
    }

    /// Start playback. With a name, that animation is selected first.
    pub fn play_animation(&self, name: Option<&str>) -> Result<SceneSnapshot, SceneError> {
        let mut state = self.inner.write();
        if let Some(name) = name {
            self.select_animation(&mut state, name)?;
        }

        if state.current_asset_path.is_none() {
            return Err(SceneError::NoAssetLoaded);
        }
        let name = state
            .current_animation
            .clone()
            .ok_or(SceneError::NoAnimationLoaded)?;
        state.playing = true;

        self.emitter
            .emit(EventKind::AnimationPlayed, json!({ "name": name }));
        Ok(state.clone())
    }

    pub fn stop_animation(&self) -> Result<SceneSnapshot, SceneError> {
        let mut state = self.inner.write();
        if state.current_asset_path.is_none() {
            return Err(SceneError::NoAssetLoaded);
        }
        state.playing = false;

        self.emitter.emit(
            EventKind::AnimationStopped,
            json!({ "name": state.current_animation }),
        );
        Ok(state.clone())
    }

    fn select_animation(&self, state: &mut SceneSnapshot, name: &str) -> Result<(), SceneError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SceneError::InvalidArgument(
                "animation name is empty".to_string(),
            ));
        }
        let asset = state
            .current_asset_path
            .clone()
            .ok_or(SceneError::NoAssetLoaded)?;
        state.current_animation = Some(name.to_string());
        state.playing = false;

        debug!(name, asset = %asset, "animation loaded");
        self.emitter.emit(
            EventKind::AnimationLoaded,
            json!({ "name": name, "assetPath": asset }),
        );
        Ok(())
    }
}
