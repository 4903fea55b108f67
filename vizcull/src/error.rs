use thiserror::Error;
use vizcull_types::{SceneValidationError, SettingsError};

/// Reason why the compute device failed to come up.
#[derive(Error, Debug)]
pub enum DeviceCreationError {
    #[error("Failed to build the worker thread pool")]
    ThreadPool(#[source] rayon::ThreadPoolBuildError),
}

/// Reason why the renderer failed to initialize.
#[derive(Error, Debug)]
pub enum RendererInitializationError {
    #[error("Creating the compute device failed")]
    Device(#[from] DeviceCreationError),
    #[error("Render settings are invalid")]
    Settings(#[from] SettingsError),
}

/// Reason why a scene could not be uploaded.
#[derive(Error, Debug)]
pub enum SceneUploadError {
    #[error("Scene failed validation")]
    Validation(#[from] SceneValidationError),
}
