//! Native plugin modules and their entry points.

use crate::abi::{AEffect, HostCallbackProc, PluginMainProc};
use crate::error::{panic_message, LoadStage, Result, VstError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use tracing::info;

/// Something that can produce a plugin instance given the host callback.
pub trait PluginModule: Send {
    /// Human-readable origin, used in logs and errors.
    fn label(&self) -> &str;

    /// Calls the entry point. May return null if the plugin refuses to
    /// instantiate.
    fn instantiate(&self, callback: HostCallbackProc) -> Result<*mut AEffect>;
}

/// A plugin loaded from a shared library.
pub struct LibraryModule {
    path: PathBuf,
    label: String,
    entry: PluginMainProc,
    // Dropped last: `entry` points into it.
    _library: libloading::Library,
}

impl LibraryModule {
    /// Resolve a macOS `.vst` bundle path to the inner mach-o binary.
    fn resolve_bundle_path(path: &Path) -> PathBuf {
        if path.is_dir() && path.extension().and_then(|e| e.to_str()) == Some("vst") {
            if let Some(stem) = path.file_stem() {
                let inner = path.join("Contents").join("MacOS").join(stem);
                if inner.exists() {
                    return inner;
                }
            }
        }
        path.to_path_buf()
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let resolved = Self::resolve_bundle_path(path);

        let library = unsafe { libloading::Library::new(&resolved) }.map_err(|e| {
            VstError::LoadFailed {
                path: path.to_path_buf(),
                stage: LoadStage::Opening,
                reason: e.to_string(),
            }
        })?;

        let entry = unsafe {
            library
                .get::<PluginMainProc>(b"VSTPluginMain\0")
                .or_else(|_| library.get::<PluginMainProc>(b"main\0"))
                .map(|symbol| *symbol)
        }
        .map_err(|e| VstError::LoadFailed {
            path: path.to_path_buf(),
            stage: LoadStage::EntryPoint,
            reason: format!("no VSTPluginMain or main export: {e}"),
        })?;

        let label = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        info!(path = %resolved.display(), "Loaded plugin library");

        Ok(Self {
            path: path.to_path_buf(),
            label,
            entry,
            _library: library,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PluginModule for LibraryModule {
    fn label(&self) -> &str {
        &self.label
    }

    fn instantiate(&self, callback: HostCallbackProc) -> Result<*mut AEffect> {
        let entry = self.entry;
        catch_unwind(AssertUnwindSafe(|| entry(callback))).map_err(|payload| {
            VstError::LoadFailed {
                path: self.path.clone(),
                stage: LoadStage::Instantiation,
                reason: panic_message(payload),
            }
        })
    }
}
