use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use path_clean::PathClean;
use serde::Serialize;

use clrbridge_core::HostError;

use crate::trusted::{TrustedList, CODE_UNIT_EXT, EXE_UNIT_EXT};

/// File name of the engine's native library on this platform.
#[cfg(windows)]
pub const ENGINE_LIBRARY_FILE: &str = "coreclr.dll";
#[cfg(target_os = "macos")]
pub const ENGINE_LIBRARY_FILE: &str = "libcoreclr.dylib";
#[cfg(all(unix, not(target_os = "macos")))]
pub const ENGINE_LIBRARY_FILE: &str = "libcoreclr.so";

/// Conventional root of shared engine installations, probed when the
/// caller does not pass an install directory.
#[cfg(windows)]
const DEFAULT_ENGINE_INSTALL_DIR: &str = "C:/Program Files/dotnet/shared/Microsoft.NETCore.App";
#[cfg(target_os = "macos")]
const DEFAULT_ENGINE_INSTALL_DIR: &str = "/usr/local/share/dotnet/shared/Microsoft.NETCore.App";
#[cfg(all(unix, not(target_os = "macos")))]
const DEFAULT_ENGINE_INSTALL_DIR: &str = "/usr/share/dotnet/shared/Microsoft.NETCore.App";

/// How the located engine is deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeploymentMode {
    /// The engine ships inside the application base directory.
    SelfContained,
    /// The engine comes from a machine-wide installation.
    Shared,
}

/// Result of a successful engine probe.
#[derive(Debug, Clone, Serialize)]
pub struct Located {
    /// Application base directory, absolute.
    pub app_base_dir: PathBuf,
    /// Full path to the engine's native library.
    pub engine_library: PathBuf,
    pub mode: DeploymentMode,
    /// Code units collected along the probe, in append order.
    pub trusted: TrustedList,
}

/// Locate an engine runtime and collect the trusted code-unit list.
///
/// Probes, in order: the package binary directory (list entries only), the
/// application base directory (a self-contained engine there wins
/// immediately), then the shared installation under `engine_install_dir`
/// or the platform default.
///
/// # Errors
///
/// Returns [`HostError::EngineNotFound`] when no probed location carries
/// the engine library. This is the one recoverable failure: the caller may
/// install a runtime or correct its paths and try again.
pub fn locate(
    app_base_dir: &Path,
    package_bin_dir: Option<&Path>,
    engine_install_dir: Option<&Path>,
) -> Result<Located, HostError> {
    let mut trusted = TrustedList::new();

    // Package-private code units occupy the first list slots so they shadow
    // same-named units from the directories probed later.
    if let Some(bin) = package_bin_dir {
        if bin.is_dir() {
            trusted.append_dir(bin, CODE_UNIT_EXT);
        }
    }

    // A path naming a file stands for the directory holding that file.
    let app_base = if app_base_dir.is_file() {
        app_base_dir.parent().unwrap_or(app_base_dir).to_path_buf()
    } else {
        app_base_dir.to_path_buf()
    };
    let app_base = expand_path(&app_base);

    if app_base.is_dir() {
        trusted.append_dir(&app_base, CODE_UNIT_EXT);
        trusted.append_dir(&app_base, EXE_UNIT_EXT);

        // Self-contained deployments pin their own engine build next to the
        // application; it shadows any shared installation.
        let bundled = app_base.join(ENGINE_LIBRARY_FILE);
        if bundled.is_file() {
            tracing::info!(engine = %bundled.display(), "using self-contained engine deployment");
            return Ok(Located {
                app_base_dir: app_base,
                engine_library: bundled,
                mode: DeploymentMode::SelfContained,
                trusted,
            });
        }
    }

    let install_root =
        expand_path(engine_install_dir.unwrap_or(Path::new(DEFAULT_ENGINE_INSTALL_DIR)));
    if let Some(shared_dir) = probe_shared_install(&install_root) {
        trusted.append_dir(&shared_dir, CODE_UNIT_EXT);
        let engine_library = shared_dir.join(ENGINE_LIBRARY_FILE);
        tracing::info!(engine = %engine_library.display(), "using shared engine installation");
        return Ok(Located {
            app_base_dir: app_base,
            engine_library,
            mode: DeploymentMode::Shared,
            trusted,
        });
    }

    Err(HostError::EngineNotFound {
        message: format!(
            "no engine runtime found under {} or {}; install a .NET Core runtime or pass its install directory",
            app_base.display(),
            install_root.display()
        ),
    })
}

/// Find the directory holding the engine library inside a shared install.
///
/// The root itself is checked first. Otherwise shared installs keep one
/// subdirectory per runtime version; the newest version that actually
/// ships the engine library is chosen. Version directories that do not
/// parse as dotted numbers (previews, garbage) are skipped.
fn probe_shared_install(root: &Path) -> Option<PathBuf> {
    if root.join(ENGINE_LIBRARY_FILE).is_file() {
        return Some(root.to_path_buf());
    }
    let iter = fs::read_dir(root).ok()?;
    let mut versions: Vec<(RuntimeVersion, PathBuf)> = iter
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            let version = RuntimeVersion::parse(name.to_str()?)?;
            Some((version, entry.path()))
        })
        .collect();
    versions.sort_by(|a, b| b.0.cmp(&a.0));
    let found = versions
        .into_iter()
        .map(|(_, dir)| dir)
        .find(|dir| dir.join(ENGINE_LIBRARY_FILE).is_file());
    if found.is_none() {
        tracing::debug!(root = %root.display(), "no engine library in shared install root");
    }
    found
}

/// Dotted numeric version of a shared runtime directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct RuntimeVersion {
    major: u32,
    minor: u32,
    patch: u32,
    revision: u32,
}

impl RuntimeVersion {
    fn parse(name: &str) -> Option<RuntimeVersion> {
        let mut parts = [0u32; 4];
        for (i, segment) in name.split('.').enumerate() {
            if i >= parts.len() {
                break;
            }
            parts[i] = segment.parse().ok()?;
        }
        Some(RuntimeVersion {
            major: parts[0],
            minor: parts[1],
            patch: parts[2],
            revision: parts[3],
        })
    }
}

/// Expand a leading `~` and make the path absolute.
///
/// Canonicalizes when the path exists so symlinked install roots resolve.
/// Paths that do not exist get a lexical clean against the working
/// directory instead.
fn expand_path(path: &Path) -> PathBuf {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    };
    if let Ok(canonical) = expanded.canonicalize() {
        return canonical;
    }
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        match env::current_dir() {
            Ok(cwd) => cwd.join(expanded),
            Err(_) => expanded,
        }
    };
    absolute.clean()
}
