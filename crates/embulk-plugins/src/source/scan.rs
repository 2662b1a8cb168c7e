//! Discovery of archives under plugin roots.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::capability::CapabilityKind;
use crate::class_loader::{MANIFEST_PATH, PluginArchive};
use crate::version::compare_optional_versions;

const SCAN_TARGET: &str = "embulk_plugins::source::scan";

/// Opens every archive directly under `root`, in path order.
///
/// Zip files and directories holding a manifest are archives; anything else
/// is ignored. Archives that fail to open are logged and skipped, and a
/// missing root yields nothing.
#[must_use]
pub fn scan_root(root: &Path) -> Vec<Arc<PluginArchive>> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(error) => {
            debug!(
                target: SCAN_TARGET,
                root = %root.display(),
                %error,
                "plugin root is not readable"
            );
            return Vec::new();
        }
    };
    let mut paths: Vec<_> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            if path.is_dir() {
                path.join(MANIFEST_PATH).is_file()
            } else {
                path.extension().is_some_and(|ext| ext == "zip")
            }
        })
        .collect();
    paths.sort();

    let mut archives = Vec::with_capacity(paths.len());
    for path in paths {
        match PluginArchive::open(&path) {
            Ok(archive) => archives.push(Arc::new(archive)),
            Err(error) => warn!(
                target: SCAN_TARGET,
                path = %path.display(),
                %error,
                "skipping unreadable plugin archive"
            ),
        }
    }
    debug!(
        target: SCAN_TARGET,
        root = %root.display(),
        archives = archives.len(),
        "scanned plugin root"
    );
    archives
}

/// Archives declaring `name` in the category of `kind`, in scan order.
pub(crate) fn candidates<'a, I>(
    archives: I,
    kind: CapabilityKind,
    name: &str,
) -> Vec<Arc<PluginArchive>>
where
    I: IntoIterator<Item = &'a Arc<PluginArchive>>,
{
    archives
        .into_iter()
        .filter(|archive| archive.entries_for(kind, name).next().is_some())
        .cloned()
        .collect()
}

/// Sorts highest version first. Unversioned archives sort last and ties
/// keep their order.
pub(crate) fn sort_descending(archives: &mut [Arc<PluginArchive>]) {
    archives.sort_by(|left, right| {
        compare_optional_versions(right.manifest().version(), left.manifest().version())
    });
}

/// Versions of `archives` for diagnostics.
pub(crate) fn versions(archives: &[Arc<PluginArchive>]) -> Vec<String> {
    archives
        .iter()
        .map(|archive| archive.manifest().version().unwrap_or("unversioned").to_owned())
        .collect()
}
