//! Record extensions and data sub-directories per component kind.

use crate::component::ComponentKind;

/// Storage settings for one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageEntry {
    /// Component kind.
    pub kind: ComponentKind,
    /// Record file extension, without the dot.
    pub extension: &'static str,
    /// Data directory under the repository root; empty for kinds that keep
    /// their data outside the repository or directly under the root.
    pub subdir: &'static str,
}

/// Kind to storage settings table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageTable {
    entries: Vec<StorageEntry>,
}

impl Default for StorageTable {
    fn default() -> Self {
        use ComponentKind as K;
        let entry = |kind, extension, subdir| StorageEntry {
            kind,
            extension,
            subdir,
        };
        Self {
            entries: vec![
                entry(K::Program, "dbp", ""),
                entry(K::Venv, "dbv", "Venvs"),
                entry(K::Setup, "dsu", "Setups"),
                entry(K::ReleasedAddon, "dba", "Addons"),
                entry(K::DevAddon, "dda", ""),
                entry(K::ReleasedScript, "dbs", "Scripts"),
                entry(K::DevScript, "dds", ""),
                entry(K::DevLibrary, "ddl", ""),
                entry(K::Profile, "dpr", "Profiles"),
            ],
        }
    }
}

impl StorageTable {
    /// Settings for `kind`.
    #[must_use]
    pub fn entry(&self, kind: ComponentKind) -> StorageEntry {
        self.entries
            .iter()
            .copied()
            .find(|e| e.kind == kind)
            .unwrap_or(StorageEntry {
                kind,
                extension: "rec",
                subdir: "",
            })
    }

    /// Record extension for `kind`.
    #[must_use]
    pub fn extension(&self, kind: ComponentKind) -> &'static str {
        self.entry(kind).extension
    }

    /// Data sub-directory for `kind`.
    #[must_use]
    pub fn subdir(&self, kind: ComponentKind) -> &'static str {
        self.entry(kind).subdir
    }

    /// All entries.
    pub fn iter(&self) -> impl Iterator<Item = &StorageEntry> {
        self.entries.iter()
    }
}
