//! Theme roots and logical path resolution.
//!
//! Layout under the themes directory:
//!
//! ```text
//! <themes_dir>/
//! ├── icons/<theme>/...          icon files, one directory per theme
//! ├── style/<theme>/...          stylesheets and widget layouts
//! ├── effects/<theme>/...        effect definitions
//! ├── theme/<theme>/...          device profiles, typeface tables
//! └── operators/
//!     ├── removable/<folder>/... operator theme on removable media
//!     └── firmware/<folder>/...  operator theme shipped with firmware
//! ```
//!
//! Lookups walk the tiers from highest to lowest priority: removable
//! operator, firmware operator, active theme, base theme.

use std::path::{Component, Path, PathBuf};

use theme_arena::ThemeSlot;
use theme_config_and_utils::{Config, DEFAULT_THEME};
use tracing::debug;

/// Device profile table, looked up in the `theme` folder.
pub const DEVICE_PROFILES_FILE: &str = "deviceprofiles.json";

/// Typeface metadata table, looked up in the `theme` folder.
pub const TYPEFACES_FILE: &str = "typefaces.json";

/// Extensions tried, in order, for icon names given without one.
pub const ICON_EXTENSIONS: [&str; 6] = ["svg", "nvg", "pic", "png", "jpg", "bmp"];

/// Subdirectory holding mirrored variants of icons.
pub const MIRRORED_DIR: &str = "mirrored";

/// Kind of resource, which selects the theme folder it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Icon,
    StyleSheet,
    WidgetLayout,
    Effect,
    DeviceProfile,
    TypefaceTable,
}

impl ResourceKind {
    pub fn folder(&self) -> &'static str {
        match self {
            Self::Icon => "icons",
            Self::StyleSheet | Self::WidgetLayout => "style",
            Self::Effect => "effects",
            Self::DeviceProfile | Self::TypefaceTable => "theme",
        }
    }
}

/// Resolves logical resource names against the theme tiers.
#[derive(Debug, Clone)]
pub struct ThemeRoots {
    themes_dir: PathBuf,
    base_theme: String,
    active_theme: String,
}

impl ThemeRoots {
    pub fn new(themes_dir: impl Into<PathBuf>, base_theme: impl Into<String>) -> Self {
        let base_theme = base_theme.into();
        Self {
            themes_dir: themes_dir.into(),
            active_theme: base_theme.clone(),
            base_theme,
        }
    }

    /// Roots for the configured themes directory (`HB_THEMES_DIR` applied).
    pub fn from_config(config: &Config) -> Self {
        let base = if config.default_theme.is_empty() {
            DEFAULT_THEME.to_string()
        } else {
            config.default_theme.clone()
        };
        Self::new(config.themes_dir(), base)
    }

    pub fn themes_dir(&self) -> &Path {
        &self.themes_dir
    }

    pub fn base_theme(&self) -> &str {
        &self.base_theme
    }

    pub fn active_theme(&self) -> &str {
        &self.active_theme
    }

    pub fn set_active_theme(&mut self, name: impl Into<String>) {
        self.active_theme = name.into();
    }

    /// Whether a theme with this name is installed.
    pub fn theme_exists(&self, name: &str) -> bool {
        is_plain_name(name)
            && ["icons", "style", "effects", "theme"]
                .iter()
                .any(|folder| self.themes_dir.join(folder).join(name).is_dir())
    }

    /// Installed theme names, sorted.
    pub fn available_themes(&self) -> Vec<String> {
        let mut themes: Vec<String> = std::fs::read_dir(self.themes_dir.join("icons"))
            .into_iter()
            .flatten()
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        themes.sort();
        themes
    }

    /// Directory of one tier for a resource folder.
    pub fn tier_dir(&self, slot: ThemeSlot, folder: &str) -> PathBuf {
        match slot {
            ThemeSlot::OperatorRemovable => self
                .themes_dir
                .join("operators")
                .join("removable")
                .join(folder),
            ThemeSlot::OperatorFirmware => self
                .themes_dir
                .join("operators")
                .join("firmware")
                .join(folder),
            ThemeSlot::Active => self.themes_dir.join(folder).join(&self.active_theme),
            ThemeSlot::Base => self.themes_dir.join(folder).join(&self.base_theme),
        }
    }

    /// Tiers in lookup order. The active tier is skipped while it is the
    /// base theme.
    pub fn tiers(&self) -> Vec<ThemeSlot> {
        let mut tiers = vec![ThemeSlot::OperatorRemovable, ThemeSlot::OperatorFirmware];
        if self.active_theme != self.base_theme {
            tiers.push(ThemeSlot::Active);
        }
        tiers.push(ThemeSlot::Base);
        tiers
    }

    /// Resolve a logical name to a file.
    ///
    /// Absolute paths are taken as-is. Relative names must stay inside the
    /// theme tree. Icon names without an extension are tried with every
    /// entry of [`ICON_EXTENSIONS`]; a mirrored lookup prefers the variant
    /// under [`MIRRORED_DIR`].
    pub fn resolve(&self, kind: ResourceKind, logical: &str, mirrored: bool) -> Option<PathBuf> {
        if logical.is_empty() {
            return None;
        }
        let path = Path::new(logical);
        if path.is_absolute() {
            return path.is_file().then(|| path.to_path_buf());
        }
        if !stays_inside(path) {
            debug!(logical, "Rejecting path escaping the theme tree");
            return None;
        }

        let candidates = candidate_names(kind, logical, mirrored);
        for slot in self.tiers() {
            let dir = self.tier_dir(slot, kind.folder());
            for name in &candidates {
                let file = dir.join(name);
                if file.is_file() {
                    return Some(file);
                }
            }
        }
        None
    }

    /// Resolve a resource that has a fixed file name.
    pub fn resolve_table(&self, kind: ResourceKind) -> Option<PathBuf> {
        match kind {
            ResourceKind::DeviceProfile => self.resolve(kind, DEVICE_PROFILES_FILE, false),
            ResourceKind::TypefaceTable => self.resolve(kind, TYPEFACES_FILE, false),
            _ => None,
        }
    }
}

fn candidate_names(kind: ResourceKind, logical: &str, mirrored: bool) -> Vec<PathBuf> {
    let base: Vec<PathBuf> = if kind == ResourceKind::Icon && Path::new(logical).extension().is_none()
    {
        ICON_EXTENSIONS
            .iter()
            .map(|ext| PathBuf::from(format!("{}.{}", logical, ext)))
            .collect()
    } else {
        vec![PathBuf::from(logical)]
    };

    if kind == ResourceKind::Icon && mirrored {
        base.iter()
            .map(|name| Path::new(MIRRORED_DIR).join(name))
            .chain(base.iter().cloned())
            .collect()
    } else {
        base
    }
}

fn stays_inside(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && stays_inside(Path::new(name)) && Path::new(name).components().count() == 1
}
