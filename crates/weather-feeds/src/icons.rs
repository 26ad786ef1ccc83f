use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::condition::{self, Phase};

pub const DEFAULT_ICON_SET: &str = "Gemstone";
pub const NA_ICON_ID: &str = "na";
const ICONS_DIR: &str = "Icons";
const ICON_EXTENSION: &str = "png";

/// An icon pack: `<weather_root>/Icons/<set>/<id>.png`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconPack {
    weather_root: PathBuf,
    set: String,
}

impl IconPack {
    pub fn new(weather_root: impl Into<PathBuf>, set: impl Into<String>) -> Self {
        let set = set.into();
        let set = if set.trim().is_empty() {
            DEFAULT_ICON_SET.to_string()
        } else {
            set
        };
        Self {
            weather_root: weather_root.into(),
            set,
        }
    }

    pub fn set_name(&self) -> &str {
        &self.set
    }

    pub fn icons_dir(&self) -> PathBuf {
        icons_dir(&self.weather_root)
    }

    /// Asset id for a code shown in the given phase; codes outside the
    /// taxonomy resolve to the "not available" asset.
    pub fn icon_id(&self, code: i32, phase: Phase) -> String {
        let code = condition::force_phase(code, phase);
        if condition::is_known(code) {
            code.to_string()
        } else {
            NA_ICON_ID.to_string()
        }
    }

    pub fn icon_path(&self, code: i32, phase: Phase) -> PathBuf {
        self.icons_dir()
            .join(&self.set)
            .join(format!("{}.{ICON_EXTENSION}", self.icon_id(code, phase)))
    }

    /// Switches to the set after the current one among those installed.
    pub fn rotate(&mut self) -> bool {
        let sets = available_sets(&self.weather_root);
        match next_set(&sets, &self.set) {
            Some(next) => {
                self.set = next;
                true
            }
            None => false,
        }
    }
}

pub fn icons_dir(weather_root: &Path) -> PathBuf {
    weather_root.join(ICONS_DIR)
}

/// Every asset id an icon set is expected to provide.
pub fn icon_ids() -> Vec<String> {
    (0..=condition::MAX_CODE)
        .map(|code| code.to_string())
        .chain(std::iter::once(NA_ICON_ID.to_string()))
        .collect()
}

/// Names of the installed icon sets, sorted.
pub fn available_sets(weather_root: &Path) -> Vec<String> {
    let mut sets: Vec<String> = WalkDir::new(icons_dir(weather_root))
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    sets.sort();
    sets
}

/// The set following `current`, wrapping around; the first set when
/// `current` is not installed.
pub fn next_set(sets: &[String], current: &str) -> Option<String> {
    let position = sets.iter().position(|set| set == current);
    match position {
        Some(index) => sets.get((index + 1) % sets.len()).cloned(),
        None => sets.first().cloned(),
    }
}
