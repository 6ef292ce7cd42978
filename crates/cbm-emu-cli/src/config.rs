use std::io;
use std::path::{Path, PathBuf};

use cbm_emu_core::resources::Resources;
use log::{debug, warn};

const CONFIG_DIR: &str = "cbm-emu";
const CONFIG_FILE: &str = "resources.toml";

pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join(CONFIG_DIR).join(CONFIG_FILE);
        }
    }

    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join(CONFIG_DIR).join(CONFIG_FILE);
    }

    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(CONFIG_DIR)
            .join(CONFIG_FILE);
    }

    PathBuf::from(CONFIG_FILE)
}

/// Resources from a TOML file keyed by resource name. A missing file, one
/// that does not parse, or one with out-of-range values gives the
/// defaults.
pub fn load_from_file(path: &Path) -> Resources {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            debug!("Config: {} not read: {e}", path.display());
            return Resources::default();
        }
    };

    let mut resources = match toml::from_str::<Resources>(&text) {
        Ok(res) => res,
        Err(e) => {
            warn!(
                "Failed to parse resource file {}: {e}; using defaults",
                path.display()
            );
            return Resources::default();
        }
    };

    if let Err(e) = resources.sanitize() {
        warn!("Resource file {}: {e}; using defaults", path.display());
        return Resources::default();
    }
    resources
}

pub fn save_to_file(path: &Path, resources: &Resources) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let text = toml::to_string_pretty(resources)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbm_emu_core::event::StartMode;
    use std::fs;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let res = load_from_file(&dir.path().join("nope.toml"));
        assert_eq!(res, Resources::default());
    }

    #[test]
    fn unset_keys_keep_their_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resources.toml");
        fs::write(
            &path,
            "NetworkServerPort = 6510\nEventStartMode = 2\nNetworkServerName = \"c64.lan\"\n",
        )
        .unwrap();

        let res = load_from_file(&path);
        assert_eq!(res.network_server_port, 6510);
        assert_eq!(res.event_start_mode, StartMode::HardReset);
        assert_eq!(res.network_server_name, "c64.lan");
        assert_eq!(res.network_frame_delta, Resources::default().network_frame_delta);
    }

    #[test]
    fn broken_or_invalid_files_give_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resources.toml");

        fs::write(&path, "NetworkServerPort = \"six\"").unwrap();
        assert_eq!(load_from_file(&path), Resources::default());

        fs::write(&path, "NetworkFrameDelta = 0").unwrap();
        assert_eq!(load_from_file(&path), Resources::default());

        fs::write(&path, "EventStartMode = 7").unwrap();
        assert_eq!(load_from_file(&path), Resources::default());
    }

    #[test]
    fn saved_file_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("resources.toml");
        let res = Resources {
            event_snapshot_dir: dir.path().to_string_lossy().into_owned(),
            event_end_snapshot: "milestone.vsf".to_string(),
            network_control: 0x0303,
            ..Resources::default()
        };

        save_to_file(&path, &res).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("EventEndSnapshot = \"milestone.vsf\""));

        let mut expected = res;
        expected.sanitize().unwrap();
        assert_eq!(load_from_file(&path), expected);
    }
}
