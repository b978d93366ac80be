use serde::Deserialize;
use std::{error::Error, fs};

// Lives next to the binary; build.rs copies it into the target dir.
const SETTINGS_FILENAME: &str = "settings.json";

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub bind_address: String,
    pub port: u16,
    pub save_file: String,
    pub static_dir: String,
}

impl Settings {
    pub fn load() -> Result<Settings, Box<dyn Error>> {
        Settings::load_from(SETTINGS_FILENAME)
    }

    pub fn load_from(path: &str) -> Result<Settings, Box<dyn Error>> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_from_parses_all_fields() {
        let path = format!("/tmp/taskdeck_settings_{}.json", std::process::id());
        let mut file = fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"bind_address":"127.0.0.1","port":8088,"save_file":"t.redb","static_dir":"dist"}}"#
        )
        .unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.bind_address, "127.0.0.1");
        assert_eq!(settings.port, 8088);
        assert_eq!(settings.save_file, "t.redb");
        assert_eq!(settings.static_dir, "dist");

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Settings::load_from("/nonexistent/settings.json").is_err());
    }
}
