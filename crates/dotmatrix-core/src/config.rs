use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Host configuration, parsed from a TOML file with the historical
/// upper-case key names. Unknown keys are ignored; missing keys take their
/// defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
	#[serde(rename = "ROM_DIRECTORY", skip_serializing_if = "Option::is_none")]
	pub rom_directory: Option<PathBuf>,
	#[serde(rename = "ROM_FILENAME", skip_serializing_if = "Option::is_none")]
	pub rom_filename: Option<String>,
	/// Output volume in 0.0-1.0.
	#[serde(rename = "MASTER_VOLUME", skip_serializing_if = "Option::is_none")]
	pub master_volume: Option<f32>,
	/// 1.0 is the stock 59.7 Hz pacing.
	#[serde(rename = "FRAMERATE_MULTIPLIER", skip_serializing_if = "Option::is_none")]
	pub framerate_multiplier: Option<f32>,
	#[serde(rename = "VERBOSE_MODE")]
	pub verbose_mode: bool,
	/// Integer scale factor for the host window.
	#[serde(rename = "PIXEL_SCALE", skip_serializing_if = "Option::is_none")]
	pub pixel_scale: Option<u32>,
	/// Run DMG cartridges on the CGB hardware model.
	#[serde(rename = "FORCE_COLOR")]
	pub force_color: bool,
	/// Skip automatic SRAM save/load at shutdown/startup.
	#[serde(rename = "DISABLE_AUTO_SAVE")]
	pub disable_auto_save: bool,
	#[serde(rename = "KEYS")]
	pub keys: KeyBindings,
}

/// Names of host keys bound to the eight logical buttons. The defaults
/// match the traditional WASD + k/j layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KeyBindings {
	pub up: String,
	pub down: String,
	pub left: String,
	pub right: String,
	pub a: String,
	pub b: String,
	pub start: String,
	pub select: String,
}

impl Default for KeyBindings {
	fn default() -> Self {
		Self {
			up: "w".into(),
			down: "s".into(),
			left: "a".into(),
			right: "d".into(),
			a: "k".into(),
			b: "j".into(),
			start: "Return".into(),
			select: "Tab".into(),
		}
	}
}

impl Config {
	pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
		toml::from_str(text)
	}

	/// Read a config file, falling back to defaults (with a warning) when
	/// the file is missing or malformed.
	pub fn load_from_path(path: &Path) -> Self {
		let text = match std::fs::read_to_string(path) {
			Ok(text) => text,
			Err(_) => return Self::default(),
		};
		match Self::from_toml(&text) {
			Ok(config) => config,
			Err(err) => {
				core_warn!(
					target: "config",
					"failed to parse {}: {err}; using defaults",
					path.display()
				);
				Self::default()
			}
		}
	}

	/// Full path of the configured ROM, when both parts are present.
	pub fn rom_path(&self) -> Option<PathBuf> {
		let filename = self.rom_filename.as_ref()?;
		Some(match &self.rom_directory {
			Some(dir) => dir.join(filename),
			None => PathBuf::from(filename),
		})
	}
}
