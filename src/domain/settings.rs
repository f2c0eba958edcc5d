use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::session::{WritePolicies, WritePolicy};
use crate::infrastructure::bluetooth::btleplug_backend::AttributeUuids;
use crate::infrastructure::bluetooth::protocol;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            console_logging_enabled: default_true(),
            file_logging_enabled: default_false(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "led_controller".to_string()
}

/// GATT identifier overrides, for peripherals reflashed with a different
/// service layout. Defaults are the stock controller contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BleSettings {
    #[serde(default = "default_service_uuid")]
    pub service_uuid: String,
    #[serde(default = "default_brightness_uuid")]
    pub brightness_char_uuid: String,
    #[serde(default = "default_animation_uuid")]
    pub animation_char_uuid: String,
    #[serde(default = "default_delay_time_uuid")]
    pub delay_time_char_uuid: String,
    #[serde(default = "default_color_uuid")]
    pub color_char_uuid: String,
}

impl Default for BleSettings {
    fn default() -> Self {
        Self {
            service_uuid: default_service_uuid(),
            brightness_char_uuid: default_brightness_uuid(),
            animation_char_uuid: default_animation_uuid(),
            delay_time_char_uuid: default_delay_time_uuid(),
            color_char_uuid: default_color_uuid(),
        }
    }
}

impl BleSettings {
    pub fn attribute_uuids(&self) -> anyhow::Result<AttributeUuids> {
        Ok(AttributeUuids {
            service: self.service_uuid.parse()?,
            brightness: self.brightness_char_uuid.parse()?,
            animation: self.animation_char_uuid.parse()?,
            delay_time: self.delay_time_char_uuid.parse()?,
            color: self.color_char_uuid.parse()?,
        })
    }
}

fn default_service_uuid() -> String {
    protocol::SERVICE_UUID.to_string()
}
fn default_brightness_uuid() -> String {
    protocol::BRIGHTNESS_CHAR_UUID.to_string()
}
fn default_animation_uuid() -> String {
    protocol::ANIMATION_CHAR_UUID.to_string()
}
fn default_delay_time_uuid() -> String {
    protocol::DELAY_TIME_CHAR_UUID.to_string()
}
fn default_color_uuid() -> String {
    protocol::COLOR_CHAR_UUID.to_string()
}

/// Debounce tuning. The original app used 250 ms on the sliders and 50 ms
/// on the color path with no documented rationale, so both are settings
/// rather than constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteSettings {
    #[serde(default = "default_confirm_delay_ms")]
    pub slider_confirm_delay_ms: u64,
    #[serde(default = "default_color_debounce_ms")]
    pub color_debounce_ms: u64,
}

impl Default for WriteSettings {
    fn default() -> Self {
        Self {
            slider_confirm_delay_ms: default_confirm_delay_ms(),
            color_debounce_ms: default_color_debounce_ms(),
        }
    }
}

impl WriteSettings {
    pub fn policies(&self) -> WritePolicies {
        let confirm = WritePolicy::ImmediateThenConfirm(Duration::from_millis(
            self.slider_confirm_delay_ms,
        ));
        WritePolicies {
            brightness: confirm,
            animation: WritePolicy::Immediate,
            delay_time: confirm,
            color: WritePolicy::Debounced(Duration::from_millis(self.color_debounce_ms)),
        }
    }
}

fn default_confirm_delay_ms() -> u64 {
    250
}
fn default_color_debounce_ms() -> u64 {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub ble: BleSettings,
    #[serde(default)]
    pub write: WriteSettings,
    /// Start scanning again when the link drops. The session core never
    /// reconnects on its own; this only drives the binary's event loop.
    #[serde(default = "default_true")]
    pub rescan_on_disconnect: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log: LogSettings::default(),
            ble: BleSettings::default(),
            write: WriteSettings::default(),
            rescan_on_disconnect: true,
        }
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::settings_path()?;
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();

        Ok(Self {
            settings,
            settings_path,
        })
    }

    fn settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;
        path.push("LedController");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &PathBuf) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}
