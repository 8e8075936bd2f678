//! 設定ファイル管理モジュール
//!
//! エミュレータの設定をJSON形式で永続化

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::antic::{NTSC_LINES, PAL_LINES};

/// 設定ファイルのデフォルトファイル名
const CONFIG_FILENAME: &str = "a8rs_config.json";

/// NTSC機のCPUクロック (Hz)
pub const NTSC_CPU_HZ: u32 = 1_789_773;
/// PAL機のCPUクロック (Hz)
pub const PAL_CPU_HZ: u32 = 1_773_447;

/// 実行ファイルのディレクトリを取得
pub fn get_exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// 相対パスを指定されたベースディレクトリからの絶対パスに解決
pub fn resolve_path_with_base(base: &str, relative: &str) -> PathBuf {
    let path = Path::new(relative);
    if path.is_absolute() {
        path.to_path_buf()
    } else if base.is_empty() {
        get_exe_dir().join(relative)
    } else {
        let base_path = Path::new(base);
        if base_path.is_absolute() {
            base_path.join(relative)
        } else {
            get_exe_dir().join(base).join(relative)
        }
    }
}

/// 設定ファイルのパスを取得
pub fn get_config_path() -> PathBuf {
    get_exe_dir().join(CONFIG_FILENAME)
}

/// テレビ方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoStandard {
    #[default]
    Ntsc,
    Pal,
}

impl VideoStandard {
    /// 1フレームのスキャンライン数
    pub fn lines_per_frame(self) -> u32 {
        match self {
            VideoStandard::Ntsc => NTSC_LINES,
            VideoStandard::Pal => PAL_LINES,
        }
    }

    pub fn cpu_hz(self) -> u32 {
        match self {
            VideoStandard::Ntsc => NTSC_CPU_HZ,
            VideoStandard::Pal => PAL_CPU_HZ,
        }
    }

    pub fn is_pal(self) -> bool {
        self == VideoStandard::Pal
    }
}

impl std::str::FromStr for VideoStandard {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ntsc" => Ok(VideoStandard::Ntsc),
            "pal" => Ok(VideoStandard::Pal),
            other => Err(format!("unknown video standard '{}' (expected ntsc or pal)", other)),
        }
    }
}

/// マシン構成
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    #[serde(default)]
    pub video: VideoStandard,
    /// 音声合成を行うか（無効でもLFSRとタイマーは動く）
    #[serde(default = "default_true")]
    pub audio_enabled: bool,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// H: デバイスのフックを入れるか
    #[serde(default = "default_true")]
    pub h_device: bool,
}

fn default_true() -> bool { true }
fn default_sample_rate() -> u32 { 44100 }

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            video: VideoStandard::Ntsc,
            audio_enabled: true,
            sample_rate: default_sample_rate(),
            h_device: true,
        }
    }
}

/// エミュレータ設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// A8RSホームディレクトリ（相対パスの基準）
    /// 空または未設定の場合は実行ファイルのディレクトリを使用
    #[serde(default)]
    pub a8rs_home: String,
    /// OS ROM (16KB)
    #[serde(default = "default_os_rom")]
    pub os_rom: String,
    /// BASIC ROM (8KB)。なければBASICなし
    #[serde(default)]
    pub basic_rom: Option<String>,
    /// 起動時にD1:から順にマウントするディスク
    #[serde(default)]
    pub disks: Vec<String>,
    /// H: の内容を読み込むディレクトリ
    #[serde(default)]
    pub h_dir: Option<String>,
    /// スクリーンショットディレクトリ
    #[serde(default = "default_screenshot_dir")]
    pub screenshot_dir: String,
    #[serde(default)]
    pub machine: MachineConfig,
}

fn default_os_rom() -> String { "roms/atarixl.rom".to_string() }
fn default_screenshot_dir() -> String { "screenshots".to_string() }

impl Default for Config {
    fn default() -> Self {
        Config {
            a8rs_home: String::new(),
            os_rom: default_os_rom(),
            basic_rom: None,
            disks: Vec::new(),
            h_dir: None,
            screenshot_dir: default_screenshot_dir(),
            machine: MachineConfig::default(),
        }
    }
}

impl Config {
    /// 設定ファイルを読み込む（実行ファイルと同じディレクトリから）
    pub fn load() -> Self {
        Self::load_from(get_config_path())
    }

    /// 指定したパスから設定を読み込む
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("Failed to parse config {:?}: {}, using defaults", path.as_ref(), e);
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        }
    }

    /// 設定ファイルを保存する（実行ファイルと同じディレクトリに）
    pub fn save(&self) -> Result<(), String> {
        self.save_to(get_config_path())
    }

    /// 指定したパスに設定を保存する
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;
        fs::write(path, json)
            .map_err(|e| format!("Failed to write config: {}", e))?;
        Ok(())
    }

    /// 相対パスをa8rs_homeからの絶対パスに解決
    pub fn resolve_path(&self, relative: &str) -> PathBuf {
        resolve_path_with_base(&self.a8rs_home, relative)
    }

    /// スクリーンショットディレクトリの絶対パスを取得
    pub fn screenshot_dir_path(&self) -> PathBuf {
        self.resolve_path(&self.screenshot_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: Config = serde_json::from_str(r#"{ "os_rom": "os.rom" }"#).unwrap();
        assert_eq!(config.os_rom, "os.rom");
        assert_eq!(config.machine, MachineConfig::default());
        assert!(config.disks.is_empty());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = std::env::temp_dir().join(format!("a8rs_config_test_{}.json", std::process::id()));
        let mut config = Config::default();
        config.disks.push("dos.atr".to_string());
        config.machine.video = VideoStandard::Pal;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path);
        assert_eq!(loaded.disks, vec!["dos.atr".to_string()]);
        assert_eq!(loaded.machine.video, VideoStandard::Pal);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_unparsable_file_falls_back() {
        let path = std::env::temp_dir().join(format!("a8rs_config_bad_{}.json", std::process::id()));
        fs::write(&path, "{ not json").unwrap();
        let config = Config::load_from(&path);
        assert_eq!(config.os_rom, default_os_rom());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_video_standard() {
        assert_eq!("PAL".parse::<VideoStandard>().unwrap(), VideoStandard::Pal);
        assert!("secam".parse::<VideoStandard>().is_err());
        assert_eq!(VideoStandard::Ntsc.lines_per_frame(), 262);
        assert_eq!(serde_json::to_string(&VideoStandard::Pal).unwrap(), "\"pal\"");
    }
}
