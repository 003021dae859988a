use crate::core::{PlayerError, Result, SampleFormat};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 指定配置文件路径的环境变量
pub const CONFIG_ENV: &str = "MYY_AVPLAY_CONFIG";

/// 播放器配置（JSON），所有字段都有默认值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub audio_queue: AudioQueueConfig,
    pub audio: AudioConfig,
    pub playback: PlaybackConfig,
}

/// 音频包队列满时生产者的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// 阻塞等待消费者腾出空间（背压）
    #[default]
    Block,
    /// 立即拒绝，包交还给调用者
    Reject,
}

/// 音频队列容量，默认不设上限：Dispatcher 永远不会因为音频背压而停下
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioQueueConfig {
    pub max_packets: Option<usize>,
    pub max_bytes: Option<usize>,
    pub overflow: OverflowPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub samples_per_callback: u32,
    pub sample_format: SampleFormat,
    /// 音频回调等待数据的最长时间；None 表示一直等到有数据或退出
    pub underrun_wait_ms: Option<u64>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            samples_per_callback: 1024,
            sample_format: SampleFormat::F32,
            underrun_wait_ms: Some(250),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// 不创建窗口，只解码播放
    pub headless: bool,
    /// 文件读完后等待音频队列播放完毕再退出
    pub drain_audio_on_eos: bool,
    pub drain_timeout_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            headless: false,
            drain_audio_on_eos: true,
            drain_timeout_ms: 5000,
        }
    }
}

impl PlayerConfig {
    /// 从环境变量指定的文件加载；未设置时使用默认配置
    pub fn load() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        info!("📄 读取配置文件: {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| PlayerError::ConfigError(format!("配置文件格式错误: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config = PlayerConfig::from_json("{}").unwrap();
        assert_eq!(config, PlayerConfig::default());
        assert_eq!(config.audio_queue.max_packets, None);
        assert_eq!(config.audio_queue.max_bytes, None);
        assert_eq!(config.audio.samples_per_callback, 1024);
        assert_eq!(config.audio.underrun_wait_ms, Some(250));
        assert!(!config.playback.headless);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = PlayerConfig::from_json(
            r#"{
                "audio_queue": { "overflow": "reject", "max_packets": 150 },
                "audio": { "sample_format": "i16", "underrun_wait_ms": null },
                "playback": { "headless": true }
            }"#,
        )
        .unwrap();

        assert_eq!(config.audio_queue.overflow, OverflowPolicy::Reject);
        assert_eq!(config.audio_queue.max_packets, Some(150));
        assert_eq!(config.audio_queue.max_bytes, None);
        assert_eq!(config.audio.sample_format, SampleFormat::I16);
        assert_eq!(config.audio.underrun_wait_ms, None);
        assert!(config.playback.headless);
        assert!(config.playback.drain_audio_on_eos);
    }

    #[test]
    fn malformed_json_is_config_error() {
        let err = PlayerConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, PlayerError::ConfigError(_)));
    }
}
