use crate::core::{AudioSpec, PlayerError, Result, SampleFormat};
use crate::player::audio_render::PullSource;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
use log::{debug, error, info, warn};

/// 音频输出 - 使用 cpal 播放音频
///
/// cpal 在自己的实时线程上调用数据回调，回调里只调用 `PullSource::fill`，
/// 把返回的字节原样交给设备。
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    format: SampleFormat,
    stream: Option<Stream>,
}

impl AudioOutput {
    /// 创建音频输出（支持非标准配置自动回退）
    pub fn new(
        sample_rate: u32,
        channels: u16,
        format: SampleFormat,
        samples: u32,
    ) -> Result<Self> {
        info!("初始化音频输出: {} Hz, {} 声道, {:?}, 每次回调 {} 帧", sample_rate, channels, format, samples);

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))?;

        debug!("使用音频设备: {}", device.name().unwrap_or_default());

        // 尝试使用请求的配置
        let requested = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let mut config = if Self::is_supported(&device, &requested, format)? {
            requested
        } else {
            warn!("⚠️  音频设备不支持 {} Hz, {} 声道配置，回退到标准配置", sample_rate, channels);
            Self::find_fallback(&device, format)?.ok_or_else(|| {
                PlayerError::AudioError(format!(
                    "音频设备不支持任何标准配置 (原请求: {} Hz, {} 声道)",
                    sample_rate, channels
                ))
            })?
        };
        config.buffer_size = Self::negotiate_buffer_size(&device, &config, format, samples)?;

        Ok(Self {
            device,
            config,
            format,
            stream: None,
        })
    }

    /// 按常见程度依次尝试标准配置
    fn find_fallback(device: &Device, format: SampleFormat) -> Result<Option<StreamConfig>> {
        let fallback_configs = [
            (48000, 2),  // 最常见
            (44100, 2),  // CD 音质
            (48000, 1),  // 单声道高质量
            (44100, 1),  // 单声道 CD 质量
        ];

        for (fb_rate, fb_channels) in fallback_configs {
            let fb_config = StreamConfig {
                channels: fb_channels,
                sample_rate: cpal::SampleRate(fb_rate),
                buffer_size: cpal::BufferSize::Default,
            };
            if Self::is_supported(device, &fb_config, format)? {
                info!("✅ 使用回退配置: {} Hz, {} 声道", fb_rate, fb_channels);
                return Ok(Some(fb_config));
            }
        }
        Ok(None)
    }

    /// 设备声明支持该回调大小时使用固定大小，否则交给设备决定
    fn negotiate_buffer_size(
        device: &Device,
        config: &StreamConfig,
        format: SampleFormat,
        samples: u32,
    ) -> Result<cpal::BufferSize> {
        if samples == 0 {
            return Ok(cpal::BufferSize::Default);
        }

        let supported_configs = device
            .supported_output_configs()
            .map_err(|e| PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e)))?;

        for supported_config in supported_configs {
            if !Self::is_config_compatible(config, format, &supported_config) {
                continue;
            }
            if let cpal::SupportedBufferSize::Range { min, max } = supported_config.buffer_size() {
                if (*min..=*max).contains(&samples) {
                    return Ok(cpal::BufferSize::Fixed(samples));
                }
            }
        }

        debug!("设备不支持固定回调大小 {}，使用默认值", samples);
        Ok(cpal::BufferSize::Default)
    }

    fn is_supported(device: &Device, config: &StreamConfig, format: SampleFormat) -> Result<bool> {
        let supported_configs = device
            .supported_output_configs()
            .map_err(|e| PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e)))?;

        for supported_config in supported_configs {
            if Self::is_config_compatible(config, format, &supported_config) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// 检查配置是否兼容
    fn is_config_compatible(
        config: &StreamConfig,
        format: SampleFormat,
        supported: &SupportedStreamConfigRange,
    ) -> bool {
        let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
            && config.sample_rate.0 <= supported.max_sample_rate().0;

        let channels_match = config.channels == supported.channels();

        let format_match = match format {
            SampleFormat::F32 => supported.sample_format() == cpal::SampleFormat::F32,
            SampleFormat::I16 => supported.sample_format() == cpal::SampleFormat::I16,
        };

        rate_in_range && channels_match && format_match
    }

    /// 协商后的实际输出格式，音频解码器按它重采样
    pub fn spec(&self) -> AudioSpec {
        AudioSpec {
            sample_rate: self.config.sample_rate.0,
            channels: self.config.channels,
            format: self.format,
        }
    }

    /// 开始播放：设备线程开始周期性地从 `source` 拉取数据
    pub fn start<S: PullSource>(&mut self, mut source: S) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        // 数据回调运行在设备的实时线程上：不打日志，fill 总是写满整个缓冲区，
        // 退出后输出静音
        let err_fn = |err: cpal::StreamError| error!("音频流错误: {}", err);

        let stream = match self.format {
            SampleFormat::F32 => self.device.build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    source.fill(bytemuck::cast_slice_mut(data));
                },
                err_fn,
                None,
            ),
            SampleFormat::I16 => self.device.build_output_stream(
                &self.config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    source.fill(bytemuck::cast_slice_mut(data));
                },
                err_fn,
                None,
            ),
        }
        .map_err(|e| PlayerError::AudioError(format!("创建音频流失败: {}", e)))?;

        stream
            .play()
            .map_err(|e| PlayerError::AudioError(format!("启动音频流失败: {}", e)))?;

        self.stream = Some(stream);
        info!("音频输出已启动，回调大小: {:?}", self.config.buffer_size);

        Ok(())
    }

    /// 停止播放
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!("音频输出已停止");
        }
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
