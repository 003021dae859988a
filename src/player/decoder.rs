use crate::core::{AudioSpec, MediaPacket, PlayerError, Result, SampleFormat};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, software, util};
use log::{debug, info};

/// 解码能力：一个包 → 0~n 个原始帧
///
/// 单个包解码失败只影响这个包，调用者丢弃它继续下一个。
pub trait PacketDecoder: Send {
    type Frame;

    fn decode(&mut self, packet: &MediaPacket) -> Result<Vec<Self::Frame>>;

    /// 刷新解码器（获取缓冲的帧）
    fn flush(&mut self) -> Result<Vec<Self::Frame>> {
        Ok(Vec::new())
    }
}

/// 打开流对应的解码器上下文，找不到解码器时返回 UnsupportedCodec
fn open_context(stream: &format::stream::Stream) -> Result<codec::context::Context> {
    let parameters = stream.parameters();
    let codec_id = parameters.id();
    if codec::decoder::find(codec_id).is_none() {
        return Err(PlayerError::UnsupportedCodec(format!("{:?}", codec_id)));
    }
    Ok(codec::context::Context::from_parameters(parameters)?)
}

/// 把 MediaPacket 还原为 FFmpeg 包
fn to_ffmpeg_packet(packet: &MediaPacket) -> ffmpeg::Packet {
    let mut av_packet = ffmpeg::Packet::copy(&packet.data);
    av_packet.set_stream(packet.stream_index);
    av_packet.set_pts(packet.pts);
    av_packet.set_dts(packet.dts);
    av_packet.set_duration(packet.duration);
    if packet.is_key {
        av_packet.set_flags(codec::packet::Flags::KEY);
    }
    av_packet
}

/// 发送包；解码器已处于 EOF 时先 flush 再忽略本次包
fn send(decoder: &mut codec::decoder::Opened, packet: &ffmpeg::Packet, kind: &str) -> Result<bool> {
    match decoder.send_packet(packet) {
        Ok(()) => Ok(true),
        Err(ffmpeg::Error::Eof) => {
            debug!("{}解码器收到 EOF（send_packet），执行 flush 并忽略本次包", kind);
            decoder.flush();
            Ok(false)
        }
        Err(e) => Err(PlayerError::DecodeError(format!("{}解码失败: {}", kind, e))),
    }
}

/// 视频解码器（软件解码），输出 FFmpeg 原始帧，缩放交给 presenter
pub struct FfmpegVideoDecoder {
    decoder: codec::decoder::Video,
}

impl FfmpegVideoDecoder {
    pub fn open(stream: &format::stream::Stream) -> Result<Self> {
        let decoder = open_context(stream)?.decoder().video()?;

        info!(
            "🎞 视频解码器: {}x{}, 格式: {:?}",
            decoder.width(),
            decoder.height(),
            decoder.format()
        );

        Ok(Self { decoder })
    }

    fn receive_all(&mut self, frames: &mut Vec<util::frame::Video>) -> Result<()> {
        loop {
            let mut decoded_frame = util::frame::Video::empty();
            match self.decoder.receive_frame(&mut decoded_frame) {
                Ok(()) => frames.push(decoded_frame),
                Err(ffmpeg::Error::Other { errno: 11 }) => return Ok(()), // EAGAIN
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) => return Err(PlayerError::DecodeError(format!("视频解码失败: {}", e))),
            }
        }
    }
}

impl PacketDecoder for FfmpegVideoDecoder {
    type Frame = util::frame::Video;

    fn decode(&mut self, packet: &MediaPacket) -> Result<Vec<Self::Frame>> {
        let mut frames = Vec::new();
        if send(&mut self.decoder, &to_ffmpeg_packet(packet), "视频")? {
            self.receive_all(&mut frames)?;
        }
        Ok(frames)
    }

    fn flush(&mut self) -> Result<Vec<Self::Frame>> {
        let mut frames = Vec::new();
        self.decoder.send_eof()?;
        // flush 阶段的错误只意味着没有更多帧，已取到的帧照常返回
        if let Err(e) = self.receive_all(&mut frames) {
            debug!("视频解码器 flush 结束: {}（已取出 {} 帧）", e, frames.len());
        }
        self.decoder.flush();
        Ok(frames)
    }
}

/// 音频解码器：解码并重采样为设备协商的 PCM 格式，输出交错字节
pub struct FfmpegAudioDecoder {
    decoder: codec::decoder::Audio,
    resampler: Option<software::resampling::Context>,
    target: AudioSpec,
}

// SwrContext 不是 Send，但解码器创建后整体移入音频回调，只在设备线程中使用
unsafe impl Send for FfmpegAudioDecoder {}

impl FfmpegAudioDecoder {
    pub fn open(stream: &format::stream::Stream, target: AudioSpec) -> Result<Self> {
        let decoder = open_context(stream)?.decoder().audio()?;

        info!(
            "🔊 音频解码器: {} Hz, {} 声道, 格式: {:?} → 目标: {} Hz, {} 声道, {:?}",
            decoder.rate(),
            decoder.channels(),
            decoder.format(),
            target.sample_rate,
            target.channels,
            target.format
        );

        Ok(Self {
            decoder,
            resampler: None,
            target,
        })
    }

    fn target_sample(&self) -> util::format::Sample {
        match self.target.format {
            SampleFormat::F32 => util::format::Sample::F32(util::format::sample::Type::Packed),
            SampleFormat::I16 => util::format::Sample::I16(util::format::sample::Type::Packed),
        }
    }

    fn target_layout(&self) -> util::channel_layout::ChannelLayout {
        match self.target.channels {
            1 => util::channel_layout::ChannelLayout::MONO,
            2 => util::channel_layout::ChannelLayout::STEREO,
            6 => util::channel_layout::ChannelLayout::_5POINT1,
            n => util::channel_layout::ChannelLayout::default(n as i32),
        }
    }

    /// 重采样一帧，返回交错 PCM 字节
    fn convert_frame(&mut self, frame: &util::frame::Audio) -> Result<Vec<u8>> {
        if self.resampler.is_none() {
            // 部分编码器不填写声道布局，按声道数推断
            let source_layout = if frame.channel_layout().is_empty() {
                util::channel_layout::ChannelLayout::default(frame.channels() as i32)
            } else {
                frame.channel_layout()
            };

            debug!(
                "🔧 初始化音频重采样器: {}Hz/{}ch → {}Hz/{}ch",
                frame.rate(),
                frame.channels(),
                self.target.sample_rate,
                self.target.channels
            );

            self.resampler = Some(software::resampling::Context::get(
                frame.format(),
                source_layout,
                frame.rate(),
                self.target_sample(),
                self.target_layout(),
                self.target.sample_rate,
            )?);
        }

        let mut resampled = util::frame::Audio::empty();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.run(frame, &mut resampled)?;
        }

        // 平面数据可能带对齐填充，只取有效部分
        let len = resampled.samples() * self.target.frame_bytes();
        let data = resampled.data(0);
        Ok(data[..len.min(data.len())].to_vec())
    }

    fn receive_all(&mut self, frames: &mut Vec<Vec<u8>>) -> Result<()> {
        loop {
            let mut decoded_frame = util::frame::Audio::empty();
            match self.decoder.receive_frame(&mut decoded_frame) {
                Ok(()) => frames.push(self.convert_frame(&decoded_frame)?),
                Err(ffmpeg::Error::Other { errno: 11 }) => return Ok(()), // EAGAIN
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) => return Err(PlayerError::DecodeError(format!("音频解码失败: {}", e))),
            }
        }
    }
}

impl PacketDecoder for FfmpegAudioDecoder {
    type Frame = Vec<u8>;

    fn decode(&mut self, packet: &MediaPacket) -> Result<Vec<Self::Frame>> {
        let mut frames = Vec::new();
        if send(&mut self.decoder, &to_ffmpeg_packet(packet), "音频")? {
            self.receive_all(&mut frames)?;
        }
        Ok(frames)
    }

    fn flush(&mut self) -> Result<Vec<Self::Frame>> {
        let mut frames = Vec::new();
        self.decoder.send_eof()?;
        if let Err(e) = self.receive_all(&mut frames) {
            debug!("音频解码器 flush 结束: {}（已取出 {} 帧）", e, frames.len());
        }
        self.decoder.flush();
        Ok(frames)
    }
}
