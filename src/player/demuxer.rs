use crate::core::{MediaInfo, MediaPacket, PlayerError, Result, StreamInfo, StreamKind};
use crate::player::demuxer_source::DemuxerSource;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{format, media};
use log::{debug, info};

/// 解封装器 - 负责读取媒体文件并分离音视频流
pub struct Demuxer {
    input_ctx: format::context::Input,
    streams: Vec<StreamInfo>,
    video_stream_index: Option<usize>,
    audio_stream_index: Option<usize>,
    media_info: MediaInfo,  // 缓存媒体信息
    source_path: String,    // 媒体源路径（用于描述）
}

impl Demuxer {
    /// 打开媒体文件
    ///
    /// 只负责打开和发现流；缺少视频/音频流由调用者决定是否致命。
    pub fn open(path: &str) -> Result<Self> {
        info!("正在打开文件: {}", path);

        let input_ctx = format::input(&path)
            .map_err(|e| PlayerError::OpenError(format!("{}: {}", path, e)))?;

        let streams: Vec<StreamInfo> = input_ctx
            .streams()
            .map(|s| {
                let parameters = s.parameters();
                let kind = match parameters.medium() {
                    media::Type::Video => StreamKind::Video,
                    media::Type::Audio => StreamKind::Audio,
                    media::Type::Subtitle => StreamKind::Subtitle,
                    _ => StreamKind::Other,
                };
                StreamInfo {
                    index: s.index(),
                    kind,
                    codec_name: parameters.id().name().to_string(),
                }
            })
            .collect();

        // 查找视频流和音频流
        let video_stream_index = input_ctx
            .streams()
            .best(media::Type::Video)
            .map(|s| s.index());

        let audio_stream_index = input_ctx
            .streams()
            .best(media::Type::Audio)
            .map(|s| s.index());

        debug!("视频流索引: {:?}", video_stream_index);
        debug!("音频流索引: {:?}", audio_stream_index);

        let mut demuxer = Self {
            input_ctx,
            streams,
            video_stream_index,
            audio_stream_index,
            media_info: MediaInfo::default(),  // 临时默认值
            source_path: path.to_string(),
        };

        // 获取并缓存媒体信息
        demuxer.media_info = demuxer.extract_media_info()?;

        Ok(demuxer)
    }

    /// 提取媒体信息（内部使用）
    fn extract_media_info(&self) -> Result<MediaInfo> {
        let mut info = MediaInfo {
            duration: self.input_ctx.duration() / 1000, // 微秒转毫秒
            ..MediaInfo::default()
        };

        if let Some(video_stream) = self.video_stream() {
            let parameters = video_stream.parameters();
            info.video_codec = parameters.id().name().to_string();

            let decoder = ffmpeg::codec::context::Context::from_parameters(parameters)?;
            let video_decoder = decoder.decoder().video()?;
            info.width = video_decoder.width();
            info.height = video_decoder.height();

            let fps = video_stream.avg_frame_rate();
            if fps.denominator() != 0 {
                info.fps = fps.numerator() as f64 / fps.denominator() as f64;
            }
        }

        if let Some(audio_stream) = self.audio_stream() {
            let parameters = audio_stream.parameters();
            info.audio_codec = parameters.id().name().to_string();

            let decoder = ffmpeg::codec::context::Context::from_parameters(parameters)?;
            let audio_decoder = decoder.decoder().audio()?;
            info.sample_rate = audio_decoder.rate();
            info.channels = audio_decoder.channels();
        }

        Ok(info)
    }

    /// 获取视频流
    pub fn video_stream(&self) -> Option<format::stream::Stream> {
        self.video_stream_index
            .and_then(|idx| self.input_ctx.stream(idx))
    }

    /// 获取音频流
    pub fn audio_stream(&self) -> Option<format::stream::Stream> {
        self.audio_stream_index
            .and_then(|idx| self.input_ctx.stream(idx))
    }

    /// 打印格式信息到日志（对应 av_dump_format）
    pub fn dump_format(&self) {
        let info = &self.media_info;
        info!(
            "📄 {}: 时长 {}ms, 视频 {} {}x{} @ {:.2}fps, 音频 {} {}Hz {}ch, 共 {} 个流",
            self.source_path,
            info.duration,
            info.video_codec,
            info.width,
            info.height,
            info.fps,
            info.audio_codec,
            info.sample_rate,
            info.channels,
            self.streams.len()
        );
    }
}

// 实现 DemuxerSource trait
impl DemuxerSource for Demuxer {
    fn read_packet(&mut self) -> Result<Option<MediaPacket>> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input_ctx) {
            Ok(()) => Ok(Some(MediaPacket {
                stream_index: packet.stream(),
                data: packet.data().map(|d| d.to_vec()).unwrap_or_default(),
                pts: packet.pts(),
                dts: packet.dts(),
                duration: packet.duration(),
                is_key: packet.is_key(),
            })),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(PlayerError::ReadError(e.to_string())),
        }
    }

    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn get_media_info(&self) -> &MediaInfo {
        &self.media_info
    }

    fn video_stream_index(&self) -> Option<usize> {
        self.video_stream_index
    }

    fn audio_stream_index(&self) -> Option<usize> {
        self.audio_stream_index
    }

    fn description(&self) -> String {
        format!("FFmpeg Demuxer: {}", self.source_path)
    }
}
