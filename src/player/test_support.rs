//! 单元测试用的合成组件：脚本化解封装源、直通/定长解码器、记录型 presenter

use crate::core::{MediaPacket, MediaInfo, PlayerError, Result, StreamInfo, StreamKind};
use crate::player::decoder::PacketDecoder;
use crate::player::demuxer_source::DemuxerSource;
use crate::player::presenter::FramePresenter;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// 把包负载原样作为一帧 PCM 输出
pub struct PassThroughDecoder;

impl PacketDecoder for PassThroughDecoder {
    type Frame = Vec<u8>;

    fn decode(&mut self, packet: &MediaPacket) -> Result<Vec<Vec<u8>>> {
        Ok(vec![packet.data.clone()])
    }
}

/// 每个包输出 `frames` 个 `frame_size` 字节的帧，内容为包的第一个字节
pub struct FixedFrameDecoder {
    frame_size: usize,
    frames: usize,
}

impl FixedFrameDecoder {
    pub fn new(frame_size: usize, frames: usize) -> Self {
        Self { frame_size, frames }
    }
}

impl PacketDecoder for FixedFrameDecoder {
    type Frame = Vec<u8>;

    fn decode(&mut self, packet: &MediaPacket) -> Result<Vec<Vec<u8>>> {
        let fill = packet.data.first().copied().unwrap_or(0);
        Ok((0..self.frames).map(|_| vec![fill; self.frame_size]).collect())
    }
}

/// 包负载第一个字节在 `bad` 中时解码失败，否则交给内部解码器
pub struct FailingOn<D> {
    inner: D,
    bad: Vec<u8>,
}

impl<D> FailingOn<D> {
    pub fn new(inner: D, bad: &[u8]) -> Self {
        Self {
            inner,
            bad: bad.to_vec(),
        }
    }
}

impl<D: PacketDecoder> PacketDecoder for FailingOn<D> {
    type Frame = D::Frame;

    fn decode(&mut self, packet: &MediaPacket) -> Result<Vec<D::Frame>> {
        match packet.data.first() {
            Some(b) if self.bad.contains(b) => {
                Err(PlayerError::DecodeError(format!("corrupt packet {}", b)))
            }
            _ => self.inner.decode(packet),
        }
    }

    fn flush(&mut self) -> Result<Vec<D::Frame>> {
        self.inner.flush()
    }
}

/// 视频解码器替身：每个包输出一帧（负载第一个字节），flush 时输出预设的帧
pub struct TagVideoDecoder {
    pub flushed: Vec<u8>,
}

impl PacketDecoder for TagVideoDecoder {
    type Frame = u8;

    fn decode(&mut self, packet: &MediaPacket) -> Result<Vec<u8>> {
        Ok(packet.data.first().copied().into_iter().collect())
    }

    fn flush(&mut self) -> Result<Vec<u8>> {
        Ok(std::mem::take(&mut self.flushed))
    }
}

/// 记录所有 present 的帧
#[derive(Clone, Default)]
pub struct RecordingPresenter {
    pub frames: Arc<Mutex<Vec<u8>>>,
}

impl FramePresenter<u8> for RecordingPresenter {
    fn present(&mut self, frame: u8) -> Result<()> {
        self.frames.lock().push(frame);
        Ok(())
    }
}

/// 按脚本返回包的解封装源
pub enum Scripted {
    Packet(MediaPacket),
    Error(String),
}

pub struct ScriptedSource {
    script: VecDeque<Scripted>,
    streams: Vec<StreamInfo>,
    media_info: MediaInfo,
}

impl ScriptedSource {
    /// 流 0 为视频，流 1 为音频，流 2 为字幕
    pub fn new(script: Vec<Scripted>) -> Self {
        let stream = |index, kind| StreamInfo {
            index,
            kind,
            codec_name: "synthetic".to_string(),
        };
        Self {
            script: script.into(),
            streams: vec![
                stream(0, StreamKind::Video),
                stream(1, StreamKind::Audio),
                stream(2, StreamKind::Subtitle),
            ],
            media_info: MediaInfo::default(),
        }
    }

    pub fn packets(packets: Vec<MediaPacket>) -> Self {
        Self::new(packets.into_iter().map(Scripted::Packet).collect())
    }
}

impl DemuxerSource for ScriptedSource {
    fn read_packet(&mut self) -> Result<Option<MediaPacket>> {
        match self.script.pop_front() {
            Some(Scripted::Packet(packet)) => Ok(Some(packet)),
            Some(Scripted::Error(message)) => Err(PlayerError::ReadError(message)),
            None => Ok(None),
        }
    }

    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn get_media_info(&self) -> &MediaInfo {
        &self.media_info
    }

    fn video_stream_index(&self) -> Option<usize> {
        Some(0)
    }

    fn audio_stream_index(&self) -> Option<usize> {
        Some(1)
    }

    fn description(&self) -> String {
        "scripted source".to_string()
    }
}
