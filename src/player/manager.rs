use crate::core::{MediaInfo, PlaybackConfig, PlayerConfig, PlayerError, Result, ShutdownSignal};
use crate::player::audio_output::AudioOutput;
use crate::player::audio_render::{AudioRenderSource, UnderrunWait};
use crate::player::decoder::{FfmpegAudioDecoder, FfmpegVideoDecoder, PacketDecoder};
use crate::player::demuxer::Demuxer;
use crate::player::demuxer_source::DemuxerSource;
use crate::player::dispatcher::{log_ctx, DispatchOutcome, Dispatcher, PlayerCommand};
use crate::player::packet_queue::{PacketQueue, QueueCapacity};
use crate::player::presenter::{FramePresenter, FrameSlot, ScalingPresenter};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{error, info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

type FfmpegDispatcher = Dispatcher<FfmpegVideoDecoder, ScalingPresenter>;

// 流里没有采样率时按 48kHz 打开设备
const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Dispatcher 线程及其共享状态的生命周期
///
/// 退出顺序：置位退出标志 → 关闭音频队列 → 等待 Dispatcher 线程。
pub(crate) struct DispatchSession {
    audio_queue: Arc<PacketQueue>,
    shutdown: ShutdownSignal,
    command_tx: Sender<PlayerCommand>,
    playback: PlaybackConfig,
    thread: Option<JoinHandle<Result<DispatchOutcome>>>,
    stopped: bool,
}

impl DispatchSession {
    pub(crate) fn new(
        audio_queue: Arc<PacketQueue>,
        shutdown: ShutdownSignal,
        playback: PlaybackConfig,
    ) -> (Self, Receiver<PlayerCommand>) {
        let (command_tx, command_rx) = unbounded();
        let session = Self {
            audio_queue,
            shutdown,
            command_tx,
            playback,
            thread: None,
            stopped: false,
        };
        (session, command_rx)
    }

    /// 在名为 `dispatcher` 的线程中运行分发循环
    pub(crate) fn start<V, P>(&mut self, mut dispatcher: Dispatcher<V, P>) -> Result<()>
    where
        V: PacketDecoder + 'static,
        P: FramePresenter<V::Frame> + 'static,
    {
        if self.thread.is_some() {
            return Err(PlayerError::Other("播放已经开始".to_string()));
        }
        let handle = thread::Builder::new()
            .name("dispatcher".to_string())
            .spawn(move || dispatcher.run())?;
        self.thread = Some(handle);
        Ok(())
    }

    /// 请求退出
    ///
    /// Dispatcher 在下一轮循环收到 Quit；同时关闭音频队列，
    /// 阻塞在满队列上的 push 和等待数据的音频回调都会立即返回。
    pub(crate) fn request_quit(&self) {
        if self.command_tx.send(PlayerCommand::Quit).is_err() {
            // Dispatcher 已经退出，接收端随之关闭
            info!("{} Dispatcher 已退出，忽略退出请求", log_ctx());
        }
        if self.shutdown.trigger() {
            info!("{} ⏹ 已请求退出", log_ctx());
        }
        self.audio_queue.shutdown();
    }

    pub(crate) fn is_started(&self) -> bool {
        self.thread.is_some()
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(false, |handle| handle.is_finished())
    }

    /// 用户关闭播放：Dispatcher 还在运行时请求退出，
    /// 已经读到文件末尾时不打断，让排队的音频播完
    pub(crate) fn finish(&mut self) -> Result<DispatchOutcome> {
        if !self.is_finished() {
            self.request_quit();
        }
        self.wait()
    }

    /// 等待 Dispatcher 结束并收尾
    ///
    /// 文件正常结束时按配置先等待音频播放完，再统一退出。
    pub(crate) fn wait(&mut self) -> Result<DispatchOutcome> {
        let result = match self.thread.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(PlayerError::Other("Dispatcher 线程 panic".to_string()))),
            None => Ok(DispatchOutcome::Quit),
        };

        if let Ok(DispatchOutcome::EndOfStream) = result {
            if self.playback.drain_audio_on_eos {
                let timeout = Duration::from_millis(self.playback.drain_timeout_ms);
                info!("{} ⏳ 等待音频播放完毕（最多 {:?}）", log_ctx(), timeout);
                if !self.audio_queue.wait_until_drained(timeout) {
                    warn!("{} ⚠️ 等待音频播放超时，剩余 {:?}", log_ctx(), self.audio_queue.stats());
                }
            }
        }

        self.stop();
        result
    }

    /// 停止（可重复调用）
    pub(crate) fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        info!("{} 🛑 停止播放，丢弃 {:?}", log_ctx(), self.audio_queue.stats());
        self.shutdown.trigger();
        self.audio_queue.shutdown();

        if let Some(handle) = self.thread.take() {
            match handle.join() {
                Ok(Ok(outcome)) => info!("{} Dispatcher 已结束: {:?}", log_ctx(), outcome),
                Ok(Err(e)) => error!("{} ❌ Dispatcher 错误: {}", log_ctx(), e),
                Err(_) => error!("{} ❌ Dispatcher 线程 panic", log_ctx()),
            }
        }
    }
}

/// 播放管理器
///
/// 负责打开文件、启动音频回调和 Dispatcher 线程，退出时先收尾 Dispatcher，
/// 再停止音频设备。
pub struct PlaybackManager {
    media_info: MediaInfo,
    frame_slot: FrameSlot,
    audio_output: AudioOutput,
    session: DispatchSession,
    dispatcher: Option<FfmpegDispatcher>,
    stopped: bool,
}

impl PlaybackManager {
    /// 打开媒体文件并启动音频输出
    ///
    /// 这里的错误都是致命的：文件打不开、缺少音视频流、不支持的编解码器、
    /// 音频设备打不开。
    pub fn open(path: &str, config: PlayerConfig) -> Result<Self> {
        info!("{} 📂 打开媒体: {}", log_ctx(), path);

        let demuxer = Demuxer::open(path)?;
        demuxer.dump_format();
        let media_info = demuxer.get_media_info().clone();

        // 流借用 demuxer，解码器创建完之后才能把 demuxer 移入 Dispatcher
        let (video_decoder, audio_decoder, mut audio_output, time_base) = {
            let video_stream = demuxer.video_stream().ok_or(PlayerError::NoVideoStream)?;
            let audio_stream = demuxer.audio_stream().ok_or(PlayerError::NoAudioStream)?;

            let video_decoder = FfmpegVideoDecoder::open(&video_stream)?;
            let time_base = video_stream.time_base();
            let time_base = time_base.numerator() as f64 / time_base.denominator().max(1) as f64;

            let sample_rate = if media_info.sample_rate > 0 {
                media_info.sample_rate
            } else {
                DEFAULT_SAMPLE_RATE
            };
            let channels = media_info.channels.max(1);
            let audio_output = AudioOutput::new(
                sample_rate,
                channels,
                config.audio.sample_format,
                config.audio.samples_per_callback,
            )?;
            let audio_decoder = FfmpegAudioDecoder::open(&audio_stream, audio_output.spec())?;

            (video_decoder, audio_decoder, audio_output, time_base)
        };

        let audio_queue = Arc::new(PacketQueue::with_capacity(QueueCapacity::from(
            &config.audio_queue,
        )));
        let shutdown = ShutdownSignal::new();
        let frame_slot = FrameSlot::new();

        // 音频设备立即开始拉取，队列为空时回调输出静音
        audio_output.start(AudioRenderSource::new(
            audio_queue.clone(),
            audio_decoder,
            shutdown.clone(),
            UnderrunWait::from(&config.audio),
        ))?;
        info!("{} 🔊 音频输出格式: {:?}", log_ctx(), audio_output.spec());

        let (session, command_rx) =
            DispatchSession::new(audio_queue.clone(), shutdown.clone(), config.playback);
        let dispatcher = Dispatcher::new(
            Box::new(demuxer),
            video_decoder,
            ScalingPresenter::new(frame_slot.clone(), time_base),
            audio_queue,
            shutdown,
            command_rx,
        );

        Ok(Self {
            media_info,
            frame_slot,
            audio_output,
            session,
            dispatcher: Some(dispatcher),
            stopped: false,
        })
    }

    /// 在独立线程中启动 Dispatcher
    pub fn play(&mut self) -> Result<()> {
        let dispatcher = self
            .dispatcher
            .take()
            .ok_or_else(|| PlayerError::Other("播放已经开始".to_string()))?;
        self.session.start(dispatcher)?;

        info!("{} ▶️ 开始播放", log_ctx());
        Ok(())
    }

    /// 请求退出（Esc/Q）
    pub fn request_quit(&self) {
        self.session.request_quit();
    }

    /// Dispatcher 线程是否已经结束（从未启动也视为结束）
    pub fn is_finished(&self) -> bool {
        if self.session.is_started() {
            self.session.is_finished()
        } else {
            self.dispatcher.is_none()
        }
    }

    /// 等待 Dispatcher 自然结束（文件末尾或读取错误）并收尾
    pub fn wait(&mut self) -> Result<DispatchOutcome> {
        let result = self.session.wait();
        self.stop();
        result
    }

    /// 窗口关闭时收尾：仍在播放就退出，已读完就等音频播完
    pub fn finish(&mut self) -> Result<DispatchOutcome> {
        let result = self.session.finish();
        self.stop();
        result
    }

    /// 停止播放（可重复调用）
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        self.session.stop();
        self.audio_output.stop();
    }

    pub fn media_info(&self) -> &MediaInfo {
        &self.media_info
    }

    pub fn frame_slot(&self) -> &FrameSlot {
        &self.frame_slot
    }
}

impl Drop for PlaybackManager {
    fn drop(&mut self) {
        if !self.stopped {
            warn!("{} ⚠ PlaybackManager 被 drop，但未调用 stop()，正在尝试优雅停止", log_ctx());
            self.stop();
        }
    }
}
