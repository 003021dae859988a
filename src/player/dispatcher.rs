use crate::core::{MediaPacket, Result, ShutdownSignal};
use crate::player::decoder::PacketDecoder;
use crate::player::demuxer_source::DemuxerSource;
use crate::player::packet_queue::{PacketQueue, PushError};
use crate::player::presenter::FramePresenter;
use crossbeam_channel::{Receiver, TryRecvError};
use log::{error, info, warn};
use std::process;
use std::sync::Arc;
use std::thread;

pub(crate) fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

// 高频事件只记录前几次，之后每 100 次记录一次
const LOG_FIRST_N: u64 = 5;

fn should_log(count: u64) -> bool {
    count <= LOG_FIRST_N || count % 100 == 0
}

/// 发给 Dispatcher 的命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerCommand {
    Quit,
}

/// Dispatcher 循环结束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    EndOfStream,
    Quit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub packets_read: u64,
    pub video_packets: u64,
    pub frames_presented: u64,
    pub video_decode_errors: u64,
    pub audio_queued: u64,
    pub audio_dropped: u64,
    pub other_dropped: u64,
}

/// 解封装分发循环
///
/// 在单个线程上读包：视频包就地同步解码并呈现，音频包推入音频队列，
/// 其他流的包直接释放。每轮循环检查一次退出请求。
pub struct Dispatcher<V, P> {
    source: Box<dyn DemuxerSource>,
    video_decoder: V,
    presenter: P,
    video_stream_index: Option<usize>,
    audio_stream_index: Option<usize>,
    audio_queue: Arc<PacketQueue>,
    shutdown: ShutdownSignal,
    command_rx: Receiver<PlayerCommand>,
    stats: DispatchStats,
}

impl<V, P> Dispatcher<V, P>
where
    V: PacketDecoder,
    P: FramePresenter<V::Frame>,
{
    pub fn new(
        source: Box<dyn DemuxerSource>,
        video_decoder: V,
        presenter: P,
        audio_queue: Arc<PacketQueue>,
        shutdown: ShutdownSignal,
        command_rx: Receiver<PlayerCommand>,
    ) -> Self {
        let video_stream_index = source.video_stream_index();
        let audio_stream_index = source.audio_stream_index();
        Self {
            source,
            video_decoder,
            presenter,
            video_stream_index,
            audio_stream_index,
            audio_queue,
            shutdown,
            command_rx,
            stats: DispatchStats::default(),
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// 运行分发循环直到文件结束、读取错误或退出请求
    ///
    /// 读取错误直接返回，不重试；由调用者触发退出。
    pub fn run(&mut self) -> Result<DispatchOutcome> {
        info!("{} 🎬 Dispatcher 启动: {}", log_ctx(), self.source.description());
        for stream in self.source.streams() {
            let role = if Some(stream.index) == self.video_stream_index {
                "解码并呈现"
            } else if Some(stream.index) == self.audio_stream_index {
                "送入音频队列"
            } else {
                "丢弃"
            };
            info!(
                "{}   流 #{}: {:?} ({}) → {}",
                log_ctx(),
                stream.index,
                stream.kind,
                stream.codec_name,
                role
            );
        }

        let result = self.dispatch_loop();

        let stats = self.stats;
        match &result {
            Ok(outcome) => info!(
                "{} 🛑 Dispatcher 退出（{:?}）: 共读取 {} 个包，视频 {} / 呈现 {} 帧 / 解码错误 {}，音频入队 {} / 丢弃 {}，其他丢弃 {}",
                log_ctx(),
                outcome,
                stats.packets_read,
                stats.video_packets,
                stats.frames_presented,
                stats.video_decode_errors,
                stats.audio_queued,
                stats.audio_dropped,
                stats.other_dropped
            ),
            Err(e) => error!("{} ❌ Dispatcher 因读取错误退出: {}", log_ctx(), e),
        }
        result
    }

    fn dispatch_loop(&mut self) -> Result<DispatchOutcome> {
        loop {
            if self.quit_requested() {
                return Ok(self.quit());
            }

            let packet = match self.source.read_packet()? {
                Some(packet) => packet,
                None => {
                    info!("{} 📄 Dispatcher 到达文件末尾", log_ctx());
                    self.flush_video();
                    return Ok(DispatchOutcome::EndOfStream);
                }
            };
            self.stats.packets_read += 1;

            if Some(packet.stream_index) == self.video_stream_index {
                self.handle_video(packet);
            } else if Some(packet.stream_index) == self.audio_stream_index {
                if let Err(PushError::ShutDown(_)) = self.enqueue_audio(packet) {
                    info!("{} ⏹ 音频队列已关闭，Dispatcher 停止", log_ctx());
                    return Ok(self.quit());
                }
            } else {
                // 未使用的流，直接释放
                self.stats.other_dropped += 1;
            }
        }
    }

    /// 非阻塞地检查退出请求
    fn quit_requested(&self) -> bool {
        if self.shutdown.is_triggered() {
            return true;
        }
        match self.command_rx.try_recv() {
            Ok(PlayerCommand::Quit) => {
                info!("{} ⏹ Dispatcher 收到退出命令", log_ctx());
                true
            }
            // 命令发送端全部关闭只表示不会再有命令
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => false,
        }
    }

    fn quit(&self) -> DispatchOutcome {
        self.shutdown.trigger();
        self.audio_queue.shutdown();
        DispatchOutcome::Quit
    }

    fn handle_video(&mut self, packet: MediaPacket) {
        self.stats.video_packets += 1;
        match self.video_decoder.decode(&packet) {
            Ok(frames) => self.present_all(frames),
            Err(e) => {
                // 单个视频包解码失败不影响后续播放
                self.stats.video_decode_errors += 1;
                if should_log(self.stats.video_decode_errors) {
                    warn!("{} ⚠️ 视频包解码失败（已跳过）: {}", log_ctx(), e);
                }
            }
        }
    }

    fn present_all(&mut self, frames: Vec<V::Frame>) {
        for frame in frames {
            match self.presenter.present(frame) {
                Ok(()) => self.stats.frames_presented += 1,
                Err(e) => warn!("{} ⚠️ 视频帧呈现失败: {}", log_ctx(), e),
            }
        }
    }

    fn flush_video(&mut self) {
        match self.video_decoder.flush() {
            Ok(frames) => self.present_all(frames),
            Err(e) => warn!("{} ⚠️ 刷新视频解码器失败: {}", log_ctx(), e),
        }
    }

    fn enqueue_audio(&mut self, packet: MediaPacket) -> std::result::Result<(), PushError> {
        match self.audio_queue.push(packet) {
            Ok(()) => {
                self.stats.audio_queued += 1;
                if should_log(self.stats.audio_queued) {
                    info!(
                        "{} 🔊 音频包入队 #{}（队列 {} 个包）",
                        log_ctx(),
                        self.stats.audio_queued,
                        self.audio_queue.len()
                    );
                }
                Ok(())
            }
            Err(PushError::Full(_)) => {
                self.stats.audio_dropped += 1;
                if should_log(self.stats.audio_dropped) {
                    warn!(
                        "{} ⚠️ 音频队列已满，丢弃音频包（累计 {}）",
                        log_ctx(),
                        self.stats.audio_dropped
                    );
                }
                Ok(())
            }
            Err(PushError::Allocation(_)) => {
                self.stats.audio_dropped += 1;
                error!("{} ❌ 音频队列无法分配空间，丢弃音频包", log_ctx());
                Ok(())
            }
            Err(e @ PushError::ShutDown(_)) => Err(e),
        }
    }
}
