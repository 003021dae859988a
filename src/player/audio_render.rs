use crate::core::{AudioConfig, ShutdownSignal};
use crate::player::decoder::PacketDecoder;
use crate::player::packet_queue::{PacketQueue, PopResult};
use log::{info, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// 音频回调等待数据包的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnderrunWait {
    /// 一直等到有数据或退出
    Indefinite,
    /// 最多等待这么久，超时后本次回调输出静音
    Bounded(Duration),
}

impl From<&AudioConfig> for UnderrunWait {
    fn from(config: &AudioConfig) -> Self {
        match config.underrun_wait_ms {
            Some(ms) => UnderrunWait::Bounded(Duration::from_millis(ms)),
            None => UnderrunWait::Indefinite,
        }
    }
}

/// 状态机当前所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    AwaitingPacket,
    Decoding,
    DrainingBuffer,
    ShutDown,
}

/// 一次 fill 的结果，目标缓冲区总是被完整写满（数据 + 静音）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStatus {
    Complete,
    /// 等待数据超时，`written` 之后为静音
    Underrun { written: usize },
    /// 已退出，`written` 之后为静音，之后的调用都输出静音
    ShutDown { written: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub packets_decoded: u64,
    pub decode_errors: u64,
    pub underruns: u64,
    pub bytes_rendered: u64,
}

/// 拉取式数据源：音频设备在自己的线程上按需调用
pub trait PullSource: Send + 'static {
    fn fill(&mut self, dst: &mut [u8]) -> FillStatus;
}

enum NextFrame {
    Ready,
    Underrun,
    ShutDown,
}

/// 拉取式音频渲染
///
/// 每次 `fill` 都从音频包队列按需取包解码，直到写满目标缓冲区。
/// 一个解码帧的大小很少刚好等于请求大小，剩余部分保存在
/// `current[offset..]`，留给下一次调用。
///
/// 状态只被音频回调线程访问，不需要加锁。
pub struct AudioRenderSource<D> {
    queue: Arc<PacketQueue>,
    decoder: D,
    shutdown: ShutdownSignal,
    wait: UnderrunWait,

    /// 正在输出的解码帧
    current: Vec<u8>,
    /// `current` 中已经输出的字节数
    offset: usize,
    /// 当前包解码出的、尚未开始输出的帧
    remainder: VecDeque<Vec<u8>>,

    state: RenderState,
    stats: RenderStats,
}

impl<D> AudioRenderSource<D>
where
    D: PacketDecoder<Frame = Vec<u8>>,
{
    pub fn new(
        queue: Arc<PacketQueue>,
        decoder: D,
        shutdown: ShutdownSignal,
        wait: UnderrunWait,
    ) -> Self {
        Self {
            queue,
            decoder,
            shutdown,
            wait,
            current: Vec::new(),
            offset: 0,
            remainder: VecDeque::new(),
            state: RenderState::AwaitingPacket,
            stats: RenderStats::default(),
        }
    }

    /// 写满 `dst`
    ///
    /// 已退出或等待超时时，剩余部分填充 0（静音）。退出前已经写入的数据保持有效。
    pub fn fill(&mut self, dst: &mut [u8]) -> FillStatus {
        let mut written = 0;

        while written < dst.len() {
            if self.state == RenderState::ShutDown || self.shutdown.is_triggered() {
                return self.finish_shutdown(dst, written);
            }

            if self.offset < self.current.len() {
                let n = (self.current.len() - self.offset).min(dst.len() - written);
                dst[written..written + n]
                    .copy_from_slice(&self.current[self.offset..self.offset + n]);
                self.offset += n;
                written += n;
                self.stats.bytes_rendered += n as u64;
                if self.offset == self.current.len() {
                    self.state = RenderState::AwaitingPacket;
                    if self.remainder.is_empty() {
                        self.queue.mark_played();
                    }
                }
                continue;
            }

            match self.next_frame() {
                NextFrame::Ready => {}
                NextFrame::Underrun => {
                    self.stats.underruns += 1;
                    dst[written..].fill(0);
                    return FillStatus::Underrun { written };
                }
                NextFrame::ShutDown => return self.finish_shutdown(dst, written),
            }
        }

        FillStatus::Complete
    }

    /// 返回刚好 `len` 字节
    pub fn fill_len(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.fill(&mut buf);
        buf
    }

    /// 丢弃正在输出的数据和未输出的帧（重新开始一个流）
    pub fn reset(&mut self) {
        self.current.clear();
        self.offset = 0;
        self.remainder.clear();
        self.queue.mark_played();
        if self.state != RenderState::ShutDown {
            self.state = RenderState::AwaitingPacket;
        }
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// 当前帧还没输出的字节数
    pub fn buffered(&self) -> usize {
        self.current.len() - self.offset
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    /// 准备下一帧：先用当前包剩下的帧，用完再从队列取包解码
    fn next_frame(&mut self) -> NextFrame {
        loop {
            while let Some(frame) = self.remainder.pop_front() {
                if frame.is_empty() {
                    continue;
                }
                self.current = frame;
                self.offset = 0;
                self.state = RenderState::DrainingBuffer;
                return NextFrame::Ready;
            }

            if self.shutdown.is_triggered() {
                return NextFrame::ShutDown;
            }

            // 取走的包已经全部输出（或解码失败被丢弃）
            self.queue.mark_played();
            self.state = RenderState::AwaitingPacket;
            let result = match self.wait {
                UnderrunWait::Indefinite => self.queue.pop(true),
                UnderrunWait::Bounded(timeout) => self.queue.pop_timeout(timeout),
            };

            let packet = match result {
                PopResult::Packet(packet) => packet,
                PopResult::Empty => return NextFrame::Underrun,
                PopResult::ShutDown => return NextFrame::ShutDown,
            };

            self.state = RenderState::Decoding;
            match self.decoder.decode(&packet) {
                Ok(frames) => {
                    self.stats.packets_decoded += 1;
                    self.remainder.extend(frames);
                }
                Err(e) => {
                    // 丢弃这个包剩下的数据，继续下一个包
                    self.stats.decode_errors += 1;
                    self.remainder.clear();
                    if self.stats.decode_errors <= 5 || self.stats.decode_errors % 100 == 0 {
                        warn!("⚠️ 音频包解码失败（已跳过，第 {} 次）: {}", self.stats.decode_errors, e);
                    }
                }
            }
            // packet 在这里释放
        }
    }

    fn finish_shutdown(&mut self, dst: &mut [u8], written: usize) -> FillStatus {
        if self.state != RenderState::ShutDown {
            info!("🔇 音频渲染进入退出状态: {:?}", self.stats);
            self.state = RenderState::ShutDown;
            self.current.clear();
            self.offset = 0;
            self.remainder.clear();
        }
        dst[written..].fill(0);
        FillStatus::ShutDown { written }
    }
}

impl<D> PullSource for AudioRenderSource<D>
where
    D: PacketDecoder<Frame = Vec<u8>> + 'static,
{
    fn fill(&mut self, dst: &mut [u8]) -> FillStatus {
        AudioRenderSource::fill(self, dst)
    }
}
