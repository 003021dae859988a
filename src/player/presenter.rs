use crate::core::{PixelFormat, Result, VideoFrame};
use ffmpeg_next::{software, util};
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 视频呈现：Dispatcher 在解码出完整帧后同步调用
pub trait FramePresenter<F>: Send {
    fn present(&mut self, frame: F) -> Result<()>;
}

/// 最新帧信箱
///
/// Dispatcher 线程写入，窗口线程读取；只保留最新一帧，旧帧直接覆盖。
#[derive(Clone, Default)]
pub struct FrameSlot {
    latest: Arc<Mutex<Option<VideoFrame>>>,
    sequence: Arc<AtomicU64>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: VideoFrame) {
        *self.latest.lock() = Some(frame);
        self.sequence.fetch_add(1, Ordering::Release);
    }

    /// 已发布的帧数，窗口据此判断是否有新帧
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// 取走最新帧（没有新帧时返回 None）
    pub fn take(&self) -> Option<VideoFrame> {
        self.latest.lock().take()
    }
}

/// 缩放 + 呈现：把解码帧转换为 RGBA 后发布到 FrameSlot
pub struct ScalingPresenter {
    scaler: Option<software::scaling::Context>,
    /// 当前 scaler 对应的输入尺寸和格式，变化时重建
    scaler_key: Option<(u32, u32, util::format::Pixel)>,
    time_base: f64,
    slot: FrameSlot,
}

// SwsContext 本身不是 Send，但 ScalingPresenter 创建后整体移入 Dispatcher 线程，
// 只在那一个线程中使用
unsafe impl Send for ScalingPresenter {}

impl ScalingPresenter {
    /// `time_base` 为视频流的时间基（秒）
    pub fn new(slot: FrameSlot, time_base: f64) -> Self {
        Self {
            scaler: None,
            scaler_key: None,
            time_base,
            slot,
        }
    }

    /// 转换帧格式为 RGBA
    fn convert_frame(&mut self, frame: &util::frame::Video) -> Result<VideoFrame> {
        let width = frame.width();
        let height = frame.height();
        let key = (width, height, frame.format());

        if self.scaler_key != Some(key) {
            info!("🆕 创建 RGBA 缩放器: {}x{} {:?}", width, height, frame.format());
            self.scaler = Some(software::scaling::Context::get(
                frame.format(),
                width,
                height,
                util::format::Pixel::RGBA,
                width,
                height,
                software::scaling::Flags::BILINEAR,
            )?);
            self.scaler_key = Some(key);
        }

        let mut rgba_frame = util::frame::Video::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler.run(frame, &mut rgba_frame)?;
        }

        // 计算 PTS（毫秒）
        let pts = frame
            .timestamp()
            .map(|ts| (ts as f64 * self.time_base * 1000.0) as i64)
            .unwrap_or(0);

        // 按行复制，去掉 stride 填充
        let row_size = width as usize * 4;
        let stride = rgba_frame.stride(0);
        let frame_data = rgba_frame.data(0);
        let mut data = Vec::with_capacity(row_size * height as usize);
        for y in 0..height as usize {
            let src_offset = y * stride;
            data.extend_from_slice(&frame_data[src_offset..src_offset + row_size]);
        }

        Ok(VideoFrame {
            pts,
            width,
            height,
            format: PixelFormat::RGBA,
            data,
        })
    }
}

impl FramePresenter<util::frame::Video> for ScalingPresenter {
    fn present(&mut self, frame: util::frame::Video) -> Result<()> {
        let converted = self.convert_frame(&frame)?;
        debug!("📺 呈现视频帧: {}x{}, PTS: {}ms", converted.width, converted.height, converted.pts);
        self.slot.publish(converted);
        Ok(())
    }
}
