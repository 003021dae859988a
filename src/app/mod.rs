use anyhow::Result;
use egui::{ColorImage, Context, TextureHandle, TextureOptions, Ui};
use log::{error, info};
use std::path::Path;
use std::time::Duration;

use crate::core::PixelFormat;
use crate::player::PlaybackManager;

const APP_NAME: &str = "喜洋洋播放器";

/// 视频窗口
///
/// 只负责显示 Dispatcher 发布的最新帧，以及把 Esc/Q 转成退出请求。
pub struct VideoWindow {
    /// 播放管理器
    manager: PlaybackManager,

    /// 当前视频纹理
    texture: Option<TextureHandle>,

    /// 已上传到纹理的帧序号（避免重复上传）
    uploaded_sequence: u64,

    /// 信息面板可见性
    info_panel_visible: bool,

    /// 已发出关闭窗口命令
    close_requested: bool,
}

impl VideoWindow {
    pub fn new(manager: PlaybackManager) -> Self {
        info!("🎮 初始化 VideoWindow");
        Self {
            manager,
            texture: None,
            uploaded_sequence: 0,
            info_panel_visible: false,
            close_requested: false,
        }
    }

    /// 有新帧时上传到 GPU 纹理
    fn upload_latest_frame(&mut self, ctx: &Context) {
        let slot = self.manager.frame_slot();
        let sequence = slot.sequence();
        if sequence == self.uploaded_sequence {
            return;
        }
        self.uploaded_sequence = sequence;

        let Some(frame) = slot.take() else {
            return;
        };
        let size = [frame.width as usize, frame.height as usize];
        if frame.format != PixelFormat::RGBA || frame.data.len() != size[0] * size[1] * 4 {
            error!("❌ 视频帧数据长度不匹配: {}x{}, {} 字节", size[0], size[1], frame.data.len());
            return;
        }

        let image = ColorImage::from_rgba_unmultiplied(size, &frame.data);
        match &mut self.texture {
            Some(texture) => texture.set(image, TextureOptions::LINEAR),
            None => {
                self.texture = Some(ctx.load_texture("video_frame", image, TextureOptions::LINEAR));
            }
        }
    }

    /// 渲染视频区域（保持宽高比居中显示）
    fn render_video_area(&self, ui: &mut Ui) {
        let available_rect = ui.available_rect_before_wrap();

        let Some(texture) = &self.texture else {
            ui.centered_and_justified(|ui| {
                ui.label(egui::RichText::new("⏳ 等待视频帧...").color(egui::Color32::GRAY));
            });
            return;
        };

        let video_size = texture.size_vec2();
        if video_size.x <= 0.0 || video_size.y <= 0.0 {
            return;
        }
        let scale = (available_rect.width() / video_size.x)
            .min(available_rect.height() / video_size.y);
        let video_rect = egui::Rect::from_center_size(available_rect.center(), video_size * scale);

        ui.painter().image(
            texture.id(),
            video_rect,
            egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
            egui::Color32::WHITE,
        );
    }

    /// 信息面板 - 悬浮在左上角
    fn render_info_panel(&self, ctx: &Context) {
        if !self.info_panel_visible {
            return;
        }

        let info = self.manager.media_info();
        egui::Window::new("媒体信息")
            .anchor(egui::Align2::LEFT_TOP, egui::Vec2::new(10.0, 10.0))
            .resizable(false)
            .collapsible(false)
            .show(ctx, |ui| {
                ui.label(format!(
                    "视频: {} {}x{} @ {:.2}fps",
                    info.video_codec, info.width, info.height, info.fps
                ));
                ui.label(format!(
                    "音频: {} {}Hz {}ch",
                    info.audio_codec, info.sample_rate, info.channels
                ));
                ui.label(format!("时长: {:.1}s", info.duration as f64 / 1000.0));
                ui.label(format!("已呈现帧: {}", self.manager.frame_slot().sequence()));
            });
    }

    /// 处理键盘快捷键
    fn handle_keyboard_input(&mut self, ctx: &Context) {
        let (quit, toggle_info) = ctx.input(|i| {
            (
                i.key_pressed(egui::Key::Escape) || i.key_pressed(egui::Key::Q),
                i.key_pressed(egui::Key::Tab),
            )
        });

        if toggle_info {
            self.info_panel_visible = !self.info_panel_visible;
        }

        if quit {
            info!("⌨️ 收到退出按键");
            self.manager.request_quit();
            self.close_window(ctx);
        }
    }

    fn close_window(&mut self, ctx: &Context) {
        if !self.close_requested {
            self.close_requested = true;
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }
    }
}

impl eframe::App for VideoWindow {
    fn update(&mut self, ctx: &Context, _frame: &mut eframe::Frame) {
        self.upload_latest_frame(ctx);

        // 主视频区域 - 占满整个窗口
        egui::CentralPanel::default()
            .frame(egui::Frame::none().fill(egui::Color32::BLACK))
            .show(ctx, |ui| {
                self.render_video_area(ui);
            });

        self.render_info_panel(ctx);
        self.handle_keyboard_input(ctx);

        // 文件播放完毕或读取出错后 Dispatcher 自行结束，窗口跟着关闭
        if self.manager.is_finished() {
            info!("🏁 Dispatcher 已结束，关闭窗口");
            self.close_window(ctx);
        }

        ctx.request_repaint_after(Duration::from_millis(16));
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        info!("🔚 VideoWindow 退出");

        // 读完文件后窗口自行关闭时不打断音频，让排队的音频播完
        match self.manager.finish() {
            Ok(outcome) => info!("播放结束: {:?}", outcome),
            Err(e) => error!("❌ 播放中断: {}", e),
        }
    }
}

/// 打开视频窗口并阻塞到窗口关闭
pub fn run_window(manager: PlaybackManager, media_path: &str) -> Result<()> {
    let file_name = Path::new(media_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(media_path);
    let title = format!("{} - {}", APP_NAME, file_name);

    let info = manager.media_info();
    let inner_size = if info.width > 0 && info.height > 0 {
        [info.width as f32, info.height as f32]
    } else {
        [1280.0, 720.0]
    };

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size(inner_size)
            .with_min_inner_size([320.0, 240.0])
            .with_title(title)
            .with_decorations(true),
        renderer: eframe::Renderer::Glow,
        ..Default::default()
    };

    eframe::run_native(
        APP_NAME,
        options,
        Box::new(move |_cc| Box::new(VideoWindow::new(manager))),
    )
    .map_err(|e| anyhow::anyhow!("窗口启动失败: {}", e))
}
