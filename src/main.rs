use anyhow::{Context as _, Result};
use log::{error, info};

mod app;
mod core;
mod player;

use crate::core::PlayerConfig;
use crate::player::PlaybackManager;

fn main() {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        // 过滤掉 eframe/egui 的调试日志，减少日志噪音
        .filter_module("eframe", log::LevelFilter::Warn)
        .filter_module("egui_glow", log::LevelFilter::Warn)
        .init();

    let code = match run() {
        Ok(()) => 0,
        Err(e) => {
            error!("❌ {:#}", e);
            eprintln!("{:#}", e);
            -1
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let media_path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("Please provide a movie file"))?;

    info!("🎬 MYY AVPlay 启动");

    let config = PlayerConfig::load().context("加载配置失败")?;

    // 初始化 FFmpeg
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("FFmpeg 初始化失败: {}", e))?;
    info!("✅ FFmpeg 初始化成功");

    let headless = config.playback.headless;
    let mut manager = PlaybackManager::open(&media_path, config)
        .with_context(|| format!("无法播放 {}", media_path))?;
    manager.play()?;

    if headless {
        // 读取错误只结束本次播放，不算致命错误
        match manager.wait() {
            Ok(outcome) => info!("播放结束: {:?}", outcome),
            Err(e) => error!("❌ 播放中断: {}", e),
        }
    } else {
        app::run_window(manager, &media_path)?;
    }

    Ok(())
}
