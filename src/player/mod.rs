// 播放器核心模块

pub mod audio_output;
pub mod audio_render;
pub mod decoder;
pub mod demuxer;
pub mod demuxer_source;
pub mod dispatcher;
pub mod manager;
pub mod packet_queue;
pub mod presenter;

#[cfg(test)]
pub(crate) mod test_support;

pub use manager::PlaybackManager;
