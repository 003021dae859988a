use crate::core::{MediaInfo, MediaPacket, Result, StreamInfo};

/// Demuxer 数据源抽象接口
///
/// Dispatcher 只通过这个 trait 读包，本地文件之外的数据源（以及测试中的
/// 脚本化数据源）实现它即可接入。
pub trait DemuxerSource: Send {
    /// 读取下一个媒体包
    ///
    /// 返回：
    /// - Ok(Some(packet)): 成功读取一个包
    /// - Ok(None): 到达文件末尾
    /// - Err(e): 读取错误（对解封装循环是致命的，不重试）
    fn read_packet(&mut self) -> Result<Option<MediaPacket>>;

    /// 发现的所有流
    fn streams(&self) -> &[StreamInfo];

    /// 获取媒体信息
    fn get_media_info(&self) -> &MediaInfo;

    /// 获取视频流索引
    fn video_stream_index(&self) -> Option<usize>;

    /// 获取音频流索引
    fn audio_stream_index(&self) -> Option<usize>;

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}
