use async_trait::async_trait;

use crate::{
    common::types::{AnyResult, ChannelId, TenantId},
    protocol::messages::FilterSnapshot,
};

/// Where a node delivers PCM frames for one tenant. The real-time transport
/// (voice gateway, RTP, ...) lives behind this trait.
#[async_trait]
pub trait AudioSink: Send {
    /// One 20 ms frame of interleaved 48 kHz stereo samples.
    async fn send_frame(&mut self, pcm: &[i16]) -> AnyResult<()>;

    fn set_bitrate(&mut self, _bitrate: u32) {}

    fn apply_filters(&mut self, _filters: &FilterSnapshot) {}
}

/// Opens sinks on behalf of a node.
pub trait SinkFactory: Send + Sync {
    fn connect(&self, tenant: &TenantId, channel: Option<ChannelId>) -> AnyResult<Box<dyn AudioSink>>;
}

/// Discards every frame.
#[derive(Debug, Default)]
pub struct NullSink {
    pub frames: u64,
}

#[async_trait]
impl AudioSink for NullSink {
    async fn send_frame(&mut self, _pcm: &[i16]) -> AnyResult<()> {
        self.frames += 1;
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSinkFactory;

impl SinkFactory for NullSinkFactory {
    fn connect(&self, _tenant: &TenantId, _channel: Option<ChannelId>) -> AnyResult<Box<dyn AudioSink>> {
        Ok(Box::new(NullSink::default()))
    }
}
