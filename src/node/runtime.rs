use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    common::types::{ChannelId, NodeId, TenantId},
    monitoring::process_rss_bytes,
    node::{
        constants::{AUTO_BITRATE, TRACK_OVERHEAD_BYTES},
        sink::SinkFactory,
        track::{self, SharedSink, TrackHandle, TrackJob},
    },
    protocol::messages::{
        ControlMessage, FilterSnapshot, NodeEvent, PlayRequest, ResourceUsage, SessionEvent,
        SessionEventKind, TrackEndReason,
    },
};

/// What a node's event loop needs from whoever spawned it.
pub struct NodeContext {
    pub id: NodeId,
    pub control_rx: flume::Receiver<ControlMessage>,
    pub event_tx: flume::Sender<NodeEvent>,
    pub shutdown: CancellationToken,
    pub sinks: Arc<dyn SinkFactory>,
}

struct TenantSlot {
    channel: Option<ChannelId>,
    sink: SharedSink,
    track: Option<TrackHandle>,
    paused: bool,
    bitrate: u32,
    filters: FilterSnapshot,
}

struct NodeRuntime {
    id: NodeId,
    event_tx: flume::Sender<NodeEvent>,
    sinks: Arc<dyn SinkFactory>,
    tenants: HashMap<TenantId, TenantSlot>,
    pulled: Arc<AtomicU64>,
    peak_heap: u64,
}

/// Event loop of one node. Announces `Ready`, then serves control messages
/// until the channel closes or `shutdown` fires.
pub async fn run_node(ctx: NodeContext) {
    let NodeContext {
        id,
        control_rx,
        event_tx,
        shutdown,
        sinks,
    } = ctx;

    let mut runtime = NodeRuntime {
        id,
        event_tx,
        sinks,
        tenants: HashMap::new(),
        pulled: Arc::new(AtomicU64::new(0)),
        peak_heap: 0,
    };

    if runtime.event_tx.send(NodeEvent::Ready).is_err() {
        warn!("{} lost its event channel before becoming ready", id);
        return;
    }
    info!("{} is ready", id);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("{} received shutdown", id);
                break;
            }
            msg = control_rx.recv_async() => match msg {
                Ok(msg) => runtime.handle(msg).await,
                Err(_) => {
                    debug!("{} control channel closed", id);
                    break;
                }
            }
        }
    }

    runtime.teardown();
    info!("{} stopped", id);
}

impl NodeRuntime {
    fn emit(&self, event: NodeEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_session(&self, tenant: &TenantId, kind: SessionEventKind) {
        self.emit(NodeEvent::Payload(SessionEvent {
            tenant: tenant.clone(),
            kind,
        }));
    }

    fn slot(&mut self, tenant: &TenantId) -> Option<&mut TenantSlot> {
        if !self.tenants.contains_key(tenant) {
            match self.sinks.connect(tenant, None) {
                Ok(sink) => {
                    self.tenants.insert(
                        tenant.clone(),
                        TenantSlot {
                            channel: None,
                            sink: Arc::new(tokio::sync::Mutex::new(sink)),
                            track: None,
                            paused: false,
                            bitrate: AUTO_BITRATE,
                            filters: FilterSnapshot::default(),
                        },
                    );
                }
                Err(e) => {
                    warn!("{} could not open a sink for {}: {}", self.id, tenant, e);
                    self.emit_session(
                        tenant,
                        SessionEventKind::Error {
                            track_id: None,
                            message: e.to_string(),
                        },
                    );
                    return None;
                }
            }
        }
        self.tenants.get_mut(tenant)
    }

    fn usage(&mut self) -> ResourceUsage {
        let mut array_buffers = 0;
        let mut active = 0;
        for slot in self.tenants.values() {
            if let Some(track) = slot.track.as_ref().filter(|t| !t.is_finished()) {
                active += 1;
                array_buffers += track.buffered_bytes();
            }
        }

        let heap_used = active * TRACK_OVERHEAD_BYTES + array_buffers;
        self.peak_heap = self.peak_heap.max(heap_used);

        ResourceUsage {
            heap_used,
            heap_total: self.peak_heap,
            external: self.pulled.load(Ordering::Relaxed),
            array_buffers,
            rss: process_rss_bytes(),
        }
    }

    async fn handle(&mut self, msg: ControlMessage) {
        debug!("{} <- {}", self.id, msg.op());

        match msg {
            ControlMessage::HeartBeat => {
                let usage = self.usage();
                self.emit(NodeEvent::Stats(usage));
                self.emit(NodeEvent::HeartBeatAck);
            }
            ControlMessage::JoinChannel {
                tenant,
                channel,
                self_deaf,
            } => self.join(tenant, channel, self_deaf).await,
            ControlMessage::Destroy { tenant } => {
                if let Some(slot) = self.tenants.remove(&tenant) {
                    if let Some(track) = slot.track {
                        track.stop(TrackEndReason::Destroyed);
                    }
                    if slot.channel.is_some() {
                        self.emit_session(&tenant, SessionEventKind::Disconnected);
                    }
                }
            }
            ControlMessage::SetVolume { tenant, volume } => {
                if let Some(slot) = self.slot(&tenant) {
                    slot.filters.volume = volume;
                    if let Some(track) = &slot.track {
                        track.set_volume(volume);
                    }
                }
            }
            ControlMessage::SetPaused { tenant, paused } => {
                if let Some(slot) = self.slot(&tenant) {
                    slot.paused = paused;
                    if let Some(track) = &slot.track {
                        track.set_paused(paused);
                    }
                }
            }
            ControlMessage::SetBitrate { tenant, bitrate } => {
                if let Some(slot) = self.slot(&tenant) {
                    slot.bitrate = bitrate;
                    slot.sink.lock().await.set_bitrate(bitrate);
                }
            }
            ControlMessage::SkipTrack { tenant } => {
                if let Some(track) = self.tenants.get(&tenant).and_then(|s| s.track.as_ref()) {
                    track.stop(TrackEndReason::Skipped);
                }
            }
            ControlMessage::Stop { tenant } => {
                if let Some(track) = self.tenants.get(&tenant).and_then(|s| s.track.as_ref()) {
                    track.stop(TrackEndReason::Stopped);
                }
            }
            ControlMessage::Play(req) => self.play(req).await,
            ControlMessage::Seek {
                tenant,
                position_ms,
            } => {
                let refused = self
                    .tenants
                    .get(&tenant)
                    .and_then(|s| s.track.as_ref())
                    .map(|t| (t.track_id().to_string(), t.seek(position_ms)))
                    .filter(|(_, accepted)| !accepted);
                if let Some((track_id, _)) = refused {
                    self.emit_session(
                        &tenant,
                        SessionEventKind::Error {
                            track_id: Some(track_id),
                            message: format!("cannot seek backwards to {}ms in place", position_ms),
                        },
                    );
                }
            }
            ControlMessage::SetFilters { tenant, filters } => {
                self.update_filters(&tenant, |f| f.filters = filters).await
            }
            ControlMessage::SetEqualizer { tenant, bands } => {
                self.update_filters(&tenant, |f| f.equalizer = bands).await
            }
            ControlMessage::SetBiquad { tenant, biquad } => {
                self.update_filters(&tenant, |f| f.biquad = biquad).await
            }
            ControlMessage::SetDsp { tenant, enabled } => {
                self.update_filters(&tenant, |f| f.dsp = enabled).await
            }
        }
    }

    async fn join(&mut self, tenant: TenantId, channel: ChannelId, self_deaf: bool) {
        let sink = match self.sinks.connect(&tenant, Some(channel)) {
            Ok(sink) => sink,
            Err(e) => {
                warn!("{} failed to join {} for {}: {}", self.id, channel, tenant, e);
                self.emit_session(
                    &tenant,
                    SessionEventKind::Error {
                        track_id: None,
                        message: e.to_string(),
                    },
                );
                return;
            }
        };

        debug!(
            "{} joined channel {} for {} (deaf: {})",
            self.id, channel, tenant, self_deaf
        );

        match self.tenants.get_mut(&tenant) {
            Some(slot) => {
                // Frames of a playing track go to the new connection from now on.
                let mut current = slot.sink.lock().await;
                *current = sink;
                current.set_bitrate(slot.bitrate);
                current.apply_filters(&slot.filters);
                drop(current);
                slot.channel = Some(channel);
            }
            None => {
                self.tenants.insert(
                    tenant.clone(),
                    TenantSlot {
                        channel: Some(channel),
                        sink: Arc::new(tokio::sync::Mutex::new(sink)),
                        track: None,
                        paused: false,
                        bitrate: AUTO_BITRATE,
                        filters: FilterSnapshot::default(),
                    },
                );
            }
        }

        self.emit(NodeEvent::Connected { tenant, channel });
    }

    async fn play(&mut self, req: PlayRequest) {
        let events = self.event_tx.clone();
        let pulled = self.pulled.clone();
        let Some(slot) = self.slot(&req.tenant) else {
            return;
        };

        if let Some(previous) = slot.track.take() {
            previous.stop(TrackEndReason::Replaced);
        }

        slot.filters = req.filters;
        slot.paused = false;
        slot.sink.lock().await.apply_filters(&slot.filters);

        let handle = track::start(TrackJob {
            tenant: req.tenant,
            track_id: req.track_id,
            stream: req.stream,
            seek_ms: req.seek_ms,
            volume: slot.filters.volume,
            sink: slot.sink.clone(),
            events,
            pulled,
        });
        slot.track = Some(handle);
    }

    async fn update_filters(&mut self, tenant: &TenantId, apply: impl FnOnce(&mut FilterSnapshot)) {
        if let Some(slot) = self.slot(tenant) {
            apply(&mut slot.filters);
            slot.sink.lock().await.apply_filters(&slot.filters);
        }
    }

    fn teardown(&mut self) {
        for (_, slot) in self.tenants.drain() {
            if let Some(track) = slot.track {
                track.stop(TrackEndReason::Destroyed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::node::{constants::BYTES_PER_MS, sink::NullSinkFactory};

    struct Harness {
        control: flume::Sender<ControlMessage>,
        events: flume::Receiver<NodeEvent>,
        shutdown: CancellationToken,
    }

    fn boot() -> Harness {
        let (control, control_rx) = flume::unbounded();
        let (event_tx, events) = flume::unbounded();
        let shutdown = CancellationToken::new();
        tokio::spawn(run_node(NodeContext {
            id: NodeId(1),
            control_rx,
            event_tx,
            shutdown: shutdown.clone(),
            sinks: Arc::new(NullSinkFactory),
        }));
        Harness {
            control,
            events,
            shutdown,
        }
    }

    fn play(tenant: &str, track_id: &str, ms: u64) -> ControlMessage {
        let bytes = Bytes::from(vec![0u8; (ms * BYTES_PER_MS) as usize]);
        ControlMessage::Play(PlayRequest {
            tenant: tenant.into(),
            track_id: track_id.into(),
            title: track_id.into(),
            stream: Box::pin(futures::stream::iter(vec![Ok(bytes)])),
            seek_ms: 0,
            filters: FilterSnapshot::default(),
        })
    }

    fn session_kinds(events: &flume::Receiver<NodeEvent>) -> Vec<(String, SessionEventKind)> {
        events
            .drain()
            .filter_map(|e| match e {
                NodeEvent::Payload(p) => Some((p.tenant.to_string(), p.kind)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_then_heartbeat_answers_stats_and_ack() {
        let node = boot();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(matches!(node.events.try_recv(), Ok(NodeEvent::Ready)));

        node.control.send(ControlMessage::HeartBeat).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(matches!(node.events.try_recv(), Ok(NodeEvent::Stats(_))));
        assert!(matches!(node.events.try_recv(), Ok(NodeEvent::HeartBeatAck)));
        node.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_replace_and_skip() {
        let node = boot();
        node.control.send(play("g1", "a", 10_000)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        node.control.send(play("g1", "b", 10_000)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        node.control
            .send(ControlMessage::SkipTrack {
                tenant: "g1".into(),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let kinds = session_kinds(&node.events);
        let ends: Vec<_> = kinds
            .iter()
            .filter_map(|(_, k)| match k {
                SessionEventKind::TrackEnd {
                    track_id, reason, ..
                } => Some((track_id.as_str(), *reason)),
                _ => None,
            })
            .collect();
        assert_eq!(
            ends,
            vec![("a", TrackEndReason::Replaced), ("b", TrackEndReason::Skipped)]
        );
        node.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_tenants_are_independent() {
        let node = boot();
        node.control.send(play("g1", "a", 10_000)).unwrap();
        node.control.send(play("g2", "b", 10_000)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        node.control
            .send(ControlMessage::Stop {
                tenant: "g1".into(),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let kinds = session_kinds(&node.events);
        assert!(kinds.iter().any(|(t, k)| t == "g1"
            && matches!(k, SessionEventKind::TrackEnd { reason: TrackEndReason::Stopped, .. })));
        assert!(!kinds
            .iter()
            .any(|(t, k)| t == "g2" && matches!(k, SessionEventKind::TrackEnd { .. })));
        node.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_reports_connected_and_destroy_disconnects() {
        let node = boot();
        node.control
            .send(ControlMessage::JoinChannel {
                tenant: "g1".into(),
                channel: ChannelId(9),
                self_deaf: true,
            })
            .unwrap();
        node.control
            .send(ControlMessage::Destroy {
                tenant: "g1".into(),
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let events: Vec<_> = node.events.drain().collect();
        assert!(events.iter().any(|e| matches!(
            e,
            NodeEvent::Connected { channel: ChannelId(9), .. }
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            NodeEvent::Payload(SessionEvent { kind: SessionEventKind::Disconnected, .. })
        )));
        node.shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_closing_control_channel_stops_the_node() {
        let node = boot();
        node.control.send(play("g1", "a", 10_000)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(node.control);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let kinds = session_kinds(&node.events);
        assert!(kinds.iter().any(|(_, k)| matches!(
            k,
            SessionEventKind::TrackEnd { reason: TrackEndReason::Destroyed, .. }
        )));
    }
}
