//! Batched writer: buffers the two packet streams and flushes them as
//! multi-row inserts, on size or interval. Failed batches re-queue at
//! the head of the buffer; rows are never dropped while the process is
//! alive.

use crate::live::Broadcaster;
use crate::model::{CsDeviceUpsert, CsPacket, GatewayUpsert, ParsedPacket};
use crate::store::Store;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const BATCH_SIZE: usize = 1000;
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(2);

const FLUSH_TICK: Duration = Duration::from_millis(500);

/// Commands consumed by the writer task.
#[derive(Debug, Clone)]
pub enum StoreCommand {
    Packet(ParsedPacket),
    CsPacket(CsPacket),
    UpsertGateway(GatewayUpsert),
    UpsertCsDevice(CsDeviceUpsert),
}

/// One stream's buffer, tracking the age of its oldest row.
struct StreamBuffer<T> {
    rows: VecDeque<T>,
    oldest: Option<Instant>,
}

impl<T> StreamBuffer<T> {
    fn new() -> Self {
        Self {
            rows: VecDeque::new(),
            oldest: None,
        }
    }

    fn push(&mut self, row: T) {
        if self.rows.is_empty() {
            self.oldest = Some(Instant::now());
        }
        self.rows.push_back(row);
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn due(&self, interval: Duration) -> bool {
        matches!(self.oldest, Some(oldest) if oldest.elapsed() >= interval)
    }

    fn take(&mut self) -> Vec<T> {
        self.oldest = None;
        self.rows.drain(..).collect()
    }

    /// Put a failed batch back at the head, preserving row order.
    fn requeue(&mut self, rows: Vec<T>) {
        for row in rows.into_iter().rev() {
            self.rows.push_front(row);
        }
        if !self.rows.is_empty() && self.oldest.is_none() {
            self.oldest = Some(Instant::now());
        }
    }
}

pub struct BatchWriter {
    store: Store,
    broadcaster: Arc<Broadcaster>,
    batch_size: usize,
    flush_interval: Duration,
    packets: StreamBuffer<ParsedPacket>,
    cs_packets: StreamBuffer<CsPacket>,
}

impl BatchWriter {
    pub fn new(store: Store, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            store,
            broadcaster,
            batch_size: BATCH_SIZE,
            flush_interval: FLUSH_INTERVAL,
            packets: StreamBuffer::new(),
            cs_packets: StreamBuffer::new(),
        }
    }

    /// Consume commands until the channel closes, then drain both
    /// buffers.
    pub async fn run(mut self, mut rx: mpsc::Receiver<StoreCommand>) {
        info!("batch writer started");
        let mut tick = tokio::time::interval(FLUSH_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = tick.tick() => {
                    if self.packets.due(self.flush_interval) {
                        self.flush_packets().await;
                    }
                    if self.cs_packets.due(self.flush_interval) {
                        self.flush_cs_packets().await;
                    }
                }
            }
        }

        info!("batch writer draining on shutdown");
        self.flush_packets().await;
        self.flush_cs_packets().await;
    }

    async fn handle(&mut self, command: StoreCommand) {
        match command {
            StoreCommand::Packet(packet) => {
                self.packets.push(packet);
                if self.packets.len() >= self.batch_size {
                    self.flush_packets().await;
                }
            }
            StoreCommand::CsPacket(packet) => {
                self.cs_packets.push(packet);
                if self.cs_packets.len() >= self.batch_size {
                    self.flush_cs_packets().await;
                }
            }
            StoreCommand::UpsertGateway(upsert) => {
                match self.store.upsert_gateway(&upsert).await {
                    Ok(()) => self.broadcaster.update_gateway(&upsert),
                    Err(e) => warn!("gateway upsert failed for {}: {}", upsert.gateway_id, e),
                }
            }
            StoreCommand::UpsertCsDevice(upsert) => {
                match self.store.upsert_cs_device(&upsert).await {
                    Ok(()) => self.broadcaster.update_cs_device(&upsert),
                    Err(e) => warn!("device upsert failed for {}: {}", upsert.dev_eui, e),
                }
            }
        }
    }

    async fn flush_packets(&mut self) {
        if self.packets.is_empty() {
            return;
        }
        let batch = self.packets.take();
        match self.store.insert_packets(&batch).await {
            Ok(()) => debug!("flushed {} packet rows", batch.len()),
            Err(e) => {
                warn!("packet batch insert failed, re-queueing {} rows: {}", batch.len(), e);
                self.packets.requeue(batch);
            }
        }
    }

    async fn flush_cs_packets(&mut self) {
        if self.cs_packets.is_empty() {
            return;
        }
        let batch = self.cs_packets.take();
        match self.store.insert_cs_packets(&batch).await {
            Ok(()) => debug!("flushed {} cs packet rows", batch.len()),
            Err(e) => {
                warn!(
                    "cs packet batch insert failed, re-queueing {} rows: {}",
                    batch.len(),
                    e
                );
                self.cs_packets.requeue(batch);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_buffer_push_take() {
        let mut buffer: StreamBuffer<u32> = StreamBuffer::new();
        assert!(buffer.is_empty());
        assert!(!buffer.due(Duration::ZERO));

        buffer.push(1);
        buffer.push(2);
        assert_eq!(buffer.len(), 2);
        assert!(buffer.due(Duration::ZERO));

        assert_eq!(buffer.take(), vec![1, 2]);
        assert!(buffer.is_empty());
        assert!(!buffer.due(Duration::ZERO));
    }

    #[test]
    fn test_stream_buffer_requeue_preserves_order() {
        let mut buffer: StreamBuffer<u32> = StreamBuffer::new();
        buffer.push(3);
        buffer.push(4);

        // A failed batch goes back ahead of newer rows.
        buffer.requeue(vec![1, 2]);
        assert_eq!(buffer.take(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_stream_buffer_requeue_restores_due_timer() {
        let mut buffer: StreamBuffer<u32> = StreamBuffer::new();
        buffer.push(1);
        let batch = buffer.take();
        assert!(!buffer.due(Duration::ZERO));

        buffer.requeue(batch);
        assert!(buffer.due(Duration::ZERO));
    }
}
