//! Background processing of tiles. Jobs run on a tokio runtime, their results are collected by the
//! foreground once per frame.

use std::sync::Arc;

use tokio::{runtime::Handle, sync::mpsc};

use crate::{
    coords::WorldTileCoords,
    error::Error,
    io::message::MessageChannel,
    vector::{
        bucket::TileBuckets,
        builder::BucketBuilder,
        decoder::decode_tile,
        family::LayerFamily,
        tile_store::{JobOutcome, JobTicket, TileStore},
    },
};

/// The result of one job, to be delivered with [`TileStore::complete`].
#[derive(Debug)]
pub struct JobResult {
    pub ticket: JobTicket,
    pub result: Result<TileBuckets, Error>,
}

/// Schedules build and update jobs and hands their results back to the foreground.
pub struct TileWorker<C> {
    builder: BucketBuilder<C>,
    runtime: Handle,
    sender: mpsc::UnboundedSender<JobResult>,
    receiver: mpsc::UnboundedReceiver<JobResult>,
}

impl<C: MessageChannel + 'static> TileWorker<C> {
    pub fn new(builder: BucketBuilder<C>, runtime: Handle) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            builder,
            runtime,
            sender,
            receiver,
        }
    }

    /// Decodes `data` and builds the buckets of the tile at `coords`.
    pub fn schedule_build(
        &self,
        store: &mut TileStore,
        coords: WorldTileCoords,
        data: Vec<u8>,
        families: Arc<[LayerFamily]>,
    ) -> JobTicket {
        let (ticket, cancel) = store.begin_job(coords);
        let builder = self.builder.clone();
        let sender = self.sender.clone();

        self.runtime.spawn(async move {
            let result = async {
                let tile = decode_tile(&data)?;
                Ok::<_, Error>(builder.build(coords, &tile, &families, &cancel).await?)
            }
            .await;

            if sender.send(JobResult { ticket, result }).is_err() {
                tracing::debug!("worker dropped before build of {coords} finished");
            }
        });

        ticket
    }

    /// Regenerates the paint buffers of the tile at `coords`. Returns `None` if the tile has no
    /// buckets yet, it needs a build instead.
    pub fn schedule_update(
        &self,
        store: &mut TileStore,
        coords: WorldTileCoords,
        families: Arc<[LayerFamily]>,
    ) -> Option<JobTicket> {
        let previous = store.buckets(&coords)?;
        let (ticket, cancel) = store.begin_job(coords);
        let builder = self.builder.clone();
        let sender = self.sender.clone();

        self.runtime.spawn(async move {
            let result = builder
                .update_properties(&previous, &families, &cancel)
                .await
                .map_err(Error::from);

            if sender.send(JobResult { ticket, result }).is_err() {
                tracing::debug!("worker dropped before update of {coords} finished");
            }
        });

        Some(ticket)
    }

    /// Delivers every finished job to `store` without waiting. Called once per frame.
    pub fn receive(&mut self, store: &mut TileStore) -> Vec<(JobTicket, JobOutcome)> {
        let mut outcomes = Vec::new();
        while let Ok(JobResult { ticket, result }) = self.receiver.try_recv() {
            outcomes.push((ticket, store.complete(ticket, result)));
        }
        outcomes
    }

    /// Waits for the next finished job.
    pub async fn next_result(&mut self) -> Option<JobResult> {
        self.receiver.recv().await
    }
}
