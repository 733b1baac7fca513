//! Tiles and the buckets delivered to them.

use std::{collections::HashMap, sync::Arc};

use tokio_util::sync::CancellationToken;

use crate::{
    coords::WorldTileCoords,
    error::{BuildError, Error},
    vector::bucket::TileBuckets,
};

/// Identifies one build or update job of one tile instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobTicket {
    pub coords: WorldTileCoords,
    /// Unique per tile instance, a tile which is evicted and requested again gets a new one.
    generation: u64,
    job: u64,
}

/// What [`TileStore::complete`] did with the result of a job.
#[derive(Debug)]
pub enum JobOutcome {
    /// The buckets of the tile were replaced.
    Applied,
    /// The job no longer belongs to a live tile or was superseded by a later job.
    Discarded,
    /// The job failed, the tile keeps its previous buckets.
    Failed(Error),
}

#[derive(Debug)]
struct Tile {
    generation: u64,
    latest_job: u64,
    in_flight: Option<CancellationToken>,
    buckets: Option<Arc<TileBuckets>>,
}

/// Owns the tiles of the visible set.
///
/// Each tile has at most one job in flight, starting a job cancels the previous one. Buckets are
/// replaced as a whole, readers hold either the previous or the new [`TileBuckets`].
#[derive(Debug, Default)]
pub struct TileStore {
    tiles: HashMap<WorldTileCoords, Tile>,
    next_generation: u64,
}

impl TileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the tile at `coords` if it does not exist. Returns `true` if it was created.
    pub fn insert(&mut self, coords: WorldTileCoords) -> bool {
        if self.tiles.contains_key(&coords) {
            return false;
        }
        self.next_generation += 1;
        self.tiles.insert(
            coords,
            Tile {
                generation: self.next_generation,
                latest_job: 0,
                in_flight: None,
                buckets: None,
            },
        );
        true
    }

    pub fn contains(&self, coords: &WorldTileCoords) -> bool {
        self.tiles.contains_key(coords)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn coords(&self) -> impl Iterator<Item = &WorldTileCoords> {
        self.tiles.keys()
    }

    /// Starts a job for the tile at `coords`, creating the tile if needed. A job still in
    /// flight for the tile is cancelled, its result will be discarded.
    pub fn begin_job(&mut self, coords: WorldTileCoords) -> (JobTicket, CancellationToken) {
        let next_generation = &mut self.next_generation;
        let tile = self.tiles.entry(coords).or_insert_with(|| {
            *next_generation += 1;
            Tile {
                generation: *next_generation,
                latest_job: 0,
                in_flight: None,
                buckets: None,
            }
        });

        if let Some(previous) = tile.in_flight.take() {
            tracing::debug!("superseding in-flight job of tile {coords}");
            previous.cancel();
        }

        tile.latest_job += 1;
        let cancel = CancellationToken::new();
        tile.in_flight = Some(cancel.clone());

        (
            JobTicket {
                coords,
                generation: tile.generation,
                job: tile.latest_job,
            },
            cancel,
        )
    }

    pub fn is_in_flight(&self, coords: &WorldTileCoords) -> bool {
        self.tiles
            .get(coords)
            .map_or(false, |tile| tile.in_flight.is_some())
    }

    /// Delivers the result of the job identified by `ticket`. Results of evicted tiles, of
    /// recreated tiles and of superseded jobs never touch the buckets of a live tile.
    pub fn complete(
        &mut self,
        ticket: JobTicket,
        result: Result<TileBuckets, Error>,
    ) -> JobOutcome {
        let coords = ticket.coords;
        let Some(tile) = self
            .tiles
            .get_mut(&coords)
            .filter(|tile| tile.generation == ticket.generation && tile.latest_job == ticket.job)
        else {
            tracing::debug!("discarding stale result for tile {coords}");
            return JobOutcome::Discarded;
        };

        tile.in_flight = None;
        match result {
            Ok(buckets) => {
                tracing::info!("buckets of tile {coords} replaced");
                tile.buckets = Some(Arc::new(buckets));
                JobOutcome::Applied
            }
            Err(Error::Build(BuildError::Cancelled)) => {
                tracing::debug!("job of tile {coords} was cancelled");
                JobOutcome::Discarded
            }
            Err(e) => {
                tracing::warn!("job of tile {coords} failed: {e}");
                JobOutcome::Failed(e)
            }
        }
    }

    /// Removes the tile at `coords` and cancels its job in flight.
    pub fn evict(&mut self, coords: &WorldTileCoords) -> bool {
        match self.tiles.remove(coords) {
            Some(tile) => {
                if let Some(cancel) = tile.in_flight {
                    cancel.cancel();
                }
                tracing::debug!("evicted tile {coords}");
                true
            }
            None => false,
        }
    }

    /// Evicts every tile for which `visible` returns `false`.
    pub fn retain(&mut self, mut visible: impl FnMut(&WorldTileCoords) -> bool) {
        let evicted: Vec<WorldTileCoords> = self
            .tiles
            .keys()
            .filter(|coords| !visible(coords))
            .copied()
            .collect();
        for coords in evicted {
            self.evict(&coords);
        }
    }

    /// The current buckets of the tile at `coords`.
    pub fn buckets(&self, coords: &WorldTileCoords) -> Option<Arc<TileBuckets>> {
        self.get(coords).cloned()
    }

    pub fn get(&self, coords: &WorldTileCoords) -> Option<&Arc<TileBuckets>> {
        self.tiles.get(coords).and_then(|tile| tile.buckets.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{coords::ZoomLevel, vector::decoder::PropertyData};

    fn coords() -> WorldTileCoords {
        WorldTileCoords::from((1, 2, ZoomLevel::from(3)))
    }

    fn empty_buckets() -> TileBuckets {
        TileBuckets {
            coords: coords(),
            buckets: vec![],
            property_data: PropertyData::default(),
        }
    }

    #[test]
    fn completed_job_replaces_buckets() {
        let mut store = TileStore::new();
        let (ticket, _cancel) = store.begin_job(coords());
        assert!(store.is_in_flight(&coords()));

        assert!(matches!(
            store.complete(ticket, Ok(empty_buckets())),
            JobOutcome::Applied
        ));
        assert!(store.get(&coords()).is_some());
        assert!(!store.is_in_flight(&coords()));
    }

    #[test]
    fn second_job_cancels_the_first() {
        let mut store = TileStore::new();
        let (first, first_cancel) = store.begin_job(coords());
        let (second, _) = store.begin_job(coords());

        assert!(first_cancel.is_cancelled());
        assert!(matches!(
            store.complete(first, Ok(empty_buckets())),
            JobOutcome::Discarded
        ));
        assert!(store.get(&coords()).is_none());
        assert!(matches!(
            store.complete(second, Ok(empty_buckets())),
            JobOutcome::Applied
        ));
    }

    #[test]
    fn results_for_evicted_or_recreated_tiles_are_discarded() {
        let mut store = TileStore::new();
        let (stale, cancel) = store.begin_job(coords());
        assert!(store.evict(&coords()));
        assert!(cancel.is_cancelled());

        assert!(matches!(
            store.complete(stale, Ok(empty_buckets())),
            JobOutcome::Discarded
        ));
        assert!(!store.contains(&coords()));

        store.insert(coords());
        let (fresh, _) = store.begin_job(coords());
        store.complete(fresh, Ok(empty_buckets()));
        let live = store.buckets(&coords()).unwrap();

        assert!(matches!(
            store.complete(stale, Ok(empty_buckets())),
            JobOutcome::Discarded
        ));
        assert!(Arc::ptr_eq(&live, &store.buckets(&coords()).unwrap()));
    }

    #[test]
    fn failed_job_keeps_previous_buckets() {
        let mut store = TileStore::new();
        let (ticket, _) = store.begin_job(coords());
        store.complete(ticket, Ok(empty_buckets()));
        let before = store.buckets(&coords()).unwrap();

        let (ticket, _) = store.begin_job(coords());
        let outcome = store.complete(
            ticket,
            Err(Error::Build(BuildError::UnresolvedImage {
                family: "rail".to_string(),
                image: "sleepers".to_string(),
            })),
        );

        assert!(matches!(outcome, JobOutcome::Failed(_)));
        assert!(Arc::ptr_eq(&before, &store.buckets(&coords()).unwrap()));
    }

    #[test]
    fn retain_evicts_invisible_tiles() {
        let mut store = TileStore::new();
        let other = WorldTileCoords::from((0, 0, ZoomLevel::from(3)));
        store.insert(coords());
        store.insert(other);

        store.retain(|c| *c == other);
        assert_eq!(store.len(), 1);
        assert!(store.contains(&other));
    }
}
