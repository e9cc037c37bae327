//! Content-addressed kernel-map cache
//!
//! A network stacks many mixer blocks built from the same schedule. The
//! cache hands every one of them the same `Arc<KernelMap>`, keyed by the
//! map's content id, so the table is generated once and shared read-only.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::kernel_map::{self, KernelMap, StrideSchedule};

#[derive(Debug, Default)]
pub struct KernelMapCache {
    // Key: hex id from `kernel_map::compute_map_id`
    maps: HashMap<String, Arc<KernelMap>>,
    hits: u64,
    misses: u64,
}

impl KernelMapCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the shared map for this configuration, generating it on a miss.
    pub fn get_or_generate(
        &mut self,
        kernel_size: usize,
        schedule: &StrideSchedule,
    ) -> Result<Arc<KernelMap>> {
        let map_id = kernel_map::compute_map_id(kernel_size, schedule);

        if let Some(map) = self.maps.get(&map_id) {
            log::debug!("Kernel map cache HIT: {}", map_id);
            self.hits += 1;
            return Ok(Arc::clone(map));
        }

        log::debug!("Kernel map cache MISS: {} (generating)", map_id);
        let (map, _) = kernel_map::generate(kernel_size, schedule)?;
        let map = Arc::new(map);
        self.maps.insert(map_id, Arc::clone(&map));
        self.misses += 1;

        Ok(map)
    }

    pub fn is_cached(&self, map_id: &str) -> bool {
        self.maps.contains_key(map_id)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// `(hits, misses)` since construction.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    /// Drop every cached map. Operators already holding an `Arc` keep theirs.
    pub fn clear(&mut self) {
        log::info!("Clearing kernel map cache ({} entries)", self.maps.len());
        self.maps.clear();
    }
}
