//! Cache Coordinator Module
//!
//! Front door of the crate: composes the sharded LRU with the linkage
//! graph, runs the pre-delete hook chain, drives cascade deletion, and
//! defers cascade work triggered by evictions out from under shard locks
//! through a bounded channel drained by a background thread.

use std::collections::{HashMap, HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Once, OnceLock, Weak};
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::config::{EvictionMode, Options, PreDeleteHook};
use crate::error::Result;
use crate::link::LinkGraph;
use crate::lru::{lru_string_hash, EvictCallback, ExpirationLru, LazyLru, Lru, SlotLru};

/// Most cascade batches an eviction burst can park before new ones are
/// dropped. Dropping is harmless: the keys stay resident until their own
/// TTL or eviction.
const PENDING_DELETE_BUFFER: usize = 100;

// == Local Cache ==
/// Process-local cache with fetch-on-miss, TTL, LRU eviction and
/// linked-key cascade deletion.
///
/// Values are cloned out to callers, so `V` is typically cheap to clone
/// or an `Arc` itself. One instance is shared across threads; all
/// methods take `&self`.
pub struct LocalCache<V: Clone + Send + Sync + 'static> {
    local: Option<Arc<dyn Lru<V>>>,
    link: Option<Arc<LinkGraph>>,
    hooks: Vec<PreDeleteHook>,
    pending: Arc<PendingDeletes<V>>,
    stop_once: Once,
}

impl<V: Clone + Send + Sync + 'static> LocalCache<V> {
    /// Builds a cache from validated options.
    ///
    /// With a local shard count of zero the cache degenerates to calling
    /// every fetcher directly; with a linkage shard count of zero link
    /// arguments are ignored and deletes touch only their own keys.
    pub fn new(options: Options) -> Result<Self> {
        options.validate()?;
        let Options {
            local_slot_num,
            local_slot_capacity,
            link_slot_num,
            success_ttl,
            failure_ttl,
            eviction_mode,
            target,
            hooks,
        } = options;

        let pending = Arc::new(PendingDeletes::new());

        let mut link = None;
        let mut local: Option<Arc<dyn Lru<V>>> = None;
        if local_slot_num > 0 {
            if link_slot_num > 0 {
                link = Some(Arc::new(LinkGraph::new(link_slot_num)));
            }

            let on_evict: EvictCallback = {
                let link = link.clone();
                let pending = Arc::clone(&pending);
                Arc::new(move |key: &str| on_evict(key, link.as_deref(), &pending))
            };

            let capacity = NonZeroUsize::new(local_slot_capacity)
                .expect("capacity checked by Options::validate");
            let make_shard = || -> Box<dyn Lru<V>> {
                match eviction_mode {
                    EvictionMode::Active => Box::new(ExpirationLru::new(
                        capacity,
                        success_ttl,
                        failure_ttl,
                        Arc::clone(&target),
                        Some(Arc::clone(&on_evict)),
                    )),
                    EvictionMode::Lazy => Box::new(LazyLru::new(
                        capacity,
                        success_ttl,
                        failure_ttl,
                        Arc::clone(&target),
                        Some(Arc::clone(&on_evict)),
                    )),
                }
            };

            // A single shard skips the router entirely.
            let lru: Arc<dyn Lru<V>> = if local_slot_num == 1 {
                Arc::from(make_shard())
            } else {
                Arc::new(SlotLru::new(local_slot_num, lru_string_hash, make_shard))
            };
            pending.bind_local(&lru);
            local = Some(lru);
        }

        Ok(Self {
            local,
            link,
            hooks,
            pending,
            stop_once: Once::new(),
        })
    }

    /// Returns the value for `key`, invoking `fetch` on miss.
    ///
    /// At most one fetch per key is in flight at a time; concurrent
    /// callers for the same cold key block until it resolves and observe
    /// the same outcome. The fetcher must not call back into the cache
    /// for the same key.
    pub fn get<F>(&self, key: &str, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        self.get_with_links(key, fetch, &[])
    }

    /// Like [`get`](Self::get), additionally declaring `links` as
    /// mutually associated with `key`: deleting any of them later also
    /// deletes `key`, and vice versa.
    ///
    /// Links are registered only when the fetch actually runs. A call
    /// that hits the cache leaves the linkage exactly as it was, so
    /// associations are declared at materialisation time, not
    /// accumulated per call.
    pub fn get_with_links<F>(&self, key: &str, fetch: F, links: &[String]) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        match &self.local {
            Some(local) => local.get(
                key,
                Box::new(|| {
                    if !links.is_empty() {
                        if let Some(link) = &self.link {
                            link.link(key, links);
                        }
                    }
                    fetch()
                }),
            ),
            None => fetch(),
        }
    }

    /// Serves cached keys and passes the rest to `fetch` in one batch.
    ///
    /// Input keys absent from the fetch result are counted as individual
    /// failures; the first error encountered is returned, though values
    /// fetched alongside it are still cached.
    pub fn get_batch<F>(&self, keys: &[String], fetch: F) -> Result<HashMap<String, V>>
    where
        F: Fn(Vec<String>) -> Result<HashMap<String, V>>,
    {
        match &self.local {
            Some(local) => local.get_batch(keys, Box::new(fetch)),
            None => fetch(keys.to_vec()),
        }
    }

    /// Runs the pre-delete hooks with the full batch, then removes the
    /// keys and everything reachable through their links.
    pub fn del(&self, keys: &[String]) {
        for hook in &self.hooks {
            hook(keys);
        }
        self.cascade(keys);
    }

    /// Removes the keys and everything reachable through their links
    /// without running the pre-delete hooks.
    pub fn del_local(&self, keys: &[String]) {
        self.cascade(keys);
    }

    /// Worklist traversal over the linkage graph. For each key the
    /// linkage entry is drained before the LRU delete, so any callback
    /// the delete might trigger finds an empty neighbour set and produces
    /// no duplicate work. The visited set absorbs duplicate inputs,
    /// cycles and dangling reverse edges.
    fn cascade(&self, keys: &[String]) {
        let Some(local) = &self.local else { return };

        let mut visited: HashSet<String> = HashSet::with_capacity(keys.len());
        let mut frontier: VecDeque<String> = keys.iter().cloned().collect();
        while let Some(key) = frontier.pop_front() {
            if !visited.insert(key.clone()) {
                continue;
            }
            if let Some(link) = &self.link {
                for neighbour in link.del(&key) {
                    if !visited.contains(&neighbour) {
                        frontier.push_back(neighbour);
                    }
                }
            }
            local.del(&key);
        }
    }

    /// Releases resources and closes the pending-deletion channel. The
    /// drain thread finishes whatever is already buffered and exits.
    /// Idempotent.
    pub fn stop(&self) {
        if let Some(local) = &self.local {
            local.stop();
        }
        self.stop_once.call_once(|| {
            self.pending.close();
            debug!("cache stopped, pending-delete channel closed");
        });
    }
}

impl<V: Clone + Send + Sync + 'static> Drop for LocalCache<V> {
    fn drop(&mut self) {
        self.stop();
    }
}

// == Eviction Path ==
/// Runs inside the evicting shard's structural lock, so it must never
/// call back into a shard. It drains the key's linkage (a different lock
/// domain) and parks the neighbours for the drain thread.
fn on_evict<V: Clone + Send + Sync + 'static>(
    key: &str,
    link: Option<&LinkGraph>,
    pending: &Arc<PendingDeletes<V>>,
) {
    let Some(link) = link else { return };
    let neighbours = link.del(key);
    if neighbours.is_empty() {
        return;
    }
    let batch: Vec<String> = neighbours.into_iter().filter(|n| n != key).collect();
    if batch.is_empty() {
        return;
    }
    pending.start_drain();
    pending.enqueue(batch);
}

/// Channel state for eviction-triggered cascades.
///
/// Holds the shard handle only weakly: the drain thread must not keep
/// the shards (and through their callbacks, this struct) alive once the
/// owning cache is gone.
struct PendingDeletes<V> {
    tx: Mutex<Option<SyncSender<Vec<String>>>>,
    rx: Mutex<Option<Receiver<Vec<String>>>>,
    drain_once: Once,
    local: OnceLock<Weak<dyn Lru<V>>>,
}

impl<V: Clone + Send + Sync + 'static> PendingDeletes<V> {
    fn new() -> Self {
        let (tx, rx) = sync_channel(PENDING_DELETE_BUFFER);
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            drain_once: Once::new(),
            local: OnceLock::new(),
        }
    }

    fn bind_local(&self, local: &Arc<dyn Lru<V>>) {
        let _ = self.local.set(Arc::downgrade(local));
    }

    /// Spawns the drain thread on first use.
    fn start_drain(&self) {
        self.drain_once.call_once(|| {
            let rx = self.rx.lock().take();
            let local = self.local.get().cloned();
            let (Some(rx), Some(local)) = (rx, local) else {
                return;
            };
            let spawned = thread::Builder::new()
                .name("localcache-drain".to_string())
                .spawn(move || drain(rx, local));
            if spawned.is_err() {
                debug!("failed to spawn cascade drain thread; eviction cascades disabled");
            }
        });
    }

    /// Parks a neighbour batch without blocking. A full or closed
    /// channel drops the batch; cascade promptness is best-effort.
    fn enqueue(&self, batch: Vec<String>) {
        let tx = self.tx.lock();
        if let Some(tx) = tx.as_ref() {
            if tx.try_send(batch).is_err() {
                debug!("pending-delete channel full, dropping cascade batch");
            }
        }
    }

    fn close(&self) {
        self.tx.lock().take();
    }
}

/// Consumes neighbour batches and issues plain deletes with no shard
/// lock held. Exits once every sender is gone and the buffer is empty.
fn drain<V: Clone + Send + Sync + 'static>(rx: Receiver<Vec<String>>, local: Weak<dyn Lru<V>>) {
    trace!("cascade drain thread started");
    while let Ok(batch) = rx.recv() {
        let Some(local) = local.upgrade() else { break };
        for key in batch {
            local.del(&key);
        }
    }
    trace!("cascade drain thread exiting");
}
