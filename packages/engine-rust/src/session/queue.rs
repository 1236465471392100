//! Per-asset-type work queue with optional on-disk durability.
//!
//! The dispatcher appends entity identifiers as events are admitted and
//! pulls batches per type when refilling pipelines. `has` answers the
//! dedup question "is this entity already waiting?". When created with a
//! path, every mutation is mirrored into a redb table (`queue.db`) so a
//! crashed run can resume its backlog.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use parking_lot::Mutex;
use redb::{Database, ReadableTable, TableDefinition};
use surveyor_core::AssetType;

/// (asset type, sequence) -> entity id.
const QUEUE_TABLE: TableDefinition<(&str, u64), &str> = TableDefinition::new("work_queue");

struct QueueInner {
    queues: HashMap<AssetType, VecDeque<(u64, String)>>,
    queued: HashSet<String>,
    seq: u64,
}

/// Session work queue, partitioned by asset type.
pub struct WorkQueue {
    inner: Mutex<QueueInner>,
    db: Option<Database>,
}

impl WorkQueue {
    /// Creates a memory-only queue.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                queues: HashMap::new(),
                queued: HashSet::new(),
                seq: 0,
            }),
            db: None,
        }
    }

    /// Opens (or creates) a durable queue at `path` and reloads any
    /// backlog left by a previous run.
    ///
    /// # Errors
    ///
    /// Returns an error when the database cannot be created or read.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let db = Database::create(path)?;
        let mut queues: HashMap<AssetType, VecDeque<(u64, String)>> = HashMap::new();
        let mut queued = HashSet::new();
        let mut seq = 0u64;

        let read = db.begin_read()?;
        match read.open_table(QUEUE_TABLE) {
            Ok(table) => {
                let mut rows: Vec<(AssetType, u64, String)> = Vec::new();
                for item in table.iter()? {
                    let (key, value) = item?;
                    let (type_name, row_seq) = key.value();
                    if let Ok(asset_type) = type_name.parse::<AssetType>() {
                        rows.push((asset_type, row_seq, value.value().to_string()));
                    }
                }
                rows.sort_by_key(|(_, row_seq, _)| *row_seq);
                for (asset_type, row_seq, id) in rows {
                    seq = seq.max(row_seq + 1);
                    queued.insert(id.clone());
                    queues.entry(asset_type).or_default().push_back((row_seq, id));
                }
            }
            // First open: the table appears with the first write.
            Err(redb::TableError::TableDoesNotExist(_)) => {}
            Err(err) => return Err(err.into()),
        }

        Ok(Self {
            inner: Mutex::new(QueueInner {
                queues,
                queued,
                seq,
            }),
            db: Some(db),
        })
    }

    /// Appends an entity id under its type. Returns `false` without
    /// queueing when the entity is already waiting.
    ///
    /// # Errors
    ///
    /// Returns an error when the durable mirror write fails; the in-memory
    /// queue is not modified in that case.
    pub fn append(&self, asset_type: AssetType, entity_id: &str) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock();
        if inner.queued.contains(entity_id) {
            return Ok(false);
        }
        let seq = inner.seq;

        if let Some(db) = &self.db {
            let tx = db.begin_write()?;
            {
                let mut table = tx.open_table(QUEUE_TABLE)?;
                table.insert((asset_type.as_str(), seq), entity_id)?;
            }
            tx.commit()?;
        }

        inner.seq += 1;
        inner.queued.insert(entity_id.to_string());
        inner
            .queues
            .entry(asset_type)
            .or_default()
            .push_back((seq, entity_id.to_string()));
        Ok(true)
    }

    /// Whether the entity is currently waiting in any type partition.
    #[must_use]
    pub fn has(&self, entity_id: &str) -> bool {
        self.inner.lock().queued.contains(entity_id)
    }

    /// Dequeues up to `n` entity ids of the given type, FIFO.
    ///
    /// # Errors
    ///
    /// Returns an error when the durable mirror removal fails.
    pub fn next(&self, asset_type: AssetType, n: usize) -> anyhow::Result<Vec<String>> {
        let mut inner = self.inner.lock();
        let mut taken: Vec<(u64, String)> = Vec::new();
        {
            let Some(queue) = inner.queues.get_mut(&asset_type) else {
                return Ok(Vec::new());
            };
            while taken.len() < n {
                match queue.pop_front() {
                    Some(row) => taken.push(row),
                    None => break,
                }
            }
        }

        if let Some(db) = &self.db {
            if !taken.is_empty() {
                let tx = db.begin_write()?;
                {
                    let mut table = tx.open_table(QUEUE_TABLE)?;
                    for (seq, _) in &taken {
                        table.remove((asset_type.as_str(), *seq))?;
                    }
                }
                tx.commit()?;
            }
        }

        let ids: Vec<String> = taken.into_iter().map(|(_, id)| id).collect();
        for id in &ids {
            inner.queued.remove(id);
        }
        Ok(ids)
    }

    /// Total number of waiting entries across all types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().queued.len()
    }

    /// Whether nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_next_fifo_per_type() {
        let queue = WorkQueue::in_memory();
        assert!(queue.append(AssetType::Fqdn, "e1").expect("append"));
        assert!(queue.append(AssetType::Fqdn, "e2").expect("append"));
        assert!(queue.append(AssetType::IpAddress, "e3").expect("append"));

        assert_eq!(
            queue.next(AssetType::Fqdn, 10).expect("next"),
            vec!["e1".to_string(), "e2".to_string()]
        );
        assert_eq!(
            queue.next(AssetType::IpAddress, 10).expect("next"),
            vec!["e3".to_string()]
        );
        assert!(queue.next(AssetType::Fqdn, 10).expect("next").is_empty());
    }

    #[test]
    fn append_deduplicates_waiting_entities() {
        let queue = WorkQueue::in_memory();
        assert!(queue.append(AssetType::Fqdn, "e1").expect("append"));
        assert!(!queue.append(AssetType::Fqdn, "e1").expect("append"));
        assert!(queue.has("e1"));
        assert_eq!(queue.len(), 1);

        // Once dequeued, the id may be queued again.
        queue.next(AssetType::Fqdn, 1).expect("next");
        assert!(!queue.has("e1"));
        assert!(queue.append(AssetType::Fqdn, "e1").expect("append"));
    }

    #[test]
    fn next_respects_batch_size() {
        let queue = WorkQueue::in_memory();
        for i in 0..5 {
            queue
                .append(AssetType::Fqdn, &format!("e{i}"))
                .expect("append");
        }
        assert_eq!(queue.next(AssetType::Fqdn, 2).expect("next").len(), 2);
        assert_eq!(queue.next(AssetType::Fqdn, 2).expect("next").len(), 2);
        assert_eq!(queue.next(AssetType::Fqdn, 2).expect("next").len(), 1);
    }

    #[test]
    fn durable_queue_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("queue.db");

        {
            let queue = WorkQueue::open(&path).expect("open");
            queue.append(AssetType::Fqdn, "e1").expect("append");
            queue.append(AssetType::Fqdn, "e2").expect("append");
            queue.append(AssetType::Netblock, "e3").expect("append");
            queue.next(AssetType::Fqdn, 1).expect("next");
        }

        let reopened = WorkQueue::open(&path).expect("reopen");
        assert_eq!(reopened.len(), 2);
        assert!(reopened.has("e2"));
        assert!(reopened.has("e3"));
        assert!(!reopened.has("e1"));
        assert_eq!(
            reopened.next(AssetType::Fqdn, 10).expect("next"),
            vec!["e2".to_string()]
        );
    }
}
