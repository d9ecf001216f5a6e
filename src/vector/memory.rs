//! Brute-force in-process vector index.
//!
//! Keeps every point in memory and scores all points of a course on each
//! search. Suitable for tests and single-machine deployments with a few
//! thousand chunks. When opened with a path, the collection is snapshotted
//! to a JSON file after every write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{VectorError, VectorIndex, VectorPoint, VectorResult, cosine_similarity};
use crate::types::{Chunk, CourseId, RetrievedChunk};

const COLLECTION_NAME: &str = "memory";

#[derive(Serialize, Deserialize)]
struct Snapshot {
    dimension: usize,
    points: Vec<SnapshotPoint>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotPoint {
    vector: Vec<f32>,
    chunk: Chunk,
}

/// In-memory vector index. `None` means the collection does not exist.
pub struct MemoryVectorIndex {
    dimension: usize,
    points: RwLock<Option<HashMap<String, VectorPoint>>>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryVectorIndex {
    /// Volatile index for vectors of `dimension` floats.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            points: RwLock::new(None),
            snapshot_path: None,
        }
    }

    /// Index persisted at `path`, loading an existing snapshot if present.
    pub fn persistent(path: impl AsRef<Path>, dimension: usize) -> VectorResult<Self> {
        let path = path.as_ref().to_path_buf();
        let points = if path.exists() {
            let snapshot: Snapshot = serde_json::from_slice(&std::fs::read(&path)?)?;
            if snapshot.dimension != dimension {
                return Err(VectorError::DimensionMismatch {
                    expected: dimension,
                    actual: snapshot.dimension,
                });
            }
            let map = snapshot
                .points
                .into_iter()
                .map(|p| {
                    let point = VectorPoint::new(p.vector, p.chunk);
                    (point.id().to_string(), point)
                })
                .collect();
            Some(map)
        } else {
            None
        };

        Ok(Self {
            dimension,
            points: RwLock::new(points),
            snapshot_path: Some(path),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored points (zero when the collection is absent).
    pub fn len(&self) -> usize {
        self.points.read().as_ref().map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_dimension(&self, vector: &[f32]) -> VectorResult<()> {
        if vector.len() != self.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    async fn persist(&self) -> VectorResult<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let bytes = {
            let guard = self.points.read();
            match guard.as_ref() {
                Some(points) => {
                    let snapshot = Snapshot {
                        dimension: self.dimension,
                        points: points
                            .values()
                            .map(|p| SnapshotPoint {
                                vector: p.vector.clone(),
                                chunk: p.chunk.clone(),
                            })
                            .collect(),
                    };
                    Some(serde_json::to_vec(&snapshot)?)
                }
                None => None,
            }
        };

        match bytes {
            Some(bytes) => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let tmp = path.with_extension("tmp");
                tokio::fs::write(&tmp, bytes).await?;
                tokio::fs::rename(&tmp, path).await?;
            }
            None => {
                if tokio::fs::try_exists(path).await? {
                    tokio::fs::remove_file(path).await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn ensure_collection(&self) -> VectorResult<()> {
        let created = {
            let mut guard = self.points.write();
            if guard.is_none() {
                *guard = Some(HashMap::new());
                true
            } else {
                false
            }
        };
        if created {
            tracing::info!(target: "vector", "created in-memory collection");
            self.persist().await?;
        }
        Ok(())
    }

    async fn recreate_collection(&self) -> VectorResult<()> {
        *self.points.write() = Some(HashMap::new());
        tracing::info!(target: "vector", "recreated in-memory collection");
        self.persist().await
    }

    async fn upsert(&self, points: Vec<VectorPoint>) -> VectorResult<()> {
        for point in &points {
            self.check_dimension(&point.vector)?;
        }

        // Points replaced or added by this call, for undoing a failed snapshot
        let previous: Vec<(String, Option<VectorPoint>)> = {
            let mut guard = self.points.write();
            let collection = guard
                .as_mut()
                .ok_or_else(|| VectorError::CollectionMissing(COLLECTION_NAME.to_string()))?;
            points
                .into_iter()
                .map(|point| {
                    let id = point.id().to_string();
                    let old = collection.insert(id.clone(), point);
                    (id, old)
                })
                .collect()
        };

        if let Err(e) = self.persist().await {
            let mut guard = self.points.write();
            if let Some(collection) = guard.as_mut() {
                for (id, old) in previous.into_iter().rev() {
                    match old {
                        Some(point) => collection.insert(id, point),
                        None => collection.remove(&id),
                    };
                }
            }
            tracing::warn!(target: "vector", "snapshot write failed, upsert undone: {e}");
            return Err(e);
        }

        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        course_id: CourseId,
        limit: usize,
    ) -> VectorResult<Vec<RetrievedChunk>> {
        self.check_dimension(vector)?;

        let guard = self.points.read();
        let collection = guard
            .as_ref()
            .ok_or_else(|| VectorError::CollectionMissing(COLLECTION_NAME.to_string()))?;

        let mut scored: Vec<RetrievedChunk> = collection
            .values()
            .filter(|point| point.chunk.course_id == course_id)
            .map(|point| {
                RetrievedChunk::new(point.chunk.clone(), cosine_similarity(vector, &point.vector))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        scored.truncate(limit);
        Ok(scored)
    }
}
