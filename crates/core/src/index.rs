use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::models::{Chunk, ScoredChunk};
use tracing::info;

pub const DEFAULT_TOP_K: usize = 4;

/// Exact nearest-neighbour index over chunk embeddings.
///
/// Every search scans all stored vectors. The index is immutable once built;
/// reprocessing documents builds a new one.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimensions: usize,
    entries: Vec<(Chunk, Vec<f32>)>,
}

impl FlatIndex {
    pub fn build(chunks: Vec<Chunk>, embeddings: Vec<Vec<f32>>) -> Result<Self, IngestError> {
        if chunks.is_empty() {
            return Err(IngestError::NoChunks);
        }

        if chunks.len() != embeddings.len() {
            return Err(IngestError::Index(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }

        let dimensions = embeddings[0].len();
        if dimensions == 0 {
            return Err(IngestError::Index("embeddings are empty".to_string()));
        }

        if let Some(bad) = embeddings.iter().find(|vector| vector.len() != dimensions) {
            return Err(IngestError::Index(format!(
                "embedding dimension {} != {dimensions}",
                bad.len()
            )));
        }

        Ok(Self {
            dimensions,
            entries: chunks.into_iter().zip(embeddings).collect(),
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IngestError> {
        if query_vector.len() != self.dimensions {
            return Err(IngestError::Index(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.dimensions
            )));
        }

        let mut scored: Vec<ScoredChunk> = self
            .entries
            .iter()
            .map(|(chunk, vector)| ScoredChunk {
                chunk: chunk.clone(),
                distance: squared_l2(query_vector, vector),
            })
            .collect();

        // Stable sort keeps insertion order between equal distances.
        scored.sort_by(|left, right| left.distance.total_cmp(&right.distance));
        scored.truncate(k);
        Ok(scored)
    }
}

fn squared_l2(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right)
        .map(|(a, b)| (a - b) * (a - b))
        .sum()
}

/// Embeds every chunk with `embedder` and builds a fresh index over them.
pub async fn build_index(
    embedder: &dyn Embedder,
    chunks: Vec<Chunk>,
) -> Result<FlatIndex, IngestError> {
    if chunks.is_empty() {
        return Err(IngestError::NoChunks);
    }

    let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
    let embeddings = embedder.embed_batch(&texts).await?;
    let index = FlatIndex::build(chunks, embeddings)?;

    info!(
        model = embedder.model_name(),
        chunks = index.len(),
        dimensions = index.dimensions(),
        "vector index built"
    );
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;

    fn chunk(index: usize, text: &str) -> Chunk {
        Chunk {
            index,
            text: text.to_string(),
        }
    }

    #[test]
    fn search_orders_by_distance_and_truncates() {
        let index = FlatIndex::build(
            vec![chunk(0, "far"), chunk(1, "near"), chunk(2, "middle")],
            vec![vec![10.0, 0.0], vec![1.0, 0.0], vec![3.0, 0.0]],
        )
        .expect("index should build");

        let hits = index.search(&[0.0, 0.0], 2).expect("search should succeed");
        let names: Vec<&str> = hits.iter().map(|hit| hit.chunk.text.as_str()).collect();
        assert_eq!(names, vec!["near", "middle"]);
        assert_eq!(hits[0].distance, 1.0);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let index = FlatIndex::build(
            vec![chunk(0, "first"), chunk(1, "second")],
            vec![vec![1.0], vec![-1.0]],
        )
        .expect("index should build");

        let hits = index.search(&[0.0], 4).expect("search should succeed");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.index, 0);
        assert_eq!(hits[1].chunk.index, 1);
    }

    #[test]
    fn build_rejects_mismatched_inputs() {
        assert!(matches!(
            FlatIndex::build(Vec::new(), Vec::new()),
            Err(IngestError::NoChunks)
        ));
        assert!(matches!(
            FlatIndex::build(vec![chunk(0, "a")], vec![vec![1.0], vec![2.0]]),
            Err(IngestError::Index(_))
        ));
        assert!(matches!(
            FlatIndex::build(
                vec![chunk(0, "a"), chunk(1, "b")],
                vec![vec![1.0, 0.0], vec![2.0]]
            ),
            Err(IngestError::Index(_))
        ));
    }

    #[test]
    fn query_dimension_must_match() {
        let index =
            FlatIndex::build(vec![chunk(0, "a")], vec![vec![1.0, 2.0]]).expect("index should build");
        assert!(matches!(index.search(&[1.0], 1), Err(IngestError::Index(_))));
    }

    #[tokio::test]
    async fn build_index_finds_the_matching_chunk() {
        let embedder = CharacterNgramEmbedder::default();
        let chunks = vec![
            chunk(0, "The warranty covers parts and labour for two years."),
            chunk(1, "Invoice Total: $42.00"),
            chunk(2, "Shipping is free for orders over fifty dollars."),
        ];

        let index = build_index(&embedder, chunks).await.expect("index should build");
        let query = embedder.embed("What is the invoice total?");
        let hits = index.search(&query, 1).expect("search should succeed");
        assert_eq!(hits[0].chunk.text, "Invoice Total: $42.00");
    }
}
