use async_trait::async_trait;
use cloudsql_core::CloudSqlError;

use crate::Embeddings;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Deterministic bag-of-words embeddings for tests and demos.
///
/// Every lowercased whitespace token is hashed to a seed that expands into a
/// pseudo-random direction; a text embeds as the unit-length sum of its token
/// directions. Identical texts map to identical vectors (cosine and L2
/// distance 0), texts sharing words land closer together, and distinct
/// single words are close to orthogonal. Text without tokens embeds as the
/// zero vector.
#[derive(Debug, Clone, Copy)]
pub struct FakeEmbeddings {
    dimensions: usize,
}

impl FakeEmbeddings {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut out = vec![0.0f32; self.dimensions];
        for token in text.split_whitespace() {
            let mut state = token_seed(token);
            for slot in out.iter_mut() {
                state = splitmix64(state);
                // Top 24 bits mapped onto [-1, 1).
                *slot += (state >> 40) as f32 / (1u64 << 23) as f32 - 1.0;
            }
        }
        let norm = out.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            out.iter_mut().for_each(|x| *x /= norm);
        }
        out
    }
}

fn token_seed(token: &str) -> u64 {
    token
        .chars()
        .flat_map(char::to_lowercase)
        .fold(FNV_OFFSET, |hash, c| {
            (hash ^ u64::from(u32::from(c))).wrapping_mul(FNV_PRIME)
        })
}

fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

impl Default for FakeEmbeddings {
    fn default() -> Self {
        Self::new(4)
    }
}

#[async_trait]
impl Embeddings for FakeEmbeddings {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, CloudSqlError> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, CloudSqlError> {
        Ok(self.embed(text))
    }
}
