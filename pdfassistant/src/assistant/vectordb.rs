use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use super::error::StorageError;
use super::state::Reference;
use super::storage::quote_identifier;
use super::utils::{chunk_id, fnv1a};

pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Feature-hashed bag of words, L2 normalised.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub const DEFAULT_DIMENSIONS: usize = 512;

    pub fn new(dimensions: usize) -> Self {
        Self { dimensions: dimensions.max(1) }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSIONS)
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
        {
            let token = token.to_lowercase();
            let index = (fnv1a(token.as_bytes()) % self.dimensions as u64) as usize;
            vector[index] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// A document collection stored in one SQLite table.
pub struct SqliteVectorDb {
    collection: String,
    table: String,
    conn: Mutex<Connection>,
    embedder: Box<dyn Embedder>,
}

impl SqliteVectorDb {
    pub fn open(path: impl AsRef<Path>, collection: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, collection, Box::new(HashingEmbedder::default()))
    }

    pub fn with_connection(
        conn: Connection,
        collection: &str,
        embedder: Box<dyn Embedder>,
    ) -> Result<Self, StorageError> {
        let table = quote_identifier(collection)?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding TEXT NOT NULL
            );"
        ))?;

        Ok(Self {
            collection: collection.to_string(),
            table,
            conn: Mutex::new(conn),
            embedder,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|e| StorageError::Lock(e.to_string()))
    }

    /// Inserts chunks that are not stored yet. Returns how many were new.
    pub fn insert(&self, name: &str, chunks: &[String]) -> Result<usize, StorageError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR IGNORE INTO {} (id, name, content, embedding) VALUES (?1, ?2, ?3, ?4)",
                self.table
            ))?;
            for chunk in chunks {
                let embedding = serde_json::to_string(&self.embedder.embed(chunk))?;
                inserted += stmt.execute(params![chunk_id(name, chunk), name, chunk, embedding])?;
            }
        }
        tx.commit()?;

        debug!(collection = %self.collection, name, inserted, "inserted chunks");
        Ok(inserted)
    }

    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<Reference>, StorageError> {
        let query_embedding = self.embedder.embed(query);
        if limit == 0 || query_embedding.iter().all(|v| *v == 0.0) {
            return Ok(Vec::new());
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT name, content, embedding FROM {}",
            self.table
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut references = Vec::new();
        for row in rows {
            let (name, content, embedding) = row?;
            let embedding: Vec<f32> = serde_json::from_str(&embedding)?;
            let score = cosine_similarity(&query_embedding, &embedding);
            if score > 0.0 {
                references.push(Reference { name, content, score });
            }
        }

        references.sort_by(|a, b| b.score.total_cmp(&a.score));
        references.truncate(limit);
        Ok(references)
    }

    pub fn count(&self) -> Result<usize, StorageError> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| row.get(0))?;
        Ok(count as usize)
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> SqliteVectorDb {
        SqliteVectorDb::with_connection(
            Connection::open_in_memory().unwrap(),
            "recipes",
            Box::new(HashingEmbedder::default()),
        )
        .unwrap()
    }

    #[test]
    fn embeddings_are_normalised() {
        let v = HashingEmbedder::default().embed("Green curry with green chillies");
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn embedding_ignores_case_and_punctuation() {
        let embedder = HashingEmbedder::default();
        assert_eq!(embedder.embed("Green, CURRY!"), embedder.embed("green curry"));
    }

    #[test]
    fn cosine_of_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn search_ranks_matching_chunk_first() {
        let db = db();
        db.insert(
            "ThaiRecipes",
            &[
                "Green curry paste with coconut milk and thai basil".to_string(),
                "Mango sticky rice is a dessert made with glutinous rice".to_string(),
                "Tom yum soup uses lemongrass and galangal".to_string(),
            ],
        )
        .unwrap();

        let results = db.search("What ingredients are in the green curry?", 2).unwrap();
        assert!(!results.is_empty());
        assert!(results.len() <= 2);
        assert!(results[0].content.starts_with("Green curry"));
        assert_eq!(results[0].name, "ThaiRecipes");
    }

    #[test]
    fn duplicate_chunks_are_ignored() {
        let db = db();
        let chunks = vec!["Pad thai with tamarind".to_string()];
        assert_eq!(db.insert("a", &chunks).unwrap(), 1);
        assert_eq!(db.insert("a", &chunks).unwrap(), 0);
        assert_eq!(db.count().unwrap(), 1);
    }

    #[test]
    fn same_text_is_kept_per_document() {
        let db = db();
        let chunks = vec!["Serves four people.".to_string()];
        assert_eq!(db.insert("ThaiRecipes", &chunks).unwrap(), 1);
        assert_eq!(db.insert("IndianRecipes", &chunks).unwrap(), 1);
        assert_eq!(db.count().unwrap(), 2);

        let mut names: Vec<String> = db
            .search("serves four people", 5)
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["IndianRecipes", "ThaiRecipes"]);
    }

    #[test]
    fn empty_query_returns_nothing() {
        let db = db();
        db.insert("a", &["Pad thai".to_string()]).unwrap();
        assert!(db.search("?!", 3).unwrap().is_empty());
        assert!(db.search("pad thai", 0).unwrap().is_empty());
    }

    #[test]
    fn rejects_unsafe_collection_names() {
        let result = SqliteVectorDb::with_connection(
            Connection::open_in_memory().unwrap(),
            "recipes; DROP TABLE x",
            Box::new(HashingEmbedder::default()),
        );
        assert!(matches!(result, Err(StorageError::InvalidTableName(_))));
    }
}
