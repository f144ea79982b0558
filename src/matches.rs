//! Match Store (§4.7): upsert keyed on `(code_a, code_b)`, active-flag
//! expiry, and confidence/similarity-filtered reads. The upsert shape
//! follows the teacher's `ON CONFLICT DO UPDATE` usage in
//! `signals::db_storage`, generalized to the product-match row.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{MatchConfidence, MatchType, ProductMatch, SimilarityFeatures};

pub struct MatchStore<'a> {
    conn: &'a Connection,
}

impl<'a> MatchStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Upsert a match, ordering the pair key and refreshing
    /// `similarity_score`/`match_type`/`confidence`/`features`/
    /// `updated_at`, reactivating it if it had expired.
    pub fn upsert(&self, m: &ProductMatch) -> anyhow::Result<()> {
        let features_json = serde_json::to_string(&m.features)?;
        self.conn.execute(
            "INSERT INTO product_matches
                (code_a, code_b, similarity_score, match_type, confidence, features,
                 ml_version, active, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,1,?8,?8)
             ON CONFLICT(code_a, code_b) DO UPDATE SET
                similarity_score = excluded.similarity_score,
                match_type = excluded.match_type,
                confidence = excluded.confidence,
                features = excluded.features,
                ml_version = excluded.ml_version,
                active = 1,
                updated_at = excluded.updated_at",
            params![
                m.code_a,
                m.code_b,
                m.similarity_score,
                match_type_str(m.match_type),
                confidence_str(m.confidence),
                features_json,
                m.ml_version,
                m.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Active matches for `code` with `similarity_score ≥ min_similarity`.
    pub fn active_matches_for(&self, code: &str, min_similarity: f64) -> anyhow::Result<Vec<ProductMatch>> {
        let mut stmt = self.conn.prepare(
            "SELECT code_a, code_b, similarity_score, match_type, confidence, features,
                    ml_version, active, created_at, updated_at
             FROM product_matches
             WHERE active = 1 AND similarity_score >= ?1 AND (code_a = ?2 OR code_b = ?2)",
        )?;
        let rows = stmt
            .query_map(params![min_similarity, code], row_to_match)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get(&self, code_a: &str, code_b: &str) -> anyhow::Result<Option<ProductMatch>> {
        self.conn
            .query_row(
                "SELECT code_a, code_b, similarity_score, match_type, confidence, features,
                        ml_version, active, created_at, updated_at
                 FROM product_matches WHERE code_a = ?1 AND code_b = ?2",
                params![code_a, code_b],
                row_to_match,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Mark inactive any row last updated before `now - ttl`. Returns
    /// the number of rows deactivated.
    pub fn expire_stale(&self, ttl: std::time::Duration) -> anyhow::Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::from_std(ttl)?;
        let n = self.conn.execute(
            "UPDATE product_matches SET active = 0 WHERE active = 1 AND updated_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(n)
    }

    pub fn active_count(&self) -> anyhow::Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT count(*) FROM product_matches WHERE active = 1", [], |r| r.get(0))?)
    }
}

fn match_type_str(t: MatchType) -> &'static str {
    match t {
        MatchType::Exact => "exact",
        MatchType::Similar => "similar",
        MatchType::Variant => "variant",
        MatchType::Category => "category",
    }
}

fn match_type_from_str(s: &str) -> MatchType {
    match s {
        "exact" => MatchType::Exact,
        "similar" => MatchType::Similar,
        "variant" => MatchType::Variant,
        _ => MatchType::Category,
    }
}

fn confidence_str(c: MatchConfidence) -> &'static str {
    match c {
        MatchConfidence::VeryLow => "very_low",
        MatchConfidence::Low => "low",
        MatchConfidence::Medium => "medium",
        MatchConfidence::High => "high",
        MatchConfidence::VeryHigh => "very_high",
    }
}

fn confidence_from_str(s: &str) -> MatchConfidence {
    match s {
        "very_low" => MatchConfidence::VeryLow,
        "low" => MatchConfidence::Low,
        "medium" => MatchConfidence::Medium,
        "high" => MatchConfidence::High,
        "very_high" => MatchConfidence::VeryHigh,
        _ => MatchConfidence::VeryLow,
    }
}

fn row_to_match(row: &rusqlite::Row) -> rusqlite::Result<ProductMatch> {
    let features_json: String = row.get(5)?;
    let features: SimilarityFeatures = serde_json::from_str(&features_json).unwrap_or_default();
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;
    Ok(ProductMatch {
        code_a: row.get(0)?,
        code_b: row.get(1)?,
        similarity_score: row.get(2)?,
        match_type: match_type_from_str(&row.get::<_, String>(3)?),
        confidence: confidence_from_str(&row.get::<_, String>(4)?),
        features,
        ml_version: row.get(6)?,
        active: row.get::<_, i64>(7)? != 0,
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
        updated_at: updated_at.parse().unwrap_or_else(|_| Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_test_pool;
    use crate::models::SimilarityFeatures;

    fn sample_match(a: &str, b: &str, score: f64) -> ProductMatch {
        ProductMatch::ordered(
            a.to_string(),
            b.to_string(),
            score,
            MatchConfidence::High,
            MatchType::Similar,
            SimilarityFeatures::default(),
            None,
        )
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let pool = open_test_pool().unwrap();
        let conn = pool.get().unwrap();
        let store = MatchStore::new(&conn);

        let m = sample_match("FAL0000001", "RIP0000002", 0.95);
        store.upsert(&m).unwrap();

        let fetched = store.get("FAL0000001", "RIP0000002").unwrap().unwrap();
        assert_eq!(fetched.similarity_score, 0.95);
        assert!(fetched.active);
    }

    #[test]
    fn upsert_is_idempotent_on_pair_key() {
        let pool = open_test_pool().unwrap();
        let conn = pool.get().unwrap();
        let store = MatchStore::new(&conn);

        store.upsert(&sample_match("FAL0000001", "RIP0000002", 0.80)).unwrap();
        store.upsert(&sample_match("FAL0000001", "RIP0000002", 0.91)).unwrap();

        assert_eq!(store.active_count().unwrap(), 1);
        let fetched = store.get("FAL0000001", "RIP0000002").unwrap().unwrap();
        assert_eq!(fetched.similarity_score, 0.91);
    }

    #[test]
    fn expire_stale_deactivates_old_rows() {
        let pool = open_test_pool().unwrap();
        let conn = pool.get().unwrap();
        let store = MatchStore::new(&conn);
        store.upsert(&sample_match("FAL0000001", "RIP0000002", 0.95)).unwrap();

        conn.execute(
            "UPDATE product_matches SET updated_at = ?1",
            params!["2000-01-01T00:00:00Z"],
        )
        .unwrap();

        let deactivated = store.expire_stale(std::time::Duration::from_secs(86_400)).unwrap();
        assert_eq!(deactivated, 1);
        assert_eq!(store.active_count().unwrap(), 0);
    }

    #[test]
    fn active_matches_for_filters_by_min_similarity() {
        let pool = open_test_pool().unwrap();
        let conn = pool.get().unwrap();
        let store = MatchStore::new(&conn);
        store.upsert(&sample_match("FAL0000001", "RIP0000002", 0.60)).unwrap();
        store.upsert(&sample_match("FAL0000001", "PAR0000003", 0.95)).unwrap();

        let results = store.active_matches_for("FAL0000001", 0.85).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].code_b, "PAR0000003");
    }
}
