//! Structured retrieval over the location table: row embeddings are
//! precomputed at build time, queries rank rows by cosine similarity, and
//! each hit is projected into the JSON shape the frontend renders.

use crate::models::RetrievedDocument;
use crate::retriever::{cosine_similarity, Retriever};
use anyhow::{bail, Context};
use providers::EmbeddingProvider;
use sqlx::SqlitePool;
use std::cmp::Ordering;
use std::sync::Arc;

pub const LOCATION_TABLE: &str = "locations";
pub const EMBEDDING_COLUMN: &str = "embedding";
pub const LOCATION_SOURCE: &str = "locations";

/// Column order is a contract shared with the fetch and with
/// `LocationRecord::from_fields`; both fail construction on any mismatch.
pub const LOCATION_COLUMNS: [&str; 23] = [
    "id",
    "name",
    "address",
    "city",
    "state",
    "country",
    "zip_code",
    "latitude",
    "longitude",
    "description",
    "phone",
    "sunday_hours",
    "monday_hours",
    "tuesday_hours",
    "wednesday_hours",
    "thursday_hours",
    "friday_hours",
    "saturday_hours",
    "rating",
    "address_link",
    "website",
    "resource_type",
    "county",
];

/// One location row with every column bound to a named field, built
/// directly from the ordered column list at fetch time.
#[derive(Debug, Clone)]
pub struct LocationRecord {
    pub id: String,
    pub name: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub zip_code: String,
    pub latitude: String,
    pub longitude: String,
    pub description: String,
    pub phone: String,
    pub sunday_hours: String,
    pub monday_hours: String,
    pub tuesday_hours: String,
    pub wednesday_hours: String,
    pub thursday_hours: String,
    pub friday_hours: String,
    pub saturday_hours: String,
    pub rating: String,
    pub address_link: String,
    pub website: String,
    pub resource_type: String,
    pub county: String,
}

impl LocationRecord {
    pub fn from_fields(fields: &[String]) -> anyhow::Result<Self> {
        let [id, name, address, city, state, country, zip_code, latitude, longitude, description, phone, sunday_hours, monday_hours, tuesday_hours, wednesday_hours, thursday_hours, friday_hours, saturday_hours, rating, address_link, website, resource_type, county] =
            fields
        else {
            bail!(
                "location row has {} fields, expected {}",
                fields.len(),
                LOCATION_COLUMNS.len()
            );
        };
        Ok(Self {
            id: id.clone(),
            name: name.clone(),
            address: address.clone(),
            city: city.clone(),
            state: state.clone(),
            country: country.clone(),
            zip_code: zip_code.clone(),
            latitude: latitude.clone(),
            longitude: longitude.clone(),
            description: description.clone(),
            phone: phone.clone(),
            sunday_hours: sunday_hours.clone(),
            monday_hours: monday_hours.clone(),
            tuesday_hours: tuesday_hours.clone(),
            wednesday_hours: wednesday_hours.clone(),
            thursday_hours: thursday_hours.clone(),
            friday_hours: friday_hours.clone(),
            saturday_hours: saturday_hours.clone(),
            rating: rating.clone(),
            address_link: address_link.clone(),
            website: website.clone(),
            resource_type: resource_type.clone(),
            county: county.clone(),
        })
    }

    /// The JSON shape the frontend renders: unified address, weekday hours
    /// array (sunday first), numeric latitude/longitude/rating where they
    /// parse, fixed default confidence.
    pub fn projection(&self) -> serde_json::Value {
        serde_json::json!({
            "address": format!("{}, {}, {} {}", self.address, self.city, self.state, self.zip_code),
            "addressLink": self.address_link,
            "confidence": 1,
            "description": self.description,
            "hoursOfOperation": [
                { "sunday": self.sunday_hours },
                { "monday": self.monday_hours },
                { "tuesday": self.tuesday_hours },
                { "wednesday": self.wednesday_hours },
                { "thursday": self.thursday_hours },
                { "friday": self.friday_hours },
                { "saturday": self.saturday_hours },
            ],
            "id": self.id,
            "isSaved": false,
            "latitude": numeric_or_text(&self.latitude),
            "longitude": numeric_or_text(&self.longitude),
            "name": self.name,
            "phone": self.phone,
            "rating": numeric_or_text(&self.rating),
            "website": self.website,
        })
    }
}

/// Numeric parse attempted, left as text on failure.
fn numeric_or_text(value: &str) -> serde_json::Value {
    match value.trim().parse::<f64>() {
        Ok(n) => serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or_else(|| serde_json::Value::String(value.to_string())),
        Err(_) => serde_json::Value::String(value.to_string()),
    }
}

/// Cosine-similarity ranking over a fixed table, top-k, ties stable in
/// original fetch order.
pub struct TableColumnRetriever {
    records: Vec<LocationRecord>,
    embeddings: Vec<Vec<f32>>,
    embedder: Arc<dyn EmbeddingProvider>,
    k: usize,
}

impl TableColumnRetriever {
    /// Reads every row once and validates the positional contract; a row
    /// with the wrong field count or a bad embedding aborts the build
    /// rather than risking silently misaligned columns.
    pub async fn build(
        pool: &SqlitePool,
        embedder: Arc<dyn EmbeddingProvider>,
        k: usize,
    ) -> anyhow::Result<Self> {
        let rows =
            storage::fetch_location_rows(pool, LOCATION_TABLE, &LOCATION_COLUMNS, EMBEDDING_COLUMN)
                .await
                .context("fetch location rows")?;

        let mut records = Vec::with_capacity(rows.len());
        let mut embeddings = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(
                LocationRecord::from_fields(&row.fields).context("build location retriever")?,
            );
            embeddings.push(row.embedding);
        }

        tracing::debug!(rows = records.len(), "location retriever built");
        Ok(Self {
            records,
            embeddings,
            embedder,
            k,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn rank(&self, query_vector: &[f32]) -> Vec<(usize, f32)> {
        rank_by_similarity(query_vector, &self.embeddings, self.k)
    }
}

/// Indices of the top-k most similar embeddings, descending; equal scores
/// keep original order. k larger than the row count returns everything.
pub(crate) fn rank_by_similarity(
    query: &[f32],
    embeddings: &[Vec<f32>],
    k: usize,
) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = embeddings
        .iter()
        .enumerate()
        .map(|(i, e)| (i, cosine_similarity(query, e)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    scored.truncate(k);
    scored
}

#[async_trait::async_trait]
impl Retriever for TableColumnRetriever {
    async fn retrieve(&self, query: &str) -> anyhow::Result<Vec<RetrievedDocument>> {
        let query_vector = self
            .embedder
            .embed_query(query)
            .await
            .context("embed query")?;

        let mut docs = Vec::new();
        for (idx, score) in self.rank(&query_vector) {
            let content = serde_json::to_string(&self.records[idx].projection())?;
            let mut doc = RetrievedDocument::new(content, LOCATION_SOURCE);
            doc.score = Some(score);
            docs.push(doc);
        }
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<String> {
        vec![
            "loc-1",
            "Coastal Dental",
            "101 Shoreline Blvd",
            "Corpus Christi",
            "TX",
            "USA",
            "78401",
            "27.8006",
            "-97.3964",
            "Full-service dental clinic",
            "361-555-0101",
            "Closed",
            "8am-5pm",
            "8am-5pm",
            "8am-5pm",
            "8am-5pm",
            "8am-3pm",
            "Closed",
            "4.5",
            "https://maps.example.com/loc-1",
            "https://coastaldental.example.com",
            "dental",
            "Nueces",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    #[test]
    fn record_unpacks_in_column_order() {
        let record = LocationRecord::from_fields(&fields()).unwrap();
        assert_eq!(record.id, "loc-1");
        assert_eq!(record.city, "Corpus Christi");
        assert_eq!(record.saturday_hours, "Closed");
        assert_eq!(record.county, "Nueces");
    }

    #[test]
    fn wrong_field_count_fails() {
        let mut short = fields();
        short.pop();
        assert!(LocationRecord::from_fields(&short).is_err());
    }

    #[test]
    fn projection_normalizes_fields() {
        let record = LocationRecord::from_fields(&fields()).unwrap();
        let value = record.projection();
        assert_eq!(
            value["address"],
            "101 Shoreline Blvd, Corpus Christi, TX 78401"
        );
        assert_eq!(value["confidence"], 1);
        assert_eq!(value["isSaved"], false);
        assert!((value["latitude"].as_f64().unwrap() - 27.8006).abs() < 1e-9);
        assert!((value["rating"].as_f64().unwrap() - 4.5).abs() < 1e-9);
        let hours = value["hoursOfOperation"].as_array().unwrap();
        assert_eq!(hours.len(), 7);
        assert_eq!(hours[0]["sunday"], "Closed");
        assert_eq!(hours[6]["saturday"], "Closed");
    }

    #[test]
    fn unparseable_numbers_stay_text() {
        let mut f = fields();
        f[18] = "No reviews".to_string();
        let value = LocationRecord::from_fields(&f).unwrap().projection();
        assert_eq!(value["rating"], "No reviews");
    }

    #[test]
    fn ranking_is_descending_and_stable() {
        let embeddings = vec![
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![1.0, 0.0],
            vec![0.5, 0.5],
        ];
        let ranked = rank_by_similarity(&[1.0, 0.0], &embeddings, 3);
        let order: Vec<usize> = ranked.iter().map(|(i, _)| *i).collect();
        // Ties between rows 1 and 2 keep fetch order.
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn ranking_with_oversized_k_returns_all() {
        let embeddings = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let ranked = rank_by_similarity(&[1.0, 0.0], &embeddings, 10);
        assert_eq!(ranked.len(), 2);
    }
}
