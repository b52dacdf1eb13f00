//! Batch creation of objects and relationships from a JSON document.
//!
//! Objects may carry a local `ref`; relationship endpoints name either such a
//! ref or the canonical id of an existing object.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use strata_core::{CanonicalId, CreateObject, CreateRelationship, Result, StrataError, TenantScope};
use strata_store::GraphStore;

use crate::embed::EmbeddingProvider;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportBatch {
    #[serde(default)]
    pub objects: Vec<ImportObject>,
    #[serde(default)]
    pub relationships: Vec<ImportRelationship>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportObject {
    #[serde(rename = "ref", default)]
    pub local_ref: Option<String>,
    #[serde(flatten)]
    pub object: CreateObject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRelationship {
    #[serde(rename = "type")]
    pub rel_type: String,
    /// Local ref or canonical id.
    pub src: String,
    /// Local ref or canonical id.
    pub dst: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportSummary {
    pub objects: usize,
    pub relationships: usize,
    /// Canonical ids assigned to local refs.
    pub refs: BTreeMap<String, CanonicalId>,
}

fn endpoint(refs: &BTreeMap<String, CanonicalId>, raw: &str) -> Result<CanonicalId> {
    if let Some(id) = refs.get(raw) {
        return Ok(*id);
    }
    Uuid::parse_str(raw).map(CanonicalId).map_err(|_| {
        StrataError::validation("import", format!("unknown endpoint reference: {raw}"))
    })
}

/// Create every object, then every relationship, stopping at the first
/// error. Objects without an embedding get one from `embedder` when given.
pub async fn import_batch(
    store: &GraphStore,
    tenant: &TenantScope,
    batch: ImportBatch,
    embedder: Option<&dyn EmbeddingProvider>,
) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();

    for item in batch.objects {
        if let Some(local) = &item.local_ref {
            if summary.refs.contains_key(local) {
                return Err(StrataError::validation(
                    "import",
                    format!("duplicate ref: {local}"),
                ));
            }
        }
        let mut input = item.object;
        if input.embedding.is_none() {
            if let Some(embedder) = embedder {
                let text = embedding_text(&input);
                input.embedding = Some(embedder.embed(&text).await?);
            }
        }
        let created = store.create_object(tenant, input).await?;
        if let Some(local) = item.local_ref {
            summary.refs.insert(local, created.canonical_id);
        }
        summary.objects += 1;
    }

    for rel in batch.relationships {
        let src = endpoint(&summary.refs, &rel.src)?;
        let dst = endpoint(&summary.refs, &rel.dst)?;
        let mut input = CreateRelationship::new(rel.rel_type, src, dst);
        input.properties = rel.properties;
        input.weight = rel.weight;
        store.create_relationship(tenant, input).await?;
        summary.relationships += 1;
    }

    info!(
        organization_id = %tenant.organization_id,
        project_id = %tenant.project_id,
        objects = summary.objects,
        relationships = summary.relationships,
        "Import complete"
    );
    Ok(summary)
}

/// Text embedded for an object: its type, key and string properties.
fn embedding_text(input: &CreateObject) -> String {
    let mut parts: Vec<&str> = vec![input.object_type.as_str()];
    if let Some(key) = &input.key {
        parts.push(key);
    }
    parts.extend(input.properties.values().filter_map(|v| v.as_str()));
    parts.join(" ")
}
