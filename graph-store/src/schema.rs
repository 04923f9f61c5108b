//! Schema definition and loading (spec.md §3, §6).
//!
//! Loading the on-disk configuration document is, per the core's scope,
//! the job of an external collaborator — but the document format is part
//! of the public interface the core accepts, so the parser lives here
//! rather than being left unimplemented.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::types::{PrimitiveType, SchemaError};

/// Relation cardinality between a (source label, destination label) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl Cardinality {
    fn from_schema_name(name: &str) -> Result<Self, SchemaError> {
        match name {
            "ONE_TO_ONE" => Ok(Cardinality::OneToOne),
            "ONE_TO_MANY" => Ok(Cardinality::OneToMany),
            "MANY_TO_ONE" => Ok(Cardinality::ManyToOne),
            "MANY_TO_MANY" => Ok(Cardinality::ManyToMany),
            other => Err(SchemaError::UnknownCardinality(other.to_string())),
        }
    }
}

/// Per-direction edge-storage policy (spec.md §3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeStrategy {
    None,
    Single,
    Multiple,
}

impl EdgeStrategy {
    fn from_schema_name(name: &str) -> Result<Self, SchemaError> {
        match name {
            "None" => Ok(EdgeStrategy::None),
            "Single" => Ok(EdgeStrategy::Single),
            "Multiple" => Ok(EdgeStrategy::Multiple),
            other => Err(SchemaError::UnknownStrategy(other.to_string())),
        }
    }
}

/// One property slot in a vertex or edge type's property list.
#[derive(Debug, Clone)]
pub struct PropertyDef {
    pub property_id: u32,
    pub name: String,
    pub ty: PrimitiveType,
}

/// A vertex label's schema: ordered properties (column 0 is the primary
/// key), and the capacity hint that sizes the Table's extents and the
/// LF-Indexer's slot table.
#[derive(Debug, Clone)]
pub struct VertexType {
    pub name: String,
    pub properties: Vec<PropertyDef>,
    pub max_vertex_num: u32,
}

impl VertexType {
    pub fn primary_key(&self) -> &PropertyDef {
        &self.properties[0]
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }
}

/// One allowed (source label, destination label) pairing for an edge
/// label, with its cardinality and per-direction storage strategy.
#[derive(Debug, Clone)]
pub struct EdgeTriplet {
    pub edge_label: String,
    pub src_label: String,
    pub dst_label: String,
    pub cardinality: Cardinality,
    pub outgoing_strategy: EdgeStrategy,
    pub incoming_strategy: EdgeStrategy,
    /// At most one edge property (spec.md §3, §6).
    pub property: Option<PropertyDef>,
}

/// Immutable, fully-validated schema. Constructed once at graph open via
/// [`Schema::from_yaml`] or [`Schema::validate`]; never mutated afterward.
#[derive(Debug, Clone)]
pub struct Schema {
    pub name: String,
    pub version: u32,
    vertex_types: IndexMap<String, VertexType>,
    /// Keyed by (src_label, edge_label, dst_label).
    triplets: IndexMap<(String, String, String), EdgeTriplet>,
}

impl Schema {
    /// `default_max_vertex_num` (see `EngineConfig::default_max_vertex_num`)
    /// is used for any vertex type whose `x_csr_params.max_vertex_num` is
    /// omitted from the document.
    pub fn from_yaml(doc: &str, default_max_vertex_num: u32) -> Result<Self, SchemaError> {
        let raw: RawSchemaDocument = serde_yaml::from_str(doc).map_err(|e| {
            tracing::error!(error = %e, "schema document failed to parse");
            SchemaError::InvalidDocument(e.to_string())
        })?;
        Self::validate(raw, default_max_vertex_num)
    }

    fn validate(raw: RawSchemaDocument, default_max_vertex_num: u32) -> Result<Self, SchemaError> {
        if raw.store_type != "mutable_csr" {
            return Err(SchemaError::WrongStoreType(raw.store_type));
        }

        let mut vertex_types = IndexMap::new();
        for v in raw.schema.vertex_types {
            if v.primary_keys.len() != 1 {
                return Err(SchemaError::InvalidPrimaryKeyCount(v.type_name.clone()));
            }
            let pk_name = &v.primary_keys[0];
            let mut properties = Vec::with_capacity(v.properties.len());
            for p in &v.properties {
                properties.push(PropertyDef {
                    property_id: p.property_id,
                    name: p.property_name.clone(),
                    ty: PrimitiveType::from_schema_name(&p.property_type.primitive_type)?,
                });
            }
            let pk_pos = properties
                .iter()
                .position(|p| &p.name == pk_name)
                .ok_or(SchemaError::InvalidPrimaryKeyCount(v.type_name.clone()))?;
            if pk_pos != 0 {
                properties.swap(0, pk_pos);
            }
            if properties[0].ty != PrimitiveType::Int64 {
                return Err(SchemaError::PrimaryKeyNotInt64(v.type_name.clone()));
            }
            let max_vertex_num = v
                .x_csr_params
                .as_ref()
                .and_then(|p| p.max_vertex_num)
                .map(|n| n as u32)
                .unwrap_or(default_max_vertex_num);
            vertex_types.insert(
                v.type_name.clone(),
                VertexType {
                    name: v.type_name,
                    properties,
                    max_vertex_num,
                },
            );
        }

        let mut triplets = IndexMap::new();
        for e in raw.schema.edge_types {
            if e.vertex_type_pair_relations.is_empty() {
                return Err(SchemaError::EmptyEdgeType(e.type_name.clone()));
            }
            for rel in e.vertex_type_pair_relations {
                if !vertex_types.contains_key(&rel.source_vertex)
                    || !vertex_types.contains_key(&rel.destination_vertex)
                {
                    return Err(SchemaError::DanglingVertexReference {
                        edge: e.type_name.clone(),
                        src: rel.source_vertex,
                        dst: rel.destination_vertex,
                    });
                }
                let params = rel.x_csr_params.unwrap_or_default();
                let outgoing_strategy = params
                    .outgoing_edge_strategy
                    .as_deref()
                    .map(EdgeStrategy::from_schema_name)
                    .transpose()?
                    .unwrap_or(EdgeStrategy::Multiple);
                let incoming_strategy = params
                    .incoming_edge_strategy
                    .as_deref()
                    .map(EdgeStrategy::from_schema_name)
                    .transpose()?
                    .unwrap_or(EdgeStrategy::Multiple);
                let property = match e.properties.len() {
                    0 => None,
                    1 => Some(PropertyDef {
                        property_id: e.properties[0].property_id,
                        name: e.properties[0].property_name.clone(),
                        ty: PrimitiveType::from_schema_name(
                            &e.properties[0].property_type.primitive_type,
                        )?,
                    }),
                    _ => {
                        return Err(SchemaError::EmptyEdgeType(format!(
                            "{} (edges carry at most one property)",
                            e.type_name
                        )));
                    }
                };
                let cardinality = Cardinality::from_schema_name(&rel.relation)?;
                let key = (
                    rel.source_vertex.clone(),
                    e.type_name.clone(),
                    rel.destination_vertex.clone(),
                );
                triplets.insert(
                    key,
                    EdgeTriplet {
                        edge_label: e.type_name.clone(),
                        src_label: rel.source_vertex,
                        dst_label: rel.destination_vertex,
                        cardinality,
                        outgoing_strategy,
                        incoming_strategy,
                        property,
                    },
                );
            }
        }

        Ok(Schema {
            name: raw.name,
            version: 1,
            vertex_types,
            triplets,
        })
    }

    pub fn vertex_type(&self, label: &str) -> Option<&VertexType> {
        self.vertex_types.get(label)
    }

    pub fn vertex_types(&self) -> impl Iterator<Item = &VertexType> {
        self.vertex_types.values()
    }

    pub fn triplet(&self, src_label: &str, edge_label: &str, dst_label: &str) -> Option<&EdgeTriplet> {
        self.triplets
            .get(&(src_label.to_string(), edge_label.to_string(), dst_label.to_string()))
    }

    pub fn triplets(&self) -> impl Iterator<Item = &EdgeTriplet> {
        self.triplets.values()
    }
}

// --- raw serde_yaml mirror of the on-disk document (spec.md §6) ---

#[derive(Debug, Deserialize)]
struct RawSchemaDocument {
    name: String,
    store_type: String,
    #[serde(default)]
    #[allow(dead_code)]
    stored_procedures: HashMap<String, serde_yaml::Value>,
    schema: RawSchemaBody,
}

#[derive(Debug, Deserialize)]
struct RawSchemaBody {
    #[serde(default)]
    vertex_types: Vec<RawVertexType>,
    #[serde(default)]
    edge_types: Vec<RawEdgeType>,
}

#[derive(Debug, Deserialize)]
struct RawVertexType {
    type_name: String,
    properties: Vec<RawProperty>,
    primary_keys: Vec<String>,
    x_csr_params: Option<RawVertexCsrParams>,
}

#[derive(Debug, Deserialize, Default)]
struct RawVertexCsrParams {
    max_vertex_num: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawProperty {
    property_id: u32,
    property_name: String,
    property_type: RawPropertyType,
}

#[derive(Debug, Deserialize)]
struct RawPropertyType {
    primitive_type: String,
}

#[derive(Debug, Deserialize)]
struct RawEdgeType {
    type_name: String,
    vertex_type_pair_relations: Vec<RawRelation>,
}

#[derive(Debug, Deserialize)]
struct RawRelation {
    source_vertex: String,
    destination_vertex: String,
    relation: String,
    x_csr_params: Option<RawEdgeCsrParams>,
    #[serde(default)]
    properties: Vec<RawProperty>,
}

#[derive(Debug, Deserialize, Default)]
struct RawEdgeCsrParams {
    incoming_edge_strategy: Option<String>,
    outgoing_edge_strategy: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
name: social
store_type: mutable_csr
schema:
  vertex_types:
    - type_name: person
      properties:
        - property_id: 0
          property_name: id
          property_type: { primitive_type: DT_SIGNED_INT64 }
        - property_id: 1
          property_name: name
          property_type: { primitive_type: DT_STRING }
      primary_keys: [id]
      x_csr_params: { max_vertex_num: 1000 }
  edge_types:
    - type_name: knows
      vertex_type_pair_relations:
        - source_vertex: person
          destination_vertex: person
          relation: MANY_TO_MANY
          x_csr_params:
            outgoing_edge_strategy: Multiple
            incoming_edge_strategy: Multiple
          properties:
            - property_id: 0
              property_name: weight
              property_type: { primitive_type: DT_DOUBLE }
"#;

    #[test]
    fn parses_minimal_schema() {
        let schema = Schema::from_yaml(DOC, 1 << 20).unwrap();
        assert_eq!(schema.name, "social");
        let person = schema.vertex_type("person").unwrap();
        assert_eq!(person.primary_key().name, "id");
        assert_eq!(person.max_vertex_num, 1000);
        let triplet = schema.triplet("person", "knows", "person").unwrap();
        assert_eq!(triplet.cardinality, Cardinality::ManyToMany);
        assert_eq!(triplet.outgoing_strategy, EdgeStrategy::Multiple);
        assert_eq!(triplet.property.as_ref().unwrap().name, "weight");
    }

    #[test]
    fn rejects_wrong_store_type() {
        let doc = DOC.replace("mutable_csr", "paged");
        let err = Schema::from_yaml(&doc, 1 << 20).unwrap_err();
        assert!(matches!(err, SchemaError::WrongStoreType(_)));
    }

    #[test]
    fn rejects_non_int64_primary_key() {
        let doc = DOC.replace("DT_SIGNED_INT64", "DT_STRING");
        let err = Schema::from_yaml(&doc, 1 << 20).unwrap_err();
        assert!(matches!(err, SchemaError::PrimaryKeyNotInt64(_)));
    }
}
