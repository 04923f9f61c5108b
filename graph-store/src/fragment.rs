//! Fragment: the composite graph instance (spec.md §4.5).
//!
//! Owns every Table, LF-Indexer and Mutable CSR; all "edges" are
//! `(src_vid, dst_vid)` pairs rather than pointers, so there is no cycle
//! in the ownership graph even though the logical graph is cyclic
//! (spec.md §9).

use std::collections::HashMap;
use std::sync::Arc;

use crate::arena::Arena;
use crate::csr::MutableCsr;
use crate::indexer::LfIndexer;
use crate::schema::{EdgeStrategy, Schema};
use crate::table::Table;
use crate::types::{GraphError, PropertyValue};

/// Direction of an adjacency list relative to the vertex it's indexed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// How `add_edge` resolves endpoints that aren't already present
/// (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointMode {
    /// Missing endpoints are rejected with `UnknownVertex`.
    Strict,
    /// Missing endpoints are created with null non-primary properties.
    Upsert,
}

struct LabelStorage {
    indexer: LfIndexer,
    table: Table,
}

/// Key identifying one (source label, edge label, destination label,
/// direction) adjacency structure.
type TripletKey = (String, String, String, Direction);

pub struct Fragment {
    schema: Schema,
    labels: HashMap<String, LabelStorage>,
    csrs: HashMap<TripletKey, MutableCsr>,
    arena: Arc<Arena>,
}

impl Fragment {
    /// Builds empty storage for every label and triplet declared in
    /// `schema`. This is the "cold start with no snapshot" path;
    /// `Persistence::load` populates an already-built `Fragment` from
    /// disk instead of calling this directly for recovery.
    pub fn new(schema: Schema) -> Self {
        let arena = Arc::new(Arena::new());
        let mut labels = HashMap::new();
        for vt in schema.vertex_types() {
            labels.insert(
                vt.name.clone(),
                LabelStorage {
                    indexer: LfIndexer::new(vt.name.clone(), vt.max_vertex_num),
                    table: Table::new(vt),
                },
            );
        }

        let mut csrs = HashMap::new();
        for triplet in schema.triplets() {
            let src_cap = schema.vertex_type(&triplet.src_label).unwrap().max_vertex_num;
            let dst_cap = schema.vertex_type(&triplet.dst_label).unwrap().max_vertex_num;
            let prop_type = triplet.property.as_ref().map(|p| p.ty);

            csrs.insert(
                (
                    triplet.src_label.clone(),
                    triplet.edge_label.clone(),
                    triplet.dst_label.clone(),
                    Direction::Outgoing,
                ),
                MutableCsr::new(triplet.outgoing_strategy, prop_type, src_cap, arena.clone()),
            );
            csrs.insert(
                (
                    triplet.src_label.clone(),
                    triplet.edge_label.clone(),
                    triplet.dst_label.clone(),
                    Direction::Incoming,
                ),
                MutableCsr::new(triplet.incoming_strategy, prop_type, dst_cap, arena.clone()),
            );
        }

        Fragment { schema, labels, csrs, arena }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn arena(&self) -> &Arc<Arena> {
        &self.arena
    }

    fn storage(&self, label: &str) -> Result<&LabelStorage, GraphError> {
        self.labels.get(label).ok_or_else(|| GraphError::UnknownLabel(label.to_string()))
    }

    pub fn vertex_num(&self, label: &str) -> Result<u32, GraphError> {
        Ok(self.storage(label)?.indexer.size())
    }

    pub fn get_vertex(&self, label: &str, key: i64) -> Result<Option<u32>, GraphError> {
        Ok(self.storage(label)?.indexer.lookup(key))
    }

    pub fn get_property(&self, label: &str, vid: u32, col: usize) -> Result<PropertyValue, GraphError> {
        self.storage(label)?.table.get(col, vid)
    }

    pub fn get_property_by_name(
        &self,
        label: &str,
        vid: u32,
        col_name: &str,
    ) -> Result<PropertyValue, GraphError> {
        let vt = self.schema.vertex_type(label).ok_or_else(|| GraphError::UnknownLabel(label.to_string()))?;
        let col = vt.column_index(col_name).ok_or_else(|| GraphError::UnknownColumn {
            label: label.to_string(),
            col: col_name.to_string(),
        })?;
        self.get_property(label, vid, col)
    }

    /// Writer-only. `properties` are ordered to match the vertex type's
    /// declared property list (primary key first).
    pub fn add_vertex(
        &self,
        label: &str,
        properties: &[PropertyValue],
    ) -> Result<u32, GraphError> {
        let storage = self.storage(label)?;
        let pk = properties[0].as_i64().ok_or_else(|| GraphError::TypeMismatch {
            col: "primary_key".into(),
            expected: crate::types::PrimitiveType::Int64,
            got: properties[0].primitive_type().unwrap_or(crate::types::PrimitiveType::Int64),
        })?;
        // Reserve the vid but keep the key unpublished until every column
        // is populated, so a concurrent reader resolving `pk` through the
        // indexer can never observe a live vid with uninitialized columns
        // (mirrors the column-then-index ordering `persistence::load` uses).
        let pending = storage.indexer.reserve(pk)?;
        let vid = pending.vid();
        for (col, value) in properties.iter().enumerate() {
            storage.table.set(col, vid, value)?;
        }
        storage.indexer.publish(pending, pk);
        tracing::trace!(label, vid, "vertex added");
        Ok(vid)
    }

    /// Resolves `key` to a vid under `label`, creating it via `upsert`
    /// semantics (null non-primary properties) if `mode` allows and it's
    /// missing.
    fn resolve_endpoint(&self, label: &str, key: i64, mode: EndpointMode) -> Result<u32, GraphError> {
        let storage = self.storage(label)?;
        if let Some(vid) = storage.indexer.lookup(key) {
            return Ok(vid);
        }
        match mode {
            EndpointMode::Strict => Err(GraphError::UnknownVertex { label: label.to_string(), key }),
            EndpointMode::Upsert => {
                let vt = self.schema.vertex_type(label).expect("validated at open");
                let mut props = vec![PropertyValue::default_for(vt.properties[0].ty); vt.properties.len()];
                props[0] = PropertyValue::Int64(key);
                for (col, p) in vt.properties.iter().enumerate().skip(1) {
                    props[col] = PropertyValue::default_for(p.ty);
                }
                self.add_vertex(label, &props)
            }
        }
    }

    /// Writer-only. Records two CSR inserts — outgoing on the source,
    /// incoming on the destination — both carrying `timestamp`.
    #[allow(clippy::too_many_arguments)]
    pub fn add_edge(
        &self,
        src_label: &str,
        src_key: i64,
        dst_label: &str,
        dst_key: i64,
        edge_label: &str,
        prop: Option<PropertyValue>,
        timestamp: u64,
        mode: EndpointMode,
    ) -> Result<(), GraphError> {
        let src_vid = self.resolve_endpoint(src_label, src_key, mode)?;
        let dst_vid = self.resolve_endpoint(dst_label, dst_key, mode)?;

        let out_key = (src_label.to_string(), edge_label.to_string(), dst_label.to_string(), Direction::Outgoing);
        let in_key = (src_label.to_string(), edge_label.to_string(), dst_label.to_string(), Direction::Incoming);

        let out_csr = self
            .csrs
            .get(&out_key)
            .ok_or_else(|| GraphError::UnknownTriplet {
                src_label: src_label.to_string(),
                edge_label: edge_label.to_string(),
                dst_label: dst_label.to_string(),
            })?;
        let in_csr = self.csrs.get(&in_key).expect("outgoing/incoming CSRs are always built in pairs");

        out_csr.insert(src_vid, dst_vid, timestamp, prop.as_ref())?;
        in_csr.insert(dst_vid, src_vid, timestamp, prop.as_ref())?;
        tracing::trace!(src_label, src_vid, dst_label, dst_vid, edge_label, timestamp, "edge added");
        Ok(())
    }

    fn csr_for(
        &self,
        src_label: &str,
        edge_label: &str,
        dst_label: &str,
        direction: Direction,
    ) -> Result<&MutableCsr, GraphError> {
        self.csrs
            .get(&(src_label.to_string(), edge_label.to_string(), dst_label.to_string(), direction))
            .ok_or_else(|| GraphError::UnknownTriplet {
                src_label: src_label.to_string(),
                edge_label: edge_label.to_string(),
                dst_label: dst_label.to_string(),
            })
    }

    pub fn out_edges(
        &self,
        src_label: &str,
        src_vid: u32,
        edge_label: &str,
        dst_label: &str,
        ts: u64,
    ) -> Result<impl Iterator<Item = (u32, Option<PropertyValue>, u64)> + '_, GraphError> {
        let csr = self.csr_for(src_label, edge_label, dst_label, Direction::Outgoing)?;
        Ok(csr.edges_of(src_vid, ts))
    }

    pub fn in_edges(
        &self,
        dst_label: &str,
        dst_vid: u32,
        edge_label: &str,
        src_label: &str,
        ts: u64,
    ) -> Result<impl Iterator<Item = (u32, Option<PropertyValue>, u64)> + '_, GraphError> {
        let csr = self.csr_for(src_label, edge_label, dst_label, Direction::Incoming)?;
        Ok(csr.edges_of(dst_vid, ts))
    }

    /// Used by persistence and UpdateTransaction replay to index tables
    /// and indexers directly.
    pub(crate) fn label_indexer(&self, label: &str) -> Result<&LfIndexer, GraphError> {
        Ok(&self.storage(label)?.indexer)
    }

    pub(crate) fn label_table(&self, label: &str) -> Result<&Table, GraphError> {
        Ok(&self.storage(label)?.table)
    }

    pub(crate) fn csr(
        &self,
        src_label: &str,
        edge_label: &str,
        dst_label: &str,
        direction: Direction,
    ) -> Result<&MutableCsr, GraphError> {
        self.csr_for(src_label, edge_label, dst_label, direction)
    }

    /// Replaces `label`'s indexer in place. Takes `&mut self`: only called
    /// by persistence load, before the `Fragment` is shared with any
    /// transaction.
    pub(crate) fn restore_indexer(&mut self, label: &str, indexer: LfIndexer) -> Result<(), GraphError> {
        let slot = self.labels.get_mut(label).ok_or_else(|| GraphError::UnknownLabel(label.to_string()))?;
        slot.indexer = indexer;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn social_schema() -> Schema {
        Schema::from_yaml(
            r#"
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
      x_csr_params: { max_vertex_num: 64 }
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
"#,
            1 << 20,
        )
        .unwrap()
    }

    #[test]
    fn scenario_1_basic_insert_and_traverse() {
        let frag = Fragment::new(social_schema());
        let v0 = frag
            .add_vertex("person", &[PropertyValue::Int64(1), PropertyValue::String("a".into())])
            .unwrap();
        let v1 = frag
            .add_vertex("person", &[PropertyValue::Int64(2), PropertyValue::String("b".into())])
            .unwrap();
        assert_eq!(v0, 0);
        assert_eq!(v1, 1);

        frag.add_edge(
            "person",
            1,
            "person",
            2,
            "knows",
            Some(PropertyValue::Double(0.5)),
            1,
            EndpointMode::Strict,
        )
        .unwrap();

        let edges: Vec<_> = frag.out_edges("person", 0, "knows", "person", 1).unwrap().collect();
        assert_eq!(edges, vec![(1, Some(PropertyValue::Double(0.5)), 1)]);
    }

    #[test]
    fn scenario_2_duplicate_key_rejected() {
        let frag = Fragment::new(social_schema());
        frag.add_vertex("person", &[PropertyValue::Int64(1), PropertyValue::String("a".into())])
            .unwrap();
        frag.add_vertex("person", &[PropertyValue::Int64(2), PropertyValue::String("b".into())])
            .unwrap();
        let err = frag
            .add_vertex("person", &[PropertyValue::Int64(1), PropertyValue::String("c".into())])
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateKey { .. }));
        assert_eq!(frag.vertex_num("person").unwrap(), 2);
    }

    #[test]
    fn upsert_creates_missing_endpoints() {
        let frag = Fragment::new(social_schema());
        frag.add_edge("person", 1, "person", 2, "knows", None, 1, EndpointMode::Upsert)
            .unwrap();
        assert_eq!(frag.vertex_num("person").unwrap(), 2);
        assert_eq!(frag.get_vertex("person", 1).unwrap(), Some(0));
        assert_eq!(frag.get_vertex("person", 2).unwrap(), Some(1));
    }

    #[test]
    fn strict_mode_rejects_unknown_endpoint() {
        let frag = Fragment::new(social_schema());
        frag.add_vertex("person", &[PropertyValue::Int64(1), PropertyValue::String("a".into())])
            .unwrap();
        let err = frag
            .add_edge("person", 1, "person", 999, "knows", None, 1, EndpointMode::Strict)
            .unwrap_err();
        assert!(matches!(err, GraphError::UnknownVertex { .. }));
    }

    #[test]
    fn scenario_6_capacity_exceeded() {
        let schema = Schema::from_yaml(
            r#"
name: small
store_type: mutable_csr
schema:
  vertex_types:
    - type_name: person
      properties:
        - property_id: 0
          property_name: id
          property_type: { primitive_type: DT_SIGNED_INT64 }
      primary_keys: [id]
      x_csr_params: { max_vertex_num: 2 }
  edge_types: []
"#,
            1 << 20,
        )
        .unwrap();
        let frag = Fragment::new(schema);
        frag.add_vertex("person", &[PropertyValue::Int64(1)]).unwrap();
        frag.add_vertex("person", &[PropertyValue::Int64(2)]).unwrap();
        let err = frag.add_vertex("person", &[PropertyValue::Int64(3)]).unwrap_err();
        assert!(matches!(err, GraphError::CapacityExceeded { .. }));
        assert_eq!(frag.vertex_num("person").unwrap(), 2);
    }
}
