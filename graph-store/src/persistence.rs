//! Snapshot dump/load and the on-disk manifest (spec.md §6).
//!
//! A snapshot is a `bincode`-serialized intermediate form of each label's
//! indexer, table columns and CSR adjacency lists rather than a literal
//! byte-for-byte image of the mmap'd extents described informally in
//! spec.md §6 — see DESIGN.md for why that simplification is safe here.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::fragment::{Direction, Fragment};
use crate::schema::Schema;
use crate::types::{GraphError, PropertyValue};

/// Fingerprint recorded at dump time and checked at load time so a
/// snapshot never gets replayed against a schema it wasn't written for.
#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    schema_name: String,
    schema_version: u32,
    /// Highest WAL timestamp folded into this snapshot; replay on open
    /// skips every WAL record at or below this.
    snapshot_ts: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct LabelSnapshot {
    label: String,
    indexer_entries: Vec<(i64, u32)>,
    /// One `Vec<PropertyValue>` per column, each of length `vertex_num`.
    columns: Vec<Vec<PropertyValue>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CsrSnapshot {
    /// One record list per source vid, each `(neighbor, timestamp, prop)`.
    lists: Vec<Vec<(u32, u64, Option<PropertyValue>)>>,
}

fn direction_suffix(dir: Direction) -> &'static str {
    match dir {
        Direction::Outgoing => "out",
        Direction::Incoming => "in",
    }
}

/// Writes a full snapshot of `fragment` under `config.data_dir`, then the
/// manifest last so a crash mid-dump never leaves a manifest pointing at
/// a half-written snapshot.
pub fn dump(config: &EngineConfig, fragment: &Fragment, snapshot_ts: u64) -> Result<(), GraphError> {
    fs::create_dir_all(&config.data_dir)?;

    for vt in fragment.schema().vertex_types() {
        let label = vt.name.as_str();
        let indexer = fragment.label_indexer(label)?;
        let table = fragment.label_table(label)?;
        let vertex_num = indexer.size();

        let mut columns = Vec::with_capacity(table.column_count());
        for col in 0..table.column_count() {
            columns.push(table.iter_column(col, vertex_num).collect());
        }

        let snapshot = LabelSnapshot {
            label: label.to_string(),
            indexer_entries: indexer.snapshot_iter().collect(),
            columns,
        };
        write_bincode(&config.indexer_path(label), &snapshot)?;
    }

    for triplet in fragment.schema().triplets() {
        for direction in [Direction::Outgoing, Direction::Incoming] {
            let csr = fragment.csr(&triplet.src_label, &triplet.edge_label, &triplet.dst_label, direction)?;
            let num_sources = match direction {
                Direction::Outgoing => fragment.schema().vertex_type(&triplet.src_label).unwrap().max_vertex_num,
                Direction::Incoming => fragment.schema().vertex_type(&triplet.dst_label).unwrap().max_vertex_num,
            };
            let mut lists = Vec::with_capacity(num_sources as usize);
            for source in 0..num_sources {
                lists.push(csr.edges_of(source, u64::MAX).collect());
            }
            let snapshot = CsrSnapshot { lists };
            write_bincode(
                &config.csr_path(&triplet.src_label, &triplet.edge_label, &triplet.dst_label, direction_suffix(direction)),
                &snapshot,
            )?;
        }
    }

    let manifest = Manifest {
        schema_name: fragment.schema().name.clone(),
        schema_version: fragment.schema().version,
        snapshot_ts,
    };
    write_bincode(&config.manifest_path(), &manifest)?;
    tracing::info!(snapshot_ts, "snapshot dumped");
    Ok(())
}

/// Loads a snapshot into a fresh `Fragment` built from `schema`, checking
/// the manifest fingerprint. Returns `(fragment, snapshot_ts)`, or
/// `(Fragment::new(schema), 0)` if no manifest exists yet (cold start).
pub fn load(config: &EngineConfig, schema: Schema) -> Result<(Fragment, u64), GraphError> {
    let manifest_path = config.manifest_path();
    if !manifest_path.exists() {
        return Ok((Fragment::new(schema), 0));
    }

    let manifest: Manifest = read_bincode(&manifest_path)?;
    if manifest.schema_name != schema.name || manifest.schema_version != schema.version {
        return Err(GraphError::ManifestMismatch(format!(
            "snapshot was written for schema `{}` v{}, open was called with `{}` v{}",
            manifest.schema_name, manifest.schema_version, schema.name, schema.version
        )));
    }

    let mut fragment = Fragment::new(schema);
    let labels: Vec<String> = fragment.schema().vertex_types().map(|vt| vt.name.clone()).collect();
    for label in &labels {
        let max_vertex_num = fragment.schema().vertex_type(label).unwrap().max_vertex_num;
        let path = config.indexer_path(label);
        if !path.exists() {
            continue;
        }
        let snapshot: LabelSnapshot = read_bincode(&path)?;
        let indexer = crate::indexer::LfIndexer::restore(label.clone(), max_vertex_num, &snapshot.indexer_entries);
        {
            let table = fragment.label_table(label)?;
            for (col, values) in snapshot.columns.iter().enumerate() {
                for (vid, value) in values.iter().enumerate() {
                    table.set(col, vid as u32, value)?;
                }
            }
        }
        fragment.restore_indexer(label, indexer)?;
    }

    for triplet in fragment.schema().triplets() {
        for (direction, suffix) in [(Direction::Outgoing, "out"), (Direction::Incoming, "in")] {
            let path = config.csr_path(&triplet.src_label, &triplet.edge_label, &triplet.dst_label, suffix);
            if !path.exists() {
                continue;
            }
            let snapshot: CsrSnapshot = read_bincode(&path)?;
            let csr = fragment.csr(&triplet.src_label, &triplet.edge_label, &triplet.dst_label, direction)?;
            for (source, records) in snapshot.lists.into_iter().enumerate() {
                for (neighbor, timestamp, prop) in records {
                    csr.insert(source as u32, neighbor, timestamp, prop.as_ref())?;
                }
            }
        }
    }

    tracing::info!(snapshot_ts = manifest.snapshot_ts, "snapshot loaded");
    Ok((fragment, manifest.snapshot_ts))
}

fn write_bincode<T: Serialize>(path: &Path, value: &T) -> Result<(), GraphError> {
    let bytes = bincode::serialize(value)
        .map_err(|e| GraphError::CorruptLog(format!("failed to encode snapshot: {e}")))?;
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn read_bincode<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, GraphError> {
    let bytes = fs::read(path)?;
    bincode::deserialize(&bytes).map_err(|e| GraphError::CorruptLog(format!("failed to decode snapshot: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::EndpointMode;
    use tempfile::tempdir;

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
    fn dump_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::new(dir.path());

        let fragment = Fragment::new(social_schema());
        fragment
            .add_vertex("person", &[PropertyValue::Int64(1), PropertyValue::String("a".into())])
            .unwrap();
        fragment
            .add_vertex("person", &[PropertyValue::Int64(2), PropertyValue::String("b".into())])
            .unwrap();
        fragment
            .add_edge("person", 1, "person", 2, "knows", Some(PropertyValue::Double(0.5)), 1, EndpointMode::Strict)
            .unwrap();

        dump(&config, &fragment, 1).unwrap();

        let (loaded, ts) = load(&config, social_schema()).unwrap();
        assert_eq!(ts, 1);
        assert_eq!(loaded.vertex_num("person").unwrap(), 2);
        assert_eq!(loaded.get_vertex("person", 1).unwrap(), Some(0));
        let edges: Vec<_> = loaded.out_edges("person", 0, "knows", "person", u64::MAX).unwrap().collect();
        assert_eq!(edges, vec![(1, Some(PropertyValue::Double(0.5)), 1)]);
    }

    #[test]
    fn load_with_no_manifest_is_fresh() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::new(dir.path());
        let (fragment, ts) = load(&config, social_schema()).unwrap();
        assert_eq!(ts, 0);
        assert_eq!(fragment.vertex_num("person").unwrap(), 0);
    }

    #[test]
    fn mismatched_schema_name_is_rejected() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::new(dir.path());
        let fragment = Fragment::new(social_schema());
        dump(&config, &fragment, 0).unwrap();

        let other = Schema::from_yaml(
            r#"
name: other
store_type: mutable_csr
schema:
  vertex_types: []
  edge_types: []
"#,
            1 << 20,
        )
        .unwrap();
        let err = load(&config, other).unwrap_err();
        assert!(matches!(err, GraphError::ManifestMismatch(_)));
    }
}
