//! Container-to-index loading (§6).
//!
//! Reconstructs a mode's graph, coordinate index, and name table from a
//! [`ContainerReader`], then derives the MLP cell storage and recomputes
//! its metrics in memory. This mirrors the data-flow note in SPEC_FULL §2:
//! "customization re-reads (B) + (E), recomputes (F)" — cell boundaries and
//! metric tables are never themselves persisted, only the base graph and
//! the partition are.

use viaduct_common::{Coordinate, EdgeId, NodeId, Result};

use crate::cellstore::{customize, CellStore, MetricSet};
use crate::ch::ChIndex;
use crate::container::{BinaryRecord, ContainerReader, ContainerWriter};
use crate::graph::{CsrGraph, EdgeData};
use crate::mlp::{LevelData, MultiLevelPartition};
use crate::nametable::NameTable;
use crate::nodeindex::NodeIndex;
use std::io::Write;

/// One CSR edge's on-disk record: target, weight, duration, a packed
/// direction/shortcut flag byte (padded to keep 4-byte alignment), the
/// shortcut midpoint, and the `NameID` this edge carries (§4.F).
#[derive(Debug, Clone, Copy)]
struct RawEdge {
    target: u32,
    weight: i32,
    duration: i32,
    flags: u32,
    via: u32,
    name_id: u32,
}

const FLAG_FORWARD: u32 = 1 << 0;
const FLAG_BACKWARD: u32 = 1 << 1;
const FLAG_SHORTCUT: u32 = 1 << 2;

impl From<&EdgeData> for RawEdge {
    fn from(e: &EdgeData) -> Self {
        let mut flags = 0u32;
        if e.forward {
            flags |= FLAG_FORWARD;
        }
        if e.backward {
            flags |= FLAG_BACKWARD;
        }
        if e.shortcut {
            flags |= FLAG_SHORTCUT;
        }
        RawEdge {
            target: e.target,
            weight: e.weight,
            duration: e.duration,
            flags,
            via: e.via,
            name_id: e.name_id,
        }
    }
}

impl BinaryRecord for RawEdge {
    const SIZE: usize = 24;

    fn read_le(bytes: &[u8]) -> Self {
        RawEdge {
            target: u32::read_le(&bytes[0..4]),
            weight: i32::read_le(&bytes[4..8]),
            duration: i32::read_le(&bytes[8..12]),
            flags: u32::read_le(&bytes[12..16]),
            via: u32::read_le(&bytes[16..20]),
            name_id: u32::read_le(&bytes[20..24]),
        }
    }

    fn write_le(&self, out: &mut Vec<u8>) {
        self.target.write_le(out);
        self.weight.write_le(out);
        self.duration.write_le(out);
        self.flags.write_le(out);
        self.via.write_le(out);
        self.name_id.write_le(out);
    }
}

#[derive(Debug, Clone, Copy)]
struct RawCoordinate {
    lon: i32,
    lat: i32,
}

impl BinaryRecord for RawCoordinate {
    const SIZE: usize = 8;

    fn read_le(bytes: &[u8]) -> Self {
        RawCoordinate {
            lon: i32::read_le(&bytes[0..4]),
            lat: i32::read_le(&bytes[4..8]),
        }
    }

    fn write_le(&self, out: &mut Vec<u8>) {
        self.lon.write_le(out);
        self.lat.write_le(out);
    }
}

/// Everything needed to serve one travel mode's queries.
pub struct ModeData {
    pub ch: ChIndex,
    pub nodes: NodeIndex,
    pub names: NameTable,
    pub mlp: Option<MultiLevelPartition>,
    pub cells: Option<CellStore>,
    pub duration_metric: Option<MetricSet>,
}

fn block_name(mode: &str, path: &str) -> String {
    format!("/{mode}{path}")
}

/// Writes one mode's dataset into an in-progress container: node
/// coordinates, the CH-augmented graph, the MLP partition (if built), and
/// the name table. Cell storage and metrics are intentionally not written;
/// see the module doc comment.
pub fn write_mode<W: Write>(
    writer: &mut ContainerWriter<W>,
    mode: &str,
    coordinates: &[Coordinate],
    graph: &CsrGraph,
    mlp: Option<&MultiLevelPartition>,
    names: &NameTable,
) -> Result<()> {
    let raw_coords: Vec<RawCoordinate> = coordinates.iter().map(|c| RawCoordinate { lon: c.lon, lat: c.lat }).collect();
    writer.write_array(&block_name(mode, "/common/node_coordinates"), &raw_coords)?;

    writer.write_array(&block_name(mode, "/ch/graph/node_array"), &node_array_of(graph))?;
    let raw_edges: Vec<RawEdge> = (0..graph.num_edges() as u32).map(|e| RawEdge::from(graph.data(e))).collect();
    writer.write_array(&block_name(mode, "/ch/graph/edge_array"), &raw_edges)?;

    if let Some(mlp) = mlp {
        let cell_counts: Vec<u32> = mlp.level_data().cell_counts().to_vec();
        writer.write_array(&block_name(mode, "/mld/multilevelpartition/level_data"), &cell_counts)?;
        writer.write_array(&block_name(mode, "/mld/multilevelpartition/partition"), mlp.raw_partition())?;
    }

    let (blocks_bytes, values_bytes) = crate::nametable::serialize(names);
    writer.write_block(&block_name(mode, "/common/names/blocks"), &blocks_bytes)?;
    writer.write_block(&block_name(mode, "/common/names/values"), &values_bytes)?;
    Ok(())
}

fn node_array_of(graph: &CsrGraph) -> Vec<u32> {
    (0..=graph.num_nodes() as u32).map(|n| if (n as usize) < graph.num_nodes() { graph.begin_edges(n) } else { graph.end_edges(n - 1) }).collect()
}

/// Loads one mode's dataset back out of a container, deriving cell storage
/// and a duration metric when a partition is present.
pub fn load_mode(reader: &ContainerReader, mode: &str) -> Result<ModeData> {
    let raw_coords: Vec<RawCoordinate> = reader.read_array(&block_name(mode, "/common/node_coordinates"))?;
    let coordinates: Vec<Coordinate> = raw_coords.iter().map(|c| Coordinate::new(c.lon, c.lat)).collect();

    let node_array: Vec<u32> = reader.read_array(&block_name(mode, "/ch/graph/node_array"))?;
    let raw_edges: Vec<RawEdge> = reader.read_array(&block_name(mode, "/ch/graph/edge_array"))?;

    let num_nodes = node_array.len().saturating_sub(1);
    let mut edges = Vec::with_capacity(raw_edges.len());
    for n in 0..num_nodes as u32 {
        let begin = node_array[n as usize];
        let end = node_array[n as usize + 1];
        for e in begin..end {
            let raw = raw_edges[e as usize];
            edges.push((
                n,
                EdgeData {
                    target: raw.target,
                    weight: raw.weight,
                    duration: raw.duration,
                    forward: raw.flags & FLAG_FORWARD != 0,
                    backward: raw.flags & FLAG_BACKWARD != 0,
                    shortcut: raw.flags & FLAG_SHORTCUT != 0,
                    via: raw.via,
                    name_id: raw.name_id,
                },
            ));
        }
    }
    let graph = CsrGraph::build(num_nodes, edges);
    let ch = ChIndex::new(graph);

    let edge_list: Vec<(EdgeId, NodeId, NodeId, bool, bool)> = (0..num_nodes as u32)
        .flat_map(|n| ch.forward_edges(n).map(move |(e, edge)| (e, n, edge.target, edge.forward, edge.backward)))
        .collect();
    let nodes = NodeIndex::build(coordinates, &edge_list);

    let names = load_names(reader, mode)?;

    let level_data_block = block_name(mode, "/mld/multilevelpartition/level_data");
    let has_mlp = reader.list().iter().any(|(name, _)| name == &level_data_block);
    let mlp = if has_mlp {
        let cell_counts: Vec<u32> = reader.read_array(&level_data_block)?;
        let partition: Vec<u64> = reader.read_array(&block_name(mode, "/mld/multilevelpartition/partition"))?;
        let level_data = LevelData::new(&cell_counts)?;
        Some(MultiLevelPartition::new(level_data, partition))
    } else {
        None
    };
    let (cells, duration_metric) = match &mlp {
        Some(mlp) => {
            let cells = CellStore::derive(mlp, &ch);
            let metrics = customize("duration", &ch, mlp, &cells);
            (Some(cells), Some(metrics))
        }
        None => (None, None),
    };

    Ok(ModeData {
        ch,
        nodes,
        names,
        mlp,
        cells,
        duration_metric,
    })
}

fn load_names(reader: &ContainerReader, mode: &str) -> Result<NameTable> {
    let values = reader.raw_block(&block_name(mode, "/common/names/values"))?;
    let blocks = reader.raw_block(&block_name(mode, "/common/names/blocks"))?;
    crate::nametable::deserialize(blocks, values.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerWriter;
    use crate::nametable::{Encoding as Enc, NameTableBuilder as Builder};

    #[test]
    fn round_trips_a_graph_and_coordinates() {
        let edges = vec![
            (0u32, EdgeData::base(1, 5, 50, true, true)),
            (1, EdgeData::base(2, 3, 30, true, true)),
        ];
        let graph = CsrGraph::build(3, edges);
        let coords = vec![
            Coordinate::from_degrees(13.0, 52.0),
            Coordinate::from_degrees(13.01, 52.0),
            Coordinate::from_degrees(13.02, 52.0),
        ];
        let mut names_builder = Builder::new();
        names_builder.push("Main St");
        let names = names_builder.build(Enc::Fixed).unwrap();

        let mut buf = Vec::new();
        let mut writer = ContainerWriter::create(&mut buf).unwrap();
        write_mode(&mut writer, "car", &coords, &graph, None, &names).unwrap();
        writer.finish().unwrap();

        let reader = ContainerReader::open(buf.as_slice()).unwrap();
        reader.read_and_check_fingerprint().unwrap();
        let raw_coords: Vec<RawCoordinate> = reader.read_array("/car/common/node_coordinates").unwrap();
        assert_eq!(raw_coords.len(), 3);
        let node_array: Vec<u32> = reader.read_array("/car/ch/graph/node_array").unwrap();
        assert_eq!(node_array.len(), 4);
    }

    #[test]
    fn round_trips_a_partition_and_derives_cells_on_load() {
        let edges = vec![
            (0u32, EdgeData::base(1, 5, 50, true, true)),
            (1, EdgeData::base(2, 3, 30, true, true)),
            (2, EdgeData::base(3, 4, 40, true, true)),
        ];
        let graph = CsrGraph::build(4, edges);
        let coords = vec![
            Coordinate::from_degrees(13.0, 52.0),
            Coordinate::from_degrees(13.01, 52.0),
            Coordinate::from_degrees(13.02, 52.0),
            Coordinate::from_degrees(13.03, 52.0),
        ];
        let mut names_builder = Builder::new();
        names_builder.push("Main St");
        let names = names_builder.build(Enc::Fixed).unwrap();

        let level_data = LevelData::new(&[2]).unwrap();
        let partition = MultiLevelPartition::new(level_data, vec![0, 0, 1, 1]);

        let mut buf = Vec::new();
        let mut writer = ContainerWriter::create(&mut buf).unwrap();
        write_mode(&mut writer, "car", &coords, &graph, Some(&partition), &names).unwrap();
        writer.finish().unwrap();

        let reader = ContainerReader::open(buf.as_slice()).unwrap();
        let data = load_mode(&reader, "car").unwrap();
        let mlp = data.mlp.unwrap();
        assert_eq!(mlp.cell(0, 0), 0);
        assert_eq!(mlp.cell(0, 2), 1);
        assert!(data.cells.is_some());
        assert!(data.duration_metric.is_some());
    }
}
