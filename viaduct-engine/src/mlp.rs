//! Multi-Level Partition (§4.E).
//!
//! Each node gets a tuple of cell ids, one per level, packed into a single
//! 64-bit word. Levels nest: two nodes sharing a cell at level ℓ also share
//! a cell at every level above ℓ. The packed encoding plus a
//! `cell_to_children` index let the cell-metric customizer (§4.F) treat
//! each level as a coarsening of the one below it.

use std::collections::BTreeMap;

use viaduct_common::{Error, ErrorCode, NodeId, Result};

/// Per-level bit layout within the packed 64-bit partition word. Level 0 is
/// the finest (most cells); increasing level coarsens.
#[derive(Debug, Clone)]
pub struct LevelData {
    /// Bit offset of each level's field within the 64-bit word.
    bit_offset: Vec<u32>,
    /// Bit width of each level's field.
    bit_width: Vec<u32>,
    /// Number of cells declared for each level.
    num_cells: Vec<u32>,
}

impl LevelData {
    /// Builds the bit layout for a `cell_counts` schedule (finest level
    /// first, strictly decreasing). Fails if the packed word would need
    /// more than 64 bits.
    pub fn new(cell_counts: &[u32]) -> Result<Self> {
        for w in cell_counts.windows(2) {
            if w[1] >= w[0] {
                return Err(Error::internal("cell counts must strictly decrease per level"));
            }
        }
        let mut bit_offset = Vec::with_capacity(cell_counts.len());
        let mut bit_width = Vec::with_capacity(cell_counts.len());
        let mut cursor = 0u32;
        for &count in cell_counts {
            let width = bits_for(count as u64 + 1);
            bit_offset.push(cursor);
            bit_width.push(width);
            cursor += width;
        }
        if cursor > 64 {
            return Err(Error::internal(format!(
                "multi-level partition needs {cursor} bits, exceeds the 64-bit word"
            )));
        }
        Ok(LevelData {
            bit_offset,
            bit_width,
            num_cells: cell_counts.to_vec(),
        })
    }

    pub fn num_levels(&self) -> usize {
        self.num_cells.len()
    }

    /// The `cell_counts` schedule this layout was built from, in
    /// finest-first order; re-feeding it to [`LevelData::new`] reproduces
    /// the same bit layout.
    pub fn cell_counts(&self) -> &[u32] {
        &self.num_cells
    }

    fn mask(&self, level: usize) -> u64 {
        if self.bit_width[level] == 64 {
            u64::MAX
        } else {
            (1u64 << self.bit_width[level]) - 1
        }
    }
}

fn bits_for(values: u64) -> u32 {
    if values <= 1 {
        return 1;
    }
    64 - (values - 1).leading_zeros()
}

/// The packed per-node partition plus the child-cell index.
pub struct MultiLevelPartition {
    level_data: LevelData,
    partition: Vec<u64>,
    /// `cell_to_children[level][cell] = (begin, end)` into a flat child-id
    /// array; level 0's "children" are the node ids themselves, absent from
    /// this table (queried by scanning `partition` directly).
    cell_to_children: Vec<Vec<(u32, u32)>>,
}

impl MultiLevelPartition {
    pub fn new(level_data: LevelData, partition: Vec<u64>) -> Self {
        let cell_to_children = build_cell_to_children(&level_data, &partition);
        MultiLevelPartition {
            level_data,
            partition,
            cell_to_children,
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.partition.len()
    }

    pub fn num_levels(&self) -> usize {
        self.level_data.num_levels()
    }

    pub fn cell(&self, level: usize, node: NodeId) -> u32 {
        let word = self.partition[node as usize];
        ((word >> self.level_data.bit_offset[level]) & self.level_data.mask(level)) as u32
    }

    pub fn num_cells(&self, level: usize) -> u32 {
        self.level_data.num_cells[level]
    }

    /// Smallest level at which `a` and `b` share a cell. `num_levels()` if
    /// they never do below the top (should not happen once the top level
    /// has a single cell, per the §8 invariant that `cell(L,n)` is
    /// constant).
    pub fn highest_different_level(&self, a: NodeId, b: NodeId) -> usize {
        let xor = self.partition[a as usize] ^ self.partition[b as usize];
        for level in 0..self.num_levels() {
            let mask = self.level_data.mask(level);
            if (xor >> self.level_data.bit_offset[level]) & mask == 0 {
                return level;
            }
        }
        self.num_levels()
    }

    pub fn children_range(&self, level: usize, cell: u32) -> (u32, u32) {
        self.cell_to_children[level][cell as usize]
    }

    /// The packed per-node partition words, for persistence. Feeding this
    /// back into [`MultiLevelPartition::new`] alongside the same
    /// [`LevelData`] reconstructs an identical partition.
    pub fn raw_partition(&self) -> &[u64] {
        &self.partition
    }

    pub fn level_data(&self) -> &LevelData {
        &self.level_data
    }
}

fn build_cell_to_children(level_data: &LevelData, partition: &[u64]) -> Vec<Vec<(u32, u32)>> {
    let mut result = Vec::with_capacity(level_data.num_levels());
    for level in 0..level_data.num_levels() {
        let num_cells = level_data.num_cells[level] as usize;
        let mut counts = vec![0u32; num_cells];
        for &word in partition {
            let cell = ((word >> level_data.bit_offset[level]) & level_data.mask(level)) as usize;
            counts[cell] += 1;
        }
        let mut ranges = Vec::with_capacity(num_cells);
        let mut cursor = 0u32;
        for count in counts {
            ranges.push((cursor, cursor + count));
            cursor += count;
        }
        result.push(ranges);
    }
    result
}

/// Groups a recursive-bisection result into a cells-per-level schedule.
///
/// `bisection[n]` holds, bit `k` = the node's branch at split depth `k` (bit
/// 0 is the coarsest split). `cells_per_level` lists the target cell count
/// for each level, finest first. For each level the constructor picks the
/// shortest bisection prefix length whose distinct-group count does not
/// exceed the target; if no prefix length matches exactly (the schedule is
/// not a power-of-two factor of the bisection depth), the groups from the
/// next-deepest prefix are greedily merged — largest groups first — down to
/// the target count. The result is deterministic for a given input.
pub fn bisection_to_partition(
    bisection: &[u64],
    bisection_depth: u32,
    cells_per_level: &[u32],
) -> Result<MultiLevelPartition> {
    let num_nodes = bisection.len();
    let mut levels: Vec<Vec<u32>> = Vec::with_capacity(cells_per_level.len());

    for &target in cells_per_level {
        let mut chosen_prefix = bisection_depth;
        for prefix_len in 0..=bisection_depth {
            let group_count = distinct_prefix_groups(bisection, prefix_len).len() as u32;
            if group_count <= target {
                chosen_prefix = prefix_len;
                break;
            }
        }
        let groups = distinct_prefix_groups(bisection, chosen_prefix);
        let assignment = merge_groups_to_target(bisection, &groups, target);
        levels.push(assignment);
    }

    let level_data = LevelData::new(cells_per_level)?;
    let mut partition = vec![0u64; num_nodes];
    for (level, assignment) in levels.iter().enumerate() {
        for (n, &cell) in assignment.iter().enumerate() {
            partition[n] |= (cell as u64) << level_data.bit_offset[level];
        }
    }
    Ok(MultiLevelPartition::new(level_data, partition))
}

/// Maps each node to the value of its `prefix_len`-bit bisection prefix,
/// returning the distinct prefix values observed, in ascending order.
fn distinct_prefix_groups(bisection: &[u64], prefix_len: u32) -> Vec<u64> {
    let mask = if prefix_len == 0 {
        0
    } else {
        (1u64 << prefix_len) - 1
    };
    let mut seen = BTreeMap::new();
    for &b in bisection {
        seen.insert(b & mask, ());
    }
    seen.into_keys().collect()
}

/// Assigns each node a cell id in `0..target`, starting from its group at
/// `groups`'s resolution and greedily merging the largest remaining groups
/// until exactly `target` groups remain.
fn merge_groups_to_target(bisection: &[u64], groups: &[u64], target: u32) -> Vec<u32> {
    let prefix_bits = groups.iter().copied().fold(0u64, |acc, g| acc | g);
    let mask = prefix_bits.next_power_of_two().max(1) - 1;
    let mask = if mask == 0 { u64::MAX } else { mask };

    let mut group_members: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
    for (n, &b) in bisection.iter().enumerate() {
        group_members.entry(b & mask).or_default().push(n);
    }
    // Ensure every declared group appears even if no node matched it
    // exactly (can't happen given groups are derived from bisection, but
    // keeps the merge logic total).
    for &g in groups {
        group_members.entry(g).or_default();
    }

    let mut buckets: Vec<Vec<usize>> = group_members.into_values().collect();
    while buckets.len() as u32 > target {
        buckets.sort_by_key(|b| std::cmp::Reverse(b.len()));
        // Merge the two largest buckets; "larger cells preferred" reads as
        // consolidating into the biggest remaining bucket first.
        let merged = buckets.remove(1);
        buckets[0].extend(merged);
    }

    let mut assignment = vec![0u32; bisection.len()];
    for (cell, members) in buckets.into_iter().enumerate() {
        for n in members {
            assignment[n] = cell as u32;
        }
    }
    assignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_for_counts_exact_powers_of_two() {
        assert_eq!(bits_for(1), 1);
        assert_eq!(bits_for(2), 1);
        assert_eq!(bits_for(5), 3);
        assert_eq!(bits_for(256), 8);
    }

    #[test]
    fn cell_and_children_round_trip() {
        let level_data = LevelData::new(&[4, 2, 1]).unwrap();
        // 4 nodes: two in cell 0, two in cell 1 at level 0; all in one
        // level-1 cell; all in the single level-2 cell.
        let partition = vec![0u64, 0, 1, 1];
        let mlp = MultiLevelPartition::new(level_data, partition);
        assert_eq!(mlp.cell(0, 0), 0);
        assert_eq!(mlp.cell(0, 2), 1);
        assert_eq!(mlp.cell(2, 0), 0);
        assert_eq!(mlp.num_cells(2), 1);
        let (begin, end) = mlp.children_range(0, 0);
        assert_eq!(end - begin, 2);
    }

    #[test]
    fn highest_different_level_is_zero_for_same_node() {
        let level_data = LevelData::new(&[4, 1]).unwrap();
        let partition = vec![0u64, 1];
        let mlp = MultiLevelPartition::new(level_data, partition);
        assert_eq!(mlp.highest_different_level(0, 0), 0);
        assert_eq!(mlp.cell(1, 0), mlp.cell(1, 1));
    }

    #[test]
    fn level_data_rejects_non_decreasing_schedule() {
        assert!(LevelData::new(&[2, 4]).is_err());
    }

    #[test]
    fn level_data_rejects_overflowing_schedule() {
        // 32 bits for each of the two largest levels, plus 1 more > 64.
        assert!(LevelData::new(&[u32::MAX, u32::MAX - 1, 1]).is_err());
    }

    #[test]
    fn bisection_to_partition_merges_when_schedule_is_not_exact() {
        // 4 leaves at depth 2; ask for 3 cells at the top level, which
        // forces a merge of two of the four prefix groups.
        let bisection = vec![0b00u64, 0b01, 0b10, 0b11];
        let mlp = bisection_to_partition(&bisection, 2, &[3]).unwrap();
        assert_eq!(mlp.num_cells(0), 3);
        // Some two nodes ended up in the same cell.
        let cells: Vec<u32> = (0..4).map(|n| mlp.cell(0, n)).collect();
        let mut sorted = cells.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 3);
    }

    #[test]
    fn bisection_to_partition_merges_the_two_lowest_valued_groups_first() {
        // Same four singleton groups as above, merged down to 3 cells.
        // `merge_groups_to_target` sorts its buckets by descending size
        // (a stable sort, so same-size buckets keep the ascending key
        // order `BTreeMap::into_values()` produced) and always merges
        // `buckets[1]` into `buckets[0]` — so with four same-size
        // singletons, nodes 0 and 1 (the two lowest bisection values) are
        // the pair that merges, leaving 2 and 3 as their own cells.
        let bisection = vec![0b00u64, 0b01, 0b10, 0b11];
        let mlp = bisection_to_partition(&bisection, 2, &[3]).unwrap();
        assert_eq!(mlp.cell(0, 0), mlp.cell(0, 1));
        assert_ne!(mlp.cell(0, 0), mlp.cell(0, 2));
        assert_ne!(mlp.cell(0, 0), mlp.cell(0, 3));
        assert_ne!(mlp.cell(0, 2), mlp.cell(0, 3));
    }
}
