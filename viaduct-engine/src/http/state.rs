//! Process-wide, read-only server state (§4.L: "Process-wide state... is
//! constructed before workers start and is read-only thereafter; no locking
//! is required on the query path").

use std::collections::HashMap;

use viaduct_common::{Error, Result};

use crate::container::ContainerReader;
use crate::loader::{load_mode, ModeData};
use crate::mode::Mode;

/// Every mode's loaded dataset, built once at startup from a single
/// container and never mutated afterward.
pub struct ServerState {
    modes: HashMap<Mode, ModeData>,
}

impl ServerState {
    /// Loads every mode present in `reader` (`car`, `bike`, `foot`) that the
    /// container actually carries a dataset for. At least one must load
    /// successfully, matching §7 "Load-time errors abort startup".
    pub fn load(reader: &ContainerReader) -> Result<Self> {
        let mut modes = HashMap::new();
        for (mode, name) in [(Mode::Car, "car"), (Mode::Bike, "bike"), (Mode::Foot, "foot")] {
            if reader.list().iter().any(|(block, _)| block.starts_with(&format!("/{name}/"))) {
                modes.insert(mode, load_mode(reader, name)?);
            }
        }
        if modes.is_empty() {
            return Err(Error::internal("container carries no routable mode datasets"));
        }
        Ok(ServerState { modes })
    }

    pub fn mode_data(&self, mode: Mode) -> Result<&ModeData> {
        self.modes
            .get(&mode)
            .ok_or_else(|| Error::new(viaduct_common::ErrorCode::DisabledDataset, format!("profile '{mode}' is not loaded")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerWriter;
    use crate::graph::{CsrGraph, EdgeData};
    use crate::loader::write_mode;
    use crate::nametable::{Encoding, NameTableBuilder};
    use viaduct_common::Coordinate;

    #[test]
    fn loads_only_modes_present_in_the_container() {
        let edges = vec![(0u32, EdgeData::base(1, 5, 50, true, true))];
        let graph = CsrGraph::build(2, edges);
        let coords = vec![Coordinate::from_degrees(13.0, 52.0), Coordinate::from_degrees(13.01, 52.0)];
        let names = NameTableBuilder::new().build(Encoding::Fixed).unwrap();

        let mut buf = Vec::new();
        let mut writer = ContainerWriter::create(&mut buf).unwrap();
        write_mode(&mut writer, "car", &coords, &graph, None, &names).unwrap();
        writer.finish().unwrap();

        let reader = ContainerReader::open(buf.as_slice()).unwrap();
        let state = ServerState::load(&reader).unwrap();
        assert!(state.mode_data(Mode::Car).is_ok());
        assert!(state.mode_data(Mode::Bike).is_err());
    }
}
