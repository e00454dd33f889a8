//! Schedule representation: a fixed array of cells executed round-robin by
//! the slot timeline.
//!
//! The shape of a schedule is chosen once at init and never changes; only
//! the uplink assignments are mutable. Assignment always picks the
//! lowest-indexed free uplink cell, which keeps both sides deterministic.

use heapless::Vec;

use crate::bloom;

/// Upper bound on the number of cells in a schedule.
pub const MAX_CELLS: usize = 137;

/// What happens in a schedule position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CellType {
    /// Gateway announces its timeline.
    Beacon,
    /// Contention window for join requests.
    SharedUplink,
    /// Gateway to node traffic.
    Downlink,
    /// Dedicated node to gateway cell.
    Uplink,
}

impl From<CellType> for char {
    fn from(value: CellType) -> Self {
        match value {
            CellType::Beacon => 'B',
            CellType::SharedUplink => 'S',
            CellType::Downlink => 'D',
            CellType::Uplink => 'U',
        }
    }
}

/// An admitted node, as remembered by the uplink cell it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Assignee {
    node: u64,
    last_heard_asn: u64,
    joined_at_asn: u64,
    /// Precomputed bloom hash seeds of `node`.
    hashes: (u64, u64),
}

/// One schedule position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    cell_type: CellType,
    channel_offset: u8,
    assigned: Option<Assignee>,
}

impl Cell {
    /// Create an unassigned cell.
    pub const fn new(cell_type: CellType, channel_offset: u8) -> Self {
        Self {
            cell_type,
            channel_offset,
            assigned: None,
        }
    }

    /// The cell type.
    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    /// Offset into the hop pattern used to derive the physical channel.
    pub fn channel_offset(&self) -> u8 {
        self.channel_offset
    }

    /// The assigned node id, for uplink cells that have one.
    pub fn assignee(&self) -> Option<u64> {
        self.assigned.map(|a| a.node)
    }

    /// ASN at which the assignee was last heard.
    pub fn last_heard_asn(&self) -> Option<u64> {
        self.assigned.map(|a| a.last_heard_asn)
    }

    /// ASN at which the assignee joined.
    pub fn joined_at_asn(&self) -> Option<u64> {
        self.assigned.map(|a| a.joined_at_asn)
    }
}

/// Errors from schedule construction and assignment bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScheduleError {
    /// No free uplink cell is left.
    Full,
    /// The node id is not assigned anywhere.
    NotPresent,
    /// More cells than [`MAX_CELLS`].
    TooManyCells,
    /// The cell index does not name an uplink cell.
    InvalidCell,
    /// The first three cells must be beacons.
    MissingLeadingBeacons,
    /// A channel offset does not fit the hop pattern.
    ChannelOffsetOutOfRange,
    /// Backoff exponent bounds are inverted.
    InvalidBackoffBounds,
}

/// A schedule: immutable header plus the cell array.
#[derive(Debug)]
pub struct Schedule {
    id: u8,
    backoff_n_min: u8,
    backoff_n_max: u8,
    cells: Vec<Cell, MAX_CELLS>,
}

impl Schedule {
    /// Built-in schedule ids.
    pub const ONLY_BEACONS: u8 = 0;
    pub const HUGE: u8 = 2;
    pub const SMALL: u8 = 5;
    pub const MINUSCULE: u8 = 6;

    /// Create a schedule from a cell table, validating its shape.
    pub fn new(
        id: u8,
        backoff_n_min: u8,
        backoff_n_max: u8,
        cells: &[Cell],
        hop_cardinality: u8,
    ) -> Result<Self, ScheduleError> {
        // The backoff counter is drawn from [0, 2^n) into a u16.
        if backoff_n_min > backoff_n_max || backoff_n_max > 16 {
            return Err(ScheduleError::InvalidBackoffBounds);
        }

        // Three leading beacons bound the worst-case scan latency.
        if cells.len() < 3
            || cells[..3]
                .iter()
                .any(|c| c.cell_type != CellType::Beacon)
        {
            return Err(ScheduleError::MissingLeadingBeacons);
        }

        if cells.iter().any(|c| c.channel_offset >= hop_cardinality) {
            return Err(ScheduleError::ChannelOffsetOutOfRange);
        }

        let cells = Vec::from_slice(cells).map_err(|_| ScheduleError::TooManyCells)?;

        Ok(Self {
            id,
            backoff_n_min,
            backoff_n_max,
            cells,
        })
    }

    /// The schedule id announced in beacons.
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Lower bound of the join backoff exponent.
    pub fn backoff_n_min(&self) -> u8 {
        self.backoff_n_min
    }

    /// Upper bound of the join backoff exponent.
    pub fn backoff_n_max(&self) -> u8 {
        self.backoff_n_max
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// A schedule always has cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Slot offset of an ASN within this schedule.
    pub fn slot_offset(&self, asn: u64) -> usize {
        (asn % self.cells.len() as u64) as usize
    }

    /// The cell at a slot offset.
    pub fn slot_at(&self, offset: usize) -> &Cell {
        &self.cells[offset]
    }

    /// The maximum number of admitted nodes: one per uplink cell.
    pub fn max_nodes(&self) -> usize {
        self.uplink_cells().count()
    }

    /// How many uplink cells are still free.
    pub fn remaining_capacity(&self) -> u8 {
        self.uplink_cells()
            .filter(|(_, c)| c.assigned.is_none())
            .count() as u8
    }

    /// How many uplink cells are assigned.
    pub fn assigned_count(&self) -> usize {
        self.uplink_cells()
            .filter(|(_, c)| c.assigned.is_some())
            .count()
    }

    /// Iterate over the uplink cells with their indices.
    pub fn uplink_cells(&self) -> impl Iterator<Item = (usize, &Cell)> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| c.cell_type == CellType::Uplink)
    }

    /// Precomputed bloom hash seeds of every assignee.
    pub(crate) fn bloom_seeds(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.cells.iter().filter_map(|c| c.assigned.map(|a| a.hashes))
    }

    /// Assign a node to the lowest-indexed free uplink cell. Assigning an
    /// already admitted node returns its existing cell.
    pub fn assign(&mut self, node: u64, asn: u64) -> Result<usize, ScheduleError> {
        if let Some(index) = self.lookup(node) {
            return Ok(index);
        }

        let index = self
            .cells
            .iter()
            .position(|c| c.cell_type == CellType::Uplink && c.assigned.is_none())
            .ok_or(ScheduleError::Full)?;

        self.cells[index].assigned = Some(Assignee {
            node,
            last_heard_asn: asn,
            joined_at_asn: asn,
            hashes: bloom::hashes(node),
        });

        Ok(index)
    }

    /// Record an externally granted assignment at a specific uplink cell.
    /// A node claims the cell its join response names with this; any stale
    /// claim it held elsewhere is dropped first.
    pub fn assign_cell(&mut self, index: usize, node: u64, asn: u64) -> Result<(), ScheduleError> {
        if index >= self.cells.len() || self.cells[index].cell_type != CellType::Uplink {
            return Err(ScheduleError::InvalidCell);
        }

        if let Some(existing) = self.lookup(node) {
            self.cells[existing].assigned = None;
        }

        self.cells[index].assigned = Some(Assignee {
            node,
            last_heard_asn: asn,
            joined_at_asn: asn,
            hashes: bloom::hashes(node),
        });

        Ok(())
    }

    /// Release the cell assigned to a node.
    pub fn release(&mut self, node: u64) -> Result<usize, ScheduleError> {
        let index = self.lookup(node).ok_or(ScheduleError::NotPresent)?;
        self.cells[index].assigned = None;
        Ok(index)
    }

    /// The cell index assigned to a node, if any.
    pub fn lookup(&self, node: u64) -> Option<usize> {
        self.cells
            .iter()
            .position(|c| c.assigned.map(|a| a.node) == Some(node))
    }

    /// Refresh the last-heard ASN of a node.
    pub fn touch(&mut self, node: u64, asn: u64) -> Result<(), ScheduleError> {
        let index = self.lookup(node).ok_or(ScheduleError::NotPresent)?;
        if let Some(assignee) = self.cells[index].assigned.as_mut() {
            assignee.last_heard_asn = asn;
        }
        Ok(())
    }

    /// The 5-cell test schedule: three beacons, one shared cell, one uplink.
    pub fn minuscule() -> Self {
        const C: &[Cell] = &[
            Cell::new(CellType::Beacon, 0),
            Cell::new(CellType::Beacon, 1),
            Cell::new(CellType::Beacon, 2),
            Cell::new(CellType::SharedUplink, 3),
            Cell::new(CellType::Uplink, 4),
        ];
        Self::new(Self::MINUSCULE, 5, 9, C, 16).unwrap()
    }

    /// An 11-cell schedule with five uplink cells.
    pub fn small() -> Self {
        const C: &[Cell] = &[
            Cell::new(CellType::Beacon, 0),
            Cell::new(CellType::Beacon, 1),
            Cell::new(CellType::Beacon, 2),
            Cell::new(CellType::SharedUplink, 3),
            Cell::new(CellType::Downlink, 4),
            Cell::new(CellType::Uplink, 5),
            Cell::new(CellType::Uplink, 6),
            Cell::new(CellType::Uplink, 7),
            Cell::new(CellType::Uplink, 8),
            Cell::new(CellType::Uplink, 9),
            Cell::new(CellType::SharedUplink, 10),
        ];
        Self::new(Self::SMALL, 5, 9, C, 16).unwrap()
    }

    /// The largest supported schedule: [`MAX_CELLS`] cells, 130 of them
    /// uplink.
    pub fn huge() -> Self {
        let mut cells: Vec<Cell, MAX_CELLS> = Vec::new();
        for i in 0..3 {
            cells.push(Cell::new(CellType::Beacon, i)).unwrap();
        }
        cells.push(Cell::new(CellType::SharedUplink, 3)).unwrap();
        cells.push(Cell::new(CellType::Downlink, 4)).unwrap();
        for i in 5..MAX_CELLS as u8 {
            if i == MAX_CELLS as u8 / 2 {
                cells.push(Cell::new(CellType::SharedUplink, i % 16)).unwrap();
            } else if i == MAX_CELLS as u8 / 2 + 1 {
                cells.push(Cell::new(CellType::Downlink, i % 16)).unwrap();
            } else {
                cells.push(Cell::new(CellType::Uplink, i % 16)).unwrap();
            }
        }
        Self::new(Self::HUGE, 5, 9, &cells, 16).unwrap()
    }

    /// Beacons only; useful to benchmark scan latency.
    pub fn only_beacons() -> Self {
        const C: &[Cell] = &[
            Cell::new(CellType::Beacon, 0),
            Cell::new(CellType::Beacon, 1),
            Cell::new(CellType::Beacon, 2),
        ];
        Self::new(Self::ONLY_BEACONS, 5, 9, C, 16).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_beacons_required() {
        let cells = [
            Cell::new(CellType::Beacon, 0),
            Cell::new(CellType::SharedUplink, 1),
            Cell::new(CellType::Beacon, 2),
            Cell::new(CellType::Uplink, 3),
        ];
        assert_eq!(
            Schedule::new(1, 5, 9, &cells, 16).unwrap_err(),
            ScheduleError::MissingLeadingBeacons
        );
    }

    #[test]
    fn channel_offset_bounds() {
        let cells = [
            Cell::new(CellType::Beacon, 0),
            Cell::new(CellType::Beacon, 1),
            Cell::new(CellType::Beacon, 16),
        ];
        assert_eq!(
            Schedule::new(1, 5, 9, &cells, 16).unwrap_err(),
            ScheduleError::ChannelOffsetOutOfRange
        );
    }

    #[test]
    fn backoff_bounds() {
        let cells = [
            Cell::new(CellType::Beacon, 0),
            Cell::new(CellType::Beacon, 1),
            Cell::new(CellType::Beacon, 2),
        ];
        assert_eq!(
            Schedule::new(1, 9, 5, &cells, 16).unwrap_err(),
            ScheduleError::InvalidBackoffBounds
        );
    }

    #[test]
    fn assign_lowest_free_uplink() {
        let mut schedule = Schedule::small();
        assert_eq!(schedule.max_nodes(), 5);
        assert_eq!(schedule.remaining_capacity(), 5);

        assert_eq!(schedule.assign(0xAA, 10), Ok(5));
        assert_eq!(schedule.assign(0xBB, 11), Ok(6));
        assert_eq!(schedule.remaining_capacity(), 3);

        assert_eq!(schedule.lookup(0xAA), Some(5));
        assert_eq!(schedule.slot_at(5).assignee(), Some(0xAA));
        assert_eq!(schedule.slot_at(5).joined_at_asn(), Some(10));

        // Releasing the lower cell makes it the next pick again.
        assert_eq!(schedule.release(0xAA), Ok(5));
        assert_eq!(schedule.lookup(0xAA), None);
        assert_eq!(schedule.assign(0xCC, 12), Ok(5));
    }

    #[test]
    fn node_occupies_at_most_one_cell() {
        let mut schedule = Schedule::small();
        schedule.assign(0xAA, 1).unwrap();
        assert_eq!(schedule.assign(0xAA, 2), Ok(5));
        assert_eq!(
            schedule
                .uplink_cells()
                .filter(|(_, c)| c.assignee() == Some(0xAA))
                .count(),
            1
        );
    }

    #[test]
    fn full_schedule_rejects() {
        let mut schedule = Schedule::minuscule();
        assert_eq!(schedule.max_nodes(), 1);
        schedule.assign(0xAA, 1).unwrap();
        assert_eq!(schedule.assign(0xBB, 2), Err(ScheduleError::Full));
        assert_eq!(schedule.remaining_capacity(), 0);
    }

    #[test]
    fn touch_refreshes_last_heard() {
        let mut schedule = Schedule::minuscule();
        schedule.assign(0xAA, 1).unwrap();
        schedule.touch(0xAA, 42).unwrap();
        assert_eq!(schedule.slot_at(4).last_heard_asn(), Some(42));
        assert_eq!(
            schedule.touch(0xBB, 43),
            Err(ScheduleError::NotPresent)
        );
    }

    #[test]
    fn claim_named_cell() {
        let mut schedule = Schedule::small();
        schedule.assign_cell(7, 0xAA, 12).unwrap();
        assert_eq!(schedule.lookup(0xAA), Some(7));

        // Claiming another cell moves the node, never duplicates it.
        schedule.assign_cell(8, 0xAA, 13).unwrap();
        assert_eq!(schedule.lookup(0xAA), Some(8));
        assert_eq!(schedule.slot_at(7).assignee(), None);

        // Only uplink cells can be claimed.
        assert_eq!(
            schedule.assign_cell(0, 0xAA, 14),
            Err(ScheduleError::InvalidCell)
        );
        assert_eq!(
            schedule.assign_cell(99, 0xAA, 14),
            Err(ScheduleError::InvalidCell)
        );
    }

    #[test]
    fn release_unknown() {
        let mut schedule = Schedule::minuscule();
        assert_eq!(schedule.release(0xAA), Err(ScheduleError::NotPresent));
    }

    #[test]
    fn builtin_shapes() {
        assert_eq!(Schedule::minuscule().len(), 5);
        assert_eq!(Schedule::small().len(), 11);
        assert_eq!(Schedule::huge().len(), MAX_CELLS);
        assert_eq!(Schedule::huge().max_nodes(), 130);
        assert_eq!(Schedule::only_beacons().max_nodes(), 0);
        assert_eq!(Schedule::minuscule().slot_offset(7), 2);
    }
}
