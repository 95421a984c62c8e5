//! Target column orders for a table.
//!
//! Every column mutation computes the full desired order of the table's
//! column ids up front; the repository then writes positions `0..n` in a
//! single pass. A column's index is always its position in that order.

use std::collections::HashSet;

use crate::data_types::ColumnId;

/// Position a column lands at when asked for `desired` among `count` others.
/// No explicit position, or one past the end, means "append at the tail".
pub fn clamp_position(desired: Option<usize>, count: usize) -> usize {
    desired.map_or(count, |d| d.min(count))
}

/// Place `column_id` at the requested position, removing it from its
/// current position first if it's already part of the order. Every column
/// at or after the target position shifts up by one.
pub fn place(order: &[ColumnId], column_id: ColumnId, desired: Option<usize>) -> Vec<ColumnId> {
    let mut target: Vec<ColumnId> =
        order.iter().copied().filter(|id| *id != column_id).collect();
    let position = clamp_position(desired, target.len());
    target.insert(position, column_id);
    target
}

/// Columns named in `requested` come first, in the requested order. Columns
/// that weren't named follow, keeping their relative order. Requested ids
/// that don't belong to the table and repeated ids are ignored.
pub fn reorder(order: &[ColumnId], requested: &[ColumnId]) -> Vec<ColumnId> {
    let existing: HashSet<&ColumnId> = order.iter().collect();
    let mut seen = HashSet::with_capacity(requested.len());

    let mut target: Vec<ColumnId> = requested
        .iter()
        .filter(|id| existing.contains(id) && seen.insert(**id))
        .copied()
        .collect();

    target.extend(order.iter().filter(|id| !seen.contains(*id)));
    target
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use uuid::Uuid;

    use super::*;

    fn ids(n: usize) -> Vec<ColumnId> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[rstest]
    #[case(None, 3, 3)]
    #[case(Some(0), 3, 0)]
    #[case(Some(2), 3, 2)]
    #[case(Some(3), 3, 3)]
    #[case(Some(100), 3, 3)]
    #[case(Some(5), 0, 0)]
    fn test_clamp_position(
        #[case] desired: Option<usize>,
        #[case] count: usize,
        #[case] expected: usize,
    ) {
        assert_eq!(clamp_position(desired, count), expected);
    }

    #[test]
    fn test_place_new_column_shifts_later_columns() {
        let order = ids(3);
        let new = Uuid::new_v4();

        assert_eq!(
            place(&order, new, Some(1)),
            vec![order[0], new, order[1], order[2]]
        );
        assert_eq!(
            place(&order, new, None),
            vec![order[0], order[1], order[2], new]
        );
        assert_eq!(
            place(&order, new, Some(42)),
            vec![order[0], order[1], order[2], new]
        );
    }

    #[test]
    fn test_place_existing_column() {
        let order = ids(4);

        // Move forwards
        assert_eq!(
            place(&order, order[0], Some(2)),
            vec![order[1], order[2], order[0], order[3]]
        );
        // Move backwards
        assert_eq!(
            place(&order, order[3], Some(0)),
            vec![order[3], order[0], order[1], order[2]]
        );
        // Beyond the end lands at the tail
        assert_eq!(
            place(&order, order[1], Some(10)),
            vec![order[0], order[2], order[3], order[1]]
        );
        // Same position is a no-op
        assert_eq!(place(&order, order[2], Some(2)), order);
    }

    #[test]
    fn test_reorder_partial_list() {
        let order = ids(3);
        let (c1, c2, c3) = (order[0], order[1], order[2]);

        assert_eq!(reorder(&order, &[c3, c1]), vec![c3, c1, c2]);
    }

    #[test]
    fn test_reorder_ignores_foreign_and_duplicate_ids() {
        let order = ids(3);
        let (c1, c2, c3) = (order[0], order[1], order[2]);
        let foreign = Uuid::new_v4();

        assert_eq!(reorder(&order, &[foreign, c2, c2, c1]), vec![c2, c1, c3]);
        assert_eq!(reorder(&order, &[]), order);
        assert_eq!(reorder(&[], &[foreign]), Vec::<ColumnId>::new());
    }
}
