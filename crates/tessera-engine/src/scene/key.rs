/// Paint-order key of a child within a sortable parent.
///
/// Fields compare in declaration order: `z_index` ascending, then the
/// child's position in the list, so equal z keeps list order.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SortKey {
    pub z_index: i32,
    pub position: u32,
}

impl SortKey {
    #[inline]
    pub const fn new(z_index: i32, position: u32) -> Self {
        Self { z_index, position }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_z_keeps_list_position() {
        let mut keys = vec![SortKey::new(1, 0), SortKey::new(0, 1), SortKey::new(1, 2), SortKey::new(-3, 3)];
        keys.sort();
        let positions: Vec<u32> = keys.iter().map(|k| k.position).collect();
        assert_eq!(positions, vec![3, 1, 0, 2]);
    }
}
