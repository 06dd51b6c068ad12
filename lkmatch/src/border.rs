/// How pixel lookups outside the image extent are resolved.
///
/// Warps routinely move sample points off the grid, so every lookup made by
/// the matcher goes through one of these policies instead of faulting.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum BorderMode {
    /// Repeat the nearest edge pixel.
    #[default]
    Clamp,
    /// Every pixel outside the image reads as the given value.
    Constant(f32),
    /// Mirror around the edge pixels without repeating them (`dcb|abcd|cba`).
    Reflect101,
}

/// Maps a possibly out-of-range index onto `[0, len)`.
///
/// Returns `None` for [`BorderMode::Constant`] when `i` is outside the range
/// (the caller substitutes the constant), and for an empty axis.
///
/// # Examples
/// ```
/// # use lkmatch::border::{map_index, BorderMode};
/// assert_eq!(map_index(-2, 5, BorderMode::Clamp), Some(0));
/// assert_eq!(map_index(6, 5, BorderMode::Reflect101), Some(2));
/// assert_eq!(map_index(7, 5, BorderMode::Constant(0.0)), None);
/// ```
pub fn map_index(i: isize, len: usize, mode: BorderMode) -> Option<usize> {
    if len == 0 {
        return None;
    }
    if i >= 0 && (i as usize) < len {
        return Some(i as usize);
    }
    match mode {
        BorderMode::Constant(_) => None,
        BorderMode::Clamp => {
            if i < 0 {
                Some(0)
            } else {
                Some(len - 1)
            }
        }
        BorderMode::Reflect101 => {
            if len == 1 {
                return Some(0);
            }
            let period = (2 * len - 2) as isize;
            let r = i.rem_euclid(period) as usize;
            if r < len {
                Some(r)
            } else {
                Some(2 * len - 2 - r)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{map_index, BorderMode};

    #[test]
    fn clamp_pins_to_edges() {
        let mode = BorderMode::Clamp;
        assert_eq!(map_index(-3, 5, mode), Some(0));
        assert_eq!(map_index(0, 5, mode), Some(0));
        assert_eq!(map_index(4, 5, mode), Some(4));
        assert_eq!(map_index(99, 5, mode), Some(4));
    }

    #[test]
    fn reflect101_mirrors_without_repeating_the_edge() {
        let mode = BorderMode::Reflect101;
        let cases = [(-3, 3), (-1, 1), (0, 0), (4, 4), (5, 3), (7, 1), (8, 0)];
        for (i, expected) in cases {
            assert_eq!(map_index(i, 5, mode), Some(expected), "index {i}");
        }
        for i in -4..=4 {
            assert_eq!(map_index(i, 1, mode), Some(0));
        }
    }

    #[test]
    fn constant_only_maps_inside() {
        let mode = BorderMode::Constant(7.0);
        assert_eq!(map_index(2, 5, mode), Some(2));
        assert_eq!(map_index(-1, 5, mode), None);
        assert_eq!(map_index(5, 5, mode), None);
    }

    #[test]
    fn empty_axis_has_no_index() {
        assert_eq!(map_index(0, 0, BorderMode::Clamp), None);
    }
}
