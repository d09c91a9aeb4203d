//! R-chart control constants.

/// D3/D4 factors for subgroup sizes 2 through 10. Sizes outside the table
/// are an invalid configuration, not an insufficiency.
pub fn range_chart_constants(subgroup_size: usize) -> Option<(f64, f64)> {
    let (d3, d4) = match subgroup_size {
        2 => (0.0, 3.267),
        3 => (0.0, 2.574),
        4 => (0.0, 2.282),
        5 => (0.0, 2.114),
        6 => (0.0, 2.004),
        7 => (0.076, 1.924),
        8 => (0.136, 1.864),
        9 => (0.184, 1.816),
        10 => (0.223, 1.777),
        _ => return None,
    };
    Some((d3, d4))
}

pub fn is_supported_subgroup_size(size: usize) -> bool {
    range_chart_constants(size).is_some()
}
