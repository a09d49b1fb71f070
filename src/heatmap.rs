use std::collections::HashMap;

/// A coordinate pair with the number of records that share it exactly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedPoint {
    pub lat: f64,
    pub lon: f64,
    pub weight: u64,
}

/// Collapses record coordinates into weighted points, first-seen order.
///
/// Records without coordinates are dropped. Grouping is bit-exact: all
/// records sharing a key got the same resolved point, so no tolerance is
/// needed. An empty result means "nothing to render", not an error.
pub fn aggregate(coordinates: impl IntoIterator<Item = (Option<f64>, Option<f64>)>) -> Vec<WeightedPoint> {
    let mut order: Vec<(u64, u64)> = Vec::new();
    let mut points: HashMap<(u64, u64), WeightedPoint> = HashMap::new();

    for (lat, lon) in coordinates {
        let (Some(lat), Some(lon)) = (lat, lon) else {
            continue;
        };
        let bits = (lat.to_bits(), lon.to_bits());
        match points.get_mut(&bits) {
            Some(point) => point.weight += 1,
            None => {
                order.push(bits);
                points.insert(bits, WeightedPoint { lat, lon, weight: 1 });
            }
        }
    }

    order
        .into_iter()
        .filter_map(|bits| points.remove(&bits))
        .collect()
}
