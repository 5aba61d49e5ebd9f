// Peak finding over a one-dimensional series.
//
// Local maxima are qualified by topographic prominence and by their width
// measured at half prominence. Flat tops count as one peak located at the
// middle of the plateau. Samples at either edge of the series are never
// peaks.

/// Thresholds a local maximum has to meet to be reported
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakCriteria {
    /// Minimum prominence, in the units of the series
    pub prominence: f64,
    /// Minimum width at half prominence, in samples
    pub width: f64,
}

/// A qualified peak
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub index: usize,
    pub prominence: f64,
    pub width: f64,
}

/// Indices of all local maxima, in ascending order
pub fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.len() < 3 {
        return peaks;
    }

    let last = x.len() - 1;
    let mut i = 1;
    while i < last {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < last && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Prominence of the peak at `peak` with the indices of its left and right
/// bases
fn prominence(x: &[f64], peak: usize) -> (f64, usize, usize) {
    let height = x[peak];

    let mut left_min = height;
    let mut left_base = peak;
    let mut i = peak;
    loop {
        if x[i] > height {
            break;
        }
        if x[i] < left_min {
            left_min = x[i];
            left_base = i;
        }
        if i == 0 {
            break;
        }
        i -= 1;
    }

    let mut right_min = height;
    let mut right_base = peak;
    for (j, &value) in x.iter().enumerate().skip(peak) {
        if value > height {
            break;
        }
        if value < right_min {
            right_min = value;
            right_base = j;
        }
    }

    (height - left_min.max(right_min), left_base, right_base)
}

/// Width at half prominence, interpolated linearly between samples
fn width(x: &[f64], peak: usize, prominence: f64, left_base: usize, right_base: usize) -> f64 {
    let height = x[peak] - prominence * 0.5;

    let mut i = peak;
    while left_base < i && height < x[i] {
        i -= 1;
    }
    let mut left = i as f64;
    if x[i] < height {
        left += (height - x[i]) / (x[i + 1] - x[i]);
    }

    let mut i = peak;
    while i < right_base && height < x[i] {
        i += 1;
    }
    let mut right = i as f64;
    if x[i] < height {
        right -= (height - x[i]) / (x[i - 1] - x[i]);
    }

    right - left
}

/// Find local maxima of `x` meeting both thresholds, in ascending index order
pub fn find_peaks(x: &[f64], criteria: &PeakCriteria) -> Vec<Peak> {
    local_maxima(x)
        .into_iter()
        .filter_map(|index| {
            let (prominence, left_base, right_base) = prominence(x, index);
            if prominence < criteria.prominence {
                return None;
            }
            let width = width(x, index, prominence, left_base, right_base);
            (width >= criteria.width).then_some(Peak {
                index,
                prominence,
                width,
            })
        })
        .collect()
}
