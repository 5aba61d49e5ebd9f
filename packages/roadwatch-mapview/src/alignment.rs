/// Map accelerometer sample `i` onto the GPS track when the two were
/// recorded at different rates.
///
/// The position is taken proportionally, `floor(i * gps_len / accel_len)`,
/// clamped to the last fix. Returns `None` when either series is empty.
pub fn gps_index(i: usize, accel_len: usize, gps_len: usize) -> Option<usize> {
    if accel_len == 0 || gps_len == 0 {
        return None;
    }
    let scaled = (i as u128 * gps_len as u128) / accel_len as u128;
    Some(scaled.min(gps_len as u128 - 1) as usize)
}

/// Pick, for every accelerometer index, the GPS element it aligns with
pub fn align<T: Copy>(accel_len: usize, gps: &[T]) -> Vec<Option<T>> {
    (0..accel_len)
        .map(|i| gps_index(i, accel_len, gps.len()).map(|g| gps[g]))
        .collect()
}
