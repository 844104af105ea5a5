/// Case-insensitive SDBM hash over the lowercase form of the input, using
/// 32-bit wraparound arithmetic. The result is the persisted primary key for
/// subscribers, so the algorithm must stay bit-exact: any change breaks
/// lookups of already-stored rows.
///
/// Lowercasing is whole-string Unicode case mapping, the same mapping the
/// persisted ids were produced with; where a character lowercases to several
/// code points, every one of them feeds the accumulator.
pub fn sdbm_lower(s: &str) -> i32 {
    let mut hash: u32 = 0;

    for c in s.to_lowercase().chars() {
        hash = (c as u32)
            .wrapping_add(hash << 6)
            .wrapping_add(hash << 16)
            .wrapping_sub(hash);
    }

    hash as i32
}

/// Unsubscribe credential for an id: the zero-padded uppercase hex form of
/// its unsigned reinterpretation, always exactly 8 characters.
pub fn token_of(id: i32) -> String {
    format!("{:08X}", id as u32)
}

/// Recovers the id a token encodes. Anything that is not exactly 8 hex
/// characters is rejected.
pub fn id_of_token(token: &str) -> Option<i32> {
    if token.len() != 8 || !token.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    u32::from_str_radix(token, 16).ok().map(|value| value as i32)
}
