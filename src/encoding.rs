use encoding_rs::WINDOWS_1251;

/// Best-effort repair of header strings from legacy broadcast servers that
/// send non-UTF-8 bytes. Never fails; when no heuristic confirms a fix the
/// input is returned unchanged.
///
/// Heuristics, in order:
/// 1. pure ASCII passes through untouched
/// 2. UTF-8 bytes misread as Latin-1 (marker chars U+00C2..U+00C3,
///    U+00D0..U+00D1) are mapped back to bytes and re-decoded as UTF-8
/// 3. otherwise the byte form is decoded as Windows-1251 and accepted only
///    if the result actually contains Cyrillic
pub fn repair(raw: &str) -> String {
    if raw.is_ascii() {
        return raw.to_string();
    }
    let bytes = match latin1_bytes(raw) {
        Some(bytes) => bytes,
        // codepoints above U+00FF cannot come from a single-byte misread
        None => return raw.to_string(),
    };
    if has_mojibake_markers(raw) {
        if let Ok(fixed) = String::from_utf8(bytes.clone()) {
            return fixed;
        }
    }
    let (decoded, _, had_errors) = WINDOWS_1251.decode(&bytes);
    if !had_errors && decoded.chars().any(is_cyrillic) {
        return decoded.into_owned();
    }
    raw.to_string()
}

fn latin1_bytes(raw: &str) -> Option<Vec<u8>> {
    raw.chars()
        .map(|c| {
            let cp = c as u32;
            if cp <= 0xFF {
                Some(cp as u8)
            } else {
                None
            }
        })
        .collect()
}

// lead bytes of two-byte UTF-8 sequences for Latin supplement and Cyrillic,
// the classic "Ã©"/"Ð°" artifacts
fn has_mojibake_markers(raw: &str) -> bool {
    raw.chars().any(|c| {
        let cp = c as u32;
        (0xC2..=0xC3).contains(&cp) || (0xD0..=0xD1).contains(&cp)
    })
}

fn is_cyrillic(c: char) -> bool {
    ('\u{0400}'..='\u{04FF}').contains(&c)
}
