//! Verhoeff check digit used by manual pairing codes.

const D: [[u8; 10]; 10] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
    [1, 2, 3, 4, 0, 6, 7, 8, 9, 5],
    [2, 3, 4, 0, 1, 7, 8, 9, 5, 6],
    [3, 4, 0, 1, 2, 8, 9, 5, 6, 7],
    [4, 0, 1, 2, 3, 9, 5, 6, 7, 8],
    [5, 9, 8, 7, 6, 0, 4, 3, 2, 1],
    [6, 5, 9, 8, 7, 1, 0, 4, 3, 2],
    [7, 6, 5, 9, 8, 2, 1, 0, 4, 3],
    [8, 7, 6, 5, 9, 3, 2, 1, 0, 4],
    [9, 8, 7, 6, 5, 4, 3, 2, 1, 0],
];

const P: [[u8; 10]; 8] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
    [1, 5, 7, 6, 2, 8, 3, 0, 9, 4],
    [5, 8, 0, 3, 7, 9, 6, 1, 4, 2],
    [8, 9, 1, 6, 0, 4, 3, 5, 2, 7],
    [9, 4, 5, 3, 1, 2, 6, 8, 7, 0],
    [4, 2, 8, 6, 5, 7, 3, 9, 0, 1],
    [2, 7, 9, 3, 8, 0, 6, 4, 1, 5],
    [7, 0, 4, 6, 9, 1, 3, 2, 5, 8],
];

const INV: [u8; 10] = [0, 4, 3, 2, 1, 5, 6, 7, 8, 9];

/// Run checksum over digits starting at position `first_pos` (counted from the right).
/// Returns None when input contains non digit.
fn checksum(digits: &str, first_pos: usize) -> Option<u8> {
    let mut c = 0u8;
    for (i, ch) in digits.bytes().rev().enumerate() {
        if !ch.is_ascii_digit() {
            return None;
        }
        let pos = i + first_pos;
        c = D[c as usize][P[pos % 8][(ch - b'0') as usize] as usize];
    }
    Some(c)
}

/// Compute check digit for decimal string. None if string contains non digit.
pub fn generate(digits: &str) -> Option<char> {
    // placeholder '0' for the check digit occupies position 0
    let c = checksum(digits, 1)?;
    Some((b'0' + INV[c as usize]) as char)
}

/// Validate decimal string whose last character is check digit.
pub fn validate(digits_with_check: &str) -> bool {
    !digits_with_check.is_empty() && checksum(digits_with_check, 0) == Some(0)
}
