//! Fixed width character array fields.
//!
//! Trace payloads are arrays of signed 8-bit cells, one per character. Text
//! longer than the array is truncated, shorter text is padded with NUL cells.

use crate::error::GenError;

/// Encode `text` into exactly `width` cells.
///
/// Characters past `width` are dropped without checking them. Any kept
/// character whose ordinal does not fit an `i8` fails with
/// [`GenError::UnencodableCharacter`], naming `field`.
///
/// ```
/// use tracegen::payload::encode_char_array;
///
/// assert_eq!(encode_char_array("hi", 5, "f").unwrap(), vec![104, 105, 0, 0, 0]);
/// ```
pub fn encode_char_array(text: &str, width: usize, field: &str) -> Result<Vec<u8>, GenError> {
    let mut cells = Vec::with_capacity(width);
    for ch in text.chars().take(width) {
        let cell = i8::try_from(u32::from(ch)).map_err(|_| GenError::UnencodableCharacter {
            ch,
            field: field.to_string(),
        })?;
        cells.push(cell as u8);
    }
    cells.resize(width, 0);
    Ok(cells)
}

/// Text of a character array up to its first NUL cell.
pub fn char_array_to_string(cells: &[u8]) -> String {
    cells
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| char::from(c))
        .collect()
}
