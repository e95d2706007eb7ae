use crate::error::TableNameError;

const HEX_MARKER: char = '#';

/// Maps a bucket name to a redb table name.
///
/// UTF-8 names that do not start with `#` are used as they are. Anything else
/// becomes `#` followed by the lowercase hex of the bytes.
pub(crate) fn encode_bucket(bucket: &[u8]) -> Result<String, TableNameError> {
    if bucket.is_empty() {
        return Err(TableNameError::Empty);
    }
    match std::str::from_utf8(bucket) {
        Ok(name) if !name.starts_with(HEX_MARKER) => Ok(name.to_string()),
        _ => {
            let mut name = String::with_capacity(1 + bucket.len() * 2);
            name.push(HEX_MARKER);
            for b in bucket {
                name.push_str(&format!("{:02x}", b));
            }
            Ok(name)
        }
    }
}

/// Reverses [`encode_bucket`].
pub(crate) fn decode_table(name: &str) -> Result<Vec<u8>, TableNameError> {
    let foreign = || TableNameError::Foreign(name.to_string());
    match name.strip_prefix(HEX_MARKER) {
        None if name.is_empty() => Err(foreign()),
        None => Ok(name.as_bytes().to_vec()),
        Some(hex) if hex.is_empty() || hex.len() % 2 != 0 || !hex.is_ascii() => Err(foreign()),
        Some(hex) => (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| foreign()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_names_pass_through() {
        assert_eq!(encode_bucket("users.v1/é".as_bytes()).unwrap(), "users.v1/é");
        assert_eq!(decode_table("users.v1/é").unwrap(), "users.v1/é".as_bytes());
    }

    #[test]
    fn marker_and_binary_names_are_hex_encoded() {
        assert_eq!(encode_bucket(b"#tag").unwrap(), "#23746167");
        assert_eq!(decode_table("#23746167").unwrap(), b"#tag");

        let binary = [0xffu8, 0x00];
        let name = encode_bucket(&binary).unwrap();
        assert_eq!(name, "#ff00");
        assert_eq!(decode_table(&name).unwrap(), binary);
    }

    #[test]
    fn rejects_malformed_names() {
        assert_eq!(encode_bucket(b""), Err(TableNameError::Empty));
        assert!(decode_table("").is_err());
        assert!(decode_table("#").is_err());
        assert!(decode_table("#abc").is_err());
        assert!(decode_table("#zz").is_err());
    }
}
