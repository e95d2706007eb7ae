use crate::error::PartitionNameError;

/// Longest partition name fjall accepts. Partitions are directories, so this
/// also stays within common file name limits.
pub(crate) const MAX_PARTITION_NAME: usize = 255;

const HEX_MARKER: char = '#';
const HEX: &[u8; 16] = b"0123456789abcdef";

/// Maps a bucket name to a fjall partition name.
///
/// Fjall partition names only allow `a-zA-Z0-9_-.#$`. Names made of
/// `[A-Za-z0-9_-]` pass through unchanged; anything else is hex encoded behind
/// a `#` marker. The marker never appears in a pass-through name, so the
/// mapping is reversible and collision-free.
pub(crate) fn encode_bucket(bucket: &[u8]) -> Result<String, PartitionNameError> {
    if bucket.is_empty() {
        return Err(PartitionNameError::Empty);
    }

    let name = if bucket.iter().all(|b| is_plain(*b)) {
        // all bytes are ASCII
        bucket.iter().map(|b| *b as char).collect::<String>()
    } else {
        let mut name = String::with_capacity(1 + bucket.len() * 2);
        name.push(HEX_MARKER);
        for b in bucket {
            name.push(HEX[(b >> 4) as usize] as char);
            name.push(HEX[(b & 0x0f) as usize] as char);
        }
        name
    };

    if name.len() > MAX_PARTITION_NAME {
        return Err(PartitionNameError::TooLong(name.len(), MAX_PARTITION_NAME));
    }
    Ok(name)
}

/// Reverses [`encode_bucket`].
pub(crate) fn decode_partition(name: &str) -> Result<Vec<u8>, PartitionNameError> {
    match name.strip_prefix(HEX_MARKER) {
        None if !name.is_empty() && name.bytes().all(is_plain) => Ok(name.as_bytes().to_vec()),
        None => Err(PartitionNameError::Foreign(name.to_string())),
        Some(hex) => {
            if hex.is_empty() || hex.len() % 2 != 0 {
                return Err(PartitionNameError::Foreign(name.to_string()));
            }
            hex.as_bytes()
                .chunks(2)
                .map(|pair| match (nibble(pair[0]), nibble(pair[1])) {
                    (Some(high), Some(low)) => Ok((high << 4) | low),
                    _ => Err(PartitionNameError::Foreign(name.to_string())),
                })
                .collect()
        }
    }
}

#[inline]
fn is_plain(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

#[inline]
fn nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_names_pass_through() {
        assert_eq!(encode_bucket(b"users_v2-x").unwrap(), "users_v2-x");
        assert_eq!(decode_partition("users_v2-x").unwrap(), b"users_v2-x");
    }

    #[test]
    fn other_names_are_hex_encoded() {
        let name = encode_bucket(b"a.b|c").unwrap();
        assert_eq!(name, "#612e627c63");
        assert_eq!(decode_partition(&name).unwrap(), b"a.b|c");

        let binary = [0u8, 255, 16];
        assert_eq!(decode_partition(&encode_bucket(&binary).unwrap()).unwrap(), binary);
    }

    #[test]
    fn encoded_and_plain_names_never_collide() {
        // "#61" as a bucket name is itself encoded
        let literal = encode_bucket(b"#61").unwrap();
        assert_ne!(literal, encode_bucket(b"a").unwrap());
        assert_eq!(decode_partition(&literal).unwrap(), b"#61");
    }

    #[test]
    fn rejects_bad_names() {
        assert_eq!(encode_bucket(b""), Err(PartitionNameError::Empty));
        assert!(matches!(
            encode_bucket(&[b'.'; 300]),
            Err(PartitionNameError::TooLong(601, MAX_PARTITION_NAME))
        ));
        assert!(encode_bucket(&[b'a'; 255]).is_ok());
        assert_eq!(
            encode_bucket(&[b'a'; 256]),
            Err(PartitionNameError::TooLong(256, 255))
        );
        // "#" plus two hex digits per byte
        assert!(encode_bucket(&[b'.'; 127]).is_ok());
        assert_eq!(
            encode_bucket(&[b'.'; 128]),
            Err(PartitionNameError::TooLong(257, 255))
        );
        assert!(decode_partition("#6").is_err());
        assert!(decode_partition("#zz").is_err());
        assert!(decode_partition("a.b").is_err());
    }
}
