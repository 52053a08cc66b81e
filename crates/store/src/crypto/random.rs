use rand::Rng;

/// Base58 alphabet; no `0`, `O`, `I` or `l`
pub const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Length of generated node ids
pub const ID_LENGTH: usize = 4;

/// A random base58 string of the given length
pub fn random_string(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| BASE58_ALPHABET[rng.random_range(0..BASE58_ALPHABET.len())] as char)
        .collect()
}

/// A short random node id whose first character is a letter
///
/// Uniqueness within a tree is the caller's job; see
/// [`Tree::new_id`](crate::tree::Tree::new_id).
pub fn random_id() -> String {
    loop {
        let id = random_string(ID_LENGTH);
        if id.starts_with(|c: char| c.is_ascii_alphabetic()) {
            return id;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_random_id_shape() {
        for _ in 0..200 {
            let id = random_id();
            assert_eq!(id.len(), ID_LENGTH);
            assert!(id.chars().next().unwrap().is_ascii_alphabetic());
            assert!(id.bytes().all(|b| BASE58_ALPHABET.contains(&b)));
        }
    }
}
