use rand::{Rng, distr::Alphanumeric};

/// Length of generated OAuth client secrets.
pub const CLIENT_SECRET_LEN: usize = 32;

/// Returns a random string of `len` ASCII alphanumeric characters.
pub fn random_string(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_string_is_alphanumeric() {
        let secret = random_string(CLIENT_SECRET_LEN);

        assert_eq!(secret.len(), CLIENT_SECRET_LEN);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn random_strings_differ() {
        assert_ne!(random_string(CLIENT_SECRET_LEN), random_string(CLIENT_SECRET_LEN));
    }
}
