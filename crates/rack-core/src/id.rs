//! Prefixed identifiers over an upper-case alphabet.

use rand::Rng;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Number of random characters after the kind prefix.
pub const ID_LENGTH: usize = 10;

/// The kind of object an identifier names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Build,
    Release,
    Service,
}

impl IdKind {
    pub fn prefix(self) -> char {
        match self {
            IdKind::Build => 'B',
            IdKind::Release => 'R',
            IdKind::Service => 'S',
        }
    }
}

/// Generate an id like `RABCDEFGHIJ`: the kind prefix followed by
/// `ID_LENGTH` random upper-case letters.
pub fn generate_id(kind: IdKind) -> String {
    random_id(kind.prefix(), ID_LENGTH)
}

/// Generate an id with an arbitrary prefix and length.
pub fn random_id(prefix: char, length: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut id = String::with_capacity(length + 1);
    id.push(prefix);
    for _ in 0..length {
        id.push(ALPHABET[rng.gen_range(0..ALPHABET.len())] as char);
    }
    id
}
