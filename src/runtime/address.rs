use std::fmt;
use std::ops::{Add, Sub};

/// Size in bytes of a machine word
pub const WORD_SIZE: usize = 8;

/// Native address, in bytes
///
/// Arithmetic with `usize` is in bytes. Use [`Address::add_words`] and [`Address::sub_words`] for
/// stack slot arithmetic.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub usize);

impl Address {
    pub const NULL: Address = Address(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn is_word_aligned(self) -> bool {
        self.0 % WORD_SIZE == 0
    }

    pub fn add_words(self, words: usize) -> Address {
        Address(self.0 + words * WORD_SIZE)
    }

    pub fn sub_words(self, words: usize) -> Address {
        Address(self.0 - words * WORD_SIZE)
    }

    /// Null addresses stand for "not there" in machine words
    pub fn from_word(word: usize) -> Option<Address> {
        if word == 0 {
            None
        } else {
            Some(Address(word))
        }
    }
}

impl Add<usize> for Address {
    type Output = Address;

    fn add(self, bytes: usize) -> Address {
        Address(self.0 + bytes)
    }
}

impl Sub<usize> for Address {
    type Output = Address;

    fn sub(self, bytes: usize) -> Address {
        Address(self.0 - bytes)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
