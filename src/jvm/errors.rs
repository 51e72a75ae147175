use super::BinaryName;

#[derive(Debug)]
pub enum Error {
    /// A string is not a valid class or member name
    MalformedName(String),

    /// The same loader already defines a class with this name
    DuplicateClass(BinaryName),
}
