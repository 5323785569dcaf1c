use displaydoc::Display;

/// The raw value {0} does not correspond to any descriptor status.
#[derive(Debug, Display, Eq, PartialEq)]
pub struct InvalidStatusError(pub(crate) u8);
