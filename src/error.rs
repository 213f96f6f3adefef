#![allow(clippy::module_name_repetitions)]

use std::error::Error;
use std::fmt::{self, Display};

/// [`ViewError`] types returned by the removal methods of snapshot iterators.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ViewError {
    /// Unsupported: a value does not identify the entry to remove.
    Unsupported,
    /// NoCurrentElement: the iterator has not yielded any element yet.
    NoCurrentElement,
}

impl Display for ViewError {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewError::Unsupported => f.write_str("removal through a value iterator"),
            ViewError::NoCurrentElement => f.write_str("the iterator has no current element"),
        }
    }
}

impl Error for ViewError {}
