use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of where an allocation came from.
///
/// The set is closed: every counter table and report section is built with an
/// exhaustive `match` over these variants.
///
/// # Variants
///
/// * `Container` - Backing storage of a tracked growable container
/// * `Shared` - Shared-ownership pointers ([`TrackedRc`](crate::TrackedRc))
/// * `Explicit` - Manual `allocate`/`deallocate` calls
/// * `Unspecified` - Anything routed through a resource without a category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Container,
    Shared,
    Explicit,
    Unspecified,
}

impl Category {
    /// All categories in report order.
    pub const ALL: [Category; 4] = [
        Category::Container,
        Category::Shared,
        Category::Explicit,
        Category::Unspecified,
    ];
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Container => write!(f, "Category::Container"),
            Category::Shared => write!(f, "Category::Shared"),
            Category::Explicit => write!(f, "Category::Explicit"),
            Category::Unspecified => write!(f, "Category::Unspecified"),
        }
    }
}
