//! Testing utilities for strata.
//!
//! # Modules
//!
//! - [`temp_project`]: Temporary source trees with controllable modification times
//! - [`builders`]: Artifact builders that record how often they ran
//! - [`proptest_strategies`]: Proptest strategies for strata types
//!
//! # Example
//!
//! ```rust,no_run
//! use strata_test_utils::prelude::*;
//! use strata_test_utils::prelude::assert_eq;
//!
//! let project = TempProject::new()
//!     .unwrap()
//!     .with_file("a.txt", "import b.txt\n")
//!     .unwrap()
//!     .with_file("b.txt", "leaf\n")
//!     .unwrap();
//! let sources = project.sources("txt").unwrap();
//! assert_eq!(sources.len(), 2);
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod builders;
pub mod proptest_strategies;
pub mod temp_project;

/// Re-export commonly used testing utilities.
pub mod prelude {
    pub use crate::builders::{CountingBuilder, FailingBuilder};
    pub use crate::proptest_strategies::*;
    pub use crate::temp_project::TempProject;

    // Re-export common testing crates
    pub use pretty_assertions::{assert_eq, assert_ne};
    pub use proptest::prelude::*;
}
