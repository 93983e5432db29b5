/// Task definitions and their schemas
mod task;
pub use task::{InputRef, OutputSchema, OverrideValue, ParamSchema, Task, Valid};

/// Parameter values
mod value;
pub use value::Value;

/// Parameter binding and precedence
mod binding;
pub use binding::{bind_params, Binding, CliOverride};

/// Discovery of `.task` files under a root directory
mod universe;
pub use universe::TaskUniverse;

/// Canonical node hashes
mod fingerprint;
pub use fingerprint::{fingerprint, Fingerprint};
