//! CLI command implementations.
//!
//! | Module    | Commands handled            |
//! |-----------|-----------------------------|
//! | `process` | `Process`, `Url`, `Retry`   |
//! | `view`    | `Stats`, `Show`             |
//! | `config`  | `Config`                    |

pub mod config;
pub mod process;
pub mod view;

pub use config::cmd_config;
pub use process::{cmd_process, cmd_retry, cmd_url};
pub use view::{cmd_show, cmd_stats};
