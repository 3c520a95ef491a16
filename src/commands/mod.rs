//! CLI command handlers.

mod cleanup;
mod follow;
mod list;
mod submit;

pub use cleanup::{run_cleanup_command, run_delete_command};
pub use list::{run_list_command, run_show_command};
pub use submit::{run_crawl_command, run_generate_command, run_restart_command};
