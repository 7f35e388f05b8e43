mod process;

pub use process::{descendant_pids, is_process_alive, kill_process, kill_process_tree};
