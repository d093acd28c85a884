// src/exec/mod.rs

//! Child-process helpers: captured one-shot spawns (used by the
//! configuration prober) and process-tree termination.

pub mod kill;
pub mod process;

pub use kill::{KillSignal, kill_process_tree};
pub use process::{CapturedOutput, run_captured};
