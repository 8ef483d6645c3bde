//! The Slurm CLI wrapper: exactly the four binaries spec.md §6 names
//! (`sbatch`, `sacct`, `squeue`, `scancel`), script rendering, and
//! state mapping. Linked by both `local-proxy` and `remote-server` so
//! the script-generation and state-parsing logic exists exactly once.

pub mod cancel;
pub mod error;
pub mod process;
pub mod query;
pub mod script;
pub mod state;
pub mod submit;

pub use cancel::cancel_job;
pub use error::SlurmError;
pub use query::{query_state, QueryResult};
pub use script::{render_batch_script, ScriptParams};
pub use state::map_slurm_state;
pub use submit::submit_batch;
