//! Process exit codes. Scripts depend on these; do not renumber.

pub const SUCCESS: i32 = 0;
/// Request ended in FAILED, or the statement did not validate.
pub const PIPELINE_FAILED: i32 = 1;
/// Bad config, unreadable database or another setup problem.
pub const CONFIG_ERROR: i32 = 2;
