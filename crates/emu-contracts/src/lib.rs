//! Shared, version-pinned identifiers for the foreign emulator module.
//!
//! These constants are the single source of truth for export symbols and the
//! debug-log import exchanged with the emulator. Renaming any of them is a
//! wire-contract change.

pub const EXPORT_MEMORY: &str = "memory";
pub const EXPORT_MALLOC: &str = "malloc";
pub const EXPORT_FREE: &str = "free";

pub const EXPORT_VERSION: &str = "version";
pub const EXPORT_CREATE_EMULATOR: &str = "create_emulator";
pub const EXPORT_DESTROY_EMULATOR: &str = "destroy_emulator";
pub const EXPORT_RUN_GET_METHOD: &str = "run_get_method";
pub const EXPORT_EMULATE_WITH_EMULATOR: &str = "emulate_with_emulator";

pub const EXPORT_SBS_GET_METHOD_SETUP: &str = "setup_sbs_get_method";
pub const EXPORT_SBS_GET_METHOD_STEP: &str = "sbs_step";
pub const EXPORT_SBS_GET_METHOD_STACK: &str = "sbs_get_stack";
pub const EXPORT_SBS_GET_METHOD_CODE_POS: &str = "sbs_get_code_pos";
pub const EXPORT_SBS_GET_METHOD_RESULT: &str = "sbs_get_method_result";
pub const EXPORT_SBS_GET_METHOD_DESTROY: &str = "destroy_tvm_emulator";

pub const EXPORT_SBS_TRANSACTION_SETUP: &str = "em_sbs_transaction";
pub const EXPORT_SBS_TRANSACTION_STEP: &str = "em_sbs_step";
pub const EXPORT_SBS_TRANSACTION_STACK: &str = "em_sbs_stack";
pub const EXPORT_SBS_TRANSACTION_CODE_POS: &str = "em_sbs_code_pos";
pub const EXPORT_SBS_TRANSACTION_RESULT: &str = "em_sbs_transaction_result";

/// Host function the module calls with `(ptr, len)` for every debug line.
pub const IMPORT_MODULE: &str = "env";
pub const IMPORT_DEBUG_LOG: &str = "emu_debug_log";

