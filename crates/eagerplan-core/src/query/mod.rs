//! Selection normalization, plan compilation and execution.

pub mod compiler;
pub mod cursor;
pub mod executor;
pub mod explain;
pub mod pagination;
pub mod plan;
pub mod walker;

pub use compiler::{CompiledQuery, PlanCompiler};
pub use cursor::{decode_row_cursor, encode_row_cursor, ensure_total_order, seek_after, seek_before};
pub use executor::{PlanExecutor, QueryOutput};
pub use explain::{BatchSummary, LevelSummary, PlanSummary};
pub use pagination::{page_request_from_args, PageWindow, Slice};
pub use plan::{BatchLoadDescriptor, CompiledPlan, JoinPlan};
pub use walker::{ConnectionSelection, FieldNode, SelectionWalker};
