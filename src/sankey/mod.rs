//! Sankey flow graph projection
//!
//! Pure transformation from [`FlowData`](crate::upstream::FlowData) to a
//! [`GraphDocument`]; no I/O and no shared state.

pub mod theme;
pub mod transformer;
pub mod types;

pub use theme::{Theme, DEFAULT_THEME};
pub use transformer::{
    allocate, format_node_name, summarize, transform, transform_at, transform_value,
    TransformOptions, WorkAllocation,
};
pub use types::{
    EntityKind, GraphData, GraphDocument, GraphLink, GraphNode, Legend, LegendItem,
    LegendSection, Metadata, NodeCategory, StatEntry, StatsSummary, Styling,
};
