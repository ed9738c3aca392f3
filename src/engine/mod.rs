//! The reactive core between a loaded dataset and the chart widgets.
//!
//! ```text
//!   FilterState ─► eligible rows ─► projection (per view) ─► stats ─► View
//!                                                                     │
//!                  SyncCoordinator ◄── widget events ── ChartWidget ◄─┘
//!                  AnnotationManager ── overlays ──────► ChartWidget
//! ```

pub mod annotations;
pub mod projection;
pub mod stats;
pub mod sync;
pub mod view;
