pub mod columns;
pub mod config;
pub mod error;
pub mod grid;
pub mod menu;
pub mod overlay;
pub mod reconcile;
pub mod render;
pub mod session;
pub mod undo;

pub use columns::{Align, GridColumn, SystemColumn, build_columns, system_columns};
pub use config::GridConfig;
pub use error::{EngineError, RemoteError};
pub use grid::{ColumnSnapshot, ExportView, Focus, GridEffect, GridEvent, GridState, Key, Row};
pub use menu::{ContextMenu, MenuAction, MenuKind, MenuTarget, ToolbarAction, menu_items};
pub use overlay::Ticket;
pub use reconcile::{MenuOutcome, Notice, Reconciler, Request, RequestKind, Response};
pub use render::{CellDisplay, EditorKind, StrategyTable};
pub use session::{GridSession, Remote, execute};
