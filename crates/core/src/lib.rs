pub mod children;
pub mod clock;
pub mod content;
pub mod error;
pub mod ids;
pub mod operations;
pub mod records;
pub mod rich_text;
pub mod schema;
pub mod view;

pub use children::{ChildField, ChildSlot, Position, Side};
pub use clock::EditClock;
pub use content::{BlockKind, BlockSpec, BlockUpdate, LeafSpec};
pub use error::CoreError;
pub use ids::*;
pub use operations::{Command, Operation, Table, TransactionRequest};
pub use records::{Block, BlockType, Collection, Permission, Record, View, WireType, Workspace, WorkspaceView};
pub use schema::{Schema, SchemaType, SchemaUnit};
pub use view::{ViewKind, ViewSpec};
