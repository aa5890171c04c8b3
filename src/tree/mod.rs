pub mod arena;
pub mod commission;
pub mod node;
pub mod security;
pub mod strategy;

pub use arena::Tree;
pub use commission::Commission;
pub use node::{
    is_close, is_zero, Node, NodeId, NodeKind, NodeSpec, SecurityKind, SecuritySpec,
    SecurityState, StrategySpec, StrategyState, UniverseColumn,
};
pub use security::Outlay;
