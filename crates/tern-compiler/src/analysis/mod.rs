//! Control-flow analyses shared by the passes and the verifier

pub mod cfg;
pub mod dominance;

pub use cfg::{Cfg, EdgeKind};
pub use dominance::DomTree;
