//! The stage planner (§4.2): turns a stage request (epic id, convoy id, or
//! task list) into an execution plan — waves, findings, and an optional
//! stored convoy — ahead of the capacity scheduler ever seeing the work.

pub mod collect;
pub mod dag;
pub mod findings;
pub mod input;
pub mod render;
pub mod stage;
pub mod waves;

pub use dag::{DagNode, ExecutionDag};
pub use findings::{AlwaysActive, Finding, RigPoolState, RigStatusProvider, Severity};
pub use input::{InputError, StageInput};
pub use render::{render_human, render_json};
pub use stage::{StageError, StagePlan, StagePlanner, StageStatus, TableRow};
pub use waves::{Wave, WaveError};
