pub mod dates;
pub mod deterministic;
pub mod hybrid;
pub mod intent;
pub mod semantic;

pub use deterministic::DeterministicInterpreter;
pub use hybrid::HybridInterpreter;
pub use intent::{DashboardContext, Intent, Interpretation, Interpreter, InterpreterSource};
pub use semantic::SemanticInterpreter;
