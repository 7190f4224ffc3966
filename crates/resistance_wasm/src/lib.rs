//! WASM bridge exposing the resistance core to the browser front end.

mod analysis;
mod system;

pub use analysis::{default_initial_conditions, format_magnitude, run_simulation};
pub use system::WasmModel;
