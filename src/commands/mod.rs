// Container convergence
pub mod reconcile;

// Graph access
pub mod resources;
pub mod unix_id;

// Background work
pub mod timers;

pub mod status;
