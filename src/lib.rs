pub mod db;
pub mod effect_engine;
pub mod emission_gate;
pub mod lifecycle;
pub mod metrics_window;
pub mod recommendation;
pub mod rule_engine;
