pub mod canonical;
pub mod workers_ai;
