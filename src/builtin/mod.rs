pub mod id_map;
pub mod queue;
