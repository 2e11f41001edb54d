use std::sync::Arc;

/// Per-cycle behavior of a clocked module.
///
/// A cycle is two passes over every module: `tick_one` computes the next state from the committed
/// state, then `commit` makes it current. No module may observe another module's next state.
pub trait ModuleBehaviors {
    fn tick_one(&mut self);
    fn commit(&mut self);
    fn reset(&mut self);
}

pub trait Parameterizable {
    type ConfigType;

    fn conf(&self) -> &Self::ConfigType;

    fn init_conf(&mut self, conf: Arc<Self::ConfigType>);
}

/// Anything holding staged writes that must be applied in the commit pass.
pub trait Committable {
    fn commit(&self);
    /// Drop everything, staged or committed.
    fn clear(&self);
}
