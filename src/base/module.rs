use std::sync::{Arc, OnceLock};
use crate::base::behavior::*;
use crate::timeq::Cycle;

#[derive(Debug)]
pub struct ModuleBase<T, C> {
    pub cycle: Cycle,
    pub state: T,
    /// Next state computed by `tick_one`, installed by `commit`.
    pub next: Option<T>,
    pub config: OnceLock<Arc<C>>,
}

impl<T: Default, C> Default for ModuleBase<T, C> {
    fn default() -> Self {
        Self {
            cycle: 0,
            state: T::default(),
            next: None,
            config: OnceLock::new(),
        }
    }
}

impl<T, C> ModuleBase<T, C> {
    pub fn with_state(state: T) -> Self {
        Self {
            cycle: 0,
            state,
            next: None,
            config: OnceLock::new(),
        }
    }

    /// Install the pending next state (if any) and advance the local clock.
    pub fn commit(&mut self) {
        if let Some(next) = self.next.take() {
            self.state = next;
        }
        self.cycle = self.cycle.wrapping_add(1);
    }
}

pub trait IsModule: ModuleBehaviors {
    type StateType;
    type ConfigType;

    fn base(&mut self) -> &mut ModuleBase<Self::StateType, Self::ConfigType>;

    fn base_ref(&self) -> &ModuleBase<Self::StateType, Self::ConfigType>;

    fn state(&self) -> &Self::StateType {
        &self.base_ref().state
    }

    fn stage_next(&mut self, next: Self::StateType) {
        self.base().next = Some(next);
    }
}

impl<X> Parameterizable for X where X: IsModule {
    type ConfigType = X::ConfigType;

    fn conf(&self) -> &Self::ConfigType {
        self.base_ref().config.get().expect("config not found, was `init_conf` called in `new`?")
    }

    fn init_conf(&mut self, conf: Arc<Self::ConfigType>) {
        let fresh = self.base().config.set(conf).is_ok();
        assert!(fresh, "config already set");
    }
}

/// arguments: identifier, state type, config type
macro_rules! module {
    ($comp:ident, $T:ty, $C:ty) => {
        impl IsModule for $comp {
            type StateType = $T;
            type ConfigType = $C;

            fn base(&mut self) -> &mut ModuleBase<$T, $C> {
                &mut self.base
            }

            fn base_ref(&self) -> &ModuleBase<$T, $C> {
                &self.base
            }
        }
    };
}

pub(crate) use module;
