#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_possible_wrap)]
mod bitwise;

#[allow(clippy::missing_panics_doc)]
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::unreadable_literal)]
pub mod bus;

#[allow(clippy::module_name_repetitions)]
pub mod cortex_m;
pub mod cpu;

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::unreadable_literal)]
#[allow(clippy::similar_names)]
pub mod exception;

#[allow(clippy::cast_possible_wrap)]
#[allow(clippy::cast_sign_loss)]
pub mod nvic;

#[allow(clippy::unreadable_literal)]
pub mod sysreg;
pub mod trace;

pub use cortex_m::CortexM;
