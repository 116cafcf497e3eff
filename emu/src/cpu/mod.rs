pub mod config;
pub mod control;
pub mod cpu_modes;
pub mod excret;

#[allow(clippy::unreadable_literal)]
pub mod fault_status;
pub mod fpccr;
pub mod psr;
pub mod register_bank;
pub mod registers;
pub mod state;
