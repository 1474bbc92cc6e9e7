//! Background work that outlives the command that started it.

pub mod detach;
