pub mod alias;
pub mod billing;
pub mod formatter;
pub mod turn;
