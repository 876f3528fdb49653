pub mod audit;
pub mod ws;
