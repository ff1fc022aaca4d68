pub mod dta;
pub mod input;
pub mod output;
pub mod runner;
