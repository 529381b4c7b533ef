pub mod extract;
pub mod output;
pub mod run;
pub mod serve;
