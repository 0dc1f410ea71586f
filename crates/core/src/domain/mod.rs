pub mod budget;
pub mod lead;
pub mod reply;
pub mod run;
pub mod workflow;
