pub mod aggregator;
pub mod change_filter;
pub mod prompt_input;
