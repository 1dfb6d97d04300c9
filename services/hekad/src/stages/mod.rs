pub mod counting_filter;
pub mod stdin_input;
pub mod stdout_output;
